//! # Manipulator Driver Commands
//!
//! The manipulator driver exposes a single REQ/REP socket accepting either a
//! command or a state poll, mirroring the navigation driver contract.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A command that can be performed by the manipulator driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManipCmd {
    /// Run the actuation sequence for the given target.
    Actuate { target: String },

    /// Return the arm to its stowed pose.
    Stow,

    /// Halt the arm immediately.
    Halt,
}

/// Response to a [`ManipCmd`].
#[derive(Debug, Serialize, Deserialize)]
pub enum ManipCmdResponse {
    /// Command was valid and will be executed
    CmdOk,

    /// Command was invalid and has been rejected
    CmdInvalid,

    /// Driver equipment is faulted so the command cannot be actuated
    EqptInvalid,
}

/// Execution state of the manipulator driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManipState {
    /// No actuation in progress.
    Idle,

    /// An actuation is executing.
    Moving,

    /// The last actuation completed successfully.
    Done,

    /// The last actuation failed.
    Fault,
}

/// A request to the manipulator driver.
#[derive(Debug, Serialize, Deserialize)]
pub enum ManipRequest {
    Cmd(ManipCmd),
    GetState,
}

/// A response from the manipulator driver.
#[derive(Debug, Serialize, Deserialize)]
pub enum ManipResponse {
    Cmd(ManipCmdResponse),
    State(ManipState),
}
