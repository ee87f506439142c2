//! # Navigation Driver Commands
//!
//! The navigation driver exposes a single REQ/REP socket accepting either a
//! command or a state poll.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A command that can be performed by the navigation driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NavCmd {
    /// Transit to the given GPS coordinate.
    Goto { lat_deg: f64, lon_deg: f64 },

    /// Spin on the spot through the given angle, used for search sweeps.
    Spin { angle_rad: f64 },

    /// Relative move in the body frame, used for docking approaches.
    Move { x_m: f64, y_m: f64 },

    /// Stop all motion.
    Stop,
}

/// Response to a [`NavCmd`].
#[derive(Debug, Serialize, Deserialize)]
pub enum NavCmdResponse {
    /// Command was valid and will be executed
    CmdOk,

    /// Command was invalid and has been rejected
    CmdInvalid,

    /// Driver equipment is faulted so the command cannot be actuated
    EqptInvalid,
}

/// Execution state of the navigation driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavState {
    /// No command in progress.
    Idle,

    /// A command is executing.
    Active,

    /// The last command completed successfully.
    Reached,

    /// The last command failed.
    Fault,
}

/// A request to the navigation driver.
#[derive(Debug, Serialize, Deserialize)]
pub enum NavRequest {
    Cmd(NavCmd),
    GetState,
}

/// A response from the navigation driver.
#[derive(Debug, Serialize, Deserialize)]
pub enum NavResponse {
    Cmd(NavCmdResponse),
    State(NavState),
}
