//! Host environment utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Environment variable giving the root of the software checkout/deployment.
pub const SW_ROOT_ENV_VAR: &str = "ARES_SW_ROOT";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with the host environment.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("The software root environment variable (ARES_SW_ROOT) is not set")]
    SwRootNotSet,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the software root directory.
///
/// All parameter files and session directories are resolved relative to this
/// root, so it must be set before any executable starts.
pub fn get_sw_root() -> Result<PathBuf, HostError> {
    match std::env::var(SW_ROOT_ENV_VAR) {
        Ok(p) => Ok(PathBuf::from(p)),
        Err(_) => Err(HostError::SwRootNotSet),
    }
}
