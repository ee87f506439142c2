//! Library part of the mission executive.
//!
//! The executive accepts mission goals from the operator console, sequences
//! their legs through the registered executors, and streams feedback back to
//! the console. See `main.rs` for the executable entry point and the cyclic
//! architecture.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod det_client;
pub mod exec;
pub mod frames;
pub mod goal_server;
pub mod manip_client;
pub mod mission_mgr;
pub mod nav_client;
pub mod params;
pub mod waypoints;
