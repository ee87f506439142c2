//! # Mission Executive Parameters
//!
//! This module provides parameters for the mission executive.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct TaskExecParams {
    /// Discovery rendezvous address (`host:port`), used if the
    /// `ARES_DISCOVERY_ADDR` environment variable is not set.
    pub rendezvous_addr: Option<String>,

    /// Target period of one executive cycle in seconds
    pub cycle_period_s: f64,

    /// Poll period of executors waiting on driver state, in seconds
    pub exec_poll_period_s: f64,

    /// Grace period for upstream driver availability at leg start, in seconds
    pub upstream_grace_s: f64,

    /// Bound on waiting for a cancellation acknowledgement, in seconds
    pub cancel_ack_timeout_s: f64,

    /// Name of the GPS antenna mount (static)
    pub gps_antenna_mount: String,

    /// Name of the navigation camera mount (requires calibration)
    pub nav_camera_mount: String,

    /// Sweep angle of the marker spin search, in radians
    pub search_spin_rad: f64,

    /// Waypoint table parameter file, relative to the params directory
    pub waypoints_file: String,

    /// Static frames parameter file, relative to the params directory
    pub frames_file: String,

    /// Calibration record file written by the per-unit calibration
    /// procedure, relative to the software root. Optional: without it all
    /// calibrated mounts report `NotCalibrated`.
    pub calibration_file: Option<String>,
}
