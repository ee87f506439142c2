//! # Perception Detections
//!
//! The perception pipeline is a black box which publishes detection sets on a
//! PUB socket. The executive only subscribes; it never commands perception.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single detection in the camera frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Label of the detected item, matching the leg parameter it satisfies
    /// ("aruco1", "mallet", ...).
    pub label: String,

    /// Position of the detection in the camera frame, metres.
    pub position_m_cam: [f64; 3],
}

/// A set of detections from one perception frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSet {
    /// Name of the camera frame the positions are expressed in.
    pub frame: String,

    pub detections: Vec<Detection>,

    pub timestamp: DateTime<Utc>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DetectionSet {
    /// Find a detection with the given label in this set.
    pub fn find(&self, label: &str) -> Option<&Detection> {
        self.detections.iter().find(|d| d.label == label)
    }
}
