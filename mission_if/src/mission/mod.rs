//! # Mission definitions
//!
//! A mission is an ordered sequence of legs, each an atomic sub-task the
//! rover performs on its own (a GPS waypoint transit, a visual-marker dock, a
//! manipulator actuation). Legs execute strictly in submission order, one at
//! a time; only their statuses change once a mission has been accepted.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod goal;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A single leg of a mission.
///
/// The variant tag is the wire-level `type` field, so a goal submission looks
/// like `[{"type": "gps", "waypoint_id": "gps1"}, ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Leg {
    /// Transit to a named GPS waypoint.
    Gps { waypoint_id: String },

    /// Dock on a visual marker, staged from the marker's surveyed waypoint.
    Marker { marker_id: String },

    /// Actuate the manipulator against the given target.
    Manipulator { target: String },
}

/// The kind of a leg, used to resolve the executor responsible for it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegKind {
    Gps,
    Marker,
    Manipulator,
}

/// Status of a single leg.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

/// Overall status of a mission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Mission-level policy applied when a leg fails.
///
/// The policy is required at submission time, there is no default.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop sequencing on the first failed leg, the mission is failed.
    Abort,

    /// Mark the failed leg and proceed to the next one.
    SkipAndContinue,

    /// Re-invoke a failed leg up to the given number of times before
    /// aborting.
    RetryThenAbort(u32),
}

/// Error raised when a failure policy string cannot be parsed.
#[derive(Debug, Error)]
pub enum PolicyParseError {
    #[error("Unrecognised failure policy {0:?}, expected \"abort\", \"skip\", or \"retry:<n>\"")]
    UnknownPolicy(String),

    #[error("Invalid retry count in failure policy {0:?}")]
    InvalidRetryCount(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Leg {
    /// Get the kind of this leg.
    pub fn kind(&self) -> LegKind {
        match self {
            Leg::Gps { .. } => LegKind::Gps,
            Leg::Marker { .. } => LegKind::Marker,
            Leg::Manipulator { .. } => LegKind::Manipulator,
        }
    }

    /// Get the leg's parameter name, used to prefix operator-facing messages.
    pub fn name(&self) -> &str {
        match self {
            Leg::Gps { waypoint_id } => waypoint_id,
            Leg::Marker { marker_id } => marker_id,
            Leg::Manipulator { target } => target,
        }
    }
}

impl LegStatus {
    /// True if the leg can no longer change status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LegStatus::Pending | LegStatus::Running)
    }
}

impl MissionStatus {
    /// True if the mission can no longer change status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MissionStatus::Pending | MissionStatus::Running)
    }

    /// Encode the status for storage in an atomic.
    ///
    /// The mission status is written by the sequencer worker and read by the
    /// goal service, so it is held in an `AtomicU8` using this encoding.
    pub fn as_u8(self) -> u8 {
        match self {
            MissionStatus::Pending => 0,
            MissionStatus::Running => 1,
            MissionStatus::Succeeded => 2,
            MissionStatus::Failed => 3,
            MissionStatus::Cancelled => 4,
        }
    }

    /// Decode a status previously encoded with [`MissionStatus::as_u8`].
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(MissionStatus::Pending),
            1 => Some(MissionStatus::Running),
            2 => Some(MissionStatus::Succeeded),
            3 => Some(MissionStatus::Failed),
            4 => Some(MissionStatus::Cancelled),
            _ => None,
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(FailurePolicy::Abort),
            "skip" => Ok(FailurePolicy::SkipAndContinue),
            _ => match s.strip_prefix("retry:") {
                Some(n) => n
                    .parse::<u32>()
                    .map(FailurePolicy::RetryThenAbort)
                    .map_err(|_| PolicyParseError::InvalidRetryCount(s.into())),
                None => Err(PolicyParseError::UnknownPolicy(s.into())),
            },
        }
    }
}

impl Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegKind::Gps => write!(f, "gps"),
            LegKind::Marker => write!(f, "marker"),
            LegKind::Manipulator => write!(f, "manipulator"),
        }
    }
}

impl Display for LegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_leg_wire_format() {
        // The documented submission format for a full three-leg mission
        let json = r#"[
            {"type": "gps", "waypoint_id": "gps1"},
            {"type": "marker", "marker_id": "aruco1"},
            {"type": "manipulator", "target": "mallet"}
        ]"#;

        let legs: Vec<Leg> = serde_json::from_str(json).unwrap();

        assert_eq!(
            legs,
            vec![
                Leg::Gps {
                    waypoint_id: "gps1".into()
                },
                Leg::Marker {
                    marker_id: "aruco1".into()
                },
                Leg::Manipulator {
                    target: "mallet".into()
                },
            ]
        );

        assert_eq!(legs[0].kind(), LegKind::Gps);
        assert_eq!(legs[1].kind(), LegKind::Marker);
        assert_eq!(legs[2].kind(), LegKind::Manipulator);
        assert_eq!(legs[1].name(), "aruco1");
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!(
            "skip".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::SkipAndContinue
        );
        assert_eq!(
            "retry:3".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::RetryThenAbort(3)
        );

        assert!("".parse::<FailurePolicy>().is_err());
        assert!("retry".parse::<FailurePolicy>().is_err());
        assert!("retry:many".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_mission_status_atomic_encoding() {
        for status in [
            MissionStatus::Pending,
            MissionStatus::Running,
            MissionStatus::Succeeded,
            MissionStatus::Failed,
            MissionStatus::Cancelled,
        ]
        .iter()
        {
            assert_eq!(MissionStatus::from_u8(status.as_u8()), Some(*status));
        }

        assert_eq!(MissionStatus::from_u8(200), None);
    }
}
