//! # Goal and feedback wire protocol
//!
//! The goal service is a REQ/REP exchange: the operator console sends a
//! [`GoalRequest`] and the executive replies with a [`GoalResponse`].
//! Feedback flows the other way on a PUB/SUB stream of [`FeedbackMsg`]s,
//! ending with the terminal [`MissionResult`] for the goal.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{FailurePolicy, Leg, LegStatus, MissionStatus};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A progress event for a single leg-status transition.
///
/// Events are transient: they are streamed to the goal's client and never
/// persisted. For a given mission they are emitted in non-decreasing
/// leg-index order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub mission_id: u32,

    /// Index of the leg this event refers to, in submission order.
    pub leg_index: usize,

    pub leg_status: LegStatus,

    /// Free-form operator-facing progress message.
    pub message: String,

    pub timestamp: DateTime<Utc>,
}

/// The terminal result of a mission.
///
/// Per-leg results are in submission order, so an operator can tell exactly
/// which leg failed and why from this plus the feedback stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionResult {
    pub mission_id: u32,

    pub status: MissionStatus,

    pub leg_results: Vec<LegStatus>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A request to the goal service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GoalRequest {
    /// Submit a new mission: an ordered list of legs plus the mission-level
    /// failure policy. The leg order is the execution order.
    Submit {
        legs: Vec<Leg>,
        policy: FailurePolicy,
    },

    /// Request cancellation of the given mission.
    Cancel { mission_id: u32 },

    /// Query the current status of the given mission.
    Status { mission_id: u32 },
}

/// A response from the goal service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GoalResponse {
    /// The mission was accepted and will start executing.
    Accepted { mission_id: u32 },

    /// A mission is already active, the submission is rejected. The client
    /// should retry once the active mission reaches a terminal status.
    Busy,

    /// The submission was rejected for the given reason (empty leg list,
    /// unknown leg type).
    Rejected { reason: String },

    /// Cancellation was acknowledged, the mission reached the given terminal
    /// status.
    CancelAck { status: MissionStatus },

    /// The executor did not stop within the cancellation timeout. The
    /// cancellation stays raised and the executive keeps trying to stop the
    /// leg in the background.
    CancelTimedOut,

    /// Status of the queried mission.
    Status {
        status: MissionStatus,
        leg_status: Vec<LegStatus>,
    },

    /// The given mission id is not known to this executive.
    UnknownMission,

    /// The request could not be understood.
    Invalid,
}

/// A message on the feedback stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeedbackMsg {
    Event(FeedbackEvent),
    Result(MissionResult),
}

/// Possible wire parsing errors.
#[derive(Debug, Error)]
pub enum GoalParseError {
    #[error("Message contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalRequest {
    /// Parse a request from a JSON packet.
    pub fn from_json(json_str: &str) -> Result<Self, GoalParseError> {
        serde_json::from_str(json_str).map_err(GoalParseError::InvalidJson)
    }
}

impl GoalResponse {
    /// Parse a response from a JSON packet.
    pub fn from_json(json_str: &str) -> Result<Self, GoalParseError> {
        serde_json::from_str(json_str).map_err(GoalParseError::InvalidJson)
    }
}

impl FeedbackMsg {
    /// Parse a feedback stream message from a JSON packet.
    pub fn from_json(json_str: &str) -> Result<Self, GoalParseError> {
        serde_json::from_str(json_str).map_err(GoalParseError::InvalidJson)
    }
}

impl FeedbackEvent {
    /// Build an event stamped with the current time.
    pub fn new(mission_id: u32, leg_index: usize, leg_status: LegStatus, message: String) -> Self {
        Self {
            mission_id,
            leg_index,
            leg_status,
            message,
            timestamp: Utc::now(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_submit_request_json() {
        let json = r#"{
            "Submit": {
                "legs": [
                    {"type": "gps", "waypoint_id": "gps1"},
                    {"type": "manipulator", "target": "mallet"}
                ],
                "policy": "Abort"
            }
        }"#;

        match GoalRequest::from_json(json).unwrap() {
            GoalRequest::Submit { legs, policy } => {
                assert_eq!(legs.len(), 2);
                assert_eq!(policy, FailurePolicy::Abort);
            }
            r => panic!("expected Submit, got {:?}", r),
        }

        assert!(GoalRequest::from_json("not json").is_err());
    }

    #[test]
    fn test_feedback_msg_roundtrip() {
        let event = FeedbackEvent::new(7, 1, LegStatus::Running, "Starting gps leg".into());
        let json = serde_json::to_string(&FeedbackMsg::Event(event)).unwrap();

        match FeedbackMsg::from_json(&json).unwrap() {
            FeedbackMsg::Event(e) => {
                assert_eq!(e.mission_id, 7);
                assert_eq!(e.leg_index, 1);
                assert_eq!(e.leg_status, LegStatus::Running);
            }
            m => panic!("expected Event, got {:?}", m),
        }
    }
}
