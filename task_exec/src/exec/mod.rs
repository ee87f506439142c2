//! # Leg Executors
//!
//! One executor per leg kind. Each executor is a capability which, given a
//! leg's parameters, drives the rover until the leg completes or fails,
//! emitting progress along the way. Executors run on the sequencer's worker
//! thread, strictly one at a time, and observe cancellation through the
//! [`CancelToken`] at every suspension point.
//!
//! Executors are idempotent under retry: `execute` re-initialises all
//! per-attempt state at the top, so a re-invocation after a `Failed` result
//! starts clean.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod gps;
pub mod manip;
pub mod marker;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use mission_if::mission::goal::FeedbackEvent;
use mission_if::mission::{Leg, LegKind, LegStatus};

use crate::det_client::DetectionSource;
use crate::frames::FrameError;
use crate::manip_client::{ManipClientError, ManipInterface};
use crate::nav_client::{NavClientError, NavInterface};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Shared handle to the navigation driver. Executors run one at a time, so
/// the mutex is uncontended in practice.
pub type SharedNav = Arc<Mutex<dyn NavInterface>>;

/// Shared handle to the perception detection stream.
pub type SharedDetections = Arc<Mutex<dyn DetectionSource>>;

/// Shared handle to the manipulator driver.
pub type SharedManip = Arc<Mutex<dyn ManipInterface>>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Cooperative cancellation token.
///
/// Raised by the goal service on an operator's cancel request, observed by
/// the active executor at every suspension point. Once raised it stays
/// raised for the lifetime of the mission.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

/// Context for the leg currently being executed, used by executors to emit
/// operator-facing progress.
pub struct LegCtx {
    mission_id: u32,

    leg_index: usize,

    leg_name: String,

    feedback: Sender<FeedbackEvent>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of executing a single leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegResult {
    Completed,
    Failed(String),
    Cancelled,
}

/// Structured leg-level failures.
///
/// These never escape an executor: `execute` converts them into
/// [`LegResult::Failed`], and the sequencer alone decides whether to abort,
/// skip, or retry.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Upstream {0} unavailable within the startup grace period")]
    UpstreamUnavailable(&'static str),

    #[error("No waypoint named {0:?} in the waypoint table")]
    UnknownWaypoint(String),

    #[error("Executor for {expected} legs invoked with a {got} leg")]
    WrongLegKind { expected: LegKind, got: LegKind },

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Nav driver error: {0}")]
    Nav(#[from] NavClientError),

    #[error("Manipulator driver error: {0}")]
    Manip(#[from] ManipClientError),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A capability which executes one kind of mission leg.
pub trait LegExecutor: Send {
    /// The leg kind this executor is registered for.
    fn kind(&self) -> LegKind;

    /// Drive the rover through the given leg until it completes, fails, or
    /// is cancelled.
    ///
    /// Implementations must check `token` at every suspension point, and
    /// must not look up frame transforms after leg start (snapshot once, use
    /// for the leg's duration).
    fn execute(&mut self, leg: &Leg, ctx: &LegCtx, token: &CancelToken) -> LegResult;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed)
    }

    /// True if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl LegCtx {
    pub fn new(
        mission_id: u32,
        leg_index: usize,
        leg_name: String,
        feedback: Sender<FeedbackEvent>,
    ) -> Self {
        Self {
            mission_id,
            leg_index,
            leg_name,
            feedback,
        }
    }

    /// Emit a progress message for the running leg.
    pub fn progress(&self, message: &str) {
        info!("[{}] {}", self.leg_name, message);

        self.feedback
            .send(FeedbackEvent::new(
                self.mission_id,
                self.leg_index,
                LegStatus::Running,
                format!("[{}] {}", self.leg_name, message),
            ))
            .ok();
    }
}

// ------------------------------------------------------------------------------------------------
// TEST MOCKS
// ------------------------------------------------------------------------------------------------

/// Scripted driver implementations shared by the executor tests.
#[cfg(test)]
pub(crate) mod mocks {
    use super::*;
    use chrono::Utc;
    use mission_if::eqpt::det::{Detection, DetectionSet};
    use mission_if::eqpt::manip::{ManipCmd, ManipState};
    use mission_if::eqpt::nav::{NavCmd, NavState};

    /// Scripted nav driver: returns the scripted states one by one, holding
    /// the last one, and records every command sent.
    pub struct MockNav {
        pub connected: bool,
        pub states: Vec<NavState>,
        pub cmds: Vec<NavCmd>,
    }

    impl MockNav {
        pub fn with_states(states: Vec<NavState>) -> Arc<Mutex<Self>> {
            Arc::new(Mutex::new(Self {
                connected: true,
                states,
                cmds: Vec::new(),
            }))
        }

        pub fn disconnected() -> Arc<Mutex<Self>> {
            Arc::new(Mutex::new(Self {
                connected: false,
                states: Vec::new(),
                cmds: Vec::new(),
            }))
        }
    }

    impl NavInterface for MockNav {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send_cmd(&mut self, cmd: &NavCmd) -> Result<(), NavClientError> {
            self.cmds.push(cmd.clone());
            Ok(())
        }

        fn get_state(&mut self) -> Result<NavState, NavClientError> {
            if self.states.len() > 1 {
                Ok(self.states.remove(0))
            } else {
                self.states
                    .first()
                    .copied()
                    .ok_or(NavClientError::NotConnected)
            }
        }
    }

    /// Scripted detection source: yields nothing for `quiet_polls` polls,
    /// then a set containing the given label forever after.
    pub struct MockDetections {
        pub connected: bool,
        pub quiet_polls: usize,
        pub label: String,
        pub position_m_cam: [f64; 3],
    }

    impl MockDetections {
        pub fn appearing(label: &str, quiet_polls: usize) -> Arc<Mutex<Self>> {
            Arc::new(Mutex::new(Self {
                connected: true,
                quiet_polls,
                label: label.to_string(),
                position_m_cam: [2.0, 0.5, 0.0],
            }))
        }

        pub fn silent() -> Arc<Mutex<Self>> {
            Arc::new(Mutex::new(Self {
                connected: true,
                quiet_polls: usize::MAX,
                label: String::new(),
                position_m_cam: [0.0; 3],
            }))
        }
    }

    impl DetectionSource for MockDetections {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn poll(&mut self) -> Option<DetectionSet> {
            if self.quiet_polls > 0 {
                self.quiet_polls -= 1;
                return None;
            }

            Some(DetectionSet {
                frame: "nav_camera_optical".into(),
                detections: vec![Detection {
                    label: self.label.clone(),
                    position_m_cam: self.position_m_cam,
                }],
                timestamp: Utc::now(),
            })
        }
    }

    /// Scripted manipulator driver, mirroring [`MockNav`].
    pub struct MockManip {
        pub connected: bool,
        pub states: Vec<ManipState>,
        pub cmds: Vec<ManipCmd>,
    }

    impl MockManip {
        pub fn with_states(states: Vec<ManipState>) -> Arc<Mutex<Self>> {
            Arc::new(Mutex::new(Self {
                connected: true,
                states,
                cmds: Vec::new(),
            }))
        }
    }

    impl ManipInterface for MockManip {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send_cmd(&mut self, cmd: &ManipCmd) -> Result<(), ManipClientError> {
            self.cmds.push(cmd.clone());
            Ok(())
        }

        fn get_state(&mut self) -> Result<ManipState, ManipClientError> {
            if self.states.len() > 1 {
                Ok(self.states.remove(0))
            } else {
                self.states
                    .first()
                    .copied()
                    .ok_or(ManipClientError::NotConnected)
            }
        }
    }

    /// Build a [`LegCtx`] whose feedback goes nowhere in particular.
    pub fn test_ctx() -> (LegCtx, std::sync::mpsc::Receiver<FeedbackEvent>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (LegCtx::new(1, 0, "test".into(), tx), rx)
    }
}
