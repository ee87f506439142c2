//! # Mission Manager
//!
//! The mission manager is the sequencer at the centre of the executive. It
//! accepts an ordered list of legs, resolves each leg to the executor
//! registered for its kind, and runs the legs strictly one after another on
//! a dedicated worker thread. Leg failures are handled by the mission's
//! failure policy; cancellation is cooperative through the mission's
//! [`CancelToken`].
//!
//! Only one mission may be active at a time: a second submission while one
//! is running is rejected with [`MissionMgrError::Busy`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use mission_if::mission::{
    goal::{FeedbackEvent, MissionResult},
    FailurePolicy, Leg, LegKind, LegStatus, MissionStatus,
};

use crate::exec::{CancelToken, LegCtx, LegExecutor, LegResult};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Poll period used when waiting for a mission to reach a terminal status.
const WAIT_POLL: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type Registry = Arc<Mutex<HashMap<LegKind, Box<dyn LegExecutor>>>>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Handle to a submitted mission, shared between the sequencer worker and
/// the goal service.
#[derive(Clone)]
pub struct MissionHandle(Arc<MissionShared>);

/// State shared across the threads observing a mission.
struct MissionShared {
    id: u32,

    /// Overall status, written by the worker and read by the goal service.
    /// Encoded with [`MissionStatus::as_u8`] to keep reads tear-free.
    status: AtomicU8,

    /// Per-leg statuses in submission order.
    leg_status: Mutex<Vec<LegStatus>>,

    /// The mission's cancellation token. Once raised it stays raised.
    cancel: CancelToken,
}

/// Mission Manager
///
/// Owns the executor registry and the lifecycle of the active mission.
pub struct MissionMgr {
    registry: Registry,

    feedback_tx: Sender<FeedbackEvent>,

    /// The currently active (or most recently finished) mission.
    active: Option<MissionHandle>,

    /// Handles of finished missions, kept so late status queries can still
    /// be answered.
    history: Vec<MissionHandle>,

    next_id: u32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised at the mission manager boundary.
#[derive(Debug, thiserror::Error)]
pub enum MissionMgrError {
    #[error("A mission is already active")]
    Busy,

    #[error("Mission has no legs")]
    EmptyMission,

    #[error("No executor registered for {0} legs")]
    UnknownLegType(LegKind),

    #[error("No mission with id {0}")]
    UnknownMission(u32),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MissionMgr {
    /// Create the manager with the given executors.
    ///
    /// The registry is built once at startup; adding a leg kind is a
    /// compile-time change, not a runtime one.
    pub fn new(executors: Vec<Box<dyn LegExecutor>>, feedback_tx: Sender<FeedbackEvent>) -> Self {
        let mut registry = HashMap::new();
        for executor in executors {
            registry.insert(executor.kind(), executor);
        }

        Self {
            registry: Arc::new(Mutex::new(registry)),
            feedback_tx,
            active: None,
            history: Vec::new(),
            next_id: 1,
        }
    }

    /// Submit a mission: an ordered list of legs plus the failure policy.
    ///
    /// The leg sequence is immutable after acceptance, only statuses change.
    /// Rejected with [`MissionMgrError::Busy`] while another mission is
    /// active, and with [`MissionMgrError::UnknownLegType`] if any leg has
    /// no registered executor.
    pub fn submit(
        &mut self,
        legs: Vec<Leg>,
        policy: FailurePolicy,
    ) -> Result<MissionHandle, MissionMgrError> {
        if let Some(active) = &self.active {
            if !active.is_terminal() {
                return Err(MissionMgrError::Busy);
            }
        }

        if legs.is_empty() {
            return Err(MissionMgrError::EmptyMission);
        }

        {
            let registry = lock_registry(&self.registry);
            for leg in &legs {
                if !registry.contains_key(&leg.kind()) {
                    return Err(MissionMgrError::UnknownLegType(leg.kind()));
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;

        let handle = MissionHandle::new(id, legs.len());

        info!(
            "Mission {} accepted: {} legs, policy {:?}",
            id,
            legs.len(),
            policy
        );

        if let Some(finished) = self.active.take() {
            self.history.push(finished);
        }
        self.active = Some(handle.clone());

        let registry = self.registry.clone();
        let feedback_tx = self.feedback_tx.clone();
        let worker_handle = handle.clone();
        thread::spawn(move || run_mission(registry, legs, policy, worker_handle, feedback_tx));

        Ok(handle)
    }

    /// The currently active (or most recently finished) mission.
    pub fn active(&self) -> Option<&MissionHandle> {
        self.active.as_ref()
    }

    /// All missions known to the manager, newest first.
    pub fn missions(&self) -> Vec<MissionHandle> {
        self.active
            .iter()
            .chain(self.history.iter().rev())
            .cloned()
            .collect()
    }

    /// Find a mission by id, including finished ones.
    pub fn find(&self, mission_id: u32) -> Option<MissionHandle> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|h| h.id() == mission_id)
            .cloned()
    }

    /// Request cancellation of the given mission.
    ///
    /// Cancellation is cooperative: this raises the mission's token and
    /// returns the handle so the caller can wait (bounded) for the
    /// acknowledgement with [`MissionHandle::wait_terminal`]. The token
    /// stays raised whatever the caller does, so the executor is stopped
    /// even after an acknowledgement timeout.
    pub fn cancel(&self, mission_id: u32) -> Result<MissionHandle, MissionMgrError> {
        let handle = self
            .find(mission_id)
            .ok_or(MissionMgrError::UnknownMission(mission_id))?;

        if !handle.is_terminal() {
            info!("Cancellation requested for mission {}", mission_id);
            handle.0.cancel.cancel();
        }

        Ok(handle)
    }
}

impl MissionHandle {
    fn new(id: u32, num_legs: usize) -> Self {
        Self(Arc::new(MissionShared {
            id,
            status: AtomicU8::new(MissionStatus::Pending.as_u8()),
            leg_status: Mutex::new(vec![LegStatus::Pending; num_legs]),
            cancel: CancelToken::new(),
        }))
    }

    pub fn id(&self) -> u32 {
        self.0.id
    }

    /// Current overall status of the mission.
    pub fn status(&self) -> MissionStatus {
        // Only values produced by set_status are ever stored
        MissionStatus::from_u8(self.0.status.load(Ordering::Relaxed))
            .unwrap_or(MissionStatus::Pending)
    }

    /// Snapshot of the per-leg statuses in submission order.
    pub fn leg_status(&self) -> Vec<LegStatus> {
        self.0.lock_legs().clone()
    }

    /// True if the mission has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// The terminal result of the mission as reported to the operator.
    pub fn result(&self) -> MissionResult {
        MissionResult {
            mission_id: self.0.id,
            status: self.status(),
            leg_results: self.leg_status(),
        }
    }

    /// Block until the mission reaches a terminal status or the timeout
    /// expires. Returns true if a terminal status was reached.
    pub fn wait_terminal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_terminal() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

impl MissionShared {
    fn set_status(&self, status: MissionStatus) {
        self.status.store(status.as_u8(), Ordering::Relaxed);
    }

    fn lock_legs(&self) -> MutexGuard<'_, Vec<LegStatus>> {
        self.leg_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<LegKind, Box<dyn LegExecutor>>> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Record a leg-status transition and publish the matching feedback event.
fn transition(
    handle: &MissionHandle,
    feedback_tx: &Sender<FeedbackEvent>,
    index: usize,
    status: LegStatus,
    message: String,
) {
    {
        let mut legs = handle.0.lock_legs();
        if let Some(slot) = legs.get_mut(index) {
            *slot = status;
        }
    }

    info!("Mission {} leg {}: {} ({})", handle.id(), index, status, message);

    feedback_tx
        .send(FeedbackEvent::new(handle.id(), index, status, message))
        .ok();
}

/// Mark every leg from `from_index` onwards as skipped.
fn skip_remaining(
    handle: &MissionHandle,
    feedback_tx: &Sender<FeedbackEvent>,
    legs: &[Leg],
    from_index: usize,
) {
    for (index, leg) in legs.iter().enumerate().skip(from_index) {
        transition(
            handle,
            feedback_tx,
            index,
            LegStatus::Skipped,
            format!("Leg {} skipped", leg.name()),
        );
    }
}

/// Worker-thread body: sequence the mission's legs to a terminal status.
///
/// Legs run strictly in submission order; no leg starts before the previous
/// one reaches a terminal status, so feedback leg indices are
/// non-decreasing.
fn run_mission(
    registry: Registry,
    legs: Vec<Leg>,
    policy: FailurePolicy,
    handle: MissionHandle,
    feedback_tx: Sender<FeedbackEvent>,
) {
    handle.0.set_status(MissionStatus::Running);

    let mut final_status = MissionStatus::Succeeded;

    'legs: for (index, leg) in legs.iter().enumerate() {
        // Cancellation between legs: nothing is active, skip the rest
        if handle.0.cancel.is_cancelled() {
            final_status = MissionStatus::Cancelled;
            skip_remaining(&handle, &feedback_tx, &legs, index);
            break 'legs;
        }

        let mut retries_left = match policy {
            FailurePolicy::RetryThenAbort(n) => n,
            _ => 0,
        };

        loop {
            transition(
                &handle,
                &feedback_tx,
                index,
                LegStatus::Running,
                format!("Starting {} leg {}", leg.kind(), leg.name()),
            );

            let ctx = LegCtx::new(handle.id(), index, leg.name().to_string(), feedback_tx.clone());

            let result = {
                let mut registry = lock_registry(&registry);
                match registry.get_mut(&leg.kind()) {
                    Some(executor) => executor.execute(leg, &ctx, &handle.0.cancel),
                    // Registration was checked at submission, but losing the
                    // executor must still fail the leg, not the process
                    None => LegResult::Failed(format!(
                        "No executor registered for {} legs",
                        leg.kind()
                    )),
                }
            };

            match result {
                LegResult::Completed => {
                    transition(
                        &handle,
                        &feedback_tx,
                        index,
                        LegStatus::Completed,
                        format!("Leg {} completed", leg.name()),
                    );
                    break;
                }

                LegResult::Cancelled => {
                    transition(
                        &handle,
                        &feedback_tx,
                        index,
                        LegStatus::Cancelled,
                        format!("Leg {} cancelled", leg.name()),
                    );
                    final_status = MissionStatus::Cancelled;
                    skip_remaining(&handle, &feedback_tx, &legs, index + 1);
                    break 'legs;
                }

                LegResult::Failed(reason) => {
                    if retries_left > 0 {
                        retries_left -= 1;
                        warn!(
                            "Mission {} leg {} failed ({}), retrying ({} retries left)",
                            handle.id(),
                            index,
                            reason,
                            retries_left
                        );
                        feedback_tx
                            .send(FeedbackEvent::new(
                                handle.id(),
                                index,
                                LegStatus::Running,
                                format!("Leg {} failed ({}), retrying", leg.name(), reason),
                            ))
                            .ok();
                        continue;
                    }

                    transition(
                        &handle,
                        &feedback_tx,
                        index,
                        LegStatus::Failed,
                        format!("Leg {} failed: {}", leg.name(), reason),
                    );
                    final_status = MissionStatus::Failed;

                    match policy {
                        FailurePolicy::SkipAndContinue => break,
                        FailurePolicy::Abort | FailurePolicy::RetryThenAbort(_) => {
                            skip_remaining(&handle, &feedback_tx, &legs, index + 1);
                            break 'legs;
                        }
                    }
                }
            }
        }
    }

    handle.0.set_status(final_status);
    info!("Mission {} finished: {}", handle.id(), final_status);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::{channel, Receiver};

    /// Executor which records the legs it is invoked with and returns
    /// scripted results, one per invocation (empty script means success).
    struct ScriptedExecutor {
        kind: LegKind,
        script: Vec<LegResult>,
        calls: Arc<Mutex<Vec<String>>>,
        hold_for_cancel: bool,
    }

    impl ScriptedExecutor {
        fn ok(kind: LegKind, calls: &Arc<Mutex<Vec<String>>>) -> Box<Self> {
            Box::new(Self {
                kind,
                script: Vec::new(),
                calls: calls.clone(),
                hold_for_cancel: false,
            })
        }

        fn scripted(
            kind: LegKind,
            script: Vec<LegResult>,
            calls: &Arc<Mutex<Vec<String>>>,
        ) -> Box<Self> {
            Box::new(Self {
                kind,
                script,
                calls: calls.clone(),
                hold_for_cancel: false,
            })
        }

        fn holding(kind: LegKind, calls: &Arc<Mutex<Vec<String>>>) -> Box<Self> {
            Box::new(Self {
                kind,
                script: Vec::new(),
                calls: calls.clone(),
                hold_for_cancel: true,
            })
        }
    }

    impl LegExecutor for ScriptedExecutor {
        fn kind(&self) -> LegKind {
            self.kind
        }

        fn execute(&mut self, leg: &Leg, _ctx: &LegCtx, token: &CancelToken) -> LegResult {
            self.calls.lock().unwrap().push(leg.name().to_string());

            if self.hold_for_cancel {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(2));
                }
                return LegResult::Cancelled;
            }

            if self.script.is_empty() {
                LegResult::Completed
            } else {
                self.script.remove(0)
            }
        }
    }

    fn gps(id: &str) -> Leg {
        Leg::Gps {
            waypoint_id: id.into(),
        }
    }

    fn marker(id: &str) -> Leg {
        Leg::Marker {
            marker_id: id.into(),
        }
    }

    fn manip(target: &str) -> Leg {
        Leg::Manipulator {
            target: target.into(),
        }
    }

    fn full_mission() -> Vec<Leg> {
        vec![gps("gps1"), marker("aruco1"), manip("mallet")]
    }

    /// A generous bound for worker-thread completion.
    const WAIT: Duration = Duration::from_secs(5);

    fn mgr(
        executors: Vec<Box<dyn LegExecutor>>,
    ) -> (MissionMgr, Receiver<FeedbackEvent>) {
        let (tx, rx) = channel();
        (MissionMgr::new(executors, tx), rx)
    }

    /// Block until the given condition holds or the bound expires.
    fn wait_until<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + WAIT;
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_legs_execute_in_submitted_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut mgr, rx) = mgr(vec![
            ScriptedExecutor::ok(LegKind::Gps, &calls),
            ScriptedExecutor::ok(LegKind::Marker, &calls),
            ScriptedExecutor::ok(LegKind::Manipulator, &calls),
        ]);

        let handle = mgr.submit(full_mission(), FailurePolicy::Abort).unwrap();
        assert!(handle.wait_terminal(WAIT));

        assert_eq!(handle.status(), MissionStatus::Succeeded);
        assert_eq!(
            handle.leg_status(),
            vec![LegStatus::Completed, LegStatus::Completed, LegStatus::Completed]
        );
        assert_eq!(*calls.lock().unwrap(), vec!["gps1", "aruco1", "mallet"]);

        // Feedback arrives in non-decreasing leg-index order
        let mut last_index = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(event.leg_index >= last_index);
            last_index = event.leg_index;
        }
        assert_eq!(last_index, 2);
    }

    #[test]
    fn test_abort_policy_skips_after_failure() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut mgr, _rx) = mgr(vec![
            ScriptedExecutor::ok(LegKind::Gps, &calls),
            ScriptedExecutor::scripted(
                LegKind::Marker,
                vec![LegResult::Failed("marker lost".into())],
                &calls,
            ),
            ScriptedExecutor::ok(LegKind::Manipulator, &calls),
        ]);

        let handle = mgr.submit(full_mission(), FailurePolicy::Abort).unwrap();
        assert!(handle.wait_terminal(WAIT));

        assert_eq!(handle.status(), MissionStatus::Failed);
        assert_eq!(
            handle.leg_status(),
            vec![LegStatus::Completed, LegStatus::Failed, LegStatus::Skipped]
        );

        // The manipulator executor never ran
        assert_eq!(*calls.lock().unwrap(), vec!["gps1", "aruco1"]);
    }

    #[test]
    fn test_skip_and_continue_policy() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut mgr, _rx) = mgr(vec![
            ScriptedExecutor::ok(LegKind::Gps, &calls),
            ScriptedExecutor::scripted(
                LegKind::Marker,
                vec![LegResult::Failed("marker lost".into())],
                &calls,
            ),
            ScriptedExecutor::ok(LegKind::Manipulator, &calls),
        ]);

        let handle = mgr
            .submit(full_mission(), FailurePolicy::SkipAndContinue)
            .unwrap();
        assert!(handle.wait_terminal(WAIT));

        // The failed leg is recorded but the mission ran to the end
        assert_eq!(handle.status(), MissionStatus::Failed);
        assert_eq!(
            handle.leg_status(),
            vec![LegStatus::Completed, LegStatus::Failed, LegStatus::Completed]
        );
        assert_eq!(*calls.lock().unwrap(), vec!["gps1", "aruco1", "mallet"]);
    }

    #[test]
    fn test_retry_then_abort_exhausts_retries() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let always_fail = vec![
            LegResult::Failed("1".into()),
            LegResult::Failed("2".into()),
            LegResult::Failed("3".into()),
            LegResult::Failed("4".into()),
        ];
        let (mut mgr, _rx) = mgr(vec![ScriptedExecutor::scripted(
            LegKind::Gps,
            always_fail,
            &calls,
        )]);

        let handle = mgr
            .submit(vec![gps("gps1")], FailurePolicy::RetryThenAbort(2))
            .unwrap();
        assert!(handle.wait_terminal(WAIT));

        assert_eq!(handle.status(), MissionStatus::Failed);
        assert_eq!(handle.leg_status(), vec![LegStatus::Failed]);

        // One initial invocation plus two retries
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_retry_then_abort_recovers() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut mgr, _rx) = mgr(vec![ScriptedExecutor::scripted(
            LegKind::Gps,
            vec![LegResult::Failed("transient".into())],
            &calls,
        )]);

        let handle = mgr
            .submit(vec![gps("gps1")], FailurePolicy::RetryThenAbort(2))
            .unwrap();
        assert!(handle.wait_terminal(WAIT));

        assert_eq!(handle.status(), MissionStatus::Succeeded);
        assert_eq!(handle.leg_status(), vec![LegStatus::Completed]);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_cancel_mid_leg() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut mgr, _rx) = mgr(vec![ScriptedExecutor::holding(LegKind::Gps, &calls)]);

        let handle = mgr.submit(vec![gps("gps1")], FailurePolicy::Abort).unwrap();

        // Wait for the leg to actually start before cancelling
        {
            let handle = handle.clone();
            wait_until(move || handle.leg_status()[0] == LegStatus::Running);
        }

        mgr.cancel(handle.id()).unwrap();
        assert!(handle.wait_terminal(WAIT));

        assert_eq!(handle.status(), MissionStatus::Cancelled);
        assert_eq!(handle.leg_status(), vec![LegStatus::Cancelled]);
    }

    #[test]
    fn test_cancel_skips_remaining_legs() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut mgr, _rx) = mgr(vec![
            ScriptedExecutor::holding(LegKind::Gps, &calls),
            ScriptedExecutor::ok(LegKind::Manipulator, &calls),
        ]);

        let handle = mgr
            .submit(vec![gps("gps1"), manip("mallet")], FailurePolicy::Abort)
            .unwrap();

        {
            let handle = handle.clone();
            wait_until(move || handle.leg_status()[0] == LegStatus::Running);
        }

        mgr.cancel(handle.id()).unwrap();
        assert!(handle.wait_terminal(WAIT));

        assert_eq!(handle.status(), MissionStatus::Cancelled);
        assert_eq!(
            handle.leg_status(),
            vec![LegStatus::Cancelled, LegStatus::Skipped]
        );
        assert_eq!(*calls.lock().unwrap(), vec!["gps1"]);
    }

    #[test]
    fn test_second_submission_rejected_while_busy() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut mgr, _rx) = mgr(vec![ScriptedExecutor::holding(LegKind::Gps, &calls)]);

        let first = mgr.submit(vec![gps("gps1")], FailurePolicy::Abort).unwrap();

        match mgr.submit(vec![gps("gps2")], FailurePolicy::Abort) {
            Err(MissionMgrError::Busy) => (),
            r => panic!("expected Busy, got {:?}", r.map(|h| h.id())),
        }

        // Once the first mission is terminal a new submission is accepted
        mgr.cancel(first.id()).unwrap();
        assert!(first.wait_terminal(WAIT));

        let second = mgr.submit(vec![gps("gps2")], FailurePolicy::Abort).unwrap();
        assert_ne!(first.id(), second.id());

        mgr.cancel(second.id()).unwrap();
        assert!(second.wait_terminal(WAIT));

        // Both missions are still queryable
        assert!(mgr.find(first.id()).is_some());
        assert!(mgr.find(second.id()).is_some());
    }

    #[test]
    fn test_submission_validation() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (mut mgr, _rx) = mgr(vec![ScriptedExecutor::ok(LegKind::Gps, &calls)]);

        match mgr.submit(Vec::new(), FailurePolicy::Abort) {
            Err(MissionMgrError::EmptyMission) => (),
            r => panic!("expected EmptyMission, got {:?}", r.map(|h| h.id())),
        }

        // No manipulator executor registered
        match mgr.submit(vec![gps("gps1"), manip("mallet")], FailurePolicy::Abort) {
            Err(MissionMgrError::UnknownLegType(LegKind::Manipulator)) => (),
            r => panic!("expected UnknownLegType, got {:?}", r.map(|h| h.id())),
        }
    }
}
