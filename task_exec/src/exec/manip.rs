//! # Manipulator Task Executor
//!
//! Runs a manipulator actuation sequence through the arm driver.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::thread;
use std::time::{Duration, Instant};

use mission_if::{
    eqpt::manip::{ManipCmd, ManipState},
    mission::{Leg, LegKind},
};

use super::{CancelToken, ExecError, LegCtx, LegExecutor, LegResult, SharedManip};
use crate::manip_client::ManipInterface;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Executor for [`Leg::Manipulator`] legs.
pub struct ManipExecutor {
    manip: SharedManip,

    poll_period: Duration,

    upstream_grace: Duration,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ManipExecutor {
    pub fn new(manip: SharedManip, poll_period: Duration, upstream_grace: Duration) -> Self {
        Self {
            manip,
            poll_period,
            upstream_grace,
        }
    }

    fn run(&mut self, leg: &Leg, ctx: &LegCtx, token: &CancelToken) -> Result<LegResult, ExecError> {
        let target = match leg {
            Leg::Manipulator { target } => target.clone(),
            other => {
                return Err(ExecError::WrongLegKind {
                    expected: LegKind::Manipulator,
                    got: other.kind(),
                })
            }
        };

        self.wait_upstream(token)?;
        if token.is_cancelled() {
            return Ok(LegResult::Cancelled);
        }

        self.manip_lock().send_cmd(&ManipCmd::Actuate {
            target: target.clone(),
        })?;
        ctx.progress(&format!("Actuation against {} started", target));

        loop {
            if token.is_cancelled() {
                // Best effort halt, the cancellation itself must not fail
                self.manip_lock().send_cmd(&ManipCmd::Halt).ok();
                return Ok(LegResult::Cancelled);
            }

            match self.manip_lock().get_state()? {
                ManipState::Done => {
                    ctx.progress("Actuation complete");
                    return Ok(LegResult::Completed);
                }
                ManipState::Fault => {
                    return Ok(LegResult::Failed(
                        "Manipulator driver faulted during actuation".into(),
                    ))
                }
                ManipState::Idle | ManipState::Moving => (),
            }

            thread::sleep(self.poll_period);
        }
    }

    /// Wait for the arm driver to become reachable within the grace period.
    fn wait_upstream(&self, token: &CancelToken) -> Result<(), ExecError> {
        let deadline = Instant::now() + self.upstream_grace;

        while !token.is_cancelled() {
            if self.manip_lock().is_connected() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExecError::UpstreamUnavailable("manipulator driver"));
            }
            thread::sleep(self.poll_period);
        }

        // Cancellation is picked up by the caller's next token check
        Ok(())
    }

    fn manip_lock(&self) -> std::sync::MutexGuard<'_, dyn ManipInterface + 'static> {
        self.manip
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LegExecutor for ManipExecutor {
    fn kind(&self) -> LegKind {
        LegKind::Manipulator
    }

    fn execute(&mut self, leg: &Leg, ctx: &LegCtx, token: &CancelToken) -> LegResult {
        match self.run(leg, ctx, token) {
            Ok(result) => result,
            Err(e) => LegResult::Failed(e.to_string()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::exec::mocks::{test_ctx, MockManip};

    fn manip_leg(target: &str) -> Leg {
        Leg::Manipulator {
            target: target.into(),
        }
    }

    #[test]
    fn test_actuation_completes() {
        let mock = MockManip::with_states(vec![
            ManipState::Moving,
            ManipState::Moving,
            ManipState::Done,
        ]);
        let mut exec = ManipExecutor::new(
            mock.clone(),
            Duration::from_millis(1),
            Duration::from_millis(20),
        );
        let (ctx, _rx) = test_ctx();

        let result = exec.execute(&manip_leg("mallet"), &ctx, &CancelToken::new());
        assert_eq!(result, LegResult::Completed);

        match &mock.lock().unwrap().cmds[0] {
            ManipCmd::Actuate { target } => assert_eq!(target, "mallet"),
            c => panic!("expected Actuate, got {:?}", c),
        };
    }

    #[test]
    fn test_driver_fault_fails_leg() {
        let mock = MockManip::with_states(vec![ManipState::Moving, ManipState::Fault]);
        let mut exec = ManipExecutor::new(
            mock,
            Duration::from_millis(1),
            Duration::from_millis(20),
        );
        let (ctx, _rx) = test_ctx();

        match exec.execute(&manip_leg("mallet"), &ctx, &CancelToken::new()) {
            LegResult::Failed(reason) => assert!(reason.contains("faulted")),
            r => panic!("expected Failed, got {:?}", r),
        }
    }

    #[test]
    fn test_cancel_halts_arm() {
        // Driver never finishes on its own
        let mock = MockManip::with_states(vec![ManipState::Moving]);
        let mut exec = ManipExecutor::new(
            mock.clone(),
            Duration::from_millis(1),
            Duration::from_millis(20),
        );
        let (ctx, _rx) = test_ctx();

        let token = CancelToken::new();
        let canceller = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let result = exec.execute(&manip_leg("mallet"), &ctx, &token);
        assert_eq!(result, LegResult::Cancelled);

        let cmds = &mock.lock().unwrap().cmds;
        assert!(cmds.iter().any(|c| matches!(c, ManipCmd::Halt)));
    }
}
