//! # GPS Waypoint Transit Executor
//!
//! Drives the rover to a named GPS waypoint through the navigation driver.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mission_if::{
    eqpt::nav::{NavCmd, NavState},
    mission::{Leg, LegKind},
};

use super::{CancelToken, ExecError, LegCtx, LegExecutor, LegResult, SharedNav};
use crate::frames::FrameProvider;
use crate::waypoints::WaypointTable;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Executor for [`Leg::Gps`] legs.
pub struct GpsExecutor {
    nav: SharedNav,

    frames: Arc<FrameProvider>,

    waypoints: Arc<WaypointTable>,

    /// Mount of the GPS antenna, snapshotted at leg start.
    antenna_mount: String,

    poll_period: Duration,

    upstream_grace: Duration,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GpsExecutor {
    pub fn new(
        nav: SharedNav,
        frames: Arc<FrameProvider>,
        waypoints: Arc<WaypointTable>,
        antenna_mount: String,
        poll_period: Duration,
        upstream_grace: Duration,
    ) -> Self {
        Self {
            nav,
            frames,
            waypoints,
            antenna_mount,
            poll_period,
            upstream_grace,
        }
    }

    fn run(&mut self, leg: &Leg, ctx: &LegCtx, token: &CancelToken) -> Result<LegResult, ExecError> {
        let waypoint_id = match leg {
            Leg::Gps { waypoint_id } => waypoint_id,
            other => {
                return Err(ExecError::WrongLegKind {
                    expected: LegKind::Gps,
                    got: other.kind(),
                })
            }
        };

        let waypoint = self
            .waypoints
            .get(waypoint_id)
            .ok_or_else(|| ExecError::UnknownWaypoint(waypoint_id.clone()))?
            .clone();

        // Snapshot the antenna transform once for the whole leg. The leg's
        // spatial accuracy depends on the mount being defined, so a missing
        // mount fails the leg here rather than mid-transit.
        let antenna_tf = self.frames.get_transform(&self.antenna_mount)?;
        ctx.progress(&format!(
            "Using antenna transform {} -> {}",
            antenna_tf.parent, antenna_tf.child
        ));

        self.wait_upstream(token)?;
        if token.is_cancelled() {
            return Ok(LegResult::Cancelled);
        }

        self.nav_lock().send_cmd(&NavCmd::Goto {
            lat_deg: waypoint.lat_deg,
            lon_deg: waypoint.lon_deg,
        })?;
        ctx.progress(&format!("Transit to waypoint {} started", waypoint.name));

        loop {
            if token.is_cancelled() {
                // Best effort stop, the cancellation itself must not fail
                self.nav_lock().send_cmd(&NavCmd::Stop).ok();
                return Ok(LegResult::Cancelled);
            }

            match self.nav_lock().get_state()? {
                NavState::Reached => {
                    ctx.progress("Arrived at waypoint");
                    return Ok(LegResult::Completed);
                }
                NavState::Fault => {
                    return Ok(LegResult::Failed(
                        "Navigation driver faulted during transit".into(),
                    ))
                }
                NavState::Active | NavState::Idle => (),
            }

            thread::sleep(self.poll_period);
        }
    }

    /// Wait for the nav driver to become reachable within the grace period.
    fn wait_upstream(&self, token: &CancelToken) -> Result<(), ExecError> {
        let deadline = Instant::now() + self.upstream_grace;

        while !token.is_cancelled() {
            if self.nav_lock().is_connected() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExecError::UpstreamUnavailable("nav driver"));
            }
            thread::sleep(self.poll_period);
        }

        // Cancellation is picked up by the caller's next token check
        Ok(())
    }

    fn nav_lock(&self) -> std::sync::MutexGuard<'_, dyn crate::nav_client::NavInterface + 'static> {
        self.nav.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LegExecutor for GpsExecutor {
    fn kind(&self) -> LegKind {
        LegKind::Gps
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
    use crate::exec::mocks::{test_ctx, MockNav};
    use crate::frames::{FrameParams, StaticMount};
    use crate::waypoints::{Waypoint, WaypointParams};

    fn frames() -> Arc<FrameProvider> {
        Arc::new(FrameProvider::new(&FrameParams {
            mounts: vec![StaticMount {
                name: "gps_antenna".into(),
                parent: "body".into(),
                child: "gps_antenna".into(),
                translation_m: [0.1, 0.0, 0.5],
                rotation_rpy_rad: [0.0, 0.0, 0.0],
            }],
        }))
    }

    fn waypoints() -> Arc<WaypointTable> {
        Arc::new(WaypointTable::from_params(WaypointParams {
            waypoints: vec![Waypoint {
                name: "gps1".into(),
                lat_deg: 38.406,
                lon_deg: -110.792,
            }],
        }))
    }

    fn executor(nav: SharedNav) -> GpsExecutor {
        GpsExecutor::new(
            nav,
            frames(),
            waypoints(),
            "gps_antenna".into(),
            Duration::from_millis(1),
            Duration::from_millis(20),
        )
    }

    fn gps_leg(id: &str) -> Leg {
        Leg::Gps {
            waypoint_id: id.into(),
        }
    }

    #[test]
    fn test_transit_completes() {
        let mock = MockNav::with_states(vec![NavState::Active, NavState::Active, NavState::Reached]);
        let mut exec = executor(mock.clone());
        let (ctx, _rx) = test_ctx();

        let result = exec.execute(&gps_leg("gps1"), &ctx, &CancelToken::new());
        assert_eq!(result, LegResult::Completed);

        // The driver got the waypoint's coordinates
        let cmds = &mock.lock().unwrap().cmds;
        match &cmds[0] {
            NavCmd::Goto { lat_deg, lon_deg } => {
                assert!((lat_deg - 38.406).abs() < 1e-9);
                assert!((lon_deg + 110.792).abs() < 1e-9);
            }
            c => panic!("expected Goto, got {:?}", c),
        }
    }

    #[test]
    fn test_nav_fault_fails_leg() {
        let mock = MockNav::with_states(vec![NavState::Active, NavState::Fault]);
        let mut exec = executor(mock);
        let (ctx, _rx) = test_ctx();

        match exec.execute(&gps_leg("gps1"), &ctx, &CancelToken::new()) {
            LegResult::Failed(reason) => assert!(reason.contains("faulted")),
            r => panic!("expected Failed, got {:?}", r),
        }
    }

    #[test]
    fn test_unknown_waypoint_fails_leg() {
        let mock = MockNav::with_states(vec![NavState::Reached]);
        let mut exec = executor(mock);
        let (ctx, _rx) = test_ctx();

        match exec.execute(&gps_leg("gps9"), &ctx, &CancelToken::new()) {
            LegResult::Failed(reason) => assert!(reason.contains("gps9")),
            r => panic!("expected Failed, got {:?}", r),
        }
    }

    #[test]
    fn test_upstream_unavailable_fails_leg() {
        let mock = MockNav::disconnected();
        let mut exec = executor(mock);
        let (ctx, _rx) = test_ctx();

        match exec.execute(&gps_leg("gps1"), &ctx, &CancelToken::new()) {
            LegResult::Failed(reason) => assert!(reason.contains("unavailable")),
            r => panic!("expected Failed, got {:?}", r),
        }
    }

    #[test]
    fn test_cancel_stops_transit() {
        // Driver never reaches the waypoint
        let mock = MockNav::with_states(vec![NavState::Active]);
        let mut exec = executor(mock.clone());
        let (ctx, _rx) = test_ctx();

        let token = CancelToken::new();
        let canceller = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let result = exec.execute(&gps_leg("gps1"), &ctx, &token);
        assert_eq!(result, LegResult::Cancelled);

        // The transit started and a stop was issued on the way out
        let cmds = &mock.lock().unwrap().cmds;
        assert!(cmds.iter().any(|c| matches!(c, NavCmd::Goto { .. })));
        assert!(cmds.iter().any(|c| matches!(c, NavCmd::Stop)));
    }
}
