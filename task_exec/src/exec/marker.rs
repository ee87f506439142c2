//! # Marker Docking Executor
//!
//! Docks the rover on a visual marker: transit to the marker's staging
//! waypoint while watching the detection stream, fall back to a spin search,
//! then approach the detected marker pose.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mission_if::{
    eqpt::det::Detection,
    eqpt::nav::{NavCmd, NavState},
    mission::{Leg, LegKind},
};

use super::{CancelToken, ExecError, LegCtx, LegExecutor, LegResult, SharedDetections, SharedNav};
use crate::det_client::DetectionSource;
use crate::frames::FrameProvider;
use crate::nav_client::NavInterface;
use crate::waypoints::WaypointTable;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Executor for [`Leg::Marker`] legs.
pub struct MarkerExecutor {
    nav: SharedNav,

    detections: SharedDetections,

    frames: Arc<FrameProvider>,

    waypoints: Arc<WaypointTable>,

    /// Mount of the navigation camera. Requires calibration: the leg fails
    /// with `NotCalibrated` until the per-unit calibration has been loaded.
    camera_mount: String,

    /// Sweep angle of the spin search, radians.
    search_spin_rad: f64,

    poll_period: Duration,

    upstream_grace: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How a single drive phase (transit, spin, approach) ended.
enum PhaseEnd {
    /// The nav driver completed the phase's command.
    Reached,

    /// The watched marker was sighted; motion has been stopped.
    Found(Detection),

    Cancelled,

    Fault,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MarkerExecutor {
    pub fn new(
        nav: SharedNav,
        detections: SharedDetections,
        frames: Arc<FrameProvider>,
        waypoints: Arc<WaypointTable>,
        camera_mount: String,
        search_spin_rad: f64,
        poll_period: Duration,
        upstream_grace: Duration,
    ) -> Self {
        Self {
            nav,
            detections,
            frames,
            waypoints,
            camera_mount,
            search_spin_rad,
            poll_period,
            upstream_grace,
        }
    }

    fn run(&mut self, leg: &Leg, ctx: &LegCtx, token: &CancelToken) -> Result<LegResult, ExecError> {
        let marker_id = match leg {
            Leg::Marker { marker_id } => marker_id.clone(),
            other => {
                return Err(ExecError::WrongLegKind {
                    expected: LegKind::Marker,
                    got: other.kind(),
                })
            }
        };

        // Snapshot the camera transform once for the whole leg. Detections
        // are converted through this snapshot, so a calibration refresh
        // elsewhere can never be observed mid-leg.
        let camera_tf = self.frames.get_transform(&self.camera_mount)?;
        ctx.progress(&format!(
            "Using camera transform {} -> {}",
            camera_tf.parent, camera_tf.child
        ));

        let staging = self
            .waypoints
            .get(&marker_id)
            .ok_or_else(|| ExecError::UnknownWaypoint(marker_id.clone()))?
            .clone();

        self.wait_upstream(token)?;
        if token.is_cancelled() {
            return Ok(LegResult::Cancelled);
        }

        // Transit to the staging waypoint, watching for the marker on the way
        self.nav_lock().send_cmd(&NavCmd::Goto {
            lat_deg: staging.lat_deg,
            lon_deg: staging.lon_deg,
        })?;
        ctx.progress(&format!("Transit to staging waypoint {} started", staging.name));

        let mut found = match self.drive_phase(token, Some(&marker_id))? {
            PhaseEnd::Cancelled => return Ok(LegResult::Cancelled),
            PhaseEnd::Fault => {
                return Ok(LegResult::Failed(
                    "Navigation driver faulted during transit".into(),
                ))
            }
            PhaseEnd::Found(d) => Some(d),
            PhaseEnd::Reached => None,
        };

        // Not sighted in transit: spin search at the staging point
        if found.is_none() {
            ctx.progress("Marker not sighted in transit, starting spin search");

            self.nav_lock().send_cmd(&NavCmd::Spin {
                angle_rad: self.search_spin_rad,
            })?;

            found = match self.drive_phase(token, Some(&marker_id))? {
                PhaseEnd::Cancelled => return Ok(LegResult::Cancelled),
                PhaseEnd::Fault => {
                    return Ok(LegResult::Failed(
                        "Navigation driver faulted during spin search".into(),
                    ))
                }
                PhaseEnd::Found(d) => Some(d),
                PhaseEnd::Reached => None,
            };
        }

        let detection = match found {
            Some(d) => d,
            None => {
                return Ok(LegResult::Failed(format!(
                    "Could not find marker {}",
                    marker_id
                )))
            }
        };

        // Approach the sighted marker. The detection is in the camera frame;
        // take it through the leg's transform snapshot into the body frame.
        let position_body = camera_tf.apply(&Vector3::from(detection.position_m_cam));
        let range = (position_body.x.powi(2) + position_body.y.powi(2)).sqrt();
        ctx.progress(&format!(
            "Marker {} sighted {:.2} m out, starting approach",
            marker_id, range
        ));

        self.nav_lock().send_cmd(&NavCmd::Move {
            x_m: position_body.x,
            y_m: position_body.y,
        })?;

        match self.drive_phase(token, None)? {
            PhaseEnd::Cancelled => Ok(LegResult::Cancelled),
            PhaseEnd::Fault => Ok(LegResult::Failed(
                "Navigation driver faulted during approach".into(),
            )),
            // With no watch label the phase can only end in Reached
            PhaseEnd::Reached | PhaseEnd::Found(_) => {
                ctx.progress("Docked on marker");
                Ok(LegResult::Completed)
            }
        }
    }

    /// Poll one nav command to completion, optionally watching the detection
    /// stream for the given label. Stops motion before returning `Found` or
    /// `Cancelled`.
    fn drive_phase(
        &self,
        token: &CancelToken,
        watch: Option<&str>,
    ) -> Result<PhaseEnd, ExecError> {
        loop {
            if token.is_cancelled() {
                self.nav_lock().send_cmd(&NavCmd::Stop).ok();
                return Ok(PhaseEnd::Cancelled);
            }

            if let Some(label) = watch {
                let sighting = self
                    .det_lock()
                    .poll()
                    .and_then(|set| set.find(label).cloned());

                if let Some(detection) = sighting {
                    self.nav_lock().send_cmd(&NavCmd::Stop).ok();
                    return Ok(PhaseEnd::Found(detection));
                }
            }

            match self.nav_lock().get_state()? {
                NavState::Reached => return Ok(PhaseEnd::Reached),
                NavState::Fault => return Ok(PhaseEnd::Fault),
                NavState::Active | NavState::Idle => (),
            }

            thread::sleep(self.poll_period);
        }
    }

    /// Wait for the nav driver and the detection stream to become reachable
    /// within the grace period.
    fn wait_upstream(&self, token: &CancelToken) -> Result<(), ExecError> {
        let deadline = Instant::now() + self.upstream_grace;

        while !token.is_cancelled() {
            let nav_ok = self.nav_lock().is_connected();
            let det_ok = self.det_lock().is_connected();

            if nav_ok && det_ok {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExecError::UpstreamUnavailable(if nav_ok {
                    "detection stream"
                } else {
                    "nav driver"
                }));
            }
            thread::sleep(self.poll_period);
        }

        // Cancellation is picked up by the caller's next token check
        Ok(())
    }

    fn nav_lock(&self) -> std::sync::MutexGuard<'_, dyn NavInterface + 'static> {
        self.nav.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn det_lock(&self) -> std::sync::MutexGuard<'_, dyn DetectionSource + 'static> {
        self.detections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LegExecutor for MarkerExecutor {
    fn kind(&self) -> LegKind {
        LegKind::Marker
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
    use crate::exec::mocks::{test_ctx, MockDetections, MockNav};
    use crate::frames::{FrameParams, FrameTransform};
    use crate::waypoints::{Waypoint, WaypointParams};
    use nalgebra::UnitQuaternion;

    fn frames(calibrated: bool) -> Arc<FrameProvider> {
        let provider = FrameProvider::new(&FrameParams { mounts: vec![] });

        if calibrated {
            provider.set_calibration(
                "nav_camera",
                FrameTransform {
                    parent: "body".into(),
                    child: "nav_camera_optical".into(),
                    translation_m: Vector3::new(0.3, 0.0, 0.0),
                    rotation_q: UnitQuaternion::identity(),
                },
            );
        }

        Arc::new(provider)
    }

    fn waypoints() -> Arc<WaypointTable> {
        Arc::new(WaypointTable::from_params(WaypointParams {
            waypoints: vec![Waypoint {
                name: "aruco1".into(),
                lat_deg: 38.407,
                lon_deg: -110.791,
            }],
        }))
    }

    fn executor(
        nav: SharedNav,
        detections: SharedDetections,
        calibrated: bool,
    ) -> MarkerExecutor {
        MarkerExecutor::new(
            nav,
            detections,
            frames(calibrated),
            waypoints(),
            "nav_camera".into(),
            std::f64::consts::PI,
            Duration::from_millis(1),
            Duration::from_millis(20),
        )
    }

    fn marker_leg(id: &str) -> Leg {
        Leg::Marker {
            marker_id: id.into(),
        }
    }

    #[test]
    fn test_not_calibrated_fails_leg() {
        let nav = MockNav::with_states(vec![NavState::Reached]);
        let dets = MockDetections::silent();
        let mut exec = executor(nav, dets, false);
        let (ctx, _rx) = test_ctx();

        match exec.execute(&marker_leg("aruco1"), &ctx, &CancelToken::new()) {
            LegResult::Failed(reason) => assert!(reason.contains("No calibration")),
            r => panic!("expected Failed, got {:?}", r),
        }
    }

    #[test]
    fn test_marker_sighted_in_transit() {
        let nav = MockNav::with_states(vec![
            NavState::Active,
            NavState::Active,
            NavState::Active,
            NavState::Reached,
        ]);
        let dets = MockDetections::appearing("aruco1", 2);
        let mut exec = executor(nav.clone(), dets, true);
        let (ctx, _rx) = test_ctx();

        let result = exec.execute(&marker_leg("aruco1"), &ctx, &CancelToken::new());
        assert_eq!(result, LegResult::Completed);

        // Transit, then straight to the approach move, no spin search
        let cmds = &nav.lock().unwrap().cmds;
        assert!(cmds.iter().any(|c| matches!(c, NavCmd::Goto { .. })));
        assert!(!cmds.iter().any(|c| matches!(c, NavCmd::Spin { .. })));
        match cmds.iter().find(|c| matches!(c, NavCmd::Move { .. })) {
            // Camera offset of 0.3 m along x applied to the detection at 2.0 m
            Some(NavCmd::Move { x_m, y_m }) => {
                assert!((x_m - 2.3).abs() < 1e-9);
                assert!((y_m - 0.5).abs() < 1e-9);
            }
            _ => panic!("expected an approach Move command"),
        }
    }

    #[test]
    fn test_spin_search_finds_marker() {
        let nav = MockNav::with_states(vec![
            NavState::Active,
            NavState::Reached,
            NavState::Active,
            NavState::Reached,
        ]);
        // Quiet through the transit polls, sighted during the spin
        let dets = MockDetections::appearing("aruco1", 2);
        let mut exec = executor(nav.clone(), dets, true);
        let (ctx, _rx) = test_ctx();

        let result = exec.execute(&marker_leg("aruco1"), &ctx, &CancelToken::new());
        assert_eq!(result, LegResult::Completed);

        let cmds = &nav.lock().unwrap().cmds;
        assert!(cmds.iter().any(|c| matches!(c, NavCmd::Spin { .. })));
        assert!(cmds.iter().any(|c| matches!(c, NavCmd::Move { .. })));
    }

    #[test]
    fn test_marker_never_found_fails_leg() {
        let nav = MockNav::with_states(vec![
            NavState::Active,
            NavState::Reached,
            NavState::Reached,
        ]);
        let dets = MockDetections::silent();
        let mut exec = executor(nav, dets, true);
        let (ctx, _rx) = test_ctx();

        match exec.execute(&marker_leg("aruco1"), &ctx, &CancelToken::new()) {
            LegResult::Failed(reason) => assert!(reason.contains("Could not find marker")),
            r => panic!("expected Failed, got {:?}", r),
        }
    }

    #[test]
    fn test_detection_stream_unavailable_fails_leg() {
        let nav = MockNav::with_states(vec![NavState::Reached]);
        let dets = MockDetections::silent();
        dets.lock().unwrap().connected = false;
        let mut exec = executor(nav, dets, true);
        let (ctx, _rx) = test_ctx();

        match exec.execute(&marker_leg("aruco1"), &ctx, &CancelToken::new()) {
            LegResult::Failed(reason) => {
                assert!(reason.contains("detection stream"));
                assert!(reason.contains("unavailable"));
            }
            r => panic!("expected Failed, got {:?}", r),
        }
    }
}
