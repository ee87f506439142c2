//! Main mission-executive entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Session and logging initialisation
//!     - Parameter loading
//!     - Discovery bootstrap (this process is the deployment's authority)
//!     - Frame provider, waypoint table, and driver client initialisation
//!     - Executor registry and mission manager construction
//!     - Main loop:
//!         - Goal request handling (submit / cancel / status)
//!         - Feedback draining and publication
//!         - Terminal-result publication and archiving
//!         - Cycle management
//!
//! Missions themselves run on the mission manager's worker thread; the main
//! loop only services the operator-facing sockets, so a long leg never
//! blocks cancellation handling.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use mission_if::{
    mission::goal::{FeedbackMsg, GoalRequest, GoalResponse},
    net::{
        discovery::{self, DiscoveryRole},
        zmq,
    },
};
use task_lib::{
    det_client::DetClient,
    exec::{
        gps::GpsExecutor, manip::ManipExecutor, marker::MarkerExecutor, LegExecutor, SharedDetections,
        SharedManip, SharedNav,
    },
    frames::{FrameParams, FrameProvider},
    goal_server::GoalServer,
    manip_client::ManipClient,
    mission_mgr::{MissionMgr, MissionMgrError},
    nav_client::NavClient,
    params::TaskExecParams,
    waypoints::{WaypointParams, WaypointTable},
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    let session = Session::new("task_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("ARES Rover Mission Executive\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: TaskExecParams =
        util::params::load("task_exec.toml").wrap_err("Could not load task_exec params")?;

    let frame_params: FrameParams =
        util::params::load(&params.frames_file).wrap_err("Could not load frame params")?;

    let waypoint_params: WaypointParams =
        util::params::load(&params.waypoints_file).wrap_err("Could not load waypoint params")?;

    info!("Exec parameters loaded");

    // ---- DISCOVERY BOOTSTRAP ----

    // The executive is the deployment's discovery authority: it binds the
    // goal and feedback sockets at the rendezvous. No component below may
    // open comms before this completes.
    let bootstrap = discovery::bootstrap_from_env(
        params.rendezvous_addr.as_deref(),
        DiscoveryRole::Authority,
    )
    .wrap_err("Discovery bootstrap failed")?;

    // ---- FRAMES AND WAYPOINTS ----

    let frames = Arc::new(FrameProvider::new(&frame_params));

    if let Some(cal_file) = &params.calibration_file {
        let cal_path = host::get_sw_root()
            .wrap_err("Cannot resolve the software root")?
            .join(cal_file);

        match frames.load_calibration_file(&cal_path) {
            Ok(count) => info!("Loaded {} calibration records from {:?}", count, cal_path),
            // Missing calibration is not fatal: affected legs fail with
            // NotCalibrated instead
            Err(e) => warn!("No calibration loaded: {}", e),
        }
    }

    let waypoints = Arc::new(WaypointTable::from_params(waypoint_params));
    if waypoints.is_empty() {
        warn!("The waypoint table is empty, spatial legs will fail");
    } else {
        info!("{} waypoints loaded", waypoints.len());
    }

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let nav: SharedNav = Arc::new(Mutex::new(
        NavClient::new(&zmq_ctx, bootstrap).wrap_err("Failed to initialise the NavClient")?,
    ));
    info!("NavClient initialised");

    let detections: SharedDetections = Arc::new(Mutex::new(
        DetClient::new(&zmq_ctx, bootstrap).wrap_err("Failed to initialise the DetClient")?,
    ));
    info!("DetClient initialised");

    let manip: SharedManip = Arc::new(Mutex::new(
        ManipClient::new(&zmq_ctx, bootstrap).wrap_err("Failed to initialise the ManipClient")?,
    ));
    info!("ManipClient initialised");

    let goal_server =
        GoalServer::new(&zmq_ctx, bootstrap).wrap_err("Failed to initialise the GoalServer")?;
    info!("GoalServer initialised");

    info!("Network initialisation complete");

    // ---- EXECUTORS AND MISSION MANAGER ----

    let poll_period = Duration::from_secs_f64(params.exec_poll_period_s);
    let upstream_grace = Duration::from_secs_f64(params.upstream_grace_s);

    let executors: Vec<Box<dyn LegExecutor>> = vec![
        Box::new(GpsExecutor::new(
            nav.clone(),
            frames.clone(),
            waypoints.clone(),
            params.gps_antenna_mount.clone(),
            poll_period,
            upstream_grace,
        )),
        Box::new(MarkerExecutor::new(
            nav.clone(),
            detections.clone(),
            frames.clone(),
            waypoints.clone(),
            params.nav_camera_mount.clone(),
            params.search_spin_rad,
            poll_period,
            upstream_grace,
        )),
        Box::new(ManipExecutor::new(
            manip.clone(),
            poll_period,
            upstream_grace,
        )),
    ];

    let (feedback_tx, feedback_rx) = channel();
    let mut mission_mgr = MissionMgr::new(executors, feedback_tx);

    info!("Mission manager initialised\n");

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let cycle_period = Duration::from_secs_f64(params.cycle_period_s);
    let cancel_ack_timeout = Duration::from_secs_f64(params.cancel_ack_timeout_s);

    let mut archived_missions: Vec<u32> = Vec::new();

    loop {
        let cycle_start = Instant::now();

        // ---- GOAL REQUEST HANDLING ----

        loop {
            match goal_server.recv_request() {
                Ok(Some(request)) => {
                    let response = handle_request(&mut mission_mgr, request, cancel_ack_timeout);

                    if let Err(e) = goal_server.send_response(&response) {
                        warn!("Could not respond to goal request: {}", e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error receiving goal request: {}", e);
                    break;
                }
            }
        }

        // ---- FEEDBACK PUBLICATION ----

        while let Ok(event) = feedback_rx.try_recv() {
            if let Err(e) = goal_server.publish(&FeedbackMsg::Event(event)) {
                warn!("Could not publish feedback: {}", e);
            }
        }

        // ---- TERMINAL RESULTS ----

        for handle in mission_mgr.missions() {
            if handle.is_terminal() && !archived_missions.contains(&handle.id()) {
                let result = handle.result();

                info!(
                    "Mission {} reached terminal status {}",
                    result.mission_id, result.status
                );

                if let Err(e) = goal_server.publish(&FeedbackMsg::Result(result.clone())) {
                    warn!("Could not publish mission result: {}", e);
                }

                session.save(
                    format!("missions/mission_{:03}.json", result.mission_id),
                    result,
                );

                archived_missions.push(handle.id());
            }
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start;

        match cycle_period.checked_sub(cycle_dur) {
            Some(remaining) => thread::sleep(remaining),
            None => warn!(
                "Cycle overran by {:.06} s",
                (cycle_dur - cycle_period).as_secs_f64()
            ),
        }
    }
}

/// Dispatch one goal request to the mission manager.
fn handle_request(
    mission_mgr: &mut MissionMgr,
    request: GoalRequest,
    cancel_ack_timeout: Duration,
) -> GoalResponse {
    match request {
        GoalRequest::Submit { legs, policy } => match mission_mgr.submit(legs, policy) {
            Ok(handle) => GoalResponse::Accepted {
                mission_id: handle.id(),
            },
            Err(MissionMgrError::Busy) => GoalResponse::Busy,
            Err(e) => GoalResponse::Rejected {
                reason: e.to_string(),
            },
        },

        GoalRequest::Cancel { mission_id } => match mission_mgr.cancel(mission_id) {
            Ok(handle) => {
                // Cooperative cancellation: wait (bounded) for the worker to
                // acknowledge by reaching a terminal status
                if handle.wait_terminal(cancel_ack_timeout) {
                    GoalResponse::CancelAck {
                        status: handle.status(),
                    }
                } else {
                    warn!(
                        "Mission {} did not stop within {:?}, cancellation continues in the \
                         background",
                        mission_id, cancel_ack_timeout
                    );
                    GoalResponse::CancelTimedOut
                }
            }
            Err(MissionMgrError::UnknownMission(_)) => GoalResponse::UnknownMission,
            Err(e) => GoalResponse::Rejected {
                reason: e.to_string(),
            },
        },

        GoalRequest::Status { mission_id } => match mission_mgr.find(mission_id) {
            Some(handle) => GoalResponse::Status {
                status: handle.status(),
                leg_status: handle.leg_status(),
            },
            None => GoalResponse::UnknownMission,
        },
    }
}
