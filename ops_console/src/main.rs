//! # Operator Console
//!
//! Base-station REPL for commanding the mission executive: submit missions,
//! watch the feedback stream, query status, and request cancellation.
//!
//! The console is a discovery client: it needs the deployment's rendezvous
//! address in `ARES_DISCOVERY_ADDR` to find the executive.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod goal_client;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Report};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use structopt::clap::AppSettings;
use structopt::StructOpt;

use goal_client::GoalClient;
use mission_if::{
    mission::{
        goal::{FeedbackMsg, GoalRequest, GoalResponse, MissionResult},
        FailurePolicy, Leg,
    },
    net::{
        discovery::{self, Bootstrap, DiscoveryRole, Service},
        zmq, EndpointSocket, SocketConfig,
    },
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const PROMPT: &str = "ares> ";
const HISTORY_PATH: &str = ".ops_console_history";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A console command, one per REPL line.
#[derive(Debug, StructOpt)]
#[structopt(name = "ops_console", setting = AppSettings::NoBinaryName)]
enum ConsoleCmd {
    /// Submit a mission built from leg specs.
    #[structopt(name = "submit")]
    Submit {
        /// Mission failure policy: "abort", "skip", or "retry:<n>".
        /// Required: there is no default policy.
        #[structopt(short = "p", long = "policy")]
        policy: FailurePolicy,

        /// Legs as <kind>:<param>, e.g. gps:gps1 marker:aruco1
        /// manipulator:mallet. Submission order is execution order.
        #[structopt(required = true)]
        legs: Vec<LegArg>,
    },

    /// Submit a mission from a JSON plan file (an array of legs).
    #[structopt(name = "plan")]
    Plan {
        /// Mission failure policy: "abort", "skip", or "retry:<n>"
        #[structopt(short = "p", long = "policy")]
        policy: FailurePolicy,

        /// Path to the plan file
        file: PathBuf,
    },

    /// Request cancellation of a mission.
    #[structopt(name = "cancel")]
    Cancel { mission_id: u32 },

    /// Query the status of a mission.
    #[structopt(name = "status")]
    Status { mission_id: u32 },

    /// Exit the console.
    #[structopt(name = "exit")]
    Exit,
}

/// A leg spec as typed on the command line, `<kind>:<param>`.
#[derive(Debug)]
struct LegArg(Leg);

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    // The console is a pure discovery client, the rendezvous must come from
    // the environment
    let bootstrap = discovery::bootstrap_from_env(None, DiscoveryRole::Client)
        .wrap_err("Discovery bootstrap failed (is ARES_DISCOVERY_ADDR set?)")?;

    let zmq_ctx = zmq::Context::new();

    let client =
        GoalClient::new(&zmq_ctx, bootstrap).wrap_err("Failed to initialise the goal client")?;

    spawn_feedback_printer(zmq_ctx.clone(), bootstrap);

    println!(
        "Connected console to rendezvous {}:{}",
        bootstrap.endpoint().host,
        bootstrap.endpoint().port
    );

    let mut rl = DefaultEditor::new().wrap_err("Failed to initialise the line editor")?;
    if rl.load_history(HISTORY_PATH).is_err() {
        println!("No history detected");
    }

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line).ok();

                match ConsoleCmd::from_iter_safe(line.split_whitespace()) {
                    Ok(ConsoleCmd::Exit) => break,
                    Ok(cmd) => exec_cmd(&client, cmd),
                    Err(e) => println!("{}", e.message),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("Unhandled error: {:?}", e);
                break;
            }
        }
    }

    rl.save_history(HISTORY_PATH).ok();

    Ok(())
}

/// Run a single console command against the executive.
fn exec_cmd(client: &GoalClient, cmd: ConsoleCmd) {
    let request = match cmd {
        ConsoleCmd::Submit { policy, legs } => GoalRequest::Submit {
            legs: legs.into_iter().map(|l| l.0).collect(),
            policy,
        },

        ConsoleCmd::Plan { policy, file } => match load_plan(&file) {
            Ok(legs) => GoalRequest::Submit { legs, policy },
            Err(e) => {
                println!("Could not load plan {:?}: {}", file, e);
                return;
            }
        },

        ConsoleCmd::Cancel { mission_id } => GoalRequest::Cancel { mission_id },

        ConsoleCmd::Status { mission_id } => GoalRequest::Status { mission_id },

        // Exit is handled by the REPL loop
        ConsoleCmd::Exit => return,
    };

    match client.request(&request) {
        Ok(response) => print_response(&response),
        Err(e) => println!("Request failed: {}", e),
    }
}

/// Load a mission plan file: a JSON array of legs.
fn load_plan(path: &PathBuf) -> Result<Vec<Leg>, Report> {
    let contents = std::fs::read_to_string(path).wrap_err("Cannot read the plan file")?;
    serde_json::from_str(&contents).wrap_err("Cannot parse the plan file")
}

fn print_response(response: &GoalResponse) {
    match response {
        GoalResponse::Accepted { mission_id } => println!("Mission {} accepted", mission_id),
        GoalResponse::Busy => println!("Rejected: a mission is already active, retry later"),
        GoalResponse::Rejected { reason } => println!("Rejected: {}", reason),
        GoalResponse::CancelAck { status } => println!("Cancellation acknowledged, mission {}", status),
        GoalResponse::CancelTimedOut => {
            println!("Cancellation timed out, the executive keeps stopping the leg in the background")
        }
        GoalResponse::Status { status, leg_status } => {
            println!("Mission {}, legs {:?}", status, leg_status)
        }
        GoalResponse::UnknownMission => println!("No such mission"),
        GoalResponse::Invalid => println!("The executive could not understand the request"),
    }
}

/// Print the feedback stream in the background for the lifetime of the
/// console.
fn spawn_feedback_printer(ctx: zmq::Context, bootstrap: &'static Bootstrap) {
    thread::spawn(move || {
        let config = SocketConfig {
            block_on_first_connect: false,
            recv_timeout: 500,
            ..Default::default()
        };

        let socket = match EndpointSocket::new(
            &ctx,
            zmq::SUB,
            config,
            &bootstrap.connect_endpoint(Service::Feedback),
        ) {
            Ok(s) => s,
            Err(e) => {
                println!("Feedback stream unavailable: {}", e);
                return;
            }
        };

        if let Err(e) = socket.set_subscribe(b"") {
            println!("Feedback stream unavailable: {}", e);
            return;
        }

        loop {
            match socket.recv_string(0) {
                Ok(Ok(msg)) => {
                    if let Ok(feedback) = FeedbackMsg::from_json(&msg) {
                        print_feedback(&feedback);
                    }
                }
                Ok(Err(_)) => (),
                // Nothing within the timeout, keep listening
                Err(zmq::Error::EAGAIN) => (),
                Err(_) => break,
            }
        }
    });
}

fn print_feedback(msg: &FeedbackMsg) {
    match msg {
        FeedbackMsg::Event(event) => println!(
            "[mission {} leg {}] {}: {}",
            event.mission_id, event.leg_index, event.leg_status, event.message
        ),
        FeedbackMsg::Result(result) => print_result(result),
    }
}

fn print_result(result: &MissionResult) {
    println!(
        "[mission {}] finished: {}",
        result.mission_id, result.status
    );
    for (index, leg_result) in result.leg_results.iter().enumerate() {
        println!("    leg {}: {}", index, leg_result);
    }
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FromStr for LegArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, param) = s
            .split_once(':')
            .ok_or_else(|| format!("Expected <kind>:<param>, got {:?}", s))?;

        if param.is_empty() {
            return Err(format!("Leg spec {:?} has an empty parameter", s));
        }

        let leg = match kind {
            "gps" => Leg::Gps {
                waypoint_id: param.to_string(),
            },
            "marker" => Leg::Marker {
                marker_id: param.to_string(),
            },
            "manipulator" | "manip" => Leg::Manipulator {
                target: param.to_string(),
            },
            other => {
                return Err(format!(
                    "Unknown leg kind {:?}, expected gps, marker, or manipulator",
                    other
                ))
            }
        };

        Ok(LegArg(leg))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_leg_arg_from_str() {
        match LegArg::from_str("gps:gps1").unwrap().0 {
            Leg::Gps { waypoint_id } => assert_eq!(waypoint_id, "gps1"),
            l => panic!("expected a gps leg, got {:?}", l),
        }

        match LegArg::from_str("manip:mallet").unwrap().0 {
            Leg::Manipulator { target } => assert_eq!(target, "mallet"),
            l => panic!("expected a manipulator leg, got {:?}", l),
        }

        assert!(LegArg::from_str("gps1").is_err());
        assert!(LegArg::from_str("gps:").is_err());
        assert!(LegArg::from_str("teleport:home").is_err());
    }

    #[test]
    fn test_submit_command_parsing() {
        let cmd = ConsoleCmd::from_iter_safe(
            "submit -p retry:2 gps:gps1 marker:aruco1 manipulator:mallet".split_whitespace(),
        )
        .unwrap();

        match cmd {
            ConsoleCmd::Submit { policy, legs } => {
                assert_eq!(policy, FailurePolicy::RetryThenAbort(2));
                assert_eq!(legs.len(), 3);
                assert_eq!(legs[0].0.name(), "gps1");
            }
            c => panic!("expected Submit, got {:?}", c),
        }

        // A submission without a policy is rejected
        assert!(ConsoleCmd::from_iter_safe("submit gps:gps1".split_whitespace()).is_err());
    }
}
