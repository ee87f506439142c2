//! # Goal Server
//!
//! The network face of the goal/feedback service. A REP socket accepts
//! [`GoalRequest`]s from the operator console; a PUB socket streams
//! [`FeedbackMsg`]s (progress events plus the terminal result) back to it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use mission_if::{
    mission::goal::{FeedbackMsg, GoalRequest, GoalResponse},
    net::{
        discovery::{Bootstrap, Service},
        zmq, EndpointSocket, EndpointSocketError, SocketConfig,
    },
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Goal service server
pub struct GoalServer {
    /// REP socket accepting goal requests
    goal_socket: EndpointSocket,

    /// PUB socket streaming feedback
    feedback_socket: EndpointSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GoalServerError {
    #[error("Socket error: {0}")]
    SocketError(EndpointSocketError),

    #[error("Could not send to the client: {0}")]
    SendError(zmq::Error),

    #[error("Could not receive a request: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialise the message: {0}")]
    SerialisationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalServer {
    /// Create a new instance of the goal server.
    ///
    /// Binds both service sockets at the rendezvous; this function will not
    /// block waiting for a client.
    pub fn new(ctx: &zmq::Context, bootstrap: &Bootstrap) -> Result<Self, GoalServerError> {
        let goal_socket = EndpointSocket::new(
            ctx,
            zmq::REP,
            SocketConfig::service(),
            &bootstrap.bind_endpoint(Service::Goal),
        )
        .map_err(GoalServerError::SocketError)?;

        let feedback_socket = EndpointSocket::new(
            ctx,
            zmq::PUB,
            SocketConfig::service(),
            &bootstrap.bind_endpoint(Service::Feedback),
        )
        .map_err(GoalServerError::SocketError)?;

        Ok(Self {
            goal_socket,
            feedback_socket,
        })
    }

    /// Receive a single pending request.
    ///
    /// `Ok(None)` means no request is pending right now. After `Ok(Some(_))`
    /// the caller MUST answer with [`GoalServer::send_response`] before the
    /// next receive. Unparseable requests are answered with
    /// [`GoalResponse::Invalid`] internally and reported as `Ok(None)`.
    pub fn recv_request(&self) -> Result<Option<GoalRequest>, GoalServerError> {
        let request_str = match self.goal_socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Received a non-UTF-8 goal request");
                self.send_response(&GoalResponse::Invalid)?;
                return Ok(None);
            }
            // No message within the timeout
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(GoalServerError::RecvError(e)),
        };

        match GoalRequest::from_json(&request_str) {
            Ok(request) => Ok(Some(request)),
            Err(e) => {
                warn!("Could not parse goal request: {}", e);
                self.send_response(&GoalResponse::Invalid)?;
                Ok(None)
            }
        }
    }

    /// Send the response to the last received request.
    pub fn send_response(&self, response: &GoalResponse) -> Result<(), GoalServerError> {
        let response_str =
            serde_json::to_string(response).map_err(GoalServerError::SerialisationError)?;

        self.goal_socket
            .send(&response_str, 0)
            .map_err(GoalServerError::SendError)
    }

    /// Publish a message on the feedback stream.
    pub fn publish(&self, msg: &FeedbackMsg) -> Result<(), GoalServerError> {
        let msg_str = serde_json::to_string(msg).map_err(GoalServerError::SerialisationError)?;

        self.feedback_socket
            .send(&msg_str, 0)
            .map_err(GoalServerError::SendError)
    }
}
