//! # Goal Client
//!
//! REQ client for the executive's goal service.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use mission_if::{
    mission::goal::{GoalParseError, GoalRequest, GoalResponse},
    net::{
        discovery::{Bootstrap, Service},
        zmq, EndpointSocket, EndpointSocketError, SocketConfig,
    },
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Goal service client
pub struct GoalClient {
    socket: EndpointSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GoalClientError {
    #[error("Socket error: {0}")]
    SocketError(EndpointSocketError),

    #[error("Not connected to the executive")]
    NotConnected,

    #[error("Could not send the request: {0}")]
    SendError(zmq::Error),

    #[error("No reply from the executive")]
    NoReply,

    #[error("Could not receive the reply: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialise the request: {0}")]
    SerialisationError(serde_json::Error),

    #[error("Could not parse the reply: {0}")]
    ReplyParseError(GoalParseError),

    #[error("The executive sent a reply which was not valid UTF-8")]
    NonUtf8Reply,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalClient {
    /// Create a new instance of the goal client.
    ///
    /// This function will not block until the executive connects.
    pub fn new(ctx: &zmq::Context, bootstrap: &Bootstrap) -> Result<Self, GoalClientError> {
        let config = SocketConfig {
            // Cancellation replies are held back until the executive's
            // bounded acknowledgement wait resolves, so allow a generous
            // round trip
            recv_timeout: 10_000,
            send_timeout: 1000,
            req_relaxed: true,
            ..SocketConfig::client()
        };

        let socket = EndpointSocket::new(
            ctx,
            zmq::REQ,
            config,
            &bootstrap.connect_endpoint(Service::Goal),
        )
        .map_err(GoalClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Whether the executive is currently reachable.
    pub fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    /// Perform one request/response exchange with the executive.
    pub fn request(&self, request: &GoalRequest) -> Result<GoalResponse, GoalClientError> {
        if !self.socket.connected() {
            return Err(GoalClientError::NotConnected);
        }

        let request_str =
            serde_json::to_string(request).map_err(GoalClientError::SerialisationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(GoalClientError::SendError)?;

        match self.socket.recv_string(0) {
            Ok(Ok(s)) => GoalResponse::from_json(&s).map_err(GoalClientError::ReplyParseError),
            Ok(Err(_)) => Err(GoalClientError::NonUtf8Reply),
            Err(zmq::Error::EAGAIN) => Err(GoalClientError::NoReply),
            Err(e) => Err(GoalClientError::RecvError(e)),
        }
    }
}
