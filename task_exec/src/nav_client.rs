//! # Navigation Driver Client
//!
//! REQ/REP client for the external navigation driver process. Executors use
//! it through the [`NavInterface`] trait so tests can substitute a scripted
//! driver.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use mission_if::{
    eqpt::nav::{NavCmd, NavCmdResponse, NavRequest, NavResponse, NavState},
    net::{
        discovery::{Bootstrap, Service},
        zmq, EndpointSocket, EndpointSocketError, SocketConfig,
    },
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Navigation driver client
pub struct NavClient {
    socket: EndpointSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NavClientError {
    #[error("Socket error: {0}")]
    SocketError(EndpointSocketError),

    #[error("The client is not connected to the nav driver")]
    NotConnected,

    #[error("Could not send the request to the nav driver: {0}")]
    SendError(zmq::Error),

    #[error("Could not receive a response from the nav driver: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialise the request: {0}")]
    SerialisationError(serde_json::Error),

    #[error("Could not parse the driver's response: {0}")]
    ResponseParseError(serde_json::Error),

    #[error("The nav driver rejected the command: {0:?}")]
    CmdRejected(NavCmdResponse),

    #[error("The nav driver sent an unexpected response")]
    UnexpectedResponse,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Interface to the navigation driver, as consumed by the executors.
pub trait NavInterface: Send {
    /// Whether the driver is currently reachable.
    fn is_connected(&self) -> bool;

    /// Send a command to the driver, failing if it is rejected.
    fn send_cmd(&mut self, cmd: &NavCmd) -> Result<(), NavClientError>;

    /// Poll the driver's execution state.
    fn get_state(&mut self) -> Result<NavState, NavClientError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavClient {
    /// Create a new instance of the nav client.
    ///
    /// This function will not block waiting for the driver to connect.
    pub fn new(ctx: &zmq::Context, bootstrap: &Bootstrap) -> Result<Self, NavClientError> {
        let config = SocketConfig {
            // Driver exchanges are a round trip, allow it time to reply
            recv_timeout: 1000,
            send_timeout: 100,
            ..SocketConfig::client()
        };

        let socket = EndpointSocket::new(
            ctx,
            zmq::REQ,
            config,
            &bootstrap.connect_endpoint(Service::NavDems),
        )
        .map_err(NavClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Perform one request/response exchange with the driver.
    fn exchange(&mut self, request: &NavRequest) -> Result<NavResponse, NavClientError> {
        if !self.socket.connected() {
            return Err(NavClientError::NotConnected);
        }

        let request_str =
            serde_json::to_string(request).map_err(NavClientError::SerialisationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(NavClientError::SendError)?;

        let response_str = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(NavClientError::UnexpectedResponse),
            Err(e) => return Err(NavClientError::RecvError(e)),
        };

        serde_json::from_str(&response_str).map_err(NavClientError::ResponseParseError)
    }
}

impl NavInterface for NavClient {
    fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    fn send_cmd(&mut self, cmd: &NavCmd) -> Result<(), NavClientError> {
        match self.exchange(&NavRequest::Cmd(cmd.clone()))? {
            NavResponse::Cmd(NavCmdResponse::CmdOk) => Ok(()),
            NavResponse::Cmd(r) => Err(NavClientError::CmdRejected(r)),
            _ => Err(NavClientError::UnexpectedResponse),
        }
    }

    fn get_state(&mut self) -> Result<NavState, NavClientError> {
        match self.exchange(&NavRequest::GetState)? {
            NavResponse::State(s) => Ok(s),
            _ => Err(NavClientError::UnexpectedResponse),
        }
    }
}
