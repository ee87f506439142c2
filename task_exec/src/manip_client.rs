//! # Manipulator Driver Client
//!
//! REQ/REP client for the external manipulator arm driver, mirroring the nav
//! client. Executors use it through the [`ManipInterface`] trait so tests can
//! substitute a scripted driver.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use mission_if::{
    eqpt::manip::{ManipCmd, ManipCmdResponse, ManipRequest, ManipResponse, ManipState},
    net::{
        discovery::{Bootstrap, Service},
        zmq, EndpointSocket, EndpointSocketError, SocketConfig,
    },
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Manipulator driver client
pub struct ManipClient {
    socket: EndpointSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ManipClientError {
    #[error("Socket error: {0}")]
    SocketError(EndpointSocketError),

    #[error("The client is not connected to the manipulator driver")]
    NotConnected,

    #[error("Could not send the request to the manipulator driver: {0}")]
    SendError(zmq::Error),

    #[error("Could not receive a response from the manipulator driver: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialise the request: {0}")]
    SerialisationError(serde_json::Error),

    #[error("Could not parse the driver's response: {0}")]
    ResponseParseError(serde_json::Error),

    #[error("The manipulator driver rejected the command: {0:?}")]
    CmdRejected(ManipCmdResponse),

    #[error("The manipulator driver sent an unexpected response")]
    UnexpectedResponse,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Interface to the manipulator driver, as consumed by the executors.
pub trait ManipInterface: Send {
    /// Whether the driver is currently reachable.
    fn is_connected(&self) -> bool;

    /// Send a command to the driver, failing if it is rejected.
    fn send_cmd(&mut self, cmd: &ManipCmd) -> Result<(), ManipClientError>;

    /// Poll the driver's execution state.
    fn get_state(&mut self) -> Result<ManipState, ManipClientError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ManipClient {
    /// Create a new instance of the manipulator client.
    ///
    /// This function will not block waiting for the driver to connect.
    pub fn new(ctx: &zmq::Context, bootstrap: &Bootstrap) -> Result<Self, ManipClientError> {
        let config = SocketConfig {
            recv_timeout: 1000,
            send_timeout: 100,
            ..SocketConfig::client()
        };

        let socket = EndpointSocket::new(
            ctx,
            zmq::REQ,
            config,
            &bootstrap.connect_endpoint(Service::ManipDems),
        )
        .map_err(ManipClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Perform one request/response exchange with the driver.
    fn exchange(&mut self, request: &ManipRequest) -> Result<ManipResponse, ManipClientError> {
        if !self.socket.connected() {
            return Err(ManipClientError::NotConnected);
        }

        let request_str =
            serde_json::to_string(request).map_err(ManipClientError::SerialisationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(ManipClientError::SendError)?;

        let response_str = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(ManipClientError::UnexpectedResponse),
            Err(e) => return Err(ManipClientError::RecvError(e)),
        };

        serde_json::from_str(&response_str).map_err(ManipClientError::ResponseParseError)
    }
}

impl ManipInterface for ManipClient {
    fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    fn send_cmd(&mut self, cmd: &ManipCmd) -> Result<(), ManipClientError> {
        match self.exchange(&ManipRequest::Cmd(cmd.clone()))? {
            ManipResponse::Cmd(ManipCmdResponse::CmdOk) => Ok(()),
            ManipResponse::Cmd(r) => Err(ManipClientError::CmdRejected(r)),
            _ => Err(ManipClientError::UnexpectedResponse),
        }
    }

    fn get_state(&mut self) -> Result<ManipState, ManipClientError> {
        match self.exchange(&ManipRequest::GetState)? {
            ManipResponse::State(s) => Ok(s),
            _ => Err(ManipClientError::UnexpectedResponse),
        }
    }
}
