//! # Detection Client
//!
//! SUB client for the perception pipeline's detection stream. The pipeline
//! itself is a black box; this client only drains its published detection
//! sets. Executors use it through the [`DetectionSource`] trait so tests can
//! substitute scripted detections.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use mission_if::{
    eqpt::det::DetectionSet,
    net::{
        discovery::{Bootstrap, Service},
        zmq, EndpointSocket, EndpointSocketError, SocketConfig,
    },
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Detection stream client
pub struct DetClient {
    socket: EndpointSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DetClientError {
    #[error("Socket error: {0}")]
    SocketError(EndpointSocketError),

    #[error("Could not subscribe to the detection stream: {0}")]
    SubscribeError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Source of perception detections, as consumed by the executors.
pub trait DetectionSource: Send {
    /// Whether the perception stream is currently reachable.
    fn is_connected(&self) -> bool;

    /// Drain the stream and return the most recent detection set, if any
    /// arrived since the last poll.
    fn poll(&mut self) -> Option<DetectionSet>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DetClient {
    /// Create a new instance of the detection client.
    ///
    /// This function will not block waiting for the perception process.
    pub fn new(ctx: &zmq::Context, bootstrap: &Bootstrap) -> Result<Self, DetClientError> {
        let config = SocketConfig {
            recv_timeout: 0,
            ..SocketConfig::client()
        };

        let socket = EndpointSocket::new(
            ctx,
            zmq::SUB,
            config,
            &bootstrap.connect_endpoint(Service::Detections),
        )
        .map_err(DetClientError::SocketError)?;

        socket
            .set_subscribe(b"")
            .map_err(DetClientError::SubscribeError)?;

        Ok(Self { socket })
    }
}

impl DetectionSource for DetClient {
    fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    fn poll(&mut self) -> Option<DetectionSet> {
        let mut latest = None;

        // Drain everything pending, keeping only the newest set
        loop {
            match self.socket.recv_string(zmq::DONTWAIT) {
                Ok(Ok(s)) => match serde_json::from_str(&s) {
                    Ok(set) => latest = Some(set),
                    Err(e) => warn!("Could not deserialise detection set: {}", e),
                },
                Ok(Err(_)) => warn!("Detection stream sent a non-UTF-8 message"),
                Err(_) => break,
            }
        }

        latest
    }
}
