//! # Network Module
//!
//! This module provides the networking abstractions over ZMQ, the messaging
//! library used by the software: a socket wrapper which tracks its own
//! connection state, and the discovery bootstrap which tells every process
//! where to find its peers.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod discovery;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use zmq::{Context, Socket, SocketEvent, SocketType};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Number of socket monitors created so far, used to give each monitor pair a
/// unique inproc endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A zmq socket which monitors its own connection state.
///
/// A background thread watches the socket's monitor events and keeps a
/// `connected` flag up to date, so users can check [`EndpointSocket::connected`]
/// before attempting an exchange.
pub struct EndpointSocket {
    socket: Socket,

    shutdown: Arc<AtomicBool>,

    connected: Arc<AtomicBool>,

    _monitor_handle: Option<thread::JoinHandle<()>>,
}

/// Options applied to an [`EndpointSocket`] on creation.
///
/// Timeouts are in milliseconds, matching the underlying
/// [`zmq_setsockopt`](http://api.zeromq.org/4-2:zmq-setsockopt) options.
pub struct SocketConfig {
    /// Bind to the endpoint instead of connecting to it. The process which
    /// owns a service binds; its clients connect.
    pub bind: bool,

    /// Block in the constructor until the first connection is established
    /// (clients only).
    pub block_on_first_connect: bool,

    /// `ZMQ_CONNECT_TIMEOUT`
    pub connect_timeout: i32,

    /// `ZMQ_RCVTIMEO`
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`
    pub send_timeout: i32,

    /// `ZMQ_LINGER`
    pub linger: i32,

    /// `ZMQ_HEARTBEAT_IVL`
    pub heartbeat_ivl: i32,

    /// `ZMQ_HEARTBEAT_TIMEOUT`
    pub heartbeat_timeout: i32,

    /// `ZMQ_HEARTBEAT_TTL`
    pub heartbeat_ttl: i32,

    /// `ZMQ_REQ_CORRELATE`
    pub req_correlate: bool,

    /// `ZMQ_REQ_RELAXED`
    pub req_relaxed: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EndpointSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect the socket: {0:?}")]
    CouldNotConnect(Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(&'static str, zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EndpointSocket {
    /// Create a new monitored socket on the given endpoint.
    ///
    /// The endpoint string comes from the discovery bootstrap (see
    /// [`discovery::Bootstrap::bind_endpoint`] and
    /// [`discovery::Bootstrap::connect_endpoint`]), which forces callers to
    /// have completed the bootstrap before opening any comms.
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        config: SocketConfig,
        endpoint: &str,
    ) -> Result<Self, EndpointSocketError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        let socket = ctx
            .socket(socket_type)
            .map_err(EndpointSocketError::CreateSocketError)?;

        // Each socket gets its own inproc monitor pair
        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );

        socket
            .monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(EndpointSocketError::MonitoringEnableError)?;
        let monitor = ctx
            .socket(zmq::PAIR)
            .map_err(EndpointSocketError::CreateSocketError)?;
        monitor
            .connect(&monitor_endpoint)
            .map_err(|e| EndpointSocketError::CouldNotConnect(Some(e)))?;

        config.apply(&socket)?;

        match config.bind {
            true => socket.bind(endpoint),
            false => socket.connect(endpoint),
        }
        .map_err(|e| EndpointSocketError::CouldNotConnect(Some(e)))?;

        // If requested, wait for the monitor to report the first connection
        if config.block_on_first_connect {
            loop {
                match read_event(&monitor).map_err(EndpointSocketError::EventReadError)? {
                    SocketEvent::CONNECTED => break,
                    SocketEvent::CONNECT_DELAYED | SocketEvent::CONNECT_RETRIED => continue,
                    _ => return Err(EndpointSocketError::CouldNotConnect(None)),
                }
            }

            connected.store(true, Ordering::Relaxed);
        }

        // Spawn the monitor thread
        let monitor_handle = {
            let shutdown = shutdown.clone();
            let connected = connected.clone();
            thread::spawn(move || monitor_thread(monitor, shutdown, connected))
        };

        Ok(Self {
            socket,
            shutdown,
            connected,
            _monitor_handle: Some(monitor_handle),
        })
    }

    /// Return whether the socket currently has a live connection.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for EndpointSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The monitor thread is not joined: it may be blocked waiting for an
        // event that never comes once the socket is gone.
    }
}

impl std::ops::Deref for EndpointSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl std::ops::DerefMut for EndpointSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

impl SocketConfig {
    /// A configuration suitable for a service socket: binds, never blocks
    /// waiting for clients, and uses short exchange timeouts so the owning
    /// cyclic loop is never stalled.
    pub fn service() -> Self {
        Self {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: 10,
            send_timeout: 10,
            ..Default::default()
        }
    }

    /// A configuration suitable for a client socket of a cyclic executive:
    /// connects in the background and uses short exchange timeouts. REQ
    /// sockets are relaxed so a timed-out exchange does not wedge the
    /// request state machine.
    pub fn client() -> Self {
        Self {
            bind: false,
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_timeout: 1000,
            heartbeat_ttl: 1000,
            recv_timeout: 10,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        }
    }

    /// Set these options on the given socket.
    fn apply(&self, socket: &Socket) -> Result<(), EndpointSocketError> {
        let opt = |name, res: zmq::Result<()>| {
            res.map_err(|e| EndpointSocketError::SocketOptionError(name, e))
        };

        opt("connect_timeout", socket.set_connect_timeout(self.connect_timeout))?;
        opt("rcvtimeo", socket.set_rcvtimeo(self.recv_timeout))?;
        opt("sndtimeo", socket.set_sndtimeo(self.send_timeout))?;
        opt("linger", socket.set_linger(self.linger))?;
        opt("heartbeat_ivl", socket.set_heartbeat_ivl(self.heartbeat_ivl))?;
        opt(
            "heartbeat_timeout",
            socket.set_heartbeat_timeout(self.heartbeat_timeout),
        )?;
        opt("heartbeat_ttl", socket.set_heartbeat_ttl(self.heartbeat_ttl))?;

        // REQ-specific options are only valid on REQ sockets
        if let Ok(SocketType::REQ) = socket.get_socket_type() {
            opt("req_correlate", socket.set_req_correlate(self.req_correlate))?;
            opt("req_relaxed", socket.set_req_relaxed(self.req_relaxed))?;
        }

        Ok(())
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        // Defaults match http://api.zeromq.org/4-2:zmq-setsockopt except for
        // linger, which is shortened so processes exit promptly
        Self {
            bind: false,
            block_on_first_connect: true,
            connect_timeout: 0,
            recv_timeout: -1,
            send_timeout: -1,
            linger: 1000,
            heartbeat_ivl: 0,
            heartbeat_timeout: 0,
            heartbeat_ttl: 0,
            req_correlate: false,
            req_relaxed: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read one event from a monitor socket.
fn read_event(monitor: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = monitor.recv_msg(0)?;

    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    // Each event carries a second frame with the endpoint address, which we
    // don't need
    if monitor.get_rcvmore()? {
        let _ = monitor.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

fn monitor_thread(monitor: Socket, shutdown: Arc<AtomicBool>, connected: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(_) => break,
        };

        match event {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => {
                connected.store(true, Ordering::Relaxed)
            }
            SocketEvent::DISCONNECTED | SocketEvent::CLOSED => {
                connected.store(false, Ordering::Relaxed)
            }
            _ => (),
        }
    }
}
