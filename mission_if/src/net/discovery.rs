//! # Discovery Bootstrap
//!
//! Processes in a deployment find each other through a single rendezvous
//! address (host + base port) supplied by the operator, rather than a static
//! peer list. One designated process per deployment is the discovery
//! authority and binds its service sockets at the rendezvous; every other
//! process is a client and connects to it. Each service's port is derived
//! from the base port by a fixed offset, so the rendezvous address is the
//! only network configuration a deployment needs.
//!
//! The bootstrap is one-time and process-wide: it must complete before any
//! component opens comms, and components which try earlier get
//! [`DiscoveryError::NotReady`]. Repeating the bootstrap after success is a
//! no-op provided the address is unchanged.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use conquer_once::OnceCell;
use log::info;
use std::str::FromStr;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

static BOOTSTRAP: OnceCell<Bootstrap> = OnceCell::uninit();

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Environment variable holding the rendezvous address. Takes precedence over
/// any address in the parameter files.
pub const DISCOVERY_ENV_VAR: &str = "ARES_DISCOVERY_ADDR";

/// Highest service port offset, used to validate the base port.
const MAX_PORT_OFFSET: u16 = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The rendezvous point shared by every process in a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEndpoint {
    pub host: String,
    pub port: u16,
}

/// The completed process-wide bootstrap.
#[derive(Debug, PartialEq, Eq)]
pub struct Bootstrap {
    endpoint: DiscoveryEndpoint,
    role: DiscoveryRole,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Role of this process in the discovery graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiscoveryRole {
    /// The designated process which binds the service sockets at the
    /// rendezvous. Exactly one per deployment.
    Authority,

    /// A process which connects to the authority's sockets.
    Client,
}

/// Services reachable through the rendezvous, each at a fixed offset from the
/// base port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Service {
    /// Mission goal submission (REQ/REP)
    Goal,

    /// Mission feedback stream (PUB/SUB)
    Feedback,

    /// Navigation driver demands (REQ/REP)
    NavDems,

    /// Perception detection stream (PUB/SUB)
    Detections,

    /// Manipulator driver demands (REQ/REP)
    ManipDems,
}

/// Errors associated with the discovery bootstrap.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(
        "No rendezvous address provided, set {} or the net params",
        DISCOVERY_ENV_VAR
    )]
    NoAddress,

    #[error("Invalid rendezvous address {0:?}, expected \"host:port\"")]
    InvalidAddress(String),

    #[error("Communication attempted before the discovery bootstrap completed")]
    NotReady,

    #[error("Discovery already bootstrapped, cannot re-bootstrap as {0:?}")]
    AlreadyBootstrapped(String),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Perform the discovery bootstrap for this process.
///
/// Parses the rendezvous address and initialises the process-wide bootstrap
/// exactly once. Calling again after success with the same address and role
/// returns the existing bootstrap; a differing address or role is an error,
/// since it would mean two parts of the process disagree about the
/// deployment.
pub fn bootstrap(addr: &str, role: DiscoveryRole) -> Result<&'static Bootstrap, DiscoveryError> {
    let endpoint = DiscoveryEndpoint::from_str(addr)?;

    let init = BOOTSTRAP.try_init_once(|| {
        info!(
            "Discovery bootstrap complete: rendezvous {}:{}, role {:?}",
            endpoint.host, endpoint.port, role
        );
        Bootstrap {
            endpoint: endpoint.clone(),
            role,
        }
    });

    match init {
        Ok(()) => get(),
        // Already initialised: a repeat of the same bootstrap is a no-op
        Err(_) => {
            let existing = get()?;
            if existing.endpoint == endpoint && existing.role == role {
                Ok(existing)
            } else {
                Err(DiscoveryError::AlreadyBootstrapped(addr.to_string()))
            }
        }
    }
}

/// Bootstrap from the environment, falling back to the given parameter-file
/// address.
///
/// The rendezvous address is deployment configuration, not something the
/// software generates: missing both sources is a fatal
/// [`DiscoveryError::NoAddress`].
pub fn bootstrap_from_env(
    params_addr: Option<&str>,
    role: DiscoveryRole,
) -> Result<&'static Bootstrap, DiscoveryError> {
    let env_addr = std::env::var(DISCOVERY_ENV_VAR).ok();

    let addr = match env_addr.as_deref().or(params_addr) {
        Some(a) => a,
        None => return Err(DiscoveryError::NoAddress),
    };

    bootstrap(addr, role)
}

/// Get the completed bootstrap.
///
/// Fails with [`DiscoveryError::NotReady`] if the bootstrap has not been
/// performed; attempting comms before bootstrap is a programming error and
/// is surfaced immediately.
pub fn get() -> Result<&'static Bootstrap, DiscoveryError> {
    BOOTSTRAP.get().ok_or(DiscoveryError::NotReady)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Bootstrap {
    /// The rendezvous endpoint this process bootstrapped against.
    pub fn endpoint(&self) -> &DiscoveryEndpoint {
        &self.endpoint
    }

    /// This process's discovery role.
    pub fn role(&self) -> DiscoveryRole {
        self.role
    }

    /// The port the given service lives on.
    pub fn service_port(&self, service: Service) -> u16 {
        self.endpoint.port + service.port_offset()
    }

    /// Endpoint string for the process which owns (binds) the given service.
    pub fn bind_endpoint(&self, service: Service) -> String {
        format!("tcp://*:{}", self.service_port(service))
    }

    /// Endpoint string for a client connecting to the given service.
    pub fn connect_endpoint(&self, service: Service) -> String {
        format!("tcp://{}:{}", self.endpoint.host, self.service_port(service))
    }
}

impl Service {
    fn port_offset(self) -> u16 {
        match self {
            Service::Goal => 0,
            Service::Feedback => 1,
            Service::NavDems => 2,
            Service::Detections => 3,
            Service::ManipDems => 4,
        }
    }
}

impl FromStr for DiscoveryEndpoint {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DiscoveryError::InvalidAddress(s.to_string());

        let (host, port_str) = match s.rfind(':') {
            Some(i) => (&s[..i], &s[i + 1..]),
            None => return Err(invalid()),
        };

        if host.is_empty() {
            return Err(invalid());
        }

        let port: u16 = port_str.parse().map_err(|_| invalid())?;

        // The highest derived service port must still fit in a u16
        if port > u16::MAX - MAX_PORT_OFFSET {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_endpoint_from_str() {
        let ep = DiscoveryEndpoint::from_str("192.168.1.10:5500").unwrap();
        assert_eq!(ep.host, "192.168.1.10");
        assert_eq!(ep.port, 5500);

        let ep = DiscoveryEndpoint::from_str("rover.local:6000").unwrap();
        assert_eq!(ep.host, "rover.local");

        assert!(DiscoveryEndpoint::from_str("").is_err());
        assert!(DiscoveryEndpoint::from_str("no-port").is_err());
        assert!(DiscoveryEndpoint::from_str(":5500").is_err());
        assert!(DiscoveryEndpoint::from_str("host:notaport").is_err());
        // Base port too high for the derived service ports
        assert!(DiscoveryEndpoint::from_str("host:65535").is_err());
    }

    /// The bootstrap static is process-wide, so its whole lifecycle is
    /// exercised in a single test to keep the ordering deterministic.
    #[test]
    fn test_bootstrap_lifecycle() {
        // Before bootstrap any access is NotReady
        match get() {
            Err(DiscoveryError::NotReady) => (),
            r => panic!("expected NotReady, got {:?}", r),
        }

        let bs = bootstrap("10.0.0.1:5500", DiscoveryRole::Authority).unwrap();
        assert_eq!(bs.role(), DiscoveryRole::Authority);
        assert_eq!(bs.endpoint().port, 5500);

        // Derived service endpoints
        assert_eq!(bs.service_port(Service::Goal), 5500);
        assert_eq!(bs.service_port(Service::Feedback), 5501);
        assert_eq!(bs.service_port(Service::ManipDems), 5504);
        assert_eq!(bs.bind_endpoint(Service::Goal), "tcp://*:5500");
        assert_eq!(
            bs.connect_endpoint(Service::Detections),
            "tcp://10.0.0.1:5503"
        );

        // Repeating the same bootstrap is a no-op
        let again = bootstrap("10.0.0.1:5500", DiscoveryRole::Authority).unwrap();
        assert_eq!(again.endpoint(), bs.endpoint());

        // A different rendezvous is rejected
        match bootstrap("10.0.0.2:5500", DiscoveryRole::Authority) {
            Err(DiscoveryError::AlreadyBootstrapped(_)) => (),
            r => panic!("expected AlreadyBootstrapped, got {:?}", r),
        }

        // As is a different role on the same rendezvous
        assert!(bootstrap("10.0.0.1:5500", DiscoveryRole::Client).is_err());

        // And the accessor now succeeds
        assert!(get().is_ok());
    }
}
