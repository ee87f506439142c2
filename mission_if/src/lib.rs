//! # Mission interface crate.
//!
//! Provides all common communications interfaces for the software: the
//! mission goal/feedback wire protocol, equipment command definitions for the
//! external driver processes, and the network layer including the discovery
//! bootstrap.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command and response definitions for equipment drivers (nav, perception,
/// manipulator)
pub mod eqpt;

/// Mission, leg, goal and feedback definitions
pub mod mission;

/// Network module
pub mod net;
