//! Time utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::Duration;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a `chrono::Duration` into fractional seconds.
///
/// Returns `None` if the duration cannot be represented as a whole number of
/// nanoseconds (durations longer than ~292 years).
pub fn duration_to_seconds(duration: Duration) -> Option<f64> {
    duration.num_nanoseconds().map(|ns| (ns as f64) * 1e-9)
}
