//! # Waypoint Table
//!
//! Named GPS waypoints surveyed before a mission. Spatial legs refer to
//! waypoints by name; a leg naming an unknown waypoint fails rather than
//! failing the whole mission.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single named waypoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    pub name: String,

    pub lat_deg: f64,

    pub lon_deg: f64,
}

/// Parameters defining the waypoint table (`waypoints.toml`).
#[derive(Debug, Serialize, Deserialize)]
pub struct WaypointParams {
    pub waypoints: Vec<Waypoint>,
}

/// The waypoint table, keyed by waypoint name.
pub struct WaypointTable(HashMap<String, Waypoint>);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl WaypointTable {
    /// Build the table from the waypoint parameters. Later duplicates of a
    /// name replace earlier ones.
    pub fn from_params(params: WaypointParams) -> Self {
        Self(
            params
                .waypoints
                .into_iter()
                .map(|w| (w.name.clone(), w))
                .collect(),
        )
    }

    /// Look up a waypoint by name.
    pub fn get(&self, name: &str) -> Option<&Waypoint> {
        self.0.get(name)
    }

    /// Number of waypoints in the table.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_waypoint_lookup() {
        let table = WaypointTable::from_params(WaypointParams {
            waypoints: vec![
                Waypoint {
                    name: "gps1".into(),
                    lat_deg: 38.406,
                    lon_deg: -110.792,
                },
                Waypoint {
                    name: "aruco1".into(),
                    lat_deg: 38.407,
                    lon_deg: -110.791,
                },
            ],
        });

        assert_eq!(table.len(), 2);
        assert!((table.get("gps1").unwrap().lat_deg - 38.406).abs() < 1e-9);
        assert!(table.get("gps3").is_none());
    }
}
