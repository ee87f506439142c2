//! # Frame Calibration Provider
//!
//! Supplies the rigid transform from a sensor mount point to the sensor's
//! true measurement origin. Mounts come in two kinds:
//!
//! - *static* mounts are fixed by the physical design and defined in the
//!   `frames.toml` parameter file, so they are always available;
//! - *calibrated* mounts (mount point to true optical origin) differ per
//!   physical unit. They are produced by a one-time external calibration
//!   procedure, loaded or written at runtime, and cached in memory for the
//!   process lifetime.
//!
//! Reads hand out full snapshots of a transform, so an executor which
//! queries once at leg start can never observe a calibration refresh
//! mid-leg.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::read_to_string;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A rigid transform between a parent and a child frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameTransform {
    pub parent: String,

    pub child: String,

    /// Position of the child frame origin in the parent frame, metres.
    pub translation_m: Vector3<f64>,

    /// Rotation taking child-frame vectors into the parent frame.
    pub rotation_q: UnitQuaternion<f64>,
}

/// Static mount definition as it appears in `frames.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticMount {
    /// Lookup name of the mount
    pub name: String,

    pub parent: String,

    pub child: String,

    /// Translation as `[x, y, z]` metres
    pub translation_m: [f64; 3],

    /// Rotation as roll/pitch/yaw in radians
    pub rotation_rpy_rad: [f64; 3],
}

/// Parameters defining the static mounts.
#[derive(Debug, Serialize, Deserialize)]
pub struct FrameParams {
    pub mounts: Vec<StaticMount>,
}

/// A calibration record as written by the external calibration procedure.
///
/// The calibration file is a JSON object keyed by mount name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub parent: String,

    pub child: String,

    /// Translation as `[x, y, z]` metres
    pub translation_m: [f64; 3],

    /// Rotation quaternion as `[x, y, z, w]`
    pub rotation_q: [f64; 4],
}

/// The frame provider itself.
pub struct FrameProvider {
    /// Static mounts, immutable after construction.
    statics: HashMap<String, FrameTransform>,

    /// Calibrated mounts, written by the calibration load/refresh path and
    /// snapshotted on read.
    calibrated: Mutex<HashMap<String, FrameTransform>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors associated with the frame provider.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("No calibration has been performed for mount {0:?}")]
    NotCalibrated(String),

    #[error("Cannot load the calibration file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot parse the calibration file: {0}")]
    ParseError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FrameTransform {
    /// Transform a point in the child frame into the parent frame.
    pub fn apply(&self, point_m: &Vector3<f64>) -> Vector3<f64> {
        self.rotation_q.transform_vector(point_m) + self.translation_m
    }
}

impl FrameProvider {
    /// Build the provider from the static mount parameters.
    pub fn new(params: &FrameParams) -> Self {
        let statics = params
            .mounts
            .iter()
            .map(|m| {
                let transform = FrameTransform {
                    parent: m.parent.clone(),
                    child: m.child.clone(),
                    translation_m: Vector3::from(m.translation_m),
                    rotation_q: UnitQuaternion::from_euler_angles(
                        m.rotation_rpy_rad[0],
                        m.rotation_rpy_rad[1],
                        m.rotation_rpy_rad[2],
                    ),
                };
                (m.name.clone(), transform)
            })
            .collect();

        Self {
            statics,
            calibrated: Mutex::new(HashMap::new()),
        }
    }

    /// Get the transform for the given mount.
    ///
    /// Static mounts are always available. Calibrated mounts fail with
    /// [`FrameError::NotCalibrated`] until a calibration has been written.
    /// The returned value is a snapshot: a later refresh is never observed
    /// through it.
    pub fn get_transform(&self, mount: &str) -> Result<FrameTransform, FrameError> {
        if let Some(t) = self.statics.get(mount) {
            return Ok(t.clone());
        }

        let calibrated = self
            .calibrated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        calibrated
            .get(mount)
            .cloned()
            .ok_or_else(|| FrameError::NotCalibrated(mount.to_string()))
    }

    /// True if the given mount is currently available.
    pub fn is_available(&self, mount: &str) -> bool {
        self.get_transform(mount).is_ok()
    }

    /// Write a calibrated transform for the given mount.
    ///
    /// The whole transform is stored in one step, replacing any previous
    /// calibration for the mount. Refreshes are only expected between
    /// missions; executors snapshot at leg start.
    pub fn set_calibration(&self, mount: &str, transform: FrameTransform) {
        let mut calibrated = self
            .calibrated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        calibrated.insert(mount.to_string(), transform);
    }

    /// Load calibration records from the file written by the external
    /// calibration procedure. Returns the number of records loaded.
    pub fn load_calibration_file(&self, path: &Path) -> Result<usize, FrameError> {
        let contents = read_to_string(path).map_err(FrameError::FileLoadError)?;

        let records: HashMap<String, CalibrationRecord> =
            serde_json::from_str(&contents).map_err(FrameError::ParseError)?;

        let count = records.len();
        for (mount, record) in records {
            self.set_calibration(&mount, record.into_transform());
        }

        Ok(count)
    }
}

impl CalibrationRecord {
    /// Convert the record into a transform.
    pub fn into_transform(self) -> FrameTransform {
        let [x, y, z, w] = self.rotation_q;

        FrameTransform {
            parent: self.parent,
            child: self.child,
            translation_m: Vector3::from(self.translation_m),
            rotation_q: UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn provider() -> FrameProvider {
        FrameProvider::new(&FrameParams {
            mounts: vec![StaticMount {
                name: "gps_antenna".into(),
                parent: "body".into(),
                child: "gps_antenna".into(),
                translation_m: [0.1, 0.0, 0.5],
                rotation_rpy_rad: [0.0, 0.0, 0.0],
            }],
        })
    }

    fn cam_transform() -> FrameTransform {
        FrameTransform {
            parent: "nav_camera_mount".into(),
            child: "nav_camera_optical".into(),
            translation_m: Vector3::new(0.02, -0.01, 0.0),
            rotation_q: UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2),
        }
    }

    #[test]
    fn test_static_mount_always_available() {
        let provider = provider();

        let tf = provider.get_transform("gps_antenna").unwrap();
        assert_eq!(tf.parent, "body");
        assert_eq!(tf.translation_m, Vector3::new(0.1, 0.0, 0.5));
    }

    #[test]
    fn test_uncalibrated_mount_fails() {
        let provider = provider();

        match provider.get_transform("nav_camera") {
            Err(FrameError::NotCalibrated(m)) => assert_eq!(m, "nav_camera"),
            r => panic!("expected NotCalibrated, got {:?}", r),
        }
        assert!(!provider.is_available("nav_camera"));
    }

    #[test]
    fn test_calibration_cached_and_refreshable() {
        let provider = provider();

        provider.set_calibration("nav_camera", cam_transform());

        // Subsequent reads return the written value
        let first = provider.get_transform("nav_camera").unwrap();
        let second = provider.get_transform("nav_camera").unwrap();
        assert_eq!(first, cam_transform());
        assert_eq!(first, second);

        // A refresh replaces the whole transform, earlier snapshots are
        // untouched
        let mut refreshed = cam_transform();
        refreshed.translation_m = Vector3::new(0.03, -0.01, 0.001);
        provider.set_calibration("nav_camera", refreshed.clone());

        assert_eq!(provider.get_transform("nav_camera").unwrap(), refreshed);
        assert_eq!(first, cam_transform());
    }

    #[test]
    fn test_transform_apply() {
        // 90 degree yaw plus a translation along x
        let tf = FrameTransform {
            parent: "body".into(),
            child: "sensor".into(),
            translation_m: Vector3::new(1.0, 0.0, 0.0),
            rotation_q: UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2),
        };

        let p = tf.apply(&Vector3::new(1.0, 0.0, 0.0));

        // The sensor-frame x axis maps onto body-frame y
        assert!((p.x - 1.0).abs() < 1e-9);
        assert!((p.y - 1.0).abs() < 1e-9);
        assert!(p.z.abs() < 1e-9);
    }

    #[test]
    fn test_calibration_record_conversion() {
        let record = CalibrationRecord {
            parent: "mount".into(),
            child: "optical".into(),
            translation_m: [0.0, 0.0, 0.1],
            // Identity rotation
            rotation_q: [0.0, 0.0, 0.0, 1.0],
        };

        let tf = record.into_transform();
        assert_eq!(tf.translation_m, Vector3::new(0.0, 0.0, 0.1));
        assert_eq!(tf.rotation_q, UnitQuaternion::identity());
    }
}
