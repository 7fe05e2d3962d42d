//! Magnetometer-based yaw drift correction.
//!
//! Gravity cannot observe rotation about the vertical axis, so yaw drift is
//! corrected against stored magnetometer references: each reference pairs an
//! orientation with the field measured there. When the current orientation is
//! close to a reference, the heading of the current field (rotated into the
//! world frame) is compared with the reference heading and a small yaw step is
//! applied until the two agree again.
//!
//! The subsystem only runs when yaw correction is enabled on the fusion engine
//! and a calibration matrix has been supplied.

use std::f32::consts::PI;
use std::time::SystemTime;

use glam::{EulerRot, Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Capacity of the reference table
pub const MAX_REFERENCES: usize = 80;

/// Thresholds driving reference selection and the correction hysteresis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YawCorrectionPolicy {
    /// Angular speed (rad/s) above which mag readings are not trusted
    pub max_angular_speed: f32,
    /// Consecutive trusted samples required before estimating yaw error
    pub mag_window: u32,
    /// Yaw error (rad) that counts towards activating correction
    pub error_max: f32,
    /// Yaw error (rad) below which active correction stops
    pub error_min: f32,
    /// Samples of large error required to activate correction
    pub error_count_limit: u32,
    /// Yaw applied per sample while correcting (rad)
    pub rotation_step: f32,
    /// Quaternion distance within which a reference counts as nearby
    pub reference_distance: f32,
    /// Running time (s) before references may be recorded
    pub reference_warmup: f32,
    /// Running time (s) before yaw error is estimated
    pub correction_warmup: f32,
    /// References are only recorded while tilt error is below this (rad)
    pub max_tilt_error: f32,
}

impl Default for YawCorrectionPolicy {
    fn default() -> Self {
        Self {
            max_angular_speed: 3.0,
            mag_window: 5,
            error_max: 0.1,
            error_min: 0.01,
            error_count_limit: 50,
            rotation_step: 0.00002,
            reference_distance: 0.5,
            reference_warmup: 10.0,
            correction_warmup: 2.0,
            max_tilt_error: 0.2,
        }
    }
}

/// A calibration as handed to and from a [`MagCalibrationStore`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredMagCalibration {
    pub matrix: Mat4,
    pub yaw_correction_enabled: bool,
}

/// Persistence hooks for magnetometer calibrations
pub trait MagCalibrationStore {
    fn load(&self, name: &str) -> Option<StoredMagCalibration>;

    fn save(&self, name: &str, calibration: &StoredMagCalibration) -> bool;
}

/// Store that never has a calibration and never persists one
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCalibrationStore;

impl MagCalibrationStore for NoopCalibrationStore {
    fn load(&self, _name: &str) -> Option<StoredMagCalibration> {
        None
    }

    fn save(&self, _name: &str, _calibration: &StoredMagCalibration) -> bool {
        false
    }
}

/// Orientation / field pair used as a heading reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagReference {
    pub orientation: Quat,
    pub field: Vec3,
    pub yaw: f32,
}

/// Per-sample values the yaw corrector reads from the fusion state
#[derive(Debug, Clone, Copy)]
pub(crate) struct YawInputs {
    pub orientation: Quat,
    pub raw_mag: Vec3,
    pub mean_mag: Vec3,
    pub angular_speed: f32,
    pub running_time: f32,
    pub tilt_error: f32,
}

/// Calibration, reference table and hysteresis state for yaw correction
#[derive(Debug, Clone)]
pub struct MagCalibration {
    policy: YawCorrectionPolicy,
    matrix: Mat4,
    calibrated_at: Option<SystemTime>,
    calibrated: bool,
    cond_count: u32,
    references: Vec<MagReference>,
    current: Option<MagReference>,
    has_nearby_reference: bool,
    yaw_error: f32,
    error_count: u32,
    activated: bool,
    in_progress: bool,
}

impl Default for MagCalibration {
    fn default() -> Self {
        Self::new(YawCorrectionPolicy::default())
    }
}

/// Distance between two rotations, insensitive to quaternion sign
pub fn quat_distance(a: Quat, b: Quat) -> f32 {
    let (va, vb) = (Vec4::from(a), Vec4::from(b));
    (va - vb).length().min((va + vb).length())
}

/// Wrap an angle into (-PI, PI]
fn wrap_angle(mut a: f32) -> f32 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Heading of a world-frame field vector about the vertical axis
#[inline]
fn heading(v: Vec3) -> f32 {
    v.x.atan2(v.z)
}

impl MagCalibration {
    pub fn new(policy: YawCorrectionPolicy) -> Self {
        Self {
            policy,
            matrix: Mat4::IDENTITY,
            calibrated_at: None,
            calibrated: false,
            cond_count: 0,
            references: Vec::with_capacity(MAX_REFERENCES),
            current: None,
            has_nearby_reference: false,
            yaw_error: 0.0,
            error_count: 0,
            activated: false,
            in_progress: false,
        }
    }

    pub fn policy(&self) -> &YawCorrectionPolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: YawCorrectionPolicy) {
        self.policy = policy;
    }

    /// Store the calibration matrix and mark the magnetometer calibrated
    pub fn set_calibration(&mut self, matrix: Mat4) {
        self.matrix = matrix;
        self.calibrated_at = Some(SystemTime::now());
        self.calibrated = true;
    }

    pub fn calibration(&self) -> Mat4 {
        self.matrix
    }

    pub fn calibrated_at(&self) -> Option<SystemTime> {
        self.calibrated_at
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn clear_calibration(&mut self) {
        self.calibrated = false;
    }

    /// Apply the calibration offset (translation column) to a raw reading
    pub fn calibrated_value(&self, raw: Vec3) -> Vec3 {
        if self.calibrated {
            raw + self.matrix.w_axis.truncate()
        } else {
            raw
        }
    }

    pub fn references(&self) -> &[MagReference] {
        &self.references
    }

    pub fn clear_references(&mut self) {
        self.references.clear();
        self.current = None;
        self.has_nearby_reference = false;
    }

    /// Record `(orientation, field)` as a reference and make it current.
    ///
    /// Returns false once the table is full.
    pub fn set_reference(&mut self, orientation: Quat, field: Vec3) -> bool {
        if self.references.len() >= MAX_REFERENCES {
            return false;
        }
        let reference = MagReference {
            orientation,
            field,
            yaw: orientation.to_euler(EulerRot::YXZ).0,
        };
        self.references.push(reference);
        self.current = Some(reference);
        self.has_nearby_reference = true;
        tracing::debug!(
            index = self.references.len() - 1,
            yaw = reference.yaw,
            "Recorded magnetometer reference"
        );
        true
    }

    pub fn current_reference(&self) -> Option<&MagReference> {
        self.current.as_ref()
    }

    pub fn has_nearby_reference(&self) -> bool {
        self.has_nearby_reference
    }

    pub fn yaw_error(&self) -> f32 {
        self.yaw_error
    }

    /// Whether a corrective yaw step was applied on the last update
    pub fn is_correction_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn is_correction_activated(&self) -> bool {
        self.activated
    }

    /// Switch to the nearest stored reference, or record a new one
    fn select_reference(&mut self, q: Quat, raw_mag: Vec3) {
        let current = match self.current {
            None => {
                self.set_reference(q, raw_mag);
                return;
            }
            Some(current) => current,
        };

        if quat_distance(q, current.orientation) <= self.policy.reference_distance {
            return;
        }

        self.has_nearby_reference = false;
        let nearest = self
            .references
            .iter()
            .map(|r| (quat_distance(q, r.orientation), *r))
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match nearest {
            Some((dist, reference)) if dist < self.policy.reference_distance => {
                self.current = Some(reference);
                self.has_nearby_reference = true;
            }
            _ => {
                self.set_reference(q, raw_mag);
            }
        }
    }

    /// Run one correction step; returns a world-frame rotation to apply to Q
    pub(crate) fn update(&mut self, input: YawInputs) -> Option<Quat> {
        if input.angular_speed < self.policy.max_angular_speed {
            self.cond_count += 1;
        } else {
            self.cond_count = 0;
        }

        if self.calibrated
            && input.running_time > self.policy.reference_warmup
            && input.tilt_error < self.policy.max_tilt_error
        {
            self.select_reference(input.orientation, input.raw_mag);
        }

        self.in_progress = false;
        let reference = match self.current {
            Some(r)
                if self.calibrated
                    && self.has_nearby_reference
                    && input.running_time > self.policy.correction_warmup
                    && self.cond_count >= self.policy.mag_window =>
            {
                r
            }
            _ => return None,
        };

        let reference_field = reference.orientation * self.calibrated_value(reference.field);
        let field = input.orientation * self.calibrated_value(input.mean_mag);
        self.yaw_error = wrap_angle(heading(field) - heading(reference_field));

        if self.yaw_error.abs() > self.policy.error_max && !self.activated {
            self.error_count += 1;
        }
        if self.error_count > self.policy.error_count_limit {
            self.activated = true;
        }
        if self.yaw_error.abs() < self.policy.error_min && self.activated {
            self.activated = false;
            self.error_count = 0;
        }

        if !self.activated {
            return None;
        }
        self.in_progress = true;
        Some(Quat::from_axis_angle(
            Vec3::Y,
            -self.policy.rotation_step * self.yaw_error.signum(),
        ))
    }
}
