//! Orientation estimation from accelerometer, gyro and magnetometer samples.
//!
//! [`SensorFusion`] integrates angular velocity into an orientation quaternion,
//! pulls the estimate back towards gravity when the head is still (tilt
//! correction) and optionally against magnetometer references (yaw
//! correction). All state lives behind one mutex so the polling thread can feed
//! samples while other threads read snapshots.
//!
//! World frame: Y is up. Angles are radians, time is seconds.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::filter::SensorFilter;
use crate::magnetometer::{
    MagCalibration, MagCalibrationStore, StoredMagCalibration, YawCorrectionPolicy, YawInputs,
};
use crate::message::{timestamp_delta, TrackerMessage, MESSAGE_TYPE_SENSORS};
use crate::session::MessageSink;

/// Sample period of the tracker (1 ms ticks)
pub const DEFAULT_DT: f32 = 0.001;
/// Standard gravity used by the tilt stability test, m/s^2
pub const GRAVITY: f32 = 9.81;

const MAG_FILTER_SIZE: usize = 10;
const ACCEL_FILTER_SIZE: usize = 20;
const ANG_VEL_FILTER_SIZE: usize = 20;

const RENORMALIZE_INTERVAL: u64 = 5000;

const GRAVITY_EPSILON: f32 = 0.4;
const ANG_VEL_EPSILON: f32 = 0.1;
const TILT_PERIOD: u32 = 50;
const MAX_TILT_ERROR: f32 = 0.05;
const MIN_TILT_ERROR: f32 = 0.01;
const TILT_SNAP_ANGLE: f32 = 0.4;
const TILT_SNAP_WINDOW: f32 = 8.0;
const TILT_STEP_SCALE: f32 = 0.005;

const MIN_PREDICTION_DT: f32 = 0.001;
const PREDICTION_SLOPE: f32 = 0.1;
const MIN_PREDICTION_SPEED: f32 = 0.001;

/// Largest timestamp gap, in ticks, treated as missed samples
const MAX_MISSED_TICKS: u32 = 254;

/// Which angular velocity drives orientation prediction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    /// Latest reported angular velocity
    #[default]
    Raw,
    /// Savitzky-Golay smoothing of recent angular velocities
    Smoothed,
}

#[derive(Debug, Clone)]
struct FusionState {
    q: Quat,
    q_uncorrected: Quat,
    accel: Vec3,
    gyro: Vec3,
    /// Gyro with the yaw multiplier applied
    ang_v: Vec3,
    raw_mag: Vec3,
    stage: u64,
    running_time: f32,

    motion_tracking: bool,
    gravity_correction: bool,
    yaw_correction: bool,
    prediction: bool,
    gain: f32,
    yaw_multiplier: f32,
    prediction_dt: f32,
    prediction_source: PredictionSource,

    mag_filter: SensorFilter,
    accel_filter: SensorFilter,
    ang_v_filter: SensorFilter,

    tilt_cond_count: u32,
    tilt_error_angle: f32,
    tilt_error_axis: Vec3,

    mag: MagCalibration,
}

impl FusionState {
    fn new(config: &FusionConfig) -> Self {
        Self {
            q: Quat::IDENTITY,
            q_uncorrected: Quat::IDENTITY,
            accel: Vec3::ZERO,
            gyro: Vec3::ZERO,
            ang_v: Vec3::ZERO,
            raw_mag: Vec3::ZERO,
            stage: 0,
            running_time: 0.0,
            motion_tracking: config.motion_tracking,
            gravity_correction: config.gravity_correction,
            yaw_correction: config.yaw_correction,
            prediction: config.prediction,
            gain: config.accel_gain,
            yaw_multiplier: config.yaw_multiplier,
            prediction_dt: config.prediction_horizon,
            prediction_source: config.prediction_source,
            mag_filter: SensorFilter::new(MAG_FILTER_SIZE),
            accel_filter: SensorFilter::new(ACCEL_FILTER_SIZE),
            ang_v_filter: SensorFilter::new(ANG_VEL_FILTER_SIZE),
            tilt_cond_count: 0,
            tilt_error_angle: 0.0,
            tilt_error_axis: Vec3::Y,
            mag: MagCalibration::new(config.yaw_policy),
        }
    }

    fn step(&mut self, accel: Vec3, gyro: Vec3, mag: Vec3, dt: f32) {
        if !self.motion_tracking {
            return;
        }

        self.accel = accel;
        self.gyro = gyro;
        self.raw_mag = mag;
        self.stage += 1;
        self.running_time += dt;

        self.mag_filter.insert(mag);
        self.accel_filter.insert(self.q * accel);
        self.ang_v_filter.insert(gyro);

        let speed = gyro.length();
        if speed > 0.0 {
            self.q = self.q * Quat::from_axis_angle(gyro / speed, speed * dt);
        }

        if self.stage % RENORMALIZE_INTERVAL == 0 {
            self.q = self.q.normalize();
            tracing::trace!(stage = self.stage, "Renormalized orientation");
        }

        self.q_uncorrected = self.q;

        if self.gravity_correction {
            self.correct_tilt(accel.length(), speed);
        }

        if self.yaw_correction {
            let inputs = YawInputs {
                orientation: self.q,
                raw_mag: mag,
                mean_mag: self.mag_filter.mean(),
                angular_speed: speed,
                running_time: self.running_time,
                tilt_error: self.tilt_error_angle,
            };
            if let Some(correction) = self.mag.update(inputs) {
                self.q = correction * self.q;
            }
        }

        self.ang_v = Vec3::new(gyro.x, gyro.y * self.yaw_multiplier, gyro.z);
    }

    fn correct_tilt(&mut self, accel_len: f32, speed: f32) {
        if (accel_len - GRAVITY).abs() < GRAVITY_EPSILON && speed < ANG_VEL_EPSILON {
            self.tilt_cond_count += 1;
        } else {
            self.tilt_cond_count = 0;
        }

        if self.tilt_cond_count >= TILT_PERIOD {
            self.tilt_cond_count = 0;
            let mean = self.accel_filter.mean();
            if mean.length_squared() > 0.0 {
                let angle = Vec3::Y.angle_between(mean);
                let axis = Vec3::new(mean.z, 0.0, -mean.x).normalize_or_zero();
                if angle > MAX_TILT_ERROR && axis != Vec3::ZERO {
                    self.tilt_error_angle = angle;
                    self.tilt_error_axis = axis;
                }
            }
        }

        if self.tilt_error_angle > MIN_TILT_ERROR {
            if self.tilt_error_angle > TILT_SNAP_ANGLE && self.running_time < TILT_SNAP_WINDOW {
                tracing::debug!(
                    angle = self.tilt_error_angle,
                    running_time = self.running_time,
                    "Snapping orientation to gravity"
                );
                self.q = Quat::from_axis_angle(self.tilt_error_axis, -self.tilt_error_angle) * self.q;
                self.tilt_error_angle = 0.0;
            } else {
                let delta = -self.gain
                    * self.tilt_error_angle
                    * TILT_STEP_SCALE
                    * (5.0 * speed + 1.0);
                self.q = Quat::from_axis_angle(self.tilt_error_axis, delta) * self.q;
                self.tilt_error_angle += delta;
            }
        }
    }

    fn predicted(&self, horizon: f32) -> Quat {
        if !self.prediction {
            return self.q_uncorrected;
        }
        let w = match self.prediction_source {
            PredictionSource::Raw => self.ang_v,
            PredictionSource::Smoothed => self.ang_v_filter.savitzky_golay_smooth8(),
        };
        let speed = w.length();
        if speed <= MIN_PREDICTION_SPEED {
            return self.q_uncorrected;
        }
        let dt = horizon.min(MIN_PREDICTION_DT + PREDICTION_SLOPE * speed);
        self.q_uncorrected * Quat::from_axis_angle(w / speed, speed * dt)
    }
}

/// Thread-safe orientation estimator.
///
/// Share it behind an `Arc`: the polling thread writes through a
/// [`FusionHandler`] while readers call the snapshot accessors.
#[derive(Debug)]
pub struct SensorFusion {
    state: Mutex<FusionState>,
}

impl Default for SensorFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorFusion {
    pub fn new() -> Self {
        Self::from_config(&FusionConfig::default())
    }

    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            state: Mutex::new(FusionState::new(config)),
        }
    }

    /// Feed one sample: accel (m/s^2), gyro (rad/s), mag (gauss), `dt` seconds
    pub fn process_sample(&self, accel: Vec3, gyro: Vec3, mag: Vec3, dt: f32) {
        self.state.lock().step(accel, gyro, mag, dt);
    }

    /// Feed every sample of a decoded packet under a single lock.
    ///
    /// `gap_dt`, when set, first replays the previous readings over that many
    /// seconds to cover samples lost between packets.
    pub fn process_message(&self, msg: &TrackerMessage, gap_dt: Option<f32>) {
        let mut state = self.state.lock();
        if let Some(dt) = gap_dt {
            let (accel, gyro, mag) = (state.accel, state.gyro, state.raw_mag);
            state.step(accel, gyro, mag, dt);
        }
        let mag = msg.mag_si();
        for sample in &msg.samples {
            state.step(sample.accel_si(), sample.gyro_si(), mag, DEFAULT_DT);
        }
    }

    pub fn orientation(&self) -> Quat {
        self.state.lock().q
    }

    /// Orientation before tilt and yaw corrections were applied this step
    pub fn uncorrected_orientation(&self) -> Quat {
        self.state.lock().q_uncorrected
    }

    /// Orientation extrapolated `horizon` seconds ahead
    pub fn predicted_orientation(&self, horizon: f32) -> Quat {
        self.state.lock().predicted(horizon)
    }

    /// Orientation extrapolated by the configured prediction horizon
    pub fn predicted_orientation_default(&self) -> Quat {
        let state = self.state.lock();
        state.predicted(state.prediction_dt)
    }

    pub fn acceleration(&self) -> Vec3 {
        self.state.lock().accel
    }

    /// Angular velocity with the yaw multiplier applied
    pub fn angular_velocity(&self) -> Vec3 {
        self.state.lock().ang_v
    }

    pub fn magnetometer(&self) -> Vec3 {
        self.state.lock().raw_mag
    }

    pub fn calibrated_magnetometer(&self) -> Vec3 {
        let state = self.state.lock();
        state.mag.calibrated_value(state.raw_mag)
    }

    pub fn stage(&self) -> u64 {
        self.state.lock().stage
    }

    pub fn running_time(&self) -> f32 {
        self.state.lock().running_time
    }

    /// Tilt error still waiting to be corrected, radians
    pub fn tilt_error_angle(&self) -> f32 {
        self.state.lock().tilt_error_angle
    }

    /// Reset orientation and timing; calibration and settings are kept
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.q = Quat::IDENTITY;
        state.q_uncorrected = Quat::IDENTITY;
        state.stage = 0;
        state.running_time = 0.0;
        state.tilt_cond_count = 0;
        state.tilt_error_angle = 0.0;
        state.mag.clear_references();
        tracing::debug!("Sensor fusion reset");
    }

    /// Snapshot of the current settings as a config section
    pub fn config(&self) -> FusionConfig {
        let state = self.state.lock();
        FusionConfig {
            motion_tracking: state.motion_tracking,
            gravity_correction: state.gravity_correction,
            yaw_correction: state.yaw_correction,
            prediction: state.prediction,
            accel_gain: state.gain,
            yaw_multiplier: state.yaw_multiplier,
            prediction_horizon: state.prediction_dt,
            prediction_source: state.prediction_source,
            yaw_policy: *state.mag.policy(),
        }
    }

    pub fn is_motion_tracking_enabled(&self) -> bool {
        self.state.lock().motion_tracking
    }

    pub fn set_motion_tracking(&self, enabled: bool) {
        self.state.lock().motion_tracking = enabled;
    }

    pub fn is_gravity_correction_enabled(&self) -> bool {
        self.state.lock().gravity_correction
    }

    pub fn set_gravity_correction(&self, enabled: bool) {
        self.state.lock().gravity_correction = enabled;
    }

    pub fn is_yaw_correction_enabled(&self) -> bool {
        self.state.lock().yaw_correction
    }

    pub fn set_yaw_correction(&self, enabled: bool) {
        self.state.lock().yaw_correction = enabled;
    }

    pub fn is_prediction_enabled(&self) -> bool {
        self.state.lock().prediction
    }

    /// Enable prediction with the given horizon in seconds
    pub fn set_prediction(&self, horizon: f32, enabled: bool) {
        let mut state = self.state.lock();
        state.prediction_dt = horizon;
        state.prediction = enabled;
    }

    pub fn set_prediction_enabled(&self, enabled: bool) {
        self.state.lock().prediction = enabled;
    }

    pub fn prediction_horizon(&self) -> f32 {
        self.state.lock().prediction_dt
    }

    pub fn prediction_source(&self) -> PredictionSource {
        self.state.lock().prediction_source
    }

    pub fn set_prediction_source(&self, source: PredictionSource) {
        self.state.lock().prediction_source = source;
    }

    pub fn accel_gain(&self) -> f32 {
        self.state.lock().gain
    }

    pub fn set_accel_gain(&self, gain: f32) {
        self.state.lock().gain = gain;
    }

    pub fn yaw_multiplier(&self) -> f32 {
        self.state.lock().yaw_multiplier
    }

    pub fn set_yaw_multiplier(&self, multiplier: f32) {
        self.state.lock().yaw_multiplier = multiplier;
    }

    pub fn set_yaw_policy(&self, policy: YawCorrectionPolicy) {
        self.state.lock().mag.set_policy(policy);
    }

    pub fn set_mag_calibration(&self, matrix: Mat4) {
        self.state.lock().mag.set_calibration(matrix);
    }

    pub fn clear_mag_calibration(&self) {
        self.state.lock().mag.clear_calibration();
    }

    pub fn has_mag_calibration(&self) -> bool {
        self.state.lock().mag.is_calibrated()
    }

    pub fn mag_calibration(&self) -> Mat4 {
        self.state.lock().mag.calibration()
    }

    pub fn mag_reference_count(&self) -> usize {
        self.state.lock().mag.references().len()
    }

    pub fn clear_mag_references(&self) {
        self.state.lock().mag.clear_references();
    }

    pub fn has_nearby_mag_reference(&self) -> bool {
        self.state.lock().mag.has_nearby_reference()
    }

    pub fn yaw_error_angle(&self) -> f32 {
        self.state.lock().mag.yaw_error()
    }

    pub fn is_yaw_correction_in_progress(&self) -> bool {
        self.state.lock().mag.is_correction_in_progress()
    }

    /// Restore a calibration from `store`; also restores the yaw correction flag
    pub fn load_mag_calibration(&self, store: &dyn MagCalibrationStore, name: &str) -> bool {
        let Some(stored) = store.load(name) else {
            tracing::debug!(name, "No stored magnetometer calibration");
            return false;
        };
        let mut state = self.state.lock();
        state.mag.set_calibration(stored.matrix);
        state.yaw_correction = stored.yaw_correction_enabled;
        tracing::info!(name, "Loaded magnetometer calibration");
        true
    }

    /// Persist the current calibration; false when there is none to save
    pub fn save_mag_calibration(&self, store: &dyn MagCalibrationStore, name: &str) -> bool {
        let stored = {
            let state = self.state.lock();
            if !state.mag.is_calibrated() {
                return false;
            }
            StoredMagCalibration {
                matrix: state.mag.calibration(),
                yaw_correction_enabled: state.yaw_correction,
            }
        };
        store.save(name, &stored)
    }
}

/// Sink that feeds decoded packets into a shared [`SensorFusion`].
///
/// Tracks the previous timestamp and sample count so gaps in the stream are
/// bridged with one synthetic sample spanning the missed time.
#[derive(Debug, Clone)]
pub struct FusionHandler {
    fusion: Arc<SensorFusion>,
    last: Option<(u16, u8)>,
}

impl FusionHandler {
    pub fn new(fusion: Arc<SensorFusion>) -> Self {
        Self { fusion, last: None }
    }

    pub fn fusion(&self) -> &Arc<SensorFusion> {
        &self.fusion
    }

    /// Seconds of missed samples between the previous packet and `msg`
    fn missed_time(&self, msg: &TrackerMessage) -> Option<f32> {
        let (timestamp, count) = self.last?;
        let delta = timestamp_delta(timestamp, msg.timestamp);
        let count = count as u32;
        if delta > count && delta <= MAX_MISSED_TICKS {
            Some((delta - count) as f32 * DEFAULT_DT)
        } else {
            None
        }
    }
}

impl MessageSink for FusionHandler {
    fn on_message(&mut self, msg: &TrackerMessage) {
        if msg.message_type != MESSAGE_TYPE_SENSORS {
            tracing::trace!(message_type = msg.message_type, "Ignoring non-sensor message");
            return;
        }

        let gap = self.missed_time(msg);
        if let Some(dt) = gap {
            tracing::trace!(timestamp = msg.timestamp, missed_seconds = dt, "Bridging missed samples");
        }
        self.last = Some((msg.timestamp, msg.sample_count));
        self.fusion.process_message(msg, gap);
    }
}
