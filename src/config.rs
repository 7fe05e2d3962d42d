//! Tracker configuration
//!
//! Loaded from TOML. Every field has a default, so a partial file (or none at
//! all) is valid:
//!
//! ```toml
//! [device]
//! vendor_id = 0x2833
//! keep_alive_refresh_ms = 2000
//!
//! [fusion]
//! yaw_correction = true
//! prediction_source = "smoothed"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::fusion::PredictionSource;
use crate::magnetometer::YawCorrectionPolicy;
use crate::transport::{SENSOR_PRODUCT_ID, SENSOR_VENDOR_ID};

const APP_DIR: &str = "hmd-tracker";
const CONFIG_FILE: &str = "config.toml";

/// Complete tracker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub device: DeviceConfig,
    pub fusion: FusionConfig,
}

/// Which device to open and how the polling loop keeps it streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Interval written in each keep-alive report
    pub keep_alive_hold_ms: u16,
    /// How often keep-alives are re-sent; must be shorter than the hold
    pub keep_alive_refresh_ms: u64,
    /// Lower bound on the blocking read timeout
    pub min_read_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: SENSOR_VENDOR_ID,
            product_id: SENSOR_PRODUCT_ID,
            keep_alive_hold_ms: 10_000,
            keep_alive_refresh_ms: 3_000,
            min_read_timeout_ms: 100,
        }
    }
}

/// Sensor fusion flags and gains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub motion_tracking: bool,
    pub gravity_correction: bool,
    pub yaw_correction: bool,
    pub prediction: bool,
    /// Tilt correction gain
    pub accel_gain: f32,
    /// Scale applied to the reported yaw rate
    pub yaw_multiplier: f32,
    /// Default prediction horizon in seconds
    pub prediction_horizon: f32,
    pub prediction_source: PredictionSource,
    pub yaw_policy: YawCorrectionPolicy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            motion_tracking: true,
            gravity_correction: true,
            yaw_correction: false,
            prediction: true,
            accel_gain: 0.05,
            yaw_multiplier: 1.0,
            prediction_horizon: 0.03,
            prediction_source: PredictionSource::Raw,
            yaw_policy: YawCorrectionPolicy::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> TrackerResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded tracker configuration");
        Ok(config)
    }

    /// `<config dir>/hmd-tracker/config.toml`, when the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from [`TrackerConfig::default_path`], or defaults when no file exists
    pub fn load_or_default() -> TrackerResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                tracing::debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn to_toml_string(&self) -> TrackerResult<String> {
        toml::to_string_pretty(self).map_err(|e| TrackerError::Config(e.to_string()))
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let device = &self.device;
        if device.keep_alive_refresh_ms == 0 {
            return Err(TrackerError::Config(
                "keep_alive_refresh_ms must be positive".into(),
            ));
        }
        if device.keep_alive_refresh_ms >= u64::from(device.keep_alive_hold_ms) {
            return Err(TrackerError::Config(format!(
                "keep_alive_refresh_ms ({}) must be shorter than keep_alive_hold_ms ({})",
                device.keep_alive_refresh_ms, device.keep_alive_hold_ms
            )));
        }

        let fusion = &self.fusion;
        if fusion.accel_gain.is_nan() || fusion.accel_gain <= 0.0 {
            return Err(TrackerError::Config(format!(
                "accel_gain must be positive, got {}",
                fusion.accel_gain
            )));
        }
        if fusion.prediction_horizon.is_nan() || fusion.prediction_horizon <= 0.0 {
            return Err(TrackerError::Config(format!(
                "prediction_horizon must be positive, got {}",
                fusion.prediction_horizon
            )));
        }
        if !fusion.yaw_multiplier.is_finite() {
            return Err(TrackerError::Config("yaw_multiplier must be finite".into()));
        }
        Ok(())
    }
}
