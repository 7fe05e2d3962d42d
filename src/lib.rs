//! Head tracker library
//!
//! HID protocol for a head-mounted inertial tracker (packed sensor samples,
//! feature reports, the 62-byte input report), a background polling session,
//! and sensor fusion that turns the sample stream into an orientation.

pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod fusion;
pub mod magnetometer;
pub mod message;
pub mod report;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use codec::PackedVector;
pub use config::{DeviceConfig, FusionConfig, TrackerConfig};
pub use error::{TrackerError, TrackerResult};
pub use filter::SensorFilter;
pub use fusion::{FusionHandler, PredictionSource, SensorFusion};
pub use magnetometer::{
    MagCalibration, MagCalibrationStore, NoopCalibrationStore, StoredMagCalibration,
    YawCorrectionPolicy,
};
pub use message::{TrackerMessage, TrackerSample};
pub use report::{
    DisplayInfo, FactoryCalibration, FeatureReport, KeepAlive, SensorConfig, SensorConfigFlags,
    SensorRange, SensorRangeLimits,
};
pub use session::{FnSink, MessageSink, TrackerSession};
pub use transport::{open_device, HidTransport};
