use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::EulerRot;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use hmd_tracker::{FusionHandler, SensorFusion, TrackerConfig, TrackerSession};

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

fn log_report<R: Serialize>(name: &str, report: &R) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => tracing::info!("{name}:\n{json}"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize {name}"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let duration = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<f64>().context("duration must be a number of seconds"))
        .transpose()?
        .map(Duration::from_secs_f64);

    let config = TrackerConfig::load_or_default().context("Failed to load configuration")?;
    tracing::info!(
        vendor = format!("{:04x}", config.device.vendor_id),
        product = format!("{:04x}", config.device.product_id),
        "Starting head tracker"
    );

    let mut session = TrackerSession::open(&config.device).context("Failed to open tracker")?;

    match session.display_info() {
        Ok(info) => log_report("DisplayInfo", &info),
        Err(e) => tracing::warn!(error = %e, "DisplayInfo unavailable"),
    }
    log_report("SensorRange", &session.sensor_range().context("Failed to read sensor range")?);
    log_report("SensorConfig", &session.sensor_config().context("Failed to read sensor config")?);

    let fusion = Arc::new(SensorFusion::from_config(&config.fusion));
    session
        .start(FusionHandler::new(Arc::clone(&fusion)))
        .context("Failed to start polling")?;

    let started = Instant::now();
    while session.is_running() && duration.map_or(true, |d| started.elapsed() < d) {
        std::thread::sleep(REPORT_INTERVAL);
        let (yaw, pitch, roll) = fusion
            .predicted_orientation_default()
            .to_euler(EulerRot::YXZ);
        tracing::info!(
            yaw = yaw.to_degrees(),
            pitch = pitch.to_degrees(),
            roll = roll.to_degrees(),
            tilt_error = fusion.tilt_error_angle(),
            "Orientation"
        );
    }

    session.stop().context("Polling loop failed")?;
    Ok(())
}
