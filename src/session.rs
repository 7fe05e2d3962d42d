//! Device session and the background polling loop.
//!
//! A [`TrackerSession`] owns the transport. Before [`TrackerSession::start`]
//! it can exchange feature reports directly; once started, the transport moves
//! to a dedicated thread that keeps the sensor streaming with periodic
//! keep-alives and hands every decoded packet to a [`MessageSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use hidapi::HidDevice;

use crate::config::DeviceConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::message::{TrackerMessage, PACKET_SIZE};
use crate::report::{
    read_report, write_report, DisplayInfo, FactoryCalibration, KeepAlive, SensorConfig,
    SensorRange,
};
use crate::transport::{open_device, HidTransport};

/// Receiver of decoded packets, called on the polling thread
pub trait MessageSink: Send + 'static {
    fn on_message(&mut self, msg: &TrackerMessage);
}

impl MessageSink for Sender<TrackerMessage> {
    fn on_message(&mut self, msg: &TrackerMessage) {
        match self.try_send(msg.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(timestamp = msg.timestamp, "Message channel full, dropping packet");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("Message channel disconnected");
            }
        }
    }
}

/// Adapts a closure into a [`MessageSink`]
pub struct FnSink<F>(pub F);

impl<F> MessageSink for FnSink<F>
where
    F: FnMut(&TrackerMessage) + Send + 'static,
{
    fn on_message(&mut self, msg: &TrackerMessage) {
        (self.0)(msg)
    }
}

enum SessionState<T> {
    Idle(T),
    Running {
        shutdown: Arc<AtomicBool>,
        handle: JoinHandle<TrackerResult<T>>,
    },
    Closed,
}

/// An open tracker and, once started, its polling thread
pub struct TrackerSession<T: HidTransport + Send + 'static> {
    config: DeviceConfig,
    state: SessionState<T>,
}

impl TrackerSession<HidDevice> {
    /// Open the device named by `config` through hidapi
    pub fn open(config: &DeviceConfig) -> TrackerResult<Self> {
        let device = open_device(config.vendor_id, config.product_id)?;
        Ok(Self::from_transport(device, config.clone()))
    }
}

impl<T: HidTransport + Send + 'static> TrackerSession<T> {
    pub fn from_transport(transport: T, config: DeviceConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle(transport),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// True while the polling thread has been started and not yet exited
    pub fn is_running(&self) -> bool {
        match &self.state {
            SessionState::Running { handle, .. } => !handle.is_finished(),
            _ => false,
        }
    }

    fn transport(&mut self) -> TrackerResult<&mut T> {
        match &mut self.state {
            SessionState::Idle(transport) => Ok(transport),
            SessionState::Running { .. } => Err(TrackerError::InvalidState(
                "device is owned by the polling thread".into(),
            )),
            SessionState::Closed => Err(TrackerError::InvalidState("session is closed".into())),
        }
    }

    pub fn display_info(&mut self) -> TrackerResult<DisplayInfo> {
        read_report(self.transport()?)
    }

    pub fn factory_calibration(&mut self) -> TrackerResult<FactoryCalibration> {
        read_report(self.transport()?)
    }

    pub fn sensor_range(&mut self) -> TrackerResult<SensorRange> {
        read_report(self.transport()?)
    }

    pub fn set_sensor_range(&mut self, range: &SensorRange) -> TrackerResult<()> {
        write_report(self.transport()?, range)
    }

    pub fn sensor_config(&mut self) -> TrackerResult<SensorConfig> {
        read_report(self.transport()?)
    }

    pub fn set_sensor_config(&mut self, config: &SensorConfig) -> TrackerResult<()> {
        write_report(self.transport()?, config)
    }

    pub fn keep_alive(&mut self) -> TrackerResult<KeepAlive> {
        read_report(self.transport()?)
    }

    pub fn set_keep_alive(&mut self, keep_alive: &KeepAlive) -> TrackerResult<()> {
        write_report(self.transport()?, keep_alive)
    }

    /// Move the transport to a polling thread delivering packets to `sink`
    pub fn start<S: MessageSink>(&mut self, sink: S) -> TrackerResult<()> {
        let transport = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Idle(transport) => transport,
            other => {
                self.state = other;
                return Err(TrackerError::InvalidState(
                    "session can only be started once".into(),
                ));
            }
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_shutdown = Arc::clone(&shutdown);
        let config = self.config.clone();

        let spawned = thread::Builder::new()
            .name("tracker-poll".into())
            .spawn(move || poll_loop(transport, sink, &loop_shutdown, &config));

        match spawned {
            Ok(handle) => {
                tracing::info!("Tracker polling started");
                self.state = SessionState::Running { shutdown, handle };
                Ok(())
            }
            Err(e) => Err(TrackerError::Io(e)),
        }
    }

    /// Stop the polling thread, release the device and return how the loop ended
    pub fn stop(&mut self) -> TrackerResult<()> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Running { shutdown, handle } => {
                shutdown.store(true, Ordering::Release);
                let result = match handle.join() {
                    Ok(result) => result.map(drop),
                    Err(_) => Err(TrackerError::ThreadPanicked),
                };
                tracing::info!(ok = result.is_ok(), "Tracker polling stopped");
                result
            }
            SessionState::Idle(_) | SessionState::Closed => Ok(()),
        }
    }
}

impl<T: HidTransport + Send + 'static> Drop for TrackerSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Polling loop ended with an error");
        }
    }
}

/// Keep the sensor streaming and deliver packets until `shutdown` is set.
///
/// Returns the transport on a clean shutdown; any transport or decode failure
/// ends the loop.
fn poll_loop<T, S>(
    mut transport: T,
    mut sink: S,
    shutdown: &AtomicBool,
    config: &DeviceConfig,
) -> TrackerResult<T>
where
    T: HidTransport,
    S: MessageSink,
{
    let refresh = Duration::from_millis(config.keep_alive_refresh_ms);
    let min_timeout = Duration::from_millis(config.min_read_timeout_ms);
    let keep_alive = KeepAlive::new(config.keep_alive_hold_ms);

    let mut buf = [0u8; PACKET_SIZE];
    let mut next_keep_alive: Option<Instant> = None;

    while !shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        if next_keep_alive.map_or(true, |deadline| now >= deadline) {
            if let Err(e) = write_report(&mut transport, &keep_alive) {
                tracing::error!(error = %e, "Keep-alive write failed");
                return Err(e);
            }
            tracing::debug!(hold_ms = config.keep_alive_hold_ms, "Sent keep-alive");
            next_keep_alive = Some(now + refresh);
        }

        let remaining = next_keep_alive
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        let timeout_ms = i32::try_from(remaining.max(min_timeout).as_millis()).unwrap_or(i32::MAX);

        let read = match transport.read_timeout(&mut buf, timeout_ms) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "Tracker read failed");
                return Err(e);
            }
        };
        if read == 0 {
            continue;
        }

        let msg = match TrackerMessage::decode(&buf[..read]) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, bytes = read, "Malformed tracker packet");
                return Err(e);
            }
        };
        sink.on_message(&msg);
    }

    tracing::debug!("Polling loop observed shutdown");
    Ok(transport)
}
