//! Tests for the polling session against a scripted transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError};
use hmd_tracker::report::pack_frame;
use hmd_tracker::{
    DeviceConfig, DisplayInfo, FeatureReport, FnSink, FusionHandler, KeepAlive, SensorConfig,
    SensorFusion, SensorRange, TrackerError, TrackerMessage, TrackerSession,
};

use crate::test_utils::{resting_packet, wait_until, MockTransport, ReadStep};

const WAIT: Duration = Duration::from_secs(2);

fn fast_config() -> DeviceConfig {
    DeviceConfig {
        keep_alive_hold_ms: 1_000,
        keep_alive_refresh_ms: 150,
        min_read_timeout_ms: 100,
        ..DeviceConfig::default()
    }
}

#[test]
fn test_first_iteration_sends_keep_alive() {
    let mock = MockTransport::new();
    mock.push_packet(resting_packet(1, 1));
    let (tx, rx) = unbounded::<TrackerMessage>();

    let mut session = TrackerSession::from_transport(mock.clone(), DeviceConfig::default());
    session.start(tx).expect("start");

    let msg = rx.recv_timeout(WAIT).expect("message");
    assert_eq!(msg.timestamp, 1);
    session.stop().expect("clean stop");

    let sent = mock.sent();
    assert_eq!(sent[0], pack_frame(&KeepAlive::new(10_000)));
}

#[test]
fn test_messages_arrive_in_order() {
    let mock = MockTransport::new();
    for ts in [10u16, 11, 12] {
        mock.push_packet(resting_packet(ts, 1));
    }
    let (tx, rx) = unbounded::<TrackerMessage>();

    let mut session = TrackerSession::from_transport(mock.clone(), DeviceConfig::default());
    session.start(tx).expect("start");

    let timestamps: Vec<u16> = (0..3)
        .map(|_| rx.recv_timeout(WAIT).expect("message").timestamp)
        .collect();
    assert_eq!(timestamps, vec![10, 11, 12]);
    session.stop().expect("clean stop");
}

#[test]
fn test_timeouts_are_skipped() {
    let mock = MockTransport::new();
    mock.push_read(ReadStep::Timeout);
    mock.push_read(ReadStep::Timeout);
    mock.push_packet(resting_packet(42, 1));
    let (tx, rx) = unbounded::<TrackerMessage>();

    let mut session = TrackerSession::from_transport(mock.clone(), DeviceConfig::default());
    session.start(tx).expect("start");

    assert_eq!(rx.recv_timeout(WAIT).expect("message").timestamp, 42);
    session.stop().expect("clean stop");
}

#[test]
fn test_keep_alive_is_refreshed() {
    let mock = MockTransport::new();
    let count = Arc::new(AtomicUsize::new(0));
    let sink_count = Arc::clone(&count);

    let mut session = TrackerSession::from_transport(mock.clone(), fast_config());
    session
        .start(FnSink(move |_msg: &TrackerMessage| {
            sink_count.fetch_add(1, Ordering::Relaxed);
        }))
        .expect("start");

    assert!(wait_until(WAIT, || mock.sent().len() >= 3));
    session.stop().expect("clean stop");

    let keep_alive = pack_frame(&KeepAlive::new(1_000));
    assert!(mock.sent().iter().all(|frame| *frame == keep_alive));
    assert_eq!(count.load(Ordering::Relaxed), 0);
}

#[test]
fn test_read_timeout_is_floored_and_bounded_by_refresh() {
    let mock = MockTransport::new();
    let mut session = TrackerSession::from_transport(mock.clone(), fast_config());
    session.start(FnSink(|_: &TrackerMessage| {})).expect("start");

    assert!(wait_until(WAIT, || mock.read_timeouts().len() >= 10));
    session.stop().expect("clean stop");

    for timeout in mock.read_timeouts() {
        assert!((100..=150).contains(&timeout), "timeout {} ms", timeout);
    }
}

#[test]
fn test_transport_failure_ends_loop_and_is_returned() {
    let mock = MockTransport::new();
    mock.push_packet(resting_packet(1, 1));
    mock.push_read(ReadStep::Fail("unplugged".into()));
    mock.push_packet(resting_packet(2, 1));
    let (tx, rx) = unbounded::<TrackerMessage>();

    let mut session = TrackerSession::from_transport(mock.clone(), DeviceConfig::default());
    session.start(tx).expect("start");

    assert!(wait_until(WAIT, || !session.is_running()));
    assert_eq!(rx.recv_timeout(WAIT).expect("first message").timestamp, 1);
    assert!(matches!(session.stop(), Err(TrackerError::DeviceIo(_))));
    // No retry: the packet after the failure is never read
    assert_eq!(mock.pending_reads(), 1);
}

#[test]
fn test_short_packet_is_surfaced() {
    let mock = MockTransport::new();
    mock.push_read(ReadStep::Packet(vec![1, 1, 0, 0]));

    let mut session = TrackerSession::from_transport(mock, DeviceConfig::default());
    session.start(FnSink(|_: &TrackerMessage| {})).expect("start");

    assert!(wait_until(WAIT, || !session.is_running()));
    assert!(matches!(
        session.stop(),
        Err(TrackerError::BufferUnderrun { needed: 62, actual: 4 })
    ));
}

#[test]
fn test_reports_before_start() {
    let mock = MockTransport::new();
    let info = DisplayInfo {
        x_resolution: 1280,
        y_resolution: 800,
        ..DisplayInfo::default()
    };
    mock.set_feature_report(DisplayInfo::FEATURE_ID, pack_frame(&info));
    mock.set_feature_report(
        SensorRange::FEATURE_ID,
        pack_frame(&SensorRange {
            command_id: 0,
            accel_scale: 4,
            gyro_scale: 1000,
            mag_scale: 1300,
        }),
    );

    let mut session = TrackerSession::from_transport(mock.clone(), DeviceConfig::default());
    assert_eq!(session.display_info().expect("display info"), info);
    assert_eq!(session.sensor_range().expect("range").gyro_scale, 1000);

    let config = SensorConfig {
        packet_interval: 2,
        ..SensorConfig::default()
    };
    session.set_sensor_config(&config).expect("write config");
    assert_eq!(mock.sent(), vec![pack_frame(&config)]);
}

#[test]
fn test_reports_unavailable_while_running() {
    let mock = MockTransport::new();
    let mut session = TrackerSession::from_transport(mock, DeviceConfig::default());
    session.start(FnSink(|_: &TrackerMessage| {})).expect("start");

    assert!(matches!(session.display_info(), Err(TrackerError::InvalidState(_))));
    assert!(matches!(
        session.start(FnSink(|_: &TrackerMessage| {})),
        Err(TrackerError::InvalidState(_))
    ));
    assert!(session.is_running());
    session.stop().expect("clean stop");
    assert!(!session.is_running());

    assert!(matches!(session.keep_alive(), Err(TrackerError::InvalidState(_))));
}

#[test]
fn test_stop_without_start_is_ok() {
    let mut session = TrackerSession::from_transport(MockTransport::new(), DeviceConfig::default());
    assert!(session.stop().is_ok());
}

#[test]
fn test_drop_stops_polling_thread() {
    let mock = MockTransport::new();
    let (tx, rx) = unbounded::<TrackerMessage>();
    {
        let mut session = TrackerSession::from_transport(mock, fast_config());
        session.start(tx).expect("start");
    }
    // The sender lives on the polling thread; it is gone once the thread exits
    assert_eq!(rx.recv_timeout(WAIT), Err(RecvTimeoutError::Disconnected));
}

#[test]
fn test_session_drives_fusion() {
    let mock = MockTransport::new();
    mock.push_packet(resting_packet(100, 3));
    mock.push_packet(resting_packet(103, 3));
    mock.push_packet(resting_packet(106, 3));

    let fusion = Arc::new(SensorFusion::new());
    let mut session = TrackerSession::from_transport(mock, DeviceConfig::default());
    session
        .start(FusionHandler::new(Arc::clone(&fusion)))
        .expect("start");

    assert!(wait_until(WAIT, || fusion.stage() == 9));
    session.stop().expect("clean stop");
    assert!((fusion.acceleration().y - 9.81).abs() < 1e-4);
}
