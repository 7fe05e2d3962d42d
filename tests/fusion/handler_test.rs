//! Tests for feeding decoded packets into fusion, including missed samples

use std::sync::Arc;

use hmd_tracker::codec::PackedVector;
use hmd_tracker::{FusionHandler, MessageSink, SensorFusion, TrackerMessage};

use crate::test_utils::{approx_eq, resting_packet, sensor_packet};

fn deliver(handler: &mut FusionHandler, packet: [u8; 62]) {
    let msg = TrackerMessage::decode(&packet).expect("decode");
    handler.on_message(&msg);
}

#[test]
fn test_every_carried_sample_is_fed() {
    let fusion = Arc::new(SensorFusion::new());
    let mut handler = FusionHandler::new(Arc::clone(&fusion));

    deliver(&mut handler, resting_packet(10, 3));
    assert_eq!(fusion.stage(), 3);
    assert!(approx_eq(fusion.running_time(), 0.003, 1e-6));
}

#[test]
fn test_contiguous_packets_add_no_synthetic_sample() {
    let fusion = Arc::new(SensorFusion::new());
    let mut handler = FusionHandler::new(Arc::clone(&fusion));

    deliver(&mut handler, resting_packet(100, 2));
    deliver(&mut handler, resting_packet(102, 2));
    assert_eq!(fusion.stage(), 4);
}

#[test]
fn test_gap_is_bridged_with_one_synthetic_sample() {
    let fusion = Arc::new(SensorFusion::new());
    let mut handler = FusionHandler::new(Arc::clone(&fusion));

    deliver(&mut handler, resting_packet(100, 1));
    deliver(&mut handler, resting_packet(105, 1));

    // 1 real + 1 synthetic spanning (5 - 1) ms + 1 real
    assert_eq!(fusion.stage(), 3);
    assert!(approx_eq(fusion.running_time(), 0.006, 1e-6));
}

#[test]
fn test_gap_across_timestamp_wrap() {
    let fusion = Arc::new(SensorFusion::new());
    let mut handler = FusionHandler::new(Arc::clone(&fusion));

    deliver(&mut handler, resting_packet(65_535, 1));
    deliver(&mut handler, resting_packet(2, 1));

    // delta = 3 ticks, previous count 1 -> 2 ms synthetic
    assert_eq!(fusion.stage(), 3);
    assert!(approx_eq(fusion.running_time(), 0.004, 1e-6));
}

#[test]
fn test_large_gap_is_not_bridged() {
    let fusion = Arc::new(SensorFusion::new());
    let mut handler = FusionHandler::new(Arc::clone(&fusion));

    deliver(&mut handler, resting_packet(1_000, 1));
    deliver(&mut handler, resting_packet(1_300, 1));
    assert_eq!(fusion.stage(), 2);
}

#[test]
fn test_synthetic_sample_repeats_last_rotation() {
    let fusion = Arc::new(SensorFusion::new());
    fusion.set_gravity_correction(false);
    let mut handler = FusionHandler::new(Arc::clone(&fusion));

    // 1 rad/s about Y in raw units
    let spin = (PackedVector::default(), PackedVector::new(0, 10_000, 0));
    deliver(&mut handler, sensor_packet(0, 1, &[spin], PackedVector::default()));
    deliver(&mut handler, sensor_packet(11, 1, &[spin], PackedVector::default()));

    // 1 ms + 10 ms synthetic + 1 ms of rotation
    let (yaw, _, _) = fusion.orientation().to_euler(glam::EulerRot::YXZ);
    assert!(approx_eq(yaw, 0.012, 1e-5));
}

#[test]
fn test_non_sensor_messages_are_ignored() {
    let fusion = Arc::new(SensorFusion::new());
    let mut handler = FusionHandler::new(Arc::clone(&fusion));

    let mut packet = resting_packet(10, 3);
    packet[0] = 7;
    deliver(&mut handler, packet);
    assert_eq!(fusion.stage(), 0);
}

#[test]
fn test_magnetometer_snapshot_in_gauss() {
    let fusion = Arc::new(SensorFusion::new());
    let mut handler = FusionHandler::new(Arc::clone(&fusion));

    deliver(&mut handler, resting_packet(10, 1));
    let mag = fusion.magnetometer();
    assert!(approx_eq(mag.x, 0.2, 1e-6));
    assert!(approx_eq(mag.z, 0.3, 1e-6));
    assert!(approx_eq(fusion.acceleration().y, 9.81, 1e-4));
}
