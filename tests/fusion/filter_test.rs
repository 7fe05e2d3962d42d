//! Tests for the fixed-capacity sensor filter

use glam::Vec3;
use hmd_tracker::SensorFilter;

#[test]
fn test_capacity_three_keeps_newest() {
    let mut filter = SensorFilter::new(3);
    let inputs = [
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(2.0, 0.0, 0.0),
        Vec3::new(3.0, 0.0, 0.0),
        Vec3::new(4.0, 0.0, 0.0),
    ];
    for v in inputs {
        filter.insert(v);
    }

    assert_eq!(filter.len(), 3);
    assert_eq!(filter.capacity(), 3);
    assert_eq!(filter.mean(), Vec3::new(3.0, 0.0, 0.0));
    assert_eq!(filter.lookback(0), inputs[3]);
    assert_eq!(filter.lookback(2), inputs[1]);
    assert_eq!(filter.lookback(3), Vec3::ZERO);
}

#[test]
fn test_empty_filter_reports_zero() {
    let filter = SensorFilter::new(10);
    assert!(filter.is_empty());
    assert_eq!(filter.mean(), Vec3::ZERO);
    assert_eq!(filter.sum(), Vec3::ZERO);
    assert_eq!(filter.lookback(0), Vec3::ZERO);
}

#[test]
fn test_partial_fill_mean_uses_valid_entries_only() {
    let mut filter = SensorFilter::new(20);
    filter.insert(Vec3::new(0.0, 2.0, 0.0));
    filter.insert(Vec3::new(0.0, 4.0, 0.0));
    assert_eq!(filter.mean(), Vec3::new(0.0, 3.0, 0.0));
    assert_eq!(filter.sum(), Vec3::new(0.0, 6.0, 0.0));
}

#[test]
fn test_clear_resets_length() {
    let mut filter = SensorFilter::new(4);
    filter.insert(Vec3::ONE);
    filter.clear();
    assert!(filter.is_empty());
    assert_eq!(filter.lookback(0), Vec3::ZERO);
}

#[test]
fn test_zero_capacity_is_raised_to_one() {
    let mut filter = SensorFilter::new(0);
    filter.insert(Vec3::X);
    filter.insert(Vec3::Y);
    assert_eq!(filter.capacity(), 1);
    assert_eq!(filter.mean(), Vec3::Y);
}

#[test]
fn test_smoothing_follows_a_ramp_with_lag() {
    let mut filter = SensorFilter::new(20);
    for i in 0..20 {
        filter.insert(Vec3::splat(i as f32));
    }
    let smoothed = filter.savitzky_golay_smooth8();
    // Weighted toward the newest entries, never beyond them
    assert!(smoothed.x > 15.0 && smoothed.x <= 19.0, "smoothed = {}", smoothed.x);
}
