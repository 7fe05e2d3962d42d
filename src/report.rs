//! Feature report framing and the concrete configuration records.
//!
//! Every record is a fixed-size buffer whose first byte is the feature id,
//! followed by a little-endian payload. The framing (allocate, tag, verify,
//! delegate) lives in [`read_report`] / [`write_report`]; record types only
//! describe their payload.

use serde::{Deserialize, Serialize};

use crate::codec::{self, PackedVector};
use crate::error::{TrackerError, TrackerResult};
use crate::transport::HidTransport;

/// A fixed-size device configuration record
pub trait FeatureReport: Sized {
    /// Leading id byte of the report
    const FEATURE_ID: u8;
    /// Total size in bytes, id byte included
    const SIZE: usize;

    /// Read fields from the payload (the bytes after the id)
    fn parse(&mut self, payload: &[u8]);

    /// Write fields into the payload (the bytes after the id)
    fn pack(&self, payload: &mut [u8]);
}

/// Fetch a report from the device and parse it into a fresh record
pub fn read_report<R, T>(transport: &mut T) -> TrackerResult<R>
where
    R: FeatureReport + Default,
    T: HidTransport + ?Sized,
{
    let mut report = R::default();
    read_report_into(transport, &mut report)?;
    Ok(report)
}

/// Fetch a report and parse it into `report`.
///
/// On a feature id mismatch `report` is left untouched.
pub fn read_report_into<R, T>(transport: &mut T, report: &mut R) -> TrackerResult<()>
where
    R: FeatureReport,
    T: HidTransport + ?Sized,
{
    let mut buf = vec![0u8; R::SIZE];
    buf[0] = R::FEATURE_ID;
    transport.get_feature_report(&mut buf)?;
    parse_frame(&buf, report)
}

/// Validate the id byte of a raw frame and parse its payload into `report`
pub fn parse_frame<R: FeatureReport>(frame: &[u8], report: &mut R) -> TrackerResult<()> {
    if frame.len() < R::SIZE {
        return Err(TrackerError::BufferUnderrun {
            needed: R::SIZE,
            actual: frame.len(),
        });
    }
    if frame[0] != R::FEATURE_ID {
        return Err(TrackerError::ProtocolMismatch {
            expected: R::FEATURE_ID,
            found: frame[0],
        });
    }
    report.parse(&frame[1..R::SIZE]);
    Ok(())
}

/// Serialize a record into its full frame, id byte first
pub fn pack_frame<R: FeatureReport>(report: &R) -> Vec<u8> {
    let mut buf = vec![0u8; R::SIZE];
    buf[0] = R::FEATURE_ID;
    report.pack(&mut buf[1..]);
    buf
}

/// Pack a record and send it to the device
pub fn write_report<R, T>(transport: &mut T, report: &R) -> TrackerResult<()>
where
    R: FeatureReport,
    T: HidTransport + ?Sized,
{
    transport.send_feature_report(&pack_frame(report))
}

/// Little-endian cursor over a report payload
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn packed(&mut self) -> PackedVector {
        codec::decode_packed(&self.take())
    }
}

/// Little-endian cursor for packing a payload
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn i16(&mut self, v: i16) {
        self.put(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.put(&v.to_le_bytes());
    }

    fn packed(&mut self, v: PackedVector) {
        self.put(&codec::encode_packed(v));
    }
}

/// Micrometres to metres, the unit scale used by display geometry fields
const MICRO: f32 = 1.0e-6;

/// Display geometry and distortion coefficients stored on the sensor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub command_id: u16,
    pub distortion_type: u8,
    pub x_resolution: u16,
    pub y_resolution: u16,
    /// Physical screen width in micrometres
    pub x_size: u32,
    /// Physical screen height in micrometres
    pub y_size: u32,
    /// Vertical lens center offset in micrometres
    pub vertical_center: u32,
    /// Lens separation in micrometres
    pub lens_separation: u32,
    /// Lens surface to screen distance per eye, in micrometres
    pub eye_to_screen: [u32; 2],
    pub distortion_coefficients: [f32; 6],
}

impl DisplayInfo {
    pub fn screen_size_m(&self) -> (f32, f32) {
        (self.x_size as f32 * MICRO, self.y_size as f32 * MICRO)
    }

    pub fn vertical_center_m(&self) -> f32 {
        self.vertical_center as f32 * MICRO
    }

    pub fn lens_separation_m(&self) -> f32 {
        self.lens_separation as f32 * MICRO
    }

    pub fn eye_to_screen_m(&self) -> [f32; 2] {
        self.eye_to_screen.map(|d| d as f32 * MICRO)
    }
}

impl FeatureReport for DisplayInfo {
    const FEATURE_ID: u8 = 9;
    const SIZE: usize = 56;

    fn parse(&mut self, payload: &[u8]) {
        let mut r = Reader::new(payload);
        self.command_id = r.u16();
        self.distortion_type = r.u8();
        self.x_resolution = r.u16();
        self.y_resolution = r.u16();
        self.x_size = r.u32();
        self.y_size = r.u32();
        self.vertical_center = r.u32();
        self.lens_separation = r.u32();
        for d in self.eye_to_screen.iter_mut() {
            *d = r.u32();
        }
        for k in self.distortion_coefficients.iter_mut() {
            *k = r.f32();
        }
    }

    fn pack(&self, payload: &mut [u8]) {
        let mut w = Writer::new(payload);
        w.u16(self.command_id);
        w.u8(self.distortion_type);
        w.u16(self.x_resolution);
        w.u16(self.y_resolution);
        w.u32(self.x_size);
        w.u32(self.y_size);
        w.u32(self.vertical_center);
        w.u32(self.lens_separation);
        for &d in &self.eye_to_screen {
            w.u32(d);
        }
        for &k in &self.distortion_coefficients {
            w.f32(k);
        }
    }
}

bitflags::bitflags! {
    /// Flag byte of [`SensorConfig`]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SensorConfigFlags: u8 {
        /// Report raw, uncalibrated samples
        const RAW_MODE = 0x01;
        /// Internal factory test mode
        const CALIBRATION_TEST = 0x02;
        /// Apply the stored factory calibration
        const USE_CALIBRATION = 0x04;
        /// Let the firmware refine calibration on its own
        const AUTO_CALIBRATION = 0x08;
        /// Motion keeps the sensor streaming
        const MOTION_KEEP_ALIVE = 0x10;
        /// Commands keep the sensor streaming
        const COMMAND_KEEP_ALIVE = 0x20;
        /// Report in sensor rather than HMD coordinates
        const SENSOR_COORDINATES = 0x40;
    }
}

/// Streaming configuration of the sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub command_id: u16,
    pub flags: SensorConfigFlags,
    pub packet_interval: u8,
    pub keep_alive_interval_ms: u16,
}

impl SensorConfig {
    /// Toggle a flag using builder pattern
    pub fn with_flag(mut self, flag: SensorConfigFlags, enabled: bool) -> Self {
        self.flags.set(flag, enabled);
        self
    }
}

impl FeatureReport for SensorConfig {
    const FEATURE_ID: u8 = 2;
    const SIZE: usize = 7;

    fn parse(&mut self, payload: &[u8]) {
        let mut r = Reader::new(payload);
        self.command_id = r.u16();
        self.flags = SensorConfigFlags::from_bits_retain(r.u8());
        self.packet_interval = r.u8();
        self.keep_alive_interval_ms = r.u16();
    }

    fn pack(&self, payload: &mut [u8]) {
        let mut w = Writer::new(payload);
        w.u16(self.command_id);
        w.u8(self.flags.bits());
        w.u8(self.packet_interval);
        w.u16(self.keep_alive_interval_ms);
    }
}

/// Standard gravity in m/s^2, used for g-based ranges
pub const STANDARD_GRAVITY: f32 = 9.81;

/// Hardware accelerometer range steps, in g
const ACCEL_RANGE_RAMP: [u16; 4] = [2, 4, 8, 16];
/// Hardware gyro range steps, in degrees per second
const GYRO_RANGE_RAMP: [u16; 4] = [250, 500, 1000, 2000];
/// Hardware magnetometer range steps, in milligauss
const MAG_RANGE_RAMP: [u16; 4] = [880, 1300, 1900, 2500];

/// Physical full-scale limits in SI units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRangeLimits {
    /// Maximum acceleration in m/s^2
    pub max_acceleration: f32,
    /// Maximum angular rate in rad/s
    pub max_rotation_rate: f32,
    /// Maximum magnetic field in gauss
    pub max_magnetic_field: f32,
}

/// Full-scale settings of the sensor chips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRange {
    pub command_id: u16,
    /// Accelerometer range in g
    pub accel_scale: u8,
    /// Gyro range in degrees per second
    pub gyro_scale: u16,
    /// Magnetometer range in milligauss
    pub mag_scale: u16,
}

fn select_ramp_value(ramp: &[u16], value: f32, factor: f32, label: &str) -> u16 {
    let threshold = (value * factor) as u16;
    match ramp.iter().copied().find(|&step| step >= threshold) {
        Some(step) => step,
        None => {
            let max = ramp[ramp.len() - 1];
            tracing::debug!(
                label,
                requested = value,
                clamped = max as f32 / factor,
                "Sensor range clamped to hardware maximum"
            );
            max
        }
    }
}

impl SensorRange {
    /// Pick the smallest hardware range covering `limits` on every axis
    pub fn from_limits(limits: SensorRangeLimits, command_id: u16) -> Self {
        Self {
            command_id,
            accel_scale: select_ramp_value(
                &ACCEL_RANGE_RAMP,
                limits.max_acceleration,
                1.0 / STANDARD_GRAVITY,
                "max_acceleration",
            ) as u8,
            gyro_scale: select_ramp_value(
                &GYRO_RANGE_RAMP,
                limits.max_rotation_rate,
                180.0 / std::f32::consts::PI,
                "max_rotation_rate",
            ),
            mag_scale: select_ramp_value(
                &MAG_RANGE_RAMP,
                limits.max_magnetic_field,
                1000.0,
                "max_magnetic_field",
            ),
        }
    }

    /// The largest range the hardware supports
    pub fn max_limits() -> SensorRangeLimits {
        SensorRange {
            command_id: 0,
            accel_scale: ACCEL_RANGE_RAMP[ACCEL_RANGE_RAMP.len() - 1] as u8,
            gyro_scale: GYRO_RANGE_RAMP[GYRO_RANGE_RAMP.len() - 1],
            mag_scale: MAG_RANGE_RAMP[MAG_RANGE_RAMP.len() - 1],
        }
        .limits()
    }

    /// Convert the configured scales back to SI limits
    pub fn limits(&self) -> SensorRangeLimits {
        SensorRangeLimits {
            max_acceleration: self.accel_scale as f32 * STANDARD_GRAVITY,
            max_rotation_rate: (self.gyro_scale as f32).to_radians(),
            max_magnetic_field: self.mag_scale as f32 * 0.001,
        }
    }
}

impl FeatureReport for SensorRange {
    const FEATURE_ID: u8 = 4;
    const SIZE: usize = 8;

    fn parse(&mut self, payload: &[u8]) {
        let mut r = Reader::new(payload);
        self.command_id = r.u16();
        self.accel_scale = r.u8();
        self.gyro_scale = r.u16();
        self.mag_scale = r.u16();
    }

    fn pack(&self, payload: &mut [u8]) {
        let mut w = Writer::new(payload);
        w.u16(self.command_id);
        w.u8(self.accel_scale);
        w.u16(self.gyro_scale);
        w.u16(self.mag_scale);
    }
}

/// Keeps the sensor streaming for `interval_ms` after it is received
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAlive {
    pub command_id: u16,
    pub interval_ms: u16,
}

impl KeepAlive {
    pub fn new(interval_ms: u16) -> Self {
        Self {
            command_id: 0,
            interval_ms,
        }
    }
}

impl FeatureReport for KeepAlive {
    const FEATURE_ID: u8 = 8;
    const SIZE: usize = 5;

    fn parse(&mut self, payload: &[u8]) {
        let mut r = Reader::new(payload);
        self.command_id = r.u16();
        self.interval_ms = r.u16();
    }

    fn pack(&self, payload: &mut [u8]) {
        let mut w = Writer::new(payload);
        w.u16(self.command_id);
        w.u16(self.interval_ms);
    }
}

/// Full-scale value of a packed 21-bit component, used by the correction matrices
const PACKED_FULL_SCALE: f32 = ((1 << 20) - 1) as f32;

/// Factory calibration burned into the sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactoryCalibration {
    pub command_id: u16,
    /// Accelerometer offset in m/s^2
    pub accel_offset: glam::Vec3,
    /// Gyro offset in rad/s
    pub gyro_offset: glam::Vec3,
    /// Row-major accelerometer correction
    pub accel_matrix: [[f32; 3]; 3],
    /// Row-major gyro correction
    pub gyro_matrix: [[f32; 3]; 3],
    /// Temperature at calibration, in degrees Celsius
    pub temperature: f32,
}

impl Default for FactoryCalibration {
    fn default() -> Self {
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        Self {
            command_id: 0,
            accel_offset: glam::Vec3::ZERO,
            gyro_offset: glam::Vec3::ZERO,
            accel_matrix: identity,
            gyro_matrix: identity,
            temperature: 0.0,
        }
    }
}

fn offset_to_raw(v: glam::Vec3) -> PackedVector {
    PackedVector::new(
        (v.x * 1.0e4).round() as i32,
        (v.y * 1.0e4).round() as i32,
        (v.z * 1.0e4).round() as i32,
    )
}

fn read_matrix(r: &mut Reader<'_>) -> [[f32; 3]; 3] {
    let mut m = [[0.0; 3]; 3];
    for (i, row) in m.iter_mut().enumerate() {
        let v = r.packed();
        *row = [
            v.x as f32 / PACKED_FULL_SCALE,
            v.y as f32 / PACKED_FULL_SCALE,
            v.z as f32 / PACKED_FULL_SCALE,
        ];
        row[i] += 1.0;
    }
    m
}

fn write_matrix(w: &mut Writer<'_>, m: &[[f32; 3]; 3]) {
    for (i, row) in m.iter().enumerate() {
        let mut scaled = [0i32; 3];
        for (j, value) in row.iter().enumerate() {
            let delta = if i == j { value - 1.0 } else { *value };
            scaled[j] = (delta * PACKED_FULL_SCALE).round() as i32;
        }
        w.packed(PackedVector::new(scaled[0], scaled[1], scaled[2]));
    }
}

impl FeatureReport for FactoryCalibration {
    const FEATURE_ID: u8 = 3;
    const SIZE: usize = 69;

    fn parse(&mut self, payload: &[u8]) {
        let mut r = Reader::new(payload);
        self.command_id = r.u16();
        self.accel_offset = r.packed().to_si();
        self.gyro_offset = r.packed().to_si();
        self.accel_matrix = read_matrix(&mut r);
        self.gyro_matrix = read_matrix(&mut r);
        self.temperature = r.i16() as f32 / 100.0;
    }

    fn pack(&self, payload: &mut [u8]) {
        let mut w = Writer::new(payload);
        w.u16(self.command_id);
        w.packed(offset_to_raw(self.accel_offset));
        w.packed(offset_to_raw(self.gyro_offset));
        write_matrix(&mut w, &self.accel_matrix);
        write_matrix(&mut w, &self.gyro_matrix);
        w.i16((self.temperature * 100.0).round() as i16);
    }
}
