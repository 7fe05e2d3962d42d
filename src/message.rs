//! Decoding of the 62-byte tracker input report.
//!
//! Layout, little-endian:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 1 | message type |
//! | 1 | 1 | sample count |
//! | 2 | 2 | timestamp (1 ms ticks, wraps) |
//! | 4 | 2 | last command id |
//! | 6 | 2 | temperature |
//! | 8 + 16·i | 8 + 8 | sample `i` accel, gyro (packed) |
//! | 56 | 6 | magnetometer (3 x i16) |

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::codec::{self, PackedVector, PACKED_LEN, UNPACKED_LEN};
use crate::error::{TrackerError, TrackerResult};

/// Size of one raw tracker packet
pub const PACKET_SIZE: usize = 62;
/// Most samples a single packet can carry
pub const MAX_SAMPLES: usize = 3;

/// Message type byte of a sensor report
pub const MESSAGE_TYPE_SENSORS: u8 = 1;

const SAMPLES_OFFSET: usize = 8;
const SAMPLE_STRIDE: usize = 2 * PACKED_LEN;
const MAG_OFFSET: usize = 56;

/// One accelerometer/gyro pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSample {
    pub accel: PackedVector,
    pub gyro: PackedVector,
}

impl TrackerSample {
    /// Acceleration in m/s^2
    #[inline]
    pub fn accel_si(&self) -> Vec3 {
        self.accel.to_si()
    }

    /// Angular velocity in rad/s
    #[inline]
    pub fn gyro_si(&self) -> Vec3 {
        self.gyro.to_si()
    }
}

/// A decoded tracker packet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerMessage {
    pub message_type: u8,
    /// Samples the device reports, which may exceed what the packet carries
    pub sample_count: u8,
    pub timestamp: u16,
    pub last_command_id: u16,
    pub temperature: i16,
    pub samples: Vec<TrackerSample>,
    pub mag: PackedVector,
}

impl TrackerMessage {
    /// Decode one raw packet.
    ///
    /// Only `min(sample_count, 3)` samples are decoded; the rest are counted
    /// by [`TrackerMessage::dropped_samples`].
    pub fn decode(buf: &[u8]) -> TrackerResult<Self> {
        if buf.len() < PACKET_SIZE {
            return Err(TrackerError::BufferUnderrun {
                needed: PACKET_SIZE,
                actual: buf.len(),
            });
        }

        let sample_count = buf[1];
        let carried = (sample_count as usize).min(MAX_SAMPLES);

        let samples = (0..carried)
            .map(|i| {
                let base = SAMPLES_OFFSET + SAMPLE_STRIDE * i;
                TrackerSample {
                    accel: codec::decode_packed(&fixed(buf, base)),
                    gyro: codec::decode_packed(&fixed(buf, base + PACKED_LEN)),
                }
            })
            .collect();

        let msg = Self {
            message_type: buf[0],
            sample_count,
            timestamp: u16::from_le_bytes(fixed(buf, 2)),
            last_command_id: u16::from_le_bytes(fixed(buf, 4)),
            temperature: i16::from_le_bytes(fixed(buf, 6)),
            samples,
            mag: codec::decode_unpacked(&fixed::<UNPACKED_LEN>(buf, MAG_OFFSET)),
        };

        if msg.dropped_samples() > 0 {
            tracing::trace!(
                sample_count,
                dropped = msg.dropped_samples(),
                "Packet reported more samples than it carries"
            );
        }

        Ok(msg)
    }

    /// Samples reported by the device but not carried in this packet
    #[inline]
    pub fn dropped_samples(&self) -> usize {
        (self.sample_count as usize).saturating_sub(self.samples.len())
    }

    /// Magnetic field in gauss
    #[inline]
    pub fn mag_si(&self) -> Vec3 {
        self.mag.to_si()
    }

    /// Encode back into the raw packet layout
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = self.message_type;
        buf[1] = self.sample_count;
        buf[2..4].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[4..6].copy_from_slice(&self.last_command_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.temperature.to_le_bytes());
        for (i, sample) in self.samples.iter().take(MAX_SAMPLES).enumerate() {
            let base = SAMPLES_OFFSET + SAMPLE_STRIDE * i;
            buf[base..base + PACKED_LEN].copy_from_slice(&codec::encode_packed(sample.accel));
            buf[base + PACKED_LEN..base + SAMPLE_STRIDE]
                .copy_from_slice(&codec::encode_packed(sample.gyro));
        }
        buf[MAG_OFFSET..PACKET_SIZE].copy_from_slice(&codec::encode_unpacked(self.mag));
        buf
    }
}

/// Copy `N` bytes at `offset`; the caller has already checked the length
#[inline]
fn fixed<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

/// Ticks elapsed between two 16-bit timestamps, accounting for one wraparound
#[inline]
pub fn timestamp_delta(previous: u16, current: u16) -> u32 {
    if current < previous {
        current as u32 + 0x10000 - previous as u32
    } else {
        (current - previous) as u32
    }
}
