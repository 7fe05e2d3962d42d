//! Wire-level integer vector formats used inside tracker messages.
//!
//! Sensor samples travel as three 21-bit two's-complement integers packed
//! most-significant-first into an 8-byte block (one spare bit at the end).
//! Magnetometer readings travel as three plain little-endian `i16` values.

use serde::{Deserialize, Serialize};

/// Width of one packed axis
const PACKED_BITS: u32 = 21;
/// Sign bit of a packed axis (2^20)
const PACKED_SIGN: i32 = 1 << (PACKED_BITS - 1);
const PACKED_MASK: u32 = (1 << PACKED_BITS) - 1;

/// Size of a packed vector block in bytes
pub const PACKED_LEN: usize = 8;
/// Size of an unpacked (3 x i16) vector in bytes
pub const UNPACKED_LEN: usize = 6;

/// Three signed integer components as reported by the sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackedVector {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl PackedVector {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Scale the raw integers into SI units (the sensor reports 10^-4 units)
    #[inline]
    pub fn to_si(self) -> glam::Vec3 {
        glam::Vec3::new(self.x as f32, self.y as f32, self.z as f32) * 1.0e-4
    }
}

#[inline]
fn sign_extend_21(raw: u32) -> i32 {
    let v = (raw & PACKED_MASK) as i32;
    if v & PACKED_SIGN != 0 {
        v - (1 << PACKED_BITS)
    } else {
        v
    }
}

/// Decode three 21-bit signed fields from an 8-byte packed block
pub fn decode_packed(bytes: &[u8; PACKED_LEN]) -> PackedVector {
    let b = bytes.map(u32::from);
    let x = (b[0] << 13) | (b[1] << 5) | ((b[2] & 0xF8) >> 3);
    let y = ((b[2] & 0x07) << 18) | (b[3] << 10) | (b[4] << 2) | ((b[5] & 0xC0) >> 6);
    let z = ((b[5] & 0x3F) << 15) | (b[6] << 7) | (b[7] >> 1);
    PackedVector {
        x: sign_extend_21(x),
        y: sign_extend_21(y),
        z: sign_extend_21(z),
    }
}

/// Pack three integers into the 21-bit block layout.
///
/// Components outside ±2^20 are truncated to their low 21 bits.
pub fn encode_packed(v: PackedVector) -> [u8; PACKED_LEN] {
    let x = v.x as u32 & PACKED_MASK;
    let y = v.y as u32 & PACKED_MASK;
    let z = v.z as u32 & PACKED_MASK;
    [
        (x >> 13) as u8,
        (x >> 5) as u8,
        ((x << 3) | ((y >> 18) & 0x07)) as u8,
        (y >> 10) as u8,
        (y >> 2) as u8,
        ((y << 6) | ((z >> 15) & 0x3F)) as u8,
        (z >> 7) as u8,
        (z << 1) as u8,
    ]
}

/// Decode three consecutive little-endian `i16` values
pub fn decode_unpacked(bytes: &[u8; UNPACKED_LEN]) -> PackedVector {
    PackedVector {
        x: i16::from_le_bytes([bytes[0], bytes[1]]) as i32,
        y: i16::from_le_bytes([bytes[2], bytes[3]]) as i32,
        z: i16::from_le_bytes([bytes[4], bytes[5]]) as i32,
    }
}

/// Encode three components as little-endian `i16` (truncating to 16 bits)
pub fn encode_unpacked(v: PackedVector) -> [u8; UNPACKED_LEN] {
    let mut out = [0u8; UNPACKED_LEN];
    out[0..2].copy_from_slice(&(v.x as i16).to_le_bytes());
    out[2..4].copy_from_slice(&(v.y as i16).to_le_bytes());
    out[4..6].copy_from_slice(&(v.z as i16).to_le_bytes());
    out
}
