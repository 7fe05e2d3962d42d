//! Tests for packed and unpacked vector decoding

use hmd_tracker::codec::{
    decode_packed, decode_unpacked, encode_packed, encode_unpacked, PackedVector,
};

const MIN_PACKED: i32 = -(1 << 20);
const MAX_PACKED: i32 = (1 << 20) - 1;

#[test]
fn test_packed_round_trip_within_range() {
    let values = [MIN_PACKED, -98_100, -1, 0, 1, 4_321, 98_100, MAX_PACKED];
    for &x in &values {
        let v = PackedVector::new(x, -x.max(MIN_PACKED + 1), x / 3);
        assert_eq!(decode_packed(&encode_packed(v)), v, "round trip of {:?}", v);
    }
}

#[test]
fn test_sign_extension_at_bit_20() {
    // x = 2^20 occupies the top bit of the first byte
    let bytes = [0x80, 0, 0, 0, 0, 0, 0, 0];
    assert_eq!(decode_packed(&bytes).x, MIN_PACKED);

    // x = 2^20 - 1
    let bytes = [0x7F, 0xFF, 0xF8, 0, 0, 0, 0, 0];
    let v = decode_packed(&bytes);
    assert_eq!(v.x, MAX_PACKED);
    assert_eq!((v.y, v.z), (0, 0));
}

#[test]
fn test_all_ones_decode_to_minus_one() {
    let v = decode_packed(&[0xFF; 8]);
    assert_eq!(v, PackedVector::new(-1, -1, -1));
}

#[test]
fn test_fields_do_not_bleed_into_neighbours() {
    let v = PackedVector::new(0, MAX_PACKED, 0);
    let bytes = encode_packed(v);
    let decoded = decode_packed(&bytes);
    assert_eq!(decoded.x, 0);
    assert_eq!(decoded.z, 0);
    assert_eq!(decoded.y, MAX_PACKED);
}

#[test]
fn test_unpacked_little_endian_i16() {
    let v = decode_unpacked(&[0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80]);
    assert_eq!(v, PackedVector::new(1, -1, -32768));
    assert_eq!(encode_unpacked(v), [0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80]);
}

#[test]
fn test_si_scaling() {
    let si = PackedVector::new(98_100, -10_000, 5).to_si();
    assert!((si.x - 9.81).abs() < 1e-4);
    assert!((si.y + 1.0).abs() < 1e-6);
    assert!((si.z - 0.0005).abs() < 1e-7);
}
