//! Signed two-byte fixed-point scalars and vectors
//!
//! One unit equals 2^-radix; representable range is ±(2^(15-radix)).
//! Out-of-range values clamp to the range edge. Wire order is little-endian.

use aura_core::{AuraError, AuraResult, Vec3};

/// Wire size of a fixed-point scalar
pub const PACKED_SCALAR_SIZE: usize = 2;

/// Wire size of a fixed-point vector
pub const PACKED_VEC3_SIZE: usize = 6;

/// Largest magnitude representable at the given radix
#[inline]
pub fn fixed_point_limit(radix: u32) -> f32 {
    i16::MAX as f32 / (1u32 << radix) as f32
}

/// Pack a scalar, clamping to the representable range
pub fn pack_fixed_scalar(scalar: f32, radix: u32) -> [u8; PACKED_SCALAR_SIZE] {
    let limit = fixed_point_limit(radix);
    let clamped = scalar.clamp(-limit, limit);
    let fixed = (clamped * (1u32 << radix) as f32) as i16;
    fixed.to_le_bytes()
}

/// Pack a scalar, failing instead of clamping when out of range
pub fn try_pack_fixed_scalar(scalar: f32, radix: u32) -> AuraResult<[u8; PACKED_SCALAR_SIZE]> {
    let limit = fixed_point_limit(radix);
    if !scalar.is_finite() || scalar.abs() > limit {
        return Err(AuraError::QuantizationOutOfRange {
            value: scalar,
            radix,
        });
    }
    Ok(pack_fixed_scalar(scalar, radix))
}

/// Unpack a fixed-point scalar
pub fn unpack_fixed_scalar(bytes: &[u8; PACKED_SCALAR_SIZE], radix: u32) -> f32 {
    let fixed = i16::from_le_bytes(*bytes);
    fixed as f32 / (1u32 << radix) as f32
}

/// Pack a vector component-wise
pub fn pack_fixed_vec3(v: Vec3, radix: u32) -> [u8; PACKED_VEC3_SIZE] {
    let mut bytes = [0u8; PACKED_VEC3_SIZE];
    bytes[0..2].copy_from_slice(&pack_fixed_scalar(v.x, radix));
    bytes[2..4].copy_from_slice(&pack_fixed_scalar(v.y, radix));
    bytes[4..6].copy_from_slice(&pack_fixed_scalar(v.z, radix));
    bytes
}

/// Unpack a fixed-point vector
pub fn unpack_fixed_vec3(bytes: &[u8; PACKED_VEC3_SIZE], radix: u32) -> Vec3 {
    Vec3 {
        x: unpack_fixed_scalar(&[bytes[0], bytes[1]], radix),
        y: unpack_fixed_scalar(&[bytes[2], bytes[3]], radix),
        z: unpack_fixed_scalar(&[bytes[4], bytes[5]], radix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_core::TRANSLATION_COMPRESSION_RADIX;

    #[test]
    fn test_scalar_roundtrip_error() {
        let radix = 10;
        let step = 1.0 / (1u32 << radix) as f32;
        for value in [0.0f32, 0.5, -0.5, 1.25, -31.9, 31.9] {
            let unpacked = unpack_fixed_scalar(&pack_fixed_scalar(value, radix), radix);
            assert!(
                (unpacked - value).abs() < step,
                "{} -> {} exceeds one step",
                value,
                unpacked
            );
        }
    }

    #[test]
    fn test_scalar_clamps() {
        let radix = 12;
        let limit = fixed_point_limit(radix);
        let packed = pack_fixed_scalar(100.0, radix);
        let unpacked = unpack_fixed_scalar(&packed, radix);
        assert!((unpacked - limit).abs() < 0.01);
    }

    #[test]
    fn test_try_pack_rejects_out_of_range() {
        assert!(try_pack_fixed_scalar(100.0, 12).is_err());
        assert!(try_pack_fixed_scalar(f32::NAN, 12).is_err());
        assert!(try_pack_fixed_scalar(1.5, 12).is_ok());
    }

    #[test]
    fn test_vec3_roundtrip() {
        let radix = TRANSLATION_COMPRESSION_RADIX;
        let step = 1.0 / (1u32 << radix) as f32;
        let v = Vec3::new(0.25, -0.125, 0.875);
        let unpacked = unpack_fixed_vec3(&pack_fixed_vec3(v, radix), radix);
        assert!((unpacked.x - v.x).abs() < step);
        assert!((unpacked.y - v.y).abs() < step);
        assert!((unpacked.z - v.z).abs() < step);
    }

    #[test]
    fn test_little_endian_layout() {
        // 1.0 at radix 10 is 0x0400
        let bytes = pack_fixed_scalar(1.0, 10);
        assert_eq!(bytes, [0x00, 0x04]);
    }
}
