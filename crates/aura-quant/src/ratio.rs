//! Two-byte ratio packing for body and joint scales
//!
//! Ratios below 10 map to the positive i16 range at 10/32767 resolution;
//! larger ratios fall back to the negative range at 1/1000 resolution, so
//! giant avatars still round-trip coarsely instead of saturating.

/// Wire size of a packed ratio
pub const PACKED_RATIO_SIZE: usize = 2;

const SMALL_RATIO_LIMIT: f32 = 10.0;
const LARGE_RATIO_SCALE: f32 = i16::MIN as f32 / 1000.0;

/// Pack a non-negative scale ratio into two bytes
pub fn pack_ratio(ratio: f32) -> [u8; PACKED_RATIO_SIZE] {
    let holder = if ratio < SMALL_RATIO_LIMIT {
        (ratio * i16::MAX as f32 / SMALL_RATIO_LIMIT).floor() as i16
    } else {
        (ratio * LARGE_RATIO_SCALE).max(i16::MIN as f32).floor() as i16
    };
    holder.to_le_bytes()
}

/// Unpack a two-byte ratio
pub fn unpack_ratio(bytes: &[u8; PACKED_RATIO_SIZE]) -> f32 {
    let holder = i16::from_le_bytes(*bytes);
    if holder > 0 {
        holder as f32 / i16::MAX as f32 * SMALL_RATIO_LIMIT
    } else {
        holder as f32 / LARGE_RATIO_SCALE
    }
}
