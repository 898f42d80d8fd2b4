//! Six-byte quaternion packing
//!
//! The three smallest components are stored as 15-bit unsigned fixed point
//! over the range ±1/√2; the dropped component is recovered from unit
//! length. The quaternion is negated before packing so the dropped
//! component is never positive, which removes its sign bit from the wire.
//! The dropped component's index rides in the spare high bit of the first
//! two 16-bit lanes. Lanes are big-endian.

use aura_core::Quat;

/// Wire size of a packed quaternion
pub const PACKED_QUAT_SIZE: usize = 6;

const COMPONENT_MAGNITUDE: f32 = std::f32::consts::FRAC_1_SQRT_2;
const COMPONENT_RANGE: u32 = (1 << 15) - 1;

/// Pack a rotation into six bytes. The input is normalized first.
pub fn pack_quat(rotation: Quat) -> [u8; PACKED_QUAT_SIZE] {
    let mut q = rotation.normalized().to_array();

    let mut largest = 0usize;
    for i in 1..4 {
        if q[i].abs() > q[largest].abs() {
            largest = i;
        }
    }

    if q[largest] > 0.0 {
        for c in q.iter_mut() {
            *c = -*c;
        }
    }

    let mut lanes = [0u16; 3];
    let mut lane = 0usize;
    for (i, component) in q.iter().enumerate() {
        if i == largest {
            continue;
        }
        // map ±1/√2 to 0..1, then to the 15-bit range
        let unit = (component + COMPONENT_MAGNITUDE) / (2.0 * COMPONENT_MAGNITUDE);
        let quantized = (unit * COMPONENT_RANGE as f32) as i32;
        lanes[lane] = quantized.clamp(0, COMPONENT_RANGE as i32) as u16;
        lane += 1;
    }

    let largest = largest as u16;
    lanes[0] |= (largest & 0x01) << 15;
    lanes[1] |= (largest & 0x02) << 14;

    let mut bytes = [0u8; PACKED_QUAT_SIZE];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[i * 2] = (lane >> 8) as u8;
        bytes[i * 2 + 1] = (lane & 0xFF) as u8;
    }
    bytes
}

/// Unpack a six-byte quaternion
pub fn unpack_quat(bytes: &[u8; PACKED_QUAT_SIZE]) -> Quat {
    let mut lanes = [0u16; 3];
    for (i, lane) in lanes.iter_mut().enumerate() {
        *lane = ((bytes[i * 2] as u16) << 8) | bytes[i * 2 + 1] as u16;
    }

    let largest = (((lanes[1] & 0x8000) >> 14) | ((lanes[0] & 0x8000) >> 15)) as usize;

    let mut components = [0.0f32; 4];
    let mut sum_of_squares = 0.0f32;
    let mut lane = 0usize;
    for (i, component) in components.iter_mut().enumerate() {
        if i == largest {
            continue;
        }
        let unit = (lanes[lane] & 0x7FFF) as f32 / COMPONENT_RANGE as f32;
        *component = unit * (2.0 * COMPONENT_MAGNITUDE) - COMPONENT_MAGNITUDE;
        sum_of_squares += *component * *component;
        lane += 1;
    }

    components[largest] = -(1.0 - sum_of_squares).max(0.0).sqrt();
    Quat::from_array(components)
}
