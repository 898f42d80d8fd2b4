//! Grab payloads and the grab lifecycle helpers

use aura_core::{
    AuraError, AuraResult, Quat, SessionUuid, TraitInstanceId, Vec3,
    CAMERA_RELATIVE_CONTROLLER_LEFTHAND_INDEX, CAMERA_RELATIVE_CONTROLLER_RIGHTHAND_INDEX,
    CONTROLLER_LEFTHAND_INDEX, CONTROLLER_RIGHTHAND_INDEX, FARGRAB_LEFTHAND_INDEX,
    FARGRAB_RIGHTHAND_INDEX,
};

/// Wire size of an encoded grab
pub const GRAB_DATA_SIZE: usize = 65;

/// Which hand (if any) holds the grab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum GrabHand {
    #[default]
    None = 0,
    Left = 1,
    Right = 2,
}

impl GrabHand {
    pub fn from_byte(b: u8) -> GrabHand {
        match b {
            1 => GrabHand::Left,
            2 => GrabHand::Right,
            _ => GrabHand::None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Classify a grab's hand from its parent joint index
pub fn hand_for_joint_index(parent_joint_index: i32) -> GrabHand {
    match parent_joint_index {
        CONTROLLER_RIGHTHAND_INDEX
        | CAMERA_RELATIVE_CONTROLLER_RIGHTHAND_INDEX
        | FARGRAB_RIGHTHAND_INDEX => GrabHand::Right,
        CONTROLLER_LEFTHAND_INDEX
        | CAMERA_RELATIVE_CONTROLLER_LEFTHAND_INDEX
        | FARGRAB_LEFTHAND_INDEX => GrabHand::Left,
        _ => GrabHand::None,
    }
}

/// One grab: who holds what, from which joint, at which offset
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GrabData {
    pub owner: SessionUuid,
    pub target: TraitInstanceId,
    pub parent_joint_index: i32,
    pub hand: GrabHand,
    pub positional_offset: Vec3,
    pub rotational_offset: Quat,
}

impl GrabData {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(GRAB_DATA_SIZE);
        buf.extend_from_slice(&self.owner.to_bytes());
        buf.extend_from_slice(&self.target.to_bytes());
        buf.extend_from_slice(&self.parent_joint_index.to_le_bytes());
        buf.push(self.hand.to_byte());
        buf.extend_from_slice(&self.positional_offset.x.to_le_bytes());
        buf.extend_from_slice(&self.positional_offset.y.to_le_bytes());
        buf.extend_from_slice(&self.positional_offset.z.to_le_bytes());
        buf.extend_from_slice(&self.rotational_offset.w.to_le_bytes());
        buf.extend_from_slice(&self.rotational_offset.x.to_le_bytes());
        buf.extend_from_slice(&self.rotational_offset.y.to_le_bytes());
        buf.extend_from_slice(&self.rotational_offset.z.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> AuraResult<Self> {
        if data.len() < GRAB_DATA_SIZE {
            return Err(AuraError::BufferTooShort {
                expected: GRAB_DATA_SIZE,
                actual: data.len(),
            });
        }

        let mut owner = [0u8; 16];
        owner.copy_from_slice(&data[0..16]);
        let mut target = [0u8; 16];
        target.copy_from_slice(&data[16..32]);

        let read_f32 = |pos: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&data[pos..pos + 4]);
            f32::from_le_bytes(raw)
        };

        Ok(GrabData {
            owner: SessionUuid::from_bytes(owner),
            target: TraitInstanceId::from_bytes(target),
            parent_joint_index: i32::from_le_bytes([data[32], data[33], data[34], data[35]]),
            hand: GrabHand::from_byte(data[36]),
            positional_offset: Vec3 {
                x: read_f32(37),
                y: read_f32(41),
                z: read_f32(45),
            },
            rotational_offset: Quat {
                w: read_f32(49),
                x: read_f32(53),
                y: read_f32(57),
                z: read_f32(61),
            },
        })
    }
}

/// A fresh random instance id with the RFC 4122 v4 marker bits
pub fn random_instance_id() -> TraitInstanceId {
    let mut bytes: [u8; 16] = rand::random();
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    TraitInstanceId::new(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grab_roundtrip() {
        let grab = GrabData {
            owner: SessionUuid::new([1u8; 16]),
            target: TraitInstanceId::new([2u8; 16]),
            parent_joint_index: FARGRAB_RIGHTHAND_INDEX,
            hand: GrabHand::Right,
            positional_offset: Vec3::new(0.1, -0.2, 0.3),
            rotational_offset: Quat::IDENTITY,
        };
        let bytes = grab.to_bytes();
        assert_eq!(bytes.len(), GRAB_DATA_SIZE);
        assert_eq!(GrabData::from_bytes(&bytes).unwrap(), grab);
    }

    #[test]
    fn test_hand_classification() {
        assert_eq!(
            hand_for_joint_index(CONTROLLER_RIGHTHAND_INDEX),
            GrabHand::Right
        );
        assert_eq!(
            hand_for_joint_index(FARGRAB_LEFTHAND_INDEX),
            GrabHand::Left
        );
        assert_eq!(hand_for_joint_index(12), GrabHand::None);
    }

    #[test]
    fn test_random_ids_unique_and_versioned() {
        let a = random_instance_id();
        let b = random_instance_id();
        assert_ne!(a, b);
        assert_eq!(a.to_bytes()[6] >> 4, 4);
        assert_eq!(a.to_bytes()[8] >> 6, 0b10);
    }

    #[test]
    fn test_short_grab_rejected() {
        assert!(GrabData::from_bytes(&[0u8; 10]).is_err());
    }
}
