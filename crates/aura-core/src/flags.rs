//! The additional-flags word carried in every full snapshot
//!
//! A 16-bit field packing key state, hand state and the head animation
//! toggles. The hand state is an octal split across two bit regions for
//! layout compatibility with older peers.

/// Keyboard state advertised to peers (2-bit wire enum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum KeyState {
    #[default]
    NoKeyDown = 0,
    InsertKeyDown = 1,
    DeleteKeyDown = 2,
}

impl KeyState {
    pub fn from_bits(bits: u8) -> KeyState {
        match bits & 0x03 {
            1 => KeyState::InsertKeyDown,
            2 => KeyState::DeleteKeyDown,
            _ => KeyState::NoKeyDown,
        }
    }

    #[inline]
    pub fn to_bits(self) -> u8 {
        self as u8
    }
}

const KEY_STATE_START_BIT: u16 = 0;
const HAND_STATE_START_BIT: u16 = 2;
const HAS_SCRIPTED_BLENDSHAPES: u16 = 4;
const HAS_PROCEDURAL_EYE_MOVEMENT: u16 = 5;
const HAS_REFERENTIAL: u16 = 6;
const HAND_STATE_FINGER_POINTING_BIT: u16 = 7;
const AUDIO_ENABLED_FACE_MOVEMENT: u16 = 8;
const PROCEDURAL_EYE_FACE_MOVEMENT: u16 = 9;
const PROCEDURAL_BLINK_FACE_MOVEMENT: u16 = 10;
const COLLIDE_WITH_OTHER_AVATARS: u16 = 11;
const HAS_HERO_PRIORITY: u16 = 12;

/// Hand state bit 2 lives apart from bits 0-1 (legacy layout)
pub const IS_FINGER_POINTING_FLAG: u8 = 0x04;

/// Decoded additional-flags state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdditionalFlags {
    pub key_state: KeyState,
    /// 3-bit hand state (bit 2 is the finger-pointing flag)
    pub hand_state: u8,
    pub has_scripted_blendshapes: bool,
    pub has_procedural_eye_movement: bool,
    pub has_audio_enabled_face_movement: bool,
    pub has_procedural_eye_face_movement: bool,
    pub has_procedural_blink_face_movement: bool,
    pub collide_with_other_avatars: bool,
    pub has_priority: bool,
}

impl AdditionalFlags {
    /// Pack to the 16-bit wire form. `has_referential` is derived from the
    /// parent id by the encoder, not stored here.
    pub fn to_wire(self, has_referential: bool) -> u16 {
        let mut flags = 0u16;

        flags |= (self.key_state.to_bits() as u16) << KEY_STATE_START_BIT;

        let finger_pointing = self.hand_state & IS_FINGER_POINTING_FLAG != 0;
        flags |= ((self.hand_state & !IS_FINGER_POINTING_FLAG & 0x03) as u16)
            << HAND_STATE_START_BIT;
        if finger_pointing {
            flags |= 1 << HAND_STATE_FINGER_POINTING_BIT;
        }

        if self.has_scripted_blendshapes {
            flags |= 1 << HAS_SCRIPTED_BLENDSHAPES;
        }
        if self.has_procedural_eye_movement {
            flags |= 1 << HAS_PROCEDURAL_EYE_MOVEMENT;
        }
        if has_referential {
            flags |= 1 << HAS_REFERENTIAL;
        }
        if self.has_audio_enabled_face_movement {
            flags |= 1 << AUDIO_ENABLED_FACE_MOVEMENT;
        }
        if self.has_procedural_eye_face_movement {
            flags |= 1 << PROCEDURAL_EYE_FACE_MOVEMENT;
        }
        if self.has_procedural_blink_face_movement {
            flags |= 1 << PROCEDURAL_BLINK_FACE_MOVEMENT;
        }
        if self.collide_with_other_avatars {
            flags |= 1 << COLLIDE_WITH_OTHER_AVATARS;
        }
        if self.has_priority {
            flags |= 1 << HAS_HERO_PRIORITY;
        }

        flags
    }

    /// Unpack from the 16-bit wire form
    pub fn from_wire(flags: u16) -> AdditionalFlags {
        let one_at = |bit: u16| flags & (1 << bit) != 0;

        let mut hand_state = ((flags >> HAND_STATE_START_BIT) & 0x03) as u8;
        if one_at(HAND_STATE_FINGER_POINTING_BIT) {
            hand_state |= IS_FINGER_POINTING_FLAG;
        }

        AdditionalFlags {
            key_state: KeyState::from_bits((flags >> KEY_STATE_START_BIT) as u8),
            hand_state,
            has_scripted_blendshapes: one_at(HAS_SCRIPTED_BLENDSHAPES),
            has_procedural_eye_movement: one_at(HAS_PROCEDURAL_EYE_MOVEMENT),
            has_audio_enabled_face_movement: one_at(AUDIO_ENABLED_FACE_MOVEMENT),
            has_procedural_eye_face_movement: one_at(PROCEDURAL_EYE_FACE_MOVEMENT),
            has_procedural_blink_face_movement: one_at(PROCEDURAL_BLINK_FACE_MOVEMENT),
            collide_with_other_avatars: one_at(COLLIDE_WITH_OTHER_AVATARS),
            has_priority: one_at(HAS_HERO_PRIORITY),
        }
    }

    /// Whether the wire form carried the has-referential bit
    pub fn wire_has_referential(flags: u16) -> bool {
        flags & (1 << HAS_REFERENTIAL) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_roundtrip() {
        let flags = AdditionalFlags {
            key_state: KeyState::DeleteKeyDown,
            hand_state: 0x05, // low bit + finger pointing
            has_scripted_blendshapes: true,
            has_procedural_eye_movement: false,
            has_audio_enabled_face_movement: true,
            has_procedural_eye_face_movement: true,
            has_procedural_blink_face_movement: false,
            collide_with_other_avatars: true,
            has_priority: true,
        };

        let wire = flags.to_wire(false);
        assert_eq!(AdditionalFlags::from_wire(wire), flags);
        assert!(!AdditionalFlags::wire_has_referential(wire));
    }

    #[test]
    fn test_finger_pointing_split() {
        let flags = AdditionalFlags {
            hand_state: IS_FINGER_POINTING_FLAG | 0x02,
            ..Default::default()
        };
        let wire = flags.to_wire(false);

        // bit 7 carries the pointing flag, bits 2-3 the low octal digits
        assert_ne!(wire & (1 << 7), 0);
        assert_eq!((wire >> 2) & 0x03, 0x02);
        assert_eq!(AdditionalFlags::from_wire(wire).hand_state, flags.hand_state);
    }

    #[test]
    fn test_referential_bit() {
        let wire = AdditionalFlags::default().to_wire(true);
        assert!(AdditionalFlags::wire_has_referential(wire));
        assert_eq!(wire & (1 << 6), 1 << 6);
    }

    #[test]
    fn test_reserved_bits_zero() {
        let flags = AdditionalFlags {
            key_state: KeyState::InsertKeyDown,
            hand_state: 0x07,
            has_scripted_blendshapes: true,
            has_procedural_eye_movement: true,
            has_audio_enabled_face_movement: true,
            has_procedural_eye_face_movement: true,
            has_procedural_blink_face_movement: true,
            collide_with_other_avatars: true,
            has_priority: true,
        };
        let wire = flags.to_wire(true);
        assert_eq!(wire & 0xE000, 0);
    }
}
