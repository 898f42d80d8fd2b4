//! The snapshot section mask
//!
//! A 16-bit word leading every snapshot; bit order is also the on-wire
//! section order, except that GRAB_JOINTS rides inside the JOINT_DATA
//! region.

/// Section mask word (2 bytes, little-endian)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketFlags(pub u16);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);

    // Section bits, in wire order
    pub const GLOBAL_POSITION: u16 = 1 << 0;
    pub const BOUNDING_BOX: u16 = 1 << 1;
    pub const ORIENTATION: u16 = 1 << 2;
    pub const SCALE: u16 = 1 << 3;
    pub const LOOK_AT_POSITION: u16 = 1 << 4;
    pub const AUDIO_LOUDNESS: u16 = 1 << 5;
    pub const SENSOR_TO_WORLD_MATRIX: u16 = 1 << 6;
    pub const ADDITIONAL_FLAGS: u16 = 1 << 7;
    pub const PARENT_INFO: u16 = 1 << 8;
    pub const LOCAL_POSITION: u16 = 1 << 9;
    pub const HAND_CONTROLLERS: u16 = 1 << 10;
    pub const FACE_TRACKER_INFO: u16 = 1 << 11;
    pub const JOINT_DATA: u16 = 1 << 12;
    pub const JOINT_DEFAULT_POSE_FLAGS: u16 = 1 << 13;
    pub const GRAB_JOINTS: u16 = 1 << 14;

    #[inline]
    pub fn new(bits: u16) -> Self {
        PacketFlags(bits)
    }

    #[inline]
    pub fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn contains(self, mask: u16) -> bool {
        self.0 & mask == mask
    }

    #[inline]
    pub fn insert(&mut self, mask: u16) {
        self.0 |= mask;
    }

    #[inline]
    pub fn remove(&mut self, mask: u16) {
        self.0 &= !mask;
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bits in `self` but not in `other`
    #[inline]
    pub fn difference(self, other: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 & !other.0)
    }

    /// Union of both masks
    #[inline]
    pub fn union(self, other: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | other.0)
    }

    #[inline]
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        PacketFlags(u16::from_le_bytes(bytes))
    }
}

impl From<u16> for PacketFlags {
    fn from(bits: u16) -> Self {
        PacketFlags(bits)
    }
}
