//! Joint records shared by the frame codec and the send policy

use crate::{Quat, Vec3};

/// One skeletal joint's volatile pose
///
/// Joints sitting at the skeleton's default pose are flagged instead of
/// carrying a value, so the codec can encode them as a single bit. A
/// default-constructed joint is at the default pose; that makes fresh
/// last-sent cache entries always count as changed on first send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointData {
    pub rotation: Quat,
    pub translation: Vec3,
    pub rotation_is_default: bool,
    pub translation_is_default: bool,
}

impl Default for JointData {
    fn default() -> Self {
        Self::default_pose()
    }
}

impl JointData {
    pub fn new(rotation: Quat, translation: Vec3) -> Self {
        JointData {
            rotation,
            translation,
            rotation_is_default: false,
            translation_is_default: false,
        }
    }

    /// A joint resting at the skeleton default
    pub fn default_pose() -> Self {
        JointData {
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
            rotation_is_default: true,
            translation_is_default: true,
        }
    }
}
