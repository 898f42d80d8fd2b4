//! The packed skeleton definition trait
//!
//! Header: max scale dimension (f32), max translation dimension (f32),
//! joint count (u8), string table length (u16), all little-endian. Then one
//! 21-byte record per joint, then the UTF-8 string table holding the joint
//! names back to back in joint order. Translations and scales are stored
//! normalized by the header maxima so the fixed-point radix always covers
//! them.

use aura_core::{AuraError, AuraResult, Quat, Vec3, TRANSLATION_COMPRESSION_RADIX};
use aura_quant::{
    pack_fixed_vec3, pack_quat, pack_ratio, unpack_fixed_vec3, unpack_quat, unpack_ratio,
};

/// Header size on the wire
pub const SKELETON_HEADER_SIZE: usize = 11;

/// Per-joint record size on the wire
pub const SKELETON_JOINT_SIZE: usize = 21;

/// Dimension floor shared with the joint stream's translation scale
const MIN_DIMENSION: f32 = 0.001;

/// Bone categories; roots carry no parent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BoneType {
    SkeletonRoot = 0,
    SkeletonChild = 1,
    NonSkeletonRoot = 2,
    NonSkeletonChild = 3,
}

impl BoneType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BoneType::SkeletonRoot),
            1 => Some(BoneType::SkeletonChild),
            2 => Some(BoneType::NonSkeletonRoot),
            3 => Some(BoneType::NonSkeletonChild),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_root(self) -> bool {
        matches!(self, BoneType::SkeletonRoot | BoneType::NonSkeletonRoot)
    }
}

/// One joint of the skeleton definition
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonJoint {
    pub bone_type: BoneType,
    /// `None` for root bones
    pub parent_index: Option<u8>,
    pub default_translation: Vec3,
    pub default_rotation: Quat,
    pub default_scale: f32,
    pub name: String,
}

/// Pack a skeleton definition into trait bytes
pub fn pack_skeleton_data(joints: &[SkeletonJoint]) -> AuraResult<Vec<u8>> {
    if joints.len() > u8::MAX as usize {
        return Err(AuraError::InvalidWireFormat(format!(
            "skeleton has {} joints, limit is 255",
            joints.len()
        )));
    }

    let mut max_translation_dimension = MIN_DIMENSION;
    let mut max_scale_dimension = MIN_DIMENSION;
    let mut string_table_length = 0usize;
    for joint in joints {
        string_table_length += joint.name.len();
        max_translation_dimension =
            max_translation_dimension.max(joint.default_translation.max_abs_component());
        max_scale_dimension = max_scale_dimension.max(joint.default_scale);
    }
    if string_table_length > u16::MAX as usize {
        return Err(AuraError::InvalidWireFormat(
            "skeleton string table exceeds 64 KiB".into(),
        ));
    }

    let mut buf = Vec::with_capacity(
        SKELETON_HEADER_SIZE + joints.len() * SKELETON_JOINT_SIZE + string_table_length,
    );
    buf.extend_from_slice(&max_scale_dimension.to_le_bytes());
    buf.extend_from_slice(&max_translation_dimension.to_le_bytes());
    buf.push(joints.len() as u8);
    buf.extend_from_slice(&(string_table_length as u16).to_le_bytes());

    let mut string_start = 0usize;
    for (index, joint) in joints.iter().enumerate() {
        buf.push(joint.bone_type.to_byte());
        buf.push(joint.parent_index.unwrap_or(0));
        buf.extend_from_slice(&pack_fixed_vec3(
            joint.default_translation.divided_by(max_translation_dimension),
            TRANSLATION_COMPRESSION_RADIX,
        ));
        buf.extend_from_slice(&pack_quat(joint.default_rotation));
        buf.extend_from_slice(&pack_ratio(joint.default_scale / max_scale_dimension));
        buf.extend_from_slice(&(index as u16).to_le_bytes());
        buf.extend_from_slice(&(string_start as u16).to_le_bytes());
        buf.push(joint.name.len() as u8);
        string_start += joint.name.len();
    }

    for joint in joints {
        buf.extend_from_slice(joint.name.as_bytes());
    }

    Ok(buf)
}

/// Unpack a skeleton definition from trait bytes
pub fn unpack_skeleton_data(data: &[u8]) -> AuraResult<Vec<SkeletonJoint>> {
    if data.len() < SKELETON_HEADER_SIZE {
        return Err(AuraError::BufferTooShort {
            expected: SKELETON_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[0..4]);
    let max_scale_dimension = f32::from_le_bytes(raw);
    raw.copy_from_slice(&data[4..8]);
    let max_translation_dimension = f32::from_le_bytes(raw);
    let num_joints = data[8] as usize;
    let string_table_length = u16::from_le_bytes([data[9], data[10]]) as usize;

    let records_end = SKELETON_HEADER_SIZE + num_joints * SKELETON_JOINT_SIZE;
    let expected = records_end + string_table_length;
    if data.len() < expected {
        return Err(AuraError::BufferTooShort {
            expected,
            actual: data.len(),
        });
    }
    let string_table = &data[records_end..records_end + string_table_length];

    let mut joints = Vec::with_capacity(num_joints);
    for i in 0..num_joints {
        let record = &data[SKELETON_HEADER_SIZE + i * SKELETON_JOINT_SIZE..];

        let bone_type = BoneType::from_byte(record[0]).ok_or_else(|| {
            AuraError::InvalidWireFormat(format!("unknown bone type {}", record[0]))
        })?;
        let parent_index = if bone_type.is_root() {
            None
        } else {
            Some(record[1])
        };

        let mut vec_bytes = [0u8; 6];
        vec_bytes.copy_from_slice(&record[2..8]);
        let default_translation = unpack_fixed_vec3(&vec_bytes, TRANSLATION_COMPRESSION_RADIX)
            .scaled_by(max_translation_dimension);

        let mut quat_bytes = [0u8; 6];
        quat_bytes.copy_from_slice(&record[8..14]);
        let default_rotation = unpack_quat(&quat_bytes);

        let default_scale = unpack_ratio(&[record[14], record[15]]) * max_scale_dimension;

        let string_start = u16::from_le_bytes([record[18], record[19]]) as usize;
        let string_length = record[20] as usize;
        if string_start + string_length > string_table.len() {
            return Err(AuraError::InvalidWireFormat(
                "skeleton joint name exceeds string table".into(),
            ));
        }
        let name = std::str::from_utf8(&string_table[string_start..string_start + string_length])
            .map_err(|_| AuraError::InvalidWireFormat("skeleton joint name is not UTF-8".into()))?
            .to_string();

        joints.push(SkeletonJoint {
            bone_type,
            parent_index,
            default_translation,
            default_rotation,
            default_scale,
            name,
        });
    }

    Ok(joints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_skeleton() -> Vec<SkeletonJoint> {
        vec![
            SkeletonJoint {
                bone_type: BoneType::SkeletonRoot,
                parent_index: None,
                default_translation: Vec3::ZERO,
                default_rotation: Quat::IDENTITY,
                default_scale: 1.0,
                name: "Hips".into(),
            },
            SkeletonJoint {
                bone_type: BoneType::SkeletonChild,
                parent_index: Some(0),
                default_translation: Vec3::new(0.0, 0.45, 0.0),
                default_rotation: Quat::new(0.0, 0.0, 0.382, 0.924),
                default_scale: 1.0,
                name: "Spine".into(),
            },
            SkeletonJoint {
                bone_type: BoneType::NonSkeletonChild,
                parent_index: Some(1),
                default_translation: Vec3::new(-0.2, 0.1, 0.05),
                default_rotation: Quat::IDENTITY,
                default_scale: 0.5,
                name: "Attachment".into(),
            },
        ]
    }

    #[test]
    fn test_wire_size() {
        let joints = sample_skeleton();
        let packed = pack_skeleton_data(&joints).unwrap();
        let names_len: usize = joints.iter().map(|j| j.name.len()).sum();
        assert_eq!(
            packed.len(),
            SKELETON_HEADER_SIZE + joints.len() * SKELETON_JOINT_SIZE + names_len
        );
    }

    #[test]
    fn test_roundtrip() {
        let joints = sample_skeleton();
        let unpacked = unpack_skeleton_data(&pack_skeleton_data(&joints).unwrap()).unwrap();

        assert_eq!(unpacked.len(), joints.len());
        for (original, recovered) in joints.iter().zip(&unpacked) {
            assert_eq!(recovered.bone_type, original.bone_type);
            assert_eq!(recovered.parent_index, original.parent_index);
            assert_eq!(recovered.name, original.name);
            assert!(
                recovered
                    .default_translation
                    .distance(&original.default_translation)
                    < 0.001
            );
            assert!(
                recovered.default_rotation.dot(&original.default_rotation).abs() > 0.9999
            );
            assert!((recovered.default_scale - original.default_scale).abs() < 0.01);
        }
    }

    #[test]
    fn test_root_parent_restored_as_none() {
        let joints = vec![SkeletonJoint {
            bone_type: BoneType::NonSkeletonRoot,
            parent_index: None,
            default_translation: Vec3::ZERO,
            default_rotation: Quat::IDENTITY,
            default_scale: 1.0,
            name: "Free".into(),
        }];
        let unpacked = unpack_skeleton_data(&pack_skeleton_data(&joints).unwrap()).unwrap();
        assert_eq!(unpacked[0].parent_index, None);
    }

    #[test]
    fn test_truncated_rejected() {
        let packed = pack_skeleton_data(&sample_skeleton()).unwrap();
        assert!(unpack_skeleton_data(&packed[..packed.len() - 3]).is_err());
        assert!(unpack_skeleton_data(&packed[..5]).is_err());
    }

    #[test]
    fn test_empty_skeleton() {
        let packed = pack_skeleton_data(&[]).unwrap();
        assert_eq!(packed.len(), SKELETON_HEADER_SIZE);
        assert!(unpack_skeleton_data(&packed).unwrap().is_empty());
    }
}
