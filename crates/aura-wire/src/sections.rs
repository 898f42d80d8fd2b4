//! Fixed-layout snapshot sections
//!
//! Each struct mirrors one optional block of the snapshot. Multi-byte
//! fields are always read and written field-by-field, little-endian.

use aura_core::{
    AuraError, AuraResult, Quat, SessionUuid, Vec3, HAND_CONTROLLER_COMPRESSION_RADIX,
    SENSOR_TO_WORLD_SCALE_RADIX,
};
use aura_quant::{
    pack_fixed_scalar, pack_fixed_vec3, pack_quat, pack_ratio, unpack_fixed_scalar,
    unpack_fixed_vec3, unpack_quat, unpack_ratio, PACKED_QUAT_SIZE, PACKED_SCALAR_SIZE,
    PACKED_VEC3_SIZE,
};

pub const GLOBAL_POSITION_SIZE: usize = 12;
pub const BOUNDING_BOX_SIZE: usize = 24;
pub const ORIENTATION_SIZE: usize = PACKED_QUAT_SIZE;
pub const SCALE_SIZE: usize = 2;
pub const LOOK_AT_POSITION_SIZE: usize = 12;
pub const AUDIO_LOUDNESS_SIZE: usize = 1;
pub const SENSOR_TO_WORLD_SIZE: usize = 20;
pub const ADDITIONAL_FLAGS_SIZE: usize = 2;
pub const PARENT_INFO_SIZE: usize = 18;
pub const LOCAL_POSITION_SIZE: usize = 12;
pub const HAND_CONTROLLERS_SIZE: usize = 24;
/// Face tracker header before the coefficient array
pub const FACE_TRACKER_HEADER_SIZE: usize = 17;
pub const FAR_GRAB_JOINTS_SIZE: usize = 84;

pub(crate) fn write_f32(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_vec3(buf: &mut Vec<u8>, v: Vec3) {
    write_f32(buf, v.x);
    write_f32(buf, v.y);
    write_f32(buf, v.z);
}

pub(crate) fn read_f32(bytes: &[u8], pos: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[pos..pos + 4]);
    f32::from_le_bytes(raw)
}

pub(crate) fn read_vec3(bytes: &[u8], pos: usize) -> Vec3 {
    Vec3 {
        x: read_f32(bytes, pos),
        y: read_f32(bytes, pos + 4),
        z: read_f32(bytes, pos + 8),
    }
}

/// Avatar bounding box: dimensions plus origin offset
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub dimensions: Vec3,
    pub origin_offset: Vec3,
}

impl BoundingBox {
    pub fn write(&self, buf: &mut Vec<u8>) {
        write_vec3(buf, self.dimensions);
        write_vec3(buf, self.origin_offset);
    }

    pub fn parse(bytes: &[u8]) -> AuraResult<Self> {
        if bytes.len() < BOUNDING_BOX_SIZE {
            return Err(AuraError::BufferTooShort {
                expected: BOUNDING_BOX_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(BoundingBox {
            dimensions: read_vec3(bytes, 0),
            origin_offset: read_vec3(bytes, 12),
        })
    }
}

/// The sensor-to-world affine: translation, rotation, uniform scale
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorToWorld {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl SensorToWorld {
    pub fn write(&self, buf: &mut Vec<u8>) {
        write_vec3(buf, self.translation);
        buf.extend_from_slice(&pack_quat(self.rotation));
        buf.extend_from_slice(&pack_fixed_scalar(self.scale, SENSOR_TO_WORLD_SCALE_RADIX));
    }

    pub fn parse(bytes: &[u8]) -> AuraResult<Self> {
        if bytes.len() < SENSOR_TO_WORLD_SIZE {
            return Err(AuraError::BufferTooShort {
                expected: SENSOR_TO_WORLD_SIZE,
                actual: bytes.len(),
            });
        }
        let mut quat_bytes = [0u8; PACKED_QUAT_SIZE];
        quat_bytes.copy_from_slice(&bytes[12..18]);
        let mut scale_bytes = [0u8; PACKED_SCALAR_SIZE];
        scale_bytes.copy_from_slice(&bytes[18..20]);
        Ok(SensorToWorld {
            translation: read_vec3(bytes, 0),
            rotation: unpack_quat(&quat_bytes),
            scale: unpack_fixed_scalar(&scale_bytes, SENSOR_TO_WORLD_SCALE_RADIX),
        })
    }
}

/// Parent reference for seated or attached avatars
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentInfo {
    pub parent_uuid: SessionUuid,
    pub parent_joint_index: u16,
}

impl ParentInfo {
    pub fn has_parent(&self) -> bool {
        !self.parent_uuid.is_nil()
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.parent_uuid.to_bytes());
        buf.extend_from_slice(&self.parent_joint_index.to_le_bytes());
    }

    pub fn parse(bytes: &[u8]) -> AuraResult<Self> {
        if bytes.len() < PARENT_INFO_SIZE {
            return Err(AuraError::BufferTooShort {
                expected: PARENT_INFO_SIZE,
                actual: bytes.len(),
            });
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[0..16]);
        Ok(ParentInfo {
            parent_uuid: SessionUuid::from_bytes(uuid),
            parent_joint_index: u16::from_le_bytes([bytes[16], bytes[17]]),
        })
    }
}

/// One hand controller vantage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandVantage {
    pub orientation: Quat,
    pub position: Vec3,
}

impl HandVantage {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&pack_quat(self.orientation));
        buf.extend_from_slice(&pack_fixed_vec3(
            self.position,
            HAND_CONTROLLER_COMPRESSION_RADIX,
        ));
    }

    fn parse(bytes: &[u8]) -> Self {
        let mut quat_bytes = [0u8; PACKED_QUAT_SIZE];
        quat_bytes.copy_from_slice(&bytes[0..6]);
        let mut vec_bytes = [0u8; PACKED_VEC3_SIZE];
        vec_bytes.copy_from_slice(&bytes[6..12]);
        HandVantage {
            orientation: unpack_quat(&quat_bytes),
            position: unpack_fixed_vec3(&vec_bytes, HAND_CONTROLLER_COMPRESSION_RADIX),
        }
    }
}

/// Both hand controller vantages
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandControllers {
    pub left: HandVantage,
    pub right: HandVantage,
}

impl HandControllers {
    pub fn write(&self, buf: &mut Vec<u8>) {
        self.left.write(buf);
        self.right.write(buf);
    }

    pub fn parse(bytes: &[u8]) -> AuraResult<Self> {
        if bytes.len() < HAND_CONTROLLERS_SIZE {
            return Err(AuraError::BufferTooShort {
                expected: HAND_CONTROLLERS_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(HandControllers {
            left: HandVantage::parse(&bytes[0..12]),
            right: HandVantage::parse(&bytes[12..24]),
        })
    }
}

/// Face tracker header plus blendshape coefficients
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceTrackerInfo {
    pub left_eye_blink: f32,
    pub right_eye_blink: f32,
    pub average_loudness: f32,
    pub brow_audio_lift: f32,
    pub blendshape_coefficients: Vec<f32>,
}

impl FaceTrackerInfo {
    /// Total wire size for this coefficient count
    pub fn wire_size(&self) -> usize {
        FACE_TRACKER_HEADER_SIZE + self.blendshape_coefficients.len() * 4
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        debug_assert!(self.blendshape_coefficients.len() <= u8::MAX as usize);
        write_f32(buf, self.left_eye_blink);
        write_f32(buf, self.right_eye_blink);
        write_f32(buf, self.average_loudness);
        write_f32(buf, self.brow_audio_lift);
        buf.push(self.blendshape_coefficients.len() as u8);
        for coefficient in &self.blendshape_coefficients {
            write_f32(buf, *coefficient);
        }
    }

    /// Parse the fixed header; the caller checks space for the coefficients
    /// after reading the count.
    pub fn parse_header(bytes: &[u8]) -> AuraResult<(Self, usize)> {
        if bytes.len() < FACE_TRACKER_HEADER_SIZE {
            return Err(AuraError::BufferTooShort {
                expected: FACE_TRACKER_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let info = FaceTrackerInfo {
            left_eye_blink: read_f32(bytes, 0),
            right_eye_blink: read_f32(bytes, 4),
            average_loudness: read_f32(bytes, 8),
            brow_audio_lift: read_f32(bytes, 12),
            blendshape_coefficients: Vec::new(),
        };
        let count = bytes[16] as usize;
        Ok((info, count))
    }
}

/// Far-grab vantages for both hands and the mouse ray
///
/// Unquantized: grab targets range past the ±2 m fixed-point envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FarGrabJoints {
    pub left_position: Vec3,
    pub left_rotation: Quat,
    pub right_position: Vec3,
    pub right_rotation: Quat,
    pub mouse_position: Vec3,
    pub mouse_rotation: Quat,
}

impl FarGrabJoints {
    fn write_pose(buf: &mut Vec<u8>, position: Vec3, rotation: Quat) {
        write_vec3(buf, position);
        write_f32(buf, rotation.w);
        write_f32(buf, rotation.x);
        write_f32(buf, rotation.y);
        write_f32(buf, rotation.z);
    }

    fn read_pose(bytes: &[u8], pos: usize) -> (Vec3, Quat) {
        let position = read_vec3(bytes, pos);
        let rotation = Quat {
            w: read_f32(bytes, pos + 12),
            x: read_f32(bytes, pos + 16),
            y: read_f32(bytes, pos + 20),
            z: read_f32(bytes, pos + 24),
        };
        (position, rotation)
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        Self::write_pose(buf, self.left_position, self.left_rotation);
        Self::write_pose(buf, self.right_position, self.right_rotation);
        Self::write_pose(buf, self.mouse_position, self.mouse_rotation);
    }

    pub fn parse(bytes: &[u8]) -> AuraResult<Self> {
        if bytes.len() < FAR_GRAB_JOINTS_SIZE {
            return Err(AuraError::BufferTooShort {
                expected: FAR_GRAB_JOINTS_SIZE,
                actual: bytes.len(),
            });
        }
        let (left_position, left_rotation) = Self::read_pose(bytes, 0);
        let (right_position, right_rotation) = Self::read_pose(bytes, 28);
        let (mouse_position, mouse_rotation) = Self::read_pose(bytes, 56);
        Ok(FarGrabJoints {
            left_position,
            left_rotation,
            right_position,
            right_rotation,
            mouse_position,
            mouse_rotation,
        })
    }
}

/// Body scale as a two-byte ratio
pub fn write_scale(buf: &mut Vec<u8>, scale: f32) {
    buf.extend_from_slice(&pack_ratio(scale));
}

pub fn parse_scale(bytes: &[u8]) -> AuraResult<f32> {
    if bytes.len() < SCALE_SIZE {
        return Err(AuraError::BufferTooShort {
            expected: SCALE_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(unpack_ratio(&[bytes[0], bytes[1]]))
}
