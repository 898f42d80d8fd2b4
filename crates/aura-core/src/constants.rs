//! Protocol constants
//!
//! Wire radices and thresholds must match peers bit-for-bit; change history
//! thresholds only shape what gets resent.

/// Fixed-point radix for joint translations (after scale normalization)
pub const TRANSLATION_COMPRESSION_RADIX: u32 = 14;

/// Fixed-point radix for hand controller positions
pub const HAND_CONTROLLER_COMPRESSION_RADIX: u32 = 12;

/// Fixed-point radix for the sensor-to-world scale factor
pub const SENSOR_TO_WORLD_SCALE_RADIX: u32 = 10;

/// Loudness is divided by this before gain packing and re-multiplied on decode
pub const AUDIO_LOUDNESS_SCALE: f32 = 1024.0;

/// Cap on attached entity instances per avatar
pub const MAX_NUM_AVATAR_ENTITIES: usize = 42;

/// Cap on concurrent grab instances per avatar
pub const MAX_NUM_AVATAR_GRABS: usize = 6;

/// Fraction of sends forced to full updates to ride out packet loss
pub const AVATAR_SEND_FULL_UPDATE_RATIO: f32 = 0.02;

/// Outbound snapshot cadence
pub const CLIENT_TO_AVATAR_MIXER_BROADCAST_FRAMES_PER_SECOND: u32 = 50;

/// Smallest packet budget `encode` accepts: session id + flag word
pub const MIN_BULK_PACKET_SIZE: usize = 16 + 2;

// Viewer distance steps for the rotation-change threshold, in meters.
pub const AVATAR_DISTANCE_LEVEL_1: f32 = 12.5;
pub const AVATAR_DISTANCE_LEVEL_2: f32 = 16.6;
pub const AVATAR_DISTANCE_LEVEL_3: f32 = 25.0;
pub const AVATAR_DISTANCE_LEVEL_4: f32 = 50.0;
pub const AVATAR_DISTANCE_LEVEL_5: f32 = 200.0;

// Quaternion-dot thresholds; a rotation counts as changed when the absolute
// dot with the last sent value drops below the threshold. The dot of two
// unit quaternions is the cosine of half the angle between them.
pub const AVATAR_MIN_ROTATION_DOT: f32 = 0.999_999_9;
pub const ROTATION_CHANGE_2D: f32 = 0.999_847_70;
pub const ROTATION_CHANGE_4D: f32 = 0.999_390_83;
pub const ROTATION_CHANGE_6D: f32 = 0.998_629_53;
pub const ROTATION_CHANGE_15D: f32 = 0.991_444_90;
pub const ROTATION_CHANGE_179D: f32 = -0.999_847_7;

/// Joint translation change threshold in meters (not yet distance-stepped)
pub const AVATAR_MIN_TRANSLATION: f32 = 0.0001;

// Sentinel joint indices for vantages that are not skeleton joints.
pub const SENSOR_TO_WORLD_MATRIX_INDEX: i32 = 65534;
pub const CONTROLLER_RIGHTHAND_INDEX: i32 = 65533;
pub const CONTROLLER_LEFTHAND_INDEX: i32 = 65532;
pub const CAMERA_RELATIVE_CONTROLLER_RIGHTHAND_INDEX: i32 = 65531;
pub const CAMERA_RELATIVE_CONTROLLER_LEFTHAND_INDEX: i32 = 65530;
pub const CAMERA_MATRIX_INDEX: i32 = 65529;
pub const FARGRAB_RIGHTHAND_INDEX: i32 = 65528;
pub const FARGRAB_LEFTHAND_INDEX: i32 = 65527;
pub const FARGRAB_MOUSE_INDEX: i32 = 65526;

/// Resolve a sentinel joint name to its index, `None` for unknown names
pub fn faux_joint_index(name: &str) -> Option<i32> {
    if !name.starts_with('_') {
        return None;
    }
    match name {
        "_SENSOR_TO_WORLD_MATRIX" => Some(SENSOR_TO_WORLD_MATRIX_INDEX),
        "_CONTROLLER_LEFTHAND" => Some(CONTROLLER_LEFTHAND_INDEX),
        "_CONTROLLER_RIGHTHAND" => Some(CONTROLLER_RIGHTHAND_INDEX),
        "_CAMERA_RELATIVE_CONTROLLER_LEFTHAND" => Some(CAMERA_RELATIVE_CONTROLLER_LEFTHAND_INDEX),
        "_CAMERA_RELATIVE_CONTROLLER_RIGHTHAND" => {
            Some(CAMERA_RELATIVE_CONTROLLER_RIGHTHAND_INDEX)
        }
        "_CAMERA_MATRIX" => Some(CAMERA_MATRIX_INDEX),
        "_FARGRAB_RIGHTHAND" => Some(FARGRAB_RIGHTHAND_INDEX),
        "_FARGRAB_LEFTHAND" => Some(FARGRAB_LEFTHAND_INDEX),
        "_FARGRAB_MOUSE" => Some(FARGRAB_MOUSE_INDEX),
        _ => None,
    }
}
