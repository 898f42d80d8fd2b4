//! Change-filtered send policy
//!
//! Picks the starting section mask for one snapshot from the detail level
//! and the change history, supplies the distance-stepped joint thresholds,
//! and commits sent values back into the last-sent cache.

use aura_core::{
    AvatarDataDetail, JointData, Vec3, AVATAR_DISTANCE_LEVEL_1, AVATAR_DISTANCE_LEVEL_2,
    AVATAR_DISTANCE_LEVEL_3, AVATAR_DISTANCE_LEVEL_4, AVATAR_DISTANCE_LEVEL_5,
    AVATAR_MIN_ROTATION_DOT, AVATAR_MIN_TRANSLATION, ROTATION_CHANGE_15D, ROTATION_CHANGE_179D,
    ROTATION_CHANGE_2D, ROTATION_CHANGE_4D, ROTATION_CHANGE_6D,
};

use crate::codec::SendStatus;
use crate::flags::PacketFlags;
use crate::interface::{AvatarSource, ChangeReport};

/// Compute the starting section mask for a fresh encode
///
/// Global position is always wanted. `PalMinimum` adds only loudness; the
/// richer levels include each section when it changed (or unconditionally
/// for `SendAllData`). Joint sections are tied to the detail level, not the
/// change history - the per-joint culling happens inside the joint stream.
pub fn initial_flags(detail: AvatarDataDetail, report: &ChangeReport) -> PacketFlags {
    if detail == AvatarDataDetail::NoData {
        return PacketFlags::NONE;
    }

    let mut wanted = PacketFlags::new(PacketFlags::GLOBAL_POSITION);

    if detail == AvatarDataDetail::PalMinimum {
        wanted.insert(PacketFlags::AUDIO_LOUDNESS);
        return wanted;
    }

    let send_all = detail.sends_all();

    if send_all || report.bounding_box_changed {
        wanted.insert(PacketFlags::BOUNDING_BOX);
    }
    if send_all || report.orientation_changed {
        wanted.insert(PacketFlags::ORIENTATION);
    }
    if send_all || report.scale_changed {
        wanted.insert(PacketFlags::SCALE);
    }
    if send_all || report.look_at_changed {
        wanted.insert(PacketFlags::LOOK_AT_POSITION);
    }
    if send_all || report.audio_loudness_changed {
        wanted.insert(PacketFlags::AUDIO_LOUDNESS);
    }
    if send_all || report.sensor_to_world_changed {
        wanted.insert(PacketFlags::SENSOR_TO_WORLD_MATRIX);
    }
    if send_all || report.additional_flags_changed {
        wanted.insert(PacketFlags::ADDITIONAL_FLAGS);
    }
    if report.has_parent && (send_all || report.parent_info_changed) {
        wanted.insert(PacketFlags::PARENT_INFO);
    }
    if report.has_parent
        && (send_all || report.translation_changed || report.parent_info_changed)
    {
        wanted.insert(PacketFlags::LOCAL_POSITION);
    }
    if report.hand_controllers_valid {
        wanted.insert(PacketFlags::HAND_CONTROLLERS);
    }
    if !report.drop_face_tracking
        && report.has_blendshapes
        && (send_all || report.face_tracker_changed)
    {
        wanted.insert(PacketFlags::FACE_TRACKER_INFO);
    }

    let has_joint_data = detail != AvatarDataDetail::MinimumData;
    if has_joint_data {
        wanted.insert(PacketFlags::JOINT_DATA);
        wanted.insert(PacketFlags::JOINT_DEFAULT_POSE_FLAGS);
        if report.any_far_grab_valid() {
            wanted.insert(PacketFlags::GRAB_JOINTS);
        }
    }

    wanted
}

/// Rotation-change threshold stepped by viewer distance
///
/// Returns the quaternion-dot floor below which a joint rotation counts as
/// changed. Far viewers get a threshold no rotation can cross, so distant
/// avatars coast on the periodic full updates.
pub fn distance_based_min_rotation_dot(viewer_position: Vec3, global_position: Vec3) -> f32 {
    let distance = global_position.distance(&viewer_position);
    if distance < AVATAR_DISTANCE_LEVEL_1 {
        AVATAR_MIN_ROTATION_DOT
    } else if distance < AVATAR_DISTANCE_LEVEL_2 {
        ROTATION_CHANGE_2D
    } else if distance < AVATAR_DISTANCE_LEVEL_3 {
        ROTATION_CHANGE_4D
    } else if distance < AVATAR_DISTANCE_LEVEL_4 {
        ROTATION_CHANGE_6D
    } else if distance < AVATAR_DISTANCE_LEVEL_5 {
        ROTATION_CHANGE_15D
    } else {
        ROTATION_CHANGE_179D
    }
}

/// Translation-change threshold in meters
///
/// Not yet distance-stepped; the viewer position parameter is the hook for
/// making it so.
pub fn distance_based_min_translation(_viewer_position: Vec3) -> f32 {
    AVATAR_MIN_TRANSLATION
}

/// Fold the values actually sent back into the last-sent cache
///
/// Only joints below the send cursors are considered; values that would not
/// have passed the change threshold are left alone so small drift keeps
/// accumulating against the old baseline, and default poses never overwrite
/// the cache.
pub fn commit_sent<S: AvatarSource>(
    source: &S,
    last_sent: &mut Vec<JointData>,
    status: &SendStatus,
    cull_small_changes: bool,
) {
    let joint_count = source.joint_data_size_out();
    if last_sent.len() < joint_count {
        last_sent.resize(joint_count, JointData::default());
    }

    for i in 0..status.rotations_sent.min(joint_count) {
        let data = source.joint_data_out(i);
        if last_sent[i].rotation != data.rotation {
            let passes = !cull_small_changes
                || data.rotation.dot(&last_sent[i].rotation).abs() <= AVATAR_MIN_ROTATION_DOT;
            if passes && !data.rotation_is_default {
                last_sent[i].rotation = data.rotation;
            }
        }
    }

    for i in 0..status.translations_sent.min(joint_count) {
        let data = source.joint_data_out(i);
        if last_sent[i].translation != data.translation {
            let passes = !cull_small_changes
                || data.translation.distance(&last_sent[i].translation) > AVATAR_MIN_TRANSLATION;
            if passes && !data.translation_is_default {
                last_sent[i].translation = data.translation;
            }
        }
    }
}
