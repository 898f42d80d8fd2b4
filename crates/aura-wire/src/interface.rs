//! Capability traits connecting the codec to the application state
//!
//! The codec is polymorphic over a source of outbound state and a sink for
//! inbound state. Implementations own the actual avatar representation;
//! the codec never holds state beyond the send cursor.

use aura_core::{AdditionalFlags, JointData, Quat, SessionUuid, Vec3};

use crate::sections::{
    BoundingBox, FaceTrackerInfo, FarGrabJoints, HandControllers, ParentInfo, SensorToWorld,
};

/// Which fields changed since the last send, plus the presence conditions
/// the send policy needs. Produced by the application per outgoing frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeReport {
    pub orientation_changed: bool,
    pub bounding_box_changed: bool,
    pub scale_changed: bool,
    pub look_at_changed: bool,
    pub audio_loudness_changed: bool,
    pub sensor_to_world_changed: bool,
    pub additional_flags_changed: bool,
    pub parent_info_changed: bool,
    pub translation_changed: bool,
    pub face_tracker_changed: bool,

    pub has_parent: bool,
    pub hand_controllers_valid: bool,
    pub far_grab_left_valid: bool,
    pub far_grab_right_valid: bool,
    pub far_grab_mouse_valid: bool,
    pub has_blendshapes: bool,
    pub drop_face_tracking: bool,
}

impl ChangeReport {
    /// A report that marks everything changed and present
    pub fn everything() -> Self {
        ChangeReport {
            orientation_changed: true,
            bounding_box_changed: true,
            scale_changed: true,
            look_at_changed: true,
            audio_loudness_changed: true,
            sensor_to_world_changed: true,
            additional_flags_changed: true,
            parent_info_changed: true,
            translation_changed: true,
            face_tracker_changed: true,
            has_parent: false,
            hand_controllers_valid: true,
            far_grab_left_valid: false,
            far_grab_right_valid: false,
            far_grab_mouse_valid: false,
            has_blendshapes: true,
            drop_face_tracking: false,
        }
    }

    pub fn any_far_grab_valid(&self) -> bool {
        self.far_grab_left_valid || self.far_grab_right_valid || self.far_grab_mouse_valid
    }
}

/// Outbound state getters consumed by the encoder
pub trait AvatarSource {
    fn session_uuid_out(&self) -> SessionUuid;
    fn global_position_out(&self) -> Vec3;
    fn bounding_box_out(&self) -> BoundingBox;
    fn orientation_out(&self) -> Quat;
    fn scale_out(&self) -> f32;
    fn look_at_position_out(&self) -> Vec3;
    fn audio_loudness_out(&self) -> f32;
    fn sensor_to_world_out(&self) -> SensorToWorld;
    fn additional_flags_out(&self) -> AdditionalFlags;
    fn parent_info_out(&self) -> ParentInfo;
    fn local_position_out(&self) -> Vec3;
    fn hand_controllers_out(&self) -> HandControllers;
    fn face_tracker_info_out(&self) -> FaceTrackerInfo;
    fn joint_data_size_out(&self) -> usize;
    fn joint_data_out(&self, index: usize) -> JointData;
    fn far_grab_joints_out(&self) -> FarGrabJoints;

    /// Change history relative to the given send timestamp (microseconds)
    fn change_report(&self, since_micros: u64) -> ChangeReport;
}

/// Inbound state setters and error callbacks consumed by the decoder
pub trait AvatarSink {
    fn set_global_position_in(&mut self, position: Vec3);
    fn set_bounding_box_in(&mut self, bounds: BoundingBox);
    fn set_orientation_in(&mut self, orientation: Quat);
    fn set_scale_in(&mut self, scale: f32);
    fn set_look_at_position_in(&mut self, look_at: Vec3);
    fn set_audio_loudness_in(&mut self, loudness: f32);
    fn set_sensor_to_world_in(&mut self, matrix: SensorToWorld);
    fn set_additional_flags_in(&mut self, flags: AdditionalFlags);
    fn set_parent_info_in(&mut self, parent_uuid: SessionUuid, parent_joint_index: u16);
    fn set_local_position_in(&mut self, position: Vec3);
    fn set_hand_controllers_in(&mut self, controllers: HandControllers);
    fn set_face_tracker_info_in(&mut self, info: FaceTrackerInfo);
    fn set_joint_data_size_in(&mut self, count: usize);
    fn set_joint_rotation_in(&mut self, index: usize, rotation: Quat);
    fn set_joint_rotation_default_in(&mut self, index: usize, is_default: bool);
    fn set_joint_translation_in(&mut self, index: usize, translation: Vec3);
    fn set_joint_translation_default_in(&mut self, index: usize, is_default: bool);
    fn set_far_grab_joints_in(&mut self, joints: FarGrabJoints);

    /// A flagged section did not fit the remaining buffer
    fn on_packet_too_small(&mut self, section: &str, needed: usize, available: usize);
    /// The packet carried an invalid value and was dropped
    fn on_parse_error(&mut self, reason: &str);
}
