//! End-to-end test support for the AURA protocol
//!
//! [`TestAvatar`] is a complete avatar state container implementing both
//! codec capability traits, so one instance can stand on either side of a
//! wire: encode from it as a source, decode into it as a sink.

pub mod roundtrip;

use aura_core::{AdditionalFlags, JointData, Quat, SessionUuid, Vec3};
use aura_wire::{
    AvatarSink, AvatarSource, BoundingBox, ChangeReport, FaceTrackerInfo, FarGrabJoints,
    HandControllers, ParentInfo, SensorToWorld,
};

/// A self-contained avatar state for tests
#[derive(Debug, Clone, Default)]
pub struct TestAvatar {
    pub session_uuid: SessionUuid,
    pub global_position: Vec3,
    pub bounding_box: BoundingBox,
    pub orientation: Quat,
    pub scale: f32,
    pub look_at_position: Vec3,
    pub audio_loudness: f32,
    pub sensor_to_world: SensorToWorld,
    pub additional_flags: AdditionalFlags,
    pub parent_info: ParentInfo,
    pub local_position: Vec3,
    pub hand_controllers: HandControllers,
    pub face_tracker: FaceTrackerInfo,
    pub joints: Vec<JointData>,
    pub far_grab_joints: FarGrabJoints,
    pub report: ChangeReport,

    /// Names of sink setters invoked on this avatar, in call order
    pub sink_calls: Vec<&'static str>,
    pub parse_errors: Vec<String>,
    pub too_small_sections: Vec<String>,
}

impl TestAvatar {
    /// An avatar with every field populated with distinctive values
    pub fn fully_posed(joint_count: usize) -> Self {
        TestAvatar {
            session_uuid: SessionUuid::new([0xAB; 16]),
            global_position: Vec3::new(12.5, 1.7, -8.25),
            bounding_box: BoundingBox {
                dimensions: Vec3::new(0.6, 1.9, 0.4),
                origin_offset: Vec3::new(0.0, -0.95, 0.0),
            },
            orientation: Quat::new(0.0, 0.3826834, 0.0, 0.9238795),
            scale: 1.25,
            look_at_position: Vec3::new(3.0, 1.6, 4.0),
            audio_loudness: 220.0,
            sensor_to_world: SensorToWorld {
                translation: Vec3::new(0.5, 0.0, 0.5),
                rotation: Quat::IDENTITY,
                scale: 1.0,
            },
            additional_flags: AdditionalFlags {
                collide_with_other_avatars: true,
                has_procedural_eye_movement: true,
                ..Default::default()
            },
            parent_info: ParentInfo::default(),
            local_position: Vec3::ZERO,
            hand_controllers: HandControllers::default(),
            face_tracker: FaceTrackerInfo {
                left_eye_blink: 0.1,
                right_eye_blink: 0.15,
                average_loudness: 120.0,
                brow_audio_lift: 0.3,
                blendshape_coefficients: vec![0.0, 0.5, 1.0],
            },
            joints: (0..joint_count)
                .map(|i| {
                    JointData::new(
                        Quat::new(0.05 * i as f32, 0.1, -0.2, 1.0).normalized(),
                        Vec3::new(0.01 * i as f32, 0.4, -0.02),
                    )
                })
                .collect(),
            far_grab_joints: FarGrabJoints::default(),
            report: ChangeReport::everything(),
            sink_calls: Vec::new(),
            parse_errors: Vec::new(),
            too_small_sections: Vec::new(),
        }
    }

    fn record(&mut self, call: &'static str) {
        self.sink_calls.push(call);
    }

    pub fn called(&self, name: &str) -> bool {
        self.sink_calls.iter().any(|c| *c == name)
    }
}

impl AvatarSource for TestAvatar {
    fn session_uuid_out(&self) -> SessionUuid {
        self.session_uuid
    }
    fn global_position_out(&self) -> Vec3 {
        self.global_position
    }
    fn bounding_box_out(&self) -> BoundingBox {
        self.bounding_box
    }
    fn orientation_out(&self) -> Quat {
        self.orientation
    }
    fn scale_out(&self) -> f32 {
        self.scale
    }
    fn look_at_position_out(&self) -> Vec3 {
        self.look_at_position
    }
    fn audio_loudness_out(&self) -> f32 {
        self.audio_loudness
    }
    fn sensor_to_world_out(&self) -> SensorToWorld {
        self.sensor_to_world
    }
    fn additional_flags_out(&self) -> AdditionalFlags {
        self.additional_flags
    }
    fn parent_info_out(&self) -> ParentInfo {
        self.parent_info
    }
    fn local_position_out(&self) -> Vec3 {
        self.local_position
    }
    fn hand_controllers_out(&self) -> HandControllers {
        self.hand_controllers
    }
    fn face_tracker_info_out(&self) -> FaceTrackerInfo {
        self.face_tracker.clone()
    }
    fn joint_data_size_out(&self) -> usize {
        self.joints.len()
    }
    fn joint_data_out(&self, index: usize) -> JointData {
        self.joints[index]
    }
    fn far_grab_joints_out(&self) -> FarGrabJoints {
        self.far_grab_joints
    }
    fn change_report(&self, _since_micros: u64) -> ChangeReport {
        self.report
    }
}

impl AvatarSink for TestAvatar {
    fn set_global_position_in(&mut self, position: Vec3) {
        self.record("set_global_position_in");
        self.global_position = position;
    }
    fn set_bounding_box_in(&mut self, bounds: BoundingBox) {
        self.record("set_bounding_box_in");
        self.bounding_box = bounds;
    }
    fn set_orientation_in(&mut self, orientation: Quat) {
        self.record("set_orientation_in");
        self.orientation = orientation;
    }
    fn set_scale_in(&mut self, scale: f32) {
        self.record("set_scale_in");
        self.scale = scale;
    }
    fn set_look_at_position_in(&mut self, look_at: Vec3) {
        self.record("set_look_at_position_in");
        self.look_at_position = look_at;
    }
    fn set_audio_loudness_in(&mut self, loudness: f32) {
        self.record("set_audio_loudness_in");
        self.audio_loudness = loudness;
    }
    fn set_sensor_to_world_in(&mut self, matrix: SensorToWorld) {
        self.record("set_sensor_to_world_in");
        self.sensor_to_world = matrix;
    }
    fn set_additional_flags_in(&mut self, flags: AdditionalFlags) {
        self.record("set_additional_flags_in");
        self.additional_flags = flags;
    }
    fn set_parent_info_in(&mut self, parent_uuid: SessionUuid, parent_joint_index: u16) {
        self.record("set_parent_info_in");
        self.parent_info = ParentInfo {
            parent_uuid,
            parent_joint_index,
        };
    }
    fn set_local_position_in(&mut self, position: Vec3) {
        self.record("set_local_position_in");
        self.local_position = position;
    }
    fn set_hand_controllers_in(&mut self, controllers: HandControllers) {
        self.record("set_hand_controllers_in");
        self.hand_controllers = controllers;
    }
    fn set_face_tracker_info_in(&mut self, info: FaceTrackerInfo) {
        self.record("set_face_tracker_info_in");
        self.face_tracker = info;
    }
    fn set_joint_data_size_in(&mut self, count: usize) {
        self.record("set_joint_data_size_in");
        if self.joints.len() != count {
            self.joints.resize(count, JointData::default());
        }
    }
    fn set_joint_rotation_in(&mut self, index: usize, rotation: Quat) {
        if let Some(joint) = self.joints.get_mut(index) {
            joint.rotation = rotation;
        }
    }
    fn set_joint_rotation_default_in(&mut self, index: usize, is_default: bool) {
        if let Some(joint) = self.joints.get_mut(index) {
            joint.rotation_is_default = is_default;
        }
    }
    fn set_joint_translation_in(&mut self, index: usize, translation: Vec3) {
        if let Some(joint) = self.joints.get_mut(index) {
            joint.translation = translation;
        }
    }
    fn set_joint_translation_default_in(&mut self, index: usize, is_default: bool) {
        if let Some(joint) = self.joints.get_mut(index) {
            joint.translation_is_default = is_default;
        }
    }
    fn set_far_grab_joints_in(&mut self, joints: FarGrabJoints) {
        self.record("set_far_grab_joints_in");
        self.far_grab_joints = joints;
    }

    fn on_packet_too_small(&mut self, section: &str, _needed: usize, _available: usize) {
        self.too_small_sections.push(section.to_string());
    }
    fn on_parse_error(&mut self, reason: &str) {
        self.parse_errors.push(reason.to_string());
    }
}
