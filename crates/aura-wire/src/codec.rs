//! The stateful snapshot codec
//!
//! `encode_avatar_data` walks the wanted sections in wire order, emitting
//! each one that still fits the packet budget. Sections that do not fit stay
//! in `SendStatus::residual_flags` for the next call; a joint stream that
//! runs out of room mid-array records its cursors and resumes from them.
//! `FrameDecoder::parse` is the mirror: it validates every section against
//! the remaining bytes and hands decoded values to the sink.

use aura_core::{
    AdditionalFlags, AuraError, AuraResult, AvatarDataDetail, JointData, Vec3,
    AUDIO_LOUDNESS_SCALE, AVATAR_MIN_ROTATION_DOT, AVATAR_MIN_TRANSLATION, MIN_BULK_PACKET_SIZE,
    TRANSLATION_COMPRESSION_RADIX,
};
use aura_quant::{
    bit_vector_size, count_set_bits, get_bit, pack_fixed_vec3, pack_gain, pack_quat,
    read_bit_vector, set_bit, unpack_fixed_vec3, unpack_gain, unpack_quat, write_bit_vector,
    PACKED_QUAT_SIZE, PACKED_VEC3_SIZE,
};

use crate::flags::PacketFlags;
use crate::interface::{AvatarSink, AvatarSource};
use crate::policy::{distance_based_min_rotation_dot, distance_based_min_translation};
use crate::rates::AvatarRates;
use crate::sections::{
    parse_scale, read_f32, read_vec3, write_f32, write_scale, write_vec3, BoundingBox,
    FaceTrackerInfo, FarGrabJoints, HandControllers, ParentInfo, SensorToWorld,
    ADDITIONAL_FLAGS_SIZE, AUDIO_LOUDNESS_SIZE, BOUNDING_BOX_SIZE, FACE_TRACKER_HEADER_SIZE,
    FAR_GRAB_JOINTS_SIZE, GLOBAL_POSITION_SIZE, HAND_CONTROLLERS_SIZE, LOCAL_POSITION_SIZE,
    LOOK_AT_POSITION_SIZE, ORIENTATION_SIZE, PARENT_INFO_SIZE, SCALE_SIZE, SENSOR_TO_WORLD_SIZE,
};

const SESSION_UUID_SIZE: usize = 16;
const FLAGS_WORD_SIZE: usize = 2;

/// The encode continuation carried between calls
///
/// `residual_flags` holds the sections that were wanted but did not fit;
/// while any are set, the next call continues the same logical snapshot
/// instead of consulting the send policy. The two cursors resume a
/// partially written joint stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStatus {
    pub residual_flags: PacketFlags,
    pub send_uuid: bool,
    pub rotations_sent: usize,
    pub translations_sent: usize,
}

impl SendStatus {
    pub fn new() -> Self {
        SendStatus {
            residual_flags: PacketFlags::NONE,
            send_uuid: false,
            rotations_sent: 0,
            translations_sent: 0,
        }
    }

    /// A status describing a finished full send of `joint_count` joints,
    /// for committing server-side sends that never truncate.
    pub fn for_full_commit(joint_count: usize) -> Self {
        SendStatus {
            residual_flags: PacketFlags::NONE,
            send_uuid: false,
            rotations_sent: joint_count,
            translations_sent: joint_count,
        }
    }

    /// True when no sections are pending from a previous call
    pub fn is_complete(&self) -> bool {
        self.residual_flags.is_empty()
    }
}

impl Default for SendStatus {
    fn default() -> Self {
        SendStatus::new()
    }
}

/// Per-call encode parameters
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub detail: AvatarDataDetail,
    /// Joint values as of the last committed send; indexes past the end
    /// count as default pose.
    pub last_sent_joints: &'a [JointData],
    /// Apply the distance-stepped rotation threshold
    pub distance_adjust: bool,
    pub viewer_position: Vec3,
    /// Packet budget in bytes; zero means unbounded
    pub max_size: usize,
}

fn last_sent(joints: &[JointData], index: usize) -> JointData {
    joints.get(index).copied().unwrap_or_default()
}

/// Minimum joint-stream footprint that still makes progress: the count
/// byte, the rotation validity vector, and room for one more joint.
fn min_joint_data_size(joint_count: usize) -> usize {
    1 + bit_vector_size(joint_count) + min_size_for_joint(joint_count)
}

/// Space one more joint must see before being written: its own quaternion
/// plus the translation validity vector and scale float that always follow.
fn min_size_for_joint(joint_count: usize) -> usize {
    PACKED_QUAT_SIZE + bit_vector_size(joint_count) + 4
}

/// Serialize one avatar snapshot
///
/// `initial_flags` is the send policy's section mask; it is only consulted
/// when `status` carries no residual. Returns the encoded bytes and leaves
/// the continuation in `status`.
pub fn encode_avatar_data<S: AvatarSource>(
    source: &S,
    initial_flags: PacketFlags,
    ctx: &EncodeContext<'_>,
    status: &mut SendStatus,
    mut sent_joints_out: Option<&mut Vec<JointData>>,
    rates: Option<&AvatarRates>,
) -> AuraResult<Vec<u8>> {
    if ctx.max_size != 0 && ctx.max_size < MIN_BULK_PACKET_SIZE {
        return Err(AuraError::BufferTooShort {
            expected: MIN_BULK_PACKET_SIZE,
            actual: ctx.max_size,
        });
    }
    let max_size = if ctx.max_size == 0 {
        usize::MAX
    } else {
        ctx.max_size
    };

    // An empty snapshot keeps the session alive: optional id, zero mask.
    if ctx.detail == AvatarDataDetail::NoData {
        let mut buf = Vec::with_capacity(SESSION_UUID_SIZE + FLAGS_WORD_SIZE);
        if status.send_uuid {
            buf.extend_from_slice(&source.session_uuid_out().to_bytes());
        }
        buf.extend_from_slice(&PacketFlags::NONE.to_le_bytes());
        status.residual_flags = PacketFlags::NONE;
        status.send_uuid = false;
        return Ok(buf);
    }

    let cull_small_changes = ctx.detail.culls_small_changes();
    let send_all = ctx.detail.sends_all();

    let wanted = if status.residual_flags.is_empty() {
        // new snapshot
        status.rotations_sent = 0;
        status.translations_sent = 0;
        initial_flags
    } else {
        // continuing a truncated snapshot; grab joints ride inside the
        // joint stream, so wanting them forces the joint section back on
        let mut wanted = status.residual_flags;
        if wanted.contains(PacketFlags::GRAB_JOINTS) {
            wanted.insert(PacketFlags::JOINT_DATA);
        }
        wanted
    };

    let parent_info = source.parent_info_out();
    let face_tracker = source.face_tracker_info_out();
    let joint_count = source.joint_data_size_out();
    debug_assert!(joint_count <= u8::MAX as usize);

    let mut buf: Vec<u8> = Vec::with_capacity(max_size.min(1500));
    if status.send_uuid {
        buf.extend_from_slice(&source.session_uuid_out().to_bytes());
    }
    let flags_position = buf.len();
    buf.extend_from_slice(&[0u8, 0u8]);

    let mut included = PacketFlags::NONE;
    let mut extra_returned = PacketFlags::NONE;

    macro_rules! fits {
        ($flag:expr, $size:expr) => {
            wanted.contains($flag) && max_size - buf.len() >= $size
        };
    }

    if fits!(PacketFlags::GLOBAL_POSITION, GLOBAL_POSITION_SIZE) {
        included.insert(PacketFlags::GLOBAL_POSITION);
        let start = buf.len();
        write_vec3(&mut buf, source.global_position_out());
        if let Some(rates) = rates {
            rates.outbound.global_position.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::BOUNDING_BOX, BOUNDING_BOX_SIZE) {
        included.insert(PacketFlags::BOUNDING_BOX);
        let start = buf.len();
        source.bounding_box_out().write(&mut buf);
        if let Some(rates) = rates {
            rates.outbound.bounding_box.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::ORIENTATION, ORIENTATION_SIZE) {
        included.insert(PacketFlags::ORIENTATION);
        let start = buf.len();
        buf.extend_from_slice(&pack_quat(source.orientation_out()));
        if let Some(rates) = rates {
            rates.outbound.orientation.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::SCALE, SCALE_SIZE) {
        included.insert(PacketFlags::SCALE);
        let start = buf.len();
        write_scale(&mut buf, source.scale_out());
        if let Some(rates) = rates {
            rates.outbound.scale.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::LOOK_AT_POSITION, LOOK_AT_POSITION_SIZE) {
        included.insert(PacketFlags::LOOK_AT_POSITION);
        let start = buf.len();
        write_vec3(&mut buf, source.look_at_position_out());
        if let Some(rates) = rates {
            rates.outbound.look_at_position.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::AUDIO_LOUDNESS, AUDIO_LOUDNESS_SIZE) {
        included.insert(PacketFlags::AUDIO_LOUDNESS);
        let start = buf.len();
        buf.push(pack_gain(source.audio_loudness_out() / AUDIO_LOUDNESS_SCALE));
        if let Some(rates) = rates {
            rates.outbound.audio_loudness.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::SENSOR_TO_WORLD_MATRIX, SENSOR_TO_WORLD_SIZE) {
        included.insert(PacketFlags::SENSOR_TO_WORLD_MATRIX);
        let start = buf.len();
        source.sensor_to_world_out().write(&mut buf);
        if let Some(rates) = rates {
            rates.outbound.sensor_to_world.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::ADDITIONAL_FLAGS, ADDITIONAL_FLAGS_SIZE) {
        included.insert(PacketFlags::ADDITIONAL_FLAGS);
        let start = buf.len();
        let wire = source
            .additional_flags_out()
            .to_wire(parent_info.has_parent());
        buf.extend_from_slice(&wire.to_le_bytes());
        if let Some(rates) = rates {
            rates.outbound.additional_flags.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::PARENT_INFO, PARENT_INFO_SIZE) {
        included.insert(PacketFlags::PARENT_INFO);
        let start = buf.len();
        parent_info.write(&mut buf);
        if let Some(rates) = rates {
            rates.outbound.parent_info.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::LOCAL_POSITION, LOCAL_POSITION_SIZE) {
        included.insert(PacketFlags::LOCAL_POSITION);
        let start = buf.len();
        write_vec3(&mut buf, source.local_position_out());
        if let Some(rates) = rates {
            rates.outbound.local_position.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::HAND_CONTROLLERS, HAND_CONTROLLERS_SIZE) {
        included.insert(PacketFlags::HAND_CONTROLLERS);
        let start = buf.len();
        source.hand_controllers_out().write(&mut buf);
        if let Some(rates) = rates {
            rates.outbound.hand_controllers.increment((buf.len() - start) as u64);
        }
    }

    if fits!(PacketFlags::FACE_TRACKER_INFO, face_tracker.wire_size()) {
        included.insert(PacketFlags::FACE_TRACKER_INFO);
        let start = buf.len();
        face_tracker.write(&mut buf);
        if let Some(rates) = rates {
            rates.outbound.face_tracker.increment((buf.len() - start) as u64);
        }
    }

    // Both joint sections encode the same joint count.
    let packet_has_joint_data = wanted
        .contains(PacketFlags::JOINT_DATA)
        || wanted.contains(PacketFlags::JOINT_DEFAULT_POSE_FLAGS);
    let num_joints = if packet_has_joint_data { joint_count } else { 0 };
    let validity_size = bit_vector_size(num_joints);

    if fits!(PacketFlags::JOINT_DATA, min_joint_data_size(num_joints)) {
        included.insert(PacketFlags::JOINT_DATA);
        let start = buf.len();
        let min_for_joint = min_size_for_joint(num_joints);

        if let Some(out) = sent_joints_out.as_deref_mut() {
            out.resize(num_joints, JointData::default());
        }

        // The scale factor must cover every translation that might still be
        // written this frame, wherever encoding truncates.
        let mut max_translation_dimension = 0.001f32;
        for i in status.translations_sent..num_joints {
            let data = source.joint_data_out(i);
            if !data.translation_is_default {
                max_translation_dimension = max_translation_dimension
                    .max(data.translation.x.abs())
                    .max(data.translation.y.abs())
                    .max(data.translation.z.abs());
            }
        }

        buf.push(num_joints as u8);

        let min_rotation_dot = if ctx.distance_adjust && cull_small_changes {
            distance_based_min_rotation_dot(ctx.viewer_position, source.global_position_out())
        } else {
            AVATAR_MIN_ROTATION_DOT
        };

        let rotation_validity_position = buf.len();
        buf.resize(buf.len() + validity_size, 0);

        let mut i = status.rotations_sent;
        while i < num_joints {
            if max_size - buf.len() < min_for_joint {
                break;
            }
            let data = source.joint_data_out(i);
            let last = last_sent(ctx.last_sent_joints, i);

            if !data.rotation_is_default {
                // a lower dot means a larger rotation since the last send
                let changed = send_all
                    || last.rotation_is_default
                    || (!cull_small_changes && last.rotation != data.rotation)
                    || (cull_small_changes
                        && last.rotation.dot(&data.rotation).abs() < min_rotation_dot);
                if changed {
                    set_bit(&mut buf[rotation_validity_position..], i);
                    buf.extend_from_slice(&pack_quat(data.rotation));
                    if let Some(out) = sent_joints_out.as_deref_mut() {
                        out[i].rotation = data.rotation;
                    }
                }
            }
            if let Some(out) = sent_joints_out.as_deref_mut() {
                out[i].rotation_is_default = data.rotation_is_default;
            }
            i += 1;
        }
        status.rotations_sent = i;

        // Space for the translation validity vector and the scale float is
        // guaranteed: every written rotation reserved them via
        // min_size_for_joint.
        let translation_validity_position = buf.len();
        buf.resize(buf.len() + validity_size, 0);
        write_f32(&mut buf, max_translation_dimension);

        let min_translation = if ctx.distance_adjust && cull_small_changes {
            distance_based_min_translation(ctx.viewer_position)
        } else {
            AVATAR_MIN_TRANSLATION
        };

        let mut i = status.translations_sent;
        while i < num_joints {
            if max_size - buf.len() < min_for_joint {
                break;
            }
            let data = source.joint_data_out(i);
            let last = last_sent(ctx.last_sent_joints, i);

            if !data.translation_is_default {
                let changed = send_all
                    || last.translation_is_default
                    || (!cull_small_changes && last.translation != data.translation)
                    || (cull_small_changes
                        && data.translation.distance(&last.translation) > min_translation);
                if changed {
                    set_bit(&mut buf[translation_validity_position..], i);
                    buf.extend_from_slice(&pack_fixed_vec3(
                        data.translation.divided_by(max_translation_dimension),
                        TRANSLATION_COMPRESSION_RADIX,
                    ));
                    if let Some(out) = sent_joints_out.as_deref_mut() {
                        out[i].translation = data.translation;
                    }
                }
            }
            if let Some(out) = sent_joints_out.as_deref_mut() {
                out[i].translation_is_default = data.translation_is_default;
            }
            i += 1;
        }
        status.translations_sent = i;

        // Far-grab vantages ride at the tail of the joint stream.
        if fits!(PacketFlags::GRAB_JOINTS, FAR_GRAB_JOINTS_SIZE) {
            included.insert(PacketFlags::GRAB_JOINTS);
            let grab_start = buf.len();
            source.far_grab_joints_out().write(&mut buf);
            if let Some(rates) = rates {
                rates.outbound.far_grab_joints.increment((buf.len() - grab_start) as u64);
            }
        }

        if status.rotations_sent != num_joints || status.translations_sent != num_joints {
            extra_returned.insert(PacketFlags::JOINT_DATA);
        }

        if let Some(rates) = rates {
            rates.outbound.joint_data.increment((buf.len() - start) as u64);
        }
    }

    if fits!(
        PacketFlags::JOINT_DEFAULT_POSE_FLAGS,
        1 + 2 * validity_size
    ) {
        included.insert(PacketFlags::JOINT_DEFAULT_POSE_FLAGS);
        let start = buf.len();
        buf.push(num_joints as u8);
        buf.extend_from_slice(&write_bit_vector(num_joints, |i| {
            source.joint_data_out(i).rotation_is_default
        }));
        buf.extend_from_slice(&write_bit_vector(num_joints, |i| {
            source.joint_data_out(i).translation_is_default
        }));
        if let Some(rates) = rates {
            rates
                .outbound
                .joint_default_pose_flags
                .increment((buf.len() - start) as u64);
        }
    }

    buf[flags_position..flags_position + FLAGS_WORD_SIZE]
        .copy_from_slice(&included.to_le_bytes());

    status.residual_flags = wanted.difference(included).union(extra_returned);
    status.send_uuid = false;

    if buf.len() > max_size {
        return Err(AuraError::BufferOverflow { budget: max_size });
    }
    Ok(buf)
}

/// The snapshot parser with its inbound rate meters
#[derive(Default)]
pub struct FrameDecoder {
    rates: AvatarRates,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            rates: AvatarRates::new(),
        }
    }

    pub fn rates(&self) -> &AvatarRates {
        &self.rates
    }

    /// Parse one snapshot into the sink
    ///
    /// Returns the number of bytes consumed. Malformed packets report
    /// through the sink and return the full buffer length so the caller
    /// advances past them; sections decoded before the fault are kept.
    pub fn parse<S: AvatarSink>(&self, sink: &mut S, buffer: &[u8]) -> usize {
        let mut pos = 0usize;

        if !Self::check(sink, "PacketFlags", FLAGS_WORD_SIZE, buffer.len()) {
            return buffer.len();
        }
        let flags = PacketFlags::from_le_bytes([buffer[0], buffer[1]]);
        pos += FLAGS_WORD_SIZE;

        if flags.contains(PacketFlags::GLOBAL_POSITION) {
            let start = pos;
            if !Self::check(sink, "AvatarGlobalPosition", GLOBAL_POSITION_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let position = read_vec3(buffer, pos);
            if position.is_nan() {
                sink.on_parse_error("discarding avatar packet: globalPosition is NaN");
                return buffer.len();
            }
            sink.set_global_position_in(position);
            pos += GLOBAL_POSITION_SIZE;
            self.rates.global_position.record(pos - start);
        }

        if flags.contains(PacketFlags::BOUNDING_BOX) {
            let start = pos;
            if !Self::check(sink, "AvatarBoundingBox", BOUNDING_BOX_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            // length already validated
            let bounds = BoundingBox::parse(&buffer[pos..]).unwrap_or_default();
            sink.set_bounding_box_in(bounds);
            pos += BOUNDING_BOX_SIZE;
            self.rates.bounding_box.record(pos - start);
        }

        if flags.contains(PacketFlags::ORIENTATION) {
            let start = pos;
            if !Self::check(sink, "AvatarOrientation", ORIENTATION_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let mut quat_bytes = [0u8; PACKED_QUAT_SIZE];
            quat_bytes.copy_from_slice(&buffer[pos..pos + PACKED_QUAT_SIZE]);
            sink.set_orientation_in(unpack_quat(&quat_bytes));
            pos += ORIENTATION_SIZE;
            self.rates.orientation.record(pos - start);
        }

        if flags.contains(PacketFlags::SCALE) {
            let start = pos;
            if !Self::check(sink, "AvatarScale", SCALE_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let scale = parse_scale(&buffer[pos..]).unwrap_or(f32::NAN);
            if scale.is_nan() {
                sink.on_parse_error("discarding avatar packet: scale is NaN");
                return buffer.len();
            }
            sink.set_scale_in(scale);
            pos += SCALE_SIZE;
            self.rates.scale.record(pos - start);
        }

        if flags.contains(PacketFlags::LOOK_AT_POSITION) {
            let start = pos;
            if !Self::check(sink, "LookAtPosition", LOOK_AT_POSITION_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let look_at = read_vec3(buffer, pos);
            if look_at.is_nan() {
                sink.on_parse_error("discarding avatar packet: lookAtPosition is NaN");
                return buffer.len();
            }
            sink.set_look_at_position_in(look_at);
            pos += LOOK_AT_POSITION_SIZE;
            self.rates.look_at_position.record(pos - start);
        }

        if flags.contains(PacketFlags::AUDIO_LOUDNESS) {
            let start = pos;
            if !Self::check(sink, "AudioLoudness", AUDIO_LOUDNESS_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let loudness = unpack_gain(buffer[pos]) * AUDIO_LOUDNESS_SCALE;
            pos += AUDIO_LOUDNESS_SIZE;
            if loudness.is_nan() {
                sink.on_parse_error("discarding avatar packet: audioLoudness is NaN");
                return buffer.len();
            }
            sink.set_audio_loudness_in(loudness);
            self.rates.audio_loudness.record(pos - start);
        }

        if flags.contains(PacketFlags::SENSOR_TO_WORLD_MATRIX) {
            let start = pos;
            if !Self::check(sink, "SensorToWorldMatrix", SENSOR_TO_WORLD_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let matrix = SensorToWorld::parse(&buffer[pos..]).unwrap_or_default();
            sink.set_sensor_to_world_in(matrix);
            pos += SENSOR_TO_WORLD_SIZE;
            self.rates.sensor_to_world.record(pos - start);
        }

        if flags.contains(PacketFlags::ADDITIONAL_FLAGS) {
            let start = pos;
            if !Self::check(sink, "AdditionalFlags", ADDITIONAL_FLAGS_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let wire = u16::from_le_bytes([buffer[pos], buffer[pos + 1]]);
            sink.set_additional_flags_in(AdditionalFlags::from_wire(wire));
            pos += ADDITIONAL_FLAGS_SIZE;
            self.rates.additional_flags.record(pos - start);
        }

        if flags.contains(PacketFlags::PARENT_INFO) {
            let start = pos;
            if !Self::check(sink, "ParentInfo", PARENT_INFO_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let info = ParentInfo::parse(&buffer[pos..]).unwrap_or_default();
            sink.set_parent_info_in(info.parent_uuid, info.parent_joint_index);
            pos += PARENT_INFO_SIZE;
            self.rates.parent_info.record(pos - start);
        }

        if flags.contains(PacketFlags::LOCAL_POSITION) {
            let start = pos;
            if !Self::check(sink, "AvatarLocalPosition", LOCAL_POSITION_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let position = read_vec3(buffer, pos);
            if position.is_nan() {
                sink.on_parse_error("discarding avatar packet: localPosition is NaN");
                return buffer.len();
            }
            sink.set_local_position_in(position);
            pos += LOCAL_POSITION_SIZE;
            self.rates.local_position.record(pos - start);
        }

        if flags.contains(PacketFlags::HAND_CONTROLLERS) {
            let start = pos;
            if !Self::check(sink, "HandControllers", HAND_CONTROLLERS_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let controllers = HandControllers::parse(&buffer[pos..]).unwrap_or_default();
            sink.set_hand_controllers_in(controllers);
            pos += HAND_CONTROLLERS_SIZE;
            self.rates.hand_controllers.record(pos - start);
        }

        if flags.contains(PacketFlags::FACE_TRACKER_INFO) {
            let start = pos;
            if !Self::check(sink, "FaceTrackerInfo", FACE_TRACKER_HEADER_SIZE, buffer.len() - pos) {
                return buffer.len();
            }
            let (mut info, count) = match FaceTrackerInfo::parse_header(&buffer[pos..]) {
                Ok(parsed) => parsed,
                Err(_) => return buffer.len(),
            };
            pos += FACE_TRACKER_HEADER_SIZE;

            let coefficients_size = count * 4;
            if !Self::check(sink, "FaceTrackerCoefficients", coefficients_size, buffer.len() - pos) {
                return buffer.len();
            }
            info.blendshape_coefficients = (0..count)
                .map(|i| read_f32(buffer, pos + i * 4))
                .collect();
            pos += coefficients_size;

            sink.set_face_tracker_info_in(info);
            self.rates.face_tracker.record(pos - start);
        }

        if flags.contains(PacketFlags::JOINT_DATA) {
            let start = pos;
            if !Self::check(sink, "NumJoints", 1, buffer.len() - pos) {
                return buffer.len();
            }
            let num_joints = buffer[pos] as usize;
            pos += 1;

            let validity_size = bit_vector_size(num_joints);
            if !Self::check(sink, "JointRotationValidityBits", validity_size, buffer.len() - pos) {
                return buffer.len();
            }
            let rotation_validity = buffer[pos..pos + validity_size].to_vec();
            let valid_rotations = count_set_bits(&rotation_validity, num_joints);
            pos += validity_size;

            sink.set_joint_data_size_in(num_joints);

            if !Self::check(
                sink,
                "JointRotations",
                valid_rotations * PACKED_QUAT_SIZE,
                buffer.len() - pos,
            ) {
                return buffer.len();
            }
            for i in 0..num_joints {
                if get_bit(&rotation_validity, i) {
                    let mut quat_bytes = [0u8; PACKED_QUAT_SIZE];
                    quat_bytes.copy_from_slice(&buffer[pos..pos + PACKED_QUAT_SIZE]);
                    pos += PACKED_QUAT_SIZE;
                    sink.set_joint_rotation_in(i, unpack_quat(&quat_bytes));
                    sink.set_joint_rotation_default_in(i, false);
                }
            }

            if !Self::check(sink, "JointTranslationValidityBits", validity_size, buffer.len() - pos) {
                return buffer.len();
            }
            let translation_validity = buffer[pos..pos + validity_size].to_vec();
            let valid_translations = count_set_bits(&translation_validity, num_joints);
            pos += validity_size;

            if !Self::check(sink, "JointMaxTranslationDimension", 4, buffer.len() - pos) {
                return buffer.len();
            }
            let max_translation_dimension = read_f32(buffer, pos);
            pos += 4;

            if !Self::check(
                sink,
                "JointTranslations",
                valid_translations * PACKED_VEC3_SIZE,
                buffer.len() - pos,
            ) {
                return buffer.len();
            }
            for i in 0..num_joints {
                if get_bit(&translation_validity, i) {
                    let mut vec_bytes = [0u8; PACKED_VEC3_SIZE];
                    vec_bytes.copy_from_slice(&buffer[pos..pos + PACKED_VEC3_SIZE]);
                    pos += PACKED_VEC3_SIZE;
                    let translation =
                        unpack_fixed_vec3(&vec_bytes, TRANSLATION_COMPRESSION_RADIX)
                            .scaled_by(max_translation_dimension);
                    sink.set_joint_translation_in(i, translation);
                    sink.set_joint_translation_default_in(i, false);
                }
            }
            self.rates.joint_data.record(pos - start);

            if flags.contains(PacketFlags::GRAB_JOINTS) {
                let grab_start = pos;
                if !Self::check(sink, "FarGrabJoints", FAR_GRAB_JOINTS_SIZE, buffer.len() - pos) {
                    return buffer.len();
                }
                let joints = FarGrabJoints::parse(&buffer[pos..]).unwrap_or_default();
                sink.set_far_grab_joints_in(joints);
                pos += FAR_GRAB_JOINTS_SIZE;
                self.rates.far_grab_joints.record(pos - grab_start);
            }
        }

        if flags.contains(PacketFlags::JOINT_DEFAULT_POSE_FLAGS) {
            let start = pos;
            if !Self::check(sink, "JointDefaultPoseFlagsNumJoints", 1, buffer.len() - pos) {
                return buffer.len();
            }
            let num_joints = buffer[pos] as usize;
            pos += 1;

            sink.set_joint_data_size_in(num_joints);
            let validity_size = bit_vector_size(num_joints);

            if !Self::check(
                sink,
                "JointDefaultPoseFlagsRotationFlags",
                validity_size,
                buffer.len() - pos,
            ) {
                return buffer.len();
            }
            read_bit_vector(&buffer[pos..pos + validity_size], num_joints, |i, value| {
                sink.set_joint_rotation_default_in(i, value);
            });
            pos += validity_size;

            if !Self::check(
                sink,
                "JointDefaultPoseFlagsTranslationFlags",
                validity_size,
                buffer.len() - pos,
            ) {
                return buffer.len();
            }
            read_bit_vector(&buffer[pos..pos + validity_size], num_joints, |i, value| {
                sink.set_joint_translation_default_in(i, value);
            });
            pos += validity_size;

            self.rates.joint_default_pose_flags.record(pos - start);
        }

        self.rates.parse.record(pos);
        pos
    }

    fn check<S: AvatarSink>(
        sink: &mut S,
        section: &str,
        needed: usize,
        available: usize,
    ) -> bool {
        if available < needed {
            sink.on_packet_too_small(section, needed, available);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ChangeReport;
    use crate::policy::initial_flags;
    use crate::sections::{FaceTrackerInfo, HandControllers};
    use aura_core::{Quat, SessionUuid};

    #[derive(Default)]
    struct FixtureAvatar {
        session_uuid: SessionUuid,
        global_position: Vec3,
        joints: Vec<JointData>,
    }

    impl AvatarSource for FixtureAvatar {
        fn session_uuid_out(&self) -> SessionUuid {
            self.session_uuid
        }
        fn global_position_out(&self) -> Vec3 {
            self.global_position
        }
        fn bounding_box_out(&self) -> BoundingBox {
            Default::default()
        }
        fn orientation_out(&self) -> Quat {
            Quat::IDENTITY
        }
        fn scale_out(&self) -> f32 {
            1.0
        }
        fn look_at_position_out(&self) -> Vec3 {
            Vec3::ZERO
        }
        fn audio_loudness_out(&self) -> f32 {
            0.0
        }
        fn sensor_to_world_out(&self) -> SensorToWorld {
            Default::default()
        }
        fn additional_flags_out(&self) -> AdditionalFlags {
            Default::default()
        }
        fn parent_info_out(&self) -> ParentInfo {
            Default::default()
        }
        fn local_position_out(&self) -> Vec3 {
            Vec3::ZERO
        }
        fn hand_controllers_out(&self) -> HandControllers {
            Default::default()
        }
        fn face_tracker_info_out(&self) -> FaceTrackerInfo {
            Default::default()
        }
        fn joint_data_size_out(&self) -> usize {
            self.joints.len()
        }
        fn joint_data_out(&self, index: usize) -> JointData {
            self.joints[index]
        }
        fn far_grab_joints_out(&self) -> FarGrabJoints {
            Default::default()
        }
        fn change_report(&self, _since_micros: u64) -> ChangeReport {
            ChangeReport::everything()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        global_position: Option<Vec3>,
        look_at: Option<Vec3>,
        joint_count: Option<usize>,
        rotations: Vec<(usize, Quat)>,
        translations: Vec<(usize, Vec3)>,
        parse_errors: Vec<String>,
        too_small: Vec<String>,
    }

    impl AvatarSink for RecordingSink {
        fn set_global_position_in(&mut self, position: Vec3) {
            self.global_position = Some(position);
        }
        fn set_bounding_box_in(&mut self, _bounds: BoundingBox) {}
        fn set_orientation_in(&mut self, _orientation: Quat) {}
        fn set_scale_in(&mut self, _scale: f32) {}
        fn set_look_at_position_in(&mut self, look_at: Vec3) {
            self.look_at = Some(look_at);
        }
        fn set_audio_loudness_in(&mut self, _loudness: f32) {}
        fn set_sensor_to_world_in(&mut self, _matrix: SensorToWorld) {}
        fn set_additional_flags_in(&mut self, _flags: AdditionalFlags) {}
        fn set_parent_info_in(&mut self, _parent_uuid: SessionUuid, _parent_joint_index: u16) {}
        fn set_local_position_in(&mut self, _position: Vec3) {}
        fn set_hand_controllers_in(&mut self, _controllers: HandControllers) {}
        fn set_face_tracker_info_in(&mut self, _info: FaceTrackerInfo) {}
        fn set_joint_data_size_in(&mut self, count: usize) {
            self.joint_count = Some(count);
        }
        fn set_joint_rotation_in(&mut self, index: usize, rotation: Quat) {
            self.rotations.push((index, rotation));
        }
        fn set_joint_rotation_default_in(&mut self, _index: usize, _is_default: bool) {}
        fn set_joint_translation_in(&mut self, index: usize, translation: Vec3) {
            self.translations.push((index, translation));
        }
        fn set_joint_translation_default_in(&mut self, _index: usize, _is_default: bool) {}
        fn set_far_grab_joints_in(&mut self, _joints: FarGrabJoints) {}

        fn on_packet_too_small(&mut self, section: &str, _needed: usize, _available: usize) {
            self.too_small.push(section.to_string());
        }
        fn on_parse_error(&mut self, reason: &str) {
            self.parse_errors.push(reason.to_string());
        }
    }

    fn posed_joints(count: usize) -> Vec<JointData> {
        (0..count)
            .map(|i| {
                JointData::new(
                    Quat::new(0.1, 0.2, 0.3, 0.9).normalized(),
                    Vec3::new(i as f32 * 0.01, 0.02, -0.03),
                )
            })
            .collect()
    }

    fn unbounded(last_sent: &[JointData]) -> EncodeContext<'_> {
        EncodeContext {
            detail: AvatarDataDetail::SendAllData,
            last_sent_joints: last_sent,
            distance_adjust: false,
            viewer_position: Vec3::ZERO,
            max_size: 0,
        }
    }

    #[test]
    fn test_no_data_encode() {
        let source = FixtureAvatar {
            session_uuid: SessionUuid::new([
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
                0x0e, 0x0f, 0x10,
            ]),
            ..Default::default()
        };
        let mut status = SendStatus {
            send_uuid: true,
            ..SendStatus::new()
        };
        let ctx = EncodeContext {
            detail: AvatarDataDetail::NoData,
            ..unbounded(&[])
        };

        let bytes =
            encode_avatar_data(&source, PacketFlags::NONE, &ctx, &mut status, None, None).unwrap();

        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[0..16], &source.session_uuid.to_bytes());
        assert_eq!(&bytes[16..18], &[0x00, 0x00]);
        assert!(status.residual_flags.is_empty());
        assert!(!status.send_uuid);
    }

    #[test]
    fn test_global_position_bytes() {
        let source = FixtureAvatar {
            global_position: Vec3::new(1.5, -2.25, 3.0),
            ..Default::default()
        };
        let mut status = SendStatus::new();
        let ctx = unbounded(&[]);

        let bytes = encode_avatar_data(
            &source,
            PacketFlags::new(PacketFlags::GLOBAL_POSITION),
            &ctx,
            &mut status,
            None,
            None,
        )
        .unwrap();

        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[0..2], &[0x01, 0x00]);
        assert_eq!(&bytes[2..6], &1.5f32.to_le_bytes());
        assert_eq!(&bytes[6..10], &(-2.25f32).to_le_bytes());
        assert_eq!(&bytes[10..14], &3.0f32.to_le_bytes());
        assert!(status.residual_flags.is_empty());

        let decoder = FrameDecoder::new();
        let mut sink = RecordingSink::default();
        assert_eq!(decoder.parse(&mut sink, &bytes), bytes.len());
        assert_eq!(sink.global_position, Some(Vec3::new(1.5, -2.25, 3.0)));
    }

    #[test]
    fn test_truncated_joint_stream_resumes() {
        let joint_count = 40;
        let source = FixtureAvatar {
            joints: posed_joints(joint_count),
            ..Default::default()
        };
        let last_sent = vec![JointData::default(); joint_count];

        // budget: mask word + count + rotation validity, then room for ten
        // joints at the reservation size (the tenth write leaves less than
        // one reservation behind)
        let validity = bit_vector_size(joint_count);
        let reservation = min_size_for_joint(joint_count);
        let max_size = 2 + 1 + validity + 9 * PACKED_QUAT_SIZE + reservation;

        let mut status = SendStatus::new();
        let ctx = EncodeContext {
            max_size,
            ..unbounded(&last_sent)
        };
        let first = encode_avatar_data(
            &source,
            PacketFlags::new(PacketFlags::JOINT_DATA),
            &ctx,
            &mut status,
            None,
            None,
        )
        .unwrap();

        assert_eq!(status.rotations_sent, 10);
        assert_eq!(status.translations_sent, 0);
        assert!(status.residual_flags.contains(PacketFlags::JOINT_DATA));
        assert!(first.len() <= max_size);

        let decoder = FrameDecoder::new();
        let mut sink = RecordingSink::default();
        decoder.parse(&mut sink, &first);
        assert_eq!(sink.rotations.len(), 10);
        assert_eq!(sink.rotations.last().map(|(i, _)| *i), Some(9));

        // second call continues from joint 10 with a large budget
        let ctx = unbounded(&last_sent);
        let second =
            encode_avatar_data(&source, PacketFlags::NONE, &ctx, &mut status, None, None).unwrap();

        assert_eq!(status.rotations_sent, joint_count);
        assert_eq!(status.translations_sent, joint_count);
        assert!(status.residual_flags.is_empty());

        let mut sink = RecordingSink::default();
        decoder.parse(&mut sink, &second);
        assert_eq!(sink.rotations.first().map(|(i, _)| *i), Some(10));
        assert_eq!(sink.rotations.len(), joint_count - 10);
        // translations all arrive in the second packet
        assert_eq!(sink.translations.len(), joint_count);
    }

    #[test]
    fn test_residual_union_covers_wanted() {
        let source = FixtureAvatar {
            joints: posed_joints(8),
            ..Default::default()
        };
        let last_sent = vec![JointData::default(); 8];
        let wanted = initial_flags(AvatarDataDetail::SendAllData, &ChangeReport::everything());

        let mut status = SendStatus::new();
        let mut covered = PacketFlags::NONE;
        let mut passes = 0;
        loop {
            let ctx = EncodeContext {
                detail: AvatarDataDetail::SendAllData,
                last_sent_joints: &last_sent,
                distance_adjust: false,
                viewer_position: Vec3::ZERO,
                max_size: 60,
            };
            let bytes =
                encode_avatar_data(&source, wanted, &ctx, &mut status, None, None).unwrap();
            covered.insert(PacketFlags::from_le_bytes([bytes[0], bytes[1]]).bits());
            passes += 1;
            if status.residual_flags.is_empty() {
                break;
            }
            assert!(passes < 16, "encode did not converge");
        }

        assert!(passes > 1, "budget was not actually constraining");
        assert_eq!(covered.bits() & wanted.bits(), wanted.bits());
    }

    #[test]
    fn test_nan_look_at_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(
            &PacketFlags::new(PacketFlags::LOOK_AT_POSITION).to_le_bytes(),
        );
        buffer.extend_from_slice(&f32::NAN.to_le_bytes());
        buffer.extend_from_slice(&0.0f32.to_le_bytes());
        buffer.extend_from_slice(&0.0f32.to_le_bytes());

        let decoder = FrameDecoder::new();
        let mut sink = RecordingSink::default();
        let parsed = decoder.parse(&mut sink, &buffer);

        assert_eq!(parsed, buffer.len());
        assert!(sink.look_at.is_none());
        assert_eq!(sink.parse_errors.len(), 1);
        assert!(sink.parse_errors[0].contains("lookAtPosition"));
    }

    #[test]
    fn test_flagged_section_too_small() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&PacketFlags::new(PacketFlags::GLOBAL_POSITION).to_le_bytes());
        buffer.extend_from_slice(&[0u8; 4]); // 4 of the 12 needed bytes

        let decoder = FrameDecoder::new();
        let mut sink = RecordingSink::default();
        let parsed = decoder.parse(&mut sink, &buffer);

        assert_eq!(parsed, buffer.len());
        assert!(sink.global_position.is_none());
        assert_eq!(sink.too_small, vec!["AvatarGlobalPosition".to_string()]);
    }

    #[test]
    fn test_grab_joints_force_joint_data_on_continuation() {
        let source = FixtureAvatar {
            joints: posed_joints(4),
            ..Default::default()
        };
        let last_sent = vec![JointData::default(); 4];

        let mut status = SendStatus {
            residual_flags: PacketFlags::new(PacketFlags::GRAB_JOINTS),
            ..SendStatus::new()
        };
        let ctx = unbounded(&last_sent);
        let bytes =
            encode_avatar_data(&source, PacketFlags::NONE, &ctx, &mut status, None, None).unwrap();

        let included = PacketFlags::from_le_bytes([bytes[0], bytes[1]]);
        assert!(included.contains(PacketFlags::JOINT_DATA));
        assert!(included.contains(PacketFlags::GRAB_JOINTS));
        assert!(status.residual_flags.is_empty());
    }

    #[test]
    fn test_sent_joints_out_mirrors_written_values() {
        let source = FixtureAvatar {
            joints: posed_joints(6),
            ..Default::default()
        };
        let last_sent = vec![JointData::default(); 6];
        let mut sent = Vec::new();
        let mut status = SendStatus::new();
        let ctx = unbounded(&last_sent);

        encode_avatar_data(
            &source,
            PacketFlags::new(PacketFlags::JOINT_DATA),
            &ctx,
            &mut status,
            Some(&mut sent),
            None,
        )
        .unwrap();

        assert_eq!(sent.len(), 6);
        for (i, joint) in sent.iter().enumerate() {
            assert_eq!(joint.rotation, source.joints[i].rotation);
            assert_eq!(joint.translation, source.joints[i].translation);
            assert!(!joint.rotation_is_default);
        }
    }

    #[test]
    fn test_budget_below_minimum_rejected() {
        let source = FixtureAvatar::default();
        let mut status = SendStatus::new();
        let ctx = EncodeContext {
            max_size: 10,
            ..unbounded(&[])
        };
        let result = encode_avatar_data(
            &source,
            PacketFlags::new(PacketFlags::GLOBAL_POSITION),
            &ctx,
            &mut status,
            None,
            None,
        );
        assert!(matches!(result, Err(AuraError::BufferTooShort { .. })));
    }
}
