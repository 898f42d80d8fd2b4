//! The outbound driver
//!
//! Per tick: bump and send identity if it changed, honor the trait send
//! window under the max-data-rate budget, then encode and broadcast one
//! snapshot and commit the sent joint values. The driver owns the last-sent
//! joint cache exclusively; the trait store is the only shared state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::warn;

use aura_core::{
    AuraResult, AvatarDataDetail, JointData, Vec3, AVATAR_SEND_FULL_UPDATE_RATIO,
    CLIENT_TO_AVATAR_MIXER_BROADCAST_FRAMES_PER_SECOND,
};
use aura_traits::{TraitStore, TraitType, TraitsHandler};
use aura_wire::{
    encode_avatar_data, initial_flags, commit_sent, AvatarRates, AvatarSource, EncodeContext,
    PacketFlags, SendStatus,
};

/// Per-packet payload budget: MTU-sized frame minus the sequence prefix
pub const MAX_AVATAR_DATA_PAYLOAD: usize = 1400 - AVATAR_DATA_SEQUENCE_SIZE;

/// The u16 sequence number prefixed to every snapshot packet
pub const AVATAR_DATA_SEQUENCE_SIZE: usize = 2;

/// Broadcast interfaces the driver writes to. Implementations must not
/// block on trait-store locks; the driver never holds one across a send.
pub trait AvatarTransport {
    /// Broadcast one sequence-prefixed snapshot packet; returns bytes sent
    fn send_avatar_data_packet(&mut self, packet: &[u8]) -> AuraResult<usize>;
    /// Broadcast one identity packet payload; returns bytes sent
    fn send_identity_packet(&mut self, payload: &[u8]) -> AuraResult<usize>;
}

/// Driver configuration
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Snapshot cadence
    pub tick_interval: Duration,
    /// Packet budget handed to the encoder
    pub max_packet_size: usize,
    /// Trait channel budget in bits per second
    pub max_trait_data_rate_bps: u32,
    /// Detail level used by the run loop
    pub detail: AvatarDataDetail,
    /// Fraction of sends forced to full updates
    pub full_update_ratio: f32,
    pub distance_adjust: bool,
    pub viewer_position: Vec3,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            tick_interval: Duration::from_secs(1)
                / CLIENT_TO_AVATAR_MIXER_BROADCAST_FRAMES_PER_SECOND,
            max_packet_size: MAX_AVATAR_DATA_PAYLOAD,
            max_trait_data_rate_bps: 3_000_000,
            detail: AvatarDataDetail::CullSmallData,
            full_update_ratio: AVATAR_SEND_FULL_UPDATE_RATIO,
            distance_adjust: false,
            viewer_position: Vec3::ZERO,
        }
    }
}

/// Running totals for one driver
#[derive(Clone, Debug, Default)]
pub struct DriverStats {
    pub ticks: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub identity_packets_sent: u64,
    pub forced_full_updates: u64,
    pub last_tick_duration: Duration,
}

/// The outbound send driver for one avatar
pub struct OutboundDriver<T: AvatarTransport, H: TraitsHandler> {
    transport: T,
    traits_handler: Option<H>,
    store: Arc<TraitStore>,
    config: DriverConfig,

    send_status: SendStatus,
    last_sent_joints: Vec<JointData>,
    sequence_number: u16,
    next_traits_send_window: Instant,
    epoch: Instant,
    last_send_micros: u64,
    rates: AvatarRates,
    stats: DriverStats,
}

impl<T: AvatarTransport, H: TraitsHandler> OutboundDriver<T, H> {
    pub fn new(
        transport: T,
        traits_handler: Option<H>,
        store: Arc<TraitStore>,
        config: DriverConfig,
    ) -> Self {
        let now = Instant::now();
        OutboundDriver {
            transport,
            traits_handler,
            store,
            config,
            send_status: SendStatus::new(),
            last_sent_joints: Vec::new(),
            sequence_number: 0,
            next_traits_send_window: now,
            epoch: now,
            last_send_micros: 0,
            rates: AvatarRates::new(),
            stats: DriverStats::default(),
        }
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn rates(&self) -> &AvatarRates {
        &self.rates
    }

    pub fn send_status(&self) -> &SendStatus {
        &self.send_status
    }

    /// One full tick: identity, trait window, snapshot, commit
    pub fn send_all_packets<S: AvatarSource>(
        &mut self,
        source: &S,
        detail: AvatarDataDetail,
    ) -> AuraResult<usize> {
        let tick_start = Instant::now();
        self.stats.ticks += 1;
        let mut bytes_sent = 0usize;

        if tick_start >= self.next_traits_send_window {
            if self.store.identity_data_changed() {
                bytes_sent += self.send_identity_packet(source)?;
            }

            if let Some(handler) = self.traits_handler.as_mut() {
                if self.store.take_skeleton_url_changed() {
                    handler.mark_trait_updated(TraitType::SkeletonModelUrl);
                }
                if self.store.take_skeleton_changed() {
                    handler.mark_trait_updated(TraitType::SkeletonData);
                }
                bytes_sent += handler.send_changed_traits_to_mixer();
                self.store.take_entity_data_changed();
                self.store.take_grab_data_changed();
            }

            // Advance the window by how long this burst is worth at the
            // trait channel's rate cap, never letting it lag behind now.
            let bytes_per_ms = (self.config.max_trait_data_rate_bps / 8 / 1000).max(1) as usize;
            self.next_traits_send_window += Duration::from_millis((bytes_sent / bytes_per_ms) as u64);
            if self.next_traits_send_window < tick_start {
                self.next_traits_send_window = tick_start;
            }
        }

        bytes_sent += self.send_avatar_data_packet(source, detail)?;

        self.stats.last_tick_duration = tick_start.elapsed();
        Ok(bytes_sent)
    }

    /// Encode and broadcast one snapshot, then commit sent joints
    pub fn send_avatar_data_packet<S: AvatarSource>(
        &mut self,
        source: &S,
        detail: AvatarDataDetail,
    ) -> AuraResult<usize> {
        // Occasionally transmit everything even if nothing changed, so one
        // lost packet cannot hide a change forever.
        let mut detail = detail;
        if detail != AvatarDataDetail::NoData
            && rand::random::<f32>() < self.config.full_update_ratio
        {
            detail = AvatarDataDetail::SendAllData;
            self.stats.forced_full_updates += 1;
        }

        let flags = if self.send_status.is_complete() {
            let report = source.change_report(self.last_send_micros);
            initial_flags(detail, &report)
        } else {
            PacketFlags::NONE
        };

        let ctx = EncodeContext {
            detail,
            last_sent_joints: &self.last_sent_joints,
            distance_adjust: self.config.distance_adjust,
            viewer_position: self.config.viewer_position,
            max_size: self.config.max_packet_size,
        };
        let payload = encode_avatar_data(
            source,
            flags,
            &ctx,
            &mut self.send_status,
            None,
            Some(&self.rates),
        )?;

        commit_sent(
            source,
            &mut self.last_sent_joints,
            &self.send_status,
            detail.culls_small_changes(),
        );
        self.last_send_micros = self.epoch.elapsed().as_micros() as u64;

        let mut packet = Vec::with_capacity(AVATAR_DATA_SEQUENCE_SIZE + payload.len());
        packet.extend_from_slice(&self.sequence_number.to_le_bytes());
        self.sequence_number = self.sequence_number.wrapping_add(1);
        packet.extend_from_slice(&payload);

        let sent = self.transport.send_avatar_data_packet(&packet)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += sent as u64;
        Ok(sent)
    }

    /// Bump the sequence if identity changed, then broadcast it
    pub fn send_identity_packet<S: AvatarSource>(&mut self, source: &S) -> AuraResult<usize> {
        if self.store.identity_data_changed() {
            self.store.push_identity_sequence();
        }
        let payload = self.store.pack_identity_bytes(source.session_uuid_out());
        let sent = self.transport.send_identity_packet(&payload)?;
        self.store.clear_identity_data_changed();
        self.stats.identity_packets_sent += 1;
        self.stats.bytes_sent += sent as u64;
        Ok(sent)
    }

    /// Drive ticks at the configured cadence until `shutdown` flips true
    pub async fn run<S: AvatarSource>(
        mut self,
        source: Arc<std::sync::RwLock<S>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let detail = self.config.detail;
                    let result = {
                        let source = source
                            .read()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        self.send_all_packets(&*source, detail)
                    };
                    if let Err(error) = result {
                        warn!(%error, "avatar send tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_core::{AdditionalFlags, Quat, SessionUuid};
    use aura_traits::IdentityData;
    use aura_wire::{
        BoundingBox, ChangeReport, FaceTrackerInfo, FarGrabJoints, HandControllers, ParentInfo,
        SensorToWorld,
    };

    struct StaticAvatar {
        report: ChangeReport,
        joints: Vec<JointData>,
    }

    impl Default for StaticAvatar {
        fn default() -> Self {
            StaticAvatar {
                report: ChangeReport::default(),
                joints: Vec::new(),
            }
        }
    }

    impl AvatarSource for StaticAvatar {
        fn session_uuid_out(&self) -> SessionUuid {
            SessionUuid::new([3u8; 16])
        }
        fn global_position_out(&self) -> Vec3 {
            Vec3::new(1.0, 0.0, -1.0)
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
            self.report
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        avatar_packets: Vec<Vec<u8>>,
        identity_packets: Vec<Vec<u8>>,
        order: Vec<&'static str>,
    }

    impl AvatarTransport for RecordingTransport {
        fn send_avatar_data_packet(&mut self, packet: &[u8]) -> AuraResult<usize> {
            self.avatar_packets.push(packet.to_vec());
            self.order.push("avatar");
            Ok(packet.len())
        }
        fn send_identity_packet(&mut self, payload: &[u8]) -> AuraResult<usize> {
            self.identity_packets.push(payload.to_vec());
            self.order.push("identity");
            Ok(payload.len())
        }
    }

    #[derive(Default)]
    struct NullHandler {
        whole_marks: Vec<TraitType>,
        flushes: u64,
    }

    impl TraitsHandler for NullHandler {
        fn mark_trait_updated(&mut self, kind: TraitType) {
            self.whole_marks.push(kind);
        }
        fn mark_instanced_trait_updated(&mut self, _kind: TraitType, _id: aura_core::TraitInstanceId) {}
        fn mark_instanced_trait_deleted(&mut self, _kind: TraitType, _id: aura_core::TraitInstanceId) {}
        fn send_changed_traits_to_mixer(&mut self) -> usize {
            self.flushes += 1;
            0
        }
    }

    fn quiet_config() -> DriverConfig {
        DriverConfig {
            full_update_ratio: 0.0,
            ..DriverConfig::default()
        }
    }

    fn driver_with(
        config: DriverConfig,
    ) -> OutboundDriver<RecordingTransport, NullHandler> {
        OutboundDriver::new(
            RecordingTransport::default(),
            Some(NullHandler::default()),
            Arc::new(TraitStore::new()),
            config,
        )
    }

    #[test]
    fn test_tick_sends_sequenced_snapshot() {
        let mut driver = driver_with(quiet_config());
        let avatar = StaticAvatar::default();

        driver
            .send_all_packets(&avatar, AvatarDataDetail::CullSmallData)
            .unwrap();
        driver
            .send_all_packets(&avatar, AvatarDataDetail::CullSmallData)
            .unwrap();

        let packets = &driver.transport.avatar_packets;
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][0..2], &0u16.to_le_bytes());
        assert_eq!(&packets[1][0..2], &1u16.to_le_bytes());
        // unchanged avatar: mask carries global position only
        let mask = u16::from_le_bytes([packets[0][2], packets[0][3]]);
        assert_eq!(mask & PacketFlags::GLOBAL_POSITION, PacketFlags::GLOBAL_POSITION);
        assert_eq!(mask & PacketFlags::ORIENTATION, 0);
    }

    #[test]
    fn test_identity_goes_out_first_and_once() {
        let mut driver = driver_with(quiet_config());
        let avatar = StaticAvatar::default();

        driver.store.set_identity_data(IdentityData {
            display_name: "Rio".into(),
            ..Default::default()
        });
        let seq_before = driver.store.identity_sequence();

        driver
            .send_all_packets(&avatar, AvatarDataDetail::MinimumData)
            .unwrap();

        assert_eq!(driver.transport.order, vec!["identity", "avatar"]);
        assert!(driver.store.identity_sequence().is_newer_than(seq_before));
        assert!(!driver.store.identity_data_changed());

        driver
            .send_all_packets(&avatar, AvatarDataDetail::MinimumData)
            .unwrap();
        assert_eq!(driver.transport.identity_packets.len(), 1);
    }

    #[test]
    fn test_skeleton_changes_mark_handler() {
        let mut driver = driver_with(quiet_config());
        let avatar = StaticAvatar::default();

        driver.store.set_skeleton_model_url(b"url".to_vec());
        driver.store.set_skeleton(Vec::new());

        driver
            .send_all_packets(&avatar, AvatarDataDetail::MinimumData)
            .unwrap();

        let handler = driver.traits_handler.as_ref().unwrap();
        assert_eq!(
            handler.whole_marks,
            vec![TraitType::SkeletonModelUrl, TraitType::SkeletonData]
        );
        assert_eq!(handler.flushes, 1);
    }

    #[test]
    fn test_trait_window_throttles_identity() {
        // one byte per millisecond of budget makes even a tiny identity
        // packet close the window for tens of milliseconds
        let mut driver = driver_with(DriverConfig {
            max_trait_data_rate_bps: 8_000,
            ..quiet_config()
        });
        let avatar = StaticAvatar::default();

        driver.store.set_identity_data(IdentityData {
            display_name: "Window".into(),
            ..Default::default()
        });
        driver
            .send_all_packets(&avatar, AvatarDataDetail::MinimumData)
            .unwrap();
        assert_eq!(driver.transport.identity_packets.len(), 1);

        // identity changed again, but the window has not reopened
        driver.store.set_identity_data(IdentityData {
            display_name: "Window2".into(),
            ..Default::default()
        });
        driver
            .send_all_packets(&avatar, AvatarDataDetail::MinimumData)
            .unwrap();
        assert_eq!(driver.transport.identity_packets.len(), 1);
        assert!(driver.store.identity_data_changed());
    }

    #[test]
    fn test_forced_full_update_widens_mask() {
        let mut driver = driver_with(DriverConfig {
            full_update_ratio: 1.1, // every send
            ..DriverConfig::default()
        });
        let avatar = StaticAvatar::default();

        driver
            .send_all_packets(&avatar, AvatarDataDetail::CullSmallData)
            .unwrap();

        assert_eq!(driver.stats.forced_full_updates, 1);
        let packet = &driver.transport.avatar_packets[0];
        let mask = u16::from_le_bytes([packet[2], packet[3]]);
        assert_ne!(mask & PacketFlags::ORIENTATION, 0);
        assert_ne!(mask & PacketFlags::BOUNDING_BOX, 0);
    }

    #[test]
    fn test_run_loop_stops_on_shutdown() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let driver = driver_with(DriverConfig {
                tick_interval: Duration::from_millis(1),
                ..quiet_config()
            });
            let avatar = Arc::new(std::sync::RwLock::new(StaticAvatar::default()));
            let (stop, shutdown) = watch::channel(false);

            let handle = tokio::spawn(driver.run(avatar, shutdown));
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.send(true).unwrap();

            let driver = handle.await.unwrap();
            assert!(driver.stats().packets_sent > 0);
        });
    }
}
