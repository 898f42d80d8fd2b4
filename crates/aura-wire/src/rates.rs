//! Byte and update rate meters, queryable by section name
//!
//! Increments are atomic so the decoder thread and rate queries never
//! contend on the hot path; smoothing state sits behind a mutex that only
//! the querying side touches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const SMOOTHING: f32 = 0.5;
const MIN_WINDOW_SECS: f32 = 0.1;

/// A monotonically incremented counter with a smoothed per-second rate
pub struct RateMeter {
    count: AtomicU64,
    window: Mutex<MeterWindow>,
}

struct MeterWindow {
    anchor: Instant,
    counted: u64,
    rate: f32,
}

impl RateMeter {
    pub fn new() -> Self {
        RateMeter {
            count: AtomicU64::new(0),
            window: Mutex::new(MeterWindow {
                anchor: Instant::now(),
                counted: 0,
                rate: 0.0,
            }),
        }
    }

    /// Add `n` events (or bytes) to the counter
    #[inline]
    pub fn increment(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Add a single event
    #[inline]
    pub fn mark(&self) {
        self.increment(1);
    }

    /// Lifetime total
    pub fn total(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Smoothed events per second
    pub fn rate(&self) -> f32 {
        let total = self.total();
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let elapsed = window.anchor.elapsed().as_secs_f32();
        if elapsed >= MIN_WINDOW_SECS {
            let fresh = (total - window.counted) as f32 / elapsed;
            window.rate = if window.rate == 0.0 {
                fresh
            } else {
                window.rate * (1.0 - SMOOTHING) + fresh * SMOOTHING
            };
            window.counted = total;
            window.anchor = Instant::now();
        }
        window.rate
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        RateMeter::new()
    }
}

/// Byte and update meters for one snapshot section
#[derive(Default)]
pub struct SectionRates {
    pub bytes: RateMeter,
    pub updates: RateMeter,
}

impl SectionRates {
    /// Record one section occurrence of `n` bytes
    pub fn record(&self, n: usize) {
        self.bytes.increment(n as u64);
        self.updates.mark();
    }
}

/// All inbound section meters plus the outbound byte meters
#[derive(Default)]
pub struct AvatarRates {
    /// Whole-buffer totals, keyed by the empty name
    pub parse: SectionRates,

    pub global_position: SectionRates,
    pub bounding_box: SectionRates,
    pub orientation: SectionRates,
    pub scale: SectionRates,
    pub look_at_position: SectionRates,
    pub audio_loudness: SectionRates,
    pub sensor_to_world: SectionRates,
    pub additional_flags: SectionRates,
    pub parent_info: SectionRates,
    pub local_position: SectionRates,
    pub hand_controllers: SectionRates,
    pub face_tracker: SectionRates,
    pub joint_data: SectionRates,
    pub joint_default_pose_flags: SectionRates,
    pub far_grab_joints: SectionRates,

    pub outbound: OutboundRates,
}

/// Outbound per-section byte meters
#[derive(Default)]
pub struct OutboundRates {
    pub global_position: RateMeter,
    pub bounding_box: RateMeter,
    pub orientation: RateMeter,
    pub scale: RateMeter,
    pub look_at_position: RateMeter,
    pub audio_loudness: RateMeter,
    pub sensor_to_world: RateMeter,
    pub additional_flags: RateMeter,
    pub parent_info: RateMeter,
    pub local_position: RateMeter,
    pub hand_controllers: RateMeter,
    pub face_tracker: RateMeter,
    pub joint_data: RateMeter,
    pub joint_default_pose_flags: RateMeter,
    pub far_grab_joints: RateMeter,
}

const BYTES_PER_KIB: f32 = 1024.0;

impl AvatarRates {
    pub fn new() -> Self {
        AvatarRates::default()
    }

    fn inbound_section(&self, name: &str) -> Option<&SectionRates> {
        Some(match name {
            "" => &self.parse,
            "globalPosition" => &self.global_position,
            "avatarBoundingBox" => &self.bounding_box,
            "avatarOrientation" => &self.orientation,
            "avatarScale" => &self.scale,
            "lookAtPosition" => &self.look_at_position,
            "audioLoudness" => &self.audio_loudness,
            "sensorToWorldMatrix" => &self.sensor_to_world,
            "additionalFlags" => &self.additional_flags,
            "parentInfo" => &self.parent_info,
            "localPosition" => &self.local_position,
            "handControllers" => &self.hand_controllers,
            "faceTracker" => &self.face_tracker,
            "jointData" => &self.joint_data,
            "jointDefaultPoseFlags" => &self.joint_default_pose_flags,
            "farGrabJoints" => &self.far_grab_joints,
            _ => return None,
        })
    }

    fn outbound_meter(&self, name: &str) -> Option<&RateMeter> {
        Some(match name {
            "globalPosition" => &self.outbound.global_position,
            "avatarBoundingBox" => &self.outbound.bounding_box,
            "avatarOrientation" => &self.outbound.orientation,
            "avatarScale" => &self.outbound.scale,
            "lookAtPosition" => &self.outbound.look_at_position,
            "audioLoudness" => &self.outbound.audio_loudness,
            "sensorToWorldMatrix" => &self.outbound.sensor_to_world,
            "additionalFlags" => &self.outbound.additional_flags,
            "parentInfo" => &self.outbound.parent_info,
            "localPosition" => &self.outbound.local_position,
            "handControllers" => &self.outbound.hand_controllers,
            "faceTracker" => &self.outbound.face_tracker,
            "jointData" => &self.outbound.joint_data,
            "jointDefaultPoseFlags" => &self.outbound.joint_default_pose_flags,
            "farGrabJoints" => &self.outbound.far_grab_joints,
            _ => return None,
        })
    }

    /// Smoothed byte rate in KiB/s for the named section; names suffixed
    /// with `Outbound` query the encode side.
    pub fn data_rate(&self, name: &str) -> f32 {
        let bytes_per_second = if let Some(inbound) = name.strip_suffix("Outbound") {
            self.outbound_meter(inbound).map(|m| m.rate())
        } else {
            self.inbound_section(name).map(|s| s.bytes.rate())
        };
        bytes_per_second.unwrap_or(0.0) / BYTES_PER_KIB
    }

    /// Smoothed update rate in events per second for the named section
    pub fn update_rate(&self, name: &str) -> f32 {
        self.inbound_section(name)
            .map(|s| s.updates.rate())
            .unwrap_or(0.0)
    }

    /// Average inbound payload bytes per second
    pub fn average_bytes_received_per_second(&self) -> f32 {
        self.parse.bytes.rate()
    }

    /// Inbound packets per second
    pub fn receive_rate(&self) -> f32 {
        self.parse.updates.rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_meter_counts() {
        let meter = RateMeter::new();
        meter.increment(10);
        meter.mark();
        assert_eq!(meter.total(), 11);
    }

    #[test]
    fn test_meter_rate_settles() {
        let meter = RateMeter::new();
        meter.increment(1000);
        sleep(Duration::from_millis(120));
        let rate = meter.rate();
        assert!(rate > 0.0);
        // nothing new counted, rate decays toward zero
        sleep(Duration::from_millis(120));
        assert!(meter.rate() < rate);
    }

    #[test]
    fn test_named_queries() {
        let rates = AvatarRates::new();
        rates.joint_data.record(600);
        rates.outbound.joint_data.increment(1200);

        sleep(Duration::from_millis(120));
        assert!(rates.data_rate("jointData") > 0.0);
        assert!(rates.data_rate("jointDataOutbound") > 0.0);
        assert!(rates.update_rate("jointData") > 0.0);
        assert_eq!(rates.data_rate("noSuchSection"), 0.0);
    }
}
