//! The concurrent trait store
//!
//! Each subcollection sits behind its own lock: the outbound driver reads
//! while inbound processors write, and no lock is ever held across a
//! transport send. Change flags are atomics the driver polls per tick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use aura_core::{
    AuraError, AuraResult, IdentitySequence, SessionUuid, TraitInstanceId,
    MAX_NUM_AVATAR_ENTITIES, MAX_NUM_AVATAR_GRABS,
};

use crate::grab::{hand_for_joint_index, random_instance_id, GrabData};
use crate::identity::{pack_identity, parse_identity, IdentityData};
use crate::kind::{TraitType, TraitsHandler};
use crate::skeleton::{pack_skeleton_data, unpack_skeleton_data, SkeletonJoint};
use aura_core::{Quat, Vec3};

/// Result of processing one inbound identity packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityProcessResult {
    /// False when the packet was stale and ignored
    pub applied: bool,
    pub identity_changed: bool,
    pub display_name_changed: bool,
}

struct IdentityState {
    data: IdentityData,
    sequence: IdentitySequence,
    has_processed_first: bool,
    changed: bool,
}

/// Slow-changing avatar state with per-subcollection locking
pub struct TraitStore {
    skeleton: RwLock<Vec<SkeletonJoint>>,
    skeleton_model_url: RwLock<Vec<u8>>,
    identity: Mutex<IdentityState>,
    entities: RwLock<HashMap<TraitInstanceId, Vec<u8>>>,
    recently_removed: Mutex<HashSet<TraitInstanceId>>,
    grabs: RwLock<HashMap<TraitInstanceId, Vec<u8>>>,

    skeleton_changed: AtomicBool,
    skeleton_url_changed: AtomicBool,
    entity_data_changed: AtomicBool,
    grab_data_changed: AtomicBool,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TraitStore {
    pub fn new() -> Self {
        TraitStore {
            skeleton: RwLock::new(Vec::new()),
            skeleton_model_url: RwLock::new(Vec::new()),
            identity: Mutex::new(IdentityState {
                data: IdentityData::default(),
                sequence: IdentitySequence::new(0),
                has_processed_first: false,
                changed: false,
            }),
            entities: RwLock::new(HashMap::new()),
            recently_removed: Mutex::new(HashSet::new()),
            grabs: RwLock::new(HashMap::new()),
            skeleton_changed: AtomicBool::new(false),
            skeleton_url_changed: AtomicBool::new(false),
            entity_data_changed: AtomicBool::new(false),
            grab_data_changed: AtomicBool::new(false),
        }
    }

    // ---- whole-object traits ----

    pub fn set_skeleton(&self, joints: Vec<SkeletonJoint>) {
        *write_lock(&self.skeleton) = joints;
        self.skeleton_changed.store(true, Ordering::Release);
    }

    pub fn skeleton(&self) -> Vec<SkeletonJoint> {
        read_lock(&self.skeleton).clone()
    }

    pub fn set_skeleton_model_url(&self, url: Vec<u8>) {
        let mut stored = write_lock(&self.skeleton_model_url);
        if *stored != url {
            *stored = url;
            self.skeleton_url_changed.store(true, Ordering::Release);
        }
    }

    pub fn skeleton_model_url(&self) -> Vec<u8> {
        read_lock(&self.skeleton_model_url).clone()
    }

    pub fn take_skeleton_changed(&self) -> bool {
        self.skeleton_changed.swap(false, Ordering::AcqRel)
    }

    pub fn take_skeleton_url_changed(&self) -> bool {
        self.skeleton_url_changed.swap(false, Ordering::AcqRel)
    }

    /// Pack a whole-object trait; `None` for instanced kinds
    pub fn pack_trait(&self, kind: TraitType) -> Option<Vec<u8>> {
        match kind {
            TraitType::SkeletonModelUrl => Some(self.skeleton_model_url()),
            TraitType::SkeletonData => pack_skeleton_data(&read_lock(&self.skeleton)).ok(),
            _ => None,
        }
    }

    /// Pack one instance of an instanced trait; `None` when absent
    pub fn pack_trait_instance(&self, kind: TraitType, id: TraitInstanceId) -> Option<Vec<u8>> {
        match kind {
            TraitType::AvatarEntity => read_lock(&self.entities).get(&id).cloned(),
            TraitType::Grab => read_lock(&self.grabs).get(&id).cloned(),
            _ => None,
        }
    }

    /// Apply an inbound whole-object trait
    pub fn process_trait(&self, kind: TraitType, data: &[u8]) -> AuraResult<()> {
        match kind {
            TraitType::SkeletonModelUrl => {
                *write_lock(&self.skeleton_model_url) = data.to_vec();
                Ok(())
            }
            TraitType::SkeletonData => {
                let joints = unpack_skeleton_data(data)?;
                *write_lock(&self.skeleton) = joints;
                Ok(())
            }
            _ => Err(AuraError::UnknownTraitType(kind.to_byte())),
        }
    }

    /// Apply an inbound instanced-trait update
    pub fn process_trait_instance(
        &self,
        kind: TraitType,
        id: TraitInstanceId,
        data: &[u8],
    ) -> AuraResult<()> {
        match kind {
            TraitType::AvatarEntity => {
                self.store_entity(id, data.to_vec());
                Ok(())
            }
            TraitType::Grab => {
                self.update_grab(id, data.to_vec());
                Ok(())
            }
            _ => Err(AuraError::UnknownTraitType(kind.to_byte())),
        }
    }

    /// Apply an inbound instanced-trait deletion
    pub fn process_deleted_trait_instance(
        &self,
        kind: TraitType,
        id: TraitInstanceId,
    ) -> AuraResult<()> {
        match kind {
            TraitType::AvatarEntity => {
                self.clear_entity(id);
                Ok(())
            }
            TraitType::Grab => {
                self.clear_grab(id);
                Ok(())
            }
            _ => Err(AuraError::UnknownTraitType(kind.to_byte())),
        }
    }

    // ---- entities ----

    /// Insert or replace an entity payload. Inserts past the cap are
    /// dropped; an update to a previously deleted id revives it and clears
    /// its delete mark. Returns whether anything changed.
    pub fn store_entity(&self, id: TraitInstanceId, data: Vec<u8>) -> bool {
        let mut changed = false;
        {
            let mut entities = write_lock(&self.entities);
            match entities.get_mut(&id) {
                Some(existing) => {
                    *existing = data;
                    changed = true;
                }
                None => {
                    if entities.len() < MAX_NUM_AVATAR_ENTITIES {
                        entities.insert(id, data);
                        changed = true;
                    } else {
                        warn!(
                            cap = MAX_NUM_AVATAR_ENTITIES,
                            "dropping avatar entity, limit reached"
                        );
                    }
                }
            }
        }

        if changed {
            mutex_lock(&self.recently_removed).remove(&id);
            self.entity_data_changed.store(true, Ordering::Release);
        }
        changed
    }

    /// Remove an entity and mark its id recently removed
    pub fn clear_entity(&self, id: TraitInstanceId) -> bool {
        let removed = write_lock(&self.entities).remove(&id).is_some();
        mutex_lock(&self.recently_removed).insert(id);
        self.entity_data_changed.store(true, Ordering::Release);
        removed
    }

    /// Atomically read and clear the recently-removed id set
    pub fn take_recently_removed(&self) -> HashSet<TraitInstanceId> {
        std::mem::take(&mut *mutex_lock(&self.recently_removed))
    }

    pub fn entity_ids(&self) -> Vec<TraitInstanceId> {
        read_lock(&self.entities).keys().copied().collect()
    }

    pub fn entity_count(&self) -> usize {
        read_lock(&self.entities).len()
    }

    pub fn take_entity_data_changed(&self) -> bool {
        self.entity_data_changed.swap(false, Ordering::AcqRel)
    }

    // ---- grabs ----

    /// Insert or replace a grab payload, with the same cap and revive
    /// semantics as entities. Returns whether anything changed.
    pub fn update_grab(&self, id: TraitInstanceId, data: Vec<u8>) -> bool {
        let mut changed = false;
        {
            let mut grabs = write_lock(&self.grabs);
            match grabs.get_mut(&id) {
                Some(existing) => {
                    if *existing != data {
                        *existing = data;
                        changed = true;
                    }
                }
                None => {
                    if grabs.len() < MAX_NUM_AVATAR_GRABS {
                        grabs.insert(id, data);
                        changed = true;
                    } else {
                        warn!(
                            cap = MAX_NUM_AVATAR_GRABS,
                            "cannot create more grabs on avatar, limit reached"
                        );
                    }
                }
            }
        }
        if changed {
            self.grab_data_changed.store(true, Ordering::Release);
        }
        changed
    }

    pub fn clear_grab(&self, id: TraitInstanceId) -> bool {
        let removed = write_lock(&self.grabs).remove(&id).is_some();
        if removed {
            self.grab_data_changed.store(true, Ordering::Release);
        }
        removed
    }

    pub fn grab_ids(&self) -> Vec<TraitInstanceId> {
        read_lock(&self.grabs).keys().copied().collect()
    }

    pub fn grab_count(&self) -> usize {
        read_lock(&self.grabs).len()
    }

    pub fn take_grab_data_changed(&self) -> bool {
        self.grab_data_changed.swap(false, Ordering::AcqRel)
    }

    /// Start a grab: allocate an instance id, store the encoded grab, and
    /// mark the instanced trait updated. Returns the new grab id.
    pub fn grab(
        &self,
        owner: SessionUuid,
        target: TraitInstanceId,
        parent_joint_index: i32,
        positional_offset: Vec3,
        rotational_offset: Quat,
        handler: Option<&mut dyn TraitsHandler>,
    ) -> TraitInstanceId {
        let grab_id = random_instance_id();
        let grab = GrabData {
            owner,
            target,
            parent_joint_index,
            hand: hand_for_joint_index(parent_joint_index),
            positional_offset,
            rotational_offset,
        };

        let changed = self.update_grab(grab_id, grab.to_bytes());
        if changed {
            if let Some(handler) = handler {
                handler.mark_instanced_trait_updated(TraitType::Grab, grab_id);
            }
        }
        grab_id
    }

    /// End a grab; returns whether it existed. The caller's removal hook
    /// runs before the handler learns about the deletion.
    pub fn release_grab(
        &self,
        grab_id: TraitInstanceId,
        mut on_removed: impl FnMut(TraitInstanceId),
        handler: Option<&mut dyn TraitsHandler>,
    ) -> bool {
        let removed = self.clear_grab(grab_id);
        if removed {
            on_removed(grab_id);
            if let Some(handler) = handler {
                handler.mark_instanced_trait_deleted(TraitType::Grab, grab_id);
            }
        }
        removed
    }

    /// Re-mark every stored instance updated, for mixer handoff
    pub fn prepare_reset_trait_instances(&self, handler: &mut dyn TraitsHandler) {
        for id in self.entity_ids() {
            handler.mark_instanced_trait_updated(TraitType::AvatarEntity, id);
        }
        for id in self.grab_ids() {
            handler.mark_instanced_trait_updated(TraitType::Grab, id);
        }
    }

    // ---- identity ----

    pub fn identity_data(&self) -> IdentityData {
        mutex_lock(&self.identity).data.clone()
    }

    /// Replace the outbound identity record, marking it changed if different
    pub fn set_identity_data(&self, data: IdentityData) {
        let mut identity = mutex_lock(&self.identity);
        if identity.data != data {
            identity.data = data;
            identity.changed = true;
        }
    }

    pub fn identity_sequence(&self) -> IdentitySequence {
        mutex_lock(&self.identity).sequence
    }

    /// Advance the outbound identity sequence (called when identity changed)
    pub fn push_identity_sequence(&self) -> IdentitySequence {
        let mut identity = mutex_lock(&self.identity);
        identity.sequence = identity.sequence.next();
        identity.sequence
    }

    pub fn identity_data_changed(&self) -> bool {
        mutex_lock(&self.identity).changed
    }

    pub fn clear_identity_data_changed(&self) {
        mutex_lock(&self.identity).changed = false;
    }

    /// Serialize the identity packet payload for this avatar
    pub fn pack_identity_bytes(&self, session_uuid: SessionUuid) -> Vec<u8> {
        let identity = mutex_lock(&self.identity);
        pack_identity(session_uuid, identity.sequence, &identity.data)
    }

    /// Apply one inbound identity packet
    ///
    /// The first packet for a session bootstraps the stored sequence so it
    /// always applies; afterwards only newer sequences do, and stale ones
    /// are ignored without touching state.
    pub fn process_identity(&self, data: &[u8]) -> AuraResult<IdentityProcessResult> {
        let (_session, incoming_sequence, incoming) = parse_identity(data)?;

        let mut identity = mutex_lock(&self.identity);

        if !identity.has_processed_first {
            identity.sequence = incoming_sequence.previous();
            identity.has_processed_first = true;
        }

        if !incoming_sequence.is_newer_than(identity.sequence) {
            return Ok(IdentityProcessResult::default());
        }

        identity.sequence = incoming_sequence;
        let identity_changed = incoming != identity.data;
        let display_name_changed = incoming.display_name != identity.data.display_name;
        identity.data = incoming;

        Ok(IdentityProcessResult {
            applied: true,
            identity_changed,
            display_name_changed,
        })
    }
}

impl Default for TraitStore {
    fn default() -> Self {
        TraitStore::new()
    }
}
