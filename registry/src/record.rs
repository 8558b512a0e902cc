//! Companion records
//!
//! A `CompanionRecord` is the persisted description of one tamed companion.
//! It outlives the live actor: when nothing is materialized the record alone
//! carries enough to recreate it.

use serde::{Deserialize, Serialize};

use crate::components::*;
use crate::host::ActorView;

/// Opaque serialized state of a live actor.
pub type Document = serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct CompanionRecord {
    pub id: CompanionId,
    pub owner: Option<PlayerId>,
    /// Cached display name, refreshed whenever a live owner session is seen.
    pub owner_name: String,
    pub name: String,
    pub kind: CompanionKind,
    pub region: RegionId,
    pub position: Vec3,
    /// Lookup key of the live actor; `None` while dormant.
    pub runtime: Option<EntityHandle>,
    pub live_entity_id: i32,
    pub entity_type: EntityTypeId,
    pub health: f32,
    pub max_health: f32,
    pub sitting: bool,
    /// Epoch seconds; 0 means no respawn pending.
    pub respawn_until: i64,
    /// Last captured full state. Once set it is never cleared.
    pub full_state: Option<Document>,
}

/// Where a companion sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanionState {
    Dormant,
    PendingRespawn { remaining_secs: i64 },
    Live,
}

impl CompanionRecord {
    /// First-seen path: copy every live field of the actor.
    pub fn from_actor(actor: &ActorView) -> Self {
        Self {
            id: actor.companion,
            owner: actor.owner,
            owner_name: actor.owner_name.clone().unwrap_or_default(),
            name: actor.name.clone(),
            kind: actor.kind,
            region: actor.handle.region.clone(),
            position: actor.position,
            runtime: Some(actor.handle.clone()),
            live_entity_id: actor.handle.entity_id,
            entity_type: actor.entity_type.clone(),
            health: actor.health,
            max_health: actor.max_health,
            sitting: actor.sitting,
            respawn_until: 0,
            full_state: Some(actor.state.clone()),
        }
    }

    /// Recompute the live fields from an observed actor.
    ///
    /// A pending respawn timer is kept. Only the spawn path and the expiry
    /// scan clear it, so a stale copy seen mid-delay cannot lift the block.
    pub fn refreshed_from(&self, actor: &ActorView) -> Self {
        let mut next = Self::from_actor(actor);
        next.respawn_until = self.respawn_until;
        if actor.owner_name.is_none() {
            next.owner_name = self.owner_name.clone();
        }
        next
    }

    pub fn is_live(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn respawn_remaining(&self, now: i64) -> Option<i64> {
        (self.respawn_until > now).then(|| self.respawn_until - now)
    }

    pub fn state(&self, now: i64) -> CompanionState {
        if self.is_live() {
            CompanionState::Live
        } else if let Some(remaining_secs) = self.respawn_remaining(now) {
            CompanionState::PendingRespawn { remaining_secs }
        } else {
            CompanionState::Dormant
        }
    }

    /// Client-safe projection; drops the full state blob.
    pub fn metadata(&self) -> CompanionMetadata {
        CompanionMetadata {
            id: self.id,
            owner: self.owner,
            owner_name: self.owner_name.clone(),
            name: self.name.clone(),
            kind: self.kind,
            region: self.region.clone(),
            position: self.position,
            live: self.is_live(),
            live_entity_id: self.live_entity_id,
            entity_type: self.entity_type.clone(),
            health: self.health,
            max_health: self.max_health,
            sitting: self.sitting,
            respawn_until: self.respawn_until,
        }
    }
}

/// Whether `new` differs from `old` in any field that justifies a write and
/// a client push. Position and region are excluded; they are captured by
/// forced writes on removal, despawn and death. A dormant/live flip always
/// counts.
///
/// Ownership is compared by value.
pub fn changed(old: &CompanionRecord, new: &CompanionRecord) -> bool {
    old.owner != new.owner
        || old.is_live() != new.is_live()
        || old.name != new.name
        || old.kind != new.kind
        || old.live_entity_id != new.live_entity_id
        || old.health != new.health
        || old.respawn_until != new.respawn_until
        || old.sitting != new.sitting
}

// ============================================================================
// Metadata Projection
// ============================================================================

/// Redacted view of a record, safe to send to clients and list in backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionMetadata {
    pub id: CompanionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerId>,
    pub owner_name: String,
    pub name: String,
    pub kind: CompanionKind,
    pub region: RegionId,
    pub position: Vec3,
    pub live: bool,
    pub live_entity_id: i32,
    pub entity_type: EntityTypeId,
    pub health: f32,
    pub max_health: f32,
    pub sitting: bool,
    pub respawn_until: i64,
}
