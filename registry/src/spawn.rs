//! Spawn Controller
//!
//! Moves companions between dormant and live while keeping at most one live
//! actor per companion across every loaded region.
//!
//! ```text
//! Dormant --spawn--> Materializing --> Live --despawn/death--> Dormant
//!    ^                                                          |
//!    +------------- PendingRespawn (respawn_until > now) <------+
//! ```
//!
//! The store stays the source of truth: every transition ends in a store
//! write through the lifecycle manager.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::components::*;
use crate::config::CompanionConfig;
use crate::error::SpawnError;
use crate::host::{ActorSpawn, Host, RegionAccess};
use crate::lifecycle::LifecycleManager;
use crate::record::{CompanionRecord, Document};
use crate::store::CompanionStore;

// ============================================================================
// Sanitize-on-resurrect
// ============================================================================

/// Field resets applied to a stored state blob before it is used to rebuild
/// an actor.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizePolicy {
    resets: Vec<(String, Value)>,
}

/// Residual fire, fall damage and motion are cleared; the actor lands on
/// the ground.
pub static DEFAULT_SANITIZE_POLICY: Lazy<SanitizePolicy> = Lazy::new(|| {
    SanitizePolicy::empty()
        .with_reset("fire_ticks", json!(0))
        .with_reset("fall_distance", json!(0.0))
        .with_reset("motion", json!([0.0, 0.0, 0.0]))
        .with_reset("on_ground", json!(true))
});

impl SanitizePolicy {
    pub fn empty() -> Self {
        Self { resets: Vec::new() }
    }

    pub fn with_reset(mut self, field: impl Into<String>, value: Value) -> Self {
        let field = field.into();
        self.resets.retain(|(existing, _)| *existing != field);
        self.resets.push((field, value));
        self
    }

    pub fn resets(&self) -> &[(String, Value)] {
        &self.resets
    }

    /// Overwrite every listed field. A blob that is not an object is replaced
    /// by one holding just the resets.
    pub fn apply(&self, state: &mut Document) {
        if !state.is_object() {
            *state = json!({});
        }
        if let Some(object) = state.as_object_mut() {
            for (field, value) in &self.resets {
                object.insert(field.clone(), value.clone());
            }
        }
    }
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        DEFAULT_SANITIZE_POLICY.clone()
    }
}

// ============================================================================
// Requests and Outcomes
// ============================================================================

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Companion id as typed by the caller; parsed before anything else.
    pub companion: String,
    pub requester: PlayerId,
    pub region: RegionId,
    /// Usually the requester's own position. Also the fallback placement.
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpawnOutcome {
    /// Already live nearby; its movement goal now points at the target.
    Retargeted(EntityHandle),
    /// Already live in the region but far away; moved directly.
    Teleported(EntityHandle),
    /// Rebuilt from the stored record.
    Materialized {
        handle: EntityHandle,
        position: Vec3,
        /// No safe block was found and the requester's position was used.
        fallback: bool,
    },
}

impl SpawnOutcome {
    pub fn handle(&self) -> &EntityHandle {
        match self {
            SpawnOutcome::Retargeted(handle) | SpawnOutcome::Teleported(handle) => handle,
            SpawnOutcome::Materialized { handle, .. } => handle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathOutcome {
    /// Unowned; gone for good.
    Removed,
    PendingRespawn { until: i64 },
}

// ============================================================================
// Controller
// ============================================================================

pub struct SpawnController {
    store: Arc<CompanionStore>,
    respawn_delay_secs: i64,
    near_distance: f64,
    placement_radius: i32,
    sanitize: SanitizePolicy,
}

impl SpawnController {
    pub fn new(store: Arc<CompanionStore>, config: &CompanionConfig) -> Self {
        Self {
            store,
            respawn_delay_secs: config.respawn_delay_secs,
            near_distance: config.near_distance,
            placement_radius: config.placement_radius,
            sanitize: SanitizePolicy::default(),
        }
    }

    pub fn with_sanitize_policy(mut self, policy: SanitizePolicy) -> Self {
        self.sanitize = policy;
        self
    }

    /// Make a companion live at (or near) the requested position.
    ///
    /// Every refusal happens before the store or the world is touched.
    pub fn spawn<H: Host>(
        &self,
        host: &mut H,
        lifecycle: &mut LifecycleManager,
        request: &SpawnRequest,
        now: i64,
    ) -> Result<SpawnOutcome, SpawnError> {
        let id: CompanionId = request
            .companion
            .parse()
            .map_err(|_| SpawnError::InvalidId(request.companion.clone()))?;
        let record = self.store.get(id).ok_or(SpawnError::NotFound(id))?;
        if record.owner != Some(request.requester) {
            return Err(SpawnError::NotOwner(id));
        }
        if let Some(remaining_secs) = record.respawn_remaining(now) {
            return Err(SpawnError::RespawnPending { remaining_secs });
        }

        if record.respawn_until != 0 {
            if let Some((outcome, next)) = self.store.update(id, |r| r.respawn_until = 0) {
                if outcome.is_write() {
                    lifecycle.sync_mut().schedule(next.metadata());
                }
            }
        }

        if let Some(handle) = self.evict_duplicates(host, lifecycle, id, &request.region) {
            return self.relocate(host, lifecycle, handle, request);
        }
        // Eviction captures the evicted actor's terminal state; rebuild from that.
        let record = self.store.get(id).ok_or(SpawnError::NotFound(id))?;
        self.materialize(host, lifecycle, &record, request)
    }

    /// Remove every live copy of `id` outside `keep_region`, and all but one
    /// inside it. Returns the survivor in `keep_region`, if any.
    fn evict_duplicates<H: Host>(
        &self,
        host: &mut H,
        lifecycle: &mut LifecycleManager,
        id: CompanionId,
        keep_region: &RegionId,
    ) -> Option<EntityHandle> {
        let regions = host.loaded_regions();
        let found: Vec<EntityHandle> = {
            let shared: &H = host;
            regions
                .par_iter()
                .flat_map_iter(|region| shared.find_companions(region, id))
                .collect()
        };

        let mut survivor = None;
        for handle in found {
            if survivor.is_none() && handle.region == *keep_region {
                survivor = Some(handle);
                continue;
            }
            if let Some(actor) = host.actor(&handle) {
                lifecycle.on_actor_removed_from_world(&actor);
            }
            host.remove_actor(&handle);
            info!(companion = %id, from = %handle, "evicted duplicate live companion");
        }
        survivor
    }

    fn relocate<H: Host>(
        &self,
        host: &mut H,
        lifecycle: &mut LifecycleManager,
        handle: EntityHandle,
        request: &SpawnRequest,
    ) -> Result<SpawnOutcome, SpawnError> {
        let actor = host
            .actor(&handle)
            .ok_or_else(|| SpawnError::NotLive(handle.clone()))?;

        let outcome = if actor.position.distance(&request.position) <= self.near_distance {
            host.set_move_goal(&handle, request.position)?;
            SpawnOutcome::Retargeted(handle.clone())
        } else {
            host.teleport(&handle, request.position)?;
            SpawnOutcome::Teleported(handle.clone())
        };

        if let Some(actor) = host.actor(&handle) {
            lifecycle.on_actor_observed(&actor);
        }
        Ok(outcome)
    }

    fn materialize<H: Host>(
        &self,
        host: &mut H,
        lifecycle: &mut LifecycleManager,
        record: &CompanionRecord,
        request: &SpawnRequest,
    ) -> Result<SpawnOutcome, SpawnError> {
        if !host.contains_type(&record.entity_type) {
            warn!(
                companion = %record.id,
                entity_type = %record.entity_type,
                "cannot rebuild companion, entity type not registered"
            );
            return Err(SpawnError::UnresolvedType(record.entity_type.clone()));
        }

        let mut state = record.full_state.clone().unwrap_or_else(|| json!({}));
        self.sanitize.apply(&mut state);
        let health = if record.health <= 0.0 {
            record.max_health
        } else {
            record.health
        };

        let placement =
            find_safe_placement(&*host, &request.region, request.position, self.placement_radius);
        let fallback = placement.is_none();
        let position = placement.unwrap_or(request.position);

        let handle = host.create_actor(ActorSpawn {
            companion: record.id,
            owner: record.owner,
            name: record.name.clone(),
            kind: record.kind,
            entity_type: record.entity_type.clone(),
            region: request.region.clone(),
            position,
            health,
            max_health: record.max_health,
            sitting: record.sitting,
            state,
        })?;

        let actor = host
            .actor(&handle)
            .ok_or_else(|| SpawnError::NotLive(handle.clone()))?;
        lifecycle.on_actor_observed(&actor);

        info!(
            companion = %record.id,
            at = %handle,
            fallback,
            "companion materialized"
        );
        Ok(SpawnOutcome::Materialized {
            handle,
            position,
            fallback,
        })
    }

    /// Retire a live actor, capturing its final state first.
    pub fn despawn<H: Host>(
        &self,
        host: &mut H,
        lifecycle: &mut LifecycleManager,
        handle: &EntityHandle,
    ) -> Result<Option<CompanionRecord>, SpawnError> {
        let actor = host
            .actor(handle)
            .ok_or_else(|| SpawnError::NotLive(handle.clone()))?;
        let record = lifecycle.on_actor_removed_from_world(&actor);
        host.remove_actor(handle);
        info!(companion = %actor.companion, from = %handle, "companion despawned");
        Ok(record)
    }

    /// An owned companion that dies is retired healed, placed at its owner
    /// when the owner is in the same region, and blocked from respawning
    /// until the delay elapses. Unowned actors are just removed.
    pub fn on_death<H: Host>(
        &self,
        host: &mut H,
        lifecycle: &mut LifecycleManager,
        handle: &EntityHandle,
        now: i64,
    ) -> Result<DeathOutcome, SpawnError> {
        let actor = host
            .actor(handle)
            .ok_or_else(|| SpawnError::NotLive(handle.clone()))?;
        lifecycle.forget(handle);

        let Some(owner) = actor.owner else {
            host.remove_actor(handle);
            return Ok(DeathOutcome::Removed);
        };

        let mut record = match self.store.get(actor.companion) {
            Some(existing) => existing.refreshed_from(&actor),
            None => CompanionRecord::from_actor(&actor),
        };
        record.runtime = None;
        record.health = record.max_health;
        record.respawn_until = now + self.respawn_delay_secs;
        if let Some((region, position)) = host.player_location(owner) {
            if region == handle.region {
                record.position = position;
            }
        }

        let until = record.respawn_until;
        lifecycle.capture(record);
        host.remove_actor(handle);
        info!(companion = %actor.companion, until, "companion died, respawn pending");
        Ok(DeathOutcome::PendingRespawn { until })
    }

    /// Clear timers that have elapsed and tell owners. Companions become
    /// eligible again but are not materialized. Safe to call any number of
    /// times.
    pub fn expire_respawn_timers(&self, lifecycle: &mut LifecycleManager, now: i64) -> usize {
        let mut expired = 0;
        for id in self.store.respawn_elapsed(now) {
            let updated = self.store.update(id, |r| {
                if r.respawn_until != 0 && r.respawn_until <= now {
                    r.respawn_until = 0;
                }
            });
            if let Some((outcome, next)) = updated {
                if outcome.is_write() {
                    lifecycle.sync_mut().schedule(next.metadata());
                    expired += 1;
                }
            }
        }
        expired
    }
}

// ============================================================================
// Safe Placement
// ============================================================================

fn is_safe_spot(host: &impl RegionAccess, region: &RegionId, feet: BlockPos) -> bool {
    host.block_at(region, feet).is_passable()
        && host.block_at(region, feet.above()).is_passable()
        && host.block_at(region, feet.below()).is_floor()
}

/// Nearest block around `origin` with room for an actor and solid ground
/// below, searching `radius` blocks out horizontally and two up or down.
pub fn find_safe_placement(
    host: &impl RegionAccess,
    region: &RegionId,
    origin: Vec3,
    radius: i32,
) -> Option<Vec3> {
    let center = origin.block();
    let mut offsets = Vec::new();
    for dx in -radius..=radius {
        for dz in -radius..=radius {
            for dy in -2i32..=2 {
                offsets.push((dx, dy, dz));
            }
        }
    }
    offsets.sort_by_key(|&(dx, dy, dz)| (dx * dx + dz * dz, dy.abs(), dy, dx, dz));

    offsets
        .into_iter()
        .map(|(dx, dy, dz)| center.offset(dx, dy, dz))
        .find(|feet| is_safe_spot(host, region, *feet))
        .map(|feet| feet.standing_point())
}
