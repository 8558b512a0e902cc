//! Companion System - per-world context
//!
//! Owns the store of one loaded world together with the lifecycle manager,
//! the spawn controller and the sync scheduler, and is the single entry
//! point for engine hooks. A host constructs one per world; there is no
//! global instance.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::components::{EntityHandle, PlayerId};
use crate::config::CompanionConfig;
use crate::error::{ConfigError, PersistenceError, SpawnError};
use crate::host::{ActorView, EntityTypeRegistry, Host};
use crate::lifecycle::{LifecycleManager, Observation};
use crate::persistence::{self, StoreDocument};
use crate::record::CompanionRecord;
use crate::spawn::{DeathOutcome, SanitizePolicy, SpawnController, SpawnOutcome, SpawnRequest};
use crate::store::{CompanionStore, LoadReport};

pub struct CompanionSystem {
    config: CompanionConfig,
    store: Arc<CompanionStore>,
    lifecycle: LifecycleManager,
    spawner: SpawnController,
    ticks: u64,
}

impl CompanionSystem {
    /// Fresh system with an empty store.
    pub fn new(config: CompanionConfig) -> Result<Self, ConfigError> {
        Self::with_store(Arc::new(CompanionStore::new()), config)
    }

    pub fn with_store(store: Arc<CompanionStore>, config: CompanionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            lifecycle: LifecycleManager::new(Arc::clone(&store), &config),
            spawner: SpawnController::new(Arc::clone(&store), &config),
            store,
            config,
            ticks: 0,
        })
    }

    /// Swap in a different store, e.g. after restoring a backup. Queued
    /// re-checks and pushes belong to the old store and are discarded.
    pub fn replace_store(&mut self, store: Arc<CompanionStore>) {
        self.lifecycle = LifecycleManager::new(Arc::clone(&store), &self.config);
        self.spawner = SpawnController::new(Arc::clone(&store), &self.config);
        self.store = store;
    }

    pub fn with_sanitize_policy(mut self, policy: SanitizePolicy) -> Self {
        self.spawner = self.spawner.with_sanitize_policy(policy);
        self
    }

    pub fn config(&self) -> &CompanionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CompanionStore> {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    // ========================================================================
    // Engine Hooks
    // ========================================================================

    pub fn on_actor_observed(&mut self, actor: &ActorView) -> Observation {
        self.lifecycle.on_actor_observed(actor)
    }

    /// Damage, healing and similar high-frequency changes.
    pub fn on_actor_changed(&mut self, handle: EntityHandle) {
        self.lifecycle.queue_recheck(handle);
    }

    /// Chunk unload, region change or any other removal that is not death.
    pub fn on_actor_removed_from_world(&mut self, actor: &ActorView) -> Option<CompanionRecord> {
        self.lifecycle.on_actor_removed_from_world(actor)
    }

    pub fn on_death<H: Host>(
        &mut self,
        host: &mut H,
        handle: &EntityHandle,
        now: i64,
    ) -> Result<DeathOutcome, SpawnError> {
        self.spawner.on_death(host, &mut self.lifecycle, handle, now)
    }

    pub fn on_player_connected<H: Host>(&mut self, player: PlayerId, host: &mut H) -> bool {
        self.lifecycle.on_player_connected(player, host)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub fn spawn<H: Host>(
        &mut self,
        host: &mut H,
        request: &SpawnRequest,
        now: i64,
    ) -> Result<SpawnOutcome, SpawnError> {
        self.spawner.spawn(host, &mut self.lifecycle, request, now)
    }

    pub fn despawn<H: Host>(
        &mut self,
        host: &mut H,
        handle: &EntityHandle,
    ) -> Result<Option<CompanionRecord>, SpawnError> {
        self.spawner.despawn(host, &mut self.lifecycle, handle)
    }

    /// One engine tick: expire respawn timers on their interval, drain
    /// re-checks on theirs, then flush pushes.
    pub fn tick<H: Host>(&mut self, host: &mut H, now: i64) {
        self.ticks += 1;
        if self.ticks % self.config.respawn_check_interval_ticks == 0 {
            self.spawner.expire_respawn_timers(&mut self.lifecycle, now);
        }
        self.lifecycle.tick(self.ticks, host);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn save(&self, now: i64) -> StoreDocument {
        self.store.save(now)
    }

    pub fn save_to(&self, path: &Path, now: i64) -> Result<u64, PersistenceError> {
        let document = self.save(now);
        let bytes = persistence::write_document(path, &document)?;
        info!(
            path = %path.display(),
            bytes,
            companions = document.companions.len(),
            "companion store saved"
        );
        Ok(bytes)
    }

    /// Write the world document only if something changed since the last
    /// save. Returns the bytes written.
    pub fn save_if_dirty(&self, path: &Path, now: i64) -> Result<Option<u64>, PersistenceError> {
        if !self.store.is_dirty() {
            return Ok(None);
        }
        match self.save_to(path, now) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                // The snapshot was not persisted; keep the flag for the next try.
                self.store.mark_dirty();
                Err(e)
            }
        }
    }

    /// Replace the current store with the contents of `document`.
    pub fn load(
        &mut self,
        document: &Value,
        types: &impl EntityTypeRegistry,
    ) -> Result<LoadReport, PersistenceError> {
        let (store, report) = CompanionStore::load(document, types)?;
        self.replace_store(Arc::new(store));
        Ok(report)
    }

    pub fn load_from(
        &mut self,
        path: &Path,
        types: &impl EntityTypeRegistry,
    ) -> Result<LoadReport, PersistenceError> {
        let document = persistence::read_document(path)?;
        self.load(&document, types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::*;
    use crate::host::RegionAccess;
    use crate::persistence::tests::scratch_dir;
    use crate::sync::SyncPayload;
    use crate::world::{SimulationWorld, OVERWORLD};
    use serde_json::json;

    const START: i64 = 1_700_000_000;

    fn overworld() -> RegionId {
        RegionId::new(OVERWORLD)
    }

    fn setup() -> (CompanionSystem, SimulationWorld, PlayerId, EntityHandle) {
        let mut system = CompanionSystem::new(CompanionConfig::default()).unwrap();
        let mut world = SimulationWorld::new();
        let player = world.connect_player("Alex", overworld(), Vec3::new(0.5, 64.0, 0.5));
        let handle = world
            .tame(player, "Rex", CompanionKind::Guard, Vec3::new(3.5, 64.0, 0.5))
            .unwrap();
        let actor = world.actor(&handle).unwrap();
        assert_eq!(system.on_actor_observed(&actor), Observation::Registered);
        system.tick(&mut world, START);
        world.take_inbox(player);
        (system, world, player, handle)
    }

    fn summon(id: CompanionId, player: PlayerId) -> SpawnRequest {
        SpawnRequest {
            companion: id.to_string(),
            requester: player,
            region: overworld(),
            position: Vec3::new(0.5, 64.0, 0.5),
        }
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = CompanionConfig {
            respawn_check_interval_ticks: 0,
            ..CompanionConfig::default()
        };
        assert!(matches!(
            CompanionSystem::new(config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_guard_death_and_respawn_scenario() {
        let (mut system, mut world, player, handle) = setup();
        let id = world.actor(&handle).unwrap().companion;

        // Killed with the owner online.
        world.damage(&handle, 20.0);
        let outcome = system.on_death(&mut world, &handle, START).unwrap();
        assert_eq!(outcome, DeathOutcome::PendingRespawn { until: START + 30 });
        system.tick(&mut world, START);

        let inbox = world.take_inbox(player);
        assert_eq!(inbox.len(), 1);
        assert!(matches!(
            &inbox[0],
            SyncPayload::Companion { companion } if companion.respawn_until == START + 30
        ));

        // Too early.
        let request = summon(id, player);
        let err = system.spawn(&mut world, &request, START + 5).unwrap_err();
        assert_eq!(err.to_string(), "companion is resting, 30 or fewer seconds remaining");
        assert_eq!(world.live_count(id), 0);

        // After the delay.
        let outcome = system.spawn(&mut world, &request, START + 30).unwrap();
        let SpawnOutcome::Materialized { position, fallback, .. } = outcome else {
            panic!("expected a fresh actor");
        };
        assert!(!fallback);
        assert_eq!(position, Vec3::new(0.5, 64.0, 0.5));
        assert_eq!(world.live_count(id), 1);

        let record = system.store().get(id).unwrap();
        assert!(record.is_live());
        assert_eq!(record.state(START + 30), crate::record::CompanionState::Live);
    }

    #[test]
    fn test_tick_expires_timers_on_interval() {
        let (mut system, mut world, player, handle) = setup();
        let id = world.actor(&handle).unwrap().companion;
        system.on_death(&mut world, &handle, START).unwrap();
        system.tick(&mut world, START);
        world.take_inbox(player);

        // Ticks 3 through 19 are not scan ticks.
        for _ in 3..20 {
            system.tick(&mut world, START + 60);
        }
        assert_eq!(system.ticks(), 19);
        assert_eq!(system.store().get(id).unwrap().respawn_until, START + 30);

        system.tick(&mut world, START + 60);
        assert_eq!(system.ticks(), 20);
        assert_eq!(system.store().get(id).unwrap().respawn_until, 0);

        let inbox = world.take_inbox(player);
        assert_eq!(inbox.len(), 1);
        assert_eq!(world.live_count(id), 0);
    }

    #[test]
    fn test_damage_is_batched_through_ticks() {
        let (mut system, mut world, _, handle) = setup();
        let id = world.actor(&handle).unwrap().companion;
        let before = system.store().revision();

        for _ in 0..8 {
            world.damage(&handle, 1.0);
            system.on_actor_changed(handle.clone());
        }
        while system.ticks() < 25 {
            system.tick(&mut world, START);
        }
        assert_eq!(system.store().revision(), before + 1);
        assert_eq!(system.store().get(id).unwrap().health, 12.0);
    }

    #[test]
    fn test_save_if_dirty_and_reload() {
        let (mut system, mut world, _, handle) = setup();
        world.set_state_field(&handle, "inventory", json!(["saddle"]));
        system.despawn(&mut world, &handle).unwrap();

        let path = scratch_dir("system").join("companions.json");
        assert!(system.save_if_dirty(&path, START).unwrap().is_some());
        assert!(system.save_if_dirty(&path, START).unwrap().is_none());

        let mut restored = CompanionSystem::new(CompanionConfig::default()).unwrap();
        let report = restored.load_from(&path, &world).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 0);

        let record = restored.store().all().remove(0);
        assert!(!record.is_live());
        assert_eq!(record.full_state.unwrap()["inventory"], json!(["saddle"]));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_push_dropped_when_owner_leaves_before_flush() {
        let (mut system, mut world, player, handle) = setup();
        world.damage(&handle, 3.0);
        system.on_actor_observed(&world.actor(&handle).unwrap());
        assert_eq!(system.lifecycle().sync().pending(), 1);

        world.disconnect_player(player);
        system.tick(&mut world, START);
        assert_eq!(system.lifecycle().sync().pending(), 0);
        assert_eq!(system.lifecycle().sync().dropped(), 1);
        assert!(world.inbox(player).is_empty());

        // The write itself is kept.
        let id = world.actor(&handle).unwrap().companion;
        assert_eq!(system.store().get(id).unwrap().health, 17.0);
    }

    #[test]
    fn test_region_unload_captures_dormant_snapshots() {
        let (mut system, mut world, _, handle) = setup();
        world.teleport(&handle, Vec3::new(12.5, 64.0, 4.5)).unwrap();
        world.set_state_field(&handle, "inventory", json!(["bone"]));

        for actor in world.unload_region(&overworld()) {
            system.on_actor_removed_from_world(&actor);
        }
        assert!(world.unload_region(&overworld()).is_empty());

        let record = system.store().all().remove(0);
        assert!(!record.is_live());
        assert_eq!(record.position, Vec3::new(12.5, 64.0, 4.5));
        assert_eq!(record.full_state.unwrap()["inventory"], json!(["bone"]));
    }

    #[test]
    fn test_custom_sanitize_policy_applies_on_rebuild() {
        let (system, mut world, player, handle) = setup();
        let mut system = system.with_sanitize_policy(
            SanitizePolicy::empty().with_reset("anger", json!(0)),
        );
        let id = world.actor(&handle).unwrap().companion;
        world.set_state_field(&handle, "anger", json!(9));
        world.set_state_field(&handle, "fire_ticks", json!(40));
        system.despawn(&mut world, &handle).unwrap();

        let outcome = system.spawn(&mut world, &summon(id, player), START).unwrap();
        let actor = world.actor(outcome.handle()).unwrap();
        assert_eq!(actor.state["anger"], 0);
        // Not part of this policy, so left as captured.
        assert_eq!(actor.state["fire_ticks"], 40);
    }

    #[test]
    fn test_player_connect_pushes_roster() {
        let (mut system, mut world, player, _) = setup();
        // Tamed but never observed, so not yet registered.
        world.tame(player, "Bolt", CompanionKind::Scout, Vec3::new(5.5, 64.0, 5.5)).unwrap();

        assert!(system.on_player_connected(player, &mut world));
        let inbox = world.take_inbox(player);
        match &inbox[..] {
            [SyncPayload::Roster { roster }] => {
                assert_eq!(roster.owner, player);
                assert_eq!(roster.companions.len(), 1);
                assert_eq!(roster.companions[0].name, "Rex");
            }
            other => panic!("unexpected inbox {:?}", other),
        }
    }
}
