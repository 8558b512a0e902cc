//! Lifecycle Manager
//!
//! Turns engine lifecycle events into store writes and client pushes.
//! High-frequency events (damage, healing) only mark an actor for a batched
//! re-check, which runs once every `recheck_interval_ticks`.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::components::{EntityHandle, PlayerId};
use crate::config::CompanionConfig;
use crate::host::{ActorView, Host, RegionAccess};
use crate::record::CompanionRecord;
use crate::store::{CompanionStore, UpsertOutcome};
use crate::sync::SyncScheduler;

/// Result of observing a live actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Untamed actor; not tracked here.
    Ignored,
    Registered,
    Updated,
    Unchanged,
}

pub struct LifecycleManager {
    store: Arc<CompanionStore>,
    sync: SyncScheduler,
    recheck_interval_ticks: u64,
    pending: HashSet<EntityHandle>,
}

impl LifecycleManager {
    pub fn new(store: Arc<CompanionStore>, config: &CompanionConfig) -> Self {
        Self {
            store,
            sync: SyncScheduler::new(config.sync_interval_ticks),
            recheck_interval_ticks: config.recheck_interval_ticks.max(1),
            pending: HashSet::new(),
        }
    }

    pub fn store(&self) -> &Arc<CompanionStore> {
        &self.store
    }

    pub fn sync(&self) -> &SyncScheduler {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncScheduler {
        &mut self.sync
    }

    /// Register a first-seen companion or refresh an existing record.
    pub fn on_actor_observed(&mut self, actor: &ActorView) -> Observation {
        if actor.owner.is_none() {
            return Observation::Ignored;
        }

        let record = match self.store.get(actor.companion) {
            Some(existing) => existing.refreshed_from(actor),
            None => CompanionRecord::from_actor(actor),
        };
        let metadata = record.metadata();

        match self.store.upsert(record) {
            UpsertOutcome::Inserted => {
                info!(
                    companion = %actor.companion,
                    name = %actor.name,
                    kind = %actor.kind,
                    "companion registered"
                );
                self.sync.schedule(metadata);
                Observation::Registered
            }
            UpsertOutcome::Updated => {
                self.sync.schedule(metadata);
                Observation::Updated
            }
            UpsertOutcome::Unchanged => Observation::Unchanged,
        }
    }

    /// Final forced update before the actor goes away. The stored record
    /// ends up dormant with the actor's terminal health and position.
    pub fn on_actor_removed_from_world(&mut self, actor: &ActorView) -> Option<CompanionRecord> {
        self.pending.remove(&actor.handle);
        if actor.owner.is_none() {
            return None;
        }

        let mut record = match self.store.get(actor.companion) {
            Some(existing) => existing.refreshed_from(actor),
            None => CompanionRecord::from_actor(actor),
        };
        record.runtime = None;
        self.capture(record.clone());
        Some(record)
    }

    /// Forced write of a terminal snapshot, followed by a push to the owner.
    pub(crate) fn capture(&mut self, record: CompanionRecord) {
        let metadata = record.metadata();
        self.store.put(record);
        self.sync.schedule(metadata);
    }

    /// Note a high-frequency change; the actor is re-read on the next drain.
    pub fn queue_recheck(&mut self, handle: EntityHandle) {
        self.pending.insert(handle);
    }

    /// Drop a queued re-check for an actor that is about to go away.
    pub(crate) fn forget(&mut self, handle: &EntityHandle) {
        self.pending.remove(handle);
    }

    pub fn pending_rechecks(&self) -> usize {
        self.pending.len()
    }

    /// Re-observe every queued actor once. Actors that vanished meanwhile
    /// are skipped. Draining an empty set does nothing.
    pub fn drain_rechecks(&mut self, host: &impl RegionAccess) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let handles: Vec<EntityHandle> = self.pending.drain().collect();
        let mut accepted = 0;
        for handle in &handles {
            if let Some(actor) = host.actor(handle) {
                if matches!(
                    self.on_actor_observed(&actor),
                    Observation::Registered | Observation::Updated
                ) {
                    accepted += 1;
                }
            }
        }
        debug!(drained = handles.len(), accepted, "companion re-check batch");
        accepted
    }

    /// Per-tick work: batched re-checks on their interval, then sync.
    pub fn tick(&mut self, tick: u64, host: &mut impl Host) {
        if tick % self.recheck_interval_ticks == 0 {
            self.drain_rechecks(&*host);
        }
        self.sync.on_tick(tick, host);
    }

    /// Session start (login or region change): refresh the cached owner name
    /// and push the full roster.
    pub fn on_player_connected(&mut self, player: PlayerId, host: &mut impl Host) -> bool {
        if let Some(name) = host.player_name(player) {
            for mut record in self.store.get_by_owner(player) {
                if record.owner_name != name {
                    record.owner_name = name.clone();
                    self.store.put(record);
                }
            }
        }
        let roster = self.store.export_for_owner(player);
        self.sync.push_roster(roster, host)
    }
}
