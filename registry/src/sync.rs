//! Sync Scheduler
//!
//! Pushes metadata to owning clients. Single-record pushes are queued,
//! coalesced per companion and flushed on a tick interval; full rosters go
//! out immediately on connect. Nothing sent from here ever carries a state
//! blob.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::components::{CompanionId, PlayerId};
use crate::host::PlayerSessions;
use crate::persistence::OwnerExport;
use crate::record::CompanionMetadata;

/// What a client receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncPayload {
    /// One companion changed.
    Companion { companion: CompanionMetadata },
    /// Everything the player owns.
    Roster { roster: OwnerExport },
}

#[derive(Debug)]
pub struct SyncScheduler {
    interval_ticks: u64,
    queued: BTreeMap<PlayerId, BTreeMap<CompanionId, CompanionMetadata>>,
    delivered: u64,
    dropped: u64,
}

impl SyncScheduler {
    pub fn new(interval_ticks: u64) -> Self {
        Self {
            interval_ticks: interval_ticks.max(1),
            queued: BTreeMap::new(),
            delivered: 0,
            dropped: 0,
        }
    }

    /// Queue a single-record push. A later schedule for the same companion
    /// replaces the earlier one. Unowned companions are never synced.
    pub fn schedule(&mut self, metadata: CompanionMetadata) {
        if let Some(owner) = metadata.owner {
            self.queued.entry(owner).or_default().insert(metadata.id, metadata);
        }
    }

    pub fn pending(&self) -> usize {
        self.queued.values().map(BTreeMap::len).sum()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Flush if `tick` falls on the interval. Returns pushes delivered.
    pub fn on_tick(&mut self, tick: u64, sessions: &mut impl PlayerSessions) -> usize {
        if tick % self.interval_ticks == 0 {
            self.flush(sessions)
        } else {
            0
        }
    }

    /// Deliver everything queued. Pushes for disconnected owners are dropped.
    pub fn flush(&mut self, sessions: &mut impl PlayerSessions) -> usize {
        let mut delivered = 0;
        for (owner, companions) in std::mem::take(&mut self.queued) {
            for (_, companion) in companions {
                if sessions.deliver(owner, &SyncPayload::Companion { companion }) {
                    delivered += 1;
                } else {
                    debug!(%owner, "owner not connected, dropping companion push");
                    self.dropped += 1;
                }
            }
        }
        self.delivered += delivered as u64;
        delivered
    }

    /// Send the owner's whole roster now. Queued single-record pushes for
    /// that owner are superseded and discarded.
    pub fn push_roster(&mut self, roster: OwnerExport, sessions: &mut impl PlayerSessions) -> bool {
        let owner = roster.owner;
        self.queued.remove(&owner);
        if sessions.deliver(owner, &SyncPayload::Roster { roster }) {
            self.delivered += 1;
            true
        } else {
            debug!(%owner, "owner not connected, dropping roster push");
            self.dropped += 1;
            false
        }
    }
}
