//! Companion Store - the authoritative registry
//!
//! One store exists per loaded world. It holds every companion record keyed
//! by id plus a secondary index from owner to companion ids. Both maps sit
//! behind a single lock so a reader never sees a record without its index
//! entry or the reverse.
//!
//! The store does no disk I/O of its own. Writes flip a dirty flag that the
//! host's save cycle consumes.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::components::{CompanionId, PlayerId};
use crate::error::PersistenceError;
use crate::host::EntityTypeRegistry;
use crate::persistence::{CompanionDocument, OwnerExport, StoreDocument, SCHEMA_VERSION};
use crate::record::{changed, CompanionRecord};

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Nothing meaningful differed; the stored record was left alone.
    Unchanged,
}

impl UpsertOutcome {
    pub fn is_write(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

/// Summary of a `load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    pub last_update: i64,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<CompanionId, CompanionRecord>,
    by_owner: HashMap<PlayerId, HashSet<CompanionId>>,
}

impl StoreInner {
    /// Insert or replace, moving the owner-index entry if ownership changed.
    fn insert(&mut self, mut record: CompanionRecord) -> UpsertOutcome {
        let id = record.id;
        let new_owner = record.owner;
        let previous = self.records.remove(&id);
        let old_owner = previous.as_ref().and_then(|r| r.owner);

        if let Some(prev) = &previous {
            if record.full_state.is_none() {
                record.full_state = prev.full_state.clone();
            }
        }

        if old_owner != new_owner {
            if let Some(owner) = old_owner {
                if let Some(ids) = self.by_owner.get_mut(&owner) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_owner.remove(&owner);
                    }
                }
            }
        }
        if let Some(owner) = new_owner {
            // Also recreates an index entry that went missing.
            self.by_owner.entry(owner).or_default().insert(id);
        }

        self.records.insert(id, record);
        if previous.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        }
    }

    fn remove(&mut self, id: CompanionId) -> Option<CompanionRecord> {
        let record = self.records.remove(&id)?;
        if let Some(owner) = record.owner {
            if let Some(ids) = self.by_owner.get_mut(&owner) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_owner.remove(&owner);
                }
            }
        }
        Some(record)
    }
}

pub struct CompanionStore {
    inner: RwLock<StoreInner>,
    dirty: AtomicBool,
    revision: AtomicU64,
    last_update: AtomicI64,
}

impl CompanionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            dirty: AtomicBool::new(false),
            revision: AtomicU64::new(0),
            last_update: AtomicI64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called with the write lock still held so `save` can't clear a flag
    /// for a write it did not see.
    fn mark_written(&self) {
        self.dirty.store(true, Ordering::Release);
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, id: CompanionId) -> Option<CompanionRecord> {
        self.read().records.get(&id).cloned()
    }

    pub fn contains(&self, id: CompanionId) -> bool {
        self.read().records.contains_key(&id)
    }

    /// All records owned by `owner`, ordered by name then id.
    pub fn get_by_owner(&self, owner: PlayerId) -> Vec<CompanionRecord> {
        let inner = self.read();
        let mut records: Vec<CompanionRecord> = inner
            .by_owner
            .get(&owner)
            .map(|ids| ids.iter().filter_map(|id| inner.records.get(id).cloned()).collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        records
    }

    /// Every record, ordered by owner name, name, then id.
    pub fn all(&self) -> Vec<CompanionRecord> {
        let mut records: Vec<CompanionRecord> = self.read().records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.owner_name
                .cmp(&b.owner_name)
                .then(a.name.cmp(&b.name))
                .then(a.id.cmp(&b.id))
        });
        records
    }

    /// Ids whose respawn timer is set and has run out at `now`.
    pub fn respawn_elapsed(&self, now: i64) -> Vec<CompanionId> {
        self.read()
            .records
            .values()
            .filter(|r| r.respawn_until != 0 && r.respawn_until <= now)
            .map(|r| r.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clear the dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Re-arm the flag after a save that failed to reach disk.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Count of accepted writes since construction.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn last_update(&self) -> i64 {
        self.last_update.load(Ordering::Acquire)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert `record`, or overwrite the stored one only if it changed in a
    /// meaningful way. A missing state blob on `record` keeps the stored one.
    ///
    /// An unchanged record still refreshes the stored state blob, without
    /// counting as a write.
    pub fn upsert(&self, record: CompanionRecord) -> UpsertOutcome {
        let mut inner = self.write();
        if let Some(old) = inner.records.get_mut(&record.id) {
            if !changed(old, &record) {
                if record.full_state.is_some() {
                    old.full_state = record.full_state;
                }
                debug!(companion = %record.id, "upsert unchanged");
                return UpsertOutcome::Unchanged;
            }
        }
        let outcome = inner.insert(record);
        self.mark_written();
        outcome
    }

    /// Unconditional write for terminal snapshots (removal, despawn, death).
    pub fn put(&self, record: CompanionRecord) -> UpsertOutcome {
        let mut inner = self.write();
        let outcome = inner.insert(record);
        self.mark_written();
        outcome
    }

    /// Read-modify-write of one record under a single lock, subject to the
    /// same changed-check as `upsert`. `None` if the id is unknown.
    pub fn update<F>(&self, id: CompanionId, f: F) -> Option<(UpsertOutcome, CompanionRecord)>
    where
        F: FnOnce(&mut CompanionRecord),
    {
        let mut inner = self.write();
        let old = inner.records.get(&id)?;
        let mut next = old.clone();
        f(&mut next);
        next.id = id;
        if !changed(old, &next) {
            return Some((UpsertOutcome::Unchanged, next));
        }
        let outcome = inner.insert(next.clone());
        self.mark_written();
        Some((outcome, next))
    }

    /// Administrative deletion. Normal gameplay never removes records.
    pub fn remove(&self, id: CompanionId) -> Option<CompanionRecord> {
        let mut inner = self.write();
        let removed = inner.remove(id);
        if removed.is_some() {
            self.mark_written();
            info!(companion = %id, "companion record removed");
        }
        removed
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Snapshot the whole store, state blobs included, and clear the dirty
    /// flag. `last_update` is strictly greater than the previous save's.
    pub fn save(&self, now: i64) -> StoreDocument {
        let inner = self.read();
        self.dirty.store(false, Ordering::Release);

        let mut previous = self.last_update.load(Ordering::Acquire);
        let stamp = loop {
            let next = now.max(previous + 1);
            match self.last_update.compare_exchange(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break next,
                Err(current) => previous = current,
            }
        };

        let mut companions: Vec<CompanionDocument> =
            inner.records.values().map(CompanionDocument::from_record).collect();
        companions.sort_by(|a, b| a.id.cmp(&b.id));

        StoreDocument {
            version: SCHEMA_VERSION,
            last_update: stamp,
            companions,
        }
    }

    /// Rebuild a store from a saved document.
    ///
    /// Individual records that fail to parse, carry a malformed id or name an
    /// entity type the host does not know are skipped with a warning. Only a
    /// document that is not a store document at all is an error.
    pub fn load(
        document: &Value,
        types: &impl EntityTypeRegistry,
    ) -> Result<(Self, LoadReport), PersistenceError> {
        let object = document
            .as_object()
            .ok_or_else(|| PersistenceError::MalformedDocument("expected an object".into()))?;

        if let Some(version) = object.get("version").and_then(Value::as_u64) {
            if version != SCHEMA_VERSION as u64 {
                return Err(PersistenceError::MalformedDocument(format!(
                    "unsupported version {}",
                    version
                )));
            }
        }

        let last_update = object.get("last_update").and_then(Value::as_i64).unwrap_or(0);
        let entries: &[Value] = match object.get("companions") {
            Some(Value::Array(entries)) => entries.as_slice(),
            None => &[],
            Some(_) => {
                return Err(PersistenceError::MalformedDocument(
                    "companions is not a list".into(),
                ))
            }
        };

        let store = Self::new();
        let mut report = LoadReport {
            last_update,
            ..LoadReport::default()
        };
        {
            let mut inner = store.write();
            for (index, entry) in entries.iter().enumerate() {
                let parsed = serde_json::from_value::<CompanionDocument>(entry.clone())
                    .map_err(|e| e.to_string())
                    .and_then(|doc| doc.into_record(types));

                match parsed {
                    Ok(record) if inner.records.contains_key(&record.id) => {
                        warn!(index, companion = %record.id, "skipping duplicate companion id");
                        report.skipped += 1;
                    }
                    Ok(record) => {
                        inner.insert(record);
                        report.loaded += 1;
                    }
                    Err(reason) => {
                        warn!(index, %reason, "skipping corrupt companion record");
                        report.skipped += 1;
                    }
                }
            }
        }
        store.last_update.store(last_update, Ordering::Release);

        info!(
            loaded = report.loaded,
            skipped = report.skipped,
            "companion store loaded"
        );
        Ok((store, report))
    }

    /// Metadata-only projection of everything `owner` owns.
    pub fn export_for_owner(&self, owner: PlayerId) -> OwnerExport {
        OwnerExport {
            owner,
            companions: self.get_by_owner(owner).iter().map(CompanionRecord::metadata).collect(),
        }
    }

    #[cfg(test)]
    fn index_matches_records(&self) -> bool {
        let inner = self.read();
        let mut expected: HashMap<PlayerId, HashSet<CompanionId>> = HashMap::new();
        for record in inner.records.values() {
            if let Some(owner) = record.owner {
                expected.entry(owner).or_default().insert(record.id);
            }
        }
        expected == inner.by_owner
    }
}

impl Default for CompanionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{EntityTypeId, PlayerId};
    use crate::record::tests::sample_record;
    use serde_json::json;
    use std::sync::Arc;

    struct KnownTypes;

    impl EntityTypeRegistry for KnownTypes {
        fn contains_type(&self, entity_type: &EntityTypeId) -> bool {
            entity_type.0.starts_with("menagerie:")
        }
    }

    #[test]
    fn test_upsert_twice_writes_once() {
        let store = CompanionStore::new();
        let record = sample_record(Some(PlayerId::new_v4()));

        assert_eq!(store.upsert(record.clone()), UpsertOutcome::Inserted);
        assert_eq!(store.revision(), 1);
        assert!(store.take_dirty());

        assert_eq!(store.upsert(record), UpsertOutcome::Unchanged);
        assert_eq!(store.revision(), 1);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_unchanged_upsert_keeps_stored_position() {
        let store = CompanionStore::new();
        let record = sample_record(None);
        store.upsert(record.clone());

        let mut moved = record.clone();
        moved.position.x += 5.0;
        assert_eq!(store.upsert(moved.clone()), UpsertOutcome::Unchanged);
        assert_eq!(store.get(record.id).unwrap().position, record.position);

        assert_eq!(store.put(moved.clone()), UpsertOutcome::Updated);
        assert_eq!(store.get(record.id).unwrap().position, moved.position);
    }

    #[test]
    fn test_unchanged_upsert_refreshes_state_blob() {
        let store = CompanionStore::new();
        let record = sample_record(None);
        store.upsert(record.clone());
        store.take_dirty();

        let mut fresher = record.clone();
        fresher.full_state = Some(json!({ "inventory": ["diamond"], "fire_ticks": 0 }));
        assert_eq!(store.upsert(fresher.clone()), UpsertOutcome::Unchanged);
        assert_eq!(store.get(record.id).unwrap().full_state, fresher.full_state);
        assert_eq!(store.revision(), 1);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_respawn_elapsed_lists_only_due_timers() {
        let store = CompanionStore::new();
        let mut due = sample_record(None);
        due.respawn_until = 100;
        let mut waiting = sample_record(None);
        waiting.respawn_until = 200;
        let idle = sample_record(None);
        for record in [&due, &waiting, &idle] {
            store.upsert(record.clone());
        }

        assert_eq!(store.respawn_elapsed(150), vec![due.id]);
        assert!(store.respawn_elapsed(50).is_empty());
        assert_eq!(store.respawn_elapsed(200).len(), 2);
    }

    #[test]
    fn test_state_blob_is_never_cleared() {
        let store = CompanionStore::new();
        let record = sample_record(None);
        store.upsert(record.clone());

        let mut without_blob = record.clone();
        without_blob.full_state = None;
        without_blob.health = 5.0;
        assert_eq!(store.upsert(without_blob), UpsertOutcome::Updated);
        assert_eq!(store.get(record.id).unwrap().full_state, record.full_state);
    }

    #[test]
    fn test_owner_transfer_moves_index_entry() {
        let store = CompanionStore::new();
        let (alice, bob) = (PlayerId::new_v4(), PlayerId::new_v4());
        let record = sample_record(Some(alice));
        store.upsert(record.clone());
        assert_eq!(store.get_by_owner(alice).len(), 1);

        let mut transferred = record.clone();
        transferred.owner = Some(bob);
        assert_eq!(store.upsert(transferred), UpsertOutcome::Updated);

        assert!(store.get_by_owner(alice).is_empty());
        assert_eq!(store.get_by_owner(bob)[0].id, record.id);
        assert!(store.index_matches_records());
    }

    #[test]
    fn test_get_by_owner_unknown_is_empty() {
        let store = CompanionStore::new();
        assert!(store.get_by_owner(PlayerId::new_v4()).is_empty());
    }

    #[test]
    fn test_remove_drops_index_entry() {
        let store = CompanionStore::new();
        let owner = PlayerId::new_v4();
        let record = sample_record(Some(owner));
        store.upsert(record.clone());

        assert!(store.remove(record.id).is_some());
        assert!(store.get(record.id).is_none());
        assert!(store.get_by_owner(owner).is_empty());
        assert!(store.index_matches_records());
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = CompanionStore::new();
        let owner = PlayerId::new_v4();
        let first = sample_record(Some(owner));
        let mut second = sample_record(Some(owner));
        second.name = "Fang".into();
        second.kind = crate::components::CompanionKind::Scout;
        store.upsert(first.clone());
        store.upsert(second.clone());

        let document = serde_json::to_value(store.save(1_000)).unwrap();
        let (loaded, report) = CompanionStore::load(&document, &KnownTypes).unwrap();

        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.last_update, 1_000);
        for original in [&first, &second] {
            let restored = loaded.get(original.id).unwrap();
            assert_eq!(restored.owner, original.owner);
            assert_eq!(restored.kind, original.kind);
            assert_eq!(restored.full_state, original.full_state);
            assert!(restored.runtime.is_none());
        }
        assert_eq!(loaded.get_by_owner(owner).len(), 2);
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn test_last_update_is_monotonic() {
        let store = CompanionStore::new();
        let first = store.save(500).last_update;
        let second = store.save(500).last_update;
        let third = store.save(100).last_update;
        assert!(first < second && second < third);
    }

    #[test]
    fn test_load_skips_corrupt_entries() {
        let store = CompanionStore::new();
        let good = sample_record(None);
        store.upsert(good.clone());
        let mut document = serde_json::to_value(store.save(10)).unwrap();

        let mut bad_type = document["companions"][0].clone();
        bad_type["id"] = json!(CompanionId::new_v4().to_string());
        bad_type["entity_type"] = json!("othermod:ghost");
        let mut bad_id = document["companions"][0].clone();
        bad_id["id"] = json!("definitely-not-a-uuid");
        let duplicate = document["companions"][0].clone();

        let companions = document["companions"].as_array_mut().unwrap();
        companions.push(bad_type);
        companions.push(bad_id);
        companions.push(json!({ "id": 42 }));
        companions.push(duplicate);

        let (loaded, report) = CompanionStore::load(&document, &KnownTypes).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 4);
        assert!(loaded.get(good.id).is_some());
    }

    #[test]
    fn test_load_rejects_non_document() {
        assert!(CompanionStore::load(&json!([1, 2, 3]), &KnownTypes).is_err());
        assert!(CompanionStore::load(&json!({ "companions": "nope" }), &KnownTypes).is_err());
    }

    #[test]
    fn test_export_for_owner_is_redacted() {
        let store = CompanionStore::new();
        let owner = PlayerId::new_v4();
        store.upsert(sample_record(Some(owner)));
        store.upsert(sample_record(Some(PlayerId::new_v4())));

        let export = store.export_for_owner(owner);
        assert_eq!(export.companions.len(), 1);

        let text = serde_json::to_string(&export).unwrap();
        assert!(!text.contains("full_state"));
        assert!(!text.contains("inventory"));
    }

    #[test]
    fn test_index_consistent_under_concurrent_transfers() {
        let store = Arc::new(CompanionStore::new());
        let owners: Vec<PlayerId> = (0..4).map(|_| PlayerId::new_v4()).collect();
        let records: Vec<CompanionRecord> =
            (0..16).map(|i| sample_record(Some(owners[i % 4]))).collect();
        for record in &records {
            store.upsert(record.clone());
        }

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = Arc::clone(&store);
                let owners = owners.clone();
                let records = records.clone();
                scope.spawn(move || {
                    for round in 0..200 {
                        let mut record = records[(worker * 4 + round) % records.len()].clone();
                        record.owner = Some(owners[(round + worker) % owners.len()]);
                        record.health = round as f32;
                        store.upsert(record);
                    }
                });
            }

            let store = Arc::clone(&store);
            let owners = owners.clone();
            scope.spawn(move || {
                for _ in 0..200 {
                    for owner in &owners {
                        for record in store.get_by_owner(*owner) {
                            assert_eq!(record.owner, Some(*owner));
                        }
                    }
                }
            });
        });

        assert!(store.index_matches_records());
        let total: usize = owners.iter().map(|o| store.get_by_owner(*o).len()).sum();
        assert_eq!(total, records.len());
    }
}
