//! Persistence module for the companion store
//!
//! Document shapes for the world save file, the per-owner metadata export and
//! the timestamped backup files. All of them are JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::components::*;
use crate::error::PersistenceError;
use crate::host::EntityTypeRegistry;
use crate::record::{CompanionMetadata, CompanionRecord};

/// Schema version written into every store document.
pub const SCHEMA_VERSION: u8 = 1;

/// Fixed tail of every backup file name.
pub const BACKUP_SUFFIX: &str = "-companions.json";

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

// ============================================================================
// Export Data Structures
// ============================================================================

/// Complete store state for one world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: u8,
    pub last_update: i64,
    pub companions: Vec<CompanionDocument>,
}

/// Single companion with its full state.
///
/// Ids are kept as strings so one malformed entry can be rejected on its own
/// during load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub owner_name: String,
    pub name: String,
    pub kind: CompanionKind,
    pub region: String,
    pub position: Vec3,
    pub live_entity_id: i32,
    pub entity_type: String,
    pub health: f32,
    pub max_health: f32,
    #[serde(default)]
    pub sitting: bool,
    #[serde(default)]
    pub respawn_until: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_state: Option<Value>,
}

impl CompanionDocument {
    pub fn from_record(record: &CompanionRecord) -> Self {
        Self {
            id: record.id.to_string(),
            owner: record.owner.map(|o| o.to_string()),
            owner_name: record.owner_name.clone(),
            name: record.name.clone(),
            kind: record.kind,
            region: record.region.0.clone(),
            position: record.position,
            live_entity_id: record.live_entity_id,
            entity_type: record.entity_type.0.clone(),
            health: record.health,
            max_health: record.max_health,
            sitting: record.sitting,
            respawn_until: record.respawn_until,
            full_state: record.full_state.clone(),
        }
    }

    /// Validate and convert. Loaded records are always dormant; live actors
    /// re-register themselves when the host observes them.
    pub fn into_record(self, types: &impl EntityTypeRegistry) -> Result<CompanionRecord, String> {
        let id: CompanionId = self
            .id
            .parse()
            .map_err(|_| format!("malformed companion id '{}'", self.id))?;
        let owner = match self.owner {
            Some(raw) => Some(
                raw.parse::<PlayerId>()
                    .map_err(|_| format!("malformed owner id '{}'", raw))?,
            ),
            None => None,
        };
        let entity_type = EntityTypeId(self.entity_type);
        if !types.contains_type(&entity_type) {
            return Err(format!("unresolved entity type '{}'", entity_type));
        }

        Ok(CompanionRecord {
            id,
            owner,
            owner_name: self.owner_name,
            name: self.name,
            kind: self.kind,
            region: RegionId(self.region),
            position: self.position,
            runtime: None,
            live_entity_id: self.live_entity_id,
            entity_type,
            health: self.health,
            max_health: self.max_health,
            sitting: self.sitting,
            respawn_until: self.respawn_until,
            full_state: self.full_state,
        })
    }
}

/// Metadata-only listing of one owner's companions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerExport {
    pub owner: PlayerId,
    pub companions: Vec<CompanionMetadata>,
}

// ============================================================================
// World Save File
// ============================================================================

/// Write via a sibling temp file and rename, so a crash never leaves a
/// half-written save behind.
pub fn write_document(path: &Path, document: &StoreDocument) -> Result<u64, PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(document)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(bytes.len() as u64)
}

pub fn read_document(path: &Path) -> Result<Value, PersistenceError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

// ============================================================================
// Backups
// ============================================================================

/// Reject anything that could escape the backup directory or is not one of
/// our files.
pub fn validate_backup_name(name: &str) -> Result<(), PersistenceError> {
    let illegal = name.is_empty()
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || !name.ends_with(BACKUP_SUFFIX)
        || name.len() == BACKUP_SUFFIX.len();
    if illegal {
        Err(PersistenceError::InvalidBackupName(name.to_string()))
    } else {
        Ok(())
    }
}

pub fn backup_name(at: DateTime<Utc>) -> String {
    format!("{}{}", at.format(BACKUP_TIMESTAMP_FORMAT), BACKUP_SUFFIX)
}

/// Directory of timestamped copies of the store document.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `document` under a name derived from `at`. Returns the name.
    pub fn write(&self, document: &StoreDocument, at: DateTime<Utc>) -> Result<String, PersistenceError> {
        let name = backup_name(at);
        let bytes = write_document(&self.dir.join(&name), document)?;
        info!(backup = %name, bytes, companions = document.companions.len(), "backup written");
        Ok(name)
    }

    /// Backup names, newest first. A missing directory has no backups.
    pub fn list(&self) -> Result<Vec<String>, PersistenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if validate_backup_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    pub fn read(&self, name: &str) -> Result<Value, PersistenceError> {
        validate_backup_name(name)?;
        read_document(&self.dir.join(name))
    }
}
