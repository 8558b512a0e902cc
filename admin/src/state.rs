use registry::{BackupStore, CompanionConfig, CompanionSystem, ConfigError, SimulationWorld};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared state behind every admin command.
///
/// Commands that need both locks take `system` first, then `world`.
pub struct AdminState {
    pub world: Arc<Mutex<SimulationWorld>>,
    pub system: Mutex<CompanionSystem>,
    pub backups: BackupStore,
}

impl AdminState {
    pub fn new(
        world: SimulationWorld,
        config: CompanionConfig,
        backup_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            world: Arc::new(Mutex::new(world)),
            system: Mutex::new(CompanionSystem::new(config)?),
            backups: BackupStore::new(backup_dir),
        })
    }

    pub fn system(&self) -> MutexGuard<'_, CompanionSystem> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn world(&self) -> MutexGuard<'_, SimulationWorld> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// -- Serializable types returned by commands --

#[derive(Serialize, Clone, Debug)]
pub struct CompanionLine {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub owner_name: String,
    pub region: String,
    pub status: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct Listing {
    pub message: String,
    pub companions: Vec<CompanionLine>,
}

#[derive(Serialize, Clone, Debug)]
pub struct SaveResult {
    pub name: String,
    pub companions: u32,
    pub last_update: i64,
}

#[derive(Serialize, Clone, Debug)]
pub struct LoadResult {
    pub name: String,
    pub loaded: u32,
    pub skipped: u32,
    pub last_update: i64,
}
