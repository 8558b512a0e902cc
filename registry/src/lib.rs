//! Menagerie Companion Registry
//!
//! Lifecycle and persistence for tamed companions: a per-world store that
//! survives actor unloads, deaths and restarts, and a spawn controller that
//! keeps at most one live actor per companion.

pub mod components;
pub mod record;
pub mod store;
pub mod persistence;
pub mod host;
pub mod world;
pub mod lifecycle;
pub mod spawn;
pub mod sync;
pub mod companions;
pub mod config;
pub mod error;

pub use components::*;
pub use companions::CompanionSystem;
pub use config::CompanionConfig;
pub use error::{ConfigError, HostError, PersistenceError, SpawnError};
pub use persistence::{BackupStore, OwnerExport, StoreDocument};
pub use record::{CompanionMetadata, CompanionRecord, CompanionState};
pub use spawn::{DeathOutcome, SpawnOutcome, SpawnRequest};
pub use store::{CompanionStore, LoadReport, UpsertOutcome};
pub use world::SimulationWorld;
