//! Error types
//!
//! Expected conditions (unknown ids, policy denials, bad input) are returned
//! as values; `Display` strings are short enough to show to a player.

use thiserror::Error;

use crate::components::{CompanionId, EntityHandle, EntityTypeId, RegionId};

/// Why a spawn, despawn or death request was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpawnError {
    #[error("'{0}' is not a valid companion id")]
    InvalidId(String),

    #[error("no companion with id {0}")]
    NotFound(CompanionId),

    #[error("you do not own companion {0}")]
    NotOwner(CompanionId),

    #[error("companion is resting, {} or fewer seconds remaining", round_up_to_ten(*remaining_secs))]
    RespawnPending { remaining_secs: i64 },

    #[error("entity type {0} is not registered")]
    UnresolvedType(EntityTypeId),

    #[error("no live actor at {0}")]
    NotLive(EntityHandle),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Remaining time as shown to players.
pub fn round_up_to_ten(secs: i64) -> i64 {
    ((secs.max(0) + 9) / 10) * 10
}

/// Failures reported by the engine-facing host.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("region {0} is not loaded")]
    UnknownRegion(RegionId),

    #[error("entity type {0} is not registered")]
    UnknownEntityType(EntityTypeId),

    #[error("no actor at {0}")]
    UnknownActor(EntityHandle),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("illegal backup file name '{0}'")]
    InvalidBackupName(String),

    #[error("malformed document: {0}")]
    MalformedDocument(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
