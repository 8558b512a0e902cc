use serde::Serialize;
use thiserror::Error;
use tracing::info;

use registry::error::round_up_to_ten;
use registry::host::{PlayerSessions, RegionAccess};
use registry::{CompanionRecord, CompanionState, PlayerId, SpawnError, SpawnOutcome, SpawnRequest};

use crate::state::{AdminState, CompanionLine, Listing};

/// Why a summon was refused.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SummonError {
    #[error("'{input}' is not a valid player id")]
    InvalidPlayer { input: String },

    #[error("you must be online to summon a companion")]
    Offline,

    #[error("'{input}' is not a valid companion id")]
    InvalidId { input: String },

    #[error("no companion with id {id}")]
    NotFound { id: String },

    #[error("you do not own companion {id}")]
    NotOwner { id: String },

    #[error("companion is resting, {} or fewer seconds remaining", round_up_to_ten(*remaining_secs))]
    RespawnPending { remaining_secs: i64 },

    #[error("companion could not be summoned: {message}")]
    Unavailable { message: String },
}

impl From<SpawnError> for SummonError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::InvalidId(input) => SummonError::InvalidId { input },
            SpawnError::NotFound(id) => SummonError::NotFound { id: id.to_string() },
            SpawnError::NotOwner(id) => SummonError::NotOwner { id: id.to_string() },
            SpawnError::RespawnPending { remaining_secs } => SummonError::RespawnPending { remaining_secs },
            other => SummonError::Unavailable {
                message: other.to_string(),
            },
        }
    }
}

fn describe(record: &CompanionRecord, now: i64) -> CompanionLine {
    let status = match record.state(now) {
        CompanionState::Live => "live".to_string(),
        CompanionState::Dormant => "dormant".to_string(),
        CompanionState::PendingRespawn { remaining_secs } => {
            format!("resting ({}s)", remaining_secs)
        }
    };
    CompanionLine {
        id: record.id.to_string(),
        name: record.name.clone(),
        kind: record.kind.to_string(),
        owner_name: record.owner_name.clone(),
        region: record.region.to_string(),
        status,
    }
}

fn listing(records: &[CompanionRecord], now: i64, empty: &str) -> Listing {
    let companions: Vec<CompanionLine> = records.iter().map(|r| describe(r, now)).collect();
    let message = match companions.len() {
        0 => empty.to_string(),
        1 => "1 companion".to_string(),
        n => format!("{} companions", n),
    };
    Listing { message, companions }
}

/// Every registered companion, for operators.
pub fn list_all(state: &AdminState, now: i64) -> Listing {
    let records = state.system().store().all();
    listing(&records, now, "No companions registered")
}

pub fn list_owned(state: &AdminState, player: &str, now: i64) -> Result<Listing, SummonError> {
    let owner: PlayerId = player.parse().map_err(|_| SummonError::InvalidPlayer {
        input: player.to_string(),
    })?;
    let records = state.system().store().get_by_owner(owner);
    Ok(listing(&records, now, "You have no companions"))
}

/// Bring one of the player's companions to them.
pub fn summon(state: &AdminState, player: &str, companion: &str, now: i64) -> Result<String, SummonError> {
    let requester: PlayerId = player.parse().map_err(|_| SummonError::InvalidPlayer {
        input: player.to_string(),
    })?;

    let mut system = state.system();
    let mut world = state.world();
    let (region, position) = world.player_location(requester).ok_or(SummonError::Offline)?;

    let request = SpawnRequest {
        companion: companion.to_string(),
        requester,
        region,
        position,
    };
    let outcome = system.spawn(&mut *world, &request, now)?;

    let name = world
        .actor(outcome.handle())
        .map(|actor| actor.name)
        .unwrap_or_else(|| "Your companion".to_string());
    info!(player = %requester, companion, "summon accepted");

    Ok(match outcome {
        SpawnOutcome::Retargeted(_) => format!("{} is on the way", name),
        SpawnOutcome::Teleported(_) => format!("{} has been brought to you", name),
        SpawnOutcome::Materialized { fallback: false, .. } => format!("{} has been summoned", name),
        SpawnOutcome::Materialized { fallback: true, .. } => {
            format!("{} has been summoned at your feet", name)
        }
    })
}
