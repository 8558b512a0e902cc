//! Engine-facing interface
//!
//! The registry never touches live actors directly. Everything it needs from
//! the game engine goes through these traits, and everything it gets back is
//! a value snapshot rather than a reference into engine state.

use crate::components::*;
use crate::error::HostError;
use crate::record::Document;
use crate::sync::SyncPayload;

/// Snapshot of a live companion actor at the moment of lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorView {
    pub handle: EntityHandle,
    pub companion: CompanionId,
    pub owner: Option<PlayerId>,
    /// Owner display name, when the owner has a live session.
    pub owner_name: Option<String>,
    pub name: String,
    pub kind: CompanionKind,
    pub entity_type: EntityTypeId,
    pub position: Vec3,
    pub health: f32,
    pub max_health: f32,
    pub sitting: bool,
    pub state: Document,
}

/// Everything the host needs to materialize an actor.
#[derive(Debug, Clone)]
pub struct ActorSpawn {
    pub companion: CompanionId,
    pub owner: Option<PlayerId>,
    pub name: String,
    pub kind: CompanionKind,
    pub entity_type: EntityTypeId,
    pub region: RegionId,
    pub position: Vec3,
    pub health: f32,
    pub max_health: f32,
    pub sitting: bool,
    pub state: Document,
}

pub trait EntityTypeRegistry {
    fn contains_type(&self, entity_type: &EntityTypeId) -> bool;
}

pub trait RegionAccess {
    fn loaded_regions(&self) -> Vec<RegionId>;

    /// Every live actor in `region` that carries companion id `id`.
    fn find_companions(&self, region: &RegionId, id: CompanionId) -> Vec<EntityHandle>;

    fn actor(&self, handle: &EntityHandle) -> Option<ActorView>;

    fn block_at(&self, region: &RegionId, pos: BlockPos) -> BlockKind;

    fn create_actor(&mut self, spawn: ActorSpawn) -> Result<EntityHandle, HostError>;

    /// Returns false if nothing was there to remove.
    fn remove_actor(&mut self, handle: &EntityHandle) -> bool;

    fn teleport(&mut self, handle: &EntityHandle, position: Vec3) -> Result<(), HostError>;

    fn set_move_goal(&mut self, handle: &EntityHandle, goal: Vec3) -> Result<(), HostError>;
}

pub trait PlayerSessions {
    fn player_name(&self, player: PlayerId) -> Option<String>;

    /// Region and position of a connected player.
    fn player_location(&self, player: PlayerId) -> Option<(RegionId, Vec3)>;

    /// Returns false when the player is not connected.
    fn deliver(&mut self, player: PlayerId, payload: &SyncPayload) -> bool;
}

/// The full host surface. `Sync` lets region scans run in parallel.
pub trait Host: EntityTypeRegistry + RegionAccess + PlayerSessions + Sync {}

impl<T> Host for T where T: EntityTypeRegistry + RegionAccess + PlayerSessions + Sync {}
