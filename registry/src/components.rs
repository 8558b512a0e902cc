//! Identity types and live-actor components
//!
//! Identity newtypes are shared by the registry and the host; the ECS
//! components at the bottom describe a materialized companion inside a region.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identity Components
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanionId(pub Uuid);

impl CompanionId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for CompanionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(CompanionId)
    }
}

impl fmt::Display for CompanionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(PlayerId)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A loaded dimension/region of the world, e.g. `overworld`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key into the host's entity-type registry, e.g. `menagerie:wolf`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityTypeId(pub String);

impl EntityTypeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup key for a live actor: region plus the region-local numeric id.
///
/// Never a reference. Every use goes back through the host and may find
/// nothing if the actor has since been removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    pub region: RegionId,
    pub entity_id: i32,
}

impl EntityHandle {
    pub fn new(region: RegionId, entity_id: i32) -> Self {
        Self { region, entity_id }
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.region, self.entity_id)
    }
}

// ============================================================================
// Companion Archetype
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompanionKind {
    Follower,
    Guard,
    Gatherer,
    Scout,
}

impl CompanionKind {
    pub const ALL: [CompanionKind; 4] = [
        CompanionKind::Follower,
        CompanionKind::Guard,
        CompanionKind::Gatherer,
        CompanionKind::Scout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompanionKind::Follower => "FOLLOWER",
            CompanionKind::Guard => "GUARD",
            CompanionKind::Gatherer => "GATHERER",
            CompanionKind::Scout => "SCOUT",
        }
    }
}

impl fmt::Display for CompanionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Spatial Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Block containing this point.
    pub fn block(&self) -> BlockPos {
        BlockPos::new(self.x.floor() as i32, self.y.floor() as i32, self.z.floor() as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn below(&self) -> Self {
        self.offset(0, -1, 0)
    }

    pub fn above(&self) -> Self {
        self.offset(0, 1, 0)
    }

    /// Feet position of an actor standing centred in this block.
    pub fn standing_point(&self) -> Vec3 {
        Vec3::new(self.x as f64 + 0.5, self.y as f64, self.z as f64 + 0.5)
    }
}

/// Coarse block classification supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Air,
    Water,
    /// Tall grass, flowers and other plants an actor can stand inside.
    Grass,
    SnowLayer,
    Solid,
    Lava,
    Fire,
}

impl BlockKind {
    /// An actor may occupy this block.
    pub fn is_passable(&self) -> bool {
        matches!(self, BlockKind::Air | BlockKind::Water | BlockKind::Grass | BlockKind::SnowLayer)
    }

    /// An actor may stand on top of this block.
    pub fn is_floor(&self) -> bool {
        matches!(self, BlockKind::Solid)
    }
}

// ============================================================================
// Live Actor Components (hecs)
// ============================================================================

/// Marks a region entity as the live body of a companion.
#[derive(Debug, Clone, Copy)]
pub struct LiveCompanion {
    pub id: CompanionId,
    pub entity_id: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct Owner(pub PlayerId);

#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub kind: CompanionKind,
    pub entity_type: EntityTypeId,
}

#[derive(Debug, Clone, Copy)]
pub struct Position(pub Vec3);

#[derive(Debug, Clone, Copy)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Sitting(pub bool);

/// Where the actor's movement AI is currently heading.
#[derive(Debug, Clone, Copy)]
pub struct MoveGoal(pub Vec3);

/// Opaque internal state of the actor (inventory, AI flags, motion, ...).
#[derive(Debug, Clone)]
pub struct ActorState(pub serde_json::Value);
