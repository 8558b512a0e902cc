//! Simulation World - in-memory host
//!
//! A small stand-in for the game engine: a set of loaded regions, each with
//! its own hecs world of live actors and a flat terrain, plus the connected
//! player sessions. It implements the engine-facing traits in `host` so the
//! registry can be driven end to end without a real engine.

use hecs::World;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::components::*;
use crate::error::HostError;
use crate::host::{ActorSpawn, ActorView, EntityTypeRegistry, PlayerSessions, RegionAccess};
use crate::record::Document;
use crate::sync::SyncPayload;

pub const OVERWORLD: &str = "overworld";
pub const NETHER: &str = "nether";
pub const DEFAULT_ENTITY_TYPE: &str = "menagerie:wolf";

const DEFAULT_MAX_HEALTH: f32 = 20.0;

/// Blocks moved per tick towards a move goal.
const WALK_SPEED: f64 = 1.0;

// ============================================================================
// Regions
// ============================================================================

pub struct Region {
    pub world: World,
    entities: HashMap<i32, hecs::Entity>,
    /// Everything below this height is solid unless overridden.
    ground_y: i32,
    blocks: HashMap<BlockPos, BlockKind>,
}

impl Region {
    pub fn new(ground_y: i32) -> Self {
        Self {
            world: World::new(),
            entities: HashMap::new(),
            ground_y,
            blocks: HashMap::new(),
        }
    }

    pub fn block_at(&self, pos: BlockPos) -> BlockKind {
        match self.blocks.get(&pos) {
            Some(kind) => *kind,
            None if pos.y < self.ground_y => BlockKind::Solid,
            None => BlockKind::Air,
        }
    }

    pub fn set_block(&mut self, pos: BlockPos, kind: BlockKind) {
        self.blocks.insert(pos, kind);
    }

    pub fn actor_count(&self) -> usize {
        self.entities.len()
    }

    fn view(&self, region: &RegionId, entity_id: i32) -> Option<ActorView> {
        let entity = *self.entities.get(&entity_id)?;
        let mut query = self
            .world
            .query_one::<(&LiveCompanion, &Identity, &Position, &Health, &Sitting, &ActorState, Option<&Owner>)>(
                entity,
            )
            .ok()?;
        let (live, identity, position, health, sitting, state, owner) = query.get()?;

        Some(ActorView {
            handle: EntityHandle::new(region.clone(), entity_id),
            companion: live.id,
            owner: owner.map(|o| o.0),
            owner_name: None,
            name: identity.name.clone(),
            kind: identity.kind,
            entity_type: identity.entity_type.clone(),
            position: position.0,
            health: health.current,
            max_health: health.max,
            sitting: sitting.0,
            state: state.0.clone(),
        })
    }
}

struct Session {
    name: String,
    region: RegionId,
    position: Vec3,
    inbox: Vec<SyncPayload>,
}

// ============================================================================
// World
// ============================================================================

pub struct SimulationWorld {
    regions: BTreeMap<RegionId, Region>,
    sessions: HashMap<PlayerId, Session>,
    entity_types: HashSet<EntityTypeId>,
    next_entity_id: i32,
    pub ticks: u64,
}

impl SimulationWorld {
    /// Overworld and nether loaded, the default companion type registered.
    pub fn new() -> Self {
        let mut world = Self {
            regions: BTreeMap::new(),
            sessions: HashMap::new(),
            entity_types: HashSet::new(),
            next_entity_id: 1,
            ticks: 0,
        };
        world.load_region(RegionId::new(OVERWORLD), 64);
        world.load_region(RegionId::new(NETHER), 32);
        world.register_entity_type(EntityTypeId::new(DEFAULT_ENTITY_TYPE));
        world
    }

    pub fn load_region(&mut self, id: RegionId, ground_y: i32) {
        self.regions.entry(id).or_insert_with(|| Region::new(ground_y));
    }

    /// Unload a region, returning views of the actors that were in it so
    /// the caller can capture their final state.
    pub fn unload_region(&mut self, id: &RegionId) -> Vec<ActorView> {
        let Some(region) = self.regions.get(id) else {
            return Vec::new();
        };
        let views: Vec<ActorView> = region
            .entities
            .keys()
            .filter_map(|entity_id| region.view(id, *entity_id))
            .collect();
        self.regions.remove(id);
        views
    }

    pub fn set_block(&mut self, region: &RegionId, pos: BlockPos, kind: BlockKind) {
        if let Some(region) = self.regions.get_mut(region) {
            region.set_block(pos, kind);
        }
    }

    pub fn register_entity_type(&mut self, entity_type: EntityTypeId) {
        self.entity_types.insert(entity_type);
    }

    pub fn unregister_entity_type(&mut self, entity_type: &EntityTypeId) {
        self.entity_types.remove(entity_type);
    }

    // ========================================================================
    // Players
    // ========================================================================

    pub fn connect_player(&mut self, name: &str, region: RegionId, position: Vec3) -> PlayerId {
        let id = PlayerId::new_v4();
        self.reconnect_player(id, name, region, position);
        id
    }

    pub fn reconnect_player(&mut self, id: PlayerId, name: &str, region: RegionId, position: Vec3) {
        self.sessions.insert(
            id,
            Session {
                name: name.to_string(),
                region,
                position,
                inbox: Vec::new(),
            },
        );
    }

    pub fn disconnect_player(&mut self, player: PlayerId) {
        self.sessions.remove(&player);
    }

    pub fn move_player(&mut self, player: PlayerId, region: RegionId, position: Vec3) {
        if let Some(session) = self.sessions.get_mut(&player) {
            session.region = region;
            session.position = position;
        }
    }

    pub fn rename_player(&mut self, player: PlayerId, name: &str) {
        if let Some(session) = self.sessions.get_mut(&player) {
            session.name = name.to_string();
        }
    }

    pub fn inbox(&self, player: PlayerId) -> &[SyncPayload] {
        self.sessions
            .get(&player)
            .map(|s| s.inbox.as_slice())
            .unwrap_or(&[])
    }

    pub fn take_inbox(&mut self, player: PlayerId) -> Vec<SyncPayload> {
        self.sessions
            .get_mut(&player)
            .map(|s| std::mem::take(&mut s.inbox))
            .unwrap_or_default()
    }

    // ========================================================================
    // Actors
    // ========================================================================

    /// Create a freshly tamed companion next to its owner.
    pub fn tame(
        &mut self,
        owner: PlayerId,
        name: &str,
        kind: CompanionKind,
        position: Vec3,
    ) -> Result<EntityHandle, HostError> {
        let region = self
            .sessions
            .get(&owner)
            .map(|s| s.region.clone())
            .unwrap_or_else(|| RegionId::new(OVERWORLD));
        self.create_actor(ActorSpawn {
            companion: CompanionId::new_v4(),
            owner: Some(owner),
            name: name.to_string(),
            kind,
            entity_type: EntityTypeId::new(DEFAULT_ENTITY_TYPE),
            region,
            position,
            health: DEFAULT_MAX_HEALTH,
            max_health: DEFAULT_MAX_HEALTH,
            sitting: false,
            state: default_state(),
        })
    }

    /// An untamed creature in the overworld.
    pub fn spawn_wild(&mut self, name: &str, position: Vec3) -> Result<EntityHandle, HostError> {
        self.create_actor(ActorSpawn {
            companion: CompanionId::new_v4(),
            owner: None,
            name: name.to_string(),
            kind: CompanionKind::Follower,
            entity_type: EntityTypeId::new(DEFAULT_ENTITY_TYPE),
            region: RegionId::new(OVERWORLD),
            position,
            health: DEFAULT_MAX_HEALTH,
            max_health: DEFAULT_MAX_HEALTH,
            sitting: false,
            state: default_state(),
        })
    }

    fn entity(&self, handle: &EntityHandle) -> Option<(&Region, hecs::Entity)> {
        let region = self.regions.get(&handle.region)?;
        let entity = *region.entities.get(&handle.entity_id)?;
        Some((region, entity))
    }

    /// Apply damage; returns remaining health, or `None` if no such actor.
    pub fn damage(&mut self, handle: &EntityHandle, amount: f32) -> Option<f32> {
        let (region, entity) = self.entity(handle)?;
        let mut health = region.world.get::<&mut Health>(entity).ok()?;
        health.current = (health.current - amount).max(0.0);
        Some(health.current)
    }

    pub fn set_sitting(&mut self, handle: &EntityHandle, sitting: bool) -> bool {
        match self.entity(handle) {
            Some((region, entity)) => region
                .world
                .get::<&mut Sitting>(entity)
                .map(|mut s| s.0 = sitting)
                .is_ok(),
            None => false,
        }
    }

    /// Overwrite one top-level field of the actor's internal state.
    pub fn set_state_field(&mut self, handle: &EntityHandle, key: &str, value: serde_json::Value) -> bool {
        let Some((region, entity)) = self.entity(handle) else {
            return false;
        };
        match region.world.get::<&mut ActorState>(entity) {
            Ok(mut state) => {
                if let Some(object) = state.0.as_object_mut() {
                    object.insert(key.to_string(), value);
                    return true;
                }
                false
            }
            Err(_) => false,
        }
    }

    pub fn move_goal(&self, handle: &EntityHandle) -> Option<Vec3> {
        let (region, entity) = self.entity(handle)?;
        let goal = region.world.get::<&MoveGoal>(entity).ok()?;
        Some(goal.0)
    }

    /// Live actors carrying companion id `id`, across all regions.
    pub fn live_count(&self, id: CompanionId) -> usize {
        self.regions
            .keys()
            .map(|region| self.find_companions(region, id).len())
            .sum()
    }

    pub fn entity_count(&self) -> usize {
        self.regions.values().map(Region::actor_count).sum()
    }

    /// Advance one tick: actors with a move goal walk towards it.
    pub fn tick(&mut self) {
        self.ticks += 1;
        for region in self.regions.values_mut() {
            let mut arrived = Vec::new();
            for (entity, (position, goal)) in region.world.query_mut::<(&mut Position, &MoveGoal)>() {
                let distance = position.0.distance(&goal.0);
                if distance <= WALK_SPEED {
                    position.0 = goal.0;
                    arrived.push(entity);
                } else {
                    let step = WALK_SPEED / distance;
                    position.0 = Vec3::new(
                        position.0.x + (goal.0.x - position.0.x) * step,
                        position.0.y + (goal.0.y - position.0.y) * step,
                        position.0.z + (goal.0.z - position.0.z) * step,
                    );
                }
            }
            for entity in arrived {
                let _ = region.world.remove_one::<MoveGoal>(entity);
            }
        }
    }
}

impl Default for SimulationWorld {
    fn default() -> Self {
        Self::new()
    }
}

fn default_state() -> Document {
    json!({
        "inventory": [],
        "fire_ticks": 0,
        "fall_distance": 0.0,
        "motion": [0.0, 0.0, 0.0],
        "on_ground": true,
    })
}

// ============================================================================
// Host Implementation
// ============================================================================

impl EntityTypeRegistry for SimulationWorld {
    fn contains_type(&self, entity_type: &EntityTypeId) -> bool {
        self.entity_types.contains(entity_type)
    }
}

impl RegionAccess for SimulationWorld {
    fn loaded_regions(&self) -> Vec<RegionId> {
        self.regions.keys().cloned().collect()
    }

    fn find_companions(&self, region: &RegionId, id: CompanionId) -> Vec<EntityHandle> {
        let Some(r) = self.regions.get(region) else {
            return Vec::new();
        };
        let mut handles: Vec<EntityHandle> = r
            .world
            .query::<&LiveCompanion>()
            .iter()
            .filter(|(_, live)| live.id == id)
            .map(|(_, live)| EntityHandle::new(region.clone(), live.entity_id))
            .collect();
        handles.sort_by_key(|h| h.entity_id);
        handles
    }

    fn actor(&self, handle: &EntityHandle) -> Option<ActorView> {
        let region = self.regions.get(&handle.region)?;
        let mut view = region.view(&handle.region, handle.entity_id)?;
        view.owner_name = view
            .owner
            .and_then(|owner| self.sessions.get(&owner))
            .map(|s| s.name.clone());
        Some(view)
    }

    fn block_at(&self, region: &RegionId, pos: BlockPos) -> BlockKind {
        self.regions
            .get(region)
            .map(|r| r.block_at(pos))
            .unwrap_or(BlockKind::Air)
    }

    fn create_actor(&mut self, spawn: ActorSpawn) -> Result<EntityHandle, HostError> {
        if !self.entity_types.contains(&spawn.entity_type) {
            return Err(HostError::UnknownEntityType(spawn.entity_type));
        }
        let region = self
            .regions
            .get_mut(&spawn.region)
            .ok_or_else(|| HostError::UnknownRegion(spawn.region.clone()))?;

        let entity_id = self.next_entity_id;
        self.next_entity_id += 1;

        let entity = region.world.spawn((
            LiveCompanion {
                id: spawn.companion,
                entity_id,
            },
            Identity {
                name: spawn.name,
                kind: spawn.kind,
                entity_type: spawn.entity_type,
            },
            Position(spawn.position),
            Health {
                current: spawn.health,
                max: spawn.max_health,
            },
            Sitting(spawn.sitting),
            ActorState(spawn.state),
        ));
        if let Some(owner) = spawn.owner {
            let _ = region.world.insert_one(entity, Owner(owner));
        }
        region.entities.insert(entity_id, entity);

        Ok(EntityHandle::new(spawn.region, entity_id))
    }

    fn remove_actor(&mut self, handle: &EntityHandle) -> bool {
        let Some(region) = self.regions.get_mut(&handle.region) else {
            return false;
        };
        match region.entities.remove(&handle.entity_id) {
            Some(entity) => region.world.despawn(entity).is_ok(),
            None => false,
        }
    }

    fn teleport(&mut self, handle: &EntityHandle, position: Vec3) -> Result<(), HostError> {
        let (region, entity) = self
            .entity(handle)
            .ok_or_else(|| HostError::UnknownActor(handle.clone()))?;
        let mut current = region
            .world
            .get::<&mut Position>(entity)
            .map_err(|_| HostError::UnknownActor(handle.clone()))?;
        current.0 = position;
        Ok(())
    }

    fn set_move_goal(&mut self, handle: &EntityHandle, goal: Vec3) -> Result<(), HostError> {
        let region = self
            .regions
            .get_mut(&handle.region)
            .ok_or_else(|| HostError::UnknownRegion(handle.region.clone()))?;
        let entity = *region
            .entities
            .get(&handle.entity_id)
            .ok_or_else(|| HostError::UnknownActor(handle.clone()))?;
        region
            .world
            .insert_one(entity, MoveGoal(goal))
            .map_err(|_| HostError::UnknownActor(handle.clone()))
    }
}

impl PlayerSessions for SimulationWorld {
    fn player_name(&self, player: PlayerId) -> Option<String> {
        self.sessions.get(&player).map(|s| s.name.clone())
    }

    fn player_location(&self, player: PlayerId) -> Option<(RegionId, Vec3)> {
        self.sessions
            .get(&player)
            .map(|s| (s.region.clone(), s.position))
    }

    fn deliver(&mut self, player: PlayerId, payload: &SyncPayload) -> bool {
        match self.sessions.get_mut(&player) {
            Some(session) => {
                session.inbox.push(payload.clone());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_terrain() {
        let world = SimulationWorld::new();
        let overworld = RegionId::new(OVERWORLD);
        assert_eq!(world.block_at(&overworld, BlockPos::new(0, 63, 0)), BlockKind::Solid);
        assert_eq!(world.block_at(&overworld, BlockPos::new(0, 64, 0)), BlockKind::Air);
    }

    #[test]
    fn test_tame_and_lookup() {
        let mut world = SimulationWorld::new();
        let player = world.connect_player("Alex", RegionId::new(OVERWORLD), Vec3::new(0.5, 64.0, 0.5));
        let handle = world
            .tame(player, "Rex", CompanionKind::Guard, Vec3::new(1.5, 64.0, 1.5))
            .unwrap();

        let view = world.actor(&handle).unwrap();
        assert_eq!(view.owner, Some(player));
        assert_eq!(view.owner_name.as_deref(), Some("Alex"));
        assert_eq!(world.live_count(view.companion), 1);

        assert_eq!(world.damage(&handle, 5.0), Some(15.0));
        assert!(world.remove_actor(&handle));
        assert!(world.actor(&handle).is_none());
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_create_actor_rejects_unknown_type() {
        let mut world = SimulationWorld::new();
        let result = world.create_actor(ActorSpawn {
            companion: CompanionId::new_v4(),
            owner: None,
            name: "Ghost".into(),
            kind: CompanionKind::Scout,
            entity_type: EntityTypeId::new("othermod:ghost"),
            region: RegionId::new(OVERWORLD),
            position: Vec3::default(),
            health: 1.0,
            max_health: 1.0,
            sitting: false,
            state: json!({}),
        });
        assert!(matches!(result, Err(HostError::UnknownEntityType(_))));
    }

    #[test]
    fn test_move_goal_is_walked() {
        let mut world = SimulationWorld::new();
        let handle = world.spawn_wild("Stray", Vec3::new(0.5, 64.0, 0.5)).unwrap();
        world.set_move_goal(&handle, Vec3::new(3.5, 64.0, 0.5)).unwrap();

        for _ in 0..3 {
            world.tick();
        }
        assert_eq!(world.actor(&handle).unwrap().position, Vec3::new(3.5, 64.0, 0.5));
        assert!(world.move_goal(&handle).is_none());
    }
}
