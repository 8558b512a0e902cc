//! Menagerie Companion Demo
//!
//! Drives the registry against the in-memory world: tames a population of
//! companions, lets them take damage and die, resummons them after their
//! respawn delay, then saves the world document.

use rand::seq::SliceRandom;
use rand::Rng;
use registry::host::{PlayerSessions, RegionAccess};
use registry::world::{NETHER, OVERWORLD};
use registry::{
    CompanionConfig, CompanionKind, CompanionSystem, DeathOutcome, PlayerId, RegionId,
    SimulationWorld, SpawnRequest, Vec3,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const PLAYERS: usize = 50;
const COMPANIONS_PER_PLAYER: usize = 4;
const TICKS: u64 = 600;
/// Ticks per simulated second.
const TICKS_PER_SECOND: u64 = 20;

const NAMES: &[&str] = &[
    "Rex", "Bolt", "Maple", "Ash", "Juniper", "Pip", "Cinder", "Moss", "Tansy", "Wren",
];

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Menagerie companion registry starting...");

    let config = match std::env::args().nth(1) {
        Some(path) => CompanionConfig::load(&path)?,
        None => CompanionConfig::default(),
    };
    let mut system = CompanionSystem::new(config)?;
    let mut world = SimulationWorld::new();
    let mut rng = rand::thread_rng();
    let start = chrono::Utc::now().timestamp();

    info!("Taming {} companions...", PLAYERS * COMPANIONS_PER_PLAYER);
    let mut players: Vec<PlayerId> = Vec::with_capacity(PLAYERS);
    for p in 0..PLAYERS {
        let home = Vec3::new(rng.gen_range(-200..200) as f64 + 0.5, 64.0, rng.gen_range(-200..200) as f64 + 0.5);
        let player = world.connect_player(&format!("player{}", p), RegionId::new(OVERWORLD), home);
        for _ in 0..COMPANIONS_PER_PLAYER {
            let name = NAMES.choose(&mut rng).copied().unwrap_or("Rex");
            let kind = CompanionKind::ALL[rng.gen_range(0..CompanionKind::ALL.len())];
            let handle = world.tame(player, name, kind, Vec3::new(home.x + 1.0, home.y, home.z))?;
            if let Some(actor) = world.actor(&handle) {
                system.on_actor_observed(&actor);
            }
        }
        players.push(player);
    }
    info!("Registry holds {} companions", system.store().len());

    let timer = std::time::Instant::now();
    let mut deaths = 0usize;
    let mut summons = 0usize;
    let mut refused = 0usize;

    for tick in 0..TICKS {
        let now = start + (tick / TICKS_PER_SECOND) as i64;
        world.tick();

        // A few random hits per tick.
        for _ in 0..5 {
            let Some(&player) = players.choose(&mut rng) else {
                break;
            };
            let Some(record) = system.store().get_by_owner(player).choose(&mut rng).cloned() else {
                continue;
            };
            let Some(handle) = record.runtime else {
                continue;
            };
            match world.damage(&handle, rng.gen_range(1.0..8.0)) {
                Some(health) if health <= 0.0 => {
                    if let Ok(DeathOutcome::PendingRespawn { .. }) = system.on_death(&mut world, &handle, now) {
                        deaths += 1;
                    }
                }
                Some(_) => system.on_actor_changed(handle),
                None => {}
            }
        }

        // Players resummon dormant companions, sometimes into the nether.
        if tick % TICKS_PER_SECOND == 0 {
            for &player in &players {
                let Some((mut region, mut position)) = world.player_location(player) else {
                    continue;
                };
                if rng.gen_bool(0.1) {
                    region = RegionId::new(NETHER);
                    position = Vec3::new(position.x, 32.0, position.z);
                    world.move_player(player, region.clone(), position);
                }
                for record in system.store().get_by_owner(player) {
                    if record.is_live() && rng.gen_bool(0.9) {
                        continue;
                    }
                    let request = SpawnRequest {
                        companion: record.id.to_string(),
                        requester: player,
                        region: region.clone(),
                        position,
                    };
                    match system.spawn(&mut world, &request, now) {
                        Ok(_) => summons += 1,
                        Err(_) => refused += 1,
                    }
                }
            }
        }

        system.tick(&mut world, now);
    }
    let elapsed = timer.elapsed();

    info!(
        "Simulation complete: {:?} total, {:?} per tick, {} deaths, {} summons, {} refused",
        elapsed,
        elapsed / TICKS as u32,
        deaths,
        summons,
        refused
    );

    let mut duplicates = 0;
    for record in system.store().all() {
        if world.live_count(record.id) > 1 {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        warn!("{} companions have more than one live actor", duplicates);
    }

    let path = std::env::temp_dir().join("menagerie-demo").join("companions.json");
    let end = start + (TICKS / TICKS_PER_SECOND) as i64;
    match system.save_if_dirty(&path, end)? {
        Some(bytes) => info!("Saved {} bytes to {}", bytes, path.display()),
        None => info!("Nothing to save"),
    }

    let live = world.entity_count();
    info!(
        "Final state: {} companions, {} live actors across {} regions",
        system.store().len(),
        live,
        world.loaded_regions().len()
    );

    Ok(())
}
