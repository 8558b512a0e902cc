use chrono::{DateTime, Utc};
use tracing::info;

use crate::state::{AdminState, LoadResult, SaveResult};

/// Snapshot the store into a new timestamped backup.
pub fn save_backup(state: &AdminState, at: DateTime<Utc>) -> Result<SaveResult, String> {
    let system = state.system();
    let document = system.save(at.timestamp());
    let name = state
        .backups
        .write(&document, at)
        .map_err(|e| e.to_string())?;

    Ok(SaveResult {
        name,
        companions: document.companions.len() as u32,
        last_update: document.last_update,
    })
}

/// Backup names, newest first.
pub fn list_backups(state: &AdminState) -> Result<Vec<String>, String> {
    state.backups.list().map_err(|e| e.to_string())
}

/// Replace the live store with a backup. Illegal names are refused before
/// anything is read.
pub fn load_backup(state: &AdminState, name: &str) -> Result<LoadResult, String> {
    let document = state.backups.read(name).map_err(|e| e.to_string())?;

    let mut system = state.system();
    let world = state.world();
    let report = system.load(&document, &*world).map_err(|e| e.to_string())?;
    info!(backup = name, loaded = report.loaded, skipped = report.skipped, "backup restored");

    Ok(LoadResult {
        name: name.to_string(),
        loaded: report.loaded as u32,
        skipped: report.skipped as u32,
        last_update: report.last_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use registry::host::RegionAccess;
    use registry::world::OVERWORLD;
    use registry::{CompanionConfig, CompanionKind, RegionId, SimulationWorld, Vec3};

    fn setup() -> AdminState {
        let mut world = SimulationWorld::new();
        let player = world.connect_player("Alex", RegionId::new(OVERWORLD), Vec3::new(0.5, 64.0, 0.5));
        let handle = world
            .tame(player, "Rex", CompanionKind::Gatherer, Vec3::new(2.5, 64.0, 2.5))
            .unwrap();
        let actor = world.actor(&handle).unwrap();

        let dir = std::env::temp_dir().join(format!("menagerie-backups-{}", uuid::Uuid::new_v4()));
        let state = AdminState::new(world, CompanionConfig::default(), dir).unwrap();
        state.system().on_actor_observed(&actor);
        state
    }

    #[test]
    fn test_save_list_load_cycle() {
        let state = setup();
        assert!(list_backups(&state).unwrap().is_empty());

        let first = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap();
        let saved = save_backup(&state, first).unwrap();
        assert_eq!(saved.name, "2026-03-01T12-00-00-companions.json");
        assert_eq!(saved.companions, 1);
        save_backup(&state, second).unwrap();

        let names = list_backups(&state).unwrap();
        assert_eq!(
            names,
            vec![
                "2026-03-02T08-30-00-companions.json".to_string(),
                "2026-03-01T12-00-00-companions.json".to_string(),
            ]
        );

        let id = state.system().store().all()[0].id;
        state.system().store().remove(id);
        assert!(state.system().store().is_empty());

        let loaded = load_backup(&state, &saved.name).unwrap();
        assert_eq!(loaded.loaded, 1);
        assert_eq!(loaded.skipped, 0);
        assert_eq!(loaded.last_update, saved.last_update);

        let restored = state.system().store().get(id).unwrap();
        assert_eq!(restored.name, "Rex");
        assert!(!restored.is_live());

        let _ = std::fs::remove_dir_all(state.backups.dir());
    }

    #[test]
    fn test_load_rejects_traversal_names() {
        let state = setup();
        for name in [
            "../secrets-companions.json",
            "nested/2026-03-01T12-00-00-companions.json",
            "2026-03-01T12-00-00-world.json",
            "",
        ] {
            let err = load_backup(&state, name).unwrap_err();
            assert!(err.contains("illegal backup file name"), "{}", err);
        }
        assert_eq!(state.system().store().len(), 1);
    }
}
