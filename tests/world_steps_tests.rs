/// Shipped step chain tests
///
/// A version 0 world pushed through every registered step, plus snapshot
/// persistence of the migrated result.
/// Run with: cargo test --test world_steps_tests

use serde_json::json;
use std::sync::Arc;
use tabletop_migrate::{
    Container, InMemoryWorldStore, MemorySink, MigrationOutcome, MigrationRunner, Owner, Record,
    WorldSnapshot, WorldStore,
    steps::{bonus_overlays::BONUS_OVERLAY_ID, program_kinds},
    world_steps,
};
use tempfile::tempdir;

fn legacy_world() -> WorldSnapshot {
    WorldSnapshot::new()
        .with_setting(program_kinds::LEGACY_DV_SETTING, json!("table"))
        .with_record(Record::new("rope", "Rope", "gear").with_data(json!({"quantity": "2"})))
        .with_record(
            Record::new("icepick", "ICEpick", program_kinds::LEGACY_PROGRAM_KIND)
                .with_data(json!({"class": ""})),
        )
        .with_owner(
            Owner::new("a1", "V", "character")
                .with_data(json!({"roleInfo": {"roles": ["solo", "netrunner"]}}))
                .with_record(Record::new("pistol", "Unity", "weapon").with_data(json!({
                    "damage": {"dice": 2, "sides": 6},
                    "magazine": {"value": "8", "max": "12", "ammoId": ""}
                })))
                .with_record(Record::new("arm", "Cyberarm", "cyberware").with_data(json!({
                    "installedCyberware": ["blade"],
                    "optionSlots": 3
                })))
                .with_record(Record::new("blade", "Mantis Blades", "cyberware").with_data(json!({
                    "bonuses": {"ref": 1},
                    "installedIn": "Owner.a1.Record.arm"
                }))),
        )
}

#[tokio::test]
async fn test_legacy_world_reaches_latest_version() {
    let store = Arc::new(InMemoryWorldStore::from_snapshot(legacy_world()));
    let sink = Arc::new(MemorySink::new());
    let runner = MigrationRunner::new(world_steps().unwrap(), store.clone())
        .with_diagnostics(sink.clone())
        .with_progress(sink.clone());

    let outcome = runner.migrate_to_latest().await.unwrap();

    // The last shipped step renames a record kind and asks for a restart.
    assert!(outcome.requires_restart(), "{:?}", outcome);
    assert_eq!(outcome.version(), program_kinds::VERSION);
    assert_eq!(outcome.reports().len(), 7);
    assert_eq!(outcome.error_count(), 0);
    assert_eq!(store.schema_version().await.unwrap(), program_kinds::VERSION);

    let snapshot = store.snapshot().await;
    let world = Container::World;
    let rope = snapshot.record(&world, "rope").unwrap();
    assert_eq!(rope.field("amount"), Some(&json!(2)));
    assert!(rope.field("quantity").is_none());

    let icepick = snapshot.record(&world, "icepick").unwrap();
    assert_eq!(icepick.kind, program_kinds::PROGRAM_KIND);
    assert!(icepick.field("class").is_none());

    assert_eq!(snapshot.settings.get(program_kinds::DV_SETTING), Some(&json!("table")));
    assert!(!snapshot.settings.contains_key(program_kinds::LEGACY_DV_SETTING));

    let v = &snapshot.contents.owners[0];
    assert_eq!(v.field("roleInfo.activeRole"), Some(&json!("solo")));

    let pistol = v.record("pistol").unwrap();
    assert_eq!(pistol.field("damage"), Some(&json!("2d6")));
    assert_eq!(pistol.field("magazine"), Some(&json!({"value": 8, "max": 12})));

    let blade = v
        .records
        .iter()
        .find(|record| record.name == "Mantis Blades")
        .unwrap();
    assert_ne!(blade.id, "blade");
    assert_eq!(blade.overlays.len(), 1);
    assert_eq!(blade.overlays[0].id, BONUS_OVERLAY_ID);
    assert!(blade.field("bonuses").is_none());

    let arm = v.record("arm").unwrap();
    assert_eq!(arm.field("installedItems.list"), Some(&json!([blade.id.clone()])));
    assert_eq!(arm.field("installedItems.slots"), Some(&json!(3)));
    assert!(arm.field("installedCyberware").is_none());

    assert!(snapshot.folders.is_empty());
    assert!(sink.errors().is_empty());
    let events = sink.progress_events();
    assert_eq!(events.last().map(|event| event.percent), Some(100.0));
}

#[tokio::test]
async fn test_rerun_after_restart_is_up_to_date() {
    let store = Arc::new(InMemoryWorldStore::from_snapshot(legacy_world()));
    let runner = MigrationRunner::new(world_steps().unwrap(), store.clone());

    runner.migrate_to_latest().await.unwrap();
    let migrated = store.snapshot().await;

    let again = runner.migrate_to_latest().await.unwrap();
    assert!(matches!(
        again,
        MigrationOutcome::UpToDate {
            version: program_kinds::VERSION
        }
    ));
    assert_eq!(store.snapshot().await, migrated);
}

#[tokio::test]
async fn test_migrated_world_survives_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("worlds").join("night-city.json");

    let store = Arc::new(InMemoryWorldStore::from_snapshot(legacy_world()));
    let runner = MigrationRunner::new(world_steps().unwrap(), store.clone());
    runner.migrate_to_latest().await.unwrap();
    store.save(&path).await.unwrap();

    assert!(!path.with_extension("tmp").exists());
    let loaded = InMemoryWorldStore::load(&path).await.unwrap();
    assert_eq!(loaded.snapshot().await, store.snapshot().await);
    assert_eq!(loaded.schema_version().await.unwrap(), program_kinds::VERSION);
}
