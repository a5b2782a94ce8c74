/// Content pack tests
///
/// Pack admission by provenance, lock restoration after both successful
/// and failing pack migrations, and scene packs placing actors from other packs.
/// Run with: cargo test --test pack_tests

use serde_json::json;
use std::sync::Arc;
use tabletop_migrate::{
    Container, ContentPack, InMemoryWorldStore, MemorySink, MigrationConfig, MigrationEnv, Owner,
    OwnerLocation, PackContentKind, PackSnapshot, PackSource, Phase, Record, Scene, StepStatus,
    Token, WorldSnapshot,
    steps::{active_roles, weapon_damage},
};

fn env(store: Arc<InMemoryWorldStore>, sink: Arc<MemorySink>, config: MigrationConfig) -> MigrationEnv {
    MigrationEnv {
        store,
        config: Arc::new(config),
        progress: sink.clone(),
        diagnostics: sink,
    }
}

fn weapon(id: &str, damage: serde_json::Value) -> Record {
    Record::new(id, "Lexington", "weapon").with_data(json!({"damage": damage}))
}

fn records_pack(id: &str, source: PackSource) -> ContentPack {
    ContentPack::new(id, id, source, PackContentKind::Records)
}

fn armory() -> WorldSnapshot {
    WorldSnapshot::new()
        .with_pack(
            PackSnapshot::new(records_pack("world.armory", PackSource::World).locked())
                .with_record(weapon("w1", json!({"dice": 2, "sides": 6}))),
        )
        .with_pack(
            PackSnapshot::new(records_pack(
                "ext.armory",
                PackSource::Extension {
                    package: "arasaka-arms".into(),
                },
            ))
            .with_record(weapon("w2", json!({"dice": 3, "sides": 6}))),
        )
        .with_pack(
            PackSnapshot::new(records_pack("core.armory", PackSource::BuiltIn))
                .with_record(weapon("w3", json!({"dice": 4, "sides": 6}))),
        )
}

fn pack_damage(snapshot: &WorldSnapshot, pack: &str, record: &str) -> serde_json::Value {
    snapshot
        .record(&Container::Pack(pack.to_string()), record)
        .and_then(|record| record.field("damage"))
        .cloned()
        .unwrap_or_default()
}

fn pack_locked(snapshot: &WorldSnapshot, pack: &str) -> bool {
    snapshot
        .packs
        .iter()
        .find(|candidate| candidate.pack.id == pack)
        .map(|candidate| candidate.pack.locked)
        .unwrap_or(false)
}

#[tokio::test]
async fn test_world_packs_migrate_and_relock() {
    let store = Arc::new(InMemoryWorldStore::from_snapshot(armory()));
    let sink = Arc::new(MemorySink::new());

    let report = weapon_damage::step()
        .run(&env(store.clone(), sink, MigrationConfig::default()))
        .await;

    assert!(report.succeeded(), "{:?}", report);
    let snapshot = store.snapshot().await;
    assert_eq!(pack_damage(&snapshot, "world.armory", "w1"), json!("2d6"));
    assert!(pack_locked(&snapshot, "world.armory"));

    // Extension and built-in packs are out of scope by default.
    assert_eq!(pack_damage(&snapshot, "ext.armory", "w2"), json!({"dice": 3, "sides": 6}));
    assert_eq!(pack_damage(&snapshot, "core.armory", "w3"), json!({"dice": 4, "sides": 6}));
}

#[tokio::test]
async fn test_extension_packs_follow_configuration() {
    let store = Arc::new(InMemoryWorldStore::from_snapshot(armory()));
    let sink = Arc::new(MemorySink::new());
    let config = MigrationConfig::default().extension_packs(true);

    let report = weapon_damage::step().run(&env(store.clone(), sink, config)).await;

    assert!(report.succeeded());
    let snapshot = store.snapshot().await;
    assert_eq!(pack_damage(&snapshot, "ext.armory", "w2"), json!("3d6"));
    assert_eq!(pack_damage(&snapshot, "core.armory", "w3"), json!({"dice": 4, "sides": 6}));
}

#[tokio::test]
async fn test_lock_is_restored_when_pack_migration_fails() {
    let snapshot = WorldSnapshot::new().with_pack(
        PackSnapshot::new(records_pack("world.broken", PackSource::World).locked())
            .with_record(weapon("ok", json!({"dice": 1, "sides": 10})))
            .with_record(weapon("bad", json!("a handful"))),
    );
    let store = Arc::new(InMemoryWorldStore::from_snapshot(snapshot));
    let sink = Arc::new(MemorySink::new());

    let report = weapon_damage::step()
        .run(&env(store.clone(), sink.clone(), MigrationConfig::default()))
        .await;

    assert_eq!(report.status, StepStatus::Failed { phase: Phase::Packs });
    assert_eq!(report.error_count, 1);
    assert_eq!(report.failures[0].pack.as_deref(), Some("world.broken"));

    let snapshot = store.snapshot().await;
    assert!(pack_locked(&snapshot, "world.broken"));
    assert_eq!(pack_damage(&snapshot, "world.broken", "ok"), json!("1d10"));
    assert!(
        sink.errors()
            .iter()
            .any(|diagnostic| diagnostic.context.pack.as_deref() == Some("world.broken"))
    );
}

#[tokio::test]
async fn test_locked_packs_are_skipped_when_unlocking_is_disabled() {
    let store = Arc::new(InMemoryWorldStore::from_snapshot(armory()));
    let sink = Arc::new(MemorySink::new());
    let mut config = MigrationConfig::default();
    config.packs.unlock_locked = false;

    let report = weapon_damage::step().run(&env(store.clone(), sink, config)).await;

    assert!(report.succeeded());
    let snapshot = store.snapshot().await;
    assert_eq!(pack_damage(&snapshot, "world.armory", "w1"), json!({"dice": 2, "sides": 6}));
    assert!(pack_locked(&snapshot, "world.armory"));
}

#[tokio::test]
async fn test_owner_packs_use_owner_logic_only() {
    let snapshot = WorldSnapshot::new()
        .with_pack(
            PackSnapshot::new(
                ContentPack::new("world.npcs", "NPCs", PackSource::World, PackContentKind::Owners)
                    .locked(),
            )
            .with_owner(
                Owner::new("n1", "Fixer", "character")
                    .with_data(json!({"roleInfo": {"roles": ["fixer"]}})),
            ),
        )
        .with_pack(
            PackSnapshot::new(records_pack("world.armory", PackSource::World).locked())
                .with_record(weapon("w1", json!({"dice": 2, "sides": 6}))),
        );
    let store = Arc::new(InMemoryWorldStore::from_snapshot(snapshot));
    let sink = Arc::new(MemorySink::new());

    let report = active_roles::step()
        .run(&env(store.clone(), sink, MigrationConfig::default()))
        .await;

    assert!(report.succeeded());
    let snapshot = store.snapshot().await;
    let npc = &snapshot.packs[0].contents.owners[0];
    assert_eq!(npc.field("roleInfo.activeRole"), Some(&json!("fixer")));
    assert!(pack_locked(&snapshot, "world.npcs"));
    assert!(pack_locked(&snapshot, "world.armory"));
}

#[tokio::test]
async fn test_scene_packs_place_actors_from_other_packs() {
    let role_data = |role: &str| json!({"roleInfo": {"roles": [role], "activeRole": ""}});
    let snapshot = WorldSnapshot::new()
        .with_pack(
            PackSnapshot::new(ContentPack::new(
                "world.npcs",
                "NPCs",
                PackSource::World,
                PackContentKind::Owners,
            ))
            .with_owner(Owner::new("n1", "Fixer", "character").with_data(role_data("fixer"))),
        )
        .with_pack(
            PackSnapshot::new(
                ContentPack::new("world.scenes", "Scenes", PackSource::World, PackContentKind::Scenes)
                    .locked(),
            )
            .with_scene(Scene::new("s1", "Afterlife").with_token(Token::unlinked(
                "t1",
                "Fixer (disguised)",
                "n1",
                Owner::new("n1", "Fixer", "character").with_data(role_data("nomad")),
            ))),
        );
    let store = Arc::new(InMemoryWorldStore::from_snapshot(snapshot));
    let sink = Arc::new(MemorySink::new());

    let report = active_roles::step()
        .run(&env(store.clone(), sink.clone(), MigrationConfig::default()))
        .await;

    assert!(report.succeeded(), "{:?}", report);
    let snapshot = store.snapshot().await;
    let delta = snapshot
        .owner(&OwnerLocation::Token {
            container: Container::Pack("world.scenes".into()),
            scene_id: "s1".into(),
            token_id: "t1".into(),
        })
        .unwrap();
    assert_eq!(delta.field("roleInfo.activeRole"), Some(&json!("nomad")));
    assert!(pack_locked(&snapshot, "world.scenes"));
    assert!(sink.warnings().is_empty(), "{:?}", sink.warnings());
}
