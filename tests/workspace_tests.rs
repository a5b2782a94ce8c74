/// Backup workspace tests
///
/// Owned records whose overlays change are cloned into a workspace folder,
/// edited there, and restored under a new id with every reference rewritten,
/// including references held in content packs.
/// Run with: cargo test --test workspace_tests

use serde_json::json;
use std::sync::Arc;
use tabletop_migrate::{
    Container, ContentPack, Folder, InMemoryWorldStore, MemorySink, MigrationConfig, MigrationEnv,
    Owner, PackContentKind, PackSnapshot, PackSource, Record, WorldSnapshot,
    steps::bonus_overlays::{self, BONUS_OVERLAY_ID},
};

fn env(store: Arc<InMemoryWorldStore>, sink: Arc<MemorySink>) -> MigrationEnv {
    MigrationEnv {
        store,
        config: Arc::new(MigrationConfig::default()),
        progress: sink.clone(),
        diagnostics: sink,
    }
}

fn cyberware_world() -> WorldSnapshot {
    WorldSnapshot::new()
        .with_record(
            Record::new("manual", "Ripperdoc notes", "journal")
                .with_data(json!({"subject": "Owner.a1.Record.eye"})),
        )
        .with_owner(
            Owner::new("a1", "Viktor", "character")
                .with_record(
                    Record::new("arm", "Cyberarm", "cyberware")
                        .with_data(json!({"installedItems": {"list": ["eye", "other"]}})),
                )
                .with_record(Record::new("eye", "Kiroshi Optics", "cyberware").with_data(json!({
                    "bonuses": {"per": 2},
                    "installedIn": "Owner.a1.Record.arm"
                }))),
        )
        .with_owner(
            Owner::new("a2", "Misty", "character").with_record(
                Record::new("note", "Tarot card", "gear")
                    .with_data(json!({"linkedTo": "Owner.a1.Record.eye"})),
            ),
        )
}

#[tokio::test]
async fn test_restore_rewrites_every_inbound_reference() {
    let store = Arc::new(InMemoryWorldStore::from_snapshot(cyberware_world()));
    let sink = Arc::new(MemorySink::new());

    let report = bonus_overlays::step().run(&env(store.clone(), sink.clone())).await;

    assert!(report.succeeded(), "{:?}", report);
    assert!(report.leftovers.is_empty());

    let snapshot = store.snapshot().await;
    let viktor = &snapshot.contents.owners[0];
    assert!(viktor.record("eye").is_none());
    let restored = viktor
        .records
        .iter()
        .find(|record| record.name == "Kiroshi Optics")
        .unwrap();
    assert_ne!(restored.id, "eye");
    assert!(restored.field("bonuses").is_none());
    assert_eq!(restored.overlays.len(), 1);
    assert_eq!(restored.overlays[0].id, BONUS_OVERLAY_ID);
    assert_eq!(restored.field("installedIn"), Some(&json!("Owner.a1.Record.arm")));

    let arm = viktor.record("arm").unwrap();
    assert_eq!(
        arm.field("installedItems.list"),
        Some(&json!([restored.id.clone(), "other"]))
    );

    let note = snapshot.contents.owners[1].record("note").unwrap();
    assert_eq!(
        note.field("linkedTo"),
        Some(&json!(format!("Owner.a1.Record.{}", restored.id)))
    );
    let manual = snapshot.record(&tabletop_migrate::Container::World, "manual").unwrap();
    assert_eq!(
        manual.field("subject"),
        Some(&json!(format!("Owner.a1.Record.{}", restored.id)))
    );

    // The workspace is gone and nothing was left behind.
    assert!(snapshot.folders.is_empty());
    assert_eq!(snapshot.contents.records.len(), 1);
    assert!(sink.warnings().is_empty());
}

#[tokio::test]
async fn test_second_run_leaves_restored_records_alone() {
    let store = Arc::new(InMemoryWorldStore::from_snapshot(cyberware_world()));
    let sink = Arc::new(MemorySink::new());
    let env = env(store.clone(), sink);

    let first = bonus_overlays::step().run(&env).await;
    assert!(first.succeeded());
    let migrated = store.snapshot().await;

    let second = bonus_overlays::step().run(&env).await;
    assert!(second.succeeded());
    assert_eq!(second.changed, 0);
    assert_eq!(store.snapshot().await, migrated);
}

#[tokio::test]
async fn test_leftover_clones_are_reported_not_deleted() {
    let folder = Folder {
        id: "ws1".into(),
        name: "Migration Workspace: Bonuses to overlays".into(),
    };
    let stale = Record::new("stale", "Old clone", "cyberware")
        .with_data(json!({"bonuses": {"ref": 1}}))
        .in_folder("ws1");
    let store = Arc::new(InMemoryWorldStore::from_snapshot(
        WorldSnapshot::new()
            .with_folder(folder)
            .with_record(stale.clone())
            .with_owner(Owner::new("a1", "Viktor", "character")),
    ));
    let sink = Arc::new(MemorySink::new());

    let report = bonus_overlays::step().run(&env(store.clone(), sink.clone())).await;

    assert!(report.succeeded());
    assert_eq!(report.leftovers.len(), 1);
    assert_eq!(report.leftovers[0].clone_id, "stale");
    assert_eq!(report.leftovers[0].original, None);

    let warnings = sink.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("earlier run"));

    // The workspace folder and its clone were kept, and the clone was not migrated.
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.folders.len(), 1);
    assert_eq!(snapshot.record(&tabletop_migrate::Container::World, "stale"), Some(&stale));
}

#[tokio::test]
async fn test_pack_references_follow_the_pack_policy() {
    let linked = |id: &str| {
        Record::new(id, "Optics manual", "journal").with_data(json!({"linked": "Owner.a1.Record.eye"}))
    };
    let snapshot = WorldSnapshot::new()
        .with_owner(
            Owner::new("a1", "Viktor", "character").with_record(
                Record::new("eye", "Kiroshi Optics", "cyberware")
                    .with_data(json!({"bonuses": {"per": 2}})),
            ),
        )
        .with_pack(
            PackSnapshot::new(
                ContentPack::new("world.gear", "Gear", PackSource::World, PackContentKind::Records)
                    .locked(),
            )
            .with_record(linked("kit")),
        )
        .with_pack(
            PackSnapshot::new(ContentPack::new(
                "core.gear",
                "Core gear",
                PackSource::BuiltIn,
                PackContentKind::Records,
            ))
            .with_record(linked("kit")),
        );
    let store = Arc::new(InMemoryWorldStore::from_snapshot(snapshot));
    let sink = Arc::new(MemorySink::new());

    let report = bonus_overlays::step().run(&env(store.clone(), sink.clone())).await;

    assert!(report.succeeded(), "{:?}", report);
    let snapshot = store.snapshot().await;
    let restored = snapshot.contents.owners[0]
        .records
        .iter()
        .find(|record| record.name == "Kiroshi Optics")
        .unwrap();
    assert_ne!(restored.id, "eye");

    let world_kit = snapshot
        .record(&Container::Pack("world.gear".into()), "kit")
        .unwrap();
    assert_eq!(
        world_kit.field("linked"),
        Some(&json!(format!("Owner.a1.Record.{}", restored.id)))
    );
    let world_gear = snapshot
        .packs
        .iter()
        .find(|candidate| candidate.pack.id == "world.gear")
        .unwrap();
    assert!(world_gear.pack.locked);

    // Built-in packs are never written; the stale reference is reported instead.
    let core_kit = snapshot
        .record(&Container::Pack("core.gear".into()), "kit")
        .unwrap();
    assert_eq!(core_kit.field("linked"), Some(&json!("Owner.a1.Record.eye")));
    let warnings = sink.warnings();
    assert_eq!(warnings.len(), 1, "{:?}", warnings);
    assert!(warnings[0].message.contains("core.gear"));
    assert!(warnings[0].message.contains("Owner.a1.Record.eye"));
}
