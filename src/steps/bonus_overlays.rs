use crate::core::{
    MigrationError, Overlay, OverlayChange, OverlayMode, Record, RecordUpdate, Result,
    SchemaVersion,
};
use crate::migration::VersionedStep;
use serde_json::Value;

pub const VERSION: SchemaVersion = 4;

/// Overlay id used for converted bonuses; re-running upserts the same overlay.
pub const BONUS_OVERLAY_ID: &str = "legacyBonuses";

/// Legacy `bonuses` maps become overlays. Owned records go through the
/// backup workspace because the store refuses overlays on them directly.
pub fn step() -> VersionedStep {
    VersionedStep::new(VERSION, "Bonuses to overlays")
        .with_workspace()
        .only_kinds(["cyberware", "clothing", "gear", "weapon", "program"])
        .with_item_migrator(migrate_record)
}

pub fn migrate_record(record: &Record) -> Result<Option<RecordUpdate>> {
    let Some(bonuses) = record.field("bonuses") else {
        return Ok(None);
    };
    let Value::Object(bonuses) = bonuses else {
        return Err(MigrationError::InvalidData(format!(
            "bonuses must be a map of stat to value, found {}",
            bonuses
        )));
    };

    let mut changes = Vec::new();
    for (stat, value) in bonuses {
        let Some(amount) = value.as_f64() else {
            return Err(MigrationError::InvalidData(format!(
                "bonus for '{}' is not a number: {}",
                stat, value
            )));
        };
        if amount == 0.0 {
            continue;
        }
        changes.push(OverlayChange::new(
            format!("stats.{}.value", stat),
            OverlayMode::Add,
            value.clone(),
        ));
    }

    let mut update = RecordUpdate::new().delete("bonuses");
    if !changes.is_empty() {
        // No origin: the overlay belongs to the record carrying it.
        let mut overlay = Overlay::new(BONUS_OVERLAY_ID, format!("{} bonuses", record.name));
        overlay.changes = changes;
        update = update.upsert_overlay(overlay);
    }
    Ok(Some(update))
}
