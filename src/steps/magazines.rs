use super::numeric;
use crate::core::{MigrationError, Record, RecordUpdate, Result, SchemaVersion};
use crate::migration::VersionedStep;
use serde_json::Value;

pub const VERSION: SchemaVersion = 6;

pub fn step() -> VersionedStep {
    VersionedStep::new(VERSION, "Magazine normalization")
        .only_kinds(["weapon"])
        .with_item_migrator(migrate_record)
}

/// Drops empty ammo links and turns string counts into numbers.
pub fn migrate_record(record: &Record) -> Result<Option<RecordUpdate>> {
    let Some(magazine) = record.field("magazine") else {
        return Ok(None);
    };
    if !magazine.is_object() {
        return Err(MigrationError::InvalidData(format!(
            "magazine must be an object, found {}",
            magazine
        )));
    }

    let mut update = RecordUpdate::new();
    if let Some(Value::String(ammo)) = magazine.get("ammoId") {
        if ammo.trim().is_empty() {
            update = update.delete("magazine.ammoId");
        }
    }
    if let Some(Value::Null) = magazine.get("ammoId") {
        update = update.delete("magazine.ammoId");
    }
    for key in ["value", "max"] {
        if let Some(count) = magazine.get(key) {
            if let Some(converted) = numeric(count, &format!("magazine.{}", key))? {
                update = update.set(format!("magazine.{}", key), converted);
            }
        }
    }
    Ok(update.non_empty())
}
