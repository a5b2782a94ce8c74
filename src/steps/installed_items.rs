use crate::core::{MigrationError, Record, RecordUpdate, Result, SchemaVersion};
use crate::migration::VersionedStep;
use serde_json::{Value, json};

pub const VERSION: SchemaVersion = 3;

/// Foundational cyberware kept installed ids in `installedCyberware`; the
/// generic `installedItems` container replaces it.
pub fn step() -> VersionedStep {
    VersionedStep::new(VERSION, "Installed items container")
        .only_kinds(["cyberware", "weapon", "gear"])
        .with_item_migrator(migrate_record)
}

fn id_list(value: &Value, field: &str) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    MigrationError::InvalidData(format!("{} holds a non-id entry {}", field, item))
                })
            })
            .collect(),
        other => Err(MigrationError::InvalidData(format!(
            "{} must be a list, found {}",
            field, other
        ))),
    }
}

pub fn migrate_record(record: &Record) -> Result<Option<RecordUpdate>> {
    let Some(legacy) = record.field("installedCyberware") else {
        return Ok(None);
    };
    let mut list = match record.field("installedItems.list") {
        Some(existing) => id_list(existing, "installedItems.list")?,
        None => Vec::new(),
    };
    for id in id_list(legacy, "installedCyberware")? {
        if !list.contains(&id) {
            list.push(id);
        }
    }

    let slots = match record.field("installedItems.slots") {
        Some(slots) if slots.is_number() => slots.clone(),
        _ => record
            .field("optionSlots")
            .filter(|slots| slots.is_number())
            .cloned()
            .unwrap_or_else(|| Value::from(list.len())),
    };
    let used = list.len();

    let update = RecordUpdate::new()
        .set(
            "installedItems",
            json!({
                "list": list,
                "allowed": true,
                "slots": slots,
                "usedSlots": used,
            }),
        )
        .delete("installedCyberware");
    Ok(Some(update))
}
