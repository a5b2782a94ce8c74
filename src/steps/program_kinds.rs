use crate::core::{Record, RecordUpdate, Result, SchemaVersion};
use crate::migration::{StepContext, VersionedStep};
use serde_json::Value;
use tracing::{Level, event};

pub const VERSION: SchemaVersion = 7;

pub const LEGACY_PROGRAM_KIND: &str = "netrunning-program";
pub const PROGRAM_KIND: &str = "program";
pub const LEGACY_DV_SETTING: &str = "dvDisplay";
pub const DV_SETTING: &str = "dvTableDisplay";

/// The program record kind is renamed, which the running process cannot
/// pick up without a restart.
pub fn step() -> VersionedStep {
    VersionedStep::new(VERSION, "Program record kind")
        .halt_after()
        .only_kinds([LEGACY_PROGRAM_KIND])
        .with_settings_migrator(migrate_settings)
        .with_item_migrator(migrate_record)
}

/// Moves the legacy DV display setting under its new key.
pub async fn migrate_settings(ctx: StepContext) -> Result<bool> {
    let store = ctx.store();
    let Some(legacy) = store.setting(LEGACY_DV_SETTING).await? else {
        return Ok(true);
    };
    if store.setting(DV_SETTING).await?.is_none() {
        store.set_setting(DV_SETTING, legacy).await?;
    } else {
        event!(Level::DEBUG, "Keeping existing {}; dropping {}", DV_SETTING, LEGACY_DV_SETTING);
    }
    store.delete_setting(LEGACY_DV_SETTING).await?;
    Ok(true)
}

pub fn migrate_record(record: &Record) -> Result<Option<RecordUpdate>> {
    if !record.is_kind(LEGACY_PROGRAM_KIND) {
        return Ok(None);
    }
    let mut update = RecordUpdate::new().retype(PROGRAM_KIND);
    if let Some(Value::String(class)) = record.field("class") {
        if class.is_empty() {
            update = update.delete("class");
        }
    }
    Ok(Some(update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_programs_are_retyped_once() {
        let mut record = Record::new("p", "Sword", LEGACY_PROGRAM_KIND).with_data(json!({"class": ""}));
        let update = migrate_record(&record).unwrap().unwrap();
        update.apply_to_record(&mut record).unwrap();
        assert_eq!(record.kind, PROGRAM_KIND);
        assert!(record.field("class").is_none());
        assert_eq!(migrate_record(&record).unwrap(), None);
    }
}
