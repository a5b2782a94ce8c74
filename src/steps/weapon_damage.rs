use crate::core::{MigrationError, Record, RecordUpdate, Result, SchemaVersion};
use crate::migration::VersionedStep;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

pub const VERSION: SchemaVersion = 2;

lazy_static! {
    static ref DICE: Regex = Regex::new(r"^(?i)(\d+)d(\d+)([+-]\d+)?$")
        .unwrap_or_else(|err| panic!("invalid dice pattern: {err}"));
}

/// Weapon damage stored as `{dice, sides, bonus}` becomes a dice string.
pub fn step() -> VersionedStep {
    VersionedStep::new(VERSION, "Weapon damage dice")
        .only_kinds(["weapon"])
        .with_item_migrator(migrate_record)
}

fn count(damage: &Value, key: &str) -> Result<Option<i64>> {
    match damage.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            MigrationError::InvalidData(format!("damage.{} must be an integer, found {}", key, value))
        }),
    }
}

pub fn migrate_record(record: &Record) -> Result<Option<RecordUpdate>> {
    let Some(damage) = record.field("damage") else {
        return Ok(None);
    };
    match damage {
        Value::String(raw) => {
            let trimmed = raw.trim();
            if !DICE.is_match(trimmed) {
                return Err(MigrationError::InvalidData(format!(
                    "unrecognised damage '{}'",
                    raw
                )));
            }
            let normalized = trimmed.to_lowercase();
            if normalized == *raw {
                Ok(None)
            } else {
                Ok(Some(RecordUpdate::new().set("damage", Value::String(normalized))))
            }
        }
        Value::Object(_) => {
            let dice = count(damage, "dice")?.unwrap_or(1);
            let sides = count(damage, "sides")?.ok_or_else(|| {
                MigrationError::InvalidData("damage object has no 'sides'".to_string())
            })?;
            if dice < 1 || sides < 2 {
                return Err(MigrationError::InvalidData(format!(
                    "damage {}d{} is out of range",
                    dice, sides
                )));
            }
            let formula = match count(damage, "bonus")? {
                Some(bonus) if bonus > 0 => format!("{}d{}+{}", dice, sides, bonus),
                Some(bonus) if bonus < 0 => format!("{}d{}{}", dice, sides, bonus),
                _ => format!("{}d{}", dice, sides),
            };
            Ok(Some(RecordUpdate::new().set("damage", Value::String(formula))))
        }
        other => Err(MigrationError::InvalidData(format!(
            "damage must be a string or an object, found {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weapon(damage: Value) -> Record {
        Record::new("w1", "Militech Crusher", "weapon").with_data(json!({"damage": damage}))
    }

    #[test]
    fn object_damage_becomes_a_formula() {
        let update = migrate_record(&weapon(json!({"dice": 3, "sides": 6, "bonus": 2})))
            .unwrap()
            .unwrap();
        assert_eq!(update, RecordUpdate::new().set("damage", json!("3d6+2")));

        let update = migrate_record(&weapon(json!({"sides": 10, "bonus": -1})))
            .unwrap()
            .unwrap();
        assert_eq!(update, RecordUpdate::new().set("damage", json!("1d10-1")));
    }

    #[test]
    fn canonical_strings_are_left_alone() {
        assert_eq!(migrate_record(&weapon(json!("2d6"))).unwrap(), None);
        assert_eq!(
            migrate_record(&weapon(json!("4D6"))).unwrap(),
            Some(RecordUpdate::new().set("damage", json!("4d6")))
        );
    }

    #[test]
    fn nonsense_damage_is_rejected() {
        assert!(migrate_record(&weapon(json!("lots"))).is_err());
        assert!(migrate_record(&weapon(json!({"dice": 2}))).is_err());
        assert!(migrate_record(&weapon(json!({"dice": 0, "sides": 6}))).is_err());
    }
}
