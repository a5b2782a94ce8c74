use super::numeric;
use crate::core::{MigrationError, Record, RecordUpdate, Result, SchemaVersion};
use crate::migration::VersionedStep;
use serde_json::Value;

pub const VERSION: SchemaVersion = 1;

/// Gear stacks moved from a free-form `quantity` to a numeric `amount`.
pub fn step() -> VersionedStep {
    VersionedStep::new(VERSION, "Gear amounts")
        .only_kinds(["gear", "ammo", "clothing"])
        .with_item_migrator(migrate_record)
}

pub fn migrate_record(record: &Record) -> Result<Option<RecordUpdate>> {
    let mut update = RecordUpdate::new();

    match record.field("quantity") {
        Some(quantity) => {
            let amount = match record.field("amount") {
                Some(Value::Number(existing)) => Value::Number(existing.clone()),
                _ => match quantity {
                    Value::Number(_) => quantity.clone(),
                    Value::Null => Value::from(1),
                    other => numeric(other, "quantity")?.ok_or_else(|| {
                        MigrationError::InvalidData("quantity has no value".to_string())
                    })?,
                },
            };
            update = update.set("amount", amount).delete("quantity");
        }
        None => {
            if let Some(amount) = record.field("amount") {
                if let Some(converted) = numeric(amount, "amount")? {
                    update = update.set("amount", converted);
                }
            }
        }
    }

    Ok(update.non_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gear(data: Value) -> Record {
        Record::new("g1", "Rope", "gear").with_data(data)
    }

    #[test]
    fn quantity_becomes_amount() {
        let update = migrate_record(&gear(json!({"quantity": "3"}))).unwrap().unwrap();
        let mut record = gear(json!({"quantity": "3"}));
        update.apply_to_record(&mut record).unwrap();
        assert_eq!(record.data, json!({"amount": 3}));
    }

    #[test]
    fn existing_numeric_amount_wins() {
        let mut record = gear(json!({"quantity": 9, "amount": 2}));
        let update = migrate_record(&record).unwrap().unwrap();
        update.apply_to_record(&mut record).unwrap();
        assert_eq!(record.data, json!({"amount": 2}));
        // Second pass finds nothing to do.
        assert_eq!(migrate_record(&record).unwrap(), None);
    }

    #[test]
    fn garbage_quantity_is_a_record_error() {
        assert!(migrate_record(&gear(json!({"quantity": "a few"}))).is_err());
    }
}
