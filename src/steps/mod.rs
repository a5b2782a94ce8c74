//! Concrete world-schema steps, one module per version.
//!
//! Every rule checks the current shape of the field it changes and returns
//! `None` once nothing is left to do, so a run interrupted half-way can be
//! repeated from the start.

use crate::core::{MigrationError, Result};
use crate::migration::StepRegistry;
use serde_json::Value;

pub mod active_roles;
pub mod bonus_overlays;
pub mod gear_amounts;
pub mod installed_items;
pub mod magazines;
pub mod program_kinds;
pub mod weapon_damage;

/// The ordered registry of every shipped step.
pub fn world_steps() -> Result<StepRegistry> {
    StepRegistry::new()
        .with_step(gear_amounts::step())?
        .with_step(weapon_damage::step())?
        .with_step(installed_items::step())?
        .with_step(bonus_overlays::step())?
        .with_step(active_roles::step())?
        .with_step(magazines::step())?
        .with_step(program_kinds::step())
}

/// Reads a count stored either as a number or as a numeric string.
pub(crate) fn numeric(value: &Value, field: &str) -> Result<Option<Value>> {
    match value {
        Value::Number(_) => Ok(None),
        Value::Null => Ok(None),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(Some(Value::from(0)));
            }
            if let Ok(int) = trimmed.parse::<i64>() {
                return Ok(Some(Value::from(int)));
            }
            match trimmed.parse::<f64>() {
                Ok(float) if float.is_finite() => Ok(Some(Value::from(float))),
                _ => Err(MigrationError::InvalidData(format!(
                    "'{}' is not a number: {:?}",
                    field, raw
                ))),
            }
        }
        other => Err(MigrationError::InvalidData(format!(
            "'{}' must be a number, found {}",
            field, other
        ))),
    }
}
