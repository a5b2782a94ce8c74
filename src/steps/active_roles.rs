use crate::core::{MigrationError, Owner, RecordUpdate, Result, SchemaVersion};
use crate::migration::VersionedStep;
use serde_json::Value;

pub const VERSION: SchemaVersion = 5;

pub fn step() -> VersionedStep {
    VersionedStep::new(VERSION, "Active roles").with_owner_migrator(migrate_owner)
}

/// Characters without an active role take the first role they hold.
pub fn migrate_owner(owner: &Owner) -> Result<Option<RecordUpdate>> {
    let Some(roles) = owner.field("roleInfo.roles") else {
        return Ok(None);
    };
    let Value::Array(roles) = roles else {
        return Err(MigrationError::InvalidData(format!(
            "roleInfo.roles of '{}' must be a list, found {}",
            owner.name, roles
        )));
    };
    let has_active = matches!(
        owner.field("roleInfo.activeRole"),
        Some(Value::String(active)) if !active.is_empty()
    );
    if has_active {
        return Ok(None);
    }
    let Some(first) = roles.first() else {
        return Ok(None);
    };
    let role = first.as_str().ok_or_else(|| {
        MigrationError::InvalidData(format!("role entry {} is not a role name", first))
    })?;
    Ok(Some(
        RecordUpdate::new().set("roleInfo.activeRole", Value::String(role.to_string())),
    ))
}
