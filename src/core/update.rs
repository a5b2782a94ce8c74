use super::error::{MigrationError, Result};
use super::types::{Overlay, Owner, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn segments(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(MigrationError::invalid_path(path, "path is empty"));
    }
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(MigrationError::invalid_path(path, "path has an empty segment"));
    }
    Ok(parts)
}

fn parse_index(path: &str, segment: &str) -> Result<usize> {
    segment.parse::<usize>().map_err(|_| {
        MigrationError::invalid_path(path, format!("'{}' is not an array index", segment))
    })
}

/// Reads a dotted path. Numeric segments index into arrays.
pub fn field<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes a dotted path, creating intermediate objects as needed.
pub fn set_field(data: &mut Value, path: &str, value: Value) -> Result<()> {
    let parts = segments(path)?;
    let Some((last, parents)) = parts.split_last() else {
        return Err(MigrationError::invalid_path(path, "path is empty"));
    };

    let mut current = data;
    for segment in parents {
        if current.is_null() {
            *current = empty_object();
        }
        current = match current {
            Value::Object(map) => map
                .entry((*segment).to_string())
                .or_insert_with(empty_object),
            Value::Array(items) => {
                let index = parse_index(path, segment)?;
                let len = items.len();
                items.get_mut(index).ok_or_else(|| {
                    MigrationError::invalid_path(
                        path,
                        format!("index {} out of bounds for length {}", index, len),
                    )
                })?
            }
            _ => {
                return Err(MigrationError::invalid_path(
                    path,
                    format!("segment '{}' does not hold an object", segment),
                ));
            }
        };
    }

    if current.is_null() {
        *current = empty_object();
    }
    match current {
        Value::Object(map) => {
            map.insert((*last).to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = parse_index(path, last)?;
            if index < items.len() {
                items[index] = value;
                Ok(())
            } else if index == items.len() {
                items.push(value);
                Ok(())
            } else {
                Err(MigrationError::invalid_path(
                    path,
                    format!("index {} out of bounds for length {}", index, items.len()),
                ))
            }
        }
        _ => Err(MigrationError::invalid_path(
            path,
            "parent does not hold an object",
        )),
    }
}

/// Removes a dotted path. Returns false when nothing was there.
pub fn delete_field(data: &mut Value, path: &str) -> Result<bool> {
    let parts = segments(path)?;
    let Some((last, parents)) = parts.split_last() else {
        return Ok(false);
    };

    let mut current = data;
    for segment in parents {
        current = match current {
            Value::Object(map) => match map.get_mut(*segment) {
                Some(next) => next,
                None => return Ok(false),
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(next) => next,
                None => return Ok(false),
            },
            _ => return Ok(false),
        };
    }

    match current {
        Value::Object(map) => Ok(map.remove(*last).is_some()),
        Value::Array(items) => match last.parse::<usize>() {
            Ok(index) if index < items.len() => {
                items.remove(index);
                Ok(true)
            }
            _ => Ok(false),
        },
        _ => Ok(false),
    }
}

/// One directive against a record's data.
///
/// Deletion is its own directive: omitting a field never removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FieldChange {
    Set { path: String, value: Value },
    Delete { path: String },
}

impl FieldChange {
    pub fn path(&self) -> &str {
        match self {
            FieldChange::Set { path, .. } | FieldChange::Delete { path } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayChanges {
    #[serde(default)]
    pub upsert: Vec<Overlay>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl OverlayChanges {
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }

    pub fn apply(&self, overlays: &mut Vec<Overlay>) {
        overlays.retain(|overlay| !self.remove.contains(&overlay.id));
        for overlay in &self.upsert {
            match overlays.iter_mut().find(|existing| existing.id == overlay.id) {
                Some(existing) => *existing = overlay.clone(),
                None => overlays.push(overlay.clone()),
            }
        }
    }
}

/// A partial update computed by a migrator and applied by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldChange>,
    #[serde(default)]
    pub overlays: OverlayChanges,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.fields.push(FieldChange::Set {
            path: path.into(),
            value,
        });
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.fields.push(FieldChange::Delete { path: path.into() });
        self
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn retype(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn upsert_overlay(mut self, overlay: Overlay) -> Self {
        self.overlays.upsert.push(overlay);
        self
    }

    pub fn remove_overlay(mut self, overlay_id: impl Into<String>) -> Self {
        self.overlays.remove.push(overlay_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.kind.is_none() && self.fields.is_empty() && self.overlays.is_empty()
    }

    pub fn touches_overlays(&self) -> bool {
        !self.overlays.is_empty()
    }

    /// Turns an empty update into `None` so migrators can report "nothing to do".
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() { None } else { Some(self) }
    }

    pub fn merge(mut self, other: RecordUpdate) -> Self {
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.kind.is_some() {
            self.kind = other.kind;
        }
        self.fields.extend(other.fields);
        self.overlays.upsert.extend(other.overlays.upsert);
        self.overlays.remove.extend(other.overlays.remove);
        self
    }

    /// The same update without its overlay changes.
    pub fn without_overlays(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind.clone(),
            fields: self.fields.clone(),
            overlays: OverlayChanges::default(),
        }
    }

    pub fn apply_to_data(&self, data: &mut Value) -> Result<()> {
        for change in &self.fields {
            match change {
                FieldChange::Set { path, value } => set_field(data, path, value.clone())?,
                FieldChange::Delete { path } => {
                    delete_field(data, path)?;
                }
            }
        }
        Ok(())
    }

    /// Applies all directives, leaving the record untouched on error.
    pub fn apply_to_record(&self, record: &mut Record) -> Result<()> {
        let mut next = record.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(kind) = &self.kind {
            next.kind = kind.clone();
        }
        self.apply_to_data(&mut next.data)?;
        self.overlays.apply(&mut next.overlays);
        *record = next;
        Ok(())
    }

    /// Applies all directives to an owner's own data and overlays.
    pub fn apply_to_owner(&self, owner: &mut Owner) -> Result<()> {
        let mut data = owner.data.clone();
        self.apply_to_data(&mut data)?;
        if let Some(name) = &self.name {
            owner.name = name.clone();
        }
        if let Some(kind) = &self.kind {
            owner.kind = kind.clone();
        }
        owner.data = data;
        self.overlays.apply(&mut owner.overlays);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_field_creates_intermediate_objects() {
        let mut data = json!({});
        set_field(&mut data, "magazine.ammo.value", json!(12)).unwrap();
        assert_eq!(data, json!({"magazine": {"ammo": {"value": 12}}}));
    }

    #[test]
    fn set_field_indexes_arrays_and_appends_at_end() {
        let mut data = json!({"list": ["a", "b"]});
        set_field(&mut data, "list.1", json!("c")).unwrap();
        set_field(&mut data, "list.2", json!("d")).unwrap();
        assert_eq!(data["list"], json!(["a", "c", "d"]));
        assert!(set_field(&mut data, "list.9", json!("x")).is_err());
    }

    #[test]
    fn set_field_rejects_scalar_parent() {
        let mut data = json!({"damage": "2d6"});
        let err = set_field(&mut data, "damage.dice", json!(2)).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidFieldPath { .. }));
    }

    #[test]
    fn delete_field_reports_presence() {
        let mut data = json!({"quantity": 3, "nested": {"keep": 1, "drop": 2}});
        assert!(delete_field(&mut data, "nested.drop").unwrap());
        assert!(!delete_field(&mut data, "nested.missing").unwrap());
        assert!(!delete_field(&mut data, "absent.deeper").unwrap());
        assert_eq!(data, json!({"quantity": 3, "nested": {"keep": 1}}));
    }

    #[test]
    fn field_reads_nested_paths() {
        let data = json!({"installedItems": {"list": ["x1", "x2"]}});
        assert_eq!(field(&data, "installedItems.list.1"), Some(&json!("x2")));
        assert_eq!(field(&data, "installedItems.count"), None);
    }

    #[test]
    fn failed_update_leaves_record_untouched() {
        let mut record = Record::new("r1", "Pistol", "weapon").with_data(json!({"damage": "2d6"}));
        let update = RecordUpdate::new()
            .rename("Heavy Pistol")
            .set("damage.dice", json!(3));
        assert!(update.apply_to_record(&mut record).is_err());
        assert_eq!(record.name, "Pistol");
        assert_eq!(record.data, json!({"damage": "2d6"}));
    }

    #[test]
    fn overlay_changes_replace_by_id() {
        let mut overlays = vec![Overlay::new("o1", "Old"), Overlay::new("o2", "Gone")];
        let changes = OverlayChanges {
            upsert: vec![Overlay::new("o1", "New"), Overlay::new("o3", "Added")],
            remove: vec!["o2".to_string()],
        };
        changes.apply(&mut overlays);
        let labels: Vec<_> = overlays.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["New", "Added"]);
    }

    #[test]
    fn empty_update_collapses_to_none() {
        assert!(RecordUpdate::new().non_empty().is_none());
        assert!(RecordUpdate::new().delete("x").non_empty().is_some());
    }
}
