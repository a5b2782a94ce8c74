use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::update::field;

/// Schema version recorded once per world.
pub type SchemaVersion = u32;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// How an overlay change combines with the underlying value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverlayMode {
    #[default]
    Add,
    Multiply,
    Override,
    Upgrade,
    Downgrade,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayChange {
    pub key: String,
    #[serde(default)]
    pub mode: OverlayMode,
    pub value: Value,
}

impl OverlayChange {
    pub fn new(key: impl Into<String>, mode: OverlayMode, value: Value) -> Self {
        Self {
            key: key.into(),
            mode,
            value,
        }
    }
}

/// A rule modifier attached to an owner or a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Overlay {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub changes: Vec<OverlayChange>,
    #[serde(default)]
    pub disabled: bool,
    /// Reference to the record the overlay was transferred from. `None` when
    /// it belongs to the document carrying it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Overlay {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            changes: Vec::new(),
            disabled: false,
            origin: None,
        }
    }

    pub fn with_change(mut self, change: OverlayChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// The unit the store manages: an item-like document with free-form data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            data: empty_object(),
            overlays: Vec::new(),
            folder: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlays.push(overlay);
        self
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder = Some(folder_id.into());
        self
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Reads a dotted path inside `data`.
    pub fn field(&self, path: &str) -> Option<&Value> {
        field(&self.data, path)
    }
}

/// An aggregate (actor) holding owned records and overlays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Owner {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
}

impl Owner {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            data: empty_object(),
            records: Vec::new(),
            overlays: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlays.push(overlay);
        self
    }

    pub fn record(&self, record_id: &str) -> Option<&Record> {
        self.records.iter().find(|record| record.id == record_id)
    }

    pub fn field(&self, path: &str) -> Option<&Value> {
        field(&self.data, path)
    }
}

/// A placement of an owner on a scene.
///
/// Linked tokens share the canonical owner's state. Unlinked tokens carry a
/// private delta-owner, which is the only part that needs per-token migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default = "default_linked")]
    pub linked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Owner>,
}

fn default_linked() -> bool {
    true
}

impl Token {
    pub fn linked(id: impl Into<String>, name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: Some(owner_id.into()),
            linked: true,
            delta: None,
        }
    }

    pub fn unlinked(
        id: impl Into<String>,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        delta: Owner,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: Some(owner_id.into()),
            linked: false,
            delta: Some(delta),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scene {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tokens: Vec<Token>,
}

impl Scene {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tokens: Vec::new(),
        }
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.tokens.push(token);
        self
    }
}

/// A named container of unowned records, used as a staging area.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Folder {
    pub id: String,
    pub name: String,
}

/// Where a content pack comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PackSource {
    /// Authored inside this world.
    World,
    /// Shipped by an installed extension.
    Extension { package: String },
    /// Shipped with the game system itself.
    BuiltIn,
}

/// The single document kind a content pack holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PackContentKind {
    Records,
    Owners,
    Scenes,
}

/// Content pack metadata. Contents are enumerated through the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentPack {
    pub id: String,
    pub label: String,
    pub source: PackSource,
    pub content_kind: PackContentKind,
    #[serde(default)]
    pub locked: bool,
}

impl ContentPack {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        source: PackSource,
        content_kind: PackContentKind,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            source,
            content_kind,
            locked: false,
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }
}

/// The live world tree or one content pack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Container {
    World,
    Pack(String),
}

impl Container {
    pub fn pack_id(&self) -> Option<&str> {
        match self {
            Container::World => None,
            Container::Pack(id) => Some(id),
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::World => write!(f, "world"),
            Container::Pack(id) => write!(f, "pack '{}'", id),
        }
    }
}

/// Addresses an owner: a canonical actor or an unlinked token's delta-owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerLocation {
    Actor {
        container: Container,
        owner_id: String,
    },
    Token {
        container: Container,
        scene_id: String,
        token_id: String,
    },
}

impl OwnerLocation {
    pub fn world_actor(owner_id: impl Into<String>) -> Self {
        Self::Actor {
            container: Container::World,
            owner_id: owner_id.into(),
        }
    }

    pub fn container(&self) -> &Container {
        match self {
            Self::Actor { container, .. } | Self::Token { container, .. } => container,
        }
    }

    /// Reference path prefix used for records owned at this location.
    pub fn path_prefix(&self) -> String {
        let base = match self {
            Self::Actor { owner_id, .. } => format!("Owner.{}", owner_id),
            Self::Token {
                scene_id, token_id, ..
            } => format!("Scene.{}.Token.{}", scene_id, token_id),
        };
        match self.container() {
            Container::World => base,
            Container::Pack(pack) => format!("Pack.{}.{}", pack, base),
        }
    }
}

impl fmt::Display for OwnerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path_prefix())
    }
}

/// Addresses one owned record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnedRecordRef {
    pub owner: OwnerLocation,
    pub record_id: String,
}

impl OwnedRecordRef {
    pub fn new(owner: OwnerLocation, record_id: impl Into<String>) -> Self {
        Self {
            owner,
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for OwnedRecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.Record.{}", self.owner.path_prefix(), self.record_id)
    }
}
