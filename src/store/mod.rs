//! The world store boundary.
//!
//! The migration engine never owns documents; it enumerates them and issues
//! primitive create/update/delete calls through [`WorldStore`]. Every call is
//! an await point.

use crate::core::{
    Container, ContentPack, Folder, Owner, OwnerLocation, Record, RecordUpdate, Result, Scene,
    SchemaVersion,
};
use async_trait::async_trait;
use serde_json::Value;

pub mod memory;

pub use memory::{InMemoryWorldStore, PackSnapshot, StoreStats, WorldContents, WorldSnapshot};

#[async_trait]
pub trait WorldStore: Send + Sync {
    // World-scoped settings.
    async fn schema_version(&self) -> Result<SchemaVersion>;
    async fn set_schema_version(&self, version: SchemaVersion) -> Result<()>;
    async fn setting(&self, key: &str) -> Result<Option<Value>>;
    async fn set_setting(&self, key: &str, value: Value) -> Result<()>;
    async fn delete_setting(&self, key: &str) -> Result<()>;

    // Unowned records.
    async fn records(&self, container: &Container) -> Result<Vec<Record>>;
    async fn record(&self, container: &Container, record_id: &str) -> Result<Option<Record>>;
    /// Creates a record under a freshly assigned id and returns it.
    async fn create_record(&self, container: &Container, record: Record) -> Result<Record>;
    async fn update_record(
        &self,
        container: &Container,
        record_id: &str,
        update: &RecordUpdate,
    ) -> Result<()>;
    async fn delete_record(&self, container: &Container, record_id: &str) -> Result<()>;

    // Owners and their owned records.
    async fn owners(&self, container: &Container) -> Result<Vec<Owner>>;
    async fn owner(&self, location: &OwnerLocation) -> Result<Option<Owner>>;
    async fn update_owner(&self, location: &OwnerLocation, update: &RecordUpdate) -> Result<()>;
    /// Creates an owned record under a freshly assigned id. Overlays carried by
    /// `record` are kept.
    async fn create_owned_record(&self, owner: &OwnerLocation, record: Record) -> Result<Record>;
    /// Must fail with `OwnedOverlayForbidden` when `update` touches overlays.
    async fn update_owned_record(
        &self,
        owner: &OwnerLocation,
        record_id: &str,
        update: &RecordUpdate,
    ) -> Result<()>;
    async fn delete_owned_record(&self, owner: &OwnerLocation, record_id: &str) -> Result<()>;

    // Scenes.
    async fn scenes(&self, container: &Container) -> Result<Vec<Scene>>;

    // Content packs.
    async fn packs(&self) -> Result<Vec<ContentPack>>;
    async fn set_pack_locked(&self, pack_id: &str, locked: bool) -> Result<()>;

    // Folders of unowned world records.
    async fn folders(&self) -> Result<Vec<Folder>>;
    async fn create_folder(&self, name: &str) -> Result<Folder>;
    async fn delete_folder(&self, folder_id: &str) -> Result<()>;
}
