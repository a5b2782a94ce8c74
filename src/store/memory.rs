use super::WorldStore;
use crate::core::{
    Container, ContentPack, Folder, MigrationError, Owner, OwnerLocation, Record, RecordUpdate,
    Result, Scene, SchemaVersion,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Documents held by the world or by one content pack.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldContents {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
}

impl WorldContents {
    fn owner(&self, location: &OwnerLocation) -> Option<&Owner> {
        match location {
            OwnerLocation::Actor { owner_id, .. } => {
                self.owners.iter().find(|owner| &owner.id == owner_id)
            }
            OwnerLocation::Token {
                scene_id, token_id, ..
            } => self
                .scenes
                .iter()
                .find(|scene| &scene.id == scene_id)?
                .tokens
                .iter()
                .find(|token| &token.id == token_id && !token.linked)?
                .delta
                .as_ref(),
        }
    }

    fn owner_mut(&mut self, location: &OwnerLocation) -> Result<&mut Owner> {
        match location {
            OwnerLocation::Actor { owner_id, .. } => self
                .owners
                .iter_mut()
                .find(|owner| &owner.id == owner_id)
                .ok_or_else(|| MigrationError::OwnerNotFound(location.to_string())),
            OwnerLocation::Token {
                scene_id, token_id, ..
            } => {
                let scene = self
                    .scenes
                    .iter_mut()
                    .find(|scene| &scene.id == scene_id)
                    .ok_or_else(|| MigrationError::SceneNotFound(scene_id.clone()))?;
                let token = scene
                    .tokens
                    .iter_mut()
                    .find(|token| &token.id == token_id)
                    .ok_or_else(|| MigrationError::TokenNotFound {
                        scene: scene_id.clone(),
                        token: token_id.clone(),
                    })?;
                if token.linked {
                    return Err(MigrationError::OwnerNotFound(location.to_string()));
                }
                token
                    .delta
                    .as_mut()
                    .ok_or_else(|| MigrationError::OwnerNotFound(location.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackSnapshot {
    #[serde(flatten)]
    pub pack: ContentPack,
    #[serde(flatten)]
    pub contents: WorldContents,
}

impl PackSnapshot {
    pub fn new(pack: ContentPack) -> Self {
        Self {
            pack,
            contents: WorldContents::default(),
        }
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.contents.records.push(record);
        self
    }

    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.contents.owners.push(owner);
        self
    }

    pub fn with_scene(mut self, scene: Scene) -> Self {
        self.contents.scenes.push(scene);
        self
    }
}

/// Serializable image of a whole world, including its packs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    #[serde(default)]
    pub schema_version: SchemaVersion,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(flatten)]
    pub contents: WorldContents,
    #[serde(default)]
    pub packs: Vec<PackSnapshot>,
}

impl WorldSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.contents.records.push(record);
        self
    }

    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.contents.owners.push(owner);
        self
    }

    pub fn with_scene(mut self, scene: Scene) -> Self {
        self.contents.scenes.push(scene);
        self
    }

    pub fn with_pack(mut self, pack: PackSnapshot) -> Self {
        self.packs.push(pack);
        self
    }

    pub fn with_folder(mut self, folder: Folder) -> Self {
        self.folders.push(folder);
        self
    }

    pub fn contents(&self, container: &Container) -> Result<&WorldContents> {
        match container {
            Container::World => Ok(&self.contents),
            Container::Pack(pack_id) => self
                .packs
                .iter()
                .find(|pack| &pack.pack.id == pack_id)
                .map(|pack| &pack.contents)
                .ok_or_else(|| MigrationError::PackNotFound(pack_id.clone())),
        }
    }

    /// Mutable access for writes; locked packs refuse.
    fn contents_for_write(&mut self, container: &Container) -> Result<&mut WorldContents> {
        match container {
            Container::World => Ok(&mut self.contents),
            Container::Pack(pack_id) => {
                let pack = self
                    .packs
                    .iter_mut()
                    .find(|pack| &pack.pack.id == pack_id)
                    .ok_or_else(|| MigrationError::PackNotFound(pack_id.clone()))?;
                if pack.pack.locked {
                    return Err(MigrationError::PackLocked(pack_id.clone()));
                }
                Ok(&mut pack.contents)
            }
        }
    }

    pub fn owner(&self, location: &OwnerLocation) -> Option<&Owner> {
        self.contents(location.container()).ok()?.owner(location)
    }

    pub fn record(&self, container: &Container, record_id: &str) -> Option<&Record> {
        self.contents(container)
            .ok()?
            .records
            .iter()
            .find(|record| record.id == record_id)
    }
}

/// Call counters, for asserting how much work a migration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
}

impl StoreStats {
    pub fn total(&self) -> u64 {
        self.reads + self.writes
    }
}

fn new_record_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Reference [`WorldStore`] keeping the whole world in memory.
#[derive(Debug, Default)]
pub struct InMemoryWorldStore {
    state: Mutex<WorldSnapshot>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryWorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: WorldSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Loads a world snapshot from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).await?;
        let snapshot: WorldSnapshot = serde_json::from_str(&raw)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Writes the world to a temporary file and atomically renames it to `path`.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = {
            let state = self.state.lock().await;
            serde_json::to_vec_pretty(&*state)?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Copy of the current world. Not counted in [`StoreStats`].
    pub async fn snapshot(&self) -> WorldSnapshot {
        self.state.lock().await.clone()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(AtomicOrdering::Relaxed),
            writes: self.writes.load(AtomicOrdering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.reads.store(0, AtomicOrdering::Relaxed);
        self.writes.store(0, AtomicOrdering::Relaxed);
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

#[async_trait]
impl WorldStore for InMemoryWorldStore {
    async fn schema_version(&self) -> Result<SchemaVersion> {
        self.count_read();
        Ok(self.state.lock().await.schema_version)
    }

    async fn set_schema_version(&self, version: SchemaVersion) -> Result<()> {
        self.count_write();
        self.state.lock().await.schema_version = version;
        Ok(())
    }

    async fn setting(&self, key: &str) -> Result<Option<Value>> {
        self.count_read();
        Ok(self.state.lock().await.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: Value) -> Result<()> {
        self.count_write();
        self.state
            .lock()
            .await
            .settings
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        self.count_write();
        self.state.lock().await.settings.remove(key);
        Ok(())
    }

    async fn records(&self, container: &Container) -> Result<Vec<Record>> {
        self.count_read();
        let state = self.state.lock().await;
        Ok(state.contents(container)?.records.clone())
    }

    async fn record(&self, container: &Container, record_id: &str) -> Result<Option<Record>> {
        self.count_read();
        let state = self.state.lock().await;
        Ok(state
            .contents(container)?
            .records
            .iter()
            .find(|record| record.id == record_id)
            .cloned())
    }

    async fn create_record(&self, container: &Container, mut record: Record) -> Result<Record> {
        self.count_write();
        let mut state = self.state.lock().await;
        if let Some(folder_id) = &record.folder {
            if !state.folders.iter().any(|folder| &folder.id == folder_id) {
                return Err(MigrationError::FolderNotFound(folder_id.clone()));
            }
        }
        record.id = new_record_id();
        state.contents_for_write(container)?.records.push(record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        container: &Container,
        record_id: &str,
        update: &RecordUpdate,
    ) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        let record = state
            .contents_for_write(container)?
            .records
            .iter_mut()
            .find(|record| record.id == record_id)
            .ok_or_else(|| MigrationError::RecordNotFound(record_id.to_string()))?;
        update.apply_to_record(record)
    }

    async fn delete_record(&self, container: &Container, record_id: &str) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        let records = &mut state.contents_for_write(container)?.records;
        let before = records.len();
        records.retain(|record| record.id != record_id);
        if records.len() == before {
            return Err(MigrationError::RecordNotFound(record_id.to_string()));
        }
        Ok(())
    }

    async fn owners(&self, container: &Container) -> Result<Vec<Owner>> {
        self.count_read();
        let state = self.state.lock().await;
        Ok(state.contents(container)?.owners.clone())
    }

    async fn owner(&self, location: &OwnerLocation) -> Result<Option<Owner>> {
        self.count_read();
        let state = self.state.lock().await;
        Ok(state.contents(location.container())?.owner(location).cloned())
    }

    async fn update_owner(&self, location: &OwnerLocation, update: &RecordUpdate) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        let owner = state
            .contents_for_write(location.container())?
            .owner_mut(location)?;
        update.apply_to_owner(owner)
    }

    async fn create_owned_record(&self, owner: &OwnerLocation, mut record: Record) -> Result<Record> {
        self.count_write();
        let mut state = self.state.lock().await;
        let target = state.contents_for_write(owner.container())?.owner_mut(owner)?;
        record.id = new_record_id();
        record.folder = None;
        target.records.push(record.clone());
        Ok(record)
    }

    async fn update_owned_record(
        &self,
        owner: &OwnerLocation,
        record_id: &str,
        update: &RecordUpdate,
    ) -> Result<()> {
        self.count_write();
        if update.touches_overlays() {
            return Err(MigrationError::OwnedOverlayForbidden(format!(
                "{}.Record.{}",
                owner, record_id
            )));
        }
        let mut state = self.state.lock().await;
        let target = state.contents_for_write(owner.container())?.owner_mut(owner)?;
        let record = target
            .records
            .iter_mut()
            .find(|record| record.id == record_id)
            .ok_or_else(|| MigrationError::RecordNotFound(format!("{}.Record.{}", owner, record_id)))?;
        update.apply_to_record(record)
    }

    async fn delete_owned_record(&self, owner: &OwnerLocation, record_id: &str) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        let target = state.contents_for_write(owner.container())?.owner_mut(owner)?;
        let before = target.records.len();
        target.records.retain(|record| record.id != record_id);
        if target.records.len() == before {
            return Err(MigrationError::RecordNotFound(format!(
                "{}.Record.{}",
                owner, record_id
            )));
        }
        Ok(())
    }

    async fn scenes(&self, container: &Container) -> Result<Vec<Scene>> {
        self.count_read();
        let state = self.state.lock().await;
        Ok(state.contents(container)?.scenes.clone())
    }

    async fn packs(&self) -> Result<Vec<ContentPack>> {
        self.count_read();
        let state = self.state.lock().await;
        Ok(state.packs.iter().map(|pack| pack.pack.clone()).collect())
    }

    async fn set_pack_locked(&self, pack_id: &str, locked: bool) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        let pack = state
            .packs
            .iter_mut()
            .find(|pack| pack.pack.id == pack_id)
            .ok_or_else(|| MigrationError::PackNotFound(pack_id.to_string()))?;
        pack.pack.locked = locked;
        Ok(())
    }

    async fn folders(&self) -> Result<Vec<Folder>> {
        self.count_read();
        Ok(self.state.lock().await.folders.clone())
    }

    async fn create_folder(&self, name: &str) -> Result<Folder> {
        self.count_write();
        let folder = Folder {
            id: new_record_id(),
            name: name.to_string(),
        };
        self.state.lock().await.folders.push(folder.clone());
        Ok(folder)
    }

    async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        if !state.folders.iter().any(|folder| folder.id == folder_id) {
            return Err(MigrationError::FolderNotFound(folder_id.to_string()));
        }
        let occupied = state
            .contents
            .records
            .iter()
            .any(|record| record.folder.as_deref() == Some(folder_id));
        if occupied {
            return Err(MigrationError::Store(format!(
                "folder '{}' still holds records",
                folder_id
            )));
        }
        state.folders.retain(|folder| folder.id != folder_id);
        Ok(())
    }
}
