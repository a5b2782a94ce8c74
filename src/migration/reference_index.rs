//! Index of every cross-reference string in the world and its content
//! packs, keyed by the record id it points at.
//!
//! Restoring a backed-up record gives it a new id. Rather than one rewrite
//! routine per reference kind (installed-in, ammo, programs, roles, ...), the
//! restore consults this index once and rewrites every site generically.

use crate::config::MigrationConfig;
use crate::core::{
    Container, Overlay, OwnedRecordRef, Owner, OwnerLocation, Record, RecordRef, RecordUpdate,
    Result,
};
use crate::store::WorldStore;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// The document a reference string lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceHolder {
    Record {
        container: Container,
        record_id: String,
    },
    Owner(OwnerLocation),
    OwnedRecord(OwnedRecordRef),
}

impl ReferenceHolder {
    /// Writes `update` through the store call matching this holder.
    pub async fn apply(&self, store: &dyn WorldStore, update: &RecordUpdate) -> Result<()> {
        match self {
            ReferenceHolder::Record {
                container,
                record_id,
            } => store.update_record(container, record_id, update).await,
            ReferenceHolder::Owner(location) => store.update_owner(location, update).await,
            ReferenceHolder::OwnedRecord(record) => {
                store
                    .update_owned_record(&record.owner, &record.record_id, update)
                    .await
            }
        }
    }

    pub fn container(&self) -> &Container {
        match self {
            ReferenceHolder::Record { container, .. } => container,
            ReferenceHolder::Owner(location) => location.container(),
            ReferenceHolder::OwnedRecord(record) => record.owner.container(),
        }
    }

    /// The owner whose bare record ids this holder resolves against.
    pub fn owner(&self) -> Option<&OwnerLocation> {
        match self {
            ReferenceHolder::Record { .. } => None,
            ReferenceHolder::Owner(location) => Some(location),
            ReferenceHolder::OwnedRecord(record) => Some(&record.owner),
        }
    }
}

impl fmt::Display for ReferenceHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceHolder::Record {
                container,
                record_id,
            } => f.write_str(&crate::core::unowned_record_path(container, record_id)),
            ReferenceHolder::Owner(location) => write!(f, "{}", location),
            ReferenceHolder::OwnedRecord(record) => write!(f, "{}", record),
        }
    }
}

/// One string that names a record: a data leaf or an overlay's `origin`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSite {
    pub holder: ReferenceHolder,
    /// Dotted path of the leaf inside the holder's `data`, or
    /// `overlays.<id>.origin` for an overlay origin.
    pub path: String,
    pub raw: String,
    /// The overlay carrying the reference, when it is an origin.
    pub overlay: Option<Overlay>,
}

impl ReferenceSite {
    /// The leaf's value after pointing it at `new_id`, keeping its shape.
    pub fn retarget(&self, new_id: &str) -> String {
        match RecordRef::parse(&self.raw) {
            Some(reference) => reference.retarget(new_id),
            None => new_id.to_string(),
        }
    }

    /// Adds this site's rewrite to `update`.
    pub fn rewrite_into(&self, update: RecordUpdate, new_id: &str) -> RecordUpdate {
        let value = self.retarget(new_id);
        match &self.overlay {
            Some(overlay) => {
                let mut overlay = overlay.clone();
                overlay.origin = Some(value);
                update.upsert_overlay(overlay)
            }
            None => update.set(self.path.clone(), Value::String(value)),
        }
    }

    fn reference(&self) -> Option<RecordRef<'_>> {
        RecordRef::parse(&self.raw)
    }

    /// True when this site names `target`. Bare ids resolve against the
    /// holder's own owner; path references carry their owner prefix.
    fn names(&self, target: &OwnedRecordRef) -> bool {
        match self.reference() {
            Some(RecordRef::Bare(_)) => self.holder.owner() == Some(&target.owner),
            Some(RecordRef::Path { prefix, .. }) => {
                prefix == Some(target.owner.path_prefix().as_str())
            }
            None => false,
        }
    }
}

/// Visits every string leaf under `data`, with its dotted path.
fn for_each_string<'a>(data: &'a Value, path: &mut Vec<String>, visit: &mut dyn FnMut(String, &'a str)) {
    match data {
        Value::String(raw) => {
            if !path.is_empty() {
                visit(path.join("."), raw);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(index.to_string());
                for_each_string(item, path, visit);
                path.pop();
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                // Dotted keys cannot be addressed by a field path.
                if key.contains('.') || key.is_empty() {
                    continue;
                }
                path.push(key.clone());
                for_each_string(value, path, visit);
                path.pop();
            }
        }
        _ => {}
    }
}

#[derive(Debug, Default)]
pub struct ReferenceIndex {
    known: HashSet<String>,
    owned: HashMap<OwnerLocation, HashSet<String>>,
    sites: HashMap<String, Vec<ReferenceSite>>,
}

impl ReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans the world and every content pack: unowned records, owners, owned
    /// records and unlinked token deltas, data and overlay origins alike.
    /// Records in backup workspace folders are left out.
    pub async fn build(store: &dyn WorldStore, config: &MigrationConfig) -> Result<Self> {
        let workspace_folders: HashSet<String> = store
            .folders()
            .await?
            .into_iter()
            .filter(|folder| config.is_workspace_folder(&folder.name))
            .map(|folder| folder.id)
            .collect();

        let mut containers = vec![Container::World];
        containers.extend(store.packs().await?.into_iter().map(|pack| Container::Pack(pack.id)));

        let mut records: Vec<(Container, Record)> = Vec::new();
        let mut owners: Vec<(OwnerLocation, Owner)> = Vec::new();
        for container in &containers {
            records.extend(
                store
                    .records(container)
                    .await?
                    .into_iter()
                    .filter(|record| match &record.folder {
                        Some(folder) => !workspace_folders.contains(folder),
                        None => true,
                    })
                    .map(|record| (container.clone(), record)),
            );
            for owner in store.owners(container).await? {
                let location = OwnerLocation::Actor {
                    container: container.clone(),
                    owner_id: owner.id.clone(),
                };
                owners.push((location, owner));
            }
            for scene in store.scenes(container).await? {
                for token in scene.tokens {
                    if token.linked {
                        continue;
                    }
                    if let Some(delta) = token.delta {
                        let location = OwnerLocation::Token {
                            container: container.clone(),
                            scene_id: scene.id.clone(),
                            token_id: token.id.clone(),
                        };
                        owners.push((location, delta));
                    }
                }
            }
        }

        let mut index = Self::new();
        for (_, record) in &records {
            index.add_known(&record.id);
        }
        for (location, owner) in &owners {
            for record in &owner.records {
                index.add_owned(location, &record.id);
            }
        }

        for (container, record) in &records {
            let holder = ReferenceHolder::Record {
                container: container.clone(),
                record_id: record.id.clone(),
            };
            index.index_document(holder.clone(), &record.data);
            index.index_overlays(holder, &record.overlays);
        }
        for (location, owner) in &owners {
            let holder = ReferenceHolder::Owner(location.clone());
            index.index_document(holder.clone(), &owner.data);
            index.index_overlays(holder, &owner.overlays);
            for record in &owner.records {
                let holder =
                    ReferenceHolder::OwnedRecord(OwnedRecordRef::new(location.clone(), record.id.clone()));
                index.index_document(holder.clone(), &record.data);
                index.index_overlays(holder, &record.overlays);
            }
        }
        Ok(index)
    }

    pub fn add_known(&mut self, record_id: &str) {
        self.known.insert(record_id.to_string());
    }

    /// Registers `record_id` as a record owned at `owner`.
    pub fn add_owned(&mut self, owner: &OwnerLocation, record_id: &str) {
        self.add_known(record_id);
        self.owned
            .entry(owner.clone())
            .or_default()
            .insert(record_id.to_string());
    }

    pub fn knows(&self, record_id: &str) -> bool {
        self.known.contains(record_id)
    }

    fn owns(&self, owner: &OwnerLocation, record_id: &str) -> bool {
        self.owned
            .get(owner)
            .map(|ids| ids.contains(record_id))
            .unwrap_or(false)
    }

    fn add_site(&mut self, raw: &str, site: impl FnOnce(&RecordRef<'_>) -> ReferenceSite) {
        let Some(reference) = RecordRef::parse(raw) else {
            return;
        };
        if !reference.is_path() && !self.known.contains(raw) {
            return;
        }
        let site = site(&reference);
        self.sites
            .entry(reference.record_id().to_string())
            .or_default()
            .push(site);
    }

    /// Adds every reference-shaped leaf of `data`. Path references are always
    /// kept; bare ids only when they name a known record.
    pub fn index_document(&mut self, holder: ReferenceHolder, data: &Value) {
        let mut leaves = Vec::new();
        for_each_string(data, &mut Vec::new(), &mut |path, raw| {
            leaves.push((path, raw.to_string()));
        });
        for (path, raw) in leaves {
            let holder = holder.clone();
            self.add_site(&raw, |_| ReferenceSite {
                holder,
                path,
                raw: raw.clone(),
                overlay: None,
            });
        }
    }

    /// Adds the `origin` of every overlay that names a record.
    pub fn index_overlays(&mut self, holder: ReferenceHolder, overlays: &[Overlay]) {
        for overlay in overlays {
            let Some(origin) = &overlay.origin else {
                continue;
            };
            let holder = holder.clone();
            self.add_site(origin, |_| ReferenceSite {
                holder,
                path: format!("overlays.{}.origin", overlay.id),
                raw: origin.clone(),
                overlay: Some(overlay.clone()),
            });
        }
    }

    /// Sites anywhere in the world or its packs that point at `target`.
    pub fn inbound(&self, target: &OwnedRecordRef) -> Vec<&ReferenceSite> {
        let self_holder = ReferenceHolder::OwnedRecord(target.clone());
        self.sites
            .get(&target.record_id)
            .map(|sites| {
                sites
                    .iter()
                    .filter(|site| site.holder != self_holder)
                    .filter(|site| site.names(target))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn site_count(&self) -> usize {
        self.sites.values().map(Vec::len).sum()
    }

    /// Path references in `data` scoped to `owner` whose target `owner` does
    /// not hold.
    pub fn dangling_in(&self, owner: &OwnerLocation, data: &Value) -> Vec<(String, String)> {
        let owner_prefix = owner.path_prefix();
        let mut dangling = Vec::new();
        for_each_string(data, &mut Vec::new(), &mut |path, raw| {
            if let Some(RecordRef::Path {
                prefix: Some(prefix),
                record_id,
            }) = RecordRef::parse(raw)
            {
                if prefix == owner_prefix && !self.owns(owner, record_id) {
                    dangling.push((path, raw.to_string()));
                }
            }
        });
        dangling
    }
}

/// Sites in a standalone document that point at `record_id` under `owner`.
pub fn self_references(owner: &OwnerLocation, record_id: &str, data: &Value) -> Vec<(String, String)> {
    let owner_prefix = owner.path_prefix();
    let mut found = Vec::new();
    for_each_string(data, &mut Vec::new(), &mut |path, raw| match RecordRef::parse(raw) {
        Some(RecordRef::Bare(id)) if id == record_id => found.push((path, raw.to_string())),
        Some(RecordRef::Path {
            prefix: Some(prefix),
            record_id: id,
        }) if id == record_id && prefix == owner_prefix => found.push((path, raw.to_string())),
        _ => {}
    });
    found
}

/// True when an overlay `origin` names the record carrying it: the original
/// owned record (bare or owner-scoped) or its workspace clone.
pub fn is_self_origin(owner: &OwnerLocation, record_id: &str, clone_id: &str, origin: &str) -> bool {
    match RecordRef::parse(origin) {
        Some(RecordRef::Bare(id)) => id == record_id || id == clone_id,
        Some(RecordRef::Path {
            prefix: Some(prefix),
            record_id: id,
        }) => id == record_id && prefix == owner.path_prefix(),
        Some(RecordRef::Path {
            prefix: None,
            record_id: id,
        }) => id == record_id || id == clone_id,
        None => false,
    }
}
