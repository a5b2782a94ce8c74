//! Staging area for owned records whose overlays must change.
//!
//! The store refuses overlay edits on owned records. A workspace clones the
//! record into a folder of unowned records, lets the step edit the clone
//! there, then promotes the clone back onto the owner under a new id and
//! points every inbound reference at it.

use super::pack_lock::PackLockGuard;
use super::reference_index::{ReferenceHolder, ReferenceIndex, is_self_origin, self_references};
use crate::config::{MigrationConfig, PackAdmission};
use crate::core::{
    Container, ContentPack, Folder, MigrationError, OwnedRecordRef, Record, RecordUpdate, Result,
    SchemaVersion,
};
use crate::sink::{DiagnosticContext, DiagnosticSink};
use crate::store::WorldStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Level, event};

/// Where a clone came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub clone_id: String,
    pub original: OwnedRecordRef,
    pub record_name: String,
    pub owner_name: String,
}

/// A reference the restore could not rewrite or resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub original: OwnedRecordRef,
    pub record_name: String,
    pub owner_name: String,
    /// Document holding the reference, when it is not the restored record.
    pub holder: Option<String>,
    /// Content pack the holder lives in.
    pub holder_pack: Option<String>,
    pub path: String,
    pub reference: String,
    pub reason: String,
    /// Content pack the owner lives in.
    pub pack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: OwnedRecordRef,
    pub rewritten: usize,
    pub unresolved: Vec<UnresolvedReference>,
}

/// A clone still sitting in a workspace when it closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftoverClone {
    pub clone_id: String,
    pub clone_name: String,
    /// `None` when it was left by an earlier run.
    pub original: Option<OwnedRecordRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceClosure {
    pub deleted: bool,
    pub leftovers: Vec<LeftoverClone>,
}

pub struct BackupWorkspace {
    store: Arc<dyn WorldStore>,
    config: Arc<MigrationConfig>,
    diagnostics: Arc<dyn DiagnosticSink>,
    step_name: String,
    target_version: SchemaVersion,
    folder: Folder,
    entries: Mutex<HashMap<String, BackupEntry>>,
    // One backup/restore cycle at a time, so each restore indexes a settled world.
    cycle: Mutex<()>,
}

impl BackupWorkspace {
    /// Opens the workspace folder for `step_name`, reusing one that exists.
    pub async fn create(
        store: Arc<dyn WorldStore>,
        config: Arc<MigrationConfig>,
        diagnostics: Arc<dyn DiagnosticSink>,
        step_name: &str,
        target_version: SchemaVersion,
    ) -> Result<Self> {
        let name = format!("{}: {}", config.workspace_prefix, step_name);
        let existing = store
            .folders()
            .await?
            .into_iter()
            .find(|folder| folder.name == name);
        let folder = match existing {
            Some(folder) => {
                event!(Level::DEBUG, folder = %folder.id, "Reusing backup workspace '{}'", name);
                folder
            }
            None => store.create_folder(&name).await?,
        };
        Ok(Self {
            store,
            config,
            diagnostics,
            step_name: step_name.to_string(),
            target_version,
            folder,
            entries: Mutex::new(HashMap::new()),
            cycle: Mutex::new(()),
        })
    }

    pub fn folder_id(&self) -> &str {
        &self.folder.id
    }

    pub fn folder_name(&self) -> &str {
        &self.folder.name
    }

    pub async fn entries(&self) -> Vec<BackupEntry> {
        self.entries.lock().await.values().cloned().collect()
    }

    fn context(&self, original: &OwnedRecordRef) -> DiagnosticContext {
        let mut context = DiagnosticContext::new()
            .step(self.step_name.clone(), self.target_version)
            .owner(original.owner.to_string())
            .record(original.record_id.clone());
        if let Some(pack) = original.owner.container().pack_id() {
            context = context.pack(pack);
        }
        context
    }

    /// Copies an owned record, overlays included, into the workspace.
    ///
    /// Every call makes a new clone; callers track what they already backed up.
    pub async fn backup(&self, original: &OwnedRecordRef) -> Result<Record> {
        let owner = self
            .store
            .owner(&original.owner)
            .await?
            .ok_or_else(|| MigrationError::OwnerNotFound(original.owner.to_string()))?;
        let record = owner
            .record(&original.record_id)
            .cloned()
            .ok_or_else(|| MigrationError::RecordNotFound(original.to_string()))?;

        let mut clone = record.clone();
        clone.folder = Some(self.folder.id.clone());
        let clone = self.store.create_record(&Container::World, clone).await?;

        self.entries.lock().await.insert(
            clone.id.clone(),
            BackupEntry {
                clone_id: clone.id.clone(),
                original: original.clone(),
                record_name: record.name,
                owner_name: owner.name,
            },
        );
        event!(Level::DEBUG, clone = %clone.id, original = %original, "Backed up owned record");
        Ok(clone)
    }

    /// Edits a clone through the unowned path, where overlays are legal.
    pub async fn update_clone(&self, clone_id: &str, update: &RecordUpdate) -> Result<()> {
        self.store
            .update_record(&Container::World, clone_id, update)
            .await
    }

    /// Promotes a clone back onto its original owner.
    ///
    /// Order: new owned record, reference rewrite, delete original, delete
    /// clone. A failure before the original is deleted leaves the clone in
    /// the workspace for [`close`](Self::close) to report.
    pub async fn restore(&self, clone_id: &str) -> Result<RestoreReport> {
        let entry = self
            .entries
            .lock()
            .await
            .get(clone_id)
            .cloned()
            .ok_or_else(|| {
                MigrationError::Workspace(format!("'{}' is not a clone in this workspace", clone_id))
            })?;
        let clone = self
            .store
            .record(&Container::World, clone_id)
            .await?
            .ok_or_else(|| MigrationError::RecordNotFound(clone_id.to_string()))?;

        let owner = &entry.original.owner;
        let packs: HashMap<String, ContentPack> = self
            .store
            .packs()
            .await?
            .into_iter()
            .map(|pack| (pack.id.clone(), pack))
            .collect();
        let index = ReferenceIndex::build(self.store.as_ref(), &self.config).await?;

        // Origins naming the record itself are cleared before promotion.
        let mut promoted = clone;
        promoted.folder = None;
        for overlay in &mut promoted.overlays {
            let names_itself = overlay.origin.as_deref().is_some_and(|origin| {
                is_self_origin(owner, &entry.original.record_id, clone_id, origin)
            });
            if names_itself {
                overlay.origin = None;
            }
        }
        let created = self.store.create_owned_record(owner, promoted).await?;
        let restored = OwnedRecordRef::new(owner.clone(), created.id.clone());

        let mut report = RestoreReport {
            restored: restored.clone(),
            rewritten: 0,
            unresolved: Vec::new(),
        };

        // Inbound sites, one update per holder.
        let mut updates: Vec<(ReferenceHolder, RecordUpdate, Vec<(String, String)>)> = Vec::new();
        for site in index.inbound(&entry.original) {
            if site.overlay.is_some() && matches!(site.holder, ReferenceHolder::OwnedRecord(_)) {
                let unresolved = self.unresolved(
                    &entry,
                    Some(&site.holder),
                    site.path.clone(),
                    site.raw.clone(),
                    "overlays on owned records cannot be edited in place".to_string(),
                );
                report.unresolved.push(unresolved);
                continue;
            }
            match updates.iter_mut().find(|(holder, _, _)| holder == &site.holder) {
                Some((_, update, paths)) => {
                    *update = site.rewrite_into(std::mem::take(update), &created.id);
                    paths.push((site.path.clone(), site.raw.clone()));
                }
                None => updates.push((
                    site.holder.clone(),
                    site.rewrite_into(RecordUpdate::new(), &created.id),
                    vec![(site.path.clone(), site.raw.clone())],
                )),
            }
        }
        for (holder, update, paths) in updates {
            match self.write_holder(&holder, &update, &packs).await {
                Ok(()) => report.rewritten += paths.len(),
                Err(err) => {
                    for (path, raw) in paths {
                        let unresolved =
                            self.unresolved(&entry, Some(&holder), path, raw, err.to_string());
                        report.unresolved.push(unresolved);
                    }
                }
            }
        }

        // The promoted record's own links to its old id.
        let own = self_references(owner, &entry.original.record_id, &created.data);
        if !own.is_empty() {
            let update = own.iter().fold(RecordUpdate::new(), |update, (path, raw)| {
                let retargeted = crate::core::RecordRef::parse(raw)
                    .map(|reference| reference.retarget(&created.id))
                    .unwrap_or_else(|| created.id.clone());
                update.set(path.clone(), serde_json::Value::String(retargeted))
            });
            match self
                .store
                .update_owned_record(owner, &created.id, &update)
                .await
            {
                Ok(()) => report.rewritten += own.len(),
                Err(err) => {
                    for (path, raw) in own {
                        let unresolved = self.unresolved(&entry, None, path, raw, err.to_string());
                        report.unresolved.push(unresolved);
                    }
                }
            }
        }

        for (path, raw) in index.dangling_in(owner, &created.data) {
            let unresolved =
                self.unresolved(&entry, None, path, raw, "target record does not exist".to_string());
            report.unresolved.push(unresolved);
        }

        self.store
            .delete_owned_record(owner, &entry.original.record_id)
            .await?;
        self.store.delete_record(&Container::World, clone_id).await?;
        self.entries.lock().await.remove(clone_id);

        event!(
            Level::DEBUG,
            original = %entry.original,
            restored = %restored,
            rewritten = report.rewritten,
            "Restored owned record"
        );
        Ok(report)
    }

    /// Writes one holder's rewrite. Pack holders follow the pack policy and
    /// have their lock lifted for the write.
    async fn write_holder(
        &self,
        holder: &ReferenceHolder,
        update: &RecordUpdate,
        packs: &HashMap<String, ContentPack>,
    ) -> Result<()> {
        let Some(pack_id) = holder.container().pack_id() else {
            return holder.apply(self.store.as_ref(), update).await;
        };
        let pack = packs
            .get(pack_id)
            .ok_or_else(|| MigrationError::PackNotFound(pack_id.to_string()))?;
        if let PackAdmission::Skip(reason) = self.config.packs.admit(pack) {
            return Err(MigrationError::Workspace(format!(
                "pack '{}' is not migrated: {}",
                pack.id, reason
            )));
        }
        let guard = PackLockGuard::acquire(self.store.clone(), pack).await?;
        let applied = holder.apply(self.store.as_ref(), update).await;
        let released = guard.release().await;
        applied.and(released)
    }

    fn unresolved(
        &self,
        entry: &BackupEntry,
        holder: Option<&ReferenceHolder>,
        path: String,
        reference: String,
        reason: String,
    ) -> UnresolvedReference {
        let pack = entry.original.owner.container().pack_id().map(str::to_string);
        let holder_pack = holder
            .and_then(|holder| holder.container().pack_id())
            .map(str::to_string);
        let location = match (holder, &holder_pack) {
            (Some(holder), Some(holder_pack)) => {
                format!("held by {} in pack '{}' at '{}'", holder, holder_pack, path)
            }
            (Some(holder), None) => format!("held by {} at '{}'", holder, path),
            (None, _) => format!("at '{}' in the restored record", path),
        };
        let ancestry = match &pack {
            Some(pack) => format!(" in pack '{}'", pack),
            None => String::new(),
        };
        self.diagnostics.log_warn(
            &format!(
                "Unresolved reference '{}' {} for '{}' ({}) owned by '{}'{}: {}",
                reference, location, entry.record_name, entry.original, entry.owner_name, ancestry, reason
            ),
            &self.context(&entry.original),
        );
        UnresolvedReference {
            original: entry.original.clone(),
            record_name: entry.record_name.clone(),
            owner_name: entry.owner_name.clone(),
            holder: holder.map(ToString::to_string),
            holder_pack,
            path,
            reference,
            reason,
            pack,
        }
    }

    /// Backup, clone update and restore as one serialized cycle.
    pub async fn round_trip(
        &self,
        original: &OwnedRecordRef,
        update: &RecordUpdate,
    ) -> Result<RestoreReport> {
        let _cycle = self.cycle.lock().await;
        let clone = self.backup(original).await?;
        if let Err(err) = self.update_clone(&clone.id, update).await {
            self.discard(&clone.id).await?;
            return Err(err);
        }
        self.restore(&clone.id).await
    }

    /// Drops a clone without restoring it. The original is untouched.
    pub async fn discard(&self, clone_id: &str) -> Result<()> {
        self.store.delete_record(&Container::World, clone_id).await?;
        self.entries.lock().await.remove(clone_id);
        Ok(())
    }

    /// Deletes the folder when empty; otherwise reports each leftover clone.
    pub async fn close(&self) -> Result<WorkspaceClosure> {
        let leftovers: Vec<Record> = self
            .store
            .records(&Container::World)
            .await?
            .into_iter()
            .filter(|record| record.folder.as_deref() == Some(self.folder.id.as_str()))
            .collect();

        if leftovers.is_empty() {
            self.store.delete_folder(&self.folder.id).await?;
            return Ok(WorkspaceClosure {
                deleted: true,
                leftovers: Vec::new(),
            });
        }

        let entries = self.entries.lock().await;
        let mut reported = Vec::with_capacity(leftovers.len());
        for clone in leftovers {
            let entry = entries.get(&clone.id);
            let mut context = DiagnosticContext::new()
                .step(self.step_name.clone(), self.target_version)
                .record(clone.id.clone());
            let message = match entry {
                Some(entry) => {
                    context = context.owner(entry.original.owner.to_string());
                    format!(
                        "Workspace '{}' still holds '{}' ({}), a backup of '{}' ({}) owned by '{}'",
                        self.folder.name,
                        clone.name,
                        clone.id,
                        entry.record_name,
                        entry.original,
                        entry.owner_name
                    )
                }
                None => format!(
                    "Workspace '{}' still holds '{}' ({}), left by an earlier run",
                    self.folder.name, clone.name, clone.id
                ),
            };
            self.diagnostics.log_warn(&message, &context);
            reported.push(LeftoverClone {
                clone_id: clone.id,
                clone_name: clone.name,
                original: entry.map(|entry| entry.original.clone()),
            });
        }
        Ok(WorkspaceClosure {
            deleted: false,
            leftovers: reported,
        })
    }
}
