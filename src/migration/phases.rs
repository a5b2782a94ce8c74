//! Record-phase drivers: unowned records, owners, scene tokens, content packs.

use super::collection::{BatchReport, MigrationSubject, UnitOutcome};
use super::pack_lock::PackLockGuard;
use super::step::{Phase, StepContext, VersionedStep};
use crate::config::PackAdmission;
use crate::core::{
    Container, ContentPack, MigrationError, OwnedRecordRef, Owner, OwnerLocation, PackContentKind,
    Record, Result,
};
use std::collections::HashSet;
use tracing::{Instrument, Level, event, info_span};

/// Ids of folders that belong to backup workspaces.
async fn workspace_folder_ids(ctx: &StepContext) -> Result<HashSet<String>> {
    Ok(ctx
        .store()
        .folders()
        .await?
        .into_iter()
        .filter(|folder| ctx.config().is_workspace_folder(&folder.name))
        .map(|folder| folder.id)
        .collect())
}

pub(crate) async fn migrate_unowned(
    ctx: &StepContext,
    step: &VersionedStep,
    container: &Container,
    phase: Phase,
) -> Result<BatchReport> {
    let Some(migrate) = step.record_migrator().cloned() else {
        return Ok(BatchReport::default());
    };
    let excluded = workspace_folder_ids(ctx).await?;
    let records: Vec<Record> = ctx
        .store()
        .records(container)
        .await?
        .into_iter()
        .filter(|record| step.applies_to_kind(&record.kind))
        .filter(|record| match &record.folder {
            Some(folder) => !excluded.contains(folder),
            None => true,
        })
        .collect();

    let migrator = ctx
        .collection(phase, "record")
        .in_pack(container.pack_id());
    let report = migrator
        .run(records, |record| {
            let migrate = migrate.clone();
            let store = ctx.store().clone();
            let container = container.clone();
            async move {
                match migrate(&record)? {
                    Some(update) => {
                        store.update_record(&container, &record.id, &update).await?;
                        Ok(UnitOutcome::changed())
                    }
                    None => Ok(UnitOutcome::unchanged()),
                }
            }
        })
        .await;
    Ok(report)
}

pub(crate) async fn migrate_owners(
    ctx: &StepContext,
    step: &VersionedStep,
    container: &Container,
    phase: Phase,
) -> Result<BatchReport> {
    let owners = ctx.store().owners(container).await?;
    let migrator = ctx.collection(phase, "owner").in_pack(container.pack_id());
    let report = migrator
        .run(owners, |owner| {
            let location = OwnerLocation::Actor {
                container: container.clone(),
                owner_id: owner.id.clone(),
            };
            async move { migrate_owner(ctx, step, &location, owner, phase).await }
        })
        .await;
    Ok(report)
}

/// Migrates one owner's own data, then each of its owned records.
///
/// Owned-record failures are nested in the outcome; they do not fail the
/// owner itself.
pub(crate) async fn migrate_owner(
    ctx: &StepContext,
    step: &VersionedStep,
    location: &OwnerLocation,
    owner: Owner,
    phase: Phase,
) -> Result<UnitOutcome> {
    let mut changed = false;
    if let Some(migrate) = step.owner_migrator() {
        if let Some(update) = migrate(&owner)? {
            ctx.store().update_owner(location, &update).await?;
            changed = true;
        }
    }
    let nested = migrate_owned_records(ctx, step, location, &owner, phase).await;
    let outcome = if changed {
        UnitOutcome::changed()
    } else {
        UnitOutcome::unchanged()
    };
    Ok(outcome.with_nested(nested))
}

pub(crate) async fn migrate_owned_records(
    ctx: &StepContext,
    step: &VersionedStep,
    location: &OwnerLocation,
    owner: &Owner,
    phase: Phase,
) -> BatchReport {
    let Some(migrate) = step.owned_record_migrator().cloned() else {
        return BatchReport::default();
    };
    let records: Vec<Record> = owner
        .records
        .iter()
        .filter(|record| step.applies_to_kind(&record.kind))
        .cloned()
        .collect();
    if records.is_empty() {
        return BatchReport::default();
    }

    let migrator = ctx
        .collection(phase, "owned record")
        .for_owner(location.to_string())
        .in_pack(location.container().pack_id());
    migrator
        .run(records, |record| {
            let migrate = migrate.clone();
            async move {
                let Some(update) = migrate(owner, &record)? else {
                    return Ok(UnitOutcome::unchanged());
                };
                let target = OwnedRecordRef::new(location.clone(), record.id.clone());
                if !update.touches_overlays() {
                    ctx.store()
                        .update_owned_record(location, &record.id, &update)
                        .await?;
                    return Ok(UnitOutcome::changed());
                }
                match ctx.workspace() {
                    Some(workspace) => {
                        workspace.round_trip(&target, &update).await?;
                        Ok(UnitOutcome::changed())
                    }
                    None => Err(MigrationError::OwnedOverlayForbidden(target.to_string())),
                }
            }
        })
        .await
}

/// An unlinked token whose delta-owner needs migrating.
pub(crate) struct TokenTarget {
    scene_id: String,
    scene_name: String,
    token_id: String,
    token_name: String,
    delta: Owner,
}

impl MigrationSubject for TokenTarget {
    fn subject_id(&self) -> String {
        format!("{}.{}", self.scene_id, self.token_id)
    }

    fn subject_name(&self) -> String {
        format!("{} on {}", self.token_name, self.scene_name)
    }
}

pub(crate) async fn migrate_scenes(
    ctx: &StepContext,
    step: &VersionedStep,
    container: &Container,
    phase: Phase,
) -> Result<BatchReport> {
    let scenes = ctx.store().scenes(container).await?;
    if scenes.is_empty() {
        return Ok(BatchReport::default());
    }

    let mut known_owners: HashSet<String> = ctx
        .store()
        .owners(container)
        .await?
        .into_iter()
        .map(|owner| owner.id)
        .collect();
    if *container != Container::World {
        // Pack scenes may place world actors or actors from any other pack.
        let mut sources = vec![Container::World];
        sources.extend(
            ctx.store()
                .packs()
                .await?
                .into_iter()
                .map(|pack| Container::Pack(pack.id))
                .filter(|source| source != container),
        );
        for source in &sources {
            known_owners.extend(
                ctx.store()
                    .owners(source)
                    .await?
                    .into_iter()
                    .map(|owner| owner.id),
            );
        }
    }

    let mut targets = Vec::new();
    for scene in scenes {
        for token in scene.tokens {
            if token.linked {
                continue;
            }
            let owner_exists = token
                .owner_id
                .as_ref()
                .map(|id| known_owners.contains(id))
                .unwrap_or(false);
            if !owner_exists {
                let mut context = ctx.diagnostic_context().record(token.id.clone());
                if let Some(pack) = container.pack_id() {
                    context = context.pack(pack);
                }
                ctx.diagnostics().log_warn(
                    &format!(
                        "Skipping token '{}' on scene '{}': its owner '{}' no longer exists",
                        token.name,
                        scene.name,
                        token.owner_id.as_deref().unwrap_or("<none>")
                    ),
                    &context,
                );
                continue;
            }
            let Some(delta) = token.delta else {
                continue;
            };
            targets.push(TokenTarget {
                scene_id: scene.id.clone(),
                scene_name: scene.name.clone(),
                token_id: token.id,
                token_name: token.name,
                delta,
            });
        }
    }

    let migrator = ctx.collection(phase, "token").in_pack(container.pack_id());
    let report = migrator
        .run(targets, |target| {
            let location = OwnerLocation::Token {
                container: container.clone(),
                scene_id: target.scene_id.clone(),
                token_id: target.token_id.clone(),
            };
            async move { migrate_owner(ctx, step, &location, target.delta, phase).await }
        })
        .await;
    Ok(report)
}

/// True when `step` has logic for the kind of document `pack` holds.
fn pack_is_relevant(step: &VersionedStep, pack: &ContentPack) -> bool {
    match pack.content_kind {
        PackContentKind::Records => step.record_migrator().is_some(),
        PackContentKind::Owners | PackContentKind::Scenes => step.has_owner_logic(),
    }
}

pub(crate) async fn migrate_pack_contents(
    ctx: &StepContext,
    step: &VersionedStep,
    pack: &ContentPack,
) -> Result<BatchReport> {
    let container = Container::Pack(pack.id.clone());
    match pack.content_kind {
        PackContentKind::Records => migrate_unowned(ctx, step, &container, Phase::Packs).await,
        PackContentKind::Owners => migrate_owners(ctx, step, &container, Phase::Packs).await,
        PackContentKind::Scenes => migrate_scenes(ctx, step, &container, Phase::Packs).await,
    }
}

/// Runs packs one at a time, each with its lock lifted and then restored.
pub(crate) async fn migrate_packs(ctx: &StepContext, step: &VersionedStep) -> Result<BatchReport> {
    let packs = ctx.store().packs().await?;
    let mut report = BatchReport::default();

    for pack in packs {
        if let PackAdmission::Skip(reason) = ctx.config().packs.admit(&pack) {
            event!(Level::DEBUG, pack = %pack.id, "Skipping content pack: {}", reason);
            continue;
        }
        if !pack_is_relevant(step, &pack) {
            continue;
        }

        let migrator = ctx
            .collection(Phase::Packs, "content pack")
            .in_pack(Some(pack.id.as_str()));
        report.attempted += 1;

        let guard = match PackLockGuard::acquire(ctx.store().clone(), &pack).await {
            Ok(guard) => guard,
            Err(err) => {
                let failure = migrator.reject(&pack.id, &pack.label, &err.to_string());
                report.failures.push(failure);
                continue;
            }
        };

        let span = info_span!("migration.pack", pack = %pack.id);
        let contents = migrate_pack_contents(ctx, step, &pack).instrument(span).await;
        let released = guard.release().await;

        let mut pack_failed = false;
        match contents {
            Ok(batch) => {
                pack_failed |= !batch.all_succeeded();
                report.absorb(batch);
            }
            Err(err) => {
                pack_failed = true;
                let failure = migrator.reject(&pack.id, &pack.label, &err.to_string());
                report.failures.push(failure);
            }
        }
        if let Err(err) = released {
            pack_failed = true;
            let message = format!("could not restore lock: {}", err);
            let failure = migrator.reject(&pack.id, &pack.label, &message);
            report.failures.push(failure);
        }
        if !pack_failed {
            report.succeeded += 1;
        }
    }
    Ok(report)
}
