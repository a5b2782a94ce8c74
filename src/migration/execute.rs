use super::collection::RecordFailure;
use super::phases::{migrate_owners, migrate_packs, migrate_scenes, migrate_unowned};
use super::step::{MigrationEnv, Phase, StepContext, StepReport, StepRun, StepStatus, VersionedStep};
use super::workspace::{BackupWorkspace, LeftoverClone};
use crate::core::{Container, MigrationError};
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

impl VersionedStep {
    /// Executes every phase of this step against `env.store`.
    ///
    /// Record phases collect every per-record error; a nonzero error count
    /// after a phase skips the remaining record phases. The post hook and
    /// workspace teardown always run.
    pub async fn run(&self, env: &MigrationEnv) -> StepReport {
        let span = info_span!(
            "migration.step",
            version = self.target_version(),
            step = %self.display_name()
        );
        self.execute(env).instrument(span).await
    }

    async fn execute(&self, env: &MigrationEnv) -> StepReport {
        let progress = env.progress.as_ref();
        let mut run = StepRun::start(self);
        event!(Level::INFO, "Starting migration step");

        let workspace = if self.uses_workspace() {
            let created = BackupWorkspace::create(
                env.store.clone(),
                env.config.clone(),
                env.diagnostics.clone(),
                self.display_name(),
                self.target_version(),
            )
            .await;
            match created {
                Ok(workspace) => Some(Arc::new(workspace)),
                Err(err) => {
                    let ctx = StepContext::new(env, self, None);
                    run.record_failure(self.phase_failure(&ctx, Phase::Pre, &err));
                    return run.finish(StepStatus::Failed { phase: Phase::Pre }, Vec::new(), progress);
                }
            }
        } else {
            None
        };

        let ctx = StepContext::new(env, self, workspace.clone());
        let mut status = self.run_phases(&ctx, &mut run, env).await;

        if self.runs_phase(Phase::Post) {
            if let Some(hook) = self.post_migrate_hook() {
                run.enter_phase(progress, Phase::Post);
                if let Err(err) = hook(ctx.clone()).await {
                    run.record_failure(self.phase_failure(&ctx, Phase::Post, &err));
                    if status == StepStatus::Succeeded {
                        status = StepStatus::Failed { phase: Phase::Post };
                    }
                }
            }
        }

        let leftovers = match &workspace {
            Some(workspace) => close_workspace(&ctx, workspace).await,
            None => Vec::new(),
        };

        let report = run.finish(status, leftovers, progress);
        event!(
            Level::INFO,
            errors = report.error_count,
            changed = report.changed,
            "Finished migration step ({:?})",
            report.status
        );
        report
    }

    async fn run_phases(&self, ctx: &StepContext, run: &mut StepRun, env: &MigrationEnv) -> StepStatus {
        let progress = env.progress.as_ref();

        if self.runs_phase(Phase::Pre) {
            if let Some(hook) = self.pre_migrate_hook() {
                run.enter_phase(progress, Phase::Pre);
                if let Err(err) = hook(ctx.clone()).await {
                    run.record_failure(self.phase_failure(ctx, Phase::Pre, &err));
                    return StepStatus::Failed { phase: Phase::Pre };
                }
            }
        }

        if self.runs_phase(Phase::Settings) {
            if let Some(migrate) = self.settings_migrator() {
                run.enter_phase(progress, Phase::Settings);
                match migrate(ctx.clone()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        ctx.diagnostics().log_error(
                            &format!(
                                "Settings migration of step '{}' (v{}) reported failure",
                                self.display_name(),
                                self.target_version()
                            ),
                            &ctx.diagnostic_context(),
                        );
                        return StepStatus::SettingsFailed;
                    }
                    Err(err) => {
                        run.record_failure(self.phase_failure(ctx, Phase::Settings, &err));
                        return StepStatus::SettingsFailed;
                    }
                }
            }
        }

        for phase in Phase::RECORD_PHASES {
            if !self.runs_phase(phase) {
                continue;
            }
            run.enter_phase(progress, phase);
            let world = Container::World;
            let result = match phase {
                Phase::Unowned => migrate_unowned(ctx, self, &world, phase).await,
                Phase::Owners => migrate_owners(ctx, self, &world, phase).await,
                Phase::Scenes => migrate_scenes(ctx, self, &world, phase).await,
                Phase::Packs => migrate_packs(ctx, self).await,
                Phase::Pre | Phase::Settings | Phase::Post => continue,
            };
            match result {
                Ok(batch) => run.record_batch(batch),
                Err(err) => run.record_failure(self.phase_failure(ctx, phase, &err)),
            }
            if run.has_errors() {
                ctx.diagnostics().log_error(
                    &format!(
                        "Step '{}' (v{}) stopped after {} with {} error(s)",
                        self.display_name(),
                        self.target_version(),
                        phase,
                        run.error_count
                    ),
                    &ctx.diagnostic_context(),
                );
                return StepStatus::Failed { phase };
            }
        }

        StepStatus::Succeeded
    }

    /// A failure of a whole phase rather than of one record.
    fn phase_failure(&self, ctx: &StepContext, phase: Phase, err: &MigrationError) -> RecordFailure {
        ctx.collection(phase, "phase")
            .reject(phase.as_str(), self.display_name(), &err.to_string())
    }
}

async fn close_workspace(ctx: &StepContext, workspace: &BackupWorkspace) -> Vec<LeftoverClone> {
    match workspace.close().await {
        Ok(closure) => closure.leftovers,
        Err(err) => {
            ctx.diagnostics().log_error(
                &format!(
                    "Could not close workspace '{}': {}",
                    workspace.folder_name(),
                    err
                ),
                &ctx.diagnostic_context(),
            );
            Vec::new()
        }
    }
}
