use super::registry::StepRegistry;
use super::step::{MigrationEnv, StepReport, VersionedStep};
use crate::config::MigrationConfig;
use crate::core::{Result, SchemaVersion};
use crate::sink::{DiagnosticContext, DiagnosticSink, ProgressSink};
use crate::store::WorldStore;
use std::sync::Arc;
use tracing::{Level, event};

/// How a migration run ended.
#[derive(Debug, Clone)]
pub enum MigrationOutcome {
    /// Nothing to run; the store was not touched.
    UpToDate { version: SchemaVersion },
    Completed {
        from: SchemaVersion,
        to: SchemaVersion,
        reports: Vec<StepReport>,
    },
    /// A step asked for a process restart. The version is set to that step's.
    Halted {
        version: SchemaVersion,
        halted_step: String,
        target: SchemaVersion,
        reports: Vec<StepReport>,
    },
    /// The version was left at `version`.
    Failed {
        version: SchemaVersion,
        failed_step: String,
        failed_version: SchemaVersion,
        reports: Vec<StepReport>,
    },
}

impl MigrationOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(
            self,
            MigrationOutcome::UpToDate { .. } | MigrationOutcome::Completed { .. }
        )
    }

    pub fn requires_restart(&self) -> bool {
        matches!(self, MigrationOutcome::Halted { .. })
    }

    /// The world's schema version once the run ended.
    pub fn version(&self) -> SchemaVersion {
        match self {
            MigrationOutcome::UpToDate { version } => *version,
            MigrationOutcome::Completed { to, .. } => *to,
            MigrationOutcome::Halted { version, .. } => *version,
            MigrationOutcome::Failed { version, .. } => *version,
        }
    }

    pub fn reports(&self) -> &[StepReport] {
        match self {
            MigrationOutcome::UpToDate { .. } => &[],
            MigrationOutcome::Completed { reports, .. }
            | MigrationOutcome::Halted { reports, .. }
            | MigrationOutcome::Failed { reports, .. } => reports,
        }
    }

    pub fn error_count(&self) -> usize {
        self.reports().iter().map(|report| report.error_count).sum()
    }
}

/// Runs the registered steps between two schema versions.
pub struct MigrationRunner {
    registry: StepRegistry,
    env: MigrationEnv,
}

impl MigrationRunner {
    pub fn new(registry: StepRegistry, store: Arc<dyn WorldStore>) -> Self {
        Self {
            registry,
            env: MigrationEnv::new(store),
        }
    }

    pub fn with_env(registry: StepRegistry, env: MigrationEnv) -> Self {
        Self { registry, env }
    }

    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.env.config = Arc::new(config);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.env.progress = progress;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.env.diagnostics = diagnostics;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn env(&self) -> &MigrationEnv {
        &self.env
    }

    pub fn pending(&self, current: SchemaVersion, target: SchemaVersion) -> Vec<&VersionedStep> {
        self.registry.select(current, target)
    }

    /// Migrates from `current` to `target`.
    ///
    /// Steps run one at a time in ascending order. The version key is written
    /// once: to `target` after the last step, or to a halting step's version.
    /// A failed step leaves it untouched. `Err` means the version key itself
    /// could not be written.
    pub async fn migrate_world(
        &self,
        current: SchemaVersion,
        target: SchemaVersion,
    ) -> Result<MigrationOutcome> {
        let steps = self.pending(current, target);
        if steps.is_empty() {
            event!(Level::DEBUG, current, target, "World schema is up to date");
            return Ok(MigrationOutcome::UpToDate { version: current });
        }

        event!(
            Level::INFO,
            current,
            target,
            steps = steps.len(),
            "Migrating world schema"
        );
        let diagnostics = self.env.diagnostics.as_ref();
        let mut reports = Vec::with_capacity(steps.len());

        for step in steps {
            let report = step.run(&self.env).await;
            let succeeded = report.succeeded();
            reports.push(report);

            if !succeeded {
                diagnostics.log_error(
                    &format!(
                        "Migration failed at step '{}' (v{}); world schema stays at v{}",
                        step.display_name(),
                        step.target_version(),
                        current
                    ),
                    &DiagnosticContext::new().step(step.display_name(), step.target_version()),
                );
                return Ok(MigrationOutcome::Failed {
                    version: current,
                    failed_step: step.display_name().to_string(),
                    failed_version: step.target_version(),
                    reports,
                });
            }

            if step.halts_after() {
                self.env
                    .store
                    .set_schema_version(step.target_version())
                    .await?;
                diagnostics.log_warn(
                    &format!(
                        "Step '{}' (v{}) requires a restart; restart the process to continue migrating to v{}",
                        step.display_name(),
                        step.target_version(),
                        target
                    ),
                    &DiagnosticContext::new().step(step.display_name(), step.target_version()),
                );
                return Ok(MigrationOutcome::Halted {
                    version: step.target_version(),
                    halted_step: step.display_name().to_string(),
                    target,
                    reports,
                });
            }
        }

        self.env.store.set_schema_version(target).await?;
        diagnostics.log_info(
            &format!("World schema migrated from v{} to v{}", current, target),
            &DiagnosticContext::new(),
        );
        Ok(MigrationOutcome::Completed {
            from: current,
            to: target,
            reports,
        })
    }

    /// Reads the stored version once and migrates to the latest registered step.
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use tabletop_migrate::{InMemoryWorldStore, MigrationRunner, world_steps};
    /// # tokio_test::block_on(async {
    /// let store = Arc::new(InMemoryWorldStore::load("world.json").await.unwrap());
    /// let runner = MigrationRunner::new(world_steps().unwrap(), store);
    /// let outcome = runner.migrate_to_latest().await.unwrap();
    /// println!("world is at v{}", outcome.version());
    /// # });
    /// ```
    pub async fn migrate_to_latest(&self) -> Result<MigrationOutcome> {
        let current = self.env.store.schema_version().await?;
        let target = self.registry.latest_version().max(current);
        self.migrate_world(current, target).await
    }
}
