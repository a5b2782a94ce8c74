use super::collection::{BatchReport, CollectionMigrator, RecordFailure};
use super::workspace::{BackupWorkspace, LeftoverClone};
use crate::config::MigrationConfig;
use crate::core::{Owner, Record, RecordUpdate, Result, SchemaVersion};
use crate::sink::{DiagnosticContext, DiagnosticSink, ProgressSink, TracingSink};
use crate::store::WorldStore;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The ordered phases of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Settings,
    Unowned,
    Owners,
    Scenes,
    Packs,
    Post,
}

impl Phase {
    /// Record phases in execution order.
    pub const RECORD_PHASES: [Phase; 4] = [Phase::Unowned, Phase::Owners, Phase::Scenes, Phase::Packs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pre => "pre-migrate",
            Phase::Settings => "settings",
            Phase::Unowned => "unowned records",
            Phase::Owners => "owners",
            Phase::Scenes => "scenes",
            Phase::Packs => "content packs",
            Phase::Post => "post-migrate",
        }
    }

    fn progress_percent(&self) -> f32 {
        match self {
            Phase::Pre => 0.0,
            Phase::Settings => 5.0,
            Phase::Unowned => 15.0,
            Phase::Owners => 35.0,
            Phase::Scenes => 60.0,
            Phase::Packs => 80.0,
            Phase::Post => 95.0,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A setup or teardown hook.
pub type StepHookFn = Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;
/// Migrates world-level settings. `Ok(false)` aborts the step.
pub type SettingsMigrationFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<bool>> + Send + Sync>;
/// Computes the update for one unowned record; `None` when already migrated.
pub type RecordMigrationFn =
    Arc<dyn Fn(&Record) -> Result<Option<RecordUpdate>> + Send + Sync>;
/// Computes the update for an owner's own data and overlays.
pub type OwnerMigrationFn = Arc<dyn Fn(&Owner) -> Result<Option<RecordUpdate>> + Send + Sync>;
/// Computes the update for one owned record, given its owner.
pub type OwnedRecordMigrationFn =
    Arc<dyn Fn(&Owner, &Record) -> Result<Option<RecordUpdate>> + Send + Sync>;

/// Shared services a run hands to every step.
#[derive(Clone)]
pub struct MigrationEnv {
    pub store: Arc<dyn WorldStore>,
    pub config: Arc<MigrationConfig>,
    pub progress: Arc<dyn ProgressSink>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

impl MigrationEnv {
    pub fn new(store: Arc<dyn WorldStore>) -> Self {
        Self {
            store,
            config: Arc::new(MigrationConfig::default()),
            progress: Arc::new(TracingSink),
            diagnostics: Arc::new(TracingSink),
        }
    }
}

/// What a step's hooks and migrators can reach while the step runs.
#[derive(Clone)]
pub struct StepContext {
    store: Arc<dyn WorldStore>,
    config: Arc<MigrationConfig>,
    diagnostics: Arc<dyn DiagnosticSink>,
    step_name: Arc<str>,
    target_version: SchemaVersion,
    workspace: Option<Arc<BackupWorkspace>>,
}

impl StepContext {
    pub(crate) fn new(
        env: &MigrationEnv,
        step: &VersionedStep,
        workspace: Option<Arc<BackupWorkspace>>,
    ) -> Self {
        Self {
            store: env.store.clone(),
            config: env.config.clone(),
            diagnostics: env.diagnostics.clone(),
            step_name: Arc::from(step.display_name()),
            target_version: step.target_version(),
            workspace,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorldStore> {
        &self.store
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticSink> {
        &self.diagnostics
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn target_version(&self) -> SchemaVersion {
        self.target_version
    }

    pub fn workspace(&self) -> Option<&Arc<BackupWorkspace>> {
        self.workspace.as_ref()
    }

    pub fn diagnostic_context(&self) -> DiagnosticContext {
        DiagnosticContext::new().step(self.step_name(), self.target_version)
    }

    pub(crate) fn collection(&self, phase: Phase, subject_kind: &'static str) -> CollectionMigrator {
        CollectionMigrator::new(
            self.step_name(),
            self.target_version,
            phase,
            self.diagnostics.clone(),
        )
        .subject_kind(subject_kind)
        .fan_out_limit(self.config.fan_out_limit)
    }
}

/// One versioned unit of transformation logic.
///
/// A step is an immutable definition; each execution starts a fresh
/// [`StepRun`]. Every migrator must be idempotent: it gates each change on the
/// current shape of the field and returns `None` once nothing is left to do.
#[derive(Clone)]
pub struct VersionedStep {
    target_version: SchemaVersion,
    display_name: String,
    halt_after: bool,
    uses_workspace: bool,
    record_kinds: Option<Vec<String>>,
    skipped_phases: Vec<Phase>,
    pre_migrate: Option<StepHookFn>,
    settings: Option<SettingsMigrationFn>,
    unowned: Option<RecordMigrationFn>,
    owner: Option<OwnerMigrationFn>,
    owned: Option<OwnedRecordMigrationFn>,
    post_migrate: Option<StepHookFn>,
}

impl fmt::Debug for VersionedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedStep")
            .field("target_version", &self.target_version)
            .field("display_name", &self.display_name)
            .field("halt_after", &self.halt_after)
            .field("uses_workspace", &self.uses_workspace)
            .field("record_kinds", &self.record_kinds)
            .field("skipped_phases", &self.skipped_phases)
            .field("has_pre_migrate", &self.pre_migrate.is_some())
            .field("has_settings", &self.settings.is_some())
            .field("has_record_migrator", &self.unowned.is_some())
            .field("has_owner_migrator", &self.owner.is_some())
            .field("has_owned_record_migrator", &self.owned.is_some())
            .field("has_post_migrate", &self.post_migrate.is_some())
            .finish()
    }
}

impl VersionedStep {
    pub fn new(target_version: SchemaVersion, display_name: impl Into<String>) -> Self {
        Self {
            target_version,
            display_name: display_name.into(),
            halt_after: false,
            uses_workspace: false,
            record_kinds: None,
            skipped_phases: Vec::new(),
            pre_migrate: None,
            settings: None,
            unowned: None,
            owner: None,
            owned: None,
            post_migrate: None,
        }
    }

    /// Stops the sequence after this step succeeds; the operator restarts
    /// the process before later steps run.
    pub fn halt_after(mut self) -> Self {
        self.halt_after = true;
        self
    }

    /// Provisions a [`BackupWorkspace`] for owned-record overlay changes.
    pub fn with_workspace(mut self) -> Self {
        self.uses_workspace = true;
        self
    }

    /// Restricts unowned and owned record migrators to these record kinds.
    pub fn only_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record_kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    pub fn skip_phase(mut self, phase: Phase) -> Self {
        if !self.skipped_phases.contains(&phase) {
            self.skipped_phases.push(phase);
        }
        self
    }

    pub fn with_pre_migrate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.pre_migrate = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn with_settings_migrator<F, Fut>(mut self, migrator: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        self.settings = Some(Arc::new(move |ctx| migrator(ctx).boxed()));
        self
    }

    pub fn with_record_migrator<F>(mut self, migrator: F) -> Self
    where
        F: Fn(&Record) -> Result<Option<RecordUpdate>> + Send + Sync + 'static,
    {
        self.unowned = Some(Arc::new(migrator));
        self
    }

    pub fn with_owner_migrator<F>(mut self, migrator: F) -> Self
    where
        F: Fn(&Owner) -> Result<Option<RecordUpdate>> + Send + Sync + 'static,
    {
        self.owner = Some(Arc::new(migrator));
        self
    }

    pub fn with_owned_record_migrator<F>(mut self, migrator: F) -> Self
    where
        F: Fn(&Owner, &Record) -> Result<Option<RecordUpdate>> + Send + Sync + 'static,
    {
        self.owned = Some(Arc::new(migrator));
        self
    }

    /// Applies the same record rule to unowned and owned records.
    pub fn with_item_migrator<F>(self, migrator: F) -> Self
    where
        F: Fn(&Record) -> Result<Option<RecordUpdate>> + Send + Sync + 'static,
    {
        let shared: RecordMigrationFn = Arc::new(migrator);
        let owned = shared.clone();
        VersionedStep {
            unowned: Some(shared),
            ..self
        }
        .with_owned_record_migrator(move |_owner, record| owned(record))
    }

    pub fn with_post_migrate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.post_migrate = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn target_version(&self) -> SchemaVersion {
        self.target_version
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn halts_after(&self) -> bool {
        self.halt_after
    }

    pub fn uses_workspace(&self) -> bool {
        self.uses_workspace
    }

    pub fn applies_to_kind(&self, kind: &str) -> bool {
        match &self.record_kinds {
            Some(kinds) => kinds.iter().any(|k| k == kind),
            None => true,
        }
    }

    pub(crate) fn pre_migrate_hook(&self) -> Option<&StepHookFn> {
        self.pre_migrate.as_ref()
    }

    pub(crate) fn settings_migrator(&self) -> Option<&SettingsMigrationFn> {
        self.settings.as_ref()
    }

    pub(crate) fn record_migrator(&self) -> Option<&RecordMigrationFn> {
        self.unowned.as_ref()
    }

    pub(crate) fn owner_migrator(&self) -> Option<&OwnerMigrationFn> {
        self.owner.as_ref()
    }

    pub(crate) fn owned_record_migrator(&self) -> Option<&OwnedRecordMigrationFn> {
        self.owned.as_ref()
    }

    pub(crate) fn post_migrate_hook(&self) -> Option<&StepHookFn> {
        self.post_migrate.as_ref()
    }

    pub fn has_owner_logic(&self) -> bool {
        self.owner.is_some() || self.owned.is_some()
    }

    /// Whether `phase` has any work in this step.
    pub fn runs_phase(&self, phase: Phase) -> bool {
        if self.skipped_phases.contains(&phase) {
            return false;
        }
        match phase {
            Phase::Pre => self.pre_migrate.is_some(),
            Phase::Settings => self.settings.is_some(),
            Phase::Unowned => self.unowned.is_some(),
            Phase::Owners | Phase::Scenes => self.has_owner_logic(),
            Phase::Packs => self.unowned.is_some() || self.has_owner_logic(),
            Phase::Post => self.post_migrate.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    /// The settings migrator returned false or failed.
    SettingsFailed,
    Failed { phase: Phase },
}

/// Mutable state of one step execution. Created fresh for every run.
#[derive(Debug)]
pub struct StepRun {
    pub target_version: SchemaVersion,
    pub display_name: String,
    pub halt_after: bool,
    pub error_count: usize,
    pub progress_percent: f32,
    pub progress_message: String,
    attempted: usize,
    changed: usize,
    failures: Vec<RecordFailure>,
}

impl StepRun {
    pub fn start(step: &VersionedStep) -> Self {
        Self {
            target_version: step.target_version(),
            display_name: step.display_name().to_string(),
            halt_after: step.halts_after(),
            error_count: 0,
            progress_percent: 0.0,
            progress_message: String::new(),
            attempted: 0,
            changed: 0,
            failures: Vec::new(),
        }
    }

    pub fn set_progress(&mut self, sink: &dyn ProgressSink, percent: f32, message: impl Into<String>) {
        self.progress_percent = percent.clamp(0.0, 100.0);
        self.progress_message = message.into();
        sink.report_progress(self.progress_percent, &self.progress_message);
    }

    pub(crate) fn enter_phase(&mut self, sink: &dyn ProgressSink, phase: Phase) {
        let message = format!("{}: {}", self.display_name, phase);
        self.set_progress(sink, phase.progress_percent(), message);
    }

    pub fn record_batch(&mut self, report: BatchReport) {
        self.attempted += report.attempted;
        self.changed += report.changed;
        self.error_count += report.failures.len();
        self.failures.extend(report.failures);
    }

    pub fn record_failure(&mut self, failure: RecordFailure) {
        self.error_count += 1;
        self.failures.push(failure);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn finish(mut self, status: StepStatus, leftovers: Vec<LeftoverClone>, sink: &dyn ProgressSink) -> StepReport {
        let message = match &status {
            StepStatus::Succeeded => format!("{}: done", self.display_name),
            _ => format!("{}: failed", self.display_name),
        };
        self.set_progress(sink, 100.0, message);
        StepReport {
            target_version: self.target_version,
            display_name: self.display_name,
            halt_after: self.halt_after,
            status,
            error_count: self.error_count,
            attempted: self.attempted,
            changed: self.changed,
            failures: self.failures,
            leftovers,
        }
    }
}

/// Outcome of one step execution.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub target_version: SchemaVersion,
    pub display_name: String,
    pub halt_after: bool,
    pub status: StepStatus,
    pub error_count: usize,
    pub attempted: usize,
    pub changed: usize,
    pub failures: Vec<RecordFailure>,
    /// Clones a workspace could not restore; a human must inspect them.
    pub leftovers: Vec<LeftoverClone>,
}

impl StepReport {
    /// Settings succeeded and no phase recorded an error.
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded && self.error_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phases_follow_registered_migrators() {
        let step = VersionedStep::new(3, "Weapon damage")
            .with_record_migrator(|_record: &Record| Ok(None));
        assert!(step.runs_phase(Phase::Unowned));
        assert!(step.runs_phase(Phase::Packs));
        assert!(!step.runs_phase(Phase::Owners));
        assert!(!step.runs_phase(Phase::Scenes));
        assert!(!step.runs_phase(Phase::Settings));

        let skipped = step.skip_phase(Phase::Packs);
        assert!(!skipped.runs_phase(Phase::Packs));
    }

    #[test]
    fn item_migrator_covers_owned_records() {
        let step = VersionedStep::new(1, "Amounts").with_item_migrator(|record: &Record| {
            Ok(RecordUpdate::new().set("seen", json!(record.name.clone())).non_empty())
        });
        assert!(step.runs_phase(Phase::Unowned));
        assert!(step.runs_phase(Phase::Owners));

        let owner = Owner::new("a1", "V", "character");
        let record = Record::new("x1", "Pistol", "weapon");
        let owned = step.owned_record_migrator().unwrap();
        let update = owned(&owner, &record).unwrap().unwrap();
        assert_eq!(update, RecordUpdate::new().set("seen", json!("Pistol")));
    }

    #[test]
    fn kind_filter_defaults_to_everything() {
        let step = VersionedStep::new(1, "Any");
        assert!(step.applies_to_kind("weapon"));
        let filtered = step.only_kinds(["weapon", "ammo"]);
        assert!(filtered.applies_to_kind("ammo"));
        assert!(!filtered.applies_to_kind("cyberware"));
    }

    #[test]
    fn report_success_needs_zero_errors() {
        let step = VersionedStep::new(2, "Two");
        let mut run = StepRun::start(&step);
        run.record_failure(RecordFailure::new(
            "Two",
            2,
            Phase::Owners,
            "owner",
            "a1",
            "V",
            "boom",
        ));
        let report = run.finish(StepStatus::Succeeded, Vec::new(), &TracingSink);
        assert!(!report.succeeded());
        assert_eq!(report.error_count, 1);
        assert_eq!(report.failures[0].subject_name, "V");
    }
}
