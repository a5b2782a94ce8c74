//! Concurrent fan-out of one migration function over a homogeneous collection.

use super::step::Phase;
use crate::core::{ContentPack, Owner, Record, Result, SchemaVersion};
use crate::sink::{DiagnosticContext, DiagnosticSink};
use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use std::future::Future;
use std::sync::Arc;

/// Something the engine can name in a failure report.
pub trait MigrationSubject {
    fn subject_id(&self) -> String;
    fn subject_name(&self) -> String;
}

impl MigrationSubject for Record {
    fn subject_id(&self) -> String {
        self.id.clone()
    }

    fn subject_name(&self) -> String {
        self.name.clone()
    }
}

impl MigrationSubject for Owner {
    fn subject_id(&self) -> String {
        self.id.clone()
    }

    fn subject_name(&self) -> String {
        self.name.clone()
    }
}

impl MigrationSubject for ContentPack {
    fn subject_id(&self) -> String {
        self.id.clone()
    }

    fn subject_name(&self) -> String {
        self.label.clone()
    }
}

/// One rejected record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub step: String,
    pub version: SchemaVersion,
    pub phase: Phase,
    pub subject_kind: String,
    pub subject_id: String,
    pub subject_name: String,
    pub error: String,
    pub owner: Option<String>,
    pub pack: Option<String>,
}

impl RecordFailure {
    pub fn new(
        step: impl Into<String>,
        version: SchemaVersion,
        phase: Phase,
        subject_kind: impl Into<String>,
        subject_id: impl Into<String>,
        subject_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            step: step.into(),
            version,
            phase,
            subject_kind: subject_kind.into(),
            subject_id: subject_id.into(),
            subject_name: subject_name.into(),
            error: error.into(),
            owner: None,
            pack: None,
        }
    }
}

/// Settled results of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub changed: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    pub fn absorb(&mut self, other: BatchReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.changed += other.changed;
        self.failures.extend(other.failures);
    }
}

/// What one successful unit of work did.
#[derive(Debug, Clone, Default)]
pub struct UnitOutcome {
    pub changed: bool,
    /// Results of sub-collections migrated as part of this unit.
    pub nested: BatchReport,
}

impl UnitOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed() -> Self {
        Self {
            changed: true,
            nested: BatchReport::default(),
        }
    }

    pub fn with_nested(mut self, nested: BatchReport) -> Self {
        self.nested = nested;
        self
    }
}

/// Applies a per-record function across a collection concurrently.
///
/// Every invocation is issued before any is awaited; the driver then waits
/// for all of them to settle. Failures are logged with the subject and step
/// name and never stop sibling invocations.
pub struct CollectionMigrator {
    step_name: String,
    target_version: SchemaVersion,
    phase: Phase,
    subject_kind: &'static str,
    diagnostics: Arc<dyn DiagnosticSink>,
    fan_out_limit: Option<usize>,
    owner: Option<String>,
    pack: Option<String>,
}

impl CollectionMigrator {
    pub fn new(
        step_name: impl Into<String>,
        target_version: SchemaVersion,
        phase: Phase,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            target_version,
            phase,
            subject_kind: "record",
            diagnostics,
            fan_out_limit: None,
            owner: None,
            pack: None,
        }
    }

    pub fn subject_kind(mut self, kind: &'static str) -> Self {
        self.subject_kind = kind;
        self
    }

    pub fn fan_out_limit(mut self, limit: Option<usize>) -> Self {
        self.fan_out_limit = limit;
        self
    }

    pub fn for_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn in_pack(mut self, pack: Option<&str>) -> Self {
        self.pack = pack.map(str::to_string);
        self
    }

    pub async fn run<T, F, Fut>(&self, items: Vec<T>, migrate: F) -> BatchReport
    where
        T: MigrationSubject,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<UnitOutcome>>,
    {
        let attempted = items.len();
        let pending = items.into_iter().map(|item| {
            let id = item.subject_id();
            let name = item.subject_name();
            let work = migrate(item);
            async move { (id, name, work.await) }
        });

        let settled = match self.fan_out_limit {
            Some(limit) => {
                stream::iter(pending)
                    .buffer_unordered(limit.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
            None => join_all(pending).await,
        };

        let mut report = BatchReport {
            attempted,
            ..BatchReport::default()
        };
        for (id, name, result) in settled {
            match result {
                Ok(outcome) => {
                    report.succeeded += 1;
                    if outcome.changed {
                        report.changed += 1;
                    }
                    report.absorb(outcome.nested);
                }
                Err(err) => {
                    let failure = self.reject(&id, &name, &err.to_string());
                    report.failures.push(failure);
                }
            }
        }
        report
    }

    /// Logs one failure and returns its report entry.
    pub fn reject(&self, id: &str, name: &str, error: &str) -> RecordFailure {
        let mut context = DiagnosticContext::new()
            .step(self.step_name.clone(), self.target_version)
            .record(id);
        if let Some(owner) = &self.owner {
            context = context.owner(owner.clone());
        }
        if let Some(pack) = &self.pack {
            context = context.pack(pack.clone());
        }
        self.diagnostics.log_error(
            &format!(
                "Failed to migrate {} '{}' ({}) during {} of step '{}' (v{}): {}",
                self.subject_kind,
                name,
                id,
                self.phase,
                self.step_name,
                self.target_version,
                error
            ),
            &context,
        );

        let mut failure = RecordFailure::new(
            self.step_name.clone(),
            self.target_version,
            self.phase,
            self.subject_kind,
            id,
            name,
            error,
        );
        failure.owner = self.owner.clone();
        failure.pack = self.pack.clone();
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MigrationError;
    use crate::sink::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn owners(count: usize) -> Vec<Owner> {
        (0..count)
            .map(|i| Owner::new(format!("a{}", i), format!("Edgerunner {}", i), "character"))
            .collect()
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_siblings() {
        let sink = Arc::new(MemorySink::new());
        let migrator = CollectionMigrator::new("Roles", 5, Phase::Owners, sink.clone())
            .subject_kind("owner");
        let visited = AtomicUsize::new(0);

        let report = migrator
            .run(owners(10), |owner| {
                let visited = &visited;
                async move {
                    visited.fetch_add(1, Ordering::SeqCst);
                    if owner.id == "a3" {
                        return Err(MigrationError::InvalidData("corrupt role list".into()));
                    }
                    Ok(UnitOutcome::changed())
                }
            })
            .await;

        assert_eq!(visited.load(Ordering::SeqCst), 10);
        assert_eq!(report.attempted, 10);
        assert_eq!(report.succeeded, 9);
        assert_eq!(report.changed, 9);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.failures[0].subject_name, "Edgerunner 3");

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Edgerunner 3"));
        assert!(errors[0].message.contains("Roles"));
    }

    #[tokio::test]
    async fn bounded_fan_out_still_visits_everything() {
        let sink = Arc::new(MemorySink::new());
        let migrator = CollectionMigrator::new("Amounts", 1, Phase::Unowned, sink)
            .fan_out_limit(Some(2));
        let records: Vec<Record> = (0..7)
            .map(|i| Record::new(format!("r{}", i), format!("Item {}", i), "gear"))
            .collect();

        let report = migrator
            .run(records, |record| async move {
                if record.id.ends_with('0') {
                    Ok(UnitOutcome::unchanged())
                } else {
                    Ok(UnitOutcome::changed())
                }
            })
            .await;

        assert!(report.all_succeeded());
        assert_eq!(report.succeeded, 7);
        assert_eq!(report.changed, 6);
    }

    #[tokio::test]
    async fn nested_failures_roll_up() {
        let sink = Arc::new(MemorySink::new());
        let migrator = CollectionMigrator::new("Nested", 2, Phase::Owners, sink);

        let report = migrator
            .run(owners(2), |owner| async move {
                let mut nested = BatchReport {
                    attempted: 1,
                    ..BatchReport::default()
                };
                nested.failures.push(RecordFailure::new(
                    "Nested",
                    2,
                    Phase::Owners,
                    "owned record",
                    format!("{}-x", owner.id),
                    "Gun",
                    "bad",
                ));
                Ok(UnitOutcome::unchanged().with_nested(nested))
            })
            .await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.attempted, 4);
        assert_eq!(report.error_count(), 2);
    }
}
