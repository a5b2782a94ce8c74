//! The versioned migration engine.

pub mod collection;
mod execute;
mod pack_lock;
mod phases;
pub mod reference_index;
pub mod registry;
pub mod runner;
pub mod step;
pub mod workspace;

pub use collection::{BatchReport, CollectionMigrator, MigrationSubject, RecordFailure, UnitOutcome};
pub use pack_lock::PackLockGuard;
pub use reference_index::{ReferenceHolder, ReferenceIndex, ReferenceSite};
pub use registry::StepRegistry;
pub use runner::{MigrationOutcome, MigrationRunner};
pub use step::{
    MigrationEnv, Phase, StepContext, StepReport, StepRun, StepStatus, VersionedStep,
};
pub use workspace::{
    BackupEntry, BackupWorkspace, LeftoverClone, RestoreReport, UnresolvedReference,
    WorkspaceClosure,
};
