// ============================================================================
// Tabletop World Migration Library
// ============================================================================

pub mod config;
pub mod core;
pub mod migration;
pub mod sink;
pub mod steps;
pub mod store;

// Re-export main types for convenience
pub use config::{MigrationConfig, PackAdmission, PackPolicy};
pub use crate::core::{
    Container, ContentPack, FieldChange, Folder, MigrationError, Overlay, OverlayChange,
    OverlayMode, OwnedRecordRef, Owner, OwnerLocation, PackContentKind, PackSource, Record,
    RecordRef, RecordUpdate, Result, Scene, SchemaVersion, Token,
};
pub use sink::{
    Diagnostic, DiagnosticContext, DiagnosticLevel, DiagnosticSink, MemorySink, ProgressEvent,
    ProgressSink, TracingSink,
};
pub use store::{InMemoryWorldStore, PackSnapshot, StoreStats, WorldSnapshot, WorldStore};

// Re-export the engine API
pub use migration::{
    BackupWorkspace, BatchReport, CollectionMigrator, LeftoverClone, MigrationEnv,
    MigrationOutcome, MigrationRunner, PackLockGuard, Phase, RecordFailure, ReferenceIndex,
    RestoreReport, StepContext, StepRegistry, StepReport, StepStatus, UnitOutcome,
    UnresolvedReference, VersionedStep,
};
pub use steps::world_steps;
