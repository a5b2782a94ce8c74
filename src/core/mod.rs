pub mod error;
pub mod reference;
pub mod types;
pub mod update;

pub use error::{MigrationError, Result};
pub use reference::{RecordRef, unowned_record_path};
pub use types::{
    Container, ContentPack, Folder, Overlay, OverlayChange, OverlayMode, OwnedRecordRef, Owner,
    OwnerLocation, PackContentKind, PackSource, Record, Scene, SchemaVersion, Token,
};
pub use update::{FieldChange, OverlayChanges, RecordUpdate, delete_field, field, set_field};
