use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Record '{0}' not found")]
    RecordNotFound(String),

    #[error("Owner '{0}' not found")]
    OwnerNotFound(String),

    #[error("Scene '{0}' not found")]
    SceneNotFound(String),

    #[error("Token '{token}' not found in scene '{scene}'")]
    TokenNotFound { scene: String, token: String },

    #[error("Content pack '{0}' not found")]
    PackNotFound(String),

    #[error("Content pack '{0}' is locked")]
    PackLocked(String),

    #[error("Folder '{0}' not found")]
    FolderNotFound(String),

    #[error("Overlays cannot be changed directly on owned record '{0}'")]
    OwnedOverlayForbidden(String),

    #[error("Invalid field path '{path}': {reason}")]
    InvalidFieldPath { path: String, reason: String },

    #[error("Invalid record data: {0}")]
    InvalidData(String),

    #[error("Step registry error: {0}")]
    Registry(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean the addressed document is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RecordNotFound(_)
                | Self::OwnerNotFound(_)
                | Self::SceneNotFound(_)
                | Self::TokenNotFound { .. }
                | Self::PackNotFound(_)
                | Self::FolderNotFound(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for MigrationError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Store(err.to_string())
    }
}
