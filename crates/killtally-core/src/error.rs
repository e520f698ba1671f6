//! Error types for KillTally

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TallyError>;

#[derive(Error, Debug)]
pub enum TallyError {
    /// No connection could be obtained or the backend is unreachable
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A batched increment-upsert did not complete; nothing of it was applied
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// An actor name is already taken by a different id
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Schema initialization failed: {0}")]
    SchemaInitializationFailed(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
