//! Error types for outpost-core

use thiserror::Error;

/// Result type alias using outpost-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in outpost-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A peer called an operation with revision numbers that do not match
    /// this side's synchronization state. The caller must re-query and
    /// resynchronize rather than retry blindly.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Local and incoming state disagree in a way that cannot be resolved
    /// automatically (e.g. a fresh local insert colliding with a remote
    /// change on the same feature id). The exchange is aborted in full.
    #[error("Data consistency error: {0}")]
    Inconsistency(String),

    /// Dataset is not known or not enabled for synchronization
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for caller errors that reject the call without touching state.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::UnknownDataset(_))
    }
}
