//! Error types for the central daemon

use thiserror::Error;

/// Result type alias using the central daemon's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving unit synchronizations
#[derive(Error, Debug)]
pub enum Error {
    /// Engine error on Central's own copy
    #[error(transparent)]
    Core(#[from] outpost_core::Error),

    /// Network-level failure talking to a unit
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A unit answered with an error payload
    #[error("Unit API error: {0}")]
    Api(String),

    /// Registry or cursor storage error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Invalid registration or configuration input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
