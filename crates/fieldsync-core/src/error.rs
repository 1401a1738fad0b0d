//! Error types for fieldsync-core

use thiserror::Error;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
///
/// Remote write outcomes are never reported through this type; they become
/// queue state transitions. Everything here means the device could not track
/// or reach its own local state.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A drain pass stopped on a local storage failure
    #[error("Sync pass aborted: {0}")]
    SyncAborted(String),

    /// The sync engine worker is no longer running
    #[error("Sync engine is not running")]
    EngineStopped,
}
