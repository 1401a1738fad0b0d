//! fieldsync-core - offline operation queue and sync engine
//!
//! Writes made while disconnected are queued durably in SQLite and replayed
//! against the authoritative store, in order, once connectivity returns.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
mod util;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use models::{Operation, OperationId, OperationKind, OperationStatus};
pub use services::OfflineService;
pub use state::{SyncState, SyncStatus};
pub use sync::{RemoteWrite, SyncEngine, SyncHandle, WriteOutcome};
