//! Database layer for fieldsync

mod connection;
mod memory;
mod migrations;
mod queue_repository;
mod snapshot_repository;

pub use connection::Database;
pub use memory::{MemoryQueueStore, MemorySnapshotStore};
pub use queue_repository::{QueueStore, SqliteQueueStore};
pub use snapshot_repository::{SnapshotStore, SqliteSnapshotStore};
