//! Drain loop, retry scheduling and the failure/conflict surface.

pub mod backoff;
mod engine;
mod remote;
mod surface;

pub use backoff::Backoff;
pub use engine::{DrainReport, SyncEngine, SyncHandle};
pub use remote::{ConflictDetails, RemoteWrite, WriteOutcome};
pub use surface::{attention_items, AttentionItem, AttentionSummary};
