//! The remote write capability consumed by the sync engine.

use std::future::Future;

use serde_json::Value;

use crate::models::{EntitySnapshot, OperationKind};

/// Result of applying one operation against the authoritative store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The write was applied. Carries the acknowledged entity when the
    /// remote returns one; it replaces the local snapshot.
    Applied(Option<EntitySnapshot>),
    /// Transient failure (network error, timeout, 5xx); retried with backoff
    Retryable(String),
    /// The remote rejected the write for good (validation, 4xx)
    Permanent(String),
    /// The remote entity diverged from what the write was built against
    Conflict(ConflictDetails),
}

impl WriteOutcome {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn conflict(message: impl Into<String>, remote: Option<Value>) -> Self {
        Self::Conflict(ConflictDetails {
            message: message.into(),
            remote,
        })
    }
}

/// What a resolver needs to show both sides of a conflict.
///
/// The local side is the operation's own payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDetails {
    /// Human-readable description of the divergence
    pub message: String,
    /// Current authoritative version, when the remote reports it
    pub remote: Option<Value>,
}

/// Applies queued operations against the authoritative store.
///
/// Transport, authentication, timeouts and conflict detection (version or
/// timestamp comparison) all live in the implementation. A timeout must be
/// reported as [`WriteOutcome::Retryable`].
pub trait RemoteWrite: Send + Sync + 'static {
    fn apply(
        &self,
        kind: &OperationKind,
        payload: &Value,
    ) -> impl Future<Output = WriteOutcome> + Send;
}
