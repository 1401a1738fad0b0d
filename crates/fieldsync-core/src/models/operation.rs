//! Queued operation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;
use crate::util::normalize_text_option;

/// Payload fields checked, in order, when deriving a resource key.
const RESOURCE_KEY_FIELDS: [&str; 3] = ["resourceId", "ticketId", "id"];

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Payload shape tag, used to route an operation to its remote handler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    /// Field update of a service ticket
    UpdateTicket,
    /// Photo evidence attached to a ticket
    UploadPhoto,
    /// New purchase record
    CreatePurchase,
    /// Any other tag, kept verbatim
    Other(String),
}

impl OperationKind {
    /// Wire/storage tag
    pub fn as_str(&self) -> &str {
        match self {
            Self::UpdateTicket => "UPDATE_TICKET",
            Self::UploadPhoto => "UPLOAD_PHOTO",
            Self::CreatePurchase => "CREATE_PURCHASE",
            Self::Other(tag) => tag,
        }
    }

    /// Human label shown next to failed or conflicting operations
    pub fn label(&self) -> &str {
        match self {
            Self::UpdateTicket => "Ticket Update",
            Self::UploadPhoto => "Photo Upload",
            Self::CreatePurchase => "Purchase",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for OperationKind {
    fn from(value: &str) -> Self {
        match value {
            "UPDATE_TICKET" => Self::UpdateTicket,
            "UPLOAD_PHOTO" => Self::UploadPhoto,
            "CREATE_PURCHASE" => Self::CreatePurchase,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for OperationKind {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<OperationKind> for String {
    fn from(value: OperationKind) -> Self {
        match value {
            OperationKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a queued operation
///
/// Success is not a status: a successful operation leaves the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Waiting for its first attempt, or re-armed by the user
    Pending,
    /// Failed transiently, will be retried after its backoff window
    Retrying,
    /// Rejected for good; waits for the user
    Failed,
    /// Remote state diverged; waits for the user
    Conflict,
}

impl OperationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Retrying => "RETRYING",
            Self::Failed => "FAILED",
            Self::Conflict => "CONFLICT",
        }
    }

    /// Whether the drain loop may attempt this operation
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }

    /// Whether the operation needs user action
    pub const fn needs_attention(self) -> bool {
        matches!(self, Self::Failed | Self::Conflict)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RETRYING" => Ok(Self::Retrying),
            "FAILED" => Ok(Self::Failed),
            "CONFLICT" => Ok(Self::Conflict),
            other => Err(Error::InvalidInput(format!(
                "unknown operation status '{other}'"
            ))),
        }
    }
}

/// A pending write intended for the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier, never reused
    pub id: OperationId,
    /// Payload shape tag
    pub kind: OperationKind,
    /// Remote resource this operation mutates, if known
    pub resource_key: Option<String>,
    /// Opaque data sufficient to replay the write
    pub payload: Value,
    /// Lifecycle status
    pub status: OperationStatus,
    /// Number of attempted sends
    pub retries: u32,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
    /// Timestamp of the latest attempt (Unix ms)
    pub last_attempt: Option<i64>,
    /// Last failure message
    pub error: Option<String>,
    /// Authoritative version reported with a conflict
    pub remote_snapshot: Option<Value>,
}

impl Operation {
    /// Build a fresh `PENDING` operation from an enqueue request
    #[must_use]
    pub fn new(request: NewOperation, created_at: i64) -> Self {
        let resource_key = request
            .resource_key
            .or_else(|| resource_key_from_payload(&request.payload));
        Self {
            id: OperationId::new(),
            kind: request.kind,
            resource_key,
            payload: request.payload,
            status: OperationStatus::Pending,
            retries: 0,
            created_at,
            last_attempt: None,
            error: None,
            remote_snapshot: None,
        }
    }

    /// Merge the present fields of `patch` into this operation
    pub fn apply(&mut self, patch: OperationPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(retries) = patch.retries {
            self.retries = retries;
        }
        if let Some(last_attempt) = patch.last_attempt {
            self.last_attempt = last_attempt;
        }
        if let Some(error) = patch.error {
            self.error = error;
        }
        if let Some(remote_snapshot) = patch.remote_snapshot {
            self.remote_snapshot = remote_snapshot;
        }
    }
}

/// Enqueue request: what the caller supplies
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub payload: Value,
    /// Explicit resource key; derived from the payload when `None`
    pub resource_key: Option<String>,
}

impl NewOperation {
    pub fn new(kind: impl Into<OperationKind>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            resource_key: None,
        }
    }

    #[must_use]
    pub fn with_resource_key(mut self, resource_key: impl Into<String>) -> Self {
        self.resource_key = normalize_text_option(Some(resource_key.into()));
        self
    }
}

/// Partial update of an operation.
///
/// Outer `None` leaves a field untouched; for nullable fields the inner
/// `None` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationPatch {
    pub status: Option<OperationStatus>,
    pub retries: Option<u32>,
    pub last_attempt: Option<Option<i64>>,
    pub error: Option<Option<String>>,
    pub remote_snapshot: Option<Option<Value>>,
}

impl OperationPatch {
    #[must_use]
    pub const fn status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub const fn last_attempt(mut self, at: i64) -> Self {
        self.last_attempt = Some(Some(at));
        self
    }

    #[must_use]
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(Some(message.into()));
        self
    }

    #[must_use]
    pub fn remote_snapshot(mut self, remote: Option<Value>) -> Self {
        self.remote_snapshot = Some(remote);
        self
    }

    /// Back to a never-attempted `PENDING` operation
    #[must_use]
    pub fn rearm() -> Self {
        Self {
            status: Some(OperationStatus::Pending),
            retries: Some(0),
            last_attempt: Some(None),
            error: Some(None),
            remote_snapshot: Some(None),
        }
    }
}

/// Derive a resource key from conventional payload identifier fields
pub fn resource_key_from_payload(payload: &Value) -> Option<String> {
    RESOURCE_KEY_FIELDS.iter().find_map(|field| {
        payload
            .get(field)
            .and_then(Value::as_str)
            .and_then(|value| normalize_text_option(Some(value.to_string())))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_operation_id_unique() {
        let id1 = OperationId::new();
        let id2 = OperationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        let parsed: OperationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_kind_tags_and_labels() {
        assert_eq!(OperationKind::from("UPDATE_TICKET"), OperationKind::UpdateTicket);
        assert_eq!(OperationKind::UploadPhoto.as_str(), "UPLOAD_PHOTO");
        assert_eq!(OperationKind::CreatePurchase.label(), "Purchase");

        let custom = OperationKind::from("CLOSE_INVOICE");
        assert_eq!(custom, OperationKind::Other("CLOSE_INVOICE".to_string()));
        assert_eq!(custom.label(), "CLOSE_INVOICE");
    }

    #[test]
    fn test_kind_serializes_as_tag() {
        let json = serde_json::to_string(&OperationKind::UpdateTicket).unwrap();
        assert_eq!(json, "\"UPDATE_TICKET\"");
        let parsed: OperationKind = serde_json::from_str("\"UPLOAD_PHOTO\"").unwrap();
        assert_eq!(parsed, OperationKind::UploadPhoto);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("RETRYING".parse::<OperationStatus>().unwrap(), OperationStatus::Retrying);
        assert!("DONE".parse::<OperationStatus>().is_err());
        assert!(OperationStatus::Pending.is_active());
        assert!(!OperationStatus::Conflict.is_active());
        assert!(OperationStatus::Failed.needs_attention());
    }

    #[test]
    fn test_new_operation_is_pending() {
        let op = Operation::new(
            NewOperation::new(OperationKind::UpdateTicket, json!({ "id": "t-1" })),
            42,
        );
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retries, 0);
        assert_eq!(op.created_at, 42);
        assert_eq!(op.last_attempt, None);
        assert_eq!(op.error, None);
        assert_eq!(op.resource_key.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_resource_key_prefers_explicit_then_fields_in_order() {
        let payload = json!({ "ticketId": "t-9", "id": "photo-1" });
        assert_eq!(resource_key_from_payload(&payload).as_deref(), Some("t-9"));
        assert_eq!(resource_key_from_payload(&json!({ "note": "x" })), None);
        assert_eq!(resource_key_from_payload(&json!({ "id": "  " })), None);

        let op = Operation::new(
            NewOperation::new(OperationKind::UploadPhoto, payload).with_resource_key("ticket/t-9"),
            0,
        );
        assert_eq!(op.resource_key.as_deref(), Some("ticket/t-9"));
    }

    #[test]
    fn test_patch_merges_only_present_fields() {
        let mut op = Operation::new(NewOperation::new("UPDATE_TICKET", json!({})), 0);
        op.apply(
            OperationPatch::default()
                .status(OperationStatus::Retrying)
                .retries(1)
                .last_attempt(500)
                .error("timeout"),
        );
        assert_eq!(op.status, OperationStatus::Retrying);
        assert_eq!(op.retries, 1);
        assert_eq!(op.last_attempt, Some(500));
        assert_eq!(op.error.as_deref(), Some("timeout"));

        op.apply(OperationPatch::default().status(OperationStatus::Failed));
        assert_eq!(op.retries, 1);
        assert_eq!(op.error.as_deref(), Some("timeout"));

        op.apply(OperationPatch::rearm());
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retries, 0);
        assert_eq!(op.last_attempt, None);
        assert_eq!(op.error, None);
    }
}
