//! Operations that need the user: `FAILED` and `CONFLICT`.

use serde::Serialize;
use serde_json::Value;

use crate::models::{Operation, OperationId, OperationKind, OperationStatus};

/// One row of the failure/conflict resolver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttentionItem {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Human label for `kind`
    pub label: String,
    pub status: OperationStatus,
    /// Enqueue time (Unix ms)
    pub created_at: i64,
    pub last_attempt: Option<i64>,
    pub error: Option<String>,
    /// The write as queued on this device
    pub local: Value,
    /// The authoritative version, for conflicts that reported one
    pub remote: Option<Value>,
}

impl From<&Operation> for AttentionItem {
    fn from(op: &Operation) -> Self {
        Self {
            id: op.id,
            kind: op.kind.clone(),
            label: op.kind.label().to_string(),
            status: op.status,
            created_at: op.created_at,
            last_attempt: op.last_attempt,
            error: op.error.clone(),
            local: op.payload.clone(),
            remote: op.remote_snapshot.clone(),
        }
    }
}

/// Select the operations in `FAILED` or `CONFLICT`, queue order preserved.
pub fn attention_items(ops: &[Operation]) -> Vec<AttentionItem> {
    ops.iter()
        .filter(|op| op.status.needs_attention())
        .map(AttentionItem::from)
        .collect()
}

/// Counts behind the attention badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttentionSummary {
    pub failed: usize,
    pub conflicts: usize,
}

impl AttentionSummary {
    pub fn from_operations(ops: &[Operation]) -> Self {
        ops.iter().fold(Self::default(), |mut summary, op| {
            match op.status {
                OperationStatus::Failed => summary.failed += 1,
                OperationStatus::Conflict => summary.conflicts += 1,
                OperationStatus::Pending | OperationStatus::Retrying => {}
            }
            summary
        })
    }

    pub const fn total(&self) -> usize {
        self.failed + self.conflicts
    }

    /// Badge text, `None` when nothing needs attention
    pub fn headline(&self) -> Option<String> {
        match self.total() {
            0 => None,
            1 => Some("1 Sync Error".to_string()),
            n => Some(format!("{n} Sync Errors")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOperation;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn op(kind: OperationKind, status: OperationStatus) -> Operation {
        let mut op = Operation::new(NewOperation::new(kind, json!({ "id": "t-1" })), 1_000);
        op.status = status;
        op
    }

    #[test]
    fn selects_only_failed_and_conflict_in_order() {
        let mut conflict = op(OperationKind::UpdateTicket, OperationStatus::Conflict);
        conflict.error = Some("ticket changed remotely".to_string());
        conflict.remote_snapshot = Some(json!({ "id": "t-1", "status": "closed" }));
        let ops = vec![
            op(OperationKind::UploadPhoto, OperationStatus::Pending),
            op(OperationKind::CreatePurchase, OperationStatus::Failed),
            op(OperationKind::UpdateTicket, OperationStatus::Retrying),
            conflict.clone(),
        ];

        let items = attention_items(&ops);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, "Purchase");
        assert_eq!(items[0].status, OperationStatus::Failed);
        assert_eq!(items[1], AttentionItem::from(&conflict));
        assert_eq!(items[1].label, "Ticket Update");
        assert_eq!(items[1].local, json!({ "id": "t-1" }));
        assert_eq!(items[1].remote, Some(json!({ "id": "t-1", "status": "closed" })));
    }

    #[test]
    fn unknown_kind_uses_raw_tag_as_label() {
        let ops = vec![op(OperationKind::from("SIGN_REPORT"), OperationStatus::Failed)];
        assert_eq!(attention_items(&ops)[0].label, "SIGN_REPORT");
    }

    #[test]
    fn summary_headline() {
        assert_eq!(AttentionSummary::default().headline(), None);

        let one = AttentionSummary::from_operations(&[op(
            OperationKind::UpdateTicket,
            OperationStatus::Conflict,
        )]);
        assert_eq!(one.headline().as_deref(), Some("1 Sync Error"));

        let many = AttentionSummary::from_operations(&[
            op(OperationKind::UpdateTicket, OperationStatus::Conflict),
            op(OperationKind::UploadPhoto, OperationStatus::Failed),
            op(OperationKind::UploadPhoto, OperationStatus::Pending),
        ]);
        assert_eq!(many, AttentionSummary { failed: 1, conflicts: 1 });
        assert_eq!(many.headline().as_deref(), Some("2 Sync Errors"));
    }
}
