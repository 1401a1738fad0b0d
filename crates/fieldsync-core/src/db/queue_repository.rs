//! Operation queue repository implementation

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::models::{NewOperation, Operation, OperationId, OperationPatch, OperationStatus};
use rusqlite::{params, Connection, OptionalExtension};

use super::Database;

const OPERATION_COLUMNS: &str = "id, kind, resource_key, payload, status, retries, created_at, last_attempt, error, remote_snapshot";

/// Trait for durable operation queue storage.
///
/// Every call is atomic: a reader never observes a half-applied update, and
/// a successful `enqueue` survives a process restart.
pub trait QueueStore: Send + Sync {
    /// Persist a new `PENDING` operation at the tail of the queue
    fn enqueue(&self, request: NewOperation) -> Result<Operation>;

    /// Full queue in insertion order
    fn list(&self) -> Result<Vec<Operation>>;

    /// Get an operation by ID
    fn get(&self, id: &OperationId) -> Result<Option<Operation>>;

    /// Merge `patch` into a stored operation; no-op when absent
    fn update(&self, id: &OperationId, patch: OperationPatch) -> Result<()>;

    /// Delete an operation; returns whether it existed
    fn remove(&self, id: &OperationId) -> Result<bool>;

    /// Delete every operation (administrative use only)
    fn clear(&self) -> Result<()>;
}

/// `SQLite` implementation of `QueueStore`
pub struct SqliteQueueStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl SqliteQueueStore {
    /// Create a new store on the given database
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    /// Create a store that stamps `created_at` from `clock`
    pub fn with_clock(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operation> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let payload: String = row.get(3)?;
        let status: String = row.get(4)?;
        let remote_snapshot: Option<String> = row.get(9)?;

        Ok(Operation {
            id: id.parse().map_err(|error| conversion_error(0, error))?,
            kind: kind.into(),
            resource_key: row.get(2)?,
            payload: serde_json::from_str(&payload).map_err(|error| conversion_error(3, error))?,
            status: status
                .parse::<OperationStatus>()
                .map_err(|error| conversion_error(4, error))?,
            retries: row.get(5)?,
            created_at: row.get(6)?,
            last_attempt: row.get(7)?,
            error: row.get(8)?,
            remote_snapshot: remote_snapshot
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|error| conversion_error(9, error))?,
        })
    }

    fn fetch(conn: &Connection, id: &OperationId) -> Result<Option<Operation>> {
        let op = conn
            .query_row(
                &format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE id = ?"),
                params![id.as_str()],
                Self::parse_operation,
            )
            .optional()?;
        Ok(op)
    }
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(error))
}

impl QueueStore for SqliteQueueStore {
    fn enqueue(&self, request: NewOperation) -> Result<Operation> {
        let op = Operation::new(request, self.clock.now_millis());
        let payload = serde_json::to_string(&op.payload)?;

        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO operations (id, kind, resource_key, payload, status, retries, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    op.id.as_str(),
                    op.kind.as_str(),
                    op.resource_key,
                    payload,
                    op.status.as_str(),
                    op.retries,
                    op.created_at
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!("Enqueued {} operation {}", op.kind, op.id);
        Ok(op)
    }

    fn list(&self) -> Result<Vec<Operation>> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OPERATION_COLUMNS} FROM operations ORDER BY seq ASC"
            ))?;
            let ops = stmt
                .query_map([], Self::parse_operation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ops)
        })
    }

    fn get(&self, id: &OperationId) -> Result<Option<Operation>> {
        self.db.with_connection(|conn| Self::fetch(conn, id))
    }

    fn update(&self, id: &OperationId, patch: OperationPatch) -> Result<()> {
        self.db.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            let Some(mut op) = Self::fetch(&tx, id)? else {
                return Ok(());
            };
            op.apply(patch);

            let remote_snapshot = op
                .remote_snapshot
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "UPDATE operations
                 SET status = ?, retries = ?, last_attempt = ?, error = ?, remote_snapshot = ?
                 WHERE id = ?",
                params![
                    op.status.as_str(),
                    op.retries,
                    op.last_attempt,
                    op.error,
                    remote_snapshot,
                    id.as_str()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn remove(&self, id: &OperationId) -> Result<bool> {
        let rows = self.db.with_connection(|conn| {
            Ok(conn.execute("DELETE FROM operations WHERE id = ?", params![id.as_str()])?)
        })?;
        Ok(rows > 0)
    }

    fn clear(&self) -> Result<()> {
        let rows = self
            .db
            .with_connection(|conn| Ok(conn.execute("DELETE FROM operations", [])?))?;
        tracing::info!("Cleared {rows} queued operations");
        Ok(())
    }
}
