//! Entity snapshot repository implementation

use std::sync::Arc;

use crate::error::Result;
use crate::models::EntitySnapshot;
use rusqlite::{params, OptionalExtension};

use super::Database;

/// Trait for the durable local store of entity snapshots.
///
/// Writes replace the whole entity (last write wins). Failures are returned,
/// never dropped: a caller must not queue a remote write it cannot pair with
/// a local snapshot.
pub trait SnapshotStore: Send + Sync {
    /// Insert or wholesale replace a snapshot
    fn put(&self, snapshot: &EntitySnapshot) -> Result<()>;

    /// Get a snapshot by entity type and ID
    fn get(&self, entity_type: &str, id: &str) -> Result<Option<EntitySnapshot>>;

    /// Drop every cached snapshot
    fn clear(&self) -> Result<()>;
}

/// `SQLite` implementation of `SnapshotStore`
pub struct SqliteSnapshotStore {
    db: Arc<Database>,
}

impl SqliteSnapshotStore {
    /// Create a new store on the given database
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn put(&self, snapshot: &EntitySnapshot) -> Result<()> {
        let data = serde_json::to_string(&snapshot.data)?;
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO entity_snapshots (id, entity_type, data, stored_at)
                 VALUES (?, ?, ?, ?)",
                params![snapshot.id, snapshot.entity_type, data, snapshot.stored_at],
            )?;
            Ok(())
        })?;
        tracing::debug!("Saved {} snapshot {}", snapshot.entity_type, snapshot.id);
        Ok(())
    }

    fn get(&self, entity_type: &str, id: &str) -> Result<Option<EntitySnapshot>> {
        let row = self.db.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, entity_type, data, stored_at FROM entity_snapshots
                     WHERE entity_type = ? AND id = ?",
                    params![entity_type, id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row)
        })?;

        let Some((id, entity_type, data, stored_at)) = row else {
            return Ok(None);
        };
        Ok(Some(EntitySnapshot {
            id,
            entity_type,
            data: serde_json::from_str(&data)?,
            stored_at,
        }))
    }

    fn clear(&self) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute("DELETE FROM entity_snapshots", [])?;
            Ok(())
        })?;
        tracing::info!("Cleared local entity snapshots");
        Ok(())
    }
}
