//! Database migrations

use crate::error::Result;
use rusqlite::{params, Connection};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Apply `statements` and record `version` in one transaction
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // Dropping the transaction on error rolls it back
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        params![version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: operation queue
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // AUTOINCREMENT keeps seq values from ever being reused, so
            // ordering by seq is insertion order for the queue's lifetime
            "CREATE TABLE IF NOT EXISTS operations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                resource_key TEXT,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                retries INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_attempt INTEGER,
                error TEXT,
                remote_snapshot TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status)",
        ],
    )
}

/// Migration to version 2: entity snapshots for offline rendering
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            // Ids are only unique within an entity type
            "CREATE TABLE IF NOT EXISTS entity_snapshots (
                entity_type TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, id)
            )",
        ],
    )
}
