//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Schema version installed by this crate. The central binary layers its
/// own tables on top as a later version.
pub const SCHEMA_VERSION_CORE: i32 = 1;

/// Run all pending core migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: dataset catalog, versioned feature store, and
/// the synchronization log
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS datasets (
            name TEXT PRIMARY KEY,
            attr_schema TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS revisions (
            dataset TEXT NOT NULL REFERENCES datasets(name),
            revision INTEGER NOT NULL,
            author TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (dataset, revision)
        );
        CREATE TABLE IF NOT EXISTS features (
            dataset TEXT NOT NULL REFERENCES datasets(name),
            fid TEXT NOT NULL,
            attrs TEXT NOT NULL,
            PRIMARY KEY (dataset, fid)
        );
        CREATE TABLE IF NOT EXISTS feature_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset TEXT NOT NULL,
            revision INTEGER NOT NULL,
            fid TEXT NOT NULL,
            kind TEXT NOT NULL,
            before_state TEXT,
            after_state TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_feature_log_window ON feature_log(dataset, revision);
        CREATE INDEX IF NOT EXISTS idx_feature_log_fid ON feature_log(dataset, fid, revision);
        CREATE TABLE IF NOT EXISTS sync_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset TEXT NOT NULL,
            local_revision INTEGER NOT NULL,
            peer_revision INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sync_history_dataset ON sync_history(dataset, local_revision);
        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset TEXT NOT NULL,
            feature_id TEXT NOT NULL,
            local_revision INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            state TEXT NOT NULL,
            resolved_at INTEGER,
            local_snapshot TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_active ON sync_conflicts(dataset, state);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}
