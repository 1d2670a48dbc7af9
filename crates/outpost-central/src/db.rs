//! Central-only schema, layered on the core database as version 2

use rusqlite::Connection;

use crate::error::Result;

/// Schema version once the central tables are installed
pub const SCHEMA_VERSION_CENTRAL: i32 = 2;

/// Run the central migration on an already core-migrated database
pub fn migrate(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if version < SCHEMA_VERSION_CENTRAL {
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS units (
                id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                token TEXT,
                window_start TEXT,
                window_end TEXT,
                sync_interval_minutes INTEGER NOT NULL,
                retry_interval_minutes INTEGER NOT NULL,
                has_errors INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS unit_cursors (
                unit TEXT NOT NULL,
                dataset TEXT NOT NULL,
                last_sync_at INTEGER,
                last_failure_at INTEGER,
                last_push_revision INTEGER NOT NULL DEFAULT -1,
                last_pull_revision INTEGER NOT NULL DEFAULT -1,
                PRIMARY KEY (unit, dataset)
            );
            INSERT INTO schema_version (version) VALUES (2);
            COMMIT;",
        )?;
        tracing::info!("Migrated database to version {SCHEMA_VERSION_CENTRAL}");
    }

    Ok(())
}
