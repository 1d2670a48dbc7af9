//! Database connection management

use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

use super::migrations;

/// Database wrapper owning the `SQLite` connection.
///
/// Every exchange runs inside a single `IMMEDIATE` transaction on this
/// connection; the write lock it takes doubles as the mutual exclusion
/// between concurrent sync exchanges and local writers on the same
/// database.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let database = Self { conn };
        database.configure()?;
        migrations::run(&database.conn)?;
        Ok(database)
    }

    /// Configure `SQLite` for concurrent read access
    fn configure(&self) -> Result<()> {
        // WAL has no effect on in-memory databases; ignore the outcome
        self.conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        self.conn
            .execute_batch("PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access, required to open a transaction
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
