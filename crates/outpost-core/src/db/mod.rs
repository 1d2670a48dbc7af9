//! Database layer for Outpost

mod conflict_log;
mod connection;
mod history_log;
mod migrations;

pub use conflict_log::{ConflictLog, SqliteConflictLog};
pub use connection::Database;
pub use history_log::{HistoryLog, SqliteHistoryLog};
pub use migrations::SCHEMA_VERSION_CORE;
