//! Registered units and their synchronization settings

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

const TIME_FORMAT: &str = "%H:%M";

/// A unit Central synchronizes with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRegistration {
    pub id: String,
    /// Base URL of the unit's sync endpoint
    pub address: String,
    /// Bearer token presented to the unit, if it requires one
    pub token: Option<String>,
    /// Daily time-of-day window in which this unit may be contacted;
    /// always contactable when unset. A window with `start > end` spans
    /// midnight.
    pub active_window: Option<(NaiveTime, NaiveTime)>,
    pub sync_interval_minutes: i64,
    pub retry_interval_minutes: i64,
    /// Set while the last cycle against this unit failed; surfaced for
    /// monitoring
    pub has_errors: bool,
}

impl UnitRegistration {
    /// Whether the unit may be contacted at the given instant
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        let Some((start, end)) = self.active_window else {
            return true;
        };
        let time = at.time();
        if start <= end {
            time >= start && time <= end
        } else {
            time >= start || time <= end
        }
    }
}

/// Parse a `HH:MM-HH:MM` window specification
pub fn parse_window(raw: &str) -> Result<(NaiveTime, NaiveTime)> {
    let (start, end) = raw.split_once('-').ok_or_else(|| {
        Error::InvalidInput(format!("window '{raw}' must look like 08:00-17:30"))
    })?;
    let parse = |value: &str| {
        NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
            .map_err(|_| Error::InvalidInput(format!("invalid time '{value}' in window '{raw}'")))
    };
    Ok((parse(start)?, parse(end)?))
}

/// Trait for unit registration storage
pub trait UnitRegistry {
    /// Insert or replace a registration
    fn upsert(&self, unit: &UnitRegistration) -> Result<()>;

    /// All registered units, by id
    fn list(&self) -> Result<Vec<UnitRegistration>>;

    /// Fetch one registration
    fn get(&self, id: &str) -> Result<Option<UnitRegistration>>;

    /// Remove a registration
    fn remove(&self, id: &str) -> Result<()>;

    /// Flip the monitoring error flag
    fn set_error_flag(&self, id: &str, has_errors: bool) -> Result<()>;
}

/// `SQLite` implementation of `UnitRegistry`
pub struct SqliteUnitRegistry<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteUnitRegistry<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_unit(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnitRegistration> {
        let window_start: Option<String> = row.get(3)?;
        let window_end: Option<String> = row.get(4)?;
        let active_window = match (window_start, window_end) {
            (Some(start), Some(end)) => NaiveTime::parse_from_str(&start, TIME_FORMAT)
                .ok()
                .zip(NaiveTime::parse_from_str(&end, TIME_FORMAT).ok()),
            _ => None,
        };
        Ok(UnitRegistration {
            id: row.get(0)?,
            address: row.get(1)?,
            token: row.get(2)?,
            active_window,
            sync_interval_minutes: row.get(5)?,
            retry_interval_minutes: row.get(6)?,
            has_errors: row.get::<_, i32>(7)? != 0,
        })
    }
}

impl UnitRegistry for SqliteUnitRegistry<'_> {
    fn upsert(&self, unit: &UnitRegistration) -> Result<()> {
        let window = unit.active_window.map(|(start, end)| {
            (
                format!("{:02}:{:02}", start.hour(), start.minute()),
                format!("{:02}:{:02}", end.hour(), end.minute()),
            )
        });
        self.conn.execute(
            "INSERT OR REPLACE INTO units
                 (id, address, token, window_start, window_end,
                  sync_interval_minutes, retry_interval_minutes, has_errors)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                unit.id,
                unit.address,
                unit.token,
                window.as_ref().map(|(start, _)| start),
                window.as_ref().map(|(_, end)| end),
                unit.sync_interval_minutes,
                unit.retry_interval_minutes,
                i32::from(unit.has_errors),
            ],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<UnitRegistration>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, address, token, window_start, window_end,
                    sync_interval_minutes, retry_interval_minutes, has_errors
             FROM units ORDER BY id",
        )?;
        let units = stmt
            .query_map([], Self::parse_unit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(units)
    }

    fn get(&self, id: &str) -> Result<Option<UnitRegistration>> {
        let unit = self
            .conn
            .query_row(
                "SELECT id, address, token, window_start, window_end,
                        sync_interval_minutes, retry_interval_minutes, has_errors
                 FROM units WHERE id = ?",
                params![id],
                Self::parse_unit,
            )
            .optional()?;
        Ok(unit)
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM units WHERE id = ?", params![id])?;
        self.conn
            .execute("DELETE FROM unit_cursors WHERE unit = ?", params![id])?;
        Ok(())
    }

    fn set_error_flag(&self, id: &str, has_errors: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE units SET has_errors = ? WHERE id = ?",
            params![i32::from(has_errors), id],
        )?;
        Ok(())
    }
}
