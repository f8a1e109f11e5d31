//! SQLite-backed attendance event log.
//!
//! The log is append-only: rows are inserted by the state machine and never
//! updated or deleted (corrections are amendment records handled outside
//! this subsystem). The connection sits behind a mutex so the store can be
//! shared across the monitor, the sweeps and the CLI.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::attendance::{AttendanceEvent, AttendanceEventKind, BreakKind, EventStore};
use crate::error::StorageError;
use crate::geo::{Coordinate, PositionSample};

use super::data_dir;

/// SQLite database holding the attendance event log.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/fieldwatch/fieldwatch.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StorageError> {
        let dir = data_dir().map_err(|e| StorageError::Config {
            path: "~/.config/fieldwatch".into(),
            message: e.to_string(),
        })?;
        Self::open_at(&dir.join("fieldwatch.db"))
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &std::path::Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|source| StorageError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attendance_events (
                id           TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL,
                kind         TEXT NOT NULL,
                break_kind   TEXT,
                occurred_at  TEXT NOT NULL,
                latitude     REAL NOT NULL,
                longitude    REAL NOT NULL,
                accuracy_m   REAL NOT NULL,
                captured_at  TEXT NOT NULL,
                verified     INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_events_user_occurred
                ON attendance_events(user_id, occurred_at);
            CREATE INDEX IF NOT EXISTS idx_events_user_kind
                ON attendance_events(user_id, kind, occurred_at);",
        )
        .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    /// Distinct workers present in the log, for the CLI worker directory.
    pub fn known_user_ids(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM attendance_events")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Most recent events for a worker, newest first.
    pub fn recent_events(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AttendanceEvent>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, break_kind, occurred_at,
                    latitude, longitude, accuracy_m, captured_at, verified
             FROM attendance_events
             WHERE user_id = ?1
             ORDER BY occurred_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

impl EventStore for Database {
    fn most_recent_event(&self, user_id: &str) -> Result<Option<AttendanceEvent>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, break_kind, occurred_at,
                    latitude, longitude, accuracy_m, captured_at, verified
             FROM attendance_events
             WHERE user_id = ?1
             ORDER BY occurred_at DESC, rowid DESC
             LIMIT 1",
        )?;
        let event = stmt
            .query_row(params![user_id], row_to_event)
            .optional()?;
        Ok(event)
    }

    fn append_event(&self, event: AttendanceEvent) -> Result<AttendanceEvent, StorageError> {
        let (kind, break_kind) = kind_to_columns(event.kind);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO attendance_events
                (id, user_id, kind, break_kind, occurred_at,
                 latitude, longitude, accuracy_m, captured_at, verified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id.to_string(),
                event.user_id,
                kind,
                break_kind,
                event.occurred_at.to_rfc3339(),
                event.position.coordinate.latitude_deg(),
                event.position.coordinate.longitude_deg(),
                event.position.accuracy_m,
                event.position.captured_at.to_rfc3339(),
                event.verified_by_site as i64,
            ],
        )?;
        Ok(event)
    }

    fn last_clock_in(&self, user_id: &str) -> Result<Option<AttendanceEvent>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, break_kind, occurred_at,
                    latitude, longitude, accuracy_m, captured_at, verified
             FROM attendance_events
             WHERE user_id = ?1 AND kind = 'clock_in'
             ORDER BY occurred_at DESC, rowid DESC
             LIMIT 1",
        )?;
        let event = stmt
            .query_row(params![user_id], row_to_event)
            .optional()?;
        Ok(event)
    }
}

fn kind_to_columns(kind: AttendanceEventKind) -> (&'static str, Option<&'static str>) {
    match kind {
        AttendanceEventKind::ClockIn => ("clock_in", None),
        AttendanceEventKind::ClockOut => ("clock_out", None),
        AttendanceEventKind::BreakStart { kind } => ("break_start", Some(break_kind_str(kind))),
        AttendanceEventKind::BreakEnd { kind } => ("break_end", Some(break_kind_str(kind))),
        AttendanceEventKind::TripStart => ("trip_start", None),
        AttendanceEventKind::TripEnd => ("trip_end", None),
    }
}

fn break_kind_str(kind: BreakKind) -> &'static str {
    match kind {
        BreakKind::Meal => "meal",
        BreakKind::Personal => "personal",
    }
}

fn parse_break_kind(value: Option<String>) -> rusqlite::Result<BreakKind> {
    match value.as_deref() {
        Some("meal") => Ok(BreakKind::Meal),
        Some("personal") => Ok(BreakKind::Personal),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown break kind: {other:?}").into(),
        )),
    }
}

fn parse_timestamp(value: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<AttendanceEvent> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let break_kind: Option<String> = row.get(3)?;
    let occurred_at: String = row.get(4)?;
    let latitude: f64 = row.get(5)?;
    let longitude: f64 = row.get(6)?;
    let accuracy_m: f64 = row.get(7)?;
    let captured_at: String = row.get(8)?;
    let verified: i64 = row.get(9)?;

    let kind = match kind_str.as_str() {
        "clock_in" => AttendanceEventKind::ClockIn,
        "clock_out" => AttendanceEventKind::ClockOut,
        "break_start" => AttendanceEventKind::BreakStart {
            kind: parse_break_kind(break_kind)?,
        },
        "break_end" => AttendanceEventKind::BreakEnd {
            kind: parse_break_kind(break_kind)?,
        },
        "trip_start" => AttendanceEventKind::TripStart,
        "trip_end" => AttendanceEventKind::TripEnd,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown event kind: {other}").into(),
            ))
        }
    };

    let coordinate = Coordinate::new(latitude, longitude).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Real,
            e.to_string().into(),
        )
    })?;
    let position = PositionSample::new(coordinate, accuracy_m, parse_timestamp(captured_at, 8)?)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Real,
                e.to_string().into(),
            )
        })?;

    Ok(AttendanceEvent {
        id: Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?,
        user_id,
        kind,
        occurred_at: parse_timestamp(occurred_at, 4)?,
        position,
        verified_by_site: verified != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PositionSample {
        let c = Coordinate::new(48.1486, 17.1077).unwrap();
        PositionSample::new(c, 10.0, Utc::now()).unwrap()
    }

    fn event(user: &str, kind: AttendanceEventKind) -> AttendanceEvent {
        AttendanceEvent {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            kind,
            occurred_at: Utc::now(),
            position: sample(),
            verified_by_site: matches!(kind, AttendanceEventKind::ClockIn),
        }
    }

    #[test]
    fn append_and_read_back_most_recent() {
        let db = Database::open_memory().unwrap();
        db.append_event(event("w1", AttendanceEventKind::ClockIn))
            .unwrap();
        let brk = event(
            "w1",
            AttendanceEventKind::BreakStart {
                kind: BreakKind::Meal,
            },
        );
        db.append_event(brk.clone()).unwrap();

        let latest = db.most_recent_event("w1").unwrap().unwrap();
        assert_eq!(latest.id, brk.id);
        assert_eq!(
            latest.kind,
            AttendanceEventKind::BreakStart {
                kind: BreakKind::Meal
            }
        );
        // Timestamps survive the round trip to second precision or better.
        assert!((latest.occurred_at - brk.occurred_at).num_seconds().abs() <= 1);
    }

    #[test]
    fn most_recent_is_per_user() {
        let db = Database::open_memory().unwrap();
        db.append_event(event("w1", AttendanceEventKind::ClockIn))
            .unwrap();
        db.append_event(event("w2", AttendanceEventKind::TripStart))
            .unwrap();

        assert_eq!(
            db.most_recent_event("w1").unwrap().unwrap().kind,
            AttendanceEventKind::ClockIn
        );
        assert_eq!(
            db.most_recent_event("w2").unwrap().unwrap().kind,
            AttendanceEventKind::TripStart
        );
        assert!(db.most_recent_event("w3").unwrap().is_none());
    }

    #[test]
    fn last_clock_in_skips_later_events() {
        let db = Database::open_memory().unwrap();
        let clock_in = event("w1", AttendanceEventKind::ClockIn);
        db.append_event(clock_in.clone()).unwrap();
        db.append_event(event(
            "w1",
            AttendanceEventKind::BreakStart {
                kind: BreakKind::Personal,
            },
        ))
        .unwrap();

        let found = db.last_clock_in("w1").unwrap().unwrap();
        assert_eq!(found.id, clock_in.id);
    }

    #[test]
    fn events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldwatch.db");

        let clock_in = event("w1", AttendanceEventKind::ClockIn);
        {
            let db = Database::open_at(&path).unwrap();
            db.append_event(clock_in.clone()).unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        let latest = db.most_recent_event("w1").unwrap().unwrap();
        assert_eq!(latest.id, clock_in.id);
    }

    #[test]
    fn known_users_and_recent_events() {
        let db = Database::open_memory().unwrap();
        db.append_event(event("w1", AttendanceEventKind::ClockIn))
            .unwrap();
        db.append_event(event("w1", AttendanceEventKind::ClockOut))
            .unwrap();
        db.append_event(event("w2", AttendanceEventKind::ClockIn))
            .unwrap();

        let mut users = db.known_user_ids().unwrap();
        users.sort();
        assert_eq!(users, vec!["w1".to_string(), "w2".to_string()]);

        let recent = db.recent_events("w1", 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, AttendanceEventKind::ClockOut);
    }
}
