//! SQLite persistence for schedules and the applet directory tables.
//!
//! One connection behind a mutex. Every mutation runs through
//! [`ScheduleDb::atomic`], which commits when the closure returns `Ok` and
//! rolls back otherwise.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cadence_core::error::{CadenceError, Result};
use rusqlite::{Connection, ErrorCode, Transaction};

/// SQLite-backed store for all schedule data.
pub struct ScheduleDb {
    conn: Mutex<Connection>,
}

/// Classify a rusqlite error: constraint violations become
/// [`CadenceError::Integrity`], everything else [`CadenceError::Database`].
pub fn db_err(e: rusqlite::Error) -> CadenceError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            CadenceError::Integrity(e.to_string())
        }
        _ => CadenceError::Database(e.to_string()),
    }
}

impl ScheduleDb {
    /// Open or create the schedule database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| CadenceError::Database(format!("DB open: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| CadenceError::Database(format!("DB pragma: {e}")))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CadenceError::Database(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| CadenceError::Database(format!("DB pragma: {e}")))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CadenceError::Database(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Directory: applets and what can be scheduled in them
            CREATE TABLE IF NOT EXISTS applets (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                link_key TEXT UNIQUE
            );

            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY,
                applet_id INTEGER NOT NULL REFERENCES applets(id) ON DELETE CASCADE,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS flows (
                id INTEGER PRIMARY KEY,
                applet_id INTEGER NOT NULL REFERENCES applets(id) ON DELETE CASCADE,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS applet_roles (
                applet_id INTEGER NOT NULL REFERENCES applets(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (applet_id, user_id, role)
            );

            -- Recurrence rules, one per event, never shared
            CREATE TABLE IF NOT EXISTS periodicity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                start_date TEXT,
                end_date TEXT,
                selected_date TEXT,
                recurrence_interval INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                applet_id INTEGER NOT NULL REFERENCES applets(id) ON DELETE CASCADE,
                periodicity_id INTEGER NOT NULL REFERENCES periodicity(id),
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                access_before_schedule INTEGER,   -- NULL is distinct from 0
                one_time_completion INTEGER,
                timer_type TEXT NOT NULL DEFAULT 'NOT_SET',
                timer_secs INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_events_applet ON events(applet_id);

            -- Event bindings
            CREATE TABLE IF NOT EXISTS activity_events (
                event_id INTEGER PRIMARY KEY REFERENCES events(id) ON DELETE CASCADE,
                activity_id INTEGER NOT NULL REFERENCES activities(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS flow_events (
                event_id INTEGER PRIMARY KEY REFERENCES events(id) ON DELETE CASCADE,
                flow_id INTEGER NOT NULL REFERENCES flows(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS user_events (
                event_id INTEGER PRIMARY KEY REFERENCES events(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_user_events_user ON user_events(user_id);

            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                trigger_type TEXT NOT NULL,      -- 'FIXED' or 'RANDOM'
                at_time TEXT,
                from_time TEXT,
                to_time TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL UNIQUE REFERENCES events(id) ON DELETE CASCADE,
                activity_incomplete INTEGER NOT NULL DEFAULT 0,
                reminder_time TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| CadenceError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    /// Run `f` inside one transaction.
    pub fn atomic<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(db_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!("⚠️ Rollback failed after '{e}': {rollback}");
                }
                Err(e)
            }
        }
    }

    /// Run a read-only closure against the connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }
}
