use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// Per-connection settings every scheduler connection needs. Foreign keys are
/// off by default in SQLite and must be enabled on each connection.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Lock a shared connection. A panic in another holder leaves no open
/// transaction behind (it rolls back on drop), so a poisoned lock is reused.
pub fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Initialise the scheduler schema in `conn`. Idempotent.
///
/// The UNIQUE constraints on the schedule tables are the deduplication key
/// for `schedule_store::get_or_create`; UNIQUE(name) on `scheduled_jobs` is
/// what makes `registry::upsert_job` replace instead of duplicate.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS interval_schedules (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            every   INTEGER NOT NULL CHECK (every >= 1),
            period  TEXT    NOT NULL,
            UNIQUE (every, period)
        );

        CREATE TABLE IF NOT EXISTS crontab_schedules (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            minute          TEXT NOT NULL,
            hour            TEXT NOT NULL,
            day_of_week     TEXT NOT NULL,
            day_of_month    TEXT NOT NULL,
            month_of_year   TEXT NOT NULL,
            timezone        TEXT NOT NULL,
            UNIQUE (minute, hour, day_of_week, day_of_month, month_of_year, timezone)
        );

        CREATE TABLE IF NOT EXISTS clocked_schedules (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            clocked_time    TEXT NOT NULL UNIQUE     -- RFC3339 UTC, microseconds
        );

        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT    NOT NULL UNIQUE,
            task            TEXT    NOT NULL,
            kwargs          TEXT    NOT NULL DEFAULT '{}',   -- JSON object
            interval_id     INTEGER REFERENCES interval_schedules(id),
            crontab_id      INTEGER REFERENCES crontab_schedules(id),
            clocked_id      INTEGER REFERENCES clocked_schedules(id),
            enabled         INTEGER NOT NULL DEFAULT 1,
            one_off         INTEGER NOT NULL DEFAULT 0,
            start_time      TEXT,
            last_run_at     TEXT,
            total_run_count INTEGER NOT NULL DEFAULT 0,
            date_changed    TEXT    NOT NULL,
            CHECK ((interval_id IS NOT NULL)
                 + (crontab_id  IS NOT NULL)
                 + (clocked_id  IS NOT NULL) = 1)
        );

        -- Reference counting scans these on every job delete or reschedule.
        CREATE INDEX IF NOT EXISTS idx_jobs_interval ON scheduled_jobs (interval_id);
        CREATE INDEX IF NOT EXISTS idx_jobs_crontab  ON scheduled_jobs (crontab_id);
        CREATE INDEX IF NOT EXISTS idx_jobs_clocked  ON scheduled_jobs (clocked_id);

        CREATE TABLE IF NOT EXISTS schedule_changes (
            id          INTEGER PRIMARY KEY CHECK (id = 1),
            last_update TEXT    NOT NULL
        );
        ",
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_db(&conn).unwrap();
    cadence_users::db::init_db(&conn).unwrap();
    conn
}
