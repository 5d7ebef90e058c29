//! Single-row change marker polled by the beat engine.
//!
//! Any mutation of jobs or schedules that must reach a running scheduler
//! bumps `schedule_changes.last_update`; the poller reloads when the value
//! differs from what it last saw.

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Move the marker to now, or one microsecond past the stored value when the
/// clock has not advanced, so every bump is observable.
pub fn bump(conn: &Connection) -> Result<DateTime<Utc>> {
    // Stored with microsecond precision; compare at the same precision.
    let now = Utc::now().trunc_subsecs(6);
    let next = match last_update(conn)? {
        Some(prev) if prev >= now => prev + Duration::microseconds(1),
        _ => now,
    };
    conn.execute(
        "INSERT INTO schedule_changes (id, last_update) VALUES (1, ?1)
         ON CONFLICT (id) DO UPDATE SET last_update = excluded.last_update",
        params![next.to_rfc3339_opts(SecondsFormat::Micros, true)],
    )?;
    debug!(last_update = %next, "schedule change marker bumped");
    Ok(next)
}

/// Current marker value; `None` before the first bump.
pub fn last_update(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT last_update FROM schedule_changes WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SchedulerError::Validation(format!("stored change marker {s:?}: {e}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    #[test]
    fn marker_starts_empty() {
        let conn = test_conn();
        assert_eq!(last_update(&conn).unwrap(), None);
    }

    #[test]
    fn bumps_strictly_increase_and_keep_one_row() {
        let conn = test_conn();
        let mut prev = bump(&conn).unwrap();
        for _ in 0..50 {
            let next = bump(&conn).unwrap();
            assert!(next > prev);
            prev = next;
        }
        assert_eq!(last_update(&conn).unwrap(), Some(prev));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schedule_changes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn clock_skew_still_advances_marker() {
        let conn = test_conn();
        let future = Utc::now().trunc_subsecs(6) + Duration::hours(1);
        conn.execute(
            "INSERT INTO schedule_changes (id, last_update) VALUES (1, ?1)",
            params![future.to_rfc3339_opts(SecondsFormat::Micros, true)],
        )
        .unwrap();
        let bumped = bump(&conn).unwrap();
        assert_eq!(bumped, future + Duration::microseconds(1));
    }
}
