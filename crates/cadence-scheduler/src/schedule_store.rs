//! Deduplicated schedule definitions.
//!
//! Each variant lives in its own table keyed by a UNIQUE constraint over its
//! defining fields. `get_or_create` inserts with `ON CONFLICT DO NOTHING` and
//! then reads the row back, so concurrent callers asking for the same
//! definition always converge on one id.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};
use crate::schedule::validate;
use crate::types::{CrontabSpec, ScheduleDefinition, ScheduleId, ScheduleKind};

/// Canonical text form of a clocked instant. Fixed width so that equal
/// instants always produce equal keys.
pub(crate) fn clocked_key(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Return the id of the stored row equal to `def`, creating it if absent.
pub fn get_or_create(conn: &Connection, def: &ScheduleDefinition) -> Result<ScheduleId> {
    validate(def)?;

    let (inserted, id) = match def {
        ScheduleDefinition::Interval { every, unit } => {
            let inserted = conn.execute(
                "INSERT INTO interval_schedules (every, period) VALUES (?1, ?2)
                 ON CONFLICT (every, period) DO NOTHING",
                params![every, unit.as_str()],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM interval_schedules WHERE every = ?1 AND period = ?2",
                params![every, unit.as_str()],
                |row| row.get(0),
            )?;
            (inserted, ScheduleId::new(ScheduleKind::Interval, id))
        }
        ScheduleDefinition::Crontab(spec) => {
            let inserted = conn.execute(
                "INSERT INTO crontab_schedules
                    (minute, hour, day_of_week, day_of_month, month_of_year, timezone)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (minute, hour, day_of_week, day_of_month, month_of_year, timezone)
                 DO NOTHING",
                params![
                    spec.minute,
                    spec.hour,
                    spec.day_of_week,
                    spec.day_of_month,
                    spec.month_of_year,
                    spec.timezone
                ],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM crontab_schedules
                 WHERE minute = ?1 AND hour = ?2 AND day_of_week = ?3
                   AND day_of_month = ?4 AND month_of_year = ?5 AND timezone = ?6",
                params![
                    spec.minute,
                    spec.hour,
                    spec.day_of_week,
                    spec.day_of_month,
                    spec.month_of_year,
                    spec.timezone
                ],
                |row| row.get(0),
            )?;
            (inserted, ScheduleId::new(ScheduleKind::Crontab, id))
        }
        ScheduleDefinition::Clocked { fire_at } => {
            let key = clocked_key(fire_at);
            let inserted = conn.execute(
                "INSERT INTO clocked_schedules (clocked_time) VALUES (?1)
                 ON CONFLICT (clocked_time) DO NOTHING",
                params![key],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM clocked_schedules WHERE clocked_time = ?1",
                params![key],
                |row| row.get(0),
            )?;
            (inserted, ScheduleId::new(ScheduleKind::Clocked, id))
        }
    };

    if inserted > 0 {
        info!(schedule = %id, "schedule created");
    } else {
        debug!(schedule = %id, "schedule reused");
    }
    Ok(id)
}

/// Load the definition stored under `id`.
pub fn get(conn: &Connection, id: ScheduleId) -> Result<Option<ScheduleDefinition>> {
    let def = match id.kind {
        ScheduleKind::Interval => conn
            .query_row(
                "SELECT every, period FROM interval_schedules WHERE id = ?1",
                params![id.id],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
            .map(|(every, period)| {
                period
                    .parse()
                    .map(|unit| ScheduleDefinition::Interval { every, unit })
                    .map_err(SchedulerError::Validation)
            })
            .transpose()?,
        ScheduleKind::Crontab => conn
            .query_row(
                "SELECT minute, hour, day_of_week, day_of_month, month_of_year, timezone
                 FROM crontab_schedules WHERE id = ?1",
                params![id.id],
                |row| {
                    Ok(ScheduleDefinition::Crontab(CrontabSpec {
                        minute: row.get(0)?,
                        hour: row.get(1)?,
                        day_of_week: row.get(2)?,
                        day_of_month: row.get(3)?,
                        month_of_year: row.get(4)?,
                        timezone: row.get(5)?,
                    }))
                },
            )
            .optional()?,
        ScheduleKind::Clocked => conn
            .query_row(
                "SELECT clocked_time FROM clocked_schedules WHERE id = ?1",
                params![id.id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| ScheduleDefinition::Clocked {
                        fire_at: dt.with_timezone(&Utc),
                    })
                    .map_err(|e| SchedulerError::Validation(format!("stored clocked time {s:?}: {e}")))
            })
            .transpose()?,
    };
    Ok(def)
}

/// Number of jobs pointing at `id`.
pub fn reference_count(conn: &Connection, id: ScheduleId) -> Result<u32> {
    let sql = match id.kind {
        ScheduleKind::Interval => "SELECT COUNT(*) FROM scheduled_jobs WHERE interval_id = ?1",
        ScheduleKind::Crontab => "SELECT COUNT(*) FROM scheduled_jobs WHERE crontab_id = ?1",
        ScheduleKind::Clocked => "SELECT COUNT(*) FROM scheduled_jobs WHERE clocked_id = ?1",
    };
    Ok(conn.query_row(sql, params![id.id], |row| row.get(0))?)
}

/// Delete `id` when no job references it. Returns whether the row was deleted.
///
/// The count and the delete are two statements; run this inside the same
/// transaction as the job mutation that dropped the last reference, or a
/// concurrent upsert on another connection may re-reference the row in
/// between. `ScheduleNotFound` means the row is already gone.
pub fn delete_if_unreferenced(conn: &Connection, id: ScheduleId) -> Result<bool> {
    let table = match id.kind {
        ScheduleKind::Interval => "interval_schedules",
        ScheduleKind::Crontab => "crontab_schedules",
        ScheduleKind::Clocked => "clocked_schedules",
    };
    let exists: bool = conn.query_row(
        &format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = ?1)"),
        params![id.id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(SchedulerError::ScheduleNotFound(id));
    }

    let refs = reference_count(conn, id)?;
    if refs > 0 {
        debug!(schedule = %id, refs, "schedule still referenced; kept");
        return Ok(false);
    }

    conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id.id])?;
    info!(schedule = %id, "unreferenced schedule deleted");
    Ok(true)
}

/// Cleanup helper for callers that just dropped a reference: a missing row
/// counts as already cleaned up.
pub(crate) fn release(conn: &Connection, id: ScheduleId) -> Result<bool> {
    match delete_if_unreferenced(conn, id) {
        Err(SchedulerError::ScheduleNotFound(_)) => {
            debug!(schedule = %id, "schedule already deleted");
            Ok(false)
        }
        other => other,
    }
}
