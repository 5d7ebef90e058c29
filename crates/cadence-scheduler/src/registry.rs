//! Named jobs bound to stored schedules.
//!
//! A job's name is derived from its subject, and UNIQUE(name) turns every
//! write into an in-place replacement. Whenever a write drops a job's
//! reference to a schedule, the schedule is released through
//! `schedule_store::release` using the id captured before the write.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::schedule_store;
use crate::types::{ScheduleId, ScheduleKind, ScheduledJob};

const JOB_SELECT_SQL: &str = "SELECT id, name, task, kwargs, interval_id, crontab_id, clocked_id,
            enabled, one_off, start_time, last_run_at, total_run_count, date_changed
     FROM scheduled_jobs";

/// Map a SELECT row (column order from JOB_SELECT_SQL) to a ScheduledJob.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledJob> {
    let interval_id: Option<i64> = row.get(4)?;
    let crontab_id: Option<i64> = row.get(5)?;
    let clocked_id: Option<i64> = row.get(6)?;
    // The table CHECK guarantees exactly one of the three is set.
    let schedule = match (interval_id, crontab_id, clocked_id) {
        (Some(id), _, _) => ScheduleId::new(ScheduleKind::Interval, id),
        (_, Some(id), _) => ScheduleId::new(ScheduleKind::Crontab, id),
        (_, _, Some(id)) => ScheduleId::new(ScheduleKind::Clocked, id),
        (None, None, None) => {
            return Err(rusqlite::Error::InvalidColumnType(
                4,
                "interval_id".to_string(),
                rusqlite::types::Type::Null,
            ))
        }
    };
    Ok(ScheduledJob {
        id: row.get(0)?,
        name: row.get(1)?,
        target: row.get(2)?,
        payload: row.get(3)?,
        schedule,
        enabled: row.get::<_, i32>(7)? != 0,
        one_off: row.get::<_, i32>(8)? != 0,
        start_time: row.get(9)?,
        last_run_at: row.get(10)?,
        total_run_count: row.get(11)?,
        date_changed: row.get(12)?,
    })
}

fn schedule_columns(id: ScheduleId) -> (Option<i64>, Option<i64>, Option<i64>) {
    match id.kind {
        ScheduleKind::Interval => (Some(id.id), None, None),
        ScheduleKind::Crontab => (None, Some(id.id), None),
        ScheduleKind::Clocked => (None, None, Some(id.id)),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Desired state of a job, keyed by `name`.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub name: &'a str,
    pub target: &'a str,
    /// JSON object text.
    pub payload: &'a str,
    pub schedule: ScheduleId,
    pub one_off: bool,
}

/// Outcome of [`upsert_job`].
#[derive(Debug, Clone)]
pub struct JobUpsert {
    pub job: ScheduledJob,
    pub created: bool,
    /// Schedule the job used to point at, when it changed.
    pub previous_schedule: Option<ScheduleId>,
    /// True when `previous_schedule` lost its last reference and was deleted.
    pub previous_schedule_deleted: bool,
}

/// Create or replace the job called `new.name`.
///
/// An existing row keeps its id and run history; its target, payload,
/// schedule and one_off flag are replaced, it is re-enabled and its
/// `start_time` moves to now. The write is a single `INSERT .. ON CONFLICT
/// (name) DO UPDATE`, so racing callers never create a second row. Call it
/// inside a transaction so the schedule release sees a consistent count.
pub fn upsert_job(conn: &Connection, new: &NewJob<'_>) -> Result<JobUpsert> {
    let before = find_by_name(conn, new.name)?;
    let now = timestamp(Utc::now());
    let (interval_id, crontab_id, clocked_id) = schedule_columns(new.schedule);

    conn.execute(
        "INSERT INTO scheduled_jobs
            (name, task, kwargs, interval_id, crontab_id, clocked_id,
             enabled, one_off, start_time, date_changed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8)
         ON CONFLICT (name) DO UPDATE SET
            task         = excluded.task,
            kwargs       = excluded.kwargs,
            interval_id  = excluded.interval_id,
            crontab_id   = excluded.crontab_id,
            clocked_id   = excluded.clocked_id,
            enabled      = 1,
            one_off      = excluded.one_off,
            start_time   = excluded.start_time,
            date_changed = excluded.date_changed",
        params![
            new.name,
            new.target,
            new.payload,
            interval_id,
            crontab_id,
            clocked_id,
            new.one_off as i32,
            now
        ],
    )?;

    let previous_schedule = before
        .as_ref()
        .map(|job| job.schedule)
        .filter(|old| *old != new.schedule);
    let previous_schedule_deleted = match previous_schedule {
        Some(old) => schedule_store::release(conn, old)?,
        None => false,
    };

    let job = find_by_name(conn, new.name)?.ok_or_else(|| SchedulerError::JobNotFound {
        key: new.name.to_string(),
    })?;
    info!(
        job_name = %job.name,
        job_id = job.id,
        schedule = %job.schedule,
        created = before.is_none(),
        "job upserted"
    );
    Ok(JobUpsert {
        job,
        created: before.is_none(),
        previous_schedule,
        previous_schedule_deleted,
    })
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<ScheduledJob>> {
    let sql = format!("{JOB_SELECT_SQL} WHERE name = ?1");
    Ok(conn.query_row(&sql, params![name], row_to_job).optional()?)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<ScheduledJob>> {
    let sql = format!("{JOB_SELECT_SQL} WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_job).optional()?)
}

pub fn list_all(conn: &Connection) -> Result<Vec<ScheduledJob>> {
    let sql = format!("{JOB_SELECT_SQL} ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map([], row_to_job)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(jobs)
}

/// Enabled jobs only, the set the beat engine plans from.
pub fn list_enabled(conn: &Connection) -> Result<Vec<ScheduledJob>> {
    let sql = format!("{JOB_SELECT_SQL} WHERE enabled = 1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map([], row_to_job)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(jobs)
}

/// Turn the job off without deleting it. Returns false when no job has
/// this name.
pub fn disable(conn: &Connection, name: &str) -> Result<bool> {
    let n = conn.execute(
        "UPDATE scheduled_jobs SET enabled = 0, date_changed = ?2 WHERE name = ?1",
        params![name, timestamp(Utc::now())],
    )?;
    if n > 0 {
        info!(job_name = %name, "job disabled");
    }
    Ok(n > 0)
}

/// How to address a job for deletion.
#[derive(Debug, Clone, Copy)]
pub enum JobKey<'a> {
    Id(i64),
    Name(&'a str),
}

impl std::fmt::Display for JobKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKey::Id(id) => write!(f, "#{id}"),
            JobKey::Name(name) => f.write_str(name),
        }
    }
}

/// Delete a job and release the schedule it pointed at.
///
/// Returns the deleted row, or `None` when nothing matched.
pub fn delete(conn: &Connection, key: JobKey<'_>) -> Result<Option<ScheduledJob>> {
    let job = match key {
        JobKey::Id(id) => get(conn, id)?,
        JobKey::Name(name) => find_by_name(conn, name)?,
    };
    let Some(job) = job else {
        return Ok(None);
    };

    // job.schedule was read before the row goes away.
    conn.execute("DELETE FROM scheduled_jobs WHERE id = ?1", params![job.id])?;
    info!(job_name = %job.name, job_id = job.id, "job deleted");
    schedule_store::release(conn, job.schedule)?;
    Ok(Some(job))
}

/// Record a fire: stamp `last_run_at`, bump the counter and switch one-off
/// jobs off. Written by the beat engine only.
pub fn record_run(conn: &Connection, id: i64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE scheduled_jobs SET
            last_run_at     = ?2,
            total_run_count = total_run_count + 1,
            enabled         = CASE WHEN one_off = 1 THEN 0 ELSE enabled END
         WHERE id = ?1",
        params![id, timestamp(at)],
    )?;
    Ok(())
}
