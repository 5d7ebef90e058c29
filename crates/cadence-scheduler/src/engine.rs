use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    db::lock,
    error::Result,
    notifier, registry,
    schedule::compute_next_run,
    schedule_store,
    types::{FiredJob, ScheduleDefinition, ScheduledJob},
};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

fn parse_ts(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

struct Planned {
    job: ScheduledJob,
    definition: ScheduleDefinition,
    start: DateTime<Utc>,
    next_run: DateTime<Utc>,
}

/// Beat loop: keeps an in-memory fire plan of enabled jobs, reloads it when
/// the change marker moves, and fires due jobs onto an mpsc channel.
///
/// The engine only writes `last_run_at`, `total_run_count` and the one-off
/// `enabled` flag; definitions are owned by the orchestrator.
pub struct BeatEngine {
    conn: Arc<Mutex<Connection>>,
    /// If set, fired jobs are sent here for routing into the fleet.
    fired_tx: Option<mpsc::Sender<FiredJob>>,
    poll_interval: Duration,
    seen_marker: Option<DateTime<Utc>>,
    loaded: bool,
    plan: Vec<Planned>,
}

impl BeatEngine {
    /// The sender is non-blocking (`try_send`) so the tick loop never stalls.
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        fired_tx: Option<mpsc::Sender<FiredJob>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            conn,
            fired_tx,
            // tokio's interval rejects a zero period.
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            seen_marker: None,
            loaded: false,
            plan: Vec::new(),
        }
    }

    /// Main event loop. Polls until `shutdown` broadcasts `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "beat engine started");

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        error!("beat tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("beat engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Number of jobs currently planned.
    pub fn planned(&self) -> usize {
        self.plan.len()
    }

    /// One poll at `now`: reload if the marker moved, then fire every due
    /// job. Returns how many jobs fired.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let conn = Arc::clone(&self.conn);
        let conn = lock(&conn);

        let marker = notifier::last_update(&conn)?;
        if !self.loaded || marker != self.seen_marker {
            self.reload(&conn, now)?;
            self.seen_marker = marker;
            self.loaded = true;
        }

        let mut fired = 0;
        let mut retired = Vec::new();
        for (idx, planned) in self.plan.iter_mut().enumerate() {
            if planned.next_run > now {
                continue;
            }

            registry::record_run(&conn, planned.job.id, now)?;
            fired += 1;
            info!(
                job_name = %planned.job.name,
                job_id = planned.job.id,
                target = %planned.job.target,
                "job fired"
            );

            if let Some(ref tx) = self.fired_tx {
                let job = FiredJob {
                    job_id: planned.job.id,
                    name: planned.job.name.clone(),
                    target: planned.job.target.clone(),
                    payload: planned.job.payload.clone(),
                    fired_at: now,
                };
                if tx.try_send(job).is_err() {
                    warn!(job_name = %planned.job.name, "fired-job channel full or closed; execution dropped");
                }
            }

            let next = if planned.job.one_off {
                None
            } else {
                compute_next_run(&planned.definition, planned.start, Some(now))
            };
            match next {
                Some(next) => planned.next_run = next,
                None => retired.push(idx),
            }
        }

        for idx in retired.into_iter().rev() {
            let done = self.plan.remove(idx);
            debug!(job_name = %done.job.name, "job has no further runs");
        }
        Ok(fired)
    }

    fn reload(&mut self, conn: &Connection, now: DateTime<Utc>) -> Result<()> {
        let jobs = registry::list_enabled(conn)?;
        let mut plan = Vec::with_capacity(jobs.len());

        for job in jobs {
            let Some(definition) = schedule_store::get(conn, job.schedule)? else {
                warn!(job_name = %job.name, schedule = %job.schedule, "job points at a missing schedule; skipped");
                continue;
            };
            let start = parse_ts(job.start_time.as_deref()).unwrap_or(now);
            // Runs from before the last (re)definition do not count.
            let last_run = parse_ts(job.last_run_at.as_deref()).filter(|l| *l >= start);
            if job.one_off && last_run.is_some() {
                continue;
            }
            if let Some(next_run) = compute_next_run(&definition, start, last_run) {
                plan.push(Planned {
                    job,
                    definition,
                    start,
                    next_run,
                });
            }
        }

        info!(jobs = plan.len(), "fire plan reloaded");
        self.plan = plan;
        Ok(())
    }
}
