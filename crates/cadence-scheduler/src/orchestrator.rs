//! Scheduling façade over the store, registry, notifier and canceller.
//!
//! Every operation commits its database work in one `BEGIN IMMEDIATE`
//! transaction (schedule upsert, job upsert, reference-counted cleanup and
//! the marker bump together), releases the connection, and only then talks
//! to the worker fleet. Fleet trouble is logged by the canceller and never
//! turns a committed change into a failed request.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cadence_users::{subscriber, Subscriber, SubscriberUpdate};

use crate::canceller::{InFlightCanceller, Subject};
use crate::db::lock;
use crate::error::{Result, SchedulerError};
use crate::fleet::FleetState;
use crate::naming::{project_job_name, subscriber_job_name};
use crate::registry::{self, JobKey, NewJob};
use crate::schedule::validate;
use crate::types::{
    MessagePayload, ScheduleDefinition, ScheduledJob, SearchPayload, SCHEDULED_SEARCH_TASK,
    SEND_MESSAGE_TASK,
};
use crate::{notifier, schedule_store};

const REGISTER_CANCEL_STATES: [FleetState; 2] = [FleetState::Scheduled, FleetState::Reserved];
const STOP_CANCEL_STATES: [FleetState; 3] = [
    FleetState::Scheduled,
    FleetState::Active,
    FleetState::Reserved,
];

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Interval of a freshly registered subscriber.
    pub default_interval_secs: u32,
    pub default_message_text: String,
    /// Broadcast a worker-pool restart after every reschedule.
    pub restart_pool_on_update: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_interval_secs: 5,
            default_message_text: "Hello from DB".to_string(),
            restart_pool_on_update: true,
        }
    }
}

/// Settings change for a subscriber. With no `schedule`, the subscriber is
/// put on an interval of its (possibly updated) `interval_secs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub message_text: Option<String>,
    pub interval_secs: Option<u32>,
    pub schedule: Option<ScheduleDefinition>,
}

/// Edit of an existing job addressed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub schedule: Option<ScheduleDefinition>,
    /// Merged into the payload's `message_text`.
    pub message_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSearchRequest {
    pub project_id: i64,
    pub user_id: i64,
    pub query: String,
    pub schedule: ScheduleDefinition,
    pub country: Option<String>,
    pub language: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub subscriber: Subscriber,
    pub job: ScheduledJob,
    /// False when an existing subscriber was reactivated.
    pub created: bool,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rescheduled {
    pub job: ScheduledJob,
    /// Stale executions cancelled after the change committed.
    pub cancelled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub subscriber_found: bool,
    pub job_disabled: bool,
    pub cancelled: usize,
}

/// A job together with the definition it points at.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: ScheduledJob,
    pub definition: Option<ScheduleDefinition>,
}

pub struct Orchestrator {
    db: Arc<Mutex<Connection>>,
    canceller: InFlightCanceller,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        canceller: InFlightCanceller,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            db,
            canceller,
            settings,
        }
    }

    /// Run `f` in an immediate transaction. Dropping the transaction on the
    /// error path rolls everything back.
    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = lock(&self.db);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = lock(&self.db);
        f(&conn)
    }

    /// Create (or reactivate) the subscriber and put it on its interval.
    pub async fn register(&self, chat_id: &str, message_text: Option<&str>) -> Result<Registration> {
        let (subscriber, job, created) = self.write(|tx| {
            let text = message_text.unwrap_or(&self.settings.default_message_text);
            let (sub, created) = subscriber::create_subscriber(
                tx,
                chat_id,
                text,
                self.settings.default_interval_secs,
            )?;
            let sub = if created {
                sub
            } else {
                subscriber::set_active(tx, chat_id, true)?;
                refetch(tx, chat_id)?
            };
            let def = ScheduleDefinition::every_seconds(sub.interval_secs);
            let job = upsert_subscriber_job(tx, &sub, &def)?;
            notifier::bump(tx)?;
            Ok((sub, job, created))
        })?;

        info!(chat_id, job_name = %job.name, created, "subscriber registered");
        let cancelled = self
            .canceller
            .cancel_subject(&Subject::chat(chat_id), &REGISTER_CANCEL_STATES)
            .await;
        Ok(Registration {
            subscriber,
            job,
            created,
            cancelled,
        })
    }

    /// Apply settings and reschedule the subscriber's job in place.
    pub async fn update_settings(&self, chat_id: &str, update: SettingsUpdate) -> Result<Rescheduled> {
        if let Some(def) = &update.schedule {
            validate(def)?;
        }
        if update.interval_secs == Some(0) {
            return Err(SchedulerError::Validation("interval_secs must be >= 1".into()));
        }

        let job = self.write(|tx| {
            if subscriber::find_by_chat_id(tx, chat_id)?.is_none() {
                return Err(SchedulerError::SubjectNotFound {
                    chat_id: chat_id.to_string(),
                });
            }
            subscriber::update_subscriber(
                tx,
                chat_id,
                &SubscriberUpdate {
                    message_text: update.message_text.clone(),
                    interval_secs: update.interval_secs,
                },
            )?;
            subscriber::set_active(tx, chat_id, true)?;
            let sub = refetch(tx, chat_id)?;

            let def = update
                .schedule
                .clone()
                .unwrap_or_else(|| ScheduleDefinition::every_seconds(sub.interval_secs));
            let job = upsert_subscriber_job(tx, &sub, &def)?;
            notifier::bump(tx)?;
            Ok(job)
        })?;

        info!(chat_id, job_name = %job.name, schedule = %job.schedule, "subscriber rescheduled");
        let cancelled = self.invalidate(&Subject::chat(chat_id)).await;
        Ok(Rescheduled { job, cancelled })
    }

    /// Deactivate the subscriber and disable its job, keeping its history.
    /// A missing subscriber or job is logged and reported, not an error.
    pub async fn stop(&self, chat_id: &str) -> Result<StopOutcome> {
        let name = subscriber_job_name(chat_id);
        let (subscriber_found, job_disabled) = self.write(|tx| {
            let found = subscriber::set_active(tx, chat_id, false)?;
            let disabled = registry::disable(tx, &name)?;
            if found || disabled {
                notifier::bump(tx)?;
            }
            Ok((found, disabled))
        })?;

        if !subscriber_found {
            warn!(chat_id, "stop: subscriber not found");
        }
        if !job_disabled {
            warn!(chat_id, job_name = %name, "stop: job not found");
        }
        let cancelled = self
            .canceller
            .cancel_subject(&Subject::chat(chat_id), &STOP_CANCEL_STATES)
            .await;
        Ok(StopOutcome {
            subscriber_found,
            job_disabled,
            cancelled,
        })
    }

    /// Delete the subscriber's job. Returns false when there was none.
    pub async fn delete_subscriber_job(&self, chat_id: &str) -> Result<bool> {
        let name = subscriber_job_name(chat_id);
        let deleted = self.delete_where(JobKey::Name(&name)).await?;
        Ok(deleted.is_some())
    }

    /// Delete a job by id. `None` when no job had that id.
    pub async fn delete_job(&self, id: i64) -> Result<Option<ScheduledJob>> {
        self.delete_where(JobKey::Id(id)).await
    }

    async fn delete_where(&self, key: JobKey<'_>) -> Result<Option<ScheduledJob>> {
        let deleted = self.write(|tx| {
            let deleted = registry::delete(tx, key)?;
            if deleted.is_some() {
                notifier::bump(tx)?;
            }
            Ok(deleted)
        })?;

        match &deleted {
            Some(job) => {
                if let Some(subject) = Subject::from_job(job) {
                    self.canceller
                        .cancel_subject(&subject, &STOP_CANCEL_STATES)
                        .await;
                }
            }
            None => warn!(job = %key, "delete: job not found"),
        }
        Ok(deleted)
    }

    /// Reschedule and/or retext an existing job, re-enabling it.
    pub async fn update_job(&self, id: i64, update: JobUpdate) -> Result<Rescheduled> {
        if let Some(def) = &update.schedule {
            validate(def)?;
        }

        let job = self.write(|tx| {
            let existing = registry::get(tx, id)?.ok_or_else(|| SchedulerError::JobNotFound {
                key: id.to_string(),
            })?;
            let (schedule, one_off) = match &update.schedule {
                Some(def) => (schedule_store::get_or_create(tx, def)?, def.is_one_shot()),
                None => (existing.schedule, existing.one_off),
            };

            let mut payload = existing.payload_json()?;
            if let (Some(text), Some(obj)) = (&update.message_text, payload.as_object_mut()) {
                obj.insert("message_text".into(), serde_json::Value::String(text.clone()));
            }
            let payload = serde_json::to_string(&payload)?;

            let upsert = registry::upsert_job(
                tx,
                &NewJob {
                    name: &existing.name,
                    target: &existing.target,
                    payload: &payload,
                    schedule,
                    one_off,
                },
            )?;
            notifier::bump(tx)?;
            Ok(upsert.job)
        })?;

        info!(job_id = id, job_name = %job.name, schedule = %job.schedule, "job updated");
        let cancelled = match Subject::from_job(&job) {
            Some(subject) => self.invalidate(&subject).await,
            None => 0,
        };
        Ok(Rescheduled { job, cancelled })
    }

    /// Create or replace the search job of one project member and query.
    /// Clocked schedules make it a one-off.
    pub async fn schedule_project_search(&self, req: ProjectSearchRequest) -> Result<Rescheduled> {
        validate(&req.schedule)?;
        if req.query.trim().is_empty() {
            return Err(SchedulerError::Validation("query must not be empty".into()));
        }

        let name = project_job_name(req.project_id, req.user_id, &req.query);
        let payload = serde_json::to_string(&SearchPayload {
            project_id: req.project_id,
            user_id: req.user_id,
            query: req.query.clone(),
            country: req.country.clone().unwrap_or_else(|| "US".into()),
            language: req.language.clone().unwrap_or_else(|| "en".into()),
            domain: req.domain.clone().unwrap_or_else(|| "google.com".into()),
        })?;

        let job = self.write(|tx| {
            let schedule = schedule_store::get_or_create(tx, &req.schedule)?;
            let upsert = registry::upsert_job(
                tx,
                &NewJob {
                    name: &name,
                    target: SCHEDULED_SEARCH_TASK,
                    payload: &payload,
                    schedule,
                    one_off: req.schedule.is_one_shot(),
                },
            )?;
            notifier::bump(tx)?;
            Ok(upsert.job)
        })?;

        info!(
            project_id = req.project_id,
            user_id = req.user_id,
            job_name = %job.name,
            schedule = %job.schedule,
            "project search scheduled"
        );
        let subject = Subject::ProjectQuery {
            project_id: req.project_id,
            user_id: req.user_id,
            query: req.query,
        };
        let cancelled = self
            .canceller
            .cancel_subject(&subject, &FleetState::ALL)
            .await;
        Ok(Rescheduled { job, cancelled })
    }

    pub async fn delete_project_search(&self, project_id: i64, user_id: i64, query: &str) -> Result<bool> {
        let name = project_job_name(project_id, user_id, query);
        let deleted = self.delete_where(JobKey::Name(&name)).await?;
        Ok(deleted.is_some())
    }

    pub fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.read(registry::list_all)
    }

    pub fn get_job(&self, id: i64) -> Result<JobDetail> {
        self.read(|conn| {
            let job = registry::get(conn, id)?.ok_or_else(|| SchedulerError::JobNotFound {
                key: id.to_string(),
            })?;
            let definition = schedule_store::get(conn, job.schedule)?;
            Ok(JobDetail { job, definition })
        })
    }

    pub fn list_subscribers(&self) -> Result<Vec<Subscriber>> {
        self.read(|conn| Ok(subscriber::list_subscribers(conn)?))
    }

    /// Post-commit cleanup after a reschedule.
    async fn invalidate(&self, subject: &Subject) -> usize {
        let cancelled = self
            .canceller
            .cancel_subject(subject, &FleetState::ALL)
            .await;
        if self.settings.restart_pool_on_update {
            self.canceller.restart_pool().await;
        }
        cancelled
    }
}

fn refetch(conn: &Connection, chat_id: &str) -> Result<Subscriber> {
    subscriber::find_by_chat_id(conn, chat_id)?.ok_or_else(|| SchedulerError::SubjectNotFound {
        chat_id: chat_id.to_string(),
    })
}

fn upsert_subscriber_job(
    conn: &Connection,
    sub: &Subscriber,
    def: &ScheduleDefinition,
) -> Result<ScheduledJob> {
    let schedule = schedule_store::get_or_create(conn, def)?;
    let payload = serde_json::to_string(&MessagePayload {
        chat_id: sub.chat_id.clone(),
        message_text: sub.message_text.clone(),
    })?;
    let name = subscriber_job_name(&sub.chat_id);
    let upsert = registry::upsert_job(
        conn,
        &NewJob {
            name: &name,
            target: SEND_MESSAGE_TASK,
            payload: &payload,
            schedule,
            one_off: def.is_one_shot(),
        },
    )?;
    Ok(upsert.job)
}
