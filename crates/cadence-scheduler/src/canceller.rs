//! Best-effort cancellation of in-flight executions tied to a subject.
//!
//! After a schedule change commits, any execution queued under the old
//! schedule must not fire. The canceller walks the requested fleet states,
//! matches task payloads against the subject and hard-cancels the matches.
//! Every fleet call is attempted independently; failures are logged and
//! never returned. A missed cancellation is reconciled by the next beat.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::fleet::{FleetError, FleetState, WorkerFleet};
use crate::types::{ScheduledJob, SCHEDULED_SEARCH_TASK, SEND_MESSAGE_TASK};

/// The logical owner of a job, as it appears in task payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// Recurring notification of one chat.
    Chat { chat_id: String },
    /// One ad-hoc search of a project member.
    ProjectQuery {
        project_id: i64,
        user_id: i64,
        query: String,
    },
}

impl Subject {
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Subject::Chat {
            chat_id: chat_id.into(),
        }
    }

    /// True when `payload` belongs to this subject.
    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Subject::Chat { chat_id } => field_equals(payload, "chat_id", chat_id),
            Subject::ProjectQuery {
                project_id,
                user_id,
                query,
            } => {
                payload.get("project_id").and_then(Value::as_i64) == Some(*project_id)
                    && payload.get("user_id").and_then(Value::as_i64) == Some(*user_id)
                    && payload.get("query").and_then(Value::as_str) == Some(query.as_str())
            }
        }
    }

    /// Recover the subject a stored job was created for.
    pub fn from_job(job: &ScheduledJob) -> Option<Self> {
        let payload = job.payload_json().ok()?;
        match job.target.as_str() {
            SEND_MESSAGE_TASK => {
                let chat_id = match payload.get("chat_id")? {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some(Subject::Chat { chat_id })
            }
            SCHEDULED_SEARCH_TASK => Some(Subject::ProjectQuery {
                project_id: payload.get("project_id")?.as_i64()?,
                user_id: payload.get("user_id")?.as_i64()?,
                query: payload.get("query")?.as_str()?.to_string(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Chat { chat_id } => write!(f, "chat:{chat_id}"),
            Subject::ProjectQuery {
                project_id,
                user_id,
                ..
            } => write!(f, "project:{project_id}:user:{user_id}"),
        }
    }
}

/// Chat ids arrive as strings from the bot and as numbers from some callers.
fn field_equals(payload: &Value, field: &str, expected: &str) -> bool {
    match payload.get(field) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Number(n)) => n.to_string() == expected,
        _ => false,
    }
}

pub struct InFlightCanceller {
    fleet: Arc<dyn WorkerFleet>,
    timeout: Duration,
}

impl InFlightCanceller {
    /// `timeout` bounds every individual fleet call.
    pub fn new(fleet: Arc<dyn WorkerFleet>, timeout: Duration) -> Self {
        Self { fleet, timeout }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, FleetError>
    where
        F: Future<Output = Result<T, FleetError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FleetError::Timeout {
                ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Cancel every in-flight task in `states` whose payload satisfies
    /// `predicate`. Returns the number of successful cancellations.
    ///
    /// Never fails: an unreachable state, worker, unparsable payload or
    /// rejected cancel is logged and skipped.
    pub async fn cancel_matching<P>(&self, predicate: P, states: &[FleetState]) -> usize
    where
        P: Fn(&Value) -> bool + Send + Sync,
    {
        let mut cancelled: HashSet<String> = HashSet::new();

        for &state in states {
            let reports = match self.bounded(self.fleet.list_inflight(state)).await {
                Ok(reports) => reports,
                Err(e) => {
                    error!(%state, "failed to inspect fleet: {e}");
                    continue;
                }
            };

            for report in reports {
                let tasks = match report.tasks {
                    Ok(tasks) => tasks,
                    Err(e) => {
                        error!(%state, worker = %report.worker, "failed to inspect worker: {e}");
                        continue;
                    }
                };

                for task in tasks {
                    if cancelled.contains(&task.id) {
                        continue;
                    }
                    let payload: Value = match serde_json::from_str(&task.payload) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(task_id = %task.id, worker = %report.worker, "unparsable task payload: {e}");
                            continue;
                        }
                    };
                    if !predicate(&payload) {
                        continue;
                    }
                    match self.bounded(self.fleet.cancel(&task.id)).await {
                        Ok(()) => {
                            info!(task_id = %task.id, worker = %report.worker, %state, "in-flight task cancelled");
                            cancelled.insert(task.id);
                        }
                        Err(e) => {
                            error!(task_id = %task.id, worker = %report.worker, %state, "failed to cancel task: {e}");
                        }
                    }
                }
            }
        }

        debug!(count = cancelled.len(), "cancellation pass finished");
        cancelled.len()
    }

    /// [`cancel_matching`](Self::cancel_matching) for a subject.
    pub async fn cancel_subject(&self, subject: &Subject, states: &[FleetState]) -> usize {
        let count = self
            .cancel_matching(|payload| subject.matches(payload), states)
            .await;
        if count > 0 {
            info!(%subject, count, "stale executions cancelled");
        }
        count
    }

    /// Broadcast a pool restart. Best effort; returns whether it succeeded.
    pub async fn restart_pool(&self) -> bool {
        match self.bounded(self.fleet.broadcast_restart()).await {
            Ok(()) => {
                info!("worker pool restart broadcast");
                true
            }
            Err(e) => {
                error!("worker pool restart failed: {e}");
                false
            }
        }
    }
}
