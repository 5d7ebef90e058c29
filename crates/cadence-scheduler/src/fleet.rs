//! Capability interface over a worker fleet.
//!
//! Anything that can list in-flight tasks per worker, cancel a task by id and
//! restart its execution pools can back the in-flight canceller. The payload
//! travels as the raw JSON text the task was submitted with; no queue wire
//! format is assumed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an in-flight task currently sits in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetState {
    /// Submitted, not yet picked up by a worker.
    Queued,
    /// Executing.
    Active,
    /// Held by a worker until its ETA.
    Scheduled,
    /// Picked up by a worker, waiting for an execution slot.
    Reserved,
}

impl FleetState {
    pub const ALL: [FleetState; 4] = [
        FleetState::Queued,
        FleetState::Active,
        FleetState::Scheduled,
        FleetState::Reserved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FleetState::Queued => "queued",
            FleetState::Active => "active",
            FleetState::Scheduled => "scheduled",
            FleetState::Reserved => "reserved",
        }
    }
}

impl std::fmt::Display for FleetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight task as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub target: String,
    /// JSON argument payload, as submitted.
    pub payload: String,
}

/// Inspection result of a single worker. A failing worker does not hide the
/// answers of the others.
#[derive(Debug)]
pub struct WorkerReport {
    pub worker: String,
    pub tasks: Result<Vec<TaskDescriptor>, FleetError>,
}

/// Failures talking to the fleet.
#[derive(Debug, Clone, Error)]
pub enum FleetError {
    #[error("Fleet unavailable: {0}")]
    Unavailable(String),

    #[error("Fleet call timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("No handler registered for target: {0}")]
    NoHandler(String),
}

#[async_trait]
pub trait WorkerFleet: Send + Sync {
    /// In-flight tasks in `state`, grouped per worker.
    async fn list_inflight(&self, state: FleetState) -> Result<Vec<WorkerReport>, FleetError>;

    /// Hard-cancel a task; a running task is terminated.
    async fn cancel(&self, task_id: &str) -> Result<(), FleetError>;

    /// Ask every worker to restart its execution pool.
    async fn broadcast_restart(&self) -> Result<(), FleetError>;
}
