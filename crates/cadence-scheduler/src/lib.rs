//! `cadence-scheduler`: persistent schedules, named jobs and their lifecycle.
//!
//! # Overview
//!
//! Schedule definitions are deduplicated rows in one SQLite table per kind.
//! Jobs bind a target action and JSON payload to one schedule under a name
//! derived from their subject, so updates replace in place. The
//! [`orchestrator::Orchestrator`] drives every user-facing change, bumps the
//! single-row change marker in the same transaction, and afterwards cancels
//! stale in-flight executions through any [`fleet::WorkerFleet`]. The
//! [`engine::BeatEngine`] polls the marker, reloads its plan when it moves and
//! fires due jobs.
//!
//! # Schedule kinds
//!
//! | Variant    | Behaviour                                               |
//! |------------|---------------------------------------------------------|
//! | `Interval` | Repeat every N units, counted from the last run         |
//! | `Crontab`  | Cron pattern evaluated in an IANA timezone              |
//! | `Clocked`  | Single fire at an absolute instant                      |

pub mod canceller;
pub mod db;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod local;
pub mod naming;
pub mod notifier;
pub mod orchestrator;
pub mod registry;
pub mod schedule;
pub mod schedule_store;
pub mod types;

pub use canceller::{InFlightCanceller, Subject};
pub use engine::BeatEngine;
pub use error::{Result, SchedulerError};
pub use fleet::{FleetError, FleetState, TaskDescriptor, WorkerFleet, WorkerReport};
pub use local::{LocalFleet, TaskHandler};
pub use orchestrator::{
    JobDetail, JobUpdate, Orchestrator, OrchestratorSettings, ProjectSearchRequest, Registration,
    Rescheduled, SettingsUpdate, StopOutcome,
};
pub use types::{
    CrontabSpec, FiredJob, IntervalUnit, ScheduleDefinition, ScheduleId, ScheduleKind,
    ScheduledJob,
};
