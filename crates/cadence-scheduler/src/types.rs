use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Target action executed by workers for the recurring chat notification.
pub const SEND_MESSAGE_TASK: &str = "send_message";
/// Target action executed by workers for project ad-hoc searches.
pub const SCHEDULED_SEARCH_TASK: &str = "scheduled_search";

/// The three persisted schedule tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval,
    Crontab,
    Clocked,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Interval => "interval",
            ScheduleKind::Crontab => "crontab",
            ScheduleKind::Clocked => "clocked",
        }
    }
}

/// Primary key of a stored schedule row. Ids are only unique per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId {
    pub kind: ScheduleKind,
    pub id: i64,
}

impl ScheduleId {
    pub fn new(kind: ScheduleKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.id)
    }
}

/// Period unit of an interval schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
    Microseconds,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Days => "days",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Seconds => "seconds",
            IntervalUnit::Microseconds => "microseconds",
        }
    }

    /// Length of `every` units.
    pub fn span(&self, every: u32) -> chrono::Duration {
        let every = i64::from(every);
        match self {
            IntervalUnit::Days => chrono::Duration::days(every),
            IntervalUnit::Hours => chrono::Duration::hours(every),
            IntervalUnit::Minutes => chrono::Duration::minutes(every),
            IntervalUnit::Seconds => chrono::Duration::seconds(every),
            IntervalUnit::Microseconds => chrono::Duration::microseconds(every),
        }
    }
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "days" => Ok(IntervalUnit::Days),
            "hours" => Ok(IntervalUnit::Hours),
            "minutes" => Ok(IntervalUnit::Minutes),
            "seconds" => Ok(IntervalUnit::Seconds),
            "microseconds" => Ok(IntervalUnit::Microseconds),
            other => Err(format!("unknown interval unit: {other}")),
        }
    }
}

/// Crontab pattern fields, standard cron grammar. `day_of_week` counts from
/// Sunday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrontabSpec {
    pub minute: String,
    pub hour: String,
    pub day_of_week: String,
    pub day_of_month: String,
    pub month_of_year: String,
    /// IANA zone name, e.g. `"UTC"` or `"Europe/Kyiv"`.
    pub timezone: String,
}

impl Default for CrontabSpec {
    fn default() -> Self {
        Self {
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_week: "*".to_string(),
            day_of_month: "*".to_string(),
            month_of_year: "*".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// When a job fires. Two definitions with the same variant and field values
/// always resolve to the same stored row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleDefinition {
    /// Repeat every `every` units.
    Interval { every: u32, unit: IntervalUnit },
    /// Fire on matching wall-clock times in the schedule's timezone.
    Crontab(CrontabSpec),
    /// Fire once at an absolute instant.
    Clocked { fire_at: DateTime<Utc> },
}

impl ScheduleDefinition {
    pub fn every_seconds(every: u32) -> Self {
        ScheduleDefinition::Interval {
            every,
            unit: IntervalUnit::Seconds,
        }
    }

    /// Parse a clocked fire time. Accepts RFC3339 (`2026-10-16T09:00:00+02:00`)
    /// or a naive `YYYY-MM-DD HH:MM[:SS]` / `YYYY-MM-DDTHH:MM[:SS]`, read as UTC.
    pub fn clocked_from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(ScheduleDefinition::Clocked {
                fire_at: dt.with_timezone(&Utc),
            });
        }
        const NAIVE_FORMATS: [&str; 4] = [
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%d %H:%M",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%dT%H:%M",
        ];
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(|naive| ScheduleDefinition::Clocked {
                fire_at: naive.and_utc(),
            })
            .ok_or_else(|| SchedulerError::Validation(format!("unparsable clocked time: {s:?}")))
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            ScheduleDefinition::Interval { .. } => ScheduleKind::Interval,
            ScheduleDefinition::Crontab(_) => ScheduleKind::Crontab,
            ScheduleDefinition::Clocked { .. } => ScheduleKind::Clocked,
        }
    }

    /// Clocked schedules fire exactly once.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, ScheduleDefinition::Clocked { .. })
    }
}

/// A persisted job record: one named binding of a target action and its
/// payload to a stored schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: i64,
    /// Unique, derived from the subject (see `naming`).
    pub name: String,
    /// Target action identifier, e.g. [`SEND_MESSAGE_TASK`].
    pub target: String,
    /// JSON object forwarded to the target action.
    pub payload: String,
    pub schedule: ScheduleId,
    pub enabled: bool,
    pub one_off: bool,
    /// RFC3339; interval schedules count from here until the first run.
    pub start_time: Option<String>,
    pub last_run_at: Option<String>,
    pub total_run_count: u32,
    /// RFC3339 timestamp of the last definition change.
    pub date_changed: String,
}

impl ScheduledJob {
    pub fn payload_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Payload of [`SEND_MESSAGE_TASK`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub chat_id: String,
    pub message_text: String,
}

/// Payload of [`SCHEDULED_SEARCH_TASK`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPayload {
    pub project_id: i64,
    pub user_id: i64,
    pub query: String,
    pub country: String,
    pub language: String,
    pub domain: String,
}

/// A job the beat engine decided is due. Sent over mpsc to whoever routes
/// work into the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredJob {
    pub job_id: i64,
    pub name: String,
    pub target: String,
    pub payload: String,
    pub fired_at: DateTime<Utc>,
}
