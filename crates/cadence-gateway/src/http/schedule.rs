//! Request-side schedule fields shared by the bot, scheduler and project
//! routes, and their shape check per schedule kind.

use cadence_scheduler::{CrontabSpec, ScheduleDefinition};
use serde::Deserialize;

use super::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Interval,
    Crontab,
    Clocked,
}

/// Crontab pattern as sent by clients. `minute` and `hour` are required,
/// everything else defaults to `*` in UTC.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrontabFields {
    pub minute: Option<String>,
    pub hour: Option<String>,
    pub day_of_week: Option<String>,
    pub day_of_month: Option<String>,
    pub month_of_year: Option<String>,
    pub timezone: Option<String>,
}

impl CrontabFields {
    fn to_spec(&self) -> Result<CrontabSpec, ApiError> {
        let required = |field: &Option<String>, name: &str| {
            field
                .clone()
                .ok_or_else(|| ApiError::bad_request(format!("schedule_value.{name} is required")))
        };
        let defaults = CrontabSpec::default();
        Ok(CrontabSpec {
            minute: required(&self.minute, "minute")?,
            hour: required(&self.hour, "hour")?,
            day_of_week: self.day_of_week.clone().unwrap_or(defaults.day_of_week),
            day_of_month: self.day_of_month.clone().unwrap_or(defaults.day_of_month),
            month_of_year: self.month_of_year.clone().unwrap_or(defaults.month_of_year),
            timezone: self.timezone.clone().unwrap_or(defaults.timezone),
        })
    }
}

/// Flattened into request bodies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleInput {
    pub schedule_type: Option<ScheduleType>,
    pub interval_seconds: Option<u32>,
    pub schedule_value: Option<CrontabFields>,
    /// Clocked fire time, RFC3339 or `YYYY-MM-DD HH:MM[:SS]` in UTC.
    pub date_time: Option<String>,
}

impl ScheduleInput {
    /// The definition the body asks for; `None` when it names no schedule.
    /// Without a `schedule_type`, a bare `interval_seconds` means interval.
    pub fn definition(&self) -> Result<Option<ScheduleDefinition>, ApiError> {
        let kind = match (self.schedule_type, self.interval_seconds) {
            (None, None) => return Ok(None),
            (None, Some(_)) => ScheduleType::Interval,
            (Some(kind), _) => kind,
        };
        let def = match kind {
            ScheduleType::Interval => {
                let every = self.interval_seconds.ok_or_else(|| {
                    ApiError::bad_request("interval_seconds is required for an interval schedule")
                })?;
                ScheduleDefinition::every_seconds(every)
            }
            ScheduleType::Crontab => {
                let fields = self.schedule_value.as_ref().ok_or_else(|| {
                    ApiError::bad_request("schedule_value is required for a crontab schedule")
                })?;
                ScheduleDefinition::Crontab(fields.to_spec()?)
            }
            ScheduleType::Clocked => {
                let raw = self.date_time.as_deref().ok_or_else(|| {
                    ApiError::bad_request("date_time is required for a clocked schedule")
                })?;
                ScheduleDefinition::clocked_from_str(raw)?
            }
        };
        Ok(Some(def))
    }

    /// Like [`definition`](Self::definition) but a schedule is mandatory.
    pub fn required_definition(&self) -> Result<ScheduleDefinition, ApiError> {
        self.definition()?
            .ok_or_else(|| ApiError::bad_request("schedule_type is required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> ScheduleInput {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn bare_interval_seconds_is_an_interval() {
        let def = parse(json!({"interval_seconds": 30})).definition().unwrap();
        assert_eq!(def, Some(ScheduleDefinition::every_seconds(30)));
        assert_eq!(parse(json!({})).definition().unwrap(), None);
    }

    #[test]
    fn crontab_requires_minute_and_hour() {
        let ok = parse(json!({
            "schedule_type": "crontab",
            "schedule_value": {"minute": "0", "hour": "9"}
        }))
        .required_definition()
        .unwrap();
        match ok {
            ScheduleDefinition::Crontab(spec) => {
                assert_eq!(spec.day_of_week, "*");
                assert_eq!(spec.timezone, "UTC");
            }
            other => panic!("unexpected {other:?}"),
        }

        let missing = parse(json!({
            "schedule_type": "crontab",
            "schedule_value": {"minute": "0"}
        }));
        assert!(matches!(missing.definition(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn clocked_requires_a_parsable_date_time() {
        assert!(matches!(
            parse(json!({"schedule_type": "clocked"})).definition(),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            parse(json!({"schedule_type": "clocked", "date_time": "soon"})).definition(),
            Err(ApiError::Scheduler(_))
        ));
    }
}
