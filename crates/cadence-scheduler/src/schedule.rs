use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::types::{CrontabSpec, ScheduleDefinition};

/// Reject definitions the store must never persist.
pub fn validate(def: &ScheduleDefinition) -> Result<()> {
    match def {
        ScheduleDefinition::Interval { every, unit } => {
            if *every < 1 {
                return Err(SchedulerError::Validation(format!(
                    "interval must be at least 1, got {every}"
                )));
            }
            if Utc::now().checked_add_signed(unit.span(*every)).is_none() {
                return Err(SchedulerError::Validation(format!(
                    "interval of {every} {unit} is out of range"
                )));
            }
            Ok(())
        }
        ScheduleDefinition::Crontab(spec) => {
            let (schedule, tz) = compile_crontab(spec)?;
            if schedule.upcoming(tz).next().is_none() {
                return Err(SchedulerError::Validation(
                    "crontab pattern never matches a date".into(),
                ));
            }
            Ok(())
        }
        // Parsing already happened when the instant was built.
        ScheduleDefinition::Clocked { .. } => Ok(()),
    }
}

/// Build the `cron` crate schedule and timezone for a crontab definition.
///
/// The crate wants six fields (seconds first) and numbers weekdays 1-7 from
/// Sunday, so `day_of_week` is rewritten from the 0-6 form.
pub fn compile_crontab(spec: &CrontabSpec) -> Result<(cron::Schedule, Tz)> {
    let fields = [
        ("minute", &spec.minute),
        ("hour", &spec.hour),
        ("day_of_month", &spec.day_of_month),
        ("month_of_year", &spec.month_of_year),
        ("day_of_week", &spec.day_of_week),
    ];
    for (name, value) in fields {
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(SchedulerError::Validation(format!(
                "crontab field {name} must be a single non-empty pattern, got {value:?}"
            )));
        }
    }

    let dow = translate_day_of_week(&spec.day_of_week)?;
    let expr = format!(
        "0 {} {} {} {} {}",
        spec.minute, spec.hour, spec.day_of_month, spec.month_of_year, dow
    );
    let schedule = cron::Schedule::from_str(&expr).map_err(|e| {
        SchedulerError::Validation(format!("invalid crontab pattern {expr:?}: {e}"))
    })?;
    let tz: Tz = spec.timezone.parse().map_err(|_| {
        SchedulerError::Validation(format!("unknown timezone: {}", spec.timezone))
    })?;
    Ok((schedule, tz))
}

/// Rewrite a 0-6 (Sunday = 0, 7 also Sunday) weekday pattern into the 1-7
/// numbering of the `cron` crate. Names pass through untouched.
fn translate_day_of_week(field: &str) -> Result<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let invalid = |item: &str| {
        SchedulerError::Validation(format!("invalid day_of_week item {item:?} in {field:?}"))
    };
    let parse_day = |s: &str| -> Result<u8> {
        s.parse::<u8>()
            .ok()
            .filter(|d| *d <= 7)
            .ok_or_else(|| invalid(s))
    };

    let mut named = Vec::new();
    let mut days = BTreeSet::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(item.to_string());
            continue;
        }
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<u8>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| invalid(item))?;
                (range, Some(step))
            }
            None => (item, None),
        };
        let (lo, hi) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (parse_day(a)?, parse_day(b)?),
                None => {
                    let d = parse_day(range)?;
                    // `3/2` runs from 3 to the end of the week.
                    (d, if step.is_some() { 6 } else { d })
                }
            },
        };
        if lo > hi {
            return Err(invalid(item));
        }
        for d in (lo..=hi).step_by(usize::from(step.unwrap_or(1))) {
            days.insert(if d == 7 { 1 } else { d + 1 });
        }
    }

    let mut parts: Vec<String> = days.into_iter().map(|d| d.to_string()).collect();
    parts.extend(named);
    if parts.is_empty() {
        return Err(invalid(field));
    }
    Ok(parts.join(","))
}

/// Compute the next UTC fire time of `def`.
///
/// `start` anchors schedules that have never run; `last_run` is the most
/// recent fire. Returns `None` when the schedule is exhausted (a clocked
/// schedule that already fired) or cannot be evaluated.
pub fn compute_next_run(
    def: &ScheduleDefinition,
    start: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match def {
        ScheduleDefinition::Interval { every, unit } => {
            let next = last_run
                .unwrap_or(start)
                .checked_add_signed(unit.span(*every));
            if next.is_none() {
                warn!(every, %unit, "interval schedule overflows the calendar");
            }
            next
        }

        ScheduleDefinition::Crontab(spec) => {
            let (schedule, tz) = match compile_crontab(spec) {
                Ok(compiled) => compiled,
                Err(e) => {
                    warn!("crontab schedule cannot be evaluated: {e}");
                    return None;
                }
            };
            let from = last_run.unwrap_or(start).with_timezone(&tz);
            schedule
                .after(&from)
                .next()
                .map(|t| t.with_timezone(&Utc))
        }

        ScheduleDefinition::Clocked { fire_at } => match last_run {
            Some(_) => None,
            None => Some(*fire_at),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntervalUnit;
    use chrono::TimeZone;

    fn daily_at_nine(tz: &str) -> CrontabSpec {
        CrontabSpec {
            minute: "0".into(),
            hour: "9".into(),
            timezone: tz.into(),
            ..CrontabSpec::default()
        }
    }

    #[test]
    fn interval_zero_is_rejected() {
        let err = validate(&ScheduleDefinition::every_seconds(0)).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert!(validate(&ScheduleDefinition::every_seconds(1)).is_ok());
    }

    #[test]
    fn interval_beyond_the_calendar_is_rejected() {
        let huge = ScheduleDefinition::Interval {
            every: u32::MAX,
            unit: IntervalUnit::Days,
        };
        let err = validate(&huge).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));

        let long = ScheduleDefinition::Interval {
            every: 3650,
            unit: IntervalUnit::Days,
        };
        assert!(validate(&long).is_ok());
    }

    #[test]
    fn overflowing_interval_has_no_next_run() {
        let start = Utc::now();
        let huge = ScheduleDefinition::Interval {
            every: u32::MAX,
            unit: IntervalUnit::Days,
        };
        assert_eq!(compute_next_run(&huge, start, None), None);
        assert_eq!(compute_next_run(&huge, start, Some(start)), None);
    }

    #[test]
    fn crontab_that_never_fires_is_rejected() {
        let spec = CrontabSpec {
            day_of_month: "31".into(),
            month_of_year: "2".into(),
            ..daily_at_nine("UTC")
        };
        let err = validate(&ScheduleDefinition::Crontab(spec)).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));

        let leap_day = CrontabSpec {
            day_of_month: "29".into(),
            month_of_year: "2".into(),
            ..daily_at_nine("UTC")
        };
        assert!(validate(&ScheduleDefinition::Crontab(leap_day)).is_ok());
    }

    #[test]
    fn crontab_out_of_range_minute_is_rejected() {
        let mut spec = daily_at_nine("UTC");
        spec.minute = "61".into();
        assert!(validate(&ScheduleDefinition::Crontab(spec)).is_err());
    }

    #[test]
    fn crontab_whitespace_cannot_smuggle_fields() {
        let mut spec = daily_at_nine("UTC");
        spec.hour = "9 1".into();
        assert!(validate(&ScheduleDefinition::Crontab(spec)).is_err());
    }

    #[test]
    fn crontab_unknown_timezone_is_rejected() {
        let spec = daily_at_nine("Mars/Olympus");
        assert!(validate(&ScheduleDefinition::Crontab(spec)).is_err());
    }

    #[test]
    fn weekday_translation() {
        assert_eq!(translate_day_of_week("*").unwrap(), "*");
        assert_eq!(translate_day_of_week("0").unwrap(), "1");
        assert_eq!(translate_day_of_week("7").unwrap(), "1");
        assert_eq!(translate_day_of_week("1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(translate_day_of_week("5-7").unwrap(), "1,6,7");
        assert_eq!(translate_day_of_week("*/3").unwrap(), "1,4,7");
        assert_eq!(translate_day_of_week("Mon").unwrap(), "Mon");
        assert!(translate_day_of_week("8").is_err());
        assert!(translate_day_of_week("5-2").is_err());
        assert!(translate_day_of_week("1/0").is_err());
    }

    #[test]
    fn interval_counts_from_last_run_then_start() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let def = ScheduleDefinition::Interval {
            every: 5,
            unit: IntervalUnit::Minutes,
        };
        assert_eq!(
            compute_next_run(&def, start, None),
            Some(start + chrono::Duration::minutes(5))
        );
        let last = start + chrono::Duration::hours(1);
        assert_eq!(
            compute_next_run(&def, start, Some(last)),
            Some(last + chrono::Duration::minutes(5))
        );
    }

    #[test]
    fn crontab_respects_timezone() {
        // 09:00 in Kyiv during January (UTC+2) is 07:00 UTC.
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let def = ScheduleDefinition::Crontab(daily_at_nine("Europe/Kyiv"));
        let next = compute_next_run(&def, start, None).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 10, 7, 0, 0).unwrap());
    }

    #[test]
    fn crontab_weekday_uses_sunday_zero() {
        // 2026-01-10 is a Saturday; "0" must resolve to Sunday the 11th.
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        let mut spec = daily_at_nine("UTC");
        spec.day_of_week = "0".into();
        let next = compute_next_run(&ScheduleDefinition::Crontab(spec), start, None).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn clocked_fires_once() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let def = ScheduleDefinition::Clocked { fire_at: at };
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(compute_next_run(&def, start, None), Some(at));
        assert_eq!(compute_next_run(&def, start, Some(at)), None);
    }
}
