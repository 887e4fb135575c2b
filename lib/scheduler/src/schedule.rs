//! Schedule specifications for timer-driven triggers.
//!
//! A [`ScheduleSpec`] is parsed once from a trigger node's opaque config map
//! and is immutable afterwards. Anything malformed is rejected here so the
//! recurrence engine only ever sees well-formed input.

use crate::error::ScheduleError;
use crate::recurrence::Rearm;
use crate::timer::TimerKind;
use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Accepted layouts for the `date_time` field of a once schedule.
const NAIVE_DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// The recurrence mode of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Every N minutes from start.
    Interval,
    /// A single date-time.
    Once,
    /// Every day at a time.
    Daily,
    /// Selected weekdays at a time.
    Weekly,
    /// Selected days of the month at a time.
    Monthly,
    /// Selected months × days at a time.
    SpecifiedDates,
}

impl ScheduleMode {
    /// Returns the config value naming this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Once => "once",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::SpecifiedDates => "specified_dates",
        }
    }

    fn parse(raw: &str) -> Result<Self, ScheduleError> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "interval" => Ok(Self::Interval),
            "once" => Ok(Self::Once),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "specified_dates" => Ok(Self::SpecifiedDates),
            _ => Err(ScheduleError::UnknownMode {
                mode: raw.to_string(),
            }),
        }
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wall-clock time normalized to integer hour/minute/second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
    second: u32,
}

impl TimeOfDay {
    /// Creates a time of day, rejecting out-of-range components.
    ///
    /// # Errors
    ///
    /// Returns an error if any component is out of range.
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self, ScheduleError> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(ScheduleError::invalid(
                "time",
                format!("{hour:02}:{minute:02}:{second:02} is not a valid time of day"),
            ));
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    /// Parses `HH:MM` or `HH:MM:SS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid time of day.
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(ScheduleError::invalid(
                "time",
                format!("expected HH:MM or HH:MM:SS, got '{raw}'"),
            ));
        }
        let mut numbers = [0_u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part.trim().parse().map_err(|_| {
                ScheduleError::invalid("time", format!("'{part}' is not a number"))
            })?;
        }
        Self::new(numbers[0], numbers[1], numbers[2])
    }

    /// Returns the time as a chrono `NaiveTime`.
    #[must_use]
    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// A validated schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Fires every `minutes` minutes from arming.
    Interval { minutes: u32 },
    /// Fires once at `at`.
    Once { at: DateTime<Utc> },
    /// Fires every day at `time`.
    Daily { time: TimeOfDay },
    /// Fires on each of `days` at `time`.
    Weekly { days: Vec<Weekday>, time: TimeOfDay },
    /// Fires on each day-of-month in `days` at `time`.
    Monthly { days: Vec<u32>, time: TimeOfDay },
    /// Fires on every `months` × `days` combination at `time`.
    SpecifiedDates {
        months: Vec<u32>,
        days: Vec<u32>,
        time: TimeOfDay,
    },
}

impl ScheduleSpec {
    /// Parses and validates a schedule from a trigger config map.
    ///
    /// `reference` is the fixed timezone naive date-times and times of day are
    /// interpreted in.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is missing fields or holds malformed values.
    pub fn from_config(config: &JsonValue, reference: FixedOffset) -> Result<Self, ScheduleError> {
        let mode_value = field(config, "schedule_type")?;
        let mode = ScheduleMode::parse(as_text(mode_value, "schedule_type")?)?;

        match mode {
            ScheduleMode::Interval => {
                let minutes = as_uint(field(config, "interval_minutes")?, "interval_minutes")?;
                if minutes == 0 {
                    return Err(ScheduleError::invalid(
                        "interval_minutes",
                        "must be at least 1",
                    ));
                }
                Ok(Self::Interval { minutes })
            }
            ScheduleMode::Once => {
                let raw = as_text(field(config, "date_time")?, "date_time")?;
                Ok(Self::Once {
                    at: parse_date_time(raw, reference)?,
                })
            }
            ScheduleMode::Daily => Ok(Self::Daily {
                time: time_field(config)?,
            }),
            ScheduleMode::Weekly => {
                let days = list(field(config, "weekly_days")?, "weekly_days")?
                    .into_iter()
                    .map(parse_weekday)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Weekly {
                    days: dedup(days),
                    time: time_field(config)?,
                })
            }
            ScheduleMode::Monthly => Ok(Self::Monthly {
                days: numbers_in_range(field(config, "monthly_days")?, "monthly_days", 1, 31)?,
                time: time_field(config)?,
            }),
            ScheduleMode::SpecifiedDates => Ok(Self::SpecifiedDates {
                months: months(field(config, "months")?)?,
                days: numbers_in_range(field(config, "days")?, "days", 1, 31)?,
                time: time_field(config)?,
            }),
        }
    }

    /// Returns the recurrence mode.
    #[must_use]
    pub fn mode(&self) -> ScheduleMode {
        match self {
            Self::Interval { .. } => ScheduleMode::Interval,
            Self::Once { .. } => ScheduleMode::Once,
            Self::Daily { .. } => ScheduleMode::Daily,
            Self::Weekly { .. } => ScheduleMode::Weekly,
            Self::Monthly { .. } => ScheduleMode::Monthly,
            Self::SpecifiedDates { .. } => ScheduleMode::SpecifiedDates,
        }
    }

    /// Returns the kind of timer backing this schedule.
    ///
    /// Schedules with a fixed re-arm period (interval and daily) run on a
    /// periodic timer; every other mode is a chain of one-shot timers.
    #[must_use]
    pub fn timer_kind(&self) -> TimerKind {
        match self.rearm() {
            Rearm::Every(_) => TimerKind::Repeating,
            Rearm::Never | Rearm::Recompute => TimerKind::OneShot,
        }
    }
}

fn field<'a>(config: &'a JsonValue, name: &'static str) -> Result<&'a JsonValue, ScheduleError> {
    match config.get(name) {
        None | Some(JsonValue::Null) => Err(ScheduleError::MissingField { field: name }),
        Some(value) => Ok(value),
    }
}

fn as_text<'a>(value: &'a JsonValue, name: &'static str) -> Result<&'a str, ScheduleError> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ScheduleError::invalid(name, "expected a non-empty string"))
}

/// Accepts JSON numbers and numeric strings; trigger UIs send both.
fn as_uint(value: &JsonValue, name: &'static str) -> Result<u32, ScheduleError> {
    let parsed = match value {
        JsonValue::Number(number) => number.as_u64(),
        JsonValue::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ScheduleError::invalid(name, format!("{value} is not a whole number")))
}

fn list<'a>(value: &'a JsonValue, name: &'static str) -> Result<Vec<&'a JsonValue>, ScheduleError> {
    let items: Vec<&JsonValue> = match value {
        JsonValue::Array(items) => items.iter().collect(),
        JsonValue::String(_) | JsonValue::Number(_) => vec![value],
        _ => return Err(ScheduleError::invalid(name, "expected a list")),
    };
    if items.is_empty() {
        return Err(ScheduleError::invalid(name, "must select at least one value"));
    }
    Ok(items)
}

fn is_all(items: &[&JsonValue]) -> bool {
    items
        .iter()
        .any(|item| item.as_str().is_some_and(|s| s.trim().eq_ignore_ascii_case("all")))
}

fn numbers_in_range(
    value: &JsonValue,
    name: &'static str,
    min: u32,
    max: u32,
) -> Result<Vec<u32>, ScheduleError> {
    let items = list(value, name)?;
    if is_all(&items) {
        return Ok((min..=max).collect());
    }
    let mut numbers = Vec::with_capacity(items.len());
    for item in items {
        let n = as_uint(item, name)?;
        if !(min..=max).contains(&n) {
            return Err(ScheduleError::invalid(
                name,
                format!("{n} is outside {min}..={max}"),
            ));
        }
        numbers.push(n);
    }
    Ok(dedup(numbers))
}

fn months(value: &JsonValue) -> Result<Vec<u32>, ScheduleError> {
    const NAMES: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];

    let items = list(value, "months")?;
    if is_all(&items) {
        return Ok((1..=12).collect());
    }
    let mut numbers = Vec::with_capacity(items.len());
    for item in items {
        let named = item.as_str().and_then(|text| {
            let text = text.trim().to_ascii_lowercase();
            NAMES
                .iter()
                .position(|name| text.len() >= 3 && name.starts_with(&text))
                .map(|idx| idx as u32 + 1)
        });
        let month = match named {
            Some(month) => month,
            None => as_uint(item, "months")?,
        };
        if !(1..=12).contains(&month) {
            return Err(ScheduleError::invalid(
                "months",
                format!("{month} is outside 1..=12"),
            ));
        }
        numbers.push(month);
    }
    Ok(dedup(numbers))
}

fn parse_weekday(value: &JsonValue) -> Result<Weekday, ScheduleError> {
    let raw = as_text(value, "weekly_days")?;
    let day = match raw.to_ascii_lowercase().as_str() {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => {
            return Err(ScheduleError::invalid(
                "weekly_days",
                format!("'{raw}' is not a weekday"),
            ));
        }
    };
    Ok(day)
}

fn time_field(config: &JsonValue) -> Result<TimeOfDay, ScheduleError> {
    TimeOfDay::parse(as_text(field(config, "time")?, "time")?)
}

fn parse_date_time(raw: &str, reference: FixedOffset) -> Result<DateTime<Utc>, ScheduleError> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(with_offset.with_timezone(&Utc));
    }
    let naive = NAIVE_DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| {
            ScheduleError::invalid("date_time", format!("'{raw}' is not a recognized date-time"))
        })?;
    reference
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::invalid("date_time", format!("'{raw}' is ambiguous")))
}

/// Removes repeats while keeping first-seen order, which is the tie-break order.
fn dedup<T: PartialEq>(values: Vec<T>) -> Vec<T> {
    let mut unique = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn interval_accepts_numeric_string() {
        let spec = ScheduleSpec::from_config(
            &json!({"schedule_type": "interval", "interval_minutes": "1"}),
            utc(),
        )
        .unwrap();
        assert_eq!(spec, ScheduleSpec::Interval { minutes: 1 });
        assert_eq!(spec.timer_kind(), TimerKind::Repeating);
    }

    #[test]
    fn interval_rejects_zero_and_garbage() {
        for minutes in [json!(0), json!("soon"), json!(-5)] {
            let result = ScheduleSpec::from_config(
                &json!({"schedule_type": "interval", "interval_minutes": minutes}),
                utc(),
            );
            assert!(matches!(result, Err(ScheduleError::InvalidField { .. })));
        }
    }

    #[test]
    fn missing_mode_is_reported() {
        let err = ScheduleSpec::from_config(&json!({}), utc()).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::MissingField {
                field: "schedule_type"
            }
        );
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = ScheduleSpec::from_config(&json!({"schedule_type": "hourly"}), utc()).unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownMode { .. }));
    }

    #[test]
    fn once_naive_time_uses_reference_offset() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let spec = ScheduleSpec::from_config(
            &json!({"schedule_type": "once", "date_time": "2026-03-01 10:00:00"}),
            plus_two,
        )
        .unwrap();
        let ScheduleSpec::Once { at } = spec else {
            panic!("expected once");
        };
        assert_eq!(at.to_rfc3339(), "2026-03-01T08:00:00+00:00");
    }

    #[test]
    fn weekly_days_parse_names_and_dedup() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "schedule_type": "weekly",
                "weekly_days": ["monday", "Fri", "monday"],
                "time": "09:00"
            }),
            utc(),
        )
        .unwrap();
        assert_eq!(
            spec,
            ScheduleSpec::Weekly {
                days: vec![Weekday::Mon, Weekday::Fri],
                time: TimeOfDay::new(9, 0, 0).unwrap(),
            }
        );
    }

    #[test]
    fn weekly_rejects_empty_selection() {
        let result = ScheduleSpec::from_config(
            &json!({"schedule_type": "weekly", "weekly_days": [], "time": "09:00"}),
            utc(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn monthly_days_must_be_in_range() {
        let result = ScheduleSpec::from_config(
            &json!({"schedule_type": "monthly", "monthly_days": [0, 15], "time": "09:00"}),
            utc(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn specified_dates_expand_all() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "schedule_type": "specified_dates",
                "months": ["all"],
                "days": ["1", "15"],
                "time": "08:30:15"
            }),
            utc(),
        )
        .unwrap();
        let ScheduleSpec::SpecifiedDates { months, days, time } = spec else {
            panic!("expected specified dates");
        };
        assert_eq!(months, (1..=12).collect::<Vec<_>>());
        assert_eq!(days, vec![1, 15]);
        assert_eq!(time.to_string(), "08:30:15");
    }

    #[test]
    fn month_names_are_accepted() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "schedule_type": "specified_dates",
                "months": ["March", "dec"],
                "days": "all",
                "time": "00:00"
            }),
            utc(),
        )
        .unwrap();
        let ScheduleSpec::SpecifiedDates { months, days, .. } = spec else {
            panic!("expected specified dates");
        };
        assert_eq!(months, vec![3, 12]);
        assert_eq!(days.len(), 31);
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert!(TimeOfDay::parse("24:00").is_err());
        assert!(TimeOfDay::parse("12:60:00").is_err());
        assert!(TimeOfDay::parse("noon").is_err());
        assert_eq!(TimeOfDay::parse("7:05").unwrap().to_string(), "07:05:00");
    }
}
