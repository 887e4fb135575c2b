//! Next-fire computation for schedule specs.
//!
//! Everything here is a pure function of a [`ScheduleSpec`], a reference
//! "now" and the fixed reference timezone. Calendar candidates are built from
//! the first day of their month plus `day - 1` days, so a day-of-month past
//! the end of a month spills into the following month instead of failing.

use crate::error::ScheduleError;
use crate::schedule::{ScheduleSpec, TimeOfDay};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

/// When a schedule fires next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextFire {
    /// Absolute fire time.
    pub at: DateTime<Utc>,
    /// Strictly positive delay from the reference "now".
    pub delay: std::time::Duration,
}

/// How a timer re-arms after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Never fires again.
    Never,
    /// Fires again after a fixed period.
    Every(std::time::Duration),
    /// Recomputes the next fire from the spec.
    Recompute,
}

impl ScheduleSpec {
    /// Returns the re-arm step applied after each fire.
    #[must_use]
    pub fn rearm(&self) -> Rearm {
        match self {
            Self::Interval { minutes } => {
                Rearm::Every(std::time::Duration::from_secs(u64::from(*minutes) * 60))
            }
            Self::Once { .. } => Rearm::Never,
            Self::Daily { .. } => Rearm::Every(std::time::Duration::from_secs(24 * 60 * 60)),
            Self::Weekly { .. } | Self::Monthly { .. } | Self::SpecifiedDates { .. } => {
                Rearm::Recompute
            }
        }
    }
}

/// Computes the next fire of `spec` after `now`.
///
/// # Errors
///
/// Returns an error if date arithmetic leaves chrono's supported range.
pub fn next_fire(
    spec: &ScheduleSpec,
    now: DateTime<Utc>,
    reference: FixedOffset,
) -> Result<NextFire, ScheduleError> {
    let today = now.with_timezone(&reference).date_naive();

    let at = match spec {
        ScheduleSpec::Interval { minutes } => now + Duration::minutes(i64::from(*minutes)),
        ScheduleSpec::Once { at } => roll_past_once(*at, now),
        ScheduleSpec::Daily { time } => {
            let candidate = at_time(today, *time, reference)?;
            if candidate <= now {
                candidate + Duration::days(1)
            } else {
                candidate
            }
        }
        ScheduleSpec::Weekly { days, time } => {
            let mut candidates = Vec::with_capacity(days.len());
            for day in days {
                let ahead = (7 + i64::from(day.num_days_from_monday())
                    - i64::from(today.weekday().num_days_from_monday()))
                    % 7;
                let mut candidate = at_time(shift_days(today, ahead)?, *time, reference)?;
                if candidate <= now {
                    candidate += Duration::days(7);
                }
                candidates.push(candidate);
            }
            earliest(candidates)?
        }
        ScheduleSpec::Monthly { days, time } => {
            let this_month = first_of_month(today.year(), today.month())?;
            let next_month = if today.month() == 12 {
                first_of_month(today.year() + 1, 1)?
            } else {
                first_of_month(today.year(), today.month() + 1)?
            };
            let mut candidates = Vec::with_capacity(days.len());
            for day in days {
                let offset = i64::from(*day) - 1;
                let mut candidate = at_time(shift_days(this_month, offset)?, *time, reference)?;
                if candidate <= now {
                    candidate = at_time(shift_days(next_month, offset)?, *time, reference)?;
                }
                candidates.push(candidate);
            }
            earliest(candidates)?
        }
        ScheduleSpec::SpecifiedDates { months, days, time } => {
            let mut candidates = Vec::with_capacity(months.len() * days.len());
            for month in months {
                for day in days {
                    let offset = i64::from(*day) - 1;
                    let this_year = first_of_month(today.year(), *month)?;
                    let mut candidate =
                        at_time(shift_days(this_year, offset)?, *time, reference)?;
                    if candidate <= now {
                        let next_year = first_of_month(today.year() + 1, *month)?;
                        candidate = at_time(shift_days(next_year, offset)?, *time, reference)?;
                    }
                    candidates.push(candidate);
                }
            }
            earliest(candidates)?
        }
    };

    let delay = (at - now).to_std().map_err(|e| ScheduleError::EvaluationFailed {
        reason: format!("next fire {at} is not after {now}: {e}"),
    })?;
    Ok(NextFire { at, delay })
}

/// A once target in the past rolls forward by whole days until it is ahead of
/// `now`; a target missed by minutes therefore fires 24h later.
fn roll_past_once(target: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if target > now {
        return target;
    }
    let behind = (now - target).num_days() + 1;
    let rolled = target + Duration::days(behind);
    if rolled > now {
        rolled
    } else {
        rolled + Duration::days(1)
    }
}

fn at_time(
    date: NaiveDate,
    time: TimeOfDay,
    reference: FixedOffset,
) -> Result<DateTime<Utc>, ScheduleError> {
    reference
        .from_local_datetime(&date.and_time(time.to_naive()))
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::EvaluationFailed {
            reason: format!("{date} {time} has no single instant"),
        })
}

fn first_of_month(year: i32, month: u32) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| ScheduleError::EvaluationFailed {
        reason: format!("{year}-{month:02} is out of range"),
    })
}

fn shift_days(date: NaiveDate, days: i64) -> Result<NaiveDate, ScheduleError> {
    date.checked_add_signed(Duration::days(days))
        .ok_or_else(|| ScheduleError::EvaluationFailed {
            reason: format!("{date} + {days} days is out of range"),
        })
}

/// Smallest candidate; the first one enumerated wins a tie.
fn earliest(candidates: Vec<DateTime<Utc>>) -> Result<DateTime<Utc>, ScheduleError> {
    candidates
        .into_iter()
        .reduce(|best, candidate| if candidate < best { candidate } else { best })
        .ok_or_else(|| ScheduleError::EvaluationFailed {
            reason: "schedule selects no dates".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerKind;
    use chrono::Weekday;
    use serde_json::json;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn instant(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn nine() -> TimeOfDay {
        TimeOfDay::new(9, 0, 0).unwrap()
    }

    #[test]
    fn interval_fires_after_period() {
        let now = instant("2026-10-19T12:00:00Z");
        let next = next_fire(&ScheduleSpec::Interval { minutes: 1 }, now, utc()).unwrap();
        assert_eq!(next.delay, std::time::Duration::from_millis(60_000));
    }

    #[test]
    fn once_in_past_rolls_forward_one_day() {
        let now = instant("2026-10-19T12:00:00Z");
        let spec = ScheduleSpec::Once {
            at: now - Duration::minutes(5),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(
            next.delay,
            std::time::Duration::from_secs(24 * 3600 - 5 * 60)
        );
    }

    #[test]
    fn once_in_future_is_unchanged() {
        let now = instant("2026-10-19T12:00:00Z");
        let at = instant("2026-10-20T08:00:00Z");
        let next = next_fire(&ScheduleSpec::Once { at }, now, utc()).unwrap();
        assert_eq!(next.at, at);
    }

    #[test]
    fn once_exactly_now_is_rolled() {
        let now = instant("2026-10-19T12:00:00Z");
        let next = next_fire(&ScheduleSpec::Once { at: now }, now, utc()).unwrap();
        assert_eq!(next.at, now + Duration::days(1));
    }

    #[test]
    fn once_days_in_past_still_lands_in_future() {
        let now = instant("2026-10-19T12:00:00Z");
        let spec = ScheduleSpec::Once {
            at: instant("2026-10-15T13:00:00Z"),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2026-10-19T13:00:00Z"));
    }

    #[test]
    fn daily_uses_today_when_ahead_and_tomorrow_when_passed() {
        let spec = ScheduleSpec::Daily { time: nine() };
        let early = instant("2026-10-19T08:00:00Z");
        assert_eq!(
            next_fire(&spec, early, utc()).unwrap().at,
            instant("2026-10-19T09:00:00Z")
        );
        let late = instant("2026-10-19T09:30:00Z");
        assert_eq!(
            next_fire(&spec, late, utc()).unwrap().at,
            instant("2026-10-20T09:00:00Z")
        );
    }

    #[test]
    fn weekly_from_tuesday_waits_for_next_monday() {
        // 2026-10-20 is a Tuesday.
        let now = instant("2026-10-20T10:00:00Z");
        let spec = ScheduleSpec::from_config(
            &json!({"schedule_type": "weekly", "weekly_days": ["monday"], "time": "09:00:00"}),
            utc(),
        )
        .unwrap();
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2026-10-26T09:00:00Z"));
        assert_eq!(next.at.weekday(), Weekday::Mon);
        assert_eq!(next.delay, std::time::Duration::from_secs((6 * 24 - 1) * 3600));
    }

    #[test]
    fn weekly_same_day_passed_wraps_a_full_week() {
        // 2026-10-19 is a Monday.
        let now = instant("2026-10-19T09:00:01Z");
        let spec = ScheduleSpec::Weekly {
            days: vec![Weekday::Mon],
            time: nine(),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2026-10-26T09:00:00Z"));
    }

    #[test]
    fn weekly_picks_the_nearest_day() {
        let now = instant("2026-10-20T10:00:00Z");
        let spec = ScheduleSpec::Weekly {
            days: vec![Weekday::Mon, Weekday::Thu, Weekday::Wed],
            time: nine(),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2026-10-21T09:00:00Z"));
    }

    #[test]
    fn monthly_rolls_to_next_month_when_passed() {
        let now = instant("2026-10-19T10:00:00Z");
        let spec = ScheduleSpec::Monthly {
            days: vec![5],
            time: nine(),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2026-11-05T09:00:00Z"));
    }

    #[test]
    fn monthly_day_31_overflows_into_following_month() {
        // November has 30 days, so "the 31st" lands on December 1st.
        let now = instant("2026-11-10T10:00:00Z");
        let spec = ScheduleSpec::Monthly {
            days: vec![31],
            time: nine(),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2026-12-01T09:00:00Z"));
    }

    #[test]
    fn monthly_overflow_after_passed_month_end() {
        // Jan 31 has passed; February + 30 days spills into March.
        let now = instant("2027-01-31T10:00:00Z");
        let spec = ScheduleSpec::Monthly {
            days: vec![31],
            time: nine(),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2027-03-03T09:00:00Z"));
    }

    #[test]
    fn specified_dates_roll_to_next_year() {
        let now = instant("2026-10-19T10:00:00Z");
        let spec = ScheduleSpec::SpecifiedDates {
            months: vec![3],
            days: vec![1],
            time: nine(),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2027-03-01T09:00:00Z"));
    }

    #[test]
    fn specified_dates_choose_minimum_of_cross_product() {
        let now = instant("2026-10-19T10:00:00Z");
        let spec = ScheduleSpec::SpecifiedDates {
            months: vec![1, 11],
            days: vec![20, 2],
            time: nine(),
        };
        let next = next_fire(&spec, now, utc()).unwrap();
        assert_eq!(next.at, instant("2026-11-02T09:00:00Z"));
    }

    #[test]
    fn reference_offset_shifts_calendar_targets() {
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        // 04:00Z is 09:30 in the reference zone, so today's 09:00 has passed.
        let now = instant("2026-10-19T04:00:00Z");
        let spec = ScheduleSpec::Daily { time: nine() };
        let next = next_fire(&spec, now, ist).unwrap();
        assert_eq!(next.at, instant("2026-10-20T03:30:00Z"));
    }

    #[test]
    fn delay_is_strictly_positive_across_modes() {
        let specs = [
            ScheduleSpec::Interval { minutes: 3 },
            ScheduleSpec::Once {
                at: instant("2020-01-01T00:00:00Z"),
            },
            ScheduleSpec::Daily { time: nine() },
            ScheduleSpec::Weekly {
                days: vec![Weekday::Sun, Weekday::Mon],
                time: nine(),
            },
            ScheduleSpec::Monthly {
                days: (1..=31).collect(),
                time: nine(),
            },
            ScheduleSpec::SpecifiedDates {
                months: (1..=12).collect(),
                days: vec![29, 30, 31],
                time: nine(),
            },
        ];
        let nows = [
            "2026-10-19T09:00:00Z",
            "2026-12-31T23:59:59Z",
            "2028-02-29T09:00:00Z",
            "2027-01-01T00:00:00Z",
        ];
        for spec in &specs {
            for raw in nows {
                let now = instant(raw);
                let next = next_fire(spec, now, utc()).unwrap();
                assert!(next.at > now, "{spec:?} at {raw}");
                assert!(!next.delay.is_zero());
            }
        }
    }

    #[test]
    fn rearm_policy_per_mode() {
        assert_eq!(
            ScheduleSpec::Interval { minutes: 2 }.rearm(),
            Rearm::Every(std::time::Duration::from_secs(120))
        );
        assert_eq!(
            ScheduleSpec::Once {
                at: instant("2026-01-01T00:00:00Z")
            }
            .rearm(),
            Rearm::Never
        );
        assert_eq!(
            ScheduleSpec::Daily { time: nine() }.rearm(),
            Rearm::Every(std::time::Duration::from_secs(86_400))
        );
        assert_eq!(
            ScheduleSpec::Monthly {
                days: vec![1],
                time: nine()
            }
            .rearm(),
            Rearm::Recompute
        );
    }

    #[test]
    fn timer_kind_follows_rearm_policy() {
        let specs = [
            ScheduleSpec::Interval { minutes: 5 },
            ScheduleSpec::Once {
                at: instant("2026-01-01T00:00:00Z"),
            },
            ScheduleSpec::Daily { time: nine() },
            ScheduleSpec::Weekly {
                days: vec![Weekday::Mon],
                time: nine(),
            },
        ];
        for spec in &specs {
            let periodic = matches!(spec.rearm(), Rearm::Every(_));
            assert_eq!(spec.timer_kind() == TimerKind::Repeating, periodic, "{spec:?}");
        }
        assert_eq!(
            ScheduleSpec::Daily { time: nine() }.timer_kind(),
            TimerKind::Repeating
        );
    }
}
