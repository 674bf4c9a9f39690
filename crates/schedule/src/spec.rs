//! Recurrence specification and next-run computation.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use reportforge_core::{DomainError, DomainResult};

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

/// Wall-clock time of day in the schedule's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    fn to_naive(self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0)
    }
}

/// Recurrence description attached to a scheduled report.
///
/// Timezones are fixed UTC offsets; the offset is part of the spec so that
/// "09:00 in Berlin-winter" stays 09:00 regardless of where workers run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub frequency: Frequency,
    pub time_of_day: TimeOfDay,
    /// Required iff weekly.
    pub day_of_week: Option<Weekday>,
    /// Required iff monthly (1-31, clamped to the target month's last day).
    pub day_of_month: Option<u8>,
    /// Minutes east of UTC.
    pub utc_offset_minutes: i32,
}

impl ScheduleSpec {
    pub fn daily(hour: u8, minute: u8) -> Self {
        Self {
            frequency: Frequency::Daily,
            time_of_day: TimeOfDay::new(hour, minute),
            day_of_week: None,
            day_of_month: None,
            utc_offset_minutes: 0,
        }
    }

    pub fn weekly(day: Weekday, hour: u8, minute: u8) -> Self {
        Self {
            frequency: Frequency::Weekly,
            time_of_day: TimeOfDay::new(hour, minute),
            day_of_week: Some(day),
            day_of_month: None,
            utc_offset_minutes: 0,
        }
    }

    pub fn monthly(day_of_month: u8, hour: u8, minute: u8) -> Self {
        Self {
            frequency: Frequency::Monthly,
            time_of_day: TimeOfDay::new(hour, minute),
            day_of_week: None,
            day_of_month: Some(day_of_month),
            utc_offset_minutes: 0,
        }
    }

    pub fn quarterly(hour: u8, minute: u8) -> Self {
        Self {
            frequency: Frequency::Quarterly,
            time_of_day: TimeOfDay::new(hour, minute),
            day_of_week: None,
            day_of_month: None,
            utc_offset_minutes: 0,
        }
    }

    pub fn with_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    /// Check field ranges and the frequency/field pairing rules.
    pub fn validate(&self) -> DomainResult<()> {
        if self.time_of_day.to_naive().is_none() {
            return Err(DomainError::validation(format!(
                "invalid time of day {:02}:{:02}",
                self.time_of_day.hour, self.time_of_day.minute
            )));
        }

        match self.frequency {
            Frequency::Weekly => {
                if self.day_of_week.is_none() {
                    return Err(DomainError::validation("weekly schedule requires day_of_week"));
                }
            }
            _ => {
                if self.day_of_week.is_some() {
                    return Err(DomainError::validation(
                        "day_of_week is only meaningful for weekly schedules",
                    ));
                }
            }
        }

        match self.frequency {
            Frequency::Monthly => match self.day_of_month {
                None => {
                    return Err(DomainError::validation("monthly schedule requires day_of_month"));
                }
                Some(d) if !(1..=31).contains(&d) => {
                    return Err(DomainError::validation(format!("day_of_month {d} out of range")));
                }
                Some(_) => {}
            },
            _ => {
                if self.day_of_month.is_some() {
                    return Err(DomainError::validation(
                        "day_of_month is only meaningful for monthly schedules",
                    ));
                }
            }
        }

        if self.utc_offset_minutes.abs() > 18 * 60 {
            return Err(DomainError::validation(format!(
                "utc offset {} minutes out of range",
                self.utc_offset_minutes
            )));
        }

        Ok(())
    }

    fn offset(&self) -> DomainResult<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            DomainError::validation(format!(
                "utc offset {} minutes out of range",
                self.utc_offset_minutes
            ))
        })
    }
}

/// Compute the next occurrence strictly after `from`.
///
/// The candidate is `from`'s date at the spec's time of day in the spec's
/// offset; when that is not strictly in the future, it advances by one
/// recurrence unit (weekly moves 1-7 days; monthly/quarterly clamp the day
/// to the target month's real last day).
pub fn compute_next_run(spec: &ScheduleSpec, from: DateTime<Utc>) -> DomainResult<DateTime<Utc>> {
    spec.validate()?;

    let tz = spec.offset()?;
    let local = from.with_timezone(&tz);
    let time = spec
        .time_of_day
        .to_naive()
        .ok_or_else(|| DomainError::validation("invalid time of day"))?;

    let at = |date: NaiveDate| -> DomainResult<DateTime<Utc>> {
        tz.from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| DomainError::invariant("unrepresentable local time"))
    };

    let today = local.date_naive();

    let date = match spec.frequency {
        Frequency::Daily => {
            if at(today)? > from {
                today
            } else {
                next_day(today)
            }
        }
        Frequency::Weekly => {
            // validate() guarantees presence.
            let target = spec.day_of_week.ok_or_else(|| {
                DomainError::validation("weekly schedule requires day_of_week")
            })?;
            let ahead = (target.num_days_from_monday() as i64
                - today.weekday().num_days_from_monday() as i64)
                .rem_euclid(7);
            let candidate = add_days(today, ahead);
            if at(candidate)? > from {
                candidate
            } else {
                add_days(candidate, 7)
            }
        }
        Frequency::Monthly => {
            let dom = spec.day_of_month.ok_or_else(|| {
                DomainError::validation("monthly schedule requires day_of_month")
            })? as u32;
            let candidate = clamped_date(today.year(), today.month(), dom)?;
            if at(candidate)? > from {
                candidate
            } else {
                let (year, month) = add_months(today.year(), today.month(), 1);
                clamped_date(year, month, dom)?
            }
        }
        Frequency::Quarterly => {
            // Quarterly anchors on the current day of month.
            let anchor = today.day();
            let candidate = clamped_date(today.year(), today.month(), anchor)?;
            if at(candidate)? > from {
                candidate
            } else {
                let (year, month) = add_months(today.year(), today.month(), 3);
                clamped_date(year, month, anchor)?
            }
        }
    };

    at(date)
}

fn next_day(date: NaiveDate) -> NaiveDate {
    add_days(date, 1)
}

fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + chrono::Duration::days(days)
}

fn add_months(year: i32, month: u32, add: u32) -> (i32, u32) {
    let zero_based = year * 12 + (month as i32 - 1) + add as i32;
    (zero_based.div_euclid(12), (zero_based.rem_euclid(12) + 1) as u32)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
    }
}

fn clamped_date(year: i32, month: u32, day: u32) -> DomainResult<NaiveDate> {
    let day = day.min(days_in_month(year, month)).max(1);
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DomainError::invariant(format!("invalid date {year}-{month:02}-{day:02}")))
}
