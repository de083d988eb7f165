//! Due-time math: fixed polling intervals and calendar-style cron schedules.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SluiceError};
use crate::trigger::{CronTriggerConfig, ScheduleFrequency, Trigger, TriggerConfig};

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires `sec min hour day-of-month month day-of-week`.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Check if a cron schedule is due at `now`.
///
/// Due when the first scheduled tick after `last_run` is at or before `now`.
/// Without a `last_run`, any tick within the past day counts.
pub fn is_cron_due(schedule: &Schedule, now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> bool {
    next_tick(schedule, now, last_run).is_some_and(|next| next <= now)
}

/// First scheduled tick after `last_run` (or after `now - 1 day`).
pub fn next_tick(
    schedule: &Schedule,
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let check_from = last_run.unwrap_or(now - chrono::Duration::days(1));
    schedule.after(&check_from).next()
}

/// Parse `HH:MM` into (hour, minute).
pub fn parse_time_of_day(time: &str) -> Result<(u32, u32)> {
    let bad = || SluiceError::Schedule(format!("time must be HH:MM, got '{time}'"));
    let (h, m) = time.trim().split_once(':').ok_or_else(bad)?;
    let hour: u32 = h.parse().map_err(|_| bad())?;
    let minute: u32 = m.parse().map_err(|_| bad())?;
    if hour > 23 || minute > 59 {
        return Err(bad());
    }
    Ok((hour, minute))
}

impl CronTriggerConfig {
    /// Six-field cron expression for schedule mode; `None` for interval mode.
    pub fn to_cron_expression(&self) -> Result<Option<String>> {
        let Self::Schedule {
            frequency,
            time,
            day_of_week,
            day_of_month,
        } = self
        else {
            return Ok(None);
        };

        let (hour, minute) = parse_time_of_day(time)?;
        let five_field = match frequency {
            ScheduleFrequency::Hourly => format!("{minute} * * * *"),
            ScheduleFrequency::Daily => format!("{minute} {hour} * * *"),
            ScheduleFrequency::Weekly => {
                let dow = day_of_week.unwrap_or(0);
                let name = WEEKDAYS.get(usize::from(dow)).ok_or_else(|| {
                    SluiceError::Schedule(format!("day_of_week must be 0-6, got {dow}"))
                })?;
                format!("{minute} {hour} * * {name}")
            }
            ScheduleFrequency::Monthly => {
                let dom = day_of_month.unwrap_or(1);
                if !(1..=31).contains(&dom) {
                    return Err(SluiceError::Schedule(format!(
                        "day_of_month must be 1-31, got {dom}"
                    )));
                }
                format!("{minute} {hour} {dom} * *")
            }
        };
        Ok(Some(normalize_cron(&five_field)))
    }

    /// Parsed schedule for schedule mode; `None` for interval mode.
    pub fn schedule(&self) -> Result<Option<Schedule>> {
        match self.to_cron_expression()? {
            Some(expr) => Schedule::from_str(&expr)
                .map(Some)
                .map_err(|e| SluiceError::Schedule(format!("{expr}: {e}"))),
            None => Ok(None),
        }
    }
}

/// Whether `trigger` should be polled at `now`.
///
/// Schedule-mode cron triggers follow their calendar. Everything else is due
/// once its effective interval has elapsed since the last poll. A schedule
/// that cannot be compiled is never due.
pub fn is_due(trigger: &Trigger, now: DateTime<Utc>) -> bool {
    if let TriggerConfig::Cron(cron @ CronTriggerConfig::Schedule { .. }) = &trigger.config {
        return match cron.schedule() {
            Ok(Some(schedule)) => is_cron_due(&schedule, now, trigger.last_polled_at),
            _ => false,
        };
    }

    match trigger.last_polled_at {
        None => true,
        Some(last) => {
            let interval = chrono::Duration::from_std(trigger.effective_interval())
                .unwrap_or_else(|_| chrono::Duration::days(36_500));
            last.checked_add_signed(interval).is_some_and(|next| now >= next)
        }
    }
}
