//! Weekly schedules that limit when a trigger may send events.

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: i64 = 24 * 60;
const SECONDS_PER_DAY: i64 = 24 * 3600;

/// One day of the week in a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDay {
    /// Short day name (`Mon` .. `Sun`).
    pub name: String,
    /// Whether events are allowed on this day.
    pub enabled: bool,
}

/// A weekly time window in a fixed timezone offset.
///
/// Offsets are minutes. `timezone_offset` is subtracted from UTC to get
/// local time. When `end_offset < start_offset` the window wraps past
/// midnight into the following day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleData {
    /// Seven entries, Monday first.
    pub days: Vec<ScheduleDay>,
    /// Minutes to subtract from UTC to get local time.
    #[serde(default)]
    pub timezone_offset: i64,
    /// Window start, minutes after local midnight.
    #[serde(default)]
    pub start_offset: i64,
    /// Window end, minutes after local midnight.
    #[serde(default = "default_end_offset")]
    pub end_offset: i64,
}

const fn default_end_offset() -> i64 {
    MINUTES_PER_DAY - 1
}

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

impl Default for ScheduleData {
    fn default() -> Self {
        Self {
            days: DAY_NAMES
                .iter()
                .map(|name| ScheduleDay {
                    name: (*name).to_string(),
                    enabled: true,
                })
                .collect(),
            timezone_offset: 0,
            start_offset: 0,
            end_offset: default_end_offset(),
        }
    }
}

impl ScheduleData {
    /// Creates a schedule enabled on every day for the given window.
    #[must_use]
    pub fn window(start_offset: i64, end_offset: i64) -> Self {
        Self {
            start_offset,
            end_offset,
            ..Self::default()
        }
    }

    /// Sets the timezone offset in minutes.
    #[must_use]
    pub const fn with_timezone_offset(mut self, minutes: i64) -> Self {
        self.timezone_offset = minutes;
        self
    }

    /// Enables or disables a weekday (0 = Monday).
    #[must_use]
    pub fn with_day(mut self, weekday: usize, enabled: bool) -> Self {
        if let Some(day) = self.days.get_mut(weekday) {
            day.enabled = enabled;
        }
        self
    }

    fn day_enabled(&self, weekday: usize) -> bool {
        self.days.get(weekday).is_some_and(|d| d.enabled)
    }

    /// Returns whether the schedule allows events at the given Unix timestamp.
    #[must_use]
    pub fn allows(&self, ts: i64) -> bool {
        let local = ts - ts.rem_euclid(60) - self.timezone_offset * 60;
        let Some(date) = DateTime::from_timestamp(local, 0) else {
            return false;
        };
        let weekday = date.weekday().num_days_from_monday() as usize;
        let previous_weekday = (weekday + 6) % 7;
        let minute = local.rem_euclid(SECONDS_PER_DAY) / 60;

        if self.start_offset <= self.end_offset {
            self.day_enabled(weekday) && minute >= self.start_offset && minute <= self.end_offset
        } else {
            (self.day_enabled(weekday) && minute >= self.start_offset)
                || (self.day_enabled(previous_weekday) && minute <= self.end_offset)
        }
    }
}
