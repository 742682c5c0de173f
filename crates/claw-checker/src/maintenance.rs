//! Maintenance windows for metrics and whole triggers.
//!
//! Each key (a metric name or [`WILDCARD_METRIC`](crate::types::WILDCARD_METRIC))
//! keeps its history of `[from, until]` intervals sorted by `until`. A new
//! interval is appended only after the previous one has expired; adding while
//! an interval is still active extends it instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::now_timestamp;

/// One maintenance interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceInterval {
    /// Start of the interval.
    pub from: i64,
    /// End of the interval.
    pub until: i64,
}

/// Maintenance history of a trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Maintenance(HashMap<String, Vec<MaintenanceInterval>>);

impl Maintenance {
    /// Creates an empty maintenance history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts `key` under maintenance from now until `until`.
    pub fn add(&mut self, key: &str, until: i64) {
        self.add_at(key, now_timestamp(), until);
    }

    /// Puts `key` under maintenance from `from` until `until`.
    pub fn add_at(&mut self, key: &str, from: i64, until: i64) {
        let intervals = self.0.entry(key.to_string()).or_default();
        match intervals.last_mut() {
            Some(last) if last.until > from => last.until = until,
            _ => intervals.push(MaintenanceInterval { from, until }),
        }
    }

    /// Ends the current maintenance of `key` now.
    pub fn del(&mut self, key: &str) {
        self.del_at(key, now_timestamp());
    }

    /// Ends the current maintenance of `key` at `now`.
    pub fn del_at(&mut self, key: &str, now: i64) {
        if let Some(last) = self.0.get_mut(key).and_then(|i| i.last_mut()) {
            if last.until > now {
                last.until = now;
            }
        }
    }

    /// Returns whether `key` was under maintenance at `ts`, and until when.
    #[must_use]
    pub fn get(&self, key: &str, ts: i64) -> (bool, i64) {
        let Some(intervals) = self.0.get(key) else {
            return (false, 0);
        };
        let index = intervals.partition_point(|interval| interval.until < ts);
        match intervals.get(index) {
            Some(interval) if interval.from <= ts => (true, interval.until),
            _ => (false, 0),
        }
    }

    /// Drops intervals that ended before `horizon`.
    pub fn clean(&mut self, horizon: i64) {
        for intervals in self.0.values_mut() {
            intervals.retain(|interval| interval.until >= horizon);
        }
        self.0.retain(|_, intervals| !intervals.is_empty());
    }

    /// Returns true if no key has any interval.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
