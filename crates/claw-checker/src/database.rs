//! Storage capabilities consumed by the checker.
//!
//! The checker never talks to a concrete backend. [`Database`] groups the
//! storage operations a check needs and [`Locker`] provides the distributed
//! locks used by the scheduler. Implementations must be safe for concurrent
//! use by many trigger checks at once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{CheckerError, Result};
use crate::maintenance::Maintenance;
use crate::types::{CheckData, MetricValue, NotificationEvent, Trigger};

/// Storage operations used by the trigger checker.
pub trait Database: Send + Sync {
    // ============ Triggers ============

    /// Loads a trigger.
    ///
    /// Returns `CheckerError::TriggerNotExists` if it was deleted.
    fn get_trigger(&self, trigger_id: &str) -> Result<Trigger>;

    /// Returns the IDs of all triggers fed by the local metric store.
    fn get_local_trigger_ids(&self) -> Result<Vec<String>>;

    /// Returns the IDs of all triggers fed by the remote render endpoint.
    fn get_remote_trigger_ids(&self) -> Result<Vec<String>>;

    /// Returns the IDs of triggers whose targets use `pattern`.
    fn get_pattern_triggers(&self, pattern: &str) -> Result<Vec<String>>;

    // ============ Check State ============

    /// Loads the last check, creating a fresh `NODATA` one stamped `now` if none exists.
    ///
    /// Must fail with `CheckerError::TriggerNotExists` if the trigger was deleted.
    fn get_or_create_trigger_last_check(&self, trigger_id: &str, now: i64) -> Result<CheckData>;

    /// Persists a check.
    ///
    /// Must fail with `CheckerError::TriggerNotExists` if the trigger was deleted.
    fn set_trigger_last_check(&self, trigger_id: &str, check: &CheckData) -> Result<()>;

    /// Returns pending forced notifications as `metric -> not-before timestamp`.
    fn get_trigger_forced_notifications(&self, trigger_id: &str) -> Result<HashMap<String, i64>>;

    /// Schedules forced notifications for metrics of a trigger.
    fn add_trigger_forced_notification(
        &self,
        trigger_id: &str,
        metrics: &[String],
        timestamp: i64,
    ) -> Result<()>;

    /// Clears forced notifications for metrics of a trigger.
    fn delete_trigger_forced_notifications(&self, trigger_id: &str, metrics: &[String]) -> Result<()>;

    // ============ Series Data ============

    /// Resolves a pattern to metric names.
    fn get_pattern_metrics(&self, pattern: &str) -> Result<Vec<String>>;

    /// Returns the retention step of a metric in seconds.
    fn get_metric_retention(&self, metric: &str) -> Result<i64>;

    /// Fetches samples with `from <= timestamp <= until` for several metrics.
    fn get_metrics_values(
        &self,
        metrics: &[String],
        from: i64,
        until: i64,
    ) -> Result<HashMap<String, Vec<MetricValue>>>;

    /// Removes samples older than `to_time`.
    fn remove_metrics_values(&self, metrics: &[String], to_time: i64) -> Result<()>;

    // ============ Maintenance ============

    /// Loads the maintenance history of a trigger.
    fn get_maintenance(&self, trigger_id: &str) -> Result<Maintenance>;

    /// Stores the maintenance history of a trigger.
    fn set_maintenance(&self, trigger_id: &str, maintenance: &Maintenance) -> Result<()>;

    // ============ Events ============

    /// Appends a notification event.
    fn push_notification_event(&self, event: &NotificationEvent) -> Result<()>;

    /// Removes and returns up to `limit` of the oldest pushed events.
    fn take_notification_events(&self, limit: usize) -> Result<Vec<NotificationEvent>>;

    /// Returns child triggers registered on a parent metric as `child trigger -> metrics`.
    fn get_child_events(&self, trigger_id: &str, metric: &str) -> Result<HashMap<String, Vec<String>>>;

    // ============ Silencing ============

    /// Returns whether a metric is silenced at `ts`.
    fn is_metric_silenced(&self, metric: &str, ts: i64) -> Result<bool>;

    /// Returns whether a tag is silenced at `ts`.
    fn is_tag_silenced(&self, tag: &str, ts: i64) -> Result<bool>;

    // ============ Tags ============

    /// Returns all known tag names.
    fn get_tag_names(&self) -> Result<Vec<String>>;

    /// Returns the triggers carrying a tag.
    fn get_tag_trigger_ids(&self, tag: &str) -> Result<Vec<String>>;

    /// Returns the subscriptions referencing a tag.
    fn get_tag_subscription_ids(&self, tag: &str) -> Result<Vec<String>>;

    /// Removes a tag.
    fn remove_tag(&self, tag: &str) -> Result<()>;
}

/// Distributed locks with a time-to-live.
pub trait Locker: Send + Sync {
    /// Tries to take the lock once. Returns `false` if it is held elsewhere.
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Releases a lock.
    fn release(&self, key: &str) -> Result<()>;

    /// Takes the lock, retrying with exponential backoff until `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `CheckerError::Lock` if the lock is still held when the timeout expires.
    fn acquire(&self, key: &str, ttl: Duration, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(10);
        loop {
            if self.try_acquire(key, ttl)? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CheckerError::Lock {
                    key: key.to_string(),
                });
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(Duration::from_millis(500));
        }
    }
}
