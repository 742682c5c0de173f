//! Storage wrapper with injectable faults for tests.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::database::{Database, Locker};
use crate::error::{CheckerError, Result};
use crate::maintenance::Maintenance;
use crate::memory::MemoryDatabase;
use crate::types::{CheckData, MetricValue, NotificationEvent, Trigger};

/// A [`MemoryDatabase`] that can panic on load or fail on persist.
#[derive(Debug, Default)]
pub struct FaultyDatabase {
    inner: MemoryDatabase,
    panic_on_load: Option<String>,
    fail_persist: AtomicBool,
}

impl FaultyDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics whenever `trigger_id` is loaded.
    pub fn panic_on_load(mut self, trigger_id: &str) -> Self {
        self.panic_on_load = Some(trigger_id.to_string());
        self
    }

    /// Makes every check persist fail with a storage error.
    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }
}

impl Deref for FaultyDatabase {
    type Target = MemoryDatabase;

    fn deref(&self) -> &MemoryDatabase {
        &self.inner
    }
}

#[allow(clippy::panic)]
impl Database for FaultyDatabase {
    fn get_trigger(&self, trigger_id: &str) -> Result<Trigger> {
        if self.panic_on_load.as_deref() == Some(trigger_id) {
            panic!("trigger {trigger_id} is corrupt");
        }
        self.inner.get_trigger(trigger_id)
    }

    fn get_local_trigger_ids(&self) -> Result<Vec<String>> {
        self.inner.get_local_trigger_ids()
    }

    fn get_remote_trigger_ids(&self) -> Result<Vec<String>> {
        self.inner.get_remote_trigger_ids()
    }

    fn get_pattern_triggers(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner.get_pattern_triggers(pattern)
    }

    fn get_or_create_trigger_last_check(&self, trigger_id: &str, now: i64) -> Result<CheckData> {
        self.inner.get_or_create_trigger_last_check(trigger_id, now)
    }

    fn set_trigger_last_check(&self, trigger_id: &str, check: &CheckData) -> Result<()> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(CheckerError::Storage {
                reason: "write rejected".to_string(),
            });
        }
        self.inner.set_trigger_last_check(trigger_id, check)
    }

    fn get_trigger_forced_notifications(&self, trigger_id: &str) -> Result<HashMap<String, i64>> {
        self.inner.get_trigger_forced_notifications(trigger_id)
    }

    fn add_trigger_forced_notification(
        &self,
        trigger_id: &str,
        metrics: &[String],
        timestamp: i64,
    ) -> Result<()> {
        self.inner
            .add_trigger_forced_notification(trigger_id, metrics, timestamp)
    }

    fn delete_trigger_forced_notifications(&self, trigger_id: &str, metrics: &[String]) -> Result<()> {
        self.inner.delete_trigger_forced_notifications(trigger_id, metrics)
    }

    fn get_pattern_metrics(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner.get_pattern_metrics(pattern)
    }

    fn get_metric_retention(&self, metric: &str) -> Result<i64> {
        self.inner.get_metric_retention(metric)
    }

    fn get_metrics_values(
        &self,
        metrics: &[String],
        from: i64,
        until: i64,
    ) -> Result<HashMap<String, Vec<MetricValue>>> {
        self.inner.get_metrics_values(metrics, from, until)
    }

    fn remove_metrics_values(&self, metrics: &[String], to_time: i64) -> Result<()> {
        self.inner.remove_metrics_values(metrics, to_time)
    }

    fn get_maintenance(&self, trigger_id: &str) -> Result<Maintenance> {
        self.inner.get_maintenance(trigger_id)
    }

    fn set_maintenance(&self, trigger_id: &str, maintenance: &Maintenance) -> Result<()> {
        self.inner.set_maintenance(trigger_id, maintenance)
    }

    fn push_notification_event(&self, event: &NotificationEvent) -> Result<()> {
        self.inner.push_notification_event(event)
    }

    fn take_notification_events(&self, limit: usize) -> Result<Vec<NotificationEvent>> {
        self.inner.take_notification_events(limit)
    }

    fn get_child_events(&self, trigger_id: &str, metric: &str) -> Result<HashMap<String, Vec<String>>> {
        self.inner.get_child_events(trigger_id, metric)
    }

    fn is_metric_silenced(&self, metric: &str, ts: i64) -> Result<bool> {
        self.inner.is_metric_silenced(metric, ts)
    }

    fn is_tag_silenced(&self, tag: &str, ts: i64) -> Result<bool> {
        self.inner.is_tag_silenced(tag, ts)
    }

    fn get_tag_names(&self) -> Result<Vec<String>> {
        self.inner.get_tag_names()
    }

    fn get_tag_trigger_ids(&self, tag: &str) -> Result<Vec<String>> {
        self.inner.get_tag_trigger_ids(tag)
    }

    fn get_tag_subscription_ids(&self, tag: &str) -> Result<Vec<String>> {
        self.inner.get_tag_subscription_ids(tag)
    }

    fn remove_tag(&self, tag: &str) -> Result<()> {
        self.inner.remove_tag(tag)
    }
}

impl Locker for FaultyDatabase {
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.try_acquire(key, ttl)
    }

    fn release(&self, key: &str) -> Result<()> {
        self.inner.release(key)
    }
}
