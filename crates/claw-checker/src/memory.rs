//! In-memory implementation of the storage capabilities.
//!
//! [`MemoryDatabase`] keeps triggers, check state, samples and everything else
//! the checker reads behind `parking_lot` locks. It backs single-node
//! deployments and every test in this crate. A JSON snapshot can seed it at
//! startup.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::database::{Database, Locker};
use crate::error::{CheckerError, Result};
use crate::maintenance::Maintenance;
use crate::pattern::MetricPattern;
use crate::target;
use crate::types::{CheckData, MetricValue, NotificationEvent, Trigger};

/// Retention step assumed for metrics without an explicit one.
pub const DEFAULT_RETENTION: i64 = 60;

/// Pushed events kept until drained; older ones are dropped first.
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
struct Silence {
    pattern: MetricPattern,
    until: i64,
}

impl Silence {
    fn covers(&self, name: &str, ts: i64) -> bool {
        ts <= self.until && self.pattern.matches(name)
    }
}

#[derive(Debug)]
struct Inner {
    triggers: HashMap<String, Trigger>,
    pattern_index: HashMap<String, BTreeSet<String>>,
    checks: HashMap<String, CheckData>,
    forced: HashMap<String, HashMap<String, i64>>,
    samples: HashMap<String, Vec<MetricValue>>,
    retentions: HashMap<String, i64>,
    maintenance: HashMap<String, Maintenance>,
    events: VecDeque<NotificationEvent>,
    event_capacity: usize,
    dropped_events: u64,
    children: HashMap<(String, String), HashMap<String, Vec<String>>>,
    metric_silences: Vec<Silence>,
    tag_silences: Vec<Silence>,
    tags: BTreeSet<String>,
    subscriptions: HashMap<String, Vec<String>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            triggers: HashMap::new(),
            pattern_index: HashMap::new(),
            checks: HashMap::new(),
            forced: HashMap::new(),
            samples: HashMap::new(),
            retentions: HashMap::new(),
            maintenance: HashMap::new(),
            events: VecDeque::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            dropped_events: 0,
            children: HashMap::new(),
            metric_silences: Vec::new(),
            tag_silences: Vec::new(),
            tags: BTreeSet::new(),
            subscriptions: HashMap::new(),
        }
    }
}

impl Inner {
    fn unindex(&mut self, trigger_id: &str) {
        for ids in self.pattern_index.values_mut() {
            ids.remove(trigger_id);
        }
        self.pattern_index.retain(|_, ids| !ids.is_empty());
    }
}

/// Thread-safe in-memory storage.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    inner: RwLock<Inner>,
    locks: Mutex<HashMap<String, Instant>>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of pushed events kept until drained.
    #[must_use]
    pub fn with_event_capacity(self, capacity: usize) -> Self {
        {
            let mut inner = self.inner.write();
            inner.event_capacity = capacity.max(1);
            while inner.events.len() > inner.event_capacity {
                inner.events.pop_front();
                inner.dropped_events += 1;
            }
        }
        self
    }

    // ============ Administration ============

    /// Stores a trigger and indexes the patterns its targets read.
    pub fn save_trigger(&self, trigger: Trigger) {
        let mut inner = self.inner.write();
        inner.unindex(&trigger.id);
        if !trigger.is_remote {
            for pattern in trigger.targets.iter().flat_map(|t| target::extract_patterns(t)) {
                inner
                    .pattern_index
                    .entry(pattern)
                    .or_default()
                    .insert(trigger.id.clone());
            }
        }
        inner.tags.extend(trigger.tags.iter().cloned());
        debug!(trigger_id = %trigger.id, "saved trigger");
        inner.triggers.insert(trigger.id.clone(), trigger);
    }

    /// Deletes a trigger together with its check state.
    pub fn delete_trigger(&self, trigger_id: &str) {
        let mut inner = self.inner.write();
        inner.unindex(trigger_id);
        inner.triggers.remove(trigger_id);
        inner.checks.remove(trigger_id);
        inner.forced.remove(trigger_id);
        inner.maintenance.remove(trigger_id);
    }

    /// Sets the retention step of a metric in seconds.
    pub fn set_metric_retention(&self, metric: &str, retention: i64) {
        self.inner
            .write()
            .retentions
            .insert(metric.to_string(), retention.max(1));
    }

    /// Stores a sample, rounding it to the metric's retention step.
    pub fn add_metric_value(&self, metric: &str, timestamp: i64, value: f64) {
        self.add_metric_values(metric, &[(timestamp, value)]);
    }

    /// Stores several samples of one metric.
    pub fn add_metric_values(&self, metric: &str, values: &[(i64, f64)]) {
        let mut inner = self.inner.write();
        let retention = inner
            .retentions
            .get(metric)
            .copied()
            .unwrap_or(DEFAULT_RETENTION);
        let samples = inner.samples.entry(metric.to_string()).or_default();
        for &(timestamp, value) in values {
            let sample = MetricValue::new(timestamp, value, retention);
            match samples.binary_search_by_key(&sample.retention_timestamp, |s| s.retention_timestamp) {
                Ok(pos) => samples[pos] = sample,
                Err(pos) => samples.insert(pos, sample),
            }
        }
    }

    /// Silences metrics matching `pattern` until `until`.
    ///
    /// # Errors
    ///
    /// Returns `CheckerError::Storage` if the pattern is malformed.
    pub fn silence_metric(&self, pattern: &str, until: i64) -> Result<()> {
        let silence = compile_silence(pattern, until)?;
        self.inner.write().metric_silences.push(silence);
        Ok(())
    }

    /// Silences tags matching `pattern` until `until`.
    ///
    /// # Errors
    ///
    /// Returns `CheckerError::Storage` if the pattern is malformed.
    pub fn silence_tag(&self, pattern: &str, until: i64) -> Result<()> {
        let silence = compile_silence(pattern, until)?;
        self.inner.write().tag_silences.push(silence);
        Ok(())
    }

    /// Registers `child` (with its metrics) as dependent on `parent`'s `metric`.
    pub fn add_child_event(&self, parent: &str, metric: &str, child: &str, child_metrics: &[String]) {
        self.inner
            .write()
            .children
            .entry((parent.to_string(), metric.to_string()))
            .or_default()
            .entry(child.to_string())
            .or_default()
            .extend(child_metrics.iter().cloned());
    }

    /// Stores a subscription on a set of tags.
    pub fn save_subscription(&self, id: &str, tags: Vec<String>) {
        let mut inner = self.inner.write();
        inner.tags.extend(tags.iter().cloned());
        inner.subscriptions.insert(id.to_string(), tags);
    }

    /// Registers a tag without any trigger or subscription.
    pub fn add_tag(&self, tag: &str) {
        self.inner.write().tags.insert(tag.to_string());
    }

    /// Returns every event pushed so far.
    #[must_use]
    pub fn pushed_events(&self) -> Vec<NotificationEvent> {
        self.inner.read().events.iter().cloned().collect()
    }

    /// Drains the pushed events.
    pub fn take_events(&self) -> Vec<NotificationEvent> {
        self.inner.write().events.drain(..).collect()
    }

    /// Returns how many pushed events are waiting to be drained.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.inner.read().events.len()
    }

    /// Returns how many events were dropped because the queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.inner.read().dropped_events
    }

    /// Returns the stored check of a trigger, if any.
    #[must_use]
    pub fn last_check(&self, trigger_id: &str) -> Option<CheckData> {
        self.inner.read().checks.get(trigger_id).cloned()
    }

    /// Stores a check without the trigger-existence guard.
    pub fn put_last_check(&self, trigger_id: &str, check: CheckData) {
        self.inner.write().checks.insert(trigger_id.to_string(), check);
    }

    /// Returns the stored samples of a metric.
    #[must_use]
    pub fn metric_values(&self, metric: &str) -> Vec<MetricValue> {
        self.inner
            .read()
            .samples
            .get(metric)
            .cloned()
            .unwrap_or_default()
    }

    // ============ Snapshot ============

    /// Builds a database from a JSON snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_snapshot_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let db = Self::from_snapshot_json(&content)?;
        info!(path = %path.as_ref().display(), "loaded database snapshot");
        Ok(db)
    }

    /// Builds a database from snapshot JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a silence pattern is invalid.
    pub fn from_snapshot_json(json: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        let db = Self::new();
        for series in snapshot.metrics {
            if let Some(retention) = series.retention {
                db.set_metric_retention(&series.name, retention);
            }
            db.add_metric_values(&series.name, &series.values);
        }
        for trigger in snapshot.triggers {
            db.save_trigger(trigger);
        }
        for (trigger_id, maintenance) in snapshot.maintenance {
            db.set_maintenance(&trigger_id, &maintenance)?;
        }
        for silence in snapshot.silences {
            if silence.tag {
                db.silence_tag(&silence.pattern, silence.until)?;
            } else {
                db.silence_metric(&silence.pattern, silence.until)?;
            }
        }
        for (id, tags) in snapshot.subscriptions {
            db.save_subscription(&id, tags);
        }
        Ok(db)
    }
}

fn compile_silence(pattern: &str, until: i64) -> Result<Silence> {
    let pattern = MetricPattern::new(pattern).ok_or_else(|| CheckerError::Storage {
        reason: format!("invalid silence pattern: {pattern}"),
    })?;
    Ok(Silence { pattern, until })
}

/// Seed data for [`MemoryDatabase`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Triggers to store.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Samples to store.
    #[serde(default)]
    pub metrics: Vec<SeriesSnapshot>,
    /// Maintenance per trigger.
    #[serde(default)]
    pub maintenance: HashMap<String, Maintenance>,
    /// Active silences.
    #[serde(default)]
    pub silences: Vec<SilenceSnapshot>,
    /// Subscriptions as `id -> tags`.
    #[serde(default)]
    pub subscriptions: HashMap<String, Vec<String>>,
}

/// Samples of one metric in a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    /// Metric name.
    pub name: String,
    /// Retention step in seconds.
    #[serde(default)]
    pub retention: Option<i64>,
    /// Samples as `[timestamp, value]` pairs.
    #[serde(default)]
    pub values: Vec<(i64, f64)>,
}

/// A silence in a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SilenceSnapshot {
    /// Metric or tag pattern.
    pub pattern: String,
    /// End of the silence.
    pub until: i64,
    /// Whether the pattern applies to tags instead of metrics.
    #[serde(default)]
    pub tag: bool,
}

impl Database for MemoryDatabase {
    fn get_trigger(&self, trigger_id: &str) -> Result<Trigger> {
        self.inner
            .read()
            .triggers
            .get(trigger_id)
            .cloned()
            .ok_or_else(|| CheckerError::TriggerNotExists {
                id: trigger_id.to_string(),
            })
    }

    fn get_local_trigger_ids(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner
            .triggers
            .values()
            .filter(|t| !t.is_remote)
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn get_remote_trigger_ids(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner
            .triggers
            .values()
            .filter(|t| t.is_remote)
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn get_pattern_triggers(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .pattern_index
            .get(pattern)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn get_or_create_trigger_last_check(&self, trigger_id: &str, now: i64) -> Result<CheckData> {
        let mut inner = self.inner.write();
        if !inner.triggers.contains_key(trigger_id) {
            return Err(CheckerError::TriggerNotExists {
                id: trigger_id.to_string(),
            });
        }
        Ok(inner
            .checks
            .entry(trigger_id.to_string())
            .or_insert_with(|| CheckData::new(now))
            .clone())
    }

    fn set_trigger_last_check(&self, trigger_id: &str, check: &CheckData) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.triggers.contains_key(trigger_id) {
            return Err(CheckerError::TriggerNotExists {
                id: trigger_id.to_string(),
            });
        }
        inner.checks.insert(trigger_id.to_string(), check.clone());
        Ok(())
    }

    fn get_trigger_forced_notifications(&self, trigger_id: &str) -> Result<HashMap<String, i64>> {
        Ok(self
            .inner
            .read()
            .forced
            .get(trigger_id)
            .cloned()
            .unwrap_or_default())
    }

    fn add_trigger_forced_notification(
        &self,
        trigger_id: &str,
        metrics: &[String],
        timestamp: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let forced = inner.forced.entry(trigger_id.to_string()).or_default();
        for metric in metrics {
            forced.insert(metric.clone(), timestamp);
        }
        Ok(())
    }

    fn delete_trigger_forced_notifications(&self, trigger_id: &str, metrics: &[String]) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(forced) = inner.forced.get_mut(trigger_id) {
            for metric in metrics {
                forced.remove(metric);
            }
            if forced.is_empty() {
                inner.forced.remove(trigger_id);
            }
        }
        Ok(())
    }

    fn get_pattern_metrics(&self, pattern: &str) -> Result<Vec<String>> {
        let Some(compiled) = MetricPattern::new(pattern) else {
            return Ok(Vec::new());
        };
        let inner = self.inner.read();
        let names: BTreeSet<String> = inner
            .samples
            .keys()
            .chain(inner.retentions.keys())
            .filter(|name| compiled.matches(name))
            .cloned()
            .collect();
        Ok(names.into_iter().collect())
    }

    fn get_metric_retention(&self, metric: &str) -> Result<i64> {
        Ok(self
            .inner
            .read()
            .retentions
            .get(metric)
            .copied()
            .unwrap_or(DEFAULT_RETENTION))
    }

    fn get_metrics_values(
        &self,
        metrics: &[String],
        from: i64,
        until: i64,
    ) -> Result<HashMap<String, Vec<MetricValue>>> {
        let inner = self.inner.read();
        Ok(metrics
            .iter()
            .map(|metric| {
                let values = inner
                    .samples
                    .get(metric)
                    .map(|samples| {
                        samples
                            .iter()
                            .filter(|s| s.timestamp >= from && s.timestamp <= until)
                            .copied()
                            .collect()
                    })
                    .unwrap_or_default();
                (metric.clone(), values)
            })
            .collect())
    }

    fn remove_metrics_values(&self, metrics: &[String], to_time: i64) -> Result<()> {
        let mut inner = self.inner.write();
        for metric in metrics {
            if let Some(samples) = inner.samples.get_mut(metric) {
                samples.retain(|s| s.timestamp >= to_time);
            }
        }
        Ok(())
    }

    fn get_maintenance(&self, trigger_id: &str) -> Result<Maintenance> {
        Ok(self
            .inner
            .read()
            .maintenance
            .get(trigger_id)
            .cloned()
            .unwrap_or_default())
    }

    fn set_maintenance(&self, trigger_id: &str, maintenance: &Maintenance) -> Result<()> {
        self.inner
            .write()
            .maintenance
            .insert(trigger_id.to_string(), maintenance.clone());
        Ok(())
    }

    fn push_notification_event(&self, event: &NotificationEvent) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.events.len() >= inner.event_capacity {
            if let Some(dropped) = inner.events.pop_front() {
                warn!(
                    trigger_id = %dropped.trigger_id,
                    metric = %dropped.metric,
                    capacity = inner.event_capacity,
                    "event queue full, dropping oldest event"
                );
            }
            inner.dropped_events += 1;
        }
        inner.events.push_back(event.clone());
        Ok(())
    }

    fn take_notification_events(&self, limit: usize) -> Result<Vec<NotificationEvent>> {
        let mut inner = self.inner.write();
        let count = limit.min(inner.events.len());
        Ok(inner.events.drain(..count).collect())
    }

    fn get_child_events(&self, trigger_id: &str, metric: &str) -> Result<HashMap<String, Vec<String>>> {
        Ok(self
            .inner
            .read()
            .children
            .get(&(trigger_id.to_string(), metric.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn is_metric_silenced(&self, metric: &str, ts: i64) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .metric_silences
            .iter()
            .any(|s| s.covers(metric, ts)))
    }

    fn is_tag_silenced(&self, tag: &str, ts: i64) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .tag_silences
            .iter()
            .any(|s| s.covers(tag, ts)))
    }

    fn get_tag_names(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().tags.iter().cloned().collect())
    }

    fn get_tag_trigger_ids(&self, tag: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner
            .triggers
            .values()
            .filter(|t| t.tags.iter().any(|t| t == tag))
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn get_tag_subscription_ids(&self, tag: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner
            .subscriptions
            .iter()
            .filter(|(_, tags)| tags.iter().any(|t| t == tag))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn remove_tag(&self, tag: &str) -> Result<()> {
        self.inner.write().tags.remove(tag);
        Ok(())
    }
}

impl Locker for MemoryDatabase {
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut locks = self.locks.lock();
        match locks.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                locks.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    fn release(&self, key: &str) -> Result<()> {
        self.locks.lock().remove(key);
        Ok(())
    }
}
