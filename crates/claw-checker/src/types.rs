//! Core types for the trigger checker.
//!
//! This module provides the data model shared by the checker and its storage:
//! - [`State`] / [`TtlState`]: state labels for triggers and metrics
//! - [`Trigger`]: an alerting rule over one or more targets
//! - [`CheckData`] / [`MetricState`]: the persisted result of the last check
//! - [`NotificationEvent`] / [`EventsBatch`]: facts emitted by a check
//! - [`ScoreWeights`]: the severity weights used to score a check

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::ScheduleData;

/// Metric key used for trigger-level maintenance, forced notifications and events.
pub const WILDCARD_METRIC: &str = "*";

/// The state label of a trigger or of one of its metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    /// Everything is fine.
    Ok,
    /// The warning threshold was crossed.
    Warn,
    /// The error threshold was crossed.
    Error,
    /// No data arrived within the TTL.
    #[default]
    #[serde(rename = "NODATA")]
    NoData,
    /// The trigger could not be evaluated.
    Exception,
}

impl State {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::NoData => "NODATA",
            Self::Exception => "EXCEPTION",
        }
    }

    /// Returns true for states that get a reminder when they persist.
    #[must_use]
    pub const fn is_bad(&self) -> bool {
        matches!(self, Self::Error | Self::NoData)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state assigned to a metric whose data went stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TtlState {
    /// Resolve the metric.
    Ok,
    /// Warn about the metric.
    Warn,
    /// Raise an error for the metric.
    Error,
    /// Mark the metric as having no data.
    #[default]
    #[serde(rename = "NODATA")]
    NoData,
    /// Delete the metric from the check.
    Del,
}

impl TtlState {
    /// Returns the state label a stale metric transitions to.
    ///
    /// `Del` first becomes `NODATA`; the metric is deleted on a later pass
    /// once that transition has been recorded.
    #[must_use]
    pub const fn to_metric_state(&self) -> State {
        match self {
            Self::Ok => State::Ok,
            Self::Warn => State::Warn,
            Self::Error => State::Error,
            Self::NoData | Self::Del => State::NoData,
        }
    }

    /// Returns the state label a trigger without any series transitions to.
    #[must_use]
    pub const fn to_trigger_state(&self) -> State {
        match self {
            Self::Ok | Self::Del => State::Ok,
            Self::Warn => State::Warn,
            Self::Error => State::Error,
            Self::NoData => State::NoData,
        }
    }
}

/// How a trigger turns values into state labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// Higher values are worse.
    #[default]
    Rising,
    /// Lower values are worse.
    Falling,
    /// A custom expression decides the state.
    Expression,
}

/// An alerting rule over one or more metric targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique identifier for the trigger.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Target expressions; the first one is the main target.
    pub targets: Vec<String>,
    /// How values are turned into states.
    #[serde(default)]
    pub trigger_type: TriggerType,
    /// Warning threshold.
    #[serde(default)]
    pub warn_value: Option<f64>,
    /// Error threshold.
    #[serde(default)]
    pub error_value: Option<f64>,
    /// Custom expression for [`TriggerType::Expression`].
    #[serde(default)]
    pub expression: Option<String>,
    /// Tags used for subscriptions and silencing.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Seconds without data before a metric is considered stale (0 disables).
    #[serde(default)]
    pub ttl: i64,
    /// State assigned to stale metrics.
    #[serde(default)]
    pub ttl_state: Option<TtlState>,
    /// Seconds a changed state must persist before it is confirmed.
    #[serde(default)]
    pub pending_interval: i64,
    /// Time windows in which events may be sent.
    #[serde(default)]
    pub schedule: Option<ScheduleData>,
    /// Triggers this trigger is derived from.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Whether series come from the remote render endpoint.
    #[serde(default)]
    pub is_remote: bool,
    /// Whether never-seen metrics start as OK instead of NODATA.
    #[serde(default)]
    pub mute_new_metrics: bool,
}

impl Trigger {
    /// Creates a rising threshold trigger with the given targets.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            targets,
            trigger_type: TriggerType::Rising,
            warn_value: None,
            error_value: None,
            expression: None,
            tags: Vec::new(),
            ttl: 0,
            ttl_state: None,
            pending_interval: 0,
            schedule: None,
            parents: Vec::new(),
            is_remote: false,
            mute_new_metrics: false,
        }
    }

    /// Returns the TTL state, defaulting to `NODATA`.
    #[must_use]
    pub fn ttl_state(&self) -> TtlState {
        self.ttl_state.unwrap_or_default()
    }
}

/// Per-metric slice of a check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricState {
    /// Current state label.
    pub state: State,
    /// Timestamp of the last value that produced this state.
    pub timestamp: i64,
    /// When the current state began.
    pub event_timestamp: i64,
    /// Last observed value.
    #[serde(default)]
    pub value: Option<f64>,
    /// A state change is waiting for the pending interval.
    #[serde(default)]
    pub is_pending: bool,
    /// The state was synthesised because data went stale.
    #[serde(default)]
    pub is_no_data: bool,
    /// The last event for this metric was a forced notification.
    #[serde(default)]
    pub is_forced: bool,
    /// The last event was muted.
    #[serde(default)]
    pub suppressed: bool,
    /// End of the active maintenance for this metric (0 when none).
    #[serde(default)]
    pub maintenance: i64,
}

impl MetricState {
    /// Creates the initial state for a metric seen for the first time.
    #[must_use]
    pub fn new_empty(empty_timestamp: i64, now: i64, mute_new_metrics: bool) -> Self {
        if mute_new_metrics {
            Self {
                state: State::Ok,
                timestamp: now,
                event_timestamp: now,
                ..Self::default()
            }
        } else {
            Self {
                state: State::NoData,
                timestamp: empty_timestamp,
                ..Self::default()
            }
        }
    }
}

/// Current check data schema version.
pub const CHECK_DATA_VERSION: u32 = 2;

/// The last known aggregate result of a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckData {
    /// Trigger-level state.
    pub state: State,
    /// Severity-weighted sum of all states.
    pub score: i64,
    /// When the check ran.
    pub timestamp: i64,
    /// When the current trigger-level state began.
    pub event_timestamp: i64,
    /// When the last check without evaluation errors ran.
    #[serde(default)]
    pub last_successful_check_timestamp: i64,
    /// A trigger-level state change is waiting for the pending interval.
    #[serde(default)]
    pub is_pending: bool,
    /// The last trigger-level event was muted.
    #[serde(default)]
    pub suppressed: bool,
    /// End of the active trigger-wide maintenance (0 when none).
    #[serde(default)]
    pub maintenance: i64,
    /// Explanation for the trigger-level state.
    #[serde(default)]
    pub message: Option<String>,
    /// Per-metric states keyed by series name.
    #[serde(default)]
    pub metrics: HashMap<String, MetricState>,
    /// Schema version.
    #[serde(default)]
    pub version: u32,
}

impl CheckData {
    /// Creates the check data for a trigger that has never been checked.
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            state: State::NoData,
            score: 0,
            timestamp: now,
            event_timestamp: 0,
            last_successful_check_timestamp: 0,
            is_pending: false,
            suppressed: false,
            maintenance: 0,
            message: None,
            metrics: HashMap::new(),
            version: CHECK_DATA_VERSION,
        }
    }

    /// Starts the next check from this one.
    #[must_use]
    pub fn next(&self, until: i64) -> Self {
        Self {
            timestamp: until,
            version: CHECK_DATA_VERSION,
            ..self.clone()
        }
    }

    /// Recomputes and stores the score.
    pub fn update_score(&mut self, weights: &ScoreWeights) -> i64 {
        self.score = weights.weight(self.state)
            + self
                .metrics
                .values()
                .map(|m| weights.weight(m.state))
                .sum::<i64>();
        self.score
    }
}

/// Severity weights used for scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Weight of `OK`.
    pub ok: i64,
    /// Weight of `WARN`.
    pub warn: i64,
    /// Weight of `ERROR`.
    pub error: i64,
    /// Weight of `NODATA`.
    pub no_data: i64,
    /// Weight of `EXCEPTION`.
    pub exception: i64,
}

impl ScoreWeights {
    /// The standard weight table.
    pub const STANDARD: Self = Self {
        ok: 0,
        warn: 1,
        error: 100,
        no_data: 0,
        exception: 100_000,
    };

    /// Returns the weight of a state.
    #[must_use]
    pub const fn weight(&self, state: State) -> i64 {
        match state {
            State::Ok => self.ok,
            State::Warn => self.warn,
            State::Error => self.error,
            State::NoData => self.no_data,
            State::Exception => self.exception,
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Groups the events produced by one evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsBatch {
    /// Random batch ID.
    pub id: String,
    /// When the batch was minted.
    pub time: i64,
}

impl EventsBatch {
    /// Mints a new batch.
    #[must_use]
    pub fn new(time: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time,
        }
    }
}

/// A state change (or reminder) emitted by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// The trigger that produced the event.
    pub trigger_id: String,
    /// The metric, or [`WILDCARD_METRIC`] for trigger-level events.
    pub metric: String,
    /// The new state.
    pub state: State,
    /// The previous state.
    pub old_state: State,
    /// The new value.
    pub value: Option<f64>,
    /// The previous value.
    pub old_value: Option<f64>,
    /// Timestamp of the sample that confirmed the state.
    pub timestamp: i64,
    /// When the previous state began.
    pub event_timestamp: i64,
    /// The event was forced by an inheritance cascade.
    pub is_force_sent: bool,
    /// The event describes the trigger rather than a metric.
    pub is_trigger_event: bool,
    /// Optional explanation.
    pub message: Option<String>,
    /// The batch this event belongs to.
    pub batch: Option<EventsBatch>,
}

/// A raw sample as kept by the metric store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Timestamp rounded down to the retention step.
    pub retention_timestamp: i64,
    /// Original timestamp.
    pub timestamp: i64,
    /// The value.
    pub value: f64,
}

impl MetricValue {
    /// Creates a sample, rounding the timestamp to the retention step.
    #[must_use]
    pub fn new(timestamp: i64, value: f64, retention: i64) -> Self {
        let retention_timestamp = if retention > 0 {
            timestamp - timestamp.rem_euclid(retention)
        } else {
            timestamp
        };
        Self {
            retention_timestamp,
            timestamp,
            value,
        }
    }
}

/// Returns the current Unix timestamp in seconds.
#[must_use]
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
