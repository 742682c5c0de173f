//! Trigger evaluation.
//!
//! A [`TriggerChecker`] runs one evaluation pass over a trigger:
//!
//! 1. [`TriggerChecker::init`] loads the trigger, its last check, pending
//!    forced notifications and maintenance, and fixes the evaluation window.
//! 2. [`TriggerChecker::check`] fetches series, folds every new sample of every
//!    metric through the comparator, maps evaluation errors to a trigger
//!    state, and persists the new [`CheckData`] together with the events the
//!    pass produced.
//!
//! Evaluation conditions never escape `check`; only infrastructure errors do.

mod check;
mod event;
#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::config::CheckerSettings;
use crate::database::Database;
use crate::error::Result;
use crate::gating::{Gate, MuteReason};
use crate::maintenance::Maintenance;
use crate::metrics::CheckerMetrics;
use crate::remote::RemoteSource;
use crate::types::{CheckData, EventsBatch, NotificationEvent, ScoreWeights, Trigger, now_timestamp};

/// The evaluation window always covers at least this many seconds.
pub const MIN_WINDOW_SECS: i64 = 600;

/// Delay before a child trigger's forced notification becomes active.
pub const CHILD_FORCE_DELAY_SECS: i64 = 120;

/// Message of the trigger state for unexpected evaluation errors.
pub const EXCEPTION_MESSAGE: &str = "Trigger evaluation exception";

/// Forced notifications are cleared in chunks of this size.
const FORCED_DELETE_CHUNK: usize = 100;

/// Everything a check needs besides the trigger itself.
#[derive(Clone)]
pub struct CheckContext {
    /// Storage.
    pub db: Arc<dyn Database>,
    /// Render endpoint for remote triggers.
    pub remote: Option<Arc<dyn RemoteSource>>,
    /// Checker settings.
    pub settings: CheckerSettings,
    /// Shared counters.
    pub metrics: Arc<CheckerMetrics>,
    /// Score weights.
    pub weights: ScoreWeights,
}

impl CheckContext {
    /// Creates a context with default settings and no remote source.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            remote: None,
            settings: CheckerSettings::default(),
            metrics: Arc::new(CheckerMetrics::new()),
            weights: ScoreWeights::STANDARD,
        }
    }

    /// Sets the remote source.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the checker settings.
    #[must_use]
    pub fn with_settings(mut self, settings: CheckerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the shared counters.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<CheckerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the score weights.
    #[must_use]
    pub const fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }
}

impl std::fmt::Debug for CheckContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckContext")
            .field("remote", &self.remote.is_some())
            .field("settings", &self.settings)
            .field("weights", &self.weights)
            .finish_non_exhaustive()
    }
}

/// One evaluation pass over a trigger.
#[derive(Debug)]
pub struct TriggerChecker<'a> {
    ctx: &'a CheckContext,
    trigger: Trigger,
    last_check: CheckData,
    maintenance: Maintenance,
    /// Metrics with an active forced notification not yet consumed.
    forced: HashSet<String>,
    consumed_forced: BTreeSet<String>,
    from: i64,
    until: i64,
    batch: EventsBatch,
    events: Vec<NotificationEvent>,
}

impl<'a> TriggerChecker<'a> {
    /// Prepares a check of `trigger_id` up to now.
    ///
    /// # Errors
    ///
    /// Returns `CheckerError::TriggerNotExists` if the trigger was deleted,
    /// or any storage error.
    pub fn init(ctx: &'a CheckContext, trigger_id: &str) -> Result<Self> {
        Self::init_at(ctx, trigger_id, now_timestamp())
    }

    /// Prepares a check of `trigger_id` up to `until`.
    ///
    /// # Errors
    ///
    /// Returns `CheckerError::TriggerNotExists` if the trigger was deleted,
    /// or any storage error.
    pub fn init_at(ctx: &'a CheckContext, trigger_id: &str, until: i64) -> Result<Self> {
        let trigger = ctx.db.get_trigger(trigger_id)?;
        let last_check = ctx.db.get_or_create_trigger_last_check(trigger_id, until)?;
        let forced = ctx
            .db
            .get_trigger_forced_notifications(trigger_id)?
            .into_iter()
            .filter(|(_, ts)| *ts <= until)
            .map(|(metric, _)| metric)
            .collect();
        let maintenance = ctx.db.get_maintenance(trigger_id)?;

        let window = trigger.ttl.max(MIN_WINDOW_SECS) + trigger.pending_interval;
        let from = (until - window).min(last_check.timestamp);

        debug!(trigger_id = %trigger_id, from, until, "initialized trigger check");

        Ok(Self {
            ctx,
            trigger,
            last_check,
            maintenance,
            forced,
            consumed_forced: BTreeSet::new(),
            from,
            until,
            batch: EventsBatch::new(until),
            events: Vec::new(),
        })
    }

    /// Returns the trigger being checked.
    #[must_use]
    pub const fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Returns the start of the evaluation window.
    #[must_use]
    pub const fn from(&self) -> i64 {
        self.from
    }

    /// Returns the end of the evaluation window.
    #[must_use]
    pub const fn until(&self) -> i64 {
        self.until
    }

    fn muted(&self, ts: i64, metric: &str) -> Result<Option<MuteReason>> {
        Gate::new(self.ctx.db.as_ref(), &self.trigger, &self.maintenance).check(ts, metric)
    }
}
