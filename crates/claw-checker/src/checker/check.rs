use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use super::{EXCEPTION_MESSAGE, FORCED_DELETE_CHUNK, TriggerChecker};
use crate::error::{CheckerError, EvaluationError, Result};
use crate::expression::StateEvaluator;
use crate::timeseries::{self, TimeSeries, TriggerTimeSeries};
use crate::types::{CheckData, MetricState, State, TtlState, WILDCARD_METRIC};

/// Outcome of the staleness check of one metric.
enum Staleness {
    Fresh,
    Delete,
    Stale(MetricState),
}

impl TriggerChecker<'_> {
    /// Runs the evaluation pass and persists the result.
    ///
    /// Evaluation conditions are absorbed into the trigger state.
    ///
    /// # Errors
    ///
    /// Returns infrastructure errors, including `CheckerError::TriggerNotExists`
    /// if the trigger was deleted during the pass.
    pub fn check(&mut self) -> Result<()> {
        if let Some(reason) = self.muted(self.until, WILDCARD_METRIC)? {
            debug!(trigger_id = %self.trigger.id, code = reason.code(), "trigger check muted");
            self.ctx.metrics.muted();
            return Ok(());
        }

        let mut check = self.last_check.next(self.until);
        let outcome = self.check_metrics(&mut check);
        self.handle_trigger_check(&mut check, outcome)?;

        check.update_score(&self.ctx.weights);
        self.ctx.db.set_trigger_last_check(&self.trigger.id, &check)?;

        for event in &self.events {
            self.ctx.db.push_notification_event(event)?;
        }
        self.delete_consumed_forced()?;
        self.clean_maintenance()?;

        self.ctx.metrics.events_sent(self.events.len());
        self.ctx.metrics.check_done();
        info!(
            trigger_id = %self.trigger.id,
            state = %check.state,
            score = check.score,
            metrics = check.metrics.len(),
            events = self.events.len(),
            "trigger checked"
        );
        Ok(())
    }

    fn check_metrics(&mut self, check: &mut CheckData) -> Result<()> {
        let series = self.fetch_series()?;
        if series.main.is_empty() {
            return Err(EvaluationError::NoTimeSeries.into());
        }
        if series.has_only_wildcards() {
            return Err(EvaluationError::OnlyWildcards.into());
        }
        let evaluator = StateEvaluator::from_trigger(&self.trigger)?;

        let mut seen = HashSet::new();
        let mut skipped = HashSet::new();
        let mut duplicates = Vec::new();

        for main in &series.main {
            if main.wildcard {
                continue;
            }
            if !seen.insert(main.name.clone()) {
                warn!(trigger_id = %self.trigger.id, metric = %main.name, "duplicate series name");
                duplicates.push(main.name.clone());
                continue;
            }
            if let Some(reason) = self.muted(self.until, &main.name)? {
                debug!(trigger_id = %self.trigger.id, metric = %main.name, code = reason.code(), "metric check muted");
                self.ctx.metrics.muted();
                skipped.insert(main.name.clone());
                continue;
            }

            let last = check.metrics.get(&main.name).cloned().unwrap_or_else(|| {
                MetricState::new_empty(self.from, self.until, self.trigger.mute_new_metrics)
            });
            let state = self.step_metric(&main.name, main, &series, last, &evaluator)?;
            check.metrics.insert(main.name.clone(), state);
        }

        let names: Vec<String> = check.metrics.keys().cloned().collect();
        for name in names {
            if skipped.contains(&name) {
                continue;
            }
            if !seen.contains(&name) && self.muted(self.until, &name)?.is_some() {
                continue;
            }
            let Some(last) = check.metrics.get(&name).cloned() else {
                continue;
            };
            match self.check_for_no_data(&last) {
                Staleness::Fresh => {}
                Staleness::Delete => {
                    debug!(trigger_id = %self.trigger.id, metric = %name, "removing stale metric");
                    check.metrics.remove(&name);
                }
                Staleness::Stale(candidate) => {
                    let state = self.compare_metric(&name, candidate, &last)?;
                    check.metrics.insert(name.clone(), state);
                }
            }
            self.release_forced(&name);
        }

        if !duplicates.is_empty() {
            return Err(EvaluationError::SameSeriesNames { names: duplicates }.into());
        }
        Ok(())
    }

    /// Folds every sample after the checkpoint into the metric state.
    fn step_metric(
        &mut self,
        name: &str,
        series: &TimeSeries,
        all: &TriggerTimeSeries,
        last: MetricState,
        evaluator: &StateEvaluator,
    ) -> Result<MetricState> {
        let checkpoint = (last.timestamp - self.ctx.settings.check_point_gap_secs).max(last.event_timestamp);
        let end = self.until + series.step_time;
        let mut current = last;

        for ts in series.timestamps() {
            if ts >= end {
                break;
            }
            if ts <= checkpoint {
                continue;
            }
            let Some(value) = series.value_at(ts) else {
                continue;
            };
            let Some(additional) = all.additional_values(ts) else {
                continue;
            };
            let state = evaluator.evaluate(value, &additional, current.state)?;
            let candidate = MetricState {
                state,
                timestamp: ts,
                value: Some(value),
                suppressed: current.suppressed,
                ..MetricState::default()
            };
            current = self.compare_metric(name, candidate, &current)?;
        }

        current.maintenance = self.maintenance.get(name, self.until).1;
        Ok(current)
    }

    fn check_for_no_data(&self, last: &MetricState) -> Staleness {
        let ttl = self.trigger.ttl;
        if ttl == 0 || last.timestamp + ttl >= self.last_check.timestamp {
            return Staleness::Fresh;
        }
        let ttl_state = self.trigger.ttl_state();
        if ttl_state == TtlState::Del && last.event_timestamp != 0 {
            return Staleness::Delete;
        }
        Staleness::Stale(MetricState {
            state: ttl_state.to_metric_state(),
            timestamp: self.last_check.timestamp,
            is_no_data: true,
            suppressed: last.suppressed,
            ..MetricState::default()
        })
    }

    fn fetch_series(&self) -> Result<TriggerTimeSeries> {
        if self.trigger.is_remote {
            let remote = self.ctx.remote.as_deref().ok_or_else(|| {
                EvaluationError::Remote("remote source is not configured".to_string())
            })?;
            return Ok(timeseries::fetch_remote(remote, &self.trigger, self.from, self.until)?);
        }

        let local = timeseries::fetch_local(self.ctx.db.as_ref(), &self.trigger, self.from, self.until)?;
        if !local.metrics.is_empty() {
            self.ctx
                .db
                .remove_metrics_values(&local.metrics, self.until - self.ctx.settings.metrics_ttl_secs)?;
        }
        Ok(local.series)
    }

    /// Maps the outcome of metric processing to the trigger state.
    fn handle_trigger_check(&mut self, check: &mut CheckData, outcome: Result<()>) -> Result<()> {
        let err = match outcome {
            Ok(()) => {
                check.state = State::Ok;
                check.message = None;
                check.last_successful_check_timestamp = self.until;
                return self.compare_trigger(check);
            }
            Err(CheckerError::Evaluation(err)) => err,
            Err(other) => return Err(other),
        };

        let ttl_state = self.trigger.ttl_state();
        match &err {
            EvaluationError::NoTimeSeries => {
                debug!(trigger_id = %self.trigger.id, "trigger has no series");
                check.message = Some(err.to_string());
                if self.trigger.ttl == 0 || ttl_state == TtlState::Del {
                    return Ok(());
                }
                check.state = ttl_state.to_trigger_state();
            }
            EvaluationError::OnlyWildcards => {
                debug!(trigger_id = %self.trigger.id, "trigger has only wildcard series");
                if check.metrics.is_empty() && !matches!(ttl_state, TtlState::Ok | TtlState::Del) {
                    check.state = State::NoData;
                    check.message = Some(err.to_string());
                    if self.trigger.ttl == 0 {
                        return Ok(());
                    }
                }
            }
            EvaluationError::UnknownFunction(_)
            | EvaluationError::InvalidTarget { .. }
            | EvaluationError::Expression(_)
            | EvaluationError::SameSeriesNames { .. }
            | EvaluationError::WrongTriggerTarget(_) => {
                warn!(trigger_id = %self.trigger.id, error = %err, "trigger evaluation failed");
                check.state = State::Exception;
                check.message = Some(err.to_string());
            }
            EvaluationError::Remote(_) => {
                error!(trigger_id = %self.trigger.id, error = %err, "trigger evaluation exception");
                self.ctx.metrics.evaluation_exception();
                check.state = State::Exception;
                check.message = Some(EXCEPTION_MESSAGE.to_string());
            }
        }
        self.compare_trigger(check)
    }

    fn release_forced(&mut self, metric: &str) {
        if self.forced.remove(metric) {
            self.consumed_forced.insert(metric.to_string());
        }
    }

    fn delete_consumed_forced(&mut self) -> Result<()> {
        let consumed: Vec<String> = std::mem::take(&mut self.consumed_forced).into_iter().collect();
        for chunk in consumed.chunks(FORCED_DELETE_CHUNK) {
            self.ctx
                .db
                .delete_trigger_forced_notifications(&self.trigger.id, chunk)?;
        }
        Ok(())
    }

    fn clean_maintenance(&self) -> Result<()> {
        let mut cleaned = self.maintenance.clone();
        cleaned.clean(self.from);
        if cleaned != self.maintenance {
            self.ctx.db.set_maintenance(&self.trigger.id, &cleaned)?;
        }
        Ok(())
    }
}
