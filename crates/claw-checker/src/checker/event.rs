use tracing::{debug, info};

use super::{CHILD_FORCE_DELAY_SECS, TriggerChecker};
use crate::compare::{self, Observation, Verdict};
use crate::error::Result;
use crate::types::{CheckData, MetricState, NotificationEvent, State, WILDCARD_METRIC};

impl From<&MetricState> for Observation {
    fn from(state: &MetricState) -> Self {
        Self {
            state: state.state,
            timestamp: state.timestamp,
            event_timestamp: state.event_timestamp,
            is_pending: state.is_pending,
            suppressed: state.suppressed,
        }
    }
}

impl From<&CheckData> for Observation {
    fn from(check: &CheckData) -> Self {
        Self {
            state: check.state,
            timestamp: check.timestamp,
            event_timestamp: check.event_timestamp,
            is_pending: check.is_pending,
            suppressed: check.suppressed,
        }
    }
}

impl TriggerChecker<'_> {
    /// Folds a candidate state of `metric` into its previous state.
    ///
    /// Emits an event when the comparator confirms it and the metric is not
    /// muted at the candidate's timestamp; a muted event marks the state
    /// suppressed instead.
    pub(super) fn compare_metric(
        &mut self,
        metric: &str,
        candidate: MetricState,
        last: &MetricState,
    ) -> Result<MetricState> {
        let observed = Observation::from(last);
        let verdict = compare::compare(
            candidate.state,
            candidate.timestamp,
            &observed,
            self.trigger.pending_interval,
            self.forced.contains(metric),
        );
        let next = compare::advance(&observed, candidate.state, candidate.timestamp, verdict);

        // Synthetic no-data states keep the last real sample time.
        let timestamp = if candidate.is_no_data {
            last.timestamp
        } else {
            next.timestamp
        };
        let mut state = MetricState {
            state: next.state,
            timestamp,
            event_timestamp: next.event_timestamp,
            value: candidate.value,
            is_pending: next.is_pending,
            is_no_data: candidate.is_no_data,
            is_forced: last.is_forced,
            suppressed: next.suppressed,
            maintenance: last.maintenance,
        };

        let Verdict::Send { message, forced } = verdict else {
            return Ok(state);
        };
        state.is_forced = forced;
        if forced {
            self.forced.remove(metric);
            self.consumed_forced.insert(metric.to_string());
        }

        if let Some(reason) = self.muted(candidate.timestamp, metric)? {
            debug!(
                trigger_id = %self.trigger.id,
                metric = %metric,
                code = reason.code(),
                state = %candidate.state,
                "metric event muted"
            );
            self.ctx.metrics.muted();
            state.suppressed = true;
            return Ok(state);
        }

        let event = NotificationEvent {
            trigger_id: self.trigger.id.clone(),
            metric: metric.to_string(),
            state: candidate.state,
            old_state: last.state,
            value: candidate.value,
            old_value: last.value,
            timestamp: candidate.timestamp,
            event_timestamp: last.event_timestamp,
            is_force_sent: forced,
            is_trigger_event: false,
            message: message.map(str::to_string),
            batch: Some(self.batch.clone()),
        };
        info!(
            trigger_id = %self.trigger.id,
            metric = %metric,
            old_state = %last.state,
            state = %candidate.state,
            "metric state changed"
        );
        self.events.push(event);

        if candidate.state == State::Ok && !forced {
            self.schedule_children(metric)?;
        }
        Ok(state)
    }

    /// Folds the trigger-level state of `check` into the previous check.
    pub(super) fn compare_trigger(&mut self, check: &mut CheckData) -> Result<()> {
        let forced = self.forced.remove(WILDCARD_METRIC);
        if forced {
            self.consumed_forced.insert(WILDCARD_METRIC.to_string());
        }

        let observed = Observation::from(&self.last_check);
        let new_state = check.state;
        let verdict = compare::compare(
            new_state,
            self.until,
            &observed,
            self.trigger.pending_interval,
            forced,
        );
        let next = compare::advance(&observed, new_state, self.until, verdict);

        check.state = next.state;
        check.event_timestamp = next.event_timestamp;
        check.is_pending = next.is_pending;
        check.suppressed = next.suppressed;
        check.maintenance = self.maintenance.get(WILDCARD_METRIC, self.until).1;

        if let Verdict::Send { message, forced } = verdict {
            info!(
                trigger_id = %self.trigger.id,
                old_state = %observed.state,
                state = %new_state,
                "trigger state changed"
            );
            let event = NotificationEvent {
                trigger_id: self.trigger.id.clone(),
                metric: WILDCARD_METRIC.to_string(),
                state: new_state,
                old_state: observed.state,
                value: None,
                old_value: None,
                timestamp: self.until,
                event_timestamp: observed.event_timestamp,
                is_force_sent: forced,
                is_trigger_event: true,
                message: message.map(str::to_string).or_else(|| check.message.clone()),
                batch: Some(self.batch.clone()),
            };
            self.events.push(event);
        }
        Ok(())
    }

    /// Forces a re-notification of every child trigger registered on `metric`.
    fn schedule_children(&self, metric: &str) -> Result<()> {
        let children = self.ctx.db.get_child_events(&self.trigger.id, metric)?;
        for (child, metrics) in children {
            debug!(
                trigger_id = %self.trigger.id,
                metric = %metric,
                child = %child,
                "scheduling forced notification for child trigger"
            );
            self.ctx.db.add_trigger_forced_notification(
                &child,
                &metrics,
                self.until + CHILD_FORCE_DELAY_SECS,
            )?;
        }
        Ok(())
    }
}
