//! Time series assembly for a trigger's targets.
//!
//! The first target of a trigger is the *main* target and may expand to any
//! number of series. Every other target is *additional* and must resolve to at
//! most one series, which is exposed to expressions as `t2`, `t3`, ...

use std::collections::HashMap;

use crate::database::Database;
use crate::error::{EvaluationError, Result};
use crate::remote::RemoteSource;
use crate::target;
use crate::types::{MetricValue, Trigger};

/// Step used for the NaN series standing in for a pattern with no metrics.
pub const WILDCARD_STEP: i64 = 60;

/// A named series of evenly spaced values.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    /// Series name (metric name or alias).
    pub name: String,
    /// Timestamp of the first value.
    pub start_time: i64,
    /// Timestamp just past the last value.
    pub stop_time: i64,
    /// Seconds between values.
    pub step_time: i64,
    /// Values; NaN marks a gap.
    pub values: Vec<f64>,
    /// The series stands in for a pattern that matched no metrics.
    pub wildcard: bool,
}

impl TimeSeries {
    /// Creates a series starting at `start_time`.
    #[must_use]
    pub fn new(name: impl Into<String>, start_time: i64, step_time: i64, values: Vec<f64>) -> Self {
        let len = i64::try_from(values.len()).unwrap_or(i64::MAX);
        Self {
            name: name.into(),
            start_time,
            stop_time: start_time.saturating_add(step_time.saturating_mul(len)),
            step_time,
            values,
            wildcard: false,
        }
    }

    /// Creates the NaN-filled placeholder for a pattern with no metrics.
    #[must_use]
    pub fn wildcard(pattern: &str, from: i64, until: i64) -> Self {
        let (start, count) = slots(from, until, WILDCARD_STEP);
        Self {
            wildcard: true,
            ..Self::new(pattern, start, WILDCARD_STEP, vec![f64::NAN; count])
        }
    }

    /// Unpacks stored samples into evenly spaced slots over `[from, until]`.
    ///
    /// Slots without a sample hold NaN.
    #[must_use]
    pub fn from_values(name: &str, samples: &[MetricValue], retention: i64, from: i64, until: i64) -> Self {
        let step = retention.max(1);
        let (start, count) = slots(from, until, step);
        let mut values = vec![f64::NAN; count];
        for sample in samples {
            let offset = sample.retention_timestamp - start;
            if offset < 0 {
                continue;
            }
            if let Some(slot) = usize::try_from(offset / step).ok().and_then(|i| values.get_mut(i)) {
                *slot = sample.value;
            }
        }
        Self::new(name, start, step, values)
    }

    /// Returns the finite value at `ts`, if any.
    #[must_use]
    pub fn value_at(&self, ts: i64) -> Option<f64> {
        if self.step_time <= 0 || ts < self.start_time {
            return None;
        }
        let index = usize::try_from((ts - self.start_time) / self.step_time).ok()?;
        self.values.get(index).copied().filter(|v| v.is_finite())
    }

    /// Returns the timestamps of all slots.
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.values.len()).map(move |i| {
            self.start_time + i64::try_from(i).unwrap_or(i64::MAX).saturating_mul(self.step_time)
        })
    }
}

fn slots(from: i64, until: i64, step: i64) -> (i64, usize) {
    let start = from - from.rem_euclid(step);
    let stop = until - until.rem_euclid(step) + step;
    let count = usize::try_from((stop - start) / step).unwrap_or(0);
    (start, count)
}

/// Series of all targets of a trigger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerTimeSeries {
    /// Series of the main target.
    pub main: Vec<TimeSeries>,
    /// One entry per additional target; `None` when it produced no series.
    pub additional: Vec<Option<TimeSeries>>,
}

impl TriggerTimeSeries {
    /// Builds the set from per-target results.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationError::WrongTriggerTarget` if an additional target
    /// has more than one series.
    pub fn from_targets(per_target: Vec<Vec<TimeSeries>>) -> std::result::Result<Self, EvaluationError> {
        let mut targets = per_target.into_iter();
        let main = targets.next().unwrap_or_default();
        let mut additional = Vec::new();
        for (index, series) in targets.enumerate() {
            if series.len() > 1 {
                return Err(EvaluationError::WrongTriggerTarget(index + 2));
            }
            additional.push(series.into_iter().next());
        }
        Ok(Self { main, additional })
    }

    /// Returns true if every main series is a wildcard placeholder.
    #[must_use]
    pub fn has_only_wildcards(&self) -> bool {
        self.main.iter().all(|series| series.wildcard)
    }

    /// Collects the additional values at `ts` keyed `t2`, `t3`, ...
    ///
    /// Returns `None` if any present additional series has no finite value at `ts`.
    #[must_use]
    pub fn additional_values(&self, ts: i64) -> Option<HashMap<String, f64>> {
        let mut values = HashMap::with_capacity(self.additional.len());
        for (index, series) in self.additional.iter().enumerate() {
            if let Some(series) = series {
                values.insert(format!("t{}", index + 2), series.value_at(ts)?);
            }
        }
        Some(values)
    }
}

/// Series fetched from the local store together with the metrics they read.
#[derive(Debug, Clone, Default)]
pub struct LocalSeries {
    /// The assembled series.
    pub series: TriggerTimeSeries,
    /// Names of all real metrics read, for purging.
    pub metrics: Vec<String>,
}

/// Evaluates the trigger's targets against the local metric store.
///
/// # Errors
///
/// Returns storage errors, and evaluation errors for malformed targets or a
/// wrong additional target.
pub fn fetch_local(db: &dyn Database, trigger: &Trigger, from: i64, until: i64) -> Result<LocalSeries> {
    let mut metrics = Vec::new();
    let mut per_target = Vec::with_capacity(trigger.targets.len());

    for text in &trigger.targets {
        let parsed = target::parse(text)?;
        let series = parsed.evaluate(&mut |pattern| {
            let names = db.get_pattern_metrics(pattern)?;
            let Some(first) = names.first() else {
                return Ok(vec![TimeSeries::wildcard(pattern, from, until)]);
            };
            let retention = db.get_metric_retention(first)?;
            let mut values = db.get_metrics_values(&names, from, until)?;
            let series = names
                .iter()
                .map(|name| {
                    let samples = values.remove(name).unwrap_or_default();
                    TimeSeries::from_values(name, &samples, retention, from, until)
                })
                .collect();
            metrics.extend(names);
            Ok(series)
        })?;
        per_target.push(series);
    }

    Ok(LocalSeries {
        series: TriggerTimeSeries::from_targets(per_target)?,
        metrics,
    })
}

/// Evaluates the trigger's targets on the remote render endpoint.
///
/// # Errors
///
/// Returns `EvaluationError::Remote` if the endpoint fails, or
/// `EvaluationError::WrongTriggerTarget` for a wrong additional target.
pub fn fetch_remote(
    remote: &dyn RemoteSource,
    trigger: &Trigger,
    from: i64,
    until: i64,
) -> std::result::Result<TriggerTimeSeries, EvaluationError> {
    let mut per_target = Vec::with_capacity(trigger.targets.len());
    for text in &trigger.targets {
        let series = remote
            .fetch(text, from, until)
            .map_err(|e| EvaluationError::Remote(e.to_string()))?;
        per_target.push(series);
    }
    TriggerTimeSeries::from_targets(per_target)
}
