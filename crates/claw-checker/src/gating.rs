//! Conditions that mute a metric or a whole trigger.
//!
//! Checked in order: the trigger schedule, silences on the metric or on any
//! trigger tag, then maintenance of the metric or of the whole trigger.

use std::fmt;

use crate::database::Database;
use crate::error::Result;
use crate::maintenance::Maintenance;
use crate::types::{Trigger, WILDCARD_METRIC};

/// Why handling was muted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MuteReason {
    /// The schedule disallows the timestamp.
    Schedule,
    /// The metric or a tag is silenced.
    Silent,
    /// The metric or the whole trigger is under maintenance.
    Maintenance,
}

impl MuteReason {
    /// Returns the log code of the reason.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Schedule => "EventMutedSchedule",
            Self::Silent => "EventMutedSilent",
            Self::Maintenance => "EventMutedMaintenance",
        }
    }
}

impl fmt::Display for MuteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Evaluates mute conditions for one trigger.
#[derive(Clone, Copy)]
pub struct Gate<'a> {
    db: &'a dyn Database,
    trigger: &'a Trigger,
    maintenance: &'a Maintenance,
}

impl<'a> Gate<'a> {
    /// Creates a gate over a trigger and its maintenance.
    #[must_use]
    pub fn new(db: &'a dyn Database, trigger: &'a Trigger, maintenance: &'a Maintenance) -> Self {
        Self {
            db,
            trigger,
            maintenance,
        }
    }

    /// Returns why handling `metric` at `ts` is muted, if it is.
    ///
    /// Pass [`WILDCARD_METRIC`] to ask about the whole trigger.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the silence lookups.
    pub fn check(&self, ts: i64, metric: &str) -> Result<Option<MuteReason>> {
        if self
            .trigger
            .schedule
            .as_ref()
            .is_some_and(|schedule| !schedule.allows(ts))
        {
            return Ok(Some(MuteReason::Schedule));
        }

        if metric != WILDCARD_METRIC && self.db.is_metric_silenced(metric, ts)? {
            return Ok(Some(MuteReason::Silent));
        }
        for tag in &self.trigger.tags {
            if self.db.is_tag_silenced(tag, ts)? {
                return Ok(Some(MuteReason::Silent));
            }
        }

        if self.maintenance.get(metric, ts).0 || self.maintenance.get(WILDCARD_METRIC, ts).0 {
            return Ok(Some(MuteReason::Maintenance));
        }

        Ok(None)
    }
}
