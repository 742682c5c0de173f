//! State comparison and debounce.
//!
//! Each evaluated sample is folded into the previous [`Observation`] of a
//! metric (or of the trigger). [`compare`] decides whether the new label is
//! confirmed and sent, held back as pending, or ignored; [`advance`] produces
//! the observation that the next sample is compared against.

use crate::types::State;

/// A label that stays bad this long gets a reminder event.
pub const REMINDER_INTERVAL_SECS: i64 = 86_400;

/// Message of the reminder event.
pub const REMINDER_MESSAGE: &str = "This metric has been in bad state for more than 24 hours - please, fix.";

/// Message of an event sent because a parent trigger resolved.
pub const FORCED_MESSAGE: &str = "Parent trigger metric resolved, forcing a state update.";

/// The previous state a new sample is compared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Reported state label.
    pub state: State,
    /// Timestamp of the sample that produced the label.
    pub timestamp: i64,
    /// When the label (or the pending change) began.
    pub event_timestamp: i64,
    /// A change is waiting for the pending interval.
    pub is_pending: bool,
    /// The last event was muted.
    pub suppressed: bool,
}

/// What to do with a new sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to report.
    Quiet,
    /// The change is held back until the pending interval elapses.
    Pending,
    /// Emit an event.
    Send {
        /// Fixed message attached to the event, if any.
        message: Option<&'static str>,
        /// The event was forced by a parent trigger.
        forced: bool,
    },
}

impl Verdict {
    const fn send() -> Self {
        Self::Send {
            message: None,
            forced: false,
        }
    }

    /// Returns true for [`Verdict::Send`].
    #[must_use]
    pub const fn is_send(&self) -> bool {
        matches!(self, Self::Send { .. })
    }
}

/// Applies the debounce rules to a new label.
#[must_use]
pub fn need_send_event(new_state: State, new_timestamp: i64, last: &Observation, pending_interval: i64) -> Verdict {
    if new_state != last.state {
        if pending_interval <= 0 {
            return Verdict::send();
        }
        if last.is_pending && new_timestamp - last.event_timestamp >= pending_interval {
            return Verdict::send();
        }
        return Verdict::Pending;
    }

    // A label that never produced an event has no age to remind about.
    if new_state.is_bad() && last.event_timestamp > 0 && new_timestamp - last.event_timestamp >= REMINDER_INTERVAL_SECS {
        return Verdict::Send {
            message: Some(REMINDER_MESSAGE),
            forced: false,
        };
    }

    if last.suppressed && last.state != State::Ok {
        return Verdict::send();
    }

    Verdict::Quiet
}

/// Applies the debounce rules, then the forced-notification override.
///
/// A forced notification turns a quiet, unchanged label into an event unless
/// the label is `OK` or `NODATA`.
#[must_use]
pub fn compare(
    new_state: State,
    new_timestamp: i64,
    last: &Observation,
    pending_interval: i64,
    forced: bool,
) -> Verdict {
    match need_send_event(new_state, new_timestamp, last, pending_interval) {
        Verdict::Quiet if forced && !matches!(new_state, State::Ok | State::NoData) => Verdict::Send {
            message: Some(FORCED_MESSAGE),
            forced: true,
        },
        verdict => verdict,
    }
}

/// Returns the observation following `last` after a sample with `verdict`.
///
/// A pending change keeps reporting the old label and measures the interval
/// from the first differing sample. A sent event starts a new label at the
/// sample's timestamp.
#[must_use]
pub const fn advance(last: &Observation, new_state: State, new_timestamp: i64, verdict: Verdict) -> Observation {
    match verdict {
        Verdict::Quiet => Observation {
            state: new_state,
            timestamp: new_timestamp,
            event_timestamp: last.event_timestamp,
            is_pending: false,
            suppressed: false,
        },
        Verdict::Pending => Observation {
            state: last.state,
            timestamp: new_timestamp,
            event_timestamp: if last.is_pending {
                last.event_timestamp
            } else {
                new_timestamp
            },
            is_pending: true,
            suppressed: last.suppressed,
        },
        Verdict::Send { .. } => Observation {
            state: new_state,
            timestamp: new_timestamp,
            event_timestamp: new_timestamp,
            is_pending: false,
            suppressed: false,
        },
    }
}
