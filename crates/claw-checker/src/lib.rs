//! Trigger evaluation engine for Clawbernetes metric alerting.
//!
//! `claw-checker` periodically evaluates alerting triggers against stored
//! metric time series, derives per-metric and per-trigger state labels, and
//! emits notification events on confirmed state changes.
//!
//! # Features
//!
//! - **Targets**: Graphite-style metric patterns with a small set of series functions
//! - **Thresholds and expressions**: rising/falling thresholds or a custom state expression
//! - **Debounce**: pending intervals, bad-state reminders, and suppressed-event resurfacing
//! - **Staleness**: TTL handling with a configurable state for silent metrics
//! - **Gating**: schedules, metric and tag silences, and maintenance windows
//! - **Inheritance**: a resolved parent metric forces a re-notification of child triggers
//! - **Scheduling**: throttled lanes with worker pools for local, remote and tag work
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use claw_checker::{CheckContext, MemoryDatabase, State, Trigger, TriggerChecker};
//!
//! let db = Arc::new(MemoryDatabase::new());
//!
//! let mut trigger = Trigger::new("cpu", "CPU load", vec!["servers.*.cpu".to_string()]);
//! trigger.warn_value = Some(70.0);
//! trigger.error_value = Some(90.0);
//! db.save_trigger(trigger);
//!
//! let until = 1_704_110_400;
//! db.add_metric_value("servers.web1.cpu", until - 60, 95.0);
//!
//! let ctx = CheckContext::new(db.clone());
//! TriggerChecker::init_at(&ctx, "cpu", until)?.check()?;
//!
//! let check = db.last_check("cpu").unwrap();
//! assert_eq!(check.metrics["servers.web1.cpu"].state, State::Error);
//! # Ok::<(), claw_checker::CheckerError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod checker;
pub mod compare;
pub mod config;
pub mod database;
pub mod error;
pub mod expression;
pub mod gating;
pub mod maintenance;
pub mod memory;
pub mod metrics;
pub mod pattern;
pub mod remote;
pub mod schedule;
pub mod service;
pub mod target;
#[cfg(test)]
mod testing;
pub mod timeseries;
pub mod types;

pub use checker::{CheckContext, TriggerChecker};
pub use config::{CheckerSettings, Config};
pub use database::{Database, Locker};
pub use error::{CheckerError, EvaluationError, ExpressionError, Result};
pub use maintenance::Maintenance;
pub use memory::MemoryDatabase;
pub use metrics::{CheckerMetrics, MetricsSnapshot};
pub use remote::{RemoteClient, RemoteSource};
pub use schedule::ScheduleData;
pub use service::{CheckerService, ServiceHandle};
pub use timeseries::TimeSeries;
pub use types::{CheckData, MetricState, NotificationEvent, State, Trigger, TriggerType, TtlState};
