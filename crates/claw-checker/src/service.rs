//! Trigger scheduling and worker pools.
//!
//! The service turns signals into checks:
//!
//! - incoming metric patterns schedule the triggers that read them
//! - a NODATA ticker periodically schedules every local trigger
//! - a pull ticker periodically schedules every remote trigger
//! - a tag ticker feeds the tag garbage collector
//!
//! A drain task moves pushed notification events out of storage and hands
//! them to the log, so the event queue never grows past one drain interval.
//!
//! Scheduled trigger IDs go through bounded lanes to fixed-size worker pools.
//! Scheduling is throttled twice: an in-process cache drops repeats within
//! `local_cache_ttl`, and a cooldown lock drops repeats across instances
//! within `cooldown`. Each check runs under a per-trigger lock on a blocking
//! thread so that a panicking check only loses that one trigger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::checker::{CheckContext, TriggerChecker};
use crate::database::Locker;
use crate::error::{CheckerError, Result};

/// Lock taken by the instance that runs a NODATA sweep.
pub const NODATA_SWEEP_LOCK: &str = "checker:nodata-sweep";

/// Returns the key of the scheduling cooldown lock of a trigger.
#[must_use]
pub fn cooldown_key(trigger_id: &str) -> String {
    format!("checker:cooldown:{trigger_id}")
}

/// Returns the key of the lock held while a trigger is checked.
#[must_use]
pub fn check_lock_key(trigger_id: &str) -> String {
    format!("checker:check-lock:{trigger_id}")
}

/// Events moved per storage call by the drain task.
pub const EVENT_DRAIN_BATCH: usize = 256;

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<String>>>;

/// The kinds of periodic producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    NoData,
    Pull,
    Tags,
}

impl Sweep {
    const fn name(self) -> &'static str {
        match self {
            Self::NoData => "nodata",
            Self::Pull => "pull",
            Self::Tags => "tag-gc",
        }
    }
}

/// Releases a held lock when dropped, including during a panic unwind.
struct LockGuard<'a> {
    locker: &'a dyn Locker,
    key: String,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.locker.release(&self.key) {
            warn!(key = %self.key, error = %e, "failed to release lock");
        }
    }
}

/// Schedules and runs trigger checks.
pub struct CheckerService {
    ctx: CheckContext,
    locker: Arc<dyn Locker>,
    /// Triggers scheduled recently by this process.
    recent: Mutex<HashMap<String, Instant>>,
}

impl std::fmt::Debug for CheckerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerService")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl CheckerService {
    /// Creates a service over a check context and a lock backend.
    #[must_use]
    pub fn new(ctx: CheckContext, locker: Arc<dyn Locker>) -> Self {
        Self {
            ctx,
            locker,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the check context.
    #[must_use]
    pub const fn context(&self) -> &CheckContext {
        &self.ctx
    }

    // ============ Scheduling ============

    /// Returns true if `trigger_id` may be scheduled now.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock backend fails.
    pub fn should_schedule(&self, trigger_id: &str) -> Result<bool> {
        let now = Instant::now();
        let ttl = self.ctx.settings.local_cache_ttl();
        {
            let mut recent = self.recent.lock();
            recent.retain(|_, at| now.duration_since(*at) < ttl);
            if recent.contains_key(trigger_id) {
                return Ok(false);
            }
            recent.insert(trigger_id.to_string(), now);
        }
        self.locker
            .try_acquire(&cooldown_key(trigger_id), self.ctx.settings.cooldown())
    }

    /// Pushes the triggers that pass the throttles onto `lane`.
    ///
    /// Returns false once the lane is closed.
    async fn schedule(&self, lane: &mpsc::Sender<String>, trigger_ids: Vec<String>) -> bool {
        for trigger_id in trigger_ids {
            match self.should_schedule(&trigger_id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(trigger_id = %trigger_id, error = %e, "failed to take cooldown lock");
                    continue;
                }
            }
            if lane.send(trigger_id).await.is_err() {
                return false;
            }
        }
        true
    }

    fn sweep(&self, sweep: Sweep) -> Result<Vec<String>> {
        match sweep {
            Sweep::NoData => {
                let interval = self.ctx.settings.nodata_check_interval();
                if !self.locker.try_acquire(NODATA_SWEEP_LOCK, interval)? {
                    debug!("nodata sweep is running elsewhere");
                    return Ok(Vec::new());
                }
                self.ctx.db.get_local_trigger_ids()
            }
            Sweep::Pull => self.ctx.db.get_remote_trigger_ids(),
            Sweep::Tags => self.ctx.db.get_tag_names(),
        }
    }

    // ============ Work ============

    /// Checks one trigger under its check lock.
    ///
    /// # Errors
    ///
    /// Returns `CheckerError::Lock` if the lock is not acquired in time,
    /// `CheckerError::TriggerNotExists` if the trigger was deleted, or any
    /// storage error.
    pub fn check_trigger(&self, trigger_id: &str) -> Result<()> {
        let key = check_lock_key(trigger_id);
        let settings = &self.ctx.settings;
        self.locker
            .acquire(&key, settings.check_lock_ttl(), settings.check_lock_timeout())?;
        let _guard = LockGuard {
            locker: self.locker.as_ref(),
            key,
        };

        TriggerChecker::init(&self.ctx, trigger_id).and_then(|mut checker| checker.check())
    }

    /// Runs [`Self::check_trigger`] on a blocking thread and absorbs its failures.
    pub async fn run_guarded(self: &Arc<Self>, trigger_id: String) {
        let service = Arc::clone(self);
        let id = trigger_id.clone();
        let outcome = tokio::task::spawn_blocking(move || service.check_trigger(&id)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(CheckerError::TriggerNotExists { .. })) => {
                debug!(trigger_id = %trigger_id, "trigger no longer exists");
            }
            Ok(Err(e)) => {
                self.ctx.metrics.check_failed();
                error!(trigger_id = %trigger_id, error = %e, "trigger check failed");
            }
            Err(e) if e.is_panic() => {
                self.ctx.metrics.panicked();
                error!(trigger_id = %trigger_id, error = %e, "trigger check panicked");
            }
            Err(e) => {
                warn!(trigger_id = %trigger_id, error = %e, "trigger check cancelled");
            }
        }
    }

    /// Removes `tag` if no trigger and no subscription uses it.
    ///
    /// Returns true if the tag was removed.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn collect_tag(&self, tag: &str) -> Result<bool> {
        let db = &self.ctx.db;
        if !db.get_tag_trigger_ids(tag)?.is_empty() || !db.get_tag_subscription_ids(tag)?.is_empty() {
            return Ok(false);
        }
        db.remove_tag(tag)?;
        debug!(tag = %tag, "removed unused tag");
        Ok(true)
    }

    /// Moves every pushed event out of storage and logs it.
    ///
    /// Returns the number of events drained.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn drain_events(&self) -> Result<usize> {
        let mut drained = 0;
        loop {
            let events = self.ctx.db.take_notification_events(EVENT_DRAIN_BATCH)?;
            if events.is_empty() {
                break;
            }
            for event in &events {
                info!(
                    target: "claw_checker::events",
                    trigger_id = %event.trigger_id,
                    metric = %event.metric,
                    old_state = %event.old_state,
                    state = %event.state,
                    value = ?event.value,
                    timestamp = event.timestamp,
                    trigger_event = event.is_trigger_event,
                    forced = event.is_force_sent,
                    message = event.message.as_deref().unwrap_or_default(),
                    "notification event"
                );
            }
            drained += events.len();
            self.ctx.metrics.events_drained(events.len());
        }
        Ok(drained)
    }

    // ============ Lifecycle ============

    /// Spawns producers and workers on the current runtime.
    ///
    /// `patterns` carries the metric patterns that received new values.
    /// The remote lane is only started when the context has a remote source.
    #[must_use]
    pub fn start(self: Arc<Self>, patterns: mpsc::Receiver<String>) -> ServiceHandle {
        let settings = self.ctx.settings.clone();
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut producers = Vec::new();
        let mut workers = Vec::new();

        let (local_tx, local_rx) = mpsc::channel(settings.lane_capacity.max(1));
        workers.extend(self.spawn_workers("local", local_rx, settings.max_parallel_checks, false));
        producers.push(tokio::spawn(Arc::clone(&self).pattern_producer(
            patterns,
            local_tx.clone(),
            shutdown_tx.subscribe(),
        )));
        producers.push(tokio::spawn(Arc::clone(&self).sweep_producer(
            Sweep::NoData,
            settings.nodata_check_interval(),
            local_tx,
            shutdown_tx.subscribe(),
        )));

        if self.ctx.remote.is_some() {
            let (remote_tx, remote_rx) = mpsc::channel(settings.lane_capacity.max(1));
            workers.extend(self.spawn_workers("remote", remote_rx, settings.max_parallel_remote_checks, false));
            producers.push(tokio::spawn(Arc::clone(&self).sweep_producer(
                Sweep::Pull,
                settings.pull_check_interval(),
                remote_tx,
                shutdown_tx.subscribe(),
            )));
        }

        let (tag_tx, tag_rx) = mpsc::channel(settings.lane_capacity.max(1));
        workers.extend(self.spawn_workers("tag-gc", tag_rx, settings.tag_gc_workers, true));
        producers.push(tokio::spawn(Arc::clone(&self).sweep_producer(
            Sweep::Tags,
            settings.tag_gc_interval(),
            tag_tx,
            shutdown_tx.subscribe(),
        )));

        let (drain_stop_tx, drain_stop_rx) = oneshot::channel();
        let drainer = tokio::spawn(Arc::clone(&self).event_drainer(settings.event_drain_interval(), drain_stop_rx));

        info!(
            producers = producers.len(),
            workers = workers.len(),
            remote = self.ctx.remote.is_some(),
            "checker service started"
        );
        ServiceHandle {
            shutdown_tx,
            producers,
            workers,
            drain_stop_tx,
            drainer,
        }
    }

    fn spawn_workers(
        self: &Arc<Self>,
        lane: &'static str,
        rx: mpsc::Receiver<String>,
        count: usize,
        tags: bool,
    ) -> Vec<JoinHandle<()>> {
        let rx: SharedReceiver = Arc::new(AsyncMutex::new(rx));
        (0..count.max(1))
            .map(|_| tokio::spawn(Arc::clone(self).worker(lane, Arc::clone(&rx), tags)))
            .collect()
    }

    async fn worker(self: Arc<Self>, lane: &'static str, rx: SharedReceiver, tags: bool) {
        loop {
            let next = rx.lock().await.recv().await;
            let Some(item) = next else {
                break;
            };
            if tags {
                if let Err(e) = self.collect_tag(&item) {
                    warn!(tag = %item, error = %e, "tag collection failed");
                }
            } else {
                self.run_guarded(item).await;
            }
        }
        debug!(lane, "worker stopped");
    }

    async fn pattern_producer(
        self: Arc<Self>,
        mut patterns: mpsc::Receiver<String>,
        lane: mpsc::Sender<String>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                pattern = patterns.recv() => {
                    let Some(pattern) = pattern else {
                        debug!("pattern channel closed");
                        break;
                    };
                    match self.ctx.db.get_pattern_triggers(&pattern) {
                        Ok(ids) => {
                            if !self.schedule(&lane, ids).await {
                                break;
                            }
                        }
                        Err(e) => warn!(pattern = %pattern, error = %e, "failed to resolve pattern triggers"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("pattern producer stopped");
    }

    async fn sweep_producer(
        self: Arc<Self>,
        sweep: Sweep,
        period: Duration,
        lane: mpsc::Sender<String>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ids = match self.sweep(sweep) {
                        Ok(ids) => ids,
                        Err(e) => {
                            warn!(sweep = sweep.name(), error = %e, "sweep failed");
                            continue;
                        }
                    };
                    debug!(sweep = sweep.name(), count = ids.len(), "sweep");
                    let open = if sweep == Sweep::Tags {
                        send_all(&lane, ids).await
                    } else {
                        self.schedule(&lane, ids).await
                    };
                    if !open {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!(sweep = sweep.name(), "sweep producer stopped");
    }

    /// Drains events every `period` and once more when stopped.
    async fn event_drainer(self: Arc<Self>, period: Duration, mut stop_rx: oneshot::Receiver<()>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.drain_logged(),
                _ = &mut stop_rx => break,
            }
        }
        self.drain_logged();
        debug!("event drain stopped");
    }

    fn drain_logged(&self) {
        match self.drain_events() {
            Ok(0) => {}
            Ok(count) => debug!(count, "drained notification events"),
            Err(e) => warn!(error = %e, "event drain failed"),
        }
    }
}

async fn send_all(lane: &mpsc::Sender<String>, items: Vec<String>) -> bool {
    for item in items {
        if lane.send(item).await.is_err() {
            return false;
        }
    }
    true
}

/// Handle to a running [`CheckerService`].
#[derive(Debug)]
pub struct ServiceHandle {
    shutdown_tx: broadcast::Sender<()>,
    producers: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    drain_stop_tx: oneshot::Sender<()>,
    drainer: JoinHandle<()>,
}

impl ServiceHandle {
    /// Stops the producers, lets the workers drain their lanes, and waits for both.
    ///
    /// Events pushed by the last checks are drained before returning.
    pub async fn shutdown(self) {
        info!("checker service shutting down");
        let _ = self.shutdown_tx.send(());
        join_all(self.producers).await;
        join_all(self.workers).await;
        let _ = self.drain_stop_tx.send(());
        if let Err(e) = self.drainer.await {
            warn!(error = %e, "event drain task failed");
        }
        info!("checker service stopped");
    }
}
