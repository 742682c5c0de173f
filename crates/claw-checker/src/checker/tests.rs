use std::sync::Arc;

use super::*;
use crate::compare::{FORCED_MESSAGE, REMINDER_MESSAGE};
use crate::error::CheckerError;
use crate::memory::MemoryDatabase;
use crate::remote::RemoteError;
use crate::schedule::ScheduleData;
use crate::testing::FaultyDatabase;
use crate::timeseries::TimeSeries;
use crate::types::{MetricState, State, TriggerType, TtlState};

/// Monday 2024-01-01 12:00:00 UTC.
const UNTIL: i64 = 1_704_110_400;

fn setup() -> (Arc<MemoryDatabase>, CheckContext) {
    let db = Arc::new(MemoryDatabase::new());
    let ctx = CheckContext::new(db.clone());
    (db, ctx)
}

fn rising(id: &str, target: &str) -> Trigger {
    let mut trigger = Trigger::new(id, format!("{id} trigger"), vec![target.to_string()]);
    trigger.warn_value = Some(10.0);
    trigger.error_value = Some(20.0);
    trigger
}

fn run(ctx: &CheckContext, id: &str, until: i64) {
    TriggerChecker::init_at(ctx, id, until).unwrap().check().unwrap();
}

fn metric(state: State, timestamp: i64, event_timestamp: i64) -> MetricState {
    MetricState {
        state,
        timestamp,
        event_timestamp,
        ..MetricState::default()
    }
}

fn seeded(state: State, timestamp: i64, metrics: Vec<(&str, MetricState)>) -> CheckData {
    let mut check = CheckData::new(timestamp);
    check.state = state;
    check.event_timestamp = timestamp - 3600;
    check.metrics = metrics
        .into_iter()
        .map(|(name, state)| (name.to_string(), state))
        .collect();
    check
}

struct StaticRemote(std::result::Result<Vec<TimeSeries>, u16>);

impl RemoteSource for StaticRemote {
    fn fetch(&self, _target: &str, _from: i64, _until: i64) -> std::result::Result<Vec<TimeSeries>, RemoteError> {
        self.0.clone().map_err(RemoteError::Status)
    }
}

mod init_tests {
    use super::*;

    #[test]
    fn window_covers_ttl_and_pending() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "cpu.a");
        trigger.ttl = 1200;
        trigger.pending_interval = 60;
        db.save_trigger(trigger);

        let checker = TriggerChecker::init_at(&ctx, "t1", UNTIL).unwrap();
        assert_eq!(checker.until(), UNTIL);
        assert_eq!(checker.from(), UNTIL - 1260);
    }

    #[test]
    fn window_reaches_back_to_last_check() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "cpu.a"));
        db.put_last_check("t1", seeded(State::Ok, UNTIL - 3600, vec![]));

        let checker = TriggerChecker::init_at(&ctx, "t1", UNTIL).unwrap();
        assert_eq!(checker.from(), UNTIL - 3600);
    }

    #[test]
    fn missing_trigger() {
        let (_db, ctx) = setup();
        let err = TriggerChecker::init_at(&ctx, "missing", UNTIL).unwrap_err();
        assert!(matches!(err, CheckerError::TriggerNotExists { .. }));
    }

    #[test]
    fn trigger_deleted_during_check() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "cpu.a"));
        db.add_metric_value("cpu.a", UNTIL - 60, 5.0);

        let mut checker = TriggerChecker::init_at(&ctx, "t1", UNTIL).unwrap();
        db.delete_trigger("t1");
        let err = checker.check().unwrap_err();
        assert!(matches!(err, CheckerError::TriggerNotExists { .. }));
        assert!(db.last_check("t1").is_none());
    }
}

mod transition_tests {
    use super::*;

    #[test]
    fn first_values_and_escalation() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "cpu.a"));
        db.add_metric_values("cpu.a", &[(UNTIL - 120, 5.0), (UNTIL - 60, 5.0)]);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Ok);
        assert_eq!(check.last_successful_check_timestamp, UNTIL);
        let cpu = &check.metrics["cpu.a"];
        assert_eq!(cpu.state, State::Ok);
        assert_eq!(cpu.timestamp, UNTIL - 60);
        assert_eq!(cpu.event_timestamp, UNTIL - 120);

        let events = db.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].metric, "cpu.a");
        assert_eq!(events[0].old_state, State::NoData);
        assert_eq!(events[0].state, State::Ok);
        assert!(events[1].is_trigger_event);
        assert_eq!(events[1].state, State::Ok);
        let batch = events[0].batch.as_ref().unwrap();
        assert!(events.iter().all(|e| e.batch.as_ref() == Some(batch)));

        db.add_metric_value("cpu.a", UNTIL + 60, 25.0);
        run(&ctx, "t1", UNTIL + 60);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, State::Error);
        assert_eq!(events[0].old_state, State::Ok);
        assert_eq!(events[0].value, Some(25.0));
        assert_eq!(events[0].old_value, Some(5.0));
        assert_eq!(events[0].event_timestamp, UNTIL - 120);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.score, 100);
        assert_eq!(ctx.metrics.snapshot().checks, 2);
        assert_eq!(ctx.metrics.snapshot().events, 3);
    }

    #[test]
    fn repeated_check_is_idempotent() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "cpu.a"));
        db.add_metric_values("cpu.a", &[(UNTIL - 120, 5.0), (UNTIL - 60, 5.0)]);

        run(&ctx, "t1", UNTIL);
        let first = db.last_check("t1").unwrap();
        db.take_events();

        run(&ctx, "t1", UNTIL);
        assert!(db.take_events().is_empty());
        assert_eq!(db.last_check("t1").unwrap().metrics, first.metrics);
    }

    #[test]
    fn pending_interval_holds_change() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "cpu.a");
        trigger.pending_interval = 120;
        db.save_trigger(trigger);
        db.put_last_check(
            "t1",
            seeded(State::Ok, UNTIL - 60, vec![("cpu.a", metric(State::Ok, UNTIL - 600, UNTIL - 600))]),
        );
        db.add_metric_value("cpu.a", UNTIL - 60, 25.0);

        run(&ctx, "t1", UNTIL);
        assert!(db.take_events().is_empty());
        let cpu = db.last_check("t1").unwrap().metrics["cpu.a"].clone();
        assert_eq!(cpu.state, State::Ok);
        assert!(cpu.is_pending);
        assert_eq!(cpu.event_timestamp, UNTIL - 60);

        db.add_metric_value("cpu.a", UNTIL + 60, 25.0);
        run(&ctx, "t1", UNTIL + 60);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, State::Error);
        let cpu = db.last_check("t1").unwrap().metrics["cpu.a"].clone();
        assert_eq!(cpu.state, State::Error);
        assert!(!cpu.is_pending);
        assert_eq!(cpu.event_timestamp, UNTIL + 60);
    }

    #[test]
    fn new_metrics_start_muted() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "cpu.a");
        trigger.mute_new_metrics = true;
        db.save_trigger(trigger);
        db.add_metric_value("cpu.a", UNTIL - 60, 5.0);

        run(&ctx, "t1", UNTIL);

        let events = db.take_events();
        assert!(events.iter().all(|e| e.is_trigger_event));
        let cpu = &db.last_check("t1").unwrap().metrics["cpu.a"];
        assert_eq!(cpu.state, State::Ok);
        assert_eq!(cpu.timestamp, UNTIL);
    }

    #[test]
    fn trigger_state_waits_for_pending_interval() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "none.*");
        trigger.ttl = 600;
        trigger.pending_interval = 120;
        db.save_trigger(trigger);
        db.put_last_check("t1", seeded(State::Ok, UNTIL - 60, vec![]));

        run(&ctx, "t1", UNTIL);
        run(&ctx, "t1", UNTIL + 60);
        assert!(db.take_events().is_empty());
        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Ok);
        assert!(check.is_pending);
        assert_eq!(check.event_timestamp, UNTIL);

        run(&ctx, "t1", UNTIL + 120);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_trigger_event);
        assert_eq!(events[0].old_state, State::Ok);
        assert_eq!(events[0].state, State::NoData);
        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::NoData);
        assert!(!check.is_pending);
        assert_eq!(check.event_timestamp, UNTIL + 120);
    }

    #[test]
    fn persisting_trigger_nodata_gets_one_reminder() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "none.*");
        trigger.ttl = 600;
        db.save_trigger(trigger);
        let mut last = seeded(State::NoData, UNTIL - 60, vec![]);
        last.event_timestamp = UNTIL - 86_500;
        db.put_last_check("t1", last);

        run(&ctx, "t1", UNTIL);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_trigger_event);
        assert_eq!(events[0].metric, "*");
        assert_eq!(events[0].state, State::NoData);
        assert_eq!(events[0].old_state, State::NoData);
        assert_eq!(events[0].event_timestamp, UNTIL - 86_500);
        assert_eq!(events[0].message.as_deref(), Some(REMINDER_MESSAGE));
        assert_eq!(db.last_check("t1").unwrap().event_timestamp, UNTIL);

        run(&ctx, "t1", UNTIL + 60);
        assert!(db.take_events().is_empty());
    }

    #[test]
    fn failed_persist_keeps_side_effects() {
        let db = Arc::new(FaultyDatabase::new());
        let ctx = CheckContext::new(db.clone());
        db.save_trigger(rising("t1", "x"));
        let last = seeded(State::Ok, UNTIL - 60, vec![("x", metric(State::Warn, UNTIL - 600, UNTIL - 600))]);
        db.put_last_check("t1", last.clone());
        db.add_trigger_forced_notification("t1", &["x".to_string()], UNTIL - 10)
            .unwrap();
        db.add_metric_value("x", UNTIL - 60, 15.0);

        db.fail_persist(true);
        let err = TriggerChecker::init_at(&ctx, "t1", UNTIL)
            .unwrap()
            .check()
            .unwrap_err();
        assert!(matches!(err, CheckerError::Storage { .. }));
        assert!(db.take_events().is_empty());
        assert!(db.get_trigger_forced_notifications("t1").unwrap().contains_key("x"));
        assert_eq!(db.last_check("t1").unwrap(), last);

        db.fail_persist(false);
        run(&ctx, "t1", UNTIL);
        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_force_sent);
        assert!(db.get_trigger_forced_notifications("t1").unwrap().is_empty());
    }

    #[test]
    fn expression_over_additional_target() {
        let (db, ctx) = setup();
        let mut trigger = Trigger::new("t1", "limit", vec!["cpu.a".to_string(), "cpu.limit".to_string()]);
        trigger.trigger_type = TriggerType::Expression;
        trigger.expression = Some("t1 > t2 ? ERROR : OK".to_string());
        db.save_trigger(trigger);
        db.add_metric_value("cpu.a", UNTIL - 60, 50.0);
        db.add_metric_value("cpu.limit", UNTIL - 60, 40.0);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Ok);
        assert_eq!(check.metrics["cpu.a"].state, State::Error);
        assert!(!check.metrics.contains_key("cpu.limit"));
    }
}

mod staleness_tests {
    use super::*;

    fn stale_setup(ttl_state: TtlState) -> (Arc<MemoryDatabase>, CheckContext) {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "cpu.*");
        trigger.ttl = 600;
        trigger.ttl_state = Some(ttl_state);
        db.save_trigger(trigger);
        db.put_last_check(
            "t1",
            seeded(
                State::Ok,
                UNTIL,
                vec![
                    ("cpu.a", metric(State::Ok, UNTIL - 601, UNTIL - 1000)),
                    ("cpu.b", metric(State::Ok, UNTIL - 60, UNTIL - 1000)),
                ],
            ),
        );
        db.add_metric_value("cpu.b", UNTIL + 60, 5.0);
        (db, ctx)
    }

    #[test]
    fn stale_metric_becomes_nodata() {
        let (db, ctx) = stale_setup(TtlState::NoData);
        run(&ctx, "t1", UNTIL + 60);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, "cpu.a");
        assert_eq!(events[0].state, State::NoData);
        assert_eq!(events[0].old_state, State::Ok);

        let check = db.last_check("t1").unwrap();
        let cpu_a = &check.metrics["cpu.a"];
        assert_eq!(cpu_a.state, State::NoData);
        assert!(cpu_a.is_no_data);
        assert_eq!(cpu_a.timestamp, UNTIL - 601);
        assert_eq!(cpu_a.event_timestamp, UNTIL);
        assert_eq!(check.metrics["cpu.b"].state, State::Ok);
    }

    #[test]
    fn stale_metric_is_deleted() {
        let (db, ctx) = stale_setup(TtlState::Del);
        run(&ctx, "t1", UNTIL + 60);

        assert!(db.take_events().is_empty());
        let check = db.last_check("t1").unwrap();
        assert!(!check.metrics.contains_key("cpu.a"));
        assert!(check.metrics.contains_key("cpu.b"));
    }

    #[test]
    fn persisting_nodata_gets_reminder() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "cpu.*");
        trigger.ttl = 600;
        db.save_trigger(trigger);
        let mut silent = metric(State::NoData, UNTIL - 90_000, UNTIL - 86_500);
        silent.is_no_data = true;
        db.put_last_check(
            "t1",
            seeded(
                State::Ok,
                UNTIL - 60,
                vec![("cpu.a", silent), ("cpu.b", metric(State::Ok, UNTIL - 120, UNTIL - 1000))],
            ),
        );
        db.add_metric_value("cpu.b", UNTIL - 60, 5.0);

        run(&ctx, "t1", UNTIL);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, "cpu.a");
        assert_eq!(events[0].state, State::NoData);
        assert_eq!(events[0].old_state, State::NoData);
        assert_eq!(events[0].message.as_deref(), Some(REMINDER_MESSAGE));
        let cpu_a = db.last_check("t1").unwrap().metrics["cpu.a"].clone();
        assert_eq!(cpu_a.event_timestamp, UNTIL - 60);
        assert_eq!(cpu_a.timestamp, UNTIL - 90_000);

        run(&ctx, "t1", UNTIL + 60);
        assert!(db.take_events().is_empty());
    }

    #[test]
    fn purges_values_past_metrics_ttl() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "cpu.a"));
        db.add_metric_values("cpu.a", &[(UNTIL - 20_000, 1.0), (UNTIL - 60, 5.0)]);

        run(&ctx, "t1", UNTIL);

        let values = db.metric_values("cpu.a");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].timestamp, UNTIL - 60);
    }
}

mod evaluation_error_tests {
    use super::*;

    #[test]
    fn duplicate_series_names() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "aliasByNode(srv.*.cpu, 2)"));
        db.add_metric_value("srv.a.cpu", UNTIL - 60, 5.0);
        db.add_metric_value("srv.b.cpu", UNTIL - 60, 25.0);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Exception);
        assert_eq!(check.message.as_deref(), Some("Trigger has same timeseries names: cpu"));
        assert_eq!(check.metrics.len(), 1);
        assert_eq!(check.metrics["cpu"].state, State::Ok);
        assert_eq!(check.score, 100_000);
    }

    #[test]
    fn additional_target_with_many_series() {
        let (db, ctx) = setup();
        db.save_trigger(Trigger {
            targets: vec!["cpu.a".to_string(), "mem.*".to_string()],
            ..rising("t1", "cpu.a")
        });
        db.add_metric_value("cpu.a", UNTIL - 60, 5.0);
        db.add_metric_value("mem.a", UNTIL - 60, 5.0);
        db.add_metric_value("mem.b", UNTIL - 60, 5.0);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Exception);
        assert_eq!(check.message.as_deref(), Some("Target t2 has more than one metric"));
        assert!(check.metrics.is_empty());
        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_trigger_event);
        assert_eq!(events[0].message, check.message);
    }

    #[test]
    fn unknown_target_function() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "movingAverage(cpu.a, 5)"));
        db.add_metric_value("cpu.a", UNTIL - 60, 5.0);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Exception);
        assert_eq!(check.message.as_deref(), Some("Unknown function: \"movingAverage\""));
    }

    #[test]
    fn only_wildcards_without_metrics() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "none.*");
        trigger.ttl = 600;
        db.save_trigger(trigger);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::NoData);
        assert_eq!(check.message.as_deref(), Some("Trigger never received metrics"));
        assert!(db.take_events().is_empty());
    }

    #[test]
    fn only_wildcards_keeps_known_metrics() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "none.*");
        trigger.ttl = 600;
        db.save_trigger(trigger);
        db.put_last_check(
            "t1",
            seeded(State::Ok, UNTIL - 60, vec![("none.a", metric(State::Ok, UNTIL - 120, UNTIL - 1000))]),
        );

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Ok);
        assert!(check.message.is_none());
        assert!(check.metrics.contains_key("none.a"));
    }

    #[test]
    fn no_series_takes_ttl_state() {
        let (db, ctx) = setup();
        let ctx = ctx.with_remote(Arc::new(StaticRemote(Ok(Vec::new()))));
        let mut trigger = rising("t1", "sumSeries(cpu.*)");
        trigger.is_remote = true;
        trigger.ttl = 600;
        trigger.ttl_state = Some(TtlState::Error);
        db.save_trigger(trigger);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Error);
        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message.as_deref(), Some("Trigger has no metrics, check your target"));
    }

    #[test]
    fn no_series_without_ttl_keeps_state() {
        let (db, ctx) = setup();
        let ctx = ctx.with_remote(Arc::new(StaticRemote(Ok(Vec::new()))));
        let mut trigger = rising("t1", "sumSeries(cpu.*)");
        trigger.is_remote = true;
        db.save_trigger(trigger);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::NoData);
        assert_eq!(check.message.as_deref(), Some("Trigger has no metrics, check your target"));
        assert!(db.take_events().is_empty());
    }

    #[test]
    fn remote_trigger_without_remote_source() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "cpu.a");
        trigger.is_remote = true;
        db.save_trigger(trigger);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::Exception);
        assert_eq!(check.message.as_deref(), Some(EXCEPTION_MESSAGE));
        assert_eq!(ctx.metrics.snapshot().evaluation_exceptions, 1);
    }

    #[test]
    fn failing_remote_source() {
        let (db, ctx) = setup();
        let ctx = ctx.with_remote(Arc::new(StaticRemote(Err(502))));
        let mut trigger = rising("t1", "cpu.a");
        trigger.is_remote = true;
        db.save_trigger(trigger);

        run(&ctx, "t1", UNTIL);

        assert_eq!(db.last_check("t1").unwrap().state, State::Exception);
        assert_eq!(ctx.metrics.snapshot().evaluation_exceptions, 1);
    }
}

mod remote_tests {
    use super::*;

    #[test]
    fn remote_series_are_stepped() {
        let (db, ctx) = setup();
        let series = TimeSeries::new("remote.a", UNTIL - 120, 60, vec![5.0, 25.0, f64::NAN]);
        let ctx = ctx.with_remote(Arc::new(StaticRemote(Ok(vec![series]))));
        let mut trigger = rising("t1", "sumSeries(remote.*)");
        trigger.is_remote = true;
        db.save_trigger(trigger);

        run(&ctx, "t1", UNTIL);

        let events = db.take_events();
        let states: Vec<(State, State)> = events.iter().map(|e| (e.old_state, e.state)).collect();
        assert_eq!(
            states,
            vec![
                (State::NoData, State::Ok),
                (State::Ok, State::Error),
                (State::NoData, State::Ok),
            ]
        );
        let remote = &db.last_check("t1").unwrap().metrics["remote.a"];
        assert_eq!(remote.state, State::Error);
        assert_eq!(remote.timestamp, UNTIL - 60);
    }
}

mod gating_tests {
    use super::*;
    use crate::maintenance::Maintenance;

    #[test]
    fn schedule_mutes_whole_trigger() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "cpu.a");
        trigger.schedule = Some(ScheduleData::default().with_day(0, false));
        db.save_trigger(trigger);
        db.add_metric_value("cpu.a", UNTIL - 60, 25.0);

        run(&ctx, "t1", UNTIL);

        assert!(db.take_events().is_empty());
        let check = db.last_check("t1").unwrap();
        assert_eq!(check.state, State::NoData);
        assert!(check.metrics.is_empty());
        assert_eq!(ctx.metrics.snapshot().muted, 1);
    }

    #[test]
    fn silenced_tag_mutes_whole_trigger() {
        let (db, ctx) = setup();
        let mut trigger = rising("t1", "cpu.a");
        trigger.tags = vec!["team-db".to_string()];
        db.save_trigger(trigger);
        db.silence_tag("team-*", UNTIL + 10).unwrap();
        db.add_metric_value("cpu.a", UNTIL - 60, 25.0);

        run(&ctx, "t1", UNTIL);

        assert!(db.take_events().is_empty());
        assert!(db.last_check("t1").unwrap().metrics.is_empty());
    }

    #[test]
    fn silenced_metric_is_skipped() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "cpu.*"));
        db.silence_metric("cpu.a", UNTIL + 1000).unwrap();
        db.add_metric_value("cpu.a", UNTIL - 60, 25.0);
        db.add_metric_value("cpu.b", UNTIL - 60, 25.0);

        run(&ctx, "t1", UNTIL);

        let check = db.last_check("t1").unwrap();
        assert!(!check.metrics.contains_key("cpu.a"));
        assert_eq!(check.metrics["cpu.b"].state, State::Error);
        assert!(db.take_events().iter().all(|e| e.metric != "cpu.a"));
    }

    #[test]
    fn trigger_maintenance_mutes_metric_events() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "cpu.*"));
        db.put_last_check(
            "t1",
            seeded(
                State::Ok,
                UNTIL - 300,
                vec![
                    ("cpu.a", metric(State::Ok, UNTIL - 600, UNTIL - 600)),
                    ("cpu.b", metric(State::Ok, UNTIL - 600, UNTIL - 600)),
                ],
            ),
        );
        let mut maintenance = Maintenance::new();
        maintenance.add_at("*", UNTIL - 300, UNTIL - 100);
        db.set_maintenance("t1", &maintenance).unwrap();
        db.add_metric_values("cpu.a", &[(UNTIL - 240, 25.0), (UNTIL - 60, 25.0)]);
        db.add_metric_value("cpu.b", UNTIL - 240, 25.0);

        run(&ctx, "t1", UNTIL);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, "cpu.a");
        assert_eq!(events[0].timestamp, UNTIL - 60);
        let check = db.last_check("t1").unwrap();
        assert!(!check.metrics["cpu.a"].suppressed);
        let cpu_b = &check.metrics["cpu.b"];
        assert_eq!(cpu_b.state, State::Error);
        assert!(cpu_b.suppressed);
        assert!(ctx.metrics.snapshot().muted >= 2);
    }

    #[test]
    fn maintenance_suppresses_then_resurfaces() {
        let (db, ctx) = setup();
        db.save_trigger(rising("t1", "cpu.a"));
        db.put_last_check(
            "t1",
            seeded(State::Ok, UNTIL - 300, vec![("cpu.a", metric(State::Ok, UNTIL - 600, UNTIL - 600))]),
        );
        let mut maintenance = Maintenance::new();
        maintenance.add_at("cpu.a", UNTIL - 300, UNTIL - 100);
        db.set_maintenance("t1", &maintenance).unwrap();
        db.add_metric_values("cpu.a", &[(UNTIL - 240, 25.0), (UNTIL - 60, 25.0)]);

        run(&ctx, "t1", UNTIL);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, "cpu.a");
        assert_eq!(events[0].timestamp, UNTIL - 60);
        assert_eq!(events[0].state, State::Error);
        let cpu = &db.last_check("t1").unwrap().metrics["cpu.a"];
        assert_eq!(cpu.state, State::Error);
        assert!(!cpu.suppressed);
        assert_eq!(cpu.event_timestamp, UNTIL - 60);
    }
}

mod inheritance_tests {
    use super::*;

    #[test]
    fn resolved_parent_schedules_child() {
        let (db, ctx) = setup();
        db.save_trigger(rising("parent", "cpu.a"));
        db.put_last_check(
            "parent",
            seeded(State::Ok, UNTIL - 60, vec![("cpu.a", metric(State::Error, UNTIL - 600, UNTIL - 600))]),
        );
        db.add_child_event("parent", "cpu.a", "child", &["x".to_string()]);
        db.add_metric_value("cpu.a", UNTIL - 60, 5.0);

        run(&ctx, "parent", UNTIL);

        let forced = db.get_trigger_forced_notifications("child").unwrap();
        assert_eq!(forced.get("x"), Some(&(UNTIL + CHILD_FORCE_DELAY_SECS)));
    }

    #[test]
    fn wildcard_forced_notification_resends_trigger_state() {
        let (db, ctx) = setup();
        db.save_trigger(rising("child", "movingAverage(x, 5)"));
        let mut last = seeded(State::Exception, UNTIL - 60, vec![]);
        last.message = Some("Unknown function: \"movingAverage\"".to_string());
        db.put_last_check("child", last);
        db.add_trigger_forced_notification("child", &["*".to_string()], UNTIL - 10)
            .unwrap();
        db.add_metric_value("x", UNTIL - 60, 5.0);

        run(&ctx, "child", UNTIL);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_trigger_event);
        assert!(events[0].is_force_sent);
        assert_eq!(events[0].state, State::Exception);
        assert_eq!(events[0].old_state, State::Exception);
        assert_eq!(events[0].message.as_deref(), Some(FORCED_MESSAGE));
        assert!(db.get_trigger_forced_notifications("child").unwrap().is_empty());

        run(&ctx, "child", UNTIL + 60);
        assert!(db.take_events().is_empty());
    }

    #[test]
    fn forced_notification_resends_unchanged_state() {
        let (db, ctx) = setup();
        db.save_trigger(rising("child", "x"));
        db.put_last_check(
            "child",
            seeded(State::Ok, UNTIL - 60, vec![("x", metric(State::Warn, UNTIL - 600, UNTIL - 600))]),
        );
        db.add_trigger_forced_notification("child", &["x".to_string()], UNTIL - 10)
            .unwrap();
        db.add_trigger_forced_notification("child", &["y".to_string()], UNTIL + 500)
            .unwrap();
        db.add_metric_value("x", UNTIL - 60, 15.0);

        run(&ctx, "child", UNTIL);

        let events = db.take_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_force_sent);
        assert_eq!(events[0].state, State::Warn);
        assert_eq!(events[0].message.as_deref(), Some(FORCED_MESSAGE));
        assert!(db.last_check("child").unwrap().metrics["x"].is_forced);

        let forced = db.get_trigger_forced_notifications("child").unwrap();
        assert!(!forced.contains_key("x"));
        assert!(forced.contains_key("y"));
    }
}
