// End-to-end engine behaviour against an in-memory catalog and a recording
// executor: bulk load, firing and rescheduling, DDL notifications racing the
// loop, and drain-on-stop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use tokio::time::timeout;

use eventd_catalog::{CatalogStore, SqliteCatalog};
use eventd_core::{
    Definer, EventKey, EventRecord, EventSchedule, EventStatus, IntervalUnit, OnCompletion,
    RoutineBody, SchedulerConfig,
};
use eventd_scheduler::{
    CompileError, EngineState, ExecutionContext, ExecutionError, RoutineExecutor, Scheduler,
    SchedulerError,
};

/// Executor that reports every completed execution over a channel.
/// Bodies containing "BROKEN" fail validation.
struct RecordingExecutor {
    tx: mpsc::UnboundedSender<EventKey>,
    delay: Duration,
}

#[async_trait]
impl RoutineExecutor for RecordingExecutor {
    fn validate(&self, body: &RoutineBody) -> Result<(), CompileError> {
        if body.as_str().contains("BROKEN") {
            Err(CompileError("syntax error near BROKEN".to_string()))
        } else {
            Ok(())
        }
    }

    async fn execute(
        &self,
        _body: &RoutineBody,
        ctx: ExecutionContext,
    ) -> Result<(), ExecutionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let _ = self.tx.send(ctx.key);
        Ok(())
    }
}

struct Harness {
    catalog: Arc<SqliteCatalog>,
    scheduler: Scheduler,
    rx: mpsc::UnboundedReceiver<EventKey>,
}

fn harness_with_delay(delay: Duration) -> Harness {
    let catalog = Arc::new(SqliteCatalog::in_memory().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let executor = Arc::new(RecordingExecutor { tx, delay });
    let config = SchedulerConfig {
        enabled: true,
        poll_interval_ms: 10,
        max_concurrent_executions: None,
    };
    let scheduler = Scheduler::new(&config, catalog.clone(), executor);
    Harness {
        catalog,
        scheduler,
        rx,
    }
}

fn harness() -> Harness {
    harness_with_delay(Duration::ZERO)
}

fn record(name: &str, schedule: EventSchedule) -> EventRecord {
    let now = Utc::now();
    EventRecord {
        key: EventKey::new("db1", name),
        definer: Definer {
            user: "root".to_string(),
            host: "localhost".to_string(),
        },
        body: RoutineBody::new("CALL housekeeping()"),
        schedule,
        status: EventStatus::Enabled,
        on_completion: OnCompletion::Preserve,
        last_executed: None,
        next_execution: None,
        created: now,
        modified: now,
    }
}

fn every_second(name: &str) -> EventRecord {
    record(
        name,
        EventSchedule::Recurring {
            interval_value: 1,
            interval_unit: IntervalUnit::Second,
            starts: None,
            ends: None,
        },
    )
}

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn fires_and_reschedules_recurring_event() {
    let mut h = harness();
    let rec = every_second("tick");
    h.catalog.insert(&rec).unwrap();

    h.scheduler.start().await.unwrap();
    assert_eq!(h.scheduler.cached_events(), 1);

    // First firing is immediate (never executed → next = now), the second
    // one interval later.
    let first = timeout(RECV_TIMEOUT, h.rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, rec.key);
    let second = timeout(RECV_TIMEOUT, h.rx.recv()).await.unwrap().unwrap();
    assert_eq!(second, rec.key);

    // Runtime state was persisted.
    let row = h.catalog.find(&rec.key).unwrap().unwrap();
    assert!(row.last_executed.is_some());
    assert!(row.next_execution.is_some());

    h.scheduler.stop().await.unwrap();
    assert_eq!(h.scheduler.cached_events(), 0);
}

#[tokio::test]
async fn one_shot_not_preserve_is_dropped_after_firing() {
    let mut h = harness();
    let mut rec = record(
        "once",
        EventSchedule::OneShot {
            execute_at: Utc::now(),
        },
    );
    rec.on_completion = OnCompletion::Drop;
    h.catalog.insert(&rec).unwrap();

    h.scheduler.start().await.unwrap();
    let fired = timeout(RECV_TIMEOUT, h.rx.recv()).await.unwrap().unwrap();
    assert_eq!(fired, rec.key);

    // The catalog delete happens in the same lock-holding step as the cache
    // removal, before the worker even reports back.
    assert!(h.catalog.find(&rec.key).unwrap().is_none());
    assert_eq!(h.scheduler.cached_events(), 0);

    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn create_while_running_caches_and_fires() {
    let mut h = harness();
    h.scheduler.start().await.unwrap();
    assert_eq!(h.scheduler.cached_events(), 0);

    let rec = every_second("late_arrival");
    h.catalog.insert(&rec).unwrap();
    h.scheduler.consistency_manager().on_create(rec.clone()).unwrap();
    assert_eq!(h.scheduler.cached_events(), 1);

    let fired = timeout(RECV_TIMEOUT, h.rx.recv()).await.unwrap().unwrap();
    assert_eq!(fired, rec.key);

    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn create_while_stopped_stays_catalog_only() {
    let h = harness();
    let rec = every_second("early");
    h.catalog.insert(&rec).unwrap();
    h.scheduler.consistency_manager().on_create(rec).unwrap();
    assert_eq!(h.scheduler.cached_events(), 0);
}

#[tokio::test]
async fn compile_error_on_create_is_surfaced_and_not_cached() {
    let h = harness();
    h.scheduler.start().await.unwrap();

    let mut rec = every_second("bad");
    rec.body = RoutineBody::new("BROKEN");
    let err = h.scheduler.consistency_manager().on_create(rec).unwrap_err();
    assert!(matches!(err, SchedulerError::Compile { .. }));
    assert_eq!(h.scheduler.cached_events(), 0);

    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn disable_evicts_and_reenable_recaches() {
    let h = harness();
    let rec = record(
        "toggle",
        EventSchedule::Recurring {
            interval_value: 1,
            interval_unit: IntervalUnit::Hour,
            starts: Some(Utc::now() + ChronoDuration::hours(1)),
            ends: None,
        },
    );
    h.catalog.insert(&rec).unwrap();
    h.scheduler.start().await.unwrap();
    assert_eq!(h.scheduler.cached_events(), 1);

    let manager = h.scheduler.consistency_manager();

    let mut disabled = rec.clone();
    disabled.status = EventStatus::Disabled;
    manager.on_update(&rec.key, disabled.clone()).unwrap();
    assert_eq!(h.scheduler.cached_events(), 0);

    let mut enabled = disabled;
    enabled.status = EventStatus::Enabled;
    manager.on_update(&rec.key, enabled).unwrap();
    assert_eq!(h.scheduler.cached_events(), 1);

    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn rename_reindexes_under_new_identity() {
    let h = harness();
    let rec = record(
        "old_name",
        EventSchedule::Recurring {
            interval_value: 1,
            interval_unit: IntervalUnit::Hour,
            starts: Some(Utc::now() + ChronoDuration::hours(1)),
            ends: None,
        },
    );
    h.catalog.insert(&rec).unwrap();
    h.scheduler.start().await.unwrap();

    let mut renamed = rec.clone();
    renamed.key = EventKey::new("db1", "new_name");
    h.scheduler
        .consistency_manager()
        .on_update(&rec.key, renamed.clone())
        .unwrap();
    assert_eq!(h.scheduler.cached_events(), 1);

    // Dropping the new identity empties the cache; the old one is gone.
    h.scheduler.consistency_manager().on_drop(&renamed.key).unwrap();
    assert_eq!(h.scheduler.cached_events(), 0);

    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn drop_racing_firing_fires_at_most_once() {
    let mut h = harness();
    let rec = record(
        "contested",
        EventSchedule::OneShot {
            execute_at: Utc::now() + ChronoDuration::milliseconds(50),
        },
    );
    h.catalog.insert(&rec).unwrap();
    h.scheduler.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(45)).await;
    h.scheduler.consistency_manager().on_drop(&rec.key).unwrap();

    // After the drop is observed the event is gone from the cache; whatever
    // happened, it fired at most once and nothing fires from here on.
    assert_eq!(h.scheduler.cached_events(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut firings = 0;
    while h.rx.try_recv().is_ok() {
        firings += 1;
    }
    assert!(firings <= 1, "event fired {firings} times after a drop race");

    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn validation_failure_on_load_disables_event() {
    let h = harness();
    let mut rec = every_second("broken");
    rec.body = RoutineBody::new("BROKEN");
    h.catalog.insert(&rec).unwrap();

    let mut ok = every_second("fine");
    ok.key = EventKey::new("db1", "fine");
    h.catalog.insert(&ok).unwrap();

    h.scheduler.start().await.unwrap();
    // The bad event must not block the good one.
    assert_eq!(h.scheduler.cached_events(), 1);
    let row = h.catalog.find(&rec.key).unwrap().unwrap();
    assert_eq!(row.status, EventStatus::Disabled);

    h.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn stop_drains_in_flight_workers() {
    let mut h = harness_with_delay(Duration::from_millis(300));
    let rec = record(
        "slow",
        EventSchedule::OneShot {
            execute_at: Utc::now(),
        },
    );
    h.catalog.insert(&rec).unwrap();
    h.scheduler.start().await.unwrap();

    // Let the firing dispatch, then stop while the worker is sleeping.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.scheduler.stop().await.unwrap();

    // stop() waited for the worker: its completion report is already here.
    let fired = h.rx.try_recv().expect("worker was cancelled instead of drained");
    assert_eq!(fired, rec.key);
}

#[tokio::test]
async fn lifecycle_transitions_are_exclusive() {
    let h = harness();
    assert_eq!(h.scheduler.state().await, EngineState::Stopped);
    assert!(matches!(
        h.scheduler.stop().await,
        Err(SchedulerError::NotRunning)
    ));

    h.scheduler.start().await.unwrap();
    assert_eq!(h.scheduler.state().await, EngineState::Running);
    assert!(h.scheduler.is_running());
    assert!(matches!(
        h.scheduler.start().await,
        Err(SchedulerError::AlreadyRunning)
    ));

    h.scheduler.stop().await.unwrap();
    assert_eq!(h.scheduler.state().await, EngineState::Stopped);
    assert!(!h.scheduler.is_running());

    // A stopped scheduler can be started again.
    h.scheduler.start().await.unwrap();
    h.scheduler.stop().await.unwrap();
}
