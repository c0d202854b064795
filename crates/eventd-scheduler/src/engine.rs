use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use eventd_catalog::CatalogStore;
use eventd_core::{EventKey, EventStatus, SchedulerConfig};

use crate::consistency::ConsistencyManager;
use crate::error::{Result, SchedulerError};
use crate::event::Event;
use crate::executor::{ExecutionContext, RoutineExecutor};
use crate::queue::EventQueue;
use crate::schedule::compute_next;

/// Lifecycle of the scheduling subsystem. Transitions only ever move
/// `Stopped → Running → Stopping → Stopped`, guarded by the start/stop lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
    Stopping,
}

/// State shared between the engine loop, worker tasks and the
/// consistency manager.
pub(crate) struct Shared {
    /// The cache lock: identity map + due-time min-heap.
    pub(crate) queue: Mutex<EventQueue>,
    pub(crate) catalog: Arc<dyn CatalogStore>,
    pub(crate) executor: Arc<dyn RoutineExecutor>,
    /// Mirror of the Running state readable without the start/stop lock,
    /// so DDL notifications (sync callers) can check it cheaply.
    pub(crate) running: AtomicBool,
    /// Optional global cap on concurrently executing routines.
    worker_permits: Option<Arc<Semaphore>>,
    /// In-flight worker tasks, drained (not cancelled) on stop.
    workers: AsyncMutex<JoinSet<()>>,
}

struct Lifecycle {
    state: EngineState,
    shutdown: Option<watch::Sender<bool>>,
    main: Option<JoinHandle<()>>,
}

/// The event scheduler: owns the cache, runs the main waiting/dispatch
/// loop, and spawns one ephemeral worker task per firing.
///
/// The catalog store and routine executor are injected collaborators; the
/// scheduler implements neither. At most one instance is Running at a time
/// (per instance; the start/stop lock refuses a second `start`).
pub struct Scheduler {
    shared: Arc<Shared>,
    lifecycle: AsyncMutex<Lifecycle>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        catalog: Arc<dyn CatalogStore>,
        executor: Arc<dyn RoutineExecutor>,
    ) -> Self {
        let worker_permits = config
            .max_concurrent_executions
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(EventQueue::new()),
                catalog,
                executor,
                running: AtomicBool::new(false),
                worker_permits,
                workers: AsyncMutex::new(JoinSet::new()),
            }),
            lifecycle: AsyncMutex::new(Lifecycle {
                state: EngineState::Stopped,
                shutdown: None,
                main: None,
            }),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    /// Handle through which the DDL layer reports committed
    /// CREATE/ALTER/DROP EVENT statements.
    pub fn consistency_manager(&self) -> ConsistencyManager {
        ConsistencyManager::new(self.shared.clone())
    }

    pub async fn state(&self) -> EngineState {
        self.lifecycle.lock().await.state
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of currently cached events.
    pub fn cached_events(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Transition Stopped → Running: bulk-load every enabled catalog row
    /// into the cache, then spawn the main loop.
    ///
    /// A single bad event never blocks startup: validation failures are
    /// persisted back as disabled and skipped; events whose schedule is
    /// already exhausted are dropped or disabled per their on-completion
    /// policy.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != EngineState::Stopped {
            return Err(SchedulerError::AlreadyRunning);
        }

        let records = self.shared.catalog.scan_enabled()?;
        let now = Utc::now();
        let (mut loaded, mut skipped, mut dropped) = (0u32, 0u32, 0u32);
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.clear();
            for record in records {
                let key = record.key.clone();
                let mut event = Event::from_record(record);

                if let Err(e) = self.shared.executor.validate(&event.body) {
                    warn!(key = %key, error = %e, "routine failed validation; disabling event");
                    if let Err(pe) = self.shared.catalog.update_runtime(
                        &key,
                        event.last_executed,
                        None,
                        EventStatus::Disabled,
                    ) {
                        error!(key = %key, error = %pe, "failed to persist disabled status");
                    }
                    skipped += 1;
                    continue;
                }

                let result = compute_next(&event, now);
                event.apply_schedule_result(&result);
                if event.next_execution.is_none() {
                    if event.pending_drop {
                        if let Err(e) = self.shared.catalog.delete(&key) {
                            error!(key = %key, error = %e, "failed to drop completed event");
                        }
                        dropped += 1;
                    } else {
                        if let Err(e) = self.shared.catalog.update_runtime(
                            &key,
                            event.last_executed,
                            None,
                            EventStatus::Disabled,
                        ) {
                            error!(key = %key, error = %e, "failed to persist disabled status");
                        }
                        skipped += 1;
                    }
                    continue;
                }

                queue.insert(event);
                loaded += 1;
            }
        }

        let (tx, rx) = watch::channel(false);
        let main = tokio::spawn(run_loop(self.shared.clone(), rx, self.poll_interval));
        lifecycle.shutdown = Some(tx);
        lifecycle.main = Some(main);
        lifecycle.state = EngineState::Running;
        self.shared.running.store(true, Ordering::Release);
        info!(loaded, skipped, dropped, "event scheduler started");
        Ok(())
    }

    /// Transition Running → Stopping → Stopped: the loop observes shutdown
    /// within one wait increment, in-flight workers are drained (never
    /// cancelled), and the cache is emptied. The catalog is untouched.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != EngineState::Running {
            return Err(SchedulerError::NotRunning);
        }
        lifecycle.state = EngineState::Stopping;
        self.shared.running.store(false, Ordering::Release);

        if let Some(tx) = lifecycle.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(main) = lifecycle.main.take() {
            let _ = main.await;
        }

        let mut workers = self.shared.workers.lock().await;
        while workers.join_next().await.is_some() {}
        drop(workers);

        self.shared.queue.lock().unwrap().clear();
        lifecycle.state = EngineState::Stopped;
        info!("event scheduler stopped");
        Ok(())
    }
}

/// One decision of the main loop, made under the cache lock.
enum LoopStep {
    /// Re-inspect immediately (a defensive eviction happened).
    Retry,
    /// Nothing due; sleep at most this long, interruptible by shutdown.
    Wait(Duration),
    /// The top event is due.
    Fire(EventKey),
}

/// Main scheduling loop. Runs until the shutdown channel flips.
///
/// Waiting towards a due time happens in increments of at most the poll
/// interval, re-inspecting the queue top each round, so a CREATE that
/// introduces an earlier event, an ALTER/DROP of the current top, or a
/// stop() request is observed within one increment.
async fn run_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>, poll: Duration) {
    info!("scheduler loop running");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let step = inspect_top(&shared, poll);
        let wait = match step {
            LoopStep::Retry => continue,
            LoopStep::Fire(key) => {
                fire(&shared, &key).await;
                continue;
            }
            LoopStep::Wait(d) => d,
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {}
        }
    }
    info!("scheduler loop exited");
}

fn inspect_top(shared: &Shared, poll: Duration) -> LoopStep {
    let mut queue = shared.queue.lock().unwrap();
    let Some(top) = queue.peek_min() else {
        return LoopStep::Wait(poll);
    };

    // Should not occur given the cache invariants; evict rather than spin.
    if top.status == EventStatus::Disabled {
        let key = top.key.clone();
        warn!(key = %key, "disabled event at queue top; evicting");
        queue.remove(&key);
        return LoopStep::Retry;
    }
    let key = top.key.clone();
    let Some(due) = top.next_execution else {
        warn!(key = %key, "queued event without next execution time; evicting");
        queue.remove(&key);
        return LoopStep::Retry;
    };

    let now = Utc::now();
    if due <= now {
        LoopStep::Fire(key)
    } else {
        let until = (due - now).to_std().unwrap_or(Duration::ZERO);
        LoopStep::Wait(until.min(poll))
    }
}

/// Fire the event at `key`, if it is still cached, still enabled and still
/// due. The re-checks under the cache lock are what resolve races against
/// DDL: either our inspect-and-mark step wins (the event fires once more)
/// or the remove won (we find nothing and walk away).
async fn fire(shared: &Arc<Shared>, key: &EventKey) {
    type Dispatch = (
        eventd_core::RoutineBody,
        ExecutionContext,
        Arc<crate::event::ExecutionGuard>,
        Option<tokio::sync::OwnedSemaphorePermit>,
    );

    let dispatch: Option<Dispatch> = {
        let mut queue = shared.queue.lock().unwrap();
        let now = Utc::now();

        let Some(event) = queue.get_mut(key) else {
            // Dropped or altered between our peek and now.
            return;
        };
        match event.next_execution {
            Some(due) if due <= now => {}
            // Rescheduled under us, or a spurious wake; restart the loop.
            _ => return,
        }
        if event.status == EventStatus::Disabled {
            queue.remove(key);
            return;
        }

        event.mark_executed(now);
        let result = compute_next(event, now);
        event.apply_schedule_result(&result);

        // Persistence failure is reported but does not block this firing.
        if let Err(e) = shared.catalog.update_runtime(
            key,
            event.last_executed,
            event.next_execution,
            event.status,
        ) {
            error!(key = %key, error = %e, "failed to persist post-firing state");
        }

        let mut permit = None;
        let mut dispatchable = true;
        if let Some(sem) = &shared.worker_permits {
            match sem.clone().try_acquire_owned() {
                Ok(p) => permit = Some(p),
                Err(_) => {
                    warn!(key = %key, "worker limit reached; skipping this firing");
                    dispatchable = false;
                }
            }
        }

        let dispatch = if dispatchable && event.guard.try_begin() {
            let ctx = ExecutionContext {
                execution_id: Uuid::new_v4(),
                key: key.clone(),
                definer: event.definer.clone(),
                scheduled_at: now,
            };
            Some((event.body.clone(), ctx, event.guard.clone(), permit))
        } else {
            if dispatchable {
                warn!(key = %key, "previous execution still in flight; skipping this firing");
            }
            None
        };

        let exhausted =
            event.no_more_executions || event.status == EventStatus::Disabled;
        let pending_drop = event.pending_drop;
        if exhausted {
            queue.remove(key);
            if pending_drop {
                match shared.catalog.delete(key) {
                    Ok(()) => info!(key = %key, "event dropped after final execution"),
                    Err(e) => error!(key = %key, error = %e, "failed to drop completed event"),
                }
            }
        } else {
            queue.resort_after_update(key);
        }
        dispatch
    };

    let Some((body, ctx, guard, permit)) = dispatch else {
        return;
    };

    let executor = shared.executor.clone();
    let mut workers = shared.workers.lock().await;
    // Reap already-finished workers so the set doesn't grow without bound.
    while workers.try_join_next().is_some() {}
    workers.spawn(async move {
        let _permit = permit;
        let execution_id = ctx.execution_id;
        let key = ctx.key.clone();
        debug!(key = %key, execution_id = %execution_id, "executing event");
        if let Err(e) = executor.execute(&body, ctx).await {
            warn!(key = %key, execution_id = %execution_id, error = %e, "event execution failed");
        }
        guard.end();
    });
}
