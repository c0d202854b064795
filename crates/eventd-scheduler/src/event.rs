use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use eventd_core::{
    Definer, EventKey, EventRecord, EventSchedule, EventStatus, OnCompletion, RoutineBody,
};

use crate::schedule::ScheduleResult;

/// Per-event execution bookkeeping, independent of the shared cache lock.
///
/// Shared between the cached entity and any in-flight worker task, so the
/// at-most-one-concurrent-execution check never serialises behind the cache
/// lock and outlives cache eviction of the event.
#[derive(Debug, Default)]
pub struct ExecutionGuard {
    running: AtomicBool,
}

impl ExecutionGuard {
    /// Atomically claim the execution slot. Returns false if a previous
    /// firing of this event is still in flight and the caller skips the cycle.
    pub fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the slot. Called by the worker task on completion regardless
    /// of the routine's outcome.
    pub fn end(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// In-memory representation of one scheduled event.
///
/// All scheduling fields are guarded by the cache lock that owns the
/// containing queue; only `guard` is shared with worker tasks.
#[derive(Debug, Clone)]
pub struct Event {
    pub key: EventKey,
    pub definer: Definer,
    pub body: RoutineBody,
    pub schedule: EventSchedule,
    pub status: EventStatus,
    pub on_completion: OnCompletion,
    pub last_executed: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Next planned firing; `None` means no more executions.
    pub next_execution: Option<DateTime<Utc>>,
    pub no_more_executions: bool,
    /// Set when on_completion is DROP and the schedule is exhausted; the
    /// engine then deletes the catalog row after the final firing.
    pub pending_drop: bool,
    pub guard: Arc<ExecutionGuard>,
}

impl Event {
    /// Build the in-memory entity from a catalog row, with fresh derived
    /// state and a fresh execution guard.
    pub fn from_record(record: EventRecord) -> Self {
        Self {
            key: record.key,
            definer: record.definer,
            body: record.body,
            schedule: record.schedule,
            status: record.status,
            on_completion: record.on_completion,
            last_executed: record.last_executed,
            created: record.created,
            modified: record.modified,
            next_execution: record.next_execution,
            no_more_executions: false,
            pending_drop: false,
            guard: Arc::new(ExecutionGuard::default()),
        }
    }

    /// Record that a firing started at `now`.
    pub fn mark_executed(&mut self, now: DateTime<Utc>) {
        self.last_executed = Some(now);
    }

    /// Apply the calculator's output to the derived scheduling state.
    pub fn apply_schedule_result(&mut self, result: &ScheduleResult) {
        self.next_execution = result.next_execution;
        self.status = result.status;
        self.no_more_executions = result.no_more_executions;
        self.pending_drop = result.pending_drop;
    }
}
