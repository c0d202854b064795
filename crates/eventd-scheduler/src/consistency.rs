use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use eventd_core::{EventKey, EventRecord, EventStatus};

use crate::engine::Shared;
use crate::error::{Result, SchedulerError};
use crate::event::Event;
use crate::schedule::compute_next;

/// Applies CREATE/ALTER/DROP notifications to the scheduler's cache.
///
/// The DDL layer calls these after its own catalog transaction commits, so
/// the catalog row already reflects the change; this manager only keeps the
/// in-memory cache consistent with it. Every operation holds the shared
/// cache lock for its whole duration, which is what serialises DDL against
/// an imminent firing of the same event.
#[derive(Clone)]
pub struct ConsistencyManager {
    shared: Arc<Shared>,
}

impl ConsistencyManager {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// A CREATE EVENT committed. Caches the event when the scheduler is
    /// running and the event is enabled; otherwise it stays catalog-only.
    pub fn on_create(&self, record: EventRecord) -> Result<()> {
        record.schedule.validate()?;
        let mut queue = self.shared.queue.lock().unwrap();
        if !self.shared.running.load(Ordering::Acquire) || record.status != EventStatus::Enabled {
            return Ok(());
        }
        let key = record.key.clone();
        self.shared
            .executor
            .validate(&record.body)
            .map_err(|e| SchedulerError::Compile {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let mut event = Event::from_record(record);
        let result = compute_next(&event, Utc::now());
        event.apply_schedule_result(&result);
        if event.next_execution.is_some() {
            info!(key = %key, next = ?event.next_execution, "event cached");
            queue.insert(event);
        }
        Ok(())
    }

    /// An ALTER EVENT committed. The old cache entry is dropped and, when
    /// the new definition is enabled, a fresh one is built under the new
    /// identity (a differing `record.key` is a rename).
    pub fn on_update(&self, old_key: &EventKey, record: EventRecord) -> Result<()> {
        record.schedule.validate()?;
        let mut queue = self.shared.queue.lock().unwrap();
        queue.remove(old_key);
        if record.key != *old_key {
            debug!(old = %old_key, new = %record.key, "event renamed");
        }
        if !self.shared.running.load(Ordering::Acquire) || record.status != EventStatus::Enabled {
            return Ok(());
        }
        let key = record.key.clone();
        self.shared
            .executor
            .validate(&record.body)
            .map_err(|e| SchedulerError::Compile {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let mut event = Event::from_record(record);
        let result = compute_next(&event, Utc::now());
        event.apply_schedule_result(&result);
        if event.next_execution.is_some() {
            info!(key = %key, next = ?event.next_execution, "event re-cached");
            queue.insert(event);
        }
        Ok(())
    }

    /// A DROP EVENT committed. Idempotent: a disabled event was never
    /// cached, so removing it is a no-op on the cache.
    pub fn on_drop(&self, key: &EventKey) -> Result<()> {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.remove(key).is_some() {
            info!(key = %key, "event evicted from cache");
        }
        Ok(())
    }
}
