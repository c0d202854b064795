use std::collections::HashMap;

use chrono::{DateTime, Utc};

use eventd_core::EventKey;

use crate::event::Event;

/// One heap slot: the event's identity plus a copy of its sort key.
///
/// The due time is duplicated here so re-heapifying never has to chase the
/// identity map; `resort_after_update` refreshes the copy.
#[derive(Debug, Clone)]
struct HeapSlot {
    key: EventKey,
    due: DateTime<Utc>,
}

/// The scheduler's cache: an identity map over all cached events and a
/// min-heap ordered by `next_execution`, with an identity→position index so
/// removal and in-place key changes are O(log n).
///
/// Events whose `next_execution` is `None` are held in the map but never in
/// the heap. The heap top is always the globally smallest due time among
/// cached events. All access goes through the engine's shared cache lock.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: HashMap<EventKey, Event>,
    heap: Vec<HeapSlot>,
    positions: HashMap<EventKey, usize>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached events (queued or not).
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, key: &EventKey) -> Option<&Event> {
        self.events.get(key)
    }

    /// Mutable access for the engine's lock-holding inspect-and-mark step.
    /// Callers that change `next_execution` must follow up with
    /// [`resort_after_update`](Self::resort_after_update) or
    /// [`remove`](Self::remove).
    pub fn get_mut(&mut self, key: &EventKey) -> Option<&mut Event> {
        self.events.get_mut(key)
    }

    /// Add an event, replacing any previous entry under the same identity.
    /// Only events with a next execution time enter the heap.
    pub fn insert(&mut self, event: Event) {
        self.remove(&event.key);
        if let Some(due) = event.next_execution {
            let slot = HeapSlot {
                key: event.key.clone(),
                due,
            };
            self.heap.push(slot);
            let idx = self.heap.len() - 1;
            self.positions.insert(event.key.clone(), idx);
            self.sift_up(idx);
        }
        self.events.insert(event.key.clone(), event);
    }

    /// Remove by identity. A no-op returning `None` when absent; disabled
    /// events are evicted eagerly and may already be gone by the time a
    /// DROP notification arrives.
    pub fn remove(&mut self, key: &EventKey) -> Option<Event> {
        if let Some(pos) = self.positions.get(key).copied() {
            self.remove_slot(pos);
        }
        self.events.remove(key)
    }

    /// The cached event with the smallest `next_execution`, if any.
    pub fn peek_min(&self) -> Option<&Event> {
        let top = self.heap.first()?;
        self.events.get(&top.key)
    }

    /// Re-heapify a single entry whose `next_execution` changed in place.
    /// Handles all transitions: key change, newly schedulable (entered the
    /// heap), and no-longer-schedulable (left the heap).
    pub fn resort_after_update(&mut self, key: &EventKey) {
        let next = match self.events.get(key) {
            Some(event) => event.next_execution,
            None => return,
        };
        match (self.positions.get(key).copied(), next) {
            (Some(pos), Some(due)) => {
                self.heap[pos].due = due;
                self.sift_up(pos);
                self.sift_down(pos);
            }
            (Some(pos), None) => {
                self.remove_slot(pos);
            }
            (None, Some(due)) => {
                self.heap.push(HeapSlot {
                    key: key.clone(),
                    due,
                });
                let idx = self.heap.len() - 1;
                self.positions.insert(key.clone(), idx);
                self.sift_up(idx);
            }
            (None, None) => {}
        }
    }

    /// Drop everything. Used on scheduler shutdown; the catalog is untouched.
    pub fn clear(&mut self) {
        self.events.clear();
        self.heap.clear();
        self.positions.clear();
    }

    fn remove_slot(&mut self, pos: usize) {
        let removed = self.heap.swap_remove(pos);
        self.positions.remove(&removed.key);
        if pos < self.heap.len() {
            let moved = self.heap[pos].key.clone();
            self.positions.insert(moved, pos);
            self.sift_up(pos);
            self.sift_down(pos);
        }
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions.insert(self.heap[a].key.clone(), a);
        self.positions.insert(self.heap[b].key.clone(), b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx].due < self.heap[parent].due {
                self.swap_slots(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < self.heap.len() && self.heap[left].due < self.heap[smallest].due {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].due < self.heap[smallest].due {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap_slots(idx, smallest);
            idx = smallest;
        }
    }

    /// Full structural check, run after every mutation in tests.
    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.heap.len(), self.positions.len());
        for (i, slot) in self.heap.iter().enumerate() {
            assert_eq!(self.positions.get(&slot.key), Some(&i), "stale position index");
            let event = self.events.get(&slot.key).expect("heap entry missing from map");
            assert_eq!(event.next_execution, Some(slot.due), "heap key out of date");
            if i > 0 {
                let parent = &self.heap[(i - 1) / 2];
                assert!(parent.due <= slot.due, "heap property violated");
            }
        }
        for (key, event) in &self.events {
            if event.next_execution.is_some() {
                assert!(self.positions.contains_key(key), "schedulable event not queued");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eventd_core::{
        Definer, EventSchedule, EventStatus, IntervalUnit, OnCompletion, RoutineBody,
    };
    use std::sync::Arc;

    fn ts(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, m, 0).unwrap()
    }

    fn event(name: &str, next: Option<DateTime<Utc>>) -> Event {
        Event {
            key: EventKey::new("db1", name),
            definer: Definer {
                user: "root".to_string(),
                host: "localhost".to_string(),
            },
            body: RoutineBody::new("CALL f()"),
            schedule: EventSchedule::Recurring {
                interval_value: 1,
                interval_unit: IntervalUnit::Minute,
                starts: None,
                ends: None,
            },
            status: EventStatus::Enabled,
            on_completion: OnCompletion::Preserve,
            last_executed: None,
            created: ts(0),
            modified: ts(0),
            next_execution: next,
            no_more_executions: false,
            pending_drop: false,
            guard: Arc::new(crate::event::ExecutionGuard::default()),
        }
    }

    #[test]
    fn peek_min_is_always_the_earliest() {
        let mut queue = EventQueue::new();
        for (name, minute) in [("e3", 30), ("e1", 10), ("e4", 40), ("e2", 20)] {
            queue.insert(event(name, Some(ts(minute))));
            queue.check_invariants();
        }
        assert_eq!(queue.peek_min().unwrap().key.name, "e1");

        queue.remove(&EventKey::new("db1", "e1"));
        queue.check_invariants();
        assert_eq!(queue.peek_min().unwrap().key.name, "e2");
    }

    #[test]
    fn event_without_next_time_is_never_queued() {
        let mut queue = EventQueue::new();
        queue.insert(event("idle", None));
        queue.check_invariants();
        assert_eq!(queue.len(), 1);
        assert!(queue.peek_min().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut queue = EventQueue::new();
        queue.insert(event("e1", Some(ts(5))));
        assert!(queue.remove(&EventKey::new("db1", "e1")).is_some());
        assert!(queue.remove(&EventKey::new("db1", "e1")).is_none());
        queue.check_invariants();
    }

    #[test]
    fn remove_from_middle_keeps_heap_property() {
        let mut queue = EventQueue::new();
        for (name, minute) in [("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5), ("f", 6)] {
            queue.insert(event(name, Some(ts(minute))));
        }
        queue.remove(&EventKey::new("db1", "c"));
        queue.check_invariants();
        let mut seen = Vec::new();
        while let Some(top) = queue.peek_min() {
            let key = top.key.clone();
            seen.push(key.name.clone());
            queue.remove(&key);
            queue.check_invariants();
        }
        assert_eq!(seen, vec!["a", "b", "d", "e", "f"]);
    }

    #[test]
    fn resort_moves_entry_both_directions() {
        let mut queue = EventQueue::new();
        queue.insert(event("e1", Some(ts(10))));
        queue.insert(event("e2", Some(ts(20))));
        queue.insert(event("e3", Some(ts(30))));

        // Push e1 past the others.
        let key = EventKey::new("db1", "e1");
        queue.get_mut(&key).unwrap().next_execution = Some(ts(40));
        queue.resort_after_update(&key);
        queue.check_invariants();
        assert_eq!(queue.peek_min().unwrap().key.name, "e2");

        // Pull e3 to the front.
        let key = EventKey::new("db1", "e3");
        queue.get_mut(&key).unwrap().next_execution = Some(ts(1));
        queue.resort_after_update(&key);
        queue.check_invariants();
        assert_eq!(queue.peek_min().unwrap().key.name, "e3");
    }

    #[test]
    fn resort_handles_heap_entry_and_exit() {
        let mut queue = EventQueue::new();
        queue.insert(event("e1", Some(ts(10))));

        // Exhausted: leaves the heap but stays in the map until removed.
        let key = EventKey::new("db1", "e1");
        queue.get_mut(&key).unwrap().next_execution = None;
        queue.resort_after_update(&key);
        assert!(queue.peek_min().is_none());
        assert!(queue.get(&key).is_some());

        // Re-scheduled: re-enters the heap.
        queue.get_mut(&key).unwrap().next_execution = Some(ts(15));
        queue.resort_after_update(&key);
        queue.check_invariants();
        assert_eq!(queue.peek_min().unwrap().key.name, "e1");
    }

    #[test]
    fn insert_replaces_same_identity() {
        let mut queue = EventQueue::new();
        queue.insert(event("e1", Some(ts(10))));
        queue.insert(event("e1", Some(ts(3))));
        queue.check_invariants();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_min().unwrap().next_execution, Some(ts(3)));
    }

    #[test]
    fn clear_empties_everything() {
        let mut queue = EventQueue::new();
        queue.insert(event("e1", Some(ts(10))));
        queue.insert(event("e2", None));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.peek_min().is_none());
        queue.check_invariants();
    }
}
