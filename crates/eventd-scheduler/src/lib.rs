//! `eventd-scheduler`: the event scheduling engine.
//!
//! # Overview
//!
//! A [`engine::Scheduler`] owns an in-memory cache of enabled events (an
//! identity map plus a min-heap ordered by next execution time) and a main
//! loop that sleeps towards the earliest due time in short interruptible
//! increments. Each firing recomputes the event's next time, persists it to
//! the injected [`eventd_catalog::CatalogStore`], and dispatches an
//! ephemeral worker task to the injected [`executor::RoutineExecutor`],
//! with at most one concurrent execution per event.
//!
//! Concurrent CREATE/ALTER/DROP EVENT statements reach the cache through
//! the [`consistency::ConsistencyManager`]; both it and the firing path
//! take the same cache lock, so a drop racing an imminent firing resolves
//! to exactly one of "fires once more, then gone" or "gone, never fires".

pub mod consistency;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod queue;
pub mod schedule;

pub use consistency::ConsistencyManager;
pub use engine::{EngineState, Scheduler};
pub use error::{Result, SchedulerError};
pub use event::{Event, ExecutionGuard};
pub use executor::{CompileError, ExecutionContext, ExecutionError, RoutineExecutor};
pub use queue::EventQueue;
pub use schedule::{compute_next, ScheduleResult};
