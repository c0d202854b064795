//! `eventd-core`: shared types and configuration for the event scheduler.
//!
//! Everything that both the catalog and the scheduling engine need to agree
//! on lives here: event identity, schedule definitions, status enums with
//! their stable string forms (used as SQLite column values), the persisted
//! `EventRecord` row mirror, and the figment-backed configuration loader.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DatabaseConfig, EventdConfig, SchedulerConfig};
pub use error::{EventdError, Result};
pub use types::{
    Definer, EventKey, EventRecord, EventSchedule, EventStatus, IntervalUnit, OnCompletion,
    RoutineBody,
};
