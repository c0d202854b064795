//! `eventd-catalog`: durable store of event definitions.
//!
//! The catalog is the source of truth: the scheduler's in-memory cache only
//! ever holds a subset of these rows (the enabled ones). Rows are keyed by
//! `(schema_name, event_name)` and mirror [`eventd_core::EventRecord`] column
//! for column, with the schedule serialised as JSON and timestamps stored as
//! RFC 3339 text.

pub mod db;
pub mod error;
pub mod store;

pub use error::{CatalogError, Result};
pub use store::{CatalogStore, SqliteCatalog};
