use eventd_core::EventKey;
use thiserror::Error;

/// Errors that can occur within the scheduling engine.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The routine body failed validation; the event is not cached.
    #[error("Routine for {key} failed validation: {reason}")]
    Compile { key: EventKey, reason: String },

    /// Read/write failure against the durable catalog.
    #[error("Catalog error: {0}")]
    Catalog(#[from] eventd_catalog::CatalogError),

    /// Bad event definition (unsupported granularity, inverted bounds, …).
    #[error(transparent)]
    Definition(#[from] eventd_core::EventdError),

    /// A firing's worker could not be started; the cycle is skipped.
    #[error("Worker dispatch failed for {key}: {reason}")]
    WorkerDispatch { key: EventKey, reason: String },

    /// start() while another instance is Running (or mid-transition).
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// stop() on a scheduler that is not Running.
    #[error("Scheduler is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
