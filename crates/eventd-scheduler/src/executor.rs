use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use eventd_core::{Definer, EventKey, RoutineBody};

/// The routine body failed compilation/validation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CompileError(pub String);

/// The routine ran but returned an error. The scheduler only logs this;
/// a failed execution does not change the event's schedule.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

/// Per-firing context handed to the executor alongside the routine body.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Unique id of this firing, for log correlation.
    pub execution_id: Uuid,
    pub key: EventKey,
    /// Principal the routine runs as. Opaque to the scheduler.
    pub definer: Definer,
    /// The instant the scheduler decided to fire (becomes `last_executed`).
    pub scheduled_at: DateTime<Utc>,
}

/// Collaborator that compiles and runs routine bodies.
///
/// The scheduler calls both methods and implements neither: `validate` at
/// create/alter/bulk-load time, `execute` from an ephemeral worker task per
/// firing.
#[async_trait]
pub trait RoutineExecutor: Send + Sync {
    fn validate(&self, body: &RoutineBody) -> std::result::Result<(), CompileError>;

    async fn execute(
        &self,
        body: &RoutineBody,
        ctx: ExecutionContext,
    ) -> std::result::Result<(), ExecutionError>;
}
