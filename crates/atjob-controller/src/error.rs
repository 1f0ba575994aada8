use atjob_core::{JobPhase, ObjectKey};
use atjob_store::StoreError;
use thiserror::Error;

/// Errors surfaced by a reconcile to the dispatcher.
///
/// Every variant is retried by the dispatcher with backoff; `NotFound` on
/// the job itself never gets here (it ends the reconcile successfully).
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The object store failed, or rejected a write (`Conflict`).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// `schedule` is not a `YYYY-MM-DDTHH:MM:SSZ` timestamp.
    #[error("Invalid schedule {value:?}: {source}")]
    InvalidSchedule {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// A unit with the job's key exists but belongs to another incarnation
    /// of the job (same name, different uid). It is left for the garbage
    /// collector.
    #[error("Execution unit {key} is owned by {owner_uid:?}, not job uid {job_uid}")]
    ForeignUnit {
        key: ObjectKey,
        owner_uid: Option<String>,
        job_uid: String,
    },

    /// A status write would move the phase backwards (or out of the lifecycle).
    #[error("Refusing phase transition {from} -> {to} for {key}")]
    InvalidTransition {
        key: ObjectKey,
        from: JobPhase,
        to: JobPhase,
    },
}

impl ControllerError {
    /// True for an optimistic-concurrency rejection of a write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Store(e) if e.is_conflict())
    }

    /// Short error code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            ControllerError::Store(StoreError::Conflict { .. }) => "CONFLICT",
            ControllerError::Store(_) => "STORE_ERROR",
            ControllerError::InvalidSchedule { .. } => "INVALID_SCHEDULE",
            ControllerError::ForeignUnit { .. } => "FOREIGN_UNIT",
            ControllerError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
