//! Error taxonomy for the coordinator core.
//!
//! One variant per error kind named in the component design. Everything
//! above the persistence ports talks in terms of this enum; only the
//! store backends are allowed to know about `sqlx::Error` directly.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("credential is not registered")]
    CredentialUnknown,

    #[error("credential is bound to a different worker name")]
    CredentialNameMismatch,

    #[error("address is already in use by another worker")]
    AddressInUse,

    #[error("worker {id} is not online")]
    WorkerUnavailable { id: Uuid },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("planner was given zero workers")]
    PlanEmpty,

    #[error("persistence operation failed: {0}")]
    PersistenceFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("only {succeeded} of {attempted} sub-jobs were persisted")]
    PartialDistributedCreate {
        succeeded: usize,
        attempted: usize,
        failed_workers: Vec<String>,
    },
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for CoordinatorError {
    fn from(err: sqlx::Error) -> Self {
        CoordinatorError::PersistenceFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
