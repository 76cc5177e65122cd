use cryolive_contracts::{BuilderError, ExecError, StoreError};

/// Surface-facing error taxonomy (§7). Every variant names how it is
/// recovered: most are caught and logged by the owning loop rather than
/// propagated to a caller.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("access denied")]
    AccessDenied,

    #[error("not found")]
    NotFound,

    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("stage builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CoreError::NotFound,
            StoreError::Backend(msg) => CoreError::Internal(msg),
        }
    }
}

impl From<ExecError> for CoreError {
    fn from(e: ExecError) -> Self {
        CoreError::SchedulerUnavailable(e.to_string())
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
