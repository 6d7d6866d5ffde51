//! Infrastructure error types.
//!
//! `StoreError` is what the store boundary returns. `PipelineError` is what
//! pipeline components return to their callers (HTTP handlers, workers,
//! schedulers); its [`ErrorKind`] decides how the failure is reported.

use thiserror::Error;

use bilee_core::DomainError;

/// Store-level failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The write collides with existing state (duplicate key, lost race).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The write was refused because it would break a document invariant.
    #[error(transparent)]
    Rejected(#[from] DomainError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store timeout: {0}")]
    Timeout(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Coarse failure classes surfaced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authentication,
    Reconciliation,
    Conflict,
    Persistence,
}

/// Pipeline-level failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence failure: {0}")]
    Persistence(StoreError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Authentication(_) => ErrorKind::Authentication,
            PipelineError::Reconciliation(_) => ErrorKind::Reconciliation,
            PipelineError::Conflict(_) => ErrorKind::Conflict,
            PipelineError::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

impl From<DomainError> for PipelineError {
    fn from(err: DomainError) -> Self {
        if err.is_state_conflict() {
            PipelineError::Conflict(err.to_string())
        } else {
            PipelineError::Validation(err.to_string())
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => PipelineError::NotFound(what),
            StoreError::Conflict(what) => PipelineError::Conflict(what),
            StoreError::Rejected(domain) => domain.into(),
            other => PipelineError::Persistence(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_keep_their_class() {
        let e: PipelineError = StoreError::NotFound("session s1".into()).into();
        assert_eq!(e.kind(), ErrorKind::NotFound);

        let e: PipelineError = StoreError::Timeout("acquire".into()).into();
        assert_eq!(e.kind(), ErrorKind::Persistence);

        let e: PipelineError = StoreError::Rejected(DomainError::invariant("backward")).into();
        assert_eq!(e.kind(), ErrorKind::Conflict);

        let e: PipelineError = StoreError::Rejected(DomainError::validation("bad")).into();
        assert_eq!(e.kind(), ErrorKind::Validation);

        let e: PipelineError = StoreError::Rejected(DomainError::IllegalTransition {
            from: "COMPLETED",
            to: "PAID",
        })
        .into();
        assert_eq!(e.kind(), ErrorKind::Conflict);

        let e: PipelineError = DomainError::overflow("daily total").into();
        assert_eq!(e.kind(), ErrorKind::Validation);
    }
}
