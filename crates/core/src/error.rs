//! Errors raised by session, receipt and reporting rules.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// A billing rule refused an input or a state change.
///
/// Nothing here depends on IO; store and transport failures are wrapped
/// around this in `bilee-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Client-supplied data is malformed (negative amount, blank method, bad date).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Blank session, merchant, customer or receipt id.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Session status would move backwards in the lifecycle order.
    #[error("session status cannot move from {from} to {to}")]
    IllegalTransition { from: &'static str, to: &'static str },

    /// A settled field would be reverted or set before its precondition holds.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The session is already linked to a different receipt, or the receipt
    /// already carries a customer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A money sum left the representable range.
    #[error("amount overflow: {0}")]
    AmountOverflow(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn overflow(what: impl Into<String>) -> Self {
        Self::AmountOverflow(what.into())
    }

    /// Errors caused by the session's current state rather than by the input.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            Self::IllegalTransition { .. } | Self::InvariantViolation(_) | Self::Conflict(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_message_names_both_states() {
        let err = DomainError::IllegalTransition {
            from: "EXPIRED",
            to: "ACTIVE",
        };
        assert_eq!(err.to_string(), "session status cannot move from EXPIRED to ACTIVE");
        assert!(err.is_state_conflict());
        assert!(!DomainError::overflow("daily total").is_state_conflict());
    }
}
