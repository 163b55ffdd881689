//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// lifecycle rules, ledger rules, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation is not allowed in the aggregate's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A requested resource was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),

    /// A payment would take the balance below zero.
    #[error("overpayment: {0}")]
    Overpayment(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn overpayment(msg: impl Into<String>) -> Self {
        Self::Overpayment(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable code, shared with the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "VALIDATION_ERROR",
            DomainError::InvalidState(_) => "INVALID_STATE",
            DomainError::NotFound(_) => "NOT_FOUND",
            DomainError::Overpayment(_) => "OVERPAYMENT",
            DomainError::Conflict(_) => "CONFLICT",
        }
    }

    /// Only optimistic-lock conflicts are safe to retry after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_error_envelope_vocabulary() {
        assert_eq!(DomainError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(DomainError::invalid_state("x").code(), "INVALID_STATE");
        assert_eq!(DomainError::not_found("x").code(), "NOT_FOUND");
        assert_eq!(DomainError::overpayment("x").code(), "OVERPAYMENT");
        assert_eq!(DomainError::conflict("x").code(), "CONFLICT");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(DomainError::conflict("stale").is_retryable());
        assert!(!DomainError::overpayment("too much").is_retryable());
        assert!(!DomainError::invalid_state("draft").is_retryable());
    }
}
