//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, caller-facing failures (validation,
/// ownership, missing records). Authentication failures live in
/// `newsdesk-auth`; infrastructure failures surface as `Unavailable`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// A uniqueness rule was violated (e.g. email already taken).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller does not own the record it tried to mutate.
    #[error("ownership mismatch: {0}")]
    NotOwner(String),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_owner(msg: impl Into<String>) -> Self {
        Self::NotOwner(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

impl From<crate::store::StoreError> for DomainError {
    fn from(value: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match value {
            StoreError::NotFound { .. } => DomainError::NotFound,
            StoreError::ConstraintViolation { kind, field } => {
                DomainError::Conflict(format!("{kind}.{field} already taken"))
            }
            StoreError::Unavailable(msg) => DomainError::Unavailable(msg),
        }
    }
}
