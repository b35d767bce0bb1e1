use thiserror::Error;

use newsdesk_core::StoreError;

use crate::codec::TokenError;

/// Authentication failure.
///
/// `Unauthenticated` and `InvalidCredential` are terminal for the request:
/// the caller must log in again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No usable credential was presented.
    #[error("authentication required")]
    Unauthenticated,

    /// A credential was presented but rejected.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("user not found")]
    NotFound,

    #[error("token error: {0}")]
    Token(TokenError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl AuthError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidCredential(reason.into())
    }

    /// Whether the caller should be answered with 401.
    pub fn is_rejection(&self) -> bool {
        matches!(self, AuthError::Unauthenticated | AuthError::InvalidCredential(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        if value.is_not_found() {
            AuthError::NotFound
        } else {
            AuthError::Store(value)
        }
    }
}
