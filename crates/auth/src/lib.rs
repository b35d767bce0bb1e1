//! `newsdesk-auth`: session tokens and password hashing.
//!
//! This crate is decoupled from HTTP. Storage is reached only through
//! `newsdesk_core::RecordStore<User>`.

pub mod claims;
pub mod codec;
pub mod config;
pub mod error;
pub mod password;
pub mod session;

pub use claims::{AccessClaims, RefreshClaims, TokenValidationError, UserClaims, UserRef, validate_claims};
pub use codec::{TokenCodec, TokenError};
pub use config::{TokenConfig, DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS};
pub use error::AuthError;
pub use password::{hash_password, verify_password, PasswordError};
pub use session::{Authorization, Identity, SessionManager, TokenPair};
