//! Token signing and verification.
//!
//! Signature checks are delegated to `jsonwebtoken`; the time window is
//! checked here against the injected clock so expiry is deterministic under
//! test and never depends on the library reading system time.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use newsdesk_core::{Clock, User};

use crate::claims::{validate_claims, AccessClaims, RefreshClaims, TimedClaims, TokenValidationError, UserClaims, UserRef};
use crate::config::TokenConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenError::Expired)
    }
}

impl From<TokenValidationError> for TokenError {
    fn from(value: TokenValidationError) -> Self {
        match value {
            TokenValidationError::Expired => TokenError::Expired,
            other => TokenError::Malformed(other.to_string()),
        }
    }
}

/// HS256 signing keys for one token kind.
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    /// `None` when the configured lifetime does not fit a `Duration`.
    ttl: Option<Duration>,
}

impl KeyPair {
    fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::try_seconds(ttl_secs),
        }
    }

    /// Expiry for a token issued at `now`; a non-positive or overflowing
    /// lifetime cannot produce a verifiable token.
    fn expiry(&self, now: DateTime<Utc>) -> Result<i64, TokenError> {
        self.ttl
            .filter(|ttl| *ttl > Duration::zero())
            .and_then(|ttl| now.checked_add_signed(ttl))
            .map(|exp| exp.timestamp())
            .ok_or_else(|| TokenError::Signing(format!("token lifetime out of range: {:?}", self.ttl)))
    }
}

/// Signs and verifies access and refresh tokens, each with its own secret
/// and lifetime.
#[derive(Clone)]
pub struct TokenCodec {
    access: Arc<KeyPair>,
    refresh: Arc<KeyPair>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access.ttl)
            .field("refresh_ttl", &self.refresh.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(config: &TokenConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            access: Arc::new(KeyPair::new(&config.access_secret, config.access_ttl_secs)),
            refresh: Arc::new(KeyPair::new(&config.refresh_secret, config.refresh_ttl_secs)),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn sign_access(&self, user: &User) -> Result<String, TokenError> {
        let now = self.clock.now();
        let claims = AccessClaims {
            user: UserClaims::from(user),
            jti: Uuid::now_v7(),
            iat: now.timestamp(),
            exp: self.access.expiry(now)?,
        };
        sign(&claims, &self.access)
    }

    pub fn sign_refresh(&self, user: &User) -> Result<String, TokenError> {
        let now = self.clock.now();
        let claims = RefreshClaims {
            user: UserRef { id: user.id },
            jti: Uuid::now_v7(),
            iat: now.timestamp(),
            exp: self.refresh.expiry(now)?,
        };
        sign(&claims, &self.refresh)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify(token, &self.access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.verify(token, &self.refresh)
    }

    fn verify<C: DeserializeOwned + TimedClaims>(&self, token: &str, keys: &KeyPair) -> Result<C, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        let data = decode::<C>(token, &keys.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Malformed(e.to_string()),
        })?;

        validate_claims(&data.claims, self.clock.now())?;
        Ok(data.claims)
    }
}

fn sign<C: Serialize>(claims: &C, keys: &KeyPair) -> Result<String, TokenError> {
    encode(&Header::new(Algorithm::HS256), claims, &keys.encoding).map_err(|e| TokenError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsdesk_core::{ManualClock, UserId};

    fn user() -> User {
        let mut user = User::new("Ada", "ada@example.com", "hash");
        user.id = UserId::new(7);
        user
    }

    fn codec() -> (TokenCodec, ManualClock) {
        let clock = ManualClock::starting_now();
        let config = TokenConfig::new("access-secret", "refresh-secret");
        (TokenCodec::new(&config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn access_token_round_trip_carries_identity() {
        let (codec, _) = codec();
        let token = codec.sign_access(&user()).unwrap();

        let claims = codec.verify_access(&token).unwrap();
        assert_eq!(claims.user.id, UserId::new(7));
        assert_eq!(claims.user.email, "ada@example.com");
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn tokens_issued_in_the_same_instant_differ() {
        let (codec, _) = codec();
        let a = codec.sign_refresh(&user()).unwrap();
        let b = codec.sign_refresh(&user()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn expiry_follows_the_injected_clock() {
        let (codec, clock) = codec();
        let token = codec.sign_access(&user()).unwrap();

        clock.advance(Duration::seconds(899));
        assert!(codec.verify_access(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(codec.verify_access(&token), Err(TokenError::Expired));
    }

    #[test]
    fn kinds_do_not_cross_verify() {
        let (codec, _) = codec();
        let refresh = codec.sign_refresh(&user()).unwrap();
        let access = codec.sign_access(&user()).unwrap();

        assert_eq!(codec.verify_access(&refresh), Err(TokenError::BadSignature));
        assert_eq!(codec.verify_refresh(&access), Err(TokenError::BadSignature));
    }

    #[test]
    fn garbage_is_malformed_not_expired() {
        let (codec, _) = codec();
        let err = codec.verify_access("not-a-jwt").unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
        assert!(!err.is_expired());
    }

    #[test]
    fn out_of_range_lifetimes_fail_to_sign_instead_of_panicking() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        for ttl in [i64::MAX / 1000, i64::MAX, 0, -60] {
            let config = TokenConfig::new("a", "r").with_access_ttl_secs(ttl).with_refresh_ttl_secs(ttl);
            let codec = TokenCodec::new(&config, clock.clone());

            assert!(matches!(codec.sign_access(&user()), Err(TokenError::Signing(_))), "ttl {ttl}");
            assert!(matches!(codec.sign_refresh(&user()), Err(TokenError::Signing(_))), "ttl {ttl}");
        }
    }
}
