use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use newsdesk_core::{User, UserId};

/// Identity embedded in an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub profile: Option<String>,
}

impl From<&User> for UserClaims {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            profile: user.profile.clone(),
        }
    }
}

/// Refresh tokens carry the user id only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
}

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user: UserClaims,
    /// Unique token id; two tokens issued in the same second still differ.
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Refresh token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub user: UserRef,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Time window of a token, shared by both claim kinds.
pub trait TimedClaims {
    fn issued_at(&self) -> i64;
    fn expires_at(&self) -> i64;
}

impl TimedClaims for AccessClaims {
    fn issued_at(&self) -> i64 {
        self.iat
    }
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

impl TimedClaims for RefreshClaims {
    fn issued_at(&self) -> i64 {
        self.iat
    }
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate a token's time window. No leeway: a token
/// is expired from its `exp` second onwards.
pub fn validate_claims(claims: &impl TimedClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at() <= claims.issued_at() {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now.timestamp() >= claims.expires_at() {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn refresh(iat: i64, exp: i64) -> RefreshClaims {
        RefreshClaims {
            user: UserRef { id: UserId::new(1) },
            jti: Uuid::now_v7(),
            iat,
            exp,
        }
    }

    #[test]
    fn valid_until_exp_second() {
        let claims = refresh(1_000, 1_900);
        let at = |s| Utc.timestamp_opt(s, 0).unwrap();

        assert!(validate_claims(&claims, at(1_000)).is_ok());
        assert!(validate_claims(&claims, at(1_899)).is_ok());
        assert_eq!(validate_claims(&claims, at(1_900)), Err(TokenValidationError::Expired));
    }

    #[test]
    fn rejects_inverted_window() {
        let claims = refresh(2_000, 1_000);
        assert_eq!(
            validate_claims(&claims, Utc.timestamp_opt(1_500, 0).unwrap()),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }

    proptest! {
        #[test]
        fn expiry_is_exactly_the_exp_second(iat in 0i64..1_000_000, ttl in 1i64..1_000_000, offset in 0i64..2_000_000) {
            let claims = refresh(iat, iat + ttl);
            let now = Utc.timestamp_opt(iat + offset, 0).unwrap();
            let res = validate_claims(&claims, now);
            if offset < ttl {
                prop_assert!(res.is_ok());
            } else {
                prop_assert_eq!(res, Err(TokenValidationError::Expired));
            }
        }
    }
}
