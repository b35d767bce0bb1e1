//! Access/refresh session lifecycle.
//!
//! ## Authorization state machine
//!
//! 1. No tokens presented: `Unauthenticated`.
//! 2. Access token verifies: the request is authorized from its claims alone;
//!    refresh state is never consulted. Any failure other than expiry is an
//!    `InvalidCredential`. An expired access token falls through to step 3.
//! 3. Refresh token: a verification failure is an `InvalidCredential`. The
//!    claimed user must exist and hold exactly this token as its current
//!    refresh token; otherwise `InvalidCredential` and nothing is written.
//!    On a match a new pair is issued (rotating the stored token) and the
//!    request proceeds with the new pair attached.
//! 4. Anything else: `Unauthenticated`.
//!
//! Only the most recently issued refresh token is ever valid. Presenting an
//! older one fails at step 3 even if its signature and lifetime are fine.

use serde::Serialize;
use tracing::{debug, info, warn};

use newsdesk_core::{RecordStore, User, UserId};

use crate::claims::AccessClaims;
use crate::codec::TokenCodec;
use crate::error::AuthError;

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub profile: Option<String>,
}

impl From<AccessClaims> for Identity {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.user.id,
            email: claims.user.email,
            name: claims.user.name,
            profile: claims.user.profile,
        }
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            profile: user.profile.clone(),
        }
    }
}

/// Result of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub identity: Identity,
    /// Set when the refresh path ran; the transport must hand these to the client.
    pub rotated: Option<TokenPair>,
}

/// Issues, rotates, verifies and revokes sessions against the user store.
#[derive(Debug, Clone)]
pub struct SessionManager<S> {
    users: S,
    codec: TokenCodec,
}

impl<S: RecordStore<User>> SessionManager<S> {
    pub fn new(users: S, codec: TokenCodec) -> Self {
        Self { users, codec }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Issue a new pair and make its refresh token the user's only valid one.
    pub fn issue_pair(&self, user_id: UserId) -> Result<TokenPair, AuthError> {
        let user = self.users.find_by_id(user_id)?;
        self.issue_for(&user)
    }

    fn issue_for(&self, user: &User) -> Result<TokenPair, AuthError> {
        let access_token = self.codec.sign_access(user).map_err(AuthError::Token)?;
        let refresh_token = self.codec.sign_refresh(user).map_err(AuthError::Token)?;

        let stored = refresh_token.clone();
        self.users
            .update(user.id, &mut |u: &mut User| u.refresh_token = Some(stored.clone()))?;

        debug!(user_id = %user.id, "issued token pair");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Decide whether a request carrying these credentials may proceed.
    pub fn authorize(&self, access: Option<&str>, refresh: Option<&str>) -> Result<Authorization, AuthError> {
        if access.is_none() && refresh.is_none() {
            return Err(AuthError::Unauthenticated);
        }

        if let Some(token) = access {
            match self.codec.verify_access(token) {
                Ok(claims) => {
                    return Ok(Authorization {
                        identity: claims.into(),
                        rotated: None,
                    });
                }
                Err(e) if e.is_expired() => {
                    debug!("access token expired; trying refresh");
                }
                Err(e) => {
                    debug!(error = %e, "access token rejected");
                    return Err(AuthError::InvalidCredential(e.to_string()));
                }
            }
        }

        match refresh {
            Some(token) => self.rotate(token),
            None => Err(AuthError::Unauthenticated),
        }
    }

    fn rotate(&self, presented: &str) -> Result<Authorization, AuthError> {
        let claims = self
            .codec
            .verify_refresh(presented)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;
        let user_id = claims.user.id;

        let user = match self.users.find_by_id(user_id) {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                warn!(%user_id, "refresh token for unknown user");
                return Err(AuthError::invalid("unknown user"));
            }
            Err(e) => return Err(AuthError::Store(e)),
        };

        if user.refresh_token.as_deref() != Some(presented) {
            warn!(%user_id, "refresh token is not the current one");
            return Err(AuthError::invalid("refresh token superseded or revoked"));
        }

        let pair = self.issue_for(&user)?;
        info!(%user_id, "rotated session tokens");

        Ok(Authorization {
            identity: Identity::from(&user),
            rotated: Some(pair),
        })
    }

    /// Invalidate the user's refresh token (logout).
    pub fn revoke(&self, user_id: UserId) -> Result<(), AuthError> {
        self.users.update(user_id, &mut |u: &mut User| u.refresh_token = None)?;
        info!(%user_id, "revoked session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use chrono::Duration;
    use newsdesk_core::ManualClock;
    use newsdesk_infra::records::InMemoryRecordStore;
    use std::sync::Arc;

    struct Fixture {
        sessions: SessionManager<Arc<InMemoryRecordStore<User>>>,
        users: Arc<InMemoryRecordStore<User>>,
        clock: ManualClock,
        user_id: UserId,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let users = Arc::new(InMemoryRecordStore::<User>::new());
        let user = users.create(User::new("Ada", "ada@example.com", "hash")).unwrap();
        let codec = TokenCodec::new(&TokenConfig::new("a-secret", "r-secret"), Arc::new(clock.clone()));
        Fixture {
            sessions: SessionManager::new(users.clone(), codec),
            users,
            clock,
            user_id: user.id,
        }
    }

    fn stored_refresh(f: &Fixture) -> Option<String> {
        f.users.find_by_id(f.user_id).unwrap().refresh_token
    }

    #[test]
    fn issue_pair_persists_refresh_token() {
        let f = fixture();
        let pair = f.sessions.issue_pair(f.user_id).unwrap();
        assert_eq!(stored_refresh(&f), Some(pair.refresh_token));
    }

    #[test]
    fn issue_pair_for_missing_user_is_not_found() {
        let f = fixture();
        assert_eq!(f.sessions.issue_pair(UserId::new(99)), Err(AuthError::NotFound));
    }

    #[test]
    fn no_tokens_is_unauthenticated() {
        let f = fixture();
        assert_eq!(f.sessions.authorize(None, None), Err(AuthError::Unauthenticated));
    }

    #[test]
    fn valid_access_token_authorizes_without_store_access() {
        let f = fixture();
        let pair = f.sessions.issue_pair(f.user_id).unwrap();

        // Revoking does not affect a still-valid access token.
        f.sessions.revoke(f.user_id).unwrap();

        let auth = f.sessions.authorize(Some(&pair.access_token), Some("junk")).unwrap();
        assert_eq!(auth.identity.user_id, f.user_id);
        assert!(auth.rotated.is_none());
    }

    #[test]
    fn malformed_access_token_does_not_fall_back_to_refresh() {
        let f = fixture();
        let pair = f.sessions.issue_pair(f.user_id).unwrap();

        let err = f
            .sessions
            .authorize(Some("garbage"), Some(&pair.refresh_token))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
        assert_eq!(stored_refresh(&f), Some(pair.refresh_token));
    }

    #[test]
    fn expired_access_rotates_with_current_refresh_token() {
        let f = fixture();
        let first = f.sessions.issue_pair(f.user_id).unwrap();
        f.clock.advance(Duration::minutes(16));

        let auth = f
            .sessions
            .authorize(Some(&first.access_token), Some(&first.refresh_token))
            .unwrap();

        let rotated = auth.rotated.expect("pair rotated");
        assert_eq!(auth.identity.email, "ada@example.com");
        assert_ne!(rotated.refresh_token, first.refresh_token);
        assert_eq!(stored_refresh(&f), Some(rotated.refresh_token.clone()));

        // The new access token works on its own.
        let again = f.sessions.authorize(Some(&rotated.access_token), None).unwrap();
        assert!(again.rotated.is_none());
    }

    #[test]
    fn refresh_only_request_rotates() {
        let f = fixture();
        let pair = f.sessions.issue_pair(f.user_id).unwrap();

        let auth = f.sessions.authorize(None, Some(&pair.refresh_token)).unwrap();
        assert!(auth.rotated.is_some());
    }

    #[test]
    fn superseded_refresh_token_is_rejected_without_write() {
        let f = fixture();
        let first = f.sessions.issue_pair(f.user_id).unwrap();
        let second = f.sessions.issue_pair(f.user_id).unwrap();

        let err = f.sessions.authorize(None, Some(&first.refresh_token)).unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredential(_)));
        assert_eq!(stored_refresh(&f), Some(second.refresh_token));
    }

    #[test]
    fn revoked_session_cannot_refresh() {
        let f = fixture();
        let pair = f.sessions.issue_pair(f.user_id).unwrap();
        f.sessions.revoke(f.user_id).unwrap();

        let err = f.sessions.authorize(None, Some(&pair.refresh_token)).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(stored_refresh(&f), None);
    }

    #[test]
    fn expired_refresh_token_is_rejected() {
        let f = fixture();
        let pair = f.sessions.issue_pair(f.user_id).unwrap();
        f.clock.advance(Duration::days(8));

        let err = f
            .sessions
            .authorize(Some(&pair.access_token), Some(&pair.refresh_token))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[test]
    fn expired_access_without_refresh_is_unauthenticated() {
        let f = fixture();
        let pair = f.sessions.issue_pair(f.user_id).unwrap();
        f.clock.advance(Duration::minutes(20));

        assert_eq!(
            f.sessions.authorize(Some(&pair.access_token), None),
            Err(AuthError::Unauthenticated)
        );
    }

    #[test]
    fn refresh_for_deleted_user_is_invalid() {
        let f = fixture();
        let pair = f.sessions.issue_pair(f.user_id).unwrap();
        f.users.delete(f.user_id).unwrap();

        let err = f.sessions.authorize(None, Some(&pair.refresh_token)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }
}
