//! User account record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;
use crate::store::Record;

/// A registered user.
///
/// # Invariants
/// - `email` is unique across users.
/// - `refresh_token` holds at most one token: the one issued last. It is
///   overwritten on every rotation and cleared on logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Stored profile image file name.
    pub profile: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A new, not yet persisted user.
    pub fn new(name: impl Into<String>, email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: UserId::new(0),
            name: name.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            profile: None,
            refresh_token: None,
            created_at: Utc::now(),
        }
    }
}

impl Record for User {
    type Id = UserId;

    const KIND: &'static str = "user";
    const UNIQUE_FIELDS: &'static [&'static str] = &["email"];

    fn id(&self) -> UserId {
        self.id
    }

    fn assign_id(&mut self, id: UserId) {
        self.id = id;
    }

    fn unique_value(&self, field: &str) -> Option<String> {
        match field {
            "email" => Some(self.email.clone()),
            _ => None,
        }
    }
}
