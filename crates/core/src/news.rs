//! News article record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{NewsId, UserId};
use crate::store::Record;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct News {
    pub id: NewsId,
    /// Author.
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    /// Stored image file name.
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl News {
    pub fn new(
        user_id: UserId,
        title: impl Into<String>,
        content: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NewsId::new(0),
            user_id,
            title: title.into(),
            content: content.into(),
            image: image.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_written_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

impl Record for News {
    type Id = NewsId;

    const KIND: &'static str = "news";

    fn id(&self) -> NewsId {
        self.id
    }

    fn assign_id(&mut self, id: NewsId) {
        self.id = id;
    }
}
