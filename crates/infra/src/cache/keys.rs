//! Deterministic cache keys.
//!
//! A key is derived only from the logical query (resource type plus
//! id/pagination parameters), so equal queries always hit the same entry.

use newsdesk_core::{NewsId, PageRequest, UserId};

/// Every news key (lists and items).
pub const NEWS_ALL: &str = "news:*";

/// Every news list page.
pub const NEWS_LISTS: &str = "news:list:*";

pub fn news_list(page: PageRequest) -> String {
    format!("news:list:page:{}:limit:{}", page.page, page.limit)
}

pub fn news_item(id: NewsId) -> String {
    format!("news:item:{id}")
}

pub fn user_profile(id: UserId) -> String {
    format!("users:item:{id}")
}
