use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
};

use std::sync::Arc;

use newsdesk_core::{RecordStore, StoreError, User, UserId};
use newsdesk_infra::cache::CachedJson;

use crate::app::errors;
use crate::app::services::AppServices;

pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Run a handler body that talks to the stores, cache or job queue on the
/// blocking pool; those backends do synchronous I/O.
pub async fn blocking<F>(services: &Arc<AppServices>, body: F) -> axum::response::Response
where
    F: FnOnce(&AppServices) -> axum::response::Response + Send + 'static,
{
    let services = services.clone();
    tokio::task::spawn_blocking(move || body(&services))
        .await
        .unwrap_or_else(|e| errors::internal(format!("request task failed: {e}")))
}

/// Serve a cached (or freshly cached) payload as-is.
pub fn cached_response(cached: CachedJson) -> axum::response::Response {
    let status = if cached.hit { "HIT" } else { "MISS" };
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (
                header::HeaderName::from_static(CACHE_STATUS_HEADER),
                HeaderValue::from_static(status),
            ),
        ],
        cached.body,
    )
        .into_response()
}

/// The author of an article, if the account still exists.
pub fn find_writer(services: &AppServices, user_id: UserId) -> Result<Option<User>, StoreError> {
    match services.users.find_by_id(user_id) {
        Ok(user) => Ok(Some(user)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
