use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use newsdesk_auth::Identity;
use newsdesk_core::{RecordStore, User};
use newsdesk_infra::cache::keys;

use crate::app::routes::common::{blocking, cached_response};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/", get(show_profile).put(update_profile))
}

pub async fn show_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> axum::response::Response {
    blocking(&services, move |services| show(services, &identity)).await
}

fn show(services: &AppServices, identity: &Identity) -> axum::response::Response {
    let key = keys::user_profile(identity.user_id);
    let loaded = services.cache.get_or_load::<axum::response::Response>(&key, || {
        let user = services
            .users
            .find_by_id(identity.user_id)
            .map_err(|e| errors::domain_error_to_response(e.into()))?;
        Ok(serde_json::json!({
            "success": true,
            "user": dto::profile_view(&services.config.app_url, &user),
        }))
    });

    match loaded {
        Ok(cached) => cached_response(cached),
        Err(resp) => resp,
    }
}

pub async fn update_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<dto::UpdateProfileRequest>,
) -> axum::response::Response {
    if let Err(errs) = body.validate() {
        return errors::validation_error(errs);
    }
    let profile = body.profile.trim().to_string();
    blocking(&services, move |services| update(services, &identity, profile)).await
}

fn update(services: &AppServices, identity: &Identity, profile: String) -> axum::response::Response {
    let user = match services
        .users
        .update(identity.user_id, &mut |u: &mut User| u.profile = Some(profile.clone()))
    {
        Ok(u) => u,
        Err(e) => return errors::domain_error_to_response(e.into()),
    };

    // Article views embed the writer's profile image.
    services
        .cache
        .invalidate_after_write(Some(&keys::user_profile(user.id)), keys::NEWS_ALL);
    tracing::info!(user_id = %user.id, "profile updated");

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": "Profile updated successfully!",
            "user": dto::profile_view(&services.config.app_url, &user),
        })),
    )
        .into_response()
}
