use axum::{routing::post, Router};

pub mod auth;
pub mod common;
pub mod emails;
pub mod jobs;
pub mod news;
pub mod profile;
pub mod system;

/// Router for all endpoints behind the session middleware.
pub fn router() -> Router {
    Router::new()
        .route("/auth/logout", post(auth::logout))
        .nest("/profile", profile::router())
        .nest("/news", news::router())
        .nest("/emails", emails::router())
        .nest("/jobs", jobs::router())
}
