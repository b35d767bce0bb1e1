//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, cache, job queue and sessions
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request DTOs, validation and JSON presenters
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Protected routes: require a session.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        services.clone(),
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::auth::public_router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

pub use services::AppServices;
