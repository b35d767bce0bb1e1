use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use newsdesk_auth::{hash_password, verify_password, Identity};
use newsdesk_core::{RecordStore, StoreError, User};
use newsdesk_infra::jobs::EmailMessage;

use crate::app::dto::{self, FieldErrors};
use crate::app::errors;
use crate::app::routes::common::blocking;
use crate::app::services::AppServices;
use crate::cookies::SessionCleared;

const EMAIL_TAKEN: &str = "Email already taken.Please use another one";

/// Routes reachable without a session.
pub fn public_router() -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterRequest>,
) -> axum::response::Response {
    if let Err(errs) = body.validate() {
        return errors::validation_error(errs);
    }
    blocking(&services, move |services| create_account(services, body)).await
}

fn create_account(services: &AppServices, body: dto::RegisterRequest) -> axum::response::Response {
    let email = body.email.trim().to_string();

    match services.users.find_by_unique("email", &email) {
        Ok(_) => return email_taken(),
        Err(e) if e.is_not_found() => {}
        Err(e) => return errors::domain_error_to_response(e.into()),
    }

    let password_hash = match hash_password(&body.password) {
        Ok(h) => h,
        Err(e) => return errors::internal(e),
    };

    let user = match services
        .users
        .create(User::new(body.name.trim(), email, password_hash))
    {
        Ok(u) => u,
        Err(StoreError::ConstraintViolation { .. }) => return email_taken(),
        Err(e) => return errors::domain_error_to_response(e.into()),
    };
    tracing::info!(user_id = %user.id, "user registered");

    let welcome = EmailMessage::new(
        &user.email,
        "Welcome to newsdesk",
        format!("Hi {}, your account is ready.", user.name),
    );
    if let Err(e) = services.emails.enqueue_for(user.id, &[welcome]) {
        tracing::warn!(user_id = %user.id, error = %e, "failed to enqueue welcome email");
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": "User created successfully!!!",
            "user": dto::profile_view(&services.config.app_url, &user),
        })),
    )
        .into_response()
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::LoginRequest>,
) -> axum::response::Response {
    if let Err(errs) = body.validate() {
        return errors::validation_error(errs);
    }
    blocking(&services, move |services| sign_in(services, body)).await
}

fn sign_in(services: &AppServices, body: dto::LoginRequest) -> axum::response::Response {
    let user = match services.users.find_by_unique("email", body.email.trim()) {
        Ok(u) => u,
        Err(e) if e.is_not_found() => return credential_error("User does not exist for given email."),
        Err(e) => return errors::domain_error_to_response(e.into()),
    };

    if !verify_password(&body.password, &user.password_hash) {
        tracing::debug!(user_id = %user.id, "password mismatch");
        return credential_error("Invalid credentials.");
    }

    let pair = match services.sessions.issue_pair(user.id) {
        Ok(p) => p,
        Err(e) => return errors::auth_error_to_response(e),
    };
    tracing::info!(user_id = %user.id, "user logged in");

    let mut headers = HeaderMap::new();
    services.cookies.set_session(&mut headers, &pair);

    (
        StatusCode::OK,
        headers,
        Json(serde_json::json!({
            "success": true,
            "message": "Login successful!!!",
            "access_token": pair.access_token,
            "refresh_token": pair.refresh_token,
        })),
    )
        .into_response()
}

pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> axum::response::Response {
    if let Err(e) = services.sessions.revoke(identity.user_id) {
        return errors::auth_error_to_response(e);
    }

    let mut headers = HeaderMap::new();
    services.cookies.clear_session(&mut headers);

    let mut response = (
        StatusCode::OK,
        headers,
        Json(serde_json::json!({
            "success": true,
            "message": "Logged out successfully!",
        })),
    )
        .into_response();
    response.extensions_mut().insert(SessionCleared);
    response
}

fn email_taken() -> axum::response::Response {
    errors::validation_error(FieldErrors::from([("email", EMAIL_TAKEN.to_string())]))
}

fn credential_error(message: &str) -> axum::response::Response {
    errors::validation_error(FieldErrors::from([("email", message.to_string())]))
}
