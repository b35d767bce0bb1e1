use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use newsdesk_auth::Identity;
use newsdesk_infra::jobs::{EmailMessage, EMAIL_QUEUE};

use crate::app::dto::FieldErrors;
use crate::app::errors;
use crate::app::routes::common::blocking;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/", post(send_emails))
}

/// Accept a batch for background delivery. Returns as soon as the job is
/// stored; delivery happens on the email workers.
pub async fn send_emails(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Json(batch): Json<Vec<EmailMessage>>,
) -> axum::response::Response {
    if batch.is_empty() {
        return errors::validation_error(FieldErrors::from([(
            "emails",
            "At least one email is required".to_string(),
        )]));
    }

    blocking(&services, move |services| enqueue(services, &identity, batch)).await
}

fn enqueue(services: &AppServices, identity: &Identity, batch: Vec<EmailMessage>) -> axum::response::Response {
    let job_id = match services.emails.enqueue_for(identity.user_id, &batch) {
        Ok(id) => id,
        Err(e) => return errors::job_error_to_response(e),
    };
    tracing::info!(%job_id, user_id = %identity.user_id, count = batch.len(), "email batch queued");

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "success": true,
            "message": "Emails queued for delivery.",
            "queue": EMAIL_QUEUE,
            "job_id": job_id.to_string(),
        })),
    )
        .into_response()
}
