use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use newsdesk_auth::Identity;
use newsdesk_infra::jobs::{Job, JobId};

use crate::app::errors;
use crate::app::routes::common::blocking;
use crate::app::services::AppServices;

type Response = axum::response::Response;

pub fn router() -> Router {
    Router::new()
        .route("/:queue/stats", get(queue_stats))
        .route("/:queue/:id", get(get_job))
        .route("/:queue/:id/retry", post(retry_job))
}

fn parse_job_id(raw: &str) -> Result<JobId, Response> {
    raw.parse::<JobId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid job id: {e}")))
}

fn job_not_found(id: JobId) -> Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
}

/// A job the caller submitted. Other users' jobs read as missing.
fn load_owned(services: &AppServices, queue: &str, id: JobId, identity: &Identity) -> Result<Job, Response> {
    match services.jobs.get(queue, id) {
        Ok(Some(job)) if job.is_owned_by(identity.user_id) => Ok(job),
        Ok(_) => Err(job_not_found(id)),
        Err(e) => Err(errors::job_error_to_response(e)),
    }
}

pub async fn queue_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Path(queue): Path<String>,
) -> Response {
    blocking(&services, move |services| match services.jobs.stats(&queue) {
        Ok(stats) => Json(serde_json::json!({
            "success": true,
            "queue": queue,
            "stats": stats,
        }))
        .into_response(),
        Err(e) => errors::job_error_to_response(e),
    })
    .await
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((queue, id)): Path<(String, String)>,
) -> Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    blocking(&services, move |services| match load_owned(services, &queue, id, &identity) {
        Ok(job) => Json(serde_json::json!({
            "success": true,
            "state": job.status.state().as_str(),
            "job": job,
        }))
        .into_response(),
        Err(resp) => resp,
    })
    .await
}

pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((queue, id)): Path<(String, String)>,
) -> Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    blocking(&services, move |services| {
        if let Err(resp) = load_owned(services, &queue, id, &identity) {
            return resp;
        }
        match services.jobs.retry_failed(&queue, id) {
            Ok(job) => {
                tracing::info!(job_id = %id, queue = %queue, "failed job re-queued");
                Json(serde_json::json!({
                    "success": true,
                    "message": "Job re-queued.",
                    "job": job,
                }))
                .into_response()
            }
            Err(e) => errors::job_error_to_response(e),
        }
    })
    .await
}
