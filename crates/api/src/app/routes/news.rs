use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use newsdesk_auth::Identity;
use newsdesk_core::{DomainError, News, NewsId, PageRequest, RecordStore};
use newsdesk_infra::cache::keys;

use crate::app::routes::common::{blocking, cached_response, find_writer};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

type Response = axum::response::Response;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_news).post(create_news))
        .route("/:id", get(show_news).put(update_news).delete(delete_news))
}

fn render(services: &AppServices, news: &News) -> Result<serde_json::Value, Response> {
    let writer = find_writer(services, news.user_id).map_err(|e| errors::domain_error_to_response(e.into()))?;
    Ok(dto::news_view(&services.config.app_url, news, writer.as_ref()))
}

fn parse_id(raw: &str) -> Result<NewsId, Response> {
    raw.parse::<NewsId>().map_err(errors::domain_error_to_response)
}

/// Load an article the caller is about to mutate; anyone but its writer gets 400.
fn load_owned(services: &AppServices, id: NewsId, identity: &Identity, action: &str) -> Result<News, Response> {
    let news = services
        .news
        .find_by_id(id)
        .map_err(|e| errors::domain_error_to_response(e.into()))?;
    if !news.is_written_by(identity.user_id) {
        tracing::warn!(news_id = %id, user_id = %identity.user_id, action, "ownership check failed");
        return Err(errors::domain_error_to_response(DomainError::not_owner(format!(
            "You are not authorized to {action} this news"
        ))));
    }
    Ok(news)
}

pub async fn list_news(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::NewsListQuery>,
) -> Response {
    let page = query.page_request();
    blocking(&services, move |services| list_page(services, page)).await
}

fn list_page(services: &AppServices, page: PageRequest) -> Response {
    let key = keys::news_list(page);

    let loaded = services.cache.get_or_load::<Response>(&key, || {
        let listed = services
            .news
            .list(page)
            .map_err(|e| errors::domain_error_to_response(e.into()))?;

        if listed.items.is_empty() {
            return Ok(serde_json::json!({
                "success": true,
                "news": null,
                "message": "No news available.",
            }));
        }

        let news = listed
            .items
            .iter()
            .map(|n| render(services, n))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(serde_json::json!({
            "success": true,
            "message": "News retrieved successfully.",
            "news": news,
            "metadata": {
                "total": listed.total,
                "total_pages": listed.total_pages(),
                "current_page": page.page,
                "current_limit": page.limit,
            },
        }))
    });

    match loaded {
        Ok(cached) => cached_response(cached),
        Err(resp) => resp,
    }
}

pub async fn show_news(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    blocking(&services, move |services| show_one(services, id)).await
}

fn show_one(services: &AppServices, id: NewsId) -> Response {
    let loaded = services.cache.get_or_load::<Response>(&keys::news_item(id), || {
        let news = services
            .news
            .find_by_id(id)
            .map_err(|e| errors::domain_error_to_response(e.into()))?;
        Ok(serde_json::json!({
            "success": true,
            "news": render(services, &news)?,
        }))
    });

    match loaded {
        Ok(cached) => cached_response(cached),
        Err(resp) => resp,
    }
}

pub async fn create_news(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<dto::CreateNewsRequest>,
) -> Response {
    if let Err(errs) = body.validate() {
        return errors::validation_error(errs);
    }
    blocking(&services, move |services| create(services, &identity, body)).await
}

fn create(services: &AppServices, identity: &Identity, body: dto::CreateNewsRequest) -> Response {
    let image = body.image.unwrap_or_default();
    let news = match services.news.create(News::new(
        identity.user_id,
        body.title.trim(),
        body.content.trim(),
        image.trim(),
    )) {
        Ok(n) => n,
        Err(e) => return errors::domain_error_to_response(e.into()),
    };

    services.cache.invalidate_after_write(None, keys::NEWS_LISTS);
    tracing::info!(news_id = %news.id, user_id = %identity.user_id, "news created");

    let view = match render(services, &news) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": "News created successfully!",
            "news": view,
        })),
    )
        .into_response()
}

pub async fn update_news(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateNewsRequest>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(errs) = body.validate() {
        return errors::validation_error(errs);
    }
    blocking(&services, move |services| update(services, &identity, id, body)).await
}

fn update(services: &AppServices, identity: &Identity, id: NewsId, body: dto::UpdateNewsRequest) -> Response {
    if let Err(resp) = load_owned(services, id, identity, "update") {
        return resp;
    }

    let updated = match services.news.update(id, &mut |n: &mut News| {
        body.apply(n);
        n.updated_at = Utc::now();
    }) {
        Ok(n) => n,
        Err(e) => return errors::domain_error_to_response(e.into()),
    };

    services
        .cache
        .invalidate_after_write(Some(&keys::news_item(id)), keys::NEWS_LISTS);
    tracing::info!(news_id = %id, "news updated");

    let view = match render(services, &updated) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": "News updated successfully!",
            "news": view,
        })),
    )
        .into_response()
}

pub async fn delete_news(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    blocking(&services, move |services| delete(services, &identity, id)).await
}

fn delete(services: &AppServices, identity: &Identity, id: NewsId) -> Response {
    if let Err(resp) = load_owned(services, id, identity, "delete") {
        return resp;
    }

    if let Err(e) = services.news.delete(id) {
        return errors::domain_error_to_response(e.into());
    }

    services
        .cache
        .invalidate_after_write(Some(&keys::news_item(id)), keys::NEWS_LISTS);
    tracing::info!(news_id = %id, "news deleted");

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": "News deleted successfully!",
        })),
    )
        .into_response()
}
