use std::sync::Arc;

use axum::{extract::State, middleware::Next, response::Response};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::cookies::{bearer_token, read_cookie, SessionCleared, ACCESS_COOKIE, REFRESH_COOKIE};

/// Authenticate the request from its session cookies (or a bearer access
/// token), attach the caller's `Identity`, and hand rotated tokens back as
/// `Set-Cookie` headers.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let headers = req.headers();
    let access = read_cookie(headers, ACCESS_COOKIE)
        .or_else(|| bearer_token(headers))
        .map(str::to_owned);
    let refresh = read_cookie(headers, REFRESH_COOKIE).map(str::to_owned);

    let auth = match services.sessions.authorize(access.as_deref(), refresh.as_deref()) {
        Ok(auth) => auth,
        Err(e) if e.is_rejection() => {
            tracing::debug!(error = %e, path = %req.uri().path(), "request rejected");
            return errors::unauthorized("Unauthorized request");
        }
        Err(e) => return errors::auth_error_to_response(e),
    };

    req.extensions_mut().insert(auth.identity);

    let mut response = next.run(req).await;
    let cleared = response.extensions().get::<SessionCleared>().is_some();
    if let Some(pair) = auth.rotated.filter(|_| !cleared) {
        services.cookies.set_session(response.headers_mut(), &pair);
    }
    response
}
