//! Session cookie transport.

use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};

use newsdesk_auth::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Response extension set by handlers that end the session; rotated tokens
/// must not be re-issued on such a response.
#[derive(Debug, Clone, Copy)]
pub struct SessionCleared;

/// Cookie attributes shared by both session cookies.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
    pub access_max_age_secs: i64,
    pub refresh_max_age_secs: i64,
}

impl CookiePolicy {
    fn render(&self, name: &str, value: &str, max_age_secs: i64) -> String {
        let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Strict");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Append `Set-Cookie` headers carrying both tokens.
    pub fn set_session(&self, headers: &mut HeaderMap, pair: &TokenPair) {
        let cookies = [
            self.render(ACCESS_COOKIE, &pair.access_token, self.access_max_age_secs),
            self.render(REFRESH_COOKIE, &pair.refresh_token, self.refresh_max_age_secs),
        ];
        append(headers, &cookies);
    }

    /// Append `Set-Cookie` headers expiring both session cookies.
    pub fn clear_session(&self, headers: &mut HeaderMap) {
        let cookies = [self.render(ACCESS_COOKIE, "", 0), self.render(REFRESH_COOKIE, "", 0)];
        append(headers, &cookies);
    }
}

fn append(headers: &mut HeaderMap, cookies: &[String]) {
    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "session cookie is not a valid header value"),
        }
    }
}

/// Value of the named cookie from the request's `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// Token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
