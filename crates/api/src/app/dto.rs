use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use newsdesk_core::{News, PageRequest, User};

// -------------------------
// Request DTOs
// -------------------------

/// Field name to message, as returned in `errors`.
pub type FieldErrors = BTreeMap<&'static str, String>;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirmation: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        check_length(&mut errors, "name", &self.name, 2, 150);
        check_email(&mut errors, &self.email);
        check_length(&mut errors, "password", &self.password, 8, 32);
        if !errors.contains_key("password") && self.password != self.password_confirmation {
            errors.insert("password", "The password field and password_confirmation field must be the same".into());
        }
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        check_email(&mut errors, &self.email);
        if self.password.is_empty() {
            errors.insert("password", "The password field must be defined".into());
        }
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateNewsRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Stored file name of an already uploaded image.
    pub image: Option<String>,
}

impl CreateNewsRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        check_length(&mut errors, "title", &self.title, 6, 200);
        check_length(&mut errors, "content", &self.content, 10, 30_000);
        if self.image.as_deref().is_none_or(|i| i.trim().is_empty()) {
            errors.insert("image", "Image field is required".into());
        }
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateNewsRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
}

impl UpdateNewsRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if let Some(title) = &self.title {
            check_length(&mut errors, "title", title, 6, 200);
        }
        if let Some(content) = &self.content {
            check_length(&mut errors, "content", content, 10, 30_000);
        }
        if self.image.as_deref().is_some_and(|i| i.trim().is_empty()) {
            errors.insert("image", "The image field must not be empty".into());
        }
        finish(errors)
    }

    pub fn apply(&self, news: &mut News) {
        if let Some(title) = &self.title {
            news.title = title.clone();
        }
        if let Some(content) = &self.content {
            news.content = content.clone();
        }
        if let Some(image) = &self.image {
            news.image = image.clone();
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub profile: String,
}

impl UpdateProfileRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.profile.trim().is_empty() {
            errors.insert("profile", "Profile image is required".into());
        }
        finish(errors)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NewsListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl NewsListQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(
            self.page.unwrap_or(1),
            self.limit.unwrap_or(PageRequest::DEFAULT_LIMIT),
        )
    }
}

fn check_length(errors: &mut FieldErrors, field: &'static str, value: &str, min: usize, max: usize) {
    let len = value.trim().chars().count();
    if len < min {
        errors.insert(field, format!("The {field} field must have at least {min} characters"));
    } else if len > max {
        errors.insert(field, format!("The {field} field must not be greater than {max} characters"));
    }
}

fn check_email(errors: &mut FieldErrors, email: &str) {
    let email = email.trim();
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if !well_formed {
        errors.insert("email", "The email field must be a valid email address".into());
    } else if email.chars().count() > 150 {
        errors.insert("email", "The email field must not be greater than 150 characters".into());
    }
}

fn finish(errors: FieldErrors) -> Result<(), FieldErrors> {
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

// -------------------------
// Response mapping
// -------------------------

pub const CREATED_AT_FORMAT: &str = "%-d %b %y, %-I:%M %p";

pub fn profile_image_url(app_url: &str, profile: Option<&str>) -> String {
    match profile {
        Some(name) if !name.is_empty() => format!("{app_url}/profile_images/{name}"),
        _ => format!("{app_url}/default/default_profile.jpeg"),
    }
}

pub fn profile_view(app_url: &str, user: &User) -> JsonValue {
    json!({
        "id": user.id,
        "name": user.name,
        "email": user.email,
        "profile_image": profile_image_url(app_url, user.profile.as_deref()),
    })
}

/// Public view of an article; `writer` is `None` when the author is gone.
pub fn news_view(app_url: &str, news: &News, writer: Option<&User>) -> JsonValue {
    json!({
        "id": news.id,
        "title": news.title,
        "content": news.content,
        "image": format!("{app_url}/news_images/{}", news.image),
        "created_at": news.created_at.format(CREATED_AT_FORMAT).to_string(),
        "writer_info": writer.map(|w| profile_view(app_url, w)),
    })
}
