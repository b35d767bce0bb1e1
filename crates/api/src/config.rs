//! Process configuration, read once from the environment at start-up.

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Context;

use newsdesk_auth::{TokenConfig, DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS};
use newsdesk_infra::cache::{DEFAULT_SCAN_BATCH, DEFAULT_TTL_SECS};

const DEV_ACCESS_SECRET: &str = "dev-access-secret";
const DEV_REFRESH_SECRET: &str = "dev-refresh-secret";

/// Upper bound for any configured lifetime: ten years.
const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Public base URL used to build image links.
    pub app_url: String,
    /// Enables `Secure` cookies.
    pub production: bool,
    pub tokens: TokenConfig,
    pub cache_ttl_secs: u64,
    pub cache_scan_batch: usize,
    /// Absent: in-memory cache and job queue.
    pub redis_url: Option<String>,
    pub email_workers: usize,
}

impl AppConfig {
    /// Local defaults; nothing is read from the environment.
    pub fn development() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            app_url: "http://localhost:8000".to_string(),
            production: false,
            tokens: TokenConfig::new(DEV_ACCESS_SECRET, DEV_REFRESH_SECRET),
            cache_ttl_secs: DEFAULT_TTL_SECS,
            cache_scan_batch: DEFAULT_SCAN_BATCH,
            redis_url: None,
            email_workers: 1,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::development();

        let production = std::env::var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let access_secret = secret("ACCESS_TOKEN_SECRET", DEV_ACCESS_SECRET, production)?;
        let refresh_secret = secret("REFRESH_TOKEN_SECRET", DEV_REFRESH_SECRET, production)?;

        let tokens = TokenConfig::new(access_secret, refresh_secret)
            .with_access_ttl_secs(parsed_within("ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TTL_SECS, 1, MAX_TTL_SECS)?)
            .with_refresh_ttl_secs(parsed_within("REFRESH_TOKEN_TTL_SECS", DEFAULT_REFRESH_TTL_SECS, 1, MAX_TTL_SECS)?);

        Ok(Self {
            bind_addr: parsed("BIND_ADDR", defaults.bind_addr)?,
            app_url: std::env::var("APP_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.app_url),
            production,
            tokens,
            cache_ttl_secs: parsed_within("CACHE_TTL_SECS", defaults.cache_ttl_secs, 1, MAX_TTL_SECS as u64)?,
            cache_scan_batch: parsed_within("CACHE_SCAN_BATCH", defaults.cache_scan_batch, 1, 100_000)?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            email_workers: parsed("EMAIL_WORKERS", defaults.email_workers)?.max(1),
        })
    }
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("invalid {name}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn parsed_within<T>(name: &str, default: T, min: T, max: T) -> anyhow::Result<T>
where
    T: FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    bounded(name, parsed(name, default)?, min, max)
}

fn bounded<T>(name: &str, value: T, min: T, max: T) -> anyhow::Result<T>
where
    T: PartialOrd + std::fmt::Display,
{
    anyhow::ensure!(value >= min && value <= max, "{name} must be between {min} and {max}, got {value}");
    Ok(value)
}

fn secret(name: &str, dev_default: &str, production: bool) -> anyhow::Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ if production => anyhow::bail!("{name} must be set when APP_ENV=production"),
        _ => {
            tracing::warn!("{name} not set; using insecure dev default");
            Ok(dev_default.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_defaults() {
        let config = AppConfig::development();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.tokens.access_ttl_secs, 900);
        assert_eq!(config.tokens.refresh_ttl_secs, 604_800);
        assert_eq!(config.cache_ttl_secs, 300);
        assert!(!config.production);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn parsed_falls_back_when_unset() {
        let value: u64 = parsed("NEWSDESK_TEST_SURELY_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn lifetimes_outside_the_allowed_range_are_rejected() {
        for ttl in [0, -60, MAX_TTL_SECS + 1, i64::MAX / 1000] {
            let err = bounded("ACCESS_TOKEN_TTL_SECS", ttl, 1, MAX_TTL_SECS).unwrap_err();
            assert!(err.to_string().contains("ACCESS_TOKEN_TTL_SECS"), "{err}");
        }
        assert_eq!(bounded("ACCESS_TOKEN_TTL_SECS", 900, 1, MAX_TTL_SECS).unwrap(), 900);
        assert_eq!(bounded("ACCESS_TOKEN_TTL_SECS", MAX_TTL_SECS, 1, MAX_TTL_SECS).unwrap(), MAX_TTL_SECS);
    }

    #[test]
    fn zero_scan_batch_is_rejected() {
        assert!(bounded("CACHE_SCAN_BATCH", 0usize, 1, 100_000).is_err());
    }
}
