//! Runtime settings from environment (optionally a `.env` file).

use crate::error::ConfigError;

const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// Directory holding the model config JSON files.
    pub config_path: String,
    pub bind_addr: String,
    /// Prefix the resource routes are nested under; used when building `_rest_links`.
    pub api_prefix: String,
    /// Page size when `X-Base` is absent.
    pub page_size: u32,
    /// Upper bound for `X-Base`.
    pub max_page_size: u32,
    pub body_limit: usize,
    /// Unauthenticated requests are redirected here (with `?next=`) instead of receiving 401.
    pub login_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/model_rest".into(),
            config_path: "models".into(),
            bind_addr: "0.0.0.0:3000".into(),
            api_prefix: "/api".into(),
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            body_limit: DEFAULT_BODY_LIMIT,
            login_url: None,
        }
    }
}

impl Settings {
    /// Read settings from env, loading `.env` first when present. Unset values keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Settings::default();
        let settings = Settings {
            database_url: env_or("DATABASE_URL", defaults.database_url),
            config_path: env_or("CONFIG_PATH", defaults.config_path),
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr),
            api_prefix: env_or("API_PREFIX", defaults.api_prefix),
            page_size: env_parse("PAGE_SIZE", defaults.page_size)?,
            max_page_size: env_parse("MAX_PAGE_SIZE", defaults.max_page_size)?,
            body_limit: env_parse("BODY_LIMIT", defaults.body_limit)?,
            login_url: std::env::var("LOGIN_URL").ok().filter(|s| !s.is_empty()),
        };
        if settings.page_size == 0 || settings.page_size > settings.max_page_size {
            return Err(ConfigError::Validation(format!(
                "PAGE_SIZE must be between 1 and MAX_PAGE_SIZE ({})",
                settings.max_page_size
            )));
        }
        Ok(settings)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|s| !s.is_empty()).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Validation(format!("{} must be a number, got '{}'", key, raw))),
        _ => Ok(default),
    }
}
