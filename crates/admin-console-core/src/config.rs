use std::time::Duration;

use crate::session::SessionConfig;
use crate::view_router::DashboardView;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:4000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 250;

pub const ENV_API_BASE_URL: &str = "ADMIN_CONSOLE_API_BASE_URL";
pub const ENV_API_BASE_URL_LEGACY: &str = "API_BASE_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ADMIN_CONSOLE_REQUEST_TIMEOUT_MS";
pub const ENV_VERIFIED_LANDING_VIEW: &str = "ADMIN_CONSOLE_VERIFIED_LANDING_VIEW";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("{key} must be a whole number of milliseconds, got `{value}`")]
    InvalidTimeout { key: &'static str, value: String },
    #[error("{key} must name a dashboard view or `none`, got `{value}`")]
    InvalidLandingView { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub api_base_url: String,
    /// Which variable the base url came from, or `default_local`.
    pub api_base_url_source: &'static str,
    pub request_timeout: Duration,
    pub verified_landing_view: Option<DashboardView>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_base_url_source: "default_local",
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            verified_landing_view: SessionConfig::default().verified_landing_view,
        }
    }
}

impl ConsoleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let (api_base_url, api_base_url_source) = resolve_api_base_url()?;
        let request_timeout = resolve_request_timeout()?;
        let verified_landing_view = resolve_verified_landing_view()?;
        tracing::debug!(
            api_base_url = %api_base_url,
            source = api_base_url_source,
            timeout_ms = request_timeout.as_millis() as u64,
            "console config resolved"
        );
        Ok(Self {
            api_base_url,
            api_base_url_source,
            request_timeout,
            verified_landing_view,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            verified_landing_view: self.verified_landing_view,
        }
    }
}

pub fn resolve_api_base_url() -> Result<(String, &'static str), ConfigError> {
    if let Some(base_url) = env_non_empty(ENV_API_BASE_URL) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_API_BASE_URL));
    }
    if let Some(base_url) = env_non_empty(ENV_API_BASE_URL_LEGACY) {
        return normalize_base_url(&base_url)
            .map(|normalized| (normalized, ENV_API_BASE_URL_LEGACY));
    }
    normalize_base_url(DEFAULT_API_BASE_URL).map(|normalized| (normalized, "default_local"))
}

pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyBaseUrl);
    }
    let Some((scheme, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidBaseUrl);
    };
    if !matches!(scheme, "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl);
    }
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

fn resolve_request_timeout() -> Result<Duration, ConfigError> {
    let Some(raw) = env_non_empty(ENV_REQUEST_TIMEOUT_MS) else {
        return Ok(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS));
    };
    let millis = raw
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidTimeout {
            key: ENV_REQUEST_TIMEOUT_MS,
            value: raw.clone(),
        })?;
    Ok(Duration::from_millis(millis.max(MIN_REQUEST_TIMEOUT_MS)))
}

fn resolve_verified_landing_view() -> Result<Option<DashboardView>, ConfigError> {
    let Some(raw) = env_non_empty(ENV_VERIFIED_LANDING_VIEW) else {
        return Ok(SessionConfig::default().verified_landing_view);
    };
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    DashboardView::parse(&raw.to_ascii_lowercase())
        .map(Some)
        .ok_or(ConfigError::InvalidLandingView {
            key: ENV_VERIFIED_LANDING_VIEW,
            value: raw,
        })
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
