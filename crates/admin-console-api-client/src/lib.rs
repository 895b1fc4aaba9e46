use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use admin_console_core::auth::{
    AuthUser, TokenSource, UserVerifier, VERIFY_USER_PATH, VerifyError, VerifyUserResponse,
    bearer_header_value,
};
use admin_console_core::config::{ConsoleConfig, MIN_REQUEST_TIMEOUT_MS};
use admin_console_core::interceptor::{InterceptorRegistry, ResponseMeta};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct ConsoleApiClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Attempts for idempotent GETs. Writes are sent once.
    pub request_attempts: usize,
}

impl ConsoleApiClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn from_console_config(config: &ConsoleConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            timeout_ms: config.request_timeout.as_millis() as u64,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("console_api_base_url_missing")]
    BaseUrlMissing,
    #[error("console_api_invalid_path")]
    InvalidPath,
    #[error("console_api_missing_credential")]
    MissingCredential,
    #[error("console_api_encode_failed:{message}")]
    Encode { message: String },
    #[error("console_api_request_failed:{message}")]
    Request { message: String },
    #[error("console_api_read_failed:{message}")]
    Read { message: String },
    #[error("console_api_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("console_api_json_decode_failed:{message}")]
    Decode { message: String },
}

impl ApiClientError {
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

/// REST client shared by every dashboard panel.
///
/// Each response, successful or not, is reported to the interceptor
/// registry before the caller sees it.
#[derive(Clone)]
pub struct ConsoleApiClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
    interceptors: Arc<InterceptorRegistry>,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl fmt::Debug for ConsoleApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleApiClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("request_attempts", &self.request_attempts)
            .field("interceptors", &self.interceptors.len())
            .field("has_token_source", &self.tokens.is_some())
            .finish()
    }
}

impl ConsoleApiClient {
    pub fn new(config: ConsoleApiClientConfig) -> Result<Self, ApiClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(MIN_REQUEST_TIMEOUT_MS)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
            interceptors: Arc::new(InterceptorRegistry::new()),
            tokens: None,
        })
    }

    pub fn from_console_config(config: &ConsoleConfig) -> Result<Self, ApiClientError> {
        Self::new(ConsoleApiClientConfig::from_console_config(config))
    }

    /// Attaches `Authorization: Bearer` from `tokens` to every request.
    #[must_use]
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    #[must_use]
    pub fn with_interceptors(mut self, interceptors: Arc<InterceptorRegistry>) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn interceptors(&self) -> &Arc<InterceptorRegistry> {
        &self.interceptors
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn verify_user_path() -> &'static str {
        VERIFY_USER_PATH
    }

    #[must_use]
    pub fn companies_path() -> &'static str {
        "/api/company/companies"
    }

    #[must_use]
    pub fn company_path(company_id: &str) -> String {
        format!("/api/company/{}", company_id.trim())
    }

    #[must_use]
    pub fn company_update_path(company_id: &str) -> String {
        format!("/api/company/update/{}", company_id.trim())
    }

    #[must_use]
    pub fn users_path() -> &'static str {
        "/api/user"
    }

    #[must_use]
    pub fn events_path() -> &'static str {
        "/api/events/AllEvent"
    }

    #[must_use]
    pub fn offers_path() -> &'static str {
        "/api/offer/all"
    }

    #[must_use]
    pub fn offer_create_path() -> &'static str {
        "/api/offer/"
    }

    #[must_use]
    pub fn offer_path(offer_id: &str) -> String {
        format!("/api/offer/{}", offer_id.trim())
    }

    pub async fn verify_user_response(
        &self,
        token: &str,
    ) -> Result<VerifyUserResponse, ApiClientError> {
        let bearer = bearer_header_value(token).ok_or(ApiClientError::MissingCredential)?;
        let response = self
            .send(Method::GET, VERIFY_USER_PATH, None, Some(bearer))
            .await?;
        decode_json_response(response).await
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, ApiClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.send(Method::GET, path, None, None).await?;
        decode_json_response(response).await
    }

    pub async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ApiClientError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let body = encode_payload(payload)?;
        let response = self.send(Method::POST, path, Some(body), None).await?;
        decode_json_response(response).await
    }

    pub async fn put_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ApiClientError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let body = encode_payload(payload)?;
        let response = self.send(Method::PUT, path, Some(body), None).await?;
        decode_json_response(response).await
    }

    pub async fn delete_json<T>(&self, path: &str) -> Result<T, ApiClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.send(Method::DELETE, path, None, None).await?;
        decode_json_response(response).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        bearer: Option<String>,
    ) -> Result<reqwest::Response, ApiClientError> {
        let url = self.endpoint(path).ok_or(ApiClientError::InvalidPath)?;
        let bearer = bearer.or_else(|| {
            self.tokens
                .as_ref()
                .and_then(|tokens| tokens.bearer_token())
                .and_then(|token| bearer_header_value(&token))
        });
        let attempts = if method == Method::GET {
            self.request_attempts
        } else {
            1
        };
        let mut last_error: Option<String> = None;

        for attempt in 0..attempts {
            let mut request = self
                .http
                .request(method.clone(), url.as_str())
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout);
            if let Some(bearer) = &bearer {
                request = request.header(reqwest::header::AUTHORIZATION, bearer);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let meta = ResponseMeta::new(
                        response.status().as_u16(),
                        method.as_str(),
                        url.as_str(),
                    );
                    self.interceptors.dispatch(&meta);
                    return Ok(response);
                }
                Err(error) => {
                    tracing::debug!(
                        method = %method,
                        url = %url,
                        attempt,
                        %error,
                        "console api request failed"
                    );
                    last_error = Some(error.to_string());
                    if attempt + 1 >= attempts {
                        break;
                    }
                }
            }
        }

        Err(ApiClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[async_trait]
impl UserVerifier for ConsoleApiClient {
    async fn verify_user(&self, token: &str) -> Result<AuthUser, VerifyError> {
        self.verify_user_response(token)
            .await
            .map(|response| response.user)
            .map_err(verify_error)
    }
}

fn verify_error(error: ApiClientError) -> VerifyError {
    match error {
        ApiClientError::Http { status, .. } if status == StatusCode::UNAUTHORIZED => {
            VerifyError::Unauthorized {
                status: status.as_u16(),
            }
        }
        ApiClientError::Http { status, body } => VerifyError::Http {
            status: status.as_u16(),
            message: body,
        },
        ApiClientError::Decode { message } => VerifyError::Decode(message),
        other => VerifyError::Network(other.to_string()),
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ApiClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    ApiClientError::Http { status, body }
}

fn normalize_base_url(base_url: &str) -> Result<String, ApiClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ApiClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn encode_payload<T>(payload: &T) -> Result<serde_json::Value, ApiClientError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_value(payload).map_err(|error| ApiClientError::Encode {
        message: error.to_string(),
    })
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ApiClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ApiClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ApiClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
