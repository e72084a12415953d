use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::{calculate_retry_delay, INITIAL_RETRY_DELAY_MS, TEMPLATE_FETCH_ATTEMPTS};

pub const MAX_URL_LENGTH: usize = 2048;

/// Fetches the remote checklist template. One call is one attempt; retrying
/// is the loader's job.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait TemplateTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, HttpError>;
}

/// Waits between retry attempts. Hosts supply a timer; tests record the
/// requested delays instead of sleeping.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Delay {
    async fn wait(&self, duration: Duration);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("HTTP error {status}")]
    Status { status: u16 },

    #[error("invalid response body: {reason}")]
    InvalidBody { reason: String },
}

impl HttpError {
    /// Template fetches retry every failure except a malformed URL, which
    /// cannot succeed on a later attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidUrl { .. })
    }
}

// ============================================================================
// Retry policy
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: TEMPLATE_FETCH_ATTEMPTS,
            initial_backoff_ms: INITIAL_RETRY_DELAY_MS,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after the zero-based `attempt` failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_retry_delay(self.initial_backoff_ms, attempt))
    }

    /// How long to wait before trying again after the zero-based `attempt`
    /// failed with `error`, or `None` when the fetch should give up.
    #[must_use]
    pub fn wait_after(&self, attempt: u32, error: &HttpError) -> Option<Duration> {
        let last_attempt = attempt + 1 >= self.max_attempts.max(1);
        if last_attempt || !error.is_retryable() {
            return None;
        }
        Some(self.delay_for(attempt))
    }
}

// ============================================================================
// Template URL
// ============================================================================

/// Where the template lives. Absolute URLs are validated with `url`; relative
/// paths are resolved by the host against the page origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateUrl {
    Absolute(String),
    Relative(String),
}

impl TemplateUrl {
    pub fn parse(raw: &str) -> Result<Self, HttpError> {
        let invalid = |reason: &str| HttpError::InvalidUrl {
            url: raw.chars().take(100).collect(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("URL cannot be empty"));
        }
        if trimmed.len() > MAX_URL_LENGTH {
            return Err(invalid("URL is too long"));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid("URL contains whitespace or control characters"));
        }

        if !trimmed.contains("://") {
            return Ok(Self::Relative(trimmed.to_string()));
        }

        let parsed = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            _ => return Err(invalid("only http and https are supported")),
        }
        if parsed.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        Ok(Self::Absolute(parsed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Absolute(url) | Self::Relative(url) => url,
        }
    }

    /// Appends a `_=<nonce>` query parameter so intermediate caches never
    /// answer the request.
    #[must_use]
    pub fn with_cache_buster(&self, nonce: u64) -> String {
        match self {
            Self::Absolute(raw) => match Url::parse(raw) {
                Ok(mut url) => {
                    url.query_pairs_mut().append_pair("_", &nonce.to_string());
                    url.to_string()
                }
                Err(_) => raw.clone(),
            },
            Self::Relative(path) => {
                let separator = if path.contains('?') { '&' } else { '?' };
                format!("{path}{separator}_={nonce}")
            }
        }
    }
}

// ============================================================================
// Native timer
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
