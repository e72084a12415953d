//! Remote checklist template with retry and a built-in fallback.

use tracing::{error, info, instrument, warn};

use crate::capabilities::{
    Delay, HttpError, HttpResponse, RetryConfig, TemplateTransport, TemplateUrl,
};
use crate::config::{ConfigError, PlannerConfig};
use crate::model::{decode_sections, fallback_sections, Section};
use crate::{get_current_time_ms, Notice, NoticeKind};

pub const TEMPLATE_UNAVAILABLE_MESSAGE: &str = "Could not fetch the default checklist template \
from the server after multiple attempts. Using a basic built-in list instead.";

const FALLBACK_NOTICE_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateOrigin {
    /// Served by the remote endpoint on the given (one-based) attempt.
    Remote { attempts: u32 },
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOutcome {
    pub sections: Vec<Section>,
    pub origin: TemplateOrigin,
    /// Set when the fallback list was used.
    pub notice: Option<Notice>,
}

impl TemplateOutcome {
    #[must_use]
    pub fn remote(sections: Vec<Section>, attempts: u32) -> Self {
        info!(attempts, sections = sections.len(), "template loaded");
        Self {
            sections,
            origin: TemplateOrigin::Remote { attempts },
            notice: None,
        }
    }

    /// The built-in list, with a notice telling the user the template could
    /// not be fetched.
    #[must_use]
    pub fn fallback() -> Self {
        error!("template unavailable, using built-in list");
        Self {
            sections: fallback_sections(),
            origin: TemplateOrigin::Fallback,
            notice: Some(
                Notice::toast(TEMPLATE_UNAVAILABLE_MESSAGE, NoticeKind::Warning)
                    .with_duration(FALLBACK_NOTICE_MS),
            ),
        }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.origin == TemplateOrigin::Fallback
    }
}

/// The request URL for the zero-based `attempt`, with a fresh cache buster.
#[must_use]
pub fn attempt_url(url: &TemplateUrl, attempt: u32) -> String {
    url.with_cache_buster(get_current_time_ms().wrapping_add(u64::from(attempt)))
}

/// Reads one template response. Non-2xx statuses and bodies that are not a
/// checklist count as failed attempts.
pub fn read_response(
    response: Result<HttpResponse, HttpError>,
) -> Result<Vec<Section>, HttpError> {
    let response = response?;
    if !response.is_success() {
        return Err(HttpError::Status {
            status: response.status(),
        });
    }
    decode_sections(response.body()).map_err(|e| HttpError::InvalidBody {
        reason: e.to_string(),
    })
}

pub struct TemplateLoader<T, D> {
    transport: T,
    delay: D,
    url: TemplateUrl,
    retry: RetryConfig,
}

impl<T, D> TemplateLoader<T, D>
where
    T: TemplateTransport,
    D: Delay,
{
    pub fn new(transport: T, delay: D, url: TemplateUrl, retry: RetryConfig) -> Self {
        Self {
            transport,
            delay,
            url,
            retry,
        }
    }

    pub fn from_config(
        config: &PlannerConfig,
        transport: T,
        delay: D,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            transport,
            delay,
            config.parsed_template_url()?,
            config.retry,
        ))
    }

    pub fn url(&self) -> &TemplateUrl {
        &self.url
    }

    /// Fetches the template, waiting `initial_backoff * 2^n` after the n-th
    /// failed attempt. Never fails: once attempts are exhausted the built-in
    /// list is returned together with a notice for the user.
    #[instrument(skip(self), fields(url = %self.url.as_str()))]
    pub async fn fetch(&self) -> TemplateOutcome {
        for attempt in 0..self.retry.max_attempts.max(1) {
            let response = self.transport.get(&attempt_url(&self.url, attempt)).await;
            match read_response(response) {
                Ok(sections) => return TemplateOutcome::remote(sections, attempt + 1),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "template fetch attempt failed");
                    match self.retry.wait_after(attempt, &e) {
                        Some(wait) => self.delay.wait(wait).await,
                        None => break,
                    }
                }
            }
        }
        TemplateOutcome::fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::{RecordingDelay, ScriptedTransport};
    use std::time::Duration;

    const TEMPLATE: &str =
        r#"[{"id":"kitchen","title":"Kitchen","items":[{"id":"stove","text":"Stove"}]}]"#;

    fn loader(
        transport: ScriptedTransport,
        delay: RecordingDelay,
    ) -> TemplateLoader<ScriptedTransport, RecordingDelay> {
        TemplateLoader::new(
            transport,
            delay,
            TemplateUrl::parse("camplist.json").unwrap(),
            RetryConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let transport = ScriptedTransport::serving(TEMPLATE);
        let delay = RecordingDelay::new();
        let outcome = loader(transport.clone(), delay.clone()).fetch().await;

        assert_eq!(outcome.origin, TemplateOrigin::Remote { attempts: 1 });
        assert_eq!(outcome.sections[0].items[0].text, "Stove");
        assert!(outcome.notice.is_none());
        assert!(delay.waits().is_empty());
        assert!(transport.requests()[0].starts_with("camplist.json?_="));
    }

    #[tokio::test]
    async fn test_recovers_on_third_attempt() {
        let transport = ScriptedTransport::new();
        transport.push(Err(HttpError::Connection {
            message: "reset".into(),
        }));
        transport.push(Ok(HttpResponse::new(503, Vec::new())));
        transport.push(Ok(HttpResponse::ok(TEMPLATE.as_bytes().to_vec())));
        let delay = RecordingDelay::new();

        let outcome = loader(transport, delay.clone()).fetch().await;

        assert_eq!(outcome.origin, TemplateOrigin::Remote { attempts: 3 });
        assert_eq!(
            delay.waits(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_returns_fallback_with_notice() {
        let transport = ScriptedTransport::offline();
        let delay = RecordingDelay::new();

        let outcome = loader(transport.clone(), delay).fetch().await;

        assert!(outcome.is_fallback());
        assert_eq!(outcome.sections, fallback_sections());
        let notice = outcome.notice.unwrap();
        assert_eq!(notice.message, TEMPLATE_UNAVAILABLE_MESSAGE);
        assert!(!notice.is_dialog());
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_body_is_retried() {
        let transport = ScriptedTransport::new();
        transport.push(Ok(HttpResponse::ok(b"{\"not\":\"a list\"}".to_vec())));
        transport.push(Ok(HttpResponse::ok(TEMPLATE.as_bytes().to_vec())));

        let outcome = loader(transport, RecordingDelay::new()).fetch().await;
        assert_eq!(outcome.origin, TemplateOrigin::Remote { attempts: 2 });
    }

    #[test]
    fn test_read_response_rejects_bad_status_and_body() {
        assert_eq!(
            read_response(Ok(HttpResponse::new(404, Vec::new()))),
            Err(HttpError::Status { status: 404 })
        );
        assert!(matches!(
            read_response(Ok(HttpResponse::ok(b"{}".to_vec()))),
            Err(HttpError::InvalidBody { .. })
        ));
        let sections = read_response(Ok(HttpResponse::ok(TEMPLATE))).unwrap();
        assert_eq!(sections[0].title, "Kitchen");
    }

    #[tokio::test]
    async fn test_single_attempt_policy_never_waits() {
        let delay = RecordingDelay::new();
        let loader = TemplateLoader::new(
            ScriptedTransport::offline(),
            delay.clone(),
            TemplateUrl::parse("camplist.json").unwrap(),
            RetryConfig::none(),
        );
        assert!(loader.fetch().await.is_fallback());
        assert!(delay.waits().is_empty());
    }
}
