//! Client-side fetch layer
//!
//! [`RetryGateway`] issues requests against the dashboard's own API, retries
//! rate-limited and unavailable responses with backoff, coalesces concurrent
//! requests for the same path and lets each caller cancel independently.

pub mod binding;
mod transport;

pub use binding::ResourceBinding;
pub use binding::ResourceState;
pub use transport::*;

use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use log::debug;
use log::warn;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::GatewayError;
use crate::flight::Flight;
use crate::flight::InFlightRegistry;
use crate::response::Response;
use crate::retry::RetryConfig;
use crate::retry::parse_delay;

type Envelope = Response<Value>;

/// Retrying, deduplicating HTTP gateway.
///
/// This gateway is cheap to clone (uses `Arc` internally); clones share the
/// same in-flight registry.
///
/// # Example
///
/// ```ignore
/// use scoutdash_lib::gateway::RetryGateway;
///
/// let gateway = RetryGateway::builder()
///     .base_url("https://scout.example.org")
///     .build()?;
///
/// let teams = gateway.fetch_resource::<Vec<Team>>("/api/events/2024casj/teams").await?;
/// if teams.is_stale() {
///     // upstream is down, the server served its last good copy
/// }
/// ```
#[derive(Clone)]
pub struct RetryGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    base_url: Url,
    transport: Arc<dyn Transport>,
    retry_config: RetryConfig,
    in_flight: InFlightRegistry<Result<Envelope, GatewayError>>,
}

impl RetryGateway {
    /// Creates a new builder for constructing a gateway.
    pub fn builder() -> RetryGatewayBuilder<Missing> {
        RetryGatewayBuilder::new()
    }

    /// Fetches the envelope at `path` and decodes its data as `T`.
    ///
    /// Concurrent calls for the same path share one request.
    pub async fn fetch_resource<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Response<T>, GatewayError> {
        let envelope = self.join(path).await?;
        decode(envelope)
    }

    /// Like [`fetch_resource`](Self::fetch_resource), but gives up as soon as
    /// `cancel` fires.
    ///
    /// Cancelling only stops this caller from waiting; the shared request keeps
    /// running for everyone else.
    pub async fn fetch_resource_with_cancel<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Response<T>, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let flight = self.join(path);
        let envelope = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("caller stopped waiting for {path}");
                return Err(GatewayError::Cancelled);
            }
            result = flight => result?,
        };
        decode(envelope)
    }

    /// Returns `true` if a request for `path` is outstanding.
    pub fn is_in_flight(&self, path: &str) -> bool {
        self.inner.in_flight.contains(path)
    }

    /// Returns the base URL paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Returns the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry_config
    }

    fn join(&self, path: &str) -> Flight<Result<Envelope, GatewayError>> {
        let inner = Arc::clone(&self.inner);
        let owned_path = path.to_string();
        let flight = self.inner.in_flight.join_or_start(path, move || {
            async move { inner.fetch_with_retry(&owned_path).await }.boxed()
        });
        if !flight.is_leader() {
            debug!("coalesced request for {path}");
        }
        flight
    }
}

impl GatewayInner {
    async fn fetch_with_retry(&self, path: &str) -> Result<Envelope, GatewayError> {
        let url = self.base_url.join(path)?;
        let mut attempt = 0;

        loop {
            match self.send(&url).await {
                Ok(envelope) => return Ok(envelope),
                Err(err) if err.is_retryable() && attempt < self.retry_config.max_retries => {
                    let wait = err
                        .retry_after()
                        .unwrap_or_else(|| self.retry_config.backoff(attempt));
                    attempt += 1;
                    warn!(
                        "{url}: {err}; retry {attempt}/{} in {wait:?}",
                        self.retry_config.max_retries
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send(&self, url: &Url) -> Result<Envelope, GatewayError> {
        let response = self.transport.get(url).await?;
        classify(response)
    }
}

/// Turns a raw response into an envelope or a classified failure.
fn classify(response: RawResponse) -> Result<Envelope, GatewayError> {
    let status = response.status;

    if status.is_success() {
        return serde_json::from_slice(&response.body).map_err(|e| {
            GatewayError::parse_with_body(
                e.to_string(),
                String::from_utf8_lossy(&response.body),
            )
        });
    }

    if status.is_redirection() && status != StatusCode::NOT_MODIFIED {
        return Err(GatewayError::AuthRequired {
            location: response.header(LOCATION).map(str::to_string),
        });
    }

    let retry_after = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            parse_delay(response.header(RETRY_AFTER))
        }
        _ => None,
    };

    Err(GatewayError::Http {
        status: status.as_u16(),
        message: String::from_utf8_lossy(&response.body).into_owned(),
        retry_after,
    })
}

fn decode<T: DeserializeOwned>(envelope: Envelope) -> Result<Response<T>, GatewayError> {
    envelope.try_map(|data| {
        serde_json::from_value(data).map_err(|e| GatewayError::parse(e.to_string()))
    })
}

// =============================================================================
// Typestate Builder
// =============================================================================

/// Marker type for missing required builder fields.
pub struct Missing;

/// Marker type for set builder fields.
pub struct Set<T>(T);

/// Builder for constructing a [`RetryGateway`].
///
/// Uses the typestate pattern to ensure the base URL is set at compile time.
///
/// # Example
///
/// ```ignore
/// let gateway = RetryGateway::builder()
///     .base_url("https://scout.example.org")
///     .retry_config(RetryConfig::default().max_retries(5))
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub struct RetryGatewayBuilder<BaseUrl> {
    base_url: BaseUrl,
    transport: Option<Arc<dyn Transport>>,
    retry_config: RetryConfig,
    timeout: Option<Duration>,
}

impl RetryGatewayBuilder<Missing> {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            base_url: Missing,
            transport: None,
            retry_config: RetryConfig::default(),
            timeout: None,
        }
    }

    /// Sets the base URL that resource paths are joined onto.
    pub fn base_url(self, url: impl Into<String>) -> RetryGatewayBuilder<Set<String>> {
        RetryGatewayBuilder {
            base_url: Set(url.into()),
            transport: self.transport,
            retry_config: self.retry_config,
            timeout: self.timeout,
        }
    }
}

impl Default for RetryGatewayBuilder<Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> RetryGatewayBuilder<U> {
    /// Sets a custom transport.
    ///
    /// If not set, a [`ReqwestTransport`] is created.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the retry configuration.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Sets the per-request timeout of the default transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl RetryGatewayBuilder<Set<String>> {
    /// Builds the [`RetryGateway`].
    ///
    /// Fails if the base URL is invalid or the default HTTP client cannot be
    /// created.
    pub fn build(self) -> Result<RetryGateway, GatewayError> {
        let base_url = Url::parse(&self.base_url.0)?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let mut transport = ReqwestTransport::new()?;
                if let Some(timeout) = self.timeout {
                    transport = transport.timeout(timeout);
                }
                Arc::new(transport)
            }
        };

        Ok(RetryGateway {
            inner: Arc::new(GatewayInner {
                base_url,
                transport,
                retry_config: self.retry_config,
                in_flight: InFlightRegistry::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::cache::FreshnessClass;

    fn envelope_body() -> Vec<u8> {
        serde_json::to_vec(&Response::fresh(json!([1, 2]), Utc::now(), FreshnessClass::Live))
            .unwrap()
    }

    #[test]
    fn test_classify_success() {
        let envelope = classify(RawResponse::new(StatusCode::OK, envelope_body())).unwrap();
        assert_eq!(envelope.data(), &json!([1, 2]));
    }

    #[test]
    fn test_classify_bad_body() {
        let err = classify(RawResponse::new(StatusCode::OK, "<html>")).unwrap_err();
        assert!(matches!(err, GatewayError::Parse { body: Some(_), .. }));
    }

    #[test]
    fn test_classify_redirect_is_auth() {
        for status in [
            StatusCode::MOVED_PERMANENTLY,
            StatusCode::FOUND,
            StatusCode::SEE_OTHER,
            StatusCode::TEMPORARY_REDIRECT,
            StatusCode::PERMANENT_REDIRECT,
        ] {
            let err = classify(RawResponse::new(status, "").with_header("location", "/login"))
                .unwrap_err();
            assert_eq!(
                err,
                GatewayError::AuthRequired {
                    location: Some("/login".into())
                }
            );
        }
    }

    #[test]
    fn test_classify_backpressure() {
        let err = classify(
            RawResponse::new(StatusCode::TOO_MANY_REQUESTS, "slow down")
                .with_header("Retry-After", "2"),
        )
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let err = classify(
            RawResponse::new(StatusCode::SERVICE_UNAVAILABLE, "").with_header("retry-after", "later"),
        )
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_classify_other_status_ignores_retry_after() {
        let err = classify(
            RawResponse::new(StatusCode::NOT_FOUND, "missing").with_header("Retry-After", "5"),
        )
        .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.status_code(), Some(404));
    }

    #[test]
    fn test_decode_mismatch() {
        let envelope = Response::fresh(json!("text"), Utc::now(), FreshnessClass::Live);
        let err = decode::<Vec<u32>>(envelope).unwrap_err();
        assert!(matches!(err, GatewayError::Parse { .. }));
    }

    #[test]
    fn test_build_rejects_bad_url() {
        let err = RetryGateway::builder().base_url("not a url").build().err().unwrap();
        assert!(matches!(err, GatewayError::InvalidUrl(_)));
    }
}
