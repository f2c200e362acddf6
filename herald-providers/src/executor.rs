//! Resilient request executor
//!
//! Every provider client sends its GET requests through a
//! [`ResilientExecutor`]: a hard per-attempt timeout, retry of transient
//! failures (408, 429, 5xx, timeouts and connection errors) with
//! `Retry-After` or exponential backoff plus jitter, and a typed
//! [`HeraldError`] once the budget is spent.

use std::sync::Arc;
use std::time::Duration;

use herald_core::{
    Clock, ErrorCode, HeraldError, HeraldResult, HttpRequest, HttpResponse, HttpTransport,
    ProviderEndpoint, ProviderFailure, Sleeper, SystemClock, TokioSleeper, TransportError,
};
use rand::Rng;
use serde::de::DeserializeOwned;

/// Jitter added on top of exponential backoff, given the backoff base.
pub type Jitter = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Uniform jitter in `[0, base]`.
pub fn random_jitter() -> Jitter {
    Arc::new(|base: Duration| {
        let max_ms = base.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    })
}

pub fn no_jitter() -> Jitter {
    Arc::new(|_| Duration::ZERO)
}

/// True for statuses worth retrying: 408, 429 and 5xx.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Parse a `Retry-After` header: delay in seconds, or an HTTP date.
pub fn parse_retry_after(value: &str, now_ms: i64) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_millis((seconds * 1000.0).round() as u64));
        }
        return None;
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta_ms = at.timestamp_millis() - now_ms;
    Some(Duration::from_millis(delta_ms.max(0) as u64))
}

enum Failure {
    Status(HttpResponse),
    Timeout,
    Transport(String),
}

impl Failure {
    fn is_retryable(&self) -> bool {
        match self {
            Failure::Status(response) => is_retryable_status(response.status),
            Failure::Timeout | Failure::Transport(_) => true,
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            Failure::Status(response) => Some(response.status),
            _ => None,
        }
    }
}

/// Timeout/retry wrapper around an [`HttpTransport`] for one provider.
pub struct ResilientExecutor {
    provider: String,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    jitter: Jitter,
}

impl ResilientExecutor {
    pub fn new(
        provider: impl Into<String>,
        endpoint: &ProviderEndpoint,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            provider: provider.into(),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            timeout: endpoint.timeout(),
            max_retries: endpoint.max_retries,
            backoff_base: endpoint.backoff_base(),
            transport,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            jitter: random_jitter(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// GET request for `path` under the base URL, carrying the API key.
    pub fn request(&self, path: &str) -> HttpRequest {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let request = HttpRequest::get(url).header("Accept", "application/json");
        match &self.api_key {
            Some(key) => request.header("X-Subscription-Token", key.clone()),
            None => request,
        }
    }

    /// Delay before retry number `retry` (0-based) when the server gave no
    /// `Retry-After`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.backoff_base.saturating_mul(factor) + (self.jitter)(self.backoff_base)
    }

    /// Send `request` and decode the body as JSON.
    pub async fn fetch_json(&self, request: HttpRequest) -> HeraldResult<serde_json::Value> {
        self.fetch(request).await
    }

    /// Send `request` and decode the body into `T`.
    ///
    /// A body that fails to decode is a fatal `PROVIDER_PAYLOAD` error.
    pub async fn fetch<T: DeserializeOwned>(&self, request: HttpRequest) -> HeraldResult<T> {
        let url = request.display_url();
        let (response, attempts) = self.send(request).await?;
        serde_json::from_str(&response.body).map_err(|e| {
            HeraldError::payload(&self.provider, format!("body is not valid JSON: {}", e))
                .with_provider(ProviderFailure {
                    provider: self.provider.clone(),
                    status: Some(response.status),
                    url,
                    attempts,
                })
        })
    }

    async fn send(&self, request: HttpRequest) -> HeraldResult<(HttpResponse, u32)> {
        let url = request.display_url();
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome =
                tokio::time::timeout(self.timeout, self.transport.get(request.clone())).await;

            let failure = match outcome {
                Ok(Ok(response)) if response.is_success() => return Ok((response, attempt)),
                Ok(Ok(response)) => Failure::Status(response),
                Ok(Err(TransportError::Timeout)) | Err(_) => Failure::Timeout,
                Ok(Err(e)) => Failure::Transport(e.to_string()),
            };

            if !failure.is_retryable() || attempt >= max_attempts {
                return Err(self.surface(failure, url, attempt));
            }

            let delay = match &failure {
                Failure::Status(response) => response
                    .retry_after
                    .as_deref()
                    .and_then(|v| parse_retry_after(v, self.clock.now_ms())),
                _ => None,
            }
            .unwrap_or_else(|| self.backoff(attempt - 1));

            tracing::warn!(
                provider = %self.provider,
                url = %url,
                status = ?failure.status(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Upstream request failed, retrying"
            );
            self.sleeper.sleep(delay).await;
        }
    }

    fn surface(&self, failure: Failure, url: String, attempts: u32) -> HeraldError {
        let status = failure.status();
        let retryable = failure.is_retryable();
        let (code, message) = match &failure {
            Failure::Status(response) if response.status == 429 => (
                ErrorCode::ProviderRateLimited,
                format!("{} is rate limiting requests", self.provider),
            ),
            Failure::Status(response) => (
                ErrorCode::ProviderHttp,
                format!("{} answered HTTP {}", self.provider, response.status),
            ),
            Failure::Timeout => (
                ErrorCode::ProviderTimeout,
                format!("{} did not answer within {:?}", self.provider, self.timeout),
            ),
            Failure::Transport(reason) => (
                ErrorCode::ProviderTransport,
                format!("{} request failed: {}", self.provider, reason),
            ),
        };

        tracing::error!(
            provider = %self.provider,
            url = %url,
            code = %code,
            attempts = attempts,
            "Upstream request failed after {} attempt(s)", attempts
        );

        HeraldError::new(code, message)
            .with_retryable(retryable)
            .with_provider(ProviderFailure {
                provider: self.provider.clone(),
                status,
                url,
                attempts,
            })
    }
}

impl std::fmt::Debug for ResilientExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
