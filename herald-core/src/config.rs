//! Configuration types
//!
//! Values are loaded from a TOML document or `HERALD_*` environment
//! variables, falling back to the defaults below. Construct once at process
//! start and pass the pieces into clients, the pipeline and the batch runner.

use crate::{HeraldError, HeraldResult, SearchLane};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// PROVIDER ENDPOINTS
// ============================================================================

/// Connection and retry settings for one upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
    /// Hard per-request timeout
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `base * 2^n + jitter(base)`
    pub backoff_base_ms: u64,
    /// Sent as `X-Subscription-Token` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: 10_000,
            max_retries: 2,
            backoff_base_ms: 250,
            api_key: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    fn validate(&self, name: &str) -> HeraldResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(HeraldError::invalid_config(
                &format!("providers.{}.base_url", name),
                "must not be empty",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(HeraldError::invalid_config(
                &format!("providers.{}.timeout_ms", name),
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Endpoints for the four upstream providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub market: ProviderEndpoint,
    pub order_book: ProviderEndpoint,
    pub price_history: ProviderEndpoint,
    pub search: ProviderEndpoint,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            market: ProviderEndpoint::new("https://gamma-api.polymarket.com"),
            order_book: ProviderEndpoint::new("https://clob.polymarket.com"),
            price_history: ProviderEndpoint::new("https://clob.polymarket.com"),
            search: ProviderEndpoint::new("https://api.search.brave.com"),
        }
    }
}

// ============================================================================
// CACHE / LIMITER / MAPPING
// ============================================================================

/// Cache TTLs, tuned to how volatile each upstream is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub market_ttl_ms: u64,
    pub order_book_ttl_ms: u64,
    pub price_history_ttl_ms: u64,
    /// Search keys also embed the calendar day
    pub search_ttl_ms: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            market_ttl_ms: 6 * 60 * 60 * 1000,
            order_book_ttl_ms: 10_000,
            price_history_ttl_ms: 30_000,
            search_ttl_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// Token bucket for search traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second; `<= 0` disables pacing
    pub qps: f64,
    /// Maximum burst
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { qps: 1.0, burst: 2.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBookConfig {
    /// Levels larger than `wall_multiple * mean level size` are walls
    pub wall_multiple: f64,
    /// Levels kept per side
    pub depth: usize,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            wall_multiple: 3.0,
            depth: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceHistoryConfig {
    pub interval_secs: i64,
    pub lookback_secs: i64,
}

impl Default for PriceHistoryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            lookback_secs: 7 * 24 * 3600,
        }
    }
}

// ============================================================================
// PIPELINE / BATCH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Supplement cycles allowed after the first validation
    pub supplement_max_attempts: u32,
    /// Search every lane during supplement cycles
    pub widen_lanes_on_supplement: bool,
    /// Validator codes meaning "insufficient evidence"
    pub supplement_codes: Vec<String>,
    pub default_lanes: Vec<SearchLane>,
    pub max_hits_per_lane: usize,
    /// Publish validated reports
    pub publish: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            supplement_max_attempts: 2,
            widen_lanes_on_supplement: true,
            supplement_codes: vec![
                "EVIDENCE_INSUFFICIENT".to_string(),
                "INSUFFICIENT_EVIDENCE".to_string(),
                "MISSING_CITATIONS".to_string(),
            ],
            default_lanes: vec![SearchLane::Update, SearchLane::Primary],
            max_hits_per_lane: 10,
            publish: false,
        }
    }
}

impl PipelineConfig {
    pub fn is_supplement_code(&self, code: &str) -> bool {
        self.supplement_codes.iter().any(|c| c.eq_ignore_ascii_case(code))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub default_concurrency: usize,
    /// Hard cap regardless of what the caller asks for
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 2,
            max_concurrency: 10,
        }
    }
}

impl BatchConfig {
    /// Worker count for a batch of `items` items.
    pub fn worker_count(&self, requested: Option<usize>, items: usize) -> usize {
        let wanted = requested.unwrap_or(self.default_concurrency).max(1);
        wanted.min(self.max_concurrency.max(1)).min(items)
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub providers: ProvidersConfig,
    pub cache: CacheTtlConfig,
    pub search_limiter: RateLimitConfig,
    pub order_book: OrderBookConfig,
    pub price_history: PriceHistoryConfig,
    pub pipeline: PipelineConfig,
    pub batch: BatchConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl HeraldConfig {
    /// Parse a TOML document; missing sections use defaults.
    pub fn from_toml_str(input: &str) -> HeraldResult<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| HeraldError::invalid_config("toml", e.message()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create HeraldConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `HERALD_MARKET_URL`, `HERALD_CLOB_URL`, `HERALD_SEARCH_URL`: base URLs
    /// - `HERALD_SEARCH_API_KEY`: search subscription token
    /// - `HERALD_HTTP_TIMEOUT_MS`, `HERALD_HTTP_MAX_RETRIES`, `HERALD_HTTP_BACKOFF_MS`: applied to every provider
    /// - `HERALD_SEARCH_QPS`, `HERALD_SEARCH_BURST`: search token bucket
    /// - `HERALD_SUPPLEMENT_MAX_ATTEMPTS`: supplement budget
    /// - `HERALD_PUBLISH`: "true" to publish validated reports
    /// - `HERALD_BATCH_CONCURRENCY`, `HERALD_BATCH_MAX_CONCURRENCY`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("HERALD_MARKET_URL") {
            config.providers.market.base_url = url;
        }
        if let Ok(url) = std::env::var("HERALD_CLOB_URL") {
            config.providers.order_book.base_url = url.clone();
            config.providers.price_history.base_url = url;
        }
        if let Ok(url) = std::env::var("HERALD_SEARCH_URL") {
            config.providers.search.base_url = url;
        }
        config.providers.search.api_key = std::env::var("HERALD_SEARCH_API_KEY").ok();

        for endpoint in [
            &mut config.providers.market,
            &mut config.providers.order_book,
            &mut config.providers.price_history,
            &mut config.providers.search,
        ] {
            if let Some(v) = env_parse("HERALD_HTTP_TIMEOUT_MS") {
                endpoint.timeout_ms = v;
            }
            if let Some(v) = env_parse("HERALD_HTTP_MAX_RETRIES") {
                endpoint.max_retries = v;
            }
            if let Some(v) = env_parse("HERALD_HTTP_BACKOFF_MS") {
                endpoint.backoff_base_ms = v;
            }
        }

        if let Some(v) = env_parse("HERALD_SEARCH_QPS") {
            config.search_limiter.qps = v;
        }
        if let Some(v) = env_parse("HERALD_SEARCH_BURST") {
            config.search_limiter.burst = v;
        }
        if let Some(v) = env_parse("HERALD_SUPPLEMENT_MAX_ATTEMPTS") {
            config.pipeline.supplement_max_attempts = v;
        }
        config.pipeline.publish = std::env::var("HERALD_PUBLISH")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);
        if let Some(v) = env_parse("HERALD_BATCH_CONCURRENCY") {
            config.batch.default_concurrency = v;
        }
        if let Some(v) = env_parse("HERALD_BATCH_MAX_CONCURRENCY") {
            config.batch.max_concurrency = v;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> HeraldResult<()> {
        self.providers.market.validate("market")?;
        self.providers.order_book.validate("order_book")?;
        self.providers.price_history.validate("price_history")?;
        self.providers.search.validate("search")?;

        if !self.search_limiter.burst.is_finite() || self.search_limiter.burst < 1.0 {
            return Err(HeraldError::invalid_config(
                "search_limiter.burst",
                format!("{} (must be >= 1)", self.search_limiter.burst),
            ));
        }
        if self.search_limiter.qps.is_nan() {
            return Err(HeraldError::invalid_config("search_limiter.qps", "NaN"));
        }
        if self.order_book.wall_multiple <= 1.0 {
            return Err(HeraldError::invalid_config(
                "order_book.wall_multiple",
                format!("{} (must be > 1.0)", self.order_book.wall_multiple),
            ));
        }
        if self.price_history.interval_secs <= 0 {
            return Err(HeraldError::invalid_config(
                "price_history.interval_secs",
                "must be positive",
            ));
        }
        if self.pipeline.default_lanes.is_empty() {
            return Err(HeraldError::invalid_config(
                "pipeline.default_lanes",
                "at least one lane is required",
            ));
        }
        if self.batch.default_concurrency == 0 {
            return Err(HeraldError::invalid_config(
                "batch.default_concurrency",
                "must be positive",
            ));
        }
        if self.batch.default_concurrency > self.batch.max_concurrency {
            return Err(HeraldError::invalid_config(
                "batch.default_concurrency",
                format!(
                    "{} exceeds max_concurrency {}",
                    self.batch.default_concurrency, self.batch.max_concurrency
                ),
            ));
        }
        Ok(())
    }
}
