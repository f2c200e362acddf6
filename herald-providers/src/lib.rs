//! HERALD Providers - Resilient Upstream Clients
//!
//! The shared client framework (TTL cache with inflight coalescing, token
//! bucket, retrying executor) and the four clients built on it: market
//! metadata, order book, price history and per-lane web search.

pub mod cache;
pub mod clients;
pub mod executor;
pub mod http;
pub mod rate_limit;

pub use cache::{CacheOutcome, CacheRead, CacheStats, TtlCache};
pub use clients::{
    MarketClient, OrderBookClient, PriceHistoryClient, SearchClient, SearchResponse, SearchSuite,
};
pub use executor::{is_retryable_status, no_jitter, parse_retry_after, random_jitter, Jitter, ResilientExecutor};
pub use http::ReqwestTransport;
pub use rate_limit::{Acquire, TokenBucket};

use herald_core::{
    Clock, HeraldConfig, HeraldResult, HttpTransport, ProviderEndpoint, SearchLane, Sleeper,
    SystemClock, TokioSleeper,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// PROVIDER SET
// ============================================================================

/// Shared collaborators injected into every client.
#[derive(Clone)]
pub struct ProviderDeps {
    pub transport: Arc<dyn HttpTransport>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
    pub jitter: Jitter,
}

impl ProviderDeps {
    /// reqwest transport, system clock and tokio timers.
    pub fn live() -> HeraldResult<Self> {
        Ok(Self {
            transport: Arc::new(ReqwestTransport::new()?),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            jitter: random_jitter(),
        })
    }

    fn executor(&self, provider: &str, endpoint: &ProviderEndpoint) -> Arc<ResilientExecutor> {
        Arc::new(
            ResilientExecutor::new(provider, endpoint, Arc::clone(&self.transport))
                .with_clock(Arc::clone(&self.clock))
                .with_sleeper(Arc::clone(&self.sleeper))
                .with_jitter(Arc::clone(&self.jitter)),
        )
    }
}

/// Every upstream client, built once at process start and shared by
/// reference with the pipeline.
#[derive(Debug, Clone)]
pub struct Providers {
    pub market: MarketClient,
    pub order_book: OrderBookClient,
    pub price_history: PriceHistoryClient,
    pub search: SearchSuite,
}

impl Providers {
    pub fn new(config: &HeraldConfig, deps: &ProviderDeps) -> Self {
        let ttl = &config.cache;
        let clock = &deps.clock;

        let market = MarketClient::new(
            deps.executor("market", &config.providers.market),
            TtlCache::new("market", Arc::clone(clock)),
            Duration::from_millis(ttl.market_ttl_ms),
        );
        let order_book = OrderBookClient::new(
            deps.executor("order_book", &config.providers.order_book),
            TtlCache::new("order_book", Arc::clone(clock)),
            Duration::from_millis(ttl.order_book_ttl_ms),
            config.order_book.clone(),
            Arc::clone(clock),
        );
        let price_history = PriceHistoryClient::new(
            deps.executor("price_history", &config.providers.price_history),
            TtlCache::new("price_history", Arc::clone(clock)),
            Duration::from_millis(ttl.price_history_ttl_ms),
            config.price_history.clone(),
            Arc::clone(clock),
        );

        let search_executor = deps.executor("search", &config.providers.search);
        let limiter = Arc::new(TokenBucket::new(
            &config.search_limiter,
            Arc::clone(clock),
            Arc::clone(&deps.sleeper),
        ));
        let search = SearchSuite::new(SearchLane::ALL.map(|lane| {
            SearchClient::new(
                lane,
                Arc::clone(&search_executor),
                Arc::clone(&limiter),
                TtlCache::new(format!("search:{}", lane), Arc::clone(clock)),
                Duration::from_millis(ttl.search_ttl_ms),
                config.pipeline.max_hits_per_lane,
                Arc::clone(clock),
            )
        }));

        tracing::info!(
            market = %config.providers.market.base_url,
            clob = %config.providers.order_book.base_url,
            search = %config.providers.search.base_url,
            search_qps = config.search_limiter.qps,
            "Provider clients initialized"
        );

        Self {
            market,
            order_book,
            price_history,
            search,
        }
    }

    /// Clients over the network with production time sources.
    pub fn live(config: &HeraldConfig) -> HeraldResult<Self> {
        config.validate()?;
        Ok(Self::new(config, &ProviderDeps::live()?))
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use herald_core::RateLimitConfig;
    use herald_test_utils::{ManualClock, RecordingSleeper};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Resampled points are strictly increasing and bucket-aligned.
        #[test]
        fn prop_resample_is_sorted_and_aligned(
            samples in prop::collection::vec((0i64..10_000_000, 0.0f64..1.0), 0..60),
            interval in 1i64..100_000,
        ) {
            let points = clients::resample(&samples, interval);
            for pair in points.windows(2) {
                prop_assert!(pair[0].ts_ms < pair[1].ts_ms);
            }
            for p in &points {
                prop_assert_eq!(p.ts_ms.rem_euclid(interval), 0);
            }
            prop_assert!(points.len() <= samples.len());
        }

        /// Tokens stay within [0, burst] whatever the call pattern.
        #[test]
        fn prop_token_bucket_stays_in_range(
            qps in 0.1f64..20.0,
            burst in 1.0f64..10.0,
            gaps in prop::collection::vec(0u64..3_000, 1..30),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let clock = ManualClock::new(0);
                let bucket = TokenBucket::new(
                    &RateLimitConfig { qps, burst },
                    Arc::new(clock.clone()),
                    Arc::new(RecordingSleeper::advancing(clock.clone())),
                );
                for gap in gaps {
                    clock.advance(Duration::from_millis(gap));
                    bucket.acquire().await;
                    let tokens = bucket.available().await;
                    assert!((0.0..=burst).contains(&tokens), "tokens {tokens} burst {burst}");
                }
            });
        }
    }
}
