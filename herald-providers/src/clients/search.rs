//! Web-search clients, one per lane.
//!
//! Each lane client keys its cache by lane, calendar day and a hash of the
//! query, paces upstream calls through the shared search token bucket and
//! reports `cache_hit` / `rate_limited` / `latency_ms` for every call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use futures_util::future::join_all;
use herald_core::{Clock, HeraldError, HeraldResult, SearchHit, SearchLane, SourceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{as_string, field, parse_datetime};
use crate::{ResilientExecutor, TokenBucket, TtlCache};

/// Result of one lane search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub lane: SearchLane,
    pub query: String,
    pub hits: Vec<SearchHit>,
    /// Served without an upstream call
    pub cache_hit: bool,
    /// The call waited on the token bucket
    pub rate_limited: bool,
    pub latency_ms: u64,
}

/// Search client for one lane.
#[derive(Clone)]
pub struct SearchClient {
    lane: SearchLane,
    executor: Arc<ResilientExecutor>,
    limiter: Arc<TokenBucket>,
    cache: TtlCache<Vec<SearchHit>>,
    ttl: Duration,
    max_results: usize,
    clock: Arc<dyn Clock>,
}

impl SearchClient {
    pub fn new(
        lane: SearchLane,
        executor: Arc<ResilientExecutor>,
        limiter: Arc<TokenBucket>,
        cache: TtlCache<Vec<SearchHit>>,
        ttl: Duration,
        max_results: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            lane,
            executor,
            limiter,
            cache,
            ttl,
            max_results,
            clock,
        }
    }

    pub fn lane(&self) -> SearchLane {
        self.lane
    }

    /// Cache key: lane, UTC day and the first 16 hex digits of the
    /// SHA-256 of the normalized query.
    pub fn cache_key(&self, query: &str) -> String {
        let day = DateTime::from_timestamp_millis(self.clock.now_ms())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let digest = Sha256::digest(query.trim().to_lowercase().as_bytes());
        format!("search:{}:{}:{}", self.lane, day, &hex::encode(digest)[..16])
    }

    pub async fn search(&self, query: &str) -> HeraldResult<SearchResponse> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(HeraldError::invalid_input("search query is empty"));
        }
        let started = tokio::time::Instant::now();
        let key = self.cache_key(&query);
        let rate_limited = Arc::new(AtomicBool::new(false));

        let lane = self.lane;
        let executor = Arc::clone(&self.executor);
        let limiter = Arc::clone(&self.limiter);
        let limited = Arc::clone(&rate_limited);
        let count = self.max_results;
        let q = query.clone();

        let read = self
            .cache
            .get_or_set(&key, self.ttl, move || async move {
                let acquired = limiter.acquire().await;
                limited.store(acquired.rate_limited, Ordering::Relaxed);
                let request = executor
                    .request("/res/v1/web/search")
                    .query("q", q.as_str())
                    .query("count", count.to_string());
                let payload = executor.fetch_json(request).await?;
                map_search_results(lane, &q, &payload, count)
            })
            .await?;

        let response = SearchResponse {
            lane,
            query,
            cache_hit: read.from_cache(),
            rate_limited: rate_limited.load(Ordering::Relaxed),
            latency_ms: started.elapsed().as_millis() as u64,
            hits: read.value,
        };
        tracing::debug!(
            lane = %lane,
            hits = response.hits.len(),
            cache_hit = response.cache_hit,
            rate_limited = response.rate_limited,
            latency_ms = response.latency_ms,
            "Search completed"
        );
        Ok(response)
    }
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchClient")
            .field("lane", &self.lane)
            .field("executor", &self.executor)
            .field("limiter", &self.limiter)
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ============================================================================
// SEARCH SUITE
// ============================================================================

/// The four lane clients sharing one token bucket.
#[derive(Debug, Clone, Default)]
pub struct SearchSuite {
    lanes: BTreeMap<SearchLane, SearchClient>,
}

impl SearchSuite {
    pub fn new(clients: impl IntoIterator<Item = SearchClient>) -> Self {
        Self {
            lanes: clients.into_iter().map(|c| (c.lane(), c)).collect(),
        }
    }

    pub fn lane(&self, lane: SearchLane) -> Option<&SearchClient> {
        self.lanes.get(&lane)
    }

    /// Run each lane's query for `title` concurrently.
    ///
    /// Every lane runs to completion before returning; if any lane failed,
    /// the error of the first failing lane (in `lanes` order) is returned.
    pub async fn search_lanes(
        &self,
        title: &str,
        lanes: &[SearchLane],
    ) -> HeraldResult<Vec<SearchResponse>> {
        let searches = lanes.iter().map(|lane| async move {
            let client = self.lane(*lane).ok_or_else(|| {
                HeraldError::invalid_config("search lanes", format!("lane '{}' is not configured", lane))
            })?;
            client.search(&lane.query_for(title)).await
        });
        join_all(searches).await.into_iter().collect()
    }
}

// ============================================================================
// RESULT MAPPING
// ============================================================================

/// Host of `url`, lowercased, without port or `www.`.
pub(crate) fn host_of(url: &str) -> Option<String> {
    let rest = url.trim().split_once("://").map(|(_, r)| r).unwrap_or(url.trim());
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?.split(':').next()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    (!host.is_empty()).then_some(host)
}

fn result_list(payload: &Value) -> HeraldResult<Vec<Value>> {
    if let Value::Array(items) = payload {
        return Ok(items.clone());
    }
    if !payload.is_object() {
        return Err(HeraldError::payload("search", "result payload is not an object"));
    }
    let candidates = [
        payload.get("results"),
        payload.get("web").and_then(|w| w.get("results")),
        payload.get("items"),
        payload.get("organic_results"),
        payload.get("organic"),
    ];
    Ok(candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_array().cloned())
        .unwrap_or_default())
}

/// Map any of the supported result shapes into uniform hits. Results
/// without a URL are skipped.
pub fn map_search_results(
    lane: SearchLane,
    query: &str,
    payload: &Value,
    max_results: usize,
) -> HeraldResult<Vec<SearchHit>> {
    let hits = result_list(payload)?
        .iter()
        .filter_map(|item| {
            let url = field(item, &["url", "link", "href"]).and_then(as_string)?;
            let domain = host_of(&url)?;
            Some(SearchHit {
                lane,
                query: query.to_string(),
                title: field(item, &["title", "name"]).and_then(as_string).unwrap_or_default(),
                snippet: field(item, &["snippet", "description", "content", "summary"])
                    .and_then(as_string)
                    .unwrap_or_default(),
                published_at: field(item, &["published_at", "published", "publishedAt", "date", "page_age", "age"])
                    .and_then(parse_datetime),
                source_type: SourceType::classify_domain(&domain),
                domain,
                url,
            })
        })
        .take(max_results)
        .collect();
    Ok(hits)
}
