//! Price-history client (`/prices-history`).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use herald_core::{
    Clock, HeraldError, HeraldResult, PriceHistoryConfig, PricePoint, PriceSeries, PriceSummary,
};
use serde_json::Value;

use super::{as_f64, field};
use crate::{ResilientExecutor, TtlCache};

const PROVIDER: &str = "price_history";

/// Timestamps above this are already milliseconds.
const MS_THRESHOLD: f64 = 1e12;

/// Price-history client. Responses are cached for tens of seconds.
#[derive(Clone)]
pub struct PriceHistoryClient {
    executor: Arc<ResilientExecutor>,
    cache: TtlCache<PriceSeries>,
    ttl: Duration,
    config: PriceHistoryConfig,
    clock: Arc<dyn Clock>,
}

impl PriceHistoryClient {
    pub fn new(
        executor: Arc<ResilientExecutor>,
        cache: TtlCache<PriceSeries>,
        ttl: Duration,
        config: PriceHistoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            cache,
            ttl,
            config,
            clock,
        }
    }

    /// Series for `token_id` over the configured lookback, resampled to the
    /// configured interval.
    pub async fn fetch(&self, token_id: &str) -> HeraldResult<PriceSeries> {
        let token_id = token_id.trim().to_string();
        if token_id.is_empty() {
            return Err(HeraldError::invalid_input("token id is empty"));
        }
        let interval_secs = self.config.interval_secs;
        let key = format!("prices:{}:{}", token_id, interval_secs);
        let start_ts = self.clock.now_ms() / 1000 - self.config.lookback_secs;
        let executor = Arc::clone(&self.executor);

        let read = self
            .cache
            .get_or_set(&key, self.ttl, move || async move {
                let request = executor
                    .request("/prices-history")
                    .query("market", token_id.as_str())
                    .query("startTs", start_ts.to_string())
                    .query("fidelity", (interval_secs / 60).max(1).to_string());
                let payload = executor.fetch_json(request).await?;
                parse_price_history(&token_id, &payload, interval_secs)
            })
            .await?;
        Ok(read.value)
    }
}

impl std::fmt::Debug for PriceHistoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceHistoryClient")
            .field("executor", &self.executor)
            .field("ttl", &self.ttl)
            .field("config", &self.config)
            .finish()
    }
}

/// Seconds or milliseconds to milliseconds, by magnitude.
pub fn normalize_timestamp_ms(t: f64) -> i64 {
    if t.abs() > MS_THRESHOLD {
        t as i64
    } else {
        (t * 1000.0) as i64
    }
}

/// Dedupe samples by timestamp (later input wins), sort them and keep the
/// latest sample of each `interval_ms` bucket, stamped with the bucket
/// start.
pub fn resample(samples: &[(i64, f64)], interval_ms: i64) -> Vec<PricePoint> {
    let mut by_ts: BTreeMap<i64, f64> = BTreeMap::new();
    for (ts, price) in samples {
        by_ts.insert(*ts, *price);
    }

    let interval_ms = interval_ms.max(1);
    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for (ts, price) in by_ts {
        buckets.insert(ts - ts.rem_euclid(interval_ms), price);
    }

    buckets
        .into_iter()
        .map(|(ts_ms, price)| PricePoint { ts_ms, price })
        .collect()
}

pub(crate) fn parse_price_history(
    token_id: &str,
    payload: &Value,
    interval_secs: i64,
) -> HeraldResult<PriceSeries> {
    let history = field(payload, &["history"])
        .and_then(Value::as_array)
        .ok_or_else(|| HeraldError::payload(PROVIDER, "missing 'history' list"))?;

    let samples: Vec<(i64, f64)> = history
        .iter()
        .filter_map(|s| {
            let t = field(s, &["t", "timestamp"]).and_then(as_f64)?;
            let p = field(s, &["p", "price"]).and_then(as_f64)?;
            Some((normalize_timestamp_ms(t), p))
        })
        .collect();
    if samples.len() < history.len() {
        tracing::debug!(
            token_id,
            dropped = history.len() - samples.len(),
            "Dropped malformed price samples"
        );
    }

    let points = resample(&samples, interval_secs * 1000);
    Ok(PriceSeries {
        token_id: token_id.to_string(),
        interval_secs,
        summary: PriceSummary::from_points(&points),
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{ErrorCode, ProviderEndpoint};
    use herald_test_utils::fixtures::{price_history_json, YES_TOKEN};
    use herald_test_utils::{ManualClock, ScriptedTransport};
    use serde_json::json;

    #[test]
    fn test_timestamp_units() {
        assert_eq!(normalize_timestamp_ms(1_700_000_000.0), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(1_700_000_000_000.0), 1_700_000_000_000);
    }

    #[test]
    fn test_resample_keeps_latest_per_bucket() {
        let series = parse_price_history(YES_TOKEN, &price_history_json(), 3600).unwrap();
        let prices: Vec<f64> = series.points.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![0.50, 0.57, 0.52]);
        assert_eq!(series.points[1].ts_ms, 1_767_229_200_000);

        let summary = series.summary.unwrap();
        assert_eq!(summary.first, 0.50);
        assert_eq!(summary.last, 0.52);
        assert_eq!(summary.high, 0.57);
        assert_eq!(summary.low, 0.50);
    }

    #[test]
    fn test_mixed_units_dedupe() {
        let points = resample(
            &[
                (normalize_timestamp_ms(1_000.0), 0.1),
                (normalize_timestamp_ms(1_000_000.0 * 1_000_000.0 + 1.0), 0.9),
                (normalize_timestamp_ms(1_000.0), 0.2),
            ],
            1_000,
        );
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], PricePoint { ts_ms: 1_000_000, price: 0.2 });
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let points = resample(&[(5_000, 0.5), (1_000, 0.1), (3_000, 0.3)], 1_000);
        let ts: Vec<i64> = points.iter().map(|p| p.ts_ms).collect();
        assert_eq!(ts, vec![1_000, 3_000, 5_000]);
    }

    #[test]
    fn test_empty_and_malformed() {
        let series = parse_price_history("t", &json!({"history": []}), 60).unwrap();
        assert!(series.points.is_empty());
        assert!(series.summary.is_none());

        let err = parse_price_history("t", &json!({"prices": []}), 60).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderPayload);

        let series = parse_price_history(
            "t",
            &json!({"history": [{"t": 60, "p": "0.4"}, {"t": "x", "p": 1}]}),
            60,
        )
        .unwrap();
        assert_eq!(series.points.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_sends_window_params() {
        let transport = ScriptedTransport::new();
        transport.always_json("/prices-history", &price_history_json());
        let clock = ManualClock::new(1_767_300_000_000);
        let client = PriceHistoryClient::new(
            Arc::new(ResilientExecutor::new(
                "price_history",
                &ProviderEndpoint::new("http://clob.test"),
                Arc::new(transport.clone()),
            )),
            TtlCache::new("price_history", Arc::new(clock.clone())),
            Duration::from_secs(30),
            PriceHistoryConfig::default(),
            Arc::new(clock),
        );

        let series = client.fetch(YES_TOKEN).await.unwrap();
        assert_eq!(series.points.len(), 3);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let url = calls[0].display_url();
        assert!(url.contains("market=tok-yes"));
        assert!(url.contains(&format!("startTs={}", 1_767_300_000 - 7 * 24 * 3600)));
        assert!(url.contains("fidelity=60"));
    }
}
