//! Market metadata client
//!
//! Fetches an event by id (`/events/{id}`) or slug (`/events?slug=`) and
//! reduces it to the [`MarketMetadata`] of its primary market.

use std::sync::Arc;
use std::time::Duration;

use herald_core::{EventRef, HeraldError, HeraldResult, MarketMetadata, OutcomeToken};
use serde_json::Value;

use super::{as_f64, as_string, field, parse_datetime, string_list};
use crate::{ResilientExecutor, TtlCache};

const PROVIDER: &str = "market";

/// Event metadata client. Responses are cached for hours.
#[derive(Debug, Clone)]
pub struct MarketClient {
    executor: Arc<ResilientExecutor>,
    cache: TtlCache<MarketMetadata>,
    ttl: Duration,
}

impl MarketClient {
    pub fn new(executor: Arc<ResilientExecutor>, cache: TtlCache<MarketMetadata>, ttl: Duration) -> Self {
        Self {
            executor,
            cache,
            ttl,
        }
    }

    /// Metadata for `event`, choosing `preferred_market` (id or slug) when
    /// given and the highest-volume market otherwise.
    pub async fn fetch(
        &self,
        event: &EventRef,
        preferred_market: Option<&str>,
    ) -> HeraldResult<MarketMetadata> {
        if event.is_blank() {
            return Err(HeraldError::invalid_input("event reference is empty"));
        }
        let key = format!("market:{}:{}", event, preferred_market.unwrap_or("*"));
        let executor = Arc::clone(&self.executor);
        let event = event.clone();
        let preferred = preferred_market.map(str::to_string);

        let read = self
            .cache
            .get_or_set(&key, self.ttl, move || async move {
                let request = match &event {
                    EventRef::Id(id) => executor.request(&format!("/events/{}", id.trim())),
                    EventRef::Slug(slug) => executor.request("/events").query("slug", slug.trim()),
                };
                let payload = executor.fetch_json(request).await?;
                parse_event(&payload, preferred.as_deref())
            })
            .await?;
        Ok(read.value)
    }

    pub fn cache(&self) -> &TtlCache<MarketMetadata> {
        &self.cache
    }
}

fn missing(what: &str) -> HeraldError {
    HeraldError::payload(PROVIDER, format!("missing or malformed {}", what))
        .with_suggestion("check that the event id or slug refers to a listed event")
}

/// Reduce an event payload (object, or list holding one) to its primary
/// market.
pub fn parse_event(payload: &Value, preferred_market: Option<&str>) -> HeraldResult<MarketMetadata> {
    let event = match payload {
        Value::Array(events) => events
            .first()
            .ok_or_else(|| HeraldError::payload(PROVIDER, "event not found"))?,
        Value::Object(_) => payload,
        _ => return Err(missing("event object")),
    };

    let event_id = field(event, &["id"]).and_then(as_string).ok_or_else(|| missing("event id"))?;
    let event_slug = field(event, &["slug"])
        .and_then(as_string)
        .ok_or_else(|| missing("event slug"))?;
    let event_title = field(event, &["title"])
        .and_then(as_string)
        .ok_or_else(|| missing("event title"))?;
    let markets = field(event, &["markets"])
        .and_then(Value::as_array)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| missing("markets"))?;

    let market = select_market(markets, preferred_market)?;

    let market_id = field(market, &["id"]).and_then(as_string).ok_or_else(|| missing("market id"))?;
    let question = field(market, &["question"])
        .and_then(as_string)
        .ok_or_else(|| missing("market question"))?;
    let labels = field(market, &["outcomes"])
        .and_then(string_list)
        .ok_or_else(|| missing("outcomes"))?;
    let tokens = field(market, &["clobTokenIds", "clob_token_ids"])
        .and_then(string_list)
        .ok_or_else(|| missing("clobTokenIds"))?;
    let prices: Vec<Option<f64>> = match field(market, &["outcomePrices", "outcome_prices"])
        .and_then(string_list)
    {
        Some(prices) => prices.iter().map(|p| p.parse::<f64>().ok()).collect(),
        None => Vec::new(),
    };

    let outcomes = order_outcomes(&labels, &tokens, &prices)?;

    Ok(MarketMetadata {
        event_id,
        event_slug,
        event_title,
        market_id,
        market_slug: field(market, &["slug"]).and_then(as_string),
        question,
        resolution_rules: field(market, &["description"])
            .or_else(|| field(event, &["description"]))
            .and_then(as_string),
        end_date: field(market, &["endDate", "end_date"])
            .or_else(|| field(event, &["endDate", "end_date"]))
            .and_then(parse_datetime),
        volume: field(market, &["volume", "volumeNum"]).and_then(as_f64).unwrap_or(0.0),
        liquidity: field(market, &["liquidity", "liquidityNum"]).and_then(as_f64),
        closed: field(market, &["closed"]).and_then(Value::as_bool).unwrap_or(false),
        outcomes,
        market_count: markets.len(),
    })
}

/// Pick the market matching `preferred` by id or slug, else the one with
/// the highest volume (first wins on ties).
pub fn select_market<'a>(markets: &'a [Value], preferred: Option<&str>) -> HeraldResult<&'a Value> {
    if let Some(preferred) = preferred.map(str::trim).filter(|p| !p.is_empty()) {
        return markets
            .iter()
            .find(|m| {
                ["id", "slug"].iter().any(|key| {
                    m.get(*key).and_then(as_string).as_deref() == Some(preferred)
                })
            })
            .ok_or_else(|| {
                HeraldError::payload(PROVIDER, format!("market '{}' is not part of the event", preferred))
            });
    }

    let volume = |m: &Value| field(m, &["volume", "volumeNum"]).and_then(as_f64).unwrap_or(0.0);
    markets
        .iter()
        .fold(None::<&Value>, |best, m| match best {
            Some(b) if volume(b) >= volume(m) => Some(b),
            _ => Some(m),
        })
        .ok_or_else(|| missing("markets"))
}

/// Zip outcome labels with token ids and prices, moving the "Yes" outcome
/// to the front. The inputs are left untouched.
pub fn order_outcomes(
    labels: &[String],
    tokens: &[String],
    prices: &[Option<f64>],
) -> HeraldResult<Vec<OutcomeToken>> {
    if labels.is_empty() || labels.len() != tokens.len() {
        return Err(HeraldError::payload(
            PROVIDER,
            format!(
                "{} outcomes but {} token ids",
                labels.len(),
                tokens.len()
            ),
        ));
    }

    let zipped = labels.iter().zip(tokens).enumerate().map(|(i, (label, token))| OutcomeToken {
        outcome: label.clone(),
        token_id: token.clone(),
        price: prices.get(i).copied().flatten(),
    });
    let (yes, rest): (Vec<_>, Vec<_>) =
        zipped.partition(|o| o.outcome.trim().eq_ignore_ascii_case("yes"));
    Ok(yes.into_iter().chain(rest).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{ErrorCode, ProviderEndpoint};
    use herald_test_utils::fixtures::{event_json, event_list_json, EVENT_SLUG};
    use herald_test_utils::{ManualClock, ScriptedTransport};
    use serde_json::json;

    #[test]
    fn test_highest_volume_market_is_primary() {
        let meta = parse_event(&event_json(), None).unwrap();
        assert_eq!(meta.market_id, "m-cut");
        assert_eq!(meta.market_count, 2);
        assert_eq!(meta.volume, 98000.0);
        assert_eq!(meta.liquidity, Some(15000.0));
        assert_eq!(meta.outcomes[0].outcome, "Yes");
        assert_eq!(meta.outcomes[0].token_id, "tok-yes");
        assert_eq!(meta.implied_probability(), Some(0.62));
        assert_eq!(meta.outcomes[1].token_id, "tok-no");
        assert!(meta.end_date.is_some());
    }

    #[test]
    fn test_preferred_market_by_id_or_slug() {
        let by_id = parse_event(&event_json(), Some("m-hold")).unwrap();
        assert_eq!(by_id.market_id, "m-hold");
        let by_slug = parse_event(&event_json(), Some("fed-holds-in-march")).unwrap();
        assert_eq!(by_slug.market_id, "m-hold");
        assert_eq!(by_slug.outcomes[0].token_id, "tok-hold-yes");
    }

    #[test]
    fn test_unknown_preferred_market_is_fatal() {
        let err = parse_event(&event_json(), Some("m-nope")).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderPayload);
        assert!(!err.retryable);
    }

    #[test]
    fn test_missing_fields_are_fatal() {
        let mut event = event_json();
        event["markets"] = json!([]);
        let err = parse_event(&event, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderPayload);
        assert!(!err.retryable);

        let mut event = event_json();
        event["markets"][1]["clobTokenIds"] = json!("[\"only-one\"]");
        assert!(parse_event(&event, Some("m-cut")).is_err());

        assert!(parse_event(&json!([]), None).is_err());
        assert!(parse_event(&json!("nope"), None).is_err());
    }

    #[test]
    fn test_order_outcomes_is_pure() {
        let labels = vec!["No".to_string(), "Yes".to_string()];
        let tokens = vec!["t-no".to_string(), "t-yes".to_string()];
        let ordered = order_outcomes(&labels, &tokens, &[Some(0.4), Some(0.6)]).unwrap();
        assert_eq!(ordered[0].token_id, "t-yes");
        assert_eq!(ordered[0].price, Some(0.6));
        assert_eq!(ordered[1].token_id, "t-no");
        assert_eq!(labels[0], "No");

        let multi = vec!["Alice".to_string(), "Bob".to_string()];
        let ordered = order_outcomes(&multi, &tokens, &[]).unwrap();
        assert_eq!(ordered[0].outcome, "Alice");
        assert_eq!(ordered[0].price, None);
    }

    #[tokio::test]
    async fn test_fetch_by_slug_is_cached() {
        let transport = ScriptedTransport::new();
        transport.always_json("/events?slug=", &event_list_json());
        let clock = ManualClock::new(0);
        let executor = ResilientExecutor::new(
            "market",
            &ProviderEndpoint::new("http://gamma.test"),
            Arc::new(transport.clone()),
        );
        let client = MarketClient::new(
            Arc::new(executor),
            TtlCache::new("market", Arc::new(clock)),
            Duration::from_secs(3600),
        );

        let event = EventRef::Slug(EVENT_SLUG.to_string());
        let first = client.fetch(&event, None).await.unwrap();
        let second = client.fetch(&event, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.call_count("/events?slug=fed-decision-in-march"), 1);
    }

    #[tokio::test]
    async fn test_blank_event_is_invalid_input() {
        let client = MarketClient::new(
            Arc::new(ResilientExecutor::new(
                "market",
                &ProviderEndpoint::new("http://gamma.test"),
                Arc::new(ScriptedTransport::new()),
            )),
            TtlCache::new("market", Arc::new(ManualClock::new(0))),
            Duration::from_secs(1),
        );
        let err = client.fetch(&EventRef::Id("  ".into()), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }
}
