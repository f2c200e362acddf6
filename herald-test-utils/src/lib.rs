//! HERALD Test Utilities
//!
//! Centralized test infrastructure for the HERALD workspace:
//! - Deterministic clock and sleeper
//! - Scripted HTTP transport
//! - Mock generator, validator and publish sink
//! - Provider payload fixtures
//! - Proptest generators for search hits

pub use herald_core::{
    Clock, ErrorCode, GenerationInput, HeraldError, HeraldResult, HttpRequest, HttpResponse,
    HttpTransport, MarketMetadata, OutcomeToken, PublishReceipt, PublishSink, ReportGenerator,
    ReportValidator, SearchHit, SearchLane, Sleeper, SourceType, TransportError,
    ValidationVerdict,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// TIME
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Sleeper that returns immediately, records every requested duration and
/// optionally advances a [`ManualClock`] by the same amount.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    clock: Option<ManualClock>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advancing(clock: ManualClock) -> Self {
        Self {
            clock: Some(clock),
            sleeps: Arc::default(),
        }
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

type Scripted = Result<HttpResponse, TransportError>;

#[derive(Debug)]
struct Route {
    pattern: String,
    queue: VecDeque<Scripted>,
    sticky: Option<Scripted>,
}

/// HTTP transport answering from scripted responses.
///
/// A route matches when its pattern is a substring of the request's display
/// URL (including the query string). Queued responses are consumed in order;
/// once a route's queue is empty its sticky response, if any, is repeated.
/// Requests matching no route get a 404.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    calls: Arc<Mutex<Vec<HttpRequest>>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every response for `delay` (tokio time) before returning it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn route_mut<R>(&self, pattern: &str, f: impl FnOnce(&mut Route) -> R) -> R {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(route) = routes.iter_mut().find(|r| r.pattern == pattern) {
            return f(route);
        }
        routes.push(Route {
            pattern: pattern.to_string(),
            queue: VecDeque::new(),
            sticky: None,
        });
        let last = routes.len() - 1;
        f(&mut routes[last])
    }

    /// Queue one response for `pattern`.
    pub fn push(&self, pattern: &str, response: HttpResponse) -> &Self {
        self.route_mut(pattern, |r| r.queue.push_back(Ok(response)));
        self
    }

    pub fn push_json(&self, pattern: &str, body: &Value) -> &Self {
        self.push(pattern, HttpResponse::ok(body.to_string()))
    }

    pub fn push_error(&self, pattern: &str, error: TransportError) -> &Self {
        self.route_mut(pattern, |r| r.queue.push_back(Err(error)));
        self
    }

    /// Answer `pattern` with `response` whenever its queue is empty.
    pub fn always(&self, pattern: &str, response: HttpResponse) -> &Self {
        self.route_mut(pattern, |r| r.sticky = Some(Ok(response)));
        self
    }

    pub fn always_json(&self, pattern: &str, body: &Value) -> &Self {
        self.always(pattern, HttpResponse::ok(body.to_string()))
    }

    /// Every request received, in arrival order.
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of requests whose display URL contains `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.calls()
            .iter()
            .filter(|r| r.display_url().contains(pattern))
            .count()
    }

    fn answer(&self, url: &str) -> Scripted {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        for route in routes.iter_mut().filter(|r| url.contains(&r.pattern)) {
            if let Some(next) = route.queue.pop_front() {
                return next;
            }
            if let Some(sticky) = &route.sticky {
                return sticky.clone();
            }
        }
        Ok(HttpResponse::status(404))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.display_url();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer(&url)
    }
}

// ============================================================================
// MOCK REPORT COLLABORATORS
// ============================================================================

/// Generator that replays scripted results, then falls back to a report
/// derived from its input.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<VecDeque<HeraldResult<Value>>>>,
    inputs: Arc<Mutex<Vec<GenerationInput>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: HeraldResult<Value>) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
        self
    }

    /// Inputs received, in call order.
    pub fn inputs(&self) -> Vec<GenerationInput> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.inputs().len()
    }
}

#[async_trait]
impl ReportGenerator for ScriptedGenerator {
    async fn generate(&self, input: &GenerationInput) -> HeraldResult<Value> {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input.clone());
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(result) => result,
            None => Ok(json!({
                "headline": input.market.question,
                "probability": input.market.implied_probability(),
                "citations": input.evidence.iter().map(|e| e.url.clone()).collect::<Vec<_>>(),
                "attempt": input.attempt,
            })),
        }
    }
}

/// Validator that replays scripted verdicts, then accepts everything.
#[derive(Debug, Clone, Default)]
pub struct ScriptedValidator {
    script: Arc<Mutex<VecDeque<ValidationVerdict>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, verdict: ValidationVerdict) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(verdict);
        }
        self
    }

    /// Queue a rejection with the given code.
    pub fn reject(&self, code: &str) -> &Self {
        self.push(ValidationVerdict::Rejected {
            code: code.to_string(),
            message: format!("rejected: {}", code),
            suggestion: Some("add more independent sources".to_string()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportValidator for ScriptedValidator {
    async fn validate(&self, report: &Value) -> ValidationVerdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| ValidationVerdict::Valid {
                report: report.clone(),
            })
    }
}

/// Publish sink that records every message, or fails every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublishSink {
    sent: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingPublishSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PublishSink for RecordingPublishSink {
    async fn publish(&self, text: &str) -> HeraldResult<PublishReceipt> {
        if self.fail {
            return Err(HeraldError::new(
                ErrorCode::PublishFailed,
                "channel unavailable",
            ));
        }
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push(text.to_string());
        Ok(PublishReceipt {
            message_id: format!("msg-{}", sent.len()),
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for search hits.

    use super::*;
    use proptest::prelude::*;

    const DOMAINS: &[&str] = &[
        "reuters.com",
        "www.reuters.com",
        "federalreserve.gov",
        "polymarket.com",
        "reddit.com",
        "etherscan.io",
    ];

    const TITLES: &[&str] = &[
        "Fed holds rates steady",
        "Fed holds rates steady!",
        "Fed signals cut in March",
        "Markets price in March cut",
        "",
    ];

    pub fn arb_lane() -> impl Strategy<Value = SearchLane> {
        prop_oneof![
            Just(SearchLane::Update),
            Just(SearchLane::Primary),
            Just(SearchLane::Counter),
            Just(SearchLane::Chatter),
        ]
    }

    pub fn arb_source_type() -> impl Strategy<Value = SourceType> {
        prop_oneof![
            Just(SourceType::Official),
            Just(SourceType::Media),
            Just(SourceType::Market),
            Just(SourceType::Social),
            Just(SourceType::Onchain),
        ]
    }

    /// Hits drawn from a small pool of domains, paths and titles so that
    /// exact and near duplicates are common.
    pub fn arb_search_hit() -> impl Strategy<Value = SearchHit> {
        (
            arb_lane(),
            0..DOMAINS.len(),
            0u8..4,
            0..TITLES.len(),
            prop::option::of(1_700_000_000i64..1_700_100_000i64),
            any::<bool>(),
        )
            .prop_map(|(lane, d, path, t, published, upper)| {
                let domain = DOMAINS[d];
                let mut url = format!("https://{}/story/{}", domain, path);
                if upper {
                    url = url.to_uppercase();
                }
                SearchHit {
                    lane,
                    query: lane.query_for("Fed March decision"),
                    url,
                    title: TITLES[t].to_string(),
                    snippet: format!("snippet {}", path),
                    domain: domain.to_string(),
                    published_at: published
                        .and_then(|s| chrono::DateTime::from_timestamp(s, 0)),
                    source_type: SourceType::classify_domain(domain),
                }
            })
    }

    pub fn arb_search_hits(max: usize) -> impl Strategy<Value = Vec<SearchHit>> {
        prop::collection::vec(arb_search_hit(), 0..max)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Provider payloads and domain values for common scenarios.

    use super::*;

    pub const EVENT_ID: &str = "903";
    pub const EVENT_SLUG: &str = "fed-decision-in-march";
    pub const YES_TOKEN: &str = "tok-yes";
    pub const NO_TOKEN: &str = "tok-no";

    /// Event payload with two markets; the higher-volume one encodes its
    /// outcomes and token ids as JSON strings.
    pub fn event_json() -> Value {
        json!({
            "id": EVENT_ID,
            "slug": EVENT_SLUG,
            "title": "Fed decision in March?",
            "endDate": "2026-03-19T18:00:00Z",
            "markets": [
                {
                    "id": "m-hold",
                    "slug": "fed-holds-in-march",
                    "question": "Will the Fed hold rates in March?",
                    "description": "Resolves Yes if the upper bound is unchanged.",
                    "endDate": "2026-03-19T18:00:00Z",
                    "volume": "1200.5",
                    "liquidity": 300.0,
                    "closed": false,
                    "outcomes": ["Yes", "No"],
                    "outcomePrices": ["0.30", "0.70"],
                    "clobTokenIds": ["tok-hold-yes", "tok-hold-no"]
                },
                {
                    "id": "m-cut",
                    "slug": "fed-cuts-in-march",
                    "question": "Will the Fed cut rates in March?",
                    "description": "Resolves Yes if the target range is lowered.",
                    "endDate": "2026-03-19T18:00:00Z",
                    "volume": 98000.0,
                    "liquidity": "15000",
                    "closed": false,
                    "outcomes": "[\"No\", \"Yes\"]",
                    "outcomePrices": "[\"0.38\", \"0.62\"]",
                    "clobTokenIds": "[\"tok-no\", \"tok-yes\"]"
                }
            ]
        })
    }

    /// Slug lookups answer with a list of events.
    pub fn event_list_json() -> Value {
        json!([event_json()])
    }

    pub fn order_book_json() -> Value {
        json!({
            "market": "m-cut",
            "asset_id": YES_TOKEN,
            "bids": [
                {"price": "0.58", "size": "100"},
                {"price": "0.61", "size": "120"},
                {"price": "0.60", "size": "2000"}
            ],
            "asks": [
                {"price": "0.66", "size": "90"},
                {"price": 0.63, "size": 110}
            ]
        })
    }

    /// Hourly samples in seconds, one duplicate timestamp and one sample
    /// sharing a bucket with its predecessor.
    pub fn price_history_json() -> Value {
        json!({
            "history": [
                {"t": 1_767_225_600, "p": 0.50},
                {"t": 1_767_229_200, "p": 0.55},
                {"t": 1_767_229_200, "p": 0.56},
                {"t": 1_767_230_000, "p": 0.57},
                {"t": 1_767_232_800, "p": 0.52}
            ]
        })
    }

    /// Search payload in the `web.results` shape.
    pub fn search_json(results: &[(&str, &str)]) -> Value {
        let results: Vec<Value> = results
            .iter()
            .map(|(url, title)| {
                json!({
                    "url": url,
                    "title": title,
                    "description": format!("{} - details", title),
                    "page_age": "2026-01-10T08:00:00Z"
                })
            })
            .collect();
        json!({ "web": { "results": results } })
    }

    pub fn default_search_json() -> Value {
        search_json(&[
            ("https://www.federalreserve.gov/newsevents/pressreleases/monetary.htm", "FOMC statement on rates"),
            ("https://www.reuters.com/markets/us/fed-march", "Fed signals March cut"),
            ("https://reuters.com/markets/us/fed-march/", "Fed signals March cut"),
            ("https://www.bloomberg.com/news/fed-march", "Fed signals March cut!"),
        ])
    }

    pub fn market_metadata() -> MarketMetadata {
        MarketMetadata {
            event_id: EVENT_ID.to_string(),
            event_slug: EVENT_SLUG.to_string(),
            event_title: "Fed decision in March?".to_string(),
            market_id: "m-cut".to_string(),
            market_slug: Some("fed-cuts-in-march".to_string()),
            question: "Will the Fed cut rates in March?".to_string(),
            resolution_rules: Some("Resolves Yes if the target range is lowered.".to_string()),
            end_date: chrono::DateTime::from_timestamp(1_773_943_200, 0),
            volume: 98000.0,
            liquidity: Some(15000.0),
            closed: false,
            outcomes: vec![
                OutcomeToken {
                    outcome: "Yes".to_string(),
                    token_id: YES_TOKEN.to_string(),
                    price: Some(0.62),
                },
                OutcomeToken {
                    outcome: "No".to_string(),
                    token_id: NO_TOKEN.to_string(),
                    price: Some(0.38),
                },
            ],
            market_count: 2,
        }
    }

    pub fn search_hit(lane: SearchLane, url: &str, title: &str) -> SearchHit {
        let domain = url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        SearchHit {
            lane,
            query: lane.query_for("Fed decision in March?"),
            url: url.to_string(),
            title: title.to_string(),
            snippet: String::new(),
            source_type: SourceType::classify_domain(&domain),
            domain,
            published_at: None,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on HERALD results.

    use super::*;

    /// Assert that a result failed with `code`.
    #[track_caller]
    pub fn assert_error_code<T: std::fmt::Debug>(result: &HeraldResult<T>, code: ErrorCode) {
        match result {
            Err(e) if e.code == code => {}
            other => panic!("Expected {} error, got: {:?}", code, other),
        }
    }

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &HeraldResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 1_250);
    }

    #[tokio::test]
    async fn test_recording_sleeper_advances_clock() {
        let clock = ManualClock::new(0);
        let sleeper = RecordingSleeper::advancing(clock.clone());
        sleeper.sleep(Duration::from_millis(1000)).await;
        assert_eq!(clock.now_ms(), 1000);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(1000)]);
    }

    #[tokio::test]
    async fn test_scripted_transport_queue_then_sticky() {
        let transport = ScriptedTransport::new();
        transport
            .push("/book", HttpResponse::status(500))
            .always("/book", HttpResponse::ok("{}"));

        let first = transport.get(HttpRequest::get("http://x/book")).await.unwrap();
        let second = transport.get(HttpRequest::get("http://x/book")).await.unwrap();
        let third = transport.get(HttpRequest::get("http://x/book")).await.unwrap();
        let other = transport.get(HttpRequest::get("http://x/other")).await.unwrap();

        assert_eq!(first.status, 500);
        assert_eq!(second.status, 200);
        assert_eq!(third.status, 200);
        assert_eq!(other.status, 404);
        assert_eq!(transport.call_count("/book"), 3);
    }

    #[tokio::test]
    async fn test_failing_sink() {
        let sink = RecordingPublishSink::failing();
        let result = sink.publish("hello").await;
        assertions::assert_error_code(&result, ErrorCode::PublishFailed);
    }
}
