//! Concrete pipeline steps
//!
//! The standard run is resolve market → order book → price history →
//! search → evidence → generate → validate → persist → publish (optional).
//! Search through validate repeat during supplement cycles.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_core::{
    Clock, ErrorCode, EventRecord, EventStore, EvidenceRecord, GenerationInput, HeraldError,
    HeraldResult, PipelineConfig, PublishSink, ReportGenerator, ReportRecord, ReportStatus,
    ReportStatusUpdate, ReportValidator, StoreTransaction, ValidationVerdict, ValidatorFeedback,
};
use herald_evidence::{build_evidence_candidates, EvidenceSummary};
use herald_providers::{MarketClient, OrderBookClient, PriceHistoryClient, SearchSuite};
use serde_json::Value;
use uuid::Uuid;

use crate::context::{ContextKey, PipelineContext};
use crate::step::{PipelineStep, StepOutcome};

fn require<'a, T>(slot: &'a Option<T>, step: &str, key: ContextKey) -> HeraldResult<&'a T> {
    slot.as_ref().ok_or_else(|| HeraldError::missing_input(step, key))
}

fn now_utc(clock: &dyn Clock) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(clock.now_ms()).unwrap_or_default()
}

// ============================================================================
// MARKET DATA
// ============================================================================

pub struct ResolveMarketStep {
    client: MarketClient,
}

impl ResolveMarketStep {
    pub const NAME: &'static str = "resolve_market";

    pub fn new(client: MarketClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineStep for ResolveMarketStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Market]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let market = self
            .client
            .fetch(&ctx.request.event, ctx.request.preferred_market.as_deref())
            .await?;
        tracing::debug!(
            run_id = %ctx.run_id,
            event_id = %market.event_id,
            market_id = %market.market_id,
            markets = market.market_count,
            "Resolved market"
        );
        ctx.market = Some(market);
        Ok(StepOutcome::Continue)
    }
}

pub struct OrderBookStep {
    client: OrderBookClient,
}

impl OrderBookStep {
    pub const NAME: &'static str = "order_book";

    pub fn new(client: OrderBookClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineStep for OrderBookStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Market]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::OrderBook]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let market = require(&ctx.market, Self::NAME, ContextKey::Market)?;
        // Markets without tokens have no book; generation treats it as optional.
        let Some(token) = market.primary_token() else {
            tracing::debug!(run_id = %ctx.run_id, market_id = %market.market_id, "Market has no tokens");
            return Ok(StepOutcome::Continue);
        };
        let book = self.client.fetch(&token.token_id).await?;
        ctx.order_book = Some(book);
        Ok(StepOutcome::Continue)
    }
}

pub struct PriceHistoryStep {
    client: PriceHistoryClient,
}

impl PriceHistoryStep {
    pub const NAME: &'static str = "price_history";

    pub fn new(client: PriceHistoryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineStep for PriceHistoryStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Market]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::PriceHistory]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let market = require(&ctx.market, Self::NAME, ContextKey::Market)?;
        let Some(token) = market.primary_token() else {
            return Ok(StepOutcome::Continue);
        };
        let series = self.client.fetch(&token.token_id).await?;
        ctx.price_history = Some(series);
        Ok(StepOutcome::Continue)
    }
}

// ============================================================================
// EVIDENCE
// ============================================================================

pub struct SearchStep {
    suite: SearchSuite,
}

impl SearchStep {
    pub const NAME: &'static str = "search";

    pub fn new(suite: SearchSuite) -> Self {
        Self { suite }
    }
}

#[async_trait]
impl PipelineStep for SearchStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Market]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::SearchResults]
    }

    fn repeats_on_supplement(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let market = require(&ctx.market, Self::NAME, ContextKey::Market)?;
        let responses = self.suite.search_lanes(&market.question, &ctx.lanes).await?;

        for response in &responses {
            tracing::info!(
                run_id = %ctx.run_id,
                cycle = ctx.cycle,
                lane = %response.lane,
                hits = response.hits.len(),
                cache_hit = response.cache_hit,
                rate_limited = response.rate_limited,
                latency_ms = response.latency_ms,
                "Lane searched"
            );
            ctx.hits.extend(response.hits.iter().cloned());
        }
        ctx.searches = Some(responses);
        Ok(StepOutcome::Continue)
    }
}

/// Deduplicates and clusters every hit collected so far.
#[derive(Debug, Default)]
pub struct EvidenceStep;

impl EvidenceStep {
    pub const NAME: &'static str = "evidence";
}

#[async_trait]
impl PipelineStep for EvidenceStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::SearchResults]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Evidence]
    }

    fn repeats_on_supplement(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let candidates = build_evidence_candidates(&ctx.hits);
        let summary = EvidenceSummary::from_candidates(&candidates);
        tracing::info!(
            run_id = %ctx.run_id,
            cycle = ctx.cycle,
            candidates = summary.total,
            canonical = summary.canonical,
            clusters = summary.clusters,
            official = summary.official(),
            "Evidence clustered"
        );
        ctx.evidence = Some(candidates);
        ctx.evidence_summary = Some(summary);
        Ok(StepOutcome::Continue)
    }
}

// ============================================================================
// REPORT
// ============================================================================

pub struct GenerateStep {
    generator: Arc<dyn ReportGenerator>,
}

impl GenerateStep {
    pub const NAME: &'static str = "generate";

    pub fn new(generator: Arc<dyn ReportGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl PipelineStep for GenerateStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Market, ContextKey::Evidence]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Report]
    }

    fn repeats_on_supplement(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let market = require(&ctx.market, Self::NAME, ContextKey::Market)?;
        let input = GenerationInput {
            run_id: ctx.run_id,
            market: market.clone(),
            order_book: ctx.order_book.clone(),
            price_history: ctx.price_history.clone(),
            evidence: ctx.canonical_evidence(),
            attempt: ctx.cycle,
            feedback: ctx.feedback.clone(),
        };
        let report = self.generator.generate(&input).await?;
        ctx.report = Some(report);
        Ok(StepOutcome::Continue)
    }
}

/// Validates the generated report.
///
/// Rejections whose code is a configured supplement code ask the engine for
/// more evidence. Every other rejection is `REPORT_INVALID`.
pub struct ValidateStep {
    validator: Arc<dyn ReportValidator>,
    config: PipelineConfig,
}

impl ValidateStep {
    pub const NAME: &'static str = "validate";

    pub fn new(validator: Arc<dyn ReportValidator>, config: PipelineConfig) -> Self {
        Self { validator, config }
    }
}

#[async_trait]
impl PipelineStep for ValidateStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Report]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::ValidatedReport]
    }

    fn repeats_on_supplement(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let report = require(&ctx.report, Self::NAME, ContextKey::Report)?;
        match self.validator.validate(report).await {
            ValidationVerdict::Valid { report } => {
                ctx.validated_report = Some(report);
                Ok(StepOutcome::Continue)
            }
            ValidationVerdict::Rejected {
                code,
                message,
                suggestion,
            } if self.config.is_supplement_code(&code) => {
                Ok(StepOutcome::NeedsSupplement(ValidatorFeedback {
                    code,
                    message,
                    suggestion,
                }))
            }
            ValidationVerdict::Rejected {
                code,
                message,
                suggestion,
            } => {
                let mut err = HeraldError::new(
                    ErrorCode::ReportInvalid,
                    format!("Report rejected ({}): {}", code, message),
                )
                .with_details(serde_json::json!({ "validator_code": code }));
                if let Some(suggestion) = suggestion {
                    err = err.with_suggestion(suggestion);
                }
                Err(err)
            }
        }
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Writes event, canonical evidence and a draft report in one transaction.
pub struct PersistStep {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl PersistStep {
    pub const NAME: &'static str = "persist";

    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl PipelineStep for PersistStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Market, ContextKey::Evidence, ContextKey::ValidatedReport]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::ReportId]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let market = require(&ctx.market, Self::NAME, ContextKey::Market)?;
        let report = require(&ctx.validated_report, Self::NAME, ContextKey::ValidatedReport)?;
        let now = now_utc(self.clock.as_ref());
        let report_id = Uuid::now_v7();

        let tx = StoreTransaction {
            event: Some(EventRecord {
                event_id: market.event_id.clone(),
                slug: market.event_slug.clone(),
                title: market.event_title.clone(),
                market_id: market.market_id.clone(),
                question: market.question.clone(),
                end_date: market.end_date,
                updated_at: now,
            }),
            evidence: ctx
                .canonical_evidence()
                .into_iter()
                .map(|candidate| EvidenceRecord {
                    run_id: ctx.run_id,
                    event_id: market.event_id.clone(),
                    candidate,
                })
                .collect(),
            report: Some(ReportRecord {
                report_id,
                run_id: ctx.run_id,
                event_id: market.event_id.clone(),
                report: report.clone(),
                status: ReportStatus::Draft,
                status_code: None,
                status_message: None,
                message_id: None,
                created_at: now,
            }),
        };
        let evidence_rows = tx.evidence.len();
        self.store.run_in_transaction(tx).await?;

        tracing::info!(
            run_id = %ctx.run_id,
            event_id = %market.event_id,
            report_id = %report_id,
            evidence = evidence_rows,
            "Run persisted"
        );
        ctx.report_id = Some(report_id);
        Ok(StepOutcome::Continue)
    }
}

/// Plain-text body for the publish channel: headline, then the summary and
/// probability when the report carries them.
pub fn render_report_text(report: &Value) -> HeraldResult<String> {
    let headline = report
        .get("headline")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            HeraldError::new(ErrorCode::ReportInvalid, "Report has no headline to publish")
        })?;

    let mut text = headline.to_string();
    if let Some(summary) = report.get("summary").and_then(Value::as_str) {
        let summary = summary.trim();
        if !summary.is_empty() {
            text.push_str("\n\n");
            text.push_str(summary);
        }
    }
    if let Some(p) = report.get("probability").and_then(Value::as_f64) {
        text.push_str(&format!("\n\nMarket probability: {:.0}%", p * 100.0));
    }
    Ok(text)
}

/// Sends the rendered report and records the publish status.
///
/// A failed publish marks the stored report `Blocked` with the error code
/// and message, then fails the run.
pub struct PublishStep {
    sink: Arc<dyn PublishSink>,
    store: Arc<dyn EventStore>,
}

impl PublishStep {
    pub const NAME: &'static str = "publish";

    pub fn new(sink: Arc<dyn PublishSink>, store: Arc<dyn EventStore>) -> Self {
        Self { sink, store }
    }
}

#[async_trait]
impl PipelineStep for PublishStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::ValidatedReport, ContextKey::ReportId]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::PublishReceipt]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome> {
        let report = require(&ctx.validated_report, Self::NAME, ContextKey::ValidatedReport)?;
        let report_id = *require(&ctx.report_id, Self::NAME, ContextKey::ReportId)?;

        let published = match render_report_text(report) {
            Ok(text) => self.sink.publish(&text).await,
            Err(e) => Err(e),
        };

        match published {
            Ok(receipt) => {
                self.store
                    .update_report_status(&ReportStatusUpdate {
                        report_id,
                        status: ReportStatus::Published,
                        code: None,
                        message: None,
                        message_id: Some(receipt.message_id.clone()),
                    })
                    .await?;
                tracing::info!(
                    run_id = %ctx.run_id,
                    report_id = %report_id,
                    message_id = %receipt.message_id,
                    "Report published"
                );
                ctx.publish_receipt = Some(receipt);
                Ok(StepOutcome::Continue)
            }
            Err(err) => {
                let blocked = ReportStatusUpdate {
                    report_id,
                    status: ReportStatus::Blocked,
                    code: Some(err.code.to_string()),
                    message: Some(err.message.clone()),
                    message_id: None,
                };
                if let Err(store_err) = self.store.update_report_status(&blocked).await {
                    tracing::error!(
                        run_id = %ctx.run_id,
                        report_id = %report_id,
                        error = %store_err,
                        "Failed to mark report blocked"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_report_text() {
        let text = render_report_text(&json!({
            "headline": " Fed likely to cut ",
            "summary": "Two official statements point to a cut.",
            "probability": 0.62
        }))
        .unwrap();
        assert_eq!(
            text,
            "Fed likely to cut\n\nTwo official statements point to a cut.\n\nMarket probability: 62%"
        );

        assert_eq!(render_report_text(&json!({"headline": "h"})).unwrap(), "h");
    }

    #[test]
    fn test_render_without_headline_is_invalid() {
        let err = render_report_text(&json!({"summary": "s"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ReportInvalid);
        assert!(render_report_text(&json!({"headline": "  "})).is_err());
    }
}
