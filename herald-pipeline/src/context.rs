//! Run context shared by every pipeline step

use std::fmt;

use herald_core::{
    EventRequest, EvidenceCandidate, MarketMetadata, OrderBookSnapshot, PriceSeries,
    PublishReceipt, RunId, SearchHit, SearchLane, ValidatorFeedback,
};
use herald_evidence::EvidenceSummary;
use herald_providers::SearchResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// CONTEXT KEYS
// ============================================================================

/// Named slot in the run context that a step can require or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    Market,
    OrderBook,
    PriceHistory,
    SearchResults,
    Evidence,
    Report,
    ValidatedReport,
    ReportId,
    PublishReceipt,
}

impl ContextKey {
    pub const ALL: [ContextKey; 9] = [
        ContextKey::Market,
        ContextKey::OrderBook,
        ContextKey::PriceHistory,
        ContextKey::SearchResults,
        ContextKey::Evidence,
        ContextKey::Report,
        ContextKey::ValidatedReport,
        ContextKey::ReportId,
        ContextKey::PublishReceipt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::OrderBook => "order_book",
            Self::PriceHistory => "price_history",
            Self::SearchResults => "search_results",
            Self::Evidence => "evidence",
            Self::Report => "report",
            Self::ValidatedReport => "validated_report",
            Self::ReportId => "report_id",
            Self::PublishReceipt => "publish_receipt",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PIPELINE CONTEXT
// ============================================================================

/// Everything one run has gathered so far.
///
/// Slots are typed; [`PipelineContext::has`] maps them onto [`ContextKey`]s
/// so the engine can check step prerequisites without knowing the types.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub run_id: RunId,
    pub request: EventRequest,
    /// Lanes searched in the current cycle
    pub lanes: Vec<SearchLane>,
    /// 0 for the first pass, incremented per supplement cycle
    pub cycle: u32,
    /// Validator feedback that triggered the current supplement cycle
    pub feedback: Option<ValidatorFeedback>,

    pub market: Option<MarketMetadata>,
    pub order_book: Option<OrderBookSnapshot>,
    pub price_history: Option<PriceSeries>,
    /// Lane responses of the most recent search pass
    pub searches: Option<Vec<SearchResponse>>,
    /// Every hit collected across cycles
    pub hits: Vec<SearchHit>,
    pub evidence: Option<Vec<EvidenceCandidate>>,
    pub evidence_summary: Option<EvidenceSummary>,
    pub report: Option<serde_json::Value>,
    pub validated_report: Option<serde_json::Value>,
    pub report_id: Option<Uuid>,
    pub publish_receipt: Option<PublishReceipt>,
}

impl PipelineContext {
    pub fn new(run_id: RunId, request: EventRequest, lanes: Vec<SearchLane>) -> Self {
        Self {
            run_id,
            request,
            lanes,
            cycle: 0,
            feedback: None,
            market: None,
            order_book: None,
            price_history: None,
            searches: None,
            hits: Vec::new(),
            evidence: None,
            evidence_summary: None,
            report: None,
            validated_report: None,
            report_id: None,
            publish_receipt: None,
        }
    }

    pub fn has(&self, key: ContextKey) -> bool {
        match key {
            ContextKey::Market => self.market.is_some(),
            ContextKey::OrderBook => self.order_book.is_some(),
            ContextKey::PriceHistory => self.price_history.is_some(),
            ContextKey::SearchResults => self.searches.is_some(),
            ContextKey::Evidence => self.evidence.is_some(),
            ContextKey::Report => self.report.is_some(),
            ContextKey::ValidatedReport => self.validated_report.is_some(),
            ContextKey::ReportId => self.report_id.is_some(),
            ContextKey::PublishReceipt => self.publish_receipt.is_some(),
        }
    }

    /// Keys currently present.
    pub fn keys(&self) -> Vec<ContextKey> {
        ContextKey::ALL.into_iter().filter(|k| self.has(*k)).collect()
    }

    /// First key of `keys` that is absent.
    pub fn missing(&self, keys: &[ContextKey]) -> Option<ContextKey> {
        keys.iter().copied().find(|k| !self.has(*k))
    }

    /// Canonical evidence of the current cycle.
    pub fn canonical_evidence(&self) -> Vec<EvidenceCandidate> {
        self.evidence
            .as_deref()
            .map(herald_evidence::canonical_evidence)
            .unwrap_or_default()
    }

    /// Enter the next supplement cycle.
    ///
    /// Collected hits are kept so the next evidence pass sees old and new
    /// results together. The rejected report is discarded.
    pub fn begin_supplement(&mut self, feedback: ValidatorFeedback, lanes: Option<&[SearchLane]>) {
        self.cycle += 1;
        self.feedback = Some(feedback);
        if let Some(lanes) = lanes {
            for lane in lanes {
                if !self.lanes.contains(lane) {
                    self.lanes.push(*lane);
                }
            }
        }
        self.report = None;
        self.validated_report = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{new_run_id, EventRef};
    use herald_test_utils::fixtures::market_metadata;

    fn context() -> PipelineContext {
        PipelineContext::new(
            new_run_id(),
            EventRequest::new(EventRef::Id("903".into())),
            vec![SearchLane::Update, SearchLane::Primary],
        )
    }

    #[test]
    fn test_keys_follow_slots() {
        let mut ctx = context();
        assert!(ctx.keys().is_empty());
        assert_eq!(
            ctx.missing(&[ContextKey::Market, ContextKey::Evidence]),
            Some(ContextKey::Market)
        );

        ctx.market = Some(market_metadata());
        ctx.evidence = Some(Vec::new());
        assert_eq!(ctx.keys(), vec![ContextKey::Market, ContextKey::Evidence]);
        assert_eq!(ctx.missing(&[ContextKey::Market, ContextKey::Evidence]), None);
    }

    #[test]
    fn test_begin_supplement_widens_lanes_once() {
        let mut ctx = context();
        ctx.report = Some(serde_json::json!({"headline": "h"}));
        let feedback = ValidatorFeedback {
            code: "EVIDENCE_INSUFFICIENT".into(),
            message: "one source".into(),
            suggestion: None,
        };

        ctx.begin_supplement(feedback.clone(), Some(&SearchLane::ALL));
        ctx.begin_supplement(feedback, Some(&SearchLane::ALL));

        assert_eq!(ctx.cycle, 2);
        assert_eq!(ctx.lanes.len(), 4);
        assert_eq!(ctx.lanes[0], SearchLane::Update);
        assert!(!ctx.has(ContextKey::Report));
    }

    #[test]
    fn test_key_names() {
        assert_eq!(ContextKey::ValidatedReport.to_string(), "validated_report");
        let json = serde_json::to_string(&ContextKey::SearchResults).unwrap();
        assert_eq!(json, "\"search_results\"");
    }
}
