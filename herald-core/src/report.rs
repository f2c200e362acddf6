//! Report generation, validation and publishing seams
//!
//! The generative/validation subsystem and the publish channel are external
//! collaborators. The pipeline only depends on these traits.

use crate::{
    EvidenceCandidate, HeraldResult, MarketMetadata, OrderBookSnapshot, PriceSeries, RunId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// GENERATION
// ============================================================================

/// Validator feedback passed back into a regeneration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorFeedback {
    pub code: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Structured input for one report generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInput {
    pub run_id: RunId,
    pub market: MarketMetadata,
    pub order_book: Option<OrderBookSnapshot>,
    pub price_history: Option<PriceSeries>,
    /// Canonical evidence only
    pub evidence: Vec<EvidenceCandidate>,
    /// 0 for the first attempt, incremented per supplement cycle
    pub attempt: u32,
    /// Feedback from the previous validation, if any
    pub feedback: Option<ValidatorFeedback>,
}

/// Produces a report document from assembled inputs.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, input: &GenerationInput) -> HeraldResult<serde_json::Value>;
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Result of validating a generated report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ok")]
pub enum ValidationVerdict {
    /// Report accepted, possibly normalized by the validator
    #[serde(rename = "true")]
    Valid { report: serde_json::Value },
    /// Report rejected
    #[serde(rename = "false")]
    Rejected {
        code: String,
        message: String,
        suggestion: Option<String>,
    },
}

impl ValidationVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationVerdict::Valid { .. })
    }
}

/// Validates generated reports.
#[async_trait]
pub trait ReportValidator: Send + Sync {
    async fn validate(&self, report: &serde_json::Value) -> ValidationVerdict;
}

// ============================================================================
// PUBLISHING
// ============================================================================

/// Acknowledgement from the publish channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub message_id: String,
}

/// Channel that receives rendered report text.
#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn publish(&self, text: &str) -> HeraldResult<PublishReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verdict_wire_shape() {
        let valid = ValidationVerdict::Valid {
            report: json!({"headline": "h"}),
        };
        let v = serde_json::to_value(&valid).unwrap();
        assert_eq!(v["ok"], "true");
        assert_eq!(v["report"]["headline"], "h");

        let rejected: ValidationVerdict = serde_json::from_value(json!({
            "ok": "false",
            "code": "EVIDENCE_INSUFFICIENT",
            "message": "only one source",
            "suggestion": null
        }))
        .unwrap();
        assert!(!rejected.is_valid());
    }
}
