//! Run and batch identity types

use crate::HeraldError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Run identifier using UUIDv7 for timestamp-sortable IDs.
pub type RunId = Uuid;

/// Generate a new UUIDv7 run id.
pub fn new_run_id() -> RunId {
    Uuid::now_v7()
}

// ============================================================================
// EVENT REFERENCE
// ============================================================================

/// How the caller identified an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum EventRef {
    Id(String),
    Slug(String),
}

impl EventRef {
    pub fn as_str(&self) -> &str {
        match self {
            EventRef::Id(s) | EventRef::Slug(s) => s,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRef::Id(id) => write!(f, "id:{}", id),
            EventRef::Slug(slug) => write!(f, "slug:{}", slug),
        }
    }
}

/// One unit of batch work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRequest {
    pub event: EventRef,
    /// Market id or slug to prefer over the volume heuristic
    pub preferred_market: Option<String>,
}

impl EventRequest {
    pub fn new(event: EventRef) -> Self {
        Self {
            event,
            preferred_market: None,
        }
    }

    pub fn with_preferred_market(mut self, market: impl Into<String>) -> Self {
        self.preferred_market = Some(market.into());
        self
    }
}

// ============================================================================
// BATCH RESULTS
// ============================================================================

/// Terminal status of one batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemStatus {
    Success,
    Failed,
    /// Rejected before running
    Invalid,
}

/// Outcome of one batch item. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub event_id: String,
    pub run_id: RunId,
    pub status: BatchItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HeraldError>,
}

impl BatchItemResult {
    pub fn success(event_id: impl Into<String>, run_id: RunId) -> Self {
        Self {
            event_id: event_id.into(),
            run_id,
            status: BatchItemStatus::Success,
            error: None,
        }
    }

    pub fn failed(event_id: impl Into<String>, run_id: RunId, error: HeraldError) -> Self {
        Self {
            event_id: event_id.into(),
            run_id,
            status: BatchItemStatus::Failed,
            error: Some(error),
        }
    }

    /// An item rejected before it ran.
    pub fn invalid(event_id: impl Into<String>, run_id: RunId, error: HeraldError) -> Self {
        Self {
            event_id: event_id.into(),
            run_id,
            status: BatchItemStatus::Invalid,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchItemStatus::Success
    }
}

/// Aggregate counts for a batch. `total == succeeded + failed + invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items rejected before a run started
    pub invalid: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_event_ref_display() {
        assert_eq!(EventRef::Id("123".into()).to_string(), "id:123");
        assert_eq!(EventRef::Slug("fed-march".into()).to_string(), "slug:fed-march");
    }

    #[test]
    fn test_event_ref_blank() {
        assert!(EventRef::Slug("  ".into()).is_blank());
        assert!(!EventRef::Id("1".into()).is_blank());
    }

    #[test]
    fn test_run_ids_are_sortable() {
        let a = new_run_id();
        let b = new_run_id();
        assert!(a <= b);
    }

    #[test]
    fn test_batch_item_result_constructors() {
        let ok = BatchItemResult::success("e1", new_run_id());
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let err = BatchItemResult::failed(
            "e2",
            new_run_id(),
            HeraldError::new(ErrorCode::SupplementExhausted, "budget"),
        );
        assert!(!err.is_success());
        assert_eq!(err.error.map(|e| e.code), Some(ErrorCode::SupplementExhausted));
    }
}
