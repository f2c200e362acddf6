//! Storage seam
//!
//! Persistent storage is an external collaborator. Implementations map their
//! failures to `ErrorCode::StoreFailed`, which is never retried.

use crate::{EvidenceCandidate, HeraldResult, RunId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Publication status of a stored report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Draft,
    Published,
    Blocked,
}

/// Event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub slug: String,
    pub title: String,
    pub market_id: String,
    pub question: String,
    pub end_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Evidence row linked to the run that collected it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub run_id: RunId,
    pub event_id: String,
    pub candidate: EvidenceCandidate,
}

/// Report row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub report_id: Uuid,
    pub run_id: RunId,
    pub event_id: String,
    pub report: serde_json::Value,
    pub status: ReportStatus,
    pub status_code: Option<String>,
    pub status_message: Option<String>,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Status transition for a stored report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStatusUpdate {
    pub report_id: Uuid,
    pub status: ReportStatus,
    pub code: Option<String>,
    pub message: Option<String>,
    pub message_id: Option<String>,
}

/// Writes applied atomically by [`EventStore::run_in_transaction`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreTransaction {
    pub event: Option<EventRecord>,
    pub evidence: Vec<EvidenceRecord>,
    pub report: Option<ReportRecord>,
}

impl StoreTransaction {
    pub fn is_empty(&self) -> bool {
        self.event.is_none() && self.evidence.is_empty() && self.report.is_none()
    }
}

/// Async storage trait for run output.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn upsert_event(&self, record: &EventRecord) -> HeraldResult<()>;

    async fn append_evidence(&self, records: &[EvidenceRecord]) -> HeraldResult<()>;

    async fn save_report(&self, record: &ReportRecord) -> HeraldResult<()>;

    async fn get_latest_report(&self, event_id: &str) -> HeraldResult<Option<ReportRecord>>;

    async fn update_report_status(&self, update: &ReportStatusUpdate) -> HeraldResult<()>;

    /// Apply every write in `tx` or none of them.
    async fn run_in_transaction(&self, tx: StoreTransaction) -> HeraldResult<()>;
}
