//! In-memory event store
//!
//! Process-local [`EventStore`] used by tests and dry runs. Transactions are
//! applied to a copy of the state and swapped in only when every write
//! succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use herald_core::{
    EventRecord, EventStore, EvidenceRecord, HeraldError, HeraldResult, ReportRecord,
    ReportStatusUpdate, RunId, StoreTransaction,
};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct StoreState {
    events: HashMap<String, EventRecord>,
    evidence: Vec<EvidenceRecord>,
    reports: Vec<ReportRecord>,
}

impl StoreState {
    fn upsert_event(&mut self, record: &EventRecord) {
        self.events.insert(record.event_id.clone(), record.clone());
    }

    fn save_report(&mut self, record: &ReportRecord) -> HeraldResult<()> {
        if self.reports.iter().any(|r| r.report_id == record.report_id) {
            return Err(HeraldError::store(format!(
                "report {} already exists",
                record.report_id
            )));
        }
        self.reports.push(record.clone());
        Ok(())
    }

    fn update_status(&mut self, update: &ReportStatusUpdate) -> HeraldResult<()> {
        let report = self
            .reports
            .iter_mut()
            .find(|r| r.report_id == update.report_id)
            .ok_or_else(|| HeraldError::store(format!("report {} not found", update.report_id)))?;
        report.status = update.status;
        report.status_code = update.code.clone();
        report.status_message = update.message.clone();
        if update.message_id.is_some() {
            report.message_id = update.message_id.clone();
        }
        Ok(())
    }
}

/// Thread-safe in-memory store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<StoreState>>,
    fail_writes: bool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every write fails with `STORE_FAILED`.
    pub fn failing() -> Self {
        Self {
            state: Arc::default(),
            fail_writes: true,
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> HeraldResult<()> {
        if self.fail_writes {
            return Err(HeraldError::store("store is read-only"));
        }
        Ok(())
    }

    pub fn event(&self, event_id: &str) -> Option<EventRecord> {
        self.state().events.get(event_id).cloned()
    }

    pub fn evidence_for_run(&self, run_id: RunId) -> Vec<EvidenceRecord> {
        self.state()
            .evidence
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn report(&self, report_id: Uuid) -> Option<ReportRecord> {
        self.state()
            .reports
            .iter()
            .find(|r| r.report_id == report_id)
            .cloned()
    }

    pub fn report_count(&self) -> usize {
        self.state().reports.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn upsert_event(&self, record: &EventRecord) -> HeraldResult<()> {
        self.check_writable()?;
        self.state().upsert_event(record);
        Ok(())
    }

    async fn append_evidence(&self, records: &[EvidenceRecord]) -> HeraldResult<()> {
        self.check_writable()?;
        self.state().evidence.extend_from_slice(records);
        Ok(())
    }

    async fn save_report(&self, record: &ReportRecord) -> HeraldResult<()> {
        self.check_writable()?;
        self.state().save_report(record)
    }

    async fn get_latest_report(&self, event_id: &str) -> HeraldResult<Option<ReportRecord>> {
        // Later inserts win ties on created_at.
        Ok(self
            .state()
            .reports
            .iter()
            .filter(|r| r.event_id == event_id)
            .fold(None::<&ReportRecord>, |latest, r| match latest {
                Some(l) if l.created_at > r.created_at => Some(l),
                _ => Some(r),
            })
            .cloned())
    }

    async fn update_report_status(&self, update: &ReportStatusUpdate) -> HeraldResult<()> {
        self.check_writable()?;
        self.state().update_status(update)
    }

    async fn run_in_transaction(&self, tx: StoreTransaction) -> HeraldResult<()> {
        self.check_writable()?;
        let mut state = self.state();
        let mut next = state.clone();
        if let Some(event) = &tx.event {
            next.upsert_event(event);
        }
        next.evidence.extend(tx.evidence);
        if let Some(report) = &tx.report {
            next.save_report(report)?;
        }
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use herald_core::{new_run_id, ReportStatus};
    use serde_json::json;

    fn report(event_id: &str, secs: i64) -> ReportRecord {
        ReportRecord {
            report_id: Uuid::now_v7(),
            run_id: new_run_id(),
            event_id: event_id.to_string(),
            report: json!({"headline": "h"}),
            status: ReportStatus::Draft,
            status_code: None,
            status_message: None,
            message_id: None,
            created_at: DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_latest_report_and_status_update() {
        let store = InMemoryEventStore::new();
        let old = report("903", 100);
        let new = report("903", 200);
        store.save_report(&new).await.unwrap();
        store.save_report(&old).await.unwrap();
        store.save_report(&report("other", 300)).await.unwrap();

        let latest = store.get_latest_report("903").await.unwrap().unwrap();
        assert_eq!(latest.report_id, new.report_id);

        store
            .update_report_status(&ReportStatusUpdate {
                report_id: new.report_id,
                status: ReportStatus::Blocked,
                code: Some("PUBLISH_FAILED".into()),
                message: Some("channel unavailable".into()),
                message_id: None,
            })
            .await
            .unwrap();
        let blocked = store.report(new.report_id).unwrap();
        assert_eq!(blocked.status, ReportStatus::Blocked);
        assert_eq!(blocked.status_code.as_deref(), Some("PUBLISH_FAILED"));

        assert!(store.get_latest_report("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let existing = report("903", 100);
        store.save_report(&existing).await.unwrap();

        let tx = StoreTransaction {
            event: Some(EventRecord {
                event_id: "903".into(),
                slug: "fed".into(),
                title: "Fed".into(),
                market_id: "m".into(),
                question: "q".into(),
                end_date: None,
                updated_at: Utc::now(),
            }),
            evidence: Vec::new(),
            report: Some(existing.clone()),
        };
        let err = store.run_in_transaction(tx).await.unwrap_err();
        assert_eq!(err.code, herald_core::ErrorCode::StoreFailed);
        assert!(store.event("903").is_none());
        assert_eq!(store.report_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_store_rejects_writes() {
        let store = InMemoryEventStore::failing();
        let err = store.save_report(&report("903", 1)).await.unwrap_err();
        assert!(!err.retryable);
        assert!(store
            .update_report_status(&ReportStatusUpdate {
                report_id: Uuid::now_v7(),
                status: ReportStatus::Published,
                code: None,
                message: None,
                message_id: None,
            })
            .await
            .is_err());
    }
}
