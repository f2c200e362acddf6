//! Batch runner
//!
//! A fixed pool of workers drains a shared queue of event requests. Each
//! item's failure or panic is recorded as that item's outcome and never
//! affects its siblings. Results come back in submission order.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use herald_core::{
    new_run_id, BatchConfig, BatchItemResult, BatchItemStatus, BatchSummary, EventRequest,
    HeraldError,
};
use serde::{Deserialize, Serialize};

use crate::engine::ItemRunner;

/// Outcome of a whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// One result per submitted item, in submission order
    pub results: Vec<BatchItemResult>,
    pub summary: BatchSummary,
}

impl BatchOutcome {
    pub fn successes(&self) -> impl Iterator<Item = &BatchItemResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchItemResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

fn summarize(results: &[BatchItemResult]) -> BatchSummary {
    let mut summary = BatchSummary {
        total: results.len(),
        ..BatchSummary::default()
    };
    for result in results {
        match result.status {
            BatchItemStatus::Success => summary.succeeded += 1,
            BatchItemStatus::Failed => summary.failed += 1,
            BatchItemStatus::Invalid => summary.invalid += 1,
        }
    }
    summary
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs batches of event requests through an [`ItemRunner`].
#[derive(Clone)]
pub struct BatchRunner {
    runner: Arc<dyn ItemRunner>,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(runner: Arc<dyn ItemRunner>, config: BatchConfig) -> Self {
        Self { runner, config }
    }

    /// Run every item with up to `concurrency` (default and cap from
    /// [`BatchConfig`]) items in flight.
    ///
    /// Items without an event reference fail with `INVALID_INPUT` without
    /// running and are counted as `invalid`.
    pub async fn run_batch(&self, items: Vec<EventRequest>, concurrency: Option<usize>) -> BatchOutcome {
        let total = items.len();
        let slots: Arc<Mutex<Vec<Option<BatchItemResult>>>> = Arc::new(Mutex::new(vec![None; total]));

        let mut queue = Vec::new();
        for (index, request) in items.into_iter().enumerate() {
            if request.event.is_blank() {
                let result = BatchItemResult::invalid(
                    String::new(),
                    new_run_id(),
                    HeraldError::invalid_input("batch item has no event id or slug"),
                );
                store_result(&slots, index, result);
            } else {
                queue.push((index, request));
            }
        }

        let workers = self.config.worker_count(concurrency, queue.len());
        tracing::info!(total, runnable = queue.len(), workers, "Batch started");

        let queue = Arc::new(queue);
        let next = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let next = Arc::clone(&next);
                let slots = Arc::clone(&slots);
                let runner = Arc::clone(&self.runner);
                tokio::spawn(async move {
                    loop {
                        let position = next.fetch_add(1, Ordering::SeqCst);
                        let Some((index, request)) = queue.get(position) else {
                            break;
                        };
                        let result = run_one(runner.as_ref(), worker, request).await;
                        store_result(&slots, *index, result);
                    }
                })
            })
            .collect();

        for handle in futures_util::future::join_all(handles).await {
            if let Err(e) = handle {
                tracing::error!(error = %e, "Batch worker terminated abnormally");
            }
        }

        let slots = match Arc::try_unwrap(slots) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|e| e.into_inner()),
            Err(shared) => shared.lock().map(|s| s.clone()).unwrap_or_else(|e| e.into_inner().clone()),
        };
        let results: Vec<BatchItemResult> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    BatchItemResult::failed(
                        String::new(),
                        new_run_id(),
                        HeraldError::internal("batch item produced no result"),
                    )
                })
            })
            .collect();

        let summary = summarize(&results);
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            invalid = summary.invalid,
            "Batch finished"
        );
        BatchOutcome { results, summary }
    }
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner").field("config", &self.config).finish()
    }
}

async fn run_one(runner: &dyn ItemRunner, worker: usize, request: &EventRequest) -> BatchItemResult {
    let run_id = new_run_id();
    let event_id = request.event.as_str().trim().to_string();

    let outcome = AssertUnwindSafe(runner.run_item(run_id, request))
        .catch_unwind()
        .await;
    let result = match outcome {
        Ok(Ok(())) => BatchItemResult::success(&event_id, run_id),
        Ok(Err(err)) => BatchItemResult::failed(&event_id, run_id, err),
        Err(payload) => BatchItemResult::failed(
            &event_id,
            run_id,
            HeraldError::internal(format!("item panicked: {}", panic_message(payload.as_ref()))),
        ),
    };

    match &result.error {
        None => tracing::info!(worker, event_id = %event_id, run_id = %run_id, "Batch item succeeded"),
        Some(err) => tracing::warn!(
            worker,
            event_id = %event_id,
            run_id = %run_id,
            error_code = %err.code,
            error = %err.message,
            "Batch item failed"
        ),
    }
    result
}

fn store_result(slots: &Mutex<Vec<Option<BatchItemResult>>>, index: usize, result: BatchItemResult) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(slot) = slots.get_mut(index) {
        *slot = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use herald_core::{ErrorCode, EventRef, HeraldResult, RunId};
    use std::time::Duration;

    /// Sleeps per item and tracks peak concurrency. Ids starting with
    /// "fail" return an upstream error, "bad" an input error, "panic" panics.
    #[derive(Default)]
    struct SlowRunner {
        inflight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ItemRunner for SlowRunner {
        async fn run_item(&self, _run_id: RunId, request: &EventRequest) -> HeraldResult<()> {
            let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);

            let id = request.event.as_str();
            if id.starts_with("panic") {
                panic!("boom in {}", id);
            }
            if id.starts_with("fail") {
                return Err(HeraldError::new(ErrorCode::ProviderHttp, "upstream 500"));
            }
            if id.starts_with("bad") {
                return Err(HeraldError::invalid_input(format!("event {} is malformed", id)));
            }
            Ok(())
        }
    }

    fn items(ids: &[&str]) -> Vec<EventRequest> {
        ids.iter()
            .map(|id| EventRequest::new(EventRef::Id(id.to_string())))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_and_panics_isolated() {
        let runner = Arc::new(SlowRunner::default());
        let batch = BatchRunner::new(runner.clone(), BatchConfig::default());

        let outcome = batch.run_batch(items(&["a", "panic-b", "c"]), Some(2)).await;

        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.summary.succeeded, 2);
        assert_eq!(outcome.summary.failed, 1);
        let failed = &outcome.results[1];
        assert_eq!(failed.event_id, "panic-b");
        let err = failed.error.as_ref().unwrap();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(err.message.contains("boom in panic-b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_affect_siblings() {
        let runner = Arc::new(SlowRunner::default());
        let batch = BatchRunner::new(runner, BatchConfig::default());

        let outcome = batch.run_batch(items(&["a", "fail-b", "c", "d"]), None).await;

        let ids: Vec<_> = outcome.results.iter().map(|r| r.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "fail-b", "c", "d"]);
        assert_eq!(outcome.successes().count(), 3);
        assert_eq!(outcome.failures().count(), 1);
        assert_eq!(
            outcome.results[1].error.as_ref().map(|e| e.code),
            Some(ErrorCode::ProviderHttp)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_items_are_invalid() {
        let batch = BatchRunner::new(Arc::new(SlowRunner::default()), BatchConfig::default());
        let mut requests = items(&["a"]);
        requests.push(EventRequest::new(EventRef::Slug("   ".into())));

        let outcome = batch.run_batch(requests, Some(5)).await;
        assert_eq!(
            outcome.summary,
            BatchSummary {
                total: 2,
                succeeded: 1,
                failed: 0,
                invalid: 1,
            }
        );
        assert_eq!(
            outcome.results[1].error.as_ref().map(|e| e.code),
            Some(ErrorCode::InvalidInput)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_error_after_running_counts_as_failed() {
        let batch = BatchRunner::new(Arc::new(SlowRunner::default()), BatchConfig::default());
        let mut requests = items(&["bad-a", "b"]);
        requests.push(EventRequest::new(EventRef::Id(String::new())));

        let outcome = batch.run_batch(requests, None).await;

        assert_eq!(
            outcome.summary,
            BatchSummary {
                total: 3,
                succeeded: 1,
                failed: 1,
                invalid: 1,
            }
        );
        assert_eq!(outcome.results[0].status, BatchItemStatus::Failed);
        assert_eq!(
            outcome.results[0].error.as_ref().map(|e| e.code),
            Some(ErrorCode::InvalidInput)
        );
        assert_eq!(outcome.results[2].status, BatchItemStatus::Invalid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_and_empty_batch() {
        let runner = Arc::new(SlowRunner::default());
        let config = BatchConfig {
            default_concurrency: 2,
            max_concurrency: 3,
        };
        let batch = BatchRunner::new(runner.clone(), config);

        let ids: Vec<String> = (0..9).map(|i| format!("e{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let outcome = batch.run_batch(items(&refs), Some(50)).await;
        assert_eq!(outcome.summary.succeeded, 9);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 3);

        let empty = batch.run_batch(Vec::new(), None).await;
        assert_eq!(empty.summary, BatchSummary::default());
    }
}
