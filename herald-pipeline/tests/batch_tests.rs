//! Batch runs over the standard pipeline

mod support;

use std::sync::Arc;
use std::time::Duration;

use herald_core::{BatchConfig, BatchSummary, ErrorCode, EventRef, EventRequest};
use herald_pipeline::BatchRunner;
use support::{event_request, Harness};

#[tokio::test]
async fn test_batch_isolates_failures_and_counts_invalid() {
    let h = Harness::new();
    h.script_upstream();
    let runner = BatchRunner::new(Arc::new(h.engine()), BatchConfig::default());

    let items = vec![
        event_request(),
        EventRequest::new(EventRef::Id("unknown-event".into())),
        EventRequest::new(EventRef::Slug(String::new())),
        event_request().with_preferred_market("m-hold"),
    ];
    let outcome = runner.run_batch(items, Some(2)).await;

    assert_eq!(
        outcome.summary,
        BatchSummary {
            total: 4,
            succeeded: 2,
            failed: 1,
            invalid: 1,
        }
    );
    let codes: Vec<_> = outcome
        .results
        .iter()
        .map(|r| r.error.as_ref().map(|e| e.code))
        .collect();
    assert_eq!(
        codes,
        vec![
            None,
            Some(ErrorCode::ProviderHttp),
            Some(ErrorCode::InvalidInput),
            None
        ]
    );
    assert_eq!(outcome.results[1].event_id, "unknown-event");
    assert_ne!(outcome.results[0].run_id, outcome.results[3].run_id);
    assert_eq!(h.store.report_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_completes_with_slow_upstream() {
    let mut h = Harness::new();
    h.transport = h.transport.clone().with_delay(Duration::from_millis(20));
    h.script_upstream();
    let runner = BatchRunner::new(Arc::new(h.engine()), BatchConfig::default());

    let items: Vec<_> = (0..3).map(|_| event_request()).collect();
    let outcome = runner.run_batch(items, None).await;

    assert_eq!(outcome.summary.succeeded, 3);
    assert_eq!(outcome.failures().count(), 0);
    assert_eq!(h.generator.call_count(), 3);
}
