//! Shared harness for pipeline integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use herald_core::{EventRef, EventRequest, HeraldConfig, PublishSink};
use herald_pipeline::{InMemoryEventStore, PipelineDeps, PipelineEngine};
use herald_providers::{no_jitter, ProviderDeps, Providers};
use herald_test_utils::fixtures::{
    default_search_json, event_json, order_book_json, price_history_json, EVENT_ID,
};
use herald_test_utils::{
    ManualClock, RecordingPublishSink, RecordingSleeper, ScriptedGenerator, ScriptedTransport,
    ScriptedValidator,
};

/// 2026-01-01T20:40:00Z
pub const START_MS: i64 = 1_767_300_000_000;

pub const SEARCH: &str = "/res/v1/web/search";

pub struct Harness {
    pub transport: ScriptedTransport,
    pub clock: ManualClock,
    pub sleeper: RecordingSleeper,
    pub generator: ScriptedGenerator,
    pub validator: ScriptedValidator,
    pub store: InMemoryEventStore,
    pub config: HeraldConfig,
}

impl Harness {
    /// Upstream calls are not retried so scripted failures surface at once.
    pub fn new() -> Self {
        let clock = ManualClock::new(START_MS);
        let mut config = HeraldConfig::default();
        for endpoint in [
            &mut config.providers.market,
            &mut config.providers.order_book,
            &mut config.providers.price_history,
            &mut config.providers.search,
        ] {
            endpoint.max_retries = 0;
        }
        Self {
            transport: ScriptedTransport::new(),
            sleeper: RecordingSleeper::advancing(clock.clone()),
            clock,
            generator: ScriptedGenerator::new(),
            validator: ScriptedValidator::new(),
            store: InMemoryEventStore::new(),
            config,
        }
    }

    /// Happy-path answers for every provider. Register overriding routes
    /// before calling this; the first matching route answers.
    pub fn script_upstream(&self) -> &Self {
        self.transport
            .always_json(&format!("/events/{}", EVENT_ID), &event_json())
            .always_json("/book", &order_book_json())
            .always_json("/prices-history", &price_history_json())
            .always_json(SEARCH, &default_search_json());
        self
    }

    pub fn providers(&self) -> Providers {
        let deps = ProviderDeps {
            transport: Arc::new(self.transport.clone()),
            clock: Arc::new(self.clock.clone()),
            sleeper: Arc::new(self.sleeper.clone()),
            jitter: no_jitter(),
        };
        Providers::new(&self.config, &deps)
    }

    pub fn engine_with(&self, publisher: Option<Arc<dyn PublishSink>>) -> PipelineEngine {
        let deps = PipelineDeps {
            providers: self.providers(),
            generator: Arc::new(self.generator.clone()),
            validator: Arc::new(self.validator.clone()),
            store: Arc::new(self.store.clone()),
            publisher,
            clock: Arc::new(self.clock.clone()),
        };
        PipelineEngine::standard(deps, self.config.pipeline.clone())
    }

    pub fn engine(&self) -> PipelineEngine {
        self.engine_with(None)
    }

    pub fn publishing_engine(&mut self, sink: RecordingPublishSink) -> PipelineEngine {
        self.config.pipeline.publish = true;
        self.engine_with(Some(Arc::new(sink)))
    }
}

pub fn event_request() -> EventRequest {
    EventRequest::new(EventRef::Id(EVENT_ID.to_string()))
}
