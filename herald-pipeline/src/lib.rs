//! HERALD Pipeline - Step Engine and Batch Runner
//!
//! Turns an event reference into a validated, persisted report: market data,
//! lane searches, evidence clustering, generation and validation run as
//! ordered steps over a shared context, with a bounded supplement loop when
//! the validator asks for more evidence. The batch runner fans requests out
//! over a fixed worker pool.

pub mod batch;
pub mod context;
pub mod engine;
pub mod step;
pub mod steps;
pub mod store;
pub mod telemetry;

pub use batch::{BatchOutcome, BatchRunner};
pub use context::{ContextKey, PipelineContext};
pub use engine::{
    run_event, ItemRunner, PipelineDeps, PipelineEngine, RunOptions, RunRecord, RunStatus,
};
pub use step::{PipelineStep, StepOutcome, StepStatus, StepTelemetry};
pub use steps::{
    render_report_text, EvidenceStep, GenerateStep, OrderBookStep, PersistStep, PriceHistoryStep,
    PublishStep, ResolveMarketStep, SearchStep, ValidateStep,
};
pub use store::InMemoryEventStore;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
