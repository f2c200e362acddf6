//! HERALD Core - Shared Types and Seams
//!
//! Value types, the error model, configuration and the traits every other
//! crate is written against. This crate contains no network or storage code.

pub mod clock;
pub mod config;
pub mod error;
pub mod evidence;
pub mod market;
pub mod report;
pub mod run;
pub mod store;
pub mod transport;

pub use clock::{Clock, Sleeper, SystemClock, TokioSleeper};
pub use config::{
    BatchConfig, CacheTtlConfig, HeraldConfig, OrderBookConfig, PipelineConfig,
    PriceHistoryConfig, ProviderEndpoint, ProvidersConfig, RateLimitConfig,
};
pub use error::{ErrorCategory, ErrorCode, HeraldError, HeraldResult, ProviderFailure};
pub use evidence::{EvidenceCandidate, SearchHit, SearchLane, SourceType};
pub use market::{
    BookSide, MarketMetadata, NotableWall, OrderBookLevel, OrderBookSnapshot, OutcomeToken,
    PricePoint, PriceSeries, PriceSummary,
};
pub use report::{
    GenerationInput, PublishReceipt, PublishSink, ReportGenerator, ReportValidator,
    ValidationVerdict, ValidatorFeedback,
};
pub use run::{
    new_run_id, BatchItemResult, BatchItemStatus, BatchSummary, EventRef, EventRequest, RunId,
};
pub use store::{
    EventRecord, EventStore, EvidenceRecord, ReportRecord, ReportStatus, ReportStatusUpdate,
    StoreTransaction,
};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
