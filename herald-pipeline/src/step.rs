//! Step abstraction and per-step telemetry

use async_trait::async_trait;
use herald_core::{ErrorCategory, ErrorCode, HeraldResult, ValidatorFeedback};
use serde::{Deserialize, Serialize};

use crate::context::{ContextKey, PipelineContext};

/// What the engine should do after a step returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Proceed to the next step
    Continue,
    /// The report lacks evidence; run a supplement cycle
    NeedsSupplement(ValidatorFeedback),
}

/// One named unit of work over the run context.
///
/// The engine refuses to run a step whose `requires` keys are absent.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn requires(&self) -> &'static [ContextKey];

    fn produces(&self) -> &'static [ContextKey];

    /// Re-run during supplement cycles.
    fn repeats_on_supplement(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut PipelineContext) -> HeraldResult<StepOutcome>;
}

// ============================================================================
// TELEMETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Supplement,
    Failed,
}

/// Record of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTelemetry {
    pub step: String,
    pub cycle: u32,
    pub latency_ms: u64,
    pub outcome: StepStatus,
    pub error_code: Option<ErrorCode>,
    pub error_category: Option<ErrorCategory>,
    /// Required keys present when the step started
    pub input_keys: Vec<ContextKey>,
    /// Declared keys present when the step finished
    pub output_keys: Vec<ContextKey>,
}
