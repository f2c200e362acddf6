//! Step engine with the bounded supplement loop
//!
//! Steps run strictly in order over one [`PipelineContext`]. When a step
//! asks for supplemental evidence the engine re-runs the repeatable steps
//! (search through validation) with the validator's feedback, optionally on
//! every lane, at most `supplement_max_attempts` times. Any error aborts the
//! run immediately.

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::{
    new_run_id, Clock, ErrorCode, EventRef, EventRequest, EventStore, HeraldError, HeraldResult,
    PipelineConfig, PublishSink, ReportGenerator, ReportValidator, RunId, SearchLane,
};
use herald_providers::Providers;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::context::PipelineContext;
use crate::step::{PipelineStep, StepOutcome, StepStatus, StepTelemetry};
use crate::steps::{
    EvidenceStep, GenerateStep, OrderBookStep, PersistStep, PriceHistoryStep, PublishStep,
    ResolveMarketStep, SearchStep, ValidateStep,
};

// ============================================================================
// RUN TYPES
// ============================================================================

/// Per-run options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop successfully once the named step has completed
    pub stop_after: Option<String>,
}

impl RunOptions {
    pub fn stop_after(step: impl Into<String>) -> Self {
        Self {
            stop_after: Some(step.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step ran
    Completed,
    /// Ended early at the requested step
    Stopped,
    Failed,
}

/// Everything a run produced, successful or not.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Supplement cycles performed
    pub cycles: u32,
    pub telemetry: Vec<StepTelemetry>,
    pub context: PipelineContext,
    pub error: Option<HeraldError>,
}

impl RunRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> HeraldResult<PipelineContext> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.context),
        }
    }
}

/// Runs one batch item. The batch runner depends only on this.
#[async_trait]
pub trait ItemRunner: Send + Sync {
    async fn run_item(&self, run_id: RunId, request: &EventRequest) -> HeraldResult<()>;
}

// ============================================================================
// ENGINE
// ============================================================================

/// Collaborators for the standard step list.
#[derive(Clone)]
pub struct PipelineDeps {
    pub providers: Providers,
    pub generator: Arc<dyn ReportGenerator>,
    pub validator: Arc<dyn ReportValidator>,
    pub store: Arc<dyn EventStore>,
    pub publisher: Option<Arc<dyn PublishSink>>,
    pub clock: Arc<dyn Clock>,
}

pub struct PipelineEngine {
    steps: Vec<Box<dyn PipelineStep>>,
    config: PipelineConfig,
}

impl PipelineEngine {
    pub fn new(steps: Vec<Box<dyn PipelineStep>>, config: PipelineConfig) -> Self {
        Self { steps, config }
    }

    /// The standard run. The publish step is included only when
    /// `config.publish` is set and a publisher is available.
    pub fn standard(deps: PipelineDeps, config: PipelineConfig) -> Self {
        let PipelineDeps {
            providers,
            generator,
            validator,
            store,
            publisher,
            clock,
        } = deps;

        let mut steps: Vec<Box<dyn PipelineStep>> = vec![
            Box::new(ResolveMarketStep::new(providers.market)),
            Box::new(OrderBookStep::new(providers.order_book)),
            Box::new(PriceHistoryStep::new(providers.price_history)),
            Box::new(SearchStep::new(providers.search)),
            Box::new(EvidenceStep),
            Box::new(GenerateStep::new(generator)),
            Box::new(ValidateStep::new(validator, config.clone())),
            Box::new(PersistStep::new(Arc::clone(&store), clock)),
        ];
        match publisher {
            Some(sink) if config.publish => steps.push(Box::new(PublishStep::new(sink, store))),
            None if config.publish => {
                tracing::warn!("Publishing enabled without a publish sink, skipping publish step")
            }
            _ => {}
        }
        Self::new(steps, config)
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every step for `request`.
    pub async fn run(&self, run_id: RunId, request: EventRequest, options: &RunOptions) -> RunRecord {
        let ctx = PipelineContext::new(run_id, request, self.config.default_lanes.clone());
        let span = tracing::info_span!("run", run_id = %run_id, event = %ctx.request.event);
        self.execute(ctx, options).instrument(span).await
    }

    async fn execute(&self, mut ctx: PipelineContext, options: &RunOptions) -> RunRecord {
        let mut telemetry = Vec::new();

        if let Some(stop) = &options.stop_after {
            if !self.steps.iter().any(|s| s.name() == stop) {
                let err = HeraldError::invalid_input(format!("Unknown step '{}'", stop));
                return finish(ctx, telemetry, RunStatus::Failed, Some(err));
            }
        }

        let first_repeatable = self.steps.iter().position(|s| s.repeats_on_supplement());
        // Index of the step that requested the current supplement cycle.
        let mut resume_until: Option<usize> = None;
        let mut idx = 0;

        while idx < self.steps.len() {
            let step = self.steps[idx].as_ref();
            if resume_until.is_some_and(|until| idx <= until) && !step.repeats_on_supplement() {
                idx += 1;
                continue;
            }

            let outcome = self.run_step(step, &mut ctx, &mut telemetry).await;
            match outcome {
                Err(err) => {
                    let err = if ctx.cycle > 0 && step.repeats_on_supplement() {
                        supplement_error(err)
                    } else {
                        err
                    };
                    return finish(ctx, telemetry, RunStatus::Failed, Some(err));
                }
                Ok(StepOutcome::NeedsSupplement(feedback)) => {
                    if ctx.cycle >= self.config.supplement_max_attempts {
                        let err = HeraldError::new(
                            ErrorCode::SupplementExhausted,
                            format!(
                                "Evidence still insufficient after {} supplement attempts: {}",
                                ctx.cycle, feedback.message
                            ),
                        )
                        .with_details(serde_json::json!({
                            "validator_code": feedback.code,
                            "attempts": ctx.cycle,
                        }));
                        return finish(ctx, telemetry, RunStatus::Failed, Some(err));
                    }
                    let Some(restart) = first_repeatable.filter(|r| *r <= idx) else {
                        let mut err = HeraldError::new(
                            ErrorCode::EvidenceInsufficient,
                            format!(
                                "Step '{}' reported insufficient evidence and no earlier step can gather more: {}",
                                step.name(),
                                feedback.message
                            ),
                        )
                        .with_details(serde_json::json!({ "validator_code": feedback.code }));
                        if let Some(suggestion) = feedback.suggestion {
                            err = err.with_suggestion(suggestion);
                        }
                        return finish(ctx, telemetry, RunStatus::Failed, Some(err));
                    };

                    let widen = self
                        .config
                        .widen_lanes_on_supplement
                        .then_some(&SearchLane::ALL[..]);
                    tracing::info!(
                        cycle = ctx.cycle + 1,
                        validator_code = %feedback.code,
                        widen_lanes = widen.is_some(),
                        "Starting supplement cycle"
                    );
                    ctx.begin_supplement(feedback, widen);
                    resume_until = Some(resume_until.map_or(idx, |u| u.max(idx)));
                    idx = restart;
                    continue;
                }
                Ok(StepOutcome::Continue) => {}
            }

            if options.stop_after.as_deref() == Some(step.name()) {
                tracing::info!(step = step.name(), "Stopping early");
                return finish(ctx, telemetry, RunStatus::Stopped, None);
            }
            idx += 1;
        }

        finish(ctx, telemetry, RunStatus::Completed, None)
    }

    async fn run_step(
        &self,
        step: &dyn PipelineStep,
        ctx: &mut PipelineContext,
        telemetry: &mut Vec<StepTelemetry>,
    ) -> HeraldResult<StepOutcome> {
        let input_keys: Vec<_> = step.requires().iter().copied().filter(|k| ctx.has(*k)).collect();
        let started = tokio::time::Instant::now();

        let result = match ctx.missing(step.requires()) {
            Some(key) => Err(HeraldError::missing_input(step.name(), key)),
            None => step.run(ctx).await,
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let output_keys: Vec<_> = step.produces().iter().copied().filter(|k| ctx.has(*k)).collect();
        let record = StepTelemetry {
            step: step.name().to_string(),
            cycle: ctx.cycle,
            latency_ms,
            outcome: match &result {
                Ok(StepOutcome::Continue) => StepStatus::Ok,
                Ok(StepOutcome::NeedsSupplement(_)) => StepStatus::Supplement,
                Err(_) => StepStatus::Failed,
            },
            error_code: result.as_ref().err().map(|e| e.code),
            error_category: result.as_ref().err().map(|e| e.category),
            input_keys,
            output_keys,
        };

        match &result {
            Err(err) => tracing::warn!(
                step = step.name(),
                cycle = ctx.cycle,
                latency_ms,
                error_code = %err.code,
                error_category = %err.category,
                error = %err.message,
                "Step failed"
            ),
            Ok(_) => tracing::info!(
                step = step.name(),
                cycle = ctx.cycle,
                latency_ms,
                outcome = ?record.outcome,
                input_keys = ?record.input_keys,
                output_keys = ?record.output_keys,
                "Step completed"
            ),
        }
        telemetry.push(record);
        result
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("steps", &self.step_names())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl ItemRunner for PipelineEngine {
    async fn run_item(&self, run_id: RunId, request: &EventRequest) -> HeraldResult<()> {
        self.run(run_id, request.clone(), &RunOptions::default())
            .await
            .into_result()
            .map(|_| ())
    }
}

/// Convenience for one-off runs with a fresh run id.
pub async fn run_event(engine: &PipelineEngine, event: EventRef) -> RunRecord {
    engine
        .run(new_run_id(), EventRequest::new(event), &RunOptions::default())
        .await
}

/// Rate limits hit while supplementing end the run with a distinct code.
fn supplement_error(err: HeraldError) -> HeraldError {
    if !err.is_rate_limit() || err.code == ErrorCode::SupplementRateLimited {
        return err;
    }
    let mut mapped = HeraldError::new(
        ErrorCode::SupplementRateLimited,
        format!("Rate limited while fetching supplemental evidence: {}", err.message),
    )
    .with_details(serde_json::json!({ "cause": err.code }));
    if let Some(provider) = err.provider {
        mapped = mapped.with_provider(provider);
    }
    mapped
}

fn finish(
    ctx: PipelineContext,
    telemetry: Vec<StepTelemetry>,
    status: RunStatus,
    error: Option<HeraldError>,
) -> RunRecord {
    match &error {
        Some(err) => tracing::warn!(
            cycles = ctx.cycle,
            error_code = %err.code,
            error_category = %err.category,
            "Run failed"
        ),
        None => tracing::info!(cycles = ctx.cycle, status = ?status, "Run finished"),
    }
    RunRecord {
        run_id: ctx.run_id,
        status,
        cycles: ctx.cycle,
        telemetry,
        context: ctx,
        error,
    }
}
