//! Top-level pipeline driver for calendar generation.
//!
//! The [`CalendarOrchestrator`] owns one harness per step, the context
//! manager, the progress tracker, and the error handler. A run executes all
//! steps strictly in numeric order with no parallelism: step N+1 never
//! starts before step N's harness has fully resolved, so every step may
//! assume all lower-numbered outcomes are already in the context.
//!
//! Failure policy is fail-fast: the first step error or validation
//! rejection aborts the run. The error handler still synthesizes the
//! phase-shaped fallback for the failing step, exposed through
//! [`CalendarOrchestrator::last_step_failure`], but it is never substituted
//! into the running pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{ContextManager, ContextSeed, PipelineContext};
use crate::errors::{PipelineError, RegistryError};
use crate::phase::{Phase, step_key};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::recovery::{ErrorHandler, ErrorResponse, ErrorStatistics, StepFailure};
use crate::services::{Dependencies, empty_user_data};
use crate::step::{Step, StepHarness, StepOutcome, StepStatus};

/// Pipeline state machine for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    #[serde(rename = "initialization")]
    Initialization,
    #[serde(rename = "phase_1_foundation")]
    Foundation,
    #[serde(rename = "phase_2_structure")]
    Structure,
    #[serde(rename = "phase_3_content")]
    Content,
    #[serde(rename = "phase_4_optimization")]
    Optimization,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl RunState {
    /// State while the given step is executing.
    pub fn for_step(step_number: u32) -> Self {
        match Phase::for_step(step_number) {
            Phase::Foundation => RunState::Foundation,
            Phase::Structure => RunState::Structure,
            Phase::Content => RunState::Content,
            Phase::Optimization => RunState::Optimization,
            Phase::Initialization | Phase::Unknown => RunState::Initialization,
        }
    }
}

/// Caller-supplied identifiers and configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarRequest {
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub calendar_type: String,
    pub industry: String,
    pub business_size: String,
}

/// The assembled calendar: named fields projected out of specific steps'
/// results into one flat document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarResult {
    pub status: String,
    pub run_id: Uuid,
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub calendar_type: String,
    pub industry: String,
    pub business_size: String,
    pub generated_at: DateTime<Utc>,
    /// Wall-clock duration of the run, seconds.
    pub processing_time: f64,
    pub framework_version: String,
    pub overall_quality_score: f64,
    pub quality_scores: BTreeMap<String, f64>,
    pub content_pillars: Value,
    pub platform_strategies: Value,
    pub weekly_themes: Value,
    pub daily_schedule: Value,
    pub content_recommendations: Value,
    pub optimization_insights: Value,
    pub validation_summary: Value,
}

/// Drives the fixed 12-step calendar generation pipeline.
pub struct CalendarOrchestrator {
    harnesses: BTreeMap<u32, StepHarness>,
    context: ContextManager,
    progress: ProgressTracker,
    errors: ErrorHandler,
    deps: Dependencies,
    config: EngineConfig,
    state: RunState,
    last_step_failure: Option<StepFailure>,
}

impl std::fmt::Debug for CalendarOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarOrchestrator")
            .field("steps", &self.harnesses.keys().collect::<Vec<_>>())
            .field("state", &self.state)
            .field("last_step_failure", &self.last_step_failure)
            .finish_non_exhaustive()
    }
}

impl CalendarOrchestrator {
    /// Build an orchestrator from injected collaborators and the full set
    /// of steps.
    ///
    /// Step numbers must cover 1..=total contiguously with no duplicates;
    /// a partial pipeline is a construction error, not a runtime surprise.
    pub fn new(deps: Dependencies, steps: Vec<Box<dyn Step>>) -> Result<Self, PipelineError> {
        Self::with_config(deps, steps, EngineConfig::default())
    }

    pub fn with_config(
        deps: Dependencies,
        steps: Vec<Box<dyn Step>>,
        config: EngineConfig,
    ) -> Result<Self, PipelineError> {
        let mut harnesses = BTreeMap::new();
        for step in steps {
            let number = step.step_number();
            let name = step.name().to_string();
            if harnesses.insert(number, StepHarness::new(step)).is_some() {
                return Err(RegistryError::DuplicateStep { name }.into());
            }
        }
        for number in 1..=config.total_steps {
            if !harnesses.contains_key(&number) {
                return Err(PipelineError::MissingStep {
                    step_number: number,
                });
            }
        }

        Ok(Self {
            harnesses,
            context: ContextManager::new(&config),
            progress: ProgressTracker::new(&config),
            errors: ErrorHandler::new(&config),
            deps,
            config,
            state: RunState::Initialization,
            last_step_failure: None,
        })
    }

    /// Current pipeline state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The synthesized fallback for the most recent step failure, if any.
    pub fn last_step_failure(&self) -> Option<&StepFailure> {
        self.last_step_failure.as_ref()
    }

    /// Aggregate error accounting across the orchestrator's lifetime.
    pub fn error_statistics(&self) -> ErrorStatistics {
        self.errors.statistics()
    }

    /// Register a custom recovery strategy on the underlying handler.
    pub fn error_handler_mut(&mut self) -> &mut ErrorHandler {
        &mut self.errors
    }

    /// Read access to the run context while a run is active.
    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    /// Generate a calendar by executing all steps strictly sequentially.
    ///
    /// User data is fetched up front with a non-fatal fallback to an
    /// empty-shaped map. Any step error or validation rejection aborts the
    /// run; the failure surfaces as a structured [`ErrorResponse`], never a
    /// raw internal error.
    pub async fn generate_calendar(
        &mut self,
        request: CalendarRequest,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<CalendarResult, ErrorResponse> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        self.state = RunState::Initialization;
        self.last_step_failure = None;
        info!(
            %run_id,
            user_id = request.user_id,
            calendar_type = %request.calendar_type,
            "starting calendar generation"
        );

        let user_data = match self
            .deps
            .user_data
            .fetch_comprehensive(request.user_id, request.strategy_id)
            .await
        {
            Ok(map) => map,
            Err(err) => {
                warn!(
                    user_id = request.user_id,
                    error = %format!("{err:#}"),
                    "user data fetch failed; continuing with empty-shaped data"
                );
                empty_user_data()
            }
        };

        let seed = ContextSeed {
            user_id: request.user_id,
            strategy_id: request.strategy_id,
            calendar_type: request.calendar_type.clone(),
            industry: request.industry.clone(),
            business_size: request.business_size.clone(),
            user_data,
        };
        if let Err(err) = self.context.initialize(seed) {
            return Err(self.fail(PipelineError::from(err), &request));
        }
        self.progress
            .initialize(self.config.total_steps, progress_callback);

        for step_number in 1..=self.config.total_steps {
            match self.run_step(step_number, &request).await {
                Ok(outcome) => {
                    self.state = RunState::for_step(step_number);
                    debug!(
                        step = step_number,
                        quality = outcome.quality_score,
                        "step completed"
                    );
                }
                Err(err) => return Err(self.fail(err, &request)),
            }
        }

        self.state = RunState::Completed;
        let context = match self.context.current() {
            Ok(context) => context,
            Err(err) => return Err(self.fail(PipelineError::from(err), &request)),
        };
        let result = assemble_calendar(
            context,
            &self.config,
            run_id,
            self.context.overall_quality_score(),
            started.elapsed().as_secs_f64(),
        );
        info!(
            %run_id,
            processing_time = result.processing_time,
            overall_quality = result.overall_quality_score,
            "calendar generation completed"
        );
        Ok(result)
    }

    /// Execute one step and apply the per-step bookkeeping and gates.
    ///
    /// Returns the outcome on success; any failure comes back as a tagged
    /// [`PipelineError`] for the caller to branch on.
    async fn run_step(
        &mut self,
        step_number: u32,
        request: &CalendarRequest,
    ) -> Result<StepOutcome, PipelineError> {
        let harness = self
            .harnesses
            .get_mut(&step_number)
            .ok_or(PipelineError::MissingStep { step_number })?;

        self.context.begin_step(step_number)?;
        // TODO: thread a cancellation token through run() so a stuck step
        // cannot block the whole pipeline indefinitely
        let outcome = {
            let context = self.context.current()?;
            harness.run(context, &self.config).await
        };

        let key = step_key(step_number);
        self.progress.update_progress(&key, &outcome);
        self.context.update_context(&key, outcome.clone())?;

        if outcome.status == StepStatus::Error {
            let message = outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "step execution failed".to_string());
            let err = PipelineError::StepFailed {
                step_name: outcome.step_name.clone(),
                step_number,
                message,
            };
            self.record_step_failure(&outcome.step_name, step_number, &err, request);
            return Err(err);
        }

        // The orchestrator's own gate: re-validate the unwrapped inner
        // result, independently of the gate already applied inside run().
        let harness = self
            .harnesses
            .get(&step_number)
            .ok_or(PipelineError::MissingStep { step_number })?;
        if !harness.validate(&outcome.result) {
            let err = PipelineError::ValidationRejected {
                step_name: outcome.step_name.clone(),
                step_number,
            };
            self.record_step_failure(&outcome.step_name, step_number, &err, request);
            return Err(err);
        }

        Ok(outcome)
    }

    fn record_step_failure(
        &mut self,
        step_name: &str,
        step_number: u32,
        err: &PipelineError,
        request: &CalendarRequest,
    ) {
        let failure = self.errors.handle_step_error(
            step_name,
            step_number,
            err,
            request.user_id,
            request.strategy_id,
        );
        self.last_step_failure = Some(failure);
    }

    /// Abort the run: flip to `Failed` and convert the pipeline error into
    /// the structured response shape.
    fn fail(&mut self, err: PipelineError, request: &CalendarRequest) -> ErrorResponse {
        self.state = RunState::Failed;
        warn!(error = %err, "calendar generation aborted");
        self.errors
            .handle_error(&err, request.user_id, request.strategy_id)
    }
}

/// Project named fields out of specific steps' results into the flat
/// calendar document.
fn assemble_calendar(
    context: &PipelineContext,
    config: &EngineConfig,
    run_id: Uuid,
    overall_quality_score: f64,
    processing_time: f64,
) -> CalendarResult {
    let project = |step_number: u32, field: &str| -> Value {
        context
            .step_results
            .get(&step_key(step_number))
            .and_then(|outcome| outcome.result.get(field))
            .cloned()
            .unwrap_or(Value::Null)
    };

    CalendarResult {
        status: "completed".to_string(),
        run_id,
        user_id: context.user_id,
        strategy_id: context.strategy_id,
        calendar_type: context.calendar_type.clone(),
        industry: context.industry.clone(),
        business_size: context.business_size.clone(),
        generated_at: Utc::now(),
        processing_time,
        framework_version: config.framework_version.clone(),
        overall_quality_score,
        quality_scores: context.quality_scores.clone(),
        content_pillars: project(5, "content_pillars"),
        platform_strategies: project(6, "platform_strategies"),
        weekly_themes: project(7, "weekly_themes"),
        daily_schedule: project(8, "daily_schedule"),
        content_recommendations: project(9, "recommendations"),
        optimization_insights: project(10, "optimizations"),
        validation_summary: project(11, "validation"),
    }
}
