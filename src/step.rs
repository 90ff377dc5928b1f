//! The step contract and its execution harness.
//!
//! A [`Step`] is one of the 12 units of work in a calendar generation run.
//! Concrete steps (strategy analysis, gap analysis, theme development, ...)
//! live outside this crate; the engine only sees the trait. The
//! [`StepHarness`] wraps a step with the non-overridable `run` behavior:
//! timing, error capture, validation, quality scoring, and insight
//! extraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::PipelineContext;

/// Execution state of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Never run (or reset).
    Pending,
    /// Currently executing.
    Running,
    /// Executed and passed validation.
    Completed,
    /// Executed but the result failed validation.
    Failed,
    /// Execution itself raised an error.
    Error,
}

/// The structured record produced by one step invocation.
///
/// Outcomes are created by [`StepHarness::run`] and immediately folded into
/// the run's context; they live only for the duration of that run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_name: String,
    pub step_number: u32,
    pub status: StepStatus,
    /// Wall-clock execution time in seconds.
    pub execution_time: f64,
    /// Heuristic confidence/completeness score in [0, 1].
    pub quality_score: f64,
    pub validation_passed: bool,
    pub timestamp: DateTime<Utc>,
    /// Opaque payload returned by the step's `execute`.
    pub result: Value,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StepOutcome {
    /// Whether the step completed and passed validation.
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// One of the 12 fixed units of work in the pipeline.
///
/// Implementations must be side-effect free with respect to the shared
/// context: folding results back into the context is the engine's job.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable snake_case identifier (e.g. `gap_analysis`).
    fn name(&self) -> &str;

    /// Position in the fixed 1..=12 sequence.
    fn step_number(&self) -> u32;

    /// Perform the step's work against a read view of the shared context.
    async fn execute(&self, context: &PipelineContext) -> anyhow::Result<Value>;

    /// Check that a raw result is usable by downstream steps.
    fn validate_result(&self, result: &Value) -> bool;

    /// The prompt template this step feeds its AI collaborator.
    ///
    /// Documentation only; the engine never executes or parses this.
    fn prompt_template(&self) -> String;
}

/// Wraps a [`Step`] with run bookkeeping.
///
/// The harness owns the step's mutable lifecycle state (`status`,
/// `execution_time`, `quality_score`, `error_message`); the step itself
/// stays immutable and shareable.
pub struct StepHarness {
    step: Box<dyn Step>,
    status: StepStatus,
    execution_time: f64,
    quality_score: f64,
    error_message: Option<String>,
}

impl StepHarness {
    pub fn new(step: Box<dyn Step>) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            execution_time: 0.0,
            quality_score: 0.0,
            error_message: None,
        }
    }

    pub fn name(&self) -> &str {
        self.step.name()
    }

    pub fn step_number(&self) -> u32 {
        self.step.step_number()
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn execution_time(&self) -> f64 {
        self.execution_time
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn prompt_template(&self) -> String {
        self.step.prompt_template()
    }

    /// Re-run the step's validation against an arbitrary payload.
    ///
    /// Used by the orchestrator's own validation gate, which checks the
    /// unwrapped inner result a second time after the harness gate.
    pub fn validate(&self, result: &Value) -> bool {
        self.step.validate_result(result)
    }

    /// Execute the step and normalize everything into a [`StepOutcome`].
    ///
    /// Errors raised by `execute` are captured here, never re-raised: the
    /// outcome carries `status: Error`, a zero quality score, and the
    /// message. Deciding whether an error aborts the run is the caller's
    /// policy, not the harness's.
    pub async fn run(&mut self, context: &PipelineContext, config: &EngineConfig) -> StepOutcome {
        self.status = StepStatus::Running;
        self.error_message = None;
        let started = Instant::now();

        let executed = self.step.execute(context).await;
        self.execution_time = started.elapsed().as_secs_f64();

        match executed {
            Err(err) => {
                let message = format!("{err:#}");
                debug!(
                    step = self.step.name(),
                    number = self.step.step_number(),
                    %message,
                    "step execution raised"
                );
                self.status = StepStatus::Error;
                self.quality_score = 0.0;
                self.error_message = Some(message.clone());
                StepOutcome {
                    step_name: self.step.name().to_string(),
                    step_number: self.step.step_number(),
                    status: StepStatus::Error,
                    execution_time: self.execution_time,
                    quality_score: 0.0,
                    validation_passed: false,
                    timestamp: Utc::now(),
                    result: Value::Null,
                    insights: Vec::new(),
                    next_steps: Vec::new(),
                    error_message: Some(message),
                }
            }
            Ok(result) => {
                let validation_passed = self.step.validate_result(&result);
                let insights = extract_insights(&result, config.insight_cap);
                let next_steps = extract_next_steps(&result);
                let quality = compute_quality_score(
                    validation_passed,
                    &result,
                    self.execution_time,
                    insights.len(),
                    config,
                );

                self.status = if validation_passed {
                    StepStatus::Completed
                } else {
                    StepStatus::Failed
                };
                self.quality_score = quality;

                StepOutcome {
                    step_name: self.step.name().to_string(),
                    step_number: self.step.step_number(),
                    status: self.status,
                    execution_time: self.execution_time,
                    quality_score: quality,
                    validation_passed,
                    timestamp: Utc::now(),
                    result,
                    insights,
                    next_steps,
                    error_message: None,
                }
            }
        }
    }

    /// Clear lifecycle state back to pending.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.execution_time = 0.0;
        self.quality_score = 0.0;
        self.error_message = None;
    }
}

/// Quality score for a validated result.
///
/// Base 0.8 when validation passed, plus 0.1 for a non-empty result,
/// 0.05 when execution time falls inside the configured band, and 0.05
/// when at least one insight was extracted. Capped at 1.0.
fn compute_quality_score(
    validation_passed: bool,
    result: &Value,
    execution_time: f64,
    insight_count: usize,
    config: &EngineConfig,
) -> f64 {
    let mut score: f64 = if validation_passed { 0.8 } else { 0.0 };
    if !is_empty_result(result) {
        score += 0.1;
    }
    let (lo, hi) = config.timing_band;
    if execution_time >= lo && execution_time <= hi {
        score += 0.05;
    }
    if insight_count > 0 {
        score += 0.05;
    }
    score.min(1.0)
}

fn is_empty_result(result: &Value) -> bool {
    match result {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Pull up to `cap` human-readable insights out of well-known result keys:
/// the `insights` array, the first three `recommendations`, and
/// `analysis.summary`.
fn extract_insights(result: &Value, cap: usize) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some(items) = result.get("insights").and_then(Value::as_array) {
        insights.extend(items.iter().filter_map(string_of));
    }
    if let Some(items) = result.get("recommendations").and_then(Value::as_array) {
        insights.extend(items.iter().take(3).filter_map(string_of));
    }
    if let Some(summary) = result
        .pointer("/analysis/summary")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        insights.push(summary.to_string());
    }

    insights.truncate(cap);
    insights
}

fn extract_next_steps(result: &Value) -> Vec<String> {
    result
        .get("next_steps")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(string_of).collect())
        .unwrap_or_default()
}

fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
