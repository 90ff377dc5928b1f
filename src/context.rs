//! The shared pipeline context and its manager.
//!
//! One [`PipelineContext`] is created per calendar generation run, threaded
//! through every step, and destroyed when the run ends. The
//! [`ContextManager`] owns it for the duration of the run: it validates the
//! initial shape, folds step outcomes back in, derives the phase, keeps a
//! bounded history of snapshots for inspection and rollback, and maintains
//! the run's overall quality score.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::errors::ContextError;
use crate::phase::Phase;
use crate::step::StepOutcome;
use crate::util::RingBuffer;

/// Caller-supplied values that seed a fresh context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSeed {
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub calendar_type: String,
    pub industry: String,
    pub business_size: String,
    /// Externally-fetched user data blob; opaque to the engine.
    #[serde(default)]
    pub user_data: Map<String, Value>,
}

/// The single mutable state object for one pipeline run.
///
/// `current_step` is monotonically non-decreasing across the run and
/// `phase` is always derived from it; both are maintained by the manager,
/// never written by steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub calendar_type: String,
    pub industry: String,
    pub business_size: String,
    #[serde(default)]
    pub user_data: Map<String, Value>,
    #[serde(default)]
    pub step_results: BTreeMap<String, StepOutcome>,
    #[serde(default)]
    pub quality_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub current_step: u32,
    #[serde(default = "initial_phase")]
    pub phase: Phase,
}

fn initial_phase() -> Phase {
    Phase::Initialization
}

impl PipelineContext {
    /// Build a context with empty pipeline fields from caller-supplied
    /// identifiers and user data.
    pub fn from_seed(seed: ContextSeed) -> Self {
        Self {
            user_id: seed.user_id,
            strategy_id: seed.strategy_id,
            calendar_type: seed.calendar_type,
            industry: seed.industry,
            business_size: seed.business_size,
            user_data: seed.user_data,
            step_results: BTreeMap::new(),
            quality_scores: BTreeMap::new(),
            current_step: 0,
            phase: Phase::Initialization,
        }
    }

    /// Validate required fields against the context schema.
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.user_id <= 0 {
            return Err(ContextError::InvalidField {
                field: "user_id".into(),
                message: format!("must be positive, got {}", self.user_id),
            });
        }
        for (field, value) in [
            ("calendar_type", &self.calendar_type),
            ("industry", &self.industry),
            ("business_size", &self.business_size),
        ] {
            if value.trim().is_empty() {
                return Err(ContextError::InvalidField {
                    field: field.into(),
                    message: "must be a non-empty string".into(),
                });
            }
        }
        Ok(())
    }
}

/// Read view handed to a step before it executes.
#[derive(Debug, Clone)]
pub struct StepView {
    pub context: PipelineContext,
    /// Outcomes of all steps with a strictly lower step number.
    pub previous_step_results: BTreeMap<String, StepOutcome>,
    /// Phase-scoped subset of the user data blob.
    pub relevant_user_data: Map<String, Value>,
}

/// Owns the run's context, history, and quality aggregation.
pub struct ContextManager {
    context: Option<PipelineContext>,
    history: RingBuffer<PipelineContext>,
    overall_quality: f64,
}

impl ContextManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            context: None,
            history: RingBuffer::new(config.context_history_cap),
            overall_quality: 0.0,
        }
    }

    /// Validate the seed and install a fresh context for this run.
    ///
    /// Seeds `step_results`/`quality_scores` empty, `current_step` 0, phase
    /// initialization, and pushes the first history snapshot.
    pub fn initialize(&mut self, seed: ContextSeed) -> Result<(), ContextError> {
        let context = PipelineContext::from_seed(seed);
        context.validate()?;
        self.history.clear();
        self.history.push(context.clone());
        self.overall_quality = 0.0;
        self.context = Some(context);
        Ok(())
    }

    /// The live context, if a run is active.
    pub fn current(&self) -> Result<&PipelineContext, ContextError> {
        self.context.as_ref().ok_or(ContextError::NotInitialized)
    }

    /// Advance the context to the given step before it executes.
    ///
    /// `current_step` never moves backwards; the phase is re-derived.
    pub fn begin_step(&mut self, step_number: u32) -> Result<(), ContextError> {
        let context = self.context.as_mut().ok_or(ContextError::NotInitialized)?;
        context.current_step = context.current_step.max(step_number);
        context.phase = Phase::for_step(context.current_step);
        Ok(())
    }

    /// Fold a step outcome back into the context.
    ///
    /// Inserts the outcome and its quality score under `step_name`, bumps
    /// `current_step`, re-derives the phase, recomputes the overall quality
    /// score, and appends a history snapshot.
    pub fn update_context(
        &mut self,
        step_name: &str,
        outcome: StepOutcome,
    ) -> Result<(), ContextError> {
        let context = self.context.as_mut().ok_or(ContextError::NotInitialized)?;

        context.current_step = context.current_step.max(outcome.step_number);
        context.phase = Phase::for_step(context.current_step);
        context
            .quality_scores
            .insert(step_name.to_string(), outcome.quality_score);
        context.step_results.insert(step_name.to_string(), outcome);

        self.overall_quality = weighted_quality_score(&context.step_results);
        self.history.push(context.clone());
        debug!(
            step = step_name,
            overall_quality = self.overall_quality,
            "context updated"
        );
        Ok(())
    }

    /// Step-number-weighted overall quality score for the run so far.
    pub fn overall_quality_score(&self) -> f64 {
        self.overall_quality
    }

    /// Build the read view a step receives before executing.
    ///
    /// `previous_step_results` holds every outcome whose step number is
    /// strictly below the current step; `relevant_user_data` is scoped to
    /// the current phase.
    pub fn context_for_step(&self, step_name: &str) -> Result<StepView, ContextError> {
        let context = self.current()?;
        let previous_step_results: BTreeMap<String, StepOutcome> = context
            .step_results
            .iter()
            .filter(|(_, outcome)| outcome.step_number < context.current_step)
            .map(|(key, outcome)| (key.clone(), outcome.clone()))
            .collect();
        let relevant_user_data = relevant_user_data(context.phase, &context.user_data);
        debug!(
            step = step_name,
            previous = previous_step_results.len(),
            phase = context.phase.name(),
            "built step view"
        );
        Ok(StepView {
            context: context.clone(),
            previous_step_results,
            relevant_user_data,
        })
    }

    /// Roll the context back `steps_back` history entries.
    ///
    /// Pops that many snapshots and restores the one before them. When the
    /// history is too short this is a no-op that returns `false`; a failed
    /// rollback must never corrupt a live run.
    pub fn rollback(&mut self, steps_back: usize) -> bool {
        if steps_back == 0 {
            return true;
        }
        if self.history.len() <= steps_back {
            warn!(
                requested = steps_back,
                available = self.history.len(),
                "rollback skipped: insufficient history"
            );
            return false;
        }
        for _ in 0..steps_back {
            self.history.pop();
        }
        // len > steps_back, so a snapshot is guaranteed to remain
        let restored = self
            .history
            .last()
            .cloned()
            .expect("history retains at least one snapshot");
        self.overall_quality = weighted_quality_score(&restored.step_results);
        self.context = Some(restored);
        true
    }

    /// Number of retained history snapshots.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Serialize the live context to pretty JSON.
    pub fn export_json(&self) -> Result<String, ContextError> {
        let context = self.current()?;
        serde_json::to_string_pretty(context).map_err(ContextError::Export)
    }

    /// Replace the live context from exported JSON, re-validating the schema.
    pub fn import_json(&mut self, json: &str) -> Result<(), ContextError> {
        let context: PipelineContext = serde_json::from_str(json).map_err(ContextError::Import)?;
        context.validate()?;
        self.overall_quality = weighted_quality_score(&context.step_results);
        self.history.push(context.clone());
        self.context = Some(context);
        Ok(())
    }
}

/// Step-number-weighted average of quality scores, clamped to 1.0.
///
/// Later steps carry more weight: `Σ(score·n) / Σ(n)`. Zero when no scores
/// are present.
fn weighted_quality_score(step_results: &BTreeMap<String, StepOutcome>) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0u64;
    for outcome in step_results.values() {
        weighted_sum += outcome.quality_score * outcome.step_number as f64;
        weight_total += outcome.step_number as u64;
    }
    if weight_total == 0 {
        0.0
    } else {
        (weighted_sum / weight_total as f64).min(1.0)
    }
}

/// Phase-scoped subset of the user data blob.
///
/// Foundation steps see onboarding and strategy data; structure and content
/// steps see strategy, gap-analysis, and AI-analysis data; optimization
/// steps (and any out-of-band phase) see everything.
fn relevant_user_data(phase: Phase, user_data: &Map<String, Value>) -> Map<String, Value> {
    let keys: &[&str] = match phase {
        Phase::Foundation => &["onboarding_data", "strategy_data"],
        Phase::Structure | Phase::Content => &["strategy_data", "gap_analysis", "ai_analysis"],
        Phase::Optimization | Phase::Initialization | Phase::Unknown => {
            return user_data.clone();
        }
    };
    keys.iter()
        .filter_map(|key| {
            user_data
                .get(*key)
                .map(|value| (key.to_string(), value.clone()))
        })
        .collect()
}
