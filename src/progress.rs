//! Run progress accounting and caller notification.
//!
//! The [`ProgressTracker`] keeps completed/total counts, per-step timing
//! and quality, and derives percentage, ETA, and overall quality on demand.
//! After every step it invokes the caller-supplied callback with a fresh
//! [`ProgressSnapshot`]; a broken callback is logged and ignored so a UI
//! fault can never abort the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::config::EngineConfig;
use crate::phase::Phase;
use crate::step::{StepOutcome, StepStatus};
use crate::util::RingBuffer;

/// Callback invoked synchronously after each step with a fresh snapshot.
///
/// Returning an error is tolerated: the engine logs it and continues.
pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) -> anyhow::Result<()> + Send + Sync>;

/// Coarse lifecycle of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Per-step progress detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_number: u32,
    pub status: StepStatus,
    pub execution_time: f64,
    pub quality_score: f64,
    pub insight_count: usize,
}

/// Derived view of run progress; recomputed on demand, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_steps: u32,
    pub completed_steps: u32,
    pub current_step: u32,
    /// Share of successfully completed steps, 0-100.
    pub percentage: f64,
    /// Seconds since the run started.
    pub elapsed_time: f64,
    /// Estimated seconds remaining; zero until a step completes.
    pub eta: f64,
    pub overall_quality_score: f64,
    pub phase: Phase,
    pub steps: BTreeMap<String, StepProgress>,
    pub status: RunStatus,
}

/// Tracks completed/total counts and notifies the caller after each step.
pub struct ProgressTracker {
    total_steps: u32,
    completed_steps: u32,
    current_step: u32,
    started_at: Option<Instant>,
    step_progress: BTreeMap<String, StepProgress>,
    history: RingBuffer<ProgressSnapshot>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            total_steps: 0,
            completed_steps: 0,
            current_step: 0,
            started_at: None,
            step_progress: BTreeMap::new(),
            history: RingBuffer::new(config.progress_history_cap),
            callback: None,
        }
    }

    /// Reset all counters for a new run and record its start time.
    pub fn initialize(&mut self, total_steps: u32, callback: Option<ProgressCallback>) {
        self.total_steps = total_steps;
        self.completed_steps = 0;
        self.current_step = 0;
        self.started_at = Some(Instant::now());
        self.step_progress.clear();
        self.history.clear();
        self.callback = callback;
    }

    /// Record a step outcome and notify the callback.
    ///
    /// Only `Completed` outcomes advance the completed counter, so the
    /// percentage always reflects true successful progress. The callback is
    /// invoked with the fresh snapshot; its errors are logged and swallowed.
    pub fn update_progress(&mut self, step_name: &str, outcome: &StepOutcome) {
        self.step_progress.insert(
            step_name.to_string(),
            StepProgress {
                step_number: outcome.step_number,
                status: outcome.status,
                execution_time: outcome.execution_time,
                quality_score: outcome.quality_score,
                insight_count: outcome.insights.len(),
            },
        );
        if outcome.status == StepStatus::Completed {
            self.completed_steps += 1;
        }
        self.current_step = self.current_step.max(outcome.step_number);

        let snapshot = self.snapshot();
        self.history.push(snapshot.clone());

        if let Some(callback) = &self.callback
            && let Err(err) = callback(&snapshot)
        {
            warn!(step = step_name, error = %err, "progress callback failed");
        }
    }

    /// Percentage of successfully completed steps; 0.0 for an empty run.
    pub fn percentage(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.completed_steps as f64 / self.total_steps as f64 * 100.0
        }
    }

    /// Build the current derived progress view.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed_time = self
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let eta = if self.completed_steps == 0 {
            0.0
        } else {
            let remaining = self.total_steps.saturating_sub(self.completed_steps);
            elapsed_time / self.completed_steps as f64 * remaining as f64
        };
        let status = if self.step_progress.is_empty() {
            RunStatus::NotStarted
        } else if self.total_steps > 0 && self.completed_steps >= self.total_steps {
            RunStatus::Completed
        } else {
            RunStatus::InProgress
        };

        ProgressSnapshot {
            total_steps: self.total_steps,
            completed_steps: self.completed_steps,
            current_step: self.current_step,
            percentage: self.percentage(),
            elapsed_time,
            eta,
            overall_quality_score: self.overall_quality_score(),
            phase: Phase::for_step(self.current_step),
            steps: self.step_progress.clone(),
            status,
        }
    }

    /// Step-number-weighted overall quality across recorded steps.
    ///
    /// Computed independently of the context manager's aggregate, over the
    /// tracker's own per-step detail.
    pub fn overall_quality_score(&self) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0u64;
        for progress in self.step_progress.values() {
            weighted_sum += progress.quality_score * progress.step_number as f64;
            weight_total += progress.step_number as u64;
        }
        if weight_total == 0 {
            0.0
        } else {
            (weighted_sum / weight_total as f64).min(1.0)
        }
    }

    /// Number of retained snapshots.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
