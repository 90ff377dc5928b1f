//! Engine configuration.
//!
//! All capacities and scoring constants live here so the engine has no
//! magic numbers scattered through it. The defaults match the production
//! pipeline: 12 steps, bounded histories, and the quality-score timing band.

use anyhow::{Result, bail};

use crate::phase::TOTAL_STEPS;

/// Runtime configuration for the pipeline engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of steps a full run executes, in strict numeric order.
    pub total_steps: u32,
    /// Maximum retained context history snapshots.
    pub context_history_cap: usize,
    /// Maximum retained progress snapshots.
    pub progress_history_cap: usize,
    /// Maximum retained error records.
    pub error_history_cap: usize,
    /// Maximum insights extracted from a single step result.
    pub insight_cap: usize,
    /// Execution-time band (seconds) that earns the timing quality bonus.
    pub timing_band: (f64, f64),
    /// Version string stamped on assembled calendars.
    pub framework_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_steps: TOTAL_STEPS,
            context_history_cap: 50,
            progress_history_cap: 100,
            error_history_cap: 100,
            insight_cap: 5,
            timing_band: (0.1, 10.0),
            framework_version: "2.0".to_string(),
        }
    }
}

impl EngineConfig {
    /// Validate the configuration, returning it for chaining.
    pub fn validated(self) -> Result<Self> {
        if self.total_steps == 0 {
            bail!("total_steps must be at least 1");
        }
        if self.context_history_cap == 0 || self.error_history_cap == 0 {
            bail!("history capacities must be non-zero");
        }
        let (lo, hi) = self.timing_band;
        if !(lo >= 0.0 && hi > lo) {
            bail!("timing band must satisfy 0 <= lo < hi, got [{lo}, {hi}]");
        }
        Ok(self)
    }
}
