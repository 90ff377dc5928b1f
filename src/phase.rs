//! Phase definitions for the calendar generation pipeline.
//!
//! The 12 steps of a run are grouped into four phases of three consecutive
//! steps each. The phase is always a pure function of the current step
//! number; nothing else in the engine is allowed to set it directly.

use serde::{Deserialize, Serialize};

/// Number of steps in a full calendar generation run.
pub const TOTAL_STEPS: u32 = 12;

/// The phase a pipeline run is in, derived from the current step number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Before step 1 has started.
    Initialization,
    /// Steps 1-3: strategy analysis, gap analysis, audience/platform work.
    Foundation,
    /// Steps 4-6: calendar framework, pillar distribution, platform plans.
    Structure,
    /// Steps 7-9: weekly themes, daily planning, recommendations.
    Content,
    /// Steps 10-12: performance tuning, validation, final assembly.
    Optimization,
    /// Step numbers outside the 0..=12 range.
    Unknown,
}

impl Phase {
    /// Derive the phase for a step number.
    ///
    /// Step 0 is the pre-run state; anything above [`TOTAL_STEPS`] is
    /// unknown rather than an error so that callers inspecting stale or
    /// foreign snapshots get a stable answer.
    pub fn for_step(step_number: u32) -> Self {
        match step_number {
            0 => Phase::Initialization,
            1..=3 => Phase::Foundation,
            4..=6 => Phase::Structure,
            7..=9 => Phase::Content,
            10..=12 => Phase::Optimization,
            _ => Phase::Unknown,
        }
    }

    /// Stable lowercase name, matching the serialized form.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Initialization => "initialization",
            Phase::Foundation => "foundation",
            Phase::Structure => "structure",
            Phase::Content => "content",
            Phase::Optimization => "optimization",
            Phase::Unknown => "unknown",
        }
    }

    /// Human-readable description of what the phase produces.
    pub fn description(&self) -> &'static str {
        match self {
            Phase::Initialization => "Run is being initialized",
            Phase::Foundation => "Analyze strategy, gaps, and audience",
            Phase::Structure => "Build the calendar framework and pillars",
            Phase::Content => "Develop themes, daily plans, and recommendations",
            Phase::Optimization => "Tune, validate, and assemble the calendar",
            Phase::Unknown => "Outside the known step range",
        }
    }

    /// The inclusive step range covered by this phase, if it maps to one.
    pub fn step_range(&self) -> Option<(u32, u32)> {
        match self {
            Phase::Foundation => Some((1, 3)),
            Phase::Structure => Some((4, 6)),
            Phase::Content => Some((7, 9)),
            Phase::Optimization => Some((10, 12)),
            Phase::Initialization | Phase::Unknown => None,
        }
    }
}

/// Canonical key for a step's slot in context maps (e.g. `step_07`).
pub fn step_key(step_number: u32) -> String {
    format!("step_{:02}", step_number)
}
