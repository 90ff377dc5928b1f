//! Step registry with dependency ordering and execution bookkeeping.
//!
//! The [`StepManager`] is the generic multi-step execution facility: it owns
//! named steps with declared dependencies, computes a dependency-respecting
//! execution order, and tracks per-step lifecycle counters. The 12-step
//! calendar hot path drives its harnesses directly in numeric order; this
//! registry serves ordering and observability for everything else.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::PipelineContext;
use crate::errors::RegistryError;
use crate::phase::step_key;
use crate::step::{Step, StepHarness, StepOutcome, StepStatus};

/// Aggregated per-step execution statistics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepStatistics {
    pub executions: u64,
    pub successes: u64,
    pub errors: u64,
    pub success_rate: f64,
    pub average_time: f64,
}

struct RegisteredStep {
    harness: StepHarness,
    dependencies: Vec<String>,
    executions: u64,
    successes: u64,
    errors: u64,
    total_time: f64,
}

/// Registry of steps keyed by name, in registration order.
#[derive(Default)]
pub struct StepManager {
    entries: Vec<RegisteredStep>,
    index: HashMap<String, usize>,
}

impl StepManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step with its declared dependency names.
    ///
    /// Dependencies are validated lazily by [`Self::execution_order`], so
    /// steps may be registered in any order.
    pub fn register(
        &mut self,
        step: Box<dyn Step>,
        dependencies: Vec<String>,
    ) -> Result<(), RegistryError> {
        let name = step.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateStep { name });
        }
        self.index.insert(name, self.entries.len());
        self.entries.push(RegisteredStep {
            harness: StepHarness::new(step),
            dependencies,
            executions: 0,
            successes: 0,
            errors: 0,
            total_time: 0.0,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Compute a dependency-respecting execution order.
    ///
    /// Depth-first search with a "currently visiting" set: revisiting a step
    /// that is still on the stack means a cycle, and a dependency on an
    /// unregistered name is a hard error.
    pub fn execution_order(&self) -> Result<Vec<String>, RegistryError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }

        fn visit(
            idx: usize,
            entries: &[RegisteredStep],
            index: &HashMap<String, usize>,
            marks: &mut [Mark],
            order: &mut Vec<String>,
        ) -> Result<(), RegistryError> {
            match marks[idx] {
                Mark::Done => return Ok(()),
                Mark::Visiting => {
                    return Err(RegistryError::CircularDependency {
                        step: entries[idx].harness.name().to_string(),
                    });
                }
                Mark::Unvisited => {}
            }
            marks[idx] = Mark::Visiting;
            for dep in &entries[idx].dependencies {
                let dep_idx = *index.get(dep).ok_or_else(|| RegistryError::UnknownDependency {
                    step: entries[idx].harness.name().to_string(),
                    dependency: dep.clone(),
                })?;
                visit(dep_idx, entries, index, marks, order)?;
            }
            marks[idx] = Mark::Done;
            order.push(entries[idx].harness.name().to_string());
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.entries.len()];
        let mut order = Vec::with_capacity(self.entries.len());
        for idx in 0..self.entries.len() {
            visit(idx, &self.entries, &self.index, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    /// Execute one step by name and update its lifecycle counters.
    ///
    /// Execution errors do not surface as `Err` here: the harness normalizes
    /// them into the outcome's status, and the counters record them. Only an
    /// unknown name is a hard error.
    pub async fn execute_step(
        &mut self,
        name: &str,
        context: &PipelineContext,
        config: &EngineConfig,
    ) -> Result<StepOutcome, RegistryError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStep {
                name: name.to_string(),
            })?;
        let entry = &mut self.entries[idx];

        let outcome = entry.harness.run(context, config).await;
        entry.executions += 1;
        entry.total_time += outcome.execution_time;
        match outcome.status {
            StepStatus::Completed => entry.successes += 1,
            StepStatus::Failed | StepStatus::Error => entry.errors += 1,
            StepStatus::Pending | StepStatus::Running => {}
        }
        debug!(
            step = name,
            status = ?outcome.status,
            execution_time = outcome.execution_time,
            "step executed"
        );
        Ok(outcome)
    }

    /// Execute the named steps in the given order, folding each outcome into
    /// the context as it completes so later steps can read earlier results.
    pub async fn execute_steps_in_order(
        &mut self,
        context: &mut PipelineContext,
        names: &[String],
        config: &EngineConfig,
    ) -> Result<Vec<StepOutcome>, RegistryError> {
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.execute_step(name, context, config).await?;
            let key = step_key(outcome.step_number);
            context.current_step = context.current_step.max(outcome.step_number);
            context
                .quality_scores
                .insert(key.clone(), outcome.quality_score);
            context.step_results.insert(key, outcome.clone());
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Per-step success rate and average execution time.
    pub fn statistics(&self) -> BTreeMap<String, StepStatistics> {
        self.entries
            .iter()
            .map(|entry| {
                let executions = entry.executions;
                let stats = StepStatistics {
                    executions,
                    successes: entry.successes,
                    errors: entry.errors,
                    success_rate: if executions == 0 {
                        0.0
                    } else {
                        entry.successes as f64 / executions as f64
                    },
                    average_time: if executions == 0 {
                        0.0
                    } else {
                        entry.total_time / executions as f64
                    },
                };
                (entry.harness.name().to_string(), stats)
            })
            .collect()
    }

    /// Reset every harness back to pending and zero the counters.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.harness.reset();
            entry.executions = 0;
            entry.successes = 0;
            entry.errors = 0;
            entry.total_time = 0.0;
        }
    }

    /// Validate a prompt template exists for a registered step.
    pub fn prompt_template(&self, name: &str) -> Result<String, RegistryError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStep {
                name: name.to_string(),
            })?;
        Ok(self.entries[idx].harness.prompt_template())
    }

    /// Run a payload through a registered step's validator.
    pub fn validate_result(&self, name: &str, result: &Value) -> Result<bool, RegistryError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStep {
                name: name.to_string(),
            })?;
        Ok(self.entries[idx].harness.validate(result))
    }
}
