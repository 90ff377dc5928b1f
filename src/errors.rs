//! Typed error hierarchy for the cadence engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `PipelineError` — failures that abort a calendar generation run
//! - `ContextError` — context validation, import, and update failures
//! - `RegistryError` — step registration and ordering failures

use thiserror::Error;

/// Errors that abort a pipeline run.
///
/// The per-step loop returns `Result<StepOutcome, PipelineError>`; the
/// orchestrator converts any variant into a structured error response
/// before it reaches the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Step {step_number} ({step_name}) failed during execution: {message}")]
    StepFailed {
        step_name: String,
        step_number: u32,
        message: String,
    },

    #[error("Step {step_number} ({step_name}) produced a result that failed validation")]
    ValidationRejected { step_name: String, step_number: u32 },

    #[error("No step registered for step number {step_number}")]
    MissingStep { step_number: u32 },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors from the shared pipeline context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context field '{field}' is invalid: {message}")]
    InvalidField { field: String, message: String },

    #[error("Context has not been initialized")]
    NotInitialized,

    #[error("Failed to serialize context: {0}")]
    Export(#[source] serde_json::Error),

    #[error("Failed to parse imported context: {0}")]
    Import(#[source] serde_json::Error),
}

/// Errors from the step registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown step: {name}")]
    UnknownStep { name: String },

    #[error("Duplicate step registration: {name}")]
    DuplicateStep { name: String },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Circular dependency detected involving step '{step}'")]
    CircularDependency { step: String },
}
