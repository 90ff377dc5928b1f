//! AI-powered content calendar orchestration engine.
//!
//! The engine sequences 12 opaque steps through four phases (foundation,
//! structure, content, optimization), threading a single shared context
//! through them, tracking progress and quality, and normalizing failures
//! into structured responses. Concrete step implementations and AI-service
//! wrappers live outside this crate and plug in through the [`step::Step`]
//! trait and [`services::Dependencies`].

pub mod config;
pub mod context;
pub mod errors;
pub mod manager;
pub mod orchestrator;
pub mod phase;
pub mod progress;
pub mod recovery;
pub mod services;
pub mod step;
pub mod ui;
pub mod util;

pub use config::EngineConfig;
pub use context::{ContextManager, ContextSeed, PipelineContext, StepView};
pub use errors::{ContextError, PipelineError, RegistryError};
pub use manager::{StepManager, StepStatistics};
pub use orchestrator::{CalendarOrchestrator, CalendarRequest, CalendarResult, RunState};
pub use phase::{Phase, TOTAL_STEPS, step_key};
pub use progress::{ProgressCallback, ProgressSnapshot, ProgressTracker, RunStatus};
pub use recovery::{ErrorHandler, ErrorKind, ErrorResponse, RecoveryStrategy, StepFailure};
pub use services::{Dependencies, UserDataFetcher};
pub use step::{Step, StepHarness, StepOutcome, StepStatus};
