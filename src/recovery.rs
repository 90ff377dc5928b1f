//! Error classification, recovery strategies, and fallback synthesis.
//!
//! The [`ErrorHandler`] turns raw failures into structured responses the
//! caller can act on: a classified error type, a recovery strategy from a
//! static (but extensible) table, and, for step failures, a placeholder
//! fallback result shaped to match the failing step's phase. The
//! orchestrator runs fail-fast, so strategies and fallbacks are surfaced
//! but never applied to a running pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::EngineConfig;
use crate::phase::Phase;
use crate::util::RingBuffer;

/// Mutually exclusive error classification, by first-match substring.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ErrorKind {
    #[serde(rename = "step_execution_error")]
    StepExecution,
    #[serde(rename = "context_error")]
    Context,
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "ai_service_error")]
    AiService,
    #[serde(rename = "data_error")]
    Data,
    #[serde(rename = "timeout_error")]
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StepExecution => "step_execution_error",
            ErrorKind::Context => "context_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::AiService => "ai_service_error",
            ErrorKind::Data => "data_error",
            ErrorKind::Timeout => "timeout_error",
        }
    }
}

/// How bad a classified error is for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Retry/backoff/fallback policy for one error kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryStrategy {
    pub retry_count: u32,
    /// Delay between retries, seconds.
    pub retry_delay: f64,
    /// Name of the fallback-generation strategy a recovering caller would use.
    pub fallback_strategy: String,
    pub severity: Severity,
}

/// One recorded failure, kept in a bounded process-lifetime history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    /// Flattened source chain, the closest thing to a traceback.
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: i64,
    pub strategy_id: Option<i64>,
}

/// Structured failure response returned to the caller of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error_type: ErrorKind,
    pub error_message: String,
    pub error_details: String,
    pub recovery_strategy: RecoveryStrategy,
    pub timestamp: DateTime<Utc>,
    pub user_id: i64,
    pub strategy_id: Option<i64>,
}

/// Classified step failure with a phase-shaped fallback payload.
///
/// The fallback is available to the caller; the orchestrator's fail-fast
/// policy never substitutes it into the running pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_name: String,
    pub step_number: u32,
    pub error_type: ErrorKind,
    pub error_message: String,
    pub fallback_result: Value,
    pub recovery_strategy: RecoveryStrategy,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate error accounting.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStatistics {
    pub total: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub recent: Vec<ErrorRecord>,
}

/// Classifies failures and produces structured responses and fallbacks.
pub struct ErrorHandler {
    patterns: Vec<(String, ErrorKind)>,
    strategies: BTreeMap<ErrorKind, RecoveryStrategy>,
    history: RingBuffer<ErrorRecord>,
    total: u64,
    by_kind: BTreeMap<ErrorKind, u64>,
}

impl ErrorHandler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            patterns: default_patterns(),
            strategies: default_strategies(),
            history: RingBuffer::new(config.error_history_cap),
            total: 0,
            by_kind: BTreeMap::new(),
        }
    }

    /// Classify a message by lowercased first-match substring.
    ///
    /// Unmatched messages fall through to the catch-all
    /// [`ErrorKind::StepExecution`].
    pub fn classify(&self, message: &str) -> ErrorKind {
        let lowered = message.to_lowercase();
        self.patterns
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern.as_str()))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::StepExecution)
    }

    /// Register or replace the recovery strategy for an error kind.
    pub fn register_strategy(&mut self, kind: ErrorKind, strategy: RecoveryStrategy) {
        self.strategies.insert(kind, strategy);
    }

    /// The strategy currently registered for a kind.
    pub fn strategy_for(&self, kind: ErrorKind) -> &RecoveryStrategy {
        self.strategies
            .get(&kind)
            .unwrap_or_else(|| &self.strategies[&ErrorKind::StepExecution])
    }

    /// Record a failure and build the structured response for the caller.
    pub fn handle_error(
        &mut self,
        error: &(dyn std::error::Error + 'static),
        user_id: i64,
        strategy_id: Option<i64>,
    ) -> ErrorResponse {
        let message = error.to_string();
        let detail = source_chain(error);
        let kind = self.classify(&message);
        self.record(kind, &message, &detail, user_id, strategy_id);

        ErrorResponse {
            status: "error".to_string(),
            error_type: kind,
            error_message: message,
            error_details: detail,
            recovery_strategy: self.strategy_for(kind).clone(),
            timestamp: Utc::now(),
            user_id,
            strategy_id,
        }
    }

    /// Record a step failure and synthesize its phase-shaped fallback.
    pub fn handle_step_error(
        &mut self,
        step_name: &str,
        step_number: u32,
        error: &(dyn std::error::Error + 'static),
        user_id: i64,
        strategy_id: Option<i64>,
    ) -> StepFailure {
        let message = error.to_string();
        let detail = source_chain(error);
        let kind = self.classify(&message);
        self.record(kind, &message, &detail, user_id, strategy_id);

        let phase = Phase::for_step(step_number);
        let fallback_result = fallback_result(phase);
        debug!(
            step = step_name,
            number = step_number,
            kind = kind.as_str(),
            phase = phase.name(),
            "synthesized fallback for failed step"
        );

        StepFailure {
            step_name: step_name.to_string(),
            step_number,
            error_type: kind,
            error_message: message,
            fallback_result,
            recovery_strategy: self.strategy_for(kind).clone(),
            timestamp: Utc::now(),
        }
    }

    /// Total count, per-kind counts, and the ten most recent records.
    pub fn statistics(&self) -> ErrorStatistics {
        let recent: Vec<ErrorRecord> = {
            let skip = self.history.len().saturating_sub(10);
            self.history.iter().skip(skip).cloned().collect()
        };
        ErrorStatistics {
            total: self.total,
            by_kind: self.by_kind.clone(),
            recent,
        }
    }

    /// Number of retained error records.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn record(
        &mut self,
        kind: ErrorKind,
        message: &str,
        detail: &str,
        user_id: i64,
        strategy_id: Option<i64>,
    ) {
        self.total += 1;
        *self.by_kind.entry(kind).or_insert(0) += 1;
        self.history.push(ErrorRecord {
            kind,
            message: message.to_string(),
            detail: detail.to_string(),
            timestamp: Utc::now(),
            user_id,
            strategy_id,
        });
    }
}

/// Flatten an error's source chain into one line.
fn source_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(" -> ")
}

/// Ordered classification table; the first matching substring wins.
///
/// More specific phrases come before broader ones so that, for example,
/// "context validation failed" classifies as a validation error.
fn default_patterns() -> Vec<(String, ErrorKind)> {
    [
        ("timed out", ErrorKind::Timeout),
        ("timeout", ErrorKind::Timeout),
        ("rate limit", ErrorKind::AiService),
        ("quota", ErrorKind::AiService),
        ("ai service", ErrorKind::AiService),
        ("api", ErrorKind::AiService),
        ("validation", ErrorKind::Validation),
        ("invalid", ErrorKind::Validation),
        ("context", ErrorKind::Context),
        ("data", ErrorKind::Data),
        ("fetch", ErrorKind::Data),
    ]
    .into_iter()
    .map(|(pattern, kind)| (pattern.to_string(), kind))
    .collect()
}

fn default_strategies() -> BTreeMap<ErrorKind, RecoveryStrategy> {
    let mut strategies = BTreeMap::new();
    strategies.insert(
        ErrorKind::StepExecution,
        RecoveryStrategy {
            retry_count: 2,
            retry_delay: 1.0,
            fallback_strategy: "regenerate_step".to_string(),
            severity: Severity::Medium,
        },
    );
    strategies.insert(
        ErrorKind::Context,
        RecoveryStrategy {
            retry_count: 1,
            retry_delay: 0.5,
            fallback_strategy: "rebuild_context".to_string(),
            severity: Severity::Critical,
        },
    );
    strategies.insert(
        ErrorKind::Validation,
        RecoveryStrategy {
            retry_count: 2,
            retry_delay: 0.5,
            fallback_strategy: "regenerate_with_feedback".to_string(),
            severity: Severity::Medium,
        },
    );
    strategies.insert(
        ErrorKind::AiService,
        RecoveryStrategy {
            retry_count: 3,
            retry_delay: 5.0,
            fallback_strategy: "switch_provider".to_string(),
            severity: Severity::High,
        },
    );
    strategies.insert(
        ErrorKind::Data,
        RecoveryStrategy {
            retry_count: 2,
            retry_delay: 2.0,
            fallback_strategy: "use_cached_data".to_string(),
            severity: Severity::Medium,
        },
    );
    strategies.insert(
        ErrorKind::Timeout,
        RecoveryStrategy {
            retry_count: 1,
            retry_delay: 10.0,
            fallback_strategy: "simplify_request".to_string(),
            severity: Severity::High,
        },
    );
    strategies
}

/// Placeholder result shaped to match the failing step's phase, so
/// downstream consumers always have the fields they expect.
pub fn fallback_result(phase: Phase) -> Value {
    match phase {
        Phase::Foundation => json!({
            "insights": ["Analysis unavailable; placeholder pending regeneration"],
            "recommendations": ["Re-run this step once the underlying service recovers"],
            "analysis": {"summary": "fallback", "status": "fallback"},
        }),
        Phase::Structure => json!({
            "structure_data": {},
            "framework_data": {},
            "timeline_data": {},
        }),
        Phase::Content => json!({
            "content_items": [],
            "weekly_themes": [],
            "daily_schedule": [],
        }),
        Phase::Optimization => json!({
            "optimization_data": {},
            "performance_data": {},
            "validation_data": {},
        }),
        Phase::Initialization | Phase::Unknown => json!({}),
    }
}
