//! Integration tests for the cadence engine.
//!
//! These drive full 12-step calendar generation runs with scripted steps
//! and verify the engine's sequencing, fail-fast, and reporting behavior
//! end to end.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use cadence::{
    CalendarOrchestrator, CalendarRequest, Dependencies, EngineConfig, ErrorKind, PipelineContext,
    ProgressCallback, ProgressSnapshot, RunState, Step, UserDataFetcher,
};

/// What a scripted step does when executed.
#[derive(Clone)]
enum Script {
    /// Return this payload and pass validation.
    Succeed(Value),
    /// Raise from `execute` with this message.
    RaiseError(String),
    /// Return this payload but fail validation.
    InvalidResult(Value),
}

struct ScriptedStep {
    name: &'static str,
    number: u32,
    script: Script,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> &str {
        self.name
    }

    fn step_number(&self) -> u32 {
        self.number
    }

    async fn execute(&self, _context: &PipelineContext) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Succeed(payload) | Script::InvalidResult(payload) => Ok(payload.clone()),
            Script::RaiseError(message) => anyhow::bail!("{message}"),
        }
    }

    fn validate_result(&self, _result: &Value) -> bool {
        !matches!(self.script, Script::InvalidResult(_))
    }

    fn prompt_template(&self) -> String {
        format!("Produce the {} section of the calendar", self.name)
    }
}

const STEP_NAMES: [&str; 12] = [
    "content_strategy_analysis",
    "gap_analysis",
    "audience_platform_strategy",
    "calendar_framework",
    "content_pillar_distribution",
    "platform_strategy",
    "weekly_theme_development",
    "daily_content_planning",
    "content_recommendations",
    "performance_optimization",
    "strategy_alignment_validation",
    "final_calendar_assembly",
];

/// Realistic per-step payloads carrying the fields the final assembly
/// projects out.
fn payload_for(number: u32) -> Value {
    match number {
        1 => json!({"analysis": {"summary": "strategy favors education"}, "insights": ["two pillars dominate"]}),
        2 => json!({"insights": ["no video content"], "recommendations": ["add short-form video"]}),
        3 => json!({"audience": {"primary": "smb owners"}, "platforms": ["linkedin", "newsletter"]}),
        4 => json!({"framework_data": {"duration_weeks": 4}, "timeline_data": {"start": "monday"}}),
        5 => json!({"content_pillars": [{"name": "education", "share": 0.5}, {"name": "social_proof", "share": 0.5}]}),
        6 => json!({"platform_strategies": {"linkedin": {"cadence": "3x week"}}}),
        7 => json!({"weekly_themes": [{"week": 1, "theme": "foundations"}]}),
        8 => json!({"daily_schedule": [{"day": 1, "title": "Kickoff post"}]}),
        9 => json!({"recommendations": ["repurpose top posts", "batch record video"]}),
        10 => json!({"optimizations": {"posting_times": ["09:00"]}}),
        11 => json!({"validation": {"aligned": true}}),
        12 => json!({"calendar": {"status": "assembled"}}),
        _ => json!({}),
    }
}

/// All 12 steps scripted to succeed, except any overridden by `overrides`.
fn scripted_steps(
    overrides: &[(u32, Script)],
) -> (Vec<Box<dyn Step>>, Vec<Arc<AtomicU32>>) {
    let mut counters = Vec::new();
    let steps = (1..=12u32)
        .map(|number| {
            let script = overrides
                .iter()
                .find(|(n, _)| *n == number)
                .map(|(_, script)| script.clone())
                .unwrap_or_else(|| Script::Succeed(payload_for(number)));
            let calls = Arc::new(AtomicU32::new(0));
            counters.push(Arc::clone(&calls));
            Box::new(ScriptedStep {
                name: STEP_NAMES[(number - 1) as usize],
                number,
                script,
                calls,
            }) as Box<dyn Step>
        })
        .collect();
    (steps, counters)
}

struct StubFetcher {
    fail: bool,
}

#[async_trait]
impl UserDataFetcher for StubFetcher {
    async fn fetch_comprehensive(
        &self,
        _user_id: i64,
        _strategy_id: Option<i64>,
    ) -> anyhow::Result<Map<String, Value>> {
        if self.fail {
            anyhow::bail!("upstream aggregator unavailable");
        }
        let data = json!({
            "industry": "fintech",
            "onboarding_data": {"persona": "cfo"},
            "strategy_data": {"pillars": ["education"]},
            "gap_analysis": {"gaps": ["video"]},
            "ai_analysis": {"summary": "ok"},
            "performance_data": {"ctr": 0.04},
            "competitor_data": {"count": 3},
        });
        match data {
            Value::Object(map) => Ok(map),
            _ => unreachable!(),
        }
    }
}

/// Install a test subscriber once so engine traces surface under
/// `RUST_LOG=debug` runs; later calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn deps() -> Dependencies {
    init_tracing();
    Dependencies::new(Arc::new(StubFetcher { fail: false }))
}

fn request() -> CalendarRequest {
    CalendarRequest {
        user_id: 42,
        strategy_id: Some(7),
        calendar_type: "monthly".into(),
        industry: "fintech".into(),
        business_size: "smb".into(),
    }
}

fn snapshot_sink() -> (ProgressCallback, Arc<Mutex<Vec<ProgressSnapshot>>>) {
    let seen: Arc<Mutex<Vec<ProgressSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |snapshot| {
        sink.lock().unwrap().push(snapshot.clone());
        Ok(())
    });
    (callback, seen)
}

// =============================================================================
// Scenario A: all steps succeed
// =============================================================================

mod full_run {
    use super::*;

    #[tokio::test]
    async fn test_successful_run_completes_with_quality() {
        let (steps, _) = scripted_steps(&[]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();

        let result = orchestrator
            .generate_calendar(request(), None)
            .await
            .unwrap();

        assert_eq!(result.status, "completed");
        assert!(result.overall_quality_score > 0.0);
        assert_eq!(result.quality_scores.len(), 12);
        assert_eq!(orchestrator.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_assembly_projects_fields_from_specific_steps() {
        let (steps, _) = scripted_steps(&[]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();

        let result = orchestrator
            .generate_calendar(request(), None)
            .await
            .unwrap();

        assert_eq!(result.weekly_themes[0]["theme"], "foundations");
        assert_eq!(result.daily_schedule[0]["title"], "Kickoff post");
        assert_eq!(result.content_pillars[0]["name"], "education");
        assert_eq!(
            result.platform_strategies["linkedin"]["cadence"],
            "3x week"
        );
        assert_eq!(result.content_recommendations[0], "repurpose top posts");
        assert_eq!(result.optimization_insights["posting_times"][0], "09:00");
        assert_eq!(result.validation_summary["aligned"], true);
        assert!(result.processing_time >= 0.0);
        assert_eq!(result.framework_version, "2.0");
    }

    #[tokio::test]
    async fn test_every_step_executes_exactly_once() {
        let (steps, counters) = scripted_steps(&[]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();

        orchestrator
            .generate_calendar(request(), None)
            .await
            .unwrap();

        for (idx, counter) in counters.iter().enumerate() {
            assert_eq!(
                counter.load(Ordering::SeqCst),
                1,
                "step {} should run exactly once",
                idx + 1
            );
        }
    }

    #[tokio::test]
    async fn test_progress_callback_sees_monotonic_progress() {
        let (steps, _) = scripted_steps(&[]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();
        let (callback, seen) = snapshot_sink();

        orchestrator
            .generate_calendar(request(), Some(callback))
            .await
            .unwrap();

        let snapshots = seen.lock().unwrap();
        assert_eq!(snapshots.len(), 12);
        let mut last = 0.0;
        for snapshot in snapshots.iter() {
            assert!(snapshot.percentage >= last);
            last = snapshot.percentage;
        }
        assert_eq!(snapshots.last().unwrap().percentage, 100.0);
        assert_eq!(snapshots.last().unwrap().completed_steps, 12);
    }

    #[tokio::test]
    async fn test_user_data_fetch_failure_is_non_fatal() {
        let (steps, _) = scripted_steps(&[]);
        let deps = Dependencies::new(Arc::new(StubFetcher { fail: true }));
        let mut orchestrator = CalendarOrchestrator::new(deps, steps).unwrap();

        let result = orchestrator
            .generate_calendar(request(), None)
            .await
            .unwrap();

        // Run completed against the empty-shaped fallback data
        assert_eq!(result.status, "completed");
        let context = orchestrator.context().current().unwrap();
        assert!(context.user_data.contains_key("strategy_data"));
        assert_eq!(context.user_data["industry"], "");
    }

    #[tokio::test]
    async fn test_broken_progress_callback_does_not_abort_run() {
        let (steps, _) = scripted_steps(&[]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();
        let callback: ProgressCallback = Arc::new(|_| anyhow::bail!("UI disconnected"));

        let result = orchestrator
            .generate_calendar(request(), Some(callback))
            .await
            .unwrap();

        assert_eq!(result.status, "completed");
    }
}

// =============================================================================
// Scenario B: step 5 raises inside execute
// =============================================================================

mod fail_fast {
    use super::*;

    #[tokio::test]
    async fn test_step_error_aborts_run_before_later_steps() {
        let (steps, counters) = scripted_steps(&[(
            5,
            Script::RaiseError("AI service rate limit exceeded".into()),
        )]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();

        let response = orchestrator
            .generate_calendar(request(), None)
            .await
            .unwrap_err();

        assert_eq!(response.status, "error");
        assert_eq!(response.error_type, ErrorKind::AiService);
        assert!(response.error_message.contains("rate limit exceeded"));
        assert_eq!(response.user_id, 42);
        assert_eq!(orchestrator.state(), RunState::Failed);

        // Steps 1-5 ran once; 6-12 never started
        for (idx, counter) in counters.iter().enumerate() {
            let expected = if idx < 5 { 1 } else { 0 };
            assert_eq!(
                counter.load(Ordering::SeqCst),
                expected,
                "unexpected call count for step {}",
                idx + 1
            );
        }
    }

    #[tokio::test]
    async fn test_fallback_is_synthesized_but_not_substituted() {
        let (steps, _) = scripted_steps(&[(5, Script::RaiseError("boom".into()))]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();

        orchestrator
            .generate_calendar(request(), None)
            .await
            .unwrap_err();

        // Step 5 is a structure-phase step: fallback has the structure shape
        let failure = orchestrator.last_step_failure().unwrap();
        assert_eq!(failure.step_number, 5);
        assert!(failure.fallback_result.get("structure_data").is_some());

        // The stored outcome for step 5 is the real error, not the fallback
        let context = orchestrator.context().current().unwrap();
        let outcome = &context.step_results["step_05"];
        assert_eq!(outcome.result, Value::Null);
        assert!(outcome.error_message.is_some());
    }

    #[tokio::test]
    async fn test_validation_rejection_aborts_run() {
        let (steps, counters) =
            scripted_steps(&[(9, Script::InvalidResult(json!({"recommendations": []})))]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();

        let response = orchestrator
            .generate_calendar(request(), None)
            .await
            .unwrap_err();

        assert_eq!(response.error_type, ErrorKind::Validation);
        assert_eq!(counters[9].load(Ordering::SeqCst), 0, "step 10 must not run");
        assert_eq!(orchestrator.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_progress_reflects_partial_run_after_abort() {
        let (steps, _) = scripted_steps(&[(5, Script::RaiseError("boom".into()))]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();
        let (callback, seen) = snapshot_sink();

        orchestrator
            .generate_calendar(request(), Some(callback))
            .await
            .unwrap_err();

        let snapshots = seen.lock().unwrap();
        // Steps 1-4 completed, step 5 errored: five callback invocations
        assert_eq!(snapshots.len(), 5);
        let last = snapshots.last().unwrap();
        assert_eq!(last.completed_steps, 4);
        assert_eq!(last.current_step, 5);
        assert!((last.percentage - 4.0 / 12.0 * 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_error_statistics_record_the_failure() {
        let (steps, _) = scripted_steps(&[(2, Script::RaiseError("failed to fetch data".into()))]);
        let mut orchestrator = CalendarOrchestrator::new(deps(), steps).unwrap();

        orchestrator
            .generate_calendar(request(), None)
            .await
            .unwrap_err();

        let stats = orchestrator.error_statistics();
        // Recorded once by the step-failure path and once at the top level
        assert!(stats.total >= 1);
        assert!(stats.by_kind.contains_key(&ErrorKind::Data));
    }
}

// =============================================================================
// Scenario C: context rollback
// =============================================================================

mod rollback {
    use super::*;
    use cadence::{ContextManager, ContextSeed, StepOutcome, StepStatus};
    use chrono::Utc;

    fn outcome(step_number: u32) -> StepOutcome {
        StepOutcome {
            step_name: STEP_NAMES[(step_number - 1) as usize].to_string(),
            step_number,
            status: StepStatus::Completed,
            execution_time: 0.3,
            quality_score: 0.9,
            validation_passed: true,
            timestamp: Utc::now(),
            result: payload_for(step_number),
            insights: Vec::new(),
            next_steps: Vec::new(),
            error_message: None,
        }
    }

    fn seeded_manager() -> ContextManager {
        let mut manager = ContextManager::new(&EngineConfig::default());
        manager
            .initialize(ContextSeed {
                user_id: 42,
                strategy_id: Some(7),
                calendar_type: "monthly".into(),
                industry: "fintech".into(),
                business_size: "smb".into(),
                user_data: Map::new(),
            })
            .unwrap();
        manager
    }

    #[test]
    fn test_rollback_two_of_three_updates() {
        let mut manager = seeded_manager();
        for n in 1..=3 {
            manager
                .update_context(&cadence::step_key(n), outcome(n))
                .unwrap();
        }

        assert!(manager.rollback(2));

        let context = manager.current().unwrap();
        assert_eq!(context.current_step, 1);
        assert_eq!(context.step_results.len(), 1);
        assert!(context.step_results.contains_key("step_01"));
        assert!(!context.step_results.contains_key("step_02"));
    }

    #[test]
    fn test_rollback_past_history_is_noop() {
        let mut manager = seeded_manager();
        manager
            .update_context(&cadence::step_key(1), outcome(1))
            .unwrap();

        // 2 history entries (initial + one update); 2 steps back is too far
        assert!(!manager.rollback(2));
        assert_eq!(manager.current().unwrap().current_step, 1);

        assert!(!manager.rollback(99));
        assert_eq!(manager.current().unwrap().current_step, 1);
    }
}
