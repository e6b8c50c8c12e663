//! End-to-end orchestration tests.
//!
//! Drive whole runs through the public API with mock completion backends and
//! mock task executors: heuristic fallback, retry along a dependency chain,
//! the parallelism bound, routing, stuck detection and config loading.

use async_trait::async_trait;
use maestro_agent::{CompletionBackend, CompletionClient};
use maestro_core::{MaestroError, MaestroResult, Message};
use maestro_orchestrator::*;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

const ANSWER: &str = "Tokio is the most widely used async runtime for Rust and it \
supports multi-threaded scheduling. See https://tokio.rs for the documentation.\n\
Next step: benchmark the runtimes under load";

/// Fails the first `failures` calls, then answers with [`ANSWER`].
struct FailingThenOk {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionBackend for FailingThenOk {
    async fn complete(&self, _messages: &[Message]) -> MaestroResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(MaestroError::Http("503 Service Unavailable".into()));
        }
        Ok(ANSWER.to_string())
    }
}

fn long_output(label: &str) -> TaskOutput {
    TaskOutput::success(
        format!(
            "{label}: a detailed write-up that is comfortably longer than the minimum \
             reasoning length, citing https://example.com/{label}."
        ),
        0.9,
    )
}

/// Fails each description a configured number of times, records the order
/// in which attempts start.
#[derive(Default)]
struct ScriptedExecutor {
    failures: HashMap<String, usize>,
    attempts: parking_lot::Mutex<HashMap<String, usize>>,
    started: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task: &Task, _agent: &Agent) -> MaestroResult<TaskOutput> {
        self.started.lock().push(task.description.clone());
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = attempts.entry(task.description.clone()).or_default();
            *n += 1;
            *n
        };
        let allowed = self.failures.get(&task.description).copied().unwrap_or(0);
        if attempt <= allowed {
            return Err(MaestroError::Transient(format!(
                "{} attempt {attempt} failed",
                task.description
            )));
        }
        Ok(long_output(&task.description))
    }
}

/// Tracks how many executions overlap.
#[derive(Default)]
struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl TaskExecutor for ConcurrencyProbe {
    async fn execute(&self, task: &Task, _agent: &Agent) -> MaestroResult<TaskOutput> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(long_output(&task.description))
    }
}

fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.retry.backoff_base_ms = 1;
    config.seed = Some(42);
    config
}

fn task(n: u128, kind: TaskKind, description: &str) -> Task {
    Task::new(Uuid::from_u128(n), kind, description)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_decomposition_falls_back_to_heuristic_plan() {
    let client = CompletionClient::from_backend(
        Arc::new(FailingThenOk {
            failures: 1,
            calls: AtomicUsize::new(0),
        }),
        Duration::from_secs(5),
    );
    let executor = AgentTaskExecutor::new(Some(client.clone()));
    let orch = Orchestrator::with_executor(fast_config(), Some(client), Arc::new(executor))
        .unwrap()
        .with_ids(Arc::new(SequentialIds::new()));

    let result = orch
        .orchestrate("Research async runtimes and write a summary")
        .await
        .unwrap();

    let tasks = orch.tasks().await;
    assert!(tasks.iter().any(|t| t.kind == TaskKind::Research));
    assert!(tasks.iter().any(|t| t.kind == TaskKind::Finalize));
    assert!(tasks
        .iter()
        .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed)));
    assert!(result.success);
    assert!(!result.content.is_empty());
    assert!(!result.summary.is_empty());
}

#[tokio::test]
async fn test_chain_retries_middle_task_then_completes() {
    let executor = Arc::new(ScriptedExecutor {
        failures: HashMap::from([("B".to_string(), 2)]),
        ..ScriptedExecutor::default()
    });
    let mut config = fast_config();
    config.retry.max_retries = Some(3);
    let orch = Orchestrator::with_executor(config, None, executor.clone()).unwrap();
    let mut events = orch.subscribe();

    let a = task(1, TaskKind::Analyze, "A");
    let b = task(2, TaskKind::Analyze, "B").with_dependencies(vec![a.id]);
    let c = task(3, TaskKind::Analyze, "C").with_dependencies(vec![b.id]);
    let (b_id, c_id) = (b.id, c.id);
    let result = orch.execute_tasks("chain", vec![a, b, c]).await.unwrap();

    assert_eq!(result.status, PlanStatus::Completed);
    let tasks = orch.tasks().await;
    let b_done = tasks.iter().find(|t| t.id == b_id).unwrap();
    assert_eq!(b_done.retry_count, 2);
    assert_eq!(b_done.status, TaskStatus::Completed);
    assert_eq!(
        *executor.started.lock(),
        vec!["A", "B", "B", "B", "C"]
    );

    let mut b_completed_at = None;
    let mut c_started_at = None;
    let mut i = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            OrchestratorEvent::TaskCompleted { task_id, .. } if task_id == b_id => {
                b_completed_at = Some(i);
            }
            OrchestratorEvent::TaskStarted { task_id, .. } if task_id == c_id => {
                c_started_at.get_or_insert(i);
            }
            _ => {}
        }
        i += 1;
    }
    assert!(b_completed_at.unwrap() < c_started_at.unwrap());
    assert_eq!(orch.stats().total_retries, 2);
}

#[tokio::test]
async fn test_parallel_phase_respects_bound() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let mut config = fast_config();
    config.max_parallel_tasks = 2;
    let orch = Orchestrator::with_executor(config, None, probe.clone()).unwrap();

    let tasks: Vec<Task> = (1..=6)
        .map(|n| task(n, TaskKind::Research, &format!("topic-{n}")))
        .collect();
    let result = orch.execute_tasks("fan out", tasks).await.unwrap();

    assert_eq!(result.status, PlanStatus::Completed);
    assert_eq!(result.completed_tasks, 6);
    let plan = orch.current_plan().await.unwrap();
    assert_eq!(plan.phases.len(), 1);
    assert!(plan.phases[0].parallel);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_routing_prefers_higher_success_rate() {
    let agent = |id: &str, rate: f64| {
        let mut agent = default_agent(AgentKind::Research);
        agent.id = id.to_string();
        agent.metrics.success_rate = rate;
        agent
    };
    let orch = Orchestrator::with_executor(
        fast_config(),
        None,
        Arc::new(ScriptedExecutor::default()),
    )
    .unwrap()
    .with_agents(vec![agent("research-low", 0.6), agent("research-high", 0.9)]);

    orch.execute_tasks("route", vec![task(1, TaskKind::Research, "R")])
        .await
        .unwrap();
    let tasks = orch.tasks().await;
    assert_eq!(tasks[0].assigned_agent.as_deref(), Some("research-high"));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_detection_needs_two_checks_past_threshold() {
    let mut detector = StuckDetector::new(Duration::from_millis(1_000));
    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert_eq!(detector.check(), StuckCheck::Healthy);
    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(matches!(detector.check(), StuckCheck::Suspected { .. }));
    assert!(matches!(detector.check(), StuckCheck::Stuck { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_autonomous_steps_without_progress_are_skipped() {
    struct Silent;

    #[async_trait]
    impl StepExecutor for Silent {
        async fn execute(&self, _step: &PlanStep, _ctx: &StepContext) -> MaestroResult<String> {
            std::future::pending().await
        }
    }

    let planner =
        AutonomousPlanner::new(PlannerConfig::standard(), None).with_executor(Arc::new(Silent));
    let run = planner.run("document the API").await.unwrap();
    assert_eq!(run.skipped, 3);
    assert_eq!(run.failed, 0);
    assert!(run
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Skipped && s.attempts == 2));
}

#[test]
fn test_config_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "max_parallel_tasks = 5\nstrict_dependencies = true\n\n[retry]\nbackoff_base_ms = 250\n\n[validation]\nthreshold = 0.75"
    )
    .unwrap();
    let config = OrchestratorConfig::load(file.path()).unwrap();
    assert_eq!(config.max_parallel_tasks, 5);
    assert!(config.strict_dependencies);
    assert_eq!(config.retry.backoff_base_ms, 250);
    assert!((config.validation.threshold - 0.75).abs() < 1e-9);
    assert_eq!(config.retry.max_alternative_attempts, 2);
}
