use crate::stuck::{StuckCheck, StuckDetector};
use async_trait::async_trait;
use maestro_agent::{CompletionClient, StreamCallbacks};
use maestro_core::{MaestroError, MaestroResult, Message};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const PLANNING_PROMPT: &str = "\
You are an autonomous agent planning how to reach a goal on your own. \
Respond with ONLY a JSON array of steps, each \
{\"description\": string, \"alternatives\": [string]}. Keep steps concrete \
and in execution order.";

const STEP_PROMPT: &str = "\
You are an autonomous agent executing one step of a plan. Do exactly what \
the step asks, using earlier step results where useful. Answer with the \
step's result only.";

/// Timeout table for the single-agent planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(default = "default_planning_timeout_ms")]
    pub planning_timeout_ms: u64,
    /// Time without progress before a step counts as stuck.
    #[serde(default = "default_stuck_threshold_ms")]
    pub stuck_threshold_ms: u64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,
}

fn default_step_timeout_ms() -> u64 {
    60_000
}
fn default_planning_timeout_ms() -> u64 {
    30_000
}
fn default_stuck_threshold_ms() -> u64 {
    45_000
}
fn default_check_interval_ms() -> u64 {
    5_000
}
fn default_max_steps() -> usize {
    10
}
fn default_max_alternatives() -> usize {
    3
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl PlannerConfig {
    /// Interactive use: one-minute steps.
    pub fn standard() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            planning_timeout_ms: default_planning_timeout_ms(),
            stuck_threshold_ms: default_stuck_threshold_ms(),
            check_interval_ms: default_check_interval_ms(),
            max_steps: default_max_steps(),
            max_alternatives: default_max_alternatives(),
        }
    }

    /// Long-running work: five-minute steps and more patience.
    pub fn extended() -> Self {
        Self {
            step_timeout_ms: 300_000,
            planning_timeout_ms: 60_000,
            stuck_threshold_ms: 120_000,
            check_interval_ms: 15_000,
            max_steps: 20,
            max_alternatives: default_max_alternatives(),
        }
    }

    pub fn validate(&self) -> MaestroResult<()> {
        if self.step_timeout_ms == 0
            || self.planning_timeout_ms == 0
            || self.stuck_threshold_ms == 0
            || self.check_interval_ms == 0
        {
            return Err(MaestroError::Config("planner timeouts must be positive".into()));
        }
        if self.max_steps == 0 {
            return Err(MaestroError::Config("planner.max_steps must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub description: String,
    pub alternatives: Vec<String>,
    /// Alternative currently in use; `None` for the primary description.
    pub alternative_index: Option<usize>,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl PlanStep {
    pub fn new(index: usize, description: impl Into<String>, alternatives: Vec<String>) -> Self {
        Self {
            index,
            description: description.into(),
            alternatives,
            alternative_index: None,
            status: StepStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
        }
    }

    /// The description currently being attempted.
    pub fn current_description(&self) -> &str {
        self.alternative_index
            .and_then(|i| self.alternatives.get(i))
            .map(String::as_str)
            .unwrap_or(&self.description)
    }

    /// Move to the next unused alternative and reset to pending.
    pub fn switch_alternative(&mut self) -> bool {
        let next = self.alternative_index.map_or(0, |i| i + 1);
        if next >= self.alternatives.len() {
            return false;
        }
        self.alternative_index = Some(next);
        self.status = StepStatus::Pending;
        self.error = None;
        true
    }
}

/// Lets a running step signal that it is still making progress.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<String>,
}

impl ProgressReporter {
    pub fn report(&self, note: impl Into<String>) {
        let _ = self.tx.send(note.into());
    }
}

pub struct StepContext {
    pub goal: String,
    pub previous_results: Vec<String>,
    pub progress: ProgressReporter,
}

/// Executes one planner step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &PlanStep, ctx: &StepContext) -> MaestroResult<String>;
}

/// Runs steps through the completion service, streaming tokens so each
/// token counts as progress.
pub struct CompletionStepExecutor {
    client: CompletionClient,
}

impl CompletionStepExecutor {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepExecutor for CompletionStepExecutor {
    async fn execute(&self, step: &PlanStep, ctx: &StepContext) -> MaestroResult<String> {
        let mut prompt = format!("Goal: {}\n", ctx.goal);
        if !ctx.previous_results.is_empty() {
            prompt.push_str("\nPrevious step results:\n");
            for (i, result) in ctx.previous_results.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, result));
            }
        }
        prompt.push_str(&format!("\nCurrent step: {}", step.current_description()));

        let progress = ctx.progress.clone();
        let callbacks = StreamCallbacks::new().on_token(move |_| progress.report("token"));
        ctx.progress.report("request sent");
        self.client
            .stream(&[Message::system(STEP_PROMPT), Message::user(prompt)], callbacks)
            .await
    }
}

/// Summary of one autonomous run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomousRun {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success: bool,
    pub duration_ms: u64,
}

enum StepOutcome {
    Done(String),
    Failed(String),
    TimedOut,
    Stuck,
}

/// Single-agent planner: plan a goal into linear steps, then run each step
/// under a timeout while a [`StuckDetector`] watches for lost progress.
pub struct AutonomousPlanner {
    config: PlannerConfig,
    client: Option<CompletionClient>,
    executor: Option<Arc<dyn StepExecutor>>,
    cancelled: AtomicBool,
}

impl AutonomousPlanner {
    pub fn new(config: PlannerConfig, client: Option<CompletionClient>) -> Self {
        let executor = client
            .clone()
            .map(|c| Arc::new(CompletionStepExecutor::new(c)) as Arc<dyn StepExecutor>);
        Self {
            config,
            client,
            executor,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Stop before the next step starts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Steps for a goal, from the completion service when it answers
    /// usefully within the planning timeout, else from the heuristic.
    pub async fn plan(&self, goal: &str) -> Vec<PlanStep> {
        if let Some(client) = &self.client {
            let timeout = Duration::from_millis(self.config.planning_timeout_ms);
            let answer = tokio::time::timeout(timeout, client.ask(PLANNING_PROMPT, goal)).await;
            match answer {
                Ok(Ok(raw)) => match self.parse_steps(&raw) {
                    Ok(steps) => {
                        info!(steps = steps.len(), "Autonomous plan created");
                        return steps;
                    }
                    Err(e) => warn!(error = %e, "Unusable plan; using heuristic steps"),
                },
                Ok(Err(e)) => warn!(error = %e, "Planning call failed; using heuristic steps"),
                Err(_) => warn!(timeout_ms = self.config.planning_timeout_ms, "Planning timed out; using heuristic steps"),
            }
        }
        heuristic_steps(goal)
    }

    fn parse_steps(&self, raw: &str) -> MaestroResult<Vec<PlanStep>> {
        #[derive(Deserialize)]
        struct RawStep {
            description: String,
            #[serde(default)]
            alternatives: Vec<String>,
        }

        let start = raw.find('[');
        let end = raw.rfind(']');
        let json = match (start, end) {
            (Some(s), Some(e)) if e > s => &raw[s..=e],
            _ => return Err(MaestroError::Decomposition("no JSON array in plan".into())),
        };
        let raw_steps: Vec<RawStep> = serde_json::from_str(json)
            .map_err(|e| MaestroError::Decomposition(format!("unparsable plan: {e}")))?;
        let steps: Vec<PlanStep> = raw_steps
            .into_iter()
            .filter(|s| !s.description.trim().is_empty())
            .take(self.config.max_steps)
            .enumerate()
            .map(|(i, s)| {
                let alternatives = s
                    .alternatives
                    .into_iter()
                    .take(self.config.max_alternatives)
                    .collect();
                PlanStep::new(i, s.description.trim(), alternatives)
            })
            .collect();
        if steps.is_empty() {
            return Err(MaestroError::Decomposition("plan has no steps".into()));
        }
        Ok(steps)
    }

    /// Plan and execute a goal.
    pub async fn run(&self, goal: &str) -> MaestroResult<AutonomousRun> {
        let executor = self.executor.clone().ok_or_else(|| {
            MaestroError::Config("autonomous mode needs a completion service".into())
        })?;
        let started = Instant::now();
        self.cancelled.store(false, Ordering::SeqCst);
        let mut steps = self.plan(goal).await;
        let mut results: Vec<String> = Vec::new();
        let mut cursor = 0;

        while cursor < steps.len() {
            if self.cancelled.load(Ordering::SeqCst) {
                info!(step = cursor, "Autonomous run cancelled");
                break;
            }
            let step = &mut steps[cursor];
            step.status = StepStatus::Running;
            step.attempts += 1;
            info!(step = cursor, description = %step.current_description(), "Running step");

            let ctx_results = results.clone();
            match self.run_step(executor.as_ref(), step, goal, ctx_results).await {
                StepOutcome::Done(text) => {
                    step.status = StepStatus::Completed;
                    step.result = Some(text.clone());
                    results.push(text);
                    cursor += 1;
                }
                StepOutcome::Stuck => {
                    if step.switch_alternative() {
                        warn!(step = cursor, alternative = ?step.alternative_index, "Step stuck; switching alternative");
                    } else {
                        warn!(step = cursor, "Step stuck with no alternatives left; skipping");
                        step.status = StepStatus::Skipped;
                        step.error = Some("stuck".into());
                        cursor += 1;
                    }
                }
                outcome @ (StepOutcome::Failed(_) | StepOutcome::TimedOut) => {
                    let error = match outcome {
                        StepOutcome::Failed(e) => e,
                        _ => format!("step exceeded {}ms", self.config.step_timeout_ms),
                    };
                    if step.switch_alternative() {
                        warn!(step = cursor, error = %error, "Step failed; switching alternative");
                    } else {
                        warn!(step = cursor, error = %error, "Step failed");
                        step.status = StepStatus::Failed;
                        step.error = Some(error);
                        cursor += 1;
                    }
                }
            }
        }

        let count = |s: StepStatus| steps.iter().filter(|step| step.status == s).count();
        let (completed, failed, skipped) = (
            count(StepStatus::Completed),
            count(StepStatus::Failed),
            count(StepStatus::Skipped),
        );
        let run = AutonomousRun {
            goal: goal.to_string(),
            success: completed > 0 && failed == 0 && completed + skipped == steps.len(),
            completed,
            failed,
            skipped,
            steps,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(completed, failed, skipped, success = run.success, "Autonomous run finished");
        Ok(run)
    }

    async fn run_step(
        &self,
        executor: &dyn StepExecutor,
        step: &PlanStep,
        goal: &str,
        previous_results: Vec<String>,
    ) -> StepOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = StepContext {
            goal: goal.to_string(),
            previous_results,
            progress: ProgressReporter { tx },
        };
        let mut detector =
            StuckDetector::new(Duration::from_millis(self.config.stuck_threshold_ms));
        let interval = Duration::from_millis(self.config.check_interval_ms);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        let deadline = tokio::time::sleep(Duration::from_millis(self.config.step_timeout_ms));
        tokio::pin!(deadline);
        let work = executor.execute(step, &ctx);
        tokio::pin!(work);

        loop {
            tokio::select! {
                result = &mut work => {
                    return match result {
                        Ok(text) => StepOutcome::Done(text),
                        Err(e) => StepOutcome::Failed(e.to_string()),
                    };
                }
                _ = &mut deadline => return StepOutcome::TimedOut,
                Some(note) = rx.recv() => {
                    debug!(step = step.index, note = %note, "Step progress");
                    detector.record_progress();
                }
                _ = ticker.tick() => {
                    if let StuckCheck::Stuck { idle } = detector.check() {
                        warn!(step = step.index, idle_ms = idle.as_millis() as u64, "Step stuck");
                        return StepOutcome::Stuck;
                    }
                }
            }
        }
    }
}

/// Fallback steps when no usable plan came back.
pub fn heuristic_steps(goal: &str) -> Vec<PlanStep> {
    let goal = goal.trim();
    vec![
        PlanStep::new(
            0,
            format!("Gather the information needed for: {goal}"),
            vec![format!("List what is already known about: {goal}")],
        ),
        PlanStep::new(
            1,
            format!("Work out a solution for: {goal}"),
            vec![format!("Outline a simpler partial solution for: {goal}")],
        ),
        PlanStep::new(
            2,
            format!("Review the work and write the final answer for: {goal}"),
            vec![format!("Summarize the previous results for: {goal}")],
        ),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use maestro_agent::CompletionBackend;

    /// Hangs on primary descriptions, answers alternatives immediately.
    struct HangsOnPrimary;

    #[async_trait]
    impl StepExecutor for HangsOnPrimary {
        async fn execute(&self, step: &PlanStep, _ctx: &StepContext) -> MaestroResult<String> {
            if step.alternative_index.is_none() {
                std::future::pending::<()>().await;
            }
            Ok(format!("done: {}", step.current_description()))
        }
    }

    /// Keeps reporting progress but never finishes.
    struct BusyForever;

    #[async_trait]
    impl StepExecutor for BusyForever {
        async fn execute(&self, _step: &PlanStep, ctx: &StepContext) -> MaestroResult<String> {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                ctx.progress.report("still working");
            }
        }
    }

    struct Echo;

    #[async_trait]
    impl StepExecutor for Echo {
        async fn execute(&self, step: &PlanStep, ctx: &StepContext) -> MaestroResult<String> {
            Ok(format!("{} after {}", step.index, ctx.previous_results.len()))
        }
    }

    struct PlanBackend(&'static str);

    #[async_trait]
    impl CompletionBackend for PlanBackend {
        async fn complete(&self, _messages: &[Message]) -> MaestroResult<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_presets_differ_and_validate() {
        let standard = PlannerConfig::standard();
        let extended = PlannerConfig::extended();
        assert_eq!(standard.step_timeout_ms, 60_000);
        assert_eq!(extended.step_timeout_ms, 300_000);
        assert!(extended.stuck_threshold_ms > standard.stuck_threshold_ms);
        assert!(standard.validate().is_ok());
        let bad = PlannerConfig {
            max_steps: 0,
            ..PlannerConfig::standard()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_switch_alternative() {
        let mut step = PlanStep::new(0, "primary", vec!["alt".into()]);
        assert_eq!(step.current_description(), "primary");
        assert!(step.switch_alternative());
        assert_eq!(step.current_description(), "alt");
        assert!(!step.switch_alternative());
    }

    #[tokio::test]
    async fn test_plan_from_completion_service() {
        let client = CompletionClient::from_backend(
            Arc::new(PlanBackend(
                r#"[{"description": "a", "alternatives": ["a2", "a3", "a4", "a5"]}, {"description": "b"}]"#,
            )),
            Duration::from_secs(1),
        );
        let planner = AutonomousPlanner::new(PlannerConfig::standard(), Some(client));
        let steps = planner.plan("goal").await;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].alternatives.len(), 3);
    }

    #[tokio::test]
    async fn test_unusable_plan_uses_heuristic() {
        let client =
            CompletionClient::from_backend(Arc::new(PlanBackend("no")), Duration::from_secs(1));
        let planner = AutonomousPlanner::new(PlannerConfig::standard(), Some(client));
        assert_eq!(planner.plan("goal").await.len(), 3);
    }

    #[tokio::test]
    async fn test_run_passes_previous_results() {
        let planner =
            AutonomousPlanner::new(PlannerConfig::standard(), None).with_executor(Arc::new(Echo));
        let run = planner.run("goal").await.unwrap();
        assert!(run.success);
        assert_eq!(run.completed, 3);
        assert_eq!(run.steps[2].result.as_deref(), Some("2 after 2"));
    }

    #[tokio::test]
    async fn test_run_without_executor_is_config_error() {
        let planner = AutonomousPlanner::new(PlannerConfig::standard(), None);
        assert!(matches!(planner.run("goal").await, Err(MaestroError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_step_switches_alternative() {
        let planner = AutonomousPlanner::new(PlannerConfig::standard(), None)
            .with_executor(Arc::new(HangsOnPrimary));
        let run = planner.run("ship it").await.unwrap();
        assert!(run.success);
        for step in &run.steps {
            assert_eq!(step.alternative_index, Some(0));
            assert_eq!(step.attempts, 2);
            assert!(step.result.as_deref().unwrap().starts_with("done:"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_progressing_step_times_out_instead_of_stuck() {
        let planner = AutonomousPlanner::new(PlannerConfig::standard(), None)
            .with_executor(Arc::new(BusyForever));
        let run = planner.run("goal").await.unwrap();
        // heuristic steps carry one alternative each: two timeouts per step
        assert_eq!(run.failed, 3);
        assert!(run.steps.iter().all(|s| s.error.as_deref().unwrap().contains("60000ms")));
        assert!(!run.success);
    }
}
