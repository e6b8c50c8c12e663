use crate::aggregator::{AggregatedResult, Aggregator};
use crate::board::TaskBoard;
use crate::config::OrchestratorConfig;
use crate::context::{extract_facts, SharedContext};
use crate::decomposer::{Decomposer, DecompositionSource};
use crate::events::{EventBus, LogLevel, OrchestratorEvent};
use crate::executor::{AgentTaskExecutor, TaskExecutor};
use crate::ids::{IdGenerator, RandomIds};
use crate::phases::build_phases;
use crate::profiles::default_agents;
use crate::recovery::{propose_fix, Candidate, NextAttempt, RecoveryBudget};
use crate::registry::AgentRegistry;
use crate::router::{self, RouteChoice};
use crate::types::{
    Agent, AgentStatus, ExecutionPlan, PhaseStatus, PlanStatus, Task, TaskKind, TaskOutput,
    TaskStatus,
};
use crate::validator::OutputValidator;
use futures_util::future::join_all;
use maestro_agent::CompletionClient;
use maestro_core::{ErrorKind, MaestroError, MaestroResult};
use maestro_learning::{Learner, LearningEventKind, LearningRecord, QualityMetrics};
use maestro_tools::{CachedFetcher, CachedSearch, DuckDuckGoSearch, HttpPageFetcher};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Counters accumulated across every run on one orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub runs: u64,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub total_retries: u64,
    pub reassignments: u64,
    pub self_heals: u64,
    pub forced_phases: u64,
    pub average_task_ms: f64,
    /// Completed over completed + failed, `0.0` before any task finished.
    pub success_rate: f64,
    #[serde(skip)]
    timed_tasks: u64,
}

impl OrchestratorStats {
    fn record_task(&mut self, task: &Task) {
        self.total_tasks += 1;
        match task.status {
            TaskStatus::Completed => self.completed_tasks += 1,
            TaskStatus::Failed => self.failed_tasks += 1,
            TaskStatus::Cancelled => self.cancelled_tasks += 1,
            _ => {}
        }
        if let Some(ms) = task.duration_ms() {
            let n = self.timed_tasks as f64;
            self.average_task_ms = (self.average_task_ms * n + ms as f64) / (n + 1.0);
            self.timed_tasks += 1;
        }
        let finished = self.completed_tasks + self.failed_tasks;
        if finished > 0 {
            self.success_rate = self.completed_tasks as f64 / finished as f64;
        }
    }
}

/// A decomposed goal and its phases, without executing anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPreview {
    pub plan: ExecutionPlan,
    pub tasks: Vec<Task>,
    pub source: DecompositionSource,
    pub fallback_reason: Option<String>,
}

/// How a failed attempt will be followed up.
enum Recovery {
    Retry { attempt: u32, delay: Duration },
    Reassign(RouteChoice),
    Alternative(usize),
    GiveUp,
}

/// The multi-agent orchestrator.
///
/// Implements decompose → schedule phases → execute with recovery →
/// aggregate. One instance owns its caches, agents, statistics and event
/// bus; nothing is shared between instances.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: AgentRegistry,
    decomposer: Decomposer,
    executor: Arc<dyn TaskExecutor>,
    validator: OutputValidator,
    aggregator: Aggregator,
    client: Option<CompletionClient>,
    learner: Arc<Learner>,
    events: Arc<EventBus>,
    ids: Arc<dyn IdGenerator>,
    rng: Mutex<StdRng>,
    board: RwLock<TaskBoard>,
    context: RwLock<SharedContext>,
    plan: RwLock<Option<ExecutionPlan>>,
    stats: Mutex<OrchestratorStats>,
    cancelled: AtomicBool,
}

impl Orchestrator {
    /// Build an orchestrator with the default executor: completion service
    /// from `config.model` (if any), DuckDuckGo search and HTTP page fetching
    /// behind bounded caches.
    pub fn new(config: OrchestratorConfig) -> MaestroResult<Self> {
        let client = match &config.model {
            Some(model) => Some(CompletionClient::new(
                model.clone(),
                config.completion_timeout(),
            )?),
            None => None,
        };

        let mut search = match &config.search.endpoint {
            Some(endpoint) => DuckDuckGoSearch::with_endpoint(endpoint.clone())?,
            None => DuckDuckGoSearch::new()?,
        };
        if let Some(max) = config.search.max_results {
            search = search.with_max_results(max);
        }
        let fetcher =
            HttpPageFetcher::new()?.allow_private_hosts(config.search.allow_private_hosts);

        let executor = AgentTaskExecutor::new(client.clone())
            .with_search(Arc::new(CachedSearch::new(
                Arc::new(search),
                config.cache_capacity,
            )))
            .with_fetcher(Arc::new(CachedFetcher::new(
                Arc::new(fetcher),
                config.cache_capacity,
            )));

        Self::with_executor(config, client, Arc::new(executor))
    }

    /// Build an orchestrator around a custom executor.
    pub fn with_executor(
        config: OrchestratorConfig,
        client: Option<CompletionClient>,
        executor: Arc<dyn TaskExecutor>,
    ) -> MaestroResult<Self> {
        config.validate()?;
        let ids: Arc<dyn IdGenerator> = Arc::new(RandomIds);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            registry: AgentRegistry::new(default_agents()),
            decomposer: Decomposer::new(client.clone(), ids.clone()),
            executor,
            validator: OutputValidator::new(config.validation.clone()),
            aggregator: Aggregator::new(client.clone()),
            client,
            learner: Arc::new(Learner::new()),
            events: Arc::new(EventBus::new()),
            ids,
            rng: Mutex::new(rng),
            board: RwLock::new(TaskBoard::new()),
            context: RwLock::new(SharedContext::default()),
            plan: RwLock::new(None),
            stats: Mutex::new(OrchestratorStats::default()),
            cancelled: AtomicBool::new(false),
            config,
        })
    }

    /// Replace the agent roster.
    pub fn with_agents(mut self, agents: Vec<Agent>) -> Self {
        self.registry = AgentRegistry::new(agents);
        self
    }

    /// Use a different id source (sequential ids make runs reproducible).
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.decomposer = Decomposer::new(self.client.clone(), ids.clone());
        self.ids = ids;
        self
    }

    /// Share a learner between orchestrators or seed it with prior memory.
    pub fn with_learner(mut self, learner: Arc<Learner>) -> Self {
        self.learner = learner;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn learner(&self) -> &Arc<Learner> {
        &self.learner
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Ask the current run to stop. Checked before each phase, task and
    /// attempt; in-flight calls are left to finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        info!("Orchestrator: cancellation requested");
        self.events.log(LogLevel::Warn, "Cancellation requested");
    }

    pub async fn agents(&self) -> Vec<Agent> {
        self.registry.snapshot().await
    }

    /// Tasks of the current (or last) run in creation order.
    pub async fn tasks(&self) -> Vec<Task> {
        self.board
            .read()
            .await
            .all_tasks()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn current_plan(&self) -> Option<ExecutionPlan> {
        self.plan.read().await.clone()
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats.lock().clone()
    }

    /// Decompose a goal and build its phases without running anything.
    pub async fn preview(&self, goal: &str) -> MaestroResult<PlanPreview> {
        let goal = checked_goal(goal)?;
        let agents = self.registry.snapshot().await;
        let hint = self.pattern_hint(goal);
        let decomposition = self.decomposer.decompose(goal, &agents, hint.as_ref()).await;
        let phase_plan = build_phases(
            &decomposition.tasks,
            self.config.strict_dependencies,
            self.ids.as_ref(),
        )?;
        let mut plan = ExecutionPlan::new(self.ids.next_id(), goal);
        plan.phases = phase_plan.phases;
        plan.defects = phase_plan.defects;
        Ok(PlanPreview {
            plan,
            tasks: decomposition.tasks,
            source: decomposition.source,
            fallback_reason: decomposition.fallback_reason,
        })
    }

    /// Run the full pipeline for a goal.
    ///
    /// Decomposition never fails (it degrades to the keyword heuristic), so
    /// an `Err` here means the goal was empty or strict dependency checking
    /// rejected the plan. Task failures, timeouts and cancellation are
    /// reported in the returned result.
    pub async fn orchestrate(&self, goal: &str) -> MaestroResult<AggregatedResult> {
        let goal = checked_goal(goal)?;
        self.cancelled.store(false, Ordering::SeqCst);
        info!(goal = %goal, "Orchestrator: starting run");

        let agents = self.registry.snapshot().await;
        let hint = self.pattern_hint(goal);
        let decomposition = self.decomposer.decompose(goal, &agents, hint.as_ref()).await;
        if let Some(reason) = &decomposition.fallback_reason {
            self.events.log(
                LogLevel::Warn,
                format!("Heuristic decomposition used: {reason}"),
            );
        }
        self.run(goal, decomposition.tasks).await
    }

    /// Run an already decomposed task list.
    pub async fn execute_tasks(&self, goal: &str, tasks: Vec<Task>) -> MaestroResult<AggregatedResult> {
        let goal = checked_goal(goal)?;
        self.cancelled.store(false, Ordering::SeqCst);
        self.run(goal, tasks).await
    }

    fn pattern_hint(&self, goal: &str) -> Option<maestro_learning::PatternHint> {
        let hint = self.learner.hint_for_goal(
            goal,
            self.config.learning.hint_min_confidence,
            self.config.learning.hint_min_runs,
        )?;
        info!(hint = %hint.describe(), "Using learned pattern for decomposition");
        self.events
            .log(LogLevel::Info, format!("Learned hint: {}", hint.describe()));
        Some(hint)
    }

    async fn run(&self, goal: &str, mut tasks: Vec<Task>) -> MaestroResult<AggregatedResult> {
        let started = Instant::now();

        for task in &mut tasks {
            task.max_retries = match self.config.retry.max_retries {
                Some(n) => n,
                None => self
                    .registry
                    .config_for(task.kind.preferred_agent())
                    .await
                    .map_or(task.max_retries, |c| c.max_retries),
            };
            task.input
                .context
                .insert("goal".into(), serde_json::Value::String(goal.to_string()));
        }

        let phase_plan = match build_phases(&tasks, self.config.strict_dependencies, self.ids.as_ref()) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Orchestrator: plan rejected");
                self.events.log(LogLevel::Error, e.to_string());
                return Err(e);
            }
        };

        let mut plan = ExecutionPlan::new(self.ids.next_id(), goal);
        let plan_id = plan.id;
        let forced = phase_plan.forced_count();
        plan.phases = phase_plan.phases;
        plan.defects = phase_plan.defects;
        plan.status = PlanStatus::Executing;

        {
            let mut board = self.board.write().await;
            board.clear();
            for task in tasks {
                board.add(task);
            }
        }
        *self.context.write().await = SharedContext::new(goal);
        *self.plan.write().await = Some(plan.clone());
        {
            let mut stats = self.stats.lock();
            stats.runs += 1;
            stats.forced_phases += forced as u64;
        }

        let task_count = self.board.read().await.total_count();
        info!(
            plan_id = %plan_id,
            phases = plan.phases.len(),
            tasks = task_count,
            "Orchestrator: plan created"
        );
        self.events.emit(OrchestratorEvent::PlanCreated {
            plan_id,
            goal: goal.to_string(),
            phases: plan.phases.len(),
            tasks: task_count,
        });
        for defect in &plan.defects {
            warn!(plan_id = %plan_id, defect = %defect, "Planning defect");
            self.events.emit(OrchestratorEvent::PlanningDefect {
                plan_id,
                defect: defect.clone(),
            });
        }

        let limit = self.config.plan_timeout();
        let error = match tokio::time::timeout(limit, self.run_phases(plan_id)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                error!(plan_id = %plan_id, error = %e, "Orchestrator: run failed");
                Some(e.to_string())
            }
            Err(_) => {
                let message = format!("plan exceeded {}ms", limit.as_millis());
                error!(plan_id = %plan_id, "Orchestrator: {message}");
                self.abandon_in_flight(&message).await;
                Some(message)
            }
        };
        if let Some(e) = &error {
            self.events.log(LogLevel::Error, e.clone());
        }

        let cancelled = self.is_cancelled();
        let leftover = self.board.write().await.cancel_unfinished();
        for task_id in leftover {
            self.events.emit(OrchestratorEvent::TaskStatusChanged {
                task_id,
                status: TaskStatus::Cancelled,
            });
        }

        let tasks = self.tasks().await;
        let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
        let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
        let status = if error.is_some() {
            PlanStatus::Failed
        } else if cancelled {
            PlanStatus::Cancelled
        } else if failed == 0 {
            PlanStatus::Completed
        } else if self.config.auto_recovery && completed > 0 {
            PlanStatus::CompletedWithErrors
        } else {
            PlanStatus::Failed
        };

        let plan = {
            let mut current = self.plan.write().await;
            let plan = current.get_or_insert(plan);
            plan.finish(status);
            plan.clone()
        };
        {
            let mut stats = self.stats.lock();
            for task in &tasks {
                stats.record_task(task);
            }
        }

        info!(
            plan_id = %plan_id,
            status = ?status,
            completed,
            failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Orchestrator: run finished"
        );
        self.events
            .emit(OrchestratorEvent::PlanCompleted { plan_id, status });

        let context = self.context.read().await.clone();
        Ok(self
            .aggregator
            .aggregate(
                &plan,
                &tasks,
                &context,
                error,
                started.elapsed().as_millis() as u64,
            )
            .await)
    }

    async fn run_phases(&self, plan_id: Uuid) -> MaestroResult<()> {
        let phases = self
            .plan
            .read()
            .await
            .as_ref()
            .map(|p| p.phases.clone())
            .unwrap_or_default();
        let total = phases.len();
        let semaphore = Semaphore::new(self.config.max_parallel_tasks);

        for (index, phase) in phases.iter().enumerate() {
            if self.is_cancelled() {
                info!(phase = index, "Orchestrator: cancelled before phase");
                break;
            }
            self.registry.recover_idle().await;
            self.set_phase_status(index, PhaseStatus::Running).await;
            for task_id in &phase.task_ids {
                self.set_status(*task_id, TaskStatus::Queued).await?;
            }
            debug!(
                phase = index,
                tasks = phase.task_ids.len(),
                parallel = phase.parallel,
                "Phase started"
            );

            if phase.parallel {
                let runs = phase.task_ids.iter().map(|task_id| {
                    let semaphore = &semaphore;
                    async move {
                        let _permit = semaphore
                            .acquire()
                            .await
                            .map_err(|e| MaestroError::Orchestrator(e.to_string()))?;
                        self.run_task(*task_id).await
                    }
                });
                for result in join_all(runs).await {
                    result?;
                }
            } else {
                for task_id in &phase.task_ids {
                    self.run_task(*task_id).await?;
                }
            }

            let (any_failed, any_cancelled) = {
                let board = self.board.read().await;
                let statuses: Vec<TaskStatus> = phase
                    .task_ids
                    .iter()
                    .filter_map(|id| board.get(*id).map(|t| t.status))
                    .collect();
                (
                    statuses.contains(&TaskStatus::Failed),
                    statuses.contains(&TaskStatus::Cancelled),
                )
            };
            let status = if any_failed {
                PhaseStatus::Failed
            } else if any_cancelled {
                PhaseStatus::Cancelled
            } else {
                PhaseStatus::Completed
            };
            self.set_phase_status(index, status).await;

            let percent = (index + 1) as f64 / total as f64 * 100.0;
            if let Some(plan) = self.plan.write().await.as_mut() {
                plan.progress = percent;
            }
            info!(phase = index, status = ?status, progress = percent, "Orchestrator: phase finished");
            self.events.emit(OrchestratorEvent::PhaseCompleted {
                plan_id,
                index,
                status,
            });
            self.events
                .emit(OrchestratorEvent::Progress { plan_id, percent });

            if any_failed && !self.config.auto_recovery {
                warn!(phase = index, "Orchestrator: stopping after failed phase");
                self.events.log(
                    LogLevel::Warn,
                    format!("Phase {index} failed and auto-recovery is off; stopping"),
                );
                break;
            }
        }
        Ok(())
    }

    /// Route, execute and recover one task until it reaches a terminal state.
    async fn run_task(&self, task_id: Uuid) -> MaestroResult<()> {
        if self.is_cancelled() {
            return self.set_status(task_id, TaskStatus::Cancelled).await;
        }

        let mut task = {
            let mut board = self.board.write().await;
            let prior = board.prior_outputs(task_id);
            let task = board
                .get_mut(task_id)
                .ok_or_else(|| MaestroError::Orchestrator(format!("unknown task {task_id}")))?;
            task.input.prior_outputs = prior;
            task.clone()
        };

        let agents = self.registry.snapshot().await;
        let Some(choice) = router::route(&agents, &task, &[]) else {
            let err = MaestroError::ResourceExhausted(format!("no agent can handle {} tasks", task.kind));
            self.set_status(task_id, TaskStatus::Assigned).await?;
            self.set_status(task_id, TaskStatus::Running).await?;
            return self.fail_task(&task, "router", &err).await;
        };
        if choice.overloaded {
            warn!(task_id = %task_id, agent = %choice.agent_id, "No idle agent; overloading");
            self.events.log(LogLevel::Warn, choice.reason.clone());
        }
        self.context.write().await.record_decision(
            "router",
            format!("assign '{}' to {}", task.title, choice.agent_id),
            choice.reason.clone(),
            vec![task_id],
        );

        let mut agent_id = choice.agent_id;
        self.set_status(task_id, TaskStatus::Assigned).await?;
        self.assign(task_id, &agent_id).await;
        task.assigned_agent = Some(agent_id.clone());

        let mut budget = RecoveryBudget::new(
            task.max_retries,
            task.alternatives.len(),
            &self.config.retry,
        );
        let mut tried = vec![agent_id.clone()];
        let mut alternative: Option<usize> = None;
        let mut attempt: u32 = 0;

        loop {
            if self.is_cancelled() {
                info!(task_id = %task_id, "Task cancelled before attempt");
                return self.set_status(task_id, TaskStatus::Cancelled).await;
            }
            attempt += 1;
            self.set_status(task_id, TaskStatus::Running).await?;
            info!(task_id = %task_id, agent = %agent_id, attempt, "Task started");
            self.events.emit(OrchestratorEvent::TaskStarted {
                task_id,
                agent_id: agent_id.clone(),
                attempt,
            });

            let err = match self.attempt(&effective_task(&task, alternative), &agent_id).await {
                Ok(output) => {
                    let (output, score) =
                        self.validate_or_heal(&task, &agent_id, output, alternative).await;
                    return self.complete_task(&task, &agent_id, output, score).await;
                }
                Err(e) => e,
            };
            warn!(task_id = %task_id, agent = %agent_id, attempt, error = %err, "Task attempt failed");

            match self.next_recovery(&mut budget, &task, &tried).await {
                Recovery::Retry { attempt: n, delay } => {
                    self.set_status(task_id, TaskStatus::Retrying).await?;
                    self.update_task(task_id, |t| {
                        t.retry_count = n;
                        t.error = Some(err.to_string());
                        t.error_kind = Some(err.kind());
                    })
                    .await;
                    let delay_ms = delay.as_millis() as u64;
                    info!(task_id = %task_id, attempt = n, delay_ms, "Retrying task");
                    self.events.emit(OrchestratorEvent::TaskRetrying {
                        task_id,
                        attempt: n,
                        delay_ms,
                        error: err.to_string(),
                    });
                    self.learner.record_event(
                        LearningEventKind::Retry,
                        task.kind.to_string(),
                        format!("attempt {n}: {err}"),
                    );
                    self.stats.lock().total_retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Recovery::Reassign(next) => {
                    self.set_status(task_id, TaskStatus::Retrying).await?;
                    info!(task_id = %task_id, from = %agent_id, to = %next.agent_id, "Reassigning task");
                    self.events.emit(OrchestratorEvent::TaskReassigned {
                        task_id,
                        from: agent_id.clone(),
                        to: next.agent_id.clone(),
                    });
                    self.learner.record_event(
                        LearningEventKind::Reassignment,
                        task.kind.to_string(),
                        format!("{agent_id} -> {}: {err}", next.agent_id),
                    );
                    self.stats.lock().reassignments += 1;
                    self.context.write().await.record_decision(
                        "router",
                        format!("reassign '{}' to {}", task.title, next.agent_id),
                        next.reason,
                        vec![task_id],
                    );
                    agent_id = next.agent_id;
                    tried.push(agent_id.clone());
                    self.assign(task_id, &agent_id).await;
                    task.assigned_agent = Some(agent_id.clone());
                }
                Recovery::Alternative(index) => {
                    self.set_status(task_id, TaskStatus::Retrying).await?;
                    let description = task.alternatives.get(index).cloned().unwrap_or_default();
                    info!(task_id = %task_id, alternative = index, "Trying alternative description");
                    self.events.log(
                        LogLevel::Info,
                        format!("Task '{}' switches to alternative: {description}", task.title),
                    );
                    self.learner.record_event(
                        LearningEventKind::AlternativeUsed,
                        task.kind.to_string(),
                        description,
                    );
                    alternative = Some(index);
                }
                Recovery::GiveUp => return self.fail_task(&task, &agent_id, &err).await,
            }
        }
    }

    /// One execution of `task` on `agent_id`, bounded by the task timeout.
    async fn attempt(&self, task: &Task, agent_id: &str) -> MaestroResult<TaskOutput> {
        let agent = self
            .registry
            .get(agent_id)
            .await
            .ok_or_else(|| MaestroError::Orchestrator(format!("unknown agent {agent_id}")))?;
        let limit_ms = self.config.task_timeout_ms.unwrap_or(agent.config.timeout_ms);

        self.registry.start_task(agent_id, task.id).await;
        let started = Instant::now();
        let result = match tokio::time::timeout(
            Duration::from_millis(limit_ms),
            self.executor.execute(task, &agent),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MaestroError::Timeout(format!(
                "task '{}' exceeded {limit_ms}ms",
                task.title
            ))),
        };
        self.registry
            .finish_task(
                agent_id,
                task.id,
                result.is_ok(),
                started.elapsed().as_millis() as u64,
            )
            .await;
        result
    }

    async fn next_recovery(&self, budget: &mut RecoveryBudget, task: &Task, tried: &[String]) -> Recovery {
        loop {
            let next = {
                let mut rng = self.rng.lock();
                budget.next(&mut *rng)
            };
            match next {
                NextAttempt::Retry { attempt, delay } => return Recovery::Retry { attempt, delay },
                NextAttempt::Reassign { round } => {
                    let agents = self.registry.snapshot().await;
                    match router::route_idle(&agents, task, tried) {
                        Some(choice) => return Recovery::Reassign(choice),
                        None => debug!(task_id = %task.id, round, "No idle agent to reassign to"),
                    }
                }
                NextAttempt::Alternative { index } => return Recovery::Alternative(index),
                NextAttempt::GiveUp => return Recovery::GiveUp,
            }
        }
    }

    /// Score an output and, below threshold, try the remaining alternatives
    /// on the same agent. Returns the output to complete the task with and
    /// its validation score.
    async fn validate_or_heal(
        &self,
        task: &Task,
        agent_id: &str,
        output: TaskOutput,
        alternative: Option<usize>,
    ) -> (TaskOutput, f64) {
        let report = self.validator.validate(task.kind, &output);
        if report.passed {
            return (output, report.score);
        }
        warn!(
            task_id = %task.id,
            score = report.score,
            threshold = self.validator.threshold(),
            issues = ?report.issues,
            "Output below validation threshold; self-healing"
        );
        self.events.log(
            LogLevel::Warn,
            format!(
                "Task '{}' scored {:.2}: {}",
                task.title,
                report.score,
                report.issues.join("; ")
            ),
        );

        let mut best = Candidate {
            output,
            score: report.score,
            alternative,
        };
        let mut best_report = report;
        let limit = task
            .alternatives
            .len()
            .min(self.config.retry.max_alternative_attempts as usize);
        let first = alternative.map_or(0, |i| i + 1);

        for index in first..limit {
            if self.is_cancelled() {
                break;
            }
            let output = match self.attempt(&effective_task(task, Some(index)), agent_id).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(task_id = %task.id, alternative = index, error = %e, "Alternative failed");
                    continue;
                }
            };
            let report = self.validator.validate(task.kind, &output);
            let candidate = Candidate {
                output,
                score: report.score,
                alternative: Some(index),
            };
            if report.passed {
                let description = task.alternatives.get(index).cloned().unwrap_or_default();
                info!(task_id = %task.id, alternative = index, score = report.score, "Task self-healed");
                self.events.emit(OrchestratorEvent::TaskSelfHealed {
                    task_id: task.id,
                    alternative: description.clone(),
                    score: report.score,
                });
                self.learner.record_event(
                    LearningEventKind::SelfHeal,
                    task.kind.to_string(),
                    description,
                );
                self.stats.lock().self_heals += 1;
                return (candidate.output, candidate.score);
            }
            if candidate.score > best.score {
                best_report = report;
            }
            best = best.better(candidate);
        }

        if let Some(client) = &self.client {
            if let Some(fix) = propose_fix(client, task, &best.output, &best_report).await {
                info!(task_id = %task.id, "Recorded proposed fix");
                self.learner.record_event(
                    LearningEventKind::ProposedFix,
                    task.kind.to_string(),
                    fix.clone(),
                );
                self.context.write().await.post_message(
                    "validator",
                    agent_id,
                    format!("Proposed fix for '{}': {fix}", task.title),
                );
            }
        }
        self.events.log(
            LogLevel::Warn,
            format!(
                "Task '{}' kept its best output (score {:.2})",
                task.title, best.score
            ),
        );
        let score = best.score;
        (best.into_capped_output(), score)
    }

    async fn complete_task(
        &self,
        task: &Task,
        agent_id: &str,
        output: TaskOutput,
        score: f64,
    ) -> MaestroResult<()> {
        let task_id = task.id;
        let confidence = output.confidence;
        self.update_task(task_id, |t| {
            t.output = Some(output.clone());
            t.error = None;
            t.error_kind = None;
        })
        .await;
        self.set_status(task_id, TaskStatus::Completed).await?;
        info!(task_id = %task_id, agent = %agent_id, confidence, "Task completed");
        self.events.emit(OrchestratorEvent::TaskCompleted {
            task_id,
            agent_id: agent_id.to_string(),
            confidence,
        });

        let dependents: Vec<(String, TaskKind)> = self
            .board
            .read()
            .await
            .dependents(task_id)
            .into_iter()
            .map(|t| (t.title.clone(), t.kind))
            .collect();
        let agents = self.registry.snapshot().await;

        let goal = {
            let mut context = self.context.write().await;
            if matches!(task.kind, TaskKind::Research | TaskKind::Browse) {
                for fact in extract_facts(&output.content) {
                    context.add_fact(&fact, task_id, agent_id, confidence);
                }
            }
            for artifact in &output.artifacts {
                context.add_artifact(artifact.clone());
            }
            for (title, kind) in &dependents {
                let preferred = kind.preferred_agent();
                let to = agents
                    .iter()
                    .find(|a| a.kind == preferred)
                    .map_or_else(|| preferred.to_string(), |a| a.id.clone());
                let content = format!("Output of '{}' is ready for '{title}'", task.title);
                context.post_message(agent_id, &to, &content);
                self.events.emit(OrchestratorEvent::AgentMessage {
                    from: agent_id.to_string(),
                    to,
                    content,
                });
            }
            context.goal.clone()
        };

        self.learner.record(&LearningRecord::new(
            goal,
            task.kind.to_string(),
            task.kind.tools(),
            QualityMetrics::success(score),
        ));
        Ok(())
    }

    async fn fail_task(&self, task: &Task, agent_id: &str, err: &MaestroError) -> MaestroResult<()> {
        let task_id = task.id;
        let message = err.to_string();
        self.update_task(task_id, |t| {
            t.error = Some(message.clone());
            t.error_kind = Some(ErrorKind::FatalTaskFailure);
        })
        .await;
        self.set_status(task_id, TaskStatus::Failed).await?;
        error!(task_id = %task_id, agent = %agent_id, error = %message, "Task failed permanently");
        if let Some(agent) = self.registry.get(agent_id).await {
            if agent.active_tasks == 0 {
                self.registry.set_status(agent_id, AgentStatus::Error).await;
            }
        }
        self.report_failure(task_id, task.kind, message, ErrorKind::FatalTaskFailure)
            .await;
        Ok(())
    }

    /// Failure callback plus the learner's event and failure record.
    async fn report_failure(
        &self,
        task_id: Uuid,
        kind: TaskKind,
        message: String,
        error_kind: ErrorKind,
    ) {
        self.events.emit(OrchestratorEvent::TaskFailed {
            task_id,
            error: message.clone(),
            kind: error_kind,
        });
        self.learner
            .record_event(LearningEventKind::TaskFailure, kind.to_string(), message);
        let goal = self.context.read().await.goal.clone();
        self.learner.record(&LearningRecord::new(
            goal,
            kind.to_string(),
            kind.tools(),
            QualityMetrics::failure(),
        ));
    }

    /// After a plan timeout: running tasks fail, tasks between attempts are
    /// cancelled and agent bookkeeping is cleared.
    async fn abandon_in_flight(&self, reason: &str) {
        let message = format!("abandoned: {reason}");
        let changed: Vec<(Uuid, TaskKind, TaskStatus)> = {
            let mut board = self.board.write().await;
            let ids: Vec<(Uuid, TaskKind, TaskStatus)> = board
                .all_tasks()
                .into_iter()
                .filter(|t| matches!(t.status, TaskStatus::Running | TaskStatus::Retrying))
                .map(|t| (t.id, t.kind, t.status))
                .collect();
            let mut changed = Vec::with_capacity(ids.len());
            for (id, kind, status) in ids {
                let to = if status == TaskStatus::Running {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Cancelled
                };
                if board.transition(id, to).is_ok() {
                    if let Some(task) = board.get_mut(id) {
                        task.error = Some(message.clone());
                        task.error_kind = Some(ErrorKind::TransientIo);
                    }
                    changed.push((id, kind, to));
                }
            }
            changed
        };
        for (task_id, kind, status) in changed {
            warn!(task_id = %task_id, status = %status, "Task abandoned");
            self.events
                .emit(OrchestratorEvent::TaskStatusChanged { task_id, status });
            if status == TaskStatus::Failed {
                self.report_failure(task_id, kind, message.clone(), ErrorKind::TransientIo)
                    .await;
            }
        }
        self.registry.reset_activity().await;
    }

    async fn set_status(&self, task_id: Uuid, status: TaskStatus) -> MaestroResult<()> {
        self.board.write().await.transition(task_id, status)?;
        self.events
            .emit(OrchestratorEvent::TaskStatusChanged { task_id, status });
        Ok(())
    }

    async fn update_task(&self, task_id: Uuid, f: impl FnOnce(&mut Task)) {
        if let Some(task) = self.board.write().await.get_mut(task_id) {
            f(task);
        }
    }

    async fn assign(&self, task_id: Uuid, agent_id: &str) {
        self.update_task(task_id, |t| t.assigned_agent = Some(agent_id.to_string()))
            .await;
    }

    async fn set_phase_status(&self, index: usize, status: PhaseStatus) {
        if let Some(phase) = self
            .plan
            .write()
            .await
            .as_mut()
            .and_then(|p| p.phases.get_mut(index))
        {
            phase.status = status;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn checked_goal(goal: &str) -> MaestroResult<&str> {
    let goal = goal.trim();
    if goal.is_empty() {
        return Err(MaestroError::Plan("goal is empty".into()));
    }
    Ok(goal)
}

/// The task as it should be executed: an alternative replaces the
/// description and prompt.
fn effective_task(task: &Task, alternative: Option<usize>) -> Task {
    let mut effective = task.clone();
    if let Some(description) = alternative.and_then(|i| task.alternatives.get(i)) {
        effective.description = description.clone();
        effective.input.prompt = description.clone();
    }
    effective
}
