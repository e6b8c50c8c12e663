//! Multi-agent task orchestration: goal decomposition, phased scheduling,
//! capability routing, retry and self-healing, and result aggregation.
//!
//! A goal is decomposed into typed tasks (by the completion service, or a
//! keyword heuristic when that is unavailable), grouped into dependency
//! phases, and executed phase by phase with bounded intra-phase
//! parallelism. Failed attempts are retried with linear backoff, then
//! reassigned, then retried with alternative descriptions; outputs that
//! score below the validation threshold are self-healed.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Top-level engine with `orchestrate(goal)`, `cancel()`, stats and events.
//! - [`Decomposer`]: Goal → tasks, AI first with heuristic fallback.
//! - [`build_phases`]: Level-order grouping with reported planning defects.
//! - [`AgentRegistry`] and [`route`]: Agent roster and capability routing.
//! - [`TaskExecutor`]: Runs one task on one agent; [`AgentTaskExecutor`] is the default.
//! - [`AutonomousPlanner`]: Single-agent step planner with stuck detection.
//! - [`AggregatedResult`]: Final deliverable of a run.

/// Result aggregation.
pub mod aggregator;
/// In-memory task store with state-machine transitions.
pub mod board;
/// Engine configuration.
pub mod config;
/// Run-scoped shared context.
pub mod context;
/// Goal decomposition.
pub mod decomposer;
/// The orchestration engine.
pub mod engine;
/// Typed run events and their fan-out bus.
pub mod events;
/// Task execution against agents.
pub mod executor;
/// Injectable id generation.
pub mod ids;
/// Dependency phase building.
pub mod phases;
/// Single-agent autonomous planner.
pub mod planner;
/// Default agent roster and prompts.
pub mod profiles;
/// Retry budgets, backoff and self-heal helpers.
pub mod recovery;
/// Agent roster and live state.
pub mod registry;
/// Capability routing.
pub mod router;
/// Liveness monitoring.
pub mod stuck;
/// Shared orchestration types.
pub mod types;
/// Output scoring.
pub mod validator;

pub use aggregator::{AggregatedResult, Aggregator};
pub use board::TaskBoard;
pub use config::{
    LearningConfig, OrchestratorConfig, RetryConfig, SearchConfig, ValidationConfig,
    API_KEY_ENV,
};
pub use context::{extract_facts, AgentMessage, Decision, Fact, SharedContext};
pub use decomposer::{Decomposer, Decomposition, DecompositionSource};
pub use engine::{Orchestrator, OrchestratorStats, PlanPreview};
pub use events::{EventBus, LogLevel, OrchestratorEvent};
pub use executor::{AgentTaskExecutor, TaskExecutor};
pub use ids::{IdGenerator, RandomIds, SequentialIds};
pub use phases::{build_phases, find_cycle, PhasePlan};
pub use planner::{
    AutonomousPlanner, AutonomousRun, CompletionStepExecutor, PlanStep, PlannerConfig,
    ProgressReporter, StepContext, StepExecutor, StepStatus,
};
pub use profiles::{default_agent, default_agents};
pub use registry::AgentRegistry;
pub use router::{route, route_idle, RouteChoice};
pub use stuck::{StuckCheck, StuckDetector};
pub use types::{
    Agent, AgentConfig, AgentKind, AgentMetrics, AgentStatus, Artifact, ArtifactKind,
    Capability, ExecutionPlan, Phase, PhaseStatus, PlanStatus, PlanningDefect, PriorOutput,
    Task, TaskInput, TaskKind, TaskOutput, TaskPriority, TaskStatus,
};
pub use validator::{OutputValidator, ValidationReport};
