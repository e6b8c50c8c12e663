use chrono::{DateTime, Utc};
use maestro_core::{ErrorKind, MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Type of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Searches the web, checks facts, summarizes sources.
    Research,
    /// Generates, debugs and refactors code.
    Coder,
    /// Navigates pages and extracts their content.
    Browser,
    /// Analyzes data and writes reports.
    Analyst,
    /// Writes prose and designs images.
    Creative,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Research,
        AgentKind::Coder,
        AgentKind::Browser,
        AgentKind::Analyst,
        AgentKind::Creative,
    ];
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Research => write!(f, "research"),
            AgentKind::Coder => write!(f, "coder"),
            AgentKind::Browser => write!(f, "browser"),
            AgentKind::Analyst => write!(f, "analyst"),
            AgentKind::Creative => write!(f, "creative"),
        }
    }
}

/// A skill an agent advertises to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WebSearch,
    FactChecking,
    Summarization,
    CodeGeneration,
    Debugging,
    Refactoring,
    WebNavigation,
    PageExtraction,
    DataAnalysis,
    Visualization,
    Reasoning,
    ContentCreation,
    ImageGeneration,
    Writing,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Recovering,
    Offline,
}

/// Per-type limits for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_concurrent_tasks: u32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Multiplier applied to the success rate when routing.
    pub priority_weight: f64,
}

/// Running performance counters of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub completed: u64,
    pub failed: u64,
    /// Fraction of finished tasks that succeeded. Starts optimistic at 1.0.
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub total_duration_ms: u64,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            completed: 0,
            failed: 0,
            success_rate: 1.0,
            average_duration_ms: 0.0,
            total_duration_ms: 0,
        }
    }
}

impl AgentMetrics {
    pub fn record(&mut self, success: bool, duration_ms: u64) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        let finished = self.completed + self.failed;
        self.success_rate = self.completed as f64 / finished as f64;
        self.total_duration_ms += duration_ms;
        self.average_duration_ms = self.total_duration_ms as f64 / finished as f64;
    }
}

/// A typed worker with a fixed capability set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub kind: AgentKind,
    pub capabilities: Vec<Capability>,
    pub status: AgentStatus,
    pub current_task: Option<Uuid>,
    /// Tasks currently executing on this agent (soft overload may exceed
    /// `config.max_concurrent_tasks`).
    pub active_tasks: u32,
    pub metrics: AgentMetrics,
    pub config: AgentConfig,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        kind: AgentKind,
        capabilities: Vec<Capability>,
        config: AgentConfig,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            capabilities,
            status: AgentStatus::Idle,
            current_task: None,
            active_tasks: 0,
            metrics: AgentMetrics::default(),
            config,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// True when the agent shares at least one capability with `required`.
    pub fn can_handle(&self, required: &[Capability]) -> bool {
        required.iter().any(|c| self.capabilities.contains(c))
    }

    /// Idle or busy below `config.max_concurrent_tasks` (a limit of 0 counts
    /// as 1).
    pub fn has_capacity(&self) -> bool {
        matches!(self.status, AgentStatus::Idle | AgentStatus::Busy)
            && self.active_tasks < self.config.max_concurrent_tasks.max(1)
    }
}

/// Canonical task types emitted by the decomposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Research,
    Code,
    Browse,
    Analyze,
    Create,
    /// Mandatory closing task that summarizes everything before it.
    Finalize,
}

impl TaskKind {
    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            TaskKind::Research => &[Capability::WebSearch, Capability::FactChecking],
            TaskKind::Code => &[Capability::CodeGeneration, Capability::Debugging],
            TaskKind::Browse => &[Capability::WebNavigation, Capability::PageExtraction],
            TaskKind::Analyze => &[Capability::DataAnalysis, Capability::Reasoning],
            TaskKind::Create => &[Capability::ContentCreation, Capability::ImageGeneration],
            TaskKind::Finalize => &[Capability::Summarization],
        }
    }

    pub fn preferred_agent(&self) -> AgentKind {
        match self {
            TaskKind::Research => AgentKind::Research,
            TaskKind::Code => AgentKind::Coder,
            TaskKind::Browse => AgentKind::Browser,
            TaskKind::Analyze | TaskKind::Finalize => AgentKind::Analyst,
            TaskKind::Create => AgentKind::Creative,
        }
    }

    /// Tool names recorded in learning records for this task type.
    pub fn tools(&self) -> Vec<String> {
        let tools: &[&str] = match self {
            TaskKind::Research => &["web_search", "ai_reasoning"],
            TaskKind::Code => &["code_generation"],
            TaskKind::Browse => &["page_fetch", "ai_reasoning"],
            TaskKind::Analyze => &["ai_reasoning"],
            TaskKind::Create => &["content_generation"],
            TaskKind::Finalize => &["ai_reasoning"],
        };
        tools.iter().map(|t| t.to_string()).collect()
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Research => write!(f, "research"),
            TaskKind::Code => write!(f, "code"),
            TaskKind::Browse => write!(f, "browse"),
            TaskKind::Analyze => write!(f, "analyze"),
            TaskKind::Create => write!(f, "create"),
            TaskKind::Finalize => write!(f, "finalize"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = MaestroError;

    /// Accepts the canonical names plus the loose synonyms planners use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "research" | "search" | "investigate" => Ok(TaskKind::Research),
            "code" | "coding" | "coder" | "build" | "implement" => Ok(TaskKind::Code),
            "browse" | "browser" | "web" | "navigate" => Ok(TaskKind::Browse),
            "analyze" | "analysis" | "analyst" | "analyse" => Ok(TaskKind::Analyze),
            "create" | "creative" | "design" | "write" | "image" => Ok(TaskKind::Create),
            "finalize" | "summarize" | "summary" | "synthesize" => Ok(TaskKind::Finalize),
            other => Err(MaestroError::Decomposition(format!(
                "unknown task type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// Scales the cross-kind routing penalty.
    pub fn factor(&self) -> f64 {
        match self {
            TaskPriority::Low => 0.5,
            TaskPriority::Normal => 1.0,
            TaskPriority::High => 1.5,
            TaskPriority::Critical => 2.0,
        }
    }

    /// Lenient parse; unknown values map to `Normal`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => TaskPriority::Low,
            "high" => TaskPriority::High,
            "critical" | "urgent" => TaskPriority::Critical,
            _ => TaskPriority::Normal,
        }
    }
}

/// Status of a task. Only the transitions in [`TaskStatus::can_transition`]
/// are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Queued, Assigned)
                | (Assigned, Running)
                | (Running, Completed | Failed | Retrying | Cancelled)
                | (Retrying, Running | Cancelled)
                | (Pending | Queued | Assigned, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Output of an earlier task made visible to a later one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorOutput {
    pub task_id: Uuid,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    pub prompt: String,
    /// Free-form context (goal, hints).
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub prior_outputs: Vec<PriorOutput>,
}

/// Kind of artifact produced by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Code,
    Text,
    Image,
    Data,
    Chart,
    File,
}

/// An artifact produced during task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, kind: ArtifactKind, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            content: content.into(),
            language: None,
            task_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

/// What an agent produced for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    pub success: bool,
    pub content: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl TaskOutput {
    pub fn success(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            success: true,
            content: content.into(),
            data: None,
            artifacts: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            sources: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A unit of work in an orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub dependencies: Vec<Uuid>,
    pub input: TaskInput,
    pub output: Option<TaskOutput>,
    /// Alternative descriptions tried when the primary one fails or
    /// produces output below the validation threshold.
    #[serde(default)]
    pub alternatives: Vec<String>,
    pub assigned_agent: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: Uuid, kind: TaskKind, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id,
            title: short_title(&description),
            input: TaskInput {
                prompt: description.clone(),
                ..TaskInput::default()
            },
            description,
            kind,
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            output: None,
            alternatives: Vec::new(),
            assigned_agent: None,
            retry_count: 0,
            max_retries: 0,
            error: None,
            error_kind: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Move to `to`, stamping start/end times. Illegal transitions are
    /// rejected and leave the task untouched.
    pub fn transition(&mut self, to: TaskStatus) -> MaestroResult<()> {
        if !self.status.can_transition(to) {
            return Err(MaestroError::Orchestrator(format!(
                "task {}: illegal transition {} -> {}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        match to {
            TaskStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let start = self.started_at?;
        let end = self.completed_at?;
        Some((end - start).num_milliseconds().max(0) as u64)
    }
}

fn short_title(description: &str) -> String {
    const MAX: usize = 60;
    let line = description.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        let cut: String = line.chars().take(MAX).collect();
        format!("{}...", cut.trim_end())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A batch of tasks whose dependencies all belong to earlier phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: Uuid,
    pub index: usize,
    pub task_ids: Vec<Uuid>,
    pub parallel: bool,
    pub status: PhaseStatus,
    /// Set when the phase was forced to break a dependency deadlock.
    pub forced: bool,
}

/// A problem found while building phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanningDefect {
    /// Tasks forming a dependency cycle.
    Cycle { tasks: Vec<Uuid> },
    /// A dependency pointing at a task that does not exist.
    MissingDependency { task: Uuid, missing: Uuid },
    /// A task scheduled before all of its dependencies.
    Forced { task: Uuid },
}

impl fmt::Display for PlanningDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanningDefect::Cycle { tasks } => {
                let ids: Vec<String> = tasks.iter().map(Uuid::to_string).collect();
                write!(f, "dependency cycle: {}", ids.join(" -> "))
            }
            PlanningDefect::MissingDependency { task, missing } => {
                write!(f, "task {task} depends on unknown task {missing}")
            }
            PlanningDefect::Forced { task } => {
                write!(f, "task {task} forced into its own phase")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    /// Auto-recovery continued past failed tasks and at least one completed.
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, PlanStatus::Planning | PlanStatus::Executing)
    }
}

/// The phased schedule for one goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub goal: String,
    pub phases: Vec<Phase>,
    pub status: PlanStatus,
    /// Percentage of phases finished, in `[0, 100]`.
    pub progress: f64,
    #[serde(default)]
    pub defects: Vec<PlanningDefect>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionPlan {
    pub fn new(id: Uuid, goal: impl Into<String>) -> Self {
        Self {
            id,
            goal: goal.into(),
            phases: Vec::new(),
            status: PlanStatus::Planning,
            progress: 0.0,
            defects: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn finish(&mut self, status: PlanStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}
