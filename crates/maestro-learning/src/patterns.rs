use chrono::{DateTime, Utc};
use maestro_core::MaestroResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Number of leading goal words used to match similar goals.
const GOAL_PREFIX_WORDS: usize = 4;
const MAX_EVENTS: usize = 500;

/// Quality of one completed task, each dimension in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub accuracy: f64,
    pub completeness: f64,
    pub performance: f64,
    pub reliability: f64,
    /// Proxy for user satisfaction; the engine uses the validation score.
    pub user_satisfaction: f64,
    pub error_rate: f64,
}

impl QualityMetrics {
    /// Metrics for a clean success scored `score` by the validator.
    pub fn success(score: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            accuracy: 1.0,
            completeness: score,
            performance: 1.0,
            reliability: 1.0,
            user_satisfaction: score,
            error_rate: 0.0,
        }
    }

    pub fn failure() -> Self {
        Self {
            accuracy: 0.0,
            completeness: 0.0,
            performance: 0.0,
            reliability: 0.0,
            user_satisfaction: 0.0,
            error_rate: 1.0,
        }
    }

    /// Weighted aggregate in `[0, 1]`.
    pub fn overall(&self) -> f64 {
        let score = 0.35 * self.accuracy
            + 0.2 * self.completeness
            + 0.1 * self.performance
            + 0.15 * self.reliability
            + 0.2 * self.user_satisfaction;
        (score * (1.0 - 0.5 * self.error_rate)).clamp(0.0, 1.0)
    }
}

/// One observation fed into the pattern memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub goal: String,
    pub task_type: String,
    pub tools_used: Vec<String>,
    pub metrics: QualityMetrics,
    pub recorded_at: DateTime<Utc>,
}

impl LearningRecord {
    pub fn new(
        goal: impl Into<String>,
        task_type: impl Into<String>,
        tools_used: Vec<String>,
        metrics: QualityMetrics,
    ) -> Self {
        Self {
            goal: goal.into(),
            task_type: task_type.into(),
            tools_used,
            metrics,
            recorded_at: Utc::now(),
        }
    }
}

/// Running statistics for one `task_type:tools` pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub task_type: String,
    pub tools: Vec<String>,
    pub runs: u64,
    /// Running average of `accuracy`.
    pub average_accuracy: f64,
    /// Running average of `user_satisfaction`.
    #[serde(default)]
    pub average_satisfaction: f64,
    pub last_seen: DateTime<Utc>,
}

impl PatternStats {
    pub fn confidence(&self) -> f64 {
        self.average_accuracy
    }
}

/// A recommendation handed to the decomposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternHint {
    pub task_type: String,
    pub tools: Vec<String>,
    pub confidence: f64,
    pub runs: u64,
}

impl PatternHint {
    /// One-line rendering for planner prompts.
    pub fn describe(&self) -> String {
        format!(
            "'{}' tasks using [{}] succeeded with confidence {:.2} over {} runs",
            self.task_type,
            self.tools.join(", "),
            self.confidence,
            self.runs
        )
    }
}

fn pattern_key(task_type: &str, tools: &[String]) -> String {
    let mut sorted: Vec<&str> = tools.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    format!("{task_type}:{}", sorted.join(","))
}

fn goal_prefix(goal: &str) -> String {
    goal.split_whitespace()
        .take(GOAL_PREFIX_WORDS)
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Success statistics keyed by `task_type:tools`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternMemory {
    patterns: HashMap<String, PatternStats>,
    /// Goal prefix to the pattern keys observed under it.
    goals: HashMap<String, Vec<String>>,
}

impl PatternMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the running average.
    pub fn record(&mut self, record: &LearningRecord) {
        let key = pattern_key(&record.task_type, &record.tools_used);
        let stats = self
            .patterns
            .entry(key.clone())
            .or_insert_with(|| PatternStats {
                task_type: record.task_type.clone(),
                tools: {
                    let mut tools = record.tools_used.clone();
                    tools.sort();
                    tools.dedup();
                    tools
                },
                runs: 0,
                average_accuracy: 0.0,
                average_satisfaction: 0.0,
                last_seen: record.recorded_at,
            });
        stats.runs += 1;
        stats.average_accuracy +=
            (record.metrics.accuracy - stats.average_accuracy) / stats.runs as f64;
        stats.average_satisfaction +=
            (record.metrics.user_satisfaction - stats.average_satisfaction) / stats.runs as f64;
        stats.last_seen = record.recorded_at;

        let prefix = goal_prefix(&record.goal);
        if !prefix.is_empty() {
            let keys = self.goals.entry(prefix).or_default();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    pub fn get(&self, task_type: &str, tools: &[String]) -> Option<&PatternStats> {
        self.patterns.get(&pattern_key(task_type, tools))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Best known tool combination for a task type.
    pub fn recommend(&self, task_type: &str, min_runs: u64) -> Option<PatternHint> {
        self.patterns
            .values()
            .filter(|s| s.task_type == task_type && s.runs >= min_runs)
            .max_by(|a, b| {
                a.confidence()
                    .total_cmp(&b.confidence())
                    .then(a.runs.cmp(&b.runs))
            })
            .map(to_hint)
    }

    /// Highest-confidence pattern previously seen under a similar goal.
    pub fn hint_for_goal(
        &self,
        goal: &str,
        min_confidence: f64,
        min_runs: u64,
    ) -> Option<PatternHint> {
        let keys = self.goals.get(&goal_prefix(goal))?;
        keys.iter()
            .filter_map(|k| self.patterns.get(k))
            .filter(|s| s.runs >= min_runs && s.confidence() >= min_confidence)
            .max_by(|a, b| a.confidence().total_cmp(&b.confidence()))
            .map(to_hint)
    }

    pub fn to_json(&self) -> MaestroResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> MaestroResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn to_hint(stats: &PatternStats) -> PatternHint {
    PatternHint {
        task_type: stats.task_type.clone(),
        tools: stats.tools.clone(),
        confidence: stats.confidence(),
        runs: stats.runs,
    }
}

/// What the engine noticed while recovering from trouble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningEventKind {
    Retry,
    Reassignment,
    AlternativeUsed,
    SelfHeal,
    /// A fix proposed by the completion service; never re-executed.
    ProposedFix,
    TaskFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningEvent {
    pub kind: LearningEventKind,
    pub task_type: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Thread-safe facade over [`PatternMemory`] plus a bounded event log.
#[derive(Debug, Default)]
pub struct Learner {
    memory: RwLock<PatternMemory>,
    events: RwLock<VecDeque<LearningEvent>>,
}

impl Learner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(memory: PatternMemory) -> Self {
        Self {
            memory: RwLock::new(memory),
            events: RwLock::new(VecDeque::new()),
        }
    }

    pub fn record(&self, record: &LearningRecord) {
        debug!(
            task_type = %record.task_type,
            tools = ?record.tools_used,
            accuracy = record.metrics.accuracy,
            "Learning record"
        );
        self.memory.write().record(record);
    }

    pub fn record_event(
        &self,
        kind: LearningEventKind,
        task_type: impl Into<String>,
        detail: impl Into<String>,
    ) {
        let event = LearningEvent {
            kind,
            task_type: task_type.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        };
        info!(kind = ?event.kind, task_type = %event.task_type, "Learning event");
        let mut events = self.events.write();
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn events(&self) -> Vec<LearningEvent> {
        self.events.read().iter().cloned().collect()
    }

    pub fn events_of(&self, kind: &LearningEventKind) -> Vec<LearningEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| &e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn recommend(&self, task_type: &str, min_runs: u64) -> Option<PatternHint> {
        self.memory.read().recommend(task_type, min_runs)
    }

    pub fn hint_for_goal(
        &self,
        goal: &str,
        min_confidence: f64,
        min_runs: u64,
    ) -> Option<PatternHint> {
        self.memory.read().hint_for_goal(goal, min_confidence, min_runs)
    }

    pub fn snapshot(&self) -> PatternMemory {
        self.memory.read().clone()
    }
}
