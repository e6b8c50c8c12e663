use crate::ids::IdGenerator;
use crate::types::{Agent, Task, TaskKind, TaskPriority};
use maestro_agent::CompletionClient;
use maestro_core::{MaestroError, MaestroResult};
use maestro_learning::PatternHint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const PLANNER_SYSTEM_PROMPT: &str = "\
You are the planning agent of a multi-agent system. Break the user's goal \
into a small set of concrete tasks for the available agents.

Respond with ONLY a JSON array. Each element has:
  \"type\": one of research, code, browse, analyze, create, finalize
  \"title\": short title
  \"description\": what the agent must do
  \"priority\": low, normal, high or critical
  \"dependencies\": 0-based indices of tasks that must finish first
  \"alternatives\": optional list of alternative descriptions

End with a finalize task that depends on every other task.";

/// Where a task list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionSource {
    Ai,
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct Decomposition {
    pub tasks: Vec<Task>,
    pub source: DecompositionSource,
    /// Why the completion service was not used, when it was not.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    description: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    dependencies: Vec<serde_json::Value>,
    #[serde(default)]
    alternatives: Vec<String>,
}

/// Turns a goal into tasks: completion service first, keyword heuristic
/// when that is unavailable or answers garbage.
pub struct Decomposer {
    client: Option<CompletionClient>,
    ids: Arc<dyn IdGenerator>,
}

impl Decomposer {
    pub fn new(client: Option<CompletionClient>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { client, ids }
    }

    /// Never fails: every error on the AI path degrades to the heuristic.
    pub async fn decompose(
        &self,
        goal: &str,
        agents: &[Agent],
        hint: Option<&PatternHint>,
    ) -> Decomposition {
        let reason = match &self.client {
            None => "no completion service configured".to_string(),
            Some(client) => {
                let prompt = build_prompt(goal, agents, hint);
                match client.ask(PLANNER_SYSTEM_PROMPT, &prompt).await {
                    Ok(raw) => match self.parse_tasks(&raw) {
                        Ok(tasks) => {
                            info!(tasks = tasks.len(), "Goal decomposed by completion service");
                            return Decomposition {
                                tasks,
                                source: DecompositionSource::Ai,
                                fallback_reason: None,
                            };
                        }
                        Err(e) => e.to_string(),
                    },
                    Err(e) => e.to_string(),
                }
            }
        };

        warn!(reason = %reason, "Falling back to heuristic decomposition");
        Decomposition {
            tasks: self.heuristic(goal),
            source: DecompositionSource::Heuristic,
            fallback_reason: Some(reason),
        }
    }

    /// Parse a planner answer into tasks with fresh ids.
    ///
    /// The array may be wrapped in prose or a code fence. Dependencies are
    /// 0-based indices (numbers or numeric strings) or task titles; anything
    /// that resolves to nothing is dropped.
    pub fn parse_tasks(&self, raw: &str) -> MaestroResult<Vec<Task>> {
        let json = extract_json_array(raw)
            .ok_or_else(|| MaestroError::Decomposition("no JSON array in response".into()))?;
        let raw_tasks: Vec<RawTask> = serde_json::from_str(json)
            .map_err(|e| MaestroError::Decomposition(format!("unparsable task list: {e}")))?;
        if raw_tasks.is_empty() {
            return Err(MaestroError::Decomposition("empty task list".into()));
        }

        let ids: Vec<Uuid> = raw_tasks.iter().map(|_| self.ids.next_id()).collect();
        let titles: Vec<String> = raw_tasks
            .iter()
            .map(|t| t.title.clone().unwrap_or_default().trim().to_lowercase())
            .collect();

        let mut tasks = Vec::with_capacity(raw_tasks.len());
        for (i, raw) in raw_tasks.into_iter().enumerate() {
            if raw.description.trim().is_empty() {
                return Err(MaestroError::Decomposition(format!(
                    "task {i} has no description"
                )));
            }
            let kind: TaskKind = raw.kind.parse()?;
            let mut deps = Vec::new();
            for dep in &raw.dependencies {
                let index = match dep {
                    serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
                    serde_json::Value::String(s) => s
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .or_else(|| {
                            let wanted = s.trim().to_lowercase();
                            titles.iter().position(|t| !t.is_empty() && *t == wanted)
                        }),
                    _ => None,
                };
                match index {
                    Some(j) if j < ids.len() && j != i => {
                        if !deps.contains(&ids[j]) {
                            deps.push(ids[j]);
                        }
                    }
                    _ => warn!(task = i, dependency = %dep, "Dropping unresolvable dependency"),
                }
            }

            let mut task = Task::new(ids[i], kind, raw.description.trim())
                .with_dependencies(deps)
                .with_alternatives(raw.alternatives);
            if let Some(title) = raw.title.filter(|t| !t.trim().is_empty()) {
                task = task.with_title(title.trim());
            }
            if let Some(priority) = raw.priority {
                task = task.with_priority(TaskPriority::parse_lenient(&priority));
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Deterministic keyword decomposition.
    ///
    /// Research and browse tasks come first and share a phase; analysis
    /// depends on them; build and design depend on everything before them;
    /// the closing finalize task depends on all.
    pub fn heuristic(&self, goal: &str) -> Vec<Task> {
        let goal = goal.trim();
        let lower = goal.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let matches = |keywords: &[&str]| keywords.iter().any(|k| words.contains(k));

        let mut tasks: Vec<Task> = Vec::new();
        let mut gathering: Vec<Uuid> = Vec::new();

        if matches(&["research", "find", "search", "investigate", "learn", "compare"]) {
            let task = Task::new(self.ids.next_id(), TaskKind::Research, format!("Research: {goal}"))
                .with_title("Research the topic")
                .with_priority(TaskPriority::High)
                .with_alternatives(vec![
                    format!("Find authoritative sources about: {goal}"),
                    format!("Summarize what is already known about: {goal}"),
                ]);
            gathering.push(task.id);
            tasks.push(task);
        }
        if matches(&["browse", "website", "url", "http", "https", "visit", "navigate", "scrape"]) {
            let task = Task::new(
                self.ids.next_id(),
                TaskKind::Browse,
                format!("Browse the relevant web pages and extract what matters for: {goal}"),
            )
            .with_title("Browse relevant pages")
            .with_alternatives(vec![format!("Search the web and list key pages about: {goal}")]);
            gathering.push(task.id);
            tasks.push(task);
        }

        let mut earlier = gathering.clone();
        if matches(&["analyze", "analyse", "evaluate", "data", "statistics", "trend", "trends"]) {
            let task = Task::new(
                self.ids.next_id(),
                TaskKind::Analyze,
                format!("Analyze the gathered information for: {goal}"),
            )
            .with_title("Analyze findings")
            .with_dependencies(gathering.clone())
            .with_alternatives(vec![format!("List the key findings and trends for: {goal}")]);
            earlier.push(task.id);
            tasks.push(task);
        }
        if matches(&["build", "create", "implement", "code", "develop", "app", "script", "program"]) {
            let task = Task::new(self.ids.next_id(), TaskKind::Code, format!("Implement: {goal}"))
                .with_title("Implement the solution")
                .with_dependencies(earlier.clone())
                .with_alternatives(vec![format!(
                    "Write a minimal working code example for: {goal}"
                )]);
            earlier.push(task.id);
            tasks.push(task);
        }
        if matches(&["design", "image", "logo", "draw", "creative", "story", "write", "poem"]) {
            let task = Task::new(self.ids.next_id(), TaskKind::Create, format!("Create content for: {goal}"))
                .with_title("Create content")
                .with_dependencies(earlier.clone())
                .with_alternatives(vec![format!("Write a short draft for: {goal}")]);
            tasks.push(task);
        }

        if tasks.is_empty() {
            tasks.push(
                Task::new(self.ids.next_id(), TaskKind::Research, format!("Research: {goal}"))
                    .with_title("Research the topic")
                    .with_alternatives(vec![format!("Summarize what is already known about: {goal}")]),
            );
        }

        let all: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        tasks.push(
            Task::new(
                self.ids.next_id(),
                TaskKind::Finalize,
                format!("Summarize every result into a final answer for: {goal}"),
            )
            .with_title("Summarize results")
            .with_priority(TaskPriority::High)
            .with_dependencies(all),
        );
        tasks
    }
}

/// The planner prompt: goal, available agents and an optional learned hint.
pub fn build_prompt(goal: &str, agents: &[Agent], hint: Option<&PatternHint>) -> String {
    let mut prompt = format!("Goal: {goal}\n\nAvailable agents:\n");
    for agent in agents {
        let caps: Vec<String> = agent.capabilities.iter().map(ToString::to_string).collect();
        prompt.push_str(&format!("- {} ({}): {}\n", agent.name, agent.kind, caps.join(", ")));
    }
    if let Some(hint) = hint {
        prompt.push_str(&format!(
            "\nHint from earlier runs on a similar goal: {}.\n",
            hint.describe()
        ));
    }
    prompt.push_str("\nReturn the JSON array now.");
    prompt
}

fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (end > start).then(|| &raw[start..=end])
}
