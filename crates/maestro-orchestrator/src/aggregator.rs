use crate::context::SharedContext;
use crate::types::{Artifact, ExecutionPlan, PlanStatus, Task, TaskKind, TaskStatus};
use maestro_agent::CompletionClient;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

const SUMMARY_PROMPT: &str = "\
You write the closing report of a multi-agent run. Given the goal and the \
task outputs, write a short executive summary (at most five sentences), \
then a line 'Next steps:' followed by up to five bullet points.";

const MAX_NEXT_STEPS: usize = 5;

/// The final deliverable of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub plan_id: Uuid,
    pub goal: String,
    pub status: PlanStatus,
    /// False when no task succeeded; `error` then says why.
    pub success: bool,
    pub content: String,
    pub summary: String,
    pub next_steps: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub suggestions: Vec<String>,
    pub sources: Vec<String>,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub error: Option<String>,
    /// Shared context exported at the end of the run.
    pub context: serde_json::Value,
    pub duration_ms: u64,
}

pub struct Aggregator {
    client: Option<CompletionClient>,
}

impl Aggregator {
    pub fn new(client: Option<CompletionClient>) -> Self {
        Self { client }
    }

    pub async fn aggregate(
        &self,
        plan: &ExecutionPlan,
        tasks: &[Task],
        context: &SharedContext,
        error: Option<String>,
        duration_ms: u64,
    ) -> AggregatedResult {
        let succeeded: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed && t.output.is_some())
            .collect();
        let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();

        let mut result = AggregatedResult {
            plan_id: plan.id,
            goal: plan.goal.clone(),
            status: plan.status,
            success: false,
            content: String::new(),
            summary: String::new(),
            next_steps: Vec::new(),
            artifacts: Vec::new(),
            suggestions: Vec::new(),
            sources: Vec::new(),
            completed_tasks: succeeded.len(),
            failed_tasks: failed,
            error,
            context: context.to_json(),
            duration_ms,
        };

        if succeeded.is_empty() {
            let reasons: Vec<String> = tasks
                .iter()
                .filter_map(|t| t.error.as_ref().map(|e| format!("{}: {e}", t.title)))
                .collect();
            let error = result
                .error
                .take()
                .unwrap_or_else(|| "no task completed successfully".to_string());
            result.summary = if reasons.is_empty() {
                format!("The run for '{}' produced no results.", plan.goal)
            } else {
                format!(
                    "The run for '{}' produced no results. Failures: {}",
                    plan.goal,
                    reasons.join("; ")
                )
            };
            result.error = Some(error);
            warn!(plan_id = %plan.id, failed, "Run produced no successful output");
            return result;
        }

        let mut sections = Vec::with_capacity(succeeded.len());
        for task in &succeeded {
            let Some(output) = &task.output else { continue };
            sections.push(format!("## {}\n\n{}", task.title, output.content.trim()));
            result.artifacts.extend(output.artifacts.iter().cloned());
            push_unique(&mut result.suggestions, &output.suggestions);
            push_unique(&mut result.sources, &output.sources);
        }
        result.content = sections.join("\n\n");
        result.success = true;

        let (summary, next_steps) = match self.summarize(&plan.goal, &result.content).await {
            Some(parsed) => parsed,
            None => fallback_summary(plan, &succeeded, tasks.len(), &result.suggestions),
        };
        result.summary = summary;
        result.next_steps = next_steps;

        info!(
            plan_id = %plan.id,
            completed = result.completed_tasks,
            failed = result.failed_tasks,
            artifacts = result.artifacts.len(),
            "Results aggregated"
        );
        result
    }

    async fn summarize(&self, goal: &str, content: &str) -> Option<(String, Vec<String>)> {
        let client = self.client.as_ref()?;
        let excerpt: String = content.chars().take(12_000).collect();
        let prompt = format!("Goal: {goal}\n\nTask outputs:\n{excerpt}");
        match client.ask(SUMMARY_PROMPT, &prompt).await {
            Ok(answer) => {
                let parsed = parse_summary(&answer);
                (!parsed.0.is_empty()).then_some(parsed)
            }
            Err(e) => {
                warn!(error = %e, "Summary request failed; using fallback summary");
                None
            }
        }
    }
}

/// Split an answer into the summary text and the bullets after
/// "Next steps:".
pub fn parse_summary(answer: &str) -> (String, Vec<String>) {
    let mut summary = Vec::new();
    let mut steps = Vec::new();
    let mut in_steps = false;
    for line in answer.lines() {
        let trimmed = line.trim();
        if trimmed.to_lowercase().trim_start_matches(['#', '*', ' ']).starts_with("next steps") {
            in_steps = true;
            continue;
        }
        if in_steps {
            let item = trimmed
                .trim_start_matches(|c: char| c == '-' || c == '*' || c == '.' || c.is_ascii_digit())
                .trim();
            if !item.is_empty() && steps.len() < MAX_NEXT_STEPS {
                steps.push(item.to_string());
            }
        } else if !trimmed.is_empty() {
            summary.push(trimmed);
        }
    }
    (summary.join(" "), steps)
}

fn fallback_summary(
    plan: &ExecutionPlan,
    succeeded: &[&Task],
    total: usize,
    suggestions: &[String],
) -> (String, Vec<String>) {
    let mut summary = format!(
        "{} of {total} tasks completed for '{}'.",
        succeeded.len(),
        plan.goal
    );
    let lead = succeeded
        .iter()
        .find(|t| t.kind == TaskKind::Finalize)
        .or_else(|| succeeded.last())
        .and_then(|t| t.output.as_ref())
        .and_then(|o| o.content.split_terminator(['.', '\n']).map(str::trim).find(|s| !s.is_empty()));
    if let Some(lead) = lead {
        summary.push(' ');
        summary.push_str(lead);
        summary.push('.');
    }
    (summary, suggestions.iter().take(MAX_NEXT_STEPS).cloned().collect())
}

fn push_unique(into: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{ArtifactKind, TaskOutput};

    fn done(n: u128, kind: TaskKind, content: &str, suggestions: &[&str]) -> Task {
        let mut task = Task::new(Uuid::from_u128(n), kind, format!("task {n}"));
        for s in [
            TaskStatus::Queued,
            TaskStatus::Assigned,
            TaskStatus::Running,
            TaskStatus::Completed,
        ] {
            task.transition(s).unwrap();
        }
        task.output = Some(
            TaskOutput::success(content, 0.8)
                .with_suggestions(suggestions.iter().map(|s| s.to_string()).collect()),
        );
        task
    }

    fn plan() -> ExecutionPlan {
        let mut plan = ExecutionPlan::new(Uuid::from_u128(99), "learn tides");
        plan.finish(PlanStatus::Completed);
        plan
    }

    #[tokio::test]
    async fn test_aggregates_outputs_and_dedups_suggestions() {
        let mut code = done(2, TaskKind::Code, "```rust\n```", &["add tests", "ship it"]);
        if let Some(out) = code.output.as_mut() {
            out.artifacts.push(Artifact::new("a.rs", ArtifactKind::Code, ""));
        }
        let tasks = vec![
            done(1, TaskKind::Research, "Tides follow the moon.", &["add tests"]),
            code,
            done(3, TaskKind::Finalize, "Tides are driven by gravity. More text", &[]),
        ];
        let result = Aggregator::new(None)
            .aggregate(&plan(), &tasks, &SharedContext::new("learn tides"), None, 10)
            .await;

        assert!(result.success);
        assert_eq!(result.completed_tasks, 3);
        assert_eq!(result.suggestions, vec!["add tests", "ship it"]);
        assert_eq!(result.artifacts.len(), 1);
        assert!(result.content.contains("## task 1"));
        assert!(result.summary.starts_with("3 of 3 tasks completed"));
        assert!(result.summary.contains("Tides are driven by gravity."));
        assert_eq!(result.context["goal"], "learn tides");
    }

    #[tokio::test]
    async fn test_no_success_is_an_explicit_error() {
        let mut failed = Task::new(Uuid::from_u128(1), TaskKind::Research, "look up tides");
        for s in [TaskStatus::Queued, TaskStatus::Assigned, TaskStatus::Running, TaskStatus::Failed] {
            failed.transition(s).unwrap();
        }
        failed.error = Some("search down".into());
        let result = Aggregator::new(None)
            .aggregate(&plan(), &[failed], &SharedContext::new("g"), None, 5)
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no task completed successfully"));
        assert!(result.summary.contains("search down"));
        assert_eq!(result.failed_tasks, 1);
    }

    #[test]
    fn test_parse_summary() {
        let answer = "Tides are predictable.\nThey follow the moon.\n\n**Next steps:**\n- Read tables\n2. Visit a coast\n";
        let (summary, steps) = parse_summary(answer);
        assert_eq!(summary, "Tides are predictable. They follow the moon.");
        assert_eq!(steps, vec!["Read tables", "Visit a coast"]);
    }
}
