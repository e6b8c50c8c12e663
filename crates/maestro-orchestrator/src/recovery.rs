use crate::config::RetryConfig;
use crate::types::{Task, TaskOutput};
use crate::validator::ValidationReport;
use maestro_agent::CompletionClient;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

const FIX_PROMPT: &str = "\
You review failed work in a multi-agent system. Given a task, the output it \
produced and the problems a validator found, propose one concrete fix the \
next attempt should apply. Answer in at most five sentences.";

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAttempt {
    /// Same agent again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Try a different idle capable agent.
    Reassign { round: u32 },
    /// Run the alternative description at this index.
    Alternative { index: usize },
    GiveUp,
}

/// Budget bookkeeping for one task: in-place retries first, then
/// reassignment, then alternatives.
#[derive(Debug, Clone)]
pub struct RecoveryBudget {
    max_retries: u32,
    max_reassignments: u32,
    alternatives: usize,
    backoff_base_ms: u64,
    backoff_jitter_ms: u64,
    retries: u32,
    reassignments: u32,
    alternatives_used: usize,
}

impl RecoveryBudget {
    /// `alternatives` is how many alternative descriptions the task has;
    /// at most `max_alternative_attempts` of them are used.
    pub fn new(max_retries: u32, alternatives: usize, config: &RetryConfig) -> Self {
        Self {
            max_retries,
            max_reassignments: config.max_reassignments,
            alternatives: alternatives.min(config.max_alternative_attempts as usize),
            backoff_base_ms: config.backoff_base_ms,
            backoff_jitter_ms: config.backoff_jitter_ms,
            retries: 0,
            reassignments: 0,
            alternatives_used: 0,
        }
    }

    pub fn retries_used(&self) -> u32 {
        self.retries
    }

    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> NextAttempt {
        if self.retries < self.max_retries {
            self.retries += 1;
            return NextAttempt::Retry {
                attempt: self.retries,
                delay: backoff_delay(self.backoff_base_ms, self.backoff_jitter_ms, self.retries, rng),
            };
        }
        if self.reassignments < self.max_reassignments {
            self.reassignments += 1;
            return NextAttempt::Reassign {
                round: self.reassignments,
            };
        }
        if self.alternatives_used < self.alternatives {
            let index = self.alternatives_used;
            self.alternatives_used += 1;
            return NextAttempt::Alternative { index };
        }
        NextAttempt::GiveUp
    }
}

/// Linear backoff: `base × attempt`, plus up to `jitter` extra milliseconds.
pub fn backoff_delay<R: Rng + ?Sized>(base_ms: u64, jitter_ms: u64, attempt: u32, rng: &mut R) -> Duration {
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rng.gen_range(0..=jitter_ms)
    };
    Duration::from_millis(base_ms.saturating_mul(u64::from(attempt)).saturating_add(jitter))
}

/// Best output seen while self-healing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub output: TaskOutput,
    pub score: f64,
    /// `None` for the primary description.
    pub alternative: Option<usize>,
}

impl Candidate {
    /// Keep whichever of the two scored higher; ties keep the incumbent.
    pub fn better(self, other: Candidate) -> Candidate {
        if other.score > self.score {
            other
        } else {
            self
        }
    }

    /// Output with confidence capped at the validation score.
    pub fn into_capped_output(self) -> TaskOutput {
        let mut output = self.output;
        output.confidence = output.confidence.min(self.score);
        output
    }
}

/// Ask the completion service how to fix an output that failed validation.
/// The answer is recorded, never executed.
pub async fn propose_fix(
    client: &CompletionClient,
    task: &Task,
    output: &TaskOutput,
    report: &ValidationReport,
) -> Option<String> {
    let prompt = format!(
        "Task ({}): {}\n\nOutput:\n{}\n\nValidator score {:.2}; problems: {}",
        task.kind,
        task.description,
        output.content.chars().take(2_000).collect::<String>(),
        report.score,
        report.issues.join("; ")
    );
    match client.ask(FIX_PROMPT, &prompt).await {
        Ok(fix) if !fix.trim().is_empty() => Some(fix.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "Could not get a fix proposal");
            None
        }
    }
}
