use crate::config::ValidationConfig;
use crate::types::{ArtifactKind, TaskKind, TaskOutput};
use serde::{Deserialize, Serialize};

const NON_EMPTY_WEIGHT: f64 = 0.4;
const SHORT_OUTPUT_CHARS: usize = 20;

/// Score of one output and what was missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub score: f64,
    pub passed: bool,
    pub issues: Vec<String>,
}

/// Cheap structural checks on successful task output.
///
/// Every non-empty output earns 0.4; the remaining 0.6 depends on the task
/// kind (code fences for code, links for research, length for reasoning).
#[derive(Debug, Clone)]
pub struct OutputValidator {
    config: ValidationConfig,
}

impl OutputValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    pub fn validate(&self, kind: TaskKind, output: &TaskOutput) -> ValidationReport {
        if !self.config.enabled {
            return ValidationReport {
                score: 1.0,
                passed: true,
                issues: Vec::new(),
            };
        }

        let content = output.content.trim();
        let len = content.chars().count();
        let mut issues = Vec::new();
        let mut score: f64 = 0.0;

        if content.is_empty() && output.artifacts.is_empty() {
            issues.push("output is empty".to_string());
        } else {
            score += NON_EMPTY_WEIGHT;
        }

        match kind {
            TaskKind::Code => {
                let fenced = content.contains("```")
                    || output.artifacts.iter().any(|a| a.kind == ArtifactKind::Code);
                if fenced {
                    score += 0.4;
                } else {
                    issues.push("no code block".to_string());
                }
                if len >= SHORT_OUTPUT_CHARS {
                    score += 0.2;
                } else {
                    issues.push("code output too short".to_string());
                }
            }
            TaskKind::Research | TaskKind::Browse => {
                if !output.sources.is_empty() || has_url(content) {
                    score += 0.3;
                } else {
                    issues.push("no sources or links".to_string());
                }
                if len >= self.config.min_reasoning_length / 2 {
                    score += 0.3;
                } else {
                    issues.push(format!("shorter than {} chars", self.config.min_reasoning_length / 2));
                }
            }
            TaskKind::Analyze | TaskKind::Finalize => {
                if len >= self.config.min_reasoning_length {
                    score += 0.6;
                } else {
                    issues.push(format!(
                        "reasoning shorter than {} chars",
                        self.config.min_reasoning_length
                    ));
                }
            }
            TaskKind::Create => {
                if len >= SHORT_OUTPUT_CHARS || !output.artifacts.is_empty() {
                    score += 0.6;
                } else {
                    issues.push("creative output too short".to_string());
                }
            }
        }

        let score = score.min(1.0);
        ValidationReport {
            score,
            passed: score >= self.config.threshold,
            issues,
        }
    }
}

fn has_url(text: &str) -> bool {
    text.contains("http://") || text.contains("https://")
}
