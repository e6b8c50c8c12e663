use crate::planner::PlannerConfig;
use maestro_agent::ModelConfig;
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that fills an empty `model.api_key`.
pub const API_KEY_ENV: &str = "MAESTRO_API_KEY";

/// Top-level engine configuration. Every section is optional in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Bound on concurrently running tasks within one phase.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// Keep executing later phases after a phase failed.
    #[serde(default = "default_true")]
    pub auto_recovery: bool,
    #[serde(default = "default_plan_timeout_ms")]
    pub plan_timeout_ms: u64,
    /// Overrides the per-agent task timeout when set.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,
    /// Reject cyclic or dangling dependency graphs instead of forcing
    /// progress.
    #[serde(default)]
    pub strict_dependencies: bool,
    /// Capacity of each of the search and page caches.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Seed for backoff jitter; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    /// Completion service; without it the engine runs on heuristics only.
    #[serde(default)]
    pub model: Option<ModelConfig>,
}

fn default_max_parallel_tasks() -> usize {
    3
}
fn default_true() -> bool {
    true
}
fn default_plan_timeout_ms() -> u64 {
    600_000
}
fn default_completion_timeout_ms() -> u64 {
    60_000
}
fn default_cache_capacity() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            auto_recovery: true,
            plan_timeout_ms: default_plan_timeout_ms(),
            task_timeout_ms: None,
            completion_timeout_ms: default_completion_timeout_ms(),
            strict_dependencies: false,
            cache_capacity: default_cache_capacity(),
            seed: None,
            retry: RetryConfig::default(),
            validation: ValidationConfig::default(),
            learning: LearningConfig::default(),
            planner: PlannerConfig::default(),
            search: SearchConfig::default(),
            model: None,
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate TOML, then apply the API key from the environment.
    pub fn from_toml_str(raw: &str) -> MaestroResult<Self> {
        let mut config: Self = toml::from_str(raw)
            .map_err(|e| MaestroError::Config(format!("invalid config: {e}")))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> MaestroResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MaestroError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    fn apply_env(&mut self) {
        if let Some(model) = self.model.as_mut() {
            if model.api_key.is_empty() {
                if let Ok(key) = std::env::var(API_KEY_ENV) {
                    model.api_key = key;
                }
            }
        }
    }

    pub fn validate(&self) -> MaestroResult<()> {
        if self.max_parallel_tasks == 0 {
            return Err(MaestroError::Config(
                "max_parallel_tasks must be at least 1".into(),
            ));
        }
        if self.plan_timeout_ms == 0 || self.completion_timeout_ms == 0 {
            return Err(MaestroError::Config("timeouts must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.validation.threshold) {
            return Err(MaestroError::Config(format!(
                "validation.threshold must be in [0, 1], got {}",
                self.validation.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.learning.hint_min_confidence) {
            return Err(MaestroError::Config(format!(
                "learning.hint_min_confidence must be in [0, 1], got {}",
                self.learning.hint_min_confidence
            )));
        }
        self.planner.validate()
    }

    pub fn plan_timeout(&self) -> Duration {
        Duration::from_millis(self.plan_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

/// Task-level retry, reassignment and alternative budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Overrides the per-agent retry budget when set.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Retry delay is `backoff_base_ms × attempt` plus jitter.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub backoff_jitter_ms: u64,
    #[serde(default = "default_max_reassignments")]
    pub max_reassignments: u32,
    #[serde(default = "default_max_alternative_attempts")]
    pub max_alternative_attempts: u32,
}

fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_reassignments() -> u32 {
    1
}
fn default_max_alternative_attempts() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_jitter_ms: 0,
            max_reassignments: default_max_reassignments(),
            max_alternative_attempts: default_max_alternative_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum score in `[0, 1]` for an output to be accepted.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Characters required of analysis and summary outputs.
    #[serde(default = "default_min_reasoning_length")]
    pub min_reasoning_length: usize,
}

fn default_threshold() -> f64 {
    0.6
}
fn default_min_reasoning_length() -> usize {
    80
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            min_reasoning_length: default_min_reasoning_length(),
        }
    }
}

/// When learned patterns are trusted enough to hint the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_hint_min_confidence")]
    pub hint_min_confidence: f64,
    #[serde(default = "default_hint_min_runs")]
    pub hint_min_runs: u64,
}

fn default_hint_min_confidence() -> f64 {
    0.7
}
fn default_hint_min_runs() -> u64 {
    2
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            hint_min_confidence: default_hint_min_confidence(),
            hint_min_runs: default_hint_min_runs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Alternative instant-answer endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
    /// Allow page fetches to loopback and private networks.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config.max_parallel_tasks, 3);
        assert!(config.auto_recovery);
        assert_eq!(config.plan_timeout_ms, 600_000);
        assert_eq!(config.retry.backoff_base_ms, 1000);
        assert_eq!(config.retry.max_alternative_attempts, 2);
        assert!((config.validation.threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.learning.hint_min_runs, 2);
        assert!(config.model.is_none());
    }

    #[test]
    fn test_sections_parse() {
        let raw = r#"
            max_parallel_tasks = 5
            strict_dependencies = true
            seed = 42

            [retry]
            max_retries = 4
            backoff_base_ms = 10

            [validation]
            threshold = 0.8

            [planner]
            max_steps = 20

            [model]
            provider = "ollama"
            model_id = "llama3"
        "#;
        let config = OrchestratorConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.max_parallel_tasks, 5);
        assert!(config.strict_dependencies);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.retry.max_retries, Some(4));
        assert_eq!(config.planner.max_steps, 20);
        assert_eq!(config.model.unwrap().model_id, "llama3");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(OrchestratorConfig::from_toml_str("max_parallel_tasks = 0").is_err());
        assert!(OrchestratorConfig::from_toml_str("[validation]\nthreshold = 1.5").is_err());
        assert!(OrchestratorConfig::from_toml_str("max_parallel_tasks = \"many\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_parallel_tasks = 2\n[retry]\nmax_reassignments = 0").unwrap();
        let config = OrchestratorConfig::load(file.path()).unwrap();
        assert_eq!(config.max_parallel_tasks, 2);
        assert_eq!(config.retry.max_reassignments, 0);
        assert!(OrchestratorConfig::load("/nonexistent/maestro.toml").is_err());
    }
}
