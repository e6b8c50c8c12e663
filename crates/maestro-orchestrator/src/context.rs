use crate::types::Artifact;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use uuid::Uuid;

const CORROBORATION_BONUS: f64 = 0.1;

/// A claim extracted from task output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub content: String,
    pub source_task: Uuid,
    pub confidence: f64,
    /// Agents whose output stated the same fact.
    pub corroborated_by: Vec<String>,
}

/// A choice made during the run (routing, recovery) and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub made_by: String,
    pub choice: String,
    pub reasoning: String,
    pub affected_tasks: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// A message between agents (handoffs, fix proposals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Run-scoped store of facts, decisions, artifacts and messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedContext {
    pub goal: String,
    pub facts: HashMap<String, Fact>,
    pub decisions: Vec<Decision>,
    pub artifacts: HashMap<String, Artifact>,
    pub messages: Vec<AgentMessage>,
    pub scratch: HashMap<String, serde_json::Value>,
}

impl SharedContext {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Self::default()
        }
    }

    /// Add a fact, or corroborate it when another agent already stated it.
    pub fn add_fact(
        &mut self,
        content: &str,
        source_task: Uuid,
        agent: &str,
        confidence: f64,
    ) {
        let key = fact_key(content);
        if key.is_empty() {
            return;
        }
        match self.facts.get_mut(&key) {
            Some(fact) => {
                if !fact.corroborated_by.iter().any(|a| a == agent) {
                    fact.corroborated_by.push(agent.to_string());
                    fact.confidence = (fact.confidence + CORROBORATION_BONUS).min(1.0);
                }
            }
            None => {
                self.facts.insert(
                    key,
                    Fact {
                        content: content.trim().to_string(),
                        source_task,
                        confidence: confidence.clamp(0.0, 1.0),
                        corroborated_by: vec![agent.to_string()],
                    },
                );
            }
        }
    }

    pub fn record_decision(
        &mut self,
        made_by: impl Into<String>,
        choice: impl Into<String>,
        reasoning: impl Into<String>,
        affected_tasks: Vec<Uuid>,
    ) {
        self.decisions.push(Decision {
            made_by: made_by.into(),
            choice: choice.into(),
            reasoning: reasoning.into(),
            affected_tasks,
            timestamp: Utc::now(),
        });
    }

    /// Store an artifact under its name; a clash gets a numeric suffix.
    pub fn add_artifact(&mut self, artifact: Artifact) -> String {
        let mut key = artifact.name.clone();
        let mut n = 2;
        while self.artifacts.contains_key(&key) {
            key = format!("{}-{n}", artifact.name);
            n += 1;
        }
        self.artifacts.insert(key.clone(), artifact);
        key
    }

    pub fn post_message(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> AgentMessage {
        let message = AgentMessage {
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp: Utc::now(),
        };
        self.messages.push(message.clone());
        message
    }

    pub fn remember(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.scratch.insert(key.into(), value);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn fact_key(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .to_lowercase()
}

fn sentence_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^.!?\n]+[.!?]").ok()).as_ref()
}

fn claim_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(is|are|was|were|has|have|contains|supports|provides|\d+(\.\d+)?%?)\b").ok()
    })
    .as_ref()
}

/// Pull declarative, fact-like sentences out of free text.
///
/// Loose on purpose: a sentence qualifies when it is of reasonable length,
/// is not a question and contains a copula, a common assertion verb or a
/// number.
pub fn extract_facts(text: &str) -> Vec<String> {
    let (Some(sentences), Some(claims)) = (sentence_re(), claim_re()) else {
        return Vec::new();
    };
    let mut facts: Vec<String> = Vec::new();
    for m in sentences.find_iter(text) {
        let sentence = m
            .as_str()
            .trim()
            .trim_start_matches(['-', '*', '#', ' '])
            .trim();
        let len = sentence.chars().count();
        if !(25..=300).contains(&len) || sentence.ends_with('?') {
            continue;
        }
        if claims.is_match(sentence) && !facts.iter().any(|f| f == sentence) {
            facts.push(sentence.to_string());
        }
    }
    facts
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::ArtifactKind;

    #[test]
    fn test_fact_corroboration() {
        let mut ctx = SharedContext::new("goal");
        let task = Uuid::from_u128(1);
        ctx.add_fact("Tokio is an async runtime.", task, "research-1", 0.7);
        ctx.add_fact("tokio is an  async runtime", task, "browser-1", 0.5);
        ctx.add_fact("Tokio is an async runtime.", task, "browser-1", 0.5);

        assert_eq!(ctx.facts.len(), 1);
        let fact = ctx.facts.values().next().unwrap();
        assert_eq!(fact.corroborated_by, vec!["research-1", "browser-1"]);
        assert!((fact.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_artifact_names_do_not_clash() {
        let mut ctx = SharedContext::new("goal");
        let a = ctx.add_artifact(Artifact::new("main.rs", ArtifactKind::Code, "fn main() {}"));
        let b = ctx.add_artifact(Artifact::new("main.rs", ArtifactKind::Code, "fn other() {}"));
        assert_eq!(a, "main.rs");
        assert_eq!(b, "main.rs-2");
        assert_eq!(ctx.artifacts.len(), 2);
    }

    #[test]
    fn test_extract_facts() {
        let text = "Rust is a systems programming language. Why use it?\n\
                    - Tokio provides an asynchronous runtime for Rust.\n\
                    Adoption grew 40% in 2023. Short one. Hello there friend, welcome back.";
        let facts = extract_facts(text);
        assert!(facts.contains(&"Rust is a systems programming language.".to_string()));
        assert!(facts.contains(&"Tokio provides an asynchronous runtime for Rust.".to_string()));
        assert!(facts.iter().any(|f| f.contains("40%")));
        assert!(!facts.iter().any(|f| f.contains("Why use it")));
        assert!(!facts.iter().any(|f| f.contains("welcome back")));
    }

    #[test]
    fn test_context_exports_to_json() {
        let mut ctx = SharedContext::new("build a CLI");
        ctx.record_decision("router", "coder-1", "best score", vec![Uuid::from_u128(1)]);
        ctx.post_message("coder-1", "analyst-1", "handoff");
        ctx.remember("attempts", serde_json::json!(2));
        let json = ctx.to_json();
        assert_eq!(json["goal"], "build a CLI");
        assert_eq!(json["decisions"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["to"], "analyst-1");
        assert_eq!(json["scratch"]["attempts"], 2);
    }
}
