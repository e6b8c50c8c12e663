use crate::types::{Agent, AgentConfig, AgentKind, Capability};

/// The default roster: one agent per kind.
pub fn default_agents() -> Vec<Agent> {
    AgentKind::ALL.iter().map(|k| default_agent(*k)).collect()
}

/// Build the default agent of a kind, with id `<kind>-1`.
pub fn default_agent(kind: AgentKind) -> Agent {
    let name = match kind {
        AgentKind::Research => "Research Agent",
        AgentKind::Coder => "Coder Agent",
        AgentKind::Browser => "Browser Agent",
        AgentKind::Analyst => "Analyst Agent",
        AgentKind::Creative => "Creative Agent",
    };
    Agent::new(
        format!("{kind}-1"),
        kind,
        default_capabilities(kind),
        default_config(kind),
    )
    .with_name(name)
}

pub fn default_capabilities(kind: AgentKind) -> Vec<Capability> {
    use Capability::*;
    match kind {
        AgentKind::Research => vec![WebSearch, FactChecking, Summarization],
        AgentKind::Coder => vec![CodeGeneration, Debugging, Refactoring],
        AgentKind::Browser => vec![WebNavigation, PageExtraction, WebSearch],
        AgentKind::Analyst => vec![DataAnalysis, Visualization, Reasoning, Summarization],
        AgentKind::Creative => vec![ContentCreation, ImageGeneration, Writing],
    }
}

pub fn default_config(kind: AgentKind) -> AgentConfig {
    let (max_concurrent_tasks, timeout_ms, max_retries, priority_weight) = match kind {
        AgentKind::Research => (2, 60_000, 2, 1.0),
        AgentKind::Coder => (1, 120_000, 3, 1.0),
        AgentKind::Browser => (1, 90_000, 2, 0.9),
        AgentKind::Analyst => (2, 60_000, 2, 1.0),
        AgentKind::Creative => (1, 90_000, 2, 0.8),
    };
    AgentConfig {
        max_concurrent_tasks,
        timeout_ms,
        max_retries,
        priority_weight,
    }
}

/// Role-specific system prompt.
pub fn system_prompt(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Research => RESEARCH_PROMPT,
        AgentKind::Coder => CODER_PROMPT,
        AgentKind::Browser => BROWSER_PROMPT,
        AgentKind::Analyst => ANALYST_PROMPT,
        AgentKind::Creative => CREATIVE_PROMPT,
    }
}

const RESEARCH_PROMPT: &str = "\
You are the Research agent in Maestro. You gather and verify information.

Rules:
1. Base your answer on the search results provided; cite their URLs.
2. State concrete facts in short, declarative sentences.
3. Flag claims you could not verify.
4. End with a line starting with 'Next step:' if more research would help.
";

const CODER_PROMPT: &str = "\
You are the Coder agent in Maestro. You write correct, idiomatic code.

IMPORTANT: Put all code in fenced markdown code blocks with a language tag.

Rules:
1. Follow requirements and earlier task outputs provided as context.
2. Handle errors explicitly; no silent failures.
3. Keep code simple and self-contained.
4. Add a short explanation after the code.
";

const BROWSER_PROMPT: &str = "\
You are the Browser agent in Maestro. You navigate web pages and extract \
the information a task needs.

Rules:
1. When page content is provided, extract only what the task asks for.
2. When no page could be loaded, describe step by step which pages you \
would visit and what you would extract from each.
3. Always include the URLs involved.
";

const ANALYST_PROMPT: &str = "\
You are the Analyst agent in Maestro. You analyze information and write \
structured reports.

Rules:
1. Reason step by step and show the key figures you rely on.
2. Use headings and bullet points.
3. Separate findings from recommendations.
4. When summarizing earlier work, cover every task output you are given.
";

const CREATIVE_PROMPT: &str = "\
You are the Creative agent in Maestro. You write engaging content and \
design visual concepts.

Rules:
1. Match the tone the task asks for.
2. For image or design requests, write a detailed visual description \
(composition, palette, style) suitable for an image generator.
3. Keep text tight and readable.
";
