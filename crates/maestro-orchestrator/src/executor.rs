use crate::profiles::system_prompt;
use crate::types::{Agent, Artifact, ArtifactKind, Task, TaskKind, TaskOutput};
use async_trait::async_trait;
use maestro_agent::CompletionClient;
use maestro_core::{MaestroError, MaestroResult};
use maestro_tools::{FetchedPage, PageFetcher, SearchResult, WebSearch};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

const MAX_PRIOR_CHARS: usize = 4_000;
const MAX_PAGE_CHARS: usize = 8_000;

/// Runs one task on one agent.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, agent: &Agent) -> MaestroResult<TaskOutput>;
}

/// Default executor: role-specific prompts against the completion service,
/// with web search for research and page fetching for browse tasks.
///
/// Without a completion service, research and browse tasks still return
/// raw search results or page text, and summary tasks stitch together
/// earlier outputs. Code and creative tasks fail.
#[derive(Default, Clone)]
pub struct AgentTaskExecutor {
    client: Option<CompletionClient>,
    search: Option<Arc<dyn WebSearch>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
}

impl AgentTaskExecutor {
    pub fn new(client: Option<CompletionClient>) -> Self {
        Self {
            client,
            search: None,
            fetcher: None,
        }
    }

    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    async fn ask(&self, agent: &Agent, user: &str) -> MaestroResult<Option<String>> {
        match &self.client {
            Some(client) => Ok(Some(client.ask(system_prompt(agent.kind), user).await?)),
            None => Ok(None),
        }
    }

    async fn research(&self, task: &Task, agent: &Agent) -> MaestroResult<TaskOutput> {
        let results = match &self.search {
            Some(search) => match search.search(&task.description).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Search failed; continuing without results");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let sources: Vec<String> = results.iter().map(|r| r.url.clone()).collect();
        let listing = format_results(&results);

        let mut prompt = task_prompt(task);
        if !results.is_empty() {
            prompt.push_str("\n\nSearch results:\n");
            prompt.push_str(&listing);
        }

        let (content, confidence) = match self.ask(agent, &prompt).await? {
            Some(answer) => (answer, if results.is_empty() { 0.6 } else { 0.8 }),
            None if !results.is_empty() => (format!("Search results for '{}':\n{listing}", task.description), 0.5),
            None => {
                return Err(MaestroError::TaskFailed(
                    "research needs search results or a completion service".into(),
                ))
            }
        };
        Ok(TaskOutput::success(content, confidence)
            .with_sources(sources)
            .with_data(serde_json::to_value(&results)?))
    }

    async fn browse(&self, task: &Task, agent: &Agent) -> MaestroResult<TaskOutput> {
        let page = match (first_url(&task.description), &self.fetcher) {
            (Some(url), Some(fetcher)) => match fetcher.fetch(url).await {
                Ok(page) => Some(page),
                Err(e) => {
                    warn!(task_id = %task.id, url = %url, error = %e, "Page fetch failed; describing actions instead");
                    None
                }
            },
            _ => None,
        };

        match page {
            Some(page) => {
                let text = truncate(&page.text, MAX_PAGE_CHARS);
                let prompt = format!(
                    "{}\n\nPage '{}' ({}):\n{text}",
                    task_prompt(task),
                    page.title,
                    page.url
                );
                let content = match self.ask(agent, &prompt).await? {
                    Some(answer) => answer,
                    None => format!("{}\n\n{text}", page.title),
                };
                Ok(TaskOutput::success(content, 0.8)
                    .with_sources(vec![page.url.clone()])
                    .with_data(page_data(&page)))
            }
            None => {
                let prompt = format!(
                    "{}\n\nNo page could be loaded. Describe the browsing steps you would take.",
                    task_prompt(task)
                );
                match self.ask(agent, &prompt).await? {
                    Some(answer) => Ok(TaskOutput::success(answer, 0.5)),
                    None => Err(MaestroError::TaskFailed(
                        "no page could be fetched and no completion service is configured".into(),
                    )),
                }
            }
        }
    }

    async fn code(&self, task: &Task, agent: &Agent) -> MaestroResult<TaskOutput> {
        let answer = self
            .ask(agent, &task_prompt(task))
            .await?
            .ok_or_else(|| MaestroError::TaskFailed("code tasks need a completion service".into()))?;
        let output = match first_code_block(&answer) {
            Some((language, code)) => {
                let name = format!("{}.{}", slug(&task.title), extension(&language));
                let mut artifact = Artifact::new(name, ArtifactKind::Code, code).for_task(task.id);
                if !language.is_empty() {
                    artifact = artifact.with_language(language);
                }
                TaskOutput::success(answer.clone(), 0.8).with_artifact(artifact)
            }
            None => TaskOutput::success(answer.clone(), 0.5),
        };
        Ok(output.with_suggestions(suggestions(&answer)))
    }

    async fn create(&self, task: &Task, agent: &Agent) -> MaestroResult<TaskOutput> {
        let answer = self
            .ask(agent, &task_prompt(task))
            .await?
            .ok_or_else(|| {
                MaestroError::TaskFailed("creative tasks need a completion service".into())
            })?;
        let mut output = TaskOutput::success(answer.clone(), 0.7);
        if is_image_request(&task.description) {
            output = output.with_artifact(
                Artifact::new(format!("{}-image", slug(&task.title)), ArtifactKind::Image, answer.clone())
                    .for_task(task.id),
            );
        }
        Ok(output.with_suggestions(suggestions(&answer)))
    }

    async fn reason(&self, task: &Task, agent: &Agent) -> MaestroResult<TaskOutput> {
        match self.ask(agent, &task_prompt(task)).await? {
            Some(answer) => {
                let suggestions = suggestions(&answer);
                Ok(TaskOutput::success(answer, 0.75).with_suggestions(suggestions))
            }
            None if !task.input.prior_outputs.is_empty() => {
                let stitched: Vec<String> = task
                    .input
                    .prior_outputs
                    .iter()
                    .map(|p| format!("## {}\n{}", p.title, p.content))
                    .collect();
                Ok(TaskOutput::success(stitched.join("\n\n"), 0.5))
            }
            None => Err(MaestroError::TaskFailed(format!(
                "{} tasks need a completion service or earlier outputs",
                task.kind
            ))),
        }
    }
}

#[async_trait]
impl TaskExecutor for AgentTaskExecutor {
    async fn execute(&self, task: &Task, agent: &Agent) -> MaestroResult<TaskOutput> {
        info!(task_id = %task.id, agent = %agent.id, kind = %task.kind, "Executing task");
        let output = match task.kind {
            TaskKind::Research => self.research(task, agent).await?,
            TaskKind::Browse => self.browse(task, agent).await?,
            TaskKind::Code => self.code(task, agent).await?,
            TaskKind::Create => self.create(task, agent).await?,
            TaskKind::Analyze | TaskKind::Finalize => self.reason(task, agent).await?,
        };
        debug!(
            task_id = %task.id,
            chars = output.content.len(),
            artifacts = output.artifacts.len(),
            "Task produced output"
        );
        Ok(output)
    }
}

/// Task prompt plus the goal and any earlier outputs it may build on.
pub fn task_prompt(task: &Task) -> String {
    let mut prompt = task.input.prompt.clone();
    if let Some(goal) = task.input.context.get("goal").and_then(|g| g.as_str()) {
        prompt.push_str(&format!("\n\nOverall goal: {goal}"));
    }
    for prior in &task.input.prior_outputs {
        prompt.push_str(&format!(
            "\n\nOutput of '{}':\n{}",
            prior.title,
            truncate(&prior.content, MAX_PRIOR_CHARS)
        ));
    }
    prompt
}

fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {} - {}\n   {}", i + 1, r.title, r.url, r.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

fn page_data(page: &FetchedPage) -> serde_json::Value {
    serde_json::json!({
        "url": page.url,
        "title": page.title,
        "links": page.links,
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}\n[truncated]")
    }
}

fn url_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'()\[\]]+"#).ok())
        .as_ref()
}

fn code_block_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").ok())
        .as_ref()
}

/// First http(s) URL in the text, without trailing punctuation.
pub fn first_url(text: &str) -> Option<&str> {
    let m = url_re()?.find(text)?;
    Some(m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']))
}

/// Language tag and body of the first fenced code block.
pub fn first_code_block(text: &str) -> Option<(String, String)> {
    let caps = code_block_re()?.captures(text)?;
    let language = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let body = caps.get(2)?.as_str().trim_end().to_string();
    Some((language, body))
}

/// Lines the agent marked as follow-ups.
pub fn suggestions(text: &str) -> Vec<String> {
    const MARKERS: [&str; 3] = ["next step:", "suggestion:", "next steps:"];
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim().trim_start_matches(['-', '*', ' ']);
            let lower = trimmed.to_lowercase();
            MARKERS
                .iter()
                .find(|m| lower.starts_with(*m))
                .and_then(|m| trimmed.get(m.len()..))
                .map(|rest| rest.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_image_request(description: &str) -> bool {
    let lower = description.to_lowercase();
    ["image", "logo", "draw", "illustration", "picture", "poster", "icon"]
        .iter()
        .any(|k| lower.contains(k))
}

fn slug(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "artifact".to_string()
    } else {
        slug
    }
}

fn extension(language: &str) -> &'static str {
    match language {
        "rust" | "rs" => "rs",
        "python" | "py" => "py",
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "go" | "golang" => "go",
        "java" => "java",
        "bash" | "sh" | "shell" => "sh",
        "html" => "html",
        "css" => "css",
        "sql" => "sql",
        "json" => "json",
        "toml" => "toml",
        _ => "txt",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::profiles::default_agent;
    use crate::types::{AgentKind, PriorOutput};
    use maestro_agent::CompletionBackend;
    use maestro_core::Message;
    use parking_lot::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    /// Records the last user prompt and answers with a canned reply.
    struct Scripted {
        reply: String,
        last_prompt: Mutex<String>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                last_prompt: Mutex::new(String::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        async fn complete(&self, messages: &[Message]) -> MaestroResult<String> {
            *self.last_prompt.lock() = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(self.reply.clone())
        }
    }

    struct FixedSearch(Vec<SearchResult>);

    #[async_trait]
    impl WebSearch for FixedSearch {
        async fn search(&self, _query: &str) -> MaestroResult<Vec<SearchResult>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl WebSearch for FailingSearch {
        async fn search(&self, _query: &str) -> MaestroResult<Vec<SearchResult>> {
            Err(MaestroError::Transient("connection reset".into()))
        }
    }

    struct FixedPage;

    #[async_trait]
    impl PageFetcher for FixedPage {
        async fn fetch(&self, url: &str) -> MaestroResult<FetchedPage> {
            Ok(FetchedPage {
                url: url.to_string(),
                title: "Tokio".into(),
                text: "Tokio is an asynchronous runtime.".into(),
                links: vec![],
            })
        }
    }

    fn client(backend: Arc<Scripted>) -> Option<CompletionClient> {
        Some(CompletionClient::from_backend(backend, Duration::from_secs(1)))
    }

    fn task(kind: TaskKind, description: &str) -> Task {
        Task::new(Uuid::from_u128(1), kind, description)
    }

    #[tokio::test]
    async fn test_research_cites_search_results() {
        let backend = Scripted::new("Tokio is popular.\nNext step: benchmark it");
        let executor = AgentTaskExecutor::new(client(backend.clone())).with_search(Arc::new(
            FixedSearch(vec![SearchResult {
                title: "Tokio".into(),
                url: "https://tokio.rs".into(),
                snippet: "An async runtime".into(),
            }]),
        ));
        let output = executor
            .execute(&task(TaskKind::Research, "async runtimes"), &default_agent(AgentKind::Research))
            .await
            .unwrap();
        assert_eq!(output.sources, vec!["https://tokio.rs"]);
        assert_eq!(output.suggestions, vec!["benchmark it"]);
        assert!(backend.last_prompt.lock().contains("https://tokio.rs"));
    }

    #[tokio::test]
    async fn test_research_tolerates_search_failure() {
        let executor = AgentTaskExecutor::new(client(Scripted::new("From memory: Tokio.")))
            .with_search(Arc::new(FailingSearch));
        let output = executor
            .execute(&task(TaskKind::Research, "async runtimes"), &default_agent(AgentKind::Research))
            .await
            .unwrap();
        assert!(output.success);
        assert!(output.sources.is_empty());
    }

    #[tokio::test]
    async fn test_browse_fetches_page_first() {
        let executor = AgentTaskExecutor::new(None).with_fetcher(Arc::new(FixedPage));
        let output = executor
            .execute(
                &task(TaskKind::Browse, "Read https://tokio.rs/tokio/tutorial."),
                &default_agent(AgentKind::Browser),
            )
            .await
            .unwrap();
        assert_eq!(output.sources, vec!["https://tokio.rs/tokio/tutorial"]);
        assert!(output.content.contains("asynchronous runtime"));
    }

    #[tokio::test]
    async fn test_browse_without_page_describes_actions() {
        let executor = AgentTaskExecutor::new(client(Scripted::new("1. Open the docs")));
        let output = executor
            .execute(&task(TaskKind::Browse, "Browse the docs"), &default_agent(AgentKind::Browser))
            .await
            .unwrap();
        assert_eq!(output.content, "1. Open the docs");
        assert!((output.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_code_emits_artifact() {
        let reply = "Here:\n```rust\nfn add(a: i32, b: i32) -> i32 { a + b }\n```\nSuggestion: add tests";
        let executor = AgentTaskExecutor::new(client(Scripted::new(reply)));
        let t = task(TaskKind::Code, "Write an add function");
        let output = executor.execute(&t, &default_agent(AgentKind::Coder)).await.unwrap();
        assert_eq!(output.artifacts.len(), 1);
        let artifact = &output.artifacts[0];
        assert_eq!(artifact.name, "write-an-add-function.rs");
        assert_eq!(artifact.language.as_deref(), Some("rust"));
        assert_eq!(artifact.task_id, Some(t.id));
        assert!(artifact.content.starts_with("fn add"));
        assert_eq!(output.suggestions, vec!["add tests"]);
    }

    #[tokio::test]
    async fn test_creative_image_artifact() {
        let executor = AgentTaskExecutor::new(client(Scripted::new("A fox in teal and orange.")));
        let output = executor
            .execute(&task(TaskKind::Create, "Design a logo for Maestro"), &default_agent(AgentKind::Creative))
            .await
            .unwrap();
        assert_eq!(output.artifacts[0].kind, ArtifactKind::Image);

        let output = executor
            .execute(&task(TaskKind::Create, "Write a haiku"), &default_agent(AgentKind::Creative))
            .await
            .unwrap();
        assert!(output.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_without_client_stitches_prior_outputs() {
        let mut t = task(TaskKind::Finalize, "Summarize");
        t.input.prior_outputs.push(PriorOutput {
            task_id: Uuid::from_u128(2),
            title: "Research".into(),
            content: "Found things".into(),
        });
        let executor = AgentTaskExecutor::new(None);
        let output = executor.execute(&t, &default_agent(AgentKind::Analyst)).await.unwrap();
        assert!(output.content.contains("## Research\nFound things"));

        let err = executor
            .execute(&task(TaskKind::Code, "x"), &default_agent(AgentKind::Coder))
            .await
            .unwrap_err();
        assert!(matches!(err, MaestroError::TaskFailed(_)));
    }

    #[test]
    fn test_prompt_includes_goal_and_prior_outputs() {
        let mut t = task(TaskKind::Analyze, "Compare results");
        t.input.context.insert("goal".into(), serde_json::json!("pick a runtime"));
        t.input.prior_outputs.push(PriorOutput {
            task_id: Uuid::from_u128(2),
            title: "Research".into(),
            content: "Tokio and smol".into(),
        });
        let prompt = task_prompt(&t);
        assert!(prompt.starts_with("Compare results"));
        assert!(prompt.contains("Overall goal: pick a runtime"));
        assert!(prompt.contains("Output of 'Research':\nTokio and smol"));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(first_url("see (https://a.io/x), then"), Some("https://a.io/x"));
        assert_eq!(first_url("no links"), None);
        assert_eq!(
            first_code_block("```\nplain\n```"),
            Some((String::new(), "plain".to_string()))
        );
        assert_eq!(slug("!!!"), "artifact");
        assert_eq!(extension("python"), "py");
    }
}
