use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// One web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web search service. An empty result list is a valid answer.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> MaestroResult<Vec<SearchResult>>;
}

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com";

/// Search backed by the DuckDuckGo instant-answer JSON API.
pub struct DuckDuckGoSearch {
    endpoint: String,
    max_results: usize,
    client: reqwest::Client,
}

impl DuckDuckGoSearch {
    pub fn new() -> MaestroResult<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    /// Point the search at a different base URL (mirrors, tests).
    pub fn with_endpoint(endpoint: impl Into<String>) -> MaestroResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| MaestroError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            max_results: 8,
            client,
        })
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> MaestroResult<Vec<SearchResult>> {
        info!(query = %query, "Web search");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| MaestroError::Transient(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MaestroError::Http(format!("search returned {status}")));
        }

        // The API answers with a javascript content type, so parse the text.
        let body = response
            .text()
            .await
            .map_err(|e| MaestroError::Transient(format!("search body read failed: {e}")))?;
        let json: serde_json::Value = serde_json::from_str(&body)?;
        let results = parse_instant_answer(&json, self.max_results);
        debug!(count = results.len(), "Search results parsed");
        Ok(results)
    }
}

/// Flatten an instant-answer document into search results.
pub fn parse_instant_answer(json: &serde_json::Value, max: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    if let (Some(text), Some(url)) = (json["AbstractText"].as_str(), json["AbstractURL"].as_str())
    {
        if !text.is_empty() && !url.is_empty() {
            results.push(SearchResult {
                title: json["Heading"].as_str().unwrap_or(url).to_string(),
                url: url.to_string(),
                snippet: text.to_string(),
            });
        }
    }

    fn push_topics(topics: &[serde_json::Value], out: &mut Vec<SearchResult>) {
        for topic in topics {
            if let Some(nested) = topic["Topics"].as_array() {
                push_topics(nested, out);
                continue;
            }
            let (Some(text), Some(url)) = (topic["Text"].as_str(), topic["FirstURL"].as_str())
            else {
                continue;
            };
            let title = text.split(" - ").next().unwrap_or(text).to_string();
            out.push(SearchResult {
                title,
                url: url.to_string(),
                snippet: text.to_string(),
            });
        }
    }

    if let Some(topics) = json["RelatedTopics"].as_array() {
        push_topics(topics, &mut results);
    }

    results.truncate(max);
    results
}
