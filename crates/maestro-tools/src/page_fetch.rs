use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_TEXT_CHARS: usize = 20_000;

/// Readable content extracted from a web page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub title: String,
    pub text: String,
    pub links: Vec<String>,
}

/// Page-fetch service.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> MaestroResult<FetchedPage>;
}

/// Fetches pages over HTTP(S) and strips them down to title, text and links.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    allow_private_hosts: bool,
    title_re: Regex,
    strip_block_re: Regex,
    tag_re: Regex,
    link_re: Regex,
    space_re: Regex,
}

impl HttpPageFetcher {
    pub fn new() -> MaestroResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| MaestroError::Config(format!("failed to build HTTP client: {e}")))?;

        let re = |pattern: &str| {
            Regex::new(pattern).map_err(|e| MaestroError::Config(format!("bad pattern: {e}")))
        };

        Ok(Self {
            client,
            allow_private_hosts: false,
            title_re: re(r"(?is)<title[^>]*>(.*?)</title>")?,
            strip_block_re: re(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")?,
            tag_re: re(r"(?s)<[^>]+>")?,
            link_re: re(r#"(?i)href\s*=\s*["'](https?://[^"'#\s]+)["']"#)?,
            space_re: re(r"\s+")?,
        })
    }

    /// Permit loopback and private-network hosts (local mirrors, tests).
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Extract title, visible text and absolute links from an HTML document.
    pub fn extract(&self, url: &str, html: &str) -> FetchedPage {
        let title = self
            .title_re
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| self.space_re.replace_all(m.as_str(), " ").trim().to_string())
            .unwrap_or_else(|| url.to_string());

        let without_blocks = self.strip_block_re.replace_all(html, " ");
        let without_tags = self.tag_re.replace_all(&without_blocks, " ");
        let text: String = self
            .space_re
            .replace_all(&decode_entities(&without_tags), " ")
            .trim()
            .chars()
            .take(MAX_TEXT_CHARS)
            .collect();

        let mut links: Vec<String> = Vec::new();
        for cap in self.link_re.captures_iter(html) {
            let link = cap[1].to_string();
            if !links.contains(&link) {
                links.push(link);
            }
        }

        FetchedPage {
            url: url.to_string(),
            title,
            text,
            links,
        }
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn is_private_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.ends_with(".local") {
        return true;
    }
    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(std::net::IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> MaestroResult<FetchedPage> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| MaestroError::Validation(format!("Invalid URL '{url}': {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(MaestroError::Validation(format!(
                    "Unsupported scheme '{scheme}'. Only http/https allowed."
                )))
            }
        }

        // Block internal/private networks (SSRF prevention)
        if let Some(host) = parsed.host_str() {
            if !self.allow_private_hosts && is_private_host(host) {
                return Err(MaestroError::Validation(format!(
                    "Access denied: '{host}' is a private/internal address"
                )));
            }
        }

        info!(url = %url, "Page fetch");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| MaestroError::Transient(format!("page request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MaestroError::Http(format!("page fetch returned {status}")));
        }

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| MaestroError::Transient(format!("failed to read page body: {e}")))?;

        if body_bytes.len() > MAX_RESPONSE_SIZE {
            return Err(MaestroError::Validation(format!(
                "Response too large: {} bytes (max: {MAX_RESPONSE_SIZE} bytes)",
                body_bytes.len()
            )));
        }

        let body = String::from_utf8_lossy(&body_bytes);
        Ok(self.extract(url, &body))
    }
}
