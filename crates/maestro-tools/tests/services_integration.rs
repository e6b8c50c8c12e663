//! Search and page fetch against mock HTTP servers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use maestro_tools::{
    CachedFetcher, DuckDuckGoSearch, HttpPageFetcher, PageFetcher, WebSearch,
};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_search_parses_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("q", "rust async"))
        .and(query_param("format", "json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-javascript")
                .set_body_string(
                    serde_json::json!({
                        "Heading": "Async Rust",
                        "AbstractText": "Asynchronous programming in Rust.",
                        "AbstractURL": "https://rust-lang.github.io/async-book/",
                        "RelatedTopics": [
                            {"Text": "Tokio - runtime", "FirstURL": "https://tokio.rs"}
                        ]
                    })
                    .to_string(),
                ),
        )
        .mount(&server)
        .await;

    let search = DuckDuckGoSearch::with_endpoint(server.uri()).unwrap();
    let results = search.search("rust async").await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title, "Async Rust");
    assert_eq!(results[1].url, "https://tokio.rs");
}

#[tokio::test]
async fn test_search_with_no_hits_is_empty_not_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            serde_json::json!({"AbstractText": "", "RelatedTopics": []}).to_string(),
        ))
        .mount(&server)
        .await;

    let search = DuckDuckGoSearch::with_endpoint(server.uri()).unwrap();
    assert!(search.search("zzqxj").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cached_fetcher_hits_server_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><head><title>Article</title></head><body><p>Body text</p>\
             <a href=\"https://example.com/next\">next</a></body></html>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpPageFetcher::new().unwrap().allow_private_hosts(true);
    let cached = CachedFetcher::new(Arc::new(fetcher), 8);
    let url = format!("{}/article", server.uri());

    let first = cached.fetch(&url).await.unwrap();
    let second = cached.fetch(&format!("{url}/#top")).await.unwrap();

    assert_eq!(first.title, "Article");
    assert!(first.text.contains("Body text"));
    assert_eq!(first.links, vec!["https://example.com/next".to_string()]);
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_fetch_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = HttpPageFetcher::new().unwrap().allow_private_hosts(true);
    let err = fetcher.fetch(&format!("{}/missing", server.uri())).await;
    assert!(err.is_err());
}
