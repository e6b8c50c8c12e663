//! External information services used by research and browser agents.
//!
//! # Main types
//!
//! - [`WebSearch`] and [`DuckDuckGoSearch`]: `search(query) -> Vec<SearchResult>`.
//! - [`PageFetcher`] and [`HttpPageFetcher`]: `fetch(url) -> FetchedPage`.
//! - [`BoundedCache`]: LRU cache with an explicit capacity.
//! - [`CachedSearch`] and [`CachedFetcher`]: read-through wrappers keyed by
//!   normalized query / URL.

/// Bounded LRU caches and read-through service wrappers.
pub mod cache;
/// Page fetching.
pub mod page_fetch;
/// Web search.
pub mod search;

pub use cache::{normalize_query, normalize_url, BoundedCache, CachedFetcher, CachedSearch};
pub use page_fetch::{FetchedPage, HttpPageFetcher, PageFetcher};
pub use search::{DuckDuckGoSearch, SearchResult, WebSearch};
