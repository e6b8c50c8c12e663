use crate::page_fetch::{FetchedPage, PageFetcher};
use crate::search::{SearchResult, WebSearch};
use async_trait::async_trait;
use lru::LruCache;
use maestro_core::MaestroResult;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Thread-safe LRU cache with a fixed capacity.
///
/// The least recently used entry is evicted once `capacity` is reached.
pub struct BoundedCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a value, marking it as recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Normalize a search query for cache keys: trimmed, lower-cased,
/// whitespace collapsed.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a URL for cache keys: trimmed, fragment dropped, trailing
/// slash dropped, scheme and host lower-cased.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    let without_slash = without_fragment.trim_end_matches('/');
    match without_slash.find("://") {
        Some(idx) => {
            let rest = &without_slash[idx + 3..];
            let (authority, path) = match rest.find('/') {
                Some(p) => rest.split_at(p),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                without_slash[..idx].to_lowercase(),
                authority.to_lowercase(),
                path
            )
        }
        None => without_slash.to_string(),
    }
}

/// Read-through cache in front of a [`WebSearch`].
pub struct CachedSearch {
    inner: Arc<dyn WebSearch>,
    cache: BoundedCache<String, Vec<SearchResult>>,
}

impl CachedSearch {
    pub fn new(inner: Arc<dyn WebSearch>, capacity: usize) -> Self {
        Self {
            inner,
            cache: BoundedCache::new(capacity),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl WebSearch for CachedSearch {
    async fn search(&self, query: &str) -> MaestroResult<Vec<SearchResult>> {
        let key = normalize_query(query);
        if let Some(hit) = self.cache.get(&key) {
            debug!(query = %key, "Search cache hit");
            return Ok(hit);
        }
        debug!(query = %key, "Search cache miss");
        let results = self.inner.search(query).await?;
        self.cache.insert(key, results.clone());
        Ok(results)
    }
}

/// Read-through cache in front of a [`PageFetcher`].
pub struct CachedFetcher {
    inner: Arc<dyn PageFetcher>,
    cache: BoundedCache<String, FetchedPage>,
}

impl CachedFetcher {
    pub fn new(inner: Arc<dyn PageFetcher>, capacity: usize) -> Self {
        Self {
            inner,
            cache: BoundedCache::new(capacity),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl PageFetcher for CachedFetcher {
    async fn fetch(&self, url: &str) -> MaestroResult<FetchedPage> {
        let key = normalize_url(url);
        if let Some(hit) = self.cache.get(&key) {
            debug!(url = %key, "Page cache hit");
            return Ok(hit);
        }
        debug!(url = %key, "Page cache miss");
        let page = self.inner.fetch(url).await?;
        self.cache.insert(key, page.clone());
        Ok(page)
    }
}
