//! Named cache partitions.
//!
//! ```text
//! CacheStorage
//!     └── Cache (one per partition name)
//!             └── "METHOD url" → CachedEntry
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use studyhub_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::ServiceWorkerError;

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CachedEntry {
    /// Snapshot a response for the given request.
    pub fn new(request: &Request, response: &Response) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body().clone(),
            cached_at: now_ms(),
        }
    }

    /// Rebuild the response.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.status, self.body.clone()).with_url(self.url.clone());
        response.headers = self.headers.clone();
        response
    }
}

/// A single cache partition.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CachedEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<&CachedEntry> {
        self.entries.get(&request.cache_key())
    }

    /// Store a response, replacing any previous entry for the same key.
    pub fn put(&mut self, request: &Request, response: &Response) -> Result<(), ServiceWorkerError> {
        if request.method != Method::GET {
            return Err(ServiceWorkerError::CacheError(format!(
                "only GET requests can be cached, got {}",
                request.method
            )));
        }
        self.entries
            .insert(request.cache_key(), CachedEntry::new(request, response));
        Ok(())
    }

    /// Delete entry.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries.remove(&request.cache_key()).is_some()
    }

    /// Cached URLs.
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.entries.values().map(|e| e.url.to_string()).collect();
        urls.sort();
        urls
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct Partitions {
    /// Names in creation order; lookups across partitions follow it.
    order: Vec<String>,
    caches: HashMap<String, Cache>,
}

impl Partitions {
    fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }
}

/// Shared handle to every cache partition.
///
/// Cloning is cheap; all clones see the same partitions. Each write happens
/// under one lock acquisition, so readers never observe half-applied state.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    inner: Arc<RwLock<Partitions>>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache, creating it if it doesn't exist.
    pub async fn open(&self, name: &str) {
        self.inner.write().await.open(name);
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.caches.contains_key(name)
    }

    /// Delete a cache.
    pub async fn delete(&self, name: &str) -> bool {
        let mut partitions = self.inner.write().await;
        partitions.order.retain(|n| n != name);
        let removed = partitions.caches.remove(name).is_some();
        if removed {
            debug!(cache = name, "Cache deleted");
        }
        removed
    }

    /// All cache names, in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Match across all caches, oldest partition first.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        let partitions = self.inner.read().await;
        let hit = partitions
            .order
            .iter()
            .filter_map(|name| partitions.caches.get(name))
            .find_map(|cache| cache.match_request(request))
            .map(CachedEntry::to_response);
        trace!(url = %request.url, hit = hit.is_some(), "Cache lookup");
        hit
    }

    /// Match within one cache.
    pub async fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
        self.inner
            .read()
            .await
            .caches
            .get(name)
            .and_then(|cache| cache.match_request(request))
            .map(CachedEntry::to_response)
    }

    /// Store a response in the named cache, creating it if needed.
    pub async fn put(
        &self,
        name: &str,
        request: &Request,
        response: &Response,
    ) -> Result<(), ServiceWorkerError> {
        self.inner.write().await.open(name).put(request, response)?;
        trace!(cache = name, url = %request.url, "Cache entry written");
        Ok(())
    }

    /// Merge a fully staged cache into storage in one step.
    pub async fn commit(&self, staged: Cache) {
        let mut partitions = self.inner.write().await;
        let count = staged.len();
        let cache = partitions.open(&staged.name);
        cache.entries.extend(staged.entries);
        debug!(cache = %staged.name, entries = count, "Staged cache committed");
    }

    /// Snapshot of one cache.
    pub async fn cache(&self, name: &str) -> Option<Cache> {
        self.inner.read().await.caches.get(name).cloned()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
