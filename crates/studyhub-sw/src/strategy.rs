//! Fetch strategies.
//!
//! Every strategy except stale-while-revalidate resolves to a concrete
//! [`Response`], whatever the network does.

use std::sync::Arc;
use std::time::Duration;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use studyhub_common::with_timeout;
use studyhub_net::{Fetcher, Request, Response};
use tracing::{debug, warn};
use url::Url;

use crate::{BackgroundTasks, CacheStorage, ServiceWorkerError, WorkerConfig};

/// Body of the synthetic 404 served for assets that are neither cached nor
/// reachable.
pub const OFFLINE_ASSET_BODY: &str = "Asset not available offline";

/// Error message in the synthetic 503 served for unreachable API calls.
pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable";

/// The four request handlers, sharing one cache storage and one fetcher.
pub struct FetchStrategies {
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    background: BackgroundTasks,
    static_cache: String,
    dynamic_cache: String,
    timeout: Duration,
    root_document: Url,
    offline_fallback: Url,
}

impl FetchStrategies {
    pub fn new(
        config: &WorkerConfig,
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        background: BackgroundTasks,
    ) -> Result<Self, ServiceWorkerError> {
        Ok(Self {
            caches,
            fetcher,
            background,
            static_cache: config.static_cache_name.clone(),
            dynamic_cache: config.dynamic_cache_name.clone(),
            timeout: config.timeout(),
            root_document: config.resolve(&config.root_document_url)?,
            offline_fallback: config.resolve(&config.offline_fallback_url)?,
        })
    }

    /// Look a request up in this version's partitions. The dynamic partition
    /// comes first since refreshes land there, superseding precached copies.
    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self.caches.match_in(&self.dynamic_cache, request).await {
            Some(hit) => Some(hit),
            None => self.caches.match_in(&self.static_cache, request).await,
        }
    }

    /// Serve from cache, refreshing it in the background. On a miss, fetch and
    /// store; if that fails, answer with a 404.
    pub async fn cache_first(&self, request: Request) -> Response {
        if let Some(cached) = self.lookup(&request).await {
            self.spawn_refresh("cache-first-refresh", &request);
            return cached;
        }

        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    self.write_through(&request, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset unavailable offline");
                offline_asset_response()
            }
        }
    }

    /// Prefer the network, bounded by the configured timeout. Fall back to the
    /// cache, then to a 503 JSON body.
    pub async fn network_first(&self, request: Request) -> Response {
        let attempt = with_timeout(self.timeout, || self.fetcher.fetch(request.clone())).await;

        match attempt {
            Ok(Ok(response)) => {
                if response.ok() {
                    self.write_through(&request, &response).await;
                }
                return response;
            }
            Ok(Err(e)) => {
                debug!(url = %request.url, error = %e, "Network-first fetch failed");
            }
            Err(_) => {
                warn!(
                    url = %request.url,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Network-first fetch timed out"
                );
            }
        }

        match self.lookup(&request).await {
            Some(cached) => cached,
            None => service_unavailable_response(),
        }
    }

    /// Serve a cached copy immediately and refresh it behind the caller's
    /// back. With nothing cached, wait for the network; a network failure then
    /// reaches the caller.
    pub async fn stale_while_revalidate(
        &self,
        request: Request,
    ) -> Result<Response, ServiceWorkerError> {
        if let Some(cached) = self.lookup(&request).await {
            self.spawn_refresh("stale-while-revalidate-refresh", &request);
            return Ok(cached);
        }

        let response = self.fetcher.fetch(request.clone()).await?;
        if response.ok() {
            self.write_through(&request, &response).await;
        }
        Ok(response)
    }

    /// Network first for live content; offline, serve the cached root
    /// document, then the offline page, then a synthetic offline document.
    pub async fn navigate(&self, request: Request) -> Response {
        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    self.write_through(&request, &response).await;
                }
                return response;
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation failed, serving fallback");
            }
        }

        for fallback in [&self.root_document, &self.offline_fallback] {
            if let Some(cached) = self.lookup(&Request::get(fallback.clone())).await {
                return cached;
            }
        }

        warn!(url = %request.url, "No cached document for offline navigation");
        offline_document_response()
    }

    fn spawn_refresh(&self, label: &'static str, request: &Request) {
        let fetcher = Arc::clone(&self.fetcher);
        let caches = self.caches.clone();
        let cache_name = self.dynamic_cache.clone();
        let request = request.duplicate();

        self.background.spawn(label, async move {
            let response = fetcher.fetch(request.clone()).await?;
            if response.ok() {
                caches.put(&cache_name, &request, &response).await?;
            }
            Ok::<(), ServiceWorkerError>(())
        });
    }

    async fn write_through(&self, request: &Request, response: &Response) {
        if let Err(e) = self.caches.put(&self.dynamic_cache, request, response).await {
            warn!(url = %request.url, error = %e, "Cache write failed");
        }
    }
}

/// 404 for assets that are not available offline.
pub fn offline_asset_response() -> Response {
    Response::new(StatusCode::NOT_FOUND, OFFLINE_ASSET_BODY).with_header(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    )
}

/// 503 with a JSON error body for API calls.
pub fn service_unavailable_response() -> Response {
    let body = serde_json::json!({ "error": SERVICE_UNAVAILABLE_MESSAGE }).to_string();
    Response::new(StatusCode::SERVICE_UNAVAILABLE, body)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
}

/// Minimal offline page used when neither cached document exists.
pub fn offline_document_response() -> Response {
    const PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>Reconnect to keep studying.</p></body></html>";
    Response::new(StatusCode::SERVICE_UNAVAILABLE, PAGE).with_header(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    )
}
