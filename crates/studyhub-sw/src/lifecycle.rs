//! Cache lifecycle: install-time precache and activate-time purge.

use std::sync::Arc;

use futures::future::try_join_all;
use studyhub_net::{CacheMode, Fetcher, Request, Response};
use tracing::{debug, info, warn};

use crate::{Cache, CacheStorage, ServiceWorkerError, WorkerConfig};

/// Outcome of a successful install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    pub static_entries: usize,
    pub dynamic_entries: usize,
}

/// Owns creation, population and pruning of the worker's partitions.
pub struct CacheLifecycle {
    config: Arc<WorkerConfig>,
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheLifecycle {
    pub fn new(config: Arc<WorkerConfig>, caches: CacheStorage, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            caches,
            fetcher,
        }
    }

    /// Precache the app shell and third-party resources.
    ///
    /// Both partitions are staged off to the side and committed together, so
    /// a single failed URL leaves storage exactly as it was.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        let (static_cache, dynamic_cache) = futures::try_join!(
            self.stage(
                &self.config.static_cache_name,
                &self.config.manifest,
                CacheMode::Reload
            ),
            self.stage(
                &self.config.dynamic_cache_name,
                &self.config.dynamic_precache,
                CacheMode::Default
            ),
        )?;

        let report = InstallReport {
            static_entries: static_cache.len(),
            dynamic_entries: dynamic_cache.len(),
        };

        self.caches.commit(static_cache).await;
        self.caches.commit(dynamic_cache).await;

        info!(
            static_cache = %self.config.static_cache_name,
            static_entries = report.static_entries,
            dynamic_entries = report.dynamic_entries,
            "Install complete"
        );
        Ok(report)
    }

    /// Delete every partition that is not one of the current two.
    pub async fn purge_stale(&self) -> Vec<String> {
        let mut deleted = Vec::new();
        for name in self.caches.keys().await {
            if name == self.config.static_cache_name || name == self.config.dynamic_cache_name {
                continue;
            }
            if self.caches.delete(&name).await {
                info!(cache = %name, "Deleted stale cache");
                deleted.push(name);
            }
        }
        deleted
    }

    async fn stage(
        &self,
        name: &str,
        urls: &[String],
        cache_mode: CacheMode,
    ) -> Result<Cache, ServiceWorkerError> {
        let mut requests = Vec::with_capacity(urls.len());
        for url in urls {
            requests.push(Request::get(self.config.resolve(url)?).cache_mode(cache_mode));
        }

        let fetched = try_join_all(requests.into_iter().map(|request| self.precache_one(request))).await?;

        let mut staged = Cache::new(name);
        for (request, response) in &fetched {
            staged.put(request, response)?;
        }
        debug!(cache = name, entries = staged.len(), "Cache staged");
        Ok(staged)
    }

    async fn precache_one(&self, request: Request) -> Result<(Request, Response), ServiceWorkerError> {
        let url = request.url.to_string();
        let response = self.fetcher.fetch(request.clone()).await.map_err(|e| {
            warn!(url = %url, error = %e, "Precache fetch failed");
            ServiceWorkerError::InstallFailed {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;

        if !response.ok() {
            warn!(url = %url, status = %response.status, "Precache returned an error status");
            return Err(ServiceWorkerError::InstallFailed {
                url,
                reason: format!("HTTP {}", response.status),
            });
        }

        Ok((request, response))
    }
}
