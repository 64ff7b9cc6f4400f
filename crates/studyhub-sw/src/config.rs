//! Worker configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::RequestClassifier;
use crate::ServiceWorkerError;

/// Immutable worker configuration.
///
/// Cache names are versioned: bump them whenever cached content changes
/// incompatibly, and activation purges every other partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Origin the worker is scoped to. Relative URLs resolve against it.
    pub origin: String,

    /// Static (app shell) partition name.
    pub static_cache_name: String,

    /// Dynamic (runtime) partition name.
    pub dynamic_cache_name: String,

    /// App shell precached into the static partition at install.
    pub manifest: Vec<String>,

    /// Third-party resources precached into the dynamic partition at install.
    pub dynamic_precache: Vec<String>,

    /// Network-first timeout in milliseconds.
    pub timeout_ms: u64,

    /// Offline page served to navigations when nothing better is cached.
    pub offline_fallback_url: String,

    /// Root document served to offline navigations before the offline page.
    pub root_document_url: String,

    /// Path prefixes routed network-first.
    pub api_path_prefixes: Vec<String>,

    /// Hostname substrings routed network-first.
    pub api_host_substrings: Vec<String>,

    /// URL schemes that are never intercepted.
    pub ignored_schemes: Vec<String>,

    /// Request skip-waiting as soon as install succeeds.
    pub skip_waiting_on_install: bool,

    /// Default notification title.
    pub app_name: String,

    /// Notification icon and badge.
    pub notification_icon: String,

    /// Background sync tag that flushes the offline queue.
    pub sync_tag: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000/".to_string(),
            static_cache_name: "studyhub-static-v1".to_string(),
            dynamic_cache_name: "studyhub-dynamic-v1".to_string(),
            manifest: vec![
                "/".to_string(),
                "/static/js/bundle.js".to_string(),
                "/static/css/main.css".to_string(),
                "/manifest.json".to_string(),
                "/favicon.ico".to_string(),
                "/offline.html".to_string(),
            ],
            dynamic_precache: vec![
                "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap"
                    .to_string(),
            ],
            timeout_ms: 10_000,
            offline_fallback_url: "/offline.html".to_string(),
            root_document_url: "/".to_string(),
            api_path_prefixes: vec!["/api/".to_string()],
            api_host_substrings: vec![
                "supabase.co".to_string(),
                "generativelanguage.googleapis.com".to_string(),
            ],
            ignored_schemes: vec![
                "chrome-extension".to_string(),
                "moz-extension".to_string(),
                "safari-web-extension".to_string(),
            ],
            skip_waiting_on_install: true,
            app_name: "StudyHub".to_string(),
            notification_icon: "/favicon.ico".to_string(),
            sync_tag: "sync-offline-actions".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ServiceWorkerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parsed origin.
    pub fn origin_url(&self) -> Result<Url, ServiceWorkerError> {
        let origin = Url::parse(&self.origin)
            .map_err(|e| ServiceWorkerError::Config(format!("origin '{}': {}", self.origin, e)))?;
        match origin.scheme() {
            "http" | "https" => Ok(origin),
            other => Err(ServiceWorkerError::Config(format!(
                "origin must be http or https, got '{other}'"
            ))),
        }
    }

    /// Resolve a possibly relative URL against the origin.
    pub fn resolve(&self, url: &str) -> Result<Url, ServiceWorkerError> {
        self.origin_url()?
            .join(url)
            .map_err(|e| ServiceWorkerError::Config(format!("url '{url}': {e}")))
    }

    /// Network-first timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Classifier built from the routing fields.
    pub fn classifier(&self) -> RequestClassifier {
        RequestClassifier::new(
            self.api_path_prefixes.clone(),
            self.api_host_substrings.clone(),
            self.ignored_schemes.clone(),
        )
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.static_cache_name.trim().is_empty() || self.dynamic_cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache names must not be empty".to_string(),
            ));
        }
        if self.static_cache_name == self.dynamic_cache_name {
            return Err(ServiceWorkerError::Config(format!(
                "static and dynamic caches share the name '{}'",
                self.static_cache_name
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ServiceWorkerError::Config(
                "timeoutMs must be greater than zero".to_string(),
            ));
        }

        let mut manifest = Vec::with_capacity(self.manifest.len());
        for entry in &self.manifest {
            manifest.push(self.resolve(entry)?);
        }
        for entry in &self.dynamic_precache {
            self.resolve(entry)?;
        }
        self.resolve(&self.root_document_url)?;

        let offline = self.resolve(&self.offline_fallback_url)?;
        if !manifest.contains(&offline) {
            return Err(ServiceWorkerError::Config(format!(
                "offline fallback '{}' must be part of the manifest",
                self.offline_fallback_url
            )));
        }

        Ok(())
    }
}
