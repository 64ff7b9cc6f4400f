//! Shared fixtures for worker scenarios. The network double itself is
//! `studyhub_sw::testing::ScriptedFetcher`.

use studyhub_sw::WorkerConfig;
use url::Url;

pub const ORIGIN: &str = "http://localhost:3000";

/// Route worker logs to the test harness; `RUST_LOG` overrides the level.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("studyhub_sw=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn url(path: &str) -> Url {
    Url::parse(&at(path)).unwrap()
}

/// Absolute URL string for a path on the app origin.
pub fn at(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

/// Config with a small manifest and no third-party precache.
pub fn config(version: u32, manifest: &[&str]) -> WorkerConfig {
    WorkerConfig {
        static_cache_name: format!("studyhub-static-v{version}"),
        dynamic_cache_name: format!("studyhub-dynamic-v{version}"),
        manifest: manifest.iter().map(|p| p.to_string()).collect(),
        dynamic_precache: Vec::new(),
        offline_fallback_url: manifest.first().map(|p| p.to_string()).unwrap_or_default(),
        ..Default::default()
    }
}
