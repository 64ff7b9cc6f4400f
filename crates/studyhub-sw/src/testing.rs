//! Scripted network double shared by the worker's tests and by crates that
//! drive a worker in their own tests. Enabled by the `test-util` feature.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use hashbrown::HashMap;
use http::{HeaderValue, StatusCode};
use studyhub_net::{CacheMode, Fetcher, NetError, Request, Response};

use crate::lock;

#[derive(Debug, Clone)]
enum Script {
    Respond(u16, String),
    Fail,
    Hang,
}

/// Answers by exact URL; unknown URLs behave as offline.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<(String, CacheMode)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        lock(&self.routes).insert(url.to_string(), Script::Respond(status, body.to_string()));
    }

    /// Make `url` unreachable.
    pub fn fail(&self, url: &str) {
        lock(&self.routes).insert(url.to_string(), Script::Fail);
    }

    /// Make fetches of `url` never complete.
    pub fn hang(&self, url: &str) {
        lock(&self.routes).insert(url.to_string(), Script::Hang);
    }

    /// Number of fetches issued for `url`, answered or not.
    pub fn calls(&self, url: &str) -> usize {
        lock(&self.calls).iter().filter(|(u, _)| u == url).count()
    }

    /// Cache mode of every fetch issued for `url`, in order.
    pub fn cache_modes(&self, url: &str) -> Vec<CacheMode> {
        lock(&self.calls)
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, mode)| *mode)
            .collect()
    }

    pub fn as_fetcher(self: &Arc<Self>) -> Arc<dyn Fetcher> {
        self.clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        let url = request.url.to_string();
        let script = lock(&self.routes).get(&url).cloned().unwrap_or(Script::Fail);
        lock(&self.calls).push((url.clone(), request.cache_mode));

        Box::pin(async move {
            match script {
                Script::Respond(status, body) => {
                    let status = StatusCode::from_u16(status)
                        .map_err(|e| NetError::RequestFailed(e.to_string()))?;
                    Ok(Response::new(status, body)
                        .with_url(request.url)
                        .with_header(
                            http::header::CONTENT_TYPE,
                            HeaderValue::from_static("text/plain"),
                        ))
                }
                Script::Fail => Err(NetError::RequestFailed(format!("offline: {url}"))),
                Script::Hang => futures::future::pending().await,
            }
        })
    }
}
