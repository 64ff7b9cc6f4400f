//! Request classification.
//!
//! Rules are evaluated in order. Navigation and API detection come before the
//! asset check so a navigation is never treated as a script or style fetch.

use http::Method;
use studyhub_net::Request;
use tracing::trace;
use url::Url;

/// Which handler answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Not intercepted; the request goes straight to the network.
    Passthrough,
    /// Top-level document load.
    Navigate,
    /// API and backend calls.
    NetworkFirst,
    /// Images, fonts, styles, scripts.
    CacheFirst,
    /// Everything else.
    StaleWhileRevalidate,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Passthrough => "passthrough",
            Route::Navigate => "navigate",
            Route::NetworkFirst => "network-first",
            Route::CacheFirst => "cache-first",
            Route::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

/// Routes requests to fetch strategies.
#[derive(Debug, Clone, Default)]
pub struct RequestClassifier {
    api_path_prefixes: Vec<String>,
    api_host_substrings: Vec<String>,
    ignored_schemes: Vec<String>,
}

impl RequestClassifier {
    pub fn new(
        api_path_prefixes: Vec<String>,
        api_host_substrings: Vec<String>,
        ignored_schemes: Vec<String>,
    ) -> Self {
        Self {
            api_path_prefixes,
            api_host_substrings,
            ignored_schemes,
        }
    }

    /// Pick the route for a request.
    pub fn classify(&self, request: &Request) -> Route {
        let route = if request.method != Method::GET || self.is_ignored_scheme(&request.url) {
            Route::Passthrough
        } else if request.is_navigation() {
            Route::Navigate
        } else if self.is_api(&request.url) {
            Route::NetworkFirst
        } else if request.destination.is_static_asset() {
            Route::CacheFirst
        } else {
            Route::StaleWhileRevalidate
        };

        trace!(url = %request.url, method = %request.method, route = route.as_str(), "Classified");
        route
    }

    fn is_ignored_scheme(&self, url: &Url) -> bool {
        self.ignored_schemes.iter().any(|s| s == url.scheme())
    }

    fn is_api(&self, url: &Url) -> bool {
        let path = url.path();
        if self.api_path_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return true;
        }
        url.host_str().is_some_and(|host| {
            self.api_host_substrings
                .iter()
                .any(|needle| host.contains(needle.as_str()))
        })
    }
}
