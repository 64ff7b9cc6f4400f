//! Conversion between axum's HTTP types and the worker's request model.

use axum::body::Body;
use bytes::Bytes;
use http::request::Parts;
use http::HeaderMap;
use studyhub_net::{Request, RequestDestination, RequestMode, Response};
use url::Url;

/// Largest request body the proxy buffers.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Build the worker request for an incoming request, addressed to `origin`.
pub fn to_worker_request(origin: &Url, parts: &Parts, body: Bytes) -> Request {
    let mut url = origin.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());

    let mut request = Request::new(parts.method.clone(), url);
    request.headers = forwardable(&parts.headers);

    if let Some(dest) = header(&parts.headers, "sec-fetch-dest") {
        request = request.destination(RequestDestination::from_sec_fetch_dest(dest));
    }
    if let Some(mode) = header(&parts.headers, "sec-fetch-mode") {
        request = request.mode(RequestMode::from_sec_fetch_mode(mode));
    }
    if !body.is_empty() {
        request.body = Some(body);
    }
    request
}

/// Turn a worker response back into an axum response.
pub fn into_http_response(response: Response) -> axum::response::Response {
    let status = response.status;
    let headers = forwardable(&response.headers);

    let mut out = axum::response::Response::new(Body::from(response.into_body()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut kept = headers.clone();
    for name in HOP_BY_HOP {
        kept.remove(*name);
    }
    kept
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
