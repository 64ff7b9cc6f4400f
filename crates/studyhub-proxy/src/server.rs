//! HTTP surface: every app request goes through the active worker, and a
//! small control API under `/__sw` stands in for the browser's messaging,
//! push and sync plumbing.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use studyhub_net::{Fetcher, NetError};
use studyhub_sw::{ClickOutcome, ServiceWorker, ServiceWorkerContainer, ServiceWorkerError};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::adapter::{into_http_response, to_worker_request, MAX_BODY_BYTES};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub container: Arc<ServiceWorkerContainer>,
    pub fetcher: Arc<dyn Fetcher>,
    pub origin: Url,
}

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Worker(#[from] ServiceWorkerError),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] NetError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No active worker")]
    NoController,
}

impl ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Worker(ServiceWorkerError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Worker(ServiceWorkerError::InvalidMessage(_)) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Worker(ServiceWorkerError::NetworkError(_)) | Self::Upstream(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::NoController => StatusCode::SERVICE_UNAVAILABLE,
            Self::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/__sw/message", post(post_message))
        .route("/__sw/push", post(push))
        .route("/__sw/notifications/:tag/click", post(notification_click))
        .route("/__sw/sync/:tag", post(sync))
        .fallback(intercept)
        .with_state(state)
}

async fn controller(state: &AppState) -> Result<Arc<ServiceWorker>, ProxyError> {
    state
        .container
        .controller()
        .await
        .ok_or(ProxyError::NoController)
}

/// Hand an app request to the worker, or to the network when the worker
/// leaves it alone.
async fn intercept(State(state): State<AppState>, request: Request) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;
    let request = to_worker_request(&state.origin, &parts, body);

    let worker = state.container.controller().await;
    if let Some(ref worker) = worker {
        if let Some(response) = worker.handle_fetch(request.clone()).await? {
            return Ok(into_http_response(response));
        }
    }

    let method = request.method.clone();
    match state.fetcher.fetch(request.duplicate()).await {
        Ok(response) => Ok(into_http_response(response)),
        Err(e) => match worker {
            // Mutations made offline are kept for the next background sync.
            Some(worker) if method != Method::GET && method != Method::HEAD => {
                warn!(url = %request.url, error = %e, "Upstream unreachable, queueing action");
                worker.enqueue_offline_action(request);
                let tag = worker.config().sync_tag.clone();
                Ok((
                    StatusCode::ACCEPTED,
                    Json(json!({ "queued": true, "syncTag": tag })),
                )
                    .into_response())
            }
            _ => Err(e.into()),
        },
    }
}

async fn post_message(
    State(state): State<AppState>,
    Json(message): Json<Value>,
) -> Result<StatusCode, ProxyError> {
    state.container.post_message(&message).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn push(State(state): State<AppState>, body: Bytes) -> Result<Response, ProxyError> {
    let worker = controller(&state).await?;
    let data = (!body.is_empty()).then_some(body.as_ref());
    let notification = worker.on_push(data);
    Ok((StatusCode::CREATED, Json(notification)).into_response())
}

#[derive(Debug, Deserialize)]
struct ClickParams {
    action: Option<String>,
}

async fn notification_click(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(params): Query<ClickParams>,
) -> Result<Json<Value>, ProxyError> {
    let worker = controller(&state).await?;
    let outcome = worker
        .on_notification_click(&tag, params.action.as_deref())
        .await?;

    let body = match outcome {
        ClickOutcome::Dismissed => json!({ "outcome": "dismissed" }),
        ClickOutcome::Focused(client_id) => json!({ "outcome": "focused", "clientId": client_id }),
        ClickOutcome::Opened(client) => json!({
            "outcome": "opened",
            "clientId": client.id,
            "url": client.url.as_str(),
        }),
    };
    Ok(Json(body))
}

async fn sync(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Response, ProxyError> {
    let worker = controller(&state).await?;
    match worker.on_sync(&tag).await {
        Some(report) => Ok(Json(report).into_response()),
        None => {
            debug!(tag = %tag, "Sync tag not handled");
            Err(ServiceWorkerError::NotFound(format!("sync tag {tag}")).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use studyhub_sw::testing::ScriptedFetcher;
    use studyhub_sw::WorkerConfig;
    use tower::ServiceExt;

    async fn app(network: &Arc<ScriptedFetcher>) -> Router {
        network.respond("http://localhost:3000/", 200, "<html>shell</html>");
        network.respond("http://localhost:3000/offline.html", 200, "<html>offline</html>");

        let config = WorkerConfig {
            manifest: vec!["/".to_string(), "/offline.html".to_string()],
            dynamic_precache: Vec::new(),
            ..Default::default()
        };
        let fetcher = network.as_fetcher();
        let container = Arc::new(ServiceWorkerContainer::new());
        let (worker, _events) = container
            .new_worker(config, Arc::clone(&fetcher))
            .unwrap();
        container.register(worker).await.unwrap();

        router(AppState {
            container,
            fetcher,
            origin: Url::parse("http://localhost:3000").unwrap(),
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_offline_navigation_serves_cached_shell() {
        let network = ScriptedFetcher::new();
        let app = app(&network).await;
        network.fail("http://localhost:3000/");
        network.fail("http://localhost:3000/offline.html");

        let request = http::Request::builder()
            .uri("/doubts")
            .header("sec-fetch-mode", "navigate")
            .header("sec-fetch-dest", "document")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<html>shell</html>");
    }

    #[tokio::test]
    async fn test_offline_mutation_is_queued() {
        let network = ScriptedFetcher::new();
        let app = app(&network).await;

        let request = http::Request::builder()
            .method("POST")
            .uri("/api/data")
            .header("content-type", "application/json")
            .body(Body::from("{\"done\":true}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            body_json(response).await,
            json!({ "queued": true, "syncTag": "sync-offline-actions" })
        );
    }

    #[tokio::test]
    async fn test_push_returns_notification() {
        let network = ScriptedFetcher::new();
        let app = app(&network).await;

        let request = http::Request::builder()
            .method("POST")
            .uri("/__sw/push")
            .body(Body::from(r#"{"title":"Quiz ready","url":"/quiz"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let notification = body_json(response).await;
        assert_eq!(notification["title"], "Quiz ready");
        assert_eq!(notification["data"]["url"], "/quiz");
    }

    #[tokio::test]
    async fn test_unknown_sync_tag_is_not_found() {
        let network = ScriptedFetcher::new();
        let app = app(&network).await;

        let request = http::Request::builder()
            .method("POST")
            .uri("/__sw/sync/unknown-tag")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_message_without_type_is_accepted_and_ignored() {
        let network = ScriptedFetcher::new();
        let app = app(&network).await;

        let request = http::Request::builder()
            .method("POST")
            .uri("/__sw/message")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"kind":"whatever"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
