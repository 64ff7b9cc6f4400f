//! A single worker version and the events it routes.
//!
//! [`ServiceWorker`] is the entry point for everything the platform delivers:
//! fetches, control messages, pushes, notification clicks and sync triggers.
//! Side effects the worker cannot perform itself (showing a notification,
//! focusing a window) are emitted as [`ServiceWorkerEvent`]s for the adapter.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use studyhub_net::{Fetcher, Request, Response};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::control::{ACTION_DISMISS, MAX_SHOWN_NOTIFICATIONS};
use crate::{
    lock, BackgroundTasks, CacheLifecycle, CacheStorage, Client, ClientMatchOptions, ClientType,
    Clients, ControlMessage, FetchStrategies, InstallReport, Notification, OfflineQueue,
    PushPayload, RequestClassifier, Route, ServiceWorkerError, ServiceWorkerId,
    ServiceWorkerState, SharedClients, SyncReport, WorkerConfig,
};

/// Side effects requested by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServiceWorkerEvent {
    StateChange {
        worker: u64,
        state: ServiceWorkerState,
    },
    SkipWaitingRequested {
        worker: u64,
    },
    CachesPurged {
        deleted: Vec<String>,
    },
    ClientsClaimed {
        worker: u64,
        count: usize,
    },
    ShowNotification(Notification),
    NotificationClosed {
        tag: String,
    },
    FocusClient {
        client_id: String,
        url: String,
    },
    OpenWindow {
        client_id: String,
        url: String,
    },
    /// Reply to `GET_VERSION`.
    Version {
        static_cache: String,
        dynamic_cache: String,
    },
    SyncCompleted {
        tag: String,
        flushed: usize,
        remaining: usize,
    },
}

/// Outcome of activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale partitions that were deleted.
    pub deleted: Vec<String>,
    /// Clients newly placed under this worker's control.
    pub claimed: usize,
}

/// What a notification click resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    /// An existing window was focused.
    Focused(String),
    /// A new window was opened.
    Opened(Client),
}

/// One version of the worker.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    fetcher: Arc<dyn Fetcher>,
    caches: CacheStorage,
    lifecycle: CacheLifecycle,
    classifier: RequestClassifier,
    strategies: FetchStrategies,
    background: BackgroundTasks,
    clients: SharedClients,
    events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    state: Mutex<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    notifications: Mutex<Vec<Notification>>,
    offline_queue: Mutex<OfflineQueue>,
}

impl ServiceWorker {
    /// Create a standalone worker with its own cache storage and clients.
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        Self::with_environment(config, fetcher, CacheStorage::new(), Clients::shared())
    }

    /// Create a worker over existing cache storage and clients, as a new
    /// version of an already registered worker would see them.
    pub fn with_environment(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        caches: CacheStorage,
        clients: SharedClients,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let config = Arc::new(config);
        let background = BackgroundTasks::new();
        let (events, receiver) = mpsc::unbounded_channel();

        let worker = Self {
            id: ServiceWorkerId::new(),
            lifecycle: CacheLifecycle::new(
                Arc::clone(&config),
                caches.clone(),
                Arc::clone(&fetcher),
            ),
            classifier: config.classifier(),
            strategies: FetchStrategies::new(
                &config,
                caches.clone(),
                Arc::clone(&fetcher),
                background.clone(),
            )?,
            config,
            fetcher,
            caches,
            background,
            clients,
            events,
            state: Mutex::new(ServiceWorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            notifications: Mutex::new(Vec::new()),
            offline_queue: Mutex::new(OfflineQueue::new()),
        };
        Ok((worker, receiver))
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn state(&self) -> ServiceWorkerState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: ServiceWorkerState) {
        *lock(&self.state) = state;
        debug!(worker = self.id.raw(), ?state, "State change");
        self.emit(ServiceWorkerEvent::StateChange {
            worker: self.id.raw(),
            state,
        });
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn clients(&self) -> &SharedClients {
        &self.clients
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Precache both partitions. Fails if any precache URL fails.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        let report = self.lifecycle.install().await?;
        if self.config.skip_waiting_on_install {
            self.skip_waiting();
        }
        Ok(report)
    }

    /// Ask to be promoted as soon as installation finishes.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            info!(worker = self.id.raw(), "Skip waiting requested");
        }
        self.emit(ServiceWorkerEvent::SkipWaitingRequested {
            worker: self.id.raw(),
        });
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Purge stale partitions, then claim every open client.
    pub async fn activate(&self) -> Result<ActivateReport, ServiceWorkerError> {
        let deleted = self.lifecycle.purge_stale().await;
        self.emit(ServiceWorkerEvent::CachesPurged {
            deleted: deleted.clone(),
        });

        let claimed = self.claim_clients().await;
        Ok(ActivateReport { deleted, claimed })
    }

    async fn claim_clients(&self) -> usize {
        let count = self.clients.write().await.claim(self.id);
        self.emit(ServiceWorkerEvent::ClientsClaimed {
            worker: self.id.raw(),
            count,
        });
        count
    }

    /// Answer an intercepted request. `None` means the request is not
    /// intercepted and should go to the network untouched.
    pub async fn handle_fetch(
        &self,
        request: Request,
    ) -> Result<Option<Response>, ServiceWorkerError> {
        let start = Instant::now();
        let route = self.classifier.classify(&request);
        let url = request.url.to_string();

        let result = match route {
            Route::Passthrough => return Ok(None),
            Route::Navigate => Ok(self.strategies.navigate(request).await),
            Route::NetworkFirst => Ok(self.strategies.network_first(request).await),
            Route::CacheFirst => Ok(self.strategies.cache_first(request).await),
            Route::StaleWhileRevalidate => self.strategies.stale_while_revalidate(request).await,
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => info!(
                route = route.as_str(),
                url = %url,
                status = response.status.as_u16(),
                elapsed_ms,
                "Fetch handled"
            ),
            Err(e) => warn!(
                route = route.as_str(),
                url = %url,
                error = %e,
                elapsed_ms,
                "Fetch failed"
            ),
        }
        result.map(Some)
    }

    /// Handle a control message from the app. Unrecognised or malformed
    /// messages are ignored.
    pub async fn on_message(&self, message: &serde_json::Value) -> Option<ControlMessage> {
        let parsed = match ControlMessage::parse(message) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed control message");
                return None;
            }
        };

        match parsed {
            ControlMessage::SkipWaiting => self.skip_waiting(),
            ControlMessage::ClientsClaim => {
                self.claim_clients().await;
            }
            ControlMessage::GetVersion => self.emit(ServiceWorkerEvent::Version {
                static_cache: self.config.static_cache_name.clone(),
                dynamic_cache: self.config.dynamic_cache_name.clone(),
            }),
            ControlMessage::Unknown => {
                debug!(message = %message, "Ignoring unknown control message");
                return None;
            }
        }
        Some(parsed)
    }

    /// Show a notification for a push.
    pub fn on_push(&self, data: Option<&[u8]>) -> Notification {
        let notification = Notification::from_push(PushPayload::from_bytes(data), &self.config);
        info!(tag = %notification.tag, title = %notification.title, "Showing notification");

        let evicted = {
            let mut shown = lock(&self.notifications);
            let evicted = (shown.len() >= MAX_SHOWN_NOTIFICATIONS).then(|| shown.remove(0));
            shown.push(notification.clone());
            evicted
        };
        if let Some(evicted) = evicted {
            warn!(tag = %evicted.tag, "Too many notifications shown, closing the oldest");
            self.emit(ServiceWorkerEvent::NotificationClosed { tag: evicted.tag });
        }
        self.emit(ServiceWorkerEvent::ShowNotification(notification.clone()));
        notification
    }

    /// Notifications currently displayed.
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    /// Close the clicked notification and bring its target into view.
    pub async fn on_notification_click(
        &self,
        tag: &str,
        action: Option<&str>,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        let notification = {
            let mut shown = lock(&self.notifications);
            let index = shown
                .iter()
                .position(|n| n.tag == tag)
                .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {tag}")))?;
            shown.remove(index)
        };
        self.emit(ServiceWorkerEvent::NotificationClosed {
            tag: tag.to_string(),
        });

        if action == Some(ACTION_DISMISS) {
            return Ok(ClickOutcome::Dismissed);
        }

        let target = self.config.resolve(&notification.data.url)?;
        let mut clients = self.clients.write().await;
        let windows = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        let existing = clients
            .match_all(self.id, &windows)
            .into_iter()
            .find(|c| c.url == target);

        match existing {
            Some(client) => {
                let focused = clients.focus(&client.id)?;
                self.emit(ServiceWorkerEvent::FocusClient {
                    client_id: focused.id.clone(),
                    url: focused.url.to_string(),
                });
                Ok(ClickOutcome::Focused(focused.id))
            }
            None => {
                let client = clients.open_window(target, self.id);
                self.emit(ServiceWorkerEvent::OpenWindow {
                    client_id: client.id.clone(),
                    url: client.url.to_string(),
                });
                Ok(ClickOutcome::Opened(client))
            }
        }
    }

    /// Defer a mutation until the next background sync.
    pub fn enqueue_offline_action(&self, request: Request) {
        debug!(url = %request.url, method = %request.method, "Queued offline action");
        if let Some(evicted) = lock(&self.offline_queue).push(request) {
            warn!(
                url = %evicted.url,
                method = %evicted.method,
                "Offline queue full, dropped oldest action"
            );
        }
    }

    pub fn pending_offline_actions(&self) -> usize {
        lock(&self.offline_queue).len()
    }

    /// Replay queued actions when the sync tag matches. Undelivered actions
    /// stay queued for the next sync; nothing is retried here.
    pub async fn on_sync(&self, tag: &str) -> Option<SyncReport> {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring unknown sync tag");
            return None;
        }

        let queued = lock(&self.offline_queue).take_all();
        let mut failed = Vec::new();
        let mut flushed = 0;

        for request in queued {
            match self.fetcher.fetch(request.duplicate()).await {
                Ok(response) if !response.status.is_server_error() => flushed += 1,
                Ok(response) => {
                    warn!(url = %request.url, status = %response.status, "Offline action rejected");
                    failed.push(request);
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Offline action not delivered");
                    failed.push(request);
                }
            }
        }

        let remaining = {
            let mut queue = lock(&self.offline_queue);
            for evicted in queue.requeue_front(failed) {
                warn!(url = %evicted.url, "Offline queue full, dropped undelivered action");
            }
            queue.len()
        };

        info!(tag, flushed, remaining, "Background sync finished");
        self.emit(ServiceWorkerEvent::SyncCompleted {
            tag: tag.to_string(),
            flushed,
            remaining,
        });
        Some(SyncReport { flushed, remaining })
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("static_cache", &self.config.static_cache_name)
            .field("dynamic_cache", &self.config.dynamic_cache_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFetcher;
    use crate::MAX_QUEUED_ACTIONS;
    use bytes::Bytes;
    use http::StatusCode;
    use serde_json::json;
    use studyhub_net::RequestDestination;
    use url::Url;

    fn url(path: &str) -> Url {
        Url::parse(&format!("http://localhost:3000{path}")).unwrap()
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            manifest: vec!["/".to_string(), "/offline.html".to_string()],
            dynamic_precache: Vec::new(),
            ..Default::default()
        }
    }

    fn online() -> Arc<ScriptedFetcher> {
        let net = ScriptedFetcher::new();
        net.respond("http://localhost:3000/", 200, "shell");
        net.respond("http://localhost:3000/offline.html", 200, "offline");
        net
    }

    fn worker(net: &Arc<ScriptedFetcher>) -> (ServiceWorker, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let fetcher: Arc<dyn Fetcher> = net.clone();
        ServiceWorker::new(config(), fetcher).unwrap()
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let net = online();
        let fetcher: Arc<dyn Fetcher> = net;
        let config = WorkerConfig {
            timeout_ms: 0,
            ..config()
        };
        assert!(matches!(
            ServiceWorker::new(config, fetcher),
            Err(ServiceWorkerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_install_requests_skip_waiting() {
        let net = online();
        let (worker, mut rx) = worker(&net);

        let report = worker.install().await.unwrap();

        assert_eq!(report.static_entries, 2);
        assert!(worker.skip_waiting_requested());
        assert!(drain_events(&mut rx)
            .contains(&ServiceWorkerEvent::SkipWaitingRequested { worker: worker.id().raw() }));
    }

    #[tokio::test]
    async fn test_activate_purges_and_claims() {
        let net = online();
        let (worker, mut rx) = worker(&net);
        worker
            .caches()
            .put(
                "studyhub-static-v0",
                &Request::get(url("/")),
                &Response::new(StatusCode::OK, "old"),
            )
            .await
            .unwrap();
        worker.clients().write().await.add(Client::window(url("/quiz")));
        worker.install().await.unwrap();

        let report = worker.activate().await.unwrap();

        assert_eq!(report.deleted, vec!["studyhub-static-v0"]);
        assert_eq!(report.claimed, 1);
        assert_eq!(
            worker.caches().keys().await,
            vec!["studyhub-static-v1", "studyhub-dynamic-v1"]
        );
        let events = drain_events(&mut rx);
        assert!(events.contains(&ServiceWorkerEvent::ClientsClaimed {
            worker: worker.id().raw(),
            count: 1
        }));
    }

    #[tokio::test]
    async fn test_handle_fetch_passes_through_mutations() {
        let net = online();
        let (worker, _rx) = worker(&net);

        let response = worker
            .handle_fetch(Request::post(url("/api/data"), Bytes::from_static(b"{}")))
            .await
            .unwrap();

        assert!(response.is_none());
        assert_eq!(net.calls("http://localhost:3000/api/data"), 0);
    }

    #[tokio::test]
    async fn test_handle_fetch_routes_assets_cache_first() {
        let net = online();
        let (worker, _rx) = worker(&net);

        let request = Request::get(url("/logo.png")).destination(RequestDestination::Image);
        let response = worker.handle_fetch(request).await.unwrap().unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text().unwrap(), crate::strategy::OFFLINE_ASSET_BODY);
    }

    #[tokio::test]
    async fn test_handle_fetch_surfaces_offline_revalidate_miss() {
        let net = online();
        let (worker, _rx) = worker(&net);

        let result = worker.handle_fetch(Request::get(url("/random.json"))).await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_get_version_replies_with_cache_names() {
        let net = online();
        let (worker, mut rx) = worker(&net);

        let handled = worker.on_message(&json!({"type": "GET_VERSION"})).await;

        assert_eq!(handled, Some(ControlMessage::GetVersion));
        assert_eq!(
            drain_events(&mut rx),
            vec![ServiceWorkerEvent::Version {
                static_cache: "studyhub-static-v1".to_string(),
                dynamic_cache: "studyhub-dynamic-v1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_messages_are_ignored() {
        let net = online();
        let (worker, mut rx) = worker(&net);

        assert_eq!(worker.on_message(&json!({"type": "RELOAD_ALL"})).await, None);
        assert_eq!(worker.on_message(&json!("SKIP_WAITING")).await, None);
        assert!(!worker.skip_waiting_requested());
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_notification_click_focuses_matching_window() {
        let net = online();
        let (worker, mut rx) = worker(&net);
        let window = Client::window(url("/doubts"));
        let window_id = window.id.clone();
        worker.clients().write().await.add(Client::window(url("/")));
        worker.clients().write().await.add(window);

        let notification = worker.on_push(Some(br#"{"title":"Answered","url":"/doubts"}"#));
        let outcome = worker
            .on_notification_click(&notification.tag, Some("open"))
            .await
            .unwrap();

        assert_eq!(outcome, ClickOutcome::Focused(window_id.clone()));
        assert!(worker.notifications().is_empty());
        assert!(drain_events(&mut rx).contains(&ServiceWorkerEvent::FocusClient {
            client_id: window_id,
            url: "http://localhost:3000/doubts".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_notification_dismiss_only_closes() {
        let net = online();
        let (worker, _rx) = worker(&net);

        let notification = worker.on_push(None);
        let outcome = worker
            .on_notification_click(&notification.tag, Some(ACTION_DISMISS))
            .await
            .unwrap();

        assert_eq!(outcome, ClickOutcome::Dismissed);
        assert!(worker.clients().read().await.is_empty());
        assert!(matches!(
            worker.on_notification_click(&notification.tag, None).await,
            Err(ServiceWorkerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_flushes_and_keeps_failures() {
        let net = online();
        net.respond("http://localhost:3000/api/bookmarks", 201, "");
        net.respond("http://localhost:3000/api/progress", 503, "");
        let (worker, mut rx) = worker(&net);

        worker.enqueue_offline_action(Request::post(url("/api/bookmarks"), Bytes::new()));
        worker.enqueue_offline_action(Request::post(url("/api/progress"), Bytes::new()));
        worker.enqueue_offline_action(Request::post(url("/api/notes"), Bytes::new()));

        assert_eq!(worker.on_sync("periodic-refresh").await, None);
        assert_eq!(worker.pending_offline_actions(), 3);

        let report = worker.on_sync("sync-offline-actions").await.unwrap();
        assert_eq!(report, SyncReport { flushed: 1, remaining: 2 });
        assert_eq!(worker.pending_offline_actions(), 2);
        assert!(drain_events(&mut rx).contains(&ServiceWorkerEvent::SyncCompleted {
            tag: "sync-offline-actions".to_string(),
            flushed: 1,
            remaining: 2,
        }));
    }

    #[tokio::test]
    async fn test_oldest_notification_closes_when_too_many_are_shown() {
        let net = online();
        let (worker, mut rx) = worker(&net);

        let first = worker.on_push(None);
        for _ in 0..MAX_SHOWN_NOTIFICATIONS {
            worker.on_push(None);
        }

        let shown = worker.notifications();
        assert_eq!(shown.len(), MAX_SHOWN_NOTIFICATIONS);
        assert!(shown.iter().all(|n| n.tag != first.tag));
        assert!(drain_events(&mut rx)
            .contains(&ServiceWorkerEvent::NotificationClosed { tag: first.tag }));
    }

    #[tokio::test]
    async fn test_offline_queue_is_bounded() {
        let net = online();
        let (worker, _rx) = worker(&net);

        for i in 0..=MAX_QUEUED_ACTIONS {
            let note = url(&format!("/api/notes/{i}"));
            worker.enqueue_offline_action(Request::post(note, Bytes::new()));
        }
        assert_eq!(worker.pending_offline_actions(), MAX_QUEUED_ACTIONS);

        net.respond("http://localhost:3000/api/notes/0", 201, "");
        let report = worker.on_sync("sync-offline-actions").await.unwrap();
        assert_eq!(net.calls("http://localhost:3000/api/notes/0"), 0);
        assert_eq!(report.flushed, 0);
        assert_eq!(report.remaining, MAX_QUEUED_ACTIONS);
    }
}
