//! Worker versions and their takeover.
//!
//! A new version installs alongside the active one. Only a successful install
//! can replace the active worker; a failed one goes straight to redundant and
//! the old version keeps serving.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use studyhub_net::Fetcher;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::{
    CacheStorage, ServiceWorker, ServiceWorkerError, ServiceWorkerEvent, SharedClients,
    WorkerConfig,
};

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Constructed, not yet installing.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<ServiceWorker>>,
    waiting: Option<Arc<ServiceWorker>>,
    active: Option<Arc<ServiceWorker>>,
}

/// Registration for one scope: at most one installing, waiting and active
/// worker. Cache storage and clients belong to the scope and are shared by
/// every worker version created through [`ServiceWorkerContainer::new_worker`].
#[derive(Default)]
pub struct ServiceWorkerContainer {
    slots: RwLock<Slots>,
    caches: CacheStorage,
    clients: SharedClients,
}

impl ServiceWorkerContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a worker version bound to this scope's caches and clients.
    pub fn new_worker(
        &self,
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(ServiceWorker, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError>
    {
        ServiceWorker::with_environment(
            config,
            fetcher,
            self.caches.clone(),
            Arc::clone(&self.clients),
        )
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn clients(&self) -> &SharedClients {
        &self.clients
    }

    /// Install a new worker version. On success it waits, or takes over at
    /// once if it asked to skip waiting or nothing is active.
    pub async fn register(
        &self,
        worker: ServiceWorker,
    ) -> Result<Arc<ServiceWorker>, ServiceWorkerError> {
        let worker = Arc::new(worker);
        self.slots.write().await.installing = Some(Arc::clone(&worker));
        worker.set_state(ServiceWorkerState::Installing);

        let installed = worker.install().await;
        let first_version;

        {
            let mut slots = self.slots.write().await;
            slots.installing = None;

            if let Err(e) = installed {
                warn!(worker = worker.id().raw(), error = %e, "Install failed, keeping current worker");
                worker.set_state(ServiceWorkerState::Redundant);
                return Err(e);
            }

            worker.set_state(ServiceWorkerState::Installed);
            if let Some(previous) = slots.waiting.replace(Arc::clone(&worker)) {
                previous.set_state(ServiceWorkerState::Redundant);
            }
            first_version = slots.active.is_none();
        }

        // Nothing to wait for when no version is active yet.
        if first_version || worker.skip_waiting_requested() {
            self.activate_waiting().await?;
        } else {
            info!(worker = worker.id().raw(), "Worker installed and waiting");
        }
        Ok(worker)
    }

    /// Promote the waiting worker to active.
    pub async fn activate_waiting(&self) -> Result<Arc<ServiceWorker>, ServiceWorkerError> {
        let worker = self
            .slots
            .write()
            .await
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;

        worker.set_state(ServiceWorkerState::Activating);
        if let Err(e) = worker.activate().await {
            worker.set_state(ServiceWorkerState::Installed);
            self.slots.write().await.waiting = Some(worker);
            return Err(e);
        }
        worker.set_state(ServiceWorkerState::Activated);

        let previous = self.slots.write().await.active.replace(Arc::clone(&worker));
        if let Some(previous) = previous {
            previous.set_state(ServiceWorkerState::Redundant);
        }

        info!(worker = worker.id().raw(), "Worker activated");
        Ok(worker)
    }

    /// The worker that receives fetches.
    pub async fn controller(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn installing(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.installing.clone()
    }

    /// Deliver a control message to the waiting worker, or to the active one
    /// when nothing waits. A skip-waiting request is acted on immediately.
    pub async fn post_message(&self, message: &serde_json::Value) -> Result<(), ServiceWorkerError> {
        let (target, is_waiting) = {
            let slots = self.slots.read().await;
            match (&slots.waiting, &slots.active) {
                (Some(waiting), _) => (Arc::clone(waiting), true),
                (None, Some(active)) => (Arc::clone(active), false),
                (None, None) => {
                    return Err(ServiceWorkerError::NotFound("no worker to message".to_string()))
                }
            }
        };

        target.on_message(message).await;

        if is_waiting && target.skip_waiting_requested() {
            self.activate_waiting().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFetcher;
    use serde_json::json;

    fn config(version: u32, skip_waiting: bool) -> WorkerConfig {
        WorkerConfig {
            static_cache_name: format!("studyhub-static-v{version}"),
            dynamic_cache_name: format!("studyhub-dynamic-v{version}"),
            manifest: vec!["/".to_string(), "/offline.html".to_string()],
            dynamic_precache: Vec::new(),
            skip_waiting_on_install: skip_waiting,
            ..Default::default()
        }
    }

    fn online() -> Arc<ScriptedFetcher> {
        let net = ScriptedFetcher::new();
        net.respond("http://localhost:3000/", 200, "shell");
        net.respond("http://localhost:3000/offline.html", 200, "offline");
        net
    }

    fn worker(
        container: &ServiceWorkerContainer,
        config: WorkerConfig,
        net: &Arc<ScriptedFetcher>,
    ) -> ServiceWorker {
        let fetcher: Arc<dyn Fetcher> = net.clone();
        container.new_worker(config, fetcher).unwrap().0
    }

    #[test]
    fn test_worker_ids_are_unique() {
        assert_ne!(ServiceWorkerId::new(), ServiceWorkerId::new());
    }

    #[tokio::test]
    async fn test_register_with_skip_waiting_activates() {
        let container = ServiceWorkerContainer::new();
        let net = online();

        let worker = container.register(worker(&container, config(1, true), &net)).await.unwrap();

        assert_eq!(worker.state(), ServiceWorkerState::Activated);
        assert!(container.waiting().await.is_none());
        assert_eq!(container.controller().await.unwrap().id(), worker.id());
    }

    #[tokio::test]
    async fn test_first_version_activates_without_skip_waiting() {
        let container = ServiceWorkerContainer::new();
        let net = online();

        let worker = container.register(worker(&container, config(1, false), &net)).await.unwrap();

        assert_eq!(worker.state(), ServiceWorkerState::Activated);
        assert!(container.waiting().await.is_none());
    }

    #[tokio::test]
    async fn test_update_without_skip_waiting_parks() {
        let container = ServiceWorkerContainer::new();
        let net = online();
        let v1 = container.register(worker(&container, config(1, true), &net)).await.unwrap();

        let v2 = container.register(worker(&container, config(2, false), &net)).await.unwrap();

        assert_eq!(v2.state(), ServiceWorkerState::Installed);
        assert_eq!(container.controller().await.unwrap().id(), v1.id());
        assert_eq!(container.waiting().await.unwrap().id(), v2.id());
    }

    #[tokio::test]
    async fn test_skip_waiting_message_promotes() {
        let container = ServiceWorkerContainer::new();
        let net = online();
        let v1 = container.register(worker(&container, config(1, true), &net)).await.unwrap();
        let v2 = container.register(worker(&container, config(2, false), &net)).await.unwrap();
        assert_eq!(container.controller().await.unwrap().id(), v1.id());

        container
            .post_message(&json!({"type": "UNRELATED"}))
            .await
            .unwrap();
        assert_eq!(container.controller().await.unwrap().id(), v1.id());

        container
            .post_message(&json!({"type": "SKIP_WAITING"}))
            .await
            .unwrap();

        assert_eq!(container.controller().await.unwrap().id(), v2.id());
        assert_eq!(v1.state(), ServiceWorkerState::Redundant);
        assert_eq!(v2.state(), ServiceWorkerState::Activated);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_controller() {
        let container = ServiceWorkerContainer::new();
        let net = online();
        let v1 = container.register(worker(&container, config(1, true), &net)).await.unwrap();

        let mut broken = config(2, true);
        broken.manifest.push("/missing.js".to_string());
        net.respond("http://localhost:3000/missing.js", 404, "");

        let result = container.register(worker(&container, broken, &net)).await;
        assert!(matches!(result, Err(ServiceWorkerError::InstallFailed { .. })));

        let controller = container.controller().await.unwrap();
        assert_eq!(controller.id(), v1.id());
        assert_eq!(controller.state(), ServiceWorkerState::Activated);
        assert_eq!(
            container.caches().keys().await,
            vec!["studyhub-static-v1".to_string(), "studyhub-dynamic-v1".to_string()]
        );
        assert!(container.installing().await.is_none());
    }

    #[tokio::test]
    async fn test_post_message_without_workers() {
        let container = ServiceWorkerContainer::new();
        let result = container.post_message(&json!({"type": "SKIP_WAITING"})).await;
        assert!(matches!(result, Err(ServiceWorkerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_activate_without_waiting_is_state_error() {
        let container = ServiceWorkerContainer::new();
        assert!(matches!(
            container.activate_waiting().await,
            Err(ServiceWorkerError::StateError(_))
        ));
    }
}
