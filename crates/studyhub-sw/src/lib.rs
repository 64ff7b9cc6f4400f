//! # StudyHub Service Worker
//!
//! Offline-capable request caching worker for the StudyHub study tracker.
//! It sits between the single-page app and the network and decides, per
//! request, whether to answer from cache, from the network, or both.
//!
//! ## Features
//!
//! - **Lifecycle**: install-time precache of the app shell, activate-time purge
//!   of stale cache versions, skip-waiting takeover
//! - **Classification**: navigation, API, static asset, everything else
//! - **Strategies**: cache-first, network-first with timeout,
//!   stale-while-revalidate, navigation with offline fallback
//! - **Control channel**: skip-waiting messages, push notifications,
//!   notification clicks, background sync of queued offline actions
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     └── installing / waiting / active (ServiceWorker)
//!             ├── CacheLifecycle ── CacheStorage
//!             │                        ├── <static partition>
//!             │                        └── <dynamic partition>
//!             ├── RequestClassifier ── Route
//!             ├── FetchStrategies ──── Fetcher (network)
//!             │        └── BackgroundTasks (detached refreshes)
//!             └── Clients / notifications / OfflineQueue
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod background;
pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod registration;
pub mod strategy;
pub mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use background::BackgroundTasks;
pub use cache::{Cache, CacheStorage, CachedEntry};
pub use classify::{RequestClassifier, Route};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients, SharedClients};
pub use config::WorkerConfig;
pub use control::{
    ControlMessage, Notification, NotificationAction, NotificationData, OfflineQueue,
    PushPayload, SyncReport, MAX_QUEUED_ACTIONS, MAX_SHOWN_NOTIFICATIONS,
};
pub use error::ServiceWorkerError;
pub use lifecycle::{CacheLifecycle, InstallReport};
pub use registration::{ServiceWorkerContainer, ServiceWorkerId, ServiceWorkerState};
pub use strategy::FetchStrategies;
pub use worker::{ActivateReport, ClickOutcome, ServiceWorker, ServiceWorkerEvent};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
