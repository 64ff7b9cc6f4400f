//! Control channel payloads: app messages, push notifications, and the queue
//! of offline actions flushed by background sync.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize};
use studyhub_net::Request;

use crate::{ServiceWorkerError, WorkerConfig};

/// Message posted by the foreground app. Unknown types are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Promote the waiting worker now.
    SkipWaiting,
    /// Take control of every open client.
    ClientsClaim,
    /// Reply with the current cache names.
    GetVersion,
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn parse(value: &serde_json::Value) -> Result<Self, ServiceWorkerError> {
        Self::deserialize(value).map_err(|e| ServiceWorkerError::InvalidMessage(e.to_string()))
    }
}

/// Push payload. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub id: Option<String>,
}

impl PushPayload {
    /// Decode push data. Data that is not a JSON object becomes the body.
    pub fn from_bytes(data: Option<&[u8]>) -> Self {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return Self::default();
        };
        match serde_json::from_slice::<PushPayload>(data) {
            Ok(payload) => payload,
            Err(_) => Self {
                body: Some(String::from_utf8_lossy(data).into_owned()),
                ..Self::default()
            },
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Data carried by a notification for the click handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    pub url: String,
    pub id: Option<String>,
}

/// Notification button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

const DEFAULT_BODY: &str = "You have a new update";

/// A system notification to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub tag: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build the notification for a push, filling defaults from config.
    pub fn from_push(payload: PushPayload, config: &WorkerConfig) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let tag = match payload.id {
            Some(ref id) => format!("studyhub-{id}"),
            None => format!("studyhub-push-{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
        };

        Self {
            tag,
            title: payload.title.unwrap_or_else(|| config.app_name.clone()),
            body: payload.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: config.notification_icon.clone(),
            badge: config.notification_icon.clone(),
            data: NotificationData {
                url: payload.url.unwrap_or_else(|| "/".to_string()),
                id: payload.id,
            },
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN.to_string(),
                    title: "Open".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
        }
    }
}

/// Result of flushing the offline queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub flushed: usize,
    pub remaining: usize,
}

/// Most offline actions kept between syncs.
pub const MAX_QUEUED_ACTIONS: usize = 100;

/// Most notifications kept on display at once.
pub const MAX_SHOWN_NOTIFICATIONS: usize = 20;

/// Mutations deferred while offline, replayed on background sync. When full,
/// the oldest action is dropped to make room.
#[derive(Debug)]
pub struct OfflineQueue {
    pending: VecDeque<Request>,
    capacity: usize,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::with_capacity(MAX_QUEUED_ACTIONS)
    }
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue a request. Returns the action evicted to stay within capacity.
    pub fn push(&mut self, request: Request) -> Option<Request> {
        let evicted = if self.pending.len() >= self.capacity {
            self.pending.pop_front()
        } else {
            None
        };
        self.pending.push_back(request);
        evicted
    }

    /// Take everything queued, oldest first.
    pub fn take_all(&mut self) -> Vec<Request> {
        self.pending.drain(..).collect()
    }

    /// Put undelivered requests back ahead of anything queued meanwhile.
    /// Returns the oldest actions evicted to stay within capacity.
    pub fn requeue_front(&mut self, failed: Vec<Request>) -> Vec<Request> {
        for request in failed.into_iter().rev() {
            self.pending.push_front(request);
        }
        let excess = self.pending.len().saturating_sub(self.capacity);
        self.pending.drain(..excess).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
