//! Clients API: the app windows a worker can see and control.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use url::Url;

use crate::{ServiceWorkerError, ServiceWorkerId};

/// Clients shared between worker versions.
pub type SharedClients = Arc<RwLock<Clients>>;

/// A client (open app window or worker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

impl Client {
    /// Create an uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Known clients, in the order they appeared.
#[derive(Debug, Default)]
pub struct Clients {
    clients: Vec<Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedClients {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.push(client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        let index = self.clients.iter().position(|c| c.id == id)?;
        Some(self.clients.remove(index))
    }

    /// Clients matching the options, as seen by `worker`.
    pub fn match_all(&self, worker: ServiceWorkerId, options: &ClientMatchOptions) -> Vec<Client> {
        self.clients
            .iter()
            .filter(|c| options.include_uncontrolled || c.controller == Some(worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect()
    }

    /// Make `worker` the controller of every client. Returns how many changed.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> usize {
        let mut changed = 0;
        for client in &mut self.clients {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                changed += 1;
            }
        }
        changed
    }

    /// Focus a window client; every other client loses focus.
    pub fn focus(&mut self, id: &str) -> Result<Client, ServiceWorkerError> {
        let target = self
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        if target.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }

        for client in &mut self.clients {
            client.focused = client.id == id;
        }
        self.get(id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))
    }

    /// Open a new focused window, controlled by `worker`.
    pub fn open_window(&mut self, url: Url, worker: ServiceWorkerId) -> Client {
        for client in &mut self.clients {
            client.focused = false;
        }
        let client = Client {
            focused: true,
            controller: Some(worker),
            ..Client::window(url)
        };
        self.clients.push(client.clone());
        client
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_open_window() {
        let mut clients = Clients::new();
        let worker = ServiceWorkerId::new();

        let client = clients.open_window(url("http://localhost:3000/doubts"), worker);
        assert_eq!(client.client_type, ClientType::Window);
        assert!(client.focused);
        assert_eq!(client.controller, Some(worker));
        assert!(clients.get(&client.id).is_some());
    }

    #[test]
    fn test_claim_and_match_all() {
        let mut clients = Clients::new();
        let worker = ServiceWorkerId::new();
        clients.add(Client::window(url("http://localhost:3000/")));
        clients.add(Client::window(url("http://localhost:3000/quiz")));

        let controlled = ClientMatchOptions::default();
        assert!(clients.match_all(worker, &controlled).is_empty());

        let everyone = ClientMatchOptions {
            include_uncontrolled: true,
            ..Default::default()
        };
        assert_eq!(clients.match_all(worker, &everyone).len(), 2);

        assert_eq!(clients.claim(worker), 2);
        assert_eq!(clients.claim(worker), 0);
        assert_eq!(clients.match_all(worker, &controlled).len(), 2);
    }

    #[test]
    fn test_focus_moves_focus() {
        let mut clients = Clients::new();
        let a = Client::window(url("http://localhost:3000/"));
        let b = Client::window(url("http://localhost:3000/bookmarks"));
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        clients.add(a);
        clients.add(b);

        clients.focus(&a_id).unwrap();
        let focused = clients.focus(&b_id).unwrap();

        assert!(focused.focused);
        assert!(!clients.get(&a_id).unwrap().focused);
    }

    #[test]
    fn test_focus_rejects_worker_clients() {
        let mut clients = Clients::new();
        let client = Client {
            client_type: ClientType::Worker,
            ..Client::window(url("http://localhost:3000/worker.js"))
        };
        let id = client.id.clone();
        clients.add(client);

        assert!(matches!(
            clients.focus(&id),
            Err(ServiceWorkerError::StateError(_))
        ));
        assert!(matches!(
            clients.focus("missing"),
            Err(ServiceWorkerError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove() {
        let mut clients = Clients::new();
        let client = Client::window(url("http://localhost:3000/"));
        let id = client.id.clone();
        clients.add(client);

        assert!(clients.remove(&id).is_some());
        assert!(clients.is_empty());
    }
}
