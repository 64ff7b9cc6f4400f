//! Detached background tasks.
//!
//! Refresh fetches run here so the response path never waits on them. Their
//! outcome is only logged.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::{JoinError, JoinSet};
use tracing::{trace, warn};

use crate::{lock, ServiceWorkerError};

/// Owner of fire-and-forget tasks.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task. Must be called from inside a tokio runtime.
    pub fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<(), ServiceWorkerError>> + Send + 'static,
    {
        let mut set = lock(&self.set);
        while let Some(finished) = set.try_join_next() {
            log_join(finished);
        }
        set.spawn(async move {
            match task.await {
                Ok(()) => trace!(task = label, "Background task finished"),
                Err(e) => warn!(task = label, error = %e, "Background task failed"),
            }
        });
    }

    /// Tasks spawned and not yet reaped.
    pub fn pending(&self) -> usize {
        lock(&self.set).len()
    }

    /// Wait for every outstanding task. Used at shutdown.
    pub async fn drain(&self) {
        let mut set = std::mem::take(&mut *lock(&self.set));
        while let Some(finished) = set.join_next().await {
            log_join(finished);
        }
    }
}

impl fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("pending", &self.pending())
            .finish()
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            warn!(error = %e, "Background task panicked");
        }
    }
}
