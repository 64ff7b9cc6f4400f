//! Timeout guard for single async operations.

use std::future::Future;
use std::time::Duration;

use crate::StudyHubError;

/// Run an operation with a timeout.
///
/// When the deadline fires first the operation's future is dropped, which
/// cancels whatever it was awaiting.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> Result<T, StudyHubError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation())
        .await
        .map_err(|_| StudyHubError::Timeout(timeout))
}
