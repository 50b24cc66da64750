//! Off-loop store execution with lock-timeout retry.

use crate::errors::CoordinatorError;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::warn;

/// How lock timeouts are retried. Other store errors are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }
}

/// Run `f` against the store on the blocking pool.
///
/// Every attempt is its own `spawn_blocking` task, so a timed-out attempt has
/// released its thread before the next one starts. A panic inside `f` is
/// reported as [`CoordinatorError::StorePanic`].
pub(crate) async fn call_store<S, T, F>(
    store: &Arc<S>,
    policy: RetryPolicy,
    operation: &'static str,
    f: F,
) -> Result<T, CoordinatorError>
where
    S: Store,
    T: Send + 'static,
    F: Fn(&S) -> Result<T, CoordinatorError> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let store = Arc::clone(store);
        let task = Arc::clone(&f);
        let result = tokio::task::spawn_blocking(move || (*task)(store.as_ref()))
            .await
            .map_err(|e| CoordinatorError::StorePanic {
                message: format!("{} panicked: {}", operation, panic_message(e)),
            })?;

        match result {
            Err(CoordinatorError::LockTimeout { waited_ms }) if attempt < attempts => {
                warn!(
                    operation,
                    attempt,
                    attempts,
                    waited_ms,
                    "Store lock busy, retrying in {:?}",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

pub(crate) fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "non-string panic payload".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}
