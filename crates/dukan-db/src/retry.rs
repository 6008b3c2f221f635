//! # Reconnect-and-Retry
//!
//! The combinator every serialized operation runs through.
//!
//! ```text
//!  attempt 1 ──► ok ─────────────────────────────────► result
//!      │
//!      └─ recoverable error ─► invalidate handle
//!                                   │
//!                              attempt 2 (fresh handle) ──► ok / error
//! ```
//!
//! Non-recoverable errors (constraint violations, ledger rules, bad SQL)
//! are returned immediately. An operation that fails with a recoverable
//! error after its own writes went through must not be retried blindly;
//! transactional attempts are safe because the failed transaction never
//! committed.

use futures_util::future::BoxFuture;
use sqlx::SqliteConnection;
use tracing::warn;

use crate::config::RetrySettings;
use crate::connection::ConnectionManager;
use crate::error::DbResult;
use crate::transaction;

/// How many times an operation may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Never less than 1.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// One retry after a recoverable failure.
    pub const RETRY_ONCE: RetryPolicy = RetryPolicy { max_attempts: 2 };

    /// Never retry.
    pub const NO_RETRY: RetryPolicy = RetryPolicy { max_attempts: 1 };

    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::RETRY_ONCE
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
        }
    }
}

// =============================================================================
// Attempts
// =============================================================================

/// One re-invocable unit of work against a connection.
pub(crate) trait Attempt<T>: Send {
    fn attempt<'c>(&'c mut self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>>;
}

/// Runs the operation directly on the connection.
pub(crate) struct Plain<F>(pub F);

impl<F> Plain<F> {
    /// Wraps a closure, pinning down its higher-ranked signature.
    pub fn new<T>(f: F) -> Self
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        Plain(f)
    }
}

impl<T, F> Attempt<T> for Plain<F>
where
    F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> + Send,
{
    fn attempt<'c>(&'c mut self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> {
        (self.0)(conn)
    }
}

/// Runs the operation inside `BEGIN IMMEDIATE` / `COMMIT`.
pub(crate) struct Transactional<F>(pub F);

impl<T, F> Attempt<T> for Transactional<F>
where
    T: Send + 'static,
    F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> + Send,
{
    fn attempt<'c>(&'c mut self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> {
        Box::pin(transaction::in_transaction(conn, &mut self.0))
    }
}

// =============================================================================
// Combinator
// =============================================================================

/// Runs `op` against the manager's connection, reconnecting and retrying on
/// recoverable errors as `policy` allows.
pub(crate) async fn run_with_retry<T, A>(
    policy: RetryPolicy,
    manager: &mut ConnectionManager,
    op: &mut A,
) -> DbResult<T>
where
    A: Attempt<T> + ?Sized,
{
    let mut attempt = 1;
    loop {
        let result = match manager.connection().await {
            Ok(conn) => op.attempt(conn).await,
            Err(e) => Err(e),
        };

        match result {
            Err(e) if e.is_recoverable() && policy.allows_retry(attempt) => {
                warn!(attempt, error = %e, "Recoverable database error, reconnecting");
                manager.invalidate();
                attempt += 1;
            }
            Err(e) => {
                if e.is_recoverable() {
                    manager.invalidate();
                }
                return Err(e);
            }
            Ok(value) => return Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn failing_first(calls: Arc<AtomicU32>, failures: u32) -> impl Attempt<u32> {
        Plain::new(move |_conn| {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(DbError::ConnectionLost("injected".into()))
                } else {
                    Ok(n)
                }
            })
        })
    }

    #[tokio::test]
    async fn test_single_recoverable_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConnectionManager::new(StoreConfig::new(dir.path()));
        let calls = Arc::new(AtomicU32::new(0));
        let mut op = failing_first(calls.clone(), 1);

        let result = run_with_retry(RetryPolicy::RETRY_ONCE, &mut manager, &mut op).await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_recoverable_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConnectionManager::new(StoreConfig::new(dir.path()));
        let calls = Arc::new(AtomicU32::new(0));
        let mut op = failing_first(calls.clone(), 2);

        let result = run_with_retry(RetryPolicy::RETRY_ONCE, &mut manager, &mut op).await;

        assert!(matches!(result, Err(DbError::ConnectionLost(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!manager.is_open());
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConnectionManager::new(StoreConfig::new(dir.path()));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut op = Plain::new(move |_conn| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err::<(), _>(DbError::QueryFailed("no such table".into())) })
        });

        let result = run_with_retry(RetryPolicy::RETRY_ONCE, &mut manager, &mut op).await;

        assert!(matches!(result, Err(DbError::QueryFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
