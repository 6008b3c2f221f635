//! # Store Handle
//!
//! The one value collaborators hold. Cloning it is cheap; every clone shares
//! the same connection manager and operation queue.
//!
//! ## Operation Serializer
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     One FIFO for Every Operation                        │
//! │                                                                         │
//! │  store.sales().complete(..)   store.settings().get_setting(..)   backup  │
//! │          │                            │                        │        │
//! │          ▼                            ▼                        ▼        │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │  tokio::sync::Mutex<ConnectionManager>   (fair, FIFO wake-up)     │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! │          │  one holder at a time                                        │
//! │          ▼                                                              │
//! │  run_with_retry(policy) ── attempt ── recoverable? reopen + retry once │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ConnectionManager ── single SqliteConnection                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callbacks receive `&'c mut SqliteConnection` and return a future bounded
//! by `'c`, so no caller can keep the connection after its slot ends.
//!
//! ## Usage
//! ```rust,ignore
//! let store = Store::open(StoreConfig::new("/data/dukan")).await?;
//!
//! let id = store.sales().complete(sale).await?;
//!
//! let n: i64 = store
//!     .enqueue(|conn| Box::pin(async move {
//!         Ok(sqlx::query_scalar("SELECT COUNT(*) FROM sales").fetch_one(conn).await?)
//!     }))
//!     .await?;
//! ```

use futures_util::future::BoxFuture;
use sqlx::SqliteConnection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, trace};

use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::error::DbResult;
use crate::repository::backup_log::BackupLogRepository;
use crate::repository::credit::CreditRepository;
use crate::repository::customer::CustomerRepository;
use crate::repository::expenditure::ExpenditureRepository;
use crate::repository::printer::PrinterRepository;
use crate::repository::product::ProductRepository;
use crate::repository::purchase::PurchaseRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::settings::SettingsRepository;
use crate::repository::sync::SyncOutboxRepository;
use crate::repository::vendor::VendorRepository;
use crate::retry::{self, Plain, RetryPolicy, Transactional};

/// Handle to the local store.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    manager: Mutex<ConnectionManager>,
    config: StoreConfig,
    retry: RetryPolicy,
    ops: AtomicU64,
}

impl Store {
    /// Opens the store: validates the config, creates directories, opens the
    /// connection and applies the schema.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let store = Store::open(StoreConfig::load(None)?).await?;
    /// ```
    pub async fn open(config: StoreConfig) -> DbResult<Self> {
        config.validate()?;

        let retry = RetryPolicy::from(&config.retry);
        let mut manager = ConnectionManager::new(config.clone());
        manager.connection().await?;

        info!(
            path = %config.database_path().display(),
            max_attempts = retry.max_attempts,
            "Store opened"
        );

        Ok(Store {
            inner: Arc::new(Inner {
                manager: Mutex::new(manager),
                config,
                retry,
                ops: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    // =========================================================================
    // Serialized Access
    // =========================================================================

    /// Runs `op` in the next FIFO slot.
    ///
    /// `op` may be invoked twice: once more after a recoverable error, on a
    /// fresh connection. Clone owned inputs inside the closure.
    pub async fn enqueue<T, F>(&self, op: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        let mut manager = self.slot("Operation").await;
        let mut attempt = Plain(op);
        let result = retry::run_with_retry(self.inner.retry, &mut manager, &mut attempt).await;
        manager.end_slot();
        result
    }

    /// Runs `body` as one unit of work in the next FIFO slot.
    ///
    /// Everything `body` does commits together or not at all. A recoverable
    /// failure rolls back and reruns the whole body on a fresh connection.
    pub async fn run_in_transaction<T, F>(&self, body: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        let mut manager = self.slot("Unit of work").await;
        let mut attempt = Transactional(body);
        let result = retry::run_with_retry(self.inner.retry, &mut manager, &mut attempt).await;
        manager.end_slot();
        result
    }

    /// Gives `f` the connection manager itself for one slot.
    ///
    /// Used by backup and restore, which need to close and reopen the handle.
    /// No retry: these operations handle their own failures.
    pub(crate) async fn exclusive<T, F>(&self, f: F) -> DbResult<T>
    where
        F: for<'m> FnOnce(&'m mut ConnectionManager) -> BoxFuture<'m, DbResult<T>>,
    {
        let mut manager = self.slot("Exclusive operation").await;
        let result = f(&mut manager).await;
        manager.end_slot();
        result
    }

    /// Waits for the next FIFO slot and opens it on the manager.
    async fn slot(&self, kind: &'static str) -> MutexGuard<'_, ConnectionManager> {
        let seq = self.inner.ops.fetch_add(1, Ordering::Relaxed);
        let mut manager = self.inner.manager.lock().await;
        trace!(seq, kind, "Slot acquired");
        manager.begin_slot().await;
        manager
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        self.enqueue(|conn| {
            Box::pin(async move {
                sqlx::query("SELECT 1").execute(conn).await?;
                Ok(())
            })
        })
        .await
        .is_ok()
    }

    /// Closes the connection. The next operation reopens it.
    pub async fn close(&self) -> DbResult<()> {
        let mut manager = self.slot("Close").await;
        let result = manager.close().await;
        manager.end_slot();
        result
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    /// Returns the product repository.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let low = store.products().low_stock().await?;
    /// ```
    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.clone())
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository::new(self.clone())
    }

    pub fn vendors(&self) -> VendorRepository {
        VendorRepository::new(self.clone())
    }

    /// Returns the sale repository (sale completion, deletion, revision).
    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.clone())
    }

    pub fn purchases(&self) -> PurchaseRepository {
        PurchaseRepository::new(self.clone())
    }

    /// Returns the customer credit ledger.
    pub fn credit(&self) -> CreditRepository {
        CreditRepository::new(self.clone())
    }

    pub fn expenditures(&self) -> ExpenditureRepository {
        ExpenditureRepository::new(self.clone())
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.clone())
    }

    /// Returns the sync outbox repository.
    pub fn sync_outbox(&self) -> SyncOutboxRepository {
        SyncOutboxRepository::new(self.clone())
    }

    pub fn printers(&self) -> PrinterRepository {
        PrinterRepository::new(self.clone())
    }

    pub fn backup_logs(&self) -> BackupLogRepository {
        BackupLogRepository::new(self.clone())
    }
}
