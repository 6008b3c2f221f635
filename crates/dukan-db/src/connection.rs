//! # Connection Manager
//!
//! Owns the one physical SQLite handle.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Handle Lifecycle                                   │
//! │                                                                         │
//! │  connection()                                                          │
//! │       │                                                                 │
//! │       ├── cached handle? ── SELECT 1 ── ok ──► reuse                   │
//! │       │                        │                                        │
//! │       │                        └─ fails ──► close stale handle         │
//! │       ▼                                                                 │
//! │  open():                                                               │
//! │    1. create data directory                                            │
//! │    2. connect (WAL, NORMAL sync, foreign keys, busy timeout)           │
//! │    3. schema::apply (tables + additive columns)                        │
//! │                                                                         │
//! │  invalidate() ── drop the handle after a recoverable error             │
//! │  close()      ── orderly close before restore / shutdown               │
//! │                                                                         │
//! │  begin_slot() ── previous slot never ended? close its handle           │
//! │  end_slot()   ── slot finished, handle state is clean                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A slot whose future is dropped mid-operation (a caller timeout, a
//! `select!` branch losing) can leave the handle inside `BEGIN IMMEDIATE`.
//! The `SELECT 1` check does not notice that, so the next slot closes such a
//! handle and SQLite rolls the open transaction back.
//!
//! The manager is not shared directly: it lives behind the store's FIFO
//! mutex, so only one operation at a time ever sees the handle.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{DbError, DbResult};
use crate::schema;

/// Opens, validates, and reopens the store's single connection.
#[derive(Debug)]
pub struct ConnectionManager {
    config: StoreConfig,
    conn: Option<SqliteConnection>,
    /// Set while a serializer slot is running; still set at the start of the
    /// next slot only if the previous one was cancelled.
    slot_open: bool,
}

impl ConnectionManager {
    /// Creates a manager. Nothing is opened until the first [`connection`] call.
    ///
    /// [`connection`]: ConnectionManager::connection
    pub fn new(config: StoreConfig) -> Self {
        ConnectionManager {
            config,
            conn: None,
            slot_open: false,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Path of the live database file.
    pub fn database_path(&self) -> PathBuf {
        self.config.database_path()
    }

    /// Returns true if a handle is currently cached.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Returns a healthy connection, opening or reopening as needed.
    pub async fn connection(&mut self) -> DbResult<&mut SqliteConnection> {
        let healthy = match self.conn.as_mut() {
            Some(conn) => match sqlx::query("SELECT 1").execute(&mut *conn).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "Cached connection failed health check, reopening");
                    false
                }
            },
            None => false,
        };

        if !healthy {
            if let Some(stale) = self.conn.take() {
                // The handle is already broken; its close error says nothing new
                let _ = stale.close().await;
            }
            let fresh = self.open().await?;
            self.conn = Some(fresh);
        }

        self.conn
            .as_mut()
            .ok_or_else(|| DbError::Internal("connection missing after open".into()))
    }

    /// Marks the start of a serializer slot.
    ///
    /// If the previous slot never reached [`end_slot`], its handle may still
    /// hold an open transaction and is closed here.
    ///
    /// [`end_slot`]: ConnectionManager::end_slot
    pub(crate) async fn begin_slot(&mut self) {
        if self.slot_open {
            if let Some(abandoned) = self.conn.take() {
                warn!("Previous operation was cancelled mid-flight, discarding its connection");
                if let Err(e) = abandoned.close().await {
                    warn!(error = %e, "Closing abandoned connection failed");
                }
            }
        }
        self.slot_open = true;
    }

    /// Marks the current slot as finished, whatever its result.
    pub(crate) fn end_slot(&mut self) {
        self.slot_open = false;
    }

    /// Drops the cached handle so the next [`connection`] call reopens.
    ///
    /// [`connection`]: ConnectionManager::connection
    pub fn invalidate(&mut self) {
        if self.conn.take().is_some() {
            debug!("Connection invalidated");
        }
    }

    /// Closes the cached handle, flushing it properly.
    pub async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            info!(path = %self.database_path().display(), "Closing database connection");
            conn.close().await?;
        }
        Ok(())
    }

    async fn open(&self) -> DbResult<SqliteConnection> {
        let path = self.database_path();
        info!(path = %path.display(), "Opening database connection");

        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .map_err(|e| {
                DbError::ConnectionFailed(format!(
                    "cannot create {}: {e}",
                    self.config.data_dir.display()
                ))
            })?;

        let options = SqliteConnectOptions::new()
            .filename(&path)
            // WAL mode: Readers don't block writers, writers don't block readers
            .journal_mode(SqliteJournalMode::Wal)
            // NORMAL synchronous: may lose the last transaction on power loss,
            // never corrupts
            .synchronous(SqliteSynchronous::Normal)
            // SQLite has them disabled by default for backwards compatibility
            .foreign_keys(true)
            .busy_timeout(self.config.busy_timeout_duration())
            .create_if_missing(true);

        let mut conn = options
            .connect()
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        schema::apply(&mut conn).await?;

        debug!("Connection ready");
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_directories_and_schema() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let mut manager = ConnectionManager::new(StoreConfig::new(&nested));

        let conn = manager.connection().await.unwrap();
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&mut *conn)
            .await
            .unwrap();

        assert_eq!(mode.to_lowercase(), "wal");
        assert!(nested.join("dukan.db").exists());
        assert!(manager.is_open());
    }

    #[tokio::test]
    async fn test_invalidate_then_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConnectionManager::new(StoreConfig::new(dir.path()));

        let conn = manager.connection().await.unwrap();
        sqlx::query("INSERT INTO settings (key, value) VALUES ('shop', '\"Dukan\"')")
            .execute(&mut *conn)
            .await
            .unwrap();

        manager.invalidate();
        assert!(!manager.is_open());

        let conn = manager.connection().await.unwrap();
        let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'shop'")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(value, "\"Dukan\"");
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConnectionManager::new(StoreConfig::new(dir.path()));
        let conn = manager.connection().await.unwrap();

        let on: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(on, 1);
    }
}
