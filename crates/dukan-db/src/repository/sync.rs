//! # Sync Outbox Repository
//!
//! Durable queue of entity mutations waiting for a remote synchronizer.
//!
//! ## The Outbox Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Bookkeeping                                   │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g. store.sales().complete(..))                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UNIT OF WORK ── COMMIT                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  record_change(..)  → INSERT sync_outbox (status = 'pending')          │
//! │       │               failure is logged, never returned to the caller  │
//! │       ▼                                                                 │
//! │  SYNCHRONIZER (external)                                               │
//! │    get_pending_changes(limit)   pending/retrying, due, oldest first    │
//! │       ├── delivered → mark_done(id)                                    │
//! │       └── failed    → record_failure(id, err)                          │
//! │                         retries += 1                                    │
//! │                         retries < max → 'retrying', nextAttemptAt =     │
//! │                                         now + base·2^(retries-1) (cap) │
//! │                         otherwise     → 'failed'                        │
//! │                                                                         │
//! │  Delivery is at-least-once: a row may be handed out again until it is  │
//! │  marked done.                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dukan_core::{SyncAction, SyncOutboxRecord, SyncStatus};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::OutboxSettings;
use crate::error::{DbError, DbResult};
use crate::json::{self, ColumnRef};
use crate::repository::require_affected;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct OutboxRow {
    id: String,
    entity: String,
    entity_id: String,
    payload: String,
    action: SyncAction,
    status: SyncStatus,
    error: Option<String>,
    retries: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    fn into_record(self) -> SyncOutboxRecord {
        let payload: Value = json::decode_or_warn(
            ColumnRef {
                table: "sync_outbox",
                row: &self.id,
                column: "payload",
            },
            Some(self.payload.as_str()),
        );

        SyncOutboxRecord {
            id: self.id,
            entity: self.entity,
            entity_id: self.entity_id,
            payload,
            action: self.action,
            status: self.status,
            error: self.error,
            retries: self.retries,
            created_at: self.created_at,
            updated_at: self.updated_at,
            next_attempt_at: self.next_attempt_at,
        }
    }
}

const SELECT: &str = "SELECT id, entity, entityId, payload, action, status, error, retries, \
                      createdAt, updatedAt, nextAttemptAt FROM sync_outbox";

/// Delay before the next delivery attempt after `retries` failures.
///
/// `base · 2^(retries - 1)`, capped at `max`.
pub fn backoff_delay(settings: &OutboxSettings, retries: i64) -> Duration {
    let exponent = retries.saturating_sub(1).clamp(0, 32) as u32;
    let secs = settings
        .base_backoff_secs
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(settings.max_backoff_secs);
    Duration::from_secs(secs)
}

// =============================================================================
// Step Functions
// =============================================================================

/// Inserts a pending outbox row.
pub async fn insert_change(
    conn: &mut SqliteConnection,
    entity: &str,
    entity_id: &str,
    payload: &Value,
    action: SyncAction,
) -> DbResult<SyncOutboxRecord> {
    let now = Utc::now();
    let record = SyncOutboxRecord {
        id: Uuid::new_v4().to_string(),
        entity: entity.to_string(),
        entity_id: entity_id.to_string(),
        payload: payload.clone(),
        action,
        status: SyncStatus::Pending,
        error: None,
        retries: 0,
        created_at: now,
        updated_at: now,
        next_attempt_at: None,
    };

    debug!(entity, entity_id, ?action, "Queuing change for sync");

    sqlx::query(
        r#"
        INSERT INTO sync_outbox (
            id, entity, entityId, payload, action, status,
            error, retries, createdAt, updatedAt, nextAttemptAt
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&record.id)
    .bind(&record.entity)
    .bind(&record.entity_id)
    .bind(json::encode(&record.payload)?)
    .bind(record.action)
    .bind(record.status)
    .bind(&record.error)
    .bind(record.retries)
    .bind(record.created_at)
    .bind(record.updated_at)
    .bind(record.next_attempt_at)
    .execute(&mut *conn)
    .await?;

    Ok(record)
}

pub async fn get(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<SyncOutboxRecord>> {
    let row: Option<OutboxRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(OutboxRow::into_record))
}

/// Deliverable rows due at `now`, oldest first.
pub async fn pending(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    limit: u32,
) -> DbResult<Vec<SyncOutboxRecord>> {
    let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
        "{SELECT} WHERE status IN ('pending', 'retrying') \
         AND (nextAttemptAt IS NULL OR nextAttemptAt <= ?1) \
         ORDER BY createdAt ASC, rowid ASC LIMIT ?2"
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(OutboxRow::into_record).collect())
}

pub async fn update_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: SyncStatus,
    error: Option<&str>,
    retries: Option<i64>,
    next_attempt_at: Option<DateTime<Utc>>,
) -> DbResult<()> {
    debug!(id, ?status, ?retries, "Updating outbox row");

    let result = sqlx::query(
        r#"
        UPDATE sync_outbox SET
            status = ?2,
            error = ?3,
            retries = COALESCE(?4, retries),
            nextAttemptAt = ?5,
            updatedAt = ?6
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(error)
    .bind(retries)
    .bind(next_attempt_at)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    require_affected(result.rows_affected(), "SyncOutbox", id)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sync outbox operations.
#[derive(Debug, Clone)]
pub struct SyncOutboxRepository {
    store: Store,
}

impl SyncOutboxRepository {
    pub fn new(store: Store) -> Self {
        SyncOutboxRepository { store }
    }

    /// Queues an entity mutation for synchronization.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let payload = serde_json::to_value(&sale)?;
    /// store.sync_outbox().enqueue_change("sales", "42", &payload, SyncAction::Insert).await?;
    /// ```
    pub async fn enqueue_change(
        &self,
        entity: &str,
        entity_id: &str,
        payload: &Value,
        action: SyncAction,
    ) -> DbResult<SyncOutboxRecord> {
        let entity = entity.to_string();
        let entity_id = entity_id.to_string();
        let payload = payload.clone();
        self.store
            .enqueue(move |conn| {
                let entity = entity.clone();
                let entity_id = entity_id.clone();
                let payload = payload.clone();
                Box::pin(async move {
                    insert_change(conn, &entity, &entity_id, &payload, action).await
                })
            })
            .await
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<SyncOutboxRecord>> {
        let id = id.to_string();
        self.store
            .enqueue(move |conn| {
                let id = id.clone();
                Box::pin(async move { get(conn, &id).await })
            })
            .await
    }

    /// Rows ready for delivery: `pending` or `retrying`, due now, FIFO by
    /// creation time.
    pub async fn get_pending_changes(&self, limit: u32) -> DbResult<Vec<SyncOutboxRecord>> {
        self.store
            .enqueue(move |conn| Box::pin(async move { pending(conn, Utc::now(), limit).await }))
            .await
    }

    /// Sets status, error and (optionally) the retry counter directly.
    pub async fn update_change_status(
        &self,
        id: &str,
        status: SyncStatus,
        error: Option<&str>,
        retries: Option<i64>,
    ) -> DbResult<()> {
        let id = id.to_string();
        let error = error.map(str::to_string);
        self.store
            .enqueue(move |conn| {
                let id = id.clone();
                let error = error.clone();
                Box::pin(async move {
                    update_status(conn, &id, status, error.as_deref(), retries, None).await
                })
            })
            .await
    }

    /// Marks a row delivered.
    pub async fn mark_done(&self, id: &str) -> DbResult<()> {
        self.update_change_status(id, SyncStatus::Done, None, None).await
    }

    /// Records a failed delivery attempt and schedules the next one.
    ///
    /// Returns the row's new status: `retrying`, or `failed` once the
    /// configured retry budget is spent.
    pub async fn record_failure(&self, id: &str, error: &str) -> DbResult<SyncStatus> {
        let settings = self.store.config().outbox.clone();
        let id = id.to_string();
        let error = error.to_string();

        self.store
            .enqueue(move |conn| {
                let id = id.clone();
                let error = error.clone();
                let settings = settings.clone();
                Box::pin(async move {
                    let current = get(&mut *conn, &id)
                        .await?
                        .ok_or_else(|| DbError::not_found("SyncOutbox", &id))?;

                    let retries = current.retries + 1;
                    let (status, next) = if retries >= settings.max_retries {
                        warn!(id = %id, retries, error = %error, "Outbox row gave up after max retries");
                        (SyncStatus::Failed, None)
                    } else {
                        let delay = backoff_delay(&settings, retries);
                        let next = ChronoDuration::from_std(delay)
                            .ok()
                            .and_then(|d| Utc::now().checked_add_signed(d));
                        (SyncStatus::Retrying, next)
                    };

                    update_status(conn, &id, status, Some(&error), Some(retries), next).await?;
                    Ok(status)
                })
            })
            .await
    }

    /// Rows still waiting for delivery (`pending` or `retrying`).
    pub async fn count_pending(&self) -> DbResult<i64> {
        self.store
            .enqueue(|conn| {
                Box::pin(async move {
                    Ok(sqlx::query_scalar(
                        "SELECT COUNT(*) FROM sync_outbox WHERE status IN ('pending', 'retrying')",
                    )
                    .fetch_one(conn)
                    .await?)
                })
            })
            .await
    }

    /// Deletes delivered rows last touched more than `older_than_days` ago.
    /// Returns the number of rows removed.
    pub async fn cleanup_done(&self, older_than_days: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(older_than_days));
        self.store
            .enqueue(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        "DELETE FROM sync_outbox WHERE status = 'done' AND updatedAt < ?1",
                    )
                    .bind(cutoff)
                    .execute(conn)
                    .await?;
                    Ok(result.rows_affected())
                })
            })
            .await
    }

    /// Reads a synchronizer cursor value.
    pub async fn get_sync_state(&self, key: &str) -> DbResult<Option<String>> {
        let key = key.to_string();
        self.store
            .enqueue(move |conn| {
                let key = key.clone();
                Box::pin(async move {
                    let value: Option<Option<String>> =
                        sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
                            .bind(&key)
                            .fetch_optional(conn)
                            .await?;
                    Ok(value.flatten())
                })
            })
            .await
    }

    /// Writes a synchronizer cursor value.
    pub async fn set_sync_state(&self, key: &str, value: &str) -> DbResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.store
            .enqueue(move |conn| {
                let key = key.clone();
                let value = value.clone();
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO sync_state (key, value, updatedAt) VALUES (?1, ?2, ?3) \
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                         updatedAt = excluded.updatedAt",
                    )
                    .bind(&key)
                    .bind(&value)
                    .bind(Utc::now())
                    .execute(conn)
                    .await?;
                    Ok(())
                })
            })
            .await
    }
}

/// Records a committed mutation in the outbox.
///
/// Runs after the unit of work has committed, in its own slot. Failures are
/// logged and swallowed: the ledger write already happened.
pub(crate) async fn record_change<T>(
    store: &Store,
    entity: &str,
    entity_id: impl ToString,
    action: SyncAction,
    snapshot: &T,
) where
    T: Serialize + ?Sized,
{
    let entity_id = entity_id.to_string();

    let payload = match serde_json::to_value(snapshot) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(entity, entity_id = %entity_id, error = %e, "Could not serialize sync snapshot");
            return;
        }
    };

    if let Err(e) = store
        .sync_outbox()
        .enqueue_change(entity, &entity_id, &payload, action)
        .await
    {
        warn!(entity, entity_id = %entity_id, error = %e, "Failed to record sync change");
    }
}
