//! # Backup Log Repository
//!
//! One row per backup file produced (local, public copy, cloud upload).

use chrono::{DateTime, Utc};
use dukan_core::BackupLogRecord;
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use crate::json::{self, ColumnRef};
use crate::repository::require_affected;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct BackupLogRow {
    id: String,
    path: String,
    #[sqlx(rename = "type")]
    kind: String,
    provider: Option<String>,
    metadata: Option<String>,
    uploaded: bool,
    created_at: DateTime<Utc>,
}

impl BackupLogRow {
    fn into_record(self) -> BackupLogRecord {
        let metadata: Option<Value> = json::decode_opt_or_warn(
            ColumnRef {
                table: "backup_logs",
                row: &self.id,
                column: "metadata",
            },
            self.metadata.as_deref(),
        );

        BackupLogRecord {
            id: self.id,
            path: self.path,
            kind: self.kind,
            provider: self.provider,
            metadata,
            uploaded: self.uploaded,
            created_at: self.created_at,
        }
    }
}

/// Builds a new, not yet uploaded, log record.
pub fn new_record(path: &str, kind: &str, metadata: Option<Value>) -> BackupLogRecord {
    BackupLogRecord {
        id: Uuid::new_v4().to_string(),
        path: path.to_string(),
        kind: kind.to_string(),
        provider: None,
        metadata,
        uploaded: false,
        created_at: Utc::now(),
    }
}

pub async fn insert(conn: &mut SqliteConnection, record: &BackupLogRecord) -> DbResult<()> {
    debug!(path = %record.path, kind = %record.kind, "Recording backup log");

    sqlx::query(
        "INSERT INTO backup_logs (id, path, type, provider, metadata, uploaded, createdAt) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&record.id)
    .bind(&record.path)
    .bind(&record.kind)
    .bind(&record.provider)
    .bind(json::encode_opt(record.metadata.as_ref())?)
    .bind(record.uploaded)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Repository for backup logs.
#[derive(Debug, Clone)]
pub struct BackupLogRepository {
    store: Store,
}

impl BackupLogRepository {
    pub fn new(store: Store) -> Self {
        BackupLogRepository { store }
    }

    pub async fn record_backup_log(&self, record: BackupLogRecord) -> DbResult<BackupLogRecord> {
        let input = record.clone();
        self.store
            .enqueue(move |conn| {
                let record = input.clone();
                Box::pin(async move { insert(conn, &record).await })
            })
            .await?;
        Ok(record)
    }

    /// All logs, newest first.
    pub async fn list_backup_logs(&self) -> DbResult<Vec<BackupLogRecord>> {
        self.store
            .enqueue(|conn| {
                Box::pin(async move {
                    let rows: Vec<BackupLogRow> = sqlx::query_as(
                        "SELECT id, path, type, provider, metadata, uploaded, createdAt \
                         FROM backup_logs ORDER BY createdAt DESC, rowid DESC",
                    )
                    .fetch_all(conn)
                    .await?;
                    Ok(rows.into_iter().map(BackupLogRow::into_record).collect())
                })
            })
            .await
    }

    /// Flags a backup as uploaded by `provider`.
    pub async fn mark_backup_uploaded(&self, id: &str, provider: &str) -> DbResult<()> {
        let id = id.to_string();
        let provider = provider.to_string();
        self.store
            .enqueue(move |conn| {
                let id = id.clone();
                let provider = provider.clone();
                Box::pin(async move {
                    let result = sqlx::query(
                        "UPDATE backup_logs SET uploaded = 1, provider = ?2 WHERE id = ?1",
                    )
                    .bind(&id)
                    .bind(&provider)
                    .execute(conn)
                    .await?;
                    require_affected(result.rows_affected(), "BackupLog", &id)
                })
            })
            .await
    }
}
