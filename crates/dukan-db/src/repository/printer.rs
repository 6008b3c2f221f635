//! # Printer Repository
//!
//! Printer profiles and the print-job queue. This crate only keeps the
//! queue; an external print worker claims jobs and reports the outcome.
//!
//! ```text
//!  create_print_job ──► pending ──► next_pending_print_job ──► printing
//!                          ▲                                     │
//!                          │ attempts < max (backoff)            ├── mark_print_job_printed ──► printed
//!                          ├──────────────────── mark_print_job_failed
//!                          │                     attempts = max ──► failed
//!                          └──────────────────── claim expired (counts as an attempt)
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dukan_core::{PrintJobRecord, PrintJobStatus, PrinterProfile};
use serde_json::Value;
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::json::{self, ColumnRef};
use crate::repository::require_affected;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct ProfileRow {
    id: String,
    name: String,
    connection: String,
    address: Option<String>,
    paper_width_mm: i64,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for PrinterProfile {
    fn from(row: ProfileRow) -> Self {
        PrinterProfile {
            id: row.id,
            name: row.name,
            connection: row.connection,
            address: row.address,
            paper_width_mm: row.paper_width_mm,
            is_default: row.is_default,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct JobRow {
    id: String,
    profile_id: Option<String>,
    #[sqlx(rename = "type")]
    kind: String,
    payload: String,
    status: PrintJobStatus,
    attempts: i64,
    max_attempts: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn into_job(self) -> PrintJobRecord {
        let payload: Value = json::decode_or_warn(
            ColumnRef {
                table: "print_jobs",
                row: &self.id,
                column: "payload",
            },
            Some(self.payload.as_str()),
        );

        PrintJobRecord {
            id: self.id,
            profile_id: self.profile_id,
            kind: self.kind,
            payload,
            status: self.status,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            next_attempt_at: self.next_attempt_at,
        }
    }
}

const SELECT_PROFILE: &str = "SELECT id, name, connection, address, paperWidthMm, isDefault, \
                              createdAt, updatedAt FROM printer_profiles";

const SELECT_JOB: &str = "SELECT id, profileId, type, payload, status, attempts, maxAttempts, \
                          lastError, createdAt, updatedAt, nextAttemptAt FROM print_jobs";

// =============================================================================
// Step Functions
// =============================================================================

/// Inserts or replaces a profile. A default profile clears the flag on
/// every other profile.
pub async fn upsert_profile(conn: &mut SqliteConnection, profile: &PrinterProfile) -> DbResult<()> {
    debug!(id = %profile.id, name = %profile.name, is_default = profile.is_default, "Saving printer profile");

    if profile.is_default {
        sqlx::query("UPDATE printer_profiles SET isDefault = 0 WHERE id != ?1 AND isDefault = 1")
            .bind(&profile.id)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO printer_profiles (
            id, name, connection, address, paperWidthMm, isDefault, createdAt, updatedAt
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            connection = excluded.connection,
            address = excluded.address,
            paperWidthMm = excluded.paperWidthMm,
            isDefault = excluded.isDefault,
            updatedAt = excluded.updatedAt
        "#,
    )
    .bind(&profile.id)
    .bind(&profile.name)
    .bind(&profile.connection)
    .bind(&profile.address)
    .bind(profile.paper_width_mm)
    .bind(profile.is_default)
    .bind(profile.created_at)
    .bind(profile.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_job(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<PrintJobRecord>> {
    let row: Option<JobRow> = sqlx::query_as(&format!("{SELECT_JOB} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(JobRow::into_job))
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for printer profiles and print jobs.
#[derive(Debug, Clone)]
pub struct PrinterRepository {
    store: Store,
}

impl PrinterRepository {
    pub fn new(store: Store) -> Self {
        PrinterRepository { store }
    }

    /// Creates or updates a profile, stamping `updatedAt`. Making a profile
    /// the default in the same unit of work demotes the previous one.
    pub async fn save_printer_profile(&self, profile: PrinterProfile) -> DbResult<PrinterProfile> {
        let saved = PrinterProfile {
            updated_at: Utc::now(),
            ..profile
        };
        let input = saved.clone();
        self.store
            .run_in_transaction(move |conn| {
                let profile = input.clone();
                Box::pin(async move { upsert_profile(conn, &profile).await })
            })
            .await?;
        Ok(saved)
    }

    /// Profiles with the default first, then by name.
    pub async fn list_printer_profiles(&self) -> DbResult<Vec<PrinterProfile>> {
        self.store
            .enqueue(|conn| {
                Box::pin(async move {
                    let rows: Vec<ProfileRow> = sqlx::query_as(&format!(
                        "{SELECT_PROFILE} ORDER BY isDefault DESC, name COLLATE NOCASE"
                    ))
                    .fetch_all(conn)
                    .await?;
                    Ok(rows.into_iter().map(PrinterProfile::from).collect())
                })
            })
            .await
    }

    pub async fn default_printer_profile(&self) -> DbResult<Option<PrinterProfile>> {
        self.store
            .enqueue(|conn| {
                Box::pin(async move {
                    let row: Option<ProfileRow> =
                        sqlx::query_as(&format!("{SELECT_PROFILE} WHERE isDefault = 1 LIMIT 1"))
                            .fetch_optional(conn)
                            .await?;
                    Ok(row.map(PrinterProfile::from))
                })
            })
            .await
    }

    pub async fn delete_printer_profile(&self, id: &str) -> DbResult<()> {
        let id = id.to_string();
        self.store
            .enqueue(move |conn| {
                let id = id.clone();
                Box::pin(async move {
                    let result = sqlx::query("DELETE FROM printer_profiles WHERE id = ?1")
                        .bind(&id)
                        .execute(conn)
                        .await?;
                    require_affected(result.rows_affected(), "PrinterProfile", &id)
                })
            })
            .await
    }

    /// Queues a print job. `profile_id` of `None` means "default printer".
    pub async fn create_print_job(
        &self,
        profile_id: Option<&str>,
        kind: &str,
        payload: &Value,
    ) -> DbResult<PrintJobRecord> {
        let now = Utc::now();
        let job = PrintJobRecord {
            id: Uuid::new_v4().to_string(),
            profile_id: profile_id.map(str::to_string),
            kind: kind.to_string(),
            payload: payload.clone(),
            status: PrintJobStatus::Pending,
            attempts: 0,
            max_attempts: self.store.config().print.max_attempts,
            last_error: None,
            created_at: now,
            updated_at: now,
            next_attempt_at: None,
        };

        let input = job.clone();
        self.store
            .enqueue(move |conn| {
                let job = input.clone();
                Box::pin(async move {
                    debug!(id = %job.id, kind = %job.kind, "Queuing print job");
                    sqlx::query(
                        r#"
                        INSERT INTO print_jobs (
                            id, profileId, type, payload, status, attempts, maxAttempts,
                            lastError, createdAt, updatedAt, nextAttemptAt
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                        "#,
                    )
                    .bind(&job.id)
                    .bind(&job.profile_id)
                    .bind(&job.kind)
                    .bind(json::encode(&job.payload)?)
                    .bind(job.status)
                    .bind(job.attempts)
                    .bind(job.max_attempts)
                    .bind(&job.last_error)
                    .bind(job.created_at)
                    .bind(job.updated_at)
                    .bind(job.next_attempt_at)
                    .execute(conn)
                    .await?;
                    Ok(())
                })
            })
            .await?;

        Ok(job)
    }

    /// Claims the oldest due pending job, moving it to `printing`.
    ///
    /// A claim is a lease of `print.claim_timeout_secs`. Jobs whose lease ran
    /// out without a reported outcome count as a failed attempt and go back
    /// to `pending`, or to `failed` once out of attempts.
    pub async fn next_pending_print_job(&self) -> DbResult<Option<PrintJobRecord>> {
        let lease = Duration::from_secs(self.store.config().print.claim_timeout_secs);
        self.store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let expired = sqlx::query(
                        r#"
                        UPDATE print_jobs SET
                            attempts = attempts + 1,
                            status = CASE WHEN attempts + 1 >= maxAttempts THEN 'failed' ELSE 'pending' END,
                            nextAttemptAt = CASE WHEN attempts + 1 >= maxAttempts THEN NULL ELSE nextAttemptAt END,
                            lastError = 'Claim expired',
                            updatedAt = ?1
                        WHERE status = 'printing' AND nextAttemptAt IS NOT NULL AND nextAttemptAt <= ?1
                        "#,
                    )
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;
                    if expired.rows_affected() > 0 {
                        warn!(count = expired.rows_affected(), "Reclaimed print jobs with expired claims");
                    }

                    let row: Option<JobRow> = sqlx::query_as(&format!(
                        "{SELECT_JOB} WHERE status = 'pending' \
                         AND (nextAttemptAt IS NULL OR nextAttemptAt <= ?1) \
                         ORDER BY createdAt ASC, rowid ASC LIMIT 1"
                    ))
                    .bind(now)
                    .fetch_optional(&mut *conn)
                    .await?;

                    let Some(row) = row else {
                        return Ok(None);
                    };

                    let lease_end = ChronoDuration::from_std(lease)
                        .ok()
                        .and_then(|d| now.checked_add_signed(d))
                        .unwrap_or(now);
                    sqlx::query(
                        "UPDATE print_jobs SET status = 'printing', nextAttemptAt = ?2, \
                         updatedAt = ?3 WHERE id = ?1",
                    )
                    .bind(&row.id)
                    .bind(lease_end)
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;

                    let mut job = row.into_job();
                    job.status = PrintJobStatus::Printing;
                    job.next_attempt_at = Some(lease_end);
                    job.updated_at = now;
                    Ok(Some(job))
                })
            })
            .await
    }

    pub async fn get_print_job(&self, id: &str) -> DbResult<Option<PrintJobRecord>> {
        let id = id.to_string();
        self.store
            .enqueue(move |conn| {
                let id = id.clone();
                Box::pin(async move { get_job(conn, &id).await })
            })
            .await
    }

    pub async fn mark_print_job_printed(&self, id: &str) -> DbResult<()> {
        let owned = id.to_string();
        self.store
            .enqueue(move |conn| {
                let id = owned.clone();
                Box::pin(async move {
                    let result = sqlx::query(
                        "UPDATE print_jobs SET status = 'printed', lastError = NULL, \
                         nextAttemptAt = NULL, updatedAt = ?2 WHERE id = ?1",
                    )
                    .bind(&id)
                    .bind(Utc::now())
                    .execute(conn)
                    .await?;
                    require_affected(result.rows_affected(), "PrintJob", &id)
                })
            })
            .await?;
        info!(id, "Print job printed");
        Ok(())
    }

    /// Records a failed print attempt. The job goes back to `pending` after
    /// a backoff, or to `failed` once it has used all its attempts.
    pub async fn mark_print_job_failed(&self, id: &str, error: &str) -> DbResult<PrintJobStatus> {
        let backoff_secs = self.store.config().print.backoff_secs;
        let id = id.to_string();
        let error = error.to_string();

        self.store
            .run_in_transaction(move |conn| {
                let id = id.clone();
                let error = error.clone();
                Box::pin(async move {
                    let job = get_job(&mut *conn, &id)
                        .await?
                        .ok_or_else(|| DbError::not_found("PrintJob", &id))?;

                    let now = Utc::now();
                    let attempts = job.attempts + 1;
                    let (status, next) = if attempts >= job.max_attempts {
                        warn!(id = %id, attempts, error = %error, "Print job failed permanently");
                        (PrintJobStatus::Failed, None)
                    } else {
                        let delay = Duration::from_secs(
                            backoff_secs.saturating_mul(u64::try_from(attempts).unwrap_or(1)),
                        );
                        let next = ChronoDuration::from_std(delay)
                            .ok()
                            .and_then(|d| now.checked_add_signed(d));
                        (PrintJobStatus::Pending, next)
                    };

                    sqlx::query(
                        "UPDATE print_jobs SET status = ?2, attempts = ?3, lastError = ?4, \
                         nextAttemptAt = ?5, updatedAt = ?6 WHERE id = ?1",
                    )
                    .bind(&id)
                    .bind(status)
                    .bind(attempts)
                    .bind(&error)
                    .bind(next)
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;

                    Ok(status)
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::test_support::temp_store;
    use serde_json::json;

    fn profile(name: &str, is_default: bool) -> PrinterProfile {
        let now = Utc::now();
        PrinterProfile {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            connection: "bluetooth".into(),
            address: Some("00:11:22:33:44:55".into()),
            paper_width_mm: 58,
            is_default,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_single_default_profile() {
        let (_dir, store) = temp_store().await;
        let printers = store.printers();

        let counter = printers.save_printer_profile(profile("Counter", true)).await.unwrap();
        let kitchen = printers.save_printer_profile(profile("Kitchen", true)).await.unwrap();

        let default = printers.default_printer_profile().await.unwrap().unwrap();
        assert_eq!(default.id, kitchen.id);

        let all = printers.list_printer_profiles().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, kitchen.id);
        assert!(!all.iter().find(|p| p.id == counter.id).unwrap().is_default);

        // Re-saving keeps the id and updates fields
        let renamed = PrinterProfile {
            name: "Front Counter".into(),
            ..counter.clone()
        };
        printers.save_printer_profile(renamed).await.unwrap();
        let all = printers.list_printer_profiles().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|p| p.name == "Front Counter"));
    }

    #[tokio::test]
    async fn test_print_job_claim_and_print() {
        let (_dir, store) = temp_store().await;
        let printers = store.printers();

        let first = printers
            .create_print_job(None, "receipt", &json!({"saleId": 1}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = printers
            .create_print_job(None, "receipt", &json!({"saleId": 2}))
            .await
            .unwrap();

        let claimed = printers.next_pending_print_job().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, PrintJobStatus::Printing);

        printers.mark_print_job_printed(&claimed.id).await.unwrap();
        let stored = printers.get_print_job(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PrintJobStatus::Printed);

        assert_eq!(printers.next_pending_print_job().await.unwrap().unwrap().id, second.id);
        assert!(printers.next_pending_print_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_job_backs_off_then_fails() {
        let (_dir, store) = temp_store().await;
        let printers = store.printers();
        let job = printers
            .create_print_job(None, "test_page", &json!({}))
            .await
            .unwrap();
        assert_eq!(job.max_attempts, 3);

        let status = printers.mark_print_job_failed(&job.id, "paper out").await.unwrap();
        assert_eq!(status, PrintJobStatus::Pending);
        // Scheduled in the future, so nothing is due
        assert!(printers.next_pending_print_job().await.unwrap().is_none());

        printers.mark_print_job_failed(&job.id, "paper out").await.unwrap();
        let status = printers.mark_print_job_failed(&job.id, "paper out").await.unwrap();
        assert_eq!(status, PrintJobStatus::Failed);

        let stored = printers.get_print_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 3);
        assert_eq!(stored.last_error.as_deref(), Some("paper out"));
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_reclaimed() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.print.claim_timeout_secs = 0;
        let store = Store::open(config).await.unwrap();
        let printers = store.printers();

        let job = printers
            .create_print_job(None, "receipt", &json!({"saleId": 7}))
            .await
            .unwrap();

        // The worker claims the job and never reports back
        let first = printers.next_pending_print_job().await.unwrap().unwrap();
        assert_eq!(first.id, job.id);
        assert_eq!(first.attempts, 0);

        let second = printers.next_pending_print_job().await.unwrap().unwrap();
        assert_eq!(second.id, job.id);
        assert_eq!(second.status, PrintJobStatus::Printing);
        assert_eq!(second.attempts, 1);
        assert_eq!(second.last_error.as_deref(), Some("Claim expired"));

        printers.next_pending_print_job().await.unwrap().unwrap();
        assert!(printers.next_pending_print_job().await.unwrap().is_none());
        let stored = printers.get_print_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PrintJobStatus::Failed);
        assert_eq!(stored.attempts, 3);
    }

    #[tokio::test]
    async fn test_live_claim_is_not_reclaimed() {
        let (_dir, store) = temp_store().await;
        let printers = store.printers();
        printers.create_print_job(None, "receipt", &json!({})).await.unwrap();

        let claimed = printers.next_pending_print_job().await.unwrap().unwrap();
        assert!(claimed.next_attempt_at.unwrap() > claimed.updated_at);
        assert!(printers.next_pending_print_job().await.unwrap().is_none());

        printers.mark_print_job_printed(&claimed.id).await.unwrap();
        let stored = printers.get_print_job(&claimed.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PrintJobStatus::Printed);
        assert!(stored.next_attempt_at.is_none());
    }
}
