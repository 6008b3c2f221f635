//! # Units of Work
//!
//! `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK` around a callback that gets the
//! connection for the duration of the transaction only.
//!
//! ```text
//!  BEGIN IMMEDIATE ──► body(conn) ──┬── Ok ──► COMMIT ──► Ok(value)
//!                                   │
//!                                   └── Err ─► ROLLBACK (best-effort, logged)
//!                                                  └──► Err (original error)
//! ```
//!
//! `IMMEDIATE` takes the write lock up front, so a transaction that reads a
//! balance and then writes it can't be interleaved with another writer.

use futures_util::future::BoxFuture;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Runs `body` as one atomic unit of work on `conn`.
///
/// The body's error is returned unchanged after the rollback; a failed
/// rollback is only logged.
pub async fn in_transaction<T, F>(conn: &mut SqliteConnection, body: &mut F) -> DbResult<T>
where
    T: Send,
    F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> + Send,
{
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(|e| control_error("BEGIN", e))?;

    match body(&mut *conn).await {
        Ok(value) => {
            if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
                rollback(conn).await;
                return Err(control_error("COMMIT", e));
            }
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => {
            rollback(conn).await;
            Err(err)
        }
    }
}

async fn rollback(conn: &mut SqliteConnection) {
    match sqlx::query("ROLLBACK").execute(&mut *conn).await {
        Ok(_) => debug!("Transaction rolled back"),
        Err(e) => warn!(error = %e, "ROLLBACK failed"),
    }
}

fn control_error(statement: &str, err: sqlx::Error) -> DbError {
    match DbError::from(err) {
        lost @ DbError::ConnectionLost(_) => lost,
        other => DbError::TransactionFailed(format!("{statement}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use sqlx::Connection;

    async fn memory() -> SqliteConnection {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        schema::apply(&mut conn).await.unwrap();
        conn
    }

    fn step<T, F>(f: F) -> F
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        f
    }

    async fn count(conn: &mut SqliteConnection) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM expenditures")
            .fetch_one(conn)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let mut conn = memory().await;
        let mut body = step(|conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO expenditures (category, amount, date, time) VALUES ('Rent', 100, 'd', 't')",
                )
                .execute(&mut *conn)
                .await?;
                Ok(())
            })
        });

        in_transaction(&mut conn, &mut body).await.unwrap();
        assert_eq!(count(&mut conn).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_keeps_original_error() {
        let mut conn = memory().await;
        let mut body = step(|conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO expenditures (category, amount, date, time) VALUES ('Rent', 100, 'd', 't')",
                )
                .execute(&mut *conn)
                .await?;
                Err::<(), _>(DbError::Domain(dukan_core::CoreError::UnlinkedCreditUse))
            })
        });

        let err = in_transaction(&mut conn, &mut body).await.unwrap_err();

        assert!(matches!(err, DbError::Domain(_)));
        assert_eq!(count(&mut conn).await, 0);
    }
}
