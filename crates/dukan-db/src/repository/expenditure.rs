//! # Expenditure Repository
//!
//! Shop expenses. No cross-entity effects.

use dukan_core::validation::validate_expenditure;
use dukan_core::{Expenditure, SyncAction};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::require_affected;
use crate::repository::sync::record_change;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
struct ExpenditureRow {
    id: i64,
    category: String,
    amount: f64,
    description: Option<String>,
    date: String,
    time: String,
}

impl From<ExpenditureRow> for Expenditure {
    fn from(row: ExpenditureRow) -> Self {
        Expenditure {
            id: row.id,
            category: row.category,
            amount: row.amount,
            description: row.description,
            date: row.date,
            time: row.time,
        }
    }
}

const SELECT: &str = "SELECT id, category, amount, description, date, time FROM expenditures";

pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<Expenditure>> {
    let rows: Vec<ExpenditureRow> =
        sqlx::query_as(&format!("{SELECT} ORDER BY date DESC, time DESC, id DESC"))
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows.into_iter().map(Expenditure::from).collect())
}

pub async fn insert(conn: &mut SqliteConnection, e: &Expenditure) -> DbResult<i64> {
    validate_expenditure(e)?;
    debug!(category = %e.category, amount = e.amount, "Inserting expenditure");

    let result = sqlx::query(
        "INSERT INTO expenditures (category, amount, description, date, time) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&e.category)
    .bind(e.amount)
    .bind(&e.description)
    .bind(&e.date)
    .bind(&e.time)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn update(conn: &mut SqliteConnection, e: &Expenditure) -> DbResult<()> {
    validate_expenditure(e)?;

    let result = sqlx::query(
        "UPDATE expenditures SET category = ?2, amount = ?3, description = ?4, date = ?5, \
         time = ?6 WHERE id = ?1",
    )
    .bind(e.id)
    .bind(&e.category)
    .bind(e.amount)
    .bind(&e.description)
    .bind(&e.date)
    .bind(&e.time)
    .execute(&mut *conn)
    .await?;

    require_affected(result.rows_affected(), "Expenditure", e.id)
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM expenditures WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    require_affected(result.rows_affected(), "Expenditure", id)
}

/// Repository for expenditures.
#[derive(Debug, Clone)]
pub struct ExpenditureRepository {
    store: Store,
}

impl ExpenditureRepository {
    pub fn new(store: Store) -> Self {
        ExpenditureRepository { store }
    }

    pub async fn get_all(&self) -> DbResult<Vec<Expenditure>> {
        self.store
            .enqueue(|conn| Box::pin(async move { list(conn).await }))
            .await
    }

    pub async fn add(&self, expenditure: Expenditure) -> DbResult<i64> {
        let input = expenditure.clone();
        let id = self
            .store
            .enqueue(move |conn| {
                let e = input.clone();
                Box::pin(async move { insert(conn, &e).await })
            })
            .await?;

        let saved = Expenditure { id, ..expenditure };
        record_change(&self.store, "expenditures", id, SyncAction::Insert, &saved).await;
        Ok(id)
    }

    pub async fn update(&self, expenditure: Expenditure) -> DbResult<()> {
        let input = expenditure.clone();
        self.store
            .enqueue(move |conn| {
                let e = input.clone();
                Box::pin(async move { update(conn, &e).await })
            })
            .await?;

        record_change(
            &self.store,
            "expenditures",
            expenditure.id,
            SyncAction::Update,
            &expenditure,
        )
        .await;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> DbResult<()> {
        self.store
            .enqueue(move |conn| Box::pin(async move { delete(conn, id).await }))
            .await?;

        record_change(
            &self.store,
            "expenditures",
            id,
            SyncAction::Delete,
            &serde_json::json!({ "id": id }),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::test_support::temp_store;

    fn rent(amount: f64) -> Expenditure {
        Expenditure {
            category: "Rent".into(),
            amount,
            description: Some("October".into()),
            date: "2026-10-01".into(),
            time: "09:00".into(),
            ..Expenditure::default()
        }
    }

    #[tokio::test]
    async fn test_add_update_delete() {
        let (_dir, store) = temp_store().await;
        let repo = store.expenditures();

        let id = repo.add(rent(25_000.0)).await.unwrap();
        repo.update(Expenditure { id, ..rent(27_500.0) }).await.unwrap();

        let all = repo.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].amount, 27_500.0);

        repo.delete(id).await.unwrap();
        assert!(repo.get_all().await.unwrap().is_empty());
        assert!(matches!(repo.delete(id).await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_negative_amount_is_rejected() {
        let (_dir, store) = temp_store().await;
        let err = store.expenditures().add(rent(-1.0)).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(_)));
        assert!(store.expenditures().get_all().await.unwrap().is_empty());
    }
}
