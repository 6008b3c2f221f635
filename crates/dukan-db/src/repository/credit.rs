//! # Credit Ledger Repository
//!
//! Movements of customer store credit.
//!
//! ```text
//!  type     created by                 effect on customer.credit
//!  ──────   ─────────────────────────  ─────────────────────────
//!  add      store.credit().add(..)     += amount
//!  deduct   store.credit().add(..)     -= amount (floor 0)
//!  use      sale completion only       -= creditUsed (floor 0), linkedSaleId set
//! ```

use dukan_core::{CreditTransaction, CreditTransactionType, SyncAction};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use crate::ledger::{self, Changes};
use crate::repository::require_affected;
use crate::repository::sync::record_change;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct CreditRow {
    id: i64,
    customer_id: i64,
    customer_name: String,
    customer_phone: Option<String>,
    amount: f64,
    #[sqlx(rename = "type")]
    kind: CreditTransactionType,
    date: String,
    time: String,
    description: Option<String>,
    linked_sale_id: Option<i64>,
}

impl From<CreditRow> for CreditTransaction {
    fn from(row: CreditRow) -> Self {
        CreditTransaction {
            id: row.id,
            customer_id: row.customer_id,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            amount: row.amount,
            kind: row.kind,
            date: row.date,
            time: row.time,
            description: row.description,
            linked_sale_id: row.linked_sale_id,
        }
    }
}

const SELECT: &str = "SELECT id, customerId, customerName, customerPhone, amount, type, \
                      date, time, description, linkedSaleId FROM creditTransactions";

// =============================================================================
// Step Functions
// =============================================================================

pub async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<CreditTransaction>> {
    let row: Option<CreditRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(CreditTransaction::from))
}

pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<CreditTransaction>> {
    let rows: Vec<CreditRow> = sqlx::query_as(&format!("{SELECT} ORDER BY date DESC, time DESC, id DESC"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(CreditTransaction::from).collect())
}

pub async fn list_for_customer(
    conn: &mut SqliteConnection,
    customer_id: i64,
) -> DbResult<Vec<CreditTransaction>> {
    let rows: Vec<CreditRow> = sqlx::query_as(&format!(
        "{SELECT} WHERE customerId = ?1 ORDER BY date DESC, time DESC, id DESC"
    ))
    .bind(customer_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(CreditTransaction::from).collect())
}

/// `use` rows created by the given sale.
pub async fn linked_to_sale(
    conn: &mut SqliteConnection,
    sale_id: i64,
) -> DbResult<Vec<CreditTransaction>> {
    let rows: Vec<CreditRow> = sqlx::query_as(&format!("{SELECT} WHERE linkedSaleId = ?1"))
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(CreditTransaction::from).collect())
}

/// Inserts the ledger row only; balances are the caller's job.
pub async fn insert_row(conn: &mut SqliteConnection, tx: &CreditTransaction) -> DbResult<i64> {
    debug!(
        customer_id = tx.customer_id,
        kind = tx.kind.as_str(),
        amount = tx.amount,
        linked_sale_id = ?tx.linked_sale_id,
        "Inserting credit transaction"
    );

    let result = sqlx::query(
        r#"
        INSERT INTO creditTransactions (
            customerId, customerName, customerPhone, amount, type,
            date, time, description, linkedSaleId
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(tx.customer_id)
    .bind(&tx.customer_name)
    .bind(&tx.customer_phone)
    .bind(tx.amount)
    .bind(tx.kind)
    .bind(&tx.date)
    .bind(&tx.time)
    .bind(&tx.description)
    .bind(tx.linked_sale_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn delete_row(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM creditTransactions WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    require_affected(result.rows_affected(), "CreditTransaction", id)
}

/// Removes the `use` rows of a sale. Returns how many were removed.
pub async fn delete_linked_to_sale(conn: &mut SqliteConnection, sale_id: i64) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM creditTransactions WHERE linkedSaleId = ?1")
        .bind(sale_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the customer credit ledger.
#[derive(Debug, Clone)]
pub struct CreditRepository {
    store: Store,
}

impl CreditRepository {
    pub fn new(store: Store) -> Self {
        CreditRepository { store }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<CreditTransaction>> {
        self.store
            .enqueue(move |conn| Box::pin(async move { get(conn, id).await }))
            .await
    }

    pub async fn get_all(&self) -> DbResult<Vec<CreditTransaction>> {
        self.store
            .enqueue(|conn| Box::pin(async move { list(conn).await }))
            .await
    }

    /// A customer's credit history, newest first.
    pub async fn for_customer(&self, customer_id: i64) -> DbResult<Vec<CreditTransaction>> {
        self.store
            .enqueue(move |conn| Box::pin(async move { list_for_customer(conn, customer_id).await }))
            .await
    }

    /// Records a manual `add` or `deduct` and applies it to the customer.
    pub async fn add(&self, tx: CreditTransaction) -> DbResult<i64> {
        let input = tx.clone();
        let (id, changes) = self
            .store
            .run_in_transaction(move |conn| {
                let tx = input.clone();
                Box::pin(async move {
                    let mut changes = Changes::default();
                    let id = ledger::add_credit_transaction(conn, &tx, &mut changes).await?;
                    Ok((id, changes))
                })
            })
            .await?;

        let saved = CreditTransaction { id, ..tx };
        record_change(&self.store, "creditTransactions", id, SyncAction::Insert, &saved).await;
        changes.record(&self.store).await;
        Ok(id)
    }

    /// Deletes a credit transaction and reverses its balance effect.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let (removed, changes) = self
            .store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let mut changes = Changes::default();
                    let removed = ledger::delete_credit_transaction(conn, id, &mut changes).await?;
                    Ok((removed, changes))
                })
            })
            .await?;

        record_change(&self.store, "creditTransactions", id, SyncAction::Delete, &removed).await;
        changes.record(&self.store).await;
        Ok(())
    }

    /// Current credit of a customer as recorded on the customer row.
    pub async fn balance(&self, customer_id: i64) -> DbResult<f64> {
        self.store
            .customers()
            .get(customer_id)
            .await?
            .map(|c| c.credit)
            .ok_or_else(|| crate::error::DbError::not_found("Customer", customer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{credit_tx, customer, temp_store};

    #[tokio::test]
    async fn test_add_and_delete_credit() {
        let (_dir, store) = temp_store().await;
        let c = store.customers().add(customer("Zara", "0321-5555555", 0.0)).await.unwrap();

        let add_id = store
            .credit()
            .add(credit_tx(&c, CreditTransactionType::Add, 400.0))
            .await
            .unwrap();
        store
            .credit()
            .add(credit_tx(&c, CreditTransactionType::Deduct, 150.0))
            .await
            .unwrap();
        assert_eq!(store.credit().balance(c.id).await.unwrap(), 250.0);
        assert_eq!(store.credit().for_customer(c.id).await.unwrap().len(), 2);

        store.credit().delete(add_id).await.unwrap();
        // 250 - 400 floors at zero
        assert_eq!(store.credit().balance(c.id).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_manual_use_row_is_rejected() {
        let (_dir, store) = temp_store().await;
        let c = store.customers().add(customer("Omar", "0333-7777777", 100.0)).await.unwrap();

        let err = store
            .credit()
            .add(credit_tx(&c, CreditTransactionType::Use, 50.0))
            .await
            .unwrap_err();

        assert!(matches!(err, crate::error::DbError::Domain(_)));
        assert_eq!(store.credit().balance(c.id).await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_customer_with_history_cannot_be_deleted() {
        let (_dir, store) = temp_store().await;
        let c = store.customers().add(customer("Sadia", "0345-8888888", 0.0)).await.unwrap();
        store
            .credit()
            .add(credit_tx(&c, CreditTransactionType::Add, 10.0))
            .await
            .unwrap();

        let err = store.customers().delete(c.id).await.unwrap_err();
        assert!(matches!(err, crate::error::DbError::ForeignKeyViolation { .. }));
    }
}
