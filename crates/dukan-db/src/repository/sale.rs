//! # Sale Repository
//!
//! Sale rows plus the ledger-consistent sale operations.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. COMPLETE   complete(sale)                                          │
//! │     └── one unit of work: row + stock + customer + `use` credit row    │
//! │                                                                         │
//! │  2. REVISE     update(sale)                                            │
//! │     └── one unit of work: reverse stored effects, apply new ones       │
//! │                                                                         │
//! │  3. DELETE     delete(id)                                              │
//! │     └── one unit of work: exact inverse of COMPLETE                    │
//! │                                                                         │
//! │  After each commit a sync change is recorded (best-effort).            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use dukan_core::{LineItem, PartyRef, Sale, SaleStatus, SyncAction};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use crate::json::{self, ColumnRef};
use crate::ledger::{self, Changes};
use crate::repository::require_affected;
use crate::repository::sync::record_change;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct SaleRow {
    id: i64,
    customer: Option<String>,
    cart: Option<String>,
    subtotal: f64,
    tax_rate: f64,
    tax: f64,
    total: f64,
    credit_used: f64,
    amount_after_credit: f64,
    paid_amount: f64,
    change_amount: f64,
    remaining_balance: f64,
    payment_method: String,
    due_date: Option<String>,
    date: String,
    time: String,
    status: SaleStatus,
    items: f64,
    amount: f64,
}

impl SaleRow {
    fn into_sale(self) -> Sale {
        let at = |column| ColumnRef {
            table: "sales",
            row: self.id,
            column,
        };
        let customer: Option<PartyRef> = json::decode_opt_or_warn(at("customer"), self.customer.as_deref());
        let cart: Vec<LineItem> = json::decode_or_warn(at("cart"), self.cart.as_deref());

        Sale {
            id: self.id,
            customer,
            cart,
            subtotal: self.subtotal,
            tax_rate: self.tax_rate,
            tax: self.tax,
            total: self.total,
            credit_used: self.credit_used,
            amount_after_credit: self.amount_after_credit,
            paid_amount: self.paid_amount,
            change_amount: self.change_amount,
            remaining_balance: self.remaining_balance,
            payment_method: self.payment_method,
            due_date: self.due_date,
            date: self.date,
            time: self.time,
            status: self.status,
            items: self.items,
            amount: self.amount,
        }
    }
}

const SELECT: &str = "SELECT id, customer, cart, subtotal, taxRate, tax, total, creditUsed, \
                      amountAfterCredit, paidAmount, changeAmount, remainingBalance, \
                      paymentMethod, dueDate, date, time, status, items, amount FROM sales";

// =============================================================================
// Step Functions (row only, no side effects)
// =============================================================================

pub async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Sale>> {
    let row: Option<SaleRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(SaleRow::into_sale))
}

/// All sales, newest first.
pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<Sale>> {
    let rows: Vec<SaleRow> = sqlx::query_as(&format!("{SELECT} ORDER BY date DESC, time DESC, id DESC"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(SaleRow::into_sale).collect())
}

/// Sales on one `date` (as stored, e.g. "2026-10-19").
pub async fn list_by_date(conn: &mut SqliteConnection, date: &str) -> DbResult<Vec<Sale>> {
    let rows: Vec<SaleRow> = sqlx::query_as(&format!("{SELECT} WHERE date = ?1 ORDER BY time, id"))
        .bind(date)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(SaleRow::into_sale).collect())
}

/// Inserts the sale row only. Use [`ledger::complete_sale`] for a sale
/// with its side effects.
pub async fn insert_row(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<i64> {
    debug!(total = sale.total, lines = sale.cart.len(), "Inserting sale row");

    let result = sqlx::query(
        r#"
        INSERT INTO sales (
            customer, cart, subtotal, taxRate, tax, total,
            creditUsed, amountAfterCredit, paidAmount, changeAmount, remainingBalance,
            paymentMethod, dueDate, date, time, status, items, amount
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16, ?17, ?18
        )
        "#,
    )
    .bind(json::encode_opt(sale.customer.as_ref())?)
    .bind(json::encode(&sale.cart)?)
    .bind(sale.subtotal)
    .bind(sale.tax_rate)
    .bind(sale.tax)
    .bind(sale.total)
    .bind(sale.credit_used)
    .bind(sale.amount_after_credit)
    .bind(sale.paid_amount)
    .bind(sale.change_amount)
    .bind(sale.remaining_balance)
    .bind(&sale.payment_method)
    .bind(&sale.due_date)
    .bind(&sale.date)
    .bind(&sale.time)
    .bind(sale.status)
    .bind(sale.items)
    .bind(sale.amount)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Overwrites the sale row, keeping its id.
pub async fn update_row(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    debug!(id = sale.id, total = sale.total, "Updating sale row");

    let result = sqlx::query(
        r#"
        UPDATE sales SET
            customer = ?2, cart = ?3, subtotal = ?4, taxRate = ?5, tax = ?6, total = ?7,
            creditUsed = ?8, amountAfterCredit = ?9, paidAmount = ?10, changeAmount = ?11,
            remainingBalance = ?12, paymentMethod = ?13, dueDate = ?14, date = ?15,
            time = ?16, status = ?17, items = ?18, amount = ?19
        WHERE id = ?1
        "#,
    )
    .bind(sale.id)
    .bind(json::encode_opt(sale.customer.as_ref())?)
    .bind(json::encode(&sale.cart)?)
    .bind(sale.subtotal)
    .bind(sale.tax_rate)
    .bind(sale.tax)
    .bind(sale.total)
    .bind(sale.credit_used)
    .bind(sale.amount_after_credit)
    .bind(sale.paid_amount)
    .bind(sale.change_amount)
    .bind(sale.remaining_balance)
    .bind(&sale.payment_method)
    .bind(&sale.due_date)
    .bind(&sale.date)
    .bind(&sale.time)
    .bind(sale.status)
    .bind(sale.items)
    .bind(sale.amount)
    .execute(&mut *conn)
    .await?;

    require_affected(result.rows_affected(), "Sale", sale.id)
}

pub async fn delete_row(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM sales WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    require_affected(result.rows_affected(), "Sale", id)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sales.
///
/// ## Usage
/// ```rust,ignore
/// let id = store.sales().complete(sale).await?;
/// store.sales().delete(id).await?;   // stock and balances restored
/// ```
#[derive(Debug, Clone)]
pub struct SaleRepository {
    store: Store,
}

impl SaleRepository {
    pub fn new(store: Store) -> Self {
        SaleRepository { store }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Sale>> {
        self.store
            .enqueue(move |conn| Box::pin(async move { get(conn, id).await }))
            .await
    }

    pub async fn get_all(&self) -> DbResult<Vec<Sale>> {
        self.store
            .enqueue(|conn| Box::pin(async move { list(conn).await }))
            .await
    }

    pub async fn get_by_date(&self, date: &str) -> DbResult<Vec<Sale>> {
        let date = date.to_string();
        self.store
            .enqueue(move |conn| {
                let date = date.clone();
                Box::pin(async move { list_by_date(conn, &date).await })
            })
            .await
    }

    /// Completes a sale with all its side effects. Returns the new id.
    pub async fn complete(&self, sale: Sale) -> DbResult<i64> {
        let input = sale.clone();
        let (id, changes) = self
            .store
            .run_in_transaction(move |conn| {
                let sale = input.clone();
                Box::pin(async move {
                    let mut changes = Changes::default();
                    let id = ledger::complete_sale(conn, &sale, &mut changes).await?;
                    Ok((id, changes))
                })
            })
            .await?;

        let saved = Sale { id, ..sale }.normalized();
        record_change(&self.store, "sales", id, SyncAction::Insert, &saved).await;
        changes.record(&self.store).await;
        Ok(id)
    }

    /// Replaces a sale, moving stock and balances from the old version to
    /// the new one.
    pub async fn update(&self, sale: Sale) -> DbResult<()> {
        let (saved, changes) = self
            .store
            .run_in_transaction(move |conn| {
                let sale = sale.clone();
                Box::pin(async move {
                    let mut changes = Changes::default();
                    let saved = ledger::update_sale(conn, &sale, &mut changes).await?;
                    Ok((saved, changes))
                })
            })
            .await?;

        record_change(&self.store, "sales", saved.id, SyncAction::Update, &saved).await;
        changes.record(&self.store).await;
        Ok(())
    }

    /// Deletes a sale and undoes everything completing it did.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let (removed, changes) = self
            .store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let mut changes = Changes::default();
                    let removed = ledger::delete_sale(conn, id, &mut changes).await?;
                    Ok((removed, changes))
                })
            })
            .await?;

        record_change(&self.store, "sales", id, SyncAction::Delete, &removed).await;
        changes.record(&self.store).await;
        Ok(())
    }
}
