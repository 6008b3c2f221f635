//! # Purchase Repository
//!
//! Stock receipts from vendors. Mirrors the sale side: receiving a purchase
//! adds stock and vendor payable, deleting it takes both back.

use dukan_core::{LineItem, PartyRef, Purchase, PurchaseStatus, SyncAction};
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
struct PurchaseRow {
    id: i64,
    vendor: Option<String>,
    items: Option<String>,
    invoice_number: Option<String>,
    subtotal: f64,
    tax_rate: f64,
    tax: f64,
    total: f64,
    paid_amount: f64,
    remaining_balance: f64,
    payment_method: String,
    due_date: Option<String>,
    date: String,
    time: String,
    status: PurchaseStatus,
}

impl PurchaseRow {
    fn into_purchase(self) -> Purchase {
        let id = self.id;
        let vendor: Option<PartyRef> = json::decode_opt_or_warn(
            ColumnRef {
                table: "purchases",
                row: id,
                column: "vendor",
            },
            self.vendor.as_deref(),
        );
        let items: Vec<LineItem> = json::decode_or_warn(
            ColumnRef {
                table: "purchases",
                row: id,
                column: "items",
            },
            self.items.as_deref(),
        );

        Purchase {
            id,
            vendor,
            items,
            invoice_number: self.invoice_number,
            subtotal: self.subtotal,
            tax_rate: self.tax_rate,
            tax: self.tax,
            total: self.total,
            paid_amount: self.paid_amount,
            remaining_balance: self.remaining_balance,
            payment_method: self.payment_method,
            due_date: self.due_date,
            date: self.date,
            time: self.time,
            status: self.status,
        }
    }
}

const SELECT: &str = "SELECT id, vendor, items, invoiceNumber, subtotal, taxRate, tax, total, \
                      paidAmount, remainingBalance, paymentMethod, dueDate, date, time, status \
                      FROM purchases";

pub async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Purchase>> {
    let row: Option<PurchaseRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(PurchaseRow::into_purchase))
}

pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<Purchase>> {
    let rows: Vec<PurchaseRow> =
        sqlx::query_as(&format!("{SELECT} ORDER BY date DESC, time DESC, id DESC"))
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows.into_iter().map(PurchaseRow::into_purchase).collect())
}

pub async fn insert_row(conn: &mut SqliteConnection, purchase: &Purchase) -> DbResult<i64> {
    debug!(total = purchase.total, lines = purchase.items.len(), "Inserting purchase row");

    let result = sqlx::query(
        r#"
        INSERT INTO purchases (
            vendor, items, invoiceNumber, subtotal, taxRate, tax, total,
            paidAmount, remainingBalance, paymentMethod, dueDate, date, time, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(json::encode_opt(purchase.vendor.as_ref())?)
    .bind(json::encode(&purchase.items)?)
    .bind(&purchase.invoice_number)
    .bind(purchase.subtotal)
    .bind(purchase.tax_rate)
    .bind(purchase.tax)
    .bind(purchase.total)
    .bind(purchase.paid_amount)
    .bind(purchase.remaining_balance)
    .bind(&purchase.payment_method)
    .bind(&purchase.due_date)
    .bind(&purchase.date)
    .bind(&purchase.time)
    .bind(purchase.status)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn update_row(conn: &mut SqliteConnection, purchase: &Purchase) -> DbResult<()> {
    debug!(id = purchase.id, total = purchase.total, "Updating purchase row");

    let result = sqlx::query(
        r#"
        UPDATE purchases SET
            vendor = ?2, items = ?3, invoiceNumber = ?4, subtotal = ?5, taxRate = ?6,
            tax = ?7, total = ?8, paidAmount = ?9, remainingBalance = ?10,
            paymentMethod = ?11, dueDate = ?12, date = ?13, time = ?14, status = ?15
        WHERE id = ?1
        "#,
    )
    .bind(purchase.id)
    .bind(json::encode_opt(purchase.vendor.as_ref())?)
    .bind(json::encode(&purchase.items)?)
    .bind(&purchase.invoice_number)
    .bind(purchase.subtotal)
    .bind(purchase.tax_rate)
    .bind(purchase.tax)
    .bind(purchase.total)
    .bind(purchase.paid_amount)
    .bind(purchase.remaining_balance)
    .bind(&purchase.payment_method)
    .bind(&purchase.due_date)
    .bind(&purchase.date)
    .bind(&purchase.time)
    .bind(purchase.status)
    .execute(&mut *conn)
    .await?;

    require_affected(result.rows_affected(), "Purchase", purchase.id)
}

pub async fn delete_row(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM purchases WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    require_affected(result.rows_affected(), "Purchase", id)
}

/// Repository for vendor purchases.
#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    store: Store,
}

impl PurchaseRepository {
    pub fn new(store: Store) -> Self {
        PurchaseRepository { store }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Purchase>> {
        self.store
            .enqueue(move |conn| Box::pin(async move { get(conn, id).await }))
            .await
    }

    pub async fn get_all(&self) -> DbResult<Vec<Purchase>> {
        self.store
            .enqueue(|conn| Box::pin(async move { list(conn).await }))
            .await
    }

    /// Receives a purchase: row, stock, vendor balances. Returns the new id.
    pub async fn add(&self, purchase: Purchase) -> DbResult<i64> {
        let input = purchase.clone();
        let (id, changes) = self
            .store
            .run_in_transaction(move |conn| {
                let purchase = input.clone();
                Box::pin(async move {
                    let mut changes = Changes::default();
                    let id = ledger::add_purchase(conn, &purchase, &mut changes).await?;
                    Ok((id, changes))
                })
            })
            .await?;

        let saved = Purchase { id, ..purchase }.normalized();
        record_change(&self.store, "purchases", id, SyncAction::Insert, &saved).await;
        changes.record(&self.store).await;
        Ok(id)
    }

    pub async fn update(&self, purchase: Purchase) -> DbResult<()> {
        let (saved, changes) = self
            .store
            .run_in_transaction(move |conn| {
                let purchase = purchase.clone();
                Box::pin(async move {
                    let mut changes = Changes::default();
                    let saved = ledger::update_purchase(conn, &purchase, &mut changes).await?;
                    Ok((saved, changes))
                })
            })
            .await?;

        record_change(&self.store, "purchases", saved.id, SyncAction::Update, &saved).await;
        changes.record(&self.store).await;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let (removed, changes) = self
            .store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let mut changes = Changes::default();
                    let removed = ledger::delete_purchase(conn, id, &mut changes).await?;
                    Ok((removed, changes))
                })
            })
            .await?;

        record_change(&self.store, "purchases", id, SyncAction::Delete, &removed).await;
        changes.record(&self.store).await;
        Ok(())
    }
}
