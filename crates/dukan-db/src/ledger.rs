//! # Ledger Operations
//!
//! Multi-table business operations. Each function here is a step meant to
//! run inside one unit of work ([`crate::Store::run_in_transaction`]); the
//! repositories call them, and callers composing larger transactions can
//! call them directly with the connection they were handed.
//!
//! ## Sale Completion
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  complete_sale(conn, sale)            BEGIN IMMEDIATE already issued   │
//! │                                                                         │
//! │  1. validate + normalize (items, amount)                               │
//! │  2. INSERT sales                                   → id                │
//! │  3. for each catalog line:  stock -= qty (floor 0)                     │
//! │       productId <= 0 or unknown product → skipped                      │
//! │  4. registered customer:    totalPurchases += total                    │
//! │                             lastPurchase    = date                     │
//! │                             credit         -= creditUsed (floor 0)     │
//! │                             dueAmount      += remainingBalance         │
//! │  5. creditUsed > 0:         INSERT creditTransactions (type 'use',     │
//! │                             linkedSaleId = id)                         │
//! │                                                                         │
//! │  Any error → the coordinator rolls back all of it.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deletion and revision run the same steps in reverse. Floored
//! subtractions that had to absorb something are logged as warnings.
//!
//! Every step also fills a [`Changes`] with the rows it wrote besides its
//! own record. Once the unit of work commits, [`Changes::record`] queues
//! them in the sync outbox.

use dukan_core::ledger::{Clamp, SaleEffect, StockAdjustment, EPSILON};
use dukan_core::validation::{validate_amount, validate_purchase, validate_sale};
use dukan_core::{
    CoreError, CreditTransaction, CreditTransactionType, Customer, LineItem, Product, Purchase,
    Sale, SyncAction, Vendor,
};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::repository::sync::record_change;
use crate::repository::{credit, customer, product, purchase, sale, vendor};
use crate::store::Store;

// =============================================================================
// Side Effects
// =============================================================================

/// Rows a ledger step wrote besides its own record, as they were saved.
///
/// A row saved twice in one unit of work (a revision reverses then
/// reapplies) is kept once, in its final state.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    pub products: Vec<Product>,
    pub customers: Vec<Customer>,
    pub vendors: Vec<Vendor>,
    pub credit_added: Vec<CreditTransaction>,
    pub credit_removed: Vec<CreditTransaction>,
}

impl Changes {
    fn product(&mut self, item: &Product) {
        keep_latest(&mut self.products, item.clone(), |p| p.id);
    }

    fn customer(&mut self, holder: &Customer) {
        keep_latest(&mut self.customers, holder.clone(), |c| c.id);
    }

    fn vendor(&mut self, supplier: &Vendor) {
        keep_latest(&mut self.vendors, supplier.clone(), |v| v.id);
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
            && self.customers.is_empty()
            && self.vendors.is_empty()
            && self.credit_added.is_empty()
            && self.credit_removed.is_empty()
    }

    /// Queues every collected row in the sync outbox. Call after commit.
    pub async fn record(&self, store: &Store) {
        for item in &self.products {
            record_change(store, "products", item.id, SyncAction::Update, item).await;
        }
        for holder in &self.customers {
            record_change(store, "customers", holder.id, SyncAction::Update, holder).await;
        }
        for supplier in &self.vendors {
            record_change(store, "vendors", supplier.id, SyncAction::Update, supplier).await;
        }
        for tx in &self.credit_removed {
            record_change(store, "creditTransactions", tx.id, SyncAction::Delete, tx).await;
        }
        for tx in &self.credit_added {
            record_change(store, "creditTransactions", tx.id, SyncAction::Insert, tx).await;
        }
    }
}

fn keep_latest<T>(rows: &mut Vec<T>, row: T, id: impl Fn(&T) -> i64) {
    let key = id(&row);
    match rows.iter_mut().find(|existing| id(existing) == key) {
        Some(slot) => *slot = row,
        None => rows.push(row),
    }
}

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stock {
    Take,
    Return,
}

// =============================================================================
// Shared Steps
// =============================================================================

/// Moves stock for every catalog line. Lines that do not resolve to a
/// product (or variant) are skipped.
async fn move_stock(
    conn: &mut SqliteConnection,
    lines: &[LineItem],
    direction: Stock,
    changes: &mut Changes,
) -> DbResult<()> {
    for line in lines {
        if !line.is_catalog_item() {
            debug!(product_id = line.product_id, name = %line.name, "Skipping stock for ad-hoc line");
            continue;
        }

        let Some(mut item) = product::get(&mut *conn, line.product_id).await? else {
            warn!(product_id = line.product_id, name = %line.name, "Line refers to unknown product, stock unchanged");
            continue;
        };

        let delta = match direction {
            Stock::Take => -line.quantity,
            Stock::Return => line.quantity,
        };

        match item.adjust_stock(line.variant_id, delta) {
            StockAdjustment::Applied {
                before,
                after,
                clamp,
            } => {
                if !clamp.is_clean() {
                    warn!(
                        product_id = item.id,
                        variant_id = ?line.variant_id,
                        requested = line.quantity,
                        absorbed = clamp.absorbed,
                        "Stock floored at zero"
                    );
                }
                debug!(product_id = item.id, variant_id = ?line.variant_id, before, after, "Stock adjusted");
                product::save_stock(&mut *conn, &item).await?;
                changes.product(&item);
            }
            StockAdjustment::VariantMissing { variant_id } => {
                warn!(product_id = item.id, ?variant_id, "Line names no known variant, stock unchanged");
            }
        }
    }
    Ok(())
}

fn log_clamp(clamp: Clamp, entity: &str, id: i64, operation: &str) {
    if !clamp.is_clean() {
        warn!(entity, id, operation, absorbed = clamp.absorbed, "Balance floored at zero");
    }
}

/// Loads the sale's registered customer, if there is one and it still
/// exists.
async fn sale_customer(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<Option<Customer>> {
    let Some(id) = sale.customer_id() else {
        return Ok(None);
    };
    let found = customer::get(conn, id).await?;
    if found.is_none() {
        warn!(sale_id = sale.id, customer_id = id, "Sale refers to unknown customer, balances unchanged");
    }
    Ok(found)
}

/// Applies a sale to stock, customer balances and the credit ledger.
/// `sale.id` must be the stored id.
async fn apply_sale_effects(
    conn: &mut SqliteConnection,
    sale: &Sale,
    changes: &mut Changes,
) -> DbResult<()> {
    move_stock(&mut *conn, &sale.cart, Stock::Take, changes).await?;

    let Some(mut buyer) = sale_customer(&mut *conn, sale).await? else {
        return Ok(());
    };

    let clamp = buyer.apply_sale(&SaleEffect::from(sale));
    log_clamp(clamp, "customer", buyer.id, "sale credit");
    customer::save_balances(&mut *conn, &buyer).await?;
    changes.customer(&buyer);

    if sale.credit_used > EPSILON {
        let mut use_row = CreditTransaction {
            id: 0,
            customer_id: buyer.id,
            customer_name: buyer.name.clone(),
            customer_phone: Some(buyer.phone.clone()),
            amount: sale.credit_used,
            kind: CreditTransactionType::Use,
            date: sale.date.clone(),
            time: sale.time.clone(),
            description: Some(format!("Used in sale #{}", sale.id)),
            linked_sale_id: Some(sale.id),
        };
        use_row.id = credit::insert_row(&mut *conn, &use_row).await?;
        changes.credit_added.push(use_row);
    }

    Ok(())
}

/// Exact inverse of [`apply_sale_effects`] for a stored sale.
async fn reverse_sale_effects(
    conn: &mut SqliteConnection,
    sale: &Sale,
    changes: &mut Changes,
) -> DbResult<()> {
    move_stock(&mut *conn, &sale.cart, Stock::Return, changes).await?;

    if let Some(mut buyer) = sale_customer(&mut *conn, sale).await? {
        let clamp = buyer.reverse_sale(&SaleEffect::from(sale));
        log_clamp(clamp, "customer", buyer.id, "sale reversal");
        customer::save_balances(&mut *conn, &buyer).await?;
        changes.customer(&buyer);
    }

    let linked = credit::linked_to_sale(&mut *conn, sale.id).await?;
    let removed = credit::delete_linked_to_sale(&mut *conn, sale.id).await?;
    debug!(sale_id = sale.id, removed, "Removed linked credit rows");
    changes.credit_removed.extend(linked);
    Ok(())
}

// =============================================================================
// Sales
// =============================================================================

/// Completes a sale: row, stock, customer balances and the `use` credit row.
/// Returns the new sale id.
pub async fn complete_sale(
    conn: &mut SqliteConnection,
    sale: &Sale,
    changes: &mut Changes,
) -> DbResult<i64> {
    validate_sale(sale)?;
    let mut stored = sale.clone().normalized();

    stored.id = sale::insert_row(&mut *conn, &stored).await?;
    apply_sale_effects(&mut *conn, &stored, changes).await?;

    debug!(
        sale_id = stored.id,
        total = stored.total,
        credit_used = stored.credit_used,
        customer_id = ?stored.customer_id(),
        "Sale completed"
    );
    Ok(stored.id)
}

/// Deletes a sale and undoes everything [`complete_sale`] did. Returns the
/// deleted sale.
pub async fn delete_sale(
    conn: &mut SqliteConnection,
    id: i64,
    changes: &mut Changes,
) -> DbResult<Sale> {
    let stored = sale::get(&mut *conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Sale", id))?;

    reverse_sale_effects(&mut *conn, &stored, changes).await?;
    sale::delete_row(&mut *conn, id).await?;

    debug!(sale_id = id, total = stored.total, "Sale deleted");
    Ok(stored)
}

/// Replaces a stored sale with a revised version under the same id.
/// Returns the revision as stored.
pub async fn update_sale(
    conn: &mut SqliteConnection,
    revised: &Sale,
    changes: &mut Changes,
) -> DbResult<Sale> {
    validate_sale(revised)?;
    let stored = sale::get(&mut *conn, revised.id)
        .await?
        .ok_or_else(|| DbError::not_found("Sale", revised.id))?;

    reverse_sale_effects(&mut *conn, &stored, changes).await?;

    let revised = revised.clone().normalized();
    sale::update_row(&mut *conn, &revised).await?;
    apply_sale_effects(&mut *conn, &revised, changes).await?;

    debug!(sale_id = revised.id, old_total = stored.total, new_total = revised.total, "Sale revised");
    Ok(revised)
}

// =============================================================================
// Customer Credit
// =============================================================================

/// Records a manual `add` or `deduct` and applies it to the customer.
pub async fn add_credit_transaction(
    conn: &mut SqliteConnection,
    tx: &CreditTransaction,
    changes: &mut Changes,
) -> DbResult<i64> {
    if tx.kind == CreditTransactionType::Use {
        return Err(CoreError::UnlinkedCreditUse.into());
    }
    validate_amount("amount", tx.amount)?;

    let mut holder = customer::get(&mut *conn, tx.customer_id)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", tx.customer_id))?;

    let clamp = holder.apply_credit(tx.kind, tx.amount);
    log_clamp(clamp, "customer", holder.id, tx.kind.as_str());
    customer::save_balances(&mut *conn, &holder).await?;
    changes.customer(&holder);

    credit::insert_row(&mut *conn, tx).await
}

/// Deletes a manual credit transaction and reverses its effect. Returns the
/// deleted row. `use` rows belong to their sale and are refused.
pub async fn delete_credit_transaction(
    conn: &mut SqliteConnection,
    id: i64,
    changes: &mut Changes,
) -> DbResult<CreditTransaction> {
    let tx = credit::get(&mut *conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("CreditTransaction", id))?;

    if let Some(sale_id) = tx.linked_sale_id {
        return Err(CoreError::LinkedCreditUse { sale_id }.into());
    }

    let mut holder = customer::get(&mut *conn, tx.customer_id)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", tx.customer_id))?;

    let clamp = holder.reverse_credit(tx.kind, tx.amount);
    log_clamp(clamp, "customer", holder.id, "credit reversal");
    customer::save_balances(&mut *conn, &holder).await?;
    changes.customer(&holder);

    credit::delete_row(&mut *conn, id).await?;
    Ok(tx)
}

// =============================================================================
// Purchases
// =============================================================================

async fn apply_purchase_effects(
    conn: &mut SqliteConnection,
    p: &Purchase,
    changes: &mut Changes,
) -> DbResult<()> {
    move_stock(&mut *conn, &p.items, Stock::Return, changes).await?;

    if let Some(vendor_id) = p.vendor_id() {
        match vendor::get(&mut *conn, vendor_id).await? {
            Some(mut supplier) => {
                supplier.apply_purchase(p);
                vendor::save_balances(&mut *conn, &supplier).await?;
                changes.vendor(&supplier);
            }
            None => warn!(purchase_id = p.id, vendor_id, "Purchase refers to unknown vendor"),
        }
    }
    Ok(())
}

async fn reverse_purchase_effects(
    conn: &mut SqliteConnection,
    p: &Purchase,
    changes: &mut Changes,
) -> DbResult<()> {
    move_stock(&mut *conn, &p.items, Stock::Take, changes).await?;

    if let Some(vendor_id) = p.vendor_id() {
        match vendor::get(&mut *conn, vendor_id).await? {
            Some(mut supplier) => {
                let clamp = supplier.reverse_purchase(p);
                log_clamp(clamp, "vendor", supplier.id, "purchase reversal");
                vendor::save_balances(&mut *conn, &supplier).await?;
                changes.vendor(&supplier);
            }
            None => warn!(purchase_id = p.id, vendor_id, "Purchase refers to unknown vendor"),
        }
    }
    Ok(())
}

/// Receives a purchase: row, stock increase, vendor totals and payable.
pub async fn add_purchase(
    conn: &mut SqliteConnection,
    p: &Purchase,
    changes: &mut Changes,
) -> DbResult<i64> {
    validate_purchase(p)?;
    let mut stored = p.clone().normalized();
    stored.id = purchase::insert_row(&mut *conn, &stored).await?;
    apply_purchase_effects(&mut *conn, &stored, changes).await?;

    debug!(purchase_id = stored.id, total = stored.total, "Purchase received");
    Ok(stored.id)
}

/// Deletes a purchase, taking its stock and vendor balances back.
pub async fn delete_purchase(
    conn: &mut SqliteConnection,
    id: i64,
    changes: &mut Changes,
) -> DbResult<Purchase> {
    let stored = purchase::get(&mut *conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Purchase", id))?;

    reverse_purchase_effects(&mut *conn, &stored, changes).await?;
    purchase::delete_row(&mut *conn, id).await?;
    Ok(stored)
}

/// Replaces a stored purchase under the same id. Returns the revision as
/// stored.
pub async fn update_purchase(
    conn: &mut SqliteConnection,
    revised: &Purchase,
    changes: &mut Changes,
) -> DbResult<Purchase> {
    validate_purchase(revised)?;
    let stored = purchase::get(&mut *conn, revised.id)
        .await?
        .ok_or_else(|| DbError::not_found("Purchase", revised.id))?;

    reverse_purchase_effects(&mut *conn, &stored, changes).await?;
    let revised = revised.clone().normalized();
    purchase::update_row(&mut *conn, &revised).await?;
    apply_purchase_effects(&mut *conn, &revised, changes).await?;
    Ok(revised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        credit_tx, customer, line, purchase_from, sale_for, single_product, temp_store,
        variant_product,
    };
    use crate::Store;
    use dukan_core::{LineItem, PartyRef, SaleStatus, Vendor};

    async fn stock_of(store: &Store, id: i64) -> f64 {
        store.products().get(id).await.unwrap().unwrap().total_stock()
    }

    async fn credit_rows(store: &Store) -> usize {
        store.credit().get_all().await.unwrap().len()
    }

    #[tokio::test]
    async fn test_credit_sale_scenario() {
        let (_dir, store) = temp_store().await;
        let sugar = store.products().add(single_product("Sugar", 10.0)).await.unwrap();
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 500.0)).await.unwrap();

        let sale = sale_for(Some(&buyer), vec![line(&sugar, 3.0, 400.0)], 1200.0, 500.0, 0.0);
        let id = store.sales().complete(sale).await.unwrap();

        let after = store.customers().get(buyer.id).await.unwrap().unwrap();
        assert_eq!(after.credit, 0.0);
        assert_eq!(after.due_amount, 700.0);
        assert_eq!(after.total_purchases, 1200.0);
        assert_eq!(after.last_purchase.as_deref(), Some("2026-10-19"));
        assert_eq!(stock_of(&store, sugar.id).await, 7.0);

        let uses = store.credit().for_customer(buyer.id).await.unwrap();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].kind, CreditTransactionType::Use);
        assert_eq!(uses[0].amount, 500.0);
        assert_eq!(uses[0].linked_sale_id, Some(id));

        let stored = store.sales().get(id).await.unwrap().unwrap();
        assert_eq!(stored.items, 3.0);
        assert_eq!(stored.amount, 1200.0);
    }

    #[tokio::test]
    async fn test_delete_sale_restores_state() {
        let (_dir, store) = temp_store().await;
        let sugar = store.products().add(single_product("Sugar", 10.0)).await.unwrap();
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 500.0)).await.unwrap();
        let before = store.customers().get(buyer.id).await.unwrap().unwrap();

        let sale = sale_for(Some(&buyer), vec![line(&sugar, 3.0, 400.0)], 1200.0, 500.0, 0.0);
        let id = store.sales().complete(sale).await.unwrap();
        store.sales().delete(id).await.unwrap();

        let after = store.customers().get(buyer.id).await.unwrap().unwrap();
        assert_eq!(after.credit, before.credit);
        assert_eq!(after.due_amount, before.due_amount);
        assert_eq!(after.total_purchases, before.total_purchases);
        assert_eq!(stock_of(&store, sugar.id).await, 10.0);
        assert_eq!(credit_rows(&store).await, 0);
        assert!(store.sales().get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_customer_update_rolls_back_everything() {
        let (_dir, store) = temp_store().await;
        let sugar = store.products().add(single_product("Sugar", 10.0)).await.unwrap();
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 500.0)).await.unwrap();

        store
            .enqueue(|conn| {
                Box::pin(async move {
                    sqlx::query(
                        "CREATE TRIGGER fail_customer_update BEFORE UPDATE ON customers \
                         BEGIN SELECT RAISE(ABORT, 'customer update blocked'); END",
                    )
                    .execute(conn)
                    .await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let sale = sale_for(Some(&buyer), vec![line(&sugar, 3.0, 400.0)], 1200.0, 500.0, 0.0);
        let err = store.sales().complete(sale).await.unwrap_err();
        assert!(!err.is_recoverable());

        assert!(store.sales().get_all().await.unwrap().is_empty());
        assert_eq!(stock_of(&store, sugar.id).await, 10.0);
        assert_eq!(credit_rows(&store).await, 0);
        let unchanged = store.customers().get(buyer.id).await.unwrap().unwrap();
        assert_eq!(unchanged.credit, 500.0);
    }

    #[tokio::test]
    async fn test_custom_line_skips_stock() {
        let (_dir, store) = temp_store().await;
        let sugar = store.products().add(single_product("Sugar", 10.0)).await.unwrap();

        let cart = vec![line(&sugar, 2.0, 100.0), LineItem::custom("Extra amount", 50.0)];
        let id = store
            .sales()
            .complete(sale_for(None, cart, 250.0, 0.0, 250.0))
            .await
            .unwrap();

        assert_eq!(stock_of(&store, sugar.id).await, 8.0);
        assert_eq!(store.sales().get(id).await.unwrap().unwrap().cart.len(), 2);
        // Walk-in sale: no credit rows
        assert_eq!(credit_rows(&store).await, 0);
    }

    #[tokio::test]
    async fn test_overselling_floors_stock_at_zero() {
        let (_dir, store) = temp_store().await;
        let kurta = store
            .products()
            .add(variant_product("Kurta", &[(1, "M", 2.0), (2, "L", 4.0)]))
            .await
            .unwrap();

        let mut oversold = line(&kurta, 5.0, 1500.0);
        oversold.variant_id = Some(1);
        store
            .sales()
            .complete(sale_for(None, vec![oversold], 7500.0, 0.0, 7500.0))
            .await
            .unwrap();

        let after = store.products().get(kurta.id).await.unwrap().unwrap();
        assert_eq!(after.variant(1).unwrap().stock, 0.0);
        assert_eq!(after.variant(2).unwrap().stock, 4.0);
    }

    #[tokio::test]
    async fn test_credit_exceeding_total_is_rejected() {
        let (_dir, store) = temp_store().await;
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 500.0)).await.unwrap();

        let err = store
            .sales()
            .complete(sale_for(Some(&buyer), vec![], 100.0, 200.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::CreditExceedsTotal { .. })
        ));
        assert!(store.sales().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_sale_moves_effects() {
        let (_dir, store) = temp_store().await;
        let sugar = store.products().add(single_product("Sugar", 10.0)).await.unwrap();
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 500.0)).await.unwrap();

        let sale = sale_for(Some(&buyer), vec![line(&sugar, 3.0, 400.0)], 1200.0, 500.0, 0.0);
        let id = store.sales().complete(sale.clone()).await.unwrap();

        let revised = Sale {
            id,
            ..sale_for(Some(&buyer), vec![line(&sugar, 1.0, 400.0)], 400.0, 100.0, 300.0)
        };
        store.sales().update(revised).await.unwrap();

        let after = store.customers().get(buyer.id).await.unwrap().unwrap();
        assert_eq!(after.credit, 400.0);
        assert_eq!(after.due_amount, 0.0);
        assert_eq!(after.total_purchases, 400.0);
        assert_eq!(stock_of(&store, sugar.id).await, 9.0);

        let uses = store.credit().for_customer(buyer.id).await.unwrap();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].amount, 100.0);
        assert_eq!(uses[0].linked_sale_id, Some(id));
    }

    #[tokio::test]
    async fn test_credit_balances_never_negative() {
        let (_dir, store) = temp_store().await;
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 100.0)).await.unwrap();

        store
            .credit()
            .add(credit_tx(&buyer, CreditTransactionType::Deduct, 250.0))
            .await
            .unwrap();

        let after = store.customers().get(buyer.id).await.unwrap().unwrap();
        assert_eq!(after.credit, 0.0);
        assert!(after.due_amount >= 0.0);
    }

    #[tokio::test]
    async fn test_linked_use_row_cannot_be_deleted_alone() {
        let (_dir, store) = temp_store().await;
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 500.0)).await.unwrap();
        store
            .sales()
            .complete(sale_for(Some(&buyer), vec![], 300.0, 300.0, 0.0))
            .await
            .unwrap();

        let use_row = &store.credit().for_customer(buyer.id).await.unwrap()[0];
        let err = store.credit().delete(use_row.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::LinkedCreditUse { .. })));
    }

    #[tokio::test]
    async fn test_purchase_receipt_and_deletion() {
        let (_dir, store) = temp_store().await;
        let rice = store.products().add(single_product("Rice", 4.0)).await.unwrap();
        let supplier = store
            .vendors()
            .add(Vendor {
                name: "Karachi Traders".into(),
                ..Vendor::default()
            })
            .await
            .unwrap();

        let p = purchase_from(&supplier, vec![line(&rice, 20.0, 150.0)], 3000.0, 1000.0);
        let id = store.purchases().add(p).await.unwrap();

        let after = store.vendors().get(supplier.id).await.unwrap().unwrap();
        assert_eq!(after.total_purchases, 3000.0);
        assert_eq!(after.payable, 2000.0);
        assert_eq!(after.last_purchase.as_deref(), Some("2026-10-19"));
        assert_eq!(stock_of(&store, rice.id).await, 24.0);

        store.purchases().delete(id).await.unwrap();
        let after = store.vendors().get(supplier.id).await.unwrap().unwrap();
        assert_eq!(after.total_purchases, 0.0);
        assert_eq!(after.payable, 0.0);
        assert_eq!(stock_of(&store, rice.id).await, 4.0);
    }

    async fn queued_since(store: &Store, skip: usize) -> Vec<(String, SyncAction)> {
        store
            .sync_outbox()
            .get_pending_changes(500)
            .await
            .unwrap()
            .into_iter()
            .skip(skip)
            .map(|record| (record.entity, record.action))
            .collect()
    }

    #[tokio::test]
    async fn test_credit_sale_queues_every_touched_row() {
        let (_dir, store) = temp_store().await;
        let sugar = store.products().add(single_product("Sugar", 10.0)).await.unwrap();
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 500.0)).await.unwrap();
        let skip = store.sync_outbox().get_pending_changes(500).await.unwrap().len();

        let sale = sale_for(Some(&buyer), vec![line(&sugar, 3.0, 400.0)], 1200.0, 500.0, 0.0);
        let id = store.sales().complete(sale).await.unwrap();

        let queued = queued_since(&store, skip).await;
        assert_eq!(
            queued,
            vec![
                ("sales".to_string(), SyncAction::Insert),
                ("products".to_string(), SyncAction::Update),
                ("customers".to_string(), SyncAction::Update),
                ("creditTransactions".to_string(), SyncAction::Insert),
            ]
        );

        let records = store.sync_outbox().get_pending_changes(500).await.unwrap();
        let buyer_row = records.iter().rev().find(|r| r.entity == "customers").unwrap();
        assert_eq!(buyer_row.payload["dueAmount"], 700.0);
        assert_eq!(buyer_row.payload["credit"], 0.0);

        let skip = records.len();
        store.sales().delete(id).await.unwrap();
        let queued = queued_since(&store, skip).await;
        assert!(queued.contains(&("creditTransactions".to_string(), SyncAction::Delete)));
        assert!(queued.contains(&("products".to_string(), SyncAction::Update)));
        assert!(queued.contains(&("customers".to_string(), SyncAction::Update)));
    }

    #[tokio::test]
    async fn test_purchase_queues_vendor_and_stock() {
        let (_dir, store) = temp_store().await;
        let rice = store.products().add(single_product("Rice", 4.0)).await.unwrap();
        let supplier = store
            .vendors()
            .add(Vendor {
                name: "Karachi Traders".into(),
                ..Vendor::default()
            })
            .await
            .unwrap();
        let skip = store.sync_outbox().get_pending_changes(500).await.unwrap().len();

        let p = purchase_from(&supplier, vec![line(&rice, 20.0, 150.0)], 3000.0, 1000.0);
        store.purchases().add(p).await.unwrap();

        let entities: Vec<String> = queued_since(&store, skip)
            .await
            .into_iter()
            .map(|(entity, _)| entity)
            .collect();
        assert_eq!(entities, ["purchases", "products", "vendors"]);
    }

    #[tokio::test]
    async fn test_stored_status_follows_amounts() {
        let (_dir, store) = temp_store().await;
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 0.0)).await.unwrap();

        // Status left at its default; only the amounts say what is owed
        let sale = Sale {
            customer: Some(PartyRef::Registered {
                id: buyer.id,
                name: buyer.name.clone(),
                phone: Some(buyer.phone.clone()),
            }),
            subtotal: 1200.0,
            total: 1200.0,
            amount_after_credit: 1200.0,
            paid_amount: 500.0,
            remaining_balance: 700.0,
            payment_method: "Cash".into(),
            date: "2026-10-19".into(),
            time: "12:00".into(),
            ..Sale::default()
        };
        assert_eq!(sale.status, SaleStatus::Paid);

        let id = store.sales().complete(sale.clone()).await.unwrap();
        let stored = store.sales().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SaleStatus::PartiallyPaid);

        let settled = Sale {
            id,
            paid_amount: 1200.0,
            remaining_balance: 0.0,
            status: SaleStatus::Due,
            ..sale
        };
        store.sales().update(settled).await.unwrap();
        let stored = store.sales().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SaleStatus::Paid);
    }

    #[tokio::test]
    async fn test_step_functions_compose_in_one_transaction() {
        let (_dir, store) = temp_store().await;
        let buyer = store.customers().add(customer("Sana", "0300-1234567", 0.0)).await.unwrap();

        let grant = credit_tx(&buyer, CreditTransactionType::Add, 300.0);
        let sale = sale_for(Some(&buyer), vec![], 300.0, 300.0, 0.0);
        store
            .run_in_transaction(move |conn| {
                let grant = grant.clone();
                let sale = sale.clone();
                Box::pin(async move {
                    let mut changes = Changes::default();
                    add_credit_transaction(&mut *conn, &grant, &mut changes).await?;
                    complete_sale(&mut *conn, &sale, &mut changes).await?;
                    Ok(changes)
                })
            })
            .await
            .unwrap();

        let after = store.customers().get(buyer.id).await.unwrap().unwrap();
        assert_eq!(after.credit, 0.0);
        assert_eq!(credit_rows(&store).await, 2);
    }
}
