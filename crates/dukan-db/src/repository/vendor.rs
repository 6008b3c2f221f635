//! # Vendor Repository
//!
//! Suppliers. `payable`, `totalPurchases` and `lastPurchase` move only
//! through purchase receipt and reversal.

use dukan_core::validation::validate_vendor;
use dukan_core::{SyncAction, Vendor};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::require_affected;
use crate::repository::sync::record_change;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct VendorRow {
    id: i64,
    name: String,
    phone: Option<String>,
    email: Option<String>,
    company: Option<String>,
    note: Option<String>,
    image_uri: Option<String>,
    total_purchases: f64,
    last_purchase: Option<String>,
    payable: f64,
}

impl From<VendorRow> for Vendor {
    fn from(row: VendorRow) -> Self {
        Vendor {
            id: row.id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            company: row.company,
            note: row.note,
            image_uri: row.image_uri,
            total_purchases: row.total_purchases,
            last_purchase: row.last_purchase,
            payable: row.payable,
        }
    }
}

const SELECT: &str = "SELECT id, name, phone, email, company, note, imageUri, \
                      totalPurchases, lastPurchase, payable FROM vendors";

pub async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Vendor>> {
    let row: Option<VendorRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Vendor::from))
}

pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<Vendor>> {
    let rows: Vec<VendorRow> = sqlx::query_as(&format!("{SELECT} ORDER BY name COLLATE NOCASE"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Vendor::from).collect())
}

pub async fn insert(conn: &mut SqliteConnection, vendor: &Vendor) -> DbResult<i64> {
    validate_vendor(vendor)?;
    debug!(name = %vendor.name, "Inserting vendor");

    let result = sqlx::query(
        r#"
        INSERT INTO vendors (
            name, phone, email, company, note, imageUri,
            totalPurchases, lastPurchase, payable
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(vendor.name.trim())
    .bind(&vendor.phone)
    .bind(&vendor.email)
    .bind(&vendor.company)
    .bind(&vendor.note)
    .bind(&vendor.image_uri)
    .bind(vendor.total_purchases)
    .bind(&vendor.last_purchase)
    .bind(vendor.payable)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Updates contact details only.
pub async fn update_details(conn: &mut SqliteConnection, vendor: &Vendor) -> DbResult<()> {
    validate_vendor(vendor)?;
    debug!(id = vendor.id, "Updating vendor details");

    let result = sqlx::query(
        r#"
        UPDATE vendors SET
            name = ?2, phone = ?3, email = ?4, company = ?5, note = ?6, imageUri = ?7
        WHERE id = ?1
        "#,
    )
    .bind(vendor.id)
    .bind(vendor.name.trim())
    .bind(&vendor.phone)
    .bind(&vendor.email)
    .bind(&vendor.company)
    .bind(&vendor.note)
    .bind(&vendor.image_uri)
    .execute(&mut *conn)
    .await?;

    require_affected(result.rows_affected(), "Vendor", vendor.id)
}

pub async fn save_balances(conn: &mut SqliteConnection, vendor: &Vendor) -> DbResult<()> {
    debug!(id = vendor.id, payable = vendor.payable, "Saving vendor balances");

    let result = sqlx::query(
        "UPDATE vendors SET totalPurchases = ?2, lastPurchase = ?3, payable = ?4 WHERE id = ?1",
    )
    .bind(vendor.id)
    .bind(vendor.total_purchases)
    .bind(&vendor.last_purchase)
    .bind(vendor.payable)
    .execute(&mut *conn)
    .await?;

    require_affected(result.rows_affected(), "Vendor", vendor.id)
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    debug!(id, "Deleting vendor");
    let result = sqlx::query("DELETE FROM vendors WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    require_affected(result.rows_affected(), "Vendor", id)
}

/// Repository for vendor database operations.
#[derive(Debug, Clone)]
pub struct VendorRepository {
    store: Store,
}

impl VendorRepository {
    pub fn new(store: Store) -> Self {
        VendorRepository { store }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Vendor>> {
        self.store
            .enqueue(move |conn| Box::pin(async move { get(conn, id).await }))
            .await
    }

    pub async fn get_all(&self) -> DbResult<Vec<Vendor>> {
        self.store
            .enqueue(|conn| Box::pin(async move { list(conn).await }))
            .await
    }

    pub async fn add(&self, vendor: Vendor) -> DbResult<Vendor> {
        let input = vendor.clone();
        let id = self
            .store
            .enqueue(move |conn| {
                let vendor = input.clone();
                Box::pin(async move { insert(conn, &vendor).await })
            })
            .await?;

        let saved = Vendor { id, ..vendor };
        record_change(&self.store, "vendors", id, SyncAction::Insert, &saved).await;
        Ok(saved)
    }

    pub async fn update(&self, vendor: Vendor) -> DbResult<()> {
        let input = vendor;
        let saved = self
            .store
            .enqueue(move |conn| {
                let vendor = input.clone();
                Box::pin(async move {
                    update_details(&mut *conn, &vendor).await?;
                    get(conn, vendor.id)
                        .await?
                        .ok_or_else(|| DbError::not_found("Vendor", vendor.id))
                })
            })
            .await?;

        // Queue the stored row, whose balances come from the ledger.
        record_change(&self.store, "vendors", saved.id, SyncAction::Update, &saved).await;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> DbResult<()> {
        self.store
            .enqueue(move |conn| Box::pin(async move { delete(conn, id).await }))
            .await?;

        record_change(
            &self.store,
            "vendors",
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
    use crate::test_support::temp_store;

    #[tokio::test]
    async fn test_update_keeps_payable() {
        let (_dir, store) = temp_store().await;
        let repo = store.vendors();

        let vendor = repo
            .add(Vendor {
                name: "  Karachi Traders ".into(),
                phone: Some("021-3456789".into()),
                payable: 1_200.0,
                ..Vendor::default()
            })
            .await
            .unwrap();
        assert_eq!(repo.get(vendor.id).await.unwrap().unwrap().name, "Karachi Traders");

        repo.update(Vendor {
            company: Some("KT Wholesale".into()),
            payable: 0.0,
            ..vendor.clone()
        })
        .await
        .unwrap();

        let stored = repo.get(vendor.id).await.unwrap().unwrap();
        assert_eq!(stored.company.as_deref(), Some("KT Wholesale"));
        assert_eq!(stored.payable, 1_200.0);

        let queued = store.sync_outbox().get_pending_changes(100).await.unwrap();
        let update = queued.iter().rev().find(|c| c.action == SyncAction::Update).unwrap();
        assert_eq!(update.entity, "vendors");
        assert_eq!(update.payload["payable"], 1_200.0);
        assert_eq!(update.payload["company"], "KT Wholesale");

        repo.delete(vendor.id).await.unwrap();
        assert!(repo.get_all().await.unwrap().is_empty());
    }
}
