//! # Customer Repository
//!
//! Customers and their balances. Balances (`credit`, `dueAmount`,
//! `totalPurchases`, `lastPurchase`) are owned by the ledger operations;
//! [`CustomerRepository::update`] leaves them untouched.

use dukan_core::validation::validate_customer;
use dukan_core::{Customer, SyncAction};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::require_affected;
use crate::repository::sync::record_change;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct CustomerRow {
    id: i64,
    name: String,
    phone: String,
    email: Option<String>,
    note: Option<String>,
    image_uri: Option<String>,
    total_purchases: f64,
    last_purchase: Option<String>,
    credit: f64,
    due_amount: f64,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            note: row.note,
            image_uri: row.image_uri,
            total_purchases: row.total_purchases,
            last_purchase: row.last_purchase,
            credit: row.credit,
            due_amount: row.due_amount,
        }
    }
}

const SELECT: &str = "SELECT id, name, phone, email, note, imageUri, totalPurchases, \
                      lastPurchase, credit, dueAmount FROM customers";

fn phone_conflict(err: DbError, phone: &str) -> DbError {
    match err {
        DbError::UniqueViolation { .. } => DbError::duplicate("phone", phone),
        other => other,
    }
}

// =============================================================================
// Step Functions
// =============================================================================

pub async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Customer>> {
    let row: Option<CustomerRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Customer::from))
}

pub async fn get_by_phone(conn: &mut SqliteConnection, phone: &str) -> DbResult<Option<Customer>> {
    let row: Option<CustomerRow> = sqlx::query_as(&format!("{SELECT} WHERE phone = ?1"))
        .bind(phone.trim())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Customer::from))
}

pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<Customer>> {
    let rows: Vec<CustomerRow> = sqlx::query_as(&format!("{SELECT} ORDER BY name COLLATE NOCASE"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Customer::from).collect())
}

/// Inserts a customer with its opening balances. Returns the new id.
pub async fn insert(conn: &mut SqliteConnection, customer: &Customer) -> DbResult<i64> {
    validate_customer(customer)?;
    debug!(name = %customer.name, "Inserting customer");

    let result = sqlx::query(
        r#"
        INSERT INTO customers (
            name, phone, email, note, imageUri,
            totalPurchases, lastPurchase, credit, dueAmount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(customer.name.trim())
    .bind(customer.phone.trim())
    .bind(&customer.email)
    .bind(&customer.note)
    .bind(&customer.image_uri)
    .bind(customer.total_purchases)
    .bind(&customer.last_purchase)
    .bind(customer.credit)
    .bind(customer.due_amount)
    .execute(&mut *conn)
    .await
    .map_err(|e| phone_conflict(e.into(), &customer.phone))?;

    Ok(result.last_insert_rowid())
}

/// Updates contact details only.
pub async fn update_details(conn: &mut SqliteConnection, customer: &Customer) -> DbResult<()> {
    validate_customer(customer)?;
    debug!(id = customer.id, "Updating customer details");

    let result = sqlx::query(
        r#"
        UPDATE customers SET
            name = ?2, phone = ?3, email = ?4, note = ?5, imageUri = ?6
        WHERE id = ?1
        "#,
    )
    .bind(customer.id)
    .bind(customer.name.trim())
    .bind(customer.phone.trim())
    .bind(&customer.email)
    .bind(&customer.note)
    .bind(&customer.image_uri)
    .execute(&mut *conn)
    .await
    .map_err(|e| phone_conflict(e.into(), &customer.phone))?;

    require_affected(result.rows_affected(), "Customer", customer.id)
}

/// Writes the ledger-owned balance fields.
pub async fn save_balances(conn: &mut SqliteConnection, customer: &Customer) -> DbResult<()> {
    debug!(
        id = customer.id,
        credit = customer.credit,
        due_amount = customer.due_amount,
        "Saving customer balances"
    );

    let result = sqlx::query(
        r#"
        UPDATE customers SET
            totalPurchases = ?2, lastPurchase = ?3, credit = ?4, dueAmount = ?5
        WHERE id = ?1
        "#,
    )
    .bind(customer.id)
    .bind(customer.total_purchases)
    .bind(&customer.last_purchase)
    .bind(customer.credit)
    .bind(customer.due_amount)
    .execute(&mut *conn)
    .await?;

    require_affected(result.rows_affected(), "Customer", customer.id)
}

/// Deletes a customer. Fails with a foreign key violation while credit
/// transactions still reference it.
pub async fn delete(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    debug!(id, "Deleting customer");
    let result = sqlx::query("DELETE FROM customers WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    require_affected(result.rows_affected(), "Customer", id)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    store: Store,
}

impl CustomerRepository {
    pub fn new(store: Store) -> Self {
        CustomerRepository { store }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Customer>> {
        self.store
            .enqueue(move |conn| Box::pin(async move { get(conn, id).await }))
            .await
    }

    pub async fn get_by_phone(&self, phone: &str) -> DbResult<Option<Customer>> {
        let phone = phone.to_string();
        self.store
            .enqueue(move |conn| {
                let phone = phone.clone();
                Box::pin(async move { get_by_phone(conn, &phone).await })
            })
            .await
    }

    pub async fn get_all(&self) -> DbResult<Vec<Customer>> {
        self.store
            .enqueue(|conn| Box::pin(async move { list(conn).await }))
            .await
    }

    /// Customers with an outstanding receivable.
    pub async fn with_dues(&self) -> DbResult<Vec<Customer>> {
        let all = self.get_all().await?;
        Ok(all.into_iter().filter(|c| c.due_amount > 0.0).collect())
    }

    /// Adds a customer. A duplicate phone fails with
    /// [`DbError::UniqueViolation`].
    pub async fn add(&self, customer: Customer) -> DbResult<Customer> {
        let input = customer.clone();
        let id = self
            .store
            .enqueue(move |conn| {
                let customer = input.clone();
                Box::pin(async move { insert(conn, &customer).await })
            })
            .await?;

        let saved = Customer { id, ..customer };
        record_change(&self.store, "customers", id, SyncAction::Insert, &saved).await;
        Ok(saved)
    }

    /// Updates contact details. Balances are only changed by sales and
    /// credit transactions.
    pub async fn update(&self, customer: Customer) -> DbResult<()> {
        let input = customer;
        let saved = self
            .store
            .enqueue(move |conn| {
                let customer = input.clone();
                Box::pin(async move {
                    update_details(&mut *conn, &customer).await?;
                    get(conn, customer.id)
                        .await?
                        .ok_or_else(|| DbError::not_found("Customer", customer.id))
                })
            })
            .await?;

        // Queue the stored row, whose balances come from the ledger.
        record_change(&self.store, "customers", saved.id, SyncAction::Update, &saved).await;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> DbResult<()> {
        self.store
            .enqueue(move |conn| Box::pin(async move { delete(conn, id).await }))
            .await?;

        record_change(
            &self.store,
            "customers",
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
    use crate::test_support::{customer, temp_store};

    #[tokio::test]
    async fn test_duplicate_phone_is_rejected() {
        let (_dir, store) = temp_store().await;
        store.customers().add(customer("Ali", "0300-1111111", 0.0)).await.unwrap();

        let err = store
            .customers()
            .add(customer("Ali Raza", "0300-1111111", 0.0))
            .await
            .unwrap_err();

        match err {
            DbError::UniqueViolation { field, value } => {
                assert_eq!(field, "phone");
                assert_eq!(value, "0300-1111111");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_keeps_balances() {
        let (_dir, store) = temp_store().await;
        let mut saved = store
            .customers()
            .add(customer("Hina", "0311-2222222", 300.0))
            .await
            .unwrap();

        saved.name = "Hina Khan".into();
        saved.credit = 0.0;
        store.customers().update(saved.clone()).await.unwrap();

        let loaded = store.customers().get(saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Hina Khan");
        assert_eq!(loaded.credit, 300.0);
        assert_eq!(
            store.customers().get_by_phone("0311-2222222").await.unwrap().map(|c| c.id),
            Some(saved.id)
        );
    }

    #[tokio::test]
    async fn test_update_queues_stored_balances() {
        let (_dir, store) = temp_store().await;
        let saved = store
            .customers()
            .add(customer("Bilal", "0321-3333333", 500.0))
            .await
            .unwrap();

        store
            .customers()
            .update(Customer { note: Some("Pays on Fridays".into()), credit: 0.0, ..saved.clone() })
            .await
            .unwrap();

        let last = store.sync_outbox().get_pending_changes(100).await.unwrap().pop().unwrap();
        assert_eq!(last.entity, "customers");
        assert_eq!(last.action, SyncAction::Update);
        assert_eq!(last.payload["credit"], 500.0);
        assert_eq!(last.payload["note"], "Pays on Fridays");
    }
}
