//! # Product Repository
//!
//! Database operations for products.
//!
//! ## Stock Storage
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  hasVariants = 0                     hasVariants = 1                    │
//! │  ────────────────                    ────────────────                   │
//! │  price, costPrice, stock,            variants = JSON [                  │
//! │  minStock, barcode, unit               { id, name, attributes,          │
//! │  columns are authoritative               price, stock, minStock, ... }  │
//! │                                      ]  (own stock columns ignored)     │
//! │  variants = NULL                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use dukan_core::validation::validate_product;
use dukan_core::{Product, ProductStock, StockLevel, SyncAction};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use crate::json::{self, ColumnRef};
use crate::repository::require_affected;
use crate::repository::sync::record_change;
use crate::store::Store;

#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct ProductRow {
    id: i64,
    name: String,
    category: Option<String>,
    has_variants: bool,
    variants: Option<String>,
    price: f64,
    cost_price: f64,
    stock: f64,
    min_stock: f64,
    barcode: Option<String>,
    unit: Option<String>,
}

impl ProductRow {
    fn into_product(self) -> Product {
        let stock = if self.has_variants {
            let at = ColumnRef {
                table: "products",
                row: self.id,
                column: "variants",
            };
            ProductStock::Variants {
                variants: json::decode_or_warn(at, self.variants.as_deref()),
            }
        } else {
            ProductStock::Single(StockLevel {
                price: self.price,
                cost_price: self.cost_price,
                stock: self.stock,
                min_stock: self.min_stock,
                barcode: self.barcode,
                unit: self.unit,
            })
        };

        Product {
            id: self.id,
            name: self.name,
            category: self.category,
            stock,
        }
    }
}

const SELECT: &str = "SELECT id, name, category, hasVariants, variants, price, costPrice, \
                      stock, minStock, barcode, unit FROM products";

/// Column values for the stock part of a product.
struct StockColumns<'a> {
    has_variants: bool,
    variants: Option<String>,
    level: Option<&'a StockLevel>,
}

fn stock_columns(product: &Product) -> DbResult<StockColumns<'_>> {
    Ok(match &product.stock {
        ProductStock::Single(level) => StockColumns {
            has_variants: false,
            variants: None,
            level: Some(level),
        },
        ProductStock::Variants { variants } => StockColumns {
            has_variants: true,
            variants: Some(json::encode(variants)?),
            level: None,
        },
    })
}

// =============================================================================
// Step Functions
// =============================================================================

pub async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Product>> {
    let row: Option<ProductRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(ProductRow::into_product))
}

pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<Product>> {
    let rows: Vec<ProductRow> = sqlx::query_as(&format!("{SELECT} ORDER BY name COLLATE NOCASE"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(ProductRow::into_product).collect())
}

/// Inserts a product, ignoring `product.id`. Returns the new id.
pub async fn insert(conn: &mut SqliteConnection, product: &Product) -> DbResult<i64> {
    validate_product(product)?;
    let cols = stock_columns(product)?;
    let level = cols.level.cloned().unwrap_or_default();

    debug!(name = %product.name, has_variants = cols.has_variants, "Inserting product");

    let result = sqlx::query(
        r#"
        INSERT INTO products (
            name, category, hasVariants, variants,
            price, costPrice, stock, minStock, barcode, unit
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&product.name)
    .bind(&product.category)
    .bind(cols.has_variants)
    .bind(&cols.variants)
    .bind(level.price)
    .bind(level.cost_price)
    .bind(level.stock)
    .bind(level.min_stock)
    .bind(&level.barcode)
    .bind(&level.unit)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Replaces every column of an existing product.
pub async fn update(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
    validate_product(product)?;
    let cols = stock_columns(product)?;
    let level = cols.level.cloned().unwrap_or_default();

    debug!(id = product.id, name = %product.name, "Updating product");

    let result = sqlx::query(
        r#"
        UPDATE products SET
            name = ?2, category = ?3, hasVariants = ?4, variants = ?5,
            price = ?6, costPrice = ?7, stock = ?8, minStock = ?9,
            barcode = ?10, unit = ?11
        WHERE id = ?1
        "#,
    )
    .bind(product.id)
    .bind(&product.name)
    .bind(&product.category)
    .bind(cols.has_variants)
    .bind(&cols.variants)
    .bind(level.price)
    .bind(level.cost_price)
    .bind(level.stock)
    .bind(level.min_stock)
    .bind(&level.barcode)
    .bind(&level.unit)
    .execute(&mut *conn)
    .await?;

    require_affected(result.rows_affected(), "Product", product.id)
}

/// Writes back only the authoritative stock record of `product`.
pub async fn save_stock(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
    let result = match &product.stock {
        ProductStock::Single(level) => {
            sqlx::query("UPDATE products SET stock = ?2 WHERE id = ?1")
                .bind(product.id)
                .bind(level.stock)
                .execute(&mut *conn)
                .await?
        }
        ProductStock::Variants { variants } => {
            sqlx::query("UPDATE products SET variants = ?2 WHERE id = ?1")
                .bind(product.id)
                .bind(json::encode(variants)?)
                .execute(&mut *conn)
                .await?
        }
    };
    require_affected(result.rows_affected(), "Product", product.id)
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    debug!(id, "Deleting product");
    let result = sqlx::query("DELETE FROM products WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    require_affected(result.rows_affected(), "Product", id)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = store.products();
/// let id = repo.add(product).await?;
/// let low = repo.low_stock().await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    store: Store,
}

impl ProductRepository {
    pub fn new(store: Store) -> Self {
        ProductRepository { store }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Product>> {
        self.store
            .enqueue(move |conn| Box::pin(async move { get(conn, id).await }))
            .await
    }

    /// All products, by name.
    pub async fn get_all(&self) -> DbResult<Vec<Product>> {
        self.store
            .enqueue(|conn| Box::pin(async move { list(conn).await }))
            .await
    }

    /// Products where the stock (or any variant's stock) is at or below
    /// its minimum.
    pub async fn low_stock(&self) -> DbResult<Vec<Product>> {
        let all = self.get_all().await?;
        Ok(all.into_iter().filter(Product::is_low_stock).collect())
    }

    /// Adds a product. Returns it with its new id.
    pub async fn add(&self, product: Product) -> DbResult<Product> {
        let input = product.clone();
        let id = self
            .store
            .enqueue(move |conn| {
                let product = input.clone();
                Box::pin(async move { insert(conn, &product).await })
            })
            .await?;

        let saved = Product { id, ..product };
        record_change(&self.store, "products", id, SyncAction::Insert, &saved).await;
        Ok(saved)
    }

    pub async fn update(&self, product: Product) -> DbResult<()> {
        let input = product.clone();
        self.store
            .enqueue(move |conn| {
                let product = input.clone();
                Box::pin(async move { update(conn, &product).await })
            })
            .await?;

        record_change(&self.store, "products", product.id, SyncAction::Update, &product).await;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> DbResult<()> {
        self.store
            .enqueue(move |conn| Box::pin(async move { delete(conn, id).await }))
            .await?;

        record_change(
            &self.store,
            "products",
            id,
            SyncAction::Delete,
            &serde_json::json!({ "id": id }),
        )
        .await;
        Ok(())
    }
}
