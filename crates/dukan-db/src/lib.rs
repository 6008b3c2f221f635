//! # dukan-db: Local Store for Dukan
//!
//! Everything that touches the shop's SQLite file: one connection, one
//! operation queue, units of work, ledger operations, backups and the sync
//! outbox.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Dukan Data Flow                                 │
//! │                                                                         │
//! │  UI shell (checkout screen)                                            │
//! │       │  store.sales().complete(sale)                                  │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     dukan-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   │   │
//! │  │   │ Repositories │──►│    Store     │──►│ ConnectionManager│   │   │
//! │  │   │ + ledger ops │   │ FIFO + retry │   │ + schema         │   │   │
//! │  │   └──────────────┘   └──────────────┘   └──────────────────┘   │   │
//! │  │          │                                                      │   │
//! │  │          └── after commit: sync outbox row (best-effort)        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  <data_dir>/dukan.db   (WAL)      <data_dir>/backups/*.db       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Store configuration (TOML + environment)
//! - [`connection`] - The single SQLite handle and its reopen logic
//! - [`store`] - The shared handle, FIFO serializer, repositories
//! - [`retry`] - Reconnect-and-retry policy
//! - [`transaction`] - `BEGIN IMMEDIATE` units of work
//! - [`ledger`] - Sale, credit and purchase operations
//! - [`backup`] - Backup, restore, backup listing
//! - [`repository`] - Per-entity access
//! - [`schema`] - Tables and additive migrations
//! - [`json`] - JSON column encoding with lenient decoding
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dukan_db::{Store, StoreConfig};
//!
//! dukan_db::init_tracing();
//! let store = Store::open(StoreConfig::load(None)?).await?;
//!
//! let id = store.sales().complete(sale).await?;
//! let report = store.create_backup().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backup;
pub mod config;
pub mod connection;
pub mod error;
pub mod json;
pub mod ledger;
pub mod repository;
pub mod retry;
pub mod schema;
pub mod store;
pub mod transaction;

// =============================================================================
// Re-exports
// =============================================================================

pub use backup::{BackupFile, BackupReport, BackupStep, NonFatalError, RestoreReport};
pub use config::StoreConfig;
pub use error::{DbError, DbResult};
pub use retry::RetryPolicy;
pub use store::Store;

// Repository re-exports for convenience
pub use repository::backup_log::BackupLogRepository;
pub use repository::credit::CreditRepository;
pub use repository::customer::CustomerRepository;
pub use repository::expenditure::ExpenditureRepository;
pub use repository::printer::PrinterRepository;
pub use repository::product::ProductRepository;
pub use repository::purchase::PurchaseRepository;
pub use repository::sale::SaleRepository;
pub use repository::settings::SettingsRepository;
pub use repository::sync::SyncOutboxRepository;
pub use repository::vendor::VendorRepository;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs the `tracing` subscriber used by binaries and shells.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=dukan_db=trace` - Include serializer slot tracing
/// - Default: `info,dukan=debug,sqlx=warn`
///
/// Calling it twice is harmless; the second call is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dukan=debug,sqlx=warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .try_init();
}

#[cfg(test)]
pub(crate) mod test_support {
    use dukan_core::{
        CreditTransaction, CreditTransactionType, Customer, LineItem, PartyRef, Product,
        ProductStock, Purchase, Sale, SaleStatus, StockLevel, Variant, Vendor,
    };
    use tempfile::TempDir;

    use crate::{Store, StoreConfig};

    /// A fresh file-backed store. Keep the `TempDir` alive for the test.
    pub async fn temp_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::new(dir.path())).await.unwrap();
        (dir, store)
    }

    pub fn single_product(name: &str, stock: f64) -> Product {
        Product {
            id: 0,
            name: name.into(),
            category: Some("Grocery".into()),
            stock: ProductStock::Single(StockLevel {
                price: 100.0,
                cost_price: 80.0,
                stock,
                min_stock: 2.0,
                barcode: None,
                unit: Some("pcs".into()),
            }),
        }
    }

    pub fn variant_product(name: &str, variants: &[(i64, &str, f64)]) -> Product {
        Product {
            id: 0,
            name: name.into(),
            category: Some("Apparel".into()),
            stock: ProductStock::Variants {
                variants: variants
                    .iter()
                    .map(|(id, variant, stock)| Variant {
                        id: *id,
                        name: (*variant).into(),
                        price: 1500.0,
                        cost_price: 1100.0,
                        stock: *stock,
                        min_stock: 1.0,
                        ..Variant::default()
                    })
                    .collect(),
            },
        }
    }

    pub fn customer(name: &str, phone: &str, credit: f64) -> Customer {
        Customer {
            name: name.into(),
            phone: phone.into(),
            credit,
            ..Customer::default()
        }
    }

    pub fn credit_tx(c: &Customer, kind: CreditTransactionType, amount: f64) -> CreditTransaction {
        CreditTransaction {
            id: 0,
            customer_id: c.id,
            customer_name: c.name.clone(),
            customer_phone: Some(c.phone.clone()),
            amount,
            kind,
            date: "2026-10-19".into(),
            time: "11:30".into(),
            description: None,
            linked_sale_id: None,
        }
    }

    pub fn line(product: &Product, quantity: f64, price: f64) -> LineItem {
        LineItem {
            product_id: product.id,
            variant_id: None,
            name: product.name.clone(),
            variant_name: None,
            price,
            cost_price: 0.0,
            quantity,
        }
    }

    /// A sale of `total`; whatever credit and cash do not cover stays due.
    pub fn sale_for(
        buyer: Option<&Customer>,
        cart: Vec<LineItem>,
        total: f64,
        credit_used: f64,
        paid: f64,
    ) -> Sale {
        let remaining = (total - credit_used - paid).max(0.0);
        Sale {
            customer: buyer.map(|c| PartyRef::Registered {
                id: c.id,
                name: c.name.clone(),
                phone: Some(c.phone.clone()),
            }),
            cart,
            subtotal: total,
            total,
            credit_used,
            amount_after_credit: total - credit_used,
            paid_amount: paid,
            remaining_balance: remaining,
            payment_method: "Cash".into(),
            date: "2026-10-19".into(),
            time: "12:00".into(),
            status: SaleStatus::from_amounts(paid, remaining),
            ..Sale::default()
        }
    }

    pub fn purchase_from(v: &Vendor, items: Vec<LineItem>, total: f64, paid: f64) -> Purchase {
        let remaining = (total - paid).max(0.0);
        Purchase {
            vendor: Some(PartyRef::Registered {
                id: v.id,
                name: v.name.clone(),
                phone: v.phone.clone(),
            }),
            items,
            subtotal: total,
            total,
            paid_amount: paid,
            remaining_balance: remaining,
            payment_method: "Cash".into(),
            date: "2026-10-19".into(),
            time: "10:00".into(),
            status: SaleStatus::from_amounts(paid, remaining),
            ..Purchase::default()
        }
    }
}
