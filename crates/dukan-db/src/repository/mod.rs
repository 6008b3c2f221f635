//! # Repository Module
//!
//! Per-entity database access.
//!
//! ## Two Entry Points
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Standalone vs. Step                                  │
//! │                                                                         │
//! │  Collaborator                                                          │
//! │       │                                                                 │
//! │       │  store.customers().add(customer)        ← standalone method    │
//! │       ▼                                                                 │
//! │  CustomerRepository  (holds a Store clone)                             │
//! │  ├── takes its own FIFO slot (store.enqueue / run_in_transaction)      │
//! │  └── records a sync change after commit (best-effort)                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  customer::insert(conn, &customer)              ← step function        │
//! │  ├── takes the connection explicitly                                   │
//! │  ├── never enqueues, never commits                                     │
//! │  └── composable inside ledger::complete_sale and friends               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite                                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`] - Products, variants, low stock
//! - [`CustomerRepository`] / [`VendorRepository`] - Parties and balances
//! - [`SaleRepository`] / [`PurchaseRepository`] - Ledger-consistent writes
//! - [`CreditRepository`] - Customer credit ledger
//! - [`ExpenditureRepository`] - Shop expenses
//! - [`SettingsRepository`] - Key → JSON settings
//! - [`SyncOutboxRepository`] - Sync queue management
//! - [`PrinterRepository`] - Printer profiles and print job queue
//! - [`BackupLogRepository`] - Produced backup files
//!
//! [`ProductRepository`]: product::ProductRepository
//! [`CustomerRepository`]: customer::CustomerRepository
//! [`VendorRepository`]: vendor::VendorRepository
//! [`SaleRepository`]: sale::SaleRepository
//! [`PurchaseRepository`]: purchase::PurchaseRepository
//! [`CreditRepository`]: credit::CreditRepository
//! [`ExpenditureRepository`]: expenditure::ExpenditureRepository
//! [`SettingsRepository`]: settings::SettingsRepository
//! [`SyncOutboxRepository`]: sync::SyncOutboxRepository
//! [`PrinterRepository`]: printer::PrinterRepository
//! [`BackupLogRepository`]: backup_log::BackupLogRepository

pub mod backup_log;
pub mod credit;
pub mod customer;
pub mod expenditure;
pub mod printer;
pub mod product;
pub mod purchase;
pub mod sale;
pub mod settings;
pub mod sync;
pub mod vendor;

use crate::error::DbError;

/// Turns "0 rows affected" into a NotFound error.
pub(crate) fn require_affected(rows: u64, entity: &str, id: impl ToString) -> Result<(), DbError> {
    if rows == 0 {
        Err(DbError::not_found(entity, id))
    } else {
        Ok(())
    }
}
