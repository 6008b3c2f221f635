//! # dukan-core: Pure Ledger Logic for Dukan
//!
//! Entity types and the arithmetic that keeps stock and customer/vendor
//! balances consistent. No I/O lives here; `dukan-db` runs this logic inside
//! database transactions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UI collaborator (mobile / desktop shell)                               │
//! │        │ plain data objects (Sale, Product, ...)                        │
//! │        ▼                                                                │
//! │  dukan-db ── Store ── ledger operations ── units of work               │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ★ dukan-core (THIS CRATE) ★                                            │
//! │     types       entities and JSON column shapes                        │
//! │     ledger      stock / credit / due arithmetic with clamp reporting   │
//! │     validation  amount, quantity and field checks                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```rust
//! use dukan_core::{Customer, ledger::SaleEffect};
//!
//! let mut customer = Customer { credit: 500.0, ..Customer::default() };
//! let effect = SaleEffect {
//!     total: 1200.0,
//!     credit_used: 500.0,
//!     remaining_balance: 700.0,
//!     date: "2026-10-19".into(),
//! };
//! customer.apply_sale(&effect);
//! assert_eq!(customer.credit, 0.0);
//! assert_eq!(customer.due_amount, 700.0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Product id used by the UI for ad-hoc cart lines ("extra amount").
///
/// Any non-positive product id is treated the same way: the line counts
/// toward the sale but never touches stock.
pub const CUSTOM_ITEM_PRODUCT_ID: i64 = -1;

/// Longest accepted display name.
pub const MAX_NAME_LENGTH: usize = 200;
