//! # Error Types
//!
//! Domain-specific error types for dukan-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  dukan-core errors (this file)                                         │
//! │  ├── CoreError        - Ledger rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  dukan-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → UI collaborator         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Ledger rule violations.
///
/// Raised inside a unit of work these abort the transaction, so nothing
/// of the failed operation becomes visible.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sale spends more store credit than its total.
    #[error("Credit used ({credit_used}) exceeds sale total ({total})")]
    CreditExceedsTotal { credit_used: f64, total: f64 },

    /// A credit transaction of type `use` must come from a sale.
    #[error("Credit transaction of type 'use' requires a linked sale")]
    UnlinkedCreditUse,

    /// A `use` row belongs to its sale and goes away with it.
    #[error("Credit transaction belongs to sale {sale_id}; revise or delete the sale instead")]
    LinkedCreditUse { sale_id: i64 },

    /// A stored value that should be an enum label was not recognised.
    #[error("Unknown {kind}: '{value}'")]
    UnknownLabel { kind: &'static str, value: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Amount or quantity must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Quantity must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// NaN or infinity.
    #[error("{field} must be a finite number")]
    NotFinite { field: String },

    /// Invalid format (e.g. phone number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
