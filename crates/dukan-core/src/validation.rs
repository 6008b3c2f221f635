//! # Validation Module
//!
//! Input checks run before a ledger operation touches the database.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: UI collaborator        basic form checks                      │
//! │  Layer 2: THIS MODULE            amounts, quantities, required fields   │
//! │  Layer 3: SQLite                 NOT NULL, UNIQUE(phone), foreign keys  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, ValidationError};
use crate::ledger::EPSILON;
use crate::types::{Customer, Expenditure, LineItem, Product, ProductStock, Purchase, Sale, Vendor};
use crate::MAX_NAME_LENGTH;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a display name (product, customer, vendor).
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LENGTH,
        });
    }

    Ok(())
}

/// Validates a phone number: digits with optional leading `+`, spaces or dashes.
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    let phone = phone.trim();

    if phone.is_empty() {
        return Err(ValidationError::Required {
            field: "phone".to_string(),
        });
    }

    let body = phone.strip_prefix('+').unwrap_or(phone);
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
    {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "must contain only digits, spaces, dashes and a leading +".to_string(),
        });
    }

    Ok(())
}

/// Validates a monetary amount or stock level.
pub fn validate_amount(field: &str, value: f64) -> ValidationResult<()> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite {
            field: field.to_string(),
        });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a line quantity (must be > 0).
pub fn validate_quantity(field: &str, value: f64) -> ValidationResult<()> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite {
            field: field.to_string(),
        });
    }
    if value <= 0.0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn validate_lines(field: &str, lines: &[LineItem]) -> ValidationResult<()> {
    for line in lines {
        validate_quantity(&format!("{field}.quantity"), line.quantity)?;
        validate_amount(&format!("{field}.price"), line.price)?;
        validate_amount(&format!("{field}.costPrice"), line.cost_price)?;
    }
    Ok(())
}

// =============================================================================
// Entity Validators
// =============================================================================

pub fn validate_product(product: &Product) -> ValidationResult<()> {
    validate_name("name", &product.name)?;
    match &product.stock {
        ProductStock::Single(level) => {
            validate_amount("price", level.price)?;
            validate_amount("costPrice", level.cost_price)?;
            validate_amount("stock", level.stock)?;
            validate_amount("minStock", level.min_stock)?;
        }
        ProductStock::Variants { variants } => {
            for variant in variants {
                validate_name("variant.name", &variant.name)?;
                validate_amount("variant.price", variant.price)?;
                validate_amount("variant.costPrice", variant.cost_price)?;
                validate_amount("variant.stock", variant.stock)?;
                validate_amount("variant.minStock", variant.min_stock)?;
            }
        }
    }
    Ok(())
}

pub fn validate_customer(customer: &Customer) -> ValidationResult<()> {
    validate_name("name", &customer.name)?;
    validate_phone(&customer.phone)?;
    validate_amount("totalPurchases", customer.total_purchases)?;
    validate_amount("credit", customer.credit)?;
    validate_amount("dueAmount", customer.due_amount)?;
    Ok(())
}

pub fn validate_vendor(vendor: &Vendor) -> ValidationResult<()> {
    validate_name("name", &vendor.name)?;
    if let Some(phone) = vendor.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        validate_phone(phone)?;
    }
    validate_amount("totalPurchases", vendor.total_purchases)?;
    validate_amount("payable", vendor.payable)?;
    Ok(())
}

pub fn validate_expenditure(expenditure: &Expenditure) -> ValidationResult<()> {
    validate_name("category", &expenditure.category)?;
    validate_amount("amount", expenditure.amount)?;
    Ok(())
}

/// Validates a sale before completion.
///
/// ## Rules
/// - All amounts finite and non-negative
/// - Every cart line has a positive quantity
/// - Credit spent may not exceed the sale total
pub fn validate_sale(sale: &Sale) -> Result<(), CoreError> {
    validate_lines("cart", &sale.cart)?;
    for (field, value) in [
        ("subtotal", sale.subtotal),
        ("taxRate", sale.tax_rate),
        ("tax", sale.tax),
        ("total", sale.total),
        ("creditUsed", sale.credit_used),
        ("amountAfterCredit", sale.amount_after_credit),
        ("paidAmount", sale.paid_amount),
        ("changeAmount", sale.change_amount),
        ("remainingBalance", sale.remaining_balance),
    ] {
        validate_amount(field, value)?;
    }

    if sale.credit_used > sale.total + EPSILON {
        return Err(CoreError::CreditExceedsTotal {
            credit_used: sale.credit_used,
            total: sale.total,
        });
    }

    Ok(())
}

pub fn validate_purchase(purchase: &Purchase) -> ValidationResult<()> {
    validate_lines("items", &purchase.items)?;
    for (field, value) in [
        ("subtotal", purchase.subtotal),
        ("taxRate", purchase.tax_rate),
        ("tax", purchase.tax),
        ("total", purchase.total),
        ("paidAmount", purchase.paid_amount),
        ("remainingBalance", purchase.remaining_balance),
    ] {
        validate_amount(field, value)?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "Basmati Rice 5kg").is_ok());
        assert!(validate_name("name", "   ").is_err());
        assert!(validate_name("name", &"A".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("0300-1234567").is_ok());
        assert!(validate_phone("+92 300 1234567").is_ok());
        assert!(validate_phone("").is_err());
        assert!(validate_phone("call me").is_err());
    }

    #[test]
    fn test_validate_amount_and_quantity() {
        assert!(validate_amount("price", 0.0).is_ok());
        assert!(validate_amount("price", -0.5).is_err());
        assert!(validate_amount("price", f64::NAN).is_err());
        assert!(validate_quantity("qty", 0.25).is_ok());
        assert!(validate_quantity("qty", 0.0).is_err());
    }

    #[test]
    fn test_validate_sale_rejects_excess_credit() {
        let sale = Sale {
            total: 100.0,
            credit_used: 150.0,
            ..Sale::default()
        };
        assert!(matches!(
            validate_sale(&sale),
            Err(CoreError::CreditExceedsTotal { .. })
        ));
    }

    #[test]
    fn test_validate_sale_rejects_zero_quantity_line() {
        let sale = Sale {
            cart: vec![LineItem {
                product_id: 3,
                name: "Milk".into(),
                price: 200.0,
                quantity: 0.0,
                ..LineItem::default()
            }],
            total: 0.0,
            ..Sale::default()
        };
        assert!(matches!(validate_sale(&sale), Err(CoreError::Validation(_))));
    }
}
