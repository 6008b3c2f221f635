//! # Ledger Arithmetic
//!
//! Pure balance and stock math shared by every ledger operation.
//!
//! ## Effects and Their Inverses
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Operation            apply                        reverse              │
//! │  ───────────────────  ───────────────────────────  ──────────────────── │
//! │  sale line            stock -= qty (floor 0)       stock += qty         │
//! │  sale → customer      totalPurchases += total      -= total (floor 0)   │
//! │                       credit -= creditUsed (fl 0)  credit += creditUsed │
//! │                       due += remaining             due -= rem (floor 0) │
//! │  purchase line        stock += qty                 stock -= qty (fl 0)  │
//! │  purchase → vendor    payable += remaining         -= remaining (fl 0)  │
//! │  credit add           credit += amount             credit -= (floor 0)  │
//! │  credit deduct/use    credit -= amount (floor 0)   credit += amount     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every floored subtraction reports how much it absorbed, so the caller can
//! log when a clamp hid an inconsistency instead of silently losing it.

use crate::types::{
    CreditTransactionType, Customer, Product, ProductStock, Purchase, Sale, Vendor,
};

/// Tolerance for comparing monetary and quantity values.
pub const EPSILON: f64 = 1e-9;

// =============================================================================
// Clamping
// =============================================================================

/// Amount swallowed by flooring a value at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Clamp {
    pub absorbed: f64,
}

impl Clamp {
    /// True if nothing was absorbed.
    pub fn is_clean(&self) -> bool {
        self.absorbed <= EPSILON
    }

    fn merge(self, other: Clamp) -> Clamp {
        Clamp {
            absorbed: self.absorbed + other.absorbed,
        }
    }
}

/// `value - amount`, floored at zero.
pub fn subtract_floored(value: f64, amount: f64) -> (f64, Clamp) {
    let raw = value - amount;
    if raw < 0.0 {
        (0.0, Clamp { absorbed: -raw })
    } else {
        (raw, Clamp::default())
    }
}

// =============================================================================
// Stock
// =============================================================================

/// Outcome of adjusting a product's stock for one line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StockAdjustment {
    Applied { before: f64, after: f64, clamp: Clamp },
    /// The product tracks variants and the line named none of them.
    VariantMissing { variant_id: Option<i64> },
}

impl Product {
    /// Adds `delta` to the authoritative stock record, flooring at zero.
    ///
    /// Products without variants ignore `variant_id`.
    pub fn adjust_stock(&mut self, variant_id: Option<i64>, delta: f64) -> StockAdjustment {
        let slot = match &mut self.stock {
            ProductStock::Single(level) => &mut level.stock,
            ProductStock::Variants { variants } => {
                match variant_id.and_then(|id| variants.iter_mut().find(|v| v.id == id)) {
                    Some(variant) => &mut variant.stock,
                    None => return StockAdjustment::VariantMissing { variant_id },
                }
            }
        };

        let before = *slot;
        let (after, clamp) = if delta < 0.0 {
            subtract_floored(before, -delta)
        } else {
            (before + delta, Clamp::default())
        };
        *slot = after;

        StockAdjustment::Applied {
            before,
            after,
            clamp,
        }
    }
}

// =============================================================================
// Customer Balances
// =============================================================================

/// The part of a sale that touches the customer ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleEffect {
    pub total: f64,
    pub credit_used: f64,
    pub remaining_balance: f64,
    pub date: String,
}

impl From<&Sale> for SaleEffect {
    fn from(sale: &Sale) -> Self {
        SaleEffect {
            total: sale.total,
            credit_used: sale.credit_used,
            remaining_balance: sale.remaining_balance,
            date: sale.date.clone(),
        }
    }
}

impl Customer {
    /// Applies a completed sale.
    pub fn apply_sale(&mut self, effect: &SaleEffect) -> Clamp {
        self.total_purchases += effect.total;
        self.last_purchase = Some(effect.date.clone());
        let (credit, clamp) = subtract_floored(self.credit, effect.credit_used);
        self.credit = credit;
        self.due_amount += effect.remaining_balance;
        clamp
    }

    /// Undoes [`Customer::apply_sale`]. `last_purchase` is left as is.
    pub fn reverse_sale(&mut self, effect: &SaleEffect) -> Clamp {
        let (total, total_clamp) = subtract_floored(self.total_purchases, effect.total);
        self.total_purchases = total;
        self.credit += effect.credit_used;
        let (due, due_clamp) = subtract_floored(self.due_amount, effect.remaining_balance);
        self.due_amount = due;
        total_clamp.merge(due_clamp)
    }

    /// Applies a credit ledger entry.
    pub fn apply_credit(&mut self, kind: CreditTransactionType, amount: f64) -> Clamp {
        match kind {
            CreditTransactionType::Add => {
                self.credit += amount;
                Clamp::default()
            }
            CreditTransactionType::Deduct | CreditTransactionType::Use => {
                let (credit, clamp) = subtract_floored(self.credit, amount);
                self.credit = credit;
                clamp
            }
        }
    }

    /// Undoes [`Customer::apply_credit`].
    pub fn reverse_credit(&mut self, kind: CreditTransactionType, amount: f64) -> Clamp {
        match kind {
            CreditTransactionType::Add => {
                let (credit, clamp) = subtract_floored(self.credit, amount);
                self.credit = credit;
                clamp
            }
            CreditTransactionType::Deduct | CreditTransactionType::Use => {
                self.credit += amount;
                Clamp::default()
            }
        }
    }
}

// =============================================================================
// Vendor Balances
// =============================================================================

impl Vendor {
    pub fn apply_purchase(&mut self, purchase: &Purchase) {
        self.total_purchases += purchase.total;
        self.last_purchase = Some(purchase.date.clone());
        self.payable += purchase.remaining_balance;
    }

    pub fn reverse_purchase(&mut self, purchase: &Purchase) -> Clamp {
        let (total, total_clamp) = subtract_floored(self.total_purchases, purchase.total);
        self.total_purchases = total;
        let (payable, payable_clamp) = subtract_floored(self.payable, purchase.remaining_balance);
        self.payable = payable;
        total_clamp.merge(payable_clamp)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StockLevel, Variant};

    fn customer(credit: f64, due: f64) -> Customer {
        Customer {
            id: 1,
            name: "Sana".into(),
            phone: "03001234567".into(),
            credit,
            due_amount: due,
            ..Customer::default()
        }
    }

    fn effect(total: f64, credit_used: f64, remaining: f64) -> SaleEffect {
        SaleEffect {
            total,
            credit_used,
            remaining_balance: remaining,
            date: "2026-10-19".into(),
        }
    }

    #[test]
    fn test_credit_sale_scenario() {
        let mut c = customer(500.0, 0.0);
        let clamp = c.apply_sale(&effect(1200.0, 500.0, 700.0));

        assert!(clamp.is_clean());
        assert_eq!(c.credit, 0.0);
        assert_eq!(c.due_amount, 700.0);
        assert_eq!(c.total_purchases, 1200.0);
        assert_eq!(c.last_purchase.as_deref(), Some("2026-10-19"));
    }

    #[test]
    fn test_reverse_sale_is_inverse() {
        let mut c = customer(300.0, 50.0);
        c.total_purchases = 1000.0;
        let before = c.clone();
        let e = effect(400.0, 100.0, 150.0);

        c.apply_sale(&e);
        let clamp = c.reverse_sale(&e);

        assert!(clamp.is_clean());
        assert!((c.credit - before.credit).abs() < EPSILON);
        assert!((c.due_amount - before.due_amount).abs() < EPSILON);
        assert!((c.total_purchases - before.total_purchases).abs() < EPSILON);
    }

    #[test]
    fn test_overspent_credit_is_clamped_and_reported() {
        let mut c = customer(100.0, 0.0);
        let clamp = c.apply_sale(&effect(500.0, 150.0, 0.0));
        assert_eq!(c.credit, 0.0);
        assert!((clamp.absorbed - 50.0).abs() < EPSILON);
    }

    #[test]
    fn test_reverse_sale_floors_due() {
        let mut c = customer(0.0, 100.0);
        let clamp = c.reverse_sale(&effect(0.0, 0.0, 300.0));
        assert_eq!(c.due_amount, 0.0);
        assert!((clamp.absorbed - 200.0).abs() < EPSILON);
    }

    #[test]
    fn test_credit_entries_and_reversal() {
        let mut c = customer(0.0, 0.0);
        c.apply_credit(CreditTransactionType::Add, 250.0);
        assert_eq!(c.credit, 250.0);

        c.apply_credit(CreditTransactionType::Deduct, 100.0);
        assert_eq!(c.credit, 150.0);

        c.reverse_credit(CreditTransactionType::Deduct, 100.0);
        assert_eq!(c.credit, 250.0);

        let clamp = c.reverse_credit(CreditTransactionType::Add, 400.0);
        assert_eq!(c.credit, 0.0);
        assert!(!clamp.is_clean());
    }

    #[test]
    fn test_single_stock_adjustment_floors_at_zero() {
        let mut p = Product {
            id: 1,
            name: "Soap".into(),
            category: None,
            stock: ProductStock::Single(StockLevel {
                stock: 2.0,
                ..StockLevel::default()
            }),
        };

        match p.adjust_stock(None, -3.0) {
            StockAdjustment::Applied { before, after, clamp } => {
                assert_eq!(before, 2.0);
                assert_eq!(after, 0.0);
                assert!((clamp.absorbed - 1.0).abs() < EPSILON);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(p.total_stock(), 0.0);
    }

    #[test]
    fn test_variant_stock_adjustment() {
        let mut p = Product {
            id: 2,
            name: "Shoe".into(),
            category: None,
            stock: ProductStock::Variants {
                variants: vec![Variant {
                    id: 5,
                    name: "42".into(),
                    stock: 6.0,
                    ..Variant::default()
                }],
            },
        };

        assert!(matches!(
            p.adjust_stock(Some(5), -2.0),
            StockAdjustment::Applied { after, .. } if after == 4.0
        ));
        assert_eq!(
            p.adjust_stock(None, -1.0),
            StockAdjustment::VariantMissing { variant_id: None }
        );
        assert_eq!(
            p.adjust_stock(Some(9), 1.0),
            StockAdjustment::VariantMissing { variant_id: Some(9) }
        );
        assert_eq!(p.total_stock(), 4.0);
    }

    #[test]
    fn test_vendor_purchase_roundtrip() {
        let mut v = Vendor {
            id: 1,
            name: "Wholesale Co".into(),
            payable: 100.0,
            ..Vendor::default()
        };
        let purchase = Purchase {
            total: 900.0,
            remaining_balance: 400.0,
            date: "2026-10-18".into(),
            ..Purchase::default()
        };

        v.apply_purchase(&purchase);
        assert_eq!(v.payable, 500.0);
        assert_eq!(v.total_purchases, 900.0);

        assert!(v.reverse_purchase(&purchase).is_clean());
        assert_eq!(v.payable, 100.0);
        assert_eq!(v.total_purchases, 0.0);
    }
}
