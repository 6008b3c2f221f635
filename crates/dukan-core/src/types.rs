//! # Domain Types
//!
//! Entities persisted by the store.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │    Customer     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  id             │   │  id             │       │
//! │  │  ProductStock   │◄──│  cart: [Line]   │──►│  credit         │       │
//! │  │   Single | Vars │   │  creditUsed     │   │  dueAmount      │       │
//! │  └─────────────────┘   │  remaining      │   └────────┬────────┘       │
//! │          ▲             └────────┬────────┘            │                │
//! │          │                      │ linkedSaleId        │ customerId     │
//! │  ┌───────┴─────────┐   ┌────────▼────────────────────▼──┐              │
//! │  │    Purchase     │   │      CreditTransaction          │              │
//! │  │  items: [Line]  │   │  add | deduct | use             │              │
//! │  │  → Vendor       │   └─────────────────────────────────┘              │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Ledger entities use the store-assigned integer row id. The `id` field of a
//! value passed to an insert is ignored; the insert returns the new id.
//! Operational records (outbox, print jobs, backup logs) use UUID strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::CUSTOM_ITEM_PRODUCT_ID;

// =============================================================================
// Product
// =============================================================================

/// Descriptive attributes of a variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase", default)]
pub struct VariantAttributes {
    pub size: Option<String>,
    pub color: Option<String>,
    pub material: Option<String>,
    /// Free-form attribute, e.g. label "Flavour", value "Mint".
    pub custom_label: Option<String>,
    pub custom_value: Option<String>,
}

/// One sellable variant of a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase", default)]
pub struct Variant {
    /// Unique within the parent product.
    pub id: i64,
    pub name: String,
    pub attributes: VariantAttributes,
    pub price: f64,
    pub cost_price: f64,
    pub stock: f64,
    pub min_stock: f64,
    pub barcode: Option<String>,
    pub unit: Option<String>,
}

/// Stock fields of a product without variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase", default)]
pub struct StockLevel {
    pub price: f64,
    pub cost_price: f64,
    pub stock: f64,
    pub min_stock: f64,
    pub barcode: Option<String>,
    pub unit: Option<String>,
}

/// Which stock record is authoritative for a product.
///
/// A product either tracks stock itself or through its variants, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProductStock {
    Single(StockLevel),
    Variants { variants: Vec<Variant> },
}

impl Default for ProductStock {
    fn default() -> Self {
        ProductStock::Single(StockLevel::default())
    }
}

/// A catalog product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub stock: ProductStock,
}

impl Product {
    /// Returns true when stock lives on the variants.
    pub fn has_variants(&self) -> bool {
        matches!(self.stock, ProductStock::Variants { .. })
    }

    /// Looks up a variant by id.
    pub fn variant(&self, variant_id: i64) -> Option<&Variant> {
        match &self.stock {
            ProductStock::Variants { variants } => variants.iter().find(|v| v.id == variant_id),
            ProductStock::Single(_) => None,
        }
    }

    /// Total units on hand across the authoritative stock record.
    pub fn total_stock(&self) -> f64 {
        match &self.stock {
            ProductStock::Single(level) => level.stock,
            ProductStock::Variants { variants } => variants.iter().map(|v| v.stock).sum(),
        }
    }

    /// True if the product (or any of its variants) is at or below its minimum.
    pub fn is_low_stock(&self) -> bool {
        match &self.stock {
            ProductStock::Single(level) => level.stock <= level.min_stock,
            ProductStock::Variants { variants } => {
                variants.iter().any(|v| v.stock <= v.min_stock)
            }
        }
    }
}

// =============================================================================
// Customers & Vendors
// =============================================================================

/// A customer with store-credit and receivable balances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub name: String,
    /// Unique across customers.
    pub phone: String,
    pub email: Option<String>,
    pub note: Option<String>,
    pub image_uri: Option<String>,
    pub total_purchases: f64,
    pub last_purchase: Option<String>,
    /// Available store credit, never negative.
    pub credit: f64,
    /// Outstanding receivable, never negative.
    pub due_amount: f64,
}

/// A supplier. `payable` is what the shop still owes the vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub note: Option<String>,
    pub image_uri: Option<String>,
    pub total_purchases: f64,
    pub last_purchase: Option<String>,
    pub payable: f64,
}

/// Counterparty snapshot embedded in a sale or purchase.
///
/// Stored as JSON. Untagged so rows written as plain `{id, name, phone}`
/// objects keep decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(untagged)]
pub enum PartyRef {
    Registered {
        id: i64,
        name: String,
        #[serde(default)]
        phone: Option<String>,
    },
    WalkIn {
        name: String,
    },
}

impl PartyRef {
    /// Id of the referenced customer/vendor, if registered.
    pub fn id(&self) -> Option<i64> {
        match self {
            PartyRef::Registered { id, .. } => Some(*id),
            PartyRef::WalkIn { .. } => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PartyRef::Registered { name, .. } | PartyRef::WalkIn { name } => name,
        }
    }
}

// =============================================================================
// Sales & Purchases
// =============================================================================

/// A cart (sale) or purchase line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Catalog product id. Non-positive ids mark ad-hoc lines.
    pub product_id: i64,
    #[serde(default)]
    pub variant_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub variant_name: Option<String>,
    /// Unit selling price.
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub cost_price: f64,
    pub quantity: f64,
}

impl LineItem {
    /// An ad-hoc line ("extra amount", custom item) that never touches stock.
    pub fn custom(name: impl Into<String>, price: f64) -> Self {
        LineItem {
            product_id: CUSTOM_ITEM_PRODUCT_ID,
            variant_id: None,
            name: name.into(),
            variant_name: None,
            price,
            cost_price: 0.0,
            quantity: 1.0,
        }
    }

    /// Returns true if the line refers to a catalog product.
    pub fn is_catalog_item(&self) -> bool {
        self.product_id > 0
    }

    pub fn line_total(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Payment state of a sale or purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum SaleStatus {
    #[default]
    Paid,
    #[serde(rename = "Partially Paid")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Partially Paid"))]
    PartiallyPaid,
    Due,
}

impl SaleStatus {
    /// Derives the status from what was paid and what remains.
    pub fn from_amounts(paid_amount: f64, remaining_balance: f64) -> Self {
        if remaining_balance <= crate::ledger::EPSILON {
            SaleStatus::Paid
        } else if paid_amount > crate::ledger::EPSILON {
            SaleStatus::PartiallyPaid
        } else {
            SaleStatus::Due
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Paid => "Paid",
            SaleStatus::PartiallyPaid => "Partially Paid",
            SaleStatus::Due => "Due",
        }
    }
}

/// Purchases share the sale payment states.
pub type PurchaseStatus = SaleStatus;

/// A completed sale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: i64,
    pub customer: Option<PartyRef>,
    pub cart: Vec<LineItem>,
    pub subtotal: f64,
    pub tax_rate: f64,
    pub tax: f64,
    pub total: f64,
    pub credit_used: f64,
    pub amount_after_credit: f64,
    pub paid_amount: f64,
    pub change_amount: f64,
    pub remaining_balance: f64,
    pub payment_method: String,
    pub due_date: Option<String>,
    pub date: String,
    pub time: String,
    pub status: SaleStatus,
    /// Total quantity across the cart.
    pub items: f64,
    /// Always equal to `total`.
    pub amount: f64,
}

impl Sale {
    /// Id of the registered customer, if any.
    pub fn customer_id(&self) -> Option<i64> {
        self.customer.as_ref().and_then(PartyRef::id)
    }

    /// Fills the derived columns (`items`, `amount`, `status`) from the cart
    /// and amounts.
    pub fn normalized(mut self) -> Self {
        self.items = self.cart.iter().map(|line| line.quantity).sum();
        self.amount = self.total;
        self.status = SaleStatus::from_amounts(self.paid_amount, self.remaining_balance);
        self
    }
}

/// A stock receipt from a vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: i64,
    pub vendor: Option<PartyRef>,
    pub items: Vec<LineItem>,
    pub invoice_number: Option<String>,
    pub subtotal: f64,
    pub tax_rate: f64,
    pub tax: f64,
    pub total: f64,
    pub paid_amount: f64,
    pub remaining_balance: f64,
    pub payment_method: String,
    pub due_date: Option<String>,
    pub date: String,
    pub time: String,
    pub status: PurchaseStatus,
}

impl Purchase {
    pub fn vendor_id(&self) -> Option<i64> {
        self.vendor.as_ref().and_then(PartyRef::id)
    }

    /// Derives `status` from what was paid and what remains.
    pub fn normalized(mut self) -> Self {
        self.status = PurchaseStatus::from_amounts(self.paid_amount, self.remaining_balance);
        self
    }
}

// =============================================================================
// Credit Ledger
// =============================================================================

/// Kind of credit ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CreditTransactionType {
    /// Credit granted to the customer.
    Add,
    /// Credit removed manually.
    Deduct,
    /// Credit spent on a sale.
    Use,
}

impl CreditTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditTransactionType::Add => "add",
            CreditTransactionType::Deduct => "deduct",
            CreditTransactionType::Use => "use",
        }
    }
}

/// One movement of a customer's store credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: CreditTransactionType,
    pub date: String,
    pub time: String,
    pub description: Option<String>,
    /// Set only on `use` rows created by a sale.
    pub linked_sale_id: Option<i64>,
}

// =============================================================================
// Expenditure
// =============================================================================

/// A shop expense. No cross-entity effects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Expenditure {
    pub id: i64,
    pub category: String,
    pub amount: f64,
    pub description: Option<String>,
    pub date: String,
    pub time: String,
}

// =============================================================================
// Sync Outbox
// =============================================================================

/// Mutation recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Insert,
    Update,
    Delete,
}

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Retrying,
    Done,
    Failed,
}

impl SyncStatus {
    /// Rows in these states are handed to the synchronizer.
    pub fn is_deliverable(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Retrying)
    }
}

/// An entry in the sync outbox queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutboxRecord {
    pub id: String,
    /// Table name of the changed entity, e.g. "sales".
    pub entity: String,
    pub entity_id: String,
    /// Snapshot of the entity at enqueue time.
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
    pub action: SyncAction,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub retries: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Backups
// =============================================================================

/// A record of a backup file that was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BackupLogRecord {
    pub id: String,
    pub path: String,
    /// "local", "public", "cloud"...
    #[serde(rename = "type")]
    pub kind: String,
    pub provider: Option<String>,
    #[ts(type = "unknown")]
    pub metadata: Option<serde_json::Value>,
    pub uploaded: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Printing
// =============================================================================

/// A configured receipt printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PrinterProfile {
    pub id: String,
    pub name: String,
    /// "bluetooth", "network", "usb".
    pub connection: String,
    pub address: Option<String>,
    pub paper_width_mm: i64,
    pub is_default: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// State of a queued print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PrintJobStatus {
    #[default]
    Pending,
    Printing,
    Printed,
    Failed,
}

/// A retry-scheduled print work item, consumed by an external print worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PrintJobRecord {
    pub id: String,
    pub profile_id: Option<String>,
    /// "receipt", "test_page", "report"...
    #[serde(rename = "type")]
    pub kind: String,
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
    pub status: PrintJobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn shirt() -> Product {
        Product {
            id: 1,
            name: "Shirt".into(),
            category: Some("Apparel".into()),
            stock: ProductStock::Variants {
                variants: vec![
                    Variant {
                        id: 10,
                        name: "S".into(),
                        stock: 4.0,
                        min_stock: 2.0,
                        ..Variant::default()
                    },
                    Variant {
                        id: 11,
                        name: "M".into(),
                        stock: 1.0,
                        min_stock: 2.0,
                        ..Variant::default()
                    },
                ],
            },
        }
    }

    #[test]
    fn test_variant_product_stock() {
        let product = shirt();
        assert!(product.has_variants());
        assert_eq!(product.total_stock(), 5.0);
        assert!(product.is_low_stock());
        assert_eq!(product.variant(11).map(|v| v.name.as_str()), Some("M"));
        assert!(product.variant(99).is_none());
    }

    #[test]
    fn test_party_ref_decodes_plain_snapshot() {
        let registered: PartyRef =
            serde_json::from_str(r#"{"id":7,"name":"Ayesha","phone":"0300"}"#).unwrap();
        assert_eq!(registered.id(), Some(7));

        let walk_in: PartyRef = serde_json::from_str(r#"{"name":"Walk-in"}"#).unwrap();
        assert_eq!(walk_in.id(), None);
        assert_eq!(walk_in.name(), "Walk-in");
    }

    #[test]
    fn test_sale_status_labels() {
        let json = serde_json::to_string(&SaleStatus::PartiallyPaid).unwrap();
        assert_eq!(json, "\"Partially Paid\"");
        assert_eq!(SaleStatus::from_amounts(500.0, 0.0), SaleStatus::Paid);
        assert_eq!(SaleStatus::from_amounts(500.0, 700.0), SaleStatus::PartiallyPaid);
        assert_eq!(SaleStatus::from_amounts(0.0, 700.0), SaleStatus::Due);
    }

    #[test]
    fn test_sale_normalized_counts_items() {
        let sale = Sale {
            cart: vec![
                LineItem {
                    product_id: 1,
                    name: "Tea".into(),
                    price: 100.0,
                    quantity: 3.0,
                    ..LineItem::default()
                },
                LineItem::custom("Extra amount", 50.0),
            ],
            total: 350.0,
            ..Sale::default()
        }
        .normalized();

        assert_eq!(sale.items, 4.0);
        assert_eq!(sale.amount, 350.0);
        assert!(!sale.cart[1].is_catalog_item());
    }

    #[test]
    fn test_normalized_derives_status_from_amounts() {
        let sale = Sale {
            total: 1200.0,
            paid_amount: 0.0,
            remaining_balance: 700.0,
            status: SaleStatus::Paid,
            ..Sale::default()
        }
        .normalized();
        assert_eq!(sale.status, SaleStatus::Due);

        let purchase = Purchase {
            total: 3000.0,
            paid_amount: 1000.0,
            remaining_balance: 2000.0,
            status: SaleStatus::Paid,
            ..Purchase::default()
        }
        .normalized();
        assert_eq!(purchase.status, SaleStatus::PartiallyPaid);
    }

    #[test]
    fn test_credit_transaction_type_field_name() {
        let tx = CreditTransaction {
            id: 1,
            customer_id: 2,
            customer_name: "Bilal".into(),
            customer_phone: None,
            amount: 500.0,
            kind: CreditTransactionType::Use,
            date: "2026-10-19".into(),
            time: "10:00".into(),
            description: None,
            linked_sale_id: Some(9),
        };
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["type"], "use");
        assert_eq!(value["linkedSaleId"], 9);
    }
}
