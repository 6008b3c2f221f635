//! # Schema
//!
//! Idempotent table creation plus additive column migrations.
//!
//! ## How It Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Schema Application                                 │
//! │                                                                         │
//! │  Every fresh connection (first open, reconnect, post-restore)          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CREATE TABLE IF NOT EXISTS ... (all tables, current shape)            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  For each additive column:                                             │
//! │       PRAGMA table_info(<table>)                                       │
//! │       ├── present? skip                                                │
//! │       └── missing? ALTER TABLE <table> ADD COLUMN ...                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CREATE INDEX IF NOT EXISTS ...                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! 1. Never drop or rename a column; old databases must keep opening
//! 2. A column added to a CREATE TABLE below also goes into
//!    [`ADDITIVE_COLUMNS`] so databases created before it get it too
//! 3. Added columns are nullable or carry a DEFAULT

use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

// =============================================================================
// Tables
// =============================================================================

const TABLES: &[(&str, &str)] = &[
    (
        "products",
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            category TEXT,
            hasVariants INTEGER NOT NULL DEFAULT 0,
            variants TEXT,
            price REAL NOT NULL DEFAULT 0,
            costPrice REAL NOT NULL DEFAULT 0,
            stock REAL NOT NULL DEFAULT 0,
            minStock REAL NOT NULL DEFAULT 0,
            barcode TEXT,
            unit TEXT
        )
        "#,
    ),
    (
        "customers",
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            phone TEXT NOT NULL UNIQUE,
            email TEXT,
            note TEXT,
            imageUri TEXT,
            totalPurchases REAL NOT NULL DEFAULT 0,
            lastPurchase TEXT,
            credit REAL NOT NULL DEFAULT 0,
            dueAmount REAL NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "vendors",
        r#"
        CREATE TABLE IF NOT EXISTS vendors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            company TEXT,
            note TEXT,
            imageUri TEXT,
            totalPurchases REAL NOT NULL DEFAULT 0,
            lastPurchase TEXT,
            payable REAL NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "sales",
        r#"
        CREATE TABLE IF NOT EXISTS sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            customer TEXT,
            cart TEXT NOT NULL,
            subtotal REAL NOT NULL DEFAULT 0,
            taxRate REAL NOT NULL DEFAULT 0,
            tax REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            creditUsed REAL NOT NULL DEFAULT 0,
            amountAfterCredit REAL NOT NULL DEFAULT 0,
            paidAmount REAL NOT NULL DEFAULT 0,
            changeAmount REAL NOT NULL DEFAULT 0,
            remainingBalance REAL NOT NULL DEFAULT 0,
            paymentMethod TEXT NOT NULL DEFAULT 'Cash',
            dueDate TEXT,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Paid',
            items REAL NOT NULL DEFAULT 0,
            amount REAL NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "creditTransactions",
        r#"
        CREATE TABLE IF NOT EXISTS creditTransactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            customerId INTEGER NOT NULL REFERENCES customers(id),
            customerName TEXT NOT NULL,
            customerPhone TEXT,
            amount REAL NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('add', 'deduct', 'use')),
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            description TEXT,
            linkedSaleId INTEGER REFERENCES sales(id)
        )
        "#,
    ),
    (
        "purchases",
        r#"
        CREATE TABLE IF NOT EXISTS purchases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vendor TEXT,
            items TEXT NOT NULL,
            invoiceNumber TEXT,
            subtotal REAL NOT NULL DEFAULT 0,
            taxRate REAL NOT NULL DEFAULT 0,
            tax REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            paidAmount REAL NOT NULL DEFAULT 0,
            remainingBalance REAL NOT NULL DEFAULT 0,
            paymentMethod TEXT NOT NULL DEFAULT 'Cash',
            dueDate TEXT,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Paid'
        )
        "#,
    ),
    (
        "expenditures",
        r#"
        CREATE TABLE IF NOT EXISTS expenditures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            amount REAL NOT NULL,
            description TEXT,
            date TEXT NOT NULL,
            time TEXT NOT NULL
        )
        "#,
    ),
    (
        "settings",
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        )
        "#,
    ),
    (
        "printer_profiles",
        r#"
        CREATE TABLE IF NOT EXISTS printer_profiles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            connection TEXT NOT NULL,
            address TEXT,
            paperWidthMm INTEGER NOT NULL DEFAULT 58,
            isDefault INTEGER NOT NULL DEFAULT 0,
            createdAt TEXT NOT NULL,
            updatedAt TEXT NOT NULL
        )
        "#,
    ),
    (
        "print_jobs",
        r#"
        CREATE TABLE IF NOT EXISTS print_jobs (
            id TEXT PRIMARY KEY,
            profileId TEXT REFERENCES printer_profiles(id) ON DELETE SET NULL,
            type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            maxAttempts INTEGER NOT NULL DEFAULT 3,
            lastError TEXT,
            createdAt TEXT NOT NULL,
            updatedAt TEXT NOT NULL,
            nextAttemptAt TEXT
        )
        "#,
    ),
    (
        "roles",
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            permissions TEXT
        )
        "#,
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            username TEXT NOT NULL UNIQUE,
            pinHash TEXT,
            roleId INTEGER REFERENCES roles(id),
            isActive INTEGER NOT NULL DEFAULT 1,
            createdAt TEXT NOT NULL
        )
        "#,
    ),
    (
        "sessions",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            userId INTEGER NOT NULL REFERENCES users(id),
            startedAt TEXT NOT NULL,
            endedAt TEXT
        )
        "#,
    ),
    (
        "sync_outbox",
        r#"
        CREATE TABLE IF NOT EXISTS sync_outbox (
            id TEXT PRIMARY KEY,
            entity TEXT NOT NULL,
            entityId TEXT NOT NULL,
            payload TEXT NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('insert', 'update', 'delete')),
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT,
            retries INTEGER NOT NULL DEFAULT 0,
            createdAt TEXT NOT NULL,
            updatedAt TEXT NOT NULL,
            nextAttemptAt TEXT
        )
        "#,
    ),
    (
        "sync_state",
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updatedAt TEXT NOT NULL
        )
        "#,
    ),
    (
        "backup_logs",
        r#"
        CREATE TABLE IF NOT EXISTS backup_logs (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            type TEXT NOT NULL,
            provider TEXT,
            metadata TEXT,
            uploaded INTEGER NOT NULL DEFAULT 0,
            createdAt TEXT NOT NULL
        )
        "#,
    ),
    (
        "import_jobs",
        r#"
        CREATE TABLE IF NOT EXISTS import_jobs (
            id TEXT PRIMARY KEY,
            entity TEXT NOT NULL,
            fileName TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            totalRows INTEGER NOT NULL DEFAULT 0,
            processedRows INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            createdAt TEXT NOT NULL,
            updatedAt TEXT NOT NULL
        )
        "#,
    ),
];

/// Columns that older databases may lack: `(table, column, declaration)`.
pub const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("products", "costPrice", "REAL NOT NULL DEFAULT 0"),
    ("products", "unit", "TEXT"),
    ("customers", "imageUri", "TEXT"),
    ("customers", "credit", "REAL NOT NULL DEFAULT 0"),
    ("customers", "dueAmount", "REAL NOT NULL DEFAULT 0"),
    ("vendors", "imageUri", "TEXT"),
    ("vendors", "payable", "REAL NOT NULL DEFAULT 0"),
    ("sales", "creditUsed", "REAL NOT NULL DEFAULT 0"),
    ("sales", "amountAfterCredit", "REAL NOT NULL DEFAULT 0"),
    ("sales", "remainingBalance", "REAL NOT NULL DEFAULT 0"),
    ("sales", "dueDate", "TEXT"),
    ("purchases", "invoiceNumber", "TEXT"),
    ("purchases", "dueDate", "TEXT"),
    ("creditTransactions", "linkedSaleId", "INTEGER"),
    ("sync_outbox", "nextAttemptAt", "TEXT"),
    ("print_jobs", "nextAttemptAt", "TEXT"),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_credit_customer ON creditTransactions(customerId)",
    "CREATE INDEX IF NOT EXISTS idx_credit_linked_sale ON creditTransactions(linkedSaleId)",
    "CREATE INDEX IF NOT EXISTS idx_sales_date ON sales(date)",
    "CREATE INDEX IF NOT EXISTS idx_purchases_date ON purchases(date)",
    "CREATE INDEX IF NOT EXISTS idx_outbox_status_created ON sync_outbox(status, createdAt)",
    "CREATE INDEX IF NOT EXISTS idx_print_jobs_status ON print_jobs(status, nextAttemptAt)",
];

// =============================================================================
// Application
// =============================================================================

/// Creates missing tables, columns and indexes. Safe to run on every open.
pub async fn apply(conn: &mut SqliteConnection) -> DbResult<()> {
    for (table, ddl) in TABLES {
        sqlx::query(ddl)
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_error(&format!("create {table}"), e))?;
    }

    let mut added = 0;
    for (table, column, decl) in ADDITIVE_COLUMNS {
        if !column_exists(conn, table, column).await? {
            let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
            sqlx::query(&sql)
                .execute(&mut *conn)
                .await
                .map_err(|e| migration_error(&format!("add {table}.{column}"), e))?;
            info!(table, column, "Added missing column");
            added += 1;
        }
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_error("create index", e))?;
    }

    debug!(tables = TABLES.len(), added_columns = added, "Schema applied");
    Ok(())
}

/// Returns true if `table` has a column named `column`.
pub async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> DbResult<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut *conn)
        .await?;

    for row in rows {
        let name: String = row.try_get("name")?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn migration_error(step: &str, err: sqlx::Error) -> DbError {
    match DbError::from(err) {
        // Keep the handle-loss classification so the serializer can retry
        lost @ DbError::ConnectionLost(_) => lost,
        other => DbError::MigrationFailed(format!("{step}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    async fn memory() -> SqliteConnection {
        SqliteConnection::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let mut conn = memory().await;
        apply(&mut conn).await.unwrap();
        apply(&mut conn).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&mut conn)
                .await
                .unwrap();

        for (table, _) in TABLES {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_additive_columns_on_old_database() {
        let mut conn = memory().await;

        // Customers table as shipped before credit tracking
        sqlx::query(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, \
             phone TEXT NOT NULL UNIQUE, email TEXT, note TEXT, totalPurchases REAL NOT NULL DEFAULT 0, \
             lastPurchase TEXT)",
        )
        .execute(&mut conn)
        .await
        .unwrap();
        sqlx::query("INSERT INTO customers (name, phone) VALUES ('Old', '0300')")
            .execute(&mut conn)
            .await
            .unwrap();

        assert!(!column_exists(&mut conn, "customers", "dueAmount").await.unwrap());

        apply(&mut conn).await.unwrap();

        assert!(column_exists(&mut conn, "customers", "dueAmount").await.unwrap());
        assert!(column_exists(&mut conn, "customers", "imageUri").await.unwrap());

        let (name, due): (String, f64) =
            sqlx::query_as("SELECT name, dueAmount FROM customers")
                .fetch_one(&mut conn)
                .await
                .unwrap();
        assert_eq!(name, "Old");
        assert_eq!(due, 0.0);
    }
}
