//! # Settings Repository
//!
//! `settings(key PRIMARY KEY, value JSON)`: shop name, currency, receipt
//! footer, product categories and whatever else the UI collaborator keeps.
//!
//! Values are JSON text. A value that no longer decodes into the requested
//! type reads as absent (with a warning) instead of failing the caller.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use crate::json::{self, ColumnRef};
use crate::store::Store;

/// Key under which the product category list is stored.
pub const CATEGORIES_KEY: &str = "categories";

pub async fn get_raw(conn: &mut SqliteConnection, key: &str) -> DbResult<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(value.flatten())
}

pub async fn set_raw(conn: &mut SqliteConnection, key: &str, value: &str) -> DbResult<()> {
    debug!(key, "Saving setting");
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, key: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM settings WHERE key = ?1")
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Repository for key → JSON settings.
///
/// ## Usage
/// ```rust,ignore
/// store.settings().set_setting("currency", &"PKR").await?;
/// let currency: Option<String> = store.settings().get_setting("currency").await?;
/// ```
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    store: Store,
}

impl SettingsRepository {
    pub fn new(store: Store) -> Self {
        SettingsRepository { store }
    }

    /// Reads and decodes a setting. Missing or undecodable values are `None`.
    pub async fn get_setting<T>(&self, key: &str) -> DbResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let owned = key.to_string();
        let raw = self
            .store
            .enqueue(move |conn| {
                let key = owned.clone();
                Box::pin(async move { get_raw(conn, &key).await })
            })
            .await?;

        let at = ColumnRef {
            table: "settings",
            row: key,
            column: "value",
        };
        Ok(json::decode_opt_or_warn(at, raw.as_deref()))
    }

    /// Stores a setting, replacing any previous value.
    pub async fn set_setting<T>(&self, key: &str, value: &T) -> DbResult<()>
    where
        T: Serialize + ?Sized,
    {
        let key = key.to_string();
        let encoded = json::encode(value)?;
        self.store
            .enqueue(move |conn| {
                let key = key.clone();
                let encoded = encoded.clone();
                Box::pin(async move { set_raw(conn, &key, &encoded).await })
            })
            .await
    }

    /// Removes a setting. Returns true if it existed.
    pub async fn delete_setting(&self, key: &str) -> DbResult<bool> {
        let key = key.to_string();
        self.store
            .enqueue(move |conn| {
                let key = key.clone();
                Box::pin(async move { delete(conn, &key).await })
            })
            .await
    }

    /// Product categories, in the order the user arranged them.
    pub async fn categories(&self) -> DbResult<Vec<String>> {
        Ok(self.get_setting(CATEGORIES_KEY).await?.unwrap_or_default())
    }

    /// Replaces the category list, dropping blanks and duplicates.
    pub async fn set_categories(&self, categories: &[String]) -> DbResult<()> {
        let mut cleaned: Vec<String> = Vec::with_capacity(categories.len());
        for category in categories {
            let category = category.trim();
            if !category.is_empty() && !cleaned.iter().any(|c| c.eq_ignore_ascii_case(category)) {
                cleaned.push(category.to_string());
            }
        }
        self.set_setting(CATEGORIES_KEY, &cleaned).await
    }
}
