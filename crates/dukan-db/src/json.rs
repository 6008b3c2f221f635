//! # JSON Columns
//!
//! `cart`, `items`, `customer`, `vendor`, `variants`, settings values and
//! payloads are stored as JSON text.
//!
//! Reading one is a two-step affair: [`decode`] is the strict decoder; the
//! `*_or_warn` helpers are the lenient path used when loading rows, where a
//! malformed column must not make the whole row (or list) unreadable.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use tracing::warn;

use crate::error::DbResult;

/// Location of a stored JSON value, for logging.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRef<'a, R: Display> {
    pub table: &'a str,
    pub row: R,
    pub column: &'a str,
}

/// Encodes a value for a JSON column.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> DbResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Encodes an optional value; `None` is stored as SQL NULL.
pub fn encode_opt<T: Serialize>(value: Option<&T>) -> DbResult<Option<String>> {
    value.map(encode).transpose()
}

/// Strict decode. NULL or blank text is `Ok(None)`.
pub fn decode<T: DeserializeOwned>(raw: Option<&str>) -> Result<Option<T>, serde_json::Error> {
    match raw.map(str::trim) {
        None | Some("") | Some("null") => Ok(None),
        Some(text) => serde_json::from_str(text).map(Some),
    }
}

/// Lenient decode of an optional column: malformed JSON logs a warning and
/// reads as `None`.
pub fn decode_opt_or_warn<T, R>(at: ColumnRef<'_, R>, raw: Option<&str>) -> Option<T>
where
    T: DeserializeOwned,
    R: Display,
{
    match decode(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                table = at.table,
                row = %at.row,
                column = at.column,
                error = %e,
                "Malformed JSON column, using empty value"
            );
            None
        }
    }
}

/// Lenient decode with the type's default (e.g. an empty list) as fallback.
pub fn decode_or_warn<T, R>(at: ColumnRef<'_, R>, raw: Option<&str>) -> T
where
    T: DeserializeOwned + Default,
    R: Display,
{
    decode_opt_or_warn(at, raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dukan_core::LineItem;

    fn at(column: &str) -> ColumnRef<'_, i64> {
        ColumnRef {
            table: "sales",
            row: 7,
            column,
        }
    }

    #[test]
    fn test_strict_decode() {
        let items: Option<Vec<LineItem>> =
            decode(Some(r#"[{"productId":1,"name":"Tea","price":100,"quantity":2}]"#)).unwrap();
        assert_eq!(items.unwrap()[0].quantity, 2.0);

        assert!(decode::<Vec<LineItem>>(None).unwrap().is_none());
        assert!(decode::<Vec<LineItem>>(Some("  ")).unwrap().is_none());
        assert!(decode::<Vec<LineItem>>(Some("[{")).is_err());
    }

    #[test]
    fn test_malformed_column_falls_back() {
        let cart: Vec<LineItem> = decode_or_warn(at("cart"), Some("not json"));
        assert!(cart.is_empty());

        let customer: Option<dukan_core::PartyRef> =
            decode_opt_or_warn(at("customer"), Some("{\"broken\""));
        assert!(customer.is_none());
    }
}
