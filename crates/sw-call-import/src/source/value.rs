//! Source row values.
//!
//! Rows from either driver are flattened into a column-name keyed map of
//! [`SqlValue`]s. Accessors never panic: a missing column and a NULL both
//! read as "no value".

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;

/// A single scalar read from the source database.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Any integer column.
    Int(i64),

    /// Floating point or decimal column.
    Float(f64),

    /// Text column.
    Text(String),

    /// Binary column that was not valid UTF-8.
    Bytes(Vec<u8>),

    /// Date/time column.
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Whether this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
            SqlValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// One source record: column name → value. Immutable once read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: HashMap<String, SqlValue>,
}

impl SourceRow {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used by the drivers and by tests.
    pub fn with(mut self, column: impl Into<String>, value: SqlValue) -> Self {
        self.columns.insert(column.into(), value);
        self
    }

    /// Insert a column value.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.insert(column.into(), value);
    }

    /// Raw value for a column.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    /// Whether the column exists and is not NULL.
    pub fn has(&self, column: &str) -> bool {
        self.get(column).map(|v| !v.is_null()).unwrap_or(false)
    }

    /// Column rendered as a string; missing or NULL give `None`.
    pub fn get_string(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            SqlValue::Null => None,
            value => Some(value.to_string()),
        }
    }

    /// Column rendered as a string, empty when missing or NULL.
    pub fn string_or_empty(&self, column: &str) -> String {
        self.get_string(column).unwrap_or_default()
    }

    /// Column as an integer; text columns are parsed.
    pub fn get_int(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Float(v) => Some(*v as i64),
            SqlValue::Text(v) => v.trim().parse().ok(),
            SqlValue::Bytes(v) => String::from_utf8_lossy(v).trim().parse().ok(),
            SqlValue::DateTime(v) => Some(v.and_utc().timestamp()),
            SqlValue::Null => None,
        }
    }

    /// Column as a Unix epoch; zero means "not set".
    pub fn get_epoch(&self, column: &str) -> Option<i64> {
        self.get_int(column).filter(|v| *v > 0)
    }

    /// Column names present in this row.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> SourceRow {
        SourceRow::new()
            .with("callref", SqlValue::Int(123))
            .with("itsm_title", SqlValue::Text("Printer jam".into()))
            .with("closedatex", SqlValue::Int(0))
            .with("logdatex", SqlValue::Text("1500000000".into()))
            .with("owner", SqlValue::Null)
    }

    #[test]
    fn test_get_string() {
        let row = row();
        assert_eq!(row.get_string("callref").as_deref(), Some("123"));
        assert_eq!(row.get_string("itsm_title").as_deref(), Some("Printer jam"));
        assert_eq!(row.get_string("owner"), None);
        assert_eq!(row.get_string("missing"), None);
        assert_eq!(row.string_or_empty("owner"), "");
    }

    #[test]
    fn test_get_int_parses_text() {
        let row = row();
        assert_eq!(row.get_int("callref"), Some(123));
        assert_eq!(row.get_int("logdatex"), Some(1_500_000_000));
        assert_eq!(row.get_int("itsm_title"), None);
    }

    #[test]
    fn test_get_epoch_treats_zero_as_unset() {
        let row = row();
        assert_eq!(row.get_epoch("closedatex"), None);
        assert_eq!(row.get_epoch("logdatex"), Some(1_500_000_000));
    }

    #[test]
    fn test_has() {
        let row = row();
        assert!(row.has("callref"));
        assert!(!row.has("owner"));
        assert!(!row.has("missing"));
    }

    #[test]
    fn test_display_bytes_lossy() {
        let value = SqlValue::Bytes(vec![b'o', b'k', 0xff]);
        assert!(value.to_string().starts_with("ok"));
    }
}
