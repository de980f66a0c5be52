//! Dynamic row values and typed accessors.
//!
//! Writes go through ordered `(column, value)` pairs so the insert SQL and
//! its parameters stay aligned; reads come back as a name→value map with
//! typed getters that surface `CorruptRow` instead of panicking.

use std::collections::HashMap;

use crate::error::StoreError;

/// A single SQLite value.
pub type SqlValue = rusqlite::types::Value;

/// Ordered column/value pairs for inserts and updates.
pub type RowValues = Vec<(&'static str, SqlValue)>;

/// A fetched row, keyed by column name.
#[derive(Clone, Debug, Default)]
pub struct RowMap(HashMap<String, SqlValue>);

impl RowMap {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        let _ = self.0.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Required TEXT column.
    pub fn text(
        &self,
        table: &'static str,
        column: &'static str,
    ) -> Result<String, StoreError> {
        match self.0.get(column) {
            Some(SqlValue::Text(s)) => Ok(s.clone()),
            other => Err(corrupt(table, column, other)),
        }
    }

    /// Optional TEXT column (NULL → `None`).
    pub fn opt_text(
        &self,
        table: &'static str,
        column: &'static str,
    ) -> Result<Option<String>, StoreError> {
        match self.0.get(column) {
            Some(SqlValue::Text(s)) => Ok(Some(s.clone())),
            Some(SqlValue::Null) | None => Ok(None),
            other => Err(corrupt(table, column, other)),
        }
    }

    /// Required INTEGER column.
    pub fn integer(
        &self,
        table: &'static str,
        column: &'static str,
    ) -> Result<i64, StoreError> {
        match self.0.get(column) {
            Some(SqlValue::Integer(v)) => Ok(*v),
            other => Err(corrupt(table, column, other)),
        }
    }

    /// Required INTEGER column interpreted as a boolean flag.
    pub fn flag(
        &self,
        table: &'static str,
        column: &'static str,
    ) -> Result<bool, StoreError> {
        Ok(self.integer(table, column)? != 0)
    }
}

fn corrupt(table: &'static str, column: &'static str, got: Option<&SqlValue>) -> StoreError {
    StoreError::CorruptRow {
        table,
        column,
        detail: match got {
            Some(v) => format!("unexpected value type: {v:?}"),
            None => "column missing from result set".to_owned(),
        },
    }
}

/// Parse a stored JSON object column.
pub fn parse_json_map(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON object: {e}"),
    })
}

/// Parse a stored JSON string-array column.
pub fn parse_json_strings(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON array: {e}"),
    })
}

/// Parse a stored string into an enum with a `FromStr` impl.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// NULL-or-text helper for optional string fields on writes.
pub fn opt_text_value(value: Option<&str>) -> SqlValue {
    match value {
        Some(s) => SqlValue::Text(s.to_owned()),
        None => SqlValue::Null,
    }
}
