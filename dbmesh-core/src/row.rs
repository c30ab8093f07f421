//! Decoded result rows.

use indexmap::IndexMap;
use serde::Serialize;

use crate::value::Value;

/// One decoded result row: column names mapped to values in select order.
///
/// Rows are built once by the decoder and handed out by value; nothing in
/// the crate mutates a row after construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GenericRow {
    columns: IndexMap<String, Value>,
}

impl GenericRow {
    /// Build a row from parallel column and value sequences.
    ///
    /// A repeated column name keeps its first position and its last value.
    pub fn from_parts<I, V>(columns: I, values: V) -> Self
    where
        I: IntoIterator<Item = String>,
        V: IntoIterator<Item = Value>,
    {
        Self {
            columns: columns.into_iter().zip(values).collect(),
        }
    }

    /// Get a column value by name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Get a column value by position.
    pub fn get_index(&self, index: usize) -> Option<(&str, &Value)> {
        self.columns
            .get_index(index)
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Get a column as text, treating NULL and missing columns alike.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(Value::to_text)
    }

    /// Get a column as an integer.
    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    /// Get a column as a boolean.
    pub fn bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(Value::as_bool)
    }

    /// Check whether the column is present and NULL.
    pub fn is_null(&self, column: &str) -> bool {
        self.get(column).is_some_and(Value::is_null)
    }

    /// Column names in select order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Iterate over `(column, value)` pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Consume the row and return its ordered map.
    pub fn into_map(self) -> IndexMap<String, Value> {
        self.columns
    }
}

impl IntoIterator for GenericRow {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}
