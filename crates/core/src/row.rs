//! Row representation
//!
//! A row is the internal row id plus an insertion-ordered mapping from column
//! name to value. The row id is assigned by the table, starts at 1, and is the
//! externally stable identifier referenced by secondary indexes.

use crate::value::ColumnValue;
use serde::{Deserialize, Serialize};

/// A materialized row: internal id plus ordered column values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Internal row id (monotone per table, starts at 1)
    pub id: u64,
    entries: Vec<(String, ColumnValue)>,
}

impl Row {
    /// Create a row from pre-ordered (name, value) pairs
    pub fn new(id: u64, entries: Vec<(String, ColumnValue)>) -> Self {
        Row { id, entries }
    }

    /// Look up a column value by name
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Replace a column's value, returning whether the column existed
    pub fn set(&mut self, column: &str, value: ColumnValue) -> bool {
        for (name, slot) in &mut self.entries {
            if name == column {
                *slot = value;
                return true;
            }
        }
        false
    }

    /// Iterate (name, value) pairs in declaration order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
