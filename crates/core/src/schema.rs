//! Column schema declarations
//!
//! Tables declare an ordered list of typed columns. Embedding columns carry a
//! fixed dimension which is enforced both at declaration and on every insert
//! or update that supplies an embedding value.

use crate::error::{Error, Result};
use crate::value::ColumnValue;
use serde::{Deserialize, Serialize};

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// Boolean
    Bool,
    /// UTF-8 text
    Text,
    /// Embedding vector of the given dimension
    Embedding(usize),
}

impl ColumnType {
    /// Whether values of this type can be keyed by an ordered index
    pub fn is_indexable(&self) -> bool {
        !matches!(self, ColumnType::Embedding(_))
    }
}

/// A single column declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared type
    pub ty: ColumnType,
}

impl Column {
    /// Create a column declaration
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
        }
    }

    /// Validate a value against this column's declared type
    ///
    /// NULL is accepted for every type. Int coerces into Float columns
    /// (integer literals auto-promote). Embeddings must match the declared
    /// dimension exactly and may not be empty.
    pub fn check_value(&self, value: &ColumnValue) -> Result<()> {
        let ok = match (self.ty, value) {
            (_, ColumnValue::Null) => true,
            (ColumnType::Int, ColumnValue::Int(_)) => true,
            (ColumnType::Float, ColumnValue::Float(_)) => true,
            (ColumnType::Float, ColumnValue::Int(_)) => true,
            (ColumnType::Bool, ColumnValue::Bool(_)) => true,
            (ColumnType::Text, ColumnValue::Text(_)) => true,
            (ColumnType::Embedding(dim), ColumnValue::Embedding(vec)) => {
                if vec.is_empty() {
                    return Err(Error::type_mismatch(format!(
                        "column '{}': empty embedding",
                        self.name
                    )));
                }
                if vec.len() != dim {
                    return Err(Error::type_mismatch(format!(
                        "column '{}': embedding dimension {} does not match declared {}",
                        self.name,
                        vec.len(),
                        dim
                    )));
                }
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::type_mismatch(format!(
                "column '{}' expects {:?}, got {}",
                self.name,
                self.ty,
                value.type_name()
            )))
        }
    }
}

/// Ordered column list for a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in declaration order
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Create a schema from a column list
    pub fn new(columns: Vec<Column>) -> Self {
        TableSchema { columns }
    }

    /// Find a column declaration by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Embedding dimension of the named column, if it is an embedding column
    pub fn embedding_dimension(&self, name: &str) -> Option<usize> {
        match self.column(name)?.ty {
            ColumnType::Embedding(dim) => Some(dim),
            _ => None,
        }
    }

    /// The first embedding column declared on this table, if any
    pub fn first_embedding_column(&self) -> Option<(&str, usize)> {
        self.columns.iter().find_map(|c| match c.ty {
            ColumnType::Embedding(dim) => Some((c.name.as_str(), dim)),
            _ => None,
        })
    }
}
