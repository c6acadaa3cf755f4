//! Core types for Tessera
//!
//! This crate defines the foundational types used throughout the system:
//! - ColumnValue: Tagged scalar value (null, int, float, bool, text, embedding)
//! - Row: Insertion-ordered mapping of column name to value
//! - ColumnType / Column / TableSchema: Column declarations with
//!   schema-enforced embedding dimensions
//! - Error: Unified error taxonomy surfaced to the executor

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod row;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
pub use row::Row;
pub use schema::{Column, ColumnType, TableSchema};
pub use value::ColumnValue;
