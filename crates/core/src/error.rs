//! Error types for Tessera
//!
//! This module defines the unified error type surfaced by every layer of the
//! system. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! ## Error Categories
//!
//! - **Not Found**: table, column, index, row, or vector node doesn't exist
//! - **Conflict**: write-write race lost (`SerializationFailure`)
//! - **Validation**: type mismatches, malformed statements
//! - **Durability**: WAL and checkpoint failures, corruption
//! - **Resource**: allocation failure

use std::io;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all Tessera operations
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced table does not exist
    #[error("table not found: {name}")]
    TableNotFound {
        /// Name of the missing table
        name: String,
    },

    /// Referenced column does not exist in the table
    #[error("column not found: {table}.{column}")]
    ColumnNotFound {
        /// Table the lookup ran against
        table: String,
        /// Name of the missing column
        column: String,
    },

    /// A value's type does not match the column's declared type
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// What went wrong
        message: String,
    },

    /// Statement is structurally invalid for the engine
    #[error("invalid statement: {message}")]
    InvalidSyntax {
        /// What went wrong
        message: String,
    },

    /// An index with this name already exists
    #[error("index already exists: {name}")]
    IndexAlreadyExists {
        /// Name of the conflicting index
        name: String,
    },

    /// Referenced index does not exist
    #[error("index not found: {name}")]
    IndexNotFound {
        /// Name of the missing index
        name: String,
    },

    /// Referenced vector node does not exist in the graph
    #[error("vector node not found: {id}")]
    NodeNotFound {
        /// External row id of the missing node
        id: u64,
    },

    /// Operation requires the WAL but it is not enabled
    #[error("write-ahead log is not enabled")]
    WalNotEnabled,

    /// WAL was enabled twice
    #[error("write-ahead log is already enabled")]
    WalAlreadyEnabled,

    /// A WAL record failed structural validation or its CRC check
    #[error("invalid WAL record: {message}")]
    InvalidWalRecord {
        /// What went wrong
        message: String,
    },

    /// Write-write conflict: another transaction modified the row first
    ///
    /// This error is **retryable**: the statement can be retried against a
    /// fresh snapshot.
    #[error("serialization failure on row {row_id}: superseded by tx {winner}")]
    SerializationFailure {
        /// Row the conflict occurred on
        row_id: u64,
        /// Transaction id that won the race
        winner: u64,
    },

    /// Referenced row does not exist or is not visible
    #[error("row not found: {row_id}")]
    RowNotFound {
        /// Internal row id
        row_id: u64,
    },

    /// COMMIT or ROLLBACK issued without an active transaction
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Allocation failure
    #[error("out of memory: {context}")]
    OutOfMemory {
        /// What was being allocated
        context: String,
    },

    /// Data integrity check failed (bad magic, unsupported version, CRC)
    ///
    /// This is a **fatal** error for checkpoint files; recovery must not
    /// proceed past it.
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption
        message: String,
    },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error for row payloads
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong
        message: String,
    },
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization {
            message: e.to_string(),
        }
    }
}

impl Error {
    /// Create a TableNotFound error
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Error::TableNotFound { name: name.into() }
    }

    /// Create a ColumnNotFound error
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a TypeMismatch error
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Error::TypeMismatch {
            message: message.into(),
        }
    }

    /// Create an InvalidSyntax error
    pub fn invalid_syntax(message: impl Into<String>) -> Self {
        Error::InvalidSyntax {
            message: message.into(),
        }
    }

    /// Create an InvalidWalRecord error
    pub fn invalid_wal_record(message: impl Into<String>) -> Self {
        Error::InvalidWalRecord {
            message: message.into(),
        }
    }

    /// Create a Corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption {
            message: message.into(),
        }
    }

    /// Check if this error is a write-write conflict
    ///
    /// Used for retry logic; only serialization failures should be retried.
    pub fn is_serialization_failure(&self) -> bool {
        matches!(self, Error::SerializationFailure { .. })
    }

    /// Check if this error is a "not found" type error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::TableNotFound { .. }
                | Error::ColumnNotFound { .. }
                | Error::IndexNotFound { .. }
                | Error::NodeNotFound { .. }
                | Error::RowNotFound { .. }
        )
    }

    /// Check if this error is fatal for startup/recovery
    ///
    /// Fatal errors indicate an unreadable or contradictory on-disk state and
    /// must abort the open instead of being absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corruption { .. })
    }
}
