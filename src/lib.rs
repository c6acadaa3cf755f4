//! Tessera: an embedded relational database with vector similarity search
//!
//! Tessera unifies MVCC relational storage with approximate-nearest-neighbor
//! search. Rows live in newest-first version chains under snapshot isolation
//! with first-writer-wins conflict detection; mutations are framed in a
//! CRC-checked write-ahead log before they touch a table; ordered B-tree
//! indexes and per-dimension HNSW graphs are kept consistent with base
//! tables across commits, rollbacks, and crash recovery.
//!
//! ```no_run
//! use tessera::{Column, ColumnType, ColumnValue, Database, DatabaseConfig};
//!
//! # fn main() -> tessera::Result<()> {
//! let db = Database::open(DatabaseConfig::durable("data", "wal"))?;
//! db.create_table(
//!     "notes",
//!     vec![
//!         Column::new("body", ColumnType::Text),
//!         Column::new("vec", ColumnType::Embedding(384)),
//!     ],
//! )?;
//! let id = db.insert(
//!     "notes",
//!     vec![
//!         ("body".into(), ColumnValue::Text("hello".into())),
//!         ("vec".into(), ColumnValue::Embedding(vec![0.1; 384])),
//!     ],
//! )?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub use tessera_core::{Column, ColumnType, ColumnValue, Error, Result, Row, TableSchema};
pub use tessera_engine::{
    mock_query_vector, CompareOp, Database, DatabaseConfig, OrderBy, Predicate, Query,
    SimilarityTarget,
};
pub use tessera_index::{HnswConfig, HnswIndex, OrderedIndex};

/// Storage-layer building blocks, exposed for embedders and tests
pub mod storage {
    pub use tessera_storage::{version_visible, CommitStatus, RowVersion, Snapshot, Table};
}

/// Transaction-layer building blocks
pub mod concurrency {
    pub use tessera_concurrency::{CommitLog, TransactionManager, TxStatus};
}

/// Durability building blocks (WAL records, checkpoint file helpers)
pub mod durability {
    pub use tessera_durability::{RecordType, WalReader, WalRecord, WalWriter};
}
