//! Concurrency layer for Tessera
//!
//! This crate implements transaction lifecycle management:
//! - CommitLog: persistent tx-id → status map, the ground truth for
//!   visibility decisions
//! - TransactionManager: monotone tx-id allocation, snapshot capture at
//!   begin, commit/rollback, and the per-thread active transaction
//!
//! Write-write conflicts are not detected here; they surface at the storage
//! layer's xmax CAS. Snapshot isolation is the ceiling: a reader sees every
//! writer committed before its begin and none after.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clog;
pub mod manager;

pub use clog::{CommitLog, TxStatus};
pub use manager::TransactionManager;

// Re-export the snapshot types from storage for convenience
pub use tessera_storage::{CommitStatus, Snapshot};
