//! Storage layer for Tessera
//!
//! This crate implements multi-version row storage:
//! - RowVersion: tuple header (xmin, atomic xmax) plus materialized payload,
//!   linked newest-first into per-row version chains
//! - Table: chain map and row-id allocator behind one short-critical-section
//!   mutex, with lock-free compare-and-swap on xmax for write conflicts
//! - Visibility: the snapshot-isolation oracle deciding which chain version
//!   a reader sees
//!
//! First-writer-wins is enforced at the xmax CAS: exactly one of N concurrent
//! writers to the same head succeeds, the rest get `SerializationFailure`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod table;
pub mod version;
pub mod visibility;

pub use table::Table;
pub use version::RowVersion;
pub use visibility::{version_visible, CommitStatus, Snapshot};
