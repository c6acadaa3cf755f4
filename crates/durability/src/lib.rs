//! Durability layer for Tessera
//!
//! Everything that touches disk:
//! - WAL: segmented append-only log of CRC-framed mutation records, with the
//!   WAL-ahead-of-mutation contract (no table mutation before the relevant
//!   records are flushed)
//! - Checkpoints: versioned `<table>.zvdb` dumps of full version chains,
//!   plus `vectors_<D>.hnsw` graph dumps (the commit-log dump lives with the
//!   commit log itself)
//!
//! Recovery orchestration (classify, replay, rebuild) lives in the engine;
//! this crate supplies the raw reads and writes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod wal;

pub use checkpoint::{
    hnsw_file_path, load_hnsw, load_table, save_hnsw, save_table, table_file_path,
    CHECKPOINT_VERSION_V2, CHECKPOINT_VERSION_V3,
};
pub use wal::record::{RecordType, WalRecord};
pub use wal::{reader::WalReader, writer::WalWriter};
