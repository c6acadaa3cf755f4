//! Database configuration

use std::path::PathBuf;
use tessera_durability::wal::writer::DEFAULT_SEGMENT_SIZE;
use tessera_index::HnswConfig;

/// Configuration for opening a [`crate::Database`]
///
/// A database without directories is purely in-memory: no WAL, no
/// checkpoints, nothing survives the process.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory for checkpoint files (`<table>.zvdb`, `commitlog.zvdb`,
    /// `vectors_<D>.hnsw`); `None` disables checkpointing
    pub data_dir: Option<PathBuf>,
    /// Directory for WAL segments (`wal.NNNNNN`); `None` disables the WAL
    pub wal_dir: Option<PathBuf>,
    /// Byte size at which a WAL segment rolls
    pub wal_segment_size: u64,
    /// Parameters for vector indexes
    pub hnsw: HnswConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            data_dir: None,
            wal_dir: None,
            wal_segment_size: DEFAULT_SEGMENT_SIZE,
            hnsw: HnswConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Purely in-memory database
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Durable database rooted at the given directories
    pub fn durable(data_dir: impl Into<PathBuf>, wal_dir: impl Into<PathBuf>) -> Self {
        DatabaseConfig {
            data_dir: Some(data_dir.into()),
            wal_dir: Some(wal_dir.into()),
            ..Self::default()
        }
    }

    /// Override the WAL segment roll size
    pub fn with_segment_size(mut self, bytes: u64) -> Self {
        self.wal_segment_size = bytes;
        self
    }

    /// Override the HNSW parameters
    pub fn with_hnsw(mut self, hnsw: HnswConfig) -> Self {
        self.hnsw = hnsw;
        self
    }
}
