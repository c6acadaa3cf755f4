//! Commit log: transaction id → status
//!
//! The commit log is the ground truth for visibility. Readers consult it on
//! every version-header check, so the map is a `DashMap`: per-entry atomic
//! updates, readers never block writers.
//!
//! Runtime default for an unseen id is in-progress. After a load from disk
//! the default flips to aborted: a transaction that was in flight at the
//! crash is equivalent to rolled back. Transaction id 0 is the frozen
//! bootstrap id (rows migrated from v2 checkpoints) and is always committed.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tessera_core::{Error, Result};
use tessera_storage::CommitStatus;

/// Magic bytes identifying a commit-log dump: "TCLG"
const CLOG_MAGIC: u32 = 0x54434C47;
/// Current dump format version
const CLOG_FORMAT_VERSION: u32 = 1;

/// Frozen transaction id: permanently committed
pub const FROZEN_TX_ID: u64 = 0;

/// Status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Running, or unknown at runtime
    InProgress,
    /// Committed; retained forever for later visibility checks
    Committed,
    /// Rolled back
    Aborted,
}

impl TxStatus {
    fn to_byte(self) -> u8 {
        match self {
            TxStatus::InProgress => 0,
            TxStatus::Committed => 1,
            TxStatus::Aborted => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(TxStatus::InProgress),
            1 => Ok(TxStatus::Committed),
            2 => Ok(TxStatus::Aborted),
            other => Err(Error::corruption(format!(
                "unknown transaction status byte {}",
                other
            ))),
        }
    }
}

/// Persistent map of transaction statuses
#[derive(Debug, Default)]
pub struct CommitLog {
    entries: DashMap<u64, TxStatus>,
}

impl CommitLog {
    /// Create an empty commit log
    pub fn new() -> Self {
        CommitLog {
            entries: DashMap::new(),
        }
    }

    /// Record a status for a transaction
    pub fn set_status(&self, tx_id: u64, status: TxStatus) {
        self.entries.insert(tx_id, status);
    }

    /// Status of a transaction; unseen ids are in-progress
    pub fn get_status(&self, tx_id: u64) -> TxStatus {
        if tx_id == FROZEN_TX_ID {
            return TxStatus::Committed;
        }
        self.entries
            .get(&tx_id)
            .map(|e| *e.value())
            .unwrap_or(TxStatus::InProgress)
    }

    /// Whether the transaction aborted
    pub fn is_aborted(&self, tx_id: u64) -> bool {
        self.get_status(tx_id) == TxStatus::Aborted
    }

    /// Highest transaction id with a recorded status
    ///
    /// Feeds the startup rederivation of the tx-id counter.
    pub fn max_tx_id(&self) -> u64 {
        self.entries.iter().map(|e| *e.key()).max().unwrap_or(0)
    }

    /// Number of recorded transactions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no transaction has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the log to `path` (the `commitlog.zvdb` dump)
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_u32::<LittleEndian>(CLOG_MAGIC)?;
        writer.write_u32::<LittleEndian>(CLOG_FORMAT_VERSION)?;

        let entries: Vec<(u64, TxStatus)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        writer.write_u64::<LittleEndian>(entries.len() as u64)?;
        for (tx_id, status) in entries {
            writer.write_u64::<LittleEndian>(tx_id)?;
            writer.write_u8(status.to_byte())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a log from `path`
    ///
    /// Entries that were in-progress at save time load as aborted: a crashed
    /// transaction never committed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);

        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != CLOG_MAGIC {
            return Err(Error::corruption(format!(
                "bad commit log magic {:#010x} in {}",
                magic,
                path.display()
            )));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version > CLOG_FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "commit log version {} is newer than supported {}",
                version, CLOG_FORMAT_VERSION
            )));
        }

        let log = CommitLog::new();
        let count = reader.read_u64::<LittleEndian>()?;
        for _ in 0..count {
            let tx_id = reader.read_u64::<LittleEndian>()?;
            let status = match TxStatus::from_byte(reader.read_u8()?)? {
                TxStatus::InProgress => TxStatus::Aborted,
                other => other,
            };
            log.set_status(tx_id, status);
        }
        Ok(log)
    }
}

impl CommitStatus for CommitLog {
    fn is_committed(&self, tx_id: u64) -> bool {
        self.get_status(tx_id) == TxStatus::Committed
    }

    fn is_aborted(&self, tx_id: u64) -> bool {
        CommitLog::is_aborted(self, tx_id)
    }
}
