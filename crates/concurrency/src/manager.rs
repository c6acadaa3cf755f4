//! Transaction manager
//!
//! Allocates monotonically increasing transaction ids, captures snapshots at
//! begin, and tracks each thread's active transaction. Concurrent begins are
//! permitted; write-write conflicts surface later at the table mutation step,
//! never here.
//!
//! The id counter must survive restarts: recovery rederives it as
//! `1 + max(id seen in CLOG and WAL)` and pushes it in via
//! [`TransactionManager::advance_next_tx_id`]. It is never reset.

use crate::clog::{CommitLog, TxStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tessera_core::{Error, Result};
use tessera_storage::Snapshot;

#[derive(Debug, Clone)]
struct ActiveTx {
    tx_id: u64,
    snapshot: Snapshot,
}

/// Allocates tx ids, captures snapshots, drives commit/rollback
pub struct TransactionManager {
    next_tx_id: AtomicU64,
    clog: Arc<CommitLog>,
    /// Transactions currently in flight, for snapshot capture
    in_flight: Mutex<HashSet<u64>>,
    /// Each thread's active transaction
    current: DashMap<ThreadId, ActiveTx>,
}

impl TransactionManager {
    /// Create a manager starting at tx id 1
    pub fn new(clog: Arc<CommitLog>) -> Self {
        TransactionManager {
            next_tx_id: AtomicU64::new(1),
            clog,
            in_flight: Mutex::new(HashSet::new()),
            current: DashMap::new(),
        }
    }

    /// The commit log this manager writes to
    pub fn clog(&self) -> &Arc<CommitLog> {
        &self.clog
    }

    /// Begin a transaction on the calling thread
    ///
    /// Allocates an id, records in-progress, captures the snapshot, and
    /// makes the transaction the thread's active one. Nested begins are
    /// rejected.
    pub fn begin(&self) -> Result<u64> {
        let thread = thread::current().id();
        if self.current.contains_key(&thread) {
            return Err(Error::invalid_syntax(
                "transaction already active; COMMIT or ROLLBACK first",
            ));
        }

        let tx_id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        self.clog.set_status(tx_id, TxStatus::InProgress);

        let snapshot = {
            let mut in_flight = self.in_flight.lock();
            let xip: HashSet<u64> = in_flight.iter().copied().collect();
            let xmin = xip.iter().copied().min().unwrap_or(tx_id);
            in_flight.insert(tx_id);
            // Ids >= ours began after us; our own writes pass the own-write
            // rule instead.
            Snapshot::new(xmin, tx_id, xip)
        };

        self.current.insert(thread, ActiveTx { tx_id, snapshot });
        Ok(tx_id)
    }

    /// Id of the calling thread's active transaction
    pub fn current_tx(&self) -> Option<u64> {
        self.current
            .get(&thread::current().id())
            .map(|e| e.value().tx_id)
    }

    /// Snapshot of the calling thread's active transaction
    pub fn current_snapshot(&self) -> Option<Snapshot> {
        self.current
            .get(&thread::current().id())
            .map(|e| e.value().snapshot.clone())
    }

    /// Commit the calling thread's active transaction
    ///
    /// Flips the commit log entry to committed and clears the thread state.
    /// The id is retained in the log forever: later readers need it for
    /// visibility tests. The caller is responsible for having flushed the
    /// COMMIT_TX record first (WAL-ahead-of-commit).
    pub fn commit(&self) -> Result<u64> {
        let tx = self.take_current()?;
        self.clog.set_status(tx.tx_id, TxStatus::Committed);
        self.in_flight.lock().remove(&tx.tx_id);
        tracing::debug!(tx_id = tx.tx_id, "transaction committed");
        Ok(tx.tx_id)
    }

    /// Roll back the calling thread's active transaction
    ///
    /// Versions written by the transaction become permanently invisible
    /// through the visibility rules; physical reclamation of index entries is
    /// the executor's concern.
    pub fn rollback(&self) -> Result<u64> {
        let tx = self.take_current()?;
        self.clog.set_status(tx.tx_id, TxStatus::Aborted);
        self.in_flight.lock().remove(&tx.tx_id);
        tracing::debug!(tx_id = tx.tx_id, "transaction rolled back");
        Ok(tx.tx_id)
    }

    /// Next id the manager would allocate
    pub fn next_tx_id(&self) -> u64 {
        self.next_tx_id.load(Ordering::SeqCst)
    }

    /// Push the id counter forward (recovery; never moves backward)
    pub fn advance_next_tx_id(&self, floor: u64) {
        let mut current = self.next_tx_id.load(Ordering::SeqCst);
        while floor > current {
            match self.next_tx_id.compare_exchange(
                current,
                floor,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn take_current(&self) -> Result<ActiveTx> {
        self.current
            .remove(&thread::current().id())
            .map(|(_, tx)| tx)
            .ok_or(Error::NoActiveTransaction)
    }
}
