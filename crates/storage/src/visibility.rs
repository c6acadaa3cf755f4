//! Snapshot-isolation visibility oracle
//!
//! A transaction captures a `Snapshot` at begin: the id horizon plus the set
//! of transactions that were in flight at that instant. Whether a particular
//! row version is visible is then a pure function of the version's header,
//! the reader's snapshot, and commit-log status.
//!
//! A version is visible to reader T with snapshot S iff
//! - its insertion is visible: `xmin == T`, or `xmin` committed before S was
//!   taken (`xmin < S.xmax`, not in flight at S, committed per the log), and
//! - its deletion is not: `xmax == 0`, or the deleter is T itself (own delete
//!   makes the version invisible), or the deleter is after/concurrent-with S
//!   or not committed.
//!
//! The commit log is the ground truth; commit LSN order in the WAL plays no
//! part in visibility.

use std::collections::HashSet;

/// Read access to transaction commit status
///
/// Implemented by the commit log. Transaction id 0 is the frozen bootstrap id
/// used by migrated checkpoints and must always report committed.
pub trait CommitStatus {
    /// Whether the transaction has committed
    fn is_committed(&self, tx_id: u64) -> bool;

    /// Whether the transaction has rolled back
    ///
    /// A claim on xmax held by an aborted transaction is dead and may be
    /// stolen by the next writer.
    fn is_aborted(&self, tx_id: u64) -> bool;
}

/// Point-in-time view captured at transaction begin
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Oldest transaction id still in flight when the snapshot was taken
    pub xmin: u64,
    /// First transaction id *not* visible: ids >= xmax began after us
    pub xmax: u64,
    /// Transactions in flight at capture time (invisible regardless of id)
    pub xip: HashSet<u64>,
}

impl Snapshot {
    /// Create a snapshot from its parts
    pub fn new(xmin: u64, xmax: u64, xip: HashSet<u64>) -> Self {
        Snapshot { xmin, xmax, xip }
    }

    /// A snapshot that sees every committed transaction (recovery reads)
    pub fn unbounded() -> Self {
        Snapshot {
            xmin: u64::MAX,
            xmax: u64::MAX,
            xip: HashSet::new(),
        }
    }

    /// Whether `tx_id` was in flight when this snapshot was taken
    pub fn in_flight(&self, tx_id: u64) -> bool {
        self.xip.contains(&tx_id)
    }
}

/// Decide whether a version header (xmin, xmax) is visible
///
/// `tx_id` is the reading transaction; it sees its own writes and not its own
/// deletes.
pub fn version_visible(
    xmin: u64,
    xmax: u64,
    tx_id: u64,
    snapshot: &Snapshot,
    clog: &dyn CommitStatus,
) -> bool {
    let insertion_visible = xmin == tx_id
        || (xmin < snapshot.xmax && !snapshot.in_flight(xmin) && clog.is_committed(xmin));
    if !insertion_visible {
        return false;
    }

    if xmax == super::version::XMAX_LIVE {
        return true;
    }
    if xmax == tx_id {
        // Own delete: gone within this transaction.
        return false;
    }

    // Deleter committed after our snapshot, still in flight, or never
    // committed: the version is still ours to see.
    xmax >= snapshot.xmax || snapshot.in_flight(xmax) || !clog.is_committed(xmax)
}
