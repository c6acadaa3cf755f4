//! Row version chains
//!
//! Each row id maps to a newest-first singly-linked chain of `RowVersion`
//! nodes. Versions are immutable after publication except for the `xmax`
//! header word, which transitions 0 → deleter-tx-id exactly once via
//! compare-and-swap. `Arc` links keep older versions alive for as long as any
//! snapshot may still traverse them.
//!
//! Chain invariants:
//! 1. The head's xmin is >= every non-head xmin.
//! 2. A non-head's xmax equals the xmin of the version immediately newer
//!    than it.
//! 3. At most one head has xmax = 0 at any instant.
//! 4. Once xmax leaves 0 via a successful CAS, no other writer observes 0
//!    for that version again (first-writer-wins).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::Row;

/// Marker for a live (not deleted, not superseded) version
pub const XMAX_LIVE: u64 = 0;

/// One version of a row: tuple header plus materialized payload
#[derive(Debug)]
pub struct RowVersion {
    /// Transaction id that created this version
    pub xmin: u64,
    /// Transaction id that deleted/superseded it; 0 while live
    xmax: AtomicU64,
    /// Next-older version in the chain
    pub next: Option<Arc<RowVersion>>,
    /// Payload for this version
    pub data: Row,
}

impl RowVersion {
    /// Create a live version with no predecessor (fresh insert)
    pub fn new(xmin: u64, data: Row) -> Self {
        RowVersion {
            xmin,
            xmax: AtomicU64::new(XMAX_LIVE),
            next: None,
            data,
        }
    }

    /// Create a live version that supersedes `next` (update path)
    pub fn superseding(xmin: u64, data: Row, next: Arc<RowVersion>) -> Self {
        RowVersion {
            xmin,
            xmax: AtomicU64::new(XMAX_LIVE),
            next: Some(next),
            data,
        }
    }

    /// Recreate a version with an explicit header (checkpoint load / replay)
    pub fn with_header(xmin: u64, xmax: u64, next: Option<Arc<RowVersion>>, data: Row) -> Self {
        RowVersion {
            xmin,
            xmax: AtomicU64::new(xmax),
            next,
            data,
        }
    }

    /// Current xmax
    pub fn xmax(&self) -> u64 {
        self.xmax.load(Ordering::SeqCst)
    }

    /// Attempt to claim this version for deletion/supersession
    ///
    /// Succeeds only for the first caller: the CAS from 0 to `tx_id` settles
    /// the write-write race. On failure the winning transaction id is
    /// returned so the caller can report the conflict.
    pub fn try_claim(&self, tx_id: u64) -> Result<(), u64> {
        self.xmax
            .compare_exchange(XMAX_LIVE, tx_id, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
    }

    /// Undo a claim made by `tx_id` (rollback compensation)
    ///
    /// Only resets if this transaction still holds the claim.
    pub fn release_claim(&self, tx_id: u64) -> bool {
        self.xmax
            .compare_exchange(tx_id, XMAX_LIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Take over a claim held by an aborted transaction
    ///
    /// Returns the currently stored xmax on failure so the caller can
    /// re-evaluate who holds the claim now.
    pub fn steal_claim(&self, from: u64, to: u64) -> std::result::Result<(), u64> {
        self.xmax
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
    }

    /// Number of versions in the chain starting at this one
    pub fn chain_len(self: &Arc<Self>) -> usize {
        let mut len = 1;
        let mut cursor = self.next.as_ref();
        while let Some(version) = cursor {
            len += 1;
            cursor = version.next.as_ref();
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tessera_core::ColumnValue;

    fn row(id: u64) -> Row {
        Row::new(id, vec![("v".into(), ColumnValue::Int(id as i64))])
    }

    #[test]
    fn new_version_is_live() {
        let v = RowVersion::new(1, row(1));
        assert_eq!(v.xmax(), XMAX_LIVE);
        assert_eq!(v.xmin, 1);
        assert!(v.next.is_none());
    }

    #[test]
    fn claim_is_first_writer_wins() {
        let v = RowVersion::new(1, row(1));
        assert!(v.try_claim(10).is_ok());
        assert_eq!(v.try_claim(11), Err(10));
        assert_eq!(v.xmax(), 10);
    }

    #[test]
    fn release_claim_only_for_holder() {
        let v = RowVersion::new(1, row(1));
        v.try_claim(10).unwrap();
        assert!(!v.release_claim(11));
        assert!(v.release_claim(10));
        assert_eq!(v.xmax(), XMAX_LIVE);
    }

    #[test]
    fn superseding_links_and_counts() {
        let old = Arc::new(RowVersion::new(1, row(1)));
        old.try_claim(2).unwrap();
        let head = Arc::new(RowVersion::superseding(2, row(1), Arc::clone(&old)));
        assert_eq!(head.chain_len(), 2);
        // Invariant 2: non-head xmax == newer version's xmin
        assert_eq!(head.next.as_ref().unwrap().xmax(), head.xmin);
    }

    #[test]
    fn exactly_one_of_many_concurrent_claims_succeeds() {
        let v = Arc::new(RowVersion::new(1, row(1)));
        let handles: Vec<_> = (0..64u64)
            .map(|i| {
                let v = Arc::clone(&v);
                thread::spawn(move || v.try_claim(100 + i).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
        assert!(v.xmax() >= 100);
    }
}
