//! Tables: per-row version chains plus the row-id allocator
//!
//! Structural mutation (installing a chain, prepending a head, allocating an
//! id) happens under one mutex per table with short critical sections and no
//! I/O inside. Write-write conflict detection stays off that mutex: it is the
//! lock-free xmax CAS on the version object, so concurrent writers to
//! different rows never contend.

use crate::version::{RowVersion, XMAX_LIVE};
use crate::visibility::{version_visible, CommitStatus, Snapshot};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tessera_core::{ColumnValue, Error, Result, Row, TableSchema};

#[derive(Debug)]
struct TableInner {
    chains: FxHashMap<u64, Arc<RowVersion>>,
    next_id: u64,
}

/// A table: name, ordered column schema, and the version-chain map
#[derive(Debug)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Ordered column declarations
    pub schema: TableSchema,
    inner: Mutex<TableInner>,
}

impl Table {
    /// Create an empty table
    pub fn new(name: impl Into<String>, schema: TableSchema) -> Self {
        Table {
            name: name.into(),
            schema,
            inner: Mutex::new(TableInner {
                chains: FxHashMap::default(),
                next_id: 1,
            }),
        }
    }

    /// Allocate the next row id
    ///
    /// The id is claimed immediately so concurrent inserts never collide; the
    /// chain itself is installed later by [`Table::insert_with_id`].
    pub fn allocate_row_id(&self) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        id
    }

    /// Next id that would be allocated (statistics, checkpointing)
    pub fn next_id(&self) -> u64 {
        self.inner.lock().next_id
    }

    /// Force the allocator forward (recovery only; never moves backward)
    pub fn advance_next_id(&self, floor: u64) {
        let mut inner = self.inner.lock();
        if floor > inner.next_id {
            inner.next_id = floor;
        }
    }

    /// Insert a new row, allocating its id
    pub fn insert(&self, values: Vec<(String, ColumnValue)>, tx_id: u64) -> Result<u64> {
        let row_id = self.allocate_row_id();
        self.insert_with_id(row_id, values, tx_id)?;
        Ok(row_id)
    }

    /// Install a fresh chain under a pre-allocated or replayed row id
    ///
    /// Used by the executor after logging the intent, and by recovery replay.
    /// The allocator is advanced past `row_id` so replayed ids are never
    /// reissued.
    pub fn insert_with_id(
        &self,
        row_id: u64,
        values: Vec<(String, ColumnValue)>,
        tx_id: u64,
    ) -> Result<()> {
        let head = Arc::new(RowVersion::new(tx_id, Row::new(row_id, values)));
        let mut inner = self.inner.lock();
        if inner.chains.contains_key(&row_id) {
            return Err(Error::invalid_syntax(format!(
                "row id {} already exists in table '{}'",
                row_id, self.name
            )));
        }
        inner.chains.insert(row_id, head);
        if row_id >= inner.next_id {
            inner.next_id = row_id + 1;
        }
        Ok(())
    }

    /// Install an already-built chain head (checkpoint load / replay)
    pub fn install_chain(&self, row_id: u64, head: Arc<RowVersion>) {
        let mut inner = self.inner.lock();
        inner.chains.insert(row_id, head);
        if row_id >= inner.next_id {
            inner.next_id = row_id + 1;
        }
    }

    /// Current chain head for a row id
    pub fn head(&self, row_id: u64) -> Option<Arc<RowVersion>> {
        self.inner.lock().chains.get(&row_id).cloned()
    }

    /// Update columns of a row, prepending a new head version
    ///
    /// The caller must have matched the row through its own snapshot. The
    /// head is claimed via CAS before the new version is published; losing
    /// the CAS surfaces as `SerializationFailure` (first-writer-wins).
    pub fn update(
        &self,
        row_id: u64,
        assignments: &[(String, ColumnValue)],
        tx_id: u64,
        snapshot: &Snapshot,
        clog: &dyn CommitStatus,
    ) -> Result<()> {
        let head = self.claim_head(row_id, tx_id, snapshot, clog)?;

        let mut data = head.data.clone();
        for (column, value) in assignments {
            if !data.set(column, value.clone()) {
                // The claim must not leak on a bad column name.
                head.release_claim(tx_id);
                return Err(Error::column_not_found(self.name.clone(), column.clone()));
            }
        }

        let new_head = Arc::new(RowVersion::superseding(tx_id, data, Arc::clone(&head)));
        let mut inner = self.inner.lock();
        inner.chains.insert(row_id, new_head);
        Ok(())
    }

    /// Delete a row by claiming its head version
    ///
    /// The CAS on xmax is the entire operation; the chain structure does not
    /// change. Visibility rules make the row disappear for every snapshot
    /// that sees the deleting transaction as committed.
    pub fn delete(
        &self,
        row_id: u64,
        tx_id: u64,
        snapshot: &Snapshot,
        clog: &dyn CommitStatus,
    ) -> Result<()> {
        self.claim_head(row_id, tx_id, snapshot, clog)?;
        Ok(())
    }

    /// Read the visible version of a row, if any
    pub fn get(
        &self,
        row_id: u64,
        tx_id: u64,
        snapshot: &Snapshot,
        clog: &dyn CommitStatus,
    ) -> Option<Row> {
        let head = self.head(row_id)?;
        let mut cursor = Some(&head);
        while let Some(version) = cursor {
            if version_visible(version.xmin, version.xmax(), tx_id, snapshot, clog) {
                return Some(version.data.clone());
            }
            cursor = version.next.as_ref();
        }
        None
    }

    /// Ids of all rows visible to the snapshot, ascending
    pub fn get_all_rows(
        &self,
        tx_id: u64,
        snapshot: &Snapshot,
        clog: &dyn CommitStatus,
    ) -> Vec<u64> {
        let heads: Vec<(u64, Arc<RowVersion>)> = {
            let inner = self.inner.lock();
            inner
                .chains
                .iter()
                .map(|(&id, head)| (id, Arc::clone(head)))
                .collect()
        };
        let mut ids: Vec<u64> = heads
            .into_iter()
            .filter(|(_, head)| {
                let mut cursor = Some(head);
                while let Some(version) = cursor {
                    if version_visible(version.xmin, version.xmax(), tx_id, snapshot, clog) {
                        return true;
                    }
                    cursor = version.next.as_ref();
                }
                false
            })
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of rows visible to the snapshot
    pub fn count(&self, tx_id: u64, snapshot: &Snapshot, clog: &dyn CommitStatus) -> usize {
        self.get_all_rows(tx_id, snapshot, clog).len()
    }

    /// Number of chains regardless of visibility (planner statistics)
    pub fn chain_count(&self) -> usize {
        self.inner.lock().chains.len()
    }

    /// Remove a chain entirely, freeing its versions
    ///
    /// Rollback compensation for a just-inserted row, and replay of DELETE
    /// records. Never the user-facing DELETE path.
    pub fn physical_delete(&self, row_id: u64) -> bool {
        self.inner.lock().chains.remove(&row_id).is_some()
    }

    /// Snapshot of every chain head, sorted by row id (checkpointing)
    pub fn chains(&self) -> Vec<(u64, Arc<RowVersion>)> {
        let inner = self.inner.lock();
        let mut out: Vec<(u64, Arc<RowVersion>)> = inner
            .chains
            .iter()
            .map(|(&id, head)| (id, Arc::clone(head)))
            .collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }

    /// Claim the head of `row_id` for writer `tx_id`
    ///
    /// Fails with `RowNotFound` when no version is visible, and with
    /// `SerializationFailure` when the head was superseded by a concurrent
    /// writer or the CAS is lost. Versions stranded at the head by an
    /// aborted transaction are pruned, and a claim held by an aborted
    /// transaction is stolen, so rolled-back writers never wedge a row.
    fn claim_head(
        &self,
        row_id: u64,
        tx_id: u64,
        snapshot: &Snapshot,
        clog: &dyn CommitStatus,
    ) -> Result<Arc<RowVersion>> {
        loop {
            let head = self
                .head(row_id)
                .ok_or(Error::RowNotFound { row_id })?;

            if !version_visible(head.xmin, head.xmax(), tx_id, snapshot, clog) {
                if clog.is_aborted(head.xmin) {
                    self.prune_aborted_head(row_id, &head);
                    continue;
                }
                // A newer invisible head means another writer got here
                // first; a chain with no visible version at all means the
                // row is gone.
                let mut cursor = head.next.as_ref();
                while let Some(version) = cursor {
                    if version_visible(version.xmin, version.xmax(), tx_id, snapshot, clog) {
                        return Err(Error::SerializationFailure {
                            row_id,
                            winner: head.xmin,
                        });
                    }
                    cursor = version.next.as_ref();
                }
                return Err(Error::RowNotFound { row_id });
            }

            let mut observed = match head.try_claim(tx_id) {
                Ok(()) => return Ok(head),
                Err(winner) => winner,
            };
            // A claim left by an aborted transaction is dead weight: steal
            // it so the row does not stay locked forever. Anything else is a
            // live first-writer-wins loss.
            loop {
                if observed == XMAX_LIVE {
                    match head.try_claim(tx_id) {
                        Ok(()) => return Ok(head),
                        Err(winner) => observed = winner,
                    }
                } else if clog.is_aborted(observed) {
                    match head.steal_claim(observed, tx_id) {
                        Ok(()) => return Ok(head),
                        Err(now) => observed = now,
                    }
                } else {
                    return Err(Error::SerializationFailure {
                        row_id,
                        winner: observed,
                    });
                }
            }
        }
    }

    /// Unlink a head version created by an aborted transaction
    ///
    /// The predecessor (if any) becomes the head again; its xmax still
    /// carries the aborted claimant and is stolen by the next writer.
    fn prune_aborted_head(&self, row_id: u64, head: &Arc<RowVersion>) {
        let mut inner = self.inner.lock();
        let still_head = inner
            .chains
            .get(&row_id)
            .map(|current| Arc::ptr_eq(current, head))
            .unwrap_or(false);
        if still_head {
            match head.next.clone() {
                Some(next) => {
                    inner.chains.insert(row_id, next);
                }
                None => {
                    inner.chains.remove(&row_id);
                }
            }
        }
    }
}
