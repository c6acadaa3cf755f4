//! Ordered secondary index
//!
//! Maps a column value to the set of row ids carrying it, with range scans.
//! Backed by a `BTreeMap` of `BTreeSet`s behind one reader-writer lock:
//! writers exclusive, concurrent readers allowed. The index owns its copy of
//! every key and drops it when the last referencing row id is removed.
//!
//! Visibility filtering is deliberately not done here. The executor applies
//! the visibility oracle to the candidate ids, which keeps one structure
//! serving every snapshot.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tessera_core::{ColumnValue, Error, Result};

/// Total-order wrapper over `ColumnValue` for use as an index key
///
/// Values order by type class (null < bool < numeric < text), then within a
/// class by value. Int and float share the numeric class and compare via
/// `f64::total_cmp`, so `Int(1)` and `Float(1.0)` address the same key.
/// Embeddings are not orderable and are rejected at construction.
#[derive(Debug, Clone)]
pub struct IndexKey(ColumnValue);

impl IndexKey {
    /// Wrap a value, rejecting unindexable types
    pub fn try_new(value: ColumnValue) -> Result<Self> {
        match value {
            ColumnValue::Embedding(_) => Err(Error::type_mismatch(
                "embedding columns cannot be keyed by an ordered index",
            )),
            other => Ok(IndexKey(other)),
        }
    }

    /// The wrapped value
    pub fn value(&self) -> &ColumnValue {
        &self.0
    }

    fn type_rank(&self) -> u8 {
        match self.0 {
            ColumnValue::Null => 0,
            ColumnValue::Bool(_) => 1,
            ColumnValue::Int(_) | ColumnValue::Float(_) => 2,
            ColumnValue::Text(_) => 3,
            // Unreachable: try_new rejects embeddings.
            ColumnValue::Embedding(_) => 4,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self.0 {
            ColumnValue::Int(v) => Some(v as f64),
            ColumnValue::Float(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use ColumnValue::*;
        match (&self.0, &other.0) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => self.type_rank().cmp(&other.type_rank()),
            },
        }
    }
}

/// Ordered (value → row-id set) index with range scans
#[derive(Debug, Default)]
pub struct OrderedIndex {
    entries: RwLock<BTreeMap<IndexKey, BTreeSet<u64>>>,
}

impl OrderedIndex {
    /// Create an empty index
    pub fn new() -> Self {
        OrderedIndex {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add a (key, row id) pair
    pub fn insert(&self, key: ColumnValue, row_id: u64) -> Result<()> {
        let key = IndexKey::try_new(key)?;
        self.entries.write().entry(key).or_default().insert(row_id);
        Ok(())
    }

    /// Remove a (key, row id) pair; returns whether a removal occurred
    ///
    /// Idempotent. When the last row id under a key is removed the key entry
    /// itself is dropped, so no dangling keys accumulate.
    pub fn delete(&self, key: &ColumnValue, row_id: u64) -> Result<bool> {
        let key = IndexKey::try_new(key.clone())?;
        let mut entries = self.entries.write();
        if let Some(ids) = entries.get_mut(&key) {
            let removed = ids.remove(&row_id);
            if ids.is_empty() {
                entries.remove(&key);
            }
            Ok(removed)
        } else {
            Ok(false)
        }
    }

    /// Row ids stored under exactly this key
    pub fn search(&self, key: &ColumnValue) -> Result<Vec<u64>> {
        let key = IndexKey::try_new(key.clone())?;
        Ok(self
            .entries
            .read()
            .get(&key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Row ids with keys in the given range, ordered by key then row id
    ///
    /// `None` bounds are unbounded on that side.
    pub fn find_range(
        &self,
        lo: Option<&ColumnValue>,
        hi: Option<&ColumnValue>,
        lo_inclusive: bool,
        hi_inclusive: bool,
    ) -> Result<Vec<u64>> {
        let lo_bound = match lo {
            Some(v) => {
                let key = IndexKey::try_new(v.clone())?;
                if lo_inclusive {
                    Bound::Included(key)
                } else {
                    Bound::Excluded(key)
                }
            }
            None => Bound::Unbounded,
        };
        let hi_bound = match hi {
            Some(v) => {
                let key = IndexKey::try_new(v.clone())?;
                if hi_inclusive {
                    Bound::Included(key)
                } else {
                    Bound::Excluded(key)
                }
            }
            None => Bound::Unbounded,
        };

        let entries = self.entries.read();
        let mut out = Vec::new();
        for (_, ids) in entries.range((lo_bound, hi_bound)) {
            out.extend(ids.iter().copied());
        }
        Ok(out)
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_returns_all_ids_under_a_key() {
        let index = OrderedIndex::new();
        index.insert(ColumnValue::Int(5), 1).unwrap();
        index.insert(ColumnValue::Int(5), 2).unwrap();
        index.insert(ColumnValue::Int(6), 3).unwrap();

        assert_eq!(index.search(&ColumnValue::Int(5)).unwrap(), vec![1, 2]);
        assert_eq!(index.search(&ColumnValue::Int(7)).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn int_and_float_address_the_same_key() {
        let index = OrderedIndex::new();
        index.insert(ColumnValue::Int(1), 10).unwrap();
        index.insert(ColumnValue::Float(1.0), 11).unwrap();
        assert_eq!(index.search(&ColumnValue::Float(1.0)).unwrap(), vec![10, 11]);
    }

    #[test]
    fn delete_is_idempotent_and_drops_empty_keys() {
        let index = OrderedIndex::new();
        index.insert(ColumnValue::Text("a".into()), 1).unwrap();

        assert!(index.delete(&ColumnValue::Text("a".into()), 1).unwrap());
        assert!(!index.delete(&ColumnValue::Text("a".into()), 1).unwrap());
        assert!(index.is_empty());
    }

    #[test]
    fn range_scan_orders_by_key_then_id() {
        let index = OrderedIndex::new();
        for (id, salary) in [(1, 100), (2, 300), (3, 200), (4, 300)] {
            index.insert(ColumnValue::Int(salary), id).unwrap();
        }

        let ids = index
            .find_range(Some(&ColumnValue::Int(150)), None, true, true)
            .unwrap();
        assert_eq!(ids, vec![3, 2, 4]);

        let ids = index
            .find_range(
                Some(&ColumnValue::Int(100)),
                Some(&ColumnValue::Int(300)),
                false,
                false,
            )
            .unwrap();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn unbounded_range_returns_everything() {
        let index = OrderedIndex::new();
        index.insert(ColumnValue::Int(2), 1).unwrap();
        index.insert(ColumnValue::Int(1), 2).unwrap();
        let ids = index.find_range(None, None, true, true).unwrap();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn embeddings_are_rejected() {
        let index = OrderedIndex::new();
        assert!(index
            .insert(ColumnValue::Embedding(vec![1.0]), 1)
            .is_err());
        assert!(index.search(&ColumnValue::Embedding(vec![1.0])).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap as Model;

        proptest! {
            /// search(k) returns exactly the ids inserted under k and not
            /// later deleted, for any operation sequence.
            #[test]
            fn matches_reference_model(ops in proptest::collection::vec(
                (0i64..8, 0u64..16, proptest::bool::ANY), 0..200)
            ) {
                let index = OrderedIndex::new();
                let mut model: Model<i64, std::collections::BTreeSet<u64>> = Model::new();

                for (key, id, is_insert) in ops {
                    if is_insert {
                        index.insert(ColumnValue::Int(key), id).unwrap();
                        model.entry(key).or_default().insert(id);
                    } else {
                        let removed = index.delete(&ColumnValue::Int(key), id).unwrap();
                        let model_removed = model
                            .get_mut(&key)
                            .map(|s| s.remove(&id))
                            .unwrap_or(false);
                        prop_assert_eq!(removed, model_removed);
                    }
                }

                for key in 0i64..8 {
                    let got = index.search(&ColumnValue::Int(key)).unwrap();
                    let expected: Vec<u64> = model
                        .get(&key)
                        .map(|s| s.iter().copied().collect())
                        .unwrap_or_default();
                    prop_assert_eq!(got, expected);
                }
            }
        }
    }
}
