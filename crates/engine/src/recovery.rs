//! Recovery: checkpoint load, WAL replay, vector-index rebuild
//!
//! Sequence on open:
//! 1. Load every `<table>.zvdb` and the commit-log dump (missing dump means
//!    an empty log; every unseen tx id then defaults to aborted).
//! 2. Classify each transaction in the WAL by its *latest* COMMIT/ROLLBACK
//!    record; transactions with neither are aborted.
//! 3. Replay committed transactions' records in LSN order, idempotently:
//!    an INSERT installs only if the chain is absent, a DELETE removes, an
//!    UPDATE replaces; the row-id allocator advances past every applied id.
//! 4. Rebuild the per-dimension vector graphs by scanning every live row
//!    (vector deltas are not WAL-logged; the dumps on disk are validated and
//!    then superseded by the rebuild).
//!
//! The transaction-id counter is rederived by the caller as
//! `1 + max(id in CLOG ∪ WAL)`; it never resets.

use crate::config::DatabaseConfig;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tessera_concurrency::{CommitLog, TxStatus};
use tessera_core::{ColumnType, ColumnValue, Result};
use tessera_durability::wal::record::RecordType;
use tessera_durability::{checkpoint, WalReader, WalRecord};
use tessera_index::HnswIndex;
use tessera_storage::{RowVersion, Snapshot, Table};

/// What a WAL replay accomplished
pub(crate) struct ReplayOutcome {
    /// Distinct committed transactions whose mutations were replayed
    pub(crate) committed_transactions: usize,
    /// Highest transaction id observed anywhere in the log
    pub(crate) max_tx_id: u64,
}

/// Load tables, the commit log, and validate vector dumps from `data_dir`
pub(crate) fn load_checkpoint(
    data_dir: &Path,
    tables: &DashMap<String, Arc<Table>>,
    config: &DatabaseConfig,
) -> Result<CommitLog> {
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name == "commitlog.zvdb" {
            continue;
        }
        if let Some(stem) = name.strip_suffix(".zvdb") {
            let table = checkpoint::load_table(&path)?;
            tracing::debug!(table = stem, chains = table.chain_count(), "loaded table");
            tables.insert(table.name.clone(), Arc::new(table));
        } else if let Some(dimension) = name
            .strip_prefix("vectors_")
            .and_then(|rest| rest.strip_suffix(".hnsw"))
            .and_then(|d| d.parse::<usize>().ok())
        {
            // Validate header and dimension now (a contradictory dump is
            // fatal); the graph contents are superseded by the rebuild.
            checkpoint::load_hnsw(&path, Some(dimension), config.hnsw.clone())?;
        }
    }

    let clog_path = data_dir.join("commitlog.zvdb");
    if clog_path.exists() {
        CommitLog::load(&clog_path)
    } else {
        Ok(CommitLog::new())
    }
}

/// Classify and replay the WAL into the loaded tables
pub(crate) fn replay_wal(
    wal_dir: &Path,
    tables: &DashMap<String, Arc<Table>>,
    clog: &CommitLog,
) -> Result<ReplayOutcome> {
    let records = WalReader::open(wal_dir)?.read_all();
    if records.is_empty() {
        return Ok(ReplayOutcome {
            committed_transactions: 0,
            max_tx_id: 0,
        });
    }

    // Pass 1: the latest terminal record per transaction decides its fate.
    let mut fate: HashMap<u64, Option<bool>> = HashMap::new();
    for record in &records {
        match record.record_type {
            RecordType::CommitTx => {
                fate.insert(record.tx_id, Some(true));
            }
            RecordType::RollbackTx => {
                fate.insert(record.tx_id, Some(false));
            }
            RecordType::Checkpoint => {}
            _ => {
                fate.entry(record.tx_id).or_insert(None);
            }
        }
    }
    let mut committed: HashSet<u64> = HashSet::new();
    for (&tx_id, decided) in &fate {
        if *decided == Some(true) {
            committed.insert(tx_id);
            clog.set_status(tx_id, TxStatus::Committed);
        } else {
            clog.set_status(tx_id, TxStatus::Aborted);
        }
    }

    // Pass 2: replay committed mutations in LSN order.
    let mut replayed: HashSet<u64> = HashSet::new();
    for record in &records {
        if !committed.contains(&record.tx_id) {
            continue;
        }
        let is_mutation = matches!(
            record.record_type,
            RecordType::InsertRow | RecordType::UpdateRow | RecordType::DeleteRow
        );
        if !is_mutation {
            continue;
        }

        let Some(table) = tables.get(&record.table_name).map(|e| Arc::clone(e.value())) else {
            tracing::warn!(
                table = %record.table_name,
                lsn = record.lsn,
                "WAL record references an unknown table, skipping"
            );
            continue;
        };

        match record.record_type {
            RecordType::InsertRow => {
                if table.head(record.row_id).is_none() {
                    let row = WalRecord::decode_row(&record.data)?;
                    table.install_chain(
                        record.row_id,
                        Arc::new(RowVersion::with_header(record.tx_id, 0, None, row)),
                    );
                }
                table.advance_next_id(record.row_id + 1);
            }
            RecordType::UpdateRow => {
                let (_, new_row) = WalRecord::decode_update(&record.data)?;
                table.physical_delete(record.row_id);
                table.install_chain(
                    record.row_id,
                    Arc::new(RowVersion::with_header(record.tx_id, 0, None, new_row)),
                );
                table.advance_next_id(record.row_id + 1);
            }
            RecordType::DeleteRow => {
                table.physical_delete(record.row_id);
                table.advance_next_id(record.row_id + 1);
            }
            _ => unreachable!("filtered to mutations above"),
        }
        replayed.insert(record.tx_id);
    }

    let max_tx_id = records.iter().map(|r| r.tx_id).max().unwrap_or(0);
    tracing::info!(
        records = records.len(),
        replayed_transactions = replayed.len(),
        max_tx_id,
        "WAL replay complete"
    );

    Ok(ReplayOutcome {
        committed_transactions: replayed.len(),
        max_tx_id,
    })
}

/// Rebuild every per-dimension HNSW graph from the live rows of all tables
pub(crate) fn rebuild_vector_indexes(
    tables: &DashMap<String, Arc<Table>>,
    clog: &CommitLog,
    config: &DatabaseConfig,
) -> DashMap<usize, Arc<RwLock<HnswIndex>>> {
    let vectors: DashMap<usize, Arc<RwLock<HnswIndex>>> = DashMap::new();
    let snapshot = Snapshot::unbounded();

    for entry in tables.iter() {
        let table = entry.value();
        let embedding_columns: Vec<(String, usize)> = table
            .schema
            .columns
            .iter()
            .filter_map(|c| match c.ty {
                ColumnType::Embedding(dim) => Some((c.name.clone(), dim)),
                _ => None,
            })
            .collect();
        if embedding_columns.is_empty() {
            continue;
        }

        for row_id in table.get_all_rows(0, &snapshot, clog) {
            let Some(row) = table.get(row_id, 0, &snapshot, clog) else {
                continue;
            };
            for (column, dimension) in &embedding_columns {
                let Some(ColumnValue::Embedding(vector)) = row.get(column) else {
                    continue;
                };
                let graph = vectors
                    .entry(*dimension)
                    .or_insert_with(|| {
                        Arc::new(RwLock::new(HnswIndex::new(*dimension, config.hnsw.clone())))
                    })
                    .value()
                    .clone();
                let result = graph.write().insert(vector, row_id);
                if let Err(e) = result {
                    tracing::warn!(row_id, error = %e, "failed to rebuild vector for row");
                }
            }
        }
    }

    vectors
}
