//! Database facade
//!
//! Owns the table registry, secondary indexes, the per-dimension vector
//! graphs, the transaction manager, and the WAL handle. Opening a database
//! with directories configured runs recovery: checkpoint load, WAL replay,
//! vector-index rebuild, and tx-counter rederivation.

use crate::config::DatabaseConfig;
use crate::executor::{run_compensations, Compensation};
use crate::recovery;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tessera_concurrency::{CommitLog, TransactionManager};
use tessera_core::{Column, ColumnValue, Error, Result, TableSchema};
use tessera_durability::wal::record::RecordType;
use tessera_durability::{checkpoint, WalWriter};
use tessera_index::{HnswIndex, OrderedIndex};
use tessera_storage::{Snapshot, Table};

/// A named ordered index over one column of one table
pub struct SecondaryIndex {
    /// Index name (unique per database)
    pub name: String,
    /// Indexed table
    pub table: String,
    /// Indexed column
    pub column: String,
    /// The ordered structure itself
    pub index: OrderedIndex,
}

/// Per-statement execution context
#[derive(Debug, Clone)]
pub(crate) struct StatementCtx {
    pub(crate) tx_id: u64,
    pub(crate) snapshot: Snapshot,
    /// Statement opened its own transaction (auto-commit wrapping)
    pub(crate) auto: bool,
}

/// Embedded relational database with vector similarity search
pub struct Database {
    pub(crate) config: DatabaseConfig,
    pub(crate) tables: DashMap<String, Arc<Table>>,
    pub(crate) indexes: DashMap<String, Arc<SecondaryIndex>>,
    /// One HNSW graph per embedding dimension
    pub(crate) vectors: DashMap<usize, Arc<RwLock<HnswIndex>>>,
    pub(crate) clog: Arc<CommitLog>,
    pub(crate) txn: TransactionManager,
    pub(crate) wal: RwLock<Option<Arc<WalWriter>>>,
    /// Transactions whose BEGIN_TX record has been written
    pub(crate) wal_begun: DashMap<u64, ()>,
    /// Transactions with a failed statement already in the WAL: commit is
    /// refused, only rollback resolves them
    pub(crate) poisoned: DashMap<u64, ()>,
    /// Inverse vector-graph operations per explicit transaction, replayed on
    /// ROLLBACK (ordered-index keys are append-only and need no undo)
    pub(crate) tx_undo: DashMap<u64, Vec<Compensation>>,
    recovered_transactions: usize,
}

impl Database {
    /// Open a database, running recovery when directories are configured
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = &config.wal_dir {
            std::fs::create_dir_all(dir)?;
        }

        let tables: DashMap<String, Arc<Table>> = DashMap::new();
        let mut clog = CommitLog::new();
        let mut recovered_transactions = 0;

        if let Some(data_dir) = &config.data_dir {
            clog = recovery::load_checkpoint(data_dir, &tables, &config)?;
        }
        let clog = Arc::new(clog);

        let mut max_tx_seen = clog.max_tx_id();
        if let Some(wal_dir) = &config.wal_dir {
            let outcome = recovery::replay_wal(wal_dir, &tables, clog.as_ref())?;
            recovered_transactions = outcome.committed_transactions;
            max_tx_seen = max_tx_seen.max(outcome.max_tx_id);
        }

        let vectors = recovery::rebuild_vector_indexes(&tables, clog.as_ref(), &config);

        let txn = TransactionManager::new(Arc::clone(&clog));
        txn.advance_next_tx_id(max_tx_seen + 1);

        let wal = match &config.wal_dir {
            Some(dir) => Some(Arc::new(WalWriter::open(dir, config.wal_segment_size)?)),
            None => None,
        };

        tracing::info!(
            tables = tables.len(),
            recovered_transactions,
            next_tx_id = txn.next_tx_id(),
            "database open"
        );

        Ok(Database {
            config,
            tables,
            indexes: DashMap::new(),
            vectors,
            clog,
            txn,
            wal: RwLock::new(wal),
            wal_begun: DashMap::new(),
            poisoned: DashMap::new(),
            tx_undo: DashMap::new(),
            recovered_transactions,
        })
    }

    /// Transactions replayed from the WAL during open
    pub fn recovered_transactions(&self) -> usize {
        self.recovered_transactions
    }

    /// Whether mutations are being logged to a WAL
    pub fn wal_enabled(&self) -> bool {
        self.wal.read().is_some()
    }

    /// Start logging to a WAL directory
    ///
    /// Databases opened with a WAL directory in their config have the log
    /// enabled from the start; enabling twice is an error. Note that replay
    /// on a later open follows the config's WAL directory.
    pub fn enable_wal(&self, dir: &Path) -> Result<()> {
        let mut wal = self.wal.write();
        if wal.is_some() {
            return Err(Error::WalAlreadyEnabled);
        }
        *wal = Some(Arc::new(WalWriter::open(dir, self.config.wal_segment_size)?));
        Ok(())
    }

    /// Force-flush the WAL to disk
    pub fn flush_wal(&self) -> Result<()> {
        match self.wal_handle() {
            Some(wal) => wal.flush(),
            None => Err(Error::WalNotEnabled),
        }
    }

    // ========================================================================
    // DDL
    // ========================================================================

    /// Create a table from an ordered column list
    ///
    /// When checkpointing is configured, an empty table file is written
    /// immediately so WAL replay after a crash can find the schema.
    pub fn create_table(&self, name: &str, columns: Vec<Column>) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::invalid_syntax("a table needs at least one column"));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::invalid_syntax(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        if self.tables.contains_key(name) {
            return Err(Error::invalid_syntax(format!(
                "table '{}' already exists",
                name
            )));
        }

        let table = Arc::new(Table::new(name, TableSchema::new(columns)));
        if let Some(data_dir) = &self.config.data_dir {
            checkpoint::save_table(data_dir, &table)?;
        }
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    /// Create a named ordered index over one column, backfilling existing rows
    pub fn create_index(&self, name: &str, table_name: &str, column: &str) -> Result<()> {
        if self.indexes.contains_key(name) {
            return Err(Error::IndexAlreadyExists { name: name.into() });
        }
        let table = self.table(table_name)?;
        let decl = table
            .schema
            .column(column)
            .ok_or_else(|| Error::column_not_found(table_name, column))?;
        if !decl.ty.is_indexable() {
            return Err(Error::type_mismatch(format!(
                "column '{}' is an embedding and cannot be indexed by an ordered index",
                column
            )));
        }

        let index = OrderedIndex::new();
        let ctx = self.statement_begin()?;
        for row_id in table.get_all_rows(ctx.tx_id, &ctx.snapshot, self.clog.as_ref()) {
            if let Some(row) = table.get(row_id, ctx.tx_id, &ctx.snapshot, self.clog.as_ref()) {
                if let Some(value) = row.get(column) {
                    if !value.is_null() {
                        index.insert(value.clone(), row_id)?;
                    }
                }
            }
        }
        self.statement_commit(&ctx)?;

        self.indexes.insert(
            name.to_string(),
            Arc::new(SecondaryIndex {
                name: name.to_string(),
                table: table_name.to_string(),
                column: column.to_string(),
                index,
            }),
        );
        Ok(())
    }

    /// Drop an index by name
    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or(Error::IndexNotFound { name: name.into() })
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// BEGIN an explicit transaction on the calling thread
    pub fn begin(&self) -> Result<u64> {
        self.txn.begin()
    }

    /// COMMIT the calling thread's transaction
    ///
    /// The COMMIT_TX record is flushed before the commit-log flip so the
    /// transaction is durable at the instant it becomes visible.
    pub fn commit(&self) -> Result<u64> {
        let tx_id = self.txn.current_tx().ok_or(Error::NoActiveTransaction)?;
        if self.poisoned.contains_key(&tx_id) {
            // A failed statement's records are already in the log; committing
            // would replay work that was compensated in memory.
            return Err(Error::invalid_syntax(
                "transaction has a failed statement; only ROLLBACK is allowed",
            ));
        }
        if self.wal_begun.remove(&tx_id).is_some() {
            if let Some(wal) = self.wal_handle() {
                wal.append(RecordType::CommitTx, tx_id, 0, "", Vec::new())?;
                wal.flush()?;
            }
        }
        self.tx_undo.remove(&tx_id);
        self.txn.commit()
    }

    /// ROLLBACK the calling thread's transaction
    pub fn rollback(&self) -> Result<u64> {
        let tx_id = self.txn.current_tx().ok_or(Error::NoActiveTransaction)?;
        self.poisoned.remove(&tx_id);
        if self.wal_begun.remove(&tx_id).is_some() {
            if let Some(wal) = self.wal_handle() {
                wal.append(RecordType::RollbackTx, tx_id, 0, "", Vec::new())?;
                wal.flush()?;
            }
        }
        // Versions become invisible through the commit log, and stale index
        // keys are filtered by the visibility re-check; only the destructive
        // vector-graph edits need explicit reversal.
        if let Some((_, undo)) = self.tx_undo.remove(&tx_id) {
            run_compensations(undo);
        }
        self.txn.rollback()
    }

    /// Id of the calling thread's active transaction, if any
    pub fn current_tx(&self) -> Option<u64> {
        self.txn.current_tx()
    }

    // ========================================================================
    // Checkpointing
    // ========================================================================

    /// Dump all tables, the commit log, and every vector graph to disk
    pub fn checkpoint(&self) -> Result<()> {
        let data_dir = self.config.data_dir.as_ref().ok_or_else(|| {
            Error::invalid_syntax("checkpointing requires a data directory")
        })?;

        for entry in self.tables.iter() {
            checkpoint::save_table(data_dir, entry.value())?;
        }
        self.clog.save(&data_dir.join("commitlog.zvdb"))?;
        for entry in self.vectors.iter() {
            checkpoint::save_hnsw(data_dir, &entry.value().read())?;
        }

        if let Some(wal) = self.wal_handle() {
            wal.append(RecordType::Checkpoint, 0, 0, "", Vec::new())?;
            wal.flush()?;
        }
        tracing::info!(tables = self.tables.len(), "checkpoint complete");
        Ok(())
    }

    // ========================================================================
    // Internals shared by the executor and query path
    // ========================================================================

    pub(crate) fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::table_not_found(name))
    }

    pub(crate) fn index_on(&self, table: &str, column: &str) -> Option<Arc<SecondaryIndex>> {
        self.indexes
            .iter()
            .find(|entry| entry.value().table == table && entry.value().column == column)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn indexes_for(&self, table: &str) -> Vec<Arc<SecondaryIndex>> {
        self.indexes
            .iter()
            .filter(|entry| entry.value().table == table)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub(crate) fn vector_index(&self, dimension: usize) -> Option<Arc<RwLock<HnswIndex>>> {
        self.vectors
            .get(&dimension)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn wal_handle(&self) -> Option<Arc<WalWriter>> {
        self.wal.read().clone()
    }

    pub(crate) fn vector_index_or_create(&self, dimension: usize) -> Arc<RwLock<HnswIndex>> {
        Arc::clone(
            self.vectors
                .entry(dimension)
                .or_insert_with(|| {
                    Arc::new(RwLock::new(HnswIndex::new(
                        dimension,
                        self.config.hnsw.clone(),
                    )))
                })
                .value(),
        )
    }

    /// Join the thread's explicit transaction, or open an auto-commit one
    pub(crate) fn statement_begin(&self) -> Result<StatementCtx> {
        if let (Some(tx_id), Some(snapshot)) = (self.txn.current_tx(), self.txn.current_snapshot())
        {
            return Ok(StatementCtx {
                tx_id,
                snapshot,
                auto: false,
            });
        }
        let tx_id = self.txn.begin()?;
        let snapshot = self
            .txn
            .current_snapshot()
            .ok_or(Error::NoActiveTransaction)?;
        Ok(StatementCtx {
            tx_id,
            snapshot,
            auto: true,
        })
    }

    /// Finish a successful statement; commits the wrapper transaction
    pub(crate) fn statement_commit(&self, ctx: &StatementCtx) -> Result<()> {
        if !ctx.auto {
            return Ok(());
        }
        if self.wal_begun.remove(&ctx.tx_id).is_some() {
            if let Some(wal) = self.wal_handle() {
                wal.append(RecordType::CommitTx, ctx.tx_id, 0, "", Vec::new())?;
                wal.flush()?;
            }
        }
        self.txn.commit()?;
        Ok(())
    }

    /// Finish a failed statement
    ///
    /// Auto-commit wrappers roll back (and the ROLLBACK_TX record, written
    /// after any earlier records of the transaction, supersedes them during
    /// replay classification). Explicit transactions stay active: the caller
    /// decides.
    pub(crate) fn statement_abort(&self, ctx: &StatementCtx) {
        if !ctx.auto {
            return;
        }
        if self.wal_begun.remove(&ctx.tx_id).is_some() {
            if let Some(wal) = self.wal_handle() {
                let logged = wal
                    .append(RecordType::RollbackTx, ctx.tx_id, 0, "", Vec::new())
                    .and_then(|_| wal.flush());
                if let Err(e) = logged {
                    tracing::error!(
                        tx_id = ctx.tx_id,
                        error = %e,
                        "CRITICAL: failed to log rollback for aborted statement"
                    );
                }
            }
        }
        if let Err(e) = self.txn.rollback() {
            tracing::error!(tx_id = ctx.tx_id, error = %e, "CRITICAL: rollback failed");
        }
    }

    /// Keep the inverse vector ops of a completed statement for ROLLBACK
    ///
    /// Auto-commit statements discard them: the wrapper transaction resolves
    /// immediately and its failure path already ran the compensations.
    pub(crate) fn stash_rollback_undo(&self, ctx: &StatementCtx, undo: Vec<Compensation>) {
        if ctx.auto {
            return;
        }
        let vector_ops: Vec<Compensation> =
            undo.into_iter().filter(|c| c.is_vector_op()).collect();
        if !vector_ops.is_empty() {
            self.tx_undo
                .entry(ctx.tx_id)
                .or_default()
                .extend(vector_ops);
        }
    }

    /// Mark an explicit transaction unfit to commit
    ///
    /// Called when a statement fails after the transaction already holds
    /// mutation records in the WAL. Auto-commit wrappers resolve themselves
    /// with a ROLLBACK_TX instead.
    pub(crate) fn poison_after_failure(&self, ctx: &StatementCtx) {
        if !ctx.auto && self.wal_begun.contains_key(&ctx.tx_id) {
            self.poisoned.insert(ctx.tx_id, ());
        }
    }

    /// Append a mutation record (with a lazily emitted BEGIN_TX) and flush
    ///
    /// This is the WAL-ahead-of-mutation gate: callers only touch the table
    /// after this returns.
    pub(crate) fn log_mutation(
        &self,
        ctx: &StatementCtx,
        record_type: RecordType,
        row_id: u64,
        table_name: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let Some(wal) = self.wal_handle() else {
            return Ok(());
        };
        if self.wal_begun.insert(ctx.tx_id, ()).is_none() {
            wal.append(RecordType::BeginTx, ctx.tx_id, 0, "", Vec::new())?;
        }
        wal.append(record_type, ctx.tx_id, row_id, table_name, data)?;
        wal.flush()?;
        Ok(())
    }
}

/// Normalize user-supplied (column, value) pairs into full schema order
///
/// Missing columns become NULL; unknown columns and type mismatches
/// (including embedding dimension violations) are rejected.
pub(crate) fn normalize_insert_values(
    table: &Table,
    values: Vec<(String, ColumnValue)>,
) -> Result<Vec<(String, ColumnValue)>> {
    for (name, _) in &values {
        if table.schema.column(name).is_none() {
            return Err(Error::column_not_found(table.name.clone(), name.clone()));
        }
    }

    let mut entries = Vec::with_capacity(table.schema.columns.len());
    for column in &table.schema.columns {
        let value = values
            .iter()
            .find(|(name, _)| name == &column.name)
            .map(|(_, v)| v.clone())
            .unwrap_or(ColumnValue::Null);
        column.check_value(&value)?;
        entries.push((column.name.clone(), value));
    }
    Ok(entries)
}
