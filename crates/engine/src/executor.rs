//! Statement executor: INSERT / UPDATE / DELETE choreography
//!
//! Every mutation follows the same ordered steps: validate, log to the WAL
//! (flushed before anything is touched), mutate the table, then maintain the
//! secondary indexes. Each applied step pushes a compensation; on failure the
//! compensations run in reverse order so no partial statement stays visible.
//! A compensation that itself fails is logged CRITICAL but never masks the
//! original error.
//!
//! Ordered-index maintenance is append-only: UPDATE adds the new key and
//! DELETE touches nothing, so a key stays probeable for every snapshot that
//! can still see the version carrying it. Stale entries only ever produce
//! false positives, which the visibility-plus-predicate re-check filters;
//! superseded keys are reclaimed together with their versions by garbage
//! collection. Vector-graph edits cannot be append-only (removal is
//! destructive), so their inverse operations are kept per transaction and
//! replayed on ROLLBACK.
//!
//! Failure scope differs by transaction mode: an auto-commit statement rolls
//! back wholesale (its ROLLBACK_TX record supersedes anything written
//! earlier), while inside an explicit transaction only the failing row's
//! partial work is undone and the caller decides what to do with the
//! transaction.

use crate::database::{normalize_insert_values, Database, SecondaryIndex, StatementCtx};
use crate::query::{validate_predicate, Predicate};
use crate::testing;
use parking_lot::RwLock;
use std::sync::Arc;
use tessera_core::{ColumnType, ColumnValue, Error, Result, Row};
use tessera_durability::wal::record::RecordType;
use tessera_durability::WalRecord;
use tessera_index::HnswIndex;
use tessera_storage::Table;

/// A registered rollback action for one applied step
pub(crate) enum Compensation {
    /// Undo a fresh insert: remove the chain outright
    RemoveChain { table: Arc<Table>, row_id: u64 },
    /// Undo a vector insert
    VectorRemove {
        graph: Arc<RwLock<HnswIndex>>,
        row_id: u64,
    },
    /// Undo a vector removal: put the old vector back
    VectorInsert {
        graph: Arc<RwLock<HnswIndex>>,
        row_id: u64,
        vector: Vec<f32>,
    },
    /// Undo an ordered-index insert: remove the new key
    IndexRemove {
        index: Arc<SecondaryIndex>,
        key: ColumnValue,
        row_id: u64,
    },
}

impl Compensation {
    /// Whether this action reverts a vector-graph edit
    ///
    /// These are the only actions that must survive the statement and be
    /// replayed on a later ROLLBACK; everything else is either append-only
    /// (ordered-index keys) or handled by MVCC visibility (versions).
    pub(crate) fn is_vector_op(&self) -> bool {
        matches!(
            self,
            Compensation::VectorInsert { .. } | Compensation::VectorRemove { .. }
        )
    }
}

/// Run compensations newest-first
pub(crate) fn run_compensations(stack: Vec<Compensation>) {
    for action in stack.into_iter().rev() {
        let outcome: Result<()> = match action {
            Compensation::RemoveChain { ref table, row_id } => {
                table.physical_delete(row_id);
                Ok(())
            }
            Compensation::VectorRemove { ref graph, row_id } => {
                graph.write().remove_node(row_id)
            }
            Compensation::VectorInsert {
                ref graph,
                row_id,
                ref vector,
            } => graph.write().insert(vector, row_id).map(|_| ()),
            Compensation::IndexRemove {
                ref index,
                ref key,
                row_id,
            } => index.index.delete(key, row_id).map(|_| ()),
        };
        if let Err(e) = outcome {
            tracing::error!(
                error = %e,
                "CRITICAL: rollback compensation failed, state may need operator attention"
            );
        }
    }
}

impl Database {
    /// INSERT one row, returning its assigned row id
    pub fn insert(&self, table_name: &str, values: Vec<(String, ColumnValue)>) -> Result<u64> {
        let table = self.table(table_name)?;
        let entries = normalize_insert_values(&table, values)?;

        let ctx = self.statement_begin()?;
        match self.insert_row(&table, entries, &ctx) {
            Ok(row_id) => {
                self.statement_commit(&ctx)?;
                Ok(row_id)
            }
            Err(e) => {
                self.statement_abort(&ctx);
                self.poison_after_failure(&ctx);
                Err(e)
            }
        }
    }

    /// UPDATE all rows matching the predicate; returns the update count
    pub fn update(
        &self,
        table_name: &str,
        assignments: Vec<(String, ColumnValue)>,
        predicate: &Predicate,
    ) -> Result<usize> {
        let table = self.table(table_name)?;
        validate_predicate(&table, predicate)?;
        validate_assignments(&table, &assignments)?;

        let ctx = self.statement_begin()?;
        match self.update_rows(&table, &assignments, predicate, &ctx) {
            Ok(updated) => {
                self.statement_commit(&ctx)?;
                Ok(updated)
            }
            Err(e) => {
                self.statement_abort(&ctx);
                self.poison_after_failure(&ctx);
                Err(e)
            }
        }
    }

    /// DELETE all rows matching the predicate; returns the delete count
    pub fn delete(&self, table_name: &str, predicate: &Predicate) -> Result<usize> {
        let table = self.table(table_name)?;
        validate_predicate(&table, predicate)?;

        let ctx = self.statement_begin()?;
        match self.delete_rows(&table, predicate, &ctx) {
            Ok(deleted) => {
                self.statement_commit(&ctx)?;
                Ok(deleted)
            }
            Err(e) => {
                self.statement_abort(&ctx);
                self.poison_after_failure(&ctx);
                Err(e)
            }
        }
    }

    fn insert_row(
        &self,
        table: &Arc<Table>,
        entries: Vec<(String, ColumnValue)>,
        ctx: &StatementCtx,
    ) -> Result<u64> {
        let row_id = table.allocate_row_id();
        let row = Row::new(row_id, entries.clone());

        self.log_mutation(
            ctx,
            RecordType::InsertRow,
            row_id,
            &table.name,
            WalRecord::encode_row(&row)?,
        )?;

        let mut undo: Vec<Compensation> = Vec::new();

        table.insert_with_id(row_id, entries, ctx.tx_id)?;
        undo.push(Compensation::RemoveChain {
            table: Arc::clone(table),
            row_id,
        });

        for column in &table.schema.columns {
            let ColumnType::Embedding(_) = column.ty else {
                continue;
            };
            let Some(ColumnValue::Embedding(vector)) = row.get(&column.name) else {
                continue;
            };
            if testing::take_vector_insert_failure() {
                run_compensations(undo);
                return Err(Error::OutOfMemory {
                    context: "vector index node".into(),
                });
            }
            let graph = self.vector_index_or_create(vector.len());
            if let Err(e) = graph.write().insert(vector, row_id) {
                run_compensations(undo);
                return Err(e);
            }
            undo.push(Compensation::VectorRemove { graph, row_id });
        }

        for secondary in self.indexes_for(&table.name) {
            let Some(value) = row.get(&secondary.column) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if let Err(e) = secondary.index.insert(value.clone(), row_id) {
                run_compensations(undo);
                return Err(e);
            }
            undo.push(Compensation::IndexRemove {
                index: secondary,
                key: value.clone(),
                row_id,
            });
        }

        self.stash_rollback_undo(ctx, undo);
        Ok(row_id)
    }

    fn update_rows(
        &self,
        table: &Arc<Table>,
        assignments: &[(String, ColumnValue)],
        predicate: &Predicate,
        ctx: &StatementCtx,
    ) -> Result<usize> {
        let rows = self.matching_rows(table, predicate, ctx)?;

        let mut statement_undo: Vec<Compensation> = Vec::new();
        let mut updated = 0;

        for old_row in rows {
            let row_id = old_row.id;
            let mut new_row = old_row.clone();
            for (column, value) in assignments {
                new_row.set(column, value.clone());
            }

            self.log_mutation(
                ctx,
                RecordType::UpdateRow,
                row_id,
                &table.name,
                WalRecord::encode_update(&old_row, &new_row)?,
            )?;

            let mut row_undo: Vec<Compensation> = Vec::new();

            // Vector maintenance happens before the CAS: on a lost race the
            // swap is rolled back and the statement aborts.
            if let Err(e) = self.swap_vectors(table, &old_row, assignments, &mut row_undo) {
                self.fail_statement(ctx, row_undo, &mut statement_undo);
                return Err(e);
            }

            if let Err(e) = table.update(
                row_id,
                assignments,
                ctx.tx_id,
                &ctx.snapshot,
                self.clog.as_ref(),
            ) {
                self.fail_statement(ctx, row_undo, &mut statement_undo);
                return Err(e);
            }
            // The new version itself needs no compensation: if the
            // transaction aborts it is invisible and its claim on the old
            // head is stealable.

            if let Err(e) = self.reindex_row(table, &old_row, &new_row, assignments, &mut row_undo)
            {
                self.fail_statement(ctx, row_undo, &mut statement_undo);
                return Err(e);
            }

            statement_undo.append(&mut row_undo);
            updated += 1;
        }

        self.stash_rollback_undo(ctx, statement_undo);
        Ok(updated)
    }

    fn delete_rows(
        &self,
        table: &Arc<Table>,
        predicate: &Predicate,
        ctx: &StatementCtx,
    ) -> Result<usize> {
        let rows = self.matching_rows(table, predicate, ctx)?;

        let mut statement_undo: Vec<Compensation> = Vec::new();
        let mut deleted = 0;

        for old_row in rows {
            let row_id = old_row.id;

            self.log_mutation(
                ctx,
                RecordType::DeleteRow,
                row_id,
                &table.name,
                WalRecord::encode_row(&old_row)?,
            )?;

            if let Err(e) = table.delete(row_id, ctx.tx_id, &ctx.snapshot, self.clog.as_ref()) {
                self.fail_statement(ctx, Vec::new(), &mut statement_undo);
                return Err(e);
            }

            // Ordered-index entries stay: older snapshots still probe the
            // row through them, and once the delete commits the visibility
            // re-check filters the id everywhere else.
            let mut row_undo: Vec<Compensation> = Vec::new();

            for column in &table.schema.columns {
                let ColumnType::Embedding(_) = column.ty else {
                    continue;
                };
                let Some(ColumnValue::Embedding(vector)) = old_row.get(&column.name) else {
                    continue;
                };
                let Some(graph) = self.vector_index(vector.len()) else {
                    continue;
                };
                let result = graph.write().remove_node(row_id);
                match result {
                    Ok(()) => row_undo.push(Compensation::VectorInsert {
                        graph: Arc::clone(&graph),
                        row_id,
                        vector: vector.clone(),
                    }),
                    Err(Error::NodeNotFound { .. }) => {
                        // The vector was never indexed (for example a graph
                        // created after the row); nothing to remove.
                        tracing::warn!(row_id, "deleted row had no vector index entry");
                    }
                    Err(e) => {
                        self.fail_statement(ctx, row_undo, &mut statement_undo);
                        return Err(e);
                    }
                }
            }

            statement_undo.append(&mut row_undo);
            deleted += 1;
        }

        self.stash_rollback_undo(ctx, statement_undo);
        Ok(deleted)
    }

    /// Remove the old embedding and index the new one for every embedding
    /// column touched by the assignments
    fn swap_vectors(
        &self,
        table: &Arc<Table>,
        old_row: &Row,
        assignments: &[(String, ColumnValue)],
        row_undo: &mut Vec<Compensation>,
    ) -> Result<()> {
        for (column, new_value) in assignments {
            let Some(decl) = table.schema.column(column) else {
                continue;
            };
            let ColumnType::Embedding(_) = decl.ty else {
                continue;
            };

            let old_vector = match old_row.get(column) {
                Some(ColumnValue::Embedding(v)) => Some(v.clone()),
                _ => None,
            };
            let new_vector = match new_value {
                ColumnValue::Embedding(v) => Some(v.clone()),
                _ => None,
            };
            if old_vector == new_vector {
                continue;
            }

            if let Some(old_vector) = old_vector {
                let graph = self.vector_index_or_create(old_vector.len());
                graph.write().remove_node(old_row.id)?;
                row_undo.push(Compensation::VectorInsert {
                    graph,
                    row_id: old_row.id,
                    vector: old_vector,
                });
            }
            if let Some(new_vector) = new_vector {
                if testing::take_vector_insert_failure() {
                    return Err(Error::OutOfMemory {
                        context: "vector index node".into(),
                    });
                }
                let graph = self.vector_index_or_create(new_vector.len());
                graph.write().insert(&new_vector, old_row.id)?;
                row_undo.push(Compensation::VectorRemove {
                    graph,
                    row_id: old_row.id,
                });
            }
        }
        Ok(())
    }

    /// Append the new key for every indexed column an update touched
    ///
    /// The superseded key is deliberately left in place: snapshots that still
    /// see the old version must keep probing the row through it. It becomes a
    /// filtered false positive for everyone else and is reclaimed with the
    /// version by garbage collection.
    fn reindex_row(
        &self,
        table: &Arc<Table>,
        old_row: &Row,
        new_row: &Row,
        assignments: &[(String, ColumnValue)],
        row_undo: &mut Vec<Compensation>,
    ) -> Result<()> {
        for secondary in self.indexes_for(&table.name) {
            if !assignments.iter().any(|(c, _)| c == &secondary.column) {
                continue;
            }
            let old_key = old_row.get(&secondary.column).filter(|v| !v.is_null());
            let new_key = new_row.get(&secondary.column).filter(|v| !v.is_null());
            if old_key == new_key {
                continue;
            }

            if let Some(new_key) = new_key {
                secondary.index.insert(new_key.clone(), old_row.id)?;
                row_undo.push(Compensation::IndexRemove {
                    index: secondary,
                    key: new_key.clone(),
                    row_id: old_row.id,
                });
            }
        }
        Ok(())
    }

    /// Unwind a failing statement
    ///
    /// The failing row's partial work is always undone. Earlier rows of the
    /// same statement are undone only under auto-commit, where the whole
    /// wrapper transaction is about to roll back; inside an explicit
    /// transaction they stay applied, the caller decides, and their inverse
    /// vector ops are kept for a later ROLLBACK.
    fn fail_statement(
        &self,
        ctx: &StatementCtx,
        row_undo: Vec<Compensation>,
        statement_undo: &mut Vec<Compensation>,
    ) {
        run_compensations(row_undo);
        let remaining = std::mem::take(statement_undo);
        if ctx.auto {
            run_compensations(remaining);
        } else {
            self.stash_rollback_undo(ctx, remaining);
        }
    }
}

fn validate_assignments(table: &Table, assignments: &[(String, ColumnValue)]) -> Result<()> {
    if assignments.is_empty() {
        return Err(Error::invalid_syntax("UPDATE needs at least one assignment"));
    }
    for (i, (column, value)) in assignments.iter().enumerate() {
        if assignments[..i].iter().any(|(c, _)| c == column) {
            return Err(Error::invalid_syntax(format!(
                "column '{}' assigned twice",
                column
            )));
        }
        let decl = table
            .schema
            .column(column)
            .ok_or_else(|| Error::column_not_found(table.name.clone(), column.clone()))?;
        decl.check_value(value)?;
    }
    Ok(())
}
