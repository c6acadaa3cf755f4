//! Typed query surface: predicates, ordering, and the read path
//!
//! The executor picks an ordered index when the predicate is `=`, a
//! comparison, or BETWEEN on an indexed column *and* the table holds at
//! least [`INDEX_SCAN_THRESHOLD`] chains; below that a full scan wins.
//! Either way candidates are materialized as row ids and filtered through
//! the visibility oracle before projection, so the indexes stay
//! MVCC-agnostic.

use crate::database::{Database, StatementCtx};
use crate::embedding::mock_query_vector;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{ColumnValue, Error, Result, Row};
use tessera_storage::Table;

/// Minimum chain count before an index probe beats a full scan
pub const INDEX_SCAN_THRESHOLD: usize = 100;

/// Comparison operator in a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

/// Row filter for SELECT / UPDATE / DELETE
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Every row matches
    All,
    /// `column <op> value`
    Compare {
        /// Column to test
        column: String,
        /// Operator
        op: CompareOp,
        /// Literal to compare against
        value: ColumnValue,
    },
    /// `column BETWEEN low AND high` (inclusive on both ends)
    Between {
        /// Column to test
        column: String,
        /// Lower bound
        low: ColumnValue,
        /// Upper bound
        high: ColumnValue,
    },
}

impl Predicate {
    /// Whether a materialized row satisfies the predicate
    ///
    /// NULLs and incomparable pairs never match, mirroring SQL three-valued
    /// logic collapsing to false.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Compare { column, op, value } => {
                let Some(actual) = row.get(column) else {
                    return false;
                };
                let Some(ordering) = actual.compare(value) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::NotEq => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtEq => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::GtEq => ordering != Ordering::Less,
                }
            }
            Predicate::Between { column, low, high } => {
                let Some(actual) = row.get(column) else {
                    return false;
                };
                matches!(
                    actual.compare(low),
                    Some(Ordering::Greater) | Some(Ordering::Equal)
                ) && matches!(
                    actual.compare(high),
                    Some(Ordering::Less) | Some(Ordering::Equal)
                )
            }
        }
    }

    /// The column this predicate constrains, if any
    pub fn column(&self) -> Option<&str> {
        match self {
            Predicate::All => None,
            Predicate::Compare { column, .. } => Some(column),
            Predicate::Between { column, .. } => Some(column),
        }
    }
}

/// Target of a similarity ordering
#[derive(Debug, Clone)]
pub enum SimilarityTarget {
    /// Free text, embedded by the mock query-vector generator
    Text(String),
    /// Externally supplied query vector
    Vector(Vec<f32>),
}

/// Result ordering
#[derive(Debug, Clone)]
pub enum OrderBy {
    /// Order by a column's value
    Column {
        /// Column to order by
        column: String,
        /// Descending instead of ascending
        descending: bool,
    },
    /// Approximate-nearest-neighbor order against an embedding column
    Similarity {
        /// Embedding column routed through the dimension-keyed vector index
        column: String,
        /// What to compare against
        target: SimilarityTarget,
    },
    /// Shuffle
    Vibes,
}

/// A typed SELECT statement
#[derive(Debug, Clone)]
pub struct Query {
    /// Table to read
    pub table: String,
    /// Row filter
    pub predicate: Predicate,
    /// Optional ordering
    pub order: Option<OrderBy>,
    /// Optional row cap, applied after ordering
    pub limit: Option<usize>,
    /// Rows to skip, applied after ordering
    pub offset: usize,
}

impl Query {
    /// SELECT every row of a table
    pub fn scan(table: impl Into<String>) -> Self {
        Query {
            table: table.into(),
            predicate: Predicate::All,
            order: None,
            limit: None,
            offset: 0,
        }
    }

    /// Set the predicate
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Set the ordering
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    /// Set the row cap
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

impl Database {
    /// Execute a typed SELECT
    pub fn select(&self, query: &Query) -> Result<Vec<Row>> {
        let table = self.table(&query.table)?;
        validate_predicate(&table, &query.predicate)?;

        let ctx = self.statement_begin()?;
        let result = self.select_inner(&table, query, &ctx);
        match result {
            Ok(rows) => {
                self.statement_commit(&ctx)?;
                Ok(rows)
            }
            Err(e) => {
                self.statement_abort(&ctx);
                Err(e)
            }
        }
    }

    /// Number of rows visible in a table
    pub fn count(&self, table: &str) -> Result<usize> {
        let table = self.table(table)?;
        let ctx = self.statement_begin()?;
        let count = table.count(ctx.tx_id, &ctx.snapshot, self.clog.as_ref());
        self.statement_commit(&ctx)?;
        Ok(count)
    }

    fn select_inner(&self, table: &Arc<Table>, query: &Query, ctx: &StatementCtx) -> Result<Vec<Row>> {
        let mut rows = self.matching_rows(table, &query.predicate, ctx)?;

        match &query.order {
            None => {}
            Some(OrderBy::Column { column, descending }) => {
                if table.schema.column(column).is_none() {
                    return Err(Error::column_not_found(table.name.clone(), column.clone()));
                }
                rows.sort_by(|a, b| {
                    let ordering = match (a.get(column), b.get(column)) {
                        (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                        _ => Ordering::Equal,
                    };
                    ordering.then_with(|| a.id.cmp(&b.id))
                });
                if *descending {
                    rows.reverse();
                }
            }
            Some(OrderBy::Similarity { column, target }) => {
                self.order_by_similarity(table, column, target, &mut rows)?;
            }
            Some(OrderBy::Vibes) => {
                rows.shuffle(&mut rand::thread_rng());
            }
        }

        let rows: Vec<Row> = rows.into_iter().skip(query.offset).collect();
        Ok(match query.limit {
            Some(limit) => rows.into_iter().take(limit).collect(),
            None => rows,
        })
    }

    fn order_by_similarity(
        &self,
        table: &Arc<Table>,
        column: &str,
        target: &SimilarityTarget,
        rows: &mut [Row],
    ) -> Result<()> {
        let dimension = table
            .schema
            .embedding_dimension(column)
            .ok_or_else(|| {
                Error::type_mismatch(format!(
                    "SIMILARITY ordering requires an embedding column, '{}' is not one",
                    column
                ))
            })?;

        let graph = self.vector_index(dimension).ok_or_else(|| {
            Error::invalid_syntax(format!(
                "no vector index exists for dimension {}",
                dimension
            ))
        })?;

        let query_vector = match target {
            SimilarityTarget::Text(text) => mock_query_vector(text, dimension),
            SimilarityTarget::Vector(v) => {
                if v.len() != dimension {
                    return Err(Error::type_mismatch(format!(
                        "query vector dimension {} does not match column dimension {}",
                        v.len(),
                        dimension
                    )));
                }
                v.clone()
            }
        };

        // Rank the whole graph, not just rows.len() hits: the graph is
        // shared across snapshots, and a top-k window could otherwise be
        // filled by ids this snapshot cannot see, leaving visible rows
        // unranked.
        let ranked = {
            let graph = graph.read();
            graph.search(&query_vector, graph.len().max(1))
        };
        let rank: HashMap<u64, usize> = ranked
            .iter()
            .enumerate()
            .map(|(position, (id, _))| (*id, position))
            .collect();

        // Rows the graph doesn't know (NULL vectors) sink to the end.
        rows.sort_by_key(|row| (rank.get(&row.id).copied().unwrap_or(usize::MAX), row.id));
        Ok(())
    }

    /// Materialize the rows matching a predicate, visibility-filtered
    pub(crate) fn matching_rows(
        &self,
        table: &Arc<Table>,
        predicate: &Predicate,
        ctx: &StatementCtx,
    ) -> Result<Vec<Row>> {
        let candidates = self.plan_candidates(table, predicate)?;
        let mut rows = Vec::new();
        for row_id in candidates {
            if let Some(row) = table.get(row_id, ctx.tx_id, &ctx.snapshot, self.clog.as_ref()) {
                if predicate.matches(&row) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    /// Candidate row ids for a predicate: an index probe when profitable,
    /// otherwise every chain
    fn plan_candidates(&self, table: &Arc<Table>, predicate: &Predicate) -> Result<Vec<u64>> {
        if table.chain_count() >= INDEX_SCAN_THRESHOLD {
            if let Some(column) = predicate.column() {
                if let Some(secondary) = self.index_on(&table.name, column) {
                    match predicate {
                        Predicate::Compare { op, value, .. } => match op {
                            CompareOp::Eq => return secondary.index.search(value),
                            CompareOp::Lt => {
                                return secondary.index.find_range(None, Some(value), true, false)
                            }
                            CompareOp::LtEq => {
                                return secondary.index.find_range(None, Some(value), true, true)
                            }
                            CompareOp::Gt => {
                                return secondary.index.find_range(Some(value), None, false, true)
                            }
                            CompareOp::GtEq => {
                                return secondary.index.find_range(Some(value), None, true, true)
                            }
                            // Inequality scans nearly everything anyway.
                            CompareOp::NotEq => {}
                        },
                        Predicate::Between { low, high, .. } => {
                            return secondary.index.find_range(Some(low), Some(high), true, true)
                        }
                        Predicate::All => {}
                    }
                }
            }
        }

        Ok(table.chains().into_iter().map(|(id, _)| id).collect())
    }
}

/// Reject predicates the storage layer cannot evaluate
pub(crate) fn validate_predicate(table: &Table, predicate: &Predicate) -> Result<()> {
    let check = |column: &str, values: &[&ColumnValue]| -> Result<()> {
        let decl = table
            .schema
            .column(column)
            .ok_or_else(|| Error::column_not_found(table.name.clone(), column.to_string()))?;
        if !decl.ty.is_indexable() {
            return Err(Error::type_mismatch(
                "comparisons over embedding columns are undefined",
            ));
        }
        for value in values {
            if matches!(value, ColumnValue::Embedding(_)) {
                return Err(Error::type_mismatch(
                    "comparisons over embedding values are undefined",
                ));
            }
        }
        Ok(())
    };

    match predicate {
        Predicate::All => Ok(()),
        Predicate::Compare { column, value, .. } => check(column, &[value]),
        Predicate::Between { column, low, high } => check(column, &[low, high]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<(&str, ColumnValue)>) -> Row {
        Row::new(
            1,
            values.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
        )
    }

    #[test]
    fn compare_ops_match_expected_rows() {
        let r = row(vec![("age", ColumnValue::Int(30))]);
        let pred = |op| Predicate::Compare {
            column: "age".into(),
            op,
            value: ColumnValue::Int(30),
        };
        assert!(pred(CompareOp::Eq).matches(&r));
        assert!(!pred(CompareOp::NotEq).matches(&r));
        assert!(pred(CompareOp::LtEq).matches(&r));
        assert!(pred(CompareOp::GtEq).matches(&r));
        assert!(!pred(CompareOp::Lt).matches(&r));
        assert!(!pred(CompareOp::Gt).matches(&r));
    }

    #[test]
    fn null_never_matches() {
        let r = row(vec![("age", ColumnValue::Null)]);
        for op in [CompareOp::Eq, CompareOp::NotEq, CompareOp::Lt, CompareOp::Gt] {
            let p = Predicate::Compare {
                column: "age".into(),
                op,
                value: ColumnValue::Int(30),
            };
            assert!(!p.matches(&r));
        }
    }

    #[test]
    fn between_is_inclusive() {
        let p = Predicate::Between {
            column: "n".into(),
            low: ColumnValue::Int(10),
            high: ColumnValue::Int(20),
        };
        assert!(p.matches(&row(vec![("n", ColumnValue::Int(10))])));
        assert!(p.matches(&row(vec![("n", ColumnValue::Int(20))])));
        assert!(p.matches(&row(vec![("n", ColumnValue::Int(15))])));
        assert!(!p.matches(&row(vec![("n", ColumnValue::Int(9))])));
        assert!(!p.matches(&row(vec![("n", ColumnValue::Int(21))])));
    }

    #[test]
    fn int_float_promotion_in_predicates() {
        let p = Predicate::Compare {
            column: "n".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Float(30.0),
        };
        assert!(p.matches(&row(vec![("n", ColumnValue::Int(30))])));
    }
}
