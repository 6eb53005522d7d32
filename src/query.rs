//! Tag-scoped search and delete across tables.
//!
//! Tags are resolved to columns through the active records of the
//! [`TagStore`]. One statement is compiled per table, and each table's
//! statement succeeds or fails on its own: there is no atomicity across
//! tables, so callers get an outcome per table.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{ColumnRef, TableRef};
use crate::engine::{Dialect, QueryEngine, Rows};
use crate::error::{DiscoverxError, PerTableOperationError, Result};
use crate::interface::CancelToken;
use crate::store::TagStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SearchPredicate {
    /// The column equals the value.
    Equals(String),
    /// The column matches the regular expression.
    Matches(String),
}
impl SearchPredicate {
    fn render(&self, dialect: Dialect, column: &str) -> String {
        match self {
            Self::Equals(value) => format!("{column} = {}", dialect.literal(value)),
            Self::Matches(pattern) => dialect.regex_match(column, pattern),
        }
    }
}

/// A search or delete scoped to the columns carrying any of the tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuery {
    pub tags: BTreeSet<String>,
    pub predicate: SearchPredicate,
}
impl TagQuery {
    pub fn new<I, S>(tags: I, predicate: SearchPredicate) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            predicate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStatement {
    pub table: TableRef,
    /// The resolved columns the predicate is applied to.
    pub columns: Vec<String>,
    pub sql: String,
}

/// Columns with an active record carrying any of `tags`.
pub fn resolve(store: &TagStore, tags: &BTreeSet<String>) -> Result<Vec<ColumnRef>> {
    let columns: Vec<ColumnRef> = store
        .read_active()?
        .into_iter()
        .filter(|(_, assigned)| !assigned.is_disjoint(tags))
        .map(|(column, _)| column)
        .collect();
    if columns.is_empty() {
        return Err(DiscoverxError::NoMatchingColumns {
            tags: tags.iter().cloned().collect(),
        });
    }
    debug!(columns = columns.len(), "resolved tags");
    Ok(columns)
}

pub struct QueryCompiler {
    dialect: Dialect,
}

impl QueryCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn by_table(columns: &[ColumnRef]) -> BTreeMap<TableRef, Vec<String>> {
        let mut tables: BTreeMap<TableRef, Vec<String>> = BTreeMap::new();
        for column in columns {
            let names = tables.entry(column.table_ref()).or_default();
            if !names.contains(&column.column) {
                names.push(column.column.clone());
            }
        }
        tables
    }

    fn condition(&self, columns: &[String], predicate: &SearchPredicate) -> String {
        columns
            .iter()
            .map(|c| predicate.render(self.dialect, &self.dialect.identifier(c)))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    pub fn compile_search(&self, columns: &[ColumnRef], predicate: &SearchPredicate) -> Vec<TableStatement> {
        Self::by_table(columns)
            .into_iter()
            .map(|(table, names)| {
                let sql = format!(
                    "SELECT * FROM {} WHERE {}",
                    self.dialect.table(&table),
                    self.condition(&names, predicate)
                );
                TableStatement { table, columns: names, sql }
            })
            .collect()
    }

    pub fn compile_delete(&self, columns: &[ColumnRef], predicate: &SearchPredicate) -> Vec<TableStatement> {
        Self::by_table(columns)
            .into_iter()
            .map(|(table, names)| {
                let sql = format!(
                    "DELETE FROM {} WHERE {}",
                    self.dialect.table(&table),
                    self.condition(&names, predicate)
                );
                TableStatement { table, columns: names, sql }
            })
            .collect()
    }
}

// ------------- Execution -------------
/// Rows found in one table, labeled with the table they came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRows {
    pub table: TableRef,
    pub matched_columns: Vec<String>,
    pub rows: Rows,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchReport {
    pub statements: Vec<TableStatement>,
    pub results: Vec<TableRows>,
    pub failures: Vec<PerTableOperationError>,
    pub cancelled: bool,
}
impl SearchReport {
    pub fn row_count(&self) -> usize {
        self.results.iter().map(|r| r.rows.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeleteOutcome {
    Deleted { table: TableRef, rows: Option<usize> },
    Failed(PerTableOperationError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteReport {
    pub what_if: bool,
    pub statements: Vec<TableStatement>,
    pub outcomes: Vec<DeleteOutcome>,
    pub cancelled: bool,
}
impl DeleteReport {
    pub fn failures(&self) -> impl Iterator<Item = &PerTableOperationError> {
        self.outcomes.iter().filter_map(|o| match o {
            DeleteOutcome::Failed(failure) => Some(failure),
            DeleteOutcome::Deleted { .. } => None,
        })
    }
}

fn failure(statement: &TableStatement, e: DiscoverxError) -> PerTableOperationError {
    warn!(table = %statement.table, error = %e, "table operation failed");
    PerTableOperationError {
        table: statement.table.clone(),
        statement: statement.sql.clone(),
        message: e.to_string(),
    }
}

pub fn run_search(engine: &dyn QueryEngine, statements: Vec<TableStatement>, cancel: &CancelToken) -> SearchReport {
    let mut report = SearchReport::default();
    for statement in &statements {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match engine.execute(&statement.sql) {
            Ok(rows) => {
                debug!(table = %statement.table, rows = rows.len(), "searched table");
                report.results.push(TableRows {
                    table: statement.table.clone(),
                    matched_columns: statement.columns.clone(),
                    rows,
                });
            }
            Err(e) => report.failures.push(failure(statement, e)),
        }
    }
    info!(tables = statements.len(), rows = report.row_count(), failures = report.failures.len(), "search finished");
    report.statements = statements;
    report
}

pub fn run_delete(
    engine: &dyn QueryEngine,
    statements: Vec<TableStatement>,
    what_if: bool,
    cancel: &CancelToken,
) -> DeleteReport {
    let mut report = DeleteReport { what_if, ..DeleteReport::default() };
    if !what_if {
        for statement in &statements {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = match engine.execute(&statement.sql) {
                Ok(rows) => {
                    info!(table = %statement.table, deleted = ?rows.affected, "deleted from table");
                    DeleteOutcome::Deleted { table: statement.table.clone(), rows: rows.affected }
                }
                Err(e) => DeleteOutcome::Failed(failure(statement, e)),
            };
            report.outcomes.push(outcome);
        }
    }
    report.statements = statements;
    report
}
