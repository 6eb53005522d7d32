//! Scan planning and execution.
//!
//! A plan holds one [`ScanUnit`] per table. The unit's single statement
//! samples the table once and counts, for every compatible (column, rule)
//! pair, how many sampled values match. Units are independent: a failing unit
//! is recorded in the [`ScanReport`] and the remaining units still run.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{ColumnRef, TableColumns, TableRef};
use crate::engine::{Dialect, QueryEngine, Rows};
use crate::error::{EnumerationWarning, ScanUnitError};
use crate::interface::CancelToken;
use crate::rules::Rule;

pub const DEFAULT_SAMPLE_SIZE: usize = 10_000;

// ------------- FrequencyResult -------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyResult {
    pub column: ColumnRef,
    pub rule_name: String,
    pub matched_count: u64,
    pub total_count: u64,
    pub frequency: f64,
}
impl FrequencyResult {
    /// `None` when nothing was sampled, since the frequency is then undefined.
    pub fn new(column: ColumnRef, rule_name: &str, matched_count: u64, total_count: u64) -> Option<Self> {
        if total_count == 0 || matched_count > total_count {
            return None;
        }
        Some(Self {
            column,
            rule_name: rule_name.to_string(),
            matched_count,
            total_count,
            frequency: matched_count as f64 / total_count as f64,
        })
    }
}

// ------------- Plan -------------
/// The rules tested against one column of a unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnCheck {
    pub column: ColumnRef,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanUnit {
    pub index: usize,
    pub table: TableRef,
    pub checks: Vec<ColumnCheck>,
    pub statement: String,
}
impl ScanUnit {
    /// Number of values the statement returns in its single row.
    pub fn width(&self) -> usize {
        self.checks.iter().map(|c| 1 + c.rules.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanPlan {
    pub units: Vec<ScanUnit>,
    pub sample_size: Option<usize>,
}
impl ScanPlan {
    pub fn statements(&self) -> Vec<String> {
        self.units.iter().map(|u| u.statement.clone()).collect()
    }
    pub fn len(&self) -> usize {
        self.units.len()
    }
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

pub struct ScanPlanner {
    dialect: Dialect,
}

impl ScanPlanner {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn plan(&self, tables: &[TableColumns], rules: &[Arc<Rule>], sample_size: Option<usize>) -> ScanPlan {
        let mut units = Vec::new();
        for table in tables {
            let checks: Vec<(ColumnCheck, Vec<&Rule>)> = table
                .columns
                .iter()
                .filter_map(|column| {
                    let applicable: Vec<&Rule> = rules
                        .iter()
                        .map(Arc::as_ref)
                        .filter(|rule| rule.accepts(&column.data_type))
                        .collect();
                    if applicable.is_empty() {
                        return None;
                    }
                    let check = ColumnCheck {
                        column: column.clone(),
                        rules: applicable.iter().map(|r| r.name().to_string()).collect(),
                    };
                    Some((check, applicable))
                })
                .collect();
            if checks.is_empty() {
                debug!(table = %table.table, "no column compatible with the selected rules");
                continue;
            }
            let statement = self.sampling_statement(&table.table, &checks, sample_size);
            units.push(ScanUnit {
                index: units.len(),
                table: table.table.clone(),
                checks: checks.into_iter().map(|(check, _)| check).collect(),
                statement,
            });
        }
        ScanPlan { units, sample_size }
    }

    // One pass over the sample: a non-null count per column followed by a
    // match count per rule of that column.
    fn sampling_statement(
        &self,
        table: &TableRef,
        checks: &[(ColumnCheck, Vec<&Rule>)],
        sample_size: Option<usize>,
    ) -> String {
        let d = self.dialect;
        let mut projections = Vec::new();
        for (i, (check, rules)) in checks.iter().enumerate() {
            let column = d.identifier(&check.column.column);
            projections.push(format!("COUNT({column}) AS {}", d.identifier(&format!("dx_total_{i}"))));
            for (j, rule) in rules.iter().enumerate() {
                projections.push(format!(
                    "COALESCE(SUM(CASE WHEN {} THEN 1 ELSE 0 END), 0) AS {}",
                    d.rule_match(&column, rule),
                    d.identifier(&format!("dx_match_{i}_{j}"))
                ));
            }
        }
        let sampled_columns: Vec<String> = checks.iter().map(|(c, _)| d.identifier(&c.column.column)).collect();
        let limit = sample_size.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
        format!(
            "SELECT {} FROM (SELECT {} FROM {}{limit}) AS dx_sample",
            projections.join(", "),
            sampled_columns.join(", "),
            d.table(table),
        )
    }
}

// ------------- Execution -------------
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub what_if: bool,
    pub statements: Vec<String>,
    pub results: Vec<FrequencyResult>,
    pub failures: Vec<ScanUnitError>,
    pub warnings: Vec<EnumerationWarning>,
    pub units_total: usize,
    pub units_succeeded: usize,
    pub cancelled: bool,
}
impl ScanReport {
    /// Distinct columns that produced at least one frequency.
    pub fn scanned_columns(&self) -> Vec<ColumnRef> {
        let mut columns: Vec<ColumnRef> = self.results.iter().map(|r| r.column.clone()).collect();
        columns.sort();
        columns.dedup();
        columns
    }
}

type UnitOutcome = std::result::Result<Vec<FrequencyResult>, ScanUnitError>;

pub struct ScanExecutor<'e> {
    engine: &'e dyn QueryEngine,
}

impl<'e> ScanExecutor<'e> {
    pub fn new(engine: &'e dyn QueryEngine) -> Self {
        Self { engine }
    }

    /// Runs the units one after the other. With `what_if` nothing is executed
    /// and the report only carries the statements.
    pub fn execute(&self, plan: &ScanPlan, what_if: bool, cancel: &CancelToken) -> ScanReport {
        let mut report = ScanReport {
            what_if,
            units_total: plan.len(),
            ..ScanReport::default()
        };
        if what_if {
            report.statements = plan.statements();
            return report;
        }
        for unit in &plan.units {
            if cancel.is_cancelled() {
                info!(completed = unit.index, total = plan.len(), "scan cancelled");
                report.cancelled = true;
                break;
            }
            info!(table = %unit.table, unit = unit.index + 1, total = plan.len(), "scanning table");
            let outcome = run_unit(self.engine, unit);
            absorb(&mut report, outcome);
        }
        report
    }
}

/// Runs the units on blocking worker tasks, at most `max_concurrency` at a
/// time. Outcomes are merged by unit index, so the report lists results in
/// plan order no matter which unit finished first.
pub async fn execute_parallel(
    plan: &ScanPlan,
    engine: Arc<dyn QueryEngine>,
    max_concurrency: usize,
    cancel: &CancelToken,
) -> ScanReport {
    let total = plan.len();
    let mut outcomes: Vec<(usize, Option<UnitOutcome>)> = stream::iter(plan.units.iter().cloned())
        .map(|unit| {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            async move {
                let index = unit.index;
                if cancel.is_cancelled() {
                    return (index, None);
                }
                let table = unit.table.clone();
                let statement = unit.statement.clone();
                info!(%table, unit = index + 1, total, "scanning table");
                let outcome = tokio::task::spawn_blocking(move || run_unit(engine.as_ref(), &unit))
                    .await
                    .unwrap_or_else(|e| {
                        Err(ScanUnitError { table, statement, message: format!("worker failed: {e}") })
                    });
                (index, Some(outcome))
            }
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|(index, _)| *index);

    let mut report = ScanReport { units_total: total, ..ScanReport::default() };
    for (_, outcome) in outcomes {
        match outcome {
            Some(outcome) => absorb(&mut report, outcome),
            None => report.cancelled = true,
        }
    }
    report
}

fn absorb(report: &mut ScanReport, outcome: UnitOutcome) {
    match outcome {
        Ok(results) => {
            report.units_succeeded += 1;
            report.results.extend(results);
        }
        Err(failure) => report.failures.push(failure),
    }
}

fn run_unit(engine: &dyn QueryEngine, unit: &ScanUnit) -> UnitOutcome {
    let failure = |message: String| {
        warn!(table = %unit.table, %message, "scan unit failed");
        ScanUnitError {
            table: unit.table.clone(),
            statement: unit.statement.clone(),
            message,
        }
    };
    let rows = engine.execute(&unit.statement).map_err(|e| failure(e.to_string()))?;
    let results = decode(unit, &rows).map_err(failure)?;
    debug!(table = %unit.table, results = results.len(), "scan unit finished");
    Ok(results)
}

fn decode(unit: &ScanUnit, rows: &Rows) -> std::result::Result<Vec<FrequencyResult>, String> {
    let row = match rows.rows.as_slice() {
        [row] => row,
        other => return Err(format!("expected one row of counts, got {}", other.len())),
    };
    if row.len() != unit.width() {
        return Err(format!("expected {} counts, got {}", unit.width(), row.len()));
    }
    let mut values = row.iter();
    let mut count = |what: &str| {
        values
            .next()
            .and_then(|v| v.as_count())
            .ok_or_else(|| format!("unreadable {what} count"))
    };
    let mut results = Vec::new();
    for check in &unit.checks {
        let total = count("total")?;
        for rule in &check.rules {
            let matched = count("match")?;
            if matched > total {
                return Err(format!("{matched} matches out of {total} values for '{}'", check.column));
            }
            results.extend(FrequencyResult::new(check.column.clone(), rule, matched, total));
        }
    }
    Ok(results)
}
