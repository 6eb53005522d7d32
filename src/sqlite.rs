//! SQLite backed query engine and metadata service.
//!
//! SQLite has no catalogs, so the engine reports a single catalog under a
//! configurable name and treats attached databases as schemas. `REGEXP` is
//! provided through a `regexp()` scalar function using the `regex` crate,
//! and custom rules are exposed as `dx_rule_<name>()` functions.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::catalog::MetadataService;
use crate::engine::{Dialect, QueryEngine, Rows, Value};
use crate::error::{DiscoverxError, Result};
use crate::rules::{Rule, RuleKind, RuleRegistry};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub const DEFAULT_CATALOG: &str = "sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}
impl PersistenceMode {
    pub fn open(&self) -> Result<Connection> {
        let connection = match self {
            Self::InMemory => Connection::open_in_memory()?,
            Self::File(path) => Connection::open(path)?,
        };
        Ok(connection)
    }
}

pub struct SqliteEngine {
    connection: Mutex<Connection>,
    catalog: String,
}

impl SqliteEngine {
    pub fn new(connection: Connection, catalog: &str) -> Result<Self> {
        connection.create_scalar_function(
            "regexp",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let regex: Arc<Regex> = ctx.get_or_create_aux(0, |pattern| -> std::result::Result<Regex, BoxError> {
                    Ok(Regex::new(pattern.as_str()?)?)
                })?;
                Ok(text_of(ctx.get_raw(1)).map(|text| regex.is_match(&text)))
            },
        )?;
        Ok(Self {
            connection: Mutex::new(connection),
            catalog: catalog.to_string(),
        })
    }
    pub fn open(mode: &PersistenceMode) -> Result<Self> {
        Self::new(mode.open()?, DEFAULT_CATALOG)
    }
    /// Exposes every custom rule of the registry as a SQL function.
    pub fn register_rules(&self, registry: &RuleRegistry) -> Result<()> {
        for rule in registry.custom_rules() {
            self.register_rule(rule)?;
        }
        Ok(())
    }
    /// Runs a batch of statements, e.g. to create and seed tables.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.connection
            .lock()?
            .execute_batch(sql)
            .map_err(|e| DiscoverxError::Execution(e.to_string()))
    }
    fn names(&self, sql: &str, arguments: &[&str]) -> Result<Vec<String>> {
        let connection = self.connection.lock()?;
        let mut statement = connection.prepare(sql).map_err(metadata_error)?;
        let names = statement
            .query_map(rusqlite::params_from_iter(arguments.iter()), |row| row.get::<_, String>(0))
            .map_err(metadata_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(metadata_error)?;
        Ok(names)
    }
}

fn metadata_error(e: rusqlite::Error) -> DiscoverxError {
    DiscoverxError::Metadata(e.to_string())
}
fn execution_error(e: rusqlite::Error) -> DiscoverxError {
    DiscoverxError::Execution(e.to_string())
}

fn text_of(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Text(text) => Some(String::from_utf8_lossy(text).into_owned()),
        other => Some(to_value(other).to_string()),
    }
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl QueryEngine for SqliteEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
    fn register_rule(&self, rule: &Arc<Rule>) -> Result<()> {
        if rule.kind() != RuleKind::Custom {
            return Ok(());
        }
        let name = rule.sql_function();
        let kept = AssertUnwindSafe(Arc::clone(rule));
        self.connection.lock()?.create_scalar_function(
            name.as_str(),
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            move |ctx| {
                let rule = &kept;
                Ok(text_of(ctx.get_raw(0)).map(|text| rule.0.is_match(&text)))
            },
        )?;
        debug!(function = %name, "registered custom rule function");
        Ok(())
    }
    fn execute(&self, sql: &str) -> Result<Rows> {
        let connection = self.connection.lock()?;
        let mut statement = connection.prepare(sql).map_err(execution_error)?;
        let columns: Vec<String> = statement.column_names().into_iter().map(String::from).collect();
        if columns.is_empty() {
            let affected = statement.execute([]).map_err(execution_error)?;
            return Ok(Rows { columns, rows: Vec::new(), affected: Some(affected) });
        }
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = statement.query([]).map_err(execution_error)?;
        while let Some(row) = cursor.next().map_err(execution_error)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(to_value(row.get_ref(i).map_err(execution_error)?));
            }
            rows.push(values);
        }
        Ok(Rows { columns, rows, affected: None })
    }
}

impl MetadataService for SqliteEngine {
    fn list_catalogs(&self) -> Result<Vec<String>> {
        Ok(vec![self.catalog.clone()])
    }
    fn list_schemas(&self, catalog: &str) -> Result<Vec<String>> {
        if catalog != self.catalog {
            return Err(DiscoverxError::Metadata(format!("unknown catalog '{catalog}'")));
        }
        self.names("select name from pragma_database_list where name <> 'temp' order by name", &[])
    }
    fn list_tables(&self, _catalog: &str, schema: &str) -> Result<Vec<String>> {
        let sql = format!(
            "select name from {}.sqlite_master where type = 'table' and name not like 'sqlite_%' order by name",
            Dialect::Sqlite.identifier(schema)
        );
        self.names(&sql, &[])
    }
    fn list_columns(&self, _catalog: &str, schema: &str, table: &str) -> Result<Vec<(String, String)>> {
        let connection = self.connection.lock()?;
        let mut statement = connection
            .prepare("select name, type from pragma_table_info(?1, ?2) order by cid")
            .map_err(metadata_error)?;
        let columns = statement
            .query_map(params![table, schema], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(metadata_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(metadata_error)?;
        if columns.is_empty() {
            return Err(DiscoverxError::Metadata(format!("table '{schema}.{table}' does not exist")));
        }
        Ok(columns)
    }
}
