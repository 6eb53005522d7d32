//! The seam towards the external query engine.
//!
//! The core never executes anything itself. It renders statement text for a
//! [`Dialect`] and hands it to a [`QueryEngine`], which returns [`Rows`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::TableRef;
use crate::error::Result;
use crate::rules::{Rule, RuleDefinition};

pub trait QueryEngine: Send + Sync {
    fn dialect(&self) -> Dialect;
    fn execute(&self, sql: &str) -> Result<Rows>;
    /// Makes a custom rule callable from statements. Engines that evaluate
    /// custom rules some other way can leave this as is.
    fn register_rule(&self, _rule: &Arc<Rule>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}
impl Value {
    /// Reads a count, tolerating engines that return counts as reals or text.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Null => Some(0),
            Self::Integer(i) => u64::try_from(*i).ok(),
            Self::Real(r) if *r >= 0.0 && r.fract() == 0.0 => Some(*r as u64),
            Self::Text(t) => t.trim().parse().ok(),
            _ => None,
        }
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(t) => write!(f, "{t}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// The outcome of one executed statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a data-modifying statement, when the engine reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected: Option<usize>,
}
impl Rows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ------------- Dialects -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Double-quoted three-part names and `REGEXP`.
    #[default]
    Ansi,
    /// Backtick-quoted three-part names, `RLIKE` and backslash escaping in literals.
    Spark,
    /// Double-quoted `schema.table` names (catalogs do not exist) and `REGEXP`.
    Sqlite,
}

impl Dialect {
    pub fn identifier(&self, name: &str) -> String {
        match self {
            Self::Spark => format!("`{}`", name.replace('`', "``")),
            Self::Ansi | Self::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
    pub fn literal(&self, value: &str) -> String {
        match self {
            Self::Spark => format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::Ansi | Self::Sqlite => format!("'{}'", value.replace('\'', "''")),
        }
    }
    pub fn table(&self, table: &TableRef) -> String {
        match self {
            Self::Sqlite => format!("{}.{}", self.identifier(&table.schema), self.identifier(&table.table)),
            Self::Ansi | Self::Spark => format!(
                "{}.{}.{}",
                self.identifier(&table.catalog),
                self.identifier(&table.schema),
                self.identifier(&table.table)
            ),
        }
    }
    pub fn regex_match(&self, expression: &str, pattern: &str) -> String {
        match self {
            Self::Spark => format!("{expression} RLIKE {}", self.literal(pattern)),
            Self::Ansi | Self::Sqlite => format!("{expression} REGEXP {}", self.literal(pattern)),
        }
    }
    /// Boolean expression testing `expression` against a rule.
    pub fn rule_match(&self, expression: &str, rule: &Rule) -> String {
        match rule.definition() {
            RuleDefinition::Regex(regex) => self.regex_match(expression, regex.as_str()),
            RuleDefinition::Custom(_) => format!("{}({expression})", rule.sql_function()),
        }
    }
}
