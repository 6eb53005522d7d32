//! Table identities and the enumeration of scannable columns.
//!
//! The metadata service is external; [`MetadataService`] is the seam through
//! which catalogs, schemas, tables and columns are listed. The
//! [`CatalogEnumerator`] expands three [`NameFilter`]s into tables with their
//! columns, lazily and in catalog → schema → table → column order.

use std::collections::VecDeque;
use std::fmt;
use std::hash::BuildHasherDefault;

use seahash::SeaHasher;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EnumerationWarning, Result};
use crate::filter::NameFilter;

// hashmaps keyed by names use a fast hashing algo
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// Where a column lives, independent of the data type it was listed with.
pub type ColumnLocation = (String, String, String, String);

// ------------- TableRef -------------
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}
impl TableRef {
    pub fn new(catalog: &str, schema: &str, table: &str) -> Self {
        Self {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
    pub fn column(&self, column: &str, data_type: &str) -> ColumnRef {
        ColumnRef {
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            table: self.table.clone(),
            column: column.to_string(),
            data_type: data_type.to_string(),
        }
    }
}
impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

// ------------- ColumnRef -------------
// Field order gives the catalog → schema → table → column ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub column: String,
    pub data_type: String,
}
impl ColumnRef {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.catalog, &self.schema, &self.table)
    }
    pub fn location(&self) -> ColumnLocation {
        (
            self.catalog.clone(),
            self.schema.clone(),
            self.table.clone(),
            self.column.clone(),
        )
    }
}
impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.catalog, self.schema, self.table, self.column)
    }
}

/// A table together with the columns listed for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableColumns {
    pub table: TableRef,
    pub columns: Vec<ColumnRef>,
}

// ------------- Metadata service -------------
pub trait MetadataService: Send + Sync {
    fn list_catalogs(&self) -> Result<Vec<String>>;
    fn list_schemas(&self, catalog: &str) -> Result<Vec<String>>;
    fn list_tables(&self, catalog: &str, schema: &str) -> Result<Vec<String>>;
    /// Returns `(column name, data type)` pairs in declaration order.
    fn list_columns(&self, catalog: &str, schema: &str, table: &str) -> Result<Vec<(String, String)>>;
}

// ------------- Enumerator -------------
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableFilter {
    #[serde(default)]
    pub catalogs: NameFilter,
    #[serde(default)]
    pub schemas: NameFilter,
    #[serde(default)]
    pub tables: NameFilter,
}
impl TableFilter {
    pub fn new(
        catalogs: impl Into<NameFilter>,
        schemas: impl Into<NameFilter>,
        tables: impl Into<NameFilter>,
    ) -> Self {
        Self {
            catalogs: catalogs.into(),
            schemas: schemas.into(),
            tables: tables.into(),
        }
    }
}

pub struct CatalogEnumerator<'m> {
    metadata: &'m dyn MetadataService,
}

impl<'m> CatalogEnumerator<'m> {
    pub fn new(metadata: &'m dyn MetadataService) -> Self {
        Self { metadata }
    }
    pub fn enumerate(&self, filter: &TableFilter) -> Enumeration<'m> {
        Enumeration {
            metadata: self.metadata,
            filter: filter.clone(),
            catalogs: None,
            schemas: VecDeque::new(),
            tables: VecDeque::new(),
            warnings: Vec::new(),
        }
    }
}

/// Lazy walk over the tables selected by a [`TableFilter`].
///
/// Names are listed one level at a time as the iterator advances, and
/// anything that cannot be listed is skipped and recorded in
/// [`Enumeration::warnings`] instead of ending the walk.
pub struct Enumeration<'m> {
    metadata: &'m dyn MetadataService,
    filter: TableFilter,
    catalogs: Option<VecDeque<String>>,
    schemas: VecDeque<(String, String)>,
    tables: VecDeque<TableRef>,
    warnings: Vec<EnumerationWarning>,
}

impl<'m> Enumeration<'m> {
    pub fn warnings(&self) -> &[EnumerationWarning] {
        &self.warnings
    }
    /// Drains the walk, returning the tables and the warnings gathered.
    pub fn collect_all(mut self) -> (Vec<TableColumns>, Vec<EnumerationWarning>) {
        let tables: Vec<TableColumns> = self.by_ref().collect();
        (tables, self.warnings)
    }
    /// Flattens the walk into its columns.
    pub fn columns(self) -> impl Iterator<Item = ColumnRef> + 'm {
        self.flat_map(|table| table.columns)
    }
    fn record(&mut self, scope: String, message: String) {
        warn!(%scope, %message, "skipping during enumeration");
        self.warnings.push(EnumerationWarning { scope, message });
    }
    fn sorted(mut names: Vec<String>, filter: &NameFilter) -> Vec<String> {
        names.sort();
        names.dedup();
        filter.select(names.iter())
    }
    // Refills the table queue from the next schema (or catalog) with tables.
    fn refill(&mut self) -> bool {
        while self.tables.is_empty() {
            if let Some((catalog, schema)) = self.schemas.pop_front() {
                match self.metadata.list_tables(&catalog, &schema) {
                    Ok(names) => {
                        for table in Self::sorted(names, &self.filter.tables) {
                            self.tables.push_back(TableRef::new(&catalog, &schema, &table));
                        }
                    }
                    Err(e) => self.record(format!("{catalog}.{schema}"), e.to_string()),
                }
                continue;
            }
            if self.catalogs.is_none() {
                let catalogs = match self.metadata.list_catalogs() {
                    Ok(names) => Self::sorted(names, &self.filter.catalogs),
                    Err(e) => {
                        self.record("*".to_string(), e.to_string());
                        Vec::new()
                    }
                };
                self.catalogs = Some(catalogs.into());
            }
            let next_catalog = self.catalogs.as_mut().and_then(VecDeque::pop_front);
            match next_catalog {
                Some(catalog) => match self.metadata.list_schemas(&catalog) {
                    Ok(names) => {
                        for schema in Self::sorted(names, &self.filter.schemas) {
                            self.schemas.push_back((catalog.clone(), schema));
                        }
                    }
                    Err(e) => self.record(catalog, e.to_string()),
                },
                None => return false,
            }
        }
        true
    }
}

impl Iterator for Enumeration<'_> {
    type Item = TableColumns;

    fn next(&mut self) -> Option<TableColumns> {
        loop {
            if !self.refill() {
                return None;
            }
            let table = self.tables.pop_front()?;
            match self.metadata.list_columns(&table.catalog, &table.schema, &table.table) {
                Ok(columns) if columns.is_empty() => {
                    self.record(table.to_string(), "no readable columns".to_string());
                }
                Ok(columns) => {
                    let columns = columns
                        .iter()
                        .map(|(name, data_type)| table.column(name, data_type))
                        .collect::<Vec<_>>();
                    debug!(%table, columns = columns.len(), "enumerated table");
                    return Some(TableColumns { table, columns });
                }
                Err(e) => self.record(table.to_string(), e.to_string()),
            }
        }
    }
}
