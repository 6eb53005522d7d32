//! Durable, versioned storage of published tags.
//!
//! The tag table is an append-only log. A record is never rewritten except for
//! its `Active` flag and `Superseded_At` time when a later publish drops the
//! tag. Every publish that changes something appends an entry to a ledger
//! table, whose superhash chains the digest of the batch with the previous
//! superhash, so the publish history is tamper-evident.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{ColumnLocation, ColumnRef, OtherHasher};
use crate::classify::TagAssignments;
use crate::error::{DiscoverxError, Result};
use crate::sqlite::PersistenceMode;

pub const DEFAULT_LOCATION: &str = "discoverx_column_tags";

const REQUIRED_COLUMNS: [&str; 11] = [
    "Record_Identity",
    "Table_Catalog",
    "Table_Schema",
    "Table_Name",
    "Column_Name",
    "Data_Type",
    "Tag_Name",
    "Publish_Version",
    "Published_At",
    "Superseded_At",
    "Active",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedRecord {
    pub column: ColumnRef,
    pub tag: String,
    pub version: u64,
    pub published_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishEntry {
    pub version: u64,
    pub published_at: DateTime<Utc>,
    pub inserted: usize,
    pub deactivated: usize,
    pub digest: String,
    pub superhash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishOutcome {
    /// The version written, `None` when the assignments were already published.
    pub version: Option<u64>,
    pub inserted: usize,
    pub deactivated: usize,
    pub superhash: Option<String>,
}

fn publish_error(e: rusqlite::Error) -> DiscoverxError {
    DiscoverxError::Publish(e.to_string())
}

fn existing_columns(connection: &Connection, location: &str) -> Result<Vec<String>> {
    let mut statement = connection
        .prepare("select name from pragma_table_info(?1)")
        .map_err(publish_error)?;
    let present = statement
        .query_map([location], |row| row.get::<_, String>(0))
        .map_err(publish_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(publish_error)?;
    Ok(present)
}

fn verify_columns(location: &str, present: &[String]) -> Result<()> {
    if present.is_empty() {
        return Err(DiscoverxError::Publish(format!("tag table '{location}' does not exist")));
    }
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !present.iter().any(|p| p.eq_ignore_ascii_case(required)))
        .collect();
    if !missing.is_empty() {
        return Err(DiscoverxError::Publish(format!(
            "tag table '{location}' is incompatible, missing columns: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

// ------------- Tag store -------------
pub struct TagStore {
    connection: Mutex<Connection>,
    location: String,
}

impl TagStore {
    pub fn open(mode: &PersistenceMode, location: &str) -> Result<Self> {
        Self::new(mode.open()?, location)
    }
    pub fn new(connection: Connection, location: &str) -> Result<Self> {
        lazy_static! {
            static ref LOCATION: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
        }
        if !LOCATION.is_match(location) {
            return Err(DiscoverxError::Config(format!("'{location}' is not a valid tag table location")));
        }
        // an existing table is kept, but only if it has the expected columns
        let present = existing_columns(&connection, location)?;
        if !present.is_empty() {
            verify_columns(location, &present)?;
        }
        connection.execute_batch(&format!(
            "
            create table if not exists {location} (
                Record_Identity integer not null,
                Table_Catalog text not null,
                Table_Schema text not null,
                Table_Name text not null,
                Column_Name text not null,
                Data_Type text not null,
                Tag_Name text not null,
                Publish_Version integer not null,
                Published_At text not null,
                Superseded_At text null,
                Active integer not null,
                constraint referenceable_{location}_Record_Identity primary key (
                    Record_Identity
                )
            );
            create unique index if not exists {location}_one_active on {location} (
                Table_Catalog, Table_Schema, Table_Name, Column_Name, Tag_Name
            ) where Active = 1;
            create table if not exists {location}_ledger (
                Publish_Version integer not null,
                Published_At text not null,
                Inserted integer not null,
                Deactivated integer not null,
                Digest text not null,
                Superhash text not null,
                constraint referenceable_{location}_Publish_Version primary key (
                    Publish_Version
                )
            );
            "
        ))?;
        Ok(Self {
            connection: Mutex::new(connection),
            location: location.to_string(),
        })
    }
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Makes `assignments` the active tags of the columns it names.
    ///
    /// Runs as one transaction: superseded records are deactivated, new ones
    /// inserted and a ledger entry appended, or nothing is written at all.
    /// Columns absent from `assignments` keep their active tags.
    pub fn publish(&self, assignments: &TagAssignments) -> Result<PublishOutcome> {
        let mut connection = self.connection.lock()?;
        let tx = connection.transaction().map_err(publish_error)?;
        let location = &self.location;
        verify_columns(location, &existing_columns(&tx, location)?)?;

        let mut active: HashMap<ColumnLocation, Vec<(i64, String)>, OtherHasher> = HashMap::default();
        {
            let mut statement = tx
                .prepare(&format!(
                    "select Record_Identity, Table_Catalog, Table_Schema, Table_Name, Column_Name, Tag_Name
                        from {location}
                        where Active = 1"
                ))
                .map_err(publish_error)?;
            let mut rows = statement.query([]).map_err(publish_error)?;
            while let Some(row) = rows.next().map_err(publish_error)? {
                let key = (
                    row.get(1).map_err(publish_error)?,
                    row.get(2).map_err(publish_error)?,
                    row.get(3).map_err(publish_error)?,
                    row.get(4).map_err(publish_error)?,
                );
                active
                    .entry(key)
                    .or_default()
                    .push((row.get(0).map_err(publish_error)?, row.get(5).map_err(publish_error)?));
            }
        }

        // keys naming the same column with another data type share one tag set
        let mut merged: BTreeMap<ColumnLocation, (&ColumnRef, BTreeSet<&String>)> = BTreeMap::new();
        for (column, tags) in assignments {
            merged
                .entry(column.location())
                .or_insert_with(|| (column, BTreeSet::new()))
                .1
                .extend(tags);
        }

        let mut deactivate: Vec<(i64, &ColumnRef, String)> = Vec::new();
        let mut insert: Vec<(&ColumnRef, &String)> = Vec::new();
        for (column, tags) in merged.values() {
            let column = *column;
            let current = active.get(&column.location()).map(Vec::as_slice).unwrap_or(&[]);
            for (identity, tag) in current {
                if !tags.contains(tag) {
                    deactivate.push((*identity, column, tag.clone()));
                }
            }
            for tag in tags {
                if !current.iter().any(|(_, t)| t == *tag) {
                    insert.push((column, *tag));
                }
            }
        }
        if deactivate.is_empty() && insert.is_empty() {
            debug!(columns = assignments.len(), "tags already published");
            return Ok(PublishOutcome::default());
        }

        let previous: Option<(u64, String)> = tx
            .query_row(
                &format!("select Publish_Version, Superhash from {location}_ledger order by Publish_Version desc limit 1"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(publish_error)?;
        let version = previous.as_ref().map(|(v, _)| v + 1).unwrap_or(1);
        let next_identity: i64 = tx
            .query_row(&format!("select coalesce(max(Record_Identity), 0) + 1 from {location}"), [], |row| row.get(0))
            .map_err(publish_error)?;
        let now = Utc::now();

        // the digest covers the batch in a canonical order
        let mut lines: Vec<String> = Vec::with_capacity(deactivate.len() + insert.len());
        {
            let mut superseded = tx
                .prepare(&format!(
                    "update {location} set Active = 0, Superseded_At = ?1 where Record_Identity = ?2 and Active = 1"
                ))
                .map_err(publish_error)?;
            for (identity, column, tag) in &deactivate {
                superseded.execute(params![&now, identity]).map_err(publish_error)?;
                lines.push(format!("-{column}\t{tag}"));
            }
            let mut added = tx
                .prepare(&format!(
                    "insert into {location} (
                        Record_Identity, Table_Catalog, Table_Schema, Table_Name, Column_Name,
                        Data_Type, Tag_Name, Publish_Version, Published_At, Superseded_At, Active
                    ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, null, 1)"
                ))
                .map_err(publish_error)?;
            for (offset, (column, tag)) in insert.iter().enumerate() {
                added
                    .execute(params![
                        next_identity + offset as i64,
                        &column.catalog,
                        &column.schema,
                        &column.table,
                        &column.column,
                        &column.data_type,
                        tag,
                        version,
                        &now
                    ])
                    .map_err(publish_error)?;
                lines.push(format!("+{column}\t{tag}"));
            }
        }
        lines.sort();
        let digest = blake3::hash(lines.join("\n").as_bytes());
        let mut chain = blake3::Hasher::new();
        if let Some((_, superhash)) = &previous {
            chain.update(superhash.as_bytes());
        }
        chain.update(digest.as_bytes());
        let superhash = chain.finalize().to_hex().to_string();

        tx.execute(
            &format!(
                "insert into {location}_ledger (
                    Publish_Version, Published_At, Inserted, Deactivated, Digest, Superhash
                ) values (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![version, &now, insert.len(), deactivate.len(), digest.to_hex().to_string(), &superhash],
        )
        .map_err(publish_error)?;
        tx.commit().map_err(publish_error)?;

        info!(
            version,
            inserted = insert.len(),
            deactivated = deactivate.len(),
            location = %self.location,
            "published tags"
        );
        Ok(PublishOutcome {
            version: Some(version),
            inserted: insert.len(),
            deactivated: deactivate.len(),
            superhash: Some(superhash),
        })
    }

    fn records(&self, filter: &str, arguments: &[&dyn rusqlite::ToSql]) -> Result<Vec<PublishedRecord>> {
        let connection = self.connection.lock()?;
        let mut statement = connection.prepare(&format!(
            "select Table_Catalog, Table_Schema, Table_Name, Column_Name, Data_Type, Tag_Name,
                    Publish_Version, Published_At, Superseded_At, Active
                from {}
                where {filter}
                order by Table_Catalog, Table_Schema, Table_Name, Column_Name, Tag_Name, Publish_Version",
            self.location
        ))?;
        let records = statement
            .query_map(arguments, |row| {
                Ok(PublishedRecord {
                    column: ColumnRef {
                        catalog: row.get(0)?,
                        schema: row.get(1)?,
                        table: row.get(2)?,
                        column: row.get(3)?,
                        data_type: row.get(4)?,
                    },
                    tag: row.get(5)?,
                    version: row.get(6)?,
                    published_at: row.get(7)?,
                    superseded_at: row.get(8)?,
                    active: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn active_records(&self) -> Result<Vec<PublishedRecord>> {
        self.records("Active = 1", &[])
    }

    /// The active tags per column. Columns without active tags are absent.
    /// Records of one column published under different data types are
    /// reported under the first of them.
    pub fn read_active(&self) -> Result<TagAssignments> {
        let mut assignments = TagAssignments::new();
        let mut known: HashMap<ColumnLocation, ColumnRef, OtherHasher> = HashMap::default();
        for record in self.active_records()? {
            let column = known
                .entry(record.column.location())
                .or_insert_with(|| record.column.clone())
                .clone();
            assignments.entry(column).or_default().insert(record.tag);
        }
        Ok(assignments)
    }

    /// Every record ever published for a column, active or not.
    pub fn history(&self, column: &ColumnRef) -> Result<Vec<PublishedRecord>> {
        self.records(
            "Table_Catalog = ?1 and Table_Schema = ?2 and Table_Name = ?3 and Column_Name = ?4",
            &[&column.catalog, &column.schema, &column.table, &column.column],
        )
    }

    pub fn ledger(&self) -> Result<Vec<PublishEntry>> {
        let connection = self.connection.lock()?;
        let mut statement = connection.prepare(&format!(
            "select Publish_Version, Published_At, Inserted, Deactivated, Digest, Superhash
                from {}_ledger
                order by Publish_Version",
            self.location
        ))?;
        let entries = statement
            .query_map([], |row| {
                Ok(PublishEntry {
                    version: row.get(0)?,
                    published_at: row.get(1)?,
                    inserted: row.get(2)?,
                    deactivated: row.get(3)?,
                    digest: row.get(4)?,
                    superhash: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// The superhash of the latest publish, if anything has been published.
    pub fn current_superhash(&self) -> Result<Option<String>> {
        Ok(self.ledger()?.pop().map(|entry| entry.superhash))
    }
}
