//! DiscoverX – rule-based discovery and tagging of sensitive columns in a data lake.
//!
//! Columns are sampled and tested against *rules*: named regular expressions
//! or predicates with examples that must and must not match. When the share of
//! matching values in a column reaches a threshold, the column is classified
//! with the rule's tag (`dx_<rule>`). Published tags then drive searches and
//! deletes across every table carrying them, e.g. "find every row in any table
//! where an email column equals `alice@example.com`".
//!
//! ## Modules
//! * [`rules`] – The [`rules::Rule`] type, built-in rules and the [`rules::RuleRegistry`].
//! * [`filter`] – Name filters (`*`, `name`, `a,b`, `prod_*`) selecting catalogs, schemas, tables and rules.
//! * [`catalog`] – Table and column identities plus the lazy [`catalog::CatalogEnumerator`].
//! * [`scan`] – One sampling statement per table, executed sequentially or in parallel.
//! * [`classify`] – Threshold classification and reconciliation against published tags.
//! * [`store`] – The append-only SQLite tag store with a tamper-evident publish ledger.
//! * [`query`] – Tag-scoped search and delete, compiled per table.
//! * [`engine`] / [`sqlite`] – The query engine seam, SQL dialects and a SQLite engine.
//! * [`discovery`] – The operation surface tying the above together.
//! * [`interface`] – Background operations with cooperative cancellation.
//! * [`server`] – JSON endpoints over HTTP.
//! * [`settings`] – Settings from `discoverx.toml` and `DISCOVERX_*` variables.
//!
//! ## Quick Start
//! ```
//! use discoverx::catalog::TableFilter;
//! use discoverx::discovery::{Discovery, ScanRequest};
//! use discoverx::settings::Settings;
//! use discoverx::sqlite::SqliteEngine;
//! use discoverx::store::TagStore;
//! use discoverx::sqlite::PersistenceMode;
//! use std::sync::Arc;
//!
//! let lake = Arc::new(SqliteEngine::open(&PersistenceMode::InMemory).unwrap());
//! lake.execute_batch("create table users (id integer, contact text);
//!                     insert into users values (1, 'alice@example.com'), (2, 'bob@example.org');").unwrap();
//! let store = TagStore::open(&PersistenceMode::InMemory, "discoverx_column_tags").unwrap();
//! let discovery = Discovery::new(Settings::default(), lake.clone(), lake, store).unwrap();
//!
//! let outcome = discovery.scan(&ScanRequest::new(TableFilter::default())).unwrap();
//! assert_eq!(outcome.summary.classified_columns, 1);
//! discovery.publish().unwrap();
//!
//! let found = discovery.search("bob@example.org", ["dx_email"]).unwrap();
//! assert_eq!(found.row_count(), 1);
//! ```

pub mod catalog;
pub mod classify;
pub mod datatype;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod filter;
pub mod interface;
pub mod query;
pub mod rules;
pub mod scan;
pub mod server;
pub mod settings;
pub mod sqlite;
pub mod store;
