//! The operation surface: scan, review, publish, then search or delete by tag.
//!
//! A [`Discovery`] owns the rule registry, the classifier and the tag store,
//! and borrows a metadata service and a query engine for the lake. The last
//! non-dry-run scan is kept so it can be inspected and published.

use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{CatalogEnumerator, ColumnRef, MetadataService, TableFilter};
use crate::classify::{reconcile, Classification, Classifier, Reconciliation, ScanSummary};
use crate::engine::QueryEngine;
use crate::error::{DiscoverxError, EnumerationWarning, Result};
use crate::filter::NameFilter;
use crate::interface::CancelToken;
use crate::query::{self, DeleteReport, QueryCompiler, SearchPredicate, SearchReport, TagQuery};
use crate::rules::{Rule, RuleRegistry};
use crate::scan::{execute_parallel, ScanExecutor, ScanPlan, ScanPlanner, ScanReport};
use crate::settings::Settings;
use crate::sqlite::SqliteEngine;
use crate::store::{PublishEntry, PublishOutcome, PublishedRecord, TagStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(flatten)]
    pub filter: TableFilter,
    /// Rules to test, by name.
    #[serde(default)]
    pub rules: NameFilter,
    /// Overrides the configured sample size. Zero scans whole tables.
    #[serde(default)]
    pub sample_size: Option<usize>,
    #[serde(default)]
    pub what_if: bool,
}
impl ScanRequest {
    pub fn new(filter: TableFilter) -> Self {
        Self { filter, ..Self::default() }
    }
    pub fn rules(mut self, rules: impl Into<NameFilter>) -> Self {
        self.rules = rules.into();
        self
    }
    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = Some(sample_size);
        self
    }
    pub fn what_if(mut self) -> Self {
        self.what_if = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub classification: Classification,
    pub summary: ScanSummary,
}

pub struct Discovery {
    settings: Settings,
    registry: RwLock<RuleRegistry>,
    classifier: Classifier,
    metadata: Arc<dyn MetadataService>,
    engine: Arc<dyn QueryEngine>,
    store: TagStore,
    last_scan: Mutex<Option<ScanOutcome>>,
}

impl Discovery {
    pub fn new(
        settings: Settings,
        metadata: Arc<dyn MetadataService>,
        engine: Arc<dyn QueryEngine>,
        store: TagStore,
    ) -> Result<Self> {
        settings.validate()?;
        let registry = RuleRegistry::with_custom_rules(settings.rules()?)?;
        let classifier = Classifier::new(settings.threshold)?.with_tag_prefix(&settings.tag_prefix);
        Ok(Self {
            settings,
            registry: RwLock::new(registry),
            classifier,
            metadata,
            engine,
            store,
            last_scan: Mutex::new(None),
        })
    }

    /// Scans the SQLite lake at the configured path, keeping tags in the configured store.
    pub fn sqlite(settings: Settings) -> Result<Self> {
        let engine = Arc::new(SqliteEngine::open(&settings.lake())?);
        let store = TagStore::open(&settings.store(), &settings.tag_location)?;
        Self::new(settings, engine.clone(), engine, store)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn store(&self) -> &TagStore {
        &self.store
    }
    pub fn engine(&self) -> &Arc<dyn QueryEngine> {
        &self.engine
    }

    // ------------- Rules -------------
    pub fn list_rules(&self, filter: &NameFilter) -> Result<Vec<Arc<Rule>>> {
        Ok(self.registry.read()?.list_rules(filter))
    }

    /// Validates and registers a rule, making it callable by the engine when custom.
    pub fn register_rule(&self, rule: Rule) -> Result<Arc<Rule>> {
        let kept = self.registry.write()?.register(rule)?;
        self.engine.register_rule(&kept)?;
        Ok(kept)
    }

    // ------------- Scanning -------------
    fn plan(&self, request: &ScanRequest) -> Result<(ScanPlan, Vec<EnumerationWarning>)> {
        let rules = self.registry.read()?.list_rules(&request.rules);
        let (tables, warnings) = CatalogEnumerator::new(self.metadata.as_ref())
            .enumerate(&request.filter)
            .collect_all();
        let sample_size = match request.sample_size {
            Some(n) => (n > 0).then_some(n),
            None => self.settings.sample_size(),
        };
        let plan = ScanPlanner::new(self.engine.dialect()).plan(&tables, &rules, sample_size);
        info!(tables = tables.len(), rules = rules.len(), units = plan.len(), "planned scan");
        Ok((plan, warnings))
    }

    fn conclude(&self, mut report: ScanReport, warnings: Vec<EnumerationWarning>) -> Result<ScanOutcome> {
        report.warnings = warnings;
        let classification = self.classifier.classify(&report.results);
        let summary = classification.summary();
        info!(
            %summary,
            failures = report.failures.len(),
            warnings = report.warnings.len(),
            cancelled = report.cancelled,
            "scan finished"
        );
        let outcome = ScanOutcome { report, classification, summary };
        if !outcome.report.what_if {
            *self.last_scan.lock()? = Some(outcome.clone());
        }
        Ok(outcome)
    }

    pub fn scan(&self, request: &ScanRequest) -> Result<ScanOutcome> {
        self.scan_with(request, &CancelToken::new())
    }

    pub fn scan_with(&self, request: &ScanRequest, cancel: &CancelToken) -> Result<ScanOutcome> {
        let (plan, warnings) = self.plan(request)?;
        let report = ScanExecutor::new(self.engine.as_ref()).execute(&plan, request.what_if, cancel);
        self.conclude(report, warnings)
    }

    /// Like [`Discovery::scan_with`], but runs up to `max_concurrency` tables at once.
    /// Enumeration and classification run on a blocking thread as well.
    pub async fn scan_parallel(self: &Arc<Self>, request: &ScanRequest, cancel: &CancelToken) -> Result<ScanOutcome> {
        let discovery = Arc::clone(self);
        let planned = request.clone();
        let (plan, warnings) = tokio::task::spawn_blocking(move || discovery.plan(&planned))
            .await
            .map_err(worker_failed)??;
        let report = if request.what_if {
            ScanExecutor::new(self.engine.as_ref()).execute(&plan, true, cancel)
        } else {
            execute_parallel(&plan, Arc::clone(&self.engine), self.settings.max_concurrency, cancel).await
        };
        let discovery = Arc::clone(self);
        tokio::task::spawn_blocking(move || discovery.conclude(report, warnings))
            .await
            .map_err(worker_failed)?
    }

    pub fn last_scan(&self) -> Result<Option<ScanOutcome>> {
        Ok(self.last_scan.lock()?.clone())
    }

    // ------------- Review and publish -------------
    /// Differences between the last scan and the published tags.
    pub fn inspect(&self) -> Result<Reconciliation> {
        let last_scan = self.last_scan.lock()?;
        let outcome = last_scan.as_ref().ok_or(DiscoverxError::NoScan)?;
        Ok(reconcile(&outcome.classification, &self.store.read_active()?))
    }

    /// Publishes the last scan's classification as is.
    pub fn publish(&self) -> Result<PublishOutcome> {
        self.publish_reviewed(self.inspect()?)
    }

    /// Publishes a reconciliation after operator review.
    pub fn publish_reviewed(&self, reviewed: Reconciliation) -> Result<PublishOutcome> {
        self.store.publish(&reviewed.into_assignments())
    }

    pub fn history(&self, column: &ColumnRef) -> Result<Vec<PublishedRecord>> {
        self.store.history(column)
    }

    pub fn ledger(&self) -> Result<Vec<PublishEntry>> {
        self.store.ledger()
    }

    // ------------- Search and delete -------------
    /// Rows where any column tagged with one of `tags` equals `value`.
    pub fn search<I, S>(&self, value: &str, tags: I) -> Result<SearchReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tag_query = TagQuery::new(tags, SearchPredicate::Equals(value.to_string()));
        self.search_by(&tag_query, &CancelToken::new())
    }

    /// Rows where any column tagged with one of `tags` matches `pattern`.
    pub fn search_matching<I, S>(&self, pattern: &str, tags: I) -> Result<SearchReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tag_query = TagQuery::new(tags, SearchPredicate::Matches(pattern.to_string()));
        self.search_by(&tag_query, &CancelToken::new())
    }

    pub fn search_by(&self, tag_query: &TagQuery, cancel: &CancelToken) -> Result<SearchReport> {
        let columns = query::resolve(&self.store, &tag_query.tags)?;
        let statements = QueryCompiler::new(self.engine.dialect()).compile_search(&columns, &tag_query.predicate);
        Ok(query::run_search(self.engine.as_ref(), statements, cancel))
    }

    /// Deletes rows where any column tagged with one of `tags` equals `value`.
    /// With `what_if` only the statements are returned.
    pub fn delete<I, S>(&self, value: &str, tags: I, what_if: bool) -> Result<DeleteReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tag_query = TagQuery::new(tags, SearchPredicate::Equals(value.to_string()));
        self.delete_by(&tag_query, what_if, &CancelToken::new())
    }

    pub fn delete_by(&self, tag_query: &TagQuery, what_if: bool, cancel: &CancelToken) -> Result<DeleteReport> {
        let columns = query::resolve(&self.store, &tag_query.tags)?;
        let statements = QueryCompiler::new(self.engine.dialect()).compile_delete(&columns, &tag_query.predicate);
        let report = query::run_delete(self.engine.as_ref(), statements, what_if, cancel);
        info!(
            tables = report.statements.len(),
            failures = report.failures().count(),
            what_if,
            "delete finished"
        );
        Ok(report)
    }
}

fn worker_failed(e: tokio::task::JoinError) -> DiscoverxError {
    DiscoverxError::Invariant(format!("scan worker failed: {e}"))
}
