//! Threshold classification and reconciliation with the last publish.
//!
//! A rule's frequency on a column turns into a tag (`dx_<rule>`) once it
//! reaches the threshold. Several rules may tag the same column. Before
//! publishing, a [`Reconciliation`] shows what changes relative to the
//! published tags and lets an operator accept or reject each change.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::catalog::{ColumnLocation, ColumnRef, OtherHasher};
use crate::error::{DiscoverxError, Result};
use crate::scan::FrequencyResult;

pub const DEFAULT_THRESHOLD: f64 = 0.95;
pub const DEFAULT_TAG_PREFIX: &str = "dx_";

/// Tags per column. A column mapped to an empty set carries no tags.
pub type TagAssignments = BTreeMap<ColumnRef, BTreeSet<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationTag {
    pub column: ColumnRef,
    pub rule_name: String,
    pub tag: String,
    pub frequency: f64,
    pub effective: bool,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    threshold: f64,
    tag_prefix: String,
}

impl Classifier {
    pub fn new(threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DiscoverxError::Config(format!(
                "classification threshold has to be in interval [0,1], given value is {threshold}"
            )));
        }
        Ok(Self {
            threshold,
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
        })
    }
    pub fn with_tag_prefix(mut self, prefix: &str) -> Self {
        self.tag_prefix = prefix.to_string();
        self
    }
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
    pub fn tag_for(&self, rule_name: &str) -> String {
        format!("{}{rule_name}", self.tag_prefix)
    }

    pub fn classify(&self, results: &[FrequencyResult]) -> Classification {
        let mut tags: Vec<ClassificationTag> = results
            .iter()
            .map(|r| ClassificationTag {
                column: r.column.clone(),
                rule_name: r.rule_name.clone(),
                tag: self.tag_for(&r.rule_name),
                frequency: r.frequency,
                effective: r.frequency >= self.threshold,
            })
            .collect();
        tags.sort_by(|a, b| (&a.column, &a.rule_name).cmp(&(&b.column, &b.rule_name)));

        let mut assignments = TagAssignments::new();
        for tag in &tags {
            let assigned = assignments.entry(tag.column.clone()).or_default();
            if tag.effective {
                assigned.insert(tag.tag.clone());
            }
        }
        debug!(
            columns = assignments.len(),
            effective = tags.iter().filter(|t| t.effective).count(),
            threshold = self.threshold,
            "classified"
        );
        Classification {
            threshold: self.threshold,
            tags,
            assignments,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
        }
    }
}

// ------------- Classification -------------
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Classification {
    pub threshold: f64,
    pub tags: Vec<ClassificationTag>,
    #[serde(serialize_with = "assignments_as_list")]
    pub assignments: TagAssignments,
}

// JSON maps need string keys, so assignments go out as a list of pairs.
fn assignments_as_list<S: Serializer>(assignments: &TagAssignments, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(assignments.iter().map(|(column, tags)| AssignedTags { column, tags }))
}

#[derive(Serialize)]
struct AssignedTags<'a> {
    column: &'a ColumnRef,
    tags: &'a BTreeSet<String>,
}

impl Classification {
    pub fn assignments(&self) -> &TagAssignments {
        &self.assignments
    }
    pub fn into_assignments(self) -> TagAssignments {
        self.assignments
    }
    pub fn tags_of(&self, column: &ColumnRef) -> Option<&BTreeSet<String>> {
        self.assignments.get(column)
    }
    pub fn effective(&self) -> impl Iterator<Item = &ClassificationTag> {
        self.tags.iter().filter(|t| t.effective)
    }
    fn frequency_of(&self, column: &ColumnRef, tag: &str) -> Option<f64> {
        self.tags
            .iter()
            .find(|t| t.column == *column && t.tag == tag)
            .map(|t| t.frequency)
    }
    pub fn summary(&self) -> ScanSummary {
        let mut per_tag = BTreeMap::new();
        for tag in self.effective() {
            *per_tag.entry(tag.tag.clone()).or_insert(0) += 1;
        }
        ScanSummary {
            scanned_columns: self.assignments.len(),
            classified_columns: self.assignments.values().filter(|t| !t.is_empty()).count(),
            per_tag,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned_columns: usize,
    pub classified_columns: usize,
    pub per_tag: BTreeMap<String, usize>,
}
impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "classified {} out of {} columns",
            self.classified_columns, self.scanned_columns
        )?;
        for (tag, count) in &self.per_tag {
            write!(f, "; {count} {tag}")?;
        }
        Ok(())
    }
}

// ------------- Reconciliation -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Removed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagChange {
    pub column: ColumnRef,
    pub tag: String,
    pub status: ChangeStatus,
    /// Frequency seen by the current scan, when the rule was tested.
    pub frequency: Option<f64>,
    /// Whether the change goes into the next publish.
    pub accepted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    columns: BTreeSet<ColumnRef>,
    changes: Vec<TagChange>,
}

/// Compares a fresh classification with the published tags.
///
/// Only columns present in `current` are considered; published columns the
/// scan did not reach are left alone. Every change starts out accepted.
pub fn reconcile(current: &Classification, previous: &TagAssignments) -> Reconciliation {
    let published: HashMap<ColumnLocation, &BTreeSet<String>, OtherHasher> = previous
        .iter()
        .map(|(column, tags)| (column.location(), tags))
        .collect();
    let empty = BTreeSet::new();
    let mut changes = Vec::new();
    for (column, tags) in &current.assignments {
        let before = published.get(&column.location()).copied().unwrap_or(&empty);
        for tag in tags.union(before) {
            let status = match (tags.contains(tag), before.contains(tag)) {
                (true, true) => ChangeStatus::Unchanged,
                (true, false) => ChangeStatus::Added,
                _ => ChangeStatus::Removed,
            };
            changes.push(TagChange {
                column: column.clone(),
                tag: tag.clone(),
                status,
                frequency: current.frequency_of(column, tag),
                accepted: true,
            });
        }
    }
    Reconciliation {
        columns: current.assignments.keys().cloned().collect(),
        changes,
    }
}

impl Reconciliation {
    pub fn changes(&self) -> &[TagChange] {
        &self.changes
    }
    pub fn added(&self) -> impl Iterator<Item = &TagChange> {
        self.with_status(ChangeStatus::Added)
    }
    pub fn removed(&self) -> impl Iterator<Item = &TagChange> {
        self.with_status(ChangeStatus::Removed)
    }
    pub fn unchanged(&self) -> impl Iterator<Item = &TagChange> {
        self.with_status(ChangeStatus::Unchanged)
    }
    fn with_status(&self, status: ChangeStatus) -> impl Iterator<Item = &TagChange> {
        self.changes.iter().filter(move |c| c.status == status)
    }
    pub fn is_unchanged(&self) -> bool {
        self.changes.iter().all(|c| c.status == ChangeStatus::Unchanged)
    }

    /// Lets an addition or removal through. Returns false if no such change exists.
    pub fn accept(&mut self, column: &ColumnRef, tag: &str) -> bool {
        self.decide(column, tag, true)
    }
    /// Holds an addition or removal back, keeping the published state for that tag.
    pub fn reject(&mut self, column: &ColumnRef, tag: &str) -> bool {
        self.decide(column, tag, false)
    }
    fn decide(&mut self, column: &ColumnRef, tag: &str, accepted: bool) -> bool {
        let location = column.location();
        match self
            .changes
            .iter_mut()
            .find(|c| c.column.location() == location && c.tag == tag && c.status != ChangeStatus::Unchanged)
        {
            Some(change) => {
                change.accepted = accepted;
                true
            }
            None => false,
        }
    }
    /// Adds a tag the scan did not produce, e.g. from an operator's own knowledge.
    pub fn add(&mut self, column: ColumnRef, tag: &str) {
        let location = column.location();
        if let Some(existing) = self
            .changes
            .iter_mut()
            .find(|c| c.column.location() == location && c.tag == tag)
        {
            // a rejected removal keeps the tag, so does an accepted addition
            existing.accepted = existing.status != ChangeStatus::Removed;
            return;
        }
        // a column already under review keeps the identity the scan reported
        let column = match self.columns.iter().find(|c| c.location() == location) {
            Some(known) => known.clone(),
            None => {
                self.columns.insert(column.clone());
                column
            }
        };
        self.changes.push(TagChange {
            column,
            tag: tag.to_string(),
            status: ChangeStatus::Added,
            frequency: None,
            accepted: true,
        });
    }

    /// The tags to publish: unchanged tags, accepted additions and rejected removals.
    pub fn into_assignments(self) -> TagAssignments {
        let mut assignments: TagAssignments = self
            .columns
            .into_iter()
            .map(|column| (column, BTreeSet::new()))
            .collect();
        for change in self.changes {
            let keep = match change.status {
                ChangeStatus::Unchanged => true,
                ChangeStatus::Added => change.accepted,
                ChangeStatus::Removed => !change.accepted,
            };
            if keep {
                assignments.entry(change.column).or_default().insert(change.tag);
            }
        }
        assignments
    }
}
