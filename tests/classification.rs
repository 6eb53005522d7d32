use std::collections::BTreeSet;

use discoverx::catalog::{ColumnRef, TableRef};
use discoverx::classify::{reconcile, ChangeStatus, Classifier, TagAssignments};
use discoverx::error::DiscoverxError;
use discoverx::scan::FrequencyResult;
use discoverx::sqlite::PersistenceMode;
use discoverx::store::{TagStore, DEFAULT_LOCATION};

fn column(table: &str, name: &str) -> ColumnRef {
    TableRef::new("lake", "sales", table).column(name, "string")
}

fn frequency(table: &str, name: &str, rule: &str, matched: u64, total: u64) -> FrequencyResult {
    FrequencyResult::new(column(table, name), rule, matched, total).unwrap()
}

fn results() -> Vec<FrequencyResult> {
    vec![
        frequency("contacts", "contact", "email", 96, 100),
        frequency("leads", "contact", "email", 90, 100),
        frequency("servers", "address", "ip_v4", 100, 100),
        frequency("servers", "address", "fqdn", 97, 100),
        frequency("servers", "owner", "email", 0, 50),
    ]
}

fn tags(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn frequency_needs_sampled_values() {
    assert!(FrequencyResult::new(column("t", "c"), "email", 0, 0).is_none());
    assert!(FrequencyResult::new(column("t", "c"), "email", 3, 2).is_none());
    let f = FrequencyResult::new(column("t", "c"), "email", 1, 4).unwrap();
    assert_eq!(f.frequency, 0.25);
}

#[test]
fn threshold_decides_effective_tags() {
    let classification = Classifier::default().classify(&results());
    assert_eq!(classification.tags_of(&column("contacts", "contact")), Some(&tags(&["dx_email"])));
    assert_eq!(classification.tags_of(&column("leads", "contact")), Some(&tags(&[])));
    assert_eq!(classification.tags_of(&column("servers", "owner")), Some(&tags(&[])));
    assert_eq!(classification.assignments().len(), 4, "every scanned column gets an entry");
}

#[test]
fn several_rules_may_tag_one_column() {
    let classification = Classifier::default().classify(&results());
    assert_eq!(
        classification.tags_of(&column("servers", "address")),
        Some(&tags(&["dx_fqdn", "dx_ip_v4"]))
    );
}

#[test]
fn classification_is_monotonic_in_the_threshold() {
    let fixed = results();
    let mut previous: Option<TagAssignments> = None;
    for threshold in [1.0, 0.97, 0.96, 0.95, 0.9, 0.5, 0.0] {
        let current = Classifier::new(threshold).unwrap().classify(&fixed).into_assignments();
        if let Some(stricter) = &previous {
            for (column, stricter_tags) in stricter {
                assert!(
                    stricter_tags.is_subset(&current[column]),
                    "lowering the threshold to {threshold} lost tags on {column}"
                );
            }
        }
        previous = Some(current);
    }
    assert_eq!(
        Classifier::default().classify(&results()),
        Classifier::default().classify(&results()),
        "classification is deterministic"
    );
}

#[test]
fn threshold_is_validated() {
    assert!(matches!(Classifier::new(1.5), Err(DiscoverxError::Config(_))));
    assert!(Classifier::new(-0.1).is_err());
    assert!(Classifier::new(0.0).is_ok());
}

#[test]
fn tag_prefix_is_configurable() {
    let classification = Classifier::default().with_tag_prefix("pii_").classify(&results());
    assert!(classification.tags_of(&column("contacts", "contact")).unwrap().contains("pii_email"));
}

#[test]
fn summary_counts_columns_per_tag() {
    let summary = Classifier::default().classify(&results()).summary();
    assert_eq!(summary.scanned_columns, 4);
    assert_eq!(summary.classified_columns, 2);
    assert_eq!(summary.per_tag["dx_email"], 1);
    assert_eq!(summary.per_tag["dx_ip_v4"], 1);
    assert_eq!(
        summary.to_string(),
        "classified 2 out of 4 columns; 1 dx_email; 1 dx_fqdn; 1 dx_ip_v4"
    );
}

#[test]
fn reconcile_lists_additions_removals_and_unchanged() {
    let classification = Classifier::default().classify(&results());
    let mut published = TagAssignments::new();
    published.insert(column("contacts", "contact"), tags(&["dx_email"]));
    published.insert(column("leads", "contact"), tags(&["dx_email"]));
    published.insert(column("untouched", "x"), tags(&["dx_mac"]));

    let reconciliation = reconcile(&classification, &published);
    let unchanged: Vec<String> = reconciliation.unchanged().map(|c| c.column.to_string()).collect();
    assert_eq!(unchanged, vec!["lake.sales.contacts.contact"]);
    let removed: Vec<String> = reconciliation.removed().map(|c| c.column.to_string()).collect();
    assert_eq!(removed, vec!["lake.sales.leads.contact"]);
    assert_eq!(reconciliation.added().count(), 2);
    assert!(
        reconciliation.changes().iter().all(|c| c.column.table != "untouched"),
        "columns outside the scan are left alone"
    );
    assert!(!reconciliation.is_unchanged());
}

#[test]
fn review_decisions_shape_the_assignments() {
    let classification = Classifier::default().classify(&results());
    let mut published = TagAssignments::new();
    published.insert(column("leads", "contact"), tags(&["dx_email"]));

    let mut review = reconcile(&classification, &published);
    assert!(review.reject(&column("leads", "contact"), "dx_email"), "keep the published tag");
    assert!(review.reject(&column("servers", "address"), "dx_fqdn"), "drop a proposed tag");
    assert!(!review.reject(&column("contacts", "contact"), "dx_mac"), "no such change");
    review.add(column("servers", "owner"), "dx_owner");

    let assignments = review.into_assignments();
    assert_eq!(assignments[&column("leads", "contact")], tags(&["dx_email"]));
    assert_eq!(assignments[&column("servers", "address")], tags(&["dx_ip_v4"]));
    assert_eq!(assignments[&column("servers", "owner")], tags(&["dx_owner"]));
    assert_eq!(assignments[&column("contacts", "contact")], tags(&["dx_email"]));
}

#[test]
fn manual_addition_of_a_proposed_tag_is_kept_once() {
    let classification = Classifier::default().classify(&results());
    let mut review = reconcile(&classification, &TagAssignments::new());
    let before = review.changes().len();
    review.add(column("contacts", "contact"), "dx_email");
    assert_eq!(review.changes().len(), before);
    let change = review
        .changes()
        .iter()
        .find(|c| c.tag == "dx_email" && c.column.table == "contacts")
        .unwrap();
    assert_eq!(change.status, ChangeStatus::Added);
    assert!(change.accepted);
    assert_eq!(change.frequency, Some(0.96));
}

#[test]
fn manual_addition_reuses_the_scanned_column() {
    let classification = Classifier::default().classify(&[frequency("contacts", "contact", "email", 99, 100)]);
    let mut published = TagAssignments::new();
    published.insert(column("contacts", "contact"), tags(&["dx_email"]));

    let mut review = reconcile(&classification, &published);
    let shouted = TableRef::new("lake", "sales", "contacts").column("contact", "STRING");
    review.add(shouted, "dx_owner");
    let owner = review.added().find(|c| c.tag == "dx_owner").unwrap();
    assert_eq!(owner.column.data_type, "string");

    let assignments = review.into_assignments();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[&column("contacts", "contact")], tags(&["dx_email", "dx_owner"]));

    let store = TagStore::open(&PersistenceMode::InMemory, DEFAULT_LOCATION).unwrap();
    store.publish(&published).unwrap();
    store.publish(&assignments).unwrap();
    assert_eq!(
        store.read_active().unwrap()[&column("contacts", "contact")],
        tags(&["dx_email", "dx_owner"]),
        "the unchanged tag survives the manual addition"
    );
}
