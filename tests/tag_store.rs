use std::collections::BTreeSet;

use discoverx::catalog::{ColumnRef, TableRef};
use discoverx::classify::TagAssignments;
use discoverx::error::DiscoverxError;
use discoverx::sqlite::PersistenceMode;
use discoverx::store::{TagStore, DEFAULT_LOCATION};
use rusqlite::Connection;

fn column(table: &str, name: &str) -> ColumnRef {
    TableRef::new("lake", "sales", table).column(name, "string")
}

fn assign(entries: &[(&ColumnRef, &[&str])]) -> TagAssignments {
    entries
        .iter()
        .map(|(column, tags)| ((*column).clone(), tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>()))
        .collect()
}

fn store() -> TagStore {
    TagStore::open(&PersistenceMode::InMemory, DEFAULT_LOCATION).expect("store")
}

#[test]
fn publish_then_read_back() {
    let store = store();
    let contact = column("contacts", "contact");
    let address = column("servers", "address");
    let assignments = assign(&[(&contact, &["dx_email"]), (&address, &["dx_ip_v4", "dx_fqdn"])]);
    let outcome = store.publish(&assignments).expect("publish");
    assert_eq!(outcome.version, Some(1));
    assert_eq!(outcome.inserted, 3);
    assert_eq!(outcome.deactivated, 0);
    assert_eq!(store.read_active().unwrap(), assignments);
}

#[test]
fn publishing_the_same_assignments_is_idempotent() {
    let store = store();
    let contact = column("contacts", "contact");
    let assignments = assign(&[(&contact, &["dx_email"])]);
    store.publish(&assignments).unwrap();
    let head = store.current_superhash().unwrap();

    let again = store.publish(&assignments).unwrap();
    assert_eq!(again.version, None, "nothing changed, so no new version");
    assert_eq!(again.inserted + again.deactivated, 0);
    assert_eq!(store.read_active().unwrap(), assignments);
    assert_eq!(store.active_records().unwrap().len(), 1);
    assert_eq!(store.ledger().unwrap().len(), 1);
    assert_eq!(store.current_superhash().unwrap(), head);
}

#[test]
fn republishing_supersedes_and_keeps_history() {
    let store = store();
    let contact = column("contacts", "contact");
    store.publish(&assign(&[(&contact, &["dx_email", "dx_fqdn"])])).unwrap();
    let outcome = store.publish(&assign(&[(&contact, &["dx_email"])])).unwrap();
    assert_eq!(outcome.version, Some(2));
    assert_eq!((outcome.inserted, outcome.deactivated), (0, 1));

    let active = store.read_active().unwrap();
    assert_eq!(active[&contact].len(), 1);
    assert!(active[&contact].contains("dx_email"));

    let history = store.history(&contact).unwrap();
    assert_eq!(history.len(), 2, "superseded records stay in the log");
    let fqdn = history.iter().find(|r| r.tag == "dx_fqdn").unwrap();
    assert!(!fqdn.active);
    assert!(fqdn.superseded_at.is_some());
    assert_eq!(fqdn.version, 1);

    // tag comes back: a new record, the old one stays superseded
    store.publish(&assign(&[(&contact, &["dx_email", "dx_fqdn"])])).unwrap();
    let history = store.history(&contact).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|r| r.active).count(), 2);
}

#[test]
fn empty_assignment_clears_a_column_only() {
    let store = store();
    let contact = column("contacts", "contact");
    let lead = column("leads", "contact");
    store.publish(&assign(&[(&contact, &["dx_email"]), (&lead, &["dx_email"])])).unwrap();
    store.publish(&assign(&[(&lead, &[])])).unwrap();
    let active = store.read_active().unwrap();
    assert!(active.contains_key(&contact), "columns not named are left alone");
    assert!(!active.contains_key(&lead));
}

#[test]
fn one_column_under_two_data_types_is_published_once() {
    let store = store();
    let contact = column("contacts", "contact");
    store.publish(&assign(&[(&contact, &["dx_email"])])).unwrap();

    let shouted = TableRef::new("lake", "sales", "contacts").column("contact", "STRING");
    let outcome = store
        .publish(&assign(&[(&contact, &["dx_email"]), (&shouted, &["dx_owner"])]))
        .unwrap();
    assert_eq!((outcome.inserted, outcome.deactivated), (1, 0), "the unchanged tag stays active");

    let active = store.read_active().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[&contact], ["dx_email", "dx_owner"].iter().map(|t| t.to_string()).collect::<BTreeSet<String>>());
    assert!(store.history(&contact).unwrap().iter().all(|r| r.active));
}

#[test]
fn ledger_chains_superhashes() {
    let store = store();
    assert_eq!(store.current_superhash().unwrap(), None);
    let contact = column("contacts", "contact");
    let first = store.publish(&assign(&[(&contact, &["dx_email"])])).unwrap();
    let second = store.publish(&assign(&[(&contact, &["dx_url"])])).unwrap();
    let ledger = store.ledger().unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[0].superhash, first.superhash.unwrap());
    assert_eq!(Some(ledger[1].superhash.clone()), second.superhash);
    assert_ne!(ledger[0].superhash, ledger[1].superhash);
    assert_eq!(ledger[1].superhash.len(), 64, "hex encoded blake3");

    let mut chain = blake3::Hasher::new();
    chain.update(ledger[0].superhash.as_bytes());
    chain.update(blake3::Hash::from_hex(&ledger[1].digest).unwrap().as_bytes());
    assert_eq!(chain.finalize().to_hex().to_string(), ledger[1].superhash);
}

#[test]
fn file_store_survives_reopening() {
    let path = std::env::temp_dir().join("discoverx_tag_store_reopen.db");
    let _ = std::fs::remove_file(&path);
    let mode = PersistenceMode::File(path.to_string_lossy().into_owned());
    let contact = column("contacts", "contact");
    {
        let store = TagStore::open(&mode, DEFAULT_LOCATION).unwrap();
        store.publish(&assign(&[(&contact, &["dx_email"])])).unwrap();
    }
    let store = TagStore::open(&mode, DEFAULT_LOCATION).unwrap();
    assert!(store.read_active().unwrap()[&contact].contains("dx_email"));
    assert_eq!(store.ledger().unwrap().len(), 1);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn incompatible_tag_table_is_refused_without_changes() {
    let path = std::env::temp_dir().join("discoverx_tag_store_incompatible.db");
    let _ = std::fs::remove_file(&path);
    {
        let connection = Connection::open(&path).unwrap();
        connection.execute_batch("create table column_tags (Tag_Name text, Column_Name text);").unwrap();
    }
    let mode = PersistenceMode::File(path.to_string_lossy().into_owned());
    let err = TagStore::open(&mode, "column_tags").err().expect("incompatible table");
    assert!(matches!(err, DiscoverxError::Publish(_)), "expected PublishError, got {err:?}");
    assert!(err.to_string().contains("Record_Identity"));

    let connection = Connection::open(&path).unwrap();
    let tables: i64 = connection
        .query_row("select count(*) from sqlite_master where name like 'column_tags%'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(tables, 1, "neither ledger nor index were created");
    drop(connection);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn failing_publish_leaves_no_trace() {
    let path = std::env::temp_dir().join("discoverx_tag_store_rollback.db");
    let _ = std::fs::remove_file(&path);
    let mode = PersistenceMode::File(path.to_string_lossy().into_owned());
    let store = TagStore::open(&mode, DEFAULT_LOCATION).unwrap();
    let contact = column("contacts", "contact");
    store.publish(&assign(&[(&contact, &["dx_email"])])).unwrap();
    let active = store.read_active().unwrap();
    let history = store.history(&contact).unwrap();
    let ledger = store.ledger().unwrap();

    {
        let connection = Connection::open(&path).unwrap();
        connection
            .execute_batch(&format!(
                "create trigger refuse_inserts before insert on {DEFAULT_LOCATION}
                 begin select raise(abort, 'inserts refused'); end;"
            ))
            .unwrap();
    }
    // dx_email is deactivated before the insert of dx_url fails
    let err = store.publish(&assign(&[(&contact, &["dx_url"])])).err().expect("insert is refused");
    assert!(matches!(err, DiscoverxError::Publish(_)), "expected PublishError, got {err:?}");
    assert!(err.to_string().contains("inserts refused"));

    assert_eq!(store.read_active().unwrap(), active);
    assert_eq!(store.history(&contact).unwrap(), history);
    assert_eq!(store.ledger().unwrap(), ledger);
    drop(store);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn invalid_location_is_a_config_error() {
    let err = TagStore::open(&PersistenceMode::InMemory, "tags; drop table x").err().unwrap();
    assert!(matches!(err, DiscoverxError::Config(_)));
}
