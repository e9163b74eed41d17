//! Provider database upgrade, merge and diff on temporary files.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

use evtresolve::core::event_record::NativeEventRecord;
use evtresolve::core::provider_details::{EventDefinition, MessageEntry, ProviderDetails};
use evtresolve::database::schema::{encode_blob, SchemaVersion};
use evtresolve::database::{self, ProviderDatabase};
use evtresolve::resolver::{DatabaseResolver, EventResolver};
use evtresolve::util::constants::PROVIDER_TABLE;
use evtresolve::util::error::{ErrorKind, EventResolverError};
use evtresolve::util::intern::StringInterner;

fn provider(name: &str, messages: usize) -> ProviderDetails {
    let mut d = ProviderDetails::empty(name);
    for i in 0..messages {
        d.messages
            .push(MessageEntry::new(i as u32 + 1, format!("Message {i} %1"), name));
    }
    d.events.push(EventDefinition {
        id: 100,
        version: 0,
        log_name: "Application".into(),
        level: Some(2),
        opcode: Some(0),
        task: Some(1),
        keywords: 0x8000_0000_0000_0000,
        template: String::new(),
        description: format!("{name} event %1"),
    });
    d.tasks.insert(1, "Service".into());
    d.opcodes.insert(0, "Info".into());
    d.keywords.insert(0x1, "Startup".into());
    d
}

/// Write `providers` in an old layout, the way earlier releases did.
fn write_legacy_db(path: &Path, version: SchemaVersion, providers: &[ProviderDetails]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(&version.create_sql()).unwrap();
    let sql = format!(
        "INSERT INTO {PROVIDER_TABLE} \
         (ProviderName, Messages, Events, Keywords, Opcodes, Tasks) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    );
    for p in providers {
        match version {
            SchemaVersion::V1 => {
                conn.execute(
                    &sql,
                    rusqlite::params![
                        p.provider_name,
                        serde_json::to_string(&p.messages).unwrap(),
                        serde_json::to_string(&p.events).unwrap(),
                        serde_json::to_string(&p.keywords).unwrap(),
                        serde_json::to_string(&p.opcodes).unwrap(),
                        serde_json::to_string(&p.tasks).unwrap(),
                    ],
                )
                .unwrap();
            }
            SchemaVersion::V2 => {
                conn.execute(
                    &sql,
                    rusqlite::params![
                        p.provider_name,
                        encode_blob(&p.messages).unwrap(),
                        encode_blob(&p.events).unwrap(),
                        encode_blob(&p.keywords).unwrap(),
                        encode_blob(&p.opcodes).unwrap(),
                        encode_blob(&p.tasks).unwrap(),
                    ],
                )
                .unwrap();
            }
            SchemaVersion::V3 => unreachable!("current layout is written by the store"),
        }
    }
}

fn counts(path: &Path) -> Vec<(String, usize, usize)> {
    ProviderDatabase::open(path)
        .unwrap()
        .list_all()
        .unwrap()
        .into_iter()
        .map(|p| (p.provider_name, p.messages.len(), p.events.len()))
        .collect()
}

#[test]
fn v1_upgrade_preserves_providers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Exchange 2013.db");
    let providers = vec![provider("MSExchangeRepl", 3), provider("MSExchangeIS", 5)];
    write_legacy_db(&path, SchemaVersion::V1, &providers);

    assert_eq!(database::needs_upgrade(&path).unwrap(), (true, true));
    assert!(database::upgrade(&path).unwrap());
    assert_eq!(database::needs_upgrade(&path).unwrap(), (false, false));

    assert_eq!(
        counts(&path),
        vec![
            ("MSExchangeIS".to_string(), 5, 1),
            ("MSExchangeRepl".to_string(), 3, 1),
        ]
    );
    let db = ProviderDatabase::open(&path).unwrap();
    assert_eq!(
        db.query("MSExchangeRepl").unwrap().unwrap(),
        providers[0]
    );
}

#[test]
fn v2_upgrade_adds_parameters_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Windows.db");
    write_legacy_db(&path, SchemaVersion::V2, &[provider("Service Control Manager", 2)]);

    assert_eq!(database::needs_upgrade(&path).unwrap(), (false, true));
    assert!(database::upgrade(&path).unwrap());
    let before = counts(&path);
    assert!(!database::upgrade(&path).unwrap());
    assert_eq!(counts(&path), before);

    let db = ProviderDatabase::open(&path).unwrap();
    let details = db.query("service control manager").unwrap().unwrap();
    assert!(details.parameters.is_empty());
}

#[test]
fn obsolete_database_stops_the_database_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let current = dir.path().join("Current.db");
    let old = dir.path().join("Old.db");
    database::create(&current, &[provider("A", 1)]).unwrap();
    write_legacy_db(&old, SchemaVersion::V2, &[provider("B", 1)]);

    let err = DatabaseResolver::open(&[current, old], Arc::new(StringInterner::new()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ObsoleteFormat);
    assert!(matches!(err, EventResolverError::ObsoleteDatabase { .. }));
}

#[test]
fn maintenance_leaves_missing_files_alone() {
    let dir = tempfile::tempdir().unwrap();
    let typo = dir.path().join("typo.db");

    let err = database::needs_upgrade(&typo).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(database::upgrade(&typo).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(database::show_database(&typo, None).is_err());

    let present = dir.path().join("Windows.db");
    database::create(&present, &[provider("A", 1)]).unwrap();
    let err = DatabaseResolver::open(&[present, typo.clone()], Arc::new(StringInterner::new()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!typo.exists());
}

#[test]
fn merge_creates_a_missing_target() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.db");
    let target = dir.path().join("new target.db");
    database::create(&source, &[provider("P", 1), provider("Q", 1)]).unwrap();

    let summary = database::merge(&source, &target, false).unwrap();
    assert_eq!(summary.added, 2);
    assert_eq!(ProviderDatabase::open(&target).unwrap().count().unwrap(), 2);
}

#[test]
fn diff_contains_exactly_missing_names() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.db");
    let b = dir.path().join("b.db");
    let out = dir.path().join("out.db");
    database::create(&a, &[provider("Shared", 1), provider("OnlyA", 1)]).unwrap();
    database::create(
        &b,
        &[provider("Shared", 1), provider("shared", 1), provider("OnlyB", 1)],
    )
    .unwrap();

    assert_eq!(database::diff(&a, &b, &out).unwrap(), 2);
    let names = ProviderDatabase::open(&out).unwrap().provider_names().unwrap();
    assert_eq!(names, vec!["OnlyB".to_string(), "shared".to_string()]);
}

#[test]
fn merge_with_overwrite_copies_source_entries() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.db");
    let target = dir.path().join("target.db");
    let newer = provider("P", 4);
    database::create(&source, &[newer.clone(), provider("Q", 1)]).unwrap();
    database::create(&target, &[provider("P", 1)]).unwrap();

    let summary = database::merge(&source, &target, true).unwrap();
    assert_eq!((summary.added, summary.replaced, summary.skipped), (1, 1, 0));
    let db = ProviderDatabase::open(&target).unwrap();
    assert_eq!(db.query("P").unwrap().unwrap(), newer);
    assert_eq!(db.count().unwrap(), 2);
}

#[test]
fn newer_product_database_shadows_older() {
    let dir = tempfile::tempdir().unwrap();
    let older = dir.path().join("Exchange 2013.db");
    let newer = dir.path().join("Exchange 2019.db");
    let mut old_details = provider("MSExchangeRepl", 0);
    old_details.events[0].description = "old text".into();
    let mut new_details = provider("MSExchangeRepl", 0);
    new_details.events[0].description = "new text".into();
    database::create(&older, &[old_details]).unwrap();
    database::create(&newer, &[new_details]).unwrap();

    let resolver =
        DatabaseResolver::open(&[older, newer], Arc::new(StringInterner::new())).unwrap();
    let record = NativeEventRecord {
        provider_name: "MSExchangeRepl".into(),
        id: 100,
        version: Some(0),
        log_name: "Application".into(),
        ..Default::default()
    };
    let event = resolver.resolve(&record, "Application");
    assert_eq!(&*event.description, "new text");
    assert_eq!(resolver.name(), "database");
}
