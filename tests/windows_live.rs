//! Checks against the live event log and system message files. Skipped when
//! the host does not expose them.
#![cfg(windows)]

use std::collections::BTreeMap;
use std::sync::Arc;

use evtresolve::core::display_event::DisplayEventModel;
use evtresolve::core::event_reader::{query, PathType, ReaderOptions};
use evtresolve::core::legacy_provider::RegistryHive;
use evtresolve::core::message_table::load_message_table;
use evtresolve::core::modern_provider::load_modern_metadata;
use evtresolve::core::provider_details::ProviderDetails;
use evtresolve::core::provider_enumerator::ProviderNameCache;
use evtresolve::database;
use evtresolve::resolver::{DatabaseResolver, EventResolver, LocalResolver};
use evtresolve::util::error::ErrorKind;
use evtresolve::util::intern::StringInterner;

fn system32(file: &str) -> String {
    let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".into());
    format!(r"{root}\System32\{file}")
}

fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn comparable(event: &DisplayEventModel) -> (String, String, Vec<String>, String) {
    (
        squash(&event.description),
        event.task_category.to_string(),
        event.keywords.iter().map(|k| k.to_string()).collect(),
        squash(event.xml()),
    )
}

#[test]
fn local_and_database_strategies_agree_on_application_log() {
    let options = ReaderOptions {
        render_xml: true,
        ..Default::default()
    };
    let session = match query("Application", PathType::LogName, options) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    let batch = session.read_batch(64).unwrap();
    let records: Vec<_> = batch.records.into_iter().filter(|r| !r.is_error()).collect();
    if records.is_empty() {
        eprintln!("skipping: Application log is empty");
        return;
    }

    let names = match ProviderNameCache::local() {
        Ok(n) => Arc::new(n),
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    let local = LocalResolver::new(names, RegistryHive::local(), Arc::new(StringInterner::new()));
    let from_local: Vec<_> = records
        .iter()
        .map(|r| comparable(&local.resolve(r, "Application")))
        .collect();

    let mut providers: BTreeMap<String, ProviderDetails> = BTreeMap::new();
    for record in &records {
        providers
            .entry(record.provider_name.to_lowercase())
            .or_insert_with(|| (*local.core().provider_details(&record.provider_name)).clone());
    }
    let providers: Vec<_> = providers.into_values().collect();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Application.db");
    database::create(&path, &providers).unwrap();
    let stored = DatabaseResolver::open(&[path], Arc::new(StringInterner::new())).unwrap();

    for (record, expected) in records.iter().zip(&from_local) {
        let actual = comparable(&stored.resolve(record, "Application"));
        assert_eq!(
            &actual, expected,
            "{} event {} (record {:?})",
            record.provider_name, record.id, record.record_id
        );
    }
}

#[test]
fn system_message_file_has_a_table() {
    let entries = load_message_table(&system32("netmsg.dll"), "Netmsg").unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| e.short_id == e.raw_id as u16));
    assert!(entries.iter().any(|e| !e.text.trim().is_empty()));
}

#[test]
fn file_without_message_table_is_empty() {
    let entries = load_message_table(&system32("version.dll"), "Version").unwrap();
    assert!(entries.is_empty());
}

#[test]
fn missing_message_file_is_not_found() {
    let err = load_message_table(&system32("no-such-file-7f3a.dll"), "Missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn modern_metadata_of_the_event_log_service() {
    let details = load_modern_metadata("Microsoft-Windows-Eventlog");
    if details.is_empty() {
        eprintln!("skipping: publisher metadata unavailable");
        return;
    }
    assert!(!details.events.is_empty());
    assert!(!details.keywords.is_empty());

    assert!(load_modern_metadata("No-Such-Publisher-7f3a").is_empty());
}
