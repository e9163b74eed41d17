//! End-to-end resolution scenarios over in-memory provider metadata.

use std::collections::BTreeMap;
use std::sync::Arc;

use evtresolve::core::event_record::{NativeEventRecord, PropertyValue};
use evtresolve::core::keywords::decode_keywords;
use evtresolve::core::message_table::load_each;
use evtresolve::core::provider_details::{EventDefinition, MessageEntry, ProviderDetails};
use evtresolve::core::resolution::{resolve, ResolutionDiagnostic};
use evtresolve::resolver::{EventResolver, LocalResolver, MetadataSource};
use evtresolve::util::constants::{DESCRIPTION_FORMAT_FAILED, DESCRIPTION_NOT_FOUND};
use evtresolve::util::error::{windows_err, Result};
use evtresolve::util::intern::StringInterner;

fn strings(values: &[&str]) -> Vec<PropertyValue> {
    values
        .iter()
        .map(|v| PropertyValue::String(v.to_string()))
        .collect()
}

fn exchange_details() -> ProviderDetails {
    let mut details = ProviderDetails::empty("MSExchangeRepl");
    details.messages.push(MessageEntry::new(
        4114,
        "Database redundancy health check passed.%nDatabase copy: %1%nRedundancy count: %2%nIsSuppressed: %4%n%nErrors:%n%3\r\n",
        "MSExchangeRepl",
    ));
    details.tasks.insert(1, "Service".into());
    details
}

fn exchange_record() -> NativeEventRecord {
    NativeEventRecord {
        provider_name: "MSExchangeRepl".into(),
        id: 4114,
        task: Some(1),
        level: Some(4),
        log_name: "Application".into(),
        computer_name: "SERVER1".into(),
        record_id: Some(1),
        properties: strings(&["SERVER1", "4", "Lots of copy status text", "False"]),
        ..Default::default()
    }
}

fn definition(id: u32, version: u8, log_name: &str, description: &str) -> EventDefinition {
    EventDefinition {
        id,
        version,
        log_name: log_name.into(),
        level: Some(4),
        opcode: None,
        task: None,
        keywords: 0,
        template: String::new(),
        description: description.into(),
    }
}

#[test]
fn exchange_legacy_message_is_formatted() {
    let interner = StringInterner::new();
    let resolution = resolve(&exchange_record(), &exchange_details(), "Application", &interner);

    assert_eq!(
        &*resolution.event.description,
        "Database redundancy health check passed.\r\nDatabase copy: SERVER1\r\nRedundancy count: 4\r\nIsSuppressed: False\r\n\r\nErrors:\r\nLots of copy status text"
    );
    assert_eq!(&*resolution.event.task_category, "Service");
    assert_eq!(&*resolution.event.level, "Information");
    assert!(resolution.diagnostics.is_empty());
}

#[test]
fn ambiguous_definitions_use_first_and_report_both() {
    let mut details = ProviderDetails::empty("Dup-Provider");
    details
        .events
        .push(definition(10, 1, "Application", "First %1"));
    details
        .events
        .push(definition(10, 1, "Application", "Second %1"));

    let record = NativeEventRecord {
        provider_name: "Dup-Provider".into(),
        id: 10,
        version: Some(1),
        log_name: "Application".into(),
        properties: strings(&["x"]),
        ..Default::default()
    };
    let resolution = resolve(&record, &details, "Application", &StringInterner::new());

    assert_eq!(&*resolution.event.description, "First x");
    assert_eq!(resolution.diagnostics.len(), 1);
    match &resolution.diagnostics[0] {
        ResolutionDiagnostic::AmbiguousEvent { candidates, .. } => {
            assert_eq!(candidates.len(), 2);
            assert!(candidates[0].contains("First"));
            assert!(candidates[1].contains("Second"));
        }
        other => panic!("unexpected diagnostic: {other:?}"),
    }
}

#[test]
fn out_of_range_placeholder_degrades_to_sentinel() {
    let mut details = ProviderDetails::empty("P");
    details.events.push(definition(1, 0, "System", "%1 and %5"));
    let record = NativeEventRecord {
        provider_name: "P".into(),
        id: 1,
        version: Some(0),
        log_name: "System".into(),
        properties: strings(&["only one", "two"]),
        ..Default::default()
    };
    let resolution = resolve(&record, &details, "System", &StringInterner::new());
    assert_eq!(&*resolution.event.description, DESCRIPTION_FORMAT_FAILED);
}

#[test]
fn keyword_names_are_stable() {
    let mut table = BTreeMap::new();
    table.insert(0x1u64, "Custom-One".to_string());
    table.insert(0x4u64, "Custom-Four".to_string());
    let mask = 0x0080_0000_0000_0005u64;
    let first = decode_keywords(mask, &table);
    for _ in 0..10 {
        assert_eq!(decode_keywords(mask, &table), first);
    }
    assert!(first.contains(&"Custom-One".to_string()));
    assert!(first.contains(&"Custom-Four".to_string()));
}

#[test]
fn missing_message_table_does_not_stop_sibling_files() {
    let files = vec![
        "no_table.dll".to_string(),
        "missing.dll".to_string(),
        "messages.dll".to_string(),
    ];
    let entries = load_each(&files, "Prov", |file, provider| match file {
        "no_table.dll" => Ok(Vec::new()),
        "missing.dll" => Err(windows_err(2, format!("LoadLibraryExW '{file}'"))),
        _ => Ok(vec![MessageEntry::new(1, "Loaded", provider)]),
    });
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, "Loaded");
}

struct FixedSource {
    details: ProviderDetails,
}

impl MetadataSource for FixedSource {
    fn load(&self, provider_name: &str) -> Result<ProviderDetails> {
        if provider_name.eq_ignore_ascii_case(&self.details.provider_name) {
            Ok(self.details.clone())
        } else {
            Ok(ProviderDetails::empty(provider_name))
        }
    }

    fn describe(&self) -> String {
        "fixed".into()
    }
}

#[test]
fn strategy_resolves_and_memoizes() {
    let resolver = LocalResolver::with_source(
        Box::new(FixedSource {
            details: exchange_details(),
        }),
        Arc::new(StringInterner::new()),
    );

    let first = resolver.resolve(&exchange_record(), "Application");
    let second = resolver.resolve(&exchange_record(), "Application");
    assert!(first.description.starts_with("Database redundancy"));
    assert!(Arc::ptr_eq(&first.description, &second.description));
    assert_eq!(resolver.core().cache().len(), 1);

    let unknown = NativeEventRecord {
        provider_name: "Unknown-Provider".into(),
        id: 5,
        ..Default::default()
    };
    assert_eq!(
        &*resolver.resolve(&unknown, "Application").description,
        DESCRIPTION_NOT_FOUND
    );
    assert!(resolver.take_diagnostics().is_empty());
}

#[test]
fn strategy_collects_diagnostics() {
    let mut details = ProviderDetails::empty("Dup");
    details.events.push(definition(3, 0, "Application", "A"));
    details.events.push(definition(3, 0, "Application", "B"));
    let resolver = LocalResolver::with_source(
        Box::new(FixedSource { details }),
        Arc::new(StringInterner::new()),
    );
    let record = NativeEventRecord {
        provider_name: "Dup".into(),
        id: 3,
        version: Some(0),
        log_name: "Application".into(),
        ..Default::default()
    };
    resolver.resolve(&record, "Application");
    resolver.resolve(&record, "Application");
    assert_eq!(resolver.take_diagnostics().len(), 2);
    assert!(resolver.take_diagnostics().is_empty());
}
