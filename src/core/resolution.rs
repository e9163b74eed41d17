//! The description resolution algorithm.
//!
//! Given a raw record and the [`ProviderDetails`] of its provider, picks the
//! most specific event definition (or legacy message), expands the message
//! template, resolves the task name and decodes keywords. Every strategy
//! shares these free functions; they never fail. Missing metadata degrades to
//! a sentinel description, and ambiguous matches are reported as
//! [`ResolutionDiagnostic`]s alongside the result.

use std::fmt;

use tracing::warn;

use crate::core::description::format_description;
use crate::core::display_event::{DisplayEventModel, ResolvedText};
use crate::core::event_record::NativeEventRecord;
use crate::core::keywords::decode_keywords;
use crate::core::provider_details::{EventDefinition, MessageEntry, ProviderDetails};
use crate::core::xml_parser::{parse_template, TemplateField};
use crate::util::constants::{DESCRIPTION_FORMAT_FAILED, DESCRIPTION_NOT_FOUND, TASK_NONE};
use crate::util::intern::StringInterner;

/// A non-fatal metadata-quality finding produced while resolving a record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind")]
pub enum ResolutionDiagnostic {
    /// More than one event definition matched; the first was used.
    AmbiguousEvent {
        provider_name: String,
        id: u32,
        version: Option<u8>,
        log_name: String,
        /// `id/version/log: description` for every candidate, in discovery order.
        candidates: Vec<String>,
    },
    /// More than one legacy message matched a task id; the first was used.
    AmbiguousTask {
        provider_name: String,
        task: u16,
        log_name: String,
        candidates: Vec<String>,
    },
}

impl fmt::Display for ResolutionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousEvent {
                provider_name,
                id,
                version,
                log_name,
                candidates,
            } => write!(
                f,
                "{provider_name}: ambiguous event {id} (version {}, log '{log_name}'): {}",
                version.map_or_else(|| "-".to_string(), |v| v.to_string()),
                candidates.join(" | ")
            ),
            Self::AmbiguousTask {
                provider_name,
                task,
                log_name,
                candidates,
            } => write!(
                f,
                "{provider_name}: ambiguous task {task} in log '{log_name}': {}",
                candidates.join(" | ")
            ),
        }
    }
}

/// Result of resolving one record.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub event: DisplayEventModel,
    pub diagnostics: Vec<ResolutionDiagnostic>,
}

/// Resolve `record` against `details` and build the display model.
///
/// `owning_log_name` is the log the record was read from; it overrides the
/// record's own channel when non-empty.
pub fn resolve(
    record: &NativeEventRecord,
    details: &ProviderDetails,
    owning_log_name: &str,
    interner: &StringInterner,
) -> Resolution {
    let (text, diagnostics) = resolve_text(record, details, owning_log_name);
    Resolution {
        event: DisplayEventModel::new(record, text, interner),
        diagnostics,
    }
}

/// Resolve the description, task name and keyword names of `record`.
pub fn resolve_text(
    record: &NativeEventRecord,
    details: &ProviderDetails,
    owning_log_name: &str,
) -> (ResolvedText, Vec<ResolutionDiagnostic>) {
    let log_name = if owning_log_name.is_empty() {
        record.log_name.as_str()
    } else {
        owning_log_name
    };
    let mut diagnostics = Vec::new();

    let description = match &record.error {
        Some(err) => format!("{DESCRIPTION_FORMAT_FAILED}: {err}"),
        None => resolve_description(record, details, log_name, &mut diagnostics),
    };
    let task_category = resolve_task_name(record, details, log_name, &mut diagnostics);
    let keywords = decode_keywords(record.keywords, &details.keywords);

    (
        ResolvedText {
            description,
            task_category,
            keywords,
        },
        diagnostics,
    )
}

/// Find the event definitions matching `record`, most specific key first.
///
/// Returns every candidate for the first key that matches anything, in
/// discovery order.
pub fn match_event_definitions<'a>(
    record: &NativeEventRecord,
    events: &'a [EventDefinition],
    log_name: &str,
) -> Vec<&'a EventDefinition> {
    let Some(version) = record.version else {
        return Vec::new();
    };

    if !log_name.is_empty() {
        let exact: Vec<_> = events
            .iter()
            .filter(|e| {
                e.id == record.id
                    && e.version == version
                    && e.log_name.eq_ignore_ascii_case(log_name)
            })
            .collect();
        if !exact.is_empty() {
            return exact;
        }
    }

    let short_id = u32::from(record.id as u16);
    events
        .iter()
        .filter(|e| e.id == short_id && e.version == version)
        .collect()
}

fn resolve_description(
    record: &NativeEventRecord,
    details: &ProviderDetails,
    log_name: &str,
    diagnostics: &mut Vec<ResolutionDiagnostic>,
) -> String {
    let candidates = match_event_definitions(record, &details.events, log_name);

    if candidates.len() > 1 {
        let diagnostic = ResolutionDiagnostic::AmbiguousEvent {
            provider_name: details.provider_name.clone(),
            id: record.id,
            version: record.version,
            log_name: log_name.to_string(),
            candidates: candidates
                .iter()
                .map(|e| format!("{}/{}/{}: {}", e.id, e.version, e.log_name, e.description))
                .collect(),
        };
        warn!("{diagnostic}");
        diagnostics.push(diagnostic);
    }

    if let Some(event) = candidates.first() {
        if !event.description.is_empty() {
            return format_modern(record, details, event);
        }
        if let [only] = record.properties.as_slice() {
            return only.to_string();
        }
    }

    match find_legacy_message(record, &details.messages) {
        Some(message) => format_or_sentinel(record, &message.text, details, &[]),
        None if candidates.is_empty() => DESCRIPTION_NOT_FOUND.to_string(),
        // A matched definition with no message and no single property.
        None => String::new(),
    }
}

fn format_modern(
    record: &NativeEventRecord,
    details: &ProviderDetails,
    event: &EventDefinition,
) -> String {
    let fields = parse_template(&event.template).unwrap_or_else(|e| {
        warn!(
            "{}: event {} has an unreadable template, formatting untyped: {e}",
            details.provider_name, event.id
        );
        Vec::new()
    });
    format_or_sentinel(record, &event.description, details, &fields)
}

fn format_or_sentinel(
    record: &NativeEventRecord,
    template: &str,
    details: &ProviderDetails,
    fields: &[TemplateField],
) -> String {
    match format_description(template, &record.properties, fields, &details.parameters) {
        Ok(text) => text,
        Err(e) => {
            warn!(
                "{}: event {} (record {:?}): {e}",
                details.provider_name, record.id, record.record_id
            );
            DESCRIPTION_FORMAT_FAILED.to_string()
        }
    }
}

/// Pick the legacy message for `record`: full 32-bit id first (when the
/// record carries qualifiers), then the 16-bit short id. Entries from the
/// general message file are preferred over category-file entries.
fn find_legacy_message<'a>(
    record: &NativeEventRecord,
    messages: &'a [MessageEntry],
) -> Option<&'a MessageEntry> {
    if let Some(q) = record.qualifiers {
        let raw = (u32::from(q) << 16) | (record.id & 0xFFFF);
        if let Some(m) = prefer_general(messages, |m| m.raw_id == raw) {
            return Some(m);
        }
    }
    let short_id = record.id as u16;
    prefer_general(messages, |m| m.short_id == short_id)
}

fn prefer_general(
    messages: &[MessageEntry],
    pred: impl Fn(&MessageEntry) -> bool,
) -> Option<&MessageEntry> {
    messages
        .iter()
        .find(|&m| m.log_link.is_none() && pred(m))
        .or_else(|| messages.iter().find(|&m| pred(m)))
}

/// Resolve the task display name.
///
/// Order: the provider's task table, then legacy category messages whose
/// short id equals the task and whose log link equals `log_name`, then
/// `(<task>)`. Task 0 or no task renders as `None`.
pub fn resolve_task_name(
    record: &NativeEventRecord,
    details: &ProviderDetails,
    log_name: &str,
    diagnostics: &mut Vec<ResolutionDiagnostic>,
) -> String {
    let Some(task) = record.task else {
        return TASK_NONE.to_string();
    };

    if let Some(name) = details.tasks.get(&i32::from(task)) {
        return name.clone();
    }

    let matches: Vec<&MessageEntry> = details
        .messages
        .iter()
        .filter(|m| {
            m.short_id == task
                && m.log_link
                    .as_deref()
                    .is_some_and(|link| link.eq_ignore_ascii_case(log_name))
        })
        .collect();

    if matches.len() > 1 {
        let diagnostic = ResolutionDiagnostic::AmbiguousTask {
            provider_name: details.provider_name.clone(),
            task,
            log_name: log_name.to_string(),
            candidates: matches
                .iter()
                .map(|m| format!("0x{:08X}: {}", m.raw_id, m.text.trim_end()))
                .collect(),
        };
        warn!("{diagnostic}");
        diagnostics.push(diagnostic);
    }

    if let Some(m) = matches.first() {
        return m.text.trim_end_matches(['\r', '\n']).to_string();
    }

    if task == 0 {
        TASK_NONE.to_string()
    } else {
        format!("({task})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_record::PropertyValue;

    fn definition(id: u32, version: u8, log: &str, description: &str) -> EventDefinition {
        EventDefinition {
            id,
            version,
            log_name: log.into(),
            level: Some(4),
            opcode: None,
            task: None,
            keywords: 0,
            template: String::new(),
            description: description.into(),
        }
    }

    fn record(id: u32, version: Option<u8>, props: &[&str]) -> NativeEventRecord {
        NativeEventRecord {
            provider_name: "Prov".into(),
            id,
            version,
            log_name: "Application".into(),
            properties: props
                .iter()
                .map(|p| PropertyValue::String(p.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_match_wins_over_truncated() {
        let mut details = ProviderDetails::empty("Prov");
        details.events = vec![
            definition(5, 0, "Other", "truncated %1"),
            definition(5, 0, "Application", "exact %1"),
        ];
        let (text, diags) = resolve_text(&record(5, Some(0), &["x"]), &details, "");
        assert_eq!(text.description, "exact x");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_truncated_id_match() {
        let mut details = ProviderDetails::empty("Prov");
        details.events = vec![definition(5, 1, "Operational", "short id")];
        let (text, _) = resolve_text(&record(0x1_0005, Some(1), &[]), &details, "Application");
        assert_eq!(text.description, "short id");
    }

    #[test]
    fn test_only_the_record_id_is_truncated() {
        let mut details = ProviderDetails::empty("Prov");
        details.events = vec![
            definition(0x1_0005, 0, "Operational", "first wide"),
            definition(0x2_0005, 0, "Operational", "second wide"),
        ];
        let (text, diags) = resolve_text(&record(5, Some(0), &[]), &details, "Application");
        assert_eq!(text.description, DESCRIPTION_NOT_FOUND);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_ambiguous_match_takes_first_and_reports() {
        let mut details = ProviderDetails::empty("Prov");
        details.events = vec![
            definition(7, 0, "Application", "first"),
            definition(7, 0, "Application", "second"),
        ];
        let (text, diags) = resolve_text(&record(7, Some(0), &[]), &details, "Application");
        assert_eq!(text.description, "first");
        assert_eq!(diags.len(), 1);
        match &diags[0] {
            ResolutionDiagnostic::AmbiguousEvent { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates[0].ends_with("first"));
                assert!(candidates[1].ends_with("second"));
            }
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }

    #[test]
    fn test_single_property_without_template() {
        let mut details = ProviderDetails::empty("Prov");
        details.events = vec![definition(1, 0, "Application", "")];
        let (text, _) = resolve_text(&record(1, Some(0), &["just this"]), &details, "");
        assert_eq!(text.description, "just this");
    }

    #[test]
    fn test_legacy_fallback_and_not_found() {
        let mut details = ProviderDetails::empty("Prov");
        details.messages = vec![MessageEntry::new(0x4000_0010, "legacy %1%n", "Prov")];
        let (text, _) = resolve_text(&record(0x10, None, &["value"]), &details, "");
        assert_eq!(text.description, "legacy value");

        let (text, _) = resolve_text(&record(0x11, None, &[]), &details, "");
        assert_eq!(text.description, DESCRIPTION_NOT_FOUND);
    }

    #[test]
    fn test_qualifiers_select_full_id() {
        let mut details = ProviderDetails::empty("Prov");
        details.messages = vec![
            MessageEntry::new(0x8000_0010, "warning text", "Prov"),
            MessageEntry::new(0xC000_0010, "error text", "Prov"),
        ];
        let mut r = record(0x10, None, &[]);
        r.qualifiers = Some(0xC000);
        let (text, _) = resolve_text(&r, &details, "");
        assert_eq!(text.description, "error text");
    }

    #[test]
    fn test_format_failure_is_sentinel() {
        let mut details = ProviderDetails::empty("Prov");
        details.messages = vec![MessageEntry::new(3, "needs %2", "Prov")];
        let (text, _) = resolve_text(&record(3, None, &["one"]), &details, "");
        assert_eq!(text.description, DESCRIPTION_FORMAT_FAILED);
    }

    #[test]
    fn test_task_name_order() {
        let mut details = ProviderDetails::empty("Prov");
        details.tasks.insert(1, "Service".into());
        details.messages = vec![
            MessageEntry::new(2, "Logon\r\n", "Prov").with_log_link("Security"),
            MessageEntry::new(2, "Wrong log", "Prov").with_log_link("System"),
        ];
        let mut diags = Vec::new();
        let mut r = record(1, None, &[]);

        r.task = Some(1);
        assert_eq!(resolve_task_name(&r, &details, "Security", &mut diags), "Service");
        r.task = Some(2);
        assert_eq!(resolve_task_name(&r, &details, "Security", &mut diags), "Logon");
        r.task = Some(9);
        assert_eq!(resolve_task_name(&r, &details, "Security", &mut diags), "(9)");
        r.task = Some(0);
        assert_eq!(resolve_task_name(&r, &details, "Security", &mut diags), TASK_NONE);
        r.task = None;
        assert_eq!(resolve_task_name(&r, &details, "Security", &mut diags), TASK_NONE);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_category_entries_do_not_shadow_messages() {
        let mut details = ProviderDetails::empty("Prov");
        details.messages = vec![
            MessageEntry::new(4, "Category four", "Prov").with_log_link("Application"),
            MessageEntry::new(4, "Message four", "Prov"),
        ];
        let (text, _) = resolve_text(&record(4, None, &[]), &details, "");
        assert_eq!(text.description, "Message four");
    }
}
