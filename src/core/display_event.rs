//! The resolved, display-ready event.
//!
//! [`DisplayEventModel`] is the only type handed across the boundary to
//! presentation code. It is immutable after construction; repeated strings
//! (description, task, keyword names, source, log) are interned so large logs
//! share storage.

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};

use crate::core::event_record::{NativeEventRecord, PropertyValue};
use crate::util::intern::StringInterner;
use crate::util::time::format_system_time;

/// Text produced by the resolution algorithm for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedText {
    pub description: String,
    pub task_category: String,
    pub keywords: Vec<String>,
}

/// A fully resolved event.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DisplayEventModel {
    pub source: Arc<str>,
    pub id: u32,
    pub qualifiers: Option<u16>,
    pub version: Option<u8>,
    pub level: Arc<str>,
    pub level_value: Option<u8>,
    pub task: Option<u16>,
    pub task_category: Arc<str>,
    pub opcode: Option<u8>,
    pub keywords_value: u64,
    pub keywords: Vec<Arc<str>>,
    pub time_created: DateTime<Utc>,
    pub record_id: Option<u64>,
    pub process_id: Option<u32>,
    pub thread_id: Option<u32>,
    pub activity_id: Option<String>,
    pub user_id: Option<String>,
    pub computer_name: Arc<str>,
    pub log_name: Arc<str>,
    pub description: Arc<str>,
    pub properties: Vec<PropertyValue>,
    #[serde(skip)]
    raw_xml: Option<String>,
    #[serde(skip)]
    xml: OnceLock<String>,
}

impl DisplayEventModel {
    /// Combine a raw record with its resolved text.
    pub fn new(
        record: &NativeEventRecord,
        resolved: ResolvedText,
        interner: &StringInterner,
    ) -> Self {
        Self {
            source: interner.intern(&record.provider_name),
            id: record.id,
            qualifiers: record.qualifiers,
            version: record.version,
            level: interner.intern(NativeEventRecord::level_to_name(record.level)),
            level_value: record.level,
            task: record.task,
            task_category: interner.intern(&resolved.task_category),
            opcode: record.opcode,
            keywords_value: record.keywords,
            keywords: resolved
                .keywords
                .iter()
                .map(|k| interner.intern(k))
                .collect(),
            time_created: record.time_created,
            record_id: record.record_id,
            process_id: record.process_id,
            thread_id: record.thread_id,
            activity_id: record.activity_id.clone(),
            user_id: record.user_id.clone(),
            computer_name: interner.intern(&record.computer_name),
            log_name: interner.intern(&record.log_name),
            description: interner.intern(&resolved.description),
            properties: record.properties.clone(),
            raw_xml: record.xml.clone(),
            xml: OnceLock::new(),
        }
    }

    /// The event as XML: the native rendering when it was captured at read
    /// time, otherwise a rendering built from the record fields on first use.
    pub fn xml(&self) -> &str {
        if let Some(raw) = &self.raw_xml {
            return raw;
        }
        self.xml.get_or_init(|| self.build_xml())
    }

    fn build_xml(&self) -> String {
        let mut xml = String::with_capacity(1024);
        xml.push_str("<Event xmlns=\"http://schemas.microsoft.com/win/2004/08/events/event\">\r\n");
        xml.push_str("  <System>\r\n");
        let _ = writeln!(xml, "    <Provider Name=\"{}\" />\r", escape(&self.source));
        match self.qualifiers {
            Some(q) => {
                let _ = writeln!(xml, "    <EventID Qualifiers=\"{q}\">{}</EventID>\r", self.id);
            }
            None => {
                let _ = writeln!(xml, "    <EventID>{}</EventID>\r", self.id);
            }
        }
        if let Some(v) = self.version {
            let _ = writeln!(xml, "    <Version>{v}</Version>\r");
        }
        if let Some(l) = self.level_value {
            let _ = writeln!(xml, "    <Level>{l}</Level>\r");
        }
        if let Some(t) = self.task {
            let _ = writeln!(xml, "    <Task>{t}</Task>\r");
        }
        if let Some(o) = self.opcode {
            let _ = writeln!(xml, "    <Opcode>{o}</Opcode>\r");
        }
        let _ = writeln!(xml, "    <Keywords>0x{:x}</Keywords>\r", self.keywords_value);
        let _ = writeln!(
            xml,
            "    <TimeCreated SystemTime=\"{}\" />\r",
            format_system_time(&self.time_created)
        );
        if let Some(r) = self.record_id {
            let _ = writeln!(xml, "    <EventRecordID>{r}</EventRecordID>\r");
        }
        match &self.activity_id {
            Some(a) => {
                let _ = writeln!(xml, "    <Correlation ActivityID=\"{}\" />\r", escape(a));
            }
            None => xml.push_str("    <Correlation />\r\n"),
        }
        let _ = writeln!(
            xml,
            "    <Execution ProcessID=\"{}\" ThreadID=\"{}\" />\r",
            self.process_id.unwrap_or(0),
            self.thread_id.unwrap_or(0)
        );
        let _ = writeln!(xml, "    <Channel>{}</Channel>\r", escape(&self.log_name));
        let _ = writeln!(xml, "    <Computer>{}</Computer>\r", escape(&self.computer_name));
        match &self.user_id {
            Some(u) => {
                let _ = writeln!(xml, "    <Security UserID=\"{}\" />\r", escape(u));
            }
            None => xml.push_str("    <Security />\r\n"),
        }
        xml.push_str("  </System>\r\n");
        xml.push_str("  <EventData>\r\n");
        for p in &self.properties {
            let _ = writeln!(xml, "    <Data>{}</Data>\r", escape(&p.to_string()));
        }
        xml.push_str("  </EventData>\r\n");
        xml.push_str("</Event>");
        xml
    }
}

/// Escape text for use in XML content or attribute values.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::xml_parser::parse_event_xml;

    fn sample_record() -> NativeEventRecord {
        NativeEventRecord {
            provider_name: "Service Control Manager".into(),
            id: 7036,
            qualifiers: Some(16384),
            level: Some(4),
            task: Some(0),
            keywords: 0x8080_0000_0000_0000,
            record_id: Some(12),
            computer_name: "HOST<1>".into(),
            log_name: "System".into(),
            properties: vec![PropertyValue::String("Windows Update & more".into())],
            ..Default::default()
        }
    }

    #[test]
    fn test_built_xml_parses_back() {
        let interner = StringInterner::new();
        let model = DisplayEventModel::new(&sample_record(), ResolvedText::default(), &interner);
        let parsed = parse_event_xml(model.xml(), "").unwrap();
        assert_eq!(parsed.id, 7036);
        assert_eq!(parsed.qualifiers, Some(16384));
        assert_eq!(parsed.computer_name, "HOST<1>");
        assert_eq!(parsed.log_name, "System");
        assert_eq!(
            parsed.properties,
            vec![PropertyValue::String("Windows Update & more".into())]
        );
    }

    #[test]
    fn test_native_xml_is_preferred() {
        let interner = StringInterner::new();
        let mut record = sample_record();
        record.xml = Some("<Event/>".into());
        let model = DisplayEventModel::new(&record, ResolvedText::default(), &interner);
        assert_eq!(model.xml(), "<Event/>");
    }

    #[test]
    fn test_strings_are_interned() {
        let interner = StringInterner::new();
        let resolved = ResolvedText {
            description: "The service entered the running state.".into(),
            task_category: "None".into(),
            keywords: vec!["Classic".into()],
        };
        let a = DisplayEventModel::new(&sample_record(), resolved.clone(), &interner);
        let b = DisplayEventModel::new(&sample_record(), resolved, &interner);
        assert!(Arc::ptr_eq(&a.description, &b.description));
        assert!(Arc::ptr_eq(&a.keywords[0], &b.keywords[0]));
    }
}
