//! `roxmltree` readers for event XML renderings and manifest templates.

use chrono::{DateTime, Utc};

use crate::core::event_record::{NativeEventRecord, PropertyValue};
use crate::util::error::EventResolverError;

/// Parse an `EvtRender` XML rendering into a [`NativeEventRecord`].
///
/// ```xml
/// <Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event">
///   <System>
///     <Provider Name="MSExchangeRepl" />
///     <EventID Qualifiers="16384">4114</EventID>
///     <TimeCreated SystemTime="2024-01-15T10:23:45.1234567Z" />
///     <Channel>Application</Channel>
///   </System>
///   <EventData>
///     <Data>SERVER1</Data>
///   </EventData>
/// </Event>
/// ```
///
/// Payload values become string properties in document order. `log_name`
/// is used when the rendering carries no `<Channel>`.
///
/// # Errors
/// [`EventResolverError::XmlParse`] for malformed XML or a missing
/// `<System>` element.
pub fn parse_event_xml(xml: &str, log_name: &str) -> Result<NativeEventRecord, EventResolverError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| EventResolverError::XmlParse(format!("event XML: {e}")))?;
    let event = doc.root_element();
    let system = element(event, "System")
        .map(SystemView)
        .ok_or_else(|| EventResolverError::XmlParse("event XML has no <System>".into()))?;

    let provider = system.child("Provider");
    let event_id = system.child("EventID");
    let execution = system.child("Execution");
    let channel = system.text("Channel");

    Ok(NativeEventRecord {
        provider_name: provider
            .and_then(|p| p.attribute("Name").or_else(|| p.attribute("EventSourceName")))
            .unwrap_or_default()
            .to_string(),
        id: event_id.and_then(|e| parse_trimmed(e.text())).unwrap_or(0),
        qualifiers: event_id.and_then(|e| parse_trimmed(e.attribute("Qualifiers"))),
        version: system.number("Version"),
        task: system.number("Task"),
        opcode: system.number("Opcode"),
        keywords: system.hex("Keywords").unwrap_or(0),
        level: system.number("Level"),
        time_created: system
            .child("TimeCreated")
            .and_then(|t| t.attribute("SystemTime"))
            .and_then(parse_system_time)
            .unwrap_or_default(),
        record_id: system.number("EventRecordID"),
        process_id: execution.and_then(|e| parse_trimmed(e.attribute("ProcessID"))),
        thread_id: execution.and_then(|e| parse_trimmed(e.attribute("ThreadID"))),
        activity_id: system.attribute("Correlation", "ActivityID"),
        user_id: system.attribute("Security", "UserID"),
        computer_name: system.text("Computer"),
        log_name: if channel.is_empty() {
            log_name.to_string()
        } else {
            channel
        },
        properties: payload_values(event)
            .into_iter()
            .map(PropertyValue::String)
            .collect(),
        xml: Some(xml.to_string()),
        bookmark: None,
        error: None,
    })
}

/// One `<data>` declaration inside an event template.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TemplateField {
    pub name: String,
    pub in_type: String,
    pub out_type: String,
}

impl TemplateField {
    /// `true` when the native formatter renders this field in hexadecimal.
    pub fn is_hex(&self) -> bool {
        matches!(
            self.out_type.as_str(),
            "win:HexInt8" | "win:HexInt16" | "win:HexInt32" | "win:HexInt64" | "win:Win32Error"
                | "win:NTSTATUS" | "win:HResult"
        ) || self.in_type == "win:Pointer"
            || self.in_type == "win:HexInt32"
            || self.in_type == "win:HexInt64"
    }
}

/// Parse a manifest `<template>` fragment into its ordered fields.
///
/// An empty template yields no fields. Malformed XML is an error so callers
/// can decide whether to fall back to untyped formatting.
pub fn parse_template(template: &str) -> Result<Vec<TemplateField>, EventResolverError> {
    if template.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc = roxmltree::Document::parse(template)
        .map_err(|e| EventResolverError::XmlParse(format!("Failed to parse template: {e}")))?;

    Ok(doc
        .root_element()
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "data")
        .map(|n| TemplateField {
            name: n.attribute("name").unwrap_or_default().to_string(),
            in_type: n.attribute("inType").unwrap_or_default().to_string(),
            out_type: n.attribute("outType").unwrap_or_default().to_string(),
        })
        .collect())
}

/// First child element named `name`, namespace ignored.
fn element<'a, 'i>(parent: roxmltree::Node<'a, 'i>, name: &str) -> Option<roxmltree::Node<'a, 'i>> {
    parent
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn parse_trimmed<T: std::str::FromStr>(text: Option<&str>) -> Option<T> {
    text.and_then(|t| t.trim().parse().ok())
}

/// Typed reads from the `<System>` block.
#[derive(Clone, Copy)]
struct SystemView<'a, 'i>(roxmltree::Node<'a, 'i>);

impl<'a, 'i> SystemView<'a, 'i> {
    fn child(self, name: &str) -> Option<roxmltree::Node<'a, 'i>> {
        element(self.0, name)
    }

    fn text(self, name: &str) -> String {
        self.child(name)
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .unwrap_or_default()
    }

    fn number<T: std::str::FromStr>(self, name: &str) -> Option<T> {
        parse_trimmed(self.child(name).and_then(|n| n.text()))
    }

    /// `<Keywords>` is written as `0x8000000000000000`.
    fn hex(self, name: &str) -> Option<u64> {
        let text = self.child(name)?.text()?.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        u64::from_str_radix(digits, 16).ok()
    }

    fn attribute(self, name: &str, attr: &str) -> Option<String> {
        self.child(name)?.attribute(attr).map(str::to_string)
    }
}

/// Parse a `<TimeCreated SystemTime=..>` value. Fraction precision varies
/// between zero and seven digits.
pub fn parse_system_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ").map(|n| n.and_utc())
        })
        .ok()
}

/// Insertion-string values from `<EventData>`, or from the single wrapper
/// element inside `<UserData>`.
fn payload_values(event: roxmltree::Node) -> Vec<String> {
    if let Some(data) = element(event, "EventData") {
        return data
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "Data")
            .map(inner_text)
            .collect();
    }
    element(event, "UserData")
        .into_iter()
        .flat_map(|user| user.children().filter(|n| n.is_element()))
        .flat_map(|wrapper| wrapper.children().filter(|n| n.is_element()))
        .map(inner_text)
        .collect()
}

fn inner_text(node: roxmltree::Node) -> String {
    node.descendants()
        .filter(|d| d.is_text())
        .filter_map(|d| d.text())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event">
  <System>
    <Provider Name="TestProvider" />
    <EventID Qualifiers="16384">1001</EventID>
    <Version>2</Version>
    <Level>2</Level>
    <Task>3</Task>
    <Opcode>0</Opcode>
    <Keywords>0x80000000000000</Keywords>
    <TimeCreated SystemTime="2024-01-15T10:23:45.1234567Z" />
    <EventRecordID>9876</EventRecordID>
    <Execution ProcessID="4532" ThreadID="7890" />
    <Channel>Application</Channel>
    <Computer>DESKTOP-TEST</Computer>
    <Security UserID="S-1-5-21-123" />
  </System>
  <EventData>
    <Data Name="ProgramName">explorer.exe</Data>
    <Data Name="HangTime">10000</Data>
  </EventData>
</Event>"#;

    #[test]
    fn test_parse_basic_event() {
        let record = parse_event_xml(SAMPLE_XML, "Fallback").unwrap();
        assert_eq!(record.id, 1001);
        assert_eq!(record.qualifiers, Some(16384));
        assert_eq!(record.version, Some(2));
        assert_eq!(record.level, Some(2));
        assert_eq!(record.task, Some(3));
        assert_eq!(record.keywords, 0x80000000000000);
        assert_eq!(record.record_id, Some(9876));
        assert_eq!(record.provider_name, "TestProvider");
        assert_eq!(record.computer_name, "DESKTOP-TEST");
        assert_eq!(record.log_name, "Application");
        assert_eq!(record.process_id, Some(4532));
        assert_eq!(record.thread_id, Some(7890));
        assert_eq!(record.user_id, Some("S-1-5-21-123".into()));
        assert_eq!(
            record.properties,
            vec![
                PropertyValue::String("explorer.exe".into()),
                PropertyValue::String("10000".into())
            ]
        );
    }

    #[test]
    fn test_user_data_and_missing_channel() {
        let xml = r#"<Event><System><Provider Name="P"/><EventID>7</EventID>
<Keywords>0X10</Keywords></System>
<UserData><Wrapper><Path>C:\temp</Path><Code><b>4</b>2</Code></Wrapper></UserData></Event>"#;
        let record = parse_event_xml(xml, "Setup").unwrap();
        assert_eq!(record.log_name, "Setup");
        assert_eq!(record.keywords, 0x10);
        assert_eq!(record.qualifiers, None);
        assert_eq!(
            record.properties,
            vec![
                PropertyValue::String("C:\\temp".into()),
                PropertyValue::String("42".into())
            ]
        );
    }

    #[test]
    fn test_missing_system_is_an_error() {
        assert!(parse_event_xml("<Event/>", "Application").is_err());
        assert!(parse_event_xml("<Event", "Application").is_err());
    }

    #[test]
    fn test_parse_template_fields() {
        let template = r#"<template xmlns="http://schemas.microsoft.com/win/2004/08/events">
  <data name="Status" inType="win:UInt32" outType="win:HexInt32"/>
  <data name="Name" inType="win:UnicodeString" outType="xs:string"/>
</template>"#;
        let fields = parse_template(template).unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields[0].is_hex());
        assert!(!fields[1].is_hex());
        assert_eq!(fields[1].name, "Name");
    }

    #[test]
    fn test_empty_template_has_no_fields() {
        assert!(parse_template("  ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_system_time_3_digits() {
        assert!(parse_system_time("2024-01-15T10:23:45.123Z").is_some());
    }
}
