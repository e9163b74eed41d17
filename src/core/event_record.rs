//! Raw event data as read from the native log.
//!
//! A [`NativeEventRecord`] carries the System fields, the typed property
//! values and (optionally) the native XML rendering of a single record. It is
//! produced by the native reader (or parsed from rendered XML) and consumed by
//! the resolution algorithm. Nothing mutates a record after construction.

use chrono::{DateTime, Utc};

use crate::util::time::format_system_time;

/// One typed substitution value of an event.
///
/// Variants mirror the native variant types closely enough that formatting
/// can honour the declared output type (hex, GUID, SID, timestamp).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    Null,
    String(String),
    Int(i64),
    UInt(u64),
    /// A value the native layer already typed as `HexInt32`/`HexInt64`.
    HexInt(u64),
    /// A pointer-sized value (`SizeT`).
    Pointer(u64),
    Float(f64),
    Bool(bool),
    /// Canonical `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}` form.
    Guid(String),
    /// Canonical `S-1-...` form.
    Sid(String),
    Time(DateTime<Utc>),
    Binary(Vec<u8>),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// The numeric value, when this property is an integer of any kind.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) | Self::HexInt(v) | Self::Pointer(v) => Some(*v),
            Self::Int(v) => Some(*v as u64),
            Self::String(s) => parse_numeric_text(s),
            _ => None,
        }
    }

    /// The string payload when this is a plain string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Build a [`PropertyValue::Sid`] from a binary SID. `None` when the
    /// bytes are shorter than the sub-authority count declares.
    pub fn sid_from_bytes(bytes: &[u8]) -> Option<Self> {
        let revision = *bytes.first()?;
        let count = *bytes.get(1)? as usize;
        let authority = bytes.get(2..8)?;
        let authority = authority
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let mut sid = format!("S-{revision}-{authority}");
        for i in 0..count {
            let at = 8 + i * 4;
            let sub = bytes.get(at..at + 4)?;
            let sub = u32::from_le_bytes([sub[0], sub[1], sub[2], sub[3]]);
            sid.push_str(&format!("-{sub}"));
        }
        Some(Self::Sid(sid))
    }

    /// Build a [`PropertyValue::Guid`] from the 16-byte native GUID layout.
    pub fn guid_from_bytes(b: &[u8; 16]) -> Self {
        let d1 = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let d2 = u16::from_le_bytes([b[4], b[5]]);
        let d3 = u16::from_le_bytes([b[6], b[7]]);
        Self::Guid(format!(
            "{{{d1:08X}-{d2:04X}-{d3:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        ))
    }
}

/// Accept decimal or `0x`-prefixed hex text, as found in XML-rendered data.
fn parse_numeric_text(s: &str) -> Option<u64> {
    let t = s.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        t.parse::<u64>().ok()
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::String(s) | Self::Guid(s) | Self::Sid(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::HexInt(v) | Self::Pointer(v) => write!(f, "0x{v:X}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Time(ts) => f.write_str(&format_system_time(ts)),
            Self::Binary(bytes) => {
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

/// Opaque, string-serializable resumption token.
///
/// Wraps the native bookmark XML so it survives process restarts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Bookmark(String);

impl Bookmark {
    pub fn from_xml(xml: impl Into<String>) -> Self {
        Self(xml.into())
    }

    pub fn as_xml(&self) -> &str {
        &self.0
    }
}

/// Represents a single raw Windows Event Log entry.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NativeEventRecord {
    /// The event provider / source name.
    pub provider_name: String,

    /// Event ID. Kept 32 bits wide: some providers report ids that do not
    /// fit the 16-bit manifest id.
    pub id: u32,

    /// Legacy qualifiers (the high 16 bits of a classic message id).
    pub qualifiers: Option<u16>,

    /// Manifest event version.
    pub version: Option<u8>,

    /// Task category value.
    pub task: Option<u16>,

    /// Opcode value.
    pub opcode: Option<u8>,

    /// Keywords bitmask.
    pub keywords: u64,

    /// Severity level (0 = LogAlways .. 5 = Verbose).
    pub level: Option<u8>,

    /// Timestamp of the event in UTC.
    pub time_created: DateTime<Utc>,

    /// Event record id. `None` marks a record that failed to render.
    pub record_id: Option<u64>,

    pub process_id: Option<u32>,

    pub thread_id: Option<u32>,

    /// Correlation Activity ID, if present.
    pub activity_id: Option<String>,

    /// User SID string, if present.
    pub user_id: Option<String>,

    /// The computer name where the event was generated.
    pub computer_name: String,

    /// The log this record was read from.
    pub log_name: String,

    /// Substitution values in template order.
    pub properties: Vec<PropertyValue>,

    /// XML rendering captured at read time, if requested.
    pub xml: Option<String>,

    /// Set on the last successfully rendered record of a batch.
    pub bookmark: Option<Bookmark>,

    /// Explicit error marker for a record whose payload could not be read.
    pub error: Option<String>,
}

impl NativeEventRecord {
    /// Build the placeholder that stands in for a record that failed to
    /// render, so the rest of the batch can continue.
    pub fn failed(log_name: &str, error: impl Into<String>) -> Self {
        Self {
            log_name: log_name.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns the human-readable level name for a given numeric level.
    pub fn level_to_name(level: Option<u8>) -> &'static str {
        match level {
            Some(0) => "LogAlways",
            Some(1) => "Critical",
            Some(2) => "Error",
            Some(3) => "Warning",
            Some(4) => "Information",
            Some(5) => "Verbose",
            None => "",
            _ => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_display_forms() {
        assert_eq!(PropertyValue::HexInt(0x1F).to_string(), "0x1F");
        assert_eq!(PropertyValue::Binary(vec![0xDE, 0xAD]).to_string(), "DEAD");
        assert_eq!(
            PropertyValue::Array(vec![PropertyValue::UInt(1), PropertyValue::UInt(2)]).to_string(),
            "1, 2"
        );
        assert_eq!(PropertyValue::Null.to_string(), "");
    }

    #[test]
    fn test_numeric_text_is_parsed() {
        assert_eq!(PropertyValue::String("0x10".into()).as_u64(), Some(16));
        assert_eq!(PropertyValue::String("42".into()).as_u64(), Some(42));
        assert_eq!(PropertyValue::String("abc".into()).as_u64(), None);
    }

    #[test]
    fn test_sid_from_bytes() {
        // S-1-5-18 (LocalSystem)
        let bytes = [1u8, 1, 0, 0, 0, 0, 0, 5, 18, 0, 0, 0];
        assert_eq!(
            PropertyValue::sid_from_bytes(&bytes),
            Some(PropertyValue::Sid("S-1-5-18".into()))
        );
        assert_eq!(PropertyValue::sid_from_bytes(&bytes[..10]), None);
    }

    #[test]
    fn test_guid_from_bytes() {
        let bytes = [
            0x78, 0x56, 0x34, 0x12, 0xBC, 0x9A, 0xF0, 0xDE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
            0x07, 0x08,
        ];
        assert_eq!(
            PropertyValue::guid_from_bytes(&bytes).to_string(),
            "{12345678-9ABC-DEF0-0102-030405060708}"
        );
    }

    #[test]
    fn test_failed_record_has_no_record_id() {
        let r = NativeEventRecord::failed("System", "EvtRender failed");
        assert!(r.is_error());
        assert!(r.record_id.is_none());
        assert_eq!(r.log_name, "System");
    }
}
