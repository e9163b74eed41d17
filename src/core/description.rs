//! Message template formatting.
//!
//! Expands a provider message template the way the native message formatter
//! does: `%n`/`%t`/`%r` escapes, `%<digits>` property insertion (honouring
//! hex output types and stripping printf-style `!fmt!` suffixes), `%%<id>`
//! parameter insertion from the provider's parameter file, and trailing line
//! break trimming. A placeholder referring past the end of the property list
//! is reported as a [`FormatError`] so the caller can substitute a sentinel.

use crate::core::event_record::PropertyValue;
use crate::core::provider_details::MessageEntry;
use crate::core::xml_parser::TemplateField;

/// Maximum nesting of `%%<id>` parameter references.
const MAX_PARAMETER_DEPTH: usize = 4;

/// Why a template could not be expanded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("placeholder %{index} refers past the {available} available properties")]
    MissingProperty { index: usize, available: usize },
}

/// Expand `template` with `properties`.
///
/// `fields` are the declared template fields (may be empty for legacy
/// events); `parameters` are the provider's legacy parameter entries.
pub fn format_description(
    template: &str,
    properties: &[PropertyValue],
    fields: &[TemplateField],
    parameters: &[MessageEntry],
) -> Result<String, FormatError> {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len() + 64);
    let mut i = 0usize;
    let mut literal_start = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }

        out.push_str(&template[literal_start..i]);
        let next = bytes.get(i + 1).copied();

        match next {
            Some(b'n') => {
                let crlf_before = i >= 2 && &bytes[i - 2..i] == b"\r\n";
                let crlf_after = bytes[i + 2..].starts_with(b"\r\n");
                i += 2;
                if crlf_after {
                    out.push_str("\r\n");
                    i += 2;
                } else if !crlf_before {
                    out.push_str("\r\n");
                }
            }
            Some(b't') => {
                out.push('\t');
                i += 2;
            }
            Some(b'r') => {
                out.push('\r');
                i += 2;
            }
            Some(b'0') => {
                // %0 ends the message without a trailing line break.
                literal_start = bytes.len();
                break;
            }
            Some(b'%') => {
                let digits = count_digits(&bytes[i + 2..]);
                if digits > 0 {
                    // Parameter references in the template are kept verbatim.
                    out.push_str(&template[i..i + 2 + digits]);
                    i += 2 + digits;
                } else {
                    out.push('%');
                    i += 2;
                }
            }
            Some(b'.') | Some(b'!') => {
                out.push(next.unwrap_or(b'.') as char);
                i += 2;
            }
            Some(c) if c.is_ascii_digit() => {
                let digits = count_digits(&bytes[i + 1..]);
                let index: usize = template[i + 1..i + 1 + digits].parse().unwrap_or(0);
                i += 1 + digits;
                i = skip_printf_spec(bytes, i);

                let slot = index.checked_sub(1);
                let value = slot.and_then(|s| properties.get(s)).ok_or(
                    FormatError::MissingProperty {
                        index,
                        available: properties.len(),
                    },
                )?;
                let rendered = render_property(value, slot.and_then(|s| fields.get(s)));
                out.push_str(&resolve_parameters(&rendered, parameters, 0));
            }
            _ => {
                out.push('%');
                i += 1;
            }
        }
        literal_start = i;
    }

    if literal_start < bytes.len() {
        out.push_str(&template[literal_start..]);
    }

    Ok(trim_trailing_breaks(&out).to_string())
}

/// Render one property as the native formatter would, given its declared
/// template field.
pub fn render_property(value: &PropertyValue, field: Option<&TemplateField>) -> String {
    if field.is_some_and(TemplateField::is_hex) {
        if let Some(v) = value.as_u64() {
            return format!("0x{v:X}");
        }
    }
    value.to_string()
}

/// Replace `%%<id>` references in a substituted value with the matching
/// parameter text. Only values that start with the marker are touched.
fn resolve_parameters(value: &str, parameters: &[MessageEntry], depth: usize) -> String {
    if depth >= MAX_PARAMETER_DEPTH || parameters.is_empty() || !starts_with_parameter(value) {
        return value.to_string();
    }

    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    let mut i = 0usize;
    let mut literal_start = 0usize;

    while i < bytes.len() {
        if bytes[i] == b'%' && bytes.get(i + 1) == Some(&b'%') {
            let digits = count_digits(&bytes[i + 2..]);
            if digits > 0 {
                let id: Option<u32> = value[i + 2..i + 2 + digits].parse().ok();
                if let Some(text) = id.and_then(|id| find_parameter(parameters, id)) {
                    out.push_str(&value[literal_start..i]);
                    let text = trim_trailing_breaks(text);
                    out.push_str(&resolve_parameters(text, parameters, depth + 1));
                    i += 2 + digits;
                    literal_start = i;
                    continue;
                }
            }
        }
        i += 1;
    }
    out.push_str(&value[literal_start..]);
    out
}

fn starts_with_parameter(value: &str) -> bool {
    let b = value.as_bytes();
    b.len() > 2 && b[0] == b'%' && b[1] == b'%' && b[2].is_ascii_digit()
}

fn find_parameter(parameters: &[MessageEntry], id: u32) -> Option<&str> {
    parameters
        .iter()
        .find(|p| p.raw_id == id)
        .or_else(|| {
            u16::try_from(id)
                .ok()
                .and_then(|short| parameters.iter().find(|p| p.short_id == short))
        })
        .map(|p| p.text.as_str())
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Skip a printf-style `!fmt!` suffix (as in `%1!s!`). An unterminated
/// suffix is left in place.
fn skip_printf_spec(bytes: &[u8], pos: usize) -> usize {
    if bytes.get(pos) != Some(&b'!') {
        return pos;
    }
    match bytes[pos + 1..].iter().position(|&b| b == b'!') {
        Some(rel) => pos + 1 + rel + 1,
        None => pos,
    }
}

fn trim_trailing_breaks(s: &str) -> &str {
    s.trim_end_matches(['\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<PropertyValue> {
        values
            .iter()
            .map(|v| PropertyValue::String(v.to_string()))
            .collect()
    }

    #[test]
    fn test_line_break_escapes() {
        let out = format_description("a%nb%tc", &[], &[], &[]).unwrap();
        assert_eq!(out, "a\r\nb\tc");
    }

    #[test]
    fn test_break_next_to_crlf_is_collapsed() {
        assert_eq!(format_description("a%n\r\nb", &[], &[], &[]).unwrap(), "a\r\nb");
        assert_eq!(format_description("a\r\n%nb", &[], &[], &[]).unwrap(), "a\r\nb");
    }

    #[test]
    fn test_substitution_and_trailing_trim() {
        let args = strings(&["bob", "host"]);
        let out = format_description("User %1 logged on from %2.%n%n", &args, &[], &[]).unwrap();
        assert_eq!(out, "User bob logged on from host.");
    }

    #[test]
    fn test_missing_property_is_an_error() {
        let err = format_description("%1 and %3", &strings(&["x"]), &[], &[]).unwrap_err();
        assert_eq!(
            err,
            FormatError::MissingProperty {
                index: 3,
                available: 1
            }
        );
    }

    #[test]
    fn test_escaped_percent_is_literal() {
        let out = format_description("100%% done, ref %%1234", &[], &[], &[]).unwrap();
        assert_eq!(out, "100% done, ref %%1234");
    }

    #[test]
    fn test_printf_suffix_is_stripped() {
        let out =
            format_description("pid %1!d! exited", &[PropertyValue::UInt(42)], &[], &[]).unwrap();
        assert_eq!(out, "pid 42 exited");
    }

    #[test]
    fn test_terminator_stops_output() {
        let out = format_description("first%0second", &[], &[], &[]).unwrap();
        assert_eq!(out, "first");
    }

    #[test]
    fn test_hex_output_type() {
        let field = TemplateField {
            name: "Status".into(),
            in_type: "win:UInt32".into(),
            out_type: "win:HexInt32".into(),
        };
        let out = format_description("Status %1", &[PropertyValue::UInt(3221225485)], &[field], &[])
            .unwrap();
        assert_eq!(out, "Status 0xC000000D");
    }

    #[test]
    fn test_parameter_reference_in_value_is_resolved() {
        let params = vec![
            MessageEntry::new(1833, "Yes\r\n", "Security"),
            MessageEntry::new(1834, "%%1833", "Security"),
        ];
        let out = format_description("Elevated: %1", &strings(&["%%1834"]), &[], &params).unwrap();
        assert_eq!(out, "Elevated: Yes");
    }

    #[test]
    fn test_unknown_parameter_is_kept() {
        let params = vec![MessageEntry::new(1, "one", "P")];
        let out = format_description("%1", &strings(&["%%99"]), &[], &params).unwrap();
        assert_eq!(out, "%%99");
    }

    #[test]
    fn test_formatting_is_idempotent() {
        let template = "Line one%n%nLine two\r\n%nLine three%n";
        let once = format_description(template, &[], &[], &[]).unwrap();
        let twice = format_description(&once, &[], &[], &[]).unwrap();
        assert_eq!(once, twice);
        assert!(!once.contains("\r\n\r\n\r\n"));
    }
}
