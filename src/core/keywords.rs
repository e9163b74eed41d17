//! Keyword bitmask decoding.
//!
//! The system reserves the top byte of the keyword mask for a fixed set of
//! well-known keywords. Their display names are defined here rather than
//! taken from any generic table, because the generic names collide (the
//! correlation-hint and audit-failure bits share a name in some tables).
//! Provider keywords are matched on the low 32 bits only: several providers
//! redefine high bits that collide with the system values.

use std::collections::BTreeMap;

/// Well-known system keywords and their display names.
pub const STANDARD_KEYWORDS: [(u64, &str); 8] = [
    (0x0001_0000_0000_0000, "Response Time"),
    (0x0002_0000_0000_0000, "WDI Context"),
    (0x0004_0000_0000_0000, "WDI Diag"),
    (0x0008_0000_0000_0000, "SQM"),
    (0x0010_0000_0000_0000, "Audit Failure"),
    (0x0020_0000_0000_0000, "Audit Success"),
    (0x0040_0000_0000_0000, "Correlation Hint"),
    (0x0080_0000_0000_0000, "Classic"),
];

const PROVIDER_KEYWORD_MASK: u64 = 0xFFFF_FFFF;

/// Display name of a single well-known keyword bit.
pub fn standard_keyword_name(bit: u64) -> Option<&'static str> {
    STANDARD_KEYWORDS
        .iter()
        .find(|(value, _)| *value == bit)
        .map(|(_, name)| *name)
}

/// Decode `mask` into display names, in ascending bit order.
///
/// Bits matching a well-known keyword map to its name; other bits within the
/// low 32 bits map through the provider's keyword table. Unknown bits are
/// skipped.
pub fn decode_keywords(mask: u64, provider_keywords: &BTreeMap<u64, String>) -> Vec<String> {
    let mut names = Vec::new();
    for bit_index in 0..64 {
        let bit = 1u64 << bit_index;
        if mask & bit == 0 {
            continue;
        }
        if let Some(name) = standard_keyword_name(bit) {
            names.push(name.to_string());
        } else if bit & PROVIDER_KEYWORD_MASK != 0 {
            if let Some(name) = provider_keywords.get(&bit) {
                names.push(name.clone());
            }
        }
    }
    names
}
