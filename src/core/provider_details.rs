//! Aggregated provider metadata.
//!
//! [`ProviderDetails`] is the unit loaded from the local machine, cached in
//! memory per resolver and persisted in provider databases. Maps use
//! `BTreeMap` so serialized blobs are deterministic: two equal providers
//! always serialize to the same bytes.

use std::collections::BTreeMap;

/// One modern (manifest) event definition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EventDefinition {
    pub id: u32,
    pub version: u8,
    /// Channel path the event is declared for. Empty when the manifest
    /// declares no channel.
    pub log_name: String,
    pub level: Option<u8>,
    /// Opcode value, already shifted down from the native encoding.
    pub opcode: Option<i32>,
    pub task: Option<i32>,
    pub keywords: u64,
    /// XML `<template>` describing the property list and output types.
    pub template: String,
    /// Message template with `%1`..`%n` placeholders. May be empty.
    pub description: String,
}

/// One legacy message-table entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MessageEntry {
    /// The full 32-bit message id (severity, facility and code bits).
    pub raw_id: u32,
    /// The low 16 bits of `raw_id`; the key event ids are matched against.
    pub short_id: u16,
    pub text: String,
    pub provider_name: String,
    /// Log the entry was registered under. Only category-file entries carry
    /// one, which is what task-name lookup keys on.
    pub log_link: Option<String>,
    pub tag: Option<String>,
}

impl MessageEntry {
    pub fn new(raw_id: u32, text: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            raw_id,
            short_id: raw_id as u16,
            text: text.into(),
            provider_name: provider_name.into(),
            log_link: None,
            tag: None,
        }
    }

    pub fn with_log_link(mut self, log_link: impl Into<String>) -> Self {
        self.log_link = Some(log_link.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// All metadata known for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProviderDetails {
    pub provider_name: String,
    /// Legacy message-table entries, category-file entries first.
    pub messages: Vec<MessageEntry>,
    /// Legacy parameter-file entries used for `%%<id>` insertion.
    pub parameters: Vec<MessageEntry>,
    /// Modern event definitions in discovery order.
    pub events: Vec<EventDefinition>,
    pub keywords: BTreeMap<u64, String>,
    pub opcodes: BTreeMap<i32, String>,
    pub tasks: BTreeMap<i32, String>,
}

impl ProviderDetails {
    /// The explicit "nothing known" sentinel for a provider.
    pub fn empty(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            ..Default::default()
        }
    }

    /// `true` when no facet carries any data.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.parameters.is_empty()
            && self.events.is_empty()
            && self.keywords.is_empty()
            && self.opcodes.is_empty()
            && self.tasks.is_empty()
    }

    /// Case-insensitive cache key for a provider name.
    pub fn key(provider_name: &str) -> String {
        provider_name.to_lowercase()
    }

    /// One-line summary used by logging and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} events, {} messages, {} parameters, {} keywords, {} opcodes, {} tasks",
            self.provider_name,
            self.events.len(),
            self.messages.len(),
            self.parameters.len(),
            self.keywords.len(),
            self.opcodes.len(),
            self.tasks.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_wraps_at_16_bits() {
        let m = MessageEntry::new(0xC000_1004, "text", "Prov");
        assert_eq!(m.short_id, 0x1004);
    }

    #[test]
    fn test_empty_sentinel() {
        let d = ProviderDetails::empty("Some-Provider");
        assert!(d.is_empty());
        assert_eq!(d.provider_name, "Some-Provider");
    }

    #[test]
    fn test_key_is_case_insensitive() {
        assert_eq!(
            ProviderDetails::key("MSExchangeRepl"),
            ProviderDetails::key("msexchangerepl")
        );
    }
}
