//! Core domain modules for evtresolve.
//!
//! Contains the event data model, XML parsing, description formatting and
//! keyword decoding, the resolution algorithm, the legacy and modern
//! metadata loaders, and the native reader and subscription watcher.

pub mod description;
pub mod display_event;
pub mod event_record;
pub mod keywords;
pub mod legacy_provider;
pub mod message_table;
pub mod provider_details;
pub mod provider_enumerator;
pub mod resolution;
pub mod xml_parser;

#[cfg(windows)]
pub mod event_reader;
#[cfg(windows)]
pub mod event_watcher;
#[cfg(windows)]
pub mod evt_native;
#[cfg(windows)]
pub mod modern_provider;
