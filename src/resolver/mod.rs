//! Resolution strategies.
//!
//! Every strategy implements [`EventResolver`]. They differ only in where
//! provider metadata comes from, which is abstracted as a
//! [`MetadataSource`]: the live machine, one or more provider databases, or
//! whichever of the two the settings select. The shared
//! [`ResolverCore`] memoizes provider metadata, runs the resolution algorithm
//! and keeps the most recent diagnostics.

pub mod database;
pub mod local;
pub mod provider_cache;
pub mod versatile;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::display_event::DisplayEventModel;
use crate::core::event_record::NativeEventRecord;
use crate::core::provider_details::ProviderDetails;
use crate::core::resolution::{resolve, ResolutionDiagnostic};
use crate::util::constants::MAX_DIAGNOSTICS;
use crate::util::error::Result;
use crate::util::intern::StringInterner;

pub use database::{DatabaseResolver, DatabaseSource};
pub use local::LocalResolver;
pub use provider_cache::ProviderDetailsCache;
pub use versatile::VersatileResolver;

/// Turns raw records into display models.
pub trait EventResolver: Send + Sync {
    /// Resolve one record read from `owning_log_name`. Never fails: missing
    /// or broken metadata degrades to sentinel text.
    fn resolve(&self, record: &NativeEventRecord, owning_log_name: &str) -> DisplayEventModel;

    /// Drain the diagnostics recorded since the last call, oldest first.
    fn take_diagnostics(&self) -> Vec<ResolutionDiagnostic>;

    /// Short strategy name for logs.
    fn name(&self) -> &'static str;
}

/// Where a strategy gets provider metadata from.
pub trait MetadataSource: Send + Sync {
    /// Load everything known about `provider_name`. An unknown provider is
    /// `Ok` with empty details; errors are reserved for failures of the
    /// source itself.
    fn load(&self, provider_name: &str) -> Result<ProviderDetails>;

    fn describe(&self) -> String;
}

/// Bounded log of the most recent diagnostics.
#[derive(Debug, Default)]
pub struct DiagnosticRing {
    entries: Mutex<VecDeque<ResolutionDiagnostic>>,
}

impl DiagnosticRing {
    pub fn push_all(&self, diagnostics: Vec<ResolutionDiagnostic>) {
        if diagnostics.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        for d in diagnostics {
            if entries.len() == MAX_DIAGNOSTICS {
                entries.pop_front();
            }
            entries.push_back(d);
        }
    }

    pub fn take(&self) -> Vec<ResolutionDiagnostic> {
        self.entries.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// State and behaviour shared by every strategy.
pub struct ResolverCore {
    source: Box<dyn MetadataSource>,
    cache: ProviderDetailsCache,
    interner: Arc<StringInterner>,
    diagnostics: DiagnosticRing,
}

impl std::fmt::Debug for ResolverCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverCore")
            .field("source", &self.source.describe())
            .field("cached_providers", &self.cache.len())
            .finish()
    }
}

impl ResolverCore {
    pub fn new(source: Box<dyn MetadataSource>, interner: Arc<StringInterner>) -> Self {
        Self {
            source,
            cache: ProviderDetailsCache::new(),
            interner,
            diagnostics: DiagnosticRing::default(),
        }
    }

    /// Metadata for `provider_name`, loaded once per core. A failing source
    /// is logged and cached as empty details.
    pub fn provider_details(&self, provider_name: &str) -> Arc<ProviderDetails> {
        self.cache.get_or_load(provider_name, |name| {
            self.source.load(name).unwrap_or_else(|e| {
                tracing::warn!(
                    "Failed to load metadata for '{name}' from {}: {e}",
                    self.source.describe()
                );
                ProviderDetails::empty(name)
            })
        })
    }

    pub fn resolve(&self, record: &NativeEventRecord, owning_log_name: &str) -> DisplayEventModel {
        let details = self.provider_details(&record.provider_name);
        let resolution = resolve(record, &details, owning_log_name, &self.interner);
        self.diagnostics.push_all(resolution.diagnostics);
        tracing::trace!(
            "Resolved {} event {} from '{owning_log_name}'",
            record.provider_name,
            record.id
        );
        resolution.event
    }

    pub fn take_diagnostics(&self) -> Vec<ResolutionDiagnostic> {
        self.diagnostics.take()
    }

    pub fn cache(&self) -> &ProviderDetailsCache {
        &self.cache
    }

    pub fn interner(&self) -> &Arc<StringInterner> {
        &self.interner
    }

    pub fn source(&self) -> &dyn MetadataSource {
        self.source.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(id: u32) -> ResolutionDiagnostic {
        ResolutionDiagnostic::AmbiguousEvent {
            provider_name: "P".into(),
            id,
            version: Some(0),
            log_name: "Application".into(),
            candidates: Vec::new(),
        }
    }

    #[test]
    fn test_ring_keeps_most_recent() {
        let ring = DiagnosticRing::default();
        ring.push_all((0..(MAX_DIAGNOSTICS as u32 + 5)).map(diag).collect());
        assert_eq!(ring.len(), MAX_DIAGNOSTICS);
        let taken = ring.take();
        assert_eq!(taken.first(), Some(&diag(5)));
        assert!(ring.is_empty());
    }
}
