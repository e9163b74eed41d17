//! Resolution against the metadata installed on this machine.

use std::sync::Arc;

use crate::core::display_event::DisplayEventModel;
use crate::core::event_record::NativeEventRecord;
use crate::core::resolution::ResolutionDiagnostic;
use crate::resolver::{EventResolver, MetadataSource, ResolverCore};
use crate::util::intern::StringInterner;

/// Reads provider metadata live, with no persisted cache.
#[derive(Debug)]
pub struct LocalResolver {
    core: ResolverCore,
}

impl LocalResolver {
    pub fn with_source(source: Box<dyn MetadataSource>, interner: Arc<StringInterner>) -> Self {
        tracing::info!("Local resolver using {}", source.describe());
        Self {
            core: ResolverCore::new(source, interner),
        }
    }

    /// A resolver over the local machine's modern and legacy providers.
    #[cfg(windows)]
    pub fn new(
        names: Arc<crate::core::provider_enumerator::ProviderNameCache>,
        hive: crate::core::legacy_provider::RegistryHive,
        interner: Arc<StringInterner>,
    ) -> Self {
        Self::with_source(Box::new(LocalMetadataSource::new(names, hive)), interner)
    }

    pub fn core(&self) -> &ResolverCore {
        &self.core
    }
}

impl EventResolver for LocalResolver {
    fn resolve(&self, record: &NativeEventRecord, owning_log_name: &str) -> DisplayEventModel {
        self.core.resolve(record, owning_log_name)
    }

    fn take_diagnostics(&self) -> Vec<ResolutionDiagnostic> {
        self.core.take_diagnostics()
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(windows)]
pub use native::{show_local, LocalMetadataSource};

#[cfg(windows)]
mod native {
    use std::sync::Arc;

    use crate::core::legacy_provider::{load_legacy_messages, LegacyFileLocator, RegistryHive};
    use crate::core::modern_provider::load_modern_metadata;
    use crate::core::provider_details::ProviderDetails;
    use crate::core::provider_enumerator::ProviderNameCache;
    use crate::database::maintenance::name_matches;
    use crate::resolver::MetadataSource;
    use crate::util::error::Result;

    /// Modern metadata for registered publishers plus legacy message files
    /// from the event log registry of `hive`.
    pub struct LocalMetadataSource {
        names: Arc<ProviderNameCache>,
        hive: RegistryHive,
        locator: LegacyFileLocator,
    }

    impl LocalMetadataSource {
        /// Message file paths are made readable from this machine using the
        /// hive's own `%SystemRoot%`.
        pub fn new(names: Arc<ProviderNameCache>, hive: RegistryHive) -> Self {
            let locator = hive.file_locator();
            Self {
                names,
                hive,
                locator,
            }
        }
    }

    impl MetadataSource for LocalMetadataSource {
        fn load(&self, provider_name: &str) -> Result<ProviderDetails> {
            let mut details = if self.names.contains(provider_name) {
                load_modern_metadata(provider_name)
            } else {
                ProviderDetails::empty(provider_name)
            };
            let (messages, parameters) =
                load_legacy_messages(&self.hive, provider_name, &self.locator);
            details.messages = messages;
            details.parameters = parameters;
            Ok(details)
        }

        fn describe(&self) -> String {
            match self.hive.computer() {
                Some(host) => format!(
                    "local machine ({} registered providers), legacy files of {host}",
                    self.names.len()
                ),
                None => format!("local machine ({} registered providers)", self.names.len()),
            }
        }
    }

    /// Load the local metadata of every registered provider whose name
    /// matches `filter`.
    pub fn show_local(filter: Option<&str>) -> Result<Vec<ProviderDetails>> {
        let names = Arc::new(ProviderNameCache::local()?);
        let source = LocalMetadataSource::new(Arc::clone(&names), RegistryHive::local());
        names
            .names()
            .iter()
            .filter(|n| name_matches(n, filter))
            .map(|n| source.load(n))
            .collect()
    }
}
