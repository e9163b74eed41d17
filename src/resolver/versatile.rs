//! The strategy picked from settings.

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::display_event::DisplayEventModel;
use crate::core::event_record::NativeEventRecord;
use crate::core::resolution::ResolutionDiagnostic;
use crate::resolver::{DatabaseResolver, EventResolver, LocalResolver, MetadataSource};
use crate::util::error::Result;
use crate::util::intern::StringInterner;
use crate::util::settings::ResolverSettings;

/// Uses the configured provider databases when there are any, otherwise the
/// local machine.
#[derive(Debug)]
pub enum VersatileResolver {
    Database(DatabaseResolver),
    Local(LocalResolver),
}

impl VersatileResolver {
    /// Choose a strategy for `database_paths`. `local_source` is only called
    /// when no database is configured.
    pub fn choose(
        database_paths: &[PathBuf],
        local_source: impl FnOnce() -> Result<Box<dyn MetadataSource>>,
        interner: Arc<StringInterner>,
    ) -> Result<Self> {
        let resolver = if database_paths.is_empty() {
            Self::Local(LocalResolver::with_source(local_source()?, interner))
        } else {
            Self::Database(DatabaseResolver::open(database_paths, interner)?)
        };
        tracing::info!("Using the {} resolver", resolver.name());
        Ok(resolver)
    }

    /// Build the resolver the settings describe, reading local metadata from
    /// this machine. With a remote computer configured, legacy registrations
    /// and message files come from that computer's registry and admin shares.
    #[cfg(windows)]
    pub fn from_settings(
        settings: &ResolverSettings,
        interner: Arc<StringInterner>,
    ) -> Result<Self> {
        use crate::core::legacy_provider::RegistryHive;
        use crate::core::provider_enumerator::ProviderNameCache;
        use crate::resolver::local::LocalMetadataSource;

        Self::choose(
            &settings.database_paths(),
            || {
                let names = Arc::new(ProviderNameCache::local()?);
                let hive = match &settings.remote_computer {
                    Some(host) => RegistryHive::connect(host)?,
                    None => RegistryHive::local(),
                };
                Ok(Box::new(LocalMetadataSource::new(names, hive)) as Box<dyn MetadataSource>)
            },
            interner,
        )
    }

    /// Build the resolver the settings describe. Without the native API only
    /// databases are available, so an empty database list resolves nothing.
    #[cfg(not(windows))]
    pub fn from_settings(
        settings: &ResolverSettings,
        interner: Arc<StringInterner>,
    ) -> Result<Self> {
        Self::choose(
            &settings.database_paths(),
            || Ok(Box::new(NoLocalMetadata) as Box<dyn MetadataSource>),
            interner,
        )
    }

    fn inner(&self) -> &dyn EventResolver {
        match self {
            Self::Database(r) => r,
            Self::Local(r) => r,
        }
    }
}

#[cfg(not(windows))]
struct NoLocalMetadata;

#[cfg(not(windows))]
impl MetadataSource for NoLocalMetadata {
    fn load(&self, provider_name: &str) -> Result<crate::core::provider_details::ProviderDetails> {
        Ok(crate::core::provider_details::ProviderDetails::empty(provider_name))
    }

    fn describe(&self) -> String {
        "no local metadata".into()
    }
}

impl EventResolver for VersatileResolver {
    fn resolve(&self, record: &NativeEventRecord, owning_log_name: &str) -> DisplayEventModel {
        self.inner().resolve(record, owning_log_name)
    }

    fn take_diagnostics(&self) -> Vec<ResolutionDiagnostic> {
        self.inner().take_diagnostics()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}
