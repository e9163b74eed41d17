//! Resolution against persisted provider databases.
//!
//! Several databases can be configured at once, typically one per product
//! version (`Exchange 2016.db`, `Exchange 2019.db`, `Windows.db`). They are
//! searched in a fixed order: grouped by product name ascending, newest
//! version first within a product, so a versioned database shadows a generic
//! one for the same product. The first database that knows a provider wins.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;

use crate::core::display_event::DisplayEventModel;
use crate::core::event_record::NativeEventRecord;
use crate::core::provider_details::ProviderDetails;
use crate::core::resolution::ResolutionDiagnostic;
use crate::database::maintenance::needs_upgrade;
use crate::database::store::ProviderDatabase;
use crate::resolver::{EventResolver, MetadataSource, ResolverCore};
use crate::util::error::{EventResolverError, Result};
use crate::util::intern::StringInterner;

/// Product name and version parsed from a database file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSortKey {
    pub product: String,
    pub version: Option<Vec<u64>>,
}

impl DatabaseSortKey {
    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_name(&stem)
    }

    /// Split a trailing version token (`2019`, `v15.2`, `_8.1`) off `name`.
    pub fn from_name(name: &str) -> Self {
        static TRAILING_VERSION: OnceLock<Option<Regex>> = OnceLock::new();
        let re = TRAILING_VERSION.get_or_init(|| {
            Regex::new(r"^(?P<product>.*?)[\s_-]*[vV]?(?P<version>\d+(?:\.\d+)*)$").ok()
        });

        if let Some(caps) = re.as_ref().and_then(|re| re.captures(name)) {
            let product = caps["product"].trim();
            if !product.is_empty() {
                let version = caps["version"]
                    .split('.')
                    .map(|part| part.parse::<u64>().unwrap_or(u64::MAX))
                    .collect();
                return Self {
                    product: product.to_lowercase(),
                    version: Some(version),
                };
            }
        }
        Self {
            product: name.trim().to_lowercase(),
            version: None,
        }
    }
}

impl Ord for DatabaseSortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.product
            .cmp(&other.product)
            .then_with(|| other.version.cmp(&self.version))
    }
}

impl PartialOrd for DatabaseSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort database paths into search order.
pub fn sort_database_paths(paths: &mut [PathBuf]) {
    paths.sort_by_cached_key(|p| DatabaseSortKey::from_path(p));
}

/// Provider metadata from a list of databases.
///
/// Every database sits behind one lock: queries never touch two files at
/// once.
pub struct DatabaseSource {
    databases: Mutex<Vec<ProviderDatabase>>,
    names: Vec<String>,
}

impl DatabaseSource {
    /// Open `paths` in search order. Any database in an older format makes
    /// the whole source fail with [`EventResolverError::ObsoleteDatabase`].
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let mut ordered = paths.to_vec();
        sort_database_paths(&mut ordered);

        for path in &ordered {
            let (needs_v2, needs_v3) = needs_upgrade(path)?;
            if needs_v2 || needs_v3 {
                tracing::error!("Refusing obsolete provider database {}", path.display());
                return Err(EventResolverError::ObsoleteDatabase {
                    path: path.clone(),
                    needs_v2,
                    needs_v3,
                });
            }
        }

        let databases = ordered
            .iter()
            .map(|p| ProviderDatabase::open(p))
            .collect::<Result<Vec<_>>>()?;
        let names = databases.iter().map(ProviderDatabase::name).collect();
        tracing::info!("Opened provider databases in order: {names:?}");
        Ok(Self {
            databases: Mutex::new(databases),
            names,
        })
    }

    /// Database names in search order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl MetadataSource for DatabaseSource {
    fn load(&self, provider_name: &str) -> Result<ProviderDetails> {
        let databases = self.databases.lock();
        for db in databases.iter() {
            if let Some(details) = db.query(provider_name)? {
                tracing::debug!("{provider_name} found in {}", db.name());
                return Ok(details);
            }
        }
        tracing::debug!("{provider_name} not in any provider database");
        Ok(ProviderDetails::empty(provider_name))
    }

    fn describe(&self) -> String {
        format!("databases [{}]", self.names.join(", "))
    }
}

/// Resolves records from provider databases only.
#[derive(Debug)]
pub struct DatabaseResolver {
    core: ResolverCore,
}

impl DatabaseResolver {
    pub fn open(paths: &[PathBuf], interner: Arc<StringInterner>) -> Result<Self> {
        let source = DatabaseSource::open(paths)?;
        Ok(Self {
            core: ResolverCore::new(Box::new(source), interner),
        })
    }

    pub fn core(&self) -> &ResolverCore {
        &self.core
    }
}

impl EventResolver for DatabaseResolver {
    fn resolve(&self, record: &NativeEventRecord, owning_log_name: &str) -> DisplayEventModel {
        self.core.resolve(record, owning_log_name)
    }

    fn take_diagnostics(&self) -> Vec<ResolutionDiagnostic> {
        self.core.take_diagnostics()
    }

    fn name(&self) -> &'static str {
        "database"
    }
}
