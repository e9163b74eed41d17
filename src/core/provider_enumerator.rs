//! Locally registered provider names.
//!
//! [`enumerate_providers`] walks the publisher list with `EvtOpenPublisherEnum`
//! and `EvtNextPublisherId`. [`ProviderNameCache`] keeps a snapshot of that
//! list for the local strategy. The set of installed providers changes at
//! runtime (installers, role changes), so the snapshot is owned by whoever
//! builds the resolver and is refreshed explicitly with
//! [`ProviderNameCache::refresh`].

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::util::error::Result;

type NameSource = Box<dyn Fn() -> Result<Vec<String>> + Send + Sync>;

/// Case-insensitive set of provider names with an explicit refresh.
pub struct ProviderNameCache {
    /// lowercase name -> name as reported by the system.
    names: RwLock<BTreeMap<String, String>>,
    source: Option<NameSource>,
}

impl std::fmt::Debug for ProviderNameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderNameCache")
            .field("len", &self.len())
            .field("refreshable", &self.source.is_some())
            .finish()
    }
}

impl ProviderNameCache {
    /// A cache filled from `source` now and on every [`refresh`](Self::refresh).
    pub fn new(source: impl Fn() -> Result<Vec<String>> + Send + Sync + 'static) -> Result<Self> {
        let cache = Self {
            names: RwLock::new(BTreeMap::new()),
            source: Some(Box::new(source)),
        };
        cache.refresh()?;
        Ok(cache)
    }

    /// A fixed set of names. `refresh` is a no-op.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cache = Self {
            names: RwLock::new(BTreeMap::new()),
            source: None,
        };
        cache.replace(names.into_iter().map(Into::into));
        cache
    }

    /// The providers registered on the local machine.
    #[cfg(windows)]
    pub fn local() -> Result<Self> {
        Self::new(enumerate_providers)
    }

    /// Re-read the name list. Returns the new count. On failure the previous
    /// snapshot is kept.
    pub fn refresh(&self) -> Result<usize> {
        let Some(source) = &self.source else {
            return Ok(self.len());
        };
        let names = source()?;
        self.replace(names);
        let count = self.len();
        tracing::debug!("Provider name cache refreshed: {count} providers");
        Ok(count)
    }

    fn replace(&self, names: impl IntoIterator<Item = String>) {
        let map = names
            .into_iter()
            .map(|n| (n.to_lowercase(), n))
            .collect::<BTreeMap<_, _>>();
        *self.names.write() = map;
    }

    pub fn contains(&self, provider_name: &str) -> bool {
        self.names.read().contains_key(&provider_name.to_lowercase())
    }

    /// All names, sorted case-insensitively.
    pub fn names(&self) -> Vec<String> {
        self.names.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

/// Enumerate all publishers registered on the local system, sorted
/// case-insensitively.
#[cfg(windows)]
pub fn enumerate_providers() -> Result<Vec<String>> {
    use windows::Win32::System::EventLog::{EvtNextPublisherId, EvtOpenPublisherEnum};

    use crate::core::evt_native::{wide_to_string, EvtHandle};
    use crate::util::error::{is_end_of_items, is_insufficient_buffer, windows_err};

    // SAFETY: a null session enumerates the local machine.
    let raw = unsafe { EvtOpenPublisherEnum(None, 0) }
        .map_err(|e| windows_err(e.code().0 as u32, "EvtOpenPublisherEnum"))?;
    let Some(handle) = EvtHandle::new(raw) else {
        return Ok(Vec::new());
    };

    let mut providers = Vec::with_capacity(1024);
    let mut buffer = vec![0u16; 512];
    let mut used = 0u32;

    loop {
        // SAFETY: live enumeration handle; the slice carries its length.
        let result =
            unsafe { EvtNextPublisherId(handle.raw(), Some(buffer.as_mut_slice()), &mut used) };
        match result {
            Ok(()) => {
                let name = wide_to_string(&buffer);
                if !name.is_empty() {
                    providers.push(name);
                }
            }
            Err(e) => {
                let code = e.code().0 as u32;
                if is_end_of_items(code) {
                    break;
                }
                if is_insufficient_buffer(code) {
                    buffer.resize(used as usize + 64, 0);
                    continue;
                }
                tracing::warn!("EvtNextPublisherId returned unexpected error: {e}");
                break;
            }
        }
    }

    providers.sort_unstable_by_key(|a| a.to_lowercase());
    tracing::info!("Enumerated {} event providers", providers.len());
    Ok(providers)
}
