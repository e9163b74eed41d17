//! Legacy (registry-registered) provider metadata.
//!
//! Classic providers register in the local or a remote `HKLM` under
//! `HKLM\SYSTEM\CurrentControlSet\Services\EventLog\<log>\<provider>` with
//! semicolon-separated `EventMessageFile`, `CategoryMessageFile` and
//! `ParameterMessageFile` values. Paths usually contain `%SystemRoot%`, which
//! for a remote computer is read from its registry; the result is translated
//! to the admin share
//! (`C:\Windows\x.dll` -> `\\HOST\C$\Windows\x.dll`).

use tracing::debug;

use crate::core::message_table::load_each;
use crate::core::provider_details::MessageEntry;
use crate::util::error::Result;

/// Where one provider is registered and which files it declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyRegistration {
    pub log_name: String,
    pub event_message_files: Vec<String>,
    pub category_message_files: Vec<String>,
    pub parameter_message_files: Vec<String>,
}

/// Turns registry file values into paths readable from this machine.
#[derive(Debug, Clone)]
pub struct LegacyFileLocator {
    computer: Option<String>,
    system_root: String,
}

impl LegacyFileLocator {
    /// Paths on the local machine. `%SystemRoot%` comes from the environment.
    pub fn local() -> Self {
        Self {
            computer: None,
            system_root: std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".into()),
        }
    }

    /// Paths on `computer`, reached through its admin shares.
    pub fn remote(computer: impl Into<String>, system_root: impl Into<String>) -> Self {
        Self {
            computer: Some(computer.into()),
            system_root: system_root.into(),
        }
    }

    /// Expand variables and, for a remote machine, translate to a UNC path.
    pub fn resolve(&self, raw: &str) -> String {
        let expanded = expand_env_vars(raw, |name| {
            if name.eq_ignore_ascii_case("SystemRoot") || name.eq_ignore_ascii_case("windir") {
                Some(self.system_root.clone())
            } else if self.computer.is_some() {
                None
            } else {
                std::env::var(name).ok()
            }
        });
        match &self.computer {
            Some(host) => to_admin_share_path(&expanded, host).unwrap_or(expanded),
            None => expanded,
        }
    }
}

/// Split a registry file list on `;`, dropping blanks and case-insensitive
/// duplicates while keeping order.
pub fn split_message_files(value: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for part in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        if !files.iter().any(|f| f.eq_ignore_ascii_case(part)) {
            files.push(part.to_string());
        }
    }
    files
}

/// Expand `%NAME%` references with `lookup`. Unknown names and a lone `%`
/// are left as written.
pub fn expand_env_vars(path: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `C:\dir\file` -> `\\host\C$\dir\file`. `None` for paths without a drive
/// letter (already UNC or relative).
pub fn to_admin_share_path(path: &str, host: &str) -> Option<String> {
    let mut chars = path.chars();
    let drive = chars.next().filter(char::is_ascii_alphabetic)?;
    if chars.next() != Some(':') {
        return None;
    }
    let tail = &path[2..];
    let tail = tail.strip_prefix('\\').unwrap_or(tail);
    Some(format!(r"\\{host}\{}$\{tail}", drive.to_ascii_uppercase()))
}

/// Build the legacy `(messages, parameters)` of a provider from its
/// registrations, loading each file through `load`.
///
/// Category-file entries come first and carry the log they were registered
/// under; message files shared by several logs are read once. A file that
/// fails to load is logged and skipped.
pub fn assemble_legacy_messages<F>(
    provider_name: &str,
    registrations: &[LegacyRegistration],
    locator: &LegacyFileLocator,
    mut load: F,
) -> (Vec<MessageEntry>, Vec<MessageEntry>)
where
    F: FnMut(&str, &str) -> Result<Vec<MessageEntry>>,
{
    let mut messages = Vec::new();

    for reg in registrations {
        let files: Vec<String> = reg
            .category_message_files
            .iter()
            .map(|f| locator.resolve(f))
            .collect();
        let categories = load_each(&files, provider_name, &mut load);
        messages.extend(
            categories
                .into_iter()
                .map(|m| m.with_log_link(reg.log_name.clone())),
        );
    }

    let message_files = unique_resolved(
        registrations.iter().flat_map(|r| &r.event_message_files),
        locator,
    );
    messages.extend(load_each(&message_files, provider_name, &mut load));

    let parameter_files = unique_resolved(
        registrations.iter().flat_map(|r| &r.parameter_message_files),
        locator,
    );
    let parameters = load_each(&parameter_files, provider_name, &mut load);

    debug!(
        "{provider_name}: {} legacy messages, {} parameters from {} registrations",
        messages.len(),
        parameters.len(),
        registrations.len()
    );
    (messages, parameters)
}

fn unique_resolved<'a>(
    files: impl Iterator<Item = &'a String>,
    locator: &LegacyFileLocator,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for file in files.map(|f| locator.resolve(f)) {
        if !out.iter().any(|f| f.eq_ignore_ascii_case(&file)) {
            out.push(file);
        }
    }
    out
}

#[cfg(windows)]
const SYSTEM_ROOT_VALUE: &str = "SystemRoot";

/// `HKEY_LOCAL_MACHINE` of this machine or of a remote computer.
///
/// The raw handle is kept rather than a `winreg::RegKey` so the hive can be
/// shared across threads; each read wraps it without taking ownership.
#[cfg(windows)]
#[derive(Debug)]
pub struct RegistryHive {
    raw: usize,
    computer: Option<String>,
}

#[cfg(windows)]
impl RegistryHive {
    pub fn local() -> Self {
        Self {
            raw: winreg::enums::HKEY_LOCAL_MACHINE as usize,
            computer: None,
        }
    }

    /// Connect to the remote registry service of `computer`.
    pub fn connect(computer: &str) -> Result<Self> {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::ERROR_SUCCESS;
        use windows::Win32::System::Registry::{RegConnectRegistryW, HKEY, HKEY_LOCAL_MACHINE};

        use crate::core::evt_native::to_wide;
        use crate::util::error::windows_err;

        let machine = to_wide(&format!(r"\\{}", computer.trim_start_matches('\\')));
        let mut hive = HKEY::default();
        // SAFETY: `machine` is NUL-terminated and outlives the call.
        let status =
            unsafe { RegConnectRegistryW(PCWSTR(machine.as_ptr()), HKEY_LOCAL_MACHINE, &mut hive) };
        if status != ERROR_SUCCESS {
            return Err(windows_err(
                status.0,
                format!("RegConnectRegistryW to '{computer}'"),
            ));
        }
        debug!("Connected to the registry of {computer}");
        Ok(Self {
            raw: hive.0 as usize,
            computer: Some(computer.to_string()),
        })
    }

    pub fn computer(&self) -> Option<&str> {
        self.computer.as_deref()
    }

    fn root(&self) -> std::mem::ManuallyDrop<winreg::RegKey> {
        std::mem::ManuallyDrop::new(winreg::RegKey::predef(self.raw as _))
    }

    /// `%SystemRoot%` as configured on the hive's machine.
    pub fn system_root(&self) -> Option<String> {
        use crate::util::constants::WINDOWS_NT_CURRENT_VERSION;

        self.root()
            .open_subkey(WINDOWS_NT_CURRENT_VERSION)
            .and_then(|k| k.get_value::<String, _>(SYSTEM_ROOT_VALUE))
            .ok()
            .filter(|root| !root.trim().is_empty())
    }

    /// A locator for message files registered in this hive. A remote machine
    /// whose system root cannot be read is assumed to use `C:\Windows`.
    pub fn file_locator(&self) -> LegacyFileLocator {
        match &self.computer {
            None => LegacyFileLocator::local(),
            Some(host) => {
                let root = self.system_root().unwrap_or_else(|| {
                    tracing::warn!("Cannot read SystemRoot of {host}, assuming C:\\Windows");
                    r"C:\Windows".to_string()
                });
                LegacyFileLocator::remote(host.clone(), root)
            }
        }
    }

    /// Every log `provider_name` is registered under.
    pub fn find_registrations(&self, provider_name: &str) -> Vec<LegacyRegistration> {
        use crate::util::constants::EVENTLOG_REGISTRY_ROOT;

        let root = match self.root().open_subkey(EVENTLOG_REGISTRY_ROOT) {
            Ok(k) => k,
            Err(e) => {
                debug!("Cannot open event log registry root: {e}");
                return Vec::new();
            }
        };

        let mut registrations = Vec::new();
        for log_name in root.enum_keys().filter_map(|k| k.ok()) {
            let Ok(provider_key) = root.open_subkey(format!(r"{log_name}\{provider_name}")) else {
                continue;
            };
            let read = |value: &str| {
                provider_key
                    .get_value::<String, _>(value)
                    .map(|v| split_message_files(&v))
                    .unwrap_or_default()
            };
            registrations.push(LegacyRegistration {
                event_message_files: read("EventMessageFile"),
                category_message_files: read("CategoryMessageFile"),
                parameter_message_files: read("ParameterMessageFile"),
                log_name,
            });
        }
        registrations
    }
}

#[cfg(windows)]
impl Drop for RegistryHive {
    fn drop(&mut self) {
        if self.computer.is_some() {
            use windows::Win32::System::Registry::{RegCloseKey, HKEY};
            // SAFETY: the handle came from RegConnectRegistryW and is closed once.
            unsafe {
                let _ = RegCloseKey(HKEY(self.raw as _));
            }
        }
    }
}

/// Load the legacy messages and parameters `hive` registers for
/// `provider_name`.
#[cfg(windows)]
pub fn load_legacy_messages(
    hive: &RegistryHive,
    provider_name: &str,
    locator: &LegacyFileLocator,
) -> (Vec<MessageEntry>, Vec<MessageEntry>) {
    let registrations = hive.find_registrations(provider_name);
    if registrations.is_empty() {
        return (Vec::new(), Vec::new());
    }
    assemble_legacy_messages(
        provider_name,
        &registrations,
        locator,
        crate::core::message_table::load_message_table,
    )
}
