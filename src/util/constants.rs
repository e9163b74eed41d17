//! Application-wide constants for evtresolve.
//!
//! Centralising magic numbers and configuration defaults here keeps the rest
//! of the codebase clean and makes tuning straightforward.

/// Default number of event handles requested per `EvtNext` call.
pub const EVT_BATCH_SIZE: usize = 64;

/// Hard upper bound on the batch size. `EvtNext` becomes unstable when asked
/// for very large batches, so any configured value is clamped to this.
pub const MAX_EVT_BATCH_SIZE: usize = 512;

/// Timeout in milliseconds passed to `EvtNext`. A finite timeout lets the
/// reader check for cancellation between batches.
pub const EVT_NEXT_TIMEOUT_MS: u32 = 1000;

/// Buffer size (in `u16` units) for `EvtRender` XML output.
/// The buffer grows on demand for larger events and is reused across a batch.
pub const EVT_RENDER_BUFFER_SIZE: usize = 8_192;

/// Buffer size (in bytes) for `EvtRender` value rendering and metadata
/// property queries. Grows on demand.
pub const EVT_VALUE_BUFFER_SIZE: usize = 4_096;

/// Buffer size (in `u16` units) for `EvtFormatMessage` output.
pub const EVT_FORMAT_BUFFER_SIZE: usize = 2_048;

/// Maximum number of resolution diagnostics retained by a resolver.
pub const MAX_DIAGNOSTICS: usize = 200;

/// Description used when no event definition or legacy message matches.
pub const DESCRIPTION_NOT_FOUND: &str =
    "Failed to resolve description, see XML for more details.";

/// Description used when a template exists but cannot be formatted.
pub const DESCRIPTION_FORMAT_FAILED: &str = "Unable to format description";

/// Task name rendered for task 0 or a missing task.
pub const TASK_NONE: &str = "None";

/// Message-table resource type (`RT_MESSAGETABLE`).
pub const RT_MESSAGETABLE: u16 = 11;

/// Resource id of the message table inside a message file.
pub const MESSAGE_TABLE_RESOURCE_ID: u16 = 1;

/// Registry key under `HKLM` holding classic event log providers.
pub const EVENTLOG_REGISTRY_ROOT: &str = r"SYSTEM\CurrentControlSet\Services\EventLog";

/// Registry key holding the machine's `SystemRoot` value.
pub const WINDOWS_NT_CURRENT_VERSION: &str = r"SOFTWARE\Microsoft\Windows NT\CurrentVersion";

/// Name of the single table in a provider database.
pub const PROVIDER_TABLE: &str = "ProviderDetails";

/// File extension of provider database files.
pub const DATABASE_EXTENSION: &str = "db";

/// Application display name used in logs and the CLI.
pub const APP_NAME: &str = "evtresolve";

/// Application version string.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application data subdirectory name for logs and configuration.
pub const APP_DATA_DIR: &str = "evtresolve";

/// Log subdirectory name under the app data directory.
pub const LOG_DIR: &str = "logs";

/// Log file name for persistent error/debug logging.
pub const LOG_FILE_NAME: &str = "evtresolve.log";

/// Settings file name under the app data directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Maximum log file size in bytes before rotation (5 MB).
pub const MAX_LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;
