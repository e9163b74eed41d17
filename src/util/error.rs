//! Unified error types for evtresolve.
//!
//! All fallible operations throughout the codebase return `Result<T, EventResolverError>`.
//! Native error codes are interpreted in exactly one place,
//! [`classify_native_code`], which maps them onto the closed [`ErrorKind`]
//! taxonomy. No other module inspects raw numeric codes.

use std::path::PathBuf;

/// Closed classification of every failure the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing file, channel, provider or message id. Always recoverable.
    NotFound,
    /// Bad message-table structure, invalid event metadata, undecodable blob.
    MalformedData,
    /// Missing elevation or ACL denial. User-actionable.
    AccessDenied,
    /// A native handle was invalid or already closed.
    InvalidHandle,
    /// Cooperative cancellation. Not a failure.
    Cancelled,
    /// Database schema predates the current format.
    ObsoleteFormat,
    /// Everything else.
    Other,
}

/// Unified error type used throughout evtresolve.
#[derive(Debug, thiserror::Error)]
pub enum EventResolverError {
    /// A Windows API call failed with a code that is not one of the
    /// specifically classified kinds.
    #[error("Windows API error: {context} (HRESULT: 0x{hr:08X})")]
    WindowsApi {
        /// The raw HRESULT (or Win32) error code.
        hr: u32,
        /// Human-readable description of the operation that failed.
        context: String,
    },

    /// The requested object does not exist.
    #[error("Not found: {context} (code: 0x{hr:08X})")]
    NotFound { hr: u32, context: String },

    /// Access was denied; usually the process needs elevation.
    #[error("Access denied: {context}. Try running elevated.")]
    AccessDenied { hr: u32, context: String },

    /// A native handle was invalid.
    #[error("Invalid handle: {context}")]
    InvalidHandle { hr: u32, context: String },

    /// XML returned by `EvtRender` or a template could not be parsed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Binary or serialized data did not have the expected structure.
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// The operation was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,

    /// A provider database uses a schema that must be upgraded first.
    #[error("Obsolete provider database {path}: upgrade required (v2: {needs_v2}, v3: {needs_v3})")]
    ObsoleteDatabase {
        path: PathBuf,
        needs_v2: bool,
        needs_v3: bool,
    },

    /// SQLite reported an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialisation of a stored blob failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A compressed blob could not be decompressed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Catch-all for I/O errors (file writes, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EventResolverError {
    /// Map this error onto the closed taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WindowsApi { hr, .. } => classify_native_code(*hr),
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::InvalidHandle { .. } => ErrorKind::InvalidHandle,
            Self::XmlParse(_) | Self::MalformedData(_) | Self::Compression(_) => {
                ErrorKind::MalformedData
            }
            Self::Serialization(_) => ErrorKind::MalformedData,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ObsoleteDatabase { .. } => ErrorKind::ObsoleteFormat,
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::AccessDenied,
                _ => ErrorKind::Other,
            },
            Self::Database(_) => ErrorKind::Other,
        }
    }

    /// `true` for conditions that resolve to an empty/sentinel value.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EventResolverError>;

/// Win32 codes the engine distinguishes. Kept private: callers only ever see
/// the [`ErrorKind`] they map to.
mod codes {
    pub const ERROR_FILE_NOT_FOUND: u32 = 2;
    pub const ERROR_PATH_NOT_FOUND: u32 = 3;
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_HANDLE: u32 = 6;
    pub const ERROR_INVALID_DATA: u32 = 13;
    pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
    pub const ERROR_MOD_NOT_FOUND: u32 = 126;
    pub const ERROR_BAD_EXE_FORMAT: u32 = 193;
    pub const ERROR_NO_MORE_ITEMS: u32 = 259;
    pub const ERROR_MR_MID_NOT_FOUND: u32 = 317;
    pub const ERROR_OPERATION_ABORTED: u32 = 995;
    pub const ERROR_CANCELLED: u32 = 1223;
    pub const ERROR_TIMEOUT: u32 = 1460;
    pub const ERROR_RESOURCE_DATA_NOT_FOUND: u32 = 1812;
    pub const ERROR_RESOURCE_TYPE_NOT_FOUND: u32 = 1813;
    pub const ERROR_RESOURCE_NAME_NOT_FOUND: u32 = 1814;
    pub const ERROR_EVT_INVALID_QUERY: u32 = 15001;
    pub const ERROR_EVT_PUBLISHER_METADATA_NOT_FOUND: u32 = 15002;
    pub const ERROR_EVT_INVALID_EVENT_DATA: u32 = 15005;
    pub const ERROR_EVT_CHANNEL_NOT_FOUND: u32 = 15007;
    pub const ERROR_EVT_MALFORMED_XML_TEXT: u32 = 15008;
    pub const ERROR_EVT_MESSAGE_NOT_FOUND: u32 = 15027;
    pub const ERROR_EVT_MESSAGE_ID_NOT_FOUND: u32 = 15028;
    pub const ERROR_EVT_UNRESOLVED_VALUE_INSERT: u32 = 15029;
    pub const ERROR_EVT_MESSAGE_LOCALE_NOT_FOUND: u32 = 15033;
}

/// Strip the `HRESULT_FROM_WIN32` wrapper (`0x8007xxxx`) if present.
///
/// windows-rs surfaces every failure as an HRESULT, while `GetLastError`
/// and registry calls return plain Win32 codes. Both forms are accepted.
pub fn win32_code(hr: u32) -> u32 {
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}

/// Map a raw Win32 code or HRESULT onto the [`ErrorKind`] taxonomy.
pub fn classify_native_code(hr: u32) -> ErrorKind {
    use codes::*;
    match win32_code(hr) {
        ERROR_FILE_NOT_FOUND
        | ERROR_PATH_NOT_FOUND
        | ERROR_MOD_NOT_FOUND
        | ERROR_NO_MORE_ITEMS
        | ERROR_MR_MID_NOT_FOUND
        | ERROR_RESOURCE_DATA_NOT_FOUND
        | ERROR_RESOURCE_TYPE_NOT_FOUND
        | ERROR_RESOURCE_NAME_NOT_FOUND
        | ERROR_EVT_PUBLISHER_METADATA_NOT_FOUND
        | ERROR_EVT_CHANNEL_NOT_FOUND
        | ERROR_EVT_MESSAGE_NOT_FOUND
        | ERROR_EVT_MESSAGE_ID_NOT_FOUND
        | ERROR_EVT_MESSAGE_LOCALE_NOT_FOUND => ErrorKind::NotFound,
        ERROR_INVALID_DATA
        | ERROR_BAD_EXE_FORMAT
        | ERROR_EVT_INVALID_EVENT_DATA
        | ERROR_EVT_MALFORMED_XML_TEXT
        | ERROR_EVT_UNRESOLVED_VALUE_INSERT
        | ERROR_EVT_INVALID_QUERY => ErrorKind::MalformedData,
        ERROR_ACCESS_DENIED => ErrorKind::AccessDenied,
        ERROR_INVALID_HANDLE => ErrorKind::InvalidHandle,
        ERROR_OPERATION_ABORTED | ERROR_CANCELLED => ErrorKind::Cancelled,
        _ => ErrorKind::Other,
    }
}

/// `true` when the code means "the buffer was too small, retry bigger".
pub fn is_insufficient_buffer(hr: u32) -> bool {
    win32_code(hr) == codes::ERROR_INSUFFICIENT_BUFFER
}

/// `true` when the code marks the normal end of an enumeration or query.
pub fn is_end_of_items(hr: u32) -> bool {
    win32_code(hr) == codes::ERROR_NO_MORE_ITEMS
}

/// `true` when `EvtFormatMessage` formatted a message but left insertion
/// placeholders unresolved. The buffer still holds the raw template.
pub fn is_unresolved_insert(hr: u32) -> bool {
    win32_code(hr) == codes::ERROR_EVT_UNRESOLVED_VALUE_INSERT
}

/// `true` when `EvtNext` timed out without results.
pub fn is_timeout(hr: u32) -> bool {
    win32_code(hr) == codes::ERROR_TIMEOUT
}

/// Convert a raw Windows `HRESULT` (or `GetLastError` code) into the
/// matching [`EventResolverError`] variant with the given context string.
///
/// # Example
/// ```
/// use evtresolve::util::error::{windows_err, ErrorKind};
/// let err = windows_err(0x80070005, "EvtQuery on Security channel");
/// assert_eq!(err.kind(), ErrorKind::AccessDenied);
/// ```
pub fn windows_err(hr: u32, context: impl Into<String>) -> EventResolverError {
    let context = context.into();
    match classify_native_code(hr) {
        ErrorKind::NotFound => EventResolverError::NotFound { hr, context },
        ErrorKind::AccessDenied => EventResolverError::AccessDenied { hr, context },
        ErrorKind::InvalidHandle => EventResolverError::InvalidHandle { hr, context },
        ErrorKind::Cancelled => EventResolverError::Cancelled,
        _ => EventResolverError::WindowsApi { hr, context },
    }
}
