//! Legacy message-table parsing.
//!
//! A message table is a `RT_MESSAGETABLE` resource embedded in a provider's
//! message file. Layout (all little-endian):
//!
//! ```text
//! u32 block_count
//! block_count x { u32 low_id, u32 high_id, u32 offset_to_entries }
//! at each offset, (high_id - low_id + 1) x {
//!     u16 length      // whole entry, header included
//!     u16 flags       // 0 = ANSI, 1 = UTF-16LE, 2 = ANSI (mis-declared)
//!     u8  text[length - 4]
//! }
//! ```
//!
//! Decoding is platform neutral and works on the raw resource bytes;
//! [`load_message_table`] maps the file as a data-only image on Windows and
//! feeds the resource to [`decode_message_table`].

use tracing::{debug, trace, warn};

use crate::core::provider_details::MessageEntry;
use crate::util::binary_cursor::{decode_ansi, decode_utf16le, BinaryCursor};
use crate::util::error::{EventResolverError, Result};

const ENTRY_HEADER_LEN: usize = 4;
const FLAG_UNICODE: u16 = 1;

/// Decode a message-table resource into entries for `provider_name`.
///
/// A structurally broken block stops decoding of that block only; entries
/// already decoded from earlier blocks are kept. An unreadable header is an
/// error.
pub fn decode_message_table(data: &[u8], provider_name: &str) -> Result<Vec<MessageEntry>> {
    let mut cursor = BinaryCursor::new(data);
    let block_count = cursor.read_u32()? as usize;

    // Each block descriptor is 12 bytes; reject counts the buffer can't hold.
    if block_count.saturating_mul(12) > cursor.remaining() {
        return Err(EventResolverError::MalformedData(format!(
            "message table declares {block_count} blocks in {} bytes",
            data.len()
        )));
    }

    let mut blocks = Vec::with_capacity(block_count);
    for _ in 0..block_count {
        let low = cursor.read_u32()?;
        let high = cursor.read_u32()?;
        let offset = cursor.read_u32()? as usize;
        blocks.push((low, high, offset));
    }

    let mut entries = Vec::new();
    for (low, high, offset) in blocks {
        if let Err(e) = decode_block(data, low, high, offset, provider_name, &mut entries) {
            warn!("{provider_name}: message block 0x{low:08X}-0x{high:08X}: {e}");
        }
    }
    trace!("{provider_name}: decoded {} message entries", entries.len());
    Ok(entries)
}

fn decode_block(
    data: &[u8],
    low: u32,
    high: u32,
    offset: usize,
    provider_name: &str,
    entries: &mut Vec<MessageEntry>,
) -> Result<()> {
    if high < low {
        return Err(EventResolverError::MalformedData(format!(
            "inverted id range at offset {offset}"
        )));
    }

    let mut cursor = BinaryCursor::new(data);
    cursor.seek(offset)?;

    let mut id = low;
    loop {
        let length = cursor.read_u16()? as usize;
        let flags = cursor.read_u16()?;
        if length < ENTRY_HEADER_LEN {
            return Err(EventResolverError::MalformedData(format!(
                "entry 0x{id:08X} has length {length}"
            )));
        }
        let body = cursor.read_bytes(length - ENTRY_HEADER_LEN)?;
        let text = if flags == FLAG_UNICODE {
            decode_utf16le(body)
        } else {
            decode_ansi(body)
        };
        entries.push(MessageEntry::new(id, text, provider_name));

        if id == high {
            return Ok(());
        }
        id += 1;
    }
}

/// Load the message table of `file_path`.
///
/// A file without a message-table resource yields an empty list; that is
/// normal for many providers.
#[cfg(windows)]
pub fn load_message_table(file_path: &str, provider_name: &str) -> Result<Vec<MessageEntry>> {
    let module = native::DataFileModule::load(file_path)?;
    match module.message_table()? {
        Some(bytes) => decode_message_table(bytes, provider_name),
        None => {
            debug!("{provider_name}: no message table in '{file_path}'");
            Ok(Vec::new())
        }
    }
}

/// Load the message tables of several files, logging and skipping files that
/// fail. Entries keep file order.
#[cfg(windows)]
pub fn load_message_files(files: &[String], provider_name: &str) -> Vec<MessageEntry> {
    load_each(files, provider_name, load_message_table)
}

/// Shared loop for [`load_message_files`]: one failing file never stops the
/// others.
pub fn load_each<F>(files: &[String], provider_name: &str, mut load: F) -> Vec<MessageEntry>
where
    F: FnMut(&str, &str) -> Result<Vec<MessageEntry>>,
{
    let mut all = Vec::new();
    for file in files {
        match load(file, provider_name) {
            Ok(entries) => {
                debug!(
                    "{provider_name}: {} entries from '{file}'",
                    entries.len()
                );
                all.extend(entries);
            }
            Err(e) if e.is_not_found() => {
                debug!("{provider_name}: message file '{file}' not found");
            }
            Err(e) => {
                warn!("{provider_name}: failed to load message file '{file}': {e}");
            }
        }
    }
    all
}

#[cfg(windows)]
mod native {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{FreeLibrary, HANDLE, HMODULE};
    use windows::Win32::System::LibraryLoader::{
        FindResourceW, LoadLibraryExW, LoadResource, LockResource, SizeofResource,
        LOAD_LIBRARY_AS_DATAFILE, LOAD_LIBRARY_AS_IMAGE_RESOURCE,
    };

    use crate::util::constants::{MESSAGE_TABLE_RESOURCE_ID, RT_MESSAGETABLE};
    use crate::util::error::{windows_err, Result};

    /// A file mapped as a data-only image. Freed on drop, on every path.
    pub struct DataFileModule {
        module: HMODULE,
        path: String,
    }

    impl DataFileModule {
        pub fn load(path: &str) -> Result<Self> {
            let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
            // SAFETY: `wide` is NUL-terminated. Datafile mode maps the image
            // without running code or resolving imports.
            let module = unsafe {
                LoadLibraryExW(
                    PCWSTR(wide.as_ptr()),
                    HANDLE::default(),
                    LOAD_LIBRARY_AS_DATAFILE | LOAD_LIBRARY_AS_IMAGE_RESOURCE,
                )
            }
            .map_err(|e| windows_err(e.code().0 as u32, format!("LoadLibraryExW '{path}'")))?;
            Ok(Self {
                module,
                path: path.to_string(),
            })
        }

        /// The raw message-table resource, or `None` when the file has none.
        /// The slice lives as long as the mapping.
        pub fn message_table(&self) -> Result<Option<&[u8]>> {
            // SAFETY: MAKEINTRESOURCE-style integer ids are valid PCWSTR
            // arguments to FindResourceW; the module handle is live.
            unsafe {
                let resource = FindResourceW(
                    self.module,
                    PCWSTR(usize::from(MESSAGE_TABLE_RESOURCE_ID) as *const u16),
                    PCWSTR(usize::from(RT_MESSAGETABLE) as *const u16),
                );
                if resource.is_invalid() {
                    return Ok(None);
                }
                let size = SizeofResource(self.module, resource) as usize;
                let global = LoadResource(self.module, resource).map_err(|e| {
                    windows_err(e.code().0 as u32, format!("LoadResource '{}'", self.path))
                })?;
                let ptr = LockResource(global) as *const u8;
                if ptr.is_null() || size == 0 {
                    return Ok(None);
                }
                // SAFETY: LockResource returns a pointer to `size` bytes that
                // stay mapped until FreeLibrary runs in Drop.
                Ok(Some(std::slice::from_raw_parts(ptr, size)))
            }
        }
    }

    impl Drop for DataFileModule {
        fn drop(&mut self) {
            // SAFETY: the module was loaded by LoadLibraryExW and is freed once.
            unsafe {
                let _ = FreeLibrary(self.module);
            }
        }
    }
}
