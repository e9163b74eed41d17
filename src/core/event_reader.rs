//! Native event log reader.
//!
//! Opens a channel or `.evtx` file with `EvtQuery`, pulls handles in batches
//! with `EvtNext` and renders each one into a [`NativeEventRecord`] from the
//! system and user render contexts. A record that fails to render becomes an
//! error marker and the batch continues. Every batch carries a bookmark for
//! the last successfully rendered record.
//!
//! One [`EventLogSession`] must not be read from several threads at once;
//! batch reads and bookmark creation are serialized by an internal mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use windows::core::PCWSTR;
use windows::Win32::System::EventLog::*;

use crate::core::event_record::{Bookmark, NativeEventRecord, PropertyValue};
use crate::core::evt_native::{
    to_wide, variant_string, variant_to_property, variant_u64, wide_to_string, EvtHandle,
    VariantBuffer,
};
use crate::core::xml_parser::parse_event_xml;
use crate::util::constants::*;
use crate::util::settings::ResolverSettings;
use crate::util::error::{
    is_end_of_items, is_insufficient_buffer, is_timeout, windows_err, ErrorKind,
    EventResolverError, Result,
};

/// What the `path` passed to [`query`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    /// A channel such as `Application` or `Microsoft-Windows-Sysmon/Operational`.
    LogName,
    /// An exported `.evtx` file.
    FilePath,
}

/// Reader tuning.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Handles requested per `EvtNext`. Clamped to `1..=MAX_EVT_BATCH_SIZE`.
    pub batch_size: usize,
    /// Keep the native XML rendering on every record.
    pub render_xml: bool,
    /// Newest first.
    pub reverse: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            batch_size: EVT_BATCH_SIZE,
            render_xml: false,
            reverse: false,
        }
    }
}

impl From<&ResolverSettings> for ReaderOptions {
    fn from(settings: &ResolverSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            render_xml: settings.render_xml,
            reverse: false,
        }
    }
}

impl ReaderOptions {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_EVT_BATCH_SIZE)
    }
}

/// One batch of records and the resume point after it.
#[derive(Debug, Default)]
pub struct EventBatch {
    pub records: Vec<NativeEventRecord>,
    /// Bookmark of the last successfully rendered record in this batch.
    pub bookmark: Option<Bookmark>,
    /// `true` once the query has no more records.
    pub finished: bool,
}

// Indices of the EvtRenderContextSystem value array.
const SYS_PROVIDER_NAME: usize = 0;
const SYS_EVENT_ID: usize = 2;
const SYS_QUALIFIERS: usize = 3;
const SYS_LEVEL: usize = 4;
const SYS_TASK: usize = 5;
const SYS_OPCODE: usize = 6;
const SYS_KEYWORDS: usize = 7;
const SYS_TIME_CREATED: usize = 8;
const SYS_RECORD_ID: usize = 9;
const SYS_ACTIVITY_ID: usize = 10;
const SYS_PROCESS_ID: usize = 12;
const SYS_THREAD_ID: usize = 13;
const SYS_CHANNEL: usize = 14;
const SYS_COMPUTER: usize = 15;
const SYS_USER_ID: usize = 16;
const SYS_VERSION: usize = 17;

/// Renders event handles into records. Owns the render contexts and scratch
/// buffers, so one renderer serves one thread at a time.
pub struct EventRenderer {
    system_ctx: EvtHandle,
    user_ctx: EvtHandle,
    system_values: VariantBuffer,
    user_values: VariantBuffer,
    xml: Vec<u16>,
    render_xml: bool,
}

impl EventRenderer {
    pub fn new(render_xml: bool) -> Result<Self> {
        Ok(Self {
            system_ctx: create_context(EvtRenderContextSystem.0 as u32)?,
            user_ctx: create_context(EvtRenderContextUser.0 as u32)?,
            system_values: VariantBuffer::with_bytes(EVT_VALUE_BUFFER_SIZE),
            user_values: VariantBuffer::with_bytes(EVT_VALUE_BUFFER_SIZE),
            xml: vec![0; EVT_RENDER_BUFFER_SIZE],
            render_xml,
        })
    }

    /// Render one event. `log_name` is used when the record carries no
    /// channel of its own.
    ///
    /// Falls back to parsing the XML rendering when the value arrays cannot
    /// be rendered (malformed payloads, unknown variant layouts).
    pub fn render(&mut self, event: EVT_HANDLE, log_name: &str) -> Result<NativeEventRecord> {
        match self.render_from_values(event, log_name) {
            Ok(record) => Ok(record),
            Err(e) if matches!(e.kind(), ErrorKind::MalformedData | ErrorKind::Other) => {
                tracing::debug!("Value rendering failed ({e}), parsing the XML rendering");
                let xml = render_event_xml(event, &mut self.xml)?;
                let mut record = parse_event_xml(&xml, log_name)?;
                if !self.render_xml {
                    record.xml = None;
                }
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    fn render_from_values(
        &mut self,
        event: EVT_HANDLE,
        log_name: &str,
    ) -> Result<NativeEventRecord> {
        let system_count = render_values(&self.system_ctx, event, &mut self.system_values)?;
        if system_count <= SYS_VERSION as u32 {
            return Err(EventResolverError::MalformedData(format!(
                "system render returned {system_count} values"
            )));
        }
        let user_count = render_values(&self.user_ctx, event, &mut self.user_values)?;

        // SAFETY: indices are below the counts the render calls reported.
        let record = unsafe {
            let sys = |i: usize| self.system_values.variant_at(i);
            let channel = variant_string(sys(SYS_CHANNEL)).unwrap_or_default();
            NativeEventRecord {
                provider_name: variant_string(sys(SYS_PROVIDER_NAME)).unwrap_or_default(),
                id: variant_u64(sys(SYS_EVENT_ID)).unwrap_or(0) as u32,
                qualifiers: variant_u64(sys(SYS_QUALIFIERS)).map(|v| v as u16),
                version: variant_u64(sys(SYS_VERSION)).map(|v| v as u8),
                task: variant_u64(sys(SYS_TASK)).map(|v| v as u16),
                opcode: variant_u64(sys(SYS_OPCODE)).map(|v| v as u8),
                keywords: variant_u64(sys(SYS_KEYWORDS)).unwrap_or(0),
                level: variant_u64(sys(SYS_LEVEL)).map(|v| v as u8),
                time_created: match variant_to_property(sys(SYS_TIME_CREATED)) {
                    PropertyValue::Time(t) => t,
                    _ => Default::default(),
                },
                record_id: variant_u64(sys(SYS_RECORD_ID)),
                process_id: variant_u64(sys(SYS_PROCESS_ID)).map(|v| v as u32),
                thread_id: variant_u64(sys(SYS_THREAD_ID)).map(|v| v as u32),
                activity_id: non_null(variant_to_property(sys(SYS_ACTIVITY_ID))),
                user_id: non_null(variant_to_property(sys(SYS_USER_ID))),
                computer_name: variant_string(sys(SYS_COMPUTER)).unwrap_or_default(),
                log_name: if channel.is_empty() {
                    log_name.to_string()
                } else {
                    channel
                },
                properties: (0..user_count as usize)
                    .map(|i| variant_to_property(self.user_values.variant_at(i)))
                    .collect(),
                xml: None,
                bookmark: None,
                error: None,
            }
        };

        let xml = if self.render_xml {
            Some(render_event_xml(event, &mut self.xml)?)
        } else {
            None
        };
        Ok(NativeEventRecord { xml, ..record })
    }
}

fn non_null(value: PropertyValue) -> Option<String> {
    match value {
        PropertyValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn create_context(flags: u32) -> Result<EvtHandle> {
    // SAFETY: no value paths; the flag selects the system or user context.
    let raw = unsafe { EvtCreateRenderContext(None, flags) }
        .map_err(|e| windows_err(e.code().0 as u32, "EvtCreateRenderContext"))?;
    EvtHandle::new(raw).ok_or_else(|| windows_err(6, "EvtCreateRenderContext returned null"))
}

/// Render the values of `context` into `buffer`, growing it when needed.
/// Returns the value count.
fn render_values(
    context: &EvtHandle,
    event: EVT_HANDLE,
    buffer: &mut VariantBuffer,
) -> Result<u32> {
    for _ in 0..2 {
        let (ptr, size) = buffer.raw_parts();
        let mut used = 0u32;
        let mut count = 0u32;
        // SAFETY: `ptr` is an aligned, writable buffer of `size` bytes.
        let result = unsafe {
            EvtRender(
                context.raw(),
                event,
                EvtRenderEventValues.0 as u32,
                size,
                Some(ptr as *mut _),
                &mut used,
                &mut count,
            )
        };
        match result {
            Ok(()) => return Ok(count),
            Err(e) if is_insufficient_buffer(e.code().0 as u32) => buffer.grow_to(used),
            Err(e) => return Err(windows_err(e.code().0 as u32, "EvtRender values")),
        }
    }
    Err(EventResolverError::MalformedData(
        "EvtRender values kept asking for a larger buffer".into(),
    ))
}

/// Render an event handle to its XML form with `EvtRender`.
pub fn render_event_xml(event: EVT_HANDLE, buffer: &mut Vec<u16>) -> Result<String> {
    render_text(event, EvtRenderEventXml.0 as u32, buffer, "EvtRender XML")
}

/// Render a bookmark or event handle as text.
fn render_text(
    handle: EVT_HANDLE,
    flags: u32,
    buffer: &mut Vec<u16>,
    context: &str,
) -> Result<String> {
    for _ in 0..2 {
        let mut used = 0u32;
        let mut count = 0u32;
        // SAFETY: `buffer` holds `len * 2` writable bytes.
        let result = unsafe {
            EvtRender(
                None,
                handle,
                flags,
                (buffer.len() * 2) as u32,
                Some(buffer.as_mut_ptr() as *mut _),
                &mut used,
                &mut count,
            )
        };
        match result {
            Ok(()) => {
                let used_u16 = (used as usize / 2).min(buffer.len());
                return Ok(wide_to_string(&buffer[..used_u16]));
            }
            Err(e) if is_insufficient_buffer(e.code().0 as u32) => {
                buffer.resize(used as usize / 2 + 1, 0);
            }
            Err(e) => return Err(windows_err(e.code().0 as u32, context)),
        }
    }
    Err(EventResolverError::MalformedData(format!(
        "{context} kept asking for a larger buffer"
    )))
}

/// Create a bookmark positioned at `event` and serialize it.
pub fn bookmark_for(event: EVT_HANDLE, buffer: &mut Vec<u16>) -> Result<Bookmark> {
    // SAFETY: a null XML argument creates an empty bookmark.
    let raw = unsafe { EvtCreateBookmark(PCWSTR::null()) }
        .map_err(|e| windows_err(e.code().0 as u32, "EvtCreateBookmark"))?;
    let bookmark = EvtHandle::new(raw).ok_or_else(|| windows_err(6, "EvtCreateBookmark"))?;
    // SAFETY: both handles are live.
    unsafe { EvtUpdateBookmark(bookmark.raw(), event) }
        .map_err(|e| windows_err(e.code().0 as u32, "EvtUpdateBookmark"))?;
    render_text(
        bookmark.raw(),
        EvtRenderBookmark.0 as u32,
        buffer,
        "EvtRender bookmark",
    )
    .map(Bookmark::from_xml)
}

/// Open a bookmark handle from its serialized form.
pub fn open_bookmark(bookmark: &Bookmark) -> Result<EvtHandle> {
    let wide = to_wide(bookmark.as_xml());
    // SAFETY: `wide` is NUL-terminated bookmark XML.
    let raw = unsafe { EvtCreateBookmark(PCWSTR(wide.as_ptr())) }
        .map_err(|e| windows_err(e.code().0 as u32, "EvtCreateBookmark from XML"))?;
    EvtHandle::new(raw).ok_or_else(|| windows_err(6, "EvtCreateBookmark from XML"))
}

struct SessionState {
    query: EvtHandle,
    renderer: EventRenderer,
    handles: Vec<isize>,
    bookmark_buf: Vec<u16>,
    finished: bool,
}

/// An open query over one log or file.
pub struct EventLogSession {
    path: String,
    log_name: String,
    options: ReaderOptions,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for EventLogSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogSession")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

/// Open `path` for reading from the start (or the end, when reversed).
pub fn query(path: &str, path_type: PathType, options: ReaderOptions) -> Result<EventLogSession> {
    open_session(path, path_type, None, options)
}

/// Open `path` positioned just after `bookmark`.
pub fn query_after(
    path: &str,
    path_type: PathType,
    bookmark: &Bookmark,
    options: ReaderOptions,
) -> Result<EventLogSession> {
    open_session(path, path_type, Some(bookmark), options)
}

fn open_session(
    path: &str,
    path_type: PathType,
    bookmark: Option<&Bookmark>,
    options: ReaderOptions,
) -> Result<EventLogSession> {
    let mut flags = match path_type {
        PathType::LogName => EvtQueryChannelPath.0 as u32,
        PathType::FilePath => EvtQueryFilePath.0 as u32,
    };
    if options.reverse {
        flags |= EvtQueryReverseDirection.0 as u32;
    } else {
        flags |= EvtQueryForwardDirection.0 as u32;
    }

    let path_wide = to_wide(path);
    let xpath_wide = to_wide("*");
    tracing::debug!("Querying '{}' ({:?})", path, path_type);

    // SAFETY: NUL-terminated strings; null session is the local machine.
    let raw = unsafe {
        EvtQuery(
            None,
            PCWSTR(path_wide.as_ptr()),
            PCWSTR(xpath_wide.as_ptr()),
            flags,
        )
    }
    .map_err(|e| windows_err(e.code().0 as u32, format!("EvtQuery on '{path}'")))?;
    let query = EvtHandle::new(raw).ok_or_else(|| windows_err(6, format!("EvtQuery on '{path}'")))?;

    if let Some(bookmark) = bookmark {
        let handle = open_bookmark(bookmark)?;
        // SAFETY: both handles are live; offset 1 skips the bookmarked record.
        unsafe {
            EvtSeek(
                query.raw(),
                1,
                handle.raw(),
                0,
                EvtSeekRelativeToBookmark.0 as u32,
            )
        }
        .map_err(|e| windows_err(e.code().0 as u32, format!("EvtSeek on '{path}'")))?;
    }

    let log_name = match path_type {
        PathType::LogName => path.to_string(),
        PathType::FilePath => String::new(),
    };

    Ok(EventLogSession {
        path: path.to_string(),
        log_name,
        state: Mutex::new(SessionState {
            query,
            renderer: EventRenderer::new(options.render_xml)?,
            handles: vec![0; options.effective_batch_size()],
            bookmark_buf: vec![0; 1024],
            finished: false,
        }),
        options,
    })
}

impl EventLogSession {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read up to `max_count` records (clamped to the batch cap).
    ///
    /// An empty, unfinished batch means `EvtNext` timed out; call again.
    pub fn read_batch(&self, max_count: usize) -> Result<EventBatch> {
        let mut state = self.state.lock();
        if state.finished {
            return Ok(EventBatch {
                finished: true,
                ..Default::default()
            });
        }

        let want = max_count.clamp(1, MAX_EVT_BATCH_SIZE);
        if state.handles.len() < want {
            state.handles.resize(want, 0);
        }

        let state = &mut *state;
        let mut returned = 0u32;
        // SAFETY: the query handle is live and `handles` has `want` slots.
        let next = unsafe {
            EvtNext(
                state.query.raw(),
                &mut state.handles[..want],
                EVT_NEXT_TIMEOUT_MS,
                0,
                &mut returned,
            )
        };
        if let Err(e) = next {
            let code = e.code().0 as u32;
            if is_end_of_items(code) {
                state.finished = true;
                return Ok(EventBatch {
                    finished: true,
                    ..Default::default()
                });
            }
            if is_timeout(code) {
                return Ok(EventBatch::default());
            }
            return Err(windows_err(code, format!("EvtNext on '{}'", self.path)));
        }

        // Take ownership of every returned handle first so each is closed
        // even if rendering stops early.
        let handles: Vec<EvtHandle> = state.handles[..returned as usize]
            .iter()
            .filter_map(|&h| EvtHandle::new(EVT_HANDLE(h)))
            .collect();

        let mut records = Vec::with_capacity(handles.len());
        let mut last_rendered = None;
        for handle in &handles {
            match state.renderer.render(handle.raw(), &self.log_name) {
                Ok(record) => {
                    tracing::trace!(
                        "Rendered {} event {} (record {:?})",
                        record.provider_name,
                        record.id,
                        record.record_id
                    );
                    records.push(record);
                    last_rendered = Some(handle.raw());
                }
                Err(e) => {
                    tracing::warn!("Failed to render a record from '{}': {e}", self.path);
                    records.push(NativeEventRecord::failed(&self.log_name, e.to_string()));
                }
            }
        }

        let bookmark = match last_rendered {
            Some(h) => match bookmark_for(h, &mut state.bookmark_buf) {
                Ok(b) => Some(b),
                Err(e) => {
                    tracing::warn!("Failed to create bookmark for '{}': {e}", self.path);
                    None
                }
            },
            None => None,
        };
        let last_good = records.iter_mut().rev().find(|r| !r.is_error());
        if let (Some(b), Some(last)) = (&bookmark, last_good) {
            last.bookmark = Some(b.clone());
        }

        Ok(EventBatch {
            records,
            bookmark,
            finished: false,
        })
    }

    /// Read until the end of the query, handing each batch to `on_batch`.
    ///
    /// `cancel` is checked between batches; a cancelled read returns
    /// [`EventResolverError::Cancelled`] and leaves the session usable.
    /// Returns the number of records delivered.
    pub fn read_all(
        &self,
        cancel: &AtomicBool,
        mut on_batch: impl FnMut(EventBatch),
    ) -> Result<usize> {
        let start = Instant::now();
        let mut total = 0usize;
        let batch_size = self.options.effective_batch_size();
        loop {
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!("Read of '{}' cancelled after {total} records", self.path);
                return Err(EventResolverError::Cancelled);
            }
            let batch = self.read_batch(batch_size)?;
            let finished = batch.finished;
            if !batch.records.is_empty() {
                total += batch.records.len();
                on_batch(batch);
            }
            if finished {
                break;
            }
        }
        tracing::info!(
            "Read {} records from '{}' in {:.2}s",
            total,
            self.path,
            start.elapsed().as_secs_f64()
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_is_capped() {
        let opts = ReaderOptions {
            batch_size: 10_000,
            ..Default::default()
        };
        assert_eq!(opts.effective_batch_size(), MAX_EVT_BATCH_SIZE);
        let opts = ReaderOptions {
            batch_size: 0,
            ..Default::default()
        };
        assert_eq!(opts.effective_batch_size(), 1);
        assert_eq!(ReaderOptions::default().effective_batch_size(), EVT_BATCH_SIZE);
    }

    #[test]
    fn test_read_application_log() {
        let session = match query("Application", PathType::LogName, ReaderOptions::default()) {
            Ok(s) => s,
            // Restricted CI environments may not expose the log.
            Err(e) => {
                eprintln!("skipping: {e}");
                return;
            }
        };
        let batch = session.read_batch(8).unwrap();
        assert!(batch.records.len() <= 8);
        if batch.records.iter().any(|r| !r.is_error()) {
            assert!(batch.bookmark.is_some());
        }
    }
}
