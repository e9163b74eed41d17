//! Shared plumbing for the native Evt* API.
//!
//! Every native handle is wrapped in [`EvtHandle`], which closes it on drop.
//! Property queries write an `EVT_VARIANT` into a caller buffer; [`VariantBuffer`]
//! owns that buffer, grows it on `ERROR_INSUFFICIENT_BUFFER` and converts the
//! result into a [`PropertyValue`].

use chrono::{NaiveDate, TimeZone, Utc};
use windows::Win32::System::EventLog::{
    EvtClose, EvtFormatMessage, EvtFormatMessageId, EVT_HANDLE, EVT_VARIANT,
};

use crate::core::event_record::PropertyValue;
use crate::util::binary_cursor::decode_ansi;
use crate::util::constants::{EVT_FORMAT_BUFFER_SIZE, EVT_VALUE_BUFFER_SIZE};
use crate::util::error::{is_insufficient_buffer, is_unresolved_insert, windows_err, Result};
use crate::util::time::filetime_to_datetime;

// EVT_VARIANT_TYPE values.
const TYPE_NULL: u32 = 0;
const TYPE_STRING: u32 = 1;
const TYPE_ANSI_STRING: u32 = 2;
const TYPE_SBYTE: u32 = 3;
const TYPE_BYTE: u32 = 4;
const TYPE_INT16: u32 = 5;
const TYPE_UINT16: u32 = 6;
const TYPE_INT32: u32 = 7;
const TYPE_UINT32: u32 = 8;
const TYPE_INT64: u32 = 9;
const TYPE_UINT64: u32 = 10;
const TYPE_SINGLE: u32 = 11;
const TYPE_DOUBLE: u32 = 12;
const TYPE_BOOLEAN: u32 = 13;
const TYPE_BINARY: u32 = 14;
const TYPE_GUID: u32 = 15;
const TYPE_SIZET: u32 = 16;
const TYPE_FILETIME: u32 = 17;
const TYPE_SYSTIME: u32 = 18;
const TYPE_SID: u32 = 19;
const TYPE_HEXINT32: u32 = 20;
const TYPE_HEXINT64: u32 = 21;
const TYPE_EVT_HANDLE: u32 = 32;
const TYPE_XML: u32 = 35;
const TYPE_MASK: u32 = 0x7F;
const TYPE_ARRAY: u32 = 0x80;

/// `MessageID` value meaning "no message, use the symbolic name".
pub const NO_MESSAGE_ID: u32 = u32::MAX;

/// Owned native handle, closed with `EvtClose` on drop.
#[derive(Debug)]
pub struct EvtHandle(EVT_HANDLE);

impl EvtHandle {
    /// Wrap a handle, rejecting null/invalid values.
    pub fn new(handle: EVT_HANDLE) -> Option<Self> {
        (!handle.is_invalid()).then_some(Self(handle))
    }

    pub fn raw(&self) -> EVT_HANDLE {
        self.0
    }
}

impl Drop for EvtHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from an Evt* call and is closed exactly once.
        unsafe {
            let _ = EvtClose(self.0);
        }
    }
}

/// NUL-terminated UTF-16 copy of `s`.
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Decode a UTF-16 buffer up to its first NUL.
pub fn wide_to_string(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

/// Read a NUL-terminated UTF-16 string from a raw pointer.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated UTF-16 string.
unsafe fn wide_ptr_to_string(ptr: *const u16) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    Some(String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len)))
}

/// 8-byte aligned scratch buffer for `EVT_VARIANT` results.
pub struct VariantBuffer {
    buf: Vec<u64>,
}

impl Default for VariantBuffer {
    fn default() -> Self {
        Self::with_bytes(EVT_VALUE_BUFFER_SIZE)
    }
}

impl VariantBuffer {
    pub fn with_bytes(bytes: usize) -> Self {
        Self {
            buf: vec![0; bytes.div_ceil(8).max(2)],
        }
    }

    fn size_bytes(&self) -> u32 {
        (self.buf.len() * 8) as u32
    }

    /// Run a property query, growing the buffer once if it is too small.
    ///
    /// `query` receives `(buffer_size, buffer, used)` and returns the native
    /// result. `context` names the call in errors.
    pub fn fill<F>(&mut self, context: &str, mut query: F) -> Result<&EVT_VARIANT>
    where
        F: FnMut(u32, *mut EVT_VARIANT, &mut u32) -> windows::core::Result<()>,
    {
        let mut used = 0u32;
        let first = query(
            self.size_bytes(),
            self.buf.as_mut_ptr() as *mut EVT_VARIANT,
            &mut used,
        );
        if let Err(e) = first {
            let hr = e.code().0 as u32;
            if !is_insufficient_buffer(hr) {
                return Err(windows_err(hr, context));
            }
            self.buf.resize((used as usize).div_ceil(8) + 1, 0);
            query(
                self.size_bytes(),
                self.buf.as_mut_ptr() as *mut EVT_VARIANT,
                &mut used,
            )
            .map_err(|e| windows_err(e.code().0 as u32, context))?;
        }
        // SAFETY: the buffer is 8-byte aligned, at least 16 bytes long and was
        // just written by the native call.
        Ok(unsafe { &*(self.buf.as_ptr() as *const EVT_VARIANT) })
    }

    /// The `index`-th variant of a multi-value render (`EvtRenderEventValues`).
    ///
    /// # Safety
    /// `index` must be below the property count reported by the render call
    /// that filled this buffer.
    pub unsafe fn variant_at(&self, index: usize) -> &EVT_VARIANT {
        &*((self.buf.as_ptr() as *const EVT_VARIANT).add(index))
    }

    /// Mutable base pointer and size for calls that fill several variants.
    pub fn raw_parts(&mut self) -> (*mut EVT_VARIANT, u32) {
        (self.buf.as_mut_ptr() as *mut EVT_VARIANT, self.size_bytes())
    }

    pub fn grow_to(&mut self, bytes: u32) {
        self.buf.resize((bytes as usize).div_ceil(8) + 1, 0);
    }
}

/// Numeric payload of an integer-typed variant.
pub fn variant_u64(v: &EVT_VARIANT) -> Option<u64> {
    // SAFETY: the union member read matches the tag in `Type`.
    unsafe {
        match v.Type & TYPE_MASK {
            TYPE_BYTE => Some(u64::from(v.Anonymous.ByteVal)),
            TYPE_UINT16 => Some(u64::from(v.Anonymous.UInt16Val)),
            TYPE_UINT32 | TYPE_HEXINT32 => Some(u64::from(v.Anonymous.UInt32Val)),
            TYPE_UINT64 | TYPE_HEXINT64 | TYPE_FILETIME => Some(v.Anonymous.UInt64Val),
            TYPE_INT32 => Some(v.Anonymous.Int32Val as u32 as u64),
            TYPE_INT64 => Some(v.Anonymous.Int64Val as u64),
            TYPE_SIZET => Some(v.Anonymous.SizeTVal as u64),
            _ => None,
        }
    }
}

/// String payload of a string-typed variant.
pub fn variant_string(v: &EVT_VARIANT) -> Option<String> {
    // SAFETY: string members are only read for string tags.
    unsafe {
        match v.Type & TYPE_MASK {
            TYPE_STRING | TYPE_XML => wide_ptr_to_string(v.Anonymous.StringVal.0),
            TYPE_ANSI_STRING => ansi_ptr_to_string(v.Anonymous.AnsiStringVal.0),
            _ => None,
        }
    }
}

/// The object-array handle carried by an `EvtVarTypeEvtHandle` variant.
pub fn variant_handle(v: &EVT_VARIANT) -> Option<EvtHandle> {
    if v.Type & TYPE_MASK != TYPE_EVT_HANDLE {
        return None;
    }
    // SAFETY: tag checked above.
    EvtHandle::new(unsafe { v.Anonymous.EvtHandleVal })
}

unsafe fn ansi_ptr_to_string(ptr: *const u8) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    Some(decode_ansi(std::slice::from_raw_parts(ptr, len)))
}

/// Convert a rendered event value into a [`PropertyValue`].
///
/// # Safety
/// `v` must have been written by a successful native render call, so that
/// pointers inside the variant are valid for its `Count`.
pub unsafe fn variant_to_property(v: &EVT_VARIANT) -> PropertyValue {
    let ty = v.Type & TYPE_MASK;
    if v.Type & TYPE_ARRAY != 0 {
        return array_to_property(v, ty);
    }
    let u = &v.Anonymous;
    match ty {
        TYPE_NULL => PropertyValue::Null,
        TYPE_STRING | TYPE_XML | TYPE_ANSI_STRING => variant_string(v)
            .map(PropertyValue::String)
            .unwrap_or(PropertyValue::Null),
        TYPE_SBYTE => PropertyValue::Int(i64::from(u.SByteVal)),
        TYPE_BYTE => PropertyValue::UInt(u64::from(u.ByteVal)),
        TYPE_INT16 => PropertyValue::Int(i64::from(u.Int16Val)),
        TYPE_UINT16 => PropertyValue::UInt(u64::from(u.UInt16Val)),
        TYPE_INT32 => PropertyValue::Int(i64::from(u.Int32Val)),
        TYPE_UINT32 => PropertyValue::UInt(u64::from(u.UInt32Val)),
        TYPE_INT64 => PropertyValue::Int(u.Int64Val),
        TYPE_UINT64 => PropertyValue::UInt(u.UInt64Val),
        TYPE_SINGLE => PropertyValue::Float(f64::from(u.SingleVal)),
        TYPE_DOUBLE => PropertyValue::Float(u.DoubleVal),
        TYPE_BOOLEAN => PropertyValue::Bool(u.Int32Val != 0),
        TYPE_HEXINT32 => PropertyValue::HexInt(u64::from(u.UInt32Val)),
        TYPE_HEXINT64 => PropertyValue::HexInt(u.UInt64Val),
        TYPE_SIZET => PropertyValue::Pointer(u.SizeTVal as u64),
        TYPE_FILETIME => filetime_to_datetime(u.FileTimeVal)
            .map(PropertyValue::Time)
            .unwrap_or(PropertyValue::Null),
        TYPE_BINARY => {
            let ptr = u.BinaryVal as *const u8;
            if ptr.is_null() {
                PropertyValue::Null
            } else {
                PropertyValue::Binary(std::slice::from_raw_parts(ptr, v.Count as usize).to_vec())
            }
        }
        TYPE_GUID => {
            // GuidVal, SidVal and SysTimeVal share the pointer slot.
            let ptr = u.BinaryVal as *const [u8; 16];
            if ptr.is_null() {
                PropertyValue::Null
            } else {
                PropertyValue::guid_from_bytes(&std::ptr::read_unaligned(ptr))
            }
        }
        TYPE_SID => sid_at(u.BinaryVal as *const u8).unwrap_or(PropertyValue::Null),
        TYPE_SYSTIME => systime_at(u.BinaryVal as *const u16).unwrap_or(PropertyValue::Null),
        _ => PropertyValue::Null,
    }
}

unsafe fn sid_at(ptr: *const u8) -> Option<PropertyValue> {
    if ptr.is_null() {
        return None;
    }
    let count = *ptr.add(1) as usize;
    let bytes = std::slice::from_raw_parts(ptr, 8 + count * 4);
    PropertyValue::sid_from_bytes(bytes)
}

unsafe fn systime_at(ptr: *const u16) -> Option<PropertyValue> {
    if ptr.is_null() {
        return None;
    }
    // SYSTEMTIME: year, month, day-of-week, day, hour, minute, second, ms.
    let f: [u16; 8] = std::ptr::read_unaligned(ptr as *const [u16; 8]);
    let naive = NaiveDate::from_ymd_opt(i32::from(f[0]), u32::from(f[1]), u32::from(f[3]))?
        .and_hms_milli_opt(u32::from(f[4]), u32::from(f[5]), u32::from(f[6]), u32::from(f[7]))?;
    Some(PropertyValue::Time(Utc.from_utc_datetime(&naive)))
}

unsafe fn array_to_property(v: &EVT_VARIANT, ty: u32) -> PropertyValue {
    let count = v.Count as usize;
    let base = v.Anonymous.BinaryVal as *const u8;
    if base.is_null() {
        return PropertyValue::Array(Vec::new());
    }
    let items = (0..count).map(|i| -> PropertyValue {
        match ty {
            TYPE_STRING => {
                let strings = base as *const *const u16;
                wide_ptr_to_string(*strings.add(i))
                    .map(PropertyValue::String)
                    .unwrap_or(PropertyValue::Null)
            }
            TYPE_BYTE => PropertyValue::UInt(u64::from(*base.add(i))),
            TYPE_UINT16 => PropertyValue::UInt(u64::from(read_at::<u16>(base, i))),
            TYPE_UINT32 => PropertyValue::UInt(u64::from(read_at::<u32>(base, i))),
            TYPE_HEXINT32 => PropertyValue::HexInt(u64::from(read_at::<u32>(base, i))),
            TYPE_UINT64 => PropertyValue::UInt(read_at::<u64>(base, i)),
            TYPE_HEXINT64 => PropertyValue::HexInt(read_at::<u64>(base, i)),
            TYPE_INT16 => PropertyValue::Int(i64::from(read_at::<i16>(base, i))),
            TYPE_INT32 => PropertyValue::Int(i64::from(read_at::<i32>(base, i))),
            TYPE_INT64 => PropertyValue::Int(read_at::<i64>(base, i)),
            TYPE_GUID => PropertyValue::guid_from_bytes(&read_at::<[u8; 16]>(base, i)),
            _ => PropertyValue::Null,
        }
    });
    PropertyValue::Array(items.collect())
}

unsafe fn read_at<T: Copy>(base: *const u8, index: usize) -> T {
    std::ptr::read_unaligned((base as *const T).add(index))
}

/// Format a provider message by id. `None` when the id is the "no message"
/// sentinel or the message cannot be found.
///
/// A message whose insertion placeholders stay unresolved is still returned
/// as its raw template.
pub fn format_message_id(publisher: &EvtHandle, message_id: u32) -> Option<String> {
    if message_id == NO_MESSAGE_ID {
        return None;
    }
    let mut buffer = vec![0u16; EVT_FORMAT_BUFFER_SIZE];
    for _ in 0..2 {
        let mut used = 0u32;
        // SAFETY: publisher is a live metadata handle; the buffer length is
        // passed through the slice.
        let result = unsafe {
            EvtFormatMessage(
                publisher.raw(),
                EVT_HANDLE::default(),
                message_id,
                None,
                EvtFormatMessageId.0 as u32,
                Some(buffer.as_mut_slice()),
                &mut used,
            )
        };
        match result {
            Ok(()) => return Some(wide_to_string(&buffer)),
            Err(e) => {
                let hr = e.code().0 as u32;
                if is_insufficient_buffer(hr) {
                    buffer.resize(used as usize + 1, 0);
                    continue;
                }
                if is_unresolved_insert(hr) {
                    return Some(wide_to_string(&buffer));
                }
                return None;
            }
        }
    }
    None
}
