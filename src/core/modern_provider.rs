//! Modern (manifest) provider metadata.
//!
//! Reads events, keywords, opcodes, tasks and the channel map of a provider
//! through the publisher metadata API. Each facet is loaded independently:
//! a facet that fails is logged and left empty while the rest still load. A
//! provider that is not registered yields empty details.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use windows::core::PCWSTR;
use windows::Win32::System::EventLog::*;

use crate::core::evt_native::{
    format_message_id, to_wide, variant_handle, variant_string, variant_u64, EvtHandle,
    VariantBuffer, NO_MESSAGE_ID,
};
use crate::core::provider_details::{EventDefinition, ProviderDetails};
use crate::util::error::{is_end_of_items, windows_err, ErrorKind, Result};

/// Load the modern metadata of `provider_name` from the local machine.
pub fn load_modern_metadata(provider_name: &str) -> ProviderDetails {
    let mut details = ProviderDetails::empty(provider_name);

    let publisher = match open_publisher(provider_name) {
        Ok(h) => h,
        Err(e) => {
            match e.kind() {
                ErrorKind::NotFound => debug!("{provider_name}: no modern metadata"),
                _ => warn!("{provider_name}: cannot open publisher metadata: {e}"),
            }
            return details;
        }
    };

    let mut scratch = VariantBuffer::default();

    details.keywords = facet(provider_name, "keywords", || {
        load_named_values(&publisher, &mut scratch, &KEYWORD_PROPS)
            .map(|values| values.into_iter().collect())
    });
    details.opcodes = facet(provider_name, "opcodes", || {
        load_named_values(&publisher, &mut scratch, &OPCODE_PROPS).map(|values| {
            values
                .into_iter()
                .map(|(value, name)| (((value as u32) >> 16) as i32, name))
                .collect()
        })
    });
    details.tasks = facet(provider_name, "tasks", || {
        load_named_values(&publisher, &mut scratch, &TASK_PROPS).map(|values| {
            values
                .into_iter()
                .map(|(value, name)| (value as i32, name))
                .collect()
        })
    });
    let channels: BTreeMap<u32, String> = facet(provider_name, "channels", || {
        load_channels(&publisher, &mut scratch)
    });
    details.events = facet(provider_name, "events", || {
        load_events(&publisher, &mut scratch, &channels)
    });

    debug!("Loaded modern metadata: {}", details.summary());
    details
}

/// Run one facet loader, replacing a failure with an empty value.
fn facet<T: Default>(provider_name: &str, what: &str, load: impl FnOnce() -> Result<T>) -> T {
    load().unwrap_or_else(|e| {
        warn!("{provider_name}: failed to load {what}: {e}");
        T::default()
    })
}

fn open_publisher(provider_name: &str) -> Result<EvtHandle> {
    let wide = to_wide(provider_name);
    // SAFETY: `wide` is NUL-terminated; local session, default locale.
    let handle = unsafe { EvtOpenPublisherMetadata(None, PCWSTR(wide.as_ptr()), None, 0, 0) }
        .map_err(|e| {
            windows_err(
                e.code().0 as u32,
                format!("EvtOpenPublisherMetadata '{provider_name}'"),
            )
        })?;
    EvtHandle::new(handle).ok_or_else(|| {
        windows_err(6, format!("EvtOpenPublisherMetadata '{provider_name}' returned null"))
    })
}

/// Property ids of one name/value/message object array.
struct NamedValueProps {
    array: EVT_PUBLISHER_METADATA_PROPERTY_ID,
    name: EVT_PUBLISHER_METADATA_PROPERTY_ID,
    value: EVT_PUBLISHER_METADATA_PROPERTY_ID,
    message_id: EVT_PUBLISHER_METADATA_PROPERTY_ID,
}

const KEYWORD_PROPS: NamedValueProps = NamedValueProps {
    array: EvtPublisherMetadataKeywords,
    name: EvtPublisherMetadataKeywordName,
    value: EvtPublisherMetadataKeywordValue,
    message_id: EvtPublisherMetadataKeywordMessageID,
};

const OPCODE_PROPS: NamedValueProps = NamedValueProps {
    array: EvtPublisherMetadataOpcodes,
    name: EvtPublisherMetadataOpcodeName,
    value: EvtPublisherMetadataOpcodeValue,
    message_id: EvtPublisherMetadataOpcodeMessageID,
};

const TASK_PROPS: NamedValueProps = NamedValueProps {
    array: EvtPublisherMetadataTasks,
    name: EvtPublisherMetadataTaskName,
    value: EvtPublisherMetadataTaskValue,
    message_id: EvtPublisherMetadataTaskMessageID,
};

/// Open the object array stored under `property` of the publisher.
fn open_array(
    publisher: &EvtHandle,
    scratch: &mut VariantBuffer,
    property: EVT_PUBLISHER_METADATA_PROPERTY_ID,
) -> Result<Option<(EvtHandle, u32)>> {
    let variant = scratch.fill("EvtGetPublisherMetadataProperty", |size, buf, used| unsafe {
        // SAFETY: `buf` points to `size` writable, aligned bytes.
        EvtGetPublisherMetadataProperty(publisher.raw(), property, 0, size, Some(buf), used)
    })?;
    let Some(array) = variant_handle(variant) else {
        return Ok(None);
    };
    let mut count = 0u32;
    // SAFETY: `array` is a live object-array handle.
    unsafe { EvtGetObjectArraySize(array.raw().0, &mut count) }
        .map_err(|e| windows_err(e.code().0 as u32, "EvtGetObjectArraySize"))?;
    Ok(Some((array, count)))
}

fn array_property(
    array: &EvtHandle,
    scratch: &mut VariantBuffer,
    property: EVT_PUBLISHER_METADATA_PROPERTY_ID,
    index: u32,
) -> Result<VariantSnapshot> {
    let variant = scratch.fill("EvtGetObjectArrayProperty", |size, buf, used| unsafe {
        // SAFETY: `buf` points to `size` writable, aligned bytes.
        EvtGetObjectArrayProperty(
            array.raw().0,
            property.0 as u32,
            index,
            0,
            size,
            Some(buf),
            used,
        )
    })?;
    Ok(VariantSnapshot {
        number: variant_u64(variant),
        text: variant_string(variant),
    })
}

/// The owned parts of a variant, copied out before the scratch buffer is
/// reused.
struct VariantSnapshot {
    number: Option<u64>,
    text: Option<String>,
}

/// Read a name/value/message array, preferring the message text for the
/// display name.
fn load_named_values(
    publisher: &EvtHandle,
    scratch: &mut VariantBuffer,
    props: &NamedValueProps,
) -> Result<Vec<(u64, String)>> {
    let Some((array, count)) = open_array(publisher, scratch, props.array)? else {
        return Ok(Vec::new());
    };
    let mut values = Vec::with_capacity(count as usize);
    for index in 0..count {
        let value = array_property(&array, scratch, props.value, index)?
            .number
            .unwrap_or(0);
        let symbolic = array_property(&array, scratch, props.name, index)?
            .text
            .unwrap_or_default();
        let message_id = array_property(&array, scratch, props.message_id, index)?
            .number
            .map_or(NO_MESSAGE_ID, |m| m as u32);
        let name = format_message_id(publisher, message_id)
            .map(|m| m.trim_end().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or(symbolic);
        values.push((value, name));
    }
    Ok(values)
}

/// Channel value -> channel path.
fn load_channels(
    publisher: &EvtHandle,
    scratch: &mut VariantBuffer,
) -> Result<BTreeMap<u32, String>> {
    let Some((array, count)) =
        open_array(publisher, scratch, EvtPublisherMetadataChannelReferences)?
    else {
        return Ok(BTreeMap::new());
    };
    let mut channels = BTreeMap::new();
    for index in 0..count {
        let path = array_property(
            &array,
            scratch,
            EvtPublisherMetadataChannelReferencePath,
            index,
        )?
        .text
        .unwrap_or_default();
        let id = array_property(
            &array,
            scratch,
            EvtPublisherMetadataChannelReferenceID,
            index,
        )?
        .number
        .unwrap_or(u64::from(index)) as u32;
        channels.insert(id, path);
    }
    Ok(channels)
}

fn load_events(
    publisher: &EvtHandle,
    scratch: &mut VariantBuffer,
    channels: &BTreeMap<u32, String>,
) -> Result<Vec<EventDefinition>> {
    // SAFETY: publisher is a live metadata handle.
    let raw = unsafe { EvtOpenEventMetadataEnum(publisher.raw(), 0) }
        .map_err(|e| windows_err(e.code().0 as u32, "EvtOpenEventMetadataEnum"))?;
    let Some(enumerator) = EvtHandle::new(raw) else {
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    loop {
        // SAFETY: enumerator is live; the returned handle is wrapped at once.
        let next = match unsafe { EvtNextEventMetadata(enumerator.raw(), 0) } {
            Ok(h) => h,
            Err(e) if is_end_of_items(e.code().0 as u32) => break,
            Err(e) => return Err(windows_err(e.code().0 as u32, "EvtNextEventMetadata")),
        };
        let Some(event) = EvtHandle::new(next) else {
            break;
        };

        let mut number = |prop: EVT_EVENT_METADATA_PROPERTY_ID| -> Result<Option<u64>> {
            event_property(&event, scratch, prop).map(|s| s.number)
        };
        let id = number(EventMetadataEventID)?.unwrap_or(0) as u32;
        let version = number(EventMetadataEventVersion)?.unwrap_or(0) as u8;
        let channel = number(EventMetadataEventChannel)?.unwrap_or(0) as u32;
        let level = number(EventMetadataEventLevel)?.map(|v| v as u8);
        let opcode = number(EventMetadataEventOpcode)?.map(|v| ((v as u32) >> 16) as i32);
        let task = number(EventMetadataEventTask)?.map(|v| v as i32);
        let keywords = number(EventMetadataEventKeyword)?.unwrap_or(0);
        let message_id = number(EventMetadataEventMessageID)?.map_or(NO_MESSAGE_ID, |v| v as u32);
        let template = event_property(&event, scratch, EventMetadataEventTemplate)?
            .text
            .unwrap_or_default();

        events.push(EventDefinition {
            id,
            version,
            log_name: channels.get(&channel).cloned().unwrap_or_default(),
            level,
            opcode,
            task,
            keywords,
            template,
            description: format_message_id(publisher, message_id).unwrap_or_default(),
        });
    }
    Ok(events)
}

fn event_property(
    event: &EvtHandle,
    scratch: &mut VariantBuffer,
    property: EVT_EVENT_METADATA_PROPERTY_ID,
) -> Result<VariantSnapshot> {
    let variant = scratch.fill("EvtGetEventMetadataProperty", |size, buf, used| unsafe {
        // SAFETY: `buf` points to `size` writable, aligned bytes.
        EvtGetEventMetadataProperty(event.raw(), property, 0, size, Some(buf), used)
    })?;
    Ok(VariantSnapshot {
        number: variant_u64(variant),
        text: variant_string(variant),
    })
}
