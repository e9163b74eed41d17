//! Validates that compile-time constants are internally consistent.
#![allow(clippy::assertions_on_constants)]

use evtresolve::util::constants::*;

#[test]
fn batch_size_is_positive() {
    assert!(EVT_BATCH_SIZE > 0, "EVT_BATCH_SIZE must be > 0");
}

#[test]
fn batch_size_respects_cap() {
    assert!(
        EVT_BATCH_SIZE <= MAX_EVT_BATCH_SIZE,
        "default batch must not exceed the cap"
    );
    assert!(
        MAX_EVT_BATCH_SIZE <= 512,
        "EvtNext is unstable above 512 handles per call"
    );
}

#[test]
fn timeout_is_finite() {
    assert!(EVT_NEXT_TIMEOUT_MS > 0, "timeout must be > 0");
    assert!(
        EVT_NEXT_TIMEOUT_MS <= 10_000,
        "timeout too long for responsive cancellation"
    );
}

#[test]
fn buffers_are_reasonable() {
    assert!(EVT_RENDER_BUFFER_SIZE >= 1024, "Render buffer too small");
    assert!(EVT_VALUE_BUFFER_SIZE >= 256, "Value buffer too small");
    assert!(EVT_FORMAT_BUFFER_SIZE >= 256, "Format buffer too small");
}

#[test]
fn diagnostics_ring_is_bounded() {
    assert!(MAX_DIAGNOSTICS > 0, "MAX_DIAGNOSTICS must be > 0");
    assert!(MAX_DIAGNOSTICS <= 10_000, "MAX_DIAGNOSTICS should be bounded");
}

#[test]
fn sentinels_are_distinct() {
    assert_ne!(DESCRIPTION_NOT_FOUND, DESCRIPTION_FORMAT_FAILED);
    assert!(!DESCRIPTION_NOT_FOUND.is_empty());
    assert_eq!(TASK_NONE, "None");
}

#[test]
fn message_table_resource_ids() {
    assert_eq!(RT_MESSAGETABLE, 11);
    assert_eq!(MESSAGE_TABLE_RESOURCE_ID, 1);
}

#[test]
fn log_file_size_is_reasonable() {
    assert!(MAX_LOG_FILE_SIZE >= 1024 * 1024, "Log file cap too small");
    assert!(
        MAX_LOG_FILE_SIZE <= 100 * 1024 * 1024,
        "Log file cap too large"
    );
}

#[test]
fn names_are_not_empty() {
    assert!(!APP_NAME.is_empty());
    assert!(!APP_VERSION.is_empty());
    assert!(!PROVIDER_TABLE.is_empty());
    assert!(LOG_FILE_NAME.ends_with(".log"));
    assert!(SETTINGS_FILE_NAME.ends_with(".json"));
}
