//! Integration tests for error type construction, display and classification.

use evtresolve::util::error::{classify_native_code, windows_err, ErrorKind, EventResolverError};

#[test]
fn windows_api_error_displays_hex_hresult() {
    let err = windows_err(0x8000_4005, "EvtQuery on Security");
    let msg = err.to_string();
    assert!(
        msg.contains("80004005"),
        "Error message should contain hex HRESULT: {msg}"
    );
    assert!(
        msg.contains("EvtQuery on Security"),
        "Error message should contain context: {msg}"
    );
}

#[test]
fn access_denied_is_user_actionable() {
    let err = windows_err(0x8007_0005, "EvtQuery on Security");
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert!(err.to_string().contains("elevated"));
}

#[test]
fn missing_things_are_not_found() {
    for code in [2u32, 15002, 15007, 15027, 0x8007_0716] {
        assert_eq!(
            classify_native_code(code),
            ErrorKind::NotFound,
            "code {code:#x}"
        );
        assert!(windows_err(code, "lookup").is_not_found());
    }
}

#[test]
fn cancellation_is_not_a_failure_kind() {
    assert_eq!(windows_err(1223, "EvtNext").kind(), ErrorKind::Cancelled);
    assert_eq!(EventResolverError::Cancelled.kind(), ErrorKind::Cancelled);
}

#[test]
fn xml_parse_error_preserves_message() {
    let err = EventResolverError::XmlParse("unexpected EOF at line 42".into());
    let msg = err.to_string();
    assert!(msg.contains("unexpected EOF"), "Should contain detail: {msg}");
    assert_eq!(err.kind(), ErrorKind::MalformedData);
}

#[test]
fn io_error_converts() {
    let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no access");
    let err: EventResolverError = io_err.into();
    let msg = err.to_string();
    assert!(msg.contains("no access"), "Should preserve IO error: {msg}");
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[test]
fn obsolete_database_is_its_own_kind() {
    let err = EventResolverError::ObsoleteDatabase {
        path: "old.db".into(),
        needs_v2: true,
        needs_v3: true,
    };
    assert_eq!(err.kind(), ErrorKind::ObsoleteFormat);
    assert!(err.to_string().contains("old.db"));
}
