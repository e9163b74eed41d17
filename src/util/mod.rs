//! Shared utilities: constants, errors, timestamps, binary reads, string
//! interning and settings.

pub mod binary_cursor;
pub mod constants;
pub mod error;
pub mod intern;
pub mod settings;
pub mod time;
