//! evtresolve library crate.
//!
//! Resolves raw Windows Event Log records into display-ready events using
//! provider metadata from the local machine or from provider databases. The
//! database management binary lives in `main.rs`.

pub mod core;
pub mod database;
pub mod resolver;
pub mod util;
