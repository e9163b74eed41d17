//! Table layouts and blob codecs for every database format.
//!
//! The format predates a version table, so the version of a file is read off
//! the `CREATE TABLE` text stored in `sqlite_master`:
//!
//! | version | large columns | `Parameters` |
//! |---------|---------------|--------------|
//! | v1      | JSON `TEXT`   | absent       |
//! | v2      | lz4 `BLOB`    | absent       |
//! | v3      | lz4 `BLOB`    | lz4 `BLOB`   |

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::provider_details::ProviderDetails;
use crate::util::constants::PROVIDER_TABLE;
use crate::util::error::{EventResolverError, Result};

/// On-disk layout of a provider database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    V1,
    V2,
    V3,
}

impl SchemaVersion {
    pub const CURRENT: Self = Self::V3;

    /// The `(needs_v2, needs_v3)` pair reported for this layout.
    pub fn upgrade_needs(self) -> (bool, bool) {
        match self {
            Self::V1 => (true, true),
            Self::V2 => (false, true),
            Self::V3 => (false, false),
        }
    }

    pub fn create_sql(self) -> String {
        let body = match self {
            Self::V1 => {
                "ProviderName TEXT NOT NULL PRIMARY KEY, \
                 Messages TEXT NOT NULL, \
                 Events TEXT NOT NULL, \
                 Keywords TEXT NOT NULL, \
                 Opcodes TEXT NOT NULL, \
                 Tasks TEXT NOT NULL"
            }
            Self::V2 => {
                "ProviderName TEXT NOT NULL PRIMARY KEY, \
                 Messages BLOB NOT NULL, \
                 Events BLOB NOT NULL, \
                 Keywords BLOB NOT NULL, \
                 Opcodes BLOB NOT NULL, \
                 Tasks BLOB NOT NULL"
            }
            Self::V3 => {
                "ProviderName TEXT NOT NULL PRIMARY KEY, \
                 Messages BLOB NOT NULL, \
                 Parameters BLOB NOT NULL, \
                 Events BLOB NOT NULL, \
                 Keywords BLOB NOT NULL, \
                 Opcodes BLOB NOT NULL, \
                 Tasks BLOB NOT NULL"
            }
        };
        format!("CREATE TABLE {PROVIDER_TABLE} ({body})")
    }

    /// Infer the layout from the stored `CREATE TABLE` statement.
    pub fn from_create_sql(sql: &str) -> Self {
        let compact: String = sql
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        if compact.contains("messages text") {
            Self::V1
        } else if !compact.contains("parameters blob") {
            Self::V2
        } else {
            Self::V3
        }
    }
}

/// Open a database file that must already exist. SQLite would otherwise
/// create an empty file for a mistyped path.
pub fn open_existing(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(EventResolverError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("provider database {} does not exist", path.display()),
        )));
    }
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

/// Read the layout of the provider table, or `None` when the file has no
/// provider table yet.
pub fn detect_version(conn: &Connection) -> Result<Option<SchemaVersion>> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [PROVIDER_TABLE],
            |row| row.get(0),
        )
        .optional()?;
    Ok(sql.map(|s| SchemaVersion::from_create_sql(&s)))
}

/// Serialize and compress one column value.
pub fn encode_blob<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    Ok(lz4_flex::compress_prepend_size(&json))
}

/// Decompress and deserialize one column value.
pub fn decode_blob<T: DeserializeOwned>(blob: &[u8]) -> Result<T> {
    let json = lz4_flex::decompress_size_prepended(blob)
        .map_err(|e| EventResolverError::Compression(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Column list selected when reading rows of `version`.
pub fn select_columns(version: SchemaVersion) -> &'static str {
    match version {
        SchemaVersion::V1 | SchemaVersion::V2 => {
            "ProviderName, Messages, Events, Keywords, Opcodes, Tasks"
        }
        SchemaVersion::V3 => "ProviderName, Messages, Parameters, Events, Keywords, Opcodes, Tasks",
    }
}

/// Decode one row selected with [`select_columns`].
pub fn decode_row(row: &Row<'_>, version: SchemaVersion) -> Result<ProviderDetails> {
    let provider_name: String = row.get(0)?;
    let mut details = ProviderDetails::empty(provider_name);

    match version {
        SchemaVersion::V1 => {
            let text = |i: usize| -> Result<String> { Ok(row.get::<_, String>(i)?) };
            details.messages = serde_json::from_str(&text(1)?)?;
            details.events = serde_json::from_str(&text(2)?)?;
            details.keywords = serde_json::from_str(&text(3)?)?;
            details.opcodes = serde_json::from_str(&text(4)?)?;
            details.tasks = serde_json::from_str(&text(5)?)?;
        }
        SchemaVersion::V2 => {
            let blob = |i: usize| -> Result<Vec<u8>> { Ok(row.get::<_, Vec<u8>>(i)?) };
            details.messages = decode_blob(&blob(1)?)?;
            details.events = decode_blob(&blob(2)?)?;
            details.keywords = decode_blob(&blob(3)?)?;
            details.opcodes = decode_blob(&blob(4)?)?;
            details.tasks = decode_blob(&blob(5)?)?;
        }
        SchemaVersion::V3 => {
            let blob = |i: usize| -> Result<Vec<u8>> { Ok(row.get::<_, Vec<u8>>(i)?) };
            details.messages = decode_blob(&blob(1)?)?;
            details.parameters = decode_blob(&blob(2)?)?;
            details.events = decode_blob(&blob(3)?)?;
            details.keywords = decode_blob(&blob(4)?)?;
            details.opcodes = decode_blob(&blob(5)?)?;
            details.tasks = decode_blob(&blob(6)?)?;
        }
    }
    Ok(details)
}

/// Write `details` as a current-format row, replacing any row of the same
/// name.
pub fn write_row(conn: &Connection, details: &ProviderDetails) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {PROVIDER_TABLE} \
             (ProviderName, Messages, Parameters, Events, Keywords, Opcodes, Tasks) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        rusqlite::params![
            details.provider_name,
            encode_blob(&details.messages)?,
            encode_blob(&details.parameters)?,
            encode_blob(&details.events)?,
            encode_blob(&details.keywords)?,
            encode_blob(&details.opcodes)?,
            encode_blob(&details.tasks)?,
        ],
    )?;
    Ok(())
}

/// Read every row of a table in the given layout, ordered by name.
pub fn read_all_rows(conn: &Connection, version: SchemaVersion) -> Result<Vec<ProviderDetails>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {PROVIDER_TABLE} ORDER BY ProviderName",
        select_columns(version)
    ))?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode_row(row, version)?);
    }
    Ok(out)
}
