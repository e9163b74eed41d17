//! A single provider database file.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};

use crate::core::provider_details::ProviderDetails;
use crate::database::schema::{self, SchemaVersion};
use crate::util::constants::PROVIDER_TABLE;
use crate::util::error::{EventResolverError, Result};

/// An open provider database in the current format.
pub struct ProviderDatabase {
    path: PathBuf,
    conn: Connection,
}

impl std::fmt::Debug for ProviderDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDatabase")
            .field("path", &self.path)
            .finish()
    }
}

impl ProviderDatabase {
    /// Create a new, empty database. Fails if `path` already exists.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(EventResolverError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(&SchemaVersion::CURRENT.create_sql())?;
        tracing::info!("Created provider database {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    /// Open an existing database. A missing file is a not-found error.
    ///
    /// A database in an older format is refused with
    /// [`EventResolverError::ObsoleteDatabase`]; run
    /// [`upgrade`](crate::database::maintenance::upgrade) first.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(path, schema::open_existing(path)?)
    }

    /// Open `path`, creating an empty current-format database when the file
    /// does not exist yet.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        Self::from_connection(path, Connection::open(path)?)
    }

    fn from_connection(path: &Path, conn: Connection) -> Result<Self> {
        match schema::detect_version(&conn)? {
            None => {
                conn.execute_batch(&SchemaVersion::CURRENT.create_sql())?;
                tracing::debug!("Initialised empty provider table in {}", path.display());
            }
            Some(SchemaVersion::V3) => {}
            Some(old) => {
                let (needs_v2, needs_v3) = old.upgrade_needs();
                return Err(EventResolverError::ObsoleteDatabase {
                    path: path.to_path_buf(),
                    needs_v2,
                    needs_v3,
                });
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display name of the database: the file stem.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Insert `details`, replacing a provider with exactly the same name.
    pub fn add_or_replace(&self, details: &ProviderDetails) -> Result<()> {
        schema::write_row(&self.conn, details)?;
        tracing::trace!("Stored {}", details.provider_name);
        Ok(())
    }

    /// Insert many providers in one transaction.
    pub fn add_all<'a>(
        &mut self,
        providers: impl IntoIterator<Item = &'a ProviderDetails>,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        for details in providers {
            schema::write_row(&tx, details)?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    /// Look a provider up by name, ignoring case.
    pub fn query(&self, provider_name: &str) -> Result<Option<ProviderDetails>> {
        let sql = format!(
            "SELECT {} FROM {PROVIDER_TABLE} WHERE ProviderName = ?1 COLLATE NOCASE \
             ORDER BY ProviderName = ?1 DESC LIMIT 1",
            schema::select_columns(SchemaVersion::CURRENT)
        );
        let row = self
            .conn
            .query_row(&sql, [provider_name], |row| {
                Ok(schema::decode_row(row, SchemaVersion::CURRENT))
            })
            .optional()?;
        row.transpose()
    }

    /// `true` when a provider with exactly this name is stored.
    pub fn contains_exact(&self, provider_name: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {PROVIDER_TABLE} WHERE ProviderName = ?1"),
                [provider_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Every stored provider, ordered by name.
    pub fn list_all(&self) -> Result<Vec<ProviderDetails>> {
        schema::read_all_rows(&self.conn, SchemaVersion::CURRENT)
    }

    /// Every stored provider name, ordered.
    pub fn provider_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT ProviderName FROM {PROVIDER_TABLE} ORDER BY ProviderName"
        ))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {PROVIDER_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}
