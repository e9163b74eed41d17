//! Resolver configuration.
//!
//! [`ResolverSettings`] is persisted as JSON under the application data
//! directory. A missing file yields the defaults; a corrupt file is reported
//! and also falls back to defaults so a bad settings file never blocks
//! resolution.

use std::path::{Path, PathBuf};

use crate::util::constants::{
    APP_DATA_DIR, DATABASE_EXTENSION, EVT_BATCH_SIZE, SETTINGS_FILE_NAME,
};
use crate::util::error::Result;

/// User-configurable resolver settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Directory scanned for provider database files.
    pub database_dir: Option<PathBuf>,
    /// File names (without extension) of the databases to load. Empty means
    /// "every database in `database_dir`".
    pub enabled_databases: Vec<String>,
    /// Events requested per native read.
    pub batch_size: usize,
    /// Capture the native XML rendering of each record while reading.
    pub render_xml: bool,
    /// Remote computer whose legacy message files are read over the admin share.
    pub remote_computer: Option<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            database_dir: None,
            enabled_databases: Vec::new(),
            batch_size: EVT_BATCH_SIZE,
            render_xml: true,
            remote_computer: None,
        }
    }
}

impl ResolverSettings {
    /// Load settings from `path`, returning defaults when the file is absent
    /// or unreadable.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read settings {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring malformed settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write settings to `path` atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Default settings path: `%LOCALAPPDATA%\evtresolve\settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        let local_app_data = std::env::var("LOCALAPPDATA").ok()?;
        Some(
            PathBuf::from(local_app_data)
                .join(APP_DATA_DIR)
                .join(SETTINGS_FILE_NAME),
        )
    }

    /// Resolve the configured database files. Returns an empty list when no
    /// database directory is configured or it cannot be read.
    pub fn database_paths(&self) -> Vec<PathBuf> {
        let Some(dir) = &self.database_dir else {
            return Vec::new();
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Cannot read database directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(DATABASE_EXTENSION))
            })
            .filter(|p| {
                self.enabled_databases.is_empty()
                    || p.file_stem().is_some_and(|stem| {
                        let stem = stem.to_string_lossy();
                        self.enabled_databases
                            .iter()
                            .any(|name| name.eq_ignore_ascii_case(&stem))
                    })
            })
            .collect();
        paths.sort();
        paths
    }
}
