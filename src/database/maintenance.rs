//! Whole-file database operations: upgrade, merge, diff and listing.

use std::path::Path;

use crate::core::provider_details::ProviderDetails;
use crate::database::schema::{self, SchemaVersion};
use crate::database::store::ProviderDatabase;
use crate::util::constants::PROVIDER_TABLE;
use crate::util::error::Result;

/// Report which upgrade steps `path` still needs, as `(needs_v2, needs_v3)`.
///
/// A file without a provider table is treated as current: opening it creates
/// the table in the current format. A missing file is a not-found error.
pub fn needs_upgrade(path: &Path) -> Result<(bool, bool)> {
    let conn = schema::open_existing(path)?;
    Ok(schema::detect_version(&conn)?
        .map(SchemaVersion::upgrade_needs)
        .unwrap_or((false, false)))
}

/// Bring `path` to the current format. Returns `false` when nothing needed
/// doing.
///
/// Every row is read in the old layout first, then the table is dropped,
/// recreated and refilled inside one transaction, and the file is vacuumed.
/// A failure before commit leaves the original table untouched.
pub fn upgrade(path: &Path) -> Result<bool> {
    let mut conn = schema::open_existing(path)?;
    let version = match schema::detect_version(&conn)? {
        Some(v) if v < SchemaVersion::CURRENT => v,
        _ => {
            tracing::debug!("{} is already current", path.display());
            return Ok(false);
        }
    };

    let rows = schema::read_all_rows(&conn, version)?;
    tracing::info!(
        "Upgrading {} from {:?} to {:?} ({} providers)",
        path.display(),
        version,
        SchemaVersion::CURRENT,
        rows.len()
    );

    let tx = conn.transaction()?;
    tx.execute_batch(&format!("DROP TABLE {PROVIDER_TABLE}"))?;
    tx.execute_batch(&SchemaVersion::CURRENT.create_sql())?;
    for details in &rows {
        schema::write_row(&tx, details)?;
    }
    tx.commit()?;

    conn.execute_batch("VACUUM")?;
    tracing::info!("Upgraded {}", path.display());
    Ok(true)
}

/// Outcome of [`merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub replaced: usize,
    pub skipped: usize,
}

/// Copy every provider of `source` into `target`, creating `target` if
/// needed. Providers already in `target` (exact name) are replaced only when
/// `overwrite` is set.
pub fn merge(source: &Path, target: &Path, overwrite: bool) -> Result<MergeSummary> {
    let source_db = ProviderDatabase::open(source)?;
    let mut target_db = ProviderDatabase::open_or_create(target)?;

    let mut summary = MergeSummary::default();
    let mut pending = Vec::new();
    for details in source_db.list_all()? {
        if target_db.contains_exact(&details.provider_name)? {
            if !overwrite {
                tracing::debug!("Skipping existing provider {}", details.provider_name);
                summary.skipped += 1;
                continue;
            }
            summary.replaced += 1;
        } else {
            summary.added += 1;
        }
        pending.push(details);
    }
    target_db.add_all(&pending)?;

    tracing::info!(
        "Merged {} into {}: {} added, {} replaced, {} skipped",
        source.display(),
        target.display(),
        summary.added,
        summary.replaced,
        summary.skipped
    );
    Ok(summary)
}

/// Write to a new database at `out` every provider of `b` whose exact name is
/// absent from `a`. Returns the number written.
pub fn diff(a: &Path, b: &Path, out: &Path) -> Result<usize> {
    let a_db = ProviderDatabase::open(a)?;
    let b_db = ProviderDatabase::open(b)?;

    let mut missing = Vec::new();
    for details in b_db.list_all()? {
        if !a_db.contains_exact(&details.provider_name)? {
            missing.push(details);
        }
    }

    let mut out_db = ProviderDatabase::create(out)?;
    let written = out_db.add_all(&missing)?;
    tracing::info!(
        "Diff of {} against {}: {written} providers written to {}",
        b.display(),
        a.display(),
        out.display()
    );
    Ok(written)
}

/// Create a new database at `path` holding `providers`.
pub fn create(path: &Path, providers: &[ProviderDetails]) -> Result<usize> {
    let mut db = ProviderDatabase::create(path)?;
    db.add_all(providers)
}

/// The providers of `path` whose name contains `filter` (case-insensitive),
/// or all of them.
pub fn show_database(path: &Path, filter: Option<&str>) -> Result<Vec<ProviderDetails>> {
    let db = ProviderDatabase::open(path)?;
    Ok(db
        .list_all()?
        .into_iter()
        .filter(|d| name_matches(&d.provider_name, filter))
        .collect())
}

/// Case-insensitive substring filter shared by the listing operations.
pub fn name_matches(provider_name: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |f| {
        provider_name.to_lowercase().contains(&f.to_lowercase())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider_details::MessageEntry;

    fn provider(name: &str, text: &str) -> ProviderDetails {
        let mut d = ProviderDetails::empty(name);
        d.messages.push(MessageEntry::new(1, text, name));
        d
    }

    #[test]
    fn test_missing_table_needs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.db");
        assert_eq!(needs_upgrade(&path).unwrap(), (false, false));
        assert!(!upgrade(&path).unwrap());
    }

    #[test]
    fn test_merge_without_overwrite_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.db");
        let dst = dir.path().join("dst.db");
        create(&src, &[provider("A", "new"), provider("B", "b")]).unwrap();
        create(&dst, &[provider("A", "old")]).unwrap();

        let summary = merge(&src, &dst, false).unwrap();
        assert_eq!(
            summary,
            MergeSummary {
                added: 1,
                replaced: 0,
                skipped: 1
            }
        );
        let target = ProviderDatabase::open(&dst).unwrap();
        assert_eq!(target.query("A").unwrap().unwrap().messages[0].text, "old");
        assert!(target.query("B").unwrap().is_some());
    }

    #[test]
    fn test_name_filter() {
        assert!(name_matches("MSExchangeRepl", Some("exchange")));
        assert!(!name_matches("MSExchangeRepl", Some("kernel")));
        assert!(name_matches("Anything", None));
    }
}
