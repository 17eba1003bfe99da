//! Where each known PDF currently lives on disk.
//!
//! Paths are bookkeeping only. A rename updates this table and nothing else;
//! highlight rows are keyed by content identity and are never touched.

use super::{Ledger, LedgerError};
use crate::identity::PdfIdentity;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// A PDF identity and its last known location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub pdf_identity: PdfIdentity,
    pub path: PathBuf,
    pub alias: Option<String>,
}

/// A file-move notification: the document with `identity` moved from
/// `old_path` to `new_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameNotice {
    pub identity: PdfIdentity,
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

impl Ledger {
    /// Remember (or refresh) the location of a PDF. An existing alias is kept
    /// when `alias` is `None`.
    pub fn track_file(
        &self,
        pdf: &PdfIdentity,
        path: &std::path::Path,
        alias: Option<&str>,
    ) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tracked_files (pdf_id, file_path, alias) VALUES (?1, ?2, ?3)
             ON CONFLICT(pdf_id) DO UPDATE SET
                 file_path = excluded.file_path,
                 alias = COALESCE(excluded.alias, tracked_files.alias)",
            params![pdf.as_str(), path.to_string_lossy(), alias],
        )?;
        Ok(())
    }

    pub fn tracked_path(&self, pdf: &PdfIdentity) -> Result<Option<PathBuf>, LedgerError> {
        let conn = self.lock()?;
        let path: Option<String> = conn
            .query_row(
                "SELECT file_path FROM tracked_files WHERE pdf_id = ?1",
                params![pdf.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path.map(PathBuf::from))
    }

    /// Every tracked PDF, ordered by path.
    pub fn tracked_files(&self) -> Result<Vec<TrackedFile>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pdf_id, file_path, alias FROM tracked_files ORDER BY file_path ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TrackedFile {
                pdf_identity: PdfIdentity::from_stored(row.get::<_, String>(0)?),
                path: PathBuf::from(row.get::<_, String>(1)?),
                alias: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Apply a file-move notification. Returns `true` if the identity was
    /// already tracked.
    pub fn apply_rename(&self, notice: &RenameNotice) -> Result<bool, LedgerError> {
        let previous = self.tracked_path(&notice.identity)?;
        match &previous {
            Some(stored) if stored != &notice.old_path => warn!(
                "Rename for {}: ledger had '{}', notice says '{}'",
                notice.identity.short(),
                stored.display(),
                notice.old_path.display()
            ),
            _ => {}
        }
        self.track_file(&notice.identity, &notice.new_path, None)?;
        info!(
            "Tracked {} moved to '{}'",
            notice.identity.short(),
            notice.new_path.display()
        );
        Ok(previous.is_some())
    }
}
