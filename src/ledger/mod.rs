//! The persistent "seen highlights" ledger.
//!
//! A single SQLite file records every highlight that has already been turned
//! into flashcards. Generation consults it before calling the model and writes
//! to it only after the response has been parsed, so an interrupted run can be
//! resumed by simply running again.
//!
//! ## Atomicity
//!
//! Every public operation is one SQL statement (or one transaction), executed
//! while holding the connection mutex. `record` is insert-if-absent at the SQL
//! level (`ON CONFLICT DO NOTHING`), which closes the gap between `exists` and
//! `record` even when two processes share one ledger file: the loser learns
//! from the return value that someone else got there first.
//!
//! ## Insertion order
//!
//! Entries carry no timestamp. `seq` is an `AUTOINCREMENT` key, so it is
//! strictly increasing for the lifetime of the file, including across
//! deletions, and `delete_last_n` orders by it.

mod migrations;
mod tracked;

pub use tracked::{RenameNotice, TrackedFile};

use crate::identity::{HighlightIdentity, IdentityPolicy, NormalizedRect, PdfIdentity, Rect};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const POLICY_KEY: &str = "identity_policy";

/// Storage-layer failures. Never swallowed: a failed `record` would otherwise
/// make the same highlight look new on every run.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot create ledger directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open ledger '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("ledger schema v{found} is newer than this build supports (v{supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// The ledger was created under a different PDF identity policy.
    #[error(
        "ledger uses identity policy '{stored}' but '{requested}' was requested; \
         mixing policies would silently break deduplication"
    )]
    PolicyMismatch { stored: String, requested: String },

    #[error("ledger connection lock poisoned")]
    Poisoned,
}

/// One persisted highlight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub highlight_identity: HighlightIdentity,
    pub pdf_identity: PdfIdentity,
    pub page_number: usize,
    pub rect: Rect,
    pub text: String,
    /// Run that recorded the entry, if any.
    pub batch_marker: Option<String>,
}

/// Handle to the ledger store. Open once per process and pass by reference.
pub struct Ledger {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("path", &self.path).finish()
    }
}

impl Ledger {
    /// Open (creating if needed) the ledger file at `path` and migrate it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(&path).map_err(|source| LedgerError::Open {
            path: path.clone(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_migrations(&mut conn)?;

        info!("Ledger opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// A throwaway ledger, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// File backing this ledger; `None` for in-memory ledgers.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Pin the PDF identity policy. The first call stores it; later calls
    /// must pass the same policy.
    pub fn bind_identity_policy(&self, policy: IdentityPolicy) -> Result<(), LedgerError> {
        let requested = policy.tag();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO ledger_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO NOTHING",
            params![POLICY_KEY, requested],
        )?;
        let stored: String = conn.query_row(
            "SELECT value FROM ledger_meta WHERE key = ?1",
            params![POLICY_KEY],
            |row| row.get(0),
        )?;
        if stored != requested {
            return Err(LedgerError::PolicyMismatch { stored, requested });
        }
        Ok(())
    }

    /// Identity policy the ledger was bound to, if any.
    pub fn identity_policy_tag(&self) -> Result<Option<String>, LedgerError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT value FROM ledger_meta WHERE key = ?1",
                params![POLICY_KEY],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn exists(&self, highlight: &HighlightIdentity) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM highlights WHERE highlight_id = ?1",
                params![highlight.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert-if-absent. Returns `false` when the identity was already present.
    pub fn record(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO highlights (highlight_id, pdf_id, page, rect, text, batch_marker)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(highlight_id) DO NOTHING",
            params![
                entry.highlight_identity.as_str(),
                entry.pdf_identity.as_str(),
                to_i64(entry.page_number),
                entry.rect.normalized().to_string(),
                entry.text,
                entry.batch_marker,
            ],
        )?;
        if inserted == 0 {
            debug!(
                "Ledger already holds {}; record is a no-op",
                entry.highlight_identity.short()
            );
        }
        Ok(inserted > 0)
    }

    /// Number of entries for a PDF, optionally restricted to one run.
    pub fn count_for(
        &self,
        pdf: &PdfIdentity,
        batch_marker: Option<&str>,
    ) -> Result<usize, LedgerError> {
        let conn = self.lock()?;
        let count: i64 = match batch_marker {
            Some(marker) => conn.query_row(
                "SELECT COUNT(*) FROM highlights WHERE pdf_id = ?1 AND batch_marker = ?2",
                params![pdf.as_str(), marker],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM highlights WHERE pdf_id = ?1",
                params![pdf.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(count.max(0) as usize)
    }

    /// Forget every highlight of a PDF. Returns the number of rows deleted.
    pub fn delete_for(&self, pdf: &PdfIdentity) -> Result<usize, LedgerError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM highlights WHERE pdf_id = ?1",
            params![pdf.as_str()],
        )?;
        info!("Cleared {} ledger entries for {}", deleted, pdf.short());
        Ok(deleted)
    }

    /// Forget the `n` most recently inserted highlights of a PDF.
    pub fn delete_last_n(&self, pdf: &PdfIdentity, n: usize) -> Result<usize, LedgerError> {
        if n == 0 {
            return Ok(0);
        }
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM highlights WHERE seq IN (
                 SELECT seq FROM highlights WHERE pdf_id = ?1
                 ORDER BY seq DESC LIMIT ?2
             )",
            params![pdf.as_str(), to_i64(n)],
        )?;
        info!(
            "Removed last {} ledger entries for {}",
            deleted,
            pdf.short()
        );
        Ok(deleted)
    }

    /// Entries for a PDF in insertion order.
    pub fn entries_for(&self, pdf: &PdfIdentity) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT highlight_id, pdf_id, page, rect, text, batch_marker
             FROM highlights WHERE pdf_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![pdf.as_str()], row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let page: i64 = row.get("page")?;
    let page_number =
        usize::try_from(page).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(2, page))?;
    let rect_text: String = row.get("rect")?;
    let rect = NormalizedRect::parse(&rect_text)
        .map(NormalizedRect::to_rect)
        .ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("malformed rect '{rect_text}'").into(),
            )
        })?;
    Ok(LedgerEntry {
        highlight_identity: HighlightIdentity::from_stored(row.get::<_, String>("highlight_id")?),
        pdf_identity: PdfIdentity::from_stored(row.get::<_, String>("pdf_id")?),
        page_number,
        rect,
        text: row.get("text")?,
        batch_marker: row.get("batch_marker")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::derive_highlight_identity;

    fn pdf() -> PdfIdentity {
        PdfIdentity::from_bytes(b"ledger-test")
    }

    fn entry(i: usize) -> LedgerEntry {
        let rect = Rect::new(10.0, 10.0 * i as f64, 200.0, 10.0 * i as f64 + 12.0);
        let text = format!("highlight {i}");
        LedgerEntry {
            highlight_identity: derive_highlight_identity(&pdf(), i, &rect, &text),
            pdf_identity: pdf(),
            page_number: i,
            rect,
            text,
            batch_marker: None,
        }
    }

    #[test]
    fn record_then_exists() {
        let ledger = Ledger::open_in_memory().unwrap();
        let e = entry(1);
        assert!(!ledger.exists(&e.highlight_identity).unwrap());
        assert!(ledger.record(&e).unwrap());
        assert!(ledger.exists(&e.highlight_identity).unwrap());
    }

    #[test]
    fn duplicate_record_is_a_silent_noop() {
        let ledger = Ledger::open_in_memory().unwrap();
        let e = entry(1);
        assert!(ledger.record(&e).unwrap());
        assert!(!ledger.record(&e).unwrap());
        assert_eq!(ledger.count_for(&pdf(), None).unwrap(), 1);
    }

    #[test]
    fn delete_last_n_follows_insertion_order() {
        let ledger = Ledger::open_in_memory().unwrap();
        // Pages inserted out of numeric order so field values cannot stand in for seq.
        let order = [3, 1, 5, 2, 4];
        for i in order {
            ledger.record(&entry(i)).unwrap();
        }
        assert_eq!(ledger.delete_last_n(&pdf(), 2).unwrap(), 2);
        let left: Vec<usize> = ledger
            .entries_for(&pdf())
            .unwrap()
            .iter()
            .map(|e| e.page_number)
            .collect();
        assert_eq!(left, vec![3, 1, 5]);
    }

    #[test]
    fn delete_last_n_is_scoped_to_one_pdf() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.record(&entry(1)).unwrap();
        let other = PdfIdentity::from_bytes(b"other");
        let mut foreign = entry(2);
        foreign.pdf_identity = other.clone();
        foreign.highlight_identity =
            derive_highlight_identity(&other, 2, &foreign.rect, &foreign.text);
        ledger.record(&foreign).unwrap();

        assert_eq!(ledger.delete_last_n(&pdf(), 10).unwrap(), 1);
        assert_eq!(ledger.count_for(&other, None).unwrap(), 1);
        assert_eq!(ledger.delete_last_n(&other, 0).unwrap(), 0);
    }

    #[test]
    fn delete_for_and_count_by_marker() {
        let ledger = Ledger::open_in_memory().unwrap();
        let mut a = entry(1);
        a.batch_marker = Some("run-a".into());
        let mut b = entry(2);
        b.batch_marker = Some("run-b".into());
        ledger.record(&a).unwrap();
        ledger.record(&b).unwrap();

        assert_eq!(ledger.count_for(&pdf(), Some("run-a")).unwrap(), 1);
        assert_eq!(ledger.count_for(&pdf(), None).unwrap(), 2);
        assert_eq!(ledger.delete_for(&pdf()).unwrap(), 2);
        assert_eq!(ledger.count_for(&pdf(), None).unwrap(), 0);
    }

    #[test]
    fn entries_round_trip_rect_at_ledger_precision() {
        let ledger = Ledger::open_in_memory().unwrap();
        let e = entry(3);
        ledger.record(&e).unwrap();
        let stored = ledger.entries_for(&pdf()).unwrap().remove(0);
        assert_eq!(stored.rect.normalized(), e.rect.normalized());
        assert_eq!(stored.highlight_identity, e.highlight_identity);
    }

    #[test]
    fn identity_policy_is_pinned() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.bind_identity_policy(IdentityPolicy::FileBytes).unwrap();
        ledger.bind_identity_policy(IdentityPolicy::FileBytes).unwrap();
        let err = ledger
            .bind_identity_policy(IdentityPolicy::LeadingText { pages: 5 })
            .unwrap_err();
        assert!(matches!(err, LedgerError::PolicyMismatch { .. }));
        assert_eq!(
            ledger.identity_policy_tag().unwrap().as_deref(),
            Some("file-bytes/sha256")
        );
    }

    #[test]
    fn file_ledger_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.sqlite3");
        let e = entry(4);
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.record(&e).unwrap();
        }
        let reopened = Ledger::open(&path).unwrap();
        assert!(reopened.exists(&e.highlight_identity).unwrap());
        assert_eq!(reopened.path(), Some(path.as_path()));
    }
}
