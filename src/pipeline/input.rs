//! Input resolution: validate a user-supplied path before pdfium sees it.
//!
//! We check existence, read permission and the `%PDF` magic bytes up front
//! so callers get a meaningful error rather than an opaque pdfium failure.

use crate::error::FlashcardError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` names a readable PDF and return it unchanged.
pub fn resolve_local(path: impl AsRef<Path>) -> Result<PathBuf, FlashcardError> {
    let path = path.as_ref().to_path_buf();

    if !path.is_file() {
        return Err(FlashcardError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(FlashcardError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(FlashcardError::PermissionDenied { path });
        }
        Err(_) => return Err(FlashcardError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file() {
        let err = resolve_local("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, FlashcardError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04 zip file").unwrap();
        let err = resolve_local(f.path()).unwrap_err();
        match err {
            FlashcardError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn short_file_is_not_a_pdf() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%P").unwrap();
        assert!(matches!(
            resolve_local(f.path()).unwrap_err(),
            FlashcardError::NotAPdf { .. }
        ));
    }

    #[test]
    fn pdf_magic_accepted() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        assert_eq!(resolve_local(f.path()).unwrap(), f.path());
    }

    #[test]
    fn directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_local(dir.path()).unwrap_err(),
            FlashcardError::FileNotFound { .. }
        ));
    }
}
