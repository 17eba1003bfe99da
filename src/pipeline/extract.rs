//! PDF loading: pull page text and highlight annotations out of a PDF via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks for the whole parse. Running it on the blocking pool keeps
//! Tokio worker threads free.
//!
//! The file is read exactly once; the same bytes feed pdfium and the
//! file-bytes identity policy, so the identity always matches what was parsed.

use crate::error::FlashcardError;
use crate::identity::{normalize_text, Rect};
use crate::source::{LoadedPdf, RawHighlight};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit libpdfium to bind to.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium: `PDFIUM_LIB_PATH` when set, else the system library.
pub fn bind_pdfium() -> Result<Pdfium, FlashcardError> {
    let bindings = match std::env::var_os(PDFIUM_LIB_PATH_ENV) {
        Some(path) => {
            debug!("Binding pdfium from {:?}", path);
            Pdfium::bind_to_library(PathBuf::from(path))
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| FlashcardError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Map a pdfium load error onto the fatal error taxonomy.
pub(crate) fn classify_load_error(
    err: PdfiumError,
    path: &Path,
    password: Option<&str>,
) -> FlashcardError {
    let detail = format!("{err:?}");
    if detail.contains("Password") || detail.contains("password") {
        if password.is_some() {
            FlashcardError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            FlashcardError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        FlashcardError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}

/// Read and fully extract the PDF at `path`.
pub async fn load_pdf(path: &Path, password: Option<&str>) -> Result<LoadedPdf, FlashcardError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => FlashcardError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => FlashcardError::FileNotFound {
                path: path.to_path_buf(),
            },
        })?;

    let path = path.to_path_buf();
    let password = password.map(str::to_string);
    tokio::task::spawn_blocking(move || load_pdf_blocking(path, bytes, password.as_deref()))
        .await
        .map_err(|e| FlashcardError::Internal(format!("PDF load task panicked: {e}")))?
}

fn load_pdf_blocking(
    path: PathBuf,
    bytes: Vec<u8>,
    password: Option<&str>,
) -> Result<LoadedPdf, FlashcardError> {
    let pdfium = bind_pdfium()?;

    let (pages, highlights) = {
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, password)
            .map_err(|e| classify_load_error(e, &path, password))?;

        let mut pages = Vec::new();
        let mut highlights = Vec::new();

        for (idx, page) in document.pages().iter().enumerate() {
            let page_number = idx + 1;
            let text = page.text().map_err(|e| FlashcardError::CorruptPdf {
                path: path.clone(),
                detail: format!("page {page_number}: {e:?}"),
            })?;
            pages.push(text.all());

            for annotation in page.annotations().iter() {
                if annotation.annotation_type() != PdfPageAnnotationType::Highlight {
                    continue;
                }
                let Ok(bounds) = annotation.bounds() else {
                    debug!("Page {}: highlight without bounds skipped", page_number);
                    continue;
                };
                let covered = normalize_text(&text.inside_rect(bounds));
                if covered.is_empty() {
                    debug!("Page {}: highlight over no text skipped", page_number);
                    continue;
                }
                highlights.push(RawHighlight::new(
                    page_number,
                    Rect::new(
                        f64::from(bounds.left().value),
                        f64::from(bounds.bottom().value),
                        f64::from(bounds.right().value),
                        f64::from(bounds.top().value),
                    ),
                    covered,
                ));
            }
        }
        (pages, highlights)
    };

    info!(
        "PDF loaded: {} pages, {} highlights",
        pages.len(),
        highlights.len()
    );
    Ok(LoadedPdf::new(path, bytes, pages, highlights))
}
