//! The read-only view of a PDF that the rest of the pipeline works against.
//!
//! [`PdfSource`] is the seam between PDF parsing and everything else: identity
//! derivation, context building, and tests only ever see this trait. The
//! pdfium-backed loader in [`crate::pipeline::extract`] produces a
//! [`LoadedPdf`], which is also what tests construct by hand.

use crate::identity::Rect;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// A highlight annotation exactly as found in the document, before identity
/// derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHighlight {
    /// 1-indexed page number.
    pub page_number: usize,
    pub rect: Rect,
    /// Text covered by the highlight.
    pub text: String,
}

impl RawHighlight {
    pub fn new(page_number: usize, rect: Rect, text: impl Into<String>) -> Self {
        Self {
            page_number,
            rect,
            text: text.into(),
        }
    }
}

/// Read access to one PDF document.
pub trait PdfSource: Send + Sync {
    /// Where the document was loaded from. Informational only.
    fn path(&self) -> &Path;

    /// The raw document bytes.
    fn content(&self) -> &[u8];

    /// Number of pages (always ≥ 1 for a loadable document).
    fn page_count(&self) -> usize;

    /// Text of the 1-indexed inclusive page range, pages joined by `\n`.
    ///
    /// The range is clamped to `1..=page_count()`; an empty intersection
    /// yields an empty string.
    fn page_text(&self, pages: RangeInclusive<usize>) -> String;

    /// Every highlight annotation in page order.
    fn list_highlights(&self) -> Vec<RawHighlight>;
}

/// A fully-extracted document held in memory.
#[derive(Debug, Clone)]
pub struct LoadedPdf {
    path: PathBuf,
    bytes: Vec<u8>,
    pages: Vec<String>,
    highlights: Vec<RawHighlight>,
}

impl LoadedPdf {
    pub fn new(
        path: impl Into<PathBuf>,
        bytes: Vec<u8>,
        pages: Vec<String>,
        highlights: Vec<RawHighlight>,
    ) -> Self {
        let mut highlights = highlights;
        highlights.sort_by_key(|h| h.page_number);
        Self {
            path: path.into(),
            bytes,
            pages,
            highlights,
        }
    }
}

impl PdfSource for LoadedPdf {
    fn path(&self) -> &Path {
        &self.path
    }

    fn content(&self) -> &[u8] {
        &self.bytes
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, pages: RangeInclusive<usize>) -> String {
        let start = (*pages.start()).max(1);
        let end = (*pages.end()).min(self.pages.len());
        if start > end {
            return String::new();
        }
        self.pages[start - 1..end].join("\n")
    }

    fn list_highlights(&self) -> Vec<RawHighlight> {
        self.highlights.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> LoadedPdf {
        LoadedPdf::new(
            "doc.pdf",
            b"%PDF-1.7".to_vec(),
            vec!["one".into(), "two".into(), "three".into()],
            vec![
                RawHighlight::new(3, Rect::new(0.0, 0.0, 1.0, 1.0), "c"),
                RawHighlight::new(1, Rect::new(0.0, 0.0, 1.0, 1.0), "a"),
            ],
        )
    }

    #[test]
    fn page_text_joins_and_clamps() {
        let d = doc();
        assert_eq!(d.page_text(1..=2), "one\ntwo");
        assert_eq!(d.page_text(0..=9), "one\ntwo\nthree");
        assert_eq!(d.page_text(5..=6), "");
    }

    #[test]
    fn highlights_come_back_in_page_order() {
        let pages: Vec<usize> = doc().list_highlights().iter().map(|h| h.page_number).collect();
        assert_eq!(pages, vec![1, 3]);
    }
}
