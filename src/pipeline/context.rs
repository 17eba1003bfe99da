//! Context building: the page window around a highlight.
//!
//! The window is `[page - radius, page + radius]` clamped to the document.
//! Clamping is silent; a highlight on page 1 with radius 3 simply gets pages
//! 1 through 4.

use crate::output::{ContextRecord, HighlightRecord};
use crate::source::PdfSource;
use std::ops::RangeInclusive;

/// Inclusive, 1-indexed page window around `page`, clamped to `1..=page_count`.
pub fn context_window(page: usize, page_count: usize, radius: usize) -> RangeInclusive<usize> {
    let last = page_count.max(1);
    let page = page.clamp(1, last);
    let start = page.saturating_sub(radius).max(1);
    let end = page.saturating_add(radius).min(last);
    start..=end
}

/// Expand a highlight into a [`ContextRecord`].
pub fn build_context(
    source: &dyn PdfSource,
    highlight: HighlightRecord,
    radius: usize,
) -> ContextRecord {
    let window = context_window(highlight.page_number, source.page_count(), radius);
    ContextRecord {
        context_text: source.page_text(window.clone()),
        pdf_path: source.path().to_path_buf(),
        first_page: *window.start(),
        last_page: *window.end(),
        highlight,
    }
}
