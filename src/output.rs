//! Records flowing through the pipeline and the report a run returns.

use crate::error::HighlightError;
use crate::identity::{derive_highlight_identity, normalize_text, HighlightIdentity, PdfIdentity, Rect};
use crate::pipeline::parse::ParsedCard;
use crate::source::RawHighlight;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Per-highlight records ────────────────────────────────────────────────

/// One highlighted region with its derived identity.
///
/// Rebuilt on every extraction pass; only its identity reaches the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightRecord {
    pub highlight_identity: HighlightIdentity,
    pub pdf_identity: PdfIdentity,
    /// 1-indexed.
    pub page_number: usize,
    pub rect: Rect,
    /// Whitespace-normalized highlighted text.
    pub text: String,
}

impl HighlightRecord {
    pub fn new(pdf_identity: PdfIdentity, page_number: usize, rect: Rect, text: &str) -> Self {
        let text = normalize_text(text);
        let highlight_identity = derive_highlight_identity(&pdf_identity, page_number, &rect, &text);
        Self {
            highlight_identity,
            pdf_identity,
            page_number,
            rect,
            text,
        }
    }

    pub fn from_raw(pdf_identity: &PdfIdentity, raw: &RawHighlight) -> Self {
        Self::new(pdf_identity.clone(), raw.page_number, raw.rect, &raw.text)
    }
}

/// A highlight plus the page-window text handed to the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub highlight: HighlightRecord,
    pub context_text: String,
    /// Current on-disk location. Not part of any identity.
    pub pdf_path: PathBuf,
    /// First page of the context window (1-indexed).
    pub first_page: usize,
    /// Last page of the context window (inclusive).
    pub last_page: usize,
}

/// One question/answer card with the provenance of the highlight it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardRecord {
    pub question: String,
    pub answer: String,
    pub highlight_identity: HighlightIdentity,
    pub pdf_identity: PdfIdentity,
    pub page_number: usize,
    pub rect: Rect,
    /// File name of the context image inside the media directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_image: Option<String>,
}

impl FlashcardRecord {
    pub fn from_parsed(card: ParsedCard, highlight: &HighlightRecord) -> Self {
        Self {
            question: card.question,
            answer: card.answer,
            highlight_identity: highlight.highlight_identity.clone(),
            pdf_identity: highlight.pdf_identity.clone(),
            page_number: highlight.page_number,
            rect: highlight.rect,
            context_image: None,
        }
    }

    /// Only valid records may be exported.
    pub fn is_valid(&self) -> bool {
        !self.question.trim().is_empty()
            && !self.answer.trim().is_empty()
            && self.page_number >= 1
            && !self.pdf_identity.as_str().is_empty()
    }
}

/// A highlight and whether the ledger has already seen it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightStatus {
    pub highlight: HighlightRecord,
    pub seen: bool,
}

// ── Run-level results ────────────────────────────────────────────────────

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Highlights in the selected pages.
    pub total_highlights: usize,
    /// Already in the ledger (including ones lost to a concurrent run).
    pub skipped: usize,
    /// Parsed and recorded this run.
    pub recorded: usize,
    /// Exhausted their retries.
    pub failed: usize,
    /// Valid cards produced.
    pub cards: usize,
    /// Recorded highlights whose response held no usable card.
    pub empty_responses: usize,
    /// Context images that could not be rendered. Their cards were kept.
    pub image_failures: usize,
    /// Generation calls made, retries included.
    pub generation_calls: usize,
    pub batches: usize,
    pub exports: usize,
    pub duration_ms: u64,
}

/// How a run ended, for the user-facing summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every highlight was already in the ledger (or there were none).
    NoNewHighlights,
    /// Every new highlight was recorded.
    Complete,
    /// Some highlights failed; the rest were recorded and exported.
    PartialFailure,
    /// Every new highlight failed.
    AllFailed,
}

/// Result of one exporter call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// File path or endpoint written to.
    pub destination: String,
    /// Cards now present at the destination from this run.
    pub cards: usize,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Also stored as the batch marker of every ledger entry this run wrote.
    pub run_id: String,
    pub pdf_identity: PdfIdentity,
    pub pdf_path: PathBuf,
    pub flashcards: Vec<FlashcardRecord>,
    pub stats: RunStats,
    pub failures: Vec<HighlightError>,
    /// Last export of the run, if any batch added cards.
    pub export: Option<ExportSummary>,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        let s = &self.stats;
        let attempted = s.recorded + s.failed;
        if attempted == 0 {
            RunOutcome::NoNewHighlights
        } else if s.failed == 0 {
            RunOutcome::Complete
        } else if s.recorded == 0 {
            RunOutcome::AllFailed
        } else {
            RunOutcome::PartialFailure
        }
    }
}

/// Emitted by the streaming API after each batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdate {
    /// 1-based batch number.
    pub batch: usize,
    pub total_batches: usize,
    /// Cards this batch added.
    pub new_cards: Vec<FlashcardRecord>,
    /// Failures in this batch.
    pub failures: Vec<HighlightError>,
    /// Counters so far.
    pub stats: RunStats,
}
