//! The per-highlight state machine.
//!
//! ```text
//! PENDING ──exists──▶ SKIPPED
//!    │
//!    ▼
//! GENERATING ──retries exhausted──▶ FAILED
//!    │
//!    ▼
//! PARSING ──▶ RECORDED
//! ```
//!
//! A highlight is written to the ledger only after its response has been
//! parsed, and always then, even when the response held no usable card:
//! "processed" means attempted and parsed, so an unproductive highlight is not
//! sent to the model again on every run. A failed highlight is never written,
//! so the next run retries it.

use crate::error::HighlightError;
use crate::ledger::{Ledger, LedgerEntry, LedgerError};
use crate::output::{ContextRecord, FlashcardRecord};
use crate::pipeline::llm::TextGenerator;
use crate::pipeline::parse::parse_cards;
use crate::pipeline::retry::{retry_with_backoff, Pacer, RetryPolicy};
use crate::prompts::build_prompt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Terminal state of a highlight. The transient states in the diagram above
/// only exist inside [`HighlightProcessor::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighlightState {
    Recorded,
    Failed,
    Skipped,
}

/// Terminal result of processing one highlight.
#[derive(Debug, Clone)]
pub enum HighlightOutcome {
    /// The ledger already held the highlight; the generator was not called.
    Skipped,
    /// Parsed and recorded. `cards` holds only valid records and may be empty.
    Recorded {
        cards: Vec<FlashcardRecord>,
        attempts: u32,
    },
    /// Every attempt failed; nothing was recorded.
    Failed { error: HighlightError, attempts: u32 },
    /// Another run recorded the highlight while this one was generating. The
    /// fresh cards were discarded.
    Superseded { attempts: u32 },
}

impl HighlightOutcome {
    pub fn state(&self) -> HighlightState {
        match self {
            HighlightOutcome::Skipped | HighlightOutcome::Superseded { .. } => {
                HighlightState::Skipped
            }
            HighlightOutcome::Recorded { .. } => HighlightState::Recorded,
            HighlightOutcome::Failed { .. } => HighlightState::Failed,
        }
    }

    /// Generator calls made, retries included.
    pub fn generation_calls(&self) -> u32 {
        match self {
            HighlightOutcome::Skipped => 0,
            HighlightOutcome::Recorded { attempts, .. }
            | HighlightOutcome::Failed { attempts, .. }
            | HighlightOutcome::Superseded { attempts } => *attempts,
        }
    }
}

/// Everything needed to take one highlight from PENDING to a terminal state.
pub struct HighlightProcessor<'a> {
    pub generator: &'a dyn TextGenerator,
    pub ledger: &'a Ledger,
    pub template: &'a str,
    pub language: &'a str,
    pub retry: RetryPolicy,
    /// Stored with every ledger entry this processor writes.
    pub batch_marker: Option<&'a str>,
}

impl HighlightProcessor<'_> {
    /// Drive one highlight to a terminal state.
    ///
    /// Only ledger failures are returned as errors; they are fatal for the
    /// run because an unrecorded highlight would be regenerated forever.
    pub async fn process(
        &self,
        pacer: &mut Pacer,
        context: &ContextRecord,
    ) -> Result<HighlightOutcome, LedgerError> {
        let highlight = &context.highlight;
        let page = highlight.page_number;
        let id = highlight.highlight_identity.short();

        // PENDING → SKIPPED
        if self.ledger.exists(&highlight.highlight_identity)? {
            debug!("Page {}: {} already processed, skipping", page, id);
            return Ok(HighlightOutcome::Skipped);
        }

        // PENDING → GENERATING
        debug!(
            "Page {}: generating cards for {} ({} context pages)",
            page,
            id,
            context.last_page + 1 - context.first_page
        );
        let prompt = build_prompt(self.template, &context.context_text, &highlight.text, self.language);
        let generator = self.generator.label();
        let label = format!("Page {page} highlight {id} via {generator}");
        let generated = retry_with_backoff(&self.retry, pacer, &label, |_| {
            self.generator.generate(&prompt)
        })
        .await;

        let (response, attempts) = match generated {
            Ok(ok) => ok,
            Err(exhausted) => {
                // GENERATING → FAILED
                warn!(
                    "Page {}: {} failed after {} attempts against {}",
                    page, id, exhausted.attempts, generator
                );
                return Ok(HighlightOutcome::Failed {
                    error: HighlightError::GenerationFailed {
                        page,
                        highlight: highlight.highlight_identity.to_string(),
                        attempts: exhausted.attempts,
                        detail: format!("{generator}: {}", exhausted.last_error),
                    },
                    attempts: exhausted.attempts,
                });
            }
        };

        // GENERATING → PARSING
        let cards: Vec<FlashcardRecord> = parse_cards(&response)
            .into_iter()
            .map(|card| FlashcardRecord::from_parsed(card, highlight))
            .filter(FlashcardRecord::is_valid)
            .collect();
        if cards.is_empty() {
            warn!("Page {}: response for {} held no usable card", page, id);
        }

        // PARSING → RECORDED
        let inserted = self.ledger.record(&LedgerEntry {
            highlight_identity: highlight.highlight_identity.clone(),
            pdf_identity: highlight.pdf_identity.clone(),
            page_number: page,
            rect: highlight.rect,
            text: highlight.text.clone(),
            batch_marker: self.batch_marker.map(str::to_string),
        })?;
        if !inserted {
            warn!(
                "Page {}: {} was recorded by another run meanwhile; discarding {} cards",
                page,
                id,
                cards.len()
            );
            return Ok(HighlightOutcome::Superseded { attempts });
        }

        info!("Page {}: recorded {} with {} cards", page, id, cards.len());
        Ok(HighlightOutcome::Recorded { cards, attempts })
    }
}
