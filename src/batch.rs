//! The batch driver: walk the highlight list in fixed-size batches.
//!
//! ## Why batches?
//!
//! A run over a heavily annotated book makes hundreds of slow, rate-limited
//! generation calls. Exporting only at the end would lose everything to a
//! crash or Ctrl-C late in the run, while the ledger would already claim those
//! highlights as processed. So after every batch that added cards the whole
//! accumulated deck is handed to the exporter, and the exporter's destination
//! is always at most one batch behind the ledger.
//!
//! Highlights are processed strictly one after another, in input order, with
//! a single [`Pacer`] shared across the whole run.

use crate::error::{FlashcardError, HighlightError};
use crate::export::{DeckExporter, DeckRequest};
use crate::ledger::Ledger;
use crate::output::{BatchUpdate, ContextRecord, ExportSummary, FlashcardRecord, RunStats};
use crate::pipeline::generate::{HighlightOutcome, HighlightProcessor};
use crate::pipeline::llm::TextGenerator;
use crate::pipeline::render::ContextImager;
use crate::pipeline::retry::{Pacer, RetryPolicy};
use crate::progress::{NoopProgressCallback, RunProgressCallback};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything the driver accumulated over a run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    /// Valid cards in input highlight order.
    pub flashcards: Vec<FlashcardRecord>,
    pub stats: RunStats,
    pub failures: Vec<HighlightError>,
    /// Result of the last export, if any batch added cards.
    pub export: Option<ExportSummary>,
}

/// Collaborators and settings for one run of the driver.
pub struct BatchDriver<'a> {
    pub generator: &'a dyn TextGenerator,
    pub ledger: &'a Ledger,
    pub exporter: Option<&'a dyn DeckExporter>,
    pub imager: Option<&'a dyn ContextImager>,
    pub progress: Option<&'a dyn RunProgressCallback>,
    pub template: &'a str,
    pub language: &'a str,
    pub retry: RetryPolicy,
    /// Minimum gap between two generation calls.
    pub call_delay: Duration,
    pub deck_name: &'a str,
    pub pdf_path: &'a Path,
    /// Stored as the batch marker of every ledger entry written.
    pub run_id: &'a str,
}

impl BatchDriver<'_> {
    /// Process `contexts` in batches of `batch_size`, exporting after each
    /// batch that added cards.
    pub async fn run(
        &self,
        contexts: &[ContextRecord],
        batch_size: usize,
    ) -> Result<BatchOutput, FlashcardError> {
        self.run_with(contexts, batch_size, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `on_batch` after every batch.
    ///
    /// A ledger or export failure aborts the run with an error; highlights
    /// recorded before it stay recorded.
    pub async fn run_with<F>(
        &self,
        contexts: &[ContextRecord],
        batch_size: usize,
        mut on_batch: F,
    ) -> Result<BatchOutput, FlashcardError>
    where
        F: FnMut(BatchUpdate),
    {
        let started = Instant::now();
        let noop = NoopProgressCallback;
        let progress: &dyn RunProgressCallback = self.progress.unwrap_or(&noop);

        let batch_size = batch_size.max(1);
        let total = contexts.len();
        let total_batches = total.div_ceil(batch_size);
        let processor = HighlightProcessor {
            generator: self.generator,
            ledger: self.ledger,
            template: self.template,
            language: self.language,
            retry: self.retry,
            batch_marker: Some(self.run_id),
        };
        let mut pacer = Pacer::new(self.call_delay);
        let mut out = BatchOutput {
            stats: RunStats {
                total_highlights: total,
                ..Default::default()
            },
            ..Default::default()
        };

        info!(
            "Processing {} highlights in {} batches of up to {}",
            total, total_batches, batch_size
        );
        progress.on_run_start(total, total_batches);

        for (batch_idx, batch) in contexts.chunks(batch_size).enumerate() {
            let batch_no = batch_idx + 1;
            let cards_before = out.flashcards.len();
            let failures_before = out.failures.len();

            for (offset, context) in batch.iter().enumerate() {
                let index = batch_idx * batch_size + offset + 1;
                let page = context.highlight.page_number;
                progress.on_highlight_start(index, total, page);

                let outcome = processor.process(&mut pacer, context).await?;
                out.stats.generation_calls += outcome.generation_calls() as usize;

                match outcome {
                    HighlightOutcome::Skipped | HighlightOutcome::Superseded { .. } => {
                        out.stats.skipped += 1;
                        progress.on_highlight_skipped(index, total, page);
                    }
                    HighlightOutcome::Failed { error, .. } => {
                        out.stats.failed += 1;
                        progress.on_highlight_error(index, total, page, &error.to_string());
                        out.failures.push(error);
                    }
                    HighlightOutcome::Recorded { mut cards, .. } => {
                        out.stats.recorded += 1;
                        if cards.is_empty() {
                            out.stats.empty_responses += 1;
                        } else if let Some(imager) = self.imager {
                            match imager.context_image(context).await {
                                Ok(name) => {
                                    for card in &mut cards {
                                        card.context_image = Some(name.clone());
                                    }
                                }
                                Err(e) => {
                                    warn!("{}", e);
                                    out.stats.image_failures += 1;
                                    out.failures.push(e);
                                }
                            }
                        }
                        progress.on_highlight_complete(index, total, page, cards.len());
                        out.stats.cards += cards.len();
                        out.flashcards.extend(cards);
                    }
                }
            }

            out.stats.batches = batch_no;
            let added = out.flashcards.len() - cards_before;
            if added > 0 {
                if let Some(exporter) = self.exporter {
                    let summary = exporter
                        .export(&DeckRequest {
                            deck_name: self.deck_name,
                            pdf_path: self.pdf_path,
                            media_dir: self.imager.map(|i| i.media_dir()),
                            cards: &out.flashcards,
                        })
                        .await?;
                    out.stats.exports += 1;
                    out.export = Some(summary);
                }
            } else {
                debug!("Batch {}/{} added no cards; export skipped", batch_no, total_batches);
            }

            info!(
                "Batch {}/{} done: {} new cards, {} total",
                batch_no,
                total_batches,
                added,
                out.flashcards.len()
            );
            progress.on_batch_complete(batch_no, total_batches, out.flashcards.len());
            out.stats.duration_ms = started.elapsed().as_millis() as u64;
            on_batch(BatchUpdate {
                batch: batch_no,
                total_batches,
                new_cards: out.flashcards[cards_before..].to_vec(),
                failures: out.failures[failures_before..].to_vec(),
                stats: out.stats.clone(),
            });
        }

        out.stats.duration_ms = started.elapsed().as_millis() as u64;
        progress.on_run_complete(&out.stats);
        Ok(out)
    }
}
