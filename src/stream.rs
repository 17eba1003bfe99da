//! Streaming run API: emit one update per batch as the run progresses.
//!
//! ## Why stream?
//!
//! A run over a long book takes many minutes of rate-limited calls. Unlike
//! the eager [`crate::run::generate_flashcards`], which returns only after the
//! last batch, [`generate_stream`] yields a [`BatchUpdate`] as soon as each
//! batch has been recorded and exported, so callers can show cards as they
//! arrive or stop listening early.
//!
//! Dropping the stream does not cancel the run: the spawned task keeps going
//! until the highlight list is done, and every batch it finishes is recorded
//! and exported as usual.

use crate::config::FlashcardConfig;
use crate::error::FlashcardError;
use crate::export::exporter_for;
use crate::output::BatchUpdate;
use crate::pipeline::llm::resolve_generator;
use crate::pipeline::{extract, input};
use crate::run::{generate_with_updates, open_ledger};
use std::path::Path;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info};

/// A boxed stream of batch updates. A fatal error mid-run arrives as the last
/// item.
pub type BatchStream = Pin<Box<dyn Stream<Item = Result<BatchUpdate, FlashcardError>> + Send>>;

/// Generate flashcards for the PDF at `path`, streaming one update per batch.
///
/// # Returns
/// - `Ok(BatchStream)`: updates in batch order
/// - `Err(FlashcardError)`: fatal error before the first batch (file not
///   found, not a PDF, provider not configured, ledger unavailable)
///
/// # Example
/// ```rust,no_run
/// use highlight2anki::{generate_stream, FlashcardConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = FlashcardConfig::default();
/// let mut updates = generate_stream("book.pdf", &config).await?;
/// while let Some(update) = updates.next().await {
///     let update = update?;
///     println!("batch {}/{}: {} new cards", update.batch, update.total_batches, update.new_cards.len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn generate_stream(
    path: impl AsRef<Path>,
    config: &FlashcardConfig,
) -> Result<BatchStream, FlashcardError> {
    let pdf_path = input::resolve_local(path)?;
    info!("Starting streaming run: {}", pdf_path.display());

    let generator = resolve_generator(config)?;
    let exporter = exporter_for(config)?;
    let ledger = open_ledger(config)?;
    let source = extract::load_pdf(&pdf_path, config.password.as_deref()).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let config = config.clone();
    tokio::spawn(async move {
        let updates = tx.clone();
        let result = generate_with_updates(
            &source,
            &ledger,
            generator.as_ref(),
            Some(exporter.as_ref()),
            &config,
            move |update| {
                // A closed receiver only means nobody is listening any more.
                let _ = updates.send(Ok(update));
            },
        )
        .await;
        match result {
            Ok(report) => debug!(
                "Streaming run {} finished with {} cards",
                report.run_id,
                report.flashcards.len()
            ),
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }
    });

    Ok(Box::pin(UnboundedReceiverStream::new(rx)))
}
