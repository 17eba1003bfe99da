//! Progress-callback trait for per-highlight run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::FlashcardConfigBuilder::progress_callback`] to receive
//! events as the batch driver walks the highlight list.
//!
//! # Example
//!
//! ```rust
//! use highlight2anki::{FlashcardConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CardCounter {
//!     cards: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CardCounter {
//!     fn on_highlight_complete(&self, _index: usize, _total: usize, page: usize, cards: usize) {
//!         self.cards.fetch_add(cards, Ordering::SeqCst);
//!         eprintln!("page {page}: {cards} cards");
//!     }
//! }
//!
//! let config = FlashcardConfig::builder()
//!     .progress_callback(Arc::new(CardCounter { cards: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RunStats;
use std::sync::Arc;

/// Called by the batch driver as it processes each highlight.
///
/// Highlights are processed strictly in order, so events for one highlight
/// never interleave with another's. All methods default to no-ops.
///
/// `index` arguments are 1-based positions in the run's highlight list.
pub trait RunProgressCallback: Send + Sync {
    /// Called once, before the first highlight.
    fn on_run_start(&self, total_highlights: usize, total_batches: usize) {
        let _ = (total_highlights, total_batches);
    }

    /// Called before each highlight is looked up and, if new, generated.
    fn on_highlight_start(&self, index: usize, total: usize, page: usize) {
        let _ = (index, total, page);
    }

    /// The ledger already held this highlight; no call was made.
    fn on_highlight_skipped(&self, index: usize, total: usize, page: usize) {
        let _ = (index, total, page);
    }

    /// The highlight was recorded. `cards` may be zero.
    fn on_highlight_complete(&self, index: usize, total: usize, page: usize, cards: usize) {
        let _ = (index, total, page, cards);
    }

    /// Generation failed after every retry; the run continues.
    fn on_highlight_error(&self, index: usize, total: usize, page: usize, error: &str) {
        let _ = (index, total, page, error);
    }

    /// A batch finished and (if it added cards) was exported.
    ///
    /// * `batch`: 1-based batch number
    /// * `cards_so_far`: size of the accumulated deck after this batch
    fn on_batch_complete(&self, batch: usize, total_batches: usize, cards_so_far: usize) {
        let _ = (batch, total_batches, cards_so_far);
    }

    /// Called once after every highlight has been attempted.
    fn on_run_complete(&self, stats: &RunStats) {
        let _ = stats;
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::FlashcardConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
