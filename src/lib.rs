//! # highlight2anki
//!
//! Turn the passages you highlighted in a PDF into spaced-repetition
//! flashcards with an LLM, exactly once per highlight.
//!
//! ## Why this crate?
//!
//! Highlighting while reading is cheap; turning highlights into good review
//! cards is not. This crate reads the highlight annotations of a PDF, gives
//! each one to a language model together with the surrounding pages, and
//! parses question/answer cards out of the response. A persistent ledger
//! remembers every highlight already processed, so you can keep reading,
//! keep highlighting, and re-run on the same book: only new highlights cost
//! a model call.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     validate the path and %PDF magic
//!  ├─ 2. Extract   page text + highlight annotations via pdfium (spawn_blocking)
//!  ├─ 3. Identity  content hash of the PDF, tuple hash per highlight
//!  ├─ 4. Context   page window around each highlight
//!  ├─ 5. Generate  skip if in ledger → prompt → LLM (retry, paced) → parse → record
//!  ├─ 6. Batch     export the accumulated deck after every batch
//!  └─ 7. Export    Anki text file, JSON, or AnkiConnect
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use highlight2anki::{generate_flashcards, FlashcardConfig, RunOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = FlashcardConfig::builder()
//!         .deck_name("Cell Biology")
//!         .language("English")
//!         .build()?;
//!     let report = generate_flashcards("textbook.pdf", &config).await?;
//!     match report.outcome() {
//!         RunOutcome::NoNewHighlights => eprintln!("nothing new"),
//!         _ => eprintln!("{} cards, {} failed", report.stats.cards, report.stats.failed),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `highlight2anki` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! highlight2anki = { version = "0.1", default-features = false }
//! ```
//!
//! ## Exactly once
//!
//! A highlight is written to the ledger after its response is parsed, even
//! when the response held no card, and never when generation failed. Re-running
//! after a crash or a partial failure therefore retries exactly the highlights
//! that still need it.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod identity;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod source;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchDriver, BatchOutput};
pub use config::{DeckFormat, FlashcardConfig, FlashcardConfigBuilder, PageSelection};
pub use error::{FlashcardError, GenerationError, HighlightError};
pub use export::{AnkiConnectExporter, AnkiTextExporter, DeckExporter, DeckRequest, JsonExporter};
pub use identity::{derive_highlight_identity, derive_pdf_identity, HighlightIdentity, IdentityPolicy, PdfIdentity, Rect};
pub use ledger::{Ledger, LedgerEntry, LedgerError, RenameNotice, TrackedFile};
pub use output::{
    BatchUpdate, ContextRecord, ExportSummary, FlashcardRecord, HighlightRecord, HighlightStatus,
    RunOutcome, RunReport, RunStats,
};
pub use pipeline::llm::{LlmGenerator, TextGenerator};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use run::{
    clear_history, generate_flashcards, generate_flashcards_sync, generate_with, history_count,
    inspect, record_rename, tracked_files, undo_last,
};
pub use source::{LoadedPdf, PdfSource, RawHighlight};
pub use stream::{generate_stream, BatchStream};
