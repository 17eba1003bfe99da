//! Whole-pipeline tests with in-memory collaborators.
//!
//! No pdfium and no network: documents are hand-built [`LoadedPdf`]s, the
//! generator is a stub keyed on the highlighted text, and the exporter
//! records every deck it is handed.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use highlight2anki::{
    generate_with, DeckExporter, DeckRequest, ExportSummary, FlashcardConfig, FlashcardError,
    GenerationError, HighlightRecord, IdentityPolicy, Ledger, LedgerError, LoadedPdf, PageSelection,
    PdfIdentity, RawHighlight, Rect, RunOutcome, RunProgressCallback, RunStats, TextGenerator,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Answers by the highlighted text found in the prompt. Texts mapped to
/// `None` fail on every call.
#[derive(Default)]
struct StubGenerator {
    answers: Vec<(String, Option<String>)>,
    prompts: Mutex<Vec<String>>,
}

impl StubGenerator {
    fn answering(pairs: &[(&str, Option<&str>)]) -> Self {
        Self {
            answers: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
                .collect(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        for (needle, answer) in &self.answers {
            if prompt.contains(needle.as_str()) {
                return answer
                    .clone()
                    .ok_or_else(|| GenerationError::Provider("503 Service Unavailable".into()));
            }
        }
        Ok("Q: Generic?\nA: Generic.".into())
    }
}

#[derive(Default)]
struct RecordingExporter {
    decks: Mutex<Vec<Vec<(String, String, usize)>>>,
}

#[async_trait]
impl DeckExporter for RecordingExporter {
    async fn export(&self, request: &DeckRequest<'_>) -> Result<ExportSummary, FlashcardError> {
        let deck = request
            .cards
            .iter()
            .map(|c| (c.question.clone(), c.answer.clone(), c.page_number))
            .collect();
        self.decks.lock().unwrap().push(deck);
        Ok(ExportSummary {
            destination: format!("memory:{}", request.deck_name),
            cards: request.cards.len(),
        })
    }
}

fn sink(exporter: &RecordingExporter) -> Option<&dyn DeckExporter> {
    Some(exporter)
}

fn rect(n: f64) -> Rect {
    Rect::new(72.0, 100.0 + n * 20.0, 300.0, 114.0 + n * 20.0)
}

fn document(path: &str, pages: usize, highlights: Vec<RawHighlight>) -> LoadedPdf {
    LoadedPdf::new(
        path,
        format!("%PDF-1.7 {pages} pages").into_bytes(),
        (1..=pages).map(|i| format!("Body text of page {i}.")).collect(),
        highlights,
    )
}

fn fast_config() -> FlashcardConfig {
    FlashcardConfig::builder()
        .call_delay_ms(0)
        .retry_backoff_ms(0)
        .max_retries(2)
        .build()
        .unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_highlight_becomes_one_card_and_is_recorded() {
    let pdf = document("/books/ten.pdf", 10, vec![RawHighlight::new(5, rect(0.0), "X is Y")]);
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::answering(&[("X is Y", Some("Q: What is X?\nA: X is Y."))]);
    let exporter = RecordingExporter::default();

    let report = generate_with(&pdf, &ledger, &generator, sink(&exporter), &fast_config())
        .await
        .unwrap();

    assert_eq!(report.flashcards.len(), 1);
    let card = &report.flashcards[0];
    assert_eq!(card.question, "What is X?");
    assert_eq!(card.answer, "X is Y.");
    assert_eq!(card.page_number, 5);
    assert_eq!(card.pdf_identity, PdfIdentity::from_bytes(b"%PDF-1.7 10 pages"));
    assert!(ledger.exists(&card.highlight_identity).unwrap());
    assert_eq!(report.outcome(), RunOutcome::Complete);
    assert_eq!(exporter.decks.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let pdf = document("/books/ten.pdf", 10, vec![RawHighlight::new(5, rect(0.0), "X is Y")]);
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::answering(&[("X is Y", Some("Q: What is X?\nA: X is Y."))]);
    let exporter = RecordingExporter::default();
    let config = fast_config();

    let first = generate_with(&pdf, &ledger, &generator, sink(&exporter), &config)
        .await
        .unwrap();
    let pdf_identity = first.pdf_identity.clone();
    let count_after_first = ledger.count_for(&pdf_identity, None).unwrap();

    let second = generate_with(&pdf, &ledger, &generator, sink(&exporter), &config)
        .await
        .unwrap();

    assert!(second.flashcards.is_empty());
    assert_eq!(second.stats.skipped, 1);
    assert_eq!(second.outcome(), RunOutcome::NoNewHighlights);
    assert_eq!(generator.calls(), 1, "second run must not call the generator");
    assert_eq!(ledger.count_for(&pdf_identity, None).unwrap(), count_after_first);
    // Nothing new, nothing re-exported.
    assert_eq!(exporter.decks.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn one_permanent_failure_does_not_abort_the_run() {
    let pdf = document(
        "/books/b.pdf",
        6,
        vec![
            RawHighlight::new(1, rect(0.0), "alpha"),
            RawHighlight::new(2, rect(1.0), "broken"),
            RawHighlight::new(3, rect(2.0), "gamma"),
            RawHighlight::new(4, rect(3.0), "delta"),
        ],
    );
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::answering(&[
        ("alpha", Some("Q: a?\nA: a.")),
        ("broken", None),
        ("gamma", Some("Q: g?\nA: g.")),
        ("delta", Some("Q: d?\nA: d.")),
    ]);
    let config = fast_config();

    let report = generate_with(&pdf, &ledger, &generator, None, &config)
        .await
        .unwrap();

    assert_eq!(report.outcome(), RunOutcome::PartialFailure);
    assert_eq!(report.stats.recorded, 3);
    assert_eq!(report.stats.failed, 1);
    let pages: Vec<usize> = report.flashcards.iter().map(|c| c.page_number).collect();
    assert_eq!(pages, vec![1, 3, 4]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].page(), 2);
    assert!(report.failures[0].to_string().contains("503"));
    // max_retries = 2 → three attempts for the broken highlight.
    assert_eq!(generator.calls(), 3 + 3);
    assert_eq!(ledger.count_for(&report.pdf_identity, None).unwrap(), 3);

    // The failed highlight is retried on the next run, and only it.
    let retry = StubGenerator::answering(&[("broken", Some("Q: fixed?\nA: yes."))]);
    let second = generate_with(&pdf, &ledger, &retry, None, &config)
        .await
        .unwrap();
    assert_eq!(retry.calls(), 1);
    assert_eq!(second.flashcards.len(), 1);
    assert_eq!(second.flashcards[0].page_number, 2);
    assert_eq!(second.outcome(), RunOutcome::Complete);
}

#[tokio::test]
async fn all_failed_is_reported_as_such() {
    let pdf = document("/books/b.pdf", 2, vec![RawHighlight::new(1, rect(0.0), "broken")]);
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::answering(&[("broken", None)]);

    let report = generate_with(&pdf, &ledger, &generator, None, &fast_config())
        .await
        .unwrap();

    assert_eq!(report.outcome(), RunOutcome::AllFailed);
    assert!(report.flashcards.is_empty());
    assert!(report.export.is_none());
}

#[tokio::test]
async fn unproductive_highlight_is_recorded_and_not_retried() {
    let pdf = document("/books/b.pdf", 3, vec![RawHighlight::new(2, rect(0.0), "filler")]);
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::answering(&[("filler", Some("Nothing worth asking here."))]);
    let config = fast_config();

    let first = generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();
    let second = generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();

    assert_eq!(first.stats.recorded, 1);
    assert_eq!(first.stats.empty_responses, 1);
    assert!(first.flashcards.is_empty());
    assert_eq!(second.stats.skipped, 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn incomplete_trailing_card_is_not_exported() {
    let pdf = document("/books/b.pdf", 3, vec![RawHighlight::new(1, rect(0.0), "mixed")]);
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::answering(&[(
        "mixed",
        Some("Q: Kept?\nA: Yes.\n---\nQ: Second?\nA: Also.\n---\nQ: Dangling?"),
    )]);
    let exporter = RecordingExporter::default();

    let report = generate_with(&pdf, &ledger, &generator, sink(&exporter), &fast_config())
        .await
        .unwrap();

    assert_eq!(report.flashcards.len(), 2);
    let decks = exporter.decks.lock().unwrap();
    assert_eq!(
        decks[0],
        vec![
            ("Kept?".to_string(), "Yes.".to_string(), 1),
            ("Second?".to_string(), "Also.".to_string(), 1)
        ]
    );
}

#[tokio::test]
async fn deck_is_exported_after_every_productive_batch() {
    let highlights = (1..=5)
        .map(|i| RawHighlight::new(i, rect(i as f64), format!("fact number {i}")))
        .collect();
    let pdf = document("/books/b.pdf", 5, highlights);
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::default();
    let exporter = RecordingExporter::default();
    let config = FlashcardConfig::builder()
        .call_delay_ms(0)
        .batch_size(2)
        .build()
        .unwrap();

    let report = generate_with(&pdf, &ledger, &generator, sink(&exporter), &config)
        .await
        .unwrap();

    let sizes: Vec<usize> = exporter.decks.lock().unwrap().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 4, 5]);
    assert_eq!(report.stats.batches, 3);
    assert_eq!(report.stats.exports, 3);
    assert_eq!(report.export.as_ref().map(|e| e.cards), Some(5));
}

#[tokio::test]
async fn context_window_is_clamped_at_document_start() {
    let pdf = document("/books/b.pdf", 10, vec![RawHighlight::new(1, rect(0.0), "opening line")]);
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::default();
    let config = FlashcardConfig::builder()
        .call_delay_ms(0)
        .context_radius(3)
        .build()
        .unwrap();

    generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();

    let prompt = generator.prompts.lock().unwrap()[0].clone();
    for page in 1..=4 {
        assert!(prompt.contains(&format!("Body text of page {page}.")), "page {page} missing");
    }
    assert!(!prompt.contains("Body text of page 5."));
}

#[tokio::test]
async fn page_selection_limits_highlights() {
    let pdf = document(
        "/books/b.pdf",
        6,
        vec![
            RawHighlight::new(1, rect(0.0), "one"),
            RawHighlight::new(3, rect(0.0), "three"),
            RawHighlight::new(5, rect(0.0), "five"),
        ],
    );
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::default();
    let config = FlashcardConfig::builder()
        .call_delay_ms(0)
        .pages(PageSelection::Range(2, 5))
        .build()
        .unwrap();

    let report = generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();

    assert_eq!(report.stats.total_highlights, 2);
    let pages: Vec<usize> = report.flashcards.iter().map(|c| c.page_number).collect();
    assert_eq!(pages, vec![3, 5]);
}

#[tokio::test]
async fn renamed_file_keeps_its_history() {
    let highlights = vec![RawHighlight::new(2, rect(0.0), "portable")];
    let original = document("/old/place.pdf", 4, highlights.clone());
    let moved = document("/new/elsewhere.pdf", 4, highlights);
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::default();
    let config = fast_config();

    let first = generate_with(&original, &ledger, &generator, None, &config).await.unwrap();
    let second = generate_with(&moved, &ledger, &generator, None, &config).await.unwrap();

    assert_eq!(first.pdf_identity, second.pdf_identity);
    assert_eq!(second.stats.skipped, 1);
    assert_eq!(generator.calls(), 1);
    assert_eq!(
        ledger.tracked_path(&second.pdf_identity).unwrap().as_deref(),
        Some(std::path::Path::new("/new/elsewhere.pdf"))
    );
}

#[tokio::test]
async fn undo_last_makes_highlights_new_again() {
    let highlights = (1..=5)
        .map(|i| RawHighlight::new(i, rect(0.0), format!("H{i}")))
        .collect::<Vec<_>>();
    let pdf = document("/books/b.pdf", 5, highlights.clone());
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::default();
    let config = fast_config();

    let report = generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();
    assert_eq!(ledger.delete_last_n(&report.pdf_identity, 2).unwrap(), 2);

    let ids: Vec<_> = highlights
        .iter()
        .map(|raw| HighlightRecord::from_raw(&report.pdf_identity, raw).highlight_identity)
        .collect();
    let present: Vec<bool> = ids.iter().map(|id| ledger.exists(id).unwrap()).collect();
    assert_eq!(present, vec![true, true, true, false, false]);

    let rerun = generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();
    let pages: Vec<usize> = rerun.flashcards.iter().map(|c| c.page_number).collect();
    assert_eq!(pages, vec![4, 5]);
}

#[tokio::test]
async fn progress_callback_sees_every_highlight() {
    #[derive(Default)]
    struct Counts {
        started: AtomicUsize,
        skipped: AtomicUsize,
        completed: AtomicUsize,
        errors: AtomicUsize,
        batches: AtomicUsize,
        finished: Mutex<Option<RunStats>>,
    }

    impl RunProgressCallback for Counts {
        fn on_highlight_start(&self, _i: usize, _t: usize, _p: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_highlight_skipped(&self, _i: usize, _t: usize, _p: usize) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
        fn on_highlight_complete(&self, _i: usize, _t: usize, _p: usize, _c: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_highlight_error(&self, _i: usize, _t: usize, _p: usize, _e: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_batch_complete(&self, _b: usize, _t: usize, _c: usize) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }
        fn on_run_complete(&self, stats: &RunStats) {
            *self.finished.lock().unwrap() = Some(stats.clone());
        }
    }

    let pdf = document(
        "/books/b.pdf",
        3,
        vec![
            RawHighlight::new(1, rect(0.0), "ok one"),
            RawHighlight::new(2, rect(0.0), "broken"),
            RawHighlight::new(3, rect(0.0), "ok two"),
        ],
    );
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::answering(&[("broken", None)]);
    let counts = Arc::new(Counts::default());
    let config = FlashcardConfig::builder()
        .call_delay_ms(0)
        .retry_backoff_ms(0)
        .max_retries(0)
        .batch_size(2)
        .progress_callback(counts.clone())
        .build()
        .unwrap();

    generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();
    generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();

    // Second run: two skipped, the broken one fails again.
    assert_eq!(counts.started.load(Ordering::SeqCst), 6);
    assert_eq!(counts.completed.load(Ordering::SeqCst), 2);
    assert_eq!(counts.skipped.load(Ordering::SeqCst), 2);
    assert_eq!(counts.errors.load(Ordering::SeqCst), 2);
    assert_eq!(counts.batches.load(Ordering::SeqCst), 4);
    let last = counts.finished.lock().unwrap().clone().unwrap();
    assert_eq!((last.skipped, last.failed, last.recorded), (2, 1, 0));
}

#[tokio::test]
async fn ledger_refuses_a_second_identity_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.sqlite3");
    let pdf = document("/books/b.pdf", 6, vec![RawHighlight::new(1, rect(0.0), "x")]);

    {
        let ledger = Ledger::open(&path).unwrap();
        ledger.bind_identity_policy(IdentityPolicy::FileBytes).unwrap();
        let generator = StubGenerator::default();
        generate_with(&pdf, &ledger, &generator, None, &fast_config())
            .await
            .unwrap();
    }

    let reopened = Ledger::open(&path).unwrap();
    let err = reopened
        .bind_identity_policy(IdentityPolicy::LeadingText { pages: 5 })
        .unwrap_err();
    assert!(matches!(err, LedgerError::PolicyMismatch { .. }));
}

#[tokio::test]
async fn history_survives_reopening_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.sqlite3");
    let pdf = document("/books/b.pdf", 2, vec![RawHighlight::new(1, rect(0.0), "durable")]);
    let generator = StubGenerator::default();
    let config = fast_config();

    {
        let ledger = Ledger::open(&path).unwrap();
        generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();
    }
    let ledger = Ledger::open(&path).unwrap();
    let again = generate_with(&pdf, &ledger, &generator, None, &config).await.unwrap();

    assert_eq!(again.stats.skipped, 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn identical_text_twice_on_a_page_is_two_highlights() {
    let pdf = document(
        "/books/b.pdf",
        2,
        vec![
            RawHighlight::new(1, rect(0.0), "repeated phrase"),
            RawHighlight::new(1, rect(5.0), "repeated phrase"),
        ],
    );
    let ledger = Ledger::open_in_memory().unwrap();
    let generator = StubGenerator::default();

    let report = generate_with(&pdf, &ledger, &generator, None, &fast_config())
        .await
        .unwrap();

    assert_eq!(report.stats.recorded, 2);
    let ids: HashMap<_, _> = report
        .flashcards
        .iter()
        .map(|c| (c.highlight_identity.clone(), ()))
        .collect();
    assert_eq!(ids.len(), 2);
}
