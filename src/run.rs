//! Run-level entry points: generate a deck, inspect a PDF, manage history.
//!
//! ## Why two layers?
//!
//! [`generate_flashcards`] is the convenience API: give it a path and a
//! config, it opens the ledger, loads the PDF with pdfium, resolves the
//! provider and exporter, and returns a [`RunReport`]. [`generate_with`] is
//! the same run with every collaborator injected (any [`PdfSource`], any
//! [`TextGenerator`], any [`DeckExporter`]), which is what tests and
//! embedders that already hold a ledger use.
//!
//! Fatal problems (missing file, unconfigured provider, ledger failure,
//! export failure) come back as `Err(FlashcardError)`. Per-highlight failures
//! do not: they are listed in [`RunReport::failures`] and the run continues.

use crate::batch::BatchDriver;
use crate::config::FlashcardConfig;
use crate::error::FlashcardError;
use crate::export::{exporter_for, DeckExporter};
use crate::identity::{derive_pdf_identity, IdentityPolicy, PdfIdentity};
use crate::ledger::{Ledger, RenameNotice, TrackedFile};
use crate::output::{BatchUpdate, ContextRecord, HighlightRecord, HighlightStatus, RunReport};
use crate::pipeline::context::build_context;
use crate::pipeline::llm::{resolve_generator, TextGenerator};
use crate::pipeline::render::{ContextImager, PageWindowImager};
use crate::pipeline::{extract, input};
use crate::prompts::DEFAULT_PROMPT_TEMPLATE;
use crate::source::PdfSource;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Open the configured ledger and pin the identity policy.
pub fn open_ledger(config: &FlashcardConfig) -> Result<Ledger, FlashcardError> {
    let path = config.resolved_ledger_path()?;
    let ledger = Ledger::open(&path)?;
    ledger.bind_identity_policy(config.identity_policy)?;
    debug!("Using ledger {}", path.display());
    Ok(ledger)
}

/// Generate flashcards for every new highlight in the PDF at `path`.
///
/// # Returns
/// `Ok(RunReport)` even when some highlights failed; check
/// [`RunReport::outcome`].
///
/// # Errors
/// Returns `Err(FlashcardError)` only for fatal errors:
/// - file not found / not a PDF / wrong password
/// - provider not configured
/// - ledger unavailable or bound to a different identity policy
/// - the exporter rejected the deck
pub async fn generate_flashcards(
    path: impl AsRef<Path>,
    config: &FlashcardConfig,
) -> Result<RunReport, FlashcardError> {
    let pdf_path = input::resolve_local(path)?;
    info!("Generating flashcards for {}", pdf_path.display());

    // Configuration problems surface before any PDF work.
    let generator = resolve_generator(config)?;
    let exporter = exporter_for(config)?;
    let ledger = open_ledger(config)?;

    let source = extract::load_pdf(&pdf_path, config.password.as_deref()).await?;
    generate_with(&source, &ledger, generator.as_ref(), Some(exporter.as_ref()), config).await
}

/// Synchronous wrapper around [`generate_flashcards`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_flashcards_sync(
    path: impl AsRef<Path>,
    config: &FlashcardConfig,
) -> Result<RunReport, FlashcardError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FlashcardError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(generate_flashcards(path, config))
}

/// Run the pipeline over an already-loaded source with injected collaborators.
///
/// `exporter = None` keeps the cards in the report only.
pub async fn generate_with(
    source: &dyn PdfSource,
    ledger: &Ledger,
    generator: &dyn TextGenerator,
    exporter: Option<&dyn DeckExporter>,
    config: &FlashcardConfig,
) -> Result<RunReport, FlashcardError> {
    generate_with_updates(source, ledger, generator, exporter, config, |_| {}).await
}

/// [`generate_with`], calling `on_batch` after every batch.
pub async fn generate_with_updates<F>(
    source: &dyn PdfSource,
    ledger: &Ledger,
    generator: &dyn TextGenerator,
    exporter: Option<&dyn DeckExporter>,
    config: &FlashcardConfig,
    on_batch: F,
) -> Result<RunReport, FlashcardError>
where
    F: FnMut(BatchUpdate),
{
    let pdf_identity = identify_source(source, ledger, config)?;
    let contexts = highlight_contexts(source, &pdf_identity, config);
    info!(
        "{}: {} highlights selected (PDF {})",
        source.path().display(),
        contexts.len(),
        pdf_identity.short()
    );

    let imager = config.media_dir.as_ref().map(|dir| {
        PageWindowImager::new(
            source.path(),
            config.password.clone(),
            dir,
            config.grayscale_images,
            config.image_quality,
        )
    });

    let run_id = uuid::Uuid::new_v4().to_string();
    let driver = BatchDriver {
        generator,
        ledger,
        exporter,
        imager: imager.as_ref().map(|i| i as &dyn ContextImager),
        progress: config.progress_callback.as_deref(),
        template: config
            .prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE),
        language: &config.language,
        retry: config.retry_policy(),
        call_delay: config.call_delay(),
        deck_name: &config.deck_name,
        pdf_path: source.path(),
        run_id: &run_id,
    };
    let out = driver
        .run_with(&contexts, config.batch_size, on_batch)
        .await?;

    let report = RunReport {
        run_id,
        pdf_identity,
        pdf_path: source.path().to_path_buf(),
        flashcards: out.flashcards,
        stats: out.stats,
        failures: out.failures,
        export: out.export,
    };
    info!(
        "Run complete: {} recorded, {} skipped, {} failed, {} cards in {}ms",
        report.stats.recorded,
        report.stats.skipped,
        report.stats.failed,
        report.stats.cards,
        report.stats.duration_ms
    );
    Ok(report)
}

/// Derive the source's identity and remember where it currently lives.
pub fn identify_source(
    source: &dyn PdfSource,
    ledger: &Ledger,
    config: &FlashcardConfig,
) -> Result<PdfIdentity, FlashcardError> {
    let pdf_identity = derive_pdf_identity(config.identity_policy, source);
    ledger.track_file(&pdf_identity, source.path(), None)?;
    Ok(pdf_identity)
}

/// Highlights on the selected pages, in page order, with their context.
pub fn highlight_contexts(
    source: &dyn PdfSource,
    pdf_identity: &PdfIdentity,
    config: &FlashcardConfig,
) -> Vec<ContextRecord> {
    let page_count = source.page_count();
    source
        .list_highlights()
        .iter()
        .filter(|raw| config.pages.includes(raw.page_number, page_count))
        .map(|raw| {
            build_context(
                source,
                HighlightRecord::from_raw(pdf_identity, raw),
                config.context_radius,
            )
        })
        .collect()
}

// ── Inspection ───────────────────────────────────────────────────────────

/// Every highlight on the selected pages and whether the ledger has seen it.
///
/// Does not require an LLM provider.
pub async fn inspect(
    path: impl AsRef<Path>,
    config: &FlashcardConfig,
) -> Result<(PdfIdentity, Vec<HighlightStatus>), FlashcardError> {
    let pdf_path = input::resolve_local(path)?;
    let ledger = open_ledger(config)?;
    let source = extract::load_pdf(&pdf_path, config.password.as_deref()).await?;
    let pdf_identity = identify_source(&source, &ledger, config)?;
    let statuses = highlight_statuses(&source, &pdf_identity, &ledger, config)?;
    Ok((pdf_identity, statuses))
}

pub fn highlight_statuses(
    source: &dyn PdfSource,
    pdf_identity: &PdfIdentity,
    ledger: &Ledger,
    config: &FlashcardConfig,
) -> Result<Vec<HighlightStatus>, FlashcardError> {
    let page_count = source.page_count();
    source
        .list_highlights()
        .iter()
        .filter(|raw| config.pages.includes(raw.page_number, page_count))
        .map(|raw| {
            let highlight = HighlightRecord::from_raw(pdf_identity, raw);
            let seen = ledger.exists(&highlight.highlight_identity)?;
            Ok(HighlightStatus { highlight, seen })
        })
        .collect()
}

// ── History management ───────────────────────────────────────────────────

/// Identity of the PDF at `path` under the configured policy.
///
/// The file-bytes policy only hashes the file; the leading-text policy needs
/// pdfium to extract text.
pub async fn identify(path: impl AsRef<Path>, config: &FlashcardConfig) -> Result<PdfIdentity, FlashcardError> {
    let pdf_path = input::resolve_local(path)?;
    match config.identity_policy {
        IdentityPolicy::FileBytes => {
            let bytes = tokio::fs::read(&pdf_path).await.map_err(|e| {
                FlashcardError::Internal(format!("read {}: {e}", pdf_path.display()))
            })?;
            Ok(PdfIdentity::from_bytes(&bytes))
        }
        IdentityPolicy::LeadingText { .. } => {
            let source = extract::load_pdf(&pdf_path, config.password.as_deref()).await?;
            Ok(derive_pdf_identity(config.identity_policy, &source))
        }
    }
}

/// Number of highlights recorded for the PDF at `path`.
pub async fn history_count(path: impl AsRef<Path>, config: &FlashcardConfig) -> Result<usize, FlashcardError> {
    let pdf = identify(path, config).await?;
    Ok(open_ledger(config)?.count_for(&pdf, None)?)
}

/// Forget every recorded highlight of the PDF at `path`.
pub async fn clear_history(path: impl AsRef<Path>, config: &FlashcardConfig) -> Result<usize, FlashcardError> {
    let pdf = identify(path, config).await?;
    let deleted = open_ledger(config)?.delete_for(&pdf)?;
    info!("Cleared {} highlights for {}", deleted, pdf.short());
    Ok(deleted)
}

/// Forget the `n` most recently recorded highlights of the PDF at `path`.
pub async fn undo_last(
    path: impl AsRef<Path>,
    n: usize,
    config: &FlashcardConfig,
) -> Result<usize, FlashcardError> {
    let pdf = identify(path, config).await?;
    let deleted = open_ledger(config)?.delete_last_n(&pdf, n)?;
    info!("Removed the last {} highlights for {}", deleted, pdf.short());
    Ok(deleted)
}

/// Apply a file-move notification for the PDF now at `new_path`.
///
/// Identity never depends on the path, so this only refreshes the tracked
/// location; recorded highlights are untouched.
pub async fn record_rename(
    old_path: impl Into<PathBuf>,
    new_path: impl AsRef<Path>,
    config: &FlashcardConfig,
) -> Result<RenameNotice, FlashcardError> {
    let new_path = input::resolve_local(new_path)?;
    let identity = identify(&new_path, config).await?;
    let notice = RenameNotice {
        identity,
        old_path: old_path.into(),
        new_path,
    };
    let was_tracked = open_ledger(config)?.apply_rename(&notice)?;
    if !was_tracked {
        debug!("{} was not tracked before the rename", notice.identity.short());
    }
    Ok(notice)
}

/// Every PDF the ledger knows about.
pub fn tracked_files(config: &FlashcardConfig) -> Result<Vec<TrackedFile>, FlashcardError> {
    Ok(open_ledger(config)?.tracked_files()?)
}
