//! Error types for the highlight2anki library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`FlashcardError`]: **Fatal.** The run cannot proceed at all (bad input
//!   file, wrong password, provider not configured, ledger unavailable).
//!   Returned as `Err(FlashcardError)` from the top-level entry points.
//!
//! * [`HighlightError`]: **Non-fatal.** A single highlight failed (provider
//!   unreachable after every retry, context image could not be rendered) but
//!   the rest of the run is fine. Collected in
//!   [`crate::output::RunReport::failures`].
//!
//! * [`GenerationError`]: the error surface of the external text-generation
//!   capability. Every variant is treated as transient and retried; it only
//!   becomes a [`HighlightError`] once the retry budget is spent.

use crate::ledger::LedgerError;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the highlight2anki library.
#[derive(Debug, Error)]
pub enum FlashcardError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Install libpdfium system-wide or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The highlight ledger could not be read or written.
    #[error("Highlight ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // ── Output errors ─────────────────────────────────────────────────────
    /// The deck exporter rejected the flashcards.
    #[error("Failed to export deck to '{destination}': {detail}")]
    ExportFailed { destination: String, detail: String },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single highlight.
///
/// The run continues; the highlight is not recorded in the ledger (for
/// generation failures) so the next run retries it.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum HighlightError {
    /// Text generation failed on every attempt.
    #[error("Page {page}: generation failed after {attempts} attempts: {detail}")]
    GenerationFailed {
        page: usize,
        highlight: String,
        attempts: u32,
        detail: String,
    },

    /// The context image could not be rendered; cards are kept without it.
    #[error("Page {page}: context image failed: {detail}")]
    ContextImageFailed { page: usize, detail: String },
}

impl HighlightError {
    /// 1-indexed page the failing highlight sits on.
    pub fn page(&self) -> usize {
        match self {
            HighlightError::GenerationFailed { page, .. } => *page,
            HighlightError::ContextImageFailed { page, .. } => *page,
        }
    }
}

/// Failure of a single call to the text-generation capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The provider returned an error (network, rate limit, 5xx, bad payload).
    #[error("{0}")]
    Provider(String),

    /// The call did not complete within the configured timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_failed_display() {
        let e = HighlightError::GenerationFailed {
            page: 5,
            highlight: "abc123".into(),
            attempts: 4,
            detail: "connection refused".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 5"), "got: {msg}");
        assert!(msg.contains("4 attempts"), "got: {msg}");
        assert!(msg.contains("connection refused"), "got: {msg}");
        assert_eq!(e.page(), 5);
    }

    #[test]
    fn timeout_display() {
        let e = GenerationError::Timeout { secs: 120 };
        assert_eq!(e.to_string(), "timed out after 120s");
    }

    #[test]
    fn provider_not_configured_display() {
        let e = FlashcardError::ProviderNotConfigured {
            provider: "gemini".into(),
            hint: "Set GEMINI_API_KEY".into(),
        };
        assert!(e.to_string().contains("gemini"));
        assert!(e.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn ledger_error_converts() {
        let e: FlashcardError = LedgerError::PolicyMismatch {
            stored: "file-bytes/sha256".into(),
            requested: "leading-text-5/sha256".into(),
        }
        .into();
        assert!(matches!(e, FlashcardError::Ledger(_)));
        assert!(e.to_string().contains("file-bytes"));
    }

    #[test]
    fn highlight_error_serialises() {
        let e = HighlightError::ContextImageFailed {
            page: 2,
            detail: "render failed".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        assert!(json.contains("ContextImageFailed"));
    }
}
