//! Stable identities for PDFs and for the highlights inside them.
//!
//! Both identities are SHA-256 digests rendered as lowercase hex. Neither
//! depends on the file's path, so renaming or moving a PDF never changes
//! which highlights count as already processed.
//!
//! ## PDF identity
//!
//! The policy is fixed per ledger (see [`IdentityPolicy`]): the ledger stores
//! the policy tag on first use and refuses to open with a different one,
//! because two policies produce unrelated identities for the same document.
//!
//! ## Highlight identity
//!
//! A digest over `(pdf_identity, page_number, normalized_rect, text)`. The
//! rectangle is quantized to hundredths of a point before hashing so that
//! floating-point jitter from the rendering library never yields two
//! identities for one visual highlight. Rect and text are both part of the
//! key: the same sentence highlighted twice, or the same box re-highlighted
//! over different text, are distinct highlights.

use crate::source::PdfSource;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Decimal places kept when normalizing rectangle coordinates.
pub const RECT_PRECISION: u32 = 2;

const RECT_SCALE: f64 = 100.0;

/// Field separator inside hashed tuples (ASCII unit separator).
const SEP: &[u8] = &[0x1f];

/// Prefix of every highlight digest. Bump when the hashed tuple changes.
const HIGHLIGHT_DOMAIN: &[u8] = b"highlight/v1";

// ── Identity newtypes ────────────────────────────────────────────────────

/// Content-derived identity of a PDF document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PdfIdentity(String);

impl PdfIdentity {
    /// Identity over the raw bytes of a document.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Identity over extracted text (whitespace-normalized first).
    pub fn from_text(text: &str) -> Self {
        Self::from_bytes(normalize_text(text).as_bytes())
    }

    /// Wrap a value read back from storage.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and terminal output.
    pub fn short(&self) -> &str {
        short(&self.0)
    }
}

impl fmt::Display for PdfIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic identity of one highlight within one PDF.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HighlightIdentity(String);

impl HighlightIdentity {
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        short(&self.0)
    }
}

impl fmt::Display for HighlightIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn short(s: &str) -> &str {
    s.get(..12).unwrap_or(s)
}

// ── Rectangles ───────────────────────────────────────────────────────────

/// Bounding box of a highlight in page coordinate space (PDF points).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Corner-ordered rectangle quantized to [`RECT_PRECISION`] decimals.
    pub fn normalized(&self) -> NormalizedRect {
        NormalizedRect([
            quantize(self.x0.min(self.x1)),
            quantize(self.y0.min(self.y1)),
            quantize(self.x0.max(self.x1)),
            quantize(self.y0.max(self.y1)),
        ])
    }
}

fn quantize(v: f64) -> i64 {
    if v.is_finite() {
        (v * RECT_SCALE).round() as i64
    } else {
        0
    }
}

/// A rectangle in hundredths of a point, `[x0, y0, x1, y1]` with `x0 <= x1`
/// and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NormalizedRect([i64; 4]);

impl NormalizedRect {
    pub fn to_rect(self) -> Rect {
        let [x0, y0, x1, y1] = self.0.map(|v| v as f64 / RECT_SCALE);
        Rect { x0, y0, x1, y1 }
    }

    /// Parse the `x0,y0,x1,y1` form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut out = [0i64; 4];
        let mut parts = s.split(',');
        for slot in out.iter_mut() {
            let value: f64 = parts.next()?.trim().parse().ok()?;
            *slot = quantize(value);
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self(out))
    }
}

impl fmt::Display for NormalizedRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let sign = if *v < 0 { "-" } else { "" };
            let abs = v.unsigned_abs();
            write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)?;
        }
        Ok(())
    }
}

// ── Derivation ───────────────────────────────────────────────────────────

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derive the highlight identity from its normalized tuple.
pub fn derive_highlight_identity(
    pdf: &PdfIdentity,
    page_number: usize,
    rect: &Rect,
    text: &str,
) -> HighlightIdentity {
    let mut hasher = Sha256::new();
    hasher.update(HIGHLIGHT_DOMAIN);
    hasher.update(SEP);
    hasher.update(pdf.as_str().as_bytes());
    hasher.update(SEP);
    hasher.update(page_number.to_string().as_bytes());
    hasher.update(SEP);
    hasher.update(rect.normalized().to_string().as_bytes());
    hasher.update(SEP);
    hasher.update(normalize_text(text).as_bytes());
    HighlightIdentity(hex::encode(hasher.finalize()))
}

/// How a [`PdfIdentity`] is computed. Fixed per ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdentityPolicy {
    /// SHA-256 of the file bytes. A re-save that rewrites bytes yields a new identity.
    #[default]
    FileBytes,
    /// SHA-256 of the extracted text of the first `pages` pages.
    ///
    /// Survives re-saves that only touch annotations or metadata, at the cost
    /// of merging documents whose opening pages are identical.
    LeadingText { pages: usize },
}

impl IdentityPolicy {
    /// Default page count for [`IdentityPolicy::LeadingText`].
    pub const DEFAULT_LEADING_PAGES: usize = 5;

    /// Stable tag persisted in the ledger.
    pub fn tag(&self) -> String {
        match self {
            IdentityPolicy::FileBytes => "file-bytes/sha256".to_string(),
            IdentityPolicy::LeadingText { pages } => format!("leading-text-{pages}/sha256"),
        }
    }
}

impl fmt::Display for IdentityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Derive the identity of a document under the given policy.
pub fn derive_pdf_identity(policy: IdentityPolicy, source: &dyn PdfSource) -> PdfIdentity {
    match policy {
        IdentityPolicy::FileBytes => PdfIdentity::from_bytes(source.content()),
        IdentityPolicy::LeadingText { pages } => {
            let last = pages.max(1).min(source.page_count().max(1));
            PdfIdentity::from_text(&source.page_text(1..=last))
        }
    }
}
