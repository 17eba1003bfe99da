//! Pipeline stages for turning highlights into flashcards.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ context ──▶ generate ──────────────────▶ (batch driver)
//! (path)    (pdfium)    (window)    │  llm + retry + parse  │
//!                                   └─▶ ledger.record ──────┘
//! ```
//!
//! 1. [`input`]    validate the path and `%PDF` magic
//! 2. [`extract`]  page text and highlight annotations via pdfium, in
//!    `spawn_blocking`
//! 3. [`context`]  clamp the page window and gather its text
//! 4. [`generate`] the per-highlight state machine: prompt, [`llm`] call under
//!    [`retry`], [`parse`] the response, record in the ledger
//! 5. [`render`]   optional context images for highlights that produced cards

pub mod context;
pub mod extract;
pub mod generate;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
pub mod retry;
