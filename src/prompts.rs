//! Prompt template and the marker syntax shared with the response parser.
//!
//! The markers below are a contract: [`crate::pipeline::parse`] recognises
//! exactly these, so changing one here without the other silently yields
//! zero cards per highlight.
//!
//! Callers can override the template via
//! [`crate::config::FlashcardConfig::prompt_template`]; the override must keep
//! the `{highlight}` placeholder.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Line prefix introducing a question.
pub const QUESTION_MARKER: &str = "Q:";

/// Line prefix introducing an answer.
pub const ANSWER_MARKER: &str = "A:";

/// Line on its own between two cards.
pub const CARD_SEPARATOR: &str = "---";

pub const CONTEXT_PLACEHOLDER: &str = "{context}";
pub const HIGHLIGHT_PLACEHOLDER: &str = "{highlight}";
pub const LANGUAGE_PLACEHOLDER: &str = "{language}";

/// Default template. Placeholders: `{context}`, `{highlight}`, `{language}`.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"Generate flashcards from the following context.

Context:
{context}

Put special emphasis on this passage, which I highlighted:
{highlight}

Write every flashcard in {language}.

Format each flashcard exactly like this:

Q: [Question]
A: [Answer]

When you produce more than one flashcard, put a line containing only --- between two flashcards. Do not add any other text before, between or after the flashcards.

Follow these principles:

1. Atomicity. If an answer needs more than two sentences, split it into several flashcards.
2. First principles. Do not hardcode facts; aim at the fundamentals of the topic so the answer can be reasoned out.
3. Multiple perspectives. Approach a concept, mechanism or result from different angles, for example one card on why a theorem holds and another on a concrete application of it.
4. Explicit antecedents. Every question must stand on its own: name the subject instead of writing "it", "this" or "the author".
5. Optional context. If the question would be ambiguous out of the document, start it with a short preamble in brackets, e.g. "[Cell biology] What ...".
"#;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(context|highlight|language)\}").expect("valid regex"));

/// Fill a template with a highlight, its context and the target language.
///
/// Placeholders are filled in a single pass; text inserted for one is never
/// scanned for the others.
pub fn build_prompt(template: &str, context: &str, highlight: &str, language: &str) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
            "context" => context.trim(),
            "highlight" => highlight.trim(),
            _ => language.trim(),
        })
        .into_owned()
}
