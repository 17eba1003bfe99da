//! Response parsing: free model text → question/answer pairs.
//!
//! The accepted shape is the one [`crate::prompts`] asks for:
//!
//! ```text
//! Q: first question
//! A: first answer
//! ---
//! Q: second question
//! A: second answer
//! ```
//!
//! Models drift from that shape, so the parser also accepts markdown
//! emphasis or list bullets around the markers (`**Q:**`, `- A:`), CRLF line
//! endings, code fences, and questions or answers that wrap onto following
//! lines (continuation stops at a blank line). A `Q:` line also closes the
//! previous card, so the separator is optional in practice.
//!
//! Nothing here fails: a response without markers yields no cards, an answer
//! without a question is ignored, and a trailing question without an answer
//! is dropped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A card as it came out of the model, before provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCard {
    pub question: String,
    pub answer: String,
}

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[-*+>]\s+|\d+[.)]\s+)?(?:\*\*|__)?\s*([QqAa])\s*(?:\*\*|__)?\s*:\s*(?:\*\*|__)?\s*(.*)$")
        .expect("valid regex")
});

static SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:-{3,}|\*{3,}|_{3,})$").expect("valid regex"));

#[derive(Clone, Copy, PartialEq, Eq)]
enum Continuing {
    Nothing,
    Question,
    Answer,
}

#[derive(Default)]
struct Draft {
    question: String,
    answer: Option<String>,
}

impl Draft {
    fn finish(self) -> Option<ParsedCard> {
        let question = self.question.trim().to_string();
        let answer = self.answer?.trim().to_string();
        if question.is_empty() || answer.is_empty() {
            return None;
        }
        Some(ParsedCard { question, answer })
    }
}

fn append(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(line);
}

/// Parse every complete card out of a model response, in order.
pub fn parse_cards(response: &str) -> Vec<ParsedCard> {
    let mut cards = Vec::new();
    let mut draft: Option<Draft> = None;
    let mut continuing = Continuing::Nothing;

    for raw in response.lines() {
        let line = raw.trim();

        if line.starts_with("```") {
            continuing = Continuing::Nothing;
            continue;
        }
        if line.is_empty() {
            continuing = Continuing::Nothing;
            continue;
        }
        if SEPARATOR.is_match(line) {
            cards.extend(draft.take().and_then(Draft::finish));
            continuing = Continuing::Nothing;
            continue;
        }

        if let Some(caps) = MARKER.captures(line) {
            let rest = caps.get(2).map_or("", |m| m.as_str()).trim();
            let is_question = caps[1].eq_ignore_ascii_case("q");
            if is_question {
                cards.extend(draft.take().and_then(Draft::finish));
                draft = Some(Draft {
                    question: rest.to_string(),
                    answer: None,
                });
                continuing = Continuing::Question;
            } else {
                match draft.as_mut() {
                    Some(d) if d.answer.is_none() => {
                        d.answer = Some(rest.to_string());
                        continuing = Continuing::Answer;
                    }
                    // Answer without an open question.
                    _ => continuing = Continuing::Nothing,
                }
            }
            continue;
        }

        match (continuing, draft.as_mut()) {
            (Continuing::Question, Some(d)) => append(&mut d.question, line),
            (Continuing::Answer, Some(d)) => {
                if let Some(answer) = d.answer.as_mut() {
                    append(answer, line);
                }
            }
            _ => {}
        }
    }

    cards.extend(draft.and_then(Draft::finish));
    cards
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(q: &str, a: &str) -> ParsedCard {
        ParsedCard {
            question: q.into(),
            answer: a.into(),
        }
    }

    #[test]
    fn single_card() {
        assert_eq!(
            parse_cards("Q: What is X?\nA: X is Y."),
            vec![card("What is X?", "X is Y.")]
        );
    }

    #[test]
    fn several_cards_with_separators() {
        let text = "Q: One?\nA: 1\n---\nQ: Two?\nA: 2\n---\nQ: Three?\nA: 3\n";
        assert_eq!(
            parse_cards(text),
            vec![card("One?", "1"), card("Two?", "2"), card("Three?", "3")]
        );
    }

    #[test]
    fn consecutive_cards_without_separator() {
        let text = "Q: One?\nA: 1\nQ: Two?\nA: 2";
        assert_eq!(parse_cards(text), vec![card("One?", "1"), card("Two?", "2")]);
    }

    #[test]
    fn no_markers_yields_nothing() {
        assert!(parse_cards("I cannot make a flashcard from this.").is_empty());
        assert!(parse_cards("").is_empty());
    }

    #[test]
    fn trailing_question_without_answer_is_dropped() {
        let text = "Q: Kept?\nA: yes\n---\nQ: Dangling?";
        assert_eq!(parse_cards(text), vec![card("Kept?", "yes")]);
    }

    #[test]
    fn empty_answer_is_dropped() {
        assert!(parse_cards("Q: Anything?\nA:   ").is_empty());
    }

    #[test]
    fn orphan_answer_is_ignored() {
        let text = "A: floating answer\nQ: Real?\nA: real";
        assert_eq!(parse_cards(text), vec![card("Real?", "real")]);
    }

    #[test]
    fn second_answer_does_not_overwrite_first() {
        let text = "Q: Which?\nA: first\nA: second";
        assert_eq!(parse_cards(text), vec![card("Which?", "first")]);
    }

    #[test]
    fn markdown_decorations_are_tolerated() {
        let text = "**Q:** Bold question?\n**A:** Bold answer.\n\n- Q: Bullet?\n- A: Bullet answer.\n**Q**: Outside colon?\n**A**: ok";
        assert_eq!(
            parse_cards(text),
            vec![
                card("Bold question?", "Bold answer."),
                card("Bullet?", "Bullet answer."),
                card("Outside colon?", "ok"),
            ]
        );
    }

    #[test]
    fn crlf_and_code_fences() {
        let text = "```\r\nQ: Fenced?\r\nA: Yes.\r\n```\r\n";
        assert_eq!(parse_cards(text), vec![card("Fenced?", "Yes.")]);
    }

    #[test]
    fn continuation_lines_until_blank() {
        let text = "Q: What does the\nmembrane do?\nA: It separates\nthe cell from its surroundings.\n\nunrelated trailing prose";
        assert_eq!(
            parse_cards(text),
            vec![card(
                "What does the membrane do?",
                "It separates the cell from its surroundings."
            )]
        );
    }

    #[test]
    fn blank_line_between_question_and_answer() {
        assert_eq!(parse_cards("Q: Gap?\n\nA: fine"), vec![card("Gap?", "fine")]);
    }

    #[test]
    fn preamble_before_first_card_is_ignored() {
        let text = "Here are your flashcards:\n\nQ: [Biology] What is ATP?\nA: The cell's energy currency.";
        assert_eq!(
            parse_cards(text),
            vec![card("[Biology] What is ATP?", "The cell's energy currency.")]
        );
    }
}
