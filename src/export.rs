//! Deck exporters: hand finished cards to something Anki can read.
//!
//! The batch driver calls [`DeckExporter::export`] after every batch that
//! added cards, always with the whole accumulated deck. File exporters
//! rewrite their file atomically each time, so a crash mid-run leaves the
//! previous complete deck on disk. The AnkiConnect exporter remembers how many
//! cards it has already pushed and only sends the rest.

use crate::config::{DeckFormat, FlashcardConfig};
use crate::error::FlashcardError;
use crate::output::{ExportSummary, FlashcardRecord};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Tag attached to every note pushed through AnkiConnect.
pub const NOTE_TAG: &str = "highlight2anki";

/// What an exporter receives. `cards` holds only valid records.
#[derive(Debug, Clone, Copy)]
pub struct DeckRequest<'a> {
    pub deck_name: &'a str,
    /// Current location of the source PDF, used for source links.
    pub pdf_path: &'a Path,
    /// Directory holding context images, if any were produced.
    pub media_dir: Option<&'a Path>,
    pub cards: &'a [FlashcardRecord],
}

#[async_trait]
pub trait DeckExporter: Send + Sync {
    async fn export(&self, request: &DeckRequest<'_>) -> Result<ExportSummary, FlashcardError>;
}

/// The exporter selected by `config.format`.
pub fn exporter_for(config: &FlashcardConfig) -> Result<Box<dyn DeckExporter>, FlashcardError> {
    let file_path = |ext: &str| {
        config
            .output_dir
            .join(format!("{}.{ext}", file_stem_for_deck(&config.deck_name)))
    };
    Ok(match config.format {
        DeckFormat::AnkiText => Box::new(AnkiTextExporter::new(file_path("txt"))),
        DeckFormat::Json => Box::new(JsonExporter::new(file_path("json"))),
        DeckFormat::AnkiConnect => Box::new(AnkiConnectExporter::new(&config.anki_connect_url)?),
    })
}

/// Deck name → safe file stem (`"Bio::Cells"` → `"Bio__Cells"`).
pub fn file_stem_for_deck(deck_name: &str) -> String {
    let stem: String = deck_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.trim_matches(['.', ' ']).is_empty() {
        "deck".to_string()
    } else {
        stem
    }
}

// ── Shared rendering helpers ─────────────────────────────────────────────

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("<br>"),
            '\t' | '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// `documentviewer://open?file=<path>&page=<n>`, query-encoded.
pub fn document_link(pdf_path: &Path, page: usize) -> String {
    let base = "documentviewer://open";
    match reqwest::Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("file", &pdf_path.to_string_lossy())
                .append_pair("page", &page.to_string());
            url.to_string()
        }
        Err(_) => format!("{base}?page={page}"),
    }
}

/// HTML for the Source field: provenance line, link back to the page, and
/// the context image if there is one.
pub fn source_field(card: &FlashcardRecord, pdf_path: &Path) -> String {
    let pdf_name = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| pdf_path.display().to_string());
    let mut html = format!(
        "PDF ID: {}, Page: {}<br><a href=\"{}\">{} (Page {})</a>",
        card.pdf_identity.short(),
        card.page_number,
        html_escape(&document_link(pdf_path, card.page_number)),
        html_escape(&pdf_name),
        card.page_number
    );
    if let Some(image) = &card.context_image {
        html.push_str(&format!("<br><img src=\"{}\">", html_escape(image)));
    }
    html
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), FlashcardError> {
    let write_err = |source: std::io::Error| FlashcardError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

// ── Anki plain-text import file ──────────────────────────────────────────

/// Writes Anki's tab-separated import format with `Front`, `Back` and
/// `Source` columns.
#[derive(Debug, Clone)]
pub struct AnkiTextExporter {
    path: PathBuf,
}

impl AnkiTextExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn render(request: &DeckRequest<'_>) -> String {
        let mut out = String::new();
        out.push_str("#separator:tab\n");
        out.push_str("#html:true\n");
        out.push_str(&format!("#deck:{}\n", request.deck_name.replace('\n', " ")));
        out.push_str("#columns:Front\tBack\tSource\n");
        for card in request.cards {
            out.push_str(&html_escape(&card.question));
            out.push('\t');
            out.push_str(&html_escape(&card.answer));
            out.push('\t');
            out.push_str(&source_field(card, request.pdf_path));
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl DeckExporter for AnkiTextExporter {
    async fn export(&self, request: &DeckRequest<'_>) -> Result<ExportSummary, FlashcardError> {
        let text = Self::render(request);
        write_atomically(&self.path, text.as_bytes())?;
        info!("Wrote {} cards to {}", request.cards.len(), self.path.display());
        Ok(ExportSummary {
            destination: self.path.display().to_string(),
            cards: request.cards.len(),
        })
    }
}

// ── JSON ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonDeck {
    pub deck: String,
    pub source_pdf: PathBuf,
    pub cards: Vec<FlashcardRecord>,
}

#[derive(Debug, Clone)]
pub struct JsonExporter {
    path: PathBuf,
}

impl JsonExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DeckExporter for JsonExporter {
    async fn export(&self, request: &DeckRequest<'_>) -> Result<ExportSummary, FlashcardError> {
        let deck = JsonDeck {
            deck: request.deck_name.to_string(),
            source_pdf: request.pdf_path.to_path_buf(),
            cards: request.cards.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&deck)
            .map_err(|e| FlashcardError::Internal(format!("serialise deck: {e}")))?;
        write_atomically(&self.path, &json)?;
        info!("Wrote {} cards to {}", request.cards.len(), self.path.display());
        Ok(ExportSummary {
            destination: self.path.display().to_string(),
            cards: request.cards.len(),
        })
    }
}

// ── AnkiConnect ──────────────────────────────────────────────────────────

/// Pushes notes into a running Anki through the AnkiConnect add-on.
pub struct AnkiConnectExporter {
    url: String,
    client: reqwest::Client,
    /// Cards of the accumulated deck already sent.
    pushed: tokio::sync::Mutex<usize>,
}

#[derive(Debug, Deserialize)]
struct AnkiConnectResponse {
    result: Value,
    error: Option<String>,
}

impl AnkiConnectExporter {
    pub fn new(url: impl Into<String>) -> Result<Self, FlashcardError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FlashcardError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
            pushed: tokio::sync::Mutex::new(0),
        })
    }

    async fn invoke(&self, action: &str, params: Value) -> Result<Value, FlashcardError> {
        let failed = |detail: String| FlashcardError::ExportFailed {
            destination: self.url.clone(),
            detail: format!("{action}: {detail}"),
        };
        let body = json!({ "action": action, "version": 6, "params": params });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        let parsed: AnkiConnectResponse = response.json().await.map_err(|e| failed(e.to_string()))?;
        match parsed.error {
            Some(err) => Err(failed(err)),
            None => Ok(parsed.result),
        }
    }

    /// The `addNotes` entry for one card.
    pub fn note_json(card: &FlashcardRecord, deck_name: &str, pdf_path: &Path) -> Value {
        json!({
            "deckName": deck_name,
            "modelName": "Basic",
            "fields": {
                "Front": html_escape(&card.question),
                "Back": format!(
                    "{}<br><br><small>{}</small>",
                    html_escape(&card.answer),
                    source_field(card, pdf_path)
                ),
            },
            "options": { "allowDuplicate": false },
            "tags": [NOTE_TAG],
        })
    }
}

#[async_trait]
impl DeckExporter for AnkiConnectExporter {
    async fn export(&self, request: &DeckRequest<'_>) -> Result<ExportSummary, FlashcardError> {
        let mut pushed = self.pushed.lock().await;
        let fresh = request.cards.get(*pushed..).unwrap_or(&[]);
        if fresh.is_empty() {
            return Ok(ExportSummary {
                destination: self.url.clone(),
                cards: *pushed,
            });
        }

        self.invoke("createDeck", json!({ "deck": request.deck_name })).await?;

        if let Some(media_dir) = request.media_dir {
            let images: BTreeSet<&str> = fresh
                .iter()
                .filter_map(|c| c.context_image.as_deref())
                .collect();
            for name in images {
                let bytes = tokio::fs::read(media_dir.join(name)).await.map_err(|e| {
                    FlashcardError::ExportFailed {
                        destination: self.url.clone(),
                        detail: format!("read {name}: {e}"),
                    }
                })?;
                self.invoke(
                    "storeMediaFile",
                    json!({ "filename": name, "data": STANDARD.encode(&bytes) }),
                )
                .await?;
                debug!("Stored media file {}", name);
            }
        }

        let notes: Vec<Value> = fresh
            .iter()
            .map(|c| Self::note_json(c, request.deck_name, request.pdf_path))
            .collect();
        let ids = self.invoke("addNotes", json!({ "notes": notes })).await?;
        let added = ids
            .as_array()
            .map(|a| a.iter().filter(|id| !id.is_null()).count())
            .unwrap_or(0);
        if added < fresh.len() {
            info!(
                "AnkiConnect accepted {}/{} notes (duplicates are rejected)",
                added,
                fresh.len()
            );
        }

        *pushed = request.cards.len();
        info!("Pushed {} cards to {}", fresh.len(), self.url);
        Ok(ExportSummary {
            destination: self.url.clone(),
            cards: *pushed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{HighlightIdentity, PdfIdentity, Rect};

    fn card(q: &str, a: &str, image: Option<&str>) -> FlashcardRecord {
        FlashcardRecord {
            question: q.into(),
            answer: a.into(),
            highlight_identity: HighlightIdentity::from_stored("h".repeat(64)),
            pdf_identity: PdfIdentity::from_bytes(b"book"),
            page_number: 5,
            rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            context_image: image.map(str::to_string),
        }
    }

    #[test]
    fn deck_names_become_safe_file_stems() {
        assert_eq!(file_stem_for_deck("My Flashcards"), "My Flashcards");
        assert_eq!(file_stem_for_deck("Bio::Cells/1"), "Bio__Cells_1");
        assert_eq!(file_stem_for_deck(".."), "deck");
    }

    #[test]
    fn document_link_encodes_path() {
        let link = document_link(Path::new("/home/me/My Book.pdf"), 12);
        assert!(link.starts_with("documentviewer://open?file="));
        assert!(link.contains("My+Book.pdf") || link.contains("My%20Book.pdf"));
        assert!(link.ends_with("&page=12"));
    }

    #[test]
    fn anki_text_escapes_fields() {
        let cards = [card("Is 1 < 2?", "Yes\tclearly\nalways", Some("context_ab12cd34.jpg"))];
        let req = DeckRequest {
            deck_name: "Deck",
            pdf_path: Path::new("/b/book.pdf"),
            media_dir: None,
            cards: &cards,
        };
        let text = AnkiTextExporter::render(&req);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("#separator:tab"));
        assert_eq!(lines.next(), Some("#html:true"));
        assert_eq!(lines.next(), Some("#deck:Deck"));
        assert_eq!(lines.next(), Some("#columns:Front\tBack\tSource"));
        let row: Vec<&str> = lines.next().unwrap().split('\t').collect();
        assert_eq!(row.len(), 3);
        assert_eq!(row[0], "Is 1 &lt; 2?");
        assert_eq!(row[1], "Yes clearly<br>always");
        assert!(row[2].contains("Page: 5"));
        assert!(row[2].contains("book.pdf (Page 5)"));
        assert!(row[2].contains("<img src=\"context_ab12cd34.jpg\">"));
    }

    #[tokio::test]
    async fn file_exporters_overwrite_with_full_deck() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("deck.txt");
        let exporter = AnkiTextExporter::new(&path);
        let mut cards = vec![card("Q1", "A1", None)];

        let req = DeckRequest {
            deck_name: "D",
            pdf_path: Path::new("b.pdf"),
            media_dir: None,
            cards: &cards,
        };
        exporter.export(&req).await.unwrap();
        cards.push(card("Q2", "A2", None));
        let req = DeckRequest {
            deck_name: "D",
            pdf_path: Path::new("b.pdf"),
            media_dir: None,
            cards: &cards,
        };
        let summary = exporter.export(&req).await.unwrap();

        assert_eq!(summary.cards, 2);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4 + 2);
    }

    #[tokio::test]
    async fn json_export_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.json");
        let cards = vec![card("Q", "A", None)];
        JsonExporter::new(&path)
            .export(&DeckRequest {
                deck_name: "D",
                pdf_path: Path::new("/x/b.pdf"),
                media_dir: None,
                cards: &cards,
            })
            .await
            .unwrap();
        let deck: JsonDeck = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(deck.deck, "D");
        assert_eq!(deck.cards, cards);
    }

    #[test]
    fn anki_connect_note_shape() {
        let note = AnkiConnectExporter::note_json(&card("Q", "A", None), "Deck", Path::new("b.pdf"));
        assert_eq!(note["deckName"], "Deck");
        assert_eq!(note["modelName"], "Basic");
        assert_eq!(note["fields"]["Front"], "Q");
        assert!(note["fields"]["Back"].as_str().unwrap().starts_with("A<br><br>"));
        assert_eq!(note["tags"][0], NOTE_TAG);
    }

    #[test]
    fn exporter_for_picks_file_name_from_deck() {
        let config = FlashcardConfig::builder()
            .output_dir("/tmp/decks")
            .format(DeckFormat::Json)
            .build()
            .unwrap();
        assert!(exporter_for(&config).is_ok());
    }
}
