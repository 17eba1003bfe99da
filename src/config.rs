//! Configuration types for a flashcard generation run.
//!
//! Every knob lives in [`FlashcardConfig`], built via
//! [`FlashcardConfigBuilder`]. Setters clamp out-of-range values; `build()`
//! rejects combinations that cannot work at all.
//!
//! # Storage location
//! The ledger path is an explicit value. When unset it resolves to
//! `<data_local_dir>/highlight2anki/ledger.sqlite3`, computed once by the
//! caller and then passed around like any other setting.

use crate::error::FlashcardError;
use crate::identity::IdentityPolicy;
use crate::pipeline::llm::TextGenerator;
use crate::pipeline::retry::RetryPolicy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default AnkiConnect endpoint.
pub const DEFAULT_ANKI_CONNECT_URL: &str = "http://127.0.0.1:8765";

/// Configuration for a flashcard generation run.
///
/// # Example
/// ```rust
/// use highlight2anki::FlashcardConfig;
///
/// let config = FlashcardConfig::builder()
///     .language("German")
///     .batch_size(5)
///     .context_radius(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 5);
/// ```
#[derive(Clone)]
pub struct FlashcardConfig {
    /// Language the cards are written in. Default: "English".
    pub language: String,

    /// Deck the cards are filed under. Default: "My Flashcards".
    pub deck_name: String,

    /// Pages on each side of a highlight included as context. Default: 1.
    pub context_radius: usize,

    /// Highlights per batch; the deck is exported after every batch. Default: 10.
    pub batch_size: usize,

    /// Retries after the first failed generation call. Default: 3.
    pub max_retries: u32,

    /// Backoff before the first retry, doubled each retry. Default: 1000 ms.
    pub retry_backoff_ms: u64,

    /// Upper bound for a single backoff delay. Default: 30 000 ms.
    pub max_backoff_ms: u64,

    /// Minimum gap between two generation calls, retries included. Default: 1000 ms.
    pub call_delay_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Maximum output tokens per call. Default: 1024.
    pub max_tokens: usize,

    /// Model identifier. `None` uses the provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "gemini", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed generator. Takes precedence over everything else.
    pub generator: Option<Arc<dyn TextGenerator>>,

    /// Custom prompt template. Must contain `{highlight}`.
    pub prompt_template: Option<String>,

    /// How PDF identities are derived. Pinned by the ledger on first use.
    pub identity_policy: IdentityPolicy,

    /// Ledger file. `None` uses [`default_ledger_path`].
    pub ledger_path: Option<PathBuf>,

    /// Directory deck files are written to. Default: ".".
    pub output_dir: PathBuf,

    /// Deck output format. Default: [`DeckFormat::AnkiText`].
    pub format: DeckFormat,

    /// Where context images go. `None` disables them.
    pub media_dir: Option<PathBuf>,

    /// Render context images in grayscale. Default: false.
    pub grayscale_images: bool,

    /// JPEG quality of context images (1–100). Default: 10.
    pub image_quality: u8,

    /// AnkiConnect endpoint for [`DeckFormat::AnkiConnect`].
    pub anki_connect_url: String,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Pages whose highlights are considered. Default: all.
    pub pages: PageSelection,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for FlashcardConfig {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
            deck_name: "My Flashcards".to_string(),
            context_radius: 1,
            batch_size: 10,
            max_retries: 3,
            retry_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            call_delay_ms: 1000,
            api_timeout_secs: 120,
            temperature: 0.3,
            max_tokens: 1024,
            model: None,
            provider_name: None,
            provider: None,
            generator: None,
            prompt_template: None,
            identity_policy: IdentityPolicy::default(),
            ledger_path: None,
            output_dir: PathBuf::from("."),
            format: DeckFormat::default(),
            media_dir: None,
            grayscale_images: false,
            image_quality: 10,
            anki_connect_url: DEFAULT_ANKI_CONNECT_URL.to_string(),
            password: None,
            pages: PageSelection::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FlashcardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashcardConfig")
            .field("language", &self.language)
            .field("deck_name", &self.deck_name)
            .field("context_radius", &self.context_radius)
            .field("batch_size", &self.batch_size)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("call_delay_ms", &self.call_delay_ms)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("generator", &self.generator.as_ref().map(|_| "<dyn TextGenerator>"))
            .field("identity_policy", &self.identity_policy)
            .field("ledger_path", &self.ledger_path)
            .field("format", &self.format)
            .field("media_dir", &self.media_dir)
            .field("pages", &self.pages)
            .finish()
    }
}

impl FlashcardConfig {
    pub fn builder() -> FlashcardConfigBuilder {
        FlashcardConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry schedule for generation calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }

    /// The configured ledger path, or the per-user default.
    pub fn resolved_ledger_path(&self) -> Result<PathBuf, FlashcardError> {
        match &self.ledger_path {
            Some(p) => Ok(p.clone()),
            None => default_ledger_path().ok_or_else(|| {
                FlashcardError::InvalidConfig(
                    "no per-user data directory on this platform; pass --ledger <PATH>".into(),
                )
            }),
        }
    }
}

/// `<data_local_dir>/highlight2anki/ledger.sqlite3`, if the platform has one.
pub fn default_ledger_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("highlight2anki").join("ledger.sqlite3"))
}

/// Builder for [`FlashcardConfig`].
pub struct FlashcardConfigBuilder {
    config: FlashcardConfig,
}

impl fmt::Debug for FlashcardConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashcardConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl FlashcardConfigBuilder {
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn deck_name(mut self, name: impl Into<String>) -> Self {
        self.config.deck_name = name.into();
        self
    }

    pub fn context_radius(mut self, pages: usize) -> Self {
        self.config.context_radius = pages.min(50);
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(20);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn call_delay_ms(mut self, ms: u64) -> Self {
        self.config.call_delay_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n.max(16);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.config.generator = Some(generator);
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn identity_policy(mut self, policy: IdentityPolicy) -> Self {
        self.config.identity_policy = policy;
        self
    }

    pub fn ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ledger_path = Some(path.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn format(mut self, format: DeckFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.media_dir = Some(dir.into());
        self
    }

    pub fn grayscale_images(mut self, v: bool) -> Self {
        self.config.grayscale_images = v;
        self
    }

    pub fn image_quality(mut self, q: u8) -> Self {
        self.config.image_quality = q.clamp(1, 100);
        self
    }

    pub fn anki_connect_url(mut self, url: impl Into<String>) -> Self {
        self.config.anki_connect_url = url.into();
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<FlashcardConfig, FlashcardError> {
        let c = &mut self.config;
        if c.language.trim().is_empty() {
            return Err(FlashcardError::InvalidConfig("language must not be empty".into()));
        }
        if c.deck_name.trim().is_empty() {
            return Err(FlashcardError::InvalidConfig("deck name must not be empty".into()));
        }
        if c.batch_size == 0 {
            return Err(FlashcardError::InvalidConfig("batch size must be ≥ 1".into()));
        }
        if let Some(t) = &c.prompt_template {
            if !t.contains(crate::prompts::HIGHLIGHT_PLACEHOLDER) {
                return Err(FlashcardError::InvalidConfig(format!(
                    "prompt template must contain {}",
                    crate::prompts::HIGHLIGHT_PLACEHOLDER
                )));
            }
        }
        if let IdentityPolicy::LeadingText { pages: 0 } = c.identity_policy {
            return Err(FlashcardError::InvalidConfig(
                "leading-text identity needs at least one page".into(),
            ));
        }
        if c.max_backoff_ms < c.retry_backoff_ms {
            c.max_backoff_ms = c.retry_backoff_ms;
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Where finished cards go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeckFormat {
    /// Anki's tab-separated plain-text import format (default).
    #[default]
    AnkiText,
    /// Pretty-printed JSON.
    Json,
    /// Push notes straight into a running Anki through AnkiConnect.
    AnkiConnect,
}

impl DeckFormat {
    /// File extension for file-based formats.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            DeckFormat::AnkiText => Some("txt"),
            DeckFormat::Json => Some("json"),
            DeckFormat::AnkiConnect => None,
        }
    }
}

/// Which pages' highlights a run considers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Whether the 1-indexed `page` of a `total_pages` document is selected.
    pub fn includes(&self, page: usize, total_pages: usize) -> bool {
        if page < 1 || page > total_pages {
            return false;
        }
        match self {
            PageSelection::All => true,
            PageSelection::Single(p) => *p == page,
            PageSelection::Range(start, end) => (*start..=*end).contains(&page),
            PageSelection::Set(pages) => pages.contains(&page),
        }
    }

    /// Parse `all`, `5`, `3-15` or `1,3,5`.
    pub fn parse(s: &str) -> Result<Self, FlashcardError> {
        let s = s.trim().to_lowercase();
        let page = |p: &str| -> Result<usize, FlashcardError> {
            let n: usize = p
                .trim()
                .parse()
                .map_err(|_| FlashcardError::InvalidConfig(format!("invalid page number '{}'", p.trim())))?;
            if n < 1 {
                return Err(FlashcardError::InvalidConfig(
                    "pages are 1-indexed, minimum is 1".into(),
                ));
            }
            Ok(n)
        };

        if s == "all" {
            return Ok(PageSelection::All);
        }
        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (page(start)?, page(end)?);
            if start > end {
                return Err(FlashcardError::InvalidConfig(format!(
                    "invalid page range '{start}-{end}': start must be <= end"
                )));
            }
            return Ok(PageSelection::Range(start, end));
        }
        if s.contains(',') {
            let pages = s.split(',').map(page).collect::<Result<Vec<_>, _>>()?;
            return Ok(PageSelection::Set(pages));
        }
        Ok(PageSelection::Single(page(&s)?))
    }
}
