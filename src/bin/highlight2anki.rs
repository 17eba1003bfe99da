//! CLI binary for highlight2anki.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `FlashcardConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use highlight2anki::{
    clear_history, generate_flashcards, history_count, inspect, record_rename, tracked_files,
    undo_last, DeckFormat, FlashcardConfig, IdentityPolicy, PageSelection, ProgressCallback,
    RunOutcome, RunProgressCallback, RunStats,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Shorten to `max` characters with an ellipsis.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Terminal progress callback: a live progress bar plus one log line per
/// highlight that reached the model.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-highlight wall-clock start times, keyed by index.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` tells us how many highlights there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading highlights…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} highlights  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Generating");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_highlights: usize, total_batches: usize) {
        self.activate_bar(total_highlights);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{total_highlights} highlights in {total_batches} batches…"
            ))
        ));
    }

    fn on_highlight_start(&self, index: usize, _total: usize, page: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(format!("page {page}"));
    }

    fn on_highlight_skipped(&self, index: usize, _total: usize, _page: usize) {
        self.elapsed_secs(index);
        self.bar.inc(1);
    }

    fn on_highlight_complete(&self, index: usize, total: usize, page: usize, cards: usize) {
        let secs = self.elapsed_secs(index);
        let mark = if cards == 0 { dim("○") } else { green("✓") };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  page {:<4}  {:<9}  {}",
            mark,
            index,
            total,
            page,
            dim(&format!("{cards} cards")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_highlight_error(&self, index: usize, total: usize, page: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  page {:<4}  {}  {}",
            red("✗"),
            index,
            total,
            page,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, batch: usize, total_batches: usize, cards_so_far: usize) {
        self.bar.println(dim(&format!(
            "  ─ batch {batch}/{total_batches} done, {cards_so_far} cards in deck"
        )));
    }

    fn on_run_complete(&self, _stats: &RunStats) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Cards for every new highlight, written to "My Flashcards.txt"
  highlight2anki generate book.pdf

  # German cards into a named deck, straight into a running Anki
  highlight2anki generate --language German --deck "Biologie" --format anki-connect book.pdf

  # Only chapters on pages 40-85, with context snapshots
  highlight2anki generate --pages 40-85 --media-dir ./media book.pdf

  # Which highlights are new?
  highlight2anki inspect book.pdf

  # Forget the last 3 processed highlights so they are regenerated
  highlight2anki history undo -n 3 book.pdf

  # Tell the ledger a PDF was moved
  highlight2anki renamed old/book.pdf new/book.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  H2A_PROVIDER            Provider (openai, anthropic, gemini, ollama, …)
  H2A_MODEL               Model ID (default gpt-4.1-nano)
  LLM_PROVIDER            Legacy alias of H2A_PROVIDER
  H2A_LEDGER              Ledger file (default: per-user data directory)
  PDFIUM_LIB_PATH         Path to libpdfium when it is not installed system-wide

A .env file in the working directory is loaded at startup.
"#;

/// Turn PDF highlights into Anki flashcards with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "highlight2anki",
    version,
    about = "Turn PDF highlights into Anki flashcards with an LLM",
    long_about = "Reads the highlight annotations of a PDF, asks an LLM to write \
question/answer flashcards for each new highlight, and exports them for Anki. A ledger \
remembers processed highlights, so re-running only pays for new ones.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ledger file (SQLite).
    #[arg(long, global = true, env = "H2A_LEDGER")]
    ledger: Option<PathBuf>,

    /// How PDF identities are derived. Must match the ledger's first run.
    #[arg(long, global = true, env = "H2A_IDENTITY", value_enum, default_value = "file-bytes")]
    identity: IdentityArg,

    /// Pages hashed by `--identity leading-text`.
    #[arg(long, global = true, env = "H2A_LEADING_PAGES",
          default_value_t = IdentityPolicy::DEFAULT_LEADING_PAGES)]
    leading_pages: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "H2A_PASSWORD")]
    password: Option<String>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "H2A_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "H2A_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate flashcards for every new highlight.
    Generate(GenerateArgs),

    /// List highlights and whether they were already processed.
    Inspect {
        pdf: PathBuf,

        /// Page selection: all, 5, 3-15, or 1,3,5,7.
        #[arg(long, default_value = "all")]
        pages: String,

        /// Output JSON.
        #[arg(long)]
        json: bool,
    },

    /// Count or reset the processed-highlight history of a PDF.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Record that a tracked PDF was moved or renamed.
    Renamed { old: PathBuf, new: PathBuf },

    /// List the PDFs the ledger knows about.
    Tracked {
        /// Output JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    /// Number of processed highlights.
    Count { pdf: PathBuf },
    /// Forget every processed highlight.
    Clear { pdf: PathBuf },
    /// Forget the N most recently processed highlights.
    Undo {
        pdf: PathBuf,
        #[arg(short, default_value_t = 1)]
        n: usize,
    },
}

#[derive(Args, Debug)]
struct GenerateArgs {
    pdf: PathBuf,

    /// Language the cards are written in.
    #[arg(short, long, env = "H2A_LANGUAGE", default_value = "English")]
    language: String,

    /// Anki deck name.
    #[arg(short, long, env = "H2A_DECK", default_value = "My Flashcards")]
    deck: String,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "H2A_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "H2A_MODEL")]
    model: Option<String>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "H2A_PAGES", default_value = "all")]
    pages: String,

    /// Pages of context on each side of a highlight.
    #[arg(long, env = "H2A_CONTEXT_RADIUS", default_value_t = 1)]
    context_radius: usize,

    /// Highlights per batch; the deck is exported after each.
    #[arg(long, env = "H2A_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Retries per highlight on LLM failure.
    #[arg(long, env = "H2A_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Backoff before the first retry (ms), doubled each retry.
    #[arg(long, env = "H2A_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Minimum gap between LLM calls (ms).
    #[arg(long, env = "H2A_CALL_DELAY_MS", default_value_t = 1000)]
    call_delay_ms: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "H2A_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "H2A_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens per highlight.
    #[arg(long, env = "H2A_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Text file with a custom prompt template (must contain {highlight}).
    #[arg(long, env = "H2A_PROMPT_TEMPLATE")]
    prompt_template: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, env = "H2A_FORMAT", value_enum, default_value = "anki-text")]
    format: FormatArg,

    /// Directory deck files are written to.
    #[arg(short, long, env = "H2A_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Write context snapshots here and attach them to cards.
    #[arg(long, env = "H2A_MEDIA_DIR")]
    media_dir: Option<PathBuf>,

    /// Render context snapshots in grayscale.
    #[arg(long, env = "H2A_GRAYSCALE")]
    grayscale: bool,

    /// JPEG quality of context snapshots (1–100).
    #[arg(long, env = "H2A_IMAGE_QUALITY", default_value_t = 10)]
    image_quality: u8,

    /// AnkiConnect endpoint for `--format anki-connect`.
    #[arg(long, env = "H2A_ANKI_CONNECT_URL", default_value = highlight2anki::config::DEFAULT_ANKI_CONNECT_URL)]
    anki_connect_url: String,

    /// Print the run report as JSON.
    #[arg(long, env = "H2A_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "H2A_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum IdentityArg {
    FileBytes,
    LeadingText,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    AnkiText,
    Json,
    AnkiConnect,
}

impl From<FormatArg> for DeckFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::AnkiText => DeckFormat::AnkiText,
            FormatArg::Json => DeckFormat::Json,
            FormatArg::AnkiConnect => DeckFormat::AnkiConnect,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = match &cli.command {
        Command::Generate(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Generate(args) => run_generate(&cli, args, show_progress).await,
        Command::Inspect { pdf, pages, json } => {
            let config = base_config(&cli)
                .pages(parse_pages(pages)?)
                .build()
                .context("Invalid configuration")?;
            let (pdf_identity, statuses) = inspect(pdf, &config)
                .await
                .context("Failed to inspect PDF")?;
            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&statuses).context("Failed to serialise highlights")?
                );
                return Ok(());
            }
            let seen = statuses.iter().filter(|s| s.seen).count();
            println!("File:        {}", pdf.display());
            println!("PDF ID:      {}", pdf_identity);
            println!(
                "Highlights:  {} ({} new, {} processed)",
                statuses.len(),
                statuses.len() - seen,
                seen
            );
            for s in &statuses {
                let h = &s.highlight;
                println!(
                    "  {} page {:<4} {}  {}",
                    if s.seen { dim("✓") } else { cyan("●") },
                    h.page_number,
                    dim(h.highlight_identity.short()),
                    truncate(&h.text, 60)
                );
            }
            Ok(())
        }
        Command::History { action } => {
            let config = base_config(&cli).build().context("Invalid configuration")?;
            match action {
                HistoryAction::Count { pdf } => {
                    let n = history_count(pdf, &config).await.context("Failed to count history")?;
                    println!("{n}");
                }
                HistoryAction::Clear { pdf } => {
                    let n = clear_history(pdf, &config).await.context("Failed to clear history")?;
                    if !cli.quiet {
                        eprintln!("{} forgot {} processed highlights", green("✔"), bold(&n.to_string()));
                    }
                }
                HistoryAction::Undo { pdf, n } => {
                    let removed = undo_last(pdf, *n, &config)
                        .await
                        .context("Failed to undo history")?;
                    if !cli.quiet {
                        eprintln!(
                            "{} forgot the last {} processed highlights",
                            green("✔"),
                            bold(&removed.to_string())
                        );
                    }
                }
            }
            Ok(())
        }
        Command::Renamed { old, new } => {
            let config = base_config(&cli).build().context("Invalid configuration")?;
            let notice = record_rename(old.clone(), new, &config)
                .await
                .context("Failed to record rename")?;
            if !cli.quiet {
                eprintln!(
                    "{} {}  {} → {}",
                    green("✔"),
                    dim(notice.identity.short()),
                    notice.old_path.display(),
                    bold(&notice.new_path.display().to_string())
                );
            }
            Ok(())
        }
        Command::Tracked { json } => {
            let config = base_config(&cli).build().context("Invalid configuration")?;
            let files = tracked_files(&config).context("Failed to read tracked files")?;
            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&files).context("Failed to serialise tracked files")?
                );
            } else {
                for f in &files {
                    let alias = f.alias.as_deref().map(|a| format!("  ({a})")).unwrap_or_default();
                    println!("{}  {}{}", dim(f.pdf_identity.short()), f.path.display(), alias);
                }
            }
            Ok(())
        }
    }
}

async fn run_generate(cli: &Cli, args: &GenerateArgs, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, args, progress_cb).await?;

    let report = generate_flashcards(&args.pdf, &config)
        .await
        .context("Flashcard generation failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise run report")?
        );
    }

    let stats = &report.stats;
    let destination = report
        .export
        .as_ref()
        .map(|e| e.destination.clone())
        .unwrap_or_else(|| "-".to_string());
    if !cli.quiet {
        match report.outcome() {
            RunOutcome::NoNewHighlights => eprintln!(
                "{} no new highlights  {}",
                cyan("◆"),
                dim(&format!("({} already processed)", stats.skipped))
            ),
            RunOutcome::Complete => eprintln!(
                "{}  {} highlights → {} cards  {}ms  →  {}",
                green("✔"),
                stats.recorded,
                bold(&stats.cards.to_string()),
                stats.duration_ms,
                bold(&destination)
            ),
            RunOutcome::PartialFailure => {
                eprintln!(
                    "{}  {} highlights → {} cards, {} failed  →  {}",
                    cyan("⚠"),
                    stats.recorded,
                    bold(&stats.cards.to_string()),
                    red(&stats.failed.to_string()),
                    bold(&destination)
                );
                eprintln!("   {}", dim("failed highlights were not recorded; re-run to retry them"));
            }
            RunOutcome::AllFailed => {}
        }
        if stats.empty_responses > 0 {
            eprintln!(
                "   {}",
                dim(&format!("{} highlights produced no card", stats.empty_responses))
            );
        }
        if stats.image_failures > 0 {
            eprintln!(
                "   {}",
                cyan(&format!(
                    "{} context images could not be rendered; their cards have no image",
                    stats.image_failures
                ))
            );
        }
    }

    if report.outcome() == RunOutcome::AllFailed {
        let first = report
            .failures
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!(
            "all {} new highlights failed after {} retries; first error: {}",
            stats.failed,
            config.max_retries,
            first
        );
    }
    Ok(())
}

/// Settings shared by every subcommand.
fn base_config(cli: &Cli) -> highlight2anki::FlashcardConfigBuilder {
    let policy = match cli.identity {
        IdentityArg::FileBytes => IdentityPolicy::FileBytes,
        IdentityArg::LeadingText => IdentityPolicy::LeadingText {
            pages: cli.leading_pages,
        },
    };
    let mut builder = FlashcardConfig::builder().identity_policy(policy);
    if let Some(ref path) = cli.ledger {
        builder = builder.ledger_path(path);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    builder
}

/// Map CLI args to `FlashcardConfig`.
async fn build_config(
    cli: &Cli,
    args: &GenerateArgs,
    progress: Option<ProgressCallback>,
) -> Result<FlashcardConfig> {
    let mut builder = base_config(cli)
        .language(&args.language)
        .deck_name(&args.deck)
        .pages(parse_pages(&args.pages)?)
        .context_radius(args.context_radius)
        .batch_size(args.batch_size)
        .max_retries(args.max_retries)
        .retry_backoff_ms(args.retry_backoff_ms)
        .call_delay_ms(args.call_delay_ms)
        .api_timeout_secs(args.api_timeout)
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .format(args.format.into())
        .output_dir(&args.output_dir)
        .grayscale_images(args.grayscale)
        .image_quality(args.image_quality)
        .anki_connect_url(&args.anki_connect_url);

    if let Some(ref path) = args.prompt_template {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.prompt_template(template);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref dir) = args.media_dir {
        builder = builder.media_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    PageSelection::parse(s).with_context(|| format!("Invalid --pages value '{s}'"))
}
