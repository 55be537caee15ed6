//! CLI binary for mdingest.
//!
//! A thin shim over the library crate: maps flags to `IngestConfig`,
//! resolves the LLM provider once, runs each source through the pipeline
//! and writes or prints the rendered artifact.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use mdingest::provider::resolve_provider;
use mdingest::{
    convert_source, write_artifact, ContentKind, Conversion, IngestConfig, IngestError,
    OutputFormat, OutputNames, PipelineObserver, Step,
};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

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

/// Shorten long messages to one terminal line.
fn clip(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}\u{2026}", s.chars().take(max - 1).collect::<String>())
    } else {
        s.to_string()
    }
}

// ── Terminal observer using indicatif ────────────────────────────────────────

/// Spinner that follows the pipeline stages of the current source and logs
/// fallbacks, vision page failures and enrichment degradation above it.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn println(&self, line: String) {
        self.bar.println(line);
    }
}

impl PipelineObserver for CliObserver {
    fn on_stage_start(&self, source: &str, step: Step) {
        self.bar.set_prefix(clip(source, 48));
        self.bar.set_message(step.to_string());
    }

    fn on_fallback(&self, _source: &str, engine: &str, reason: &str) {
        self.println(format!(
            "  {} {}  {}",
            cyan("⚠"),
            clip(reason, 80),
            dim(&format!("→ {engine}"))
        ));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        self.bar
            .set_message(format!("transcribing page {page_num}/{total_pages}"));
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        self.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&clip(error, 80)),
        ));
    }

    fn on_enrichment_degraded(&self, _source: &str, reason: &str) {
        self.println(format!(
            "  {} AI enrichment skipped, default metadata kept: {}",
            cyan("⚠"),
            dim(&clip(reason, 80))
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF to plain text on stdout
  mdingest pdf paper.pdf

  # arXiv paper to an Obsidian note (writes <suggested-name>.md)
  mdingest --format markdown pdf https://arxiv.org/abs/1706.03762

  # Web page to JSON, no AI metadata
  mdingest --format json --disable-ai-generation web example.com/blog/post

  # Several pages into a directory
  mdingest --format markdown -o notes/ web https://a.example https://b.example

  # Scanned PDF without the vision fallback
  mdingest pdf --no-vision-fallback scan.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (enrichment + vision fallback)
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Provider override, used together with EDGEQUAKE_MODEL
  EDGEQUAKE_MODEL         Model override
  FIRECRAWL_API_KEY       Firecrawl key for the web fallback
  FIRECRAWL_API_URL       Firecrawl endpoint (default https://api.firecrawl.dev)
  PDFIUM_LIB_PATH         Directory or file of the pdfium shared library
  MDINGEST_*              Every flag, e.g. MDINGEST_FORMAT=markdown

A .env file in the working directory is loaded first.
"#;

/// Convert PDFs and web pages to Markdown notes with metadata.
#[derive(Parser, Debug)]
#[command(
    name = "mdingest",
    version,
    about = "Convert PDFs and web pages to Markdown notes with metadata",
    long_about = "Convert PDFs (local files, URLs, arXiv links) and web pages to plain text, \
Markdown with YAML frontmatter, or JSON. A fast local engine runs first; a vision LLM \
(PDF) or Firecrawl (web) takes over when its output is too thin.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output format.
    #[arg(long, global = true, env = "MDINGEST_FORMAT", value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Output file (one source) or directory (several sources).
    #[arg(short, long, global = true, env = "MDINGEST_OUTPUT")]
    output: Option<PathBuf>,

    /// Skip the AI metadata call; metadata is derived from the content only.
    #[arg(long, global = true, env = "MDINGEST_DISABLE_AI_GENERATION")]
    disable_ai_generation: bool,

    /// Log level (RUST_LOG overrides).
    #[arg(long, global = true, env = "MDINGEST_LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,

    /// Also write logs to this file, without colours.
    #[arg(long, global = true, env = "MDINGEST_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "MDINGEST_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "MDINGEST_PROVIDER")]
    provider: Option<String>,

    /// Characters of text sent to the AI metadata call.
    #[arg(long, global = true, env = "MDINGEST_EXCERPT_CHARS", default_value_t = 2000)]
    excerpt_chars: usize,

    /// Minimum non-whitespace characters before the fallback engine is tried.
    #[arg(long, global = true, env = "MDINGEST_MIN_CONTENT_CHARS", default_value_t = 64)]
    min_content_chars: usize,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "MDINGEST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// LLM call timeout in seconds.
    #[arg(long, global = true, env = "MDINGEST_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Download attempts for remote sources.
    #[arg(long, global = true, env = "MDINGEST_RETRIES", default_value_t = 3)]
    retries: u32,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MDINGEST_QUIET")]
    quiet: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "MDINGEST_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert PDF files, PDF URLs or arXiv links.
    Pdf(PdfArgs),
    /// Scrape web pages.
    Web(WebArgs),
}

#[derive(Args, Debug)]
struct PdfArgs {
    /// Local paths or http(s) URLs.
    #[arg(required = true)]
    sources: Vec<String>,

    /// Only convert the first N pages.
    #[arg(long, env = "MDINGEST_MAX_PAGES")]
    max_pages: Option<usize>,

    /// Password for encrypted PDFs.
    #[arg(long, env = "MDINGEST_PASSWORD")]
    password: Option<String>,

    /// Never fall back to the vision LLM.
    #[arg(long, env = "MDINGEST_NO_VISION_FALLBACK")]
    no_vision_fallback: bool,

    /// Rendering DPI for the vision fallback (72–400).
    #[arg(long, env = "MDINGEST_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Concurrent vision LLM calls.
    #[arg(short, long, env = "MDINGEST_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Retries per page on vision LLM failure.
    #[arg(long, env = "MDINGEST_PAGE_RETRIES", default_value_t = 3)]
    page_retries: u32,

    /// Directory or file of the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct WebArgs {
    /// URLs (https:// is assumed when the scheme is missing).
    #[arg(required = true)]
    sources: Vec<String>,

    /// Milliseconds Firecrawl waits for client-side rendering.
    #[arg(long, env = "MDINGEST_WAIT_FOR", default_value_t = 5000)]
    wait_for: u64,

    /// Firecrawl API key for the fallback engine.
    #[arg(long, env = "FIRECRAWL_API_KEY")]
    firecrawl_api_key: Option<String>,

    /// Firecrawl API base URL.
    #[arg(long, env = "FIRECRAWL_API_URL")]
    firecrawl_api_url: Option<String>,

    /// Keep navigation, headers and footers.
    #[arg(long, env = "MDINGEST_FULL_PAGE")]
    full_page: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Command {
    fn kind(&self) -> ContentKind {
        match self {
            Command::Pdf(_) => ContentKind::Pdf,
            Command::Web(_) => ContentKind::Html,
        }
    }

    fn sources(&self) -> &[String] {
        match self {
            Command::Pdf(a) => &a.sources,
            Command::Web(a) => &a.sources,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}: {e:#}", red("error[config]"));
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when at least one source failed.
async fn run(cli: Cli) -> Result<bool> {
    let to_stdout = cli.output.is_none() && cli.format != OutputFormat::Markdown;
    let show_progress =
        !cli.quiet && !cli.no_progress && !(to_stdout && cli.format == OutputFormat::Json);

    init_logging(&cli, show_progress)?;

    let observer = show_progress.then(CliObserver::new);
    let config = build_config(&cli, observer.clone())?;

    let sources = cli.command.sources();
    let kind = cli.command.kind();
    let several = sources.len() > 1;
    let mut failures = 0usize;
    let mut names = OutputNames::new();

    for source in sources {
        match convert_source(kind, source, &config).await {
            Ok(doc) => {
                if let Err(e) = emit(&cli, &doc, several, &mut names, observer.as_deref()).await {
                    failures += 1;
                    report_error(&e, source, observer.as_deref());
                }
            }
            Err(e) => {
                failures += 1;
                report_error(&e, source, observer.as_deref());
            }
        }
    }

    if let Some(obs) = &observer {
        obs.bar.finish_and_clear();
    }
    if several && !cli.quiet {
        let ok = sources.len() - failures;
        eprintln!(
            "{} {}/{} sources converted",
            if failures == 0 { green("✔") } else { cyan("⚠") },
            bold(&ok.to_string()),
            sources.len()
        );
    }
    Ok(failures == 0)
}

fn init_logging(cli: &Cli, show_progress: bool) -> Result<()> {
    // Library INFO logs would fight with the spinner; it gives the feedback.
    let default_level = match cli.log_level {
        Some(level) => level.as_str(),
        None if cli.quiet => "error",
        None if show_progress => "warn",
        None => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Map CLI args to `IngestConfig`, resolving the LLM provider when a stage
/// will use it.
fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<IngestConfig> {
    let enrich = !cli.disable_ai_generation;
    let mut builder = IngestConfig::builder()
        .enrich(enrich)
        .excerpt_chars(cli.excerpt_chars)
        .min_content_chars(cli.min_content_chars)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .fetch_attempts(cli.retries);

    let mut needs_llm = enrich;
    match &cli.command {
        Command::Pdf(a) => {
            builder = builder
                .vision_fallback(!a.no_vision_fallback)
                .dpi(a.dpi)
                .concurrency(a.concurrency)
                .max_retries(a.page_retries);
            if let Some(n) = a.max_pages {
                builder = builder.max_pages(n);
            }
            if let Some(pwd) = &a.password {
                builder = builder.password(pwd.clone());
            }
            if let Some(path) = &a.pdfium_lib {
                builder = builder.pdfium_lib_path(path.clone());
            }
            needs_llm |= !a.no_vision_fallback;
        }
        Command::Web(a) => {
            builder = builder
                .firecrawl_wait_for_ms(a.wait_for)
                .only_main_content(!a.full_page);
            if let Some(key) = &a.firecrawl_api_key {
                builder = builder.firecrawl_api_key(key.clone());
            }
            if let Some(url) = &a.firecrawl_api_url {
                builder = builder.firecrawl_api_url(url.clone());
            }
        }
    }

    if needs_llm {
        match resolve_provider(cli.provider.as_deref(), cli.model.as_deref()) {
            Ok(provider) => builder = builder.provider(provider),
            Err(hint) => warn!("No LLM provider: {hint}. AI stages will be skipped."),
        }
    } else {
        info!("AI generation disabled; no LLM provider resolved");
    }

    if let Some(obs) = observer {
        builder = builder.observer(obs as Arc<dyn PipelineObserver>);
    }
    builder.build().context("Invalid configuration")
}

/// Write or print one rendered document.
async fn emit(
    cli: &Cli,
    doc: &Conversion,
    several: bool,
    names: &mut OutputNames,
    observer: Option<&CliObserver>,
) -> Result<(), IngestError> {
    let artifact = doc.render(cli.format);
    let stem = doc.metadata.filename_suggestion.as_str();
    let ext = artifact.extension();

    let target: Option<PathBuf> = match &cli.output {
        Some(path) if several || path.is_dir() => Some(names.claim(path, stem, ext)),
        Some(path) => Some(path.clone()),
        // Markdown notes go next to the user, named after the document.
        None if cli.format == OutputFormat::Markdown => Some(names.claim(Path::new(""), stem, ext)),
        None => None,
    };

    match target {
        Some(path) => {
            write_artifact(&artifact, &path).await?;
            if !cli.quiet {
                let line = summary(doc, &path);
                match observer {
                    Some(obs) => obs.println(line),
                    None => eprintln!("{line}"),
                }
            }
        }
        None => {
            let text = artifact.as_str();
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            let written = handle.write_all(text.as_bytes()).and_then(|()| {
                // Keep the shell prompt off the last line.
                if text.is_empty() || text.ends_with('\n') {
                    Ok(())
                } else {
                    handle.write_all(b"\n")
                }
            });
            written.map_err(|e| IngestError::OutputWriteFailed {
                path: PathBuf::from("<stdout>"),
                source: e,
            })?;
            handle.flush().ok();
        }
    }
    Ok(())
}

fn summary(doc: &Conversion, path: &Path) -> String {
    format!(
        "{}  {}  {}  →  {}",
        green("✔"),
        clip(&doc.metadata.title, 60),
        dim(&format!(
            "{} words, {}, {}",
            doc.metadata.word_count,
            doc.content.engine,
            doc.enrichment.as_str()
        )),
        bold(&path.display().to_string()),
    )
}

fn report_error(err: &IngestError, source: &str, observer: Option<&CliObserver>) {
    let line = format!("{}: {source}: {err}", red(&format!("error[{}]", err.stage())));
    match observer {
        Some(obs) => obs.println(line),
        None => eprintln!("{line}"),
    }
}
