//! # mdingest
//!
//! Turn PDFs and web pages into Markdown notes with YAML frontmatter.
//!
//! ## Why two engines per source?
//!
//! Most documents convert fine with a fast, local engine: the PDF text
//! layer, or the HTML the server sent. Scanned PDFs and JavaScript-rendered
//! pages do not, and for those a slower engine exists (a vision LLM reading
//! rendered pages, or a headless-browser scrape). This crate runs the fast
//! engine first and only pays for the slow one when the fast output is
//! empty or too short to be useful.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source (path / URL)
//!  │
//!  ├─ 1. Fetch     validate local file or download with retry + backoff
//!  ├─ 2. Primary   pdfium text layer  │ HTML main content → Markdown
//!  ├─ 3. Fallback  vision LLM         │ Firecrawl scrape        (only if needed)
//!  ├─ 4. Metadata  title, authors, dates, language, word count (deterministic)
//!  ├─ 5. Enrich    one LLM call for filename, tags, description (optional)
//!  └─ 6. Render    text │ Markdown + frontmatter │ JSON
//! ```
//!
//! Stages 1 to 3 are fatal on failure. Enrichment never is: any error leaves
//! the deterministic metadata in place and the result is marked degraded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdingest::{scrape_page, IngestConfig, OutputFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::builder().enrich(false).build()?;
//!     let doc = scrape_page("https://example.com/blog/post", &config).await?;
//!     println!("{}", doc.render(OutputFormat::Markdown));
//!     eprintln!("{} words via {}", doc.metadata.word_count, doc.content.engine);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mdingest` binary (clap, anyhow, indicatif, tracing-subscriber, dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mdingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod source;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder, DEFAULT_FIRECRAWL_URL};
pub use convert::{
    convert_batch, convert_pdf, convert_source, convert_to_file, convert_with, scrape_page,
    write_artifact, BatchItem,
};
pub use document::{
    Conversion, ConversionMethod, ConvertedContent, DocumentInfo, EngineOutput, EnrichedMetadata,
    EnrichmentStatus, RawContent,
};
pub use error::{CompletionError, EngineError, ErrorKind, IngestError, PageError, Stage};
pub use output::{OutputArtifact, OutputFormat, OutputNames};
pub use pipeline::Converter;
pub use progress::{NoopObserver, PipelineObserver, Step};
pub use provider::{CompletionClient, LlmClient};
pub use source::{ContentKind, SourceReference, SourceType};
