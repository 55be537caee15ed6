//! Pipeline entry points.
//!
//! [`convert_pdf`] and [`scrape_page`] are the two instantiations of one
//! pipeline, [`convert_with`], which takes the engines as trait objects so
//! callers can plug in their own converters:
//!
//! ```text
//! parse source ─▶ fetch ─▶ primary ─(insufficient)─▶ fallback ─▶ metadata ─▶ enrich
//! ```
//!
//! ## Fallback policy
//!
//! Primary output is *insufficient* when its plain text has fewer than
//! `min_content_chars` non-whitespace characters.
//!
//! 1. Primary succeeded and is sufficient: use it.
//! 2. Otherwise run the fallback, exactly once.
//! 3. Fallback produced text: use it.
//! 4. Fallback failed or came back empty, but the primary produced some
//!    text: keep the primary and warn.
//! 5. Otherwise fail with [`IngestError::ConversionFailed`], carrying both
//!    engines' messages. No artifact is produced.

use crate::config::IngestConfig;
use crate::document::{Conversion, ConversionMethod, ConvertedContent, EngineOutput, RawContent};
use crate::error::IngestError;
use crate::output::{OutputArtifact, OutputFormat};
use crate::pipeline::firecrawl::FirecrawlConverter;
use crate::pipeline::html::HtmlConverter;
use crate::pipeline::pdf_text::PdfTextConverter;
use crate::pipeline::postprocess::{clean_markdown, content_chars};
use crate::pipeline::vision::VisionConverter;
use crate::pipeline::{enrich, input, metadata, Converter};
use crate::progress::Step;
use crate::provider::{client_for, CompletionClient};
use crate::source::{ContentKind, SourceReference};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a PDF (local path, URL or arXiv link) to an enriched document.
///
/// # Example
/// ```rust,no_run
/// use mdingest::{convert_pdf, IngestConfig, OutputFormat};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IngestConfig::builder().enrich(false).build()?;
/// let doc = convert_pdf("https://arxiv.org/abs/1706.03762", &config).await?;
/// println!("{}", doc.render(OutputFormat::Markdown));
/// # Ok(())
/// # }
/// ```
pub async fn convert_pdf(
    input: impl AsRef<str>,
    config: &IngestConfig,
) -> Result<Conversion, IngestError> {
    convert_source(ContentKind::Pdf, input.as_ref(), config).await
}

/// Scrape a web page to an enriched document.
pub async fn scrape_page(
    input: impl AsRef<str>,
    config: &IngestConfig,
) -> Result<Conversion, IngestError> {
    convert_source(ContentKind::Html, input.as_ref(), config).await
}

/// Run the built-in engines for `kind`.
pub async fn convert_source(
    kind: ContentKind,
    input: &str,
    config: &IngestConfig,
) -> Result<Conversion, IngestError> {
    let completion = client_for(config.provider.as_ref());

    match kind {
        ContentKind::Pdf => {
            let primary = PdfTextConverter::new(config);
            let vision = config
                .vision_fallback
                .then(|| VisionConverter::new(completion.clone(), config));
            convert_with(
                kind,
                input,
                &primary,
                vision.as_ref().map(|v| v as &dyn Converter),
                completion.as_deref(),
                config,
            )
            .await
        }
        ContentKind::Html => {
            let primary = HtmlConverter::new(config.only_main_content);
            let firecrawl = FirecrawlConverter::new(config);
            convert_with(
                kind,
                input,
                &primary,
                Some(&firecrawl),
                completion.as_deref(),
                config,
            )
            .await
        }
    }
}

/// The generic pipeline: fetch, convert with fallback, extract metadata,
/// enrich.
///
/// `completion` is only used by the enrichment stage; pass `None` to have
/// enrichment degrade (or disable it in `config`).
pub async fn convert_with(
    kind: ContentKind,
    input: &str,
    primary: &dyn Converter,
    fallback: Option<&dyn Converter>,
    completion: Option<&dyn CompletionClient>,
    config: &IngestConfig,
) -> Result<Conversion, IngestError> {
    let start = Instant::now();
    info!("Starting {} pipeline: {}", kind.label(), input);

    let result = run_pipeline(kind, input, primary, fallback, completion, config).await;

    if let Some(obs) = &config.observer {
        obs.on_complete(input, result.is_ok());
    }
    match &result {
        Ok(doc) => info!(
            "Finished {} in {:.2}s: {} words via {} ({})",
            input,
            start.elapsed().as_secs_f64(),
            doc.metadata.word_count,
            doc.content.engine,
            doc.enrichment.as_str()
        ),
        Err(e) => warn!("Failed {} at {} stage: {}", input, e.stage(), e),
    }
    result
}

async fn run_pipeline(
    kind: ContentKind,
    input: &str,
    primary: &dyn Converter,
    fallback: Option<&dyn Converter>,
    completion: Option<&dyn CompletionClient>,
    config: &IngestConfig,
) -> Result<Conversion, IngestError> {
    let notify = |step: Step| {
        if let Some(obs) = &config.observer {
            obs.on_stage_start(input, step);
        }
    };

    // ── Stage 1: fetch ───────────────────────────────────────────────────
    let source = SourceReference::parse(input, kind)?;
    notify(Step::Fetch);
    let raw = input::fetch(&source, kind, config).await?;
    debug!("Fetched {} bytes from {}", raw.len(), source);

    // ── Stages 2-3: primary, then fallback if needed ─────────────────────
    notify(Step::Convert);
    let mut content = convert_content(input, &raw, primary, fallback, config).await?;

    // ── Stage 4: metadata ────────────────────────────────────────────────
    notify(Step::Metadata);
    let defaults = metadata::extract_metadata(&content, &source, kind);
    if content.detected_language.is_none() {
        content.detected_language = defaults.language.clone();
    }

    // ── Stage 5: enrichment ──────────────────────────────────────────────
    if config.enrich {
        notify(Step::Enrich);
    }
    let enrichment = enrich::enrich(&defaults, &content.plain_text, completion, config).await;
    if let (enrich::Enrichment::Degraded { reason }, Some(obs)) = (&enrichment, &config.observer) {
        obs.on_enrichment_degraded(input, reason);
    }
    let metadata = enrichment.apply(defaults);

    Ok(Conversion {
        source,
        content,
        metadata,
        enrichment: enrichment.status(),
    })
}

/// Apply the primary → fallback policy to fetched content.
async fn convert_content(
    input: &str,
    raw: &RawContent,
    primary: &dyn Converter,
    fallback: Option<&dyn Converter>,
    config: &IngestConfig,
) -> Result<ConvertedContent, IngestError> {
    let min = config.min_content_chars;

    let (primary_output, primary_reason) = match primary.convert(raw).await {
        Ok(output) => {
            let content = wrap(output, ConversionMethod::Primary, primary.name());
            let chars = content_chars(&content.plain_text);
            if chars >= min && chars > 0 {
                info!("{}: {} characters of text", primary.name(), chars);
                return Ok(content);
            }
            let reason = format!(
                "{} produced {} characters of text (minimum {})",
                primary.name(),
                chars,
                min
            );
            (Some(content).filter(|_| chars > 0), reason)
        }
        Err(e) => (None, e.to_string()),
    };

    let Some(fallback) = fallback else {
        return keep_primary_or_fail(input, primary_output, primary_reason, "no fallback engine configured".into());
    };

    warn!("{}; trying {}", primary_reason, fallback.name());
    if let Some(obs) = &config.observer {
        obs.on_stage_start(input, Step::Fallback);
        obs.on_fallback(input, fallback.name(), &primary_reason);
    }

    let fallback_reason = match fallback.convert(raw).await {
        Ok(output) => {
            let mut content = wrap(output, ConversionMethod::Fallback, fallback.name());
            let chars = content_chars(&content.plain_text);
            if chars > 0 {
                info!("{}: {} characters of text", fallback.name(), chars);
                content.fallback_reason = Some(primary_reason);
                return Ok(content);
            }
            format!("{} produced no text", fallback.name())
        }
        Err(e) => e.to_string(),
    };

    keep_primary_or_fail(input, primary_output, primary_reason, fallback_reason)
}

fn keep_primary_or_fail(
    input: &str,
    primary_output: Option<ConvertedContent>,
    primary_reason: String,
    fallback_reason: String,
) -> Result<ConvertedContent, IngestError> {
    match primary_output {
        Some(content) => {
            warn!(
                "Keeping short {} output for {}: {}",
                content.engine, input, fallback_reason
            );
            Ok(content)
        }
        None => Err(IngestError::ConversionFailed {
            input: input.to_string(),
            primary: primary_reason,
            fallback: fallback_reason,
        }),
    }
}

fn wrap(mut output: EngineOutput, method: ConversionMethod, engine: &str) -> ConvertedContent {
    output.markdown = clean_markdown(&output.markdown);
    ConvertedContent::from_engine(output, method, engine)
}

/// One source of a batch and its outcome.
#[derive(Debug)]
pub struct BatchItem {
    pub input: String,
    pub result: Result<Conversion, IngestError>,
}

/// Convert several sources one after another.
///
/// Each source is independent: a failure is recorded in its [`BatchItem`]
/// and the batch moves on.
pub async fn convert_batch<S: AsRef<str>>(
    kind: ContentKind,
    inputs: &[S],
    config: &IngestConfig,
) -> Vec<BatchItem> {
    let mut items = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let input = input.as_ref();
        info!("[{}/{}] {}", i + 1, inputs.len(), input);
        let result = convert_source(kind, input, config).await;
        items.push(BatchItem {
            input: input.to_string(),
            result,
        });
    }
    let failed = items.iter().filter(|item| item.result.is_err()).count();
    if failed > 0 {
        warn!("{} of {} sources failed", failed, items.len());
    }
    items
}

/// Convert one source and write the rendered artifact to `path`.
pub async fn convert_to_file(
    kind: ContentKind,
    input: impl AsRef<str>,
    format: OutputFormat,
    path: impl AsRef<Path>,
    config: &IngestConfig,
) -> Result<Conversion, IngestError> {
    let doc = convert_source(kind, input.as_ref(), config).await?;
    write_artifact(&doc.render(format), path.as_ref()).await?;
    Ok(doc)
}

/// Write an artifact atomically: temp file in the target directory, then
/// rename. Missing parent directories are created.
pub async fn write_artifact(artifact: &OutputArtifact, path: &Path) -> Result<(), IngestError> {
    let write_err = |e: std::io::Error| IngestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await.map_err(write_err)?;

    let bytes = artifact.as_str().as_bytes().to_vec();
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| IngestError::Internal(format!("write task panicked: {e}")))?
    .map_err(write_err)?;

    info!("Wrote {} ({} bytes)", path.display(), artifact.as_str().len());
    Ok(())
}
