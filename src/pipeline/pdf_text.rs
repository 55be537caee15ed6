//! Primary PDF engine: read the embedded text layer with pdfium.
//!
//! Text extraction needs no rasterisation and no network, so it handles the
//! common case (born-digital PDFs) in milliseconds. Scanned documents have no
//! text layer and come back empty, which the pipeline treats as
//! insufficient output and hands to the vision fallback.

use crate::config::IngestConfig;
use crate::document::{EngineOutput, RawContent};
use crate::error::EngineError;
use crate::pipeline::{pdfium, Converter};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tracing::{debug, info};

pub const ENGINE: &str = "pdfium-text";

/// Text-layer extractor.
#[derive(Debug, Clone, Default)]
pub struct PdfTextConverter {
    max_pages: Option<usize>,
    password: Option<String>,
    lib_path: Option<PathBuf>,
}

impl PdfTextConverter {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            password: config.password.clone(),
            lib_path: config.pdfium_lib_path.clone(),
        }
    }
}

#[async_trait]
impl Converter for PdfTextConverter {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn convert(&self, raw: &RawContent) -> Result<EngineOutput, EngineError> {
        let bytes = raw.bytes.clone();
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.extract_blocking(&bytes))
            .await
            .map_err(|e| EngineError::failed(ENGINE, format!("extraction task panicked: {e}")))?
    }
}

impl PdfTextConverter {
    fn extract_blocking(&self, bytes: &[u8]) -> Result<EngineOutput, EngineError> {
        let pdfium = pdfium::bind(ENGINE, self.lib_path.as_deref())?;
        let document = pdfium::open(&pdfium, ENGINE, bytes, self.password.as_deref())?;

        let pages = document.pages();
        let total = pages.len() as usize;
        let wanted = pdfium::pages_to_process(total, self.max_pages);
        info!("{ENGINE}: {} pages, extracting {}", total, wanted);

        let mut parts = Vec::with_capacity(wanted);
        for idx in 0..wanted {
            let page = pages
                .get(idx as u16)
                .map_err(|e| EngineError::failed(ENGINE, format!("page {}: {e:?}", idx + 1)))?;
            let text = page
                .text()
                .map_err(|e| EngineError::failed(ENGINE, format!("page {} text: {e:?}", idx + 1)))?
                .all();
            debug!("{ENGINE}: page {} → {} chars", idx + 1, text.len());
            let md = text_to_markdown(&text);
            if !md.is_empty() {
                parts.push(md);
            }
        }

        Ok(EngineOutput {
            markdown: parts.join("\n\n---\n\n"),
            page_count: Some(total),
            info: pdfium::document_info(&document),
        })
    }
}

static RE_HYPHEN_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\p{L})-\n(\p{Ll})").unwrap());

/// Turn one page of raw text-layer output into Markdown paragraphs.
///
/// Lines are trimmed, words hyphenated across a line break are rejoined and
/// blank-line runs collapse to a single paragraph break. Layout is not
/// reconstructed; that is what the vision fallback is for.
pub fn text_to_markdown(page_text: &str) -> String {
    let normalised = page_text.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed: Vec<&str> = normalised.lines().map(str::trim).collect();
    let joined = RE_HYPHEN_BREAK.replace_all(&trimmed.join("\n"), "$1$2").into_owned();

    let mut out: Vec<&str> = Vec::new();
    for line in joined.lines() {
        if line.is_empty() && out.last().is_none_or(|l| l.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_words_are_rejoined() {
        assert_eq!(text_to_markdown("a trans-\nformer model"), "a transformer model");
        assert_eq!(text_to_markdown("state-of-the-art\nResults"), "state-of-the-art\nResults");
    }

    #[test]
    fn blank_runs_collapse_and_edges_trim() {
        assert_eq!(text_to_markdown("\n\n  One  \r\n\r\n\r\nTwo\n\n"), "One\n\nTwo");
    }

    #[test]
    fn empty_page_yields_empty_markdown() {
        assert_eq!(text_to_markdown(" \n \n"), "");
    }

    #[test]
    fn converter_reports_its_name() {
        let c = PdfTextConverter::new(&IngestConfig::default());
        assert_eq!(c.name(), "pdfium-text");
    }
}
