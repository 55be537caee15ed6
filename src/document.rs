//! Data model shared by every stage.
//!
//! Values are created and dropped within one pipeline invocation:
//! [`RawContent`] flows from the fetcher into a converter, the winning
//! converter's [`EngineOutput`] becomes [`ConvertedContent`], and the
//! metadata stages turn that into [`EnrichedMetadata`]. The final
//! [`Conversion`] owns everything the renderer needs.

use crate::pipeline::postprocess::markdown_to_text;
use crate::source::{ContentKind, SourceReference, SourceType};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Fetched bytes plus the content kind they were validated as.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub bytes: Bytes,
    pub kind: ContentKind,
    /// `Content-Type` header as served, if any.
    pub content_type: Option<String>,
    /// The source this content was fetched from.
    pub source: SourceReference,
}

impl RawContent {
    pub fn new(bytes: impl Into<Bytes>, kind: ContentKind, source: SourceReference) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
            content_type: None,
            source,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Bibliographic hints an engine found in the document itself
/// (PDF info dictionary, HTML `<meta>` tags, Firecrawl metadata).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub published: Option<String>,
    pub language: Option<String>,
}

impl DocumentInfo {
    /// Drop blank values so callers can rely on `Some` meaning "usable".
    pub fn normalized(self) -> Self {
        fn keep(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            title: keep(self.title),
            author: keep(self.author),
            description: keep(self.description),
            published: keep(self.published),
            language: keep(self.language),
        }
    }
}

/// What a single converter engine produced.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub markdown: String,
    pub page_count: Option<usize>,
    pub info: DocumentInfo,
}

/// Which converter produced the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMethod {
    Primary,
    Fallback,
}

impl fmt::Display for ConversionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConversionMethod::Primary => "primary",
            ConversionMethod::Fallback => "fallback",
        })
    }
}

/// The canonical intermediate representation of one document.
///
/// `plain_text` is derived from `markdown` at construction and is non-empty
/// whenever `markdown` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertedContent {
    pub markdown: String,
    pub plain_text: String,
    pub page_count: Option<usize>,
    pub conversion_method: ConversionMethod,
    /// Name of the engine that produced `markdown`.
    pub engine: String,
    pub detected_language: Option<String>,
    pub document_info: DocumentInfo,
    /// Why the primary output was rejected, when the fallback ran.
    pub fallback_reason: Option<String>,
    pub converted_at: DateTime<Utc>,
}

impl ConvertedContent {
    /// Wrap an engine's output, deriving the plain text.
    pub fn from_engine(output: EngineOutput, method: ConversionMethod, engine: &str) -> Self {
        let plain_text = markdown_to_text(&output.markdown);
        let info = output.info.normalized();
        Self {
            markdown: output.markdown,
            plain_text,
            page_count: output.page_count,
            conversion_method: method,
            engine: engine.to_string(),
            detected_language: info.language.clone(),
            document_info: info,
            fallback_reason: None,
            converted_at: Utc::now(),
        }
    }

    /// Whitespace-delimited tokens of `plain_text`.
    pub fn word_count(&self) -> usize {
        self.plain_text.split_whitespace().count()
    }
}

/// Document metadata, first derived locally then optionally enriched by AI.
///
/// `word_count`, `source`, `source_type`, `language` and `page_count` are
/// always computed locally; enrichment only replaces the qualitative fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedMetadata {
    pub title: String,
    pub description: String,
    pub authors: Vec<String>,
    pub publish_date: Option<NaiveDate>,
    pub tags: BTreeSet<String>,
    pub content_type: String,
    pub word_count: usize,
    pub source_type: SourceType,
    pub filename_suggestion: String,
    pub source: String,
    pub language: Option<String>,
    pub page_count: Option<usize>,
}

/// Outcome of the enrichment stage, as recorded on the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Enriched,
    Degraded { reason: String },
    Disabled,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::Enriched => "enriched",
            EnrichmentStatus::Degraded { .. } => "degraded",
            EnrichmentStatus::Disabled => "disabled",
        }
    }
}

/// The result of one successful pipeline invocation.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub source: SourceReference,
    pub content: ConvertedContent,
    pub metadata: EnrichedMetadata,
    pub enrichment: EnrichmentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn output(md: &str) -> EngineOutput {
        EngineOutput {
            markdown: md.to_string(),
            page_count: Some(2),
            info: DocumentInfo {
                title: Some("  ".into()),
                language: Some("en".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn plain_text_is_derived_from_markdown() {
        let c = ConvertedContent::from_engine(
            output("# Heading\n\nSome **bold** text."),
            ConversionMethod::Primary,
            "html",
        );
        assert_eq!(c.plain_text, "Heading\n\nSome bold text.");
        assert_eq!(c.word_count(), 4);
        assert_eq!(c.engine, "html");
        assert_eq!(c.detected_language.as_deref(), Some("en"));
    }

    #[test]
    fn blank_hints_are_dropped() {
        let c = ConvertedContent::from_engine(output("text"), ConversionMethod::Fallback, "x");
        assert_eq!(c.document_info.title, None);
        assert_eq!(c.conversion_method.to_string(), "fallback");
    }

    #[test]
    fn plain_text_non_empty_for_markup_only_markdown() {
        let c = ConvertedContent::from_engine(output("---"), ConversionMethod::Primary, "x");
        assert!(!c.plain_text.is_empty());
    }

    #[test]
    fn raw_content_reports_length() {
        let raw = RawContent::new(
            b"%PDF-1.7".to_vec(),
            ContentKind::Pdf,
            SourceReference::LocalPath(PathBuf::from("a.pdf")),
        );
        assert_eq!(raw.len(), 8);
        assert!(!raw.is_empty());
    }

    #[test]
    fn enrichment_status_serialises_with_tag() {
        let s = EnrichmentStatus::Degraded {
            reason: "timeout".into(),
        };
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"status":"degraded","reason":"timeout"}"#);
        assert_eq!(EnrichmentStatus::Disabled.as_str(), "disabled");
    }
}
