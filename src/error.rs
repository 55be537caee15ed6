//! Error types for the mdingest library.
//!
//! Three error types map onto three scopes of failure:
//!
//! * [`IngestError`]: **fatal** for one invocation: the source could not be
//!   fetched, both converters failed, or the artifact could not be written.
//!   Returned as `Err(IngestError)` from the top-level `convert*` functions.
//!
//! * [`EngineError`]: one converter engine failed. The pipeline reacts by
//!   running the fallback engine; only when both fail do the two messages end
//!   up inside [`IngestError::ConversionFailed`].
//!
//! * [`PageError`]: one page of the vision fallback failed. The page is
//!   skipped and the rest of the document is still transcribed.
//!
//! AI enrichment has no error type on this level: its failures are recovered
//! inside [`crate::pipeline::enrich`] and reported as a degraded status.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad path or URL. User error, never retried.
    InvalidSource,
    /// Network or file trouble that survived the retry budget.
    SourceUnavailable,
    /// The source exists but does not serve the expected content.
    UnsupportedContent,
    /// Both converters failed.
    ConversionFailed,
    /// The artifact could not be written.
    Output,
    /// Configuration rejected by the builder.
    Config,
    /// Bug or runtime failure (task panic, temp dir).
    Internal,
}

/// Pipeline stage a fatal error belongs to, used in user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Convert,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Convert => "convert",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// All fatal errors returned by the mdingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The path or URL is malformed, missing, or not a usable file.
    #[error("Invalid source '{input}': {reason}")]
    InvalidSource { input: String, reason: String },

    /// Transient failure that persisted through every retry.
    #[error("Source '{input}' unavailable after {attempts} attempt(s): {reason}\nCheck your internet connection.")]
    SourceUnavailable {
        input: String,
        attempts: u32,
        reason: String,
    },

    /// The request kept timing out.
    #[error("Timed out after {secs}s fetching '{input}'\nIncrease --download-timeout.")]
    Timeout { input: String, secs: u64 },

    /// The source answered but with the wrong kind of content.
    #[error("Unsupported content from '{input}': expected {expected}, got {found}")]
    UnsupportedContent {
        input: String,
        expected: String,
        found: String,
    },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// Neither the primary nor the fallback converter produced content.
    #[error("Conversion of '{input}' failed.\n  primary:  {primary}\n  fallback: {fallback}")]
    ConversionFailed {
        input: String,
        primary: String,
        fallback: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub(crate) fn invalid(input: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::InvalidSource {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error according to the failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidSource { .. } => ErrorKind::InvalidSource,
            IngestError::SourceUnavailable { .. } | IngestError::Timeout { .. } => {
                ErrorKind::SourceUnavailable
            }
            IngestError::UnsupportedContent { .. } => ErrorKind::UnsupportedContent,
            IngestError::ConversionFailed { .. } => ErrorKind::ConversionFailed,
            IngestError::OutputWriteFailed { .. } => ErrorKind::Output,
            IngestError::InvalidConfig(_) => ErrorKind::Config,
            IngestError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The pipeline stage that failed.
    pub fn stage(&self) -> Stage {
        match self.kind() {
            ErrorKind::InvalidSource | ErrorKind::SourceUnavailable | ErrorKind::UnsupportedContent => {
                Stage::Fetch
            }
            ErrorKind::ConversionFailed | ErrorKind::Internal => Stage::Convert,
            ErrorKind::Output | ErrorKind::Config => Stage::Output,
        }
    }

    /// Whether retrying the same fetch might succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::SourceUnavailable
    }
}

/// Failure of a single converter engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The engine's backing library or service is not available
    /// (pdfium missing, no LLM provider, no Firecrawl key).
    #[error("{engine} unavailable: {detail}")]
    Unavailable { engine: String, detail: String },

    /// The engine ran and failed.
    #[error("{engine} failed: {detail}")]
    Failed { engine: String, detail: String },

    /// The engine exceeded its time budget.
    #[error("{engine} timed out after {secs}s")]
    Timeout { engine: String, secs: u64 },
}

impl EngineError {
    pub(crate) fn unavailable(engine: &str, detail: impl Into<String>) -> Self {
        EngineError::Unavailable {
            engine: engine.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn failed(engine: &str, detail: impl Into<String>) -> Self {
        EngineError::Failed {
            engine: engine.to_string(),
            detail: detail.into(),
        }
    }
}

/// Failure of one completion request, as reported by a
/// [`crate::provider::CompletionClient`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CompletionError(pub String);

/// A non-fatal error for a single page of the vision fallback.
#[derive(Debug, Clone, Error, Serialize)]
pub enum PageError {
    /// Page rasterisation or encoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// LLM call failed after retries.
    #[error("Page {page}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// LLM call timed out on every attempt.
    #[error("Page {page}: LLM call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_failed_carries_both_messages() {
        let e = IngestError::ConversionFailed {
            input: "paper.pdf".into(),
            primary: "pdfium-text failed: no text layer".into(),
            fallback: "vision-llm unavailable: no provider".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("paper.pdf"), "got: {msg}");
        assert!(msg.contains("no text layer"), "got: {msg}");
        assert!(msg.contains("no provider"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::ConversionFailed);
        assert_eq!(e.stage(), Stage::Convert);
    }

    #[test]
    fn timeout_is_classified_as_unavailable() {
        let e = IngestError::Timeout {
            input: "https://example.org/a.pdf".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
        assert_eq!(e.kind(), ErrorKind::SourceUnavailable);
        assert!(e.is_transient());
        assert_eq!(e.stage(), Stage::Fetch);
    }

    #[test]
    fn invalid_source_is_not_transient() {
        let e = IngestError::invalid("ftp://x", "unsupported scheme");
        assert!(!e.is_transient());
        assert_eq!(e.stage().to_string(), "fetch");
    }

    #[test]
    fn engine_error_display_names_engine() {
        let e = EngineError::Timeout {
            engine: "firecrawl".into(),
            secs: 60,
        };
        assert_eq!(e.to_string(), "firecrawl timed out after 60s");
        let e = EngineError::unavailable("vision-llm", "no provider configured");
        assert!(e.to_string().starts_with("vision-llm unavailable"));
    }

    #[test]
    fn page_error_display() {
        let e = PageError::LlmFailed {
            page: 3,
            retries: 2,
            detail: "HTTP 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 3"));
        assert!(msg.contains("HTTP 503"));
    }
}
