//! Pipeline stages shared by the PDF and web instantiations.
//!
//! Each submodule implements one transformation step. The converters are
//! interchangeable behind the [`Converter`] trait, which is what lets
//! [`crate::convert::convert_with`] run the same primary → fallback policy
//! for both pipelines and for caller-supplied engines.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌──────────── PDF ─────────────┐   ┌─────────── web ───────────┐
//! input ──▶  pdf_text  ─(insufficient)─▶ vision    html ─(insufficient)─▶ firecrawl
//!                 │                        │        │                       │
//!                 └──────────┬─────────────┘        └───────────┬───────────┘
//!                            ▼                                  ▼
//!                       postprocess ──▶ metadata ──▶ enrich ──▶ output
//! ```
//!
//! 1. [`input`]       fetch and validate the source bytes
//! 2. [`pdf_text`] / [`html`]  fast primary engines
//! 3. [`vision`] / [`firecrawl`]  slower, higher-fidelity fallbacks
//!    ([`raster`] feeds page images to [`vision`])
//! 4. [`postprocess`] Markdown cleanup and plain-text derivation
//! 5. [`metadata`]    deterministic metadata defaults
//! 6. [`enrich`]      optional completion call, degrades to the defaults

use crate::document::{EngineOutput, RawContent};
use crate::error::EngineError;
use async_trait::async_trait;

pub mod enrich;
pub mod firecrawl;
pub mod html;
pub mod input;
pub mod metadata;
pub mod pdf_text;
pub(crate) mod pdfium;
pub mod postprocess;
pub mod raster;
pub mod vision;

/// One conversion engine: raw content in, Markdown out.
///
/// Implementations must not fail merely because the output is short or
/// empty; judging sufficiency is the pipeline's job.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Stable engine name, recorded as `engine` on the converted content.
    fn name(&self) -> &str;

    /// Convert `raw` into Markdown.
    async fn convert(&self, raw: &RawContent) -> Result<EngineOutput, EngineError>;
}
