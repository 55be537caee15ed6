//! Observer trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::IngestConfigBuilder::observer`] to be told when each
//! stage starts, when the fallback converter takes over, how the vision
//! fallback progresses page by page, and when enrichment degrades.
//!
//! # Why callbacks instead of channels?
//!
//! The host decides how events travel (terminal spinner, log line, channel).
//! The library only calls methods. The trait is `Send + Sync` because vision
//! pages are transcribed concurrently.
//!
//! # Example
//!
//! ```rust
//! use mdingest::{IngestConfig, PipelineObserver, Step};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! #[derive(Default)]
//! struct StageCounter(AtomicUsize);
//!
//! impl PipelineObserver for StageCounter {
//!     fn on_stage_start(&self, _source: &str, _step: Step) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = IngestConfig::builder()
//!     .observer(Arc::new(StageCounter::default()))
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;

/// A step of one pipeline invocation, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fetch,
    Convert,
    Fallback,
    Metadata,
    Enrich,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::Fetch => "fetching",
            Step::Convert => "converting",
            Step::Fallback => "running fallback converter",
            Step::Metadata => "extracting metadata",
            Step::Enrich => "enriching",
        };
        f.write_str(label)
    }
}

/// Called by the pipeline as an invocation moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_page_complete` and `on_page_error` may be called
/// concurrently from different tasks.
pub trait PipelineObserver: Send + Sync {
    /// A stage is about to start for `source`.
    fn on_stage_start(&self, source: &str, step: Step) {
        let _ = (source, step);
    }

    /// The primary converter was rejected and the fallback will run.
    ///
    /// # Arguments
    /// * `engine`: name of the fallback engine
    /// * `reason`: why the primary output was not used
    fn on_fallback(&self, source: &str, engine: &str, reason: &str) {
        let _ = (source, engine, reason);
    }

    /// A vision-fallback page was transcribed (1-indexed).
    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// A vision-fallback page failed after all retries and was skipped.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// The enrichment stage fell back to deterministic defaults.
    fn on_enrichment_degraded(&self, source: &str, reason: &str) {
        let _ = (source, reason);
    }

    /// The invocation finished, successfully or not.
    fn on_complete(&self, source: &str, success: bool) {
        let _ = (source, success);
    }
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
