//! Configuration for both ingestion pipelines.
//!
//! Every knob lives in [`IngestConfig`], built once through
//! [`IngestConfigBuilder`] and passed by reference into each stage. No stage
//! reads the environment on its own: the binary maps flags and environment
//! variables into the builder, the library only ever looks at this struct.
//!
//! # Design choice: one config for two pipelines
//! The PDF and web pipelines share fetch, enrichment and rendering knobs.
//! The handful of engine-specific fields (DPI, Firecrawl key) are simply
//! ignored by the pipeline that has no use for them.

use crate::error::IngestError;
use crate::progress::PipelineObserver;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default Firecrawl endpoint for the web fallback engine.
pub const DEFAULT_FIRECRAWL_URL: &str = "https://api.firecrawl.dev";

/// Upper bound for `fetch_attempts` and per-page `max_retries`.
pub const MAX_ATTEMPTS: u32 = 10;

/// No single backoff sleep is longer than this.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay before retry number `retry` (1-based): `base_ms × 2^(retry-1)`,
/// capped at [`MAX_BACKOFF_MS`].
pub(crate) fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

/// Configuration for one or more pipeline invocations.
///
/// # Example
/// ```rust
/// use mdingest::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .enrich(false)
///     .max_pages(20)
///     .min_content_chars(100)
///     .build()
///     .unwrap();
/// assert!(!config.enrich);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    // ── Fetch ────────────────────────────────────────────────────────────
    /// Total fetch attempts for remote sources, including the first. Default: 3.
    pub fetch_attempts: u32,

    /// Initial backoff between attempts in milliseconds. Doubles each retry.
    /// Shared by fetch retries and vision page retries. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request download timeout in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// `User-Agent` header sent with every fetch.
    pub user_agent: String,

    // ── Conversion ───────────────────────────────────────────────────────
    /// Only the first `max_pages` pages of a PDF are converted. `None` = all.
    pub max_pages: Option<usize>,

    /// Primary output with fewer non-whitespace plain-text characters than
    /// this is treated as insufficient and triggers the fallback. Default: 64.
    pub min_content_chars: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Location of the pdfium shared library: the library file itself or the
    /// directory holding it. `None` tries the working directory, then the
    /// system library search path.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Allow the vision-LLM fallback for PDFs. Default: true.
    pub vision_fallback: bool,

    /// Rasterisation DPI for the vision fallback. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on either rendered page dimension in pixels. Default: 2000.
    ///
    /// A 200-DPI render of an A0 poster would otherwise allocate a
    /// 13 000 × 18 000 px bitmap.
    pub max_rendered_pixels: u32,

    /// Concurrent vision calls. Default: 10.
    pub concurrency: usize,

    /// Per-page retry budget for vision calls. Default: 3.
    pub max_retries: u32,

    /// Max tokens per vision page or enrichment answer. Default: 4096.
    pub max_tokens: usize,

    /// Sampling temperature for every LLM call. Default: 0.1.
    pub temperature: f32,

    /// Firecrawl API key. Without one the web fallback is unavailable.
    pub firecrawl_api_key: Option<String>,

    /// Firecrawl base URL. Default: [`DEFAULT_FIRECRAWL_URL`].
    pub firecrawl_api_url: String,

    /// Extra wait before Firecrawl captures the page, in ms. Default: 5000.
    pub firecrawl_wait_for_ms: u64,

    /// Keep only the main content of a web page (drop nav, footer, sidebars).
    /// Default: true.
    pub only_main_content: bool,

    // ── Enrichment ───────────────────────────────────────────────────────
    /// Run the AI enrichment stage. Default: true.
    pub enrich: bool,

    /// Characters of plain text sent to the completion API. Default: 2000.
    pub excerpt_chars: usize,

    /// Per-LLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Resolved LLM provider shared by enrichment and the vision fallback.
    /// `None` makes enrichment degrade and the vision engine unavailable.
    pub provider: Option<Arc<dyn LLMProvider>>,

    // ── Reporting ────────────────────────────────────────────────────────
    /// Stage event callback. `None` = silent.
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            retry_backoff_ms: 500,
            download_timeout_secs: 120,
            user_agent: format!("mdingest/{}", env!("CARGO_PKG_VERSION")),
            max_pages: None,
            min_content_chars: 64,
            password: None,
            pdfium_lib_path: None,
            vision_fallback: true,
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 10,
            max_retries: 3,
            max_tokens: 4096,
            temperature: 0.1,
            firecrawl_api_key: None,
            firecrawl_api_url: DEFAULT_FIRECRAWL_URL.to_string(),
            firecrawl_wait_for_ms: 5000,
            only_main_content: true,
            enrich: true,
            excerpt_chars: 2000,
            api_timeout_secs: 60,
            provider: None,
            observer: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("fetch_attempts", &self.fetch_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("max_pages", &self.max_pages)
            .field("min_content_chars", &self.min_content_chars)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("vision_fallback", &self.vision_fallback)
            .field("dpi", &self.dpi)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field(
                "firecrawl_api_key",
                &self.firecrawl_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("firecrawl_api_url", &self.firecrawl_api_url)
            .field("only_main_content", &self.only_main_content)
            .field("enrich", &self.enrich)
            .field("excerpt_chars", &self.excerpt_chars)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder seeded with the defaults.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn fetch_attempts(mut self, n: u32) -> Self {
        self.config.fetch_attempts = n.clamp(1, MAX_ATTEMPTS);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = Some(n);
        self
    }

    pub fn min_content_chars(mut self, n: usize) -> Self {
        self.config.min_content_chars = n;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn vision_fallback(mut self, v: bool) -> Self {
        self.config.vision_fallback = v;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_ATTEMPTS);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn firecrawl_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.firecrawl_api_key = Some(key.into());
        self
    }

    pub fn firecrawl_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.firecrawl_api_url = url.into();
        self
    }

    pub fn firecrawl_wait_for_ms(mut self, ms: u64) -> Self {
        self.config.firecrawl_wait_for_ms = ms;
        self
    }

    pub fn only_main_content(mut self, v: bool) -> Self {
        self.config.only_main_content = v;
        self
    }

    pub fn enrich(mut self, v: bool) -> Self {
        self.config.enrich = v;
        self
    }

    pub fn excerpt_chars(mut self, n: usize) -> Self {
        self.config.excerpt_chars = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.excerpt_chars == 0 {
            return Err(IngestError::InvalidConfig(
                "excerpt length must be ≥ 1 character".into(),
            ));
        }
        if c.download_timeout_secs == 0 || c.api_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig("timeouts must be ≥ 1 second".into()));
        }
        if c.max_pages == Some(0) {
            return Err(IngestError::InvalidConfig("max pages must be ≥ 1".into()));
        }
        if url::Url::parse(&c.firecrawl_api_url).is_err() {
            return Err(IngestError::InvalidConfig(format!(
                "Firecrawl API URL is not a valid URL: {}",
                c.firecrawl_api_url
            )));
        }
        Ok(self.config)
    }
}
