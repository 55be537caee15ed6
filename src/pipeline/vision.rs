//! Fallback PDF engine: transcribe rasterised pages with a vision LLM.
//!
//! Slow and paid, but it reads scanned pages, multi-column layouts and
//! tables that the text layer mangles or lacks entirely.
//!
//! ## Retry Strategy
//!
//! 429 / 503 responses are frequent under concurrent load. Each page is
//! retried with capped exponential backoff (`retry_backoff_ms × 2^(attempt-1)`), and
//! each attempt is bounded by `api_timeout_secs`. A page that still fails is
//! skipped with a warning; the engine only fails when no page succeeds.

use crate::config::{backoff_delay, IngestConfig};
use crate::document::{EngineOutput, RawContent};
use crate::error::{EngineError, PageError};
use crate::pipeline::postprocess::clean_vision_page;
use crate::pipeline::raster::{self, RasterOptions};
use crate::pipeline::Converter;
use crate::progress::PipelineObserver;
use crate::prompts::VISION_SYSTEM_PROMPT;
use crate::provider::{completion_options, CompletionClient};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

pub const ENGINE: &str = "vision-llm";

/// Per-page call settings.
#[derive(Clone)]
pub struct PageSettings {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub api_timeout_secs: u64,
    pub concurrency: usize,
    pub options: CompletionOptions,
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl PageSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
            concurrency: config.concurrency.max(1),
            options: completion_options(config.temperature, config.max_tokens),
            observer: config.observer.clone(),
        }
    }
}

/// Vision-LLM converter.
pub struct VisionConverter {
    client: Option<Arc<dyn CompletionClient>>,
    config: IngestConfig,
}

impl VisionConverter {
    /// `client` is `None` when no provider is configured; the engine then
    /// reports itself unavailable instead of failing later.
    pub fn new(client: Option<Arc<dyn CompletionClient>>, config: &IngestConfig) -> Self {
        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl Converter for VisionConverter {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn convert(&self, raw: &RawContent) -> Result<EngineOutput, EngineError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| EngineError::unavailable(ENGINE, "no LLM provider configured"))?;

        let bytes = raw.bytes.clone();
        let config = self.config.clone();
        let (encoded, total_pages, info) = tokio::task::spawn_blocking(move || {
            let opts = RasterOptions {
                engine: ENGINE,
                dpi: config.dpi,
                max_pixels: config.max_rendered_pixels,
                max_pages: config.max_pages,
                password: config.password.as_deref(),
                lib_path: config.pdfium_lib_path.as_deref(),
            };
            let doc = raster::render_pages_blocking(&bytes, &opts)?;
            let encoded: Vec<(usize, ImageData)> = doc
                .pages
                .iter()
                .filter_map(|(idx, img)| match raster::encode_page(img) {
                    Ok(data) => Some((*idx, data)),
                    Err(e) => {
                        warn!("Page {}: encoding failed: {}", idx + 1, e);
                        None
                    }
                })
                .collect();
            Ok::<_, EngineError>((encoded, doc.total_pages, doc.info))
        })
        .await
        .map_err(|e| EngineError::failed(ENGINE, format!("render task panicked: {e}")))??;

        if encoded.is_empty() {
            return Err(EngineError::failed(ENGINE, "no page could be rasterised"));
        }

        let settings = PageSettings::from_config(&self.config);
        let markdown = transcribe_pages(&**client, encoded, &settings).await?;

        Ok(EngineOutput {
            markdown,
            page_count: Some(total_pages),
            info,
        })
    }
}

/// Transcribe encoded pages concurrently and join them in page order.
///
/// Fails only when every page failed; the error carries the first failure.
pub async fn transcribe_pages(
    client: &dyn CompletionClient,
    pages: Vec<(usize, ImageData)>,
    settings: &PageSettings,
) -> Result<String, EngineError> {
    let total = pages.len();
    info!("{ENGINE}: transcribing {} pages, concurrency {}", total, settings.concurrency);

    let mut results: Vec<(usize, Result<String, PageError>)> = stream::iter(pages)
        .map(|(idx, image)| async move {
            let page_num = idx + 1;
            let result = transcribe_page(client, page_num, image, settings).await;
            if let Some(obs) = &settings.observer {
                match &result {
                    Ok(_) => obs.on_page_complete(page_num, total),
                    Err(e) => obs.on_page_error(page_num, total, &e.to_string()),
                }
            }
            (idx, result)
        })
        .buffer_unordered(settings.concurrency)
        .collect()
        .await;
    results.sort_by_key(|(idx, _)| *idx);

    let mut parts = Vec::with_capacity(results.len());
    let mut first_error: Option<PageError> = None;
    for (_, result) in results {
        match result {
            Ok(md) if !md.trim().is_empty() => parts.push(md.trim_end().to_string()),
            Ok(_) => {}
            Err(e) => {
                warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    if parts.is_empty() {
        let detail = first_error.map_or_else(|| "every page came back empty".to_string(), |e| e.to_string());
        return Err(EngineError::failed(ENGINE, detail));
    }
    Ok(parts.join("\n\n---\n\n"))
}

/// Transcribe one page, retrying transient failures.
async fn transcribe_page(
    client: &dyn CompletionClient,
    page_num: usize,
    image: ImageData,
    settings: &PageSettings,
) -> Result<String, PageError> {
    let messages = vec![
        ChatMessage::system(VISION_SYSTEM_PROMPT),
        ChatMessage::user_with_images("", vec![image]),
    ];

    let mut last_err = String::new();
    let mut all_timed_out = true;

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let backoff = backoff_delay(settings.retry_backoff_ms, attempt);
            warn!(
                "Page {}: retry {}/{} after {:?}",
                page_num, attempt, settings.max_retries, backoff
            );
            sleep(backoff).await;
        }

        let call = client.complete(&messages, &settings.options);
        match timeout(Duration::from_secs(settings.api_timeout_secs), call).await {
            Ok(Ok(content)) => {
                debug!("Page {}: {} chars on attempt {}", page_num, content.len(), attempt + 1);
                return Ok(clean_vision_page(&content));
            }
            Ok(Err(e)) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                all_timed_out = false;
                last_err = e.to_string();
            }
            Err(_) => {
                warn!("Page {}: attempt {} timed out", page_num, attempt + 1);
                last_err = "timed out".into();
            }
        }
    }

    if all_timed_out {
        Err(PageError::Timeout {
            page: page_num,
            secs: settings.api_timeout_secs,
        })
    } else {
        Err(PageError::LlmFailed {
            page: page_num,
            retries: settings.max_retries,
            detail: last_err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use crate::source::{ContentKind, SourceReference};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies from a script, one entry per call; `Err` entries fail the call.
    struct Scripted {
        replies: Mutex<Vec<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<String, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().unwrap().pop() {
                Some(Ok(s)) => Ok(s),
                Some(Err(e)) => Err(CompletionError(e)),
                None => Err(CompletionError("script exhausted".into())),
            }
        }
    }

    fn settings() -> PageSettings {
        PageSettings {
            max_retries: 2,
            retry_backoff_ms: 1,
            api_timeout_secs: 5,
            concurrency: 1,
            options: completion_options(0.1, 512),
            observer: None,
        }
    }

    fn page(idx: usize) -> (usize, ImageData) {
        (idx, ImageData::new("aGVsbG8=".to_string(), "image/png"))
    }

    #[tokio::test]
    async fn pages_are_joined_in_order_and_cleaned() {
        let client = Scripted::new(vec![Ok("```markdown\n# One\n```"), Ok("Two")]);
        let md = transcribe_pages(&client, vec![page(0), page(1)], &settings())
            .await
            .unwrap();
        assert_eq!(md, "# One\n\n---\n\nTwo");
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let client = Scripted::new(vec![Err("HTTP 503"), Ok("recovered")]);
        let md = transcribe_pages(&client, vec![page(0)], &settings()).await.unwrap();
        assert_eq!(md, "recovered");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_page_is_skipped() {
        // concurrency 1 keeps the script order deterministic: page 1 uses
        // the three failing replies, page 2 the last one.
        let client = Scripted::new(vec![Err("bad"), Err("bad"), Err("bad"), Ok("page two")]);
        let md = transcribe_pages(&client, vec![page(0), page(1)], &settings())
            .await
            .unwrap();
        assert_eq!(md, "page two");
    }

    #[tokio::test]
    async fn all_pages_failing_fails_the_engine() {
        let client = Scripted::new(vec![Err("quota exceeded"); 3]);
        let err = transcribe_pages(&client, vec![page(0)], &settings())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_client_is_unavailable() {
        let conv = VisionConverter::new(None, &IngestConfig::default());
        let raw = RawContent::new(
            b"%PDF-1.4".to_vec(),
            ContentKind::Pdf,
            SourceReference::LocalPath("a.pdf".into()),
        );
        let err = conv.convert(&raw).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable { .. }));
    }
}
