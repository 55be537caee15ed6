//! Fetcher: resolve a [`SourceReference`] to validated [`RawContent`].
//!
//! ## Why keep the bytes in memory?
//!
//! pdfium loads documents from a byte slice just as well as from a path, and
//! both engines of a pipeline need the same input. Reading once into a
//! reference-counted [`Bytes`] buffer lets the primary and the fallback share
//! it without a temp file or a second download.
//!
//! ## Retry policy
//!
//! Timeouts, connection failures, `429` and `5xx` responses are retried with
//! capped exponential backoff (`retry_backoff_ms × 2^(attempt-1)`) until
//! `fetch_attempts` is spent. Any other `4xx` is permanent and surfaces at
//! once: `404`/`410` as [`IngestError::InvalidSource`], the rest as
//! [`IngestError::SourceUnavailable`] with a single attempt.

use crate::config::{backoff_delay, IngestConfig, MAX_ATTEMPTS};
use crate::document::RawContent;
use crate::error::IngestError;
use crate::source::{ContentKind, SourceReference};
use bytes::Bytes;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const PDF_MAGIC: &[u8] = b"%PDF";

/// Bytes scanned for the PDF header. Some producers emit junk before it.
const MAGIC_WINDOW: usize = 1024;

/// Fetch and validate the content for one invocation.
pub async fn fetch(
    source: &SourceReference,
    kind: ContentKind,
    config: &IngestConfig,
) -> Result<RawContent, IngestError> {
    match source {
        SourceReference::LocalPath(path) => read_local(path, source, kind).await,
        SourceReference::RemoteUrl(url) => download(url, source, kind, config).await,
    }
}

/// `true` when the buffer carries a PDF header near its start.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(MAGIC_WINDOW)];
    window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

// ── Local files ──────────────────────────────────────────────────────────────

async fn read_local(
    path: &Path,
    source: &SourceReference,
    kind: ContentKind,
) -> Result<RawContent, IngestError> {
    let input = path.display().to_string();

    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IngestError::invalid(input, "file not found"));
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(IngestError::invalid(input, "permission denied"));
        }
        Err(e) => {
            return Err(IngestError::SourceUnavailable {
                input,
                attempts: 1,
                reason: e.to_string(),
            })
        }
    };
    if meta.is_dir() {
        return Err(IngestError::invalid(input, "is a directory, not a file"));
    }
    if meta.len() == 0 {
        return Err(IngestError::invalid(input, "file is empty (0 bytes)"));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| IngestError::SourceUnavailable {
            input: input.clone(),
            attempts: 1,
            reason: e.to_string(),
        })?;

    if kind == ContentKind::Pdf && !looks_like_pdf(&bytes) {
        let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(IngestError::invalid(
            input,
            format!("not a PDF file (magic bytes: {:?})", String::from_utf8_lossy(&magic)),
        ));
    }

    debug!("Read local {}: {} bytes", path.display(), bytes.len());
    Ok(RawContent::new(bytes, kind, source.clone()))
}

// ── Remote sources ───────────────────────────────────────────────────────────

/// One failed attempt, classified for the retry loop.
enum Attempt {
    Retry(String),
    TimedOut,
    Fatal(IngestError),
}

async fn download(
    url: &Url,
    source: &SourceReference,
    kind: ContentKind,
    config: &IngestConfig,
) -> Result<RawContent, IngestError> {
    info!("Fetching {} from: {}", kind.label(), url);
    let input = url.to_string();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.download_timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| IngestError::Internal(format!("HTTP client: {e}")))?;

    let attempts = config.fetch_attempts.clamp(1, MAX_ATTEMPTS);
    let mut last_reason = String::new();
    let mut timed_out = false;

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = backoff_delay(config.retry_backoff_ms, attempt - 1);
            debug!("Retrying {} in {:?} (attempt {}/{})", url, delay, attempt, attempts);
            tokio::time::sleep(delay).await;
        }

        match try_download(&client, url, &input).await {
            Ok((bytes, content_type)) => {
                validate_kind(&input, kind, &bytes, content_type.as_deref())?;
                info!("Fetched {} bytes from {}", bytes.len(), url);
                return Ok(RawContent {
                    bytes,
                    kind,
                    content_type,
                    source: source.clone(),
                });
            }
            Err(Attempt::Fatal(e)) => return Err(e),
            Err(Attempt::TimedOut) => {
                warn!("Attempt {}/{} for {} timed out", attempt, attempts, url);
                timed_out = true;
                last_reason = "timed out".into();
            }
            Err(Attempt::Retry(reason)) => {
                warn!("Attempt {}/{} for {} failed: {}", attempt, attempts, url, reason);
                timed_out = false;
                last_reason = reason;
            }
        }
    }

    if timed_out {
        Err(IngestError::Timeout {
            input,
            secs: config.download_timeout_secs,
        })
    } else {
        Err(IngestError::SourceUnavailable {
            input,
            attempts,
            reason: last_reason,
        })
    }
}

async fn try_download(
    client: &reqwest::Client,
    url: &Url,
    input: &str,
) -> Result<(Bytes, Option<String>), Attempt> {
    let response = client.get(url.clone()).send().await.map_err(classify_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(status, input));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let bytes = response.bytes().await.map_err(classify_reqwest)?;
    Ok((bytes, content_type))
}

fn classify_reqwest(err: reqwest::Error) -> Attempt {
    if err.is_timeout() {
        Attempt::TimedOut
    } else if err.is_connect() || err.is_request() || err.is_body() {
        Attempt::Retry(err.to_string())
    } else {
        Attempt::Fatal(IngestError::SourceUnavailable {
            input: err.url().map(|u| u.to_string()).unwrap_or_default(),
            attempts: 1,
            reason: err.to_string(),
        })
    }
}

fn classify_status(status: StatusCode, input: &str) -> Attempt {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Attempt::Retry(format!("HTTP {status}"));
    }
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Attempt::Fatal(IngestError::invalid(input, format!("HTTP {status}")));
    }
    Attempt::Fatal(IngestError::SourceUnavailable {
        input: input.to_string(),
        attempts: 1,
        reason: format!("HTTP {status}"),
    })
}

/// Check that the response carries the kind of content the pipeline expects.
fn validate_kind(
    input: &str,
    kind: ContentKind,
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<(), IngestError> {
    let found = || content_type.unwrap_or("unknown content type").to_string();
    let unsupported = |found: String| IngestError::UnsupportedContent {
        input: input.to_string(),
        expected: kind.label().to_string(),
        found,
    };

    if bytes.is_empty() {
        return Err(unsupported("an empty response body".into()));
    }

    match kind {
        ContentKind::Pdf if looks_like_pdf(bytes) => Ok(()),
        ContentKind::Pdf => Err(unsupported(found())),
        ContentKind::Html => {
            let is_pdf = looks_like_pdf(bytes)
                || content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/pdf"));
            if is_pdf {
                return Err(unsupported("application/pdf (use the pdf pipeline)".into()));
            }
            if content_type.is_some_and(is_binary_content_type) {
                return Err(unsupported(found()));
            }
            Ok(())
        }
    }
}

/// Content types a web page is never served as.
fn is_binary_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ["image/", "audio/", "video/", "font/"]
        .iter()
        .any(|p| ct.starts_with(p))
        || [
            "application/octet-stream",
            "application/zip",
            "application/gzip",
            "application/msword",
            "application/vnd.",
        ]
        .iter()
        .any(|p| ct.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TINY_PDF: &[u8] = b"%PDF-1.4\n%fake body\n%%EOF\n";

    fn fast_config() -> IngestConfig {
        IngestConfig::builder()
            .retry_backoff_ms(1)
            .download_timeout_secs(5)
            .build()
            .unwrap()
    }

    fn remote(server: &MockServer, p: &str, kind: ContentKind) -> SourceReference {
        SourceReference::parse(&format!("{}{}", server.uri(), p), kind).unwrap()
    }

    #[test]
    fn pdf_magic_is_found_after_leading_junk() {
        assert!(looks_like_pdf(b"%PDF-1.7"));
        assert!(looks_like_pdf(b"\xEF\xBB\xBF\n%PDF-1.5"));
        assert!(!looks_like_pdf(b"<html>"));
        assert!(!looks_like_pdf(b""));
    }

    #[test]
    fn binary_content_types_are_detected() {
        assert!(is_binary_content_type("image/png"));
        assert!(is_binary_content_type("application/vnd.ms-excel"));
        assert!(!is_binary_content_type("text/html; charset=utf-8"));
        assert!(!is_binary_content_type("application/xhtml+xml"));
    }

    // ── Local ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_local_file_is_invalid_source() {
        let src = SourceReference::LocalPath("/definitely/not/here.pdf".into());
        let err = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn zero_byte_local_file_is_invalid_source() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let src = SourceReference::LocalPath(f.path().to_path_buf());
        let err = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn local_file_without_pdf_magic_is_invalid_source() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"just some text").unwrap();
        let src = SourceReference::LocalPath(f.path().to_path_buf());
        let err = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
        assert!(err.to_string().contains("not a PDF"));
    }

    #[tokio::test]
    async fn local_pdf_is_read() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(TINY_PDF).unwrap();
        let src = SourceReference::LocalPath(f.path().to_path_buf());
        let raw = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap();
        assert_eq!(raw.bytes.as_ref(), TINY_PDF);
        assert_eq!(raw.kind, ContentKind::Pdf);
    }

    #[tokio::test]
    async fn directory_is_invalid_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = SourceReference::LocalPath(dir.path().to_path_buf());
        let err = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
    }

    // ── Remote ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn remote_pdf_is_downloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(TINY_PDF, "application/pdf"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let src = remote(&server, "/paper.pdf", ContentKind::Pdf);
        let raw = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap();
        assert_eq!(raw.len(), TINY_PDF.len());
        assert_eq!(raw.content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_succeed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.pdf"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(TINY_PDF))
            .expect(1)
            .mount(&server)
            .await;

        let src = remote(&server, "/flaky.pdf", ContentKind::Pdf);
        assert!(fetch(&src, ContentKind::Pdf, &fast_config()).await.is_ok());
    }

    #[tokio::test]
    async fn persistent_server_errors_exhaust_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let src = remote(&server, "/down.pdf", ContentKind::Pdf);
        let err = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap_err();
        match err {
            IngestError::SourceUnavailable { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("502"), "got: {reason}");
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let src = remote(&server, "/private.pdf", ContentKind::Pdf);
        let err = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
        assert!(err.to_string().contains("1 attempt"));
    }

    #[tokio::test]
    async fn not_found_is_invalid_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let src = remote(&server, "/missing.pdf", ContentKind::Pdf);
        let err = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
    }

    #[tokio::test]
    async fn html_served_for_pdf_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>Login</body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let src = remote(&server, "/paper", ContentKind::Pdf);
        let err = fetch(&src, ContentKind::Pdf, &fast_config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedContent);
        assert!(err.to_string().contains("text/html"));
    }

    #[tokio::test]
    async fn pdf_served_for_web_page_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(TINY_PDF, "application/pdf"),
            )
            .mount(&server)
            .await;

        let src = remote(&server, "/doc", ContentKind::Html);
        let err = fetch(&src, ContentKind::Html, &fast_config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedContent);
        assert!(err.to_string().contains("pdf pipeline"));
    }

    #[tokio::test]
    async fn web_page_is_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body><p>Hi</p></body></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let src = remote(&server, "/post", ContentKind::Html);
        let raw = fetch(&src, ContentKind::Html, &fast_config()).await.unwrap();
        assert_eq!(raw.kind, ContentKind::Html);
        assert!(String::from_utf8_lossy(&raw.bytes).contains("<p>Hi</p>"));
    }

    #[tokio::test]
    async fn slow_server_surfaces_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(TINY_PDF)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = IngestConfig::builder()
            .retry_backoff_ms(1)
            .fetch_attempts(2)
            .download_timeout_secs(1)
            .build()
            .unwrap();
        let src = remote(&server, "/slow.pdf", ContentKind::Pdf);
        let err = fetch(&src, ContentKind::Pdf, &config).await.unwrap_err();
        assert!(matches!(err, IngestError::Timeout { secs: 1, .. }), "got {err:?}");
    }
}
