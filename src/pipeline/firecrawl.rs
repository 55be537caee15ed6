//! Fallback web engine: re-fetch through the Firecrawl scrape API.
//!
//! Firecrawl loads the page in a headless browser, waits `waitFor`
//! milliseconds for client-side rendering, and returns Markdown of the main
//! content. That recovers single-page apps and lazily loaded articles the
//! local HTML engine sees as an empty shell.

use crate::config::IngestConfig;
use crate::document::{DocumentInfo, EngineOutput, RawContent};
use crate::error::EngineError;
use crate::pipeline::Converter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const ENGINE: &str = "firecrawl";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'a str; 1],
    only_main_content: bool,
    wait_for: u64,
    timeout: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    metadata: ScrapeMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeMetadata {
    title: Option<String>,
    og_title: Option<String>,
    description: Option<String>,
    og_description: Option<String>,
    language: Option<String>,
    author: Option<String>,
    published_time: Option<String>,
    status_code: Option<u16>,
}

impl From<ScrapeMetadata> for DocumentInfo {
    fn from(m: ScrapeMetadata) -> Self {
        DocumentInfo {
            title: m.og_title.or(m.title),
            author: m.author,
            description: m.description.or(m.og_description),
            published: m.published_time,
            language: m.language,
        }
        .normalized()
    }
}

/// Firecrawl scrape client.
#[derive(Debug, Clone)]
pub struct FirecrawlConverter {
    api_key: Option<String>,
    api_url: String,
    wait_for_ms: u64,
    only_main_content: bool,
    timeout_secs: u64,
    user_agent: String,
}

impl FirecrawlConverter {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            api_key: config.firecrawl_api_key.clone().filter(|k| !k.is_empty()),
            api_url: config.firecrawl_api_url.trim_end_matches('/').to_string(),
            wait_for_ms: config.firecrawl_wait_for_ms,
            only_main_content: config.only_main_content,
            timeout_secs: config.download_timeout_secs,
            user_agent: config.user_agent.clone(),
        }
    }
}

#[async_trait]
impl Converter for FirecrawlConverter {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn convert(&self, raw: &RawContent) -> Result<EngineOutput, EngineError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EngineError::unavailable(ENGINE, "no API key (set FIRECRAWL_API_KEY)"))?;
        let target = raw
            .source
            .url()
            .ok_or_else(|| EngineError::unavailable(ENGINE, "only remote URLs can be scraped"))?;

        info!("{ENGINE}: scraping {} (waitFor {}ms)", target, self.wait_for_ms);

        // The service-side budget covers the wait; the HTTP budget adds slack
        // for the round trip.
        let service_timeout_ms = self.timeout_secs * 1000;
        let http_timeout = Duration::from_secs(self.timeout_secs + 15);

        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| EngineError::failed(ENGINE, format!("HTTP client: {e}")))?;

        let body = ScrapeRequest {
            url: target.as_str(),
            formats: ["markdown"],
            only_main_content: self.only_main_content,
            wait_for: self.wait_for_ms,
            timeout: service_timeout_ms,
        };

        let response = client
            .post(format!("{}/v1/scrape", self.api_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout {
                        engine: ENGINE.to_string(),
                        secs: http_timeout.as_secs(),
                    }
                } else {
                    EngineError::failed(ENGINE, e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| EngineError::failed(ENGINE, format!("reading response: {e}")))?;
        let parsed: ScrapeResponse = serde_json::from_str(&text).unwrap_or_default();

        if !status.is_success() || !parsed.success {
            let detail = parsed
                .error
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(EngineError::failed(ENGINE, detail));
        }

        let data = parsed
            .data
            .ok_or_else(|| EngineError::failed(ENGINE, "response carried no data"))?;
        if let Some(code) = data.metadata.status_code.filter(|c| *c >= 400) {
            return Err(EngineError::failed(ENGINE, format!("target page returned HTTP {code}")));
        }

        let markdown = data.markdown.unwrap_or_default();
        debug!("{ENGINE}: {} bytes Markdown", markdown.len());
        Ok(EngineOutput {
            markdown,
            page_count: None,
            info: data.metadata.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ContentKind, SourceReference};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw_for(url: &str) -> RawContent {
        RawContent::new(
            b"<html><body></body></html>".to_vec(),
            ContentKind::Html,
            SourceReference::parse(url, ContentKind::Html).unwrap(),
        )
    }

    fn converter(server: &MockServer, key: Option<&str>) -> FirecrawlConverter {
        let mut b = IngestConfig::builder()
            .firecrawl_api_url(server.uri())
            .firecrawl_wait_for_ms(2500)
            .download_timeout_secs(10);
        if let Some(k) = key {
            b = b.firecrawl_api_key(k);
        }
        FirecrawlConverter::new(&b.build().unwrap())
    }

    #[tokio::test]
    async fn scrape_returns_markdown_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/scrape"))
            .and(header("authorization", "Bearer fc-test"))
            .and(body_partial_json(json!({
                "url": "https://spa.example.org/post",
                "formats": ["markdown"],
                "onlyMainContent": true,
                "waitFor": 2500
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "markdown": "# Rendered\n\nClient-side content.",
                    "metadata": {
                        "title": "Rendered | Site",
                        "ogTitle": "Rendered",
                        "description": "Shown after JS runs",
                        "language": "en",
                        "statusCode": 200
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = converter(&server, Some("fc-test"))
            .convert(&raw_for("https://spa.example.org/post"))
            .await
            .unwrap();
        assert_eq!(out.markdown, "# Rendered\n\nClient-side content.");
        assert_eq!(out.info.title.as_deref(), Some("Rendered"));
        assert_eq!(out.info.description.as_deref(), Some("Shown after JS runs"));
        assert_eq!(out.info.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn missing_key_is_unavailable_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = converter(&server, None)
            .convert(&raw_for("https://example.org"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "success": false,
                "error": "Insufficient credits"
            })))
            .mount(&server)
            .await;

        let err = converter(&server, Some("fc-test"))
            .convert(&raw_for("https://example.org"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Insufficient credits"), "got: {err}");
    }

    #[tokio::test]
    async fn target_http_error_fails_the_engine() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "markdown": "Not Found", "metadata": { "statusCode": 404 } }
            })))
            .mount(&server)
            .await;

        let err = converter(&server, Some("fc-test"))
            .convert(&raw_for("https://example.org/gone"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn non_json_error_body_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = converter(&server, Some("fc-test"))
            .convert(&raw_for("https://example.org"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"), "got: {err}");
    }
}
