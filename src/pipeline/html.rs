//! Primary web engine: local main-content extraction and HTML → Markdown.
//!
//! Works on the page exactly as served, so it needs no API key and no
//! browser. Pages that build their content with JavaScript come back nearly
//! empty; the pipeline then hands them to the Firecrawl fallback, which
//! renders the page before extracting.

use crate::document::{DocumentInfo, EngineOutput, RawContent};
use crate::error::EngineError;
use crate::pipeline::Converter;
use async_trait::async_trait;
use htmd::HtmlToMarkdown;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

pub const ENGINE: &str = "html";

/// Elements that never carry article text.
const ALWAYS_SKIPPED: &[&str] = &[
    "script", "style", "noscript", "iframe", "svg", "template", "form", "button", "canvas",
];

/// Page chrome dropped when only the main content is wanted.
const CHROME: &[&str] = &["nav", "footer", "aside"];

static MAIN_CONTENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article, main, [role=main], #content, .content").unwrap());
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static HTML_LANG: Lazy<Selector> = Lazy::new(|| Selector::parse("html[lang]").unwrap());
static TIME_DATETIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());

/// HTML converter backed by `scraper` and `htmd`.
#[derive(Debug, Clone)]
pub struct HtmlConverter {
    only_main_content: bool,
}

impl HtmlConverter {
    pub fn new(only_main_content: bool) -> Self {
        Self { only_main_content }
    }
}

impl Default for HtmlConverter {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Converter for HtmlConverter {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn convert(&self, raw: &RawContent) -> Result<EngineOutput, EngineError> {
        let page = String::from_utf8_lossy(&raw.bytes);
        html_to_markdown(&page, self.only_main_content)
    }
}

/// Convert a full HTML page. Synchronous; `scraper::Html` never crosses an
/// await point.
pub fn html_to_markdown(page: &str, only_main_content: bool) -> Result<EngineOutput, EngineError> {
    let document = Html::parse_document(page);
    let info = page_info(&document);

    let root = if only_main_content {
        document
            .select(&MAIN_CONTENT)
            .next()
            .or_else(|| document.select(&BODY).next())
    } else {
        document.select(&BODY).next()
    };
    let fragment = match root {
        Some(el) => el.html(),
        None => page.to_string(),
    };

    let mut skip: Vec<&str> = ALWAYS_SKIPPED.to_vec();
    if only_main_content {
        skip.extend_from_slice(CHROME);
    }
    let converter = HtmlToMarkdown::builder().skip_tags(skip).build();
    let markdown = converter
        .convert(&fragment)
        .map_err(|e| EngineError::failed(ENGINE, format!("HTML to Markdown: {e}")))?;
    debug!("{ENGINE}: {} bytes HTML → {} bytes Markdown", fragment.len(), markdown.len());

    Ok(EngineOutput {
        markdown,
        page_count: None,
        info,
    })
}

/// Title, description, author, publication date and language from the page head.
pub fn page_info(document: &Html) -> DocumentInfo {
    let title = meta(document, &["og:title", "twitter:title"]).or_else(|| {
        document
            .select(&TITLE)
            .next()
            .map(|el| collapse(&el.text().collect::<String>()))
    });

    DocumentInfo {
        title,
        author: meta(document, &["author", "article:author", "dc.creator", "citation_author"]),
        description: meta(document, &["description", "og:description", "twitter:description"]),
        published: meta(
            document,
            &["article:published_time", "date", "dc.date", "citation_publication_date", "pubdate"],
        )
        .or_else(|| attr(document.select(&TIME_DATETIME).next(), "datetime")),
        language: attr(document.select(&HTML_LANG).next(), "lang"),
    }
    .normalized()
}

/// First non-empty `content` of a `<meta>` whose `name` or `property`
/// matches one of `keys`, in key order.
fn meta(document: &Html, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let css = format!(r#"meta[name="{key}"], meta[property="{key}"]"#);
        let selector = Selector::parse(&css).ok()?;
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(collapse)
            .find(|v| !v.is_empty())
    })
}

fn attr(el: Option<ElementRef<'_>>, name: &str) -> Option<String> {
    el.and_then(|e| e.value().attr(name)).map(collapse)
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <title>  Fallback   Title </title>
  <meta property="og:title" content="Rust Async in Practice">
  <meta name="description" content="A tour of async Rust.">
  <meta name="author" content="Ana Lopez">
  <meta property="article:published_time" content="2024-03-15T09:00:00Z">
</head>
<body>
  <nav><a href="/">Home</a> <a href="/blog">Blog</a></nav>
  <article>
    <h1>Rust Async in Practice</h1>
    <p>Futures are <strong>lazy</strong>.</p>
    <script>track()</script>
  </article>
  <footer>Copyright</footer>
</body>
</html>"#;

    #[test]
    fn main_content_is_converted_without_chrome() {
        let out = html_to_markdown(PAGE, true).unwrap();
        assert!(out.markdown.contains("# Rust Async in Practice"), "got: {}", out.markdown);
        assert!(out.markdown.contains("**lazy**"));
        assert!(!out.markdown.contains("Home"));
        assert!(!out.markdown.contains("Copyright"));
        assert!(!out.markdown.contains("track()"));
        assert_eq!(out.page_count, None);
    }

    #[test]
    fn full_page_keeps_navigation() {
        let out = html_to_markdown(PAGE, false).unwrap();
        assert!(out.markdown.contains("Home"));
        assert!(out.markdown.contains("Copyright"));
        assert!(!out.markdown.contains("track()"));
    }

    #[test]
    fn head_hints_are_extracted() {
        let info = html_to_markdown(PAGE, true).unwrap().info;
        assert_eq!(info.title.as_deref(), Some("Rust Async in Practice"));
        assert_eq!(info.description.as_deref(), Some("A tour of async Rust."));
        assert_eq!(info.author.as_deref(), Some("Ana Lopez"));
        assert_eq!(info.published.as_deref(), Some("2024-03-15T09:00:00Z"));
        assert_eq!(info.language.as_deref(), Some("en"));
    }

    #[test]
    fn title_tag_is_used_without_og_title() {
        let doc = Html::parse_document("<html><head><title> Plain \n Title </title></head><body></body></html>");
        assert_eq!(page_info(&doc).title.as_deref(), Some("Plain Title"));
    }

    #[test]
    fn script_only_page_yields_near_empty_markdown() {
        let out = html_to_markdown(
            "<html><body><div id=\"root\"></div><script>render()</script></body></html>",
            true,
        )
        .unwrap();
        assert!(out.markdown.trim().is_empty(), "got: {:?}", out.markdown);
    }
}
