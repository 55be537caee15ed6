//! Source references: where the raw content of one invocation comes from.
//!
//! A [`SourceReference`] is parsed once from the user's input string and then
//! carried through every stage. Parsing is where URL validation happens, so a
//! malformed URL fails with [`IngestError::InvalidSource`] before any network
//! I/O. arXiv links are rewritten here to their PDF-fetch form.

use crate::error::IngestError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// Which pipeline a source is fed into.
///
/// The PDF pipeline treats scheme-less input as a local path. The web
/// pipeline only ever fetches URLs and assumes `https://` when the scheme is
/// missing (`example.com/post` is a URL, not a file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Pdf,
    Html,
}

impl ContentKind {
    /// Human-readable label used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            ContentKind::Pdf => "PDF",
            ContentKind::Html => "HTML",
        }
    }
}

/// Provenance class recorded in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    LocalFile,
    Url,
    Arxiv,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::LocalFile => "local_file",
            SourceType::Url => "url",
            SourceType::Arxiv => "arxiv",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, validated source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReference {
    /// A file on the local file system.
    LocalPath(PathBuf),
    /// An http(s) URL. For the PDF pipeline arXiv links are normalised to end in `.pdf`.
    RemoteUrl(Url),
}

/// `arxiv.org/abs/<id>` or `arxiv.org/pdf/<id>[.pdf]`, optionally versioned.
static RE_ARXIV_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/(?:abs|pdf)/((?:\d{4}\.\d{4,5}|[a-z\-]+(?:\.[A-Z]{2})?/\d{7})(?:v\d+)?)(?:\.pdf)?/?$")
        .expect("valid regex")
});

impl SourceReference {
    /// Parse the user's input for the given pipeline.
    pub fn parse(input: &str, kind: ContentKind) -> Result<Self, IngestError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(IngestError::invalid(input, "empty source"));
        }

        let has_scheme = trimmed.contains("://");
        if !has_scheme && kind == ContentKind::Pdf {
            return Ok(SourceReference::LocalPath(PathBuf::from(trimmed)));
        }

        let candidate = if has_scheme {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };
        let url = Url::parse(&candidate)
            .map_err(|e| IngestError::invalid(input, format!("malformed URL: {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(IngestError::invalid(
                    input,
                    format!("unsupported URL scheme '{other}' (expected http or https)"),
                ))
            }
        }
        if url.host_str().map_or(true, |h| h.is_empty()) {
            return Err(IngestError::invalid(input, "URL has no host"));
        }

        let url = match kind {
            ContentKind::Pdf => normalize_arxiv(url),
            ContentKind::Html => url,
        };
        Ok(SourceReference::RemoteUrl(url))
    }

    /// Provenance class of this source.
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceReference::LocalPath(_) => SourceType::LocalFile,
            SourceReference::RemoteUrl(url) if is_arxiv(url) => SourceType::Arxiv,
            SourceReference::RemoteUrl(_) => SourceType::Url,
        }
    }

    /// The URL, if this is a remote source.
    pub fn url(&self) -> Option<&Url> {
        match self {
            SourceReference::RemoteUrl(url) => Some(url),
            SourceReference::LocalPath(_) => None,
        }
    }

    /// Short identifier used as the filename suffix:
    /// `arXiv`, the domain without `www.`, or `PDF` for local files.
    pub fn short_id(&self) -> String {
        match self {
            SourceReference::LocalPath(_) => "PDF".to_string(),
            SourceReference::RemoteUrl(url) if is_arxiv(url) => "arXiv".to_string(),
            SourceReference::RemoteUrl(url) => url
                .host_str()
                .map(|h| h.trim_start_matches("www.").to_string())
                .unwrap_or_else(|| "web".to_string()),
        }
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceReference::LocalPath(p) => write!(f, "{}", p.display()),
            SourceReference::RemoteUrl(u) => f.write_str(u.as_str()),
        }
    }
}

fn is_arxiv(url: &Url) -> bool {
    matches!(url.host_str(), Some("arxiv.org") | Some("www.arxiv.org") | Some("export.arxiv.org"))
        && url.path().starts_with("/pdf/")
        && RE_ARXIV_PATH.is_match(url.path())
}

/// Rewrite arXiv abstract and extension-less PDF links to `/pdf/<id>.pdf`.
fn normalize_arxiv(mut url: Url) -> Url {
    if !matches!(url.host_str(), Some("arxiv.org") | Some("www.arxiv.org") | Some("export.arxiv.org")) {
        return url;
    }
    let id = match RE_ARXIV_PATH.captures(url.path()) {
        Some(caps) => caps[1].to_string(),
        None => return url,
    };
    url.set_path(&format!("/pdf/{id}.pdf"));
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arxiv_pdf_link_gains_extension() {
        let s = SourceReference::parse("https://arxiv.org/pdf/2506.05296", ContentKind::Pdf).unwrap();
        assert_eq!(s.source_type(), SourceType::Arxiv);
        assert!(s.url().unwrap().as_str().ends_with(".pdf"));
        assert_eq!(s.to_string(), "https://arxiv.org/pdf/2506.05296.pdf");
    }

    #[test]
    fn arxiv_abs_link_is_rewritten_to_pdf() {
        let s = SourceReference::parse("https://arxiv.org/abs/2506.05296v2", ContentKind::Pdf).unwrap();
        assert_eq!(s.to_string(), "https://arxiv.org/pdf/2506.05296v2.pdf");
        assert_eq!(s.short_id(), "arXiv");
    }

    #[test]
    fn arxiv_link_already_normalised_is_unchanged() {
        let s = SourceReference::parse("https://arxiv.org/pdf/2506.05296.pdf", ContentKind::Pdf).unwrap();
        assert_eq!(s.to_string(), "https://arxiv.org/pdf/2506.05296.pdf");
    }

    #[test]
    fn arxiv_abs_link_stays_a_page_for_the_web_pipeline() {
        let s = SourceReference::parse("https://arxiv.org/abs/2506.05296", ContentKind::Html).unwrap();
        assert_eq!(s.to_string(), "https://arxiv.org/abs/2506.05296");
        assert_eq!(s.source_type(), SourceType::Url);
        assert_eq!(s.short_id(), "arxiv.org");
    }

    #[test]
    fn arxiv_listing_pages_are_plain_urls() {
        let s = SourceReference::parse("https://arxiv.org/list/cs.AI/recent", ContentKind::Html).unwrap();
        assert_eq!(s.source_type(), SourceType::Url);
    }

    #[test]
    fn schemeless_pdf_input_is_a_local_path() {
        let s = SourceReference::parse("papers/report.pdf", ContentKind::Pdf).unwrap();
        assert_eq!(s, SourceReference::LocalPath(PathBuf::from("papers/report.pdf")));
        assert_eq!(s.source_type(), SourceType::LocalFile);
        assert_eq!(s.short_id(), "PDF");
    }

    #[test]
    fn schemeless_web_input_gets_https() {
        let s = SourceReference::parse("www.example.com/blog/post", ContentKind::Html).unwrap();
        assert_eq!(s.to_string(), "https://www.example.com/blog/post");
        assert_eq!(s.source_type(), SourceType::Url);
        assert_eq!(s.short_id(), "example.com");
    }

    #[test]
    fn non_http_scheme_is_invalid() {
        let err = SourceReference::parse("ftp://example.com/a.pdf", ContentKind::Pdf).unwrap_err();
        assert!(matches!(err, IngestError::InvalidSource { .. }));
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(SourceReference::parse("   ", ContentKind::Html).is_err());
    }

    #[test]
    fn malformed_url_is_invalid() {
        let err = SourceReference::parse("https://", ContentKind::Html).unwrap_err();
        assert!(matches!(err, IngestError::InvalidSource { .. }));
    }

    #[test]
    fn source_type_serialises_snake_case() {
        assert_eq!(serde_json::to_string(&SourceType::LocalFile).unwrap(), "\"local_file\"");
        assert_eq!(SourceType::Arxiv.to_string(), "arxiv");
    }
}
