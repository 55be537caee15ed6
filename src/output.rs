//! Stage 6: render a [`Conversion`] into its final artifact.
//!
//! Rendering is a total, deterministic function of the converted content and
//! its metadata: the same inputs always produce byte-identical output. The
//! conversion timestamp is taken when the content is produced, never here.

use crate::document::{Conversion, ConvertedContent, EnrichedMetadata, EnrichmentStatus};
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputFormat {
    /// Plain text only.
    #[default]
    Text,
    /// Markdown body behind a YAML frontmatter block.
    Markdown,
    /// A JSON document with source, metadata and content.
    Json,
}

impl OutputFormat {
    /// File extension used when writing this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Text => "text",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!(
                "unknown output format '{other}' (expected text, markdown or json)"
            )),
        }
    }
}

/// The rendered result of one invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputArtifact {
    PlainText(String),
    MarkdownWithFrontmatter(String),
    JsonDocument(String),
}

impl OutputArtifact {
    pub fn as_str(&self) -> &str {
        match self {
            OutputArtifact::PlainText(s)
            | OutputArtifact::MarkdownWithFrontmatter(s)
            | OutputArtifact::JsonDocument(s) => s,
        }
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            OutputArtifact::PlainText(_) => OutputFormat::Text,
            OutputArtifact::MarkdownWithFrontmatter(_) => OutputFormat::Markdown,
            OutputArtifact::JsonDocument(_) => OutputFormat::Json,
        }
    }

    pub fn extension(&self) -> &'static str {
        self.format().extension()
    }

    pub fn into_string(self) -> String {
        match self {
            OutputArtifact::PlainText(s)
            | OutputArtifact::MarkdownWithFrontmatter(s)
            | OutputArtifact::JsonDocument(s) => s,
        }
    }
}

impl fmt::Display for OutputArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output paths handed out during one run.
///
/// A batch names each file after its `filename_suggestion`; two documents
/// with the same title on the same host would otherwise share a path and the
/// later write would replace the earlier note. Clashes get `-2`, `-3`, ...
#[derive(Debug, Default)]
pub struct OutputNames {
    taken: HashSet<PathBuf>,
}

impl OutputNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `dir/<stem>.<ext>`, or the first free numbered variant.
    pub fn claim(&mut self, dir: &Path, stem: &str, ext: &str) -> PathBuf {
        let mut path = dir.join(format!("{stem}.{ext}"));
        let mut n = 2u32;
        while self.taken.contains(&path) {
            path = dir.join(format!("{stem}-{n}.{ext}"));
            n += 1;
        }
        self.taken.insert(path.clone());
        path
    }
}

impl Conversion {
    /// Render this conversion in `format`.
    pub fn render(&self, format: OutputFormat) -> OutputArtifact {
        render(&self.content, &self.metadata, &self.enrichment, format)
    }
}

/// Render converted content and metadata in `format`.
pub fn render(
    content: &ConvertedContent,
    metadata: &EnrichedMetadata,
    enrichment: &EnrichmentStatus,
    format: OutputFormat,
) -> OutputArtifact {
    match format {
        OutputFormat::Text => OutputArtifact::PlainText(content.plain_text.clone()),
        OutputFormat::Markdown => {
            OutputArtifact::MarkdownWithFrontmatter(render_markdown(content, metadata, enrichment))
        }
        OutputFormat::Json => OutputArtifact::JsonDocument(render_json(content, metadata, enrichment)),
    }
}

fn render_markdown(
    content: &ConvertedContent,
    meta: &EnrichedMetadata,
    enrichment: &EnrichmentStatus,
) -> String {
    let mut doc = format_frontmatter(content, meta, enrichment);
    doc.push('\n');
    doc.push_str(content.markdown.trim_end());
    doc.push('\n');
    doc
}

/// YAML frontmatter. Key order: title, description, authors, publish_date
/// (if present), tags, source, source_type, word_count, then conversion
/// details.
fn format_frontmatter(
    content: &ConvertedContent,
    meta: &EnrichedMetadata,
    enrichment: &EnrichmentStatus,
) -> String {
    let mut yaml = String::from("---\n");

    yaml.push_str(&format!("title: {}\n", yaml_str(&meta.title)));
    yaml.push_str(&format!("description: {}\n", yaml_str(&meta.description)));
    yaml.push_str(&format!("authors: {}\n", yaml_list(meta.authors.iter())));
    if let Some(date) = meta.publish_date {
        yaml.push_str(&format!("publish_date: {}\n", date.format("%Y-%m-%d")));
    }
    yaml.push_str(&format!("tags: {}\n", yaml_list(meta.tags.iter())));
    yaml.push_str(&format!("source: {}\n", yaml_str(&meta.source)));
    yaml.push_str(&format!("source_type: {}\n", meta.source_type));
    yaml.push_str(&format!("word_count: {}\n", meta.word_count));

    yaml.push_str(&format!("content_type: {}\n", yaml_str(&meta.content_type)));
    if let Some(lang) = &meta.language {
        yaml.push_str(&format!("language: {}\n", yaml_str(lang)));
    }
    if let Some(pages) = meta.page_count {
        yaml.push_str(&format!("page_count: {pages}\n"));
    }
    yaml.push_str(&format!("conversion_method: {}\n", content.conversion_method));
    yaml.push_str(&format!("engine: {}\n", yaml_str(&content.engine)));
    yaml.push_str(&format!("enrichment: {}\n", enrichment.as_str()));
    yaml.push_str(&format!(
        "converted_at: {}\n",
        yaml_str(&content.converted_at.to_rfc3339())
    ));

    yaml.push_str("---\n");
    yaml
}

fn render_json(
    content: &ConvertedContent,
    meta: &EnrichedMetadata,
    enrichment: &EnrichmentStatus,
) -> String {
    let doc = json!({
        "source": meta.source,
        "metadata": meta,
        "content": {
            "markdown": content.markdown,
            "text": content.plain_text,
        },
        "conversion": {
            "method": content.conversion_method,
            "engine": content.engine,
            "fallback_reason": content.fallback_reason,
            "enrichment": enrichment,
            "converted_at": content.converted_at.to_rfc3339(),
        },
    });
    format!("{doc:#}\n")
}

/// Double-quoted YAML scalar.
fn yaml_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Flow-style YAML sequence of quoted strings; `[]` when empty.
fn yaml_list<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let quoted: Vec<String> = items.map(|s| yaml_str(s)).collect();
    format!("[{}]", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ConversionMethod, DocumentInfo, EngineOutput};
    use crate::source::{SourceReference, SourceType};
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn fixture() -> Conversion {
        let mut content = ConvertedContent::from_engine(
            EngineOutput {
                markdown: "# Title\n\nBody with **bold**.\n".into(),
                page_count: Some(1),
                info: DocumentInfo::default(),
            },
            ConversionMethod::Fallback,
            "vision-llm",
        );
        content.converted_at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        content.fallback_reason = Some("primary produced 0 chars".into());

        let metadata = EnrichedMetadata {
            title: "Title: \"quoted\"".into(),
            description: "Line one\nline two".into(),
            authors: vec!["Ana Lopez".into()],
            publish_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            tags: BTreeSet::from(["pdf".to_string(), "research-paper".into()]),
            content_type: "research_paper".into(),
            word_count: content.word_count(),
            source_type: SourceType::LocalFile,
            filename_suggestion: "Title-PDF".into(),
            source: "paper.pdf".into(),
            language: Some("en".into()),
            page_count: Some(1),
        };

        Conversion {
            source: SourceReference::LocalPath("paper.pdf".into()),
            content,
            metadata,
            enrichment: EnrichmentStatus::Disabled,
        }
    }

    #[test]
    fn text_is_plain_text() {
        let doc = fixture();
        let out = doc.render(OutputFormat::Text);
        assert_eq!(out.as_str(), doc.content.plain_text);
        assert!(out.as_str().starts_with("Title\n\nBody with bold."));
        assert_eq!(out.extension(), "txt");
    }

    #[test]
    fn text_adds_no_trailing_newline() {
        let mut doc = fixture();
        doc.content.plain_text = "Hello world".into();
        assert_eq!(doc.render(OutputFormat::Text).as_str(), "Hello world");
    }

    #[test]
    fn frontmatter_keys_are_ordered_and_escaped() {
        let out = fixture().render(OutputFormat::Markdown);
        let s = out.as_str();
        assert!(s.starts_with("---\ntitle: \"Title: \\\"quoted\\\"\"\n"));

        let keys: Vec<&str> = s
            .lines()
            .skip(1)
            .take_while(|l| *l != "---")
            .filter_map(|l| l.split(':').next())
            .collect();
        assert_eq!(
            &keys[..8],
            &[
                "title",
                "description",
                "authors",
                "publish_date",
                "tags",
                "source",
                "source_type",
                "word_count"
            ]
        );
        assert!(s.contains("description: \"Line one\\nline two\"\n"));
        assert!(s.contains("tags: [\"pdf\", \"research-paper\"]\n"));
        assert!(s.contains("publish_date: 2024-03-15\n"));
        assert!(s.contains("conversion_method: fallback\n"));
        assert!(s.ends_with("---\n\n# Title\n\nBody with **bold**.\n"));
    }

    #[test]
    fn missing_date_is_omitted() {
        let mut c = fixture();
        c.metadata.publish_date = None;
        c.metadata.authors.clear();
        let s = c.render(OutputFormat::Markdown).into_string();
        assert!(!s.contains("publish_date"));
        assert!(s.contains("authors: []\n"));
    }

    #[test]
    fn json_has_the_documented_shape() {
        let out = fixture().render(OutputFormat::Json);
        let v: serde_json::Value = serde_json::from_str(out.as_str()).unwrap();
        assert_eq!(v["source"], "paper.pdf");
        assert_eq!(v["metadata"]["word_count"], 4);
        assert_eq!(v["metadata"]["publish_date"], "2024-03-15");
        assert_eq!(v["metadata"]["source_type"], "local_file");
        assert_eq!(v["content"]["markdown"], "# Title\n\nBody with **bold**.\n");
        assert_eq!(v["content"]["text"], "Title\n\nBody with bold.");
        assert_eq!(v["conversion"]["method"], "fallback");
        assert_eq!(v["conversion"]["enrichment"]["status"], "disabled");
    }

    #[test]
    fn json_rendering_is_deterministic() {
        let c = fixture();
        assert_eq!(c.render(OutputFormat::Json), c.render(OutputFormat::Json));
    }

    #[test]
    fn formats_parse_from_strings() {
        assert_eq!("MD".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Markdown.to_string(), "markdown");
    }

    #[test]
    fn clashing_names_get_numbered() {
        let mut names = OutputNames::new();
        let dir = Path::new("notes");
        assert_eq!(names.claim(dir, "Home-example.com", "md"), dir.join("Home-example.com.md"));
        assert_eq!(names.claim(dir, "Home-example.com", "md"), dir.join("Home-example.com-2.md"));
        assert_eq!(names.claim(dir, "Home-example.com", "md"), dir.join("Home-example.com-3.md"));
        // Same stem, other extension or directory, is a different file.
        assert_eq!(names.claim(dir, "Home-example.com", "json"), dir.join("Home-example.com.json"));
        assert_eq!(
            names.claim(Path::new("other"), "Home-example.com", "md"),
            Path::new("other").join("Home-example.com.md")
        );
    }
}
