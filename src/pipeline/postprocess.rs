//! Post-processing: Markdown cleanup and Markdown → plain-text derivation.
//!
//! Every engine's output passes through [`clean_markdown`] before it becomes
//! [`crate::document::ConvertedContent`], so downstream stages see the same
//! shape whether pdfium, htmd, a vision model or Firecrawl produced it.
//! Vision pages first go through [`clean_vision_page`], which also removes
//! the artefacts only a model produces (wrapping fences, invented images).
//!
//! [`markdown_to_text`] derives the plain text used for word counts,
//! language detection, the fallback threshold and the enrichment excerpt.
//!
//! ## Rule order
//!
//! Line endings are normalised before any line-based rule runs; invisible
//! characters are removed before blank-line collapsing so a line holding only
//! a zero-width space counts as blank.

use once_cell::sync::Lazy;
use regex::Regex;

// ── Markdown cleanup ─────────────────────────────────────────────────────────

/// Normalise Markdown produced by any engine.
///
/// 1. CRLF / CR → LF
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Blank line before every ATX heading
/// 5. Collapse runs of blank lines to one
/// 6. Exactly one final newline (empty input stays empty)
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = space_headings(&s);
    let s = collapse_blank_lines(&s);
    finish(&s)
}

/// Cleanup for one page transcribed by a vision model.
///
/// Strips an outer ```` ```markdown ```` fence, replaces invented image links
/// with their caption, drops repeated table separator rows, then applies
/// [`clean_markdown`].
pub fn clean_vision_page(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = remove_placeholder_images(&s);
    let s = drop_repeated_table_separators(&s);
    clean_markdown(&s)
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Remove a single fence wrapping the whole input, e.g. ```` ```json … ``` ````.
pub fn strip_outer_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_ATX_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

fn space_headings(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_code = false;
    for line in input.lines() {
        if is_fence(line) {
            in_code = !in_code;
        }
        if !in_code && RE_ATX_HEADING.is_match(line) {
            if let Some(prev) = out.last() {
                if !prev.is_empty() {
                    out.push("");
                }
            }
        }
        out.push(line);
    }
    out.join("\n")
}

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUNS.replace_all(input, "\n\n").into_owned()
}

fn finish(input: &str) -> String {
    let trimmed = input.trim_matches('\n');
    if trimmed.trim().is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

// Images the model made up: relative paths, empty targets, or placeholder
// hosts. The alt text survives as an italic caption.
static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "placehold.it",
    "dummyimage.com",
    "picsum.photos",
    "lorempixel.com",
];

fn is_placeholder_target(target: &str) -> bool {
    let t = target.trim();
    let Some(rest) = t.strip_prefix("https://").or_else(|| t.strip_prefix("http://")) else {
        return true;
    };
    let host = rest.split('/').next().unwrap_or_default();
    PLACEHOLDER_HOSTS
        .iter()
        .any(|p| host == *p || host.ends_with(&format!(".{p}")))
}

fn remove_placeholder_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            if !is_placeholder_target(&caps[2]) {
                return caps[0].to_string();
            }
            match caps[1].trim() {
                "" => String::new(),
                alt => format!("*{alt}*"),
            }
        })
        .into_owned()
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|')
        && t.contains('-')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// GFM allows one separator row, right under the header. Models sometimes
/// repeat it between body rows.
fn drop_repeated_table_separators(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut seen_separator = false;
    for line in input.lines() {
        if !is_table_row(line) {
            seen_separator = false;
            out.push(line);
            continue;
        }
        if is_separator_row(line) {
            if seen_separator {
                continue;
            }
            seen_separator = true;
        }
        out.push(line);
    }
    out.join("\n")
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

// ── Markdown → plain text ────────────────────────────────────────────────────

static RE_HTML_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(?:-\s*){3,}|(?:\*\s*){3,}|(?:_\s*){3,})$").unwrap());
static RE_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:>\s?)+").unwrap());
static RE_HEADING_MARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+(.*?)(?:\s+#+)?$").unwrap());
static RE_LIST_MARK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*+]|\d{1,9}[.)])\s+(?:\[[ xX]\]\s+)?").unwrap());
static RE_INLINE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\](?:\([^)]*\)|\[[^\]]*\])").unwrap());
static RE_AUTOLINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(https?://[^>\s]+)>").unwrap());
static RE_HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").unwrap());
static RE_CODE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`+([^`]+)`+").unwrap());
static RE_STRONG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\*\*|__)(\S(?:.*?\S)?)(\*\*|__)").unwrap());
static RE_EM_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(\S(?:[^*]*?\S)?)\*").unwrap());
static RE_EM_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^\w])_(\S(?:[^_]*?\S)?)_([^\w]|$)").unwrap());
static RE_STRIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").unwrap());

/// Strip Markdown formatting, keeping the readable text.
///
/// Code block contents are kept verbatim; fences, rules, table separators and
/// HTML comments disappear. Paragraph breaks survive as a single blank line.
/// The result is non-empty whenever `markdown` is non-empty.
pub fn markdown_to_text(markdown: &str) -> String {
    let without_comments = RE_HTML_COMMENT.replace_all(markdown, "");
    let mut lines: Vec<String> = Vec::new();
    let mut in_code = false;

    for raw in without_comments.lines() {
        if is_fence(raw) {
            in_code = !in_code;
            continue;
        }
        if in_code {
            lines.push(raw.trim_end().to_string());
            continue;
        }
        let line = raw.trim();
        if RE_RULE.is_match(line) || is_separator_row(line) {
            lines.push(String::new());
            continue;
        }
        lines.push(strip_inline(strip_block_markers(line)));
    }

    let joined = lines.join("\n");
    let text = RE_BLANK_RUNS.replace_all(&joined, "\n\n").trim().to_string();
    if text.is_empty() && !markdown.is_empty() {
        markdown.to_string()
    } else {
        text
    }
}

fn strip_block_markers(line: &str) -> String {
    let line = RE_QUOTE.replace(line, "");
    let line = match RE_HEADING_MARK.captures(&line) {
        Some(caps) => caps[1].to_string(),
        None => line.into_owned(),
    };
    RE_LIST_MARK.replace(&line, "").into_owned()
}

fn strip_inline(line: String) -> String {
    let s = RE_INLINE_IMAGE.replace_all(&line, "$1");
    let s = RE_LINK.replace_all(&s, "$1");
    let s = RE_AUTOLINK.replace_all(&s, "$1");
    let s = RE_HTML_TAG.replace_all(&s, "");
    let s = RE_CODE_SPAN.replace_all(&s, "$1");
    let s = RE_STRONG.replace_all(&s, "$2");
    let s = RE_EM_STAR.replace_all(&s, "$1");
    let s = RE_EM_UNDERSCORE.replace_all(&s, "$1$2$3");
    let s = RE_STRIKE.replace_all(&s, "$1");
    let s = if is_table_row(&s) {
        s.trim().trim_matches('|').replace('|', " ")
    } else {
        s.into_owned()
    };
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Count non-whitespace characters, the measure used by the fallback threshold.
pub fn content_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
