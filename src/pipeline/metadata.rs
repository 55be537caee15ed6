//! Stage 4: deterministic metadata derived from the converted content.
//!
//! Everything here is a pure function of the [`ConvertedContent`] and the
//! [`SourceReference`]; no I/O, no failure mode. Missing information turns
//! into placeholders (`Untitled`, empty description, no authors) rather than
//! errors. The values double as the defaults the enrichment stage starts
//! from, and they are what the user gets with enrichment disabled.
//!
//! Field sources, in priority order:
//!
//! | Field        | Sources                                                          |
//! |--------------|------------------------------------------------------------------|
//! | title        | first ATX heading, engine hint, plausible title line, first 80 chars |
//! | description  | abstract paragraph, engine hint, first paragraph (≤ 500 chars)   |
//! | authors      | engine hint, `Author:` / `By` line in the first 20 lines          |
//! | publish_date | engine hint, first date in the first 2000 chars                  |
//! | language     | engine hint, stop-word frequency                                 |

use crate::document::{ConvertedContent, EnrichedMetadata};
use crate::pipeline::postprocess::markdown_to_text;
use crate::source::{ContentKind, SourceReference, SourceType};
use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};

pub const UNTITLED: &str = "Untitled";

const MAX_DESCRIPTION_CHARS: usize = 500;
const MAX_FILENAME_BYTES: usize = 120;
const TITLE_FALLBACK_CHARS: usize = 80;
const DATE_SCAN_CHARS: usize = 2000;
const LANGUAGE_SCAN_CHARS: usize = 5000;
const MIN_LANGUAGE_HITS: usize = 3;

static RE_ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^ {0,3}#{1,6}[ \t]+(.+?)(?:[ \t]+#+)?[ \t]*$").unwrap());
static RE_AUTHOR_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:authors?|written by|by)\s*[:.]\s*(.+)$").unwrap());
static RE_BYLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i:by)\s+(.+)$").unwrap());
static RE_AUTHOR_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*(?:[,;&]|\band\b)\s*").unwrap());
static RE_ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})[-/](\d{1,2})[-/](\d{1,2})\b").unwrap());
static RE_PDF_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^D:(\d{4})(\d{2})(\d{2})").unwrap());

const MONTH: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?";

static RE_MONTH_DAY_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\b{MONTH}\s+(\d{{1,2}}),?\s+(\d{{4}})\b")).unwrap());
static RE_DAY_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\b(\d{{1,2}})\s+{MONTH},?\s+(\d{{4}})\b")).unwrap());

/// Build the deterministic metadata for one converted document.
pub fn extract_metadata(
    content: &ConvertedContent,
    source: &SourceReference,
    kind: ContentKind,
) -> EnrichedMetadata {
    let info = &content.document_info;
    let source_type = source.source_type();

    let title = default_title(&content.markdown, &content.plain_text, info.title.as_deref());
    let description =
        default_description(&content.plain_text, &title, info.description.as_deref());
    let authors = info
        .author
        .as_deref()
        .map(split_authors)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| authors_from_text(&content.plain_text));
    let publish_date = info
        .published
        .as_deref()
        .and_then(parse_date)
        .or_else(|| find_date(&content.plain_text));
    let content_type = match kind {
        ContentKind::Pdf => pdf_content_type(source_type, &content.plain_text),
        ContentKind::Html => web_content_type(source, &content.plain_text),
    };
    let language = content
        .detected_language
        .clone()
        .or_else(|| detect_language(&content.plain_text));

    EnrichedMetadata {
        filename_suggestion: filename_for(&title, source),
        tags: default_tags(&content_type, source_type, kind),
        title,
        description,
        authors,
        publish_date,
        content_type,
        word_count: content.word_count(),
        source_type,
        source: source.to_string(),
        language,
        page_count: content.page_count,
    }
}

// ── Title ────────────────────────────────────────────────────────────────

fn default_title(markdown: &str, plain_text: &str, hint: Option<&str>) -> String {
    let from_heading = RE_ATX_HEADING
        .captures_iter(markdown)
        .map(|c| collapse(&markdown_to_text(&c[1])))
        .find(|t| !t.is_empty());

    from_heading
        .or_else(|| hint.map(collapse).filter(|t| !t.is_empty()))
        .or_else(|| plausible_title_line(plain_text))
        .or_else(|| {
            let head = truncate_chars(&collapse(plain_text), TITLE_FALLBACK_CHARS)
                .trim()
                .to_string();
            (!head.is_empty()).then_some(head)
        })
        .unwrap_or_else(|| UNTITLED.to_string())
}

/// A line near the top that reads like a title: 10 to 200 chars, starting
/// with an uppercase letter, and not the abstract.
fn plausible_title_line(plain_text: &str) -> Option<String> {
    plain_text
        .lines()
        .take(10)
        .map(str::trim)
        .find(|line| {
            let len = line.chars().count();
            (10..=200).contains(&len)
                && line.chars().next().is_some_and(char::is_uppercase)
                && !line.to_lowercase().starts_with("abstract")
        })
        .map(collapse)
}

// ── Description ──────────────────────────────────────────────────────────

fn default_description(plain_text: &str, title: &str, hint: Option<&str>) -> String {
    let paragraphs: Vec<String> = plain_text
        .split("\n\n")
        .map(collapse)
        .filter(|p| !p.is_empty())
        .collect();

    let chosen = abstract_paragraph(&paragraphs)
        .or_else(|| hint.map(collapse).filter(|h| !h.is_empty()))
        .or_else(|| paragraphs.iter().find(|p| p.as_str() != title).cloned())
        .unwrap_or_default();

    cap_description(&chosen)
}

/// The paragraph introduced by an "Abstract" heading or prefix.
fn abstract_paragraph(paragraphs: &[String]) -> Option<String> {
    let idx = paragraphs.iter().position(|p| {
        p.get(..8).is_some_and(|head| head.eq_ignore_ascii_case("abstract"))
            && !p[8..].starts_with(char::is_alphabetic)
    })?;
    let rest = paragraphs[idx][8..]
        .trim_start_matches(|c: char| c == ':' || c == '.' || c == '-' || c.is_whitespace());
    if !rest.is_empty() {
        return Some(rest.to_string());
    }
    paragraphs.get(idx + 1).cloned()
}

fn cap_description(text: &str) -> String {
    if text.chars().count() > MAX_DESCRIPTION_CHARS {
        format!("{}...", truncate_chars(text, MAX_DESCRIPTION_CHARS).trim_end())
    } else {
        text.to_string()
    }
}

// ── Authors ──────────────────────────────────────────────────────────────

/// Split an author string on `,`, `;`, `&` and the word `and`, dropping
/// placeholders and duplicates.
pub fn split_authors(raw: &str) -> Vec<String> {
    clean_authors(RE_AUTHOR_SPLIT.split(raw).map(str::to_string))
}

/// Trim, drop placeholder names, and deduplicate while keeping order.
pub(crate) fn clean_authors(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|n| collapse(&n))
        .filter(|n| !n.is_empty())
        .filter(|n| !matches!(n.to_lowercase().as_str(), "none" | "n/a" | "unknown" | "anonymous"))
        .filter(|n| seen.insert(n.to_lowercase()))
        .collect()
}

fn authors_from_text(plain_text: &str) -> Vec<String> {
    for line in plain_text.lines().take(20).map(str::trim) {
        if let Some(caps) = RE_AUTHOR_LINE.captures(line) {
            if caps[1].len() < 100 {
                return split_authors(&caps[1]);
            }
        }
        if let Some(caps) = RE_BYLINE.captures(line) {
            if looks_like_names(&caps[1]) {
                return split_authors(&caps[1]);
            }
        }
    }
    Vec::new()
}

/// "By Jane Doe and John Roe", not "By default the server listens...".
fn looks_like_names(s: &str) -> bool {
    let words: Vec<&str> = s.split_whitespace().collect();
    !words.is_empty()
        && words.len() <= 8
        && words.iter().all(|w| {
            matches!(*w, "and" | "&")
                || w.chars().next().is_some_and(char::is_uppercase)
        })
}

// ── Dates ────────────────────────────────────────────────────────────────

/// Parse a date as engines and models report them: ISO dates and
/// timestamps, `YYYY/MM/DD`, PDF `D:YYYYMMDD…`, and month-name forms.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Some(c) = RE_PDF_DATE.captures(s) {
        return ymd(&c[1], &c[2], &c[3]);
    }
    if let Some(c) = RE_ISO_DATE.captures(s).filter(|c| c.get(0).is_some_and(|m| m.start() == 0)) {
        return ymd(&c[1], &c[2], &c[3]);
    }
    for fmt in ["%B %d, %Y", "%B %d %Y", "%d %B %Y", "%b %d, %Y", "%d %b %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

/// The first recognisable date in the first 2000 characters.
fn find_date(plain_text: &str) -> Option<NaiveDate> {
    let head = truncate_chars(plain_text, DATE_SCAN_CHARS);
    let mut found: Vec<(usize, NaiveDate)> = Vec::new();

    if let Some((pos, d)) = RE_ISO_DATE
        .captures_iter(head)
        .find_map(|c| Some((c.get(0)?.start(), ymd(&c[1], &c[2], &c[3])?)))
    {
        found.push((pos, d));
    }
    if let Some((pos, d)) = RE_MONTH_DAY_YEAR
        .captures_iter(head)
        .find_map(|c| Some((c.get(0)?.start(), month_date(&c[3], &c[1], &c[2])?)))
    {
        found.push((pos, d));
    }
    if let Some((pos, d)) = RE_DAY_MONTH_YEAR
        .captures_iter(head)
        .find_map(|c| Some((c.get(0)?.start(), month_date(&c[3], &c[2], &c[1])?)))
    {
        found.push((pos, d));
    }

    found.into_iter().min_by_key(|(pos, _)| *pos).map(|(_, d)| d)
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    if !(1900..=2100).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

fn month_date(year: &str, month_name: &str, day: &str) -> Option<NaiveDate> {
    let prefix = month_name.get(..3)?.to_lowercase();
    let month = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ]
    .iter()
    .position(|m| *m == prefix)?
        + 1;
    ymd(year, &month.to_string(), day)
}

// ── Content type ─────────────────────────────────────────────────────────

const SCHOLARLY_MARKERS: &[&str] = &[
    "abstract",
    "introduction",
    "methodology",
    "related work",
    "conclusion",
    "references",
    "bibliography",
    "doi:",
    "arxiv:",
    "et al.",
];
const MANUAL_MARKERS: &[&str] = &[
    "manual",
    "user guide",
    "instructions",
    "installation",
    "troubleshooting",
    "table of contents",
];
const REPORT_MARKERS: &[&str] = &["executive summary", "report", "findings", "analysis"];
const BOOK_MARKERS: &[&str] = &["chapter", "preface", "foreword", "isbn"];
const TUTORIAL_MARKERS: &[&str] = &["step 1", "tutorial", "how to"];

/// `(path patterns, content type)` for web pages, checked in order.
const URL_PATTERNS: &[(&[&str], &str)] = &[
    (&["/blog/", "/news/", "/article/", "/articles/", "/posts/"], "article"),
    (&["/docs/", "/documentation/", "/guide/", "/reference/"], "documentation"),
    (&["/tutorial/", "/tutorials/", "/how-to/", "/learn/"], "tutorial"),
    (&["/about/", "/contact/", "/company/"], "page"),
    (&["/product/", "/products/", "/service/", "/pricing/"], "product"),
];

fn pdf_content_type(source_type: SourceType, plain_text: &str) -> String {
    if source_type == SourceType::Arxiv {
        return "research_paper".into();
    }
    let lower = plain_text.to_lowercase();
    let hits = |markers: &[&str]| markers.iter().filter(|m| lower.contains(*m)).count();

    if hits(SCHOLARLY_MARKERS) >= 2 {
        "research_paper"
    } else if hits(MANUAL_MARKERS) > 0 {
        "manual"
    } else if hits(REPORT_MARKERS) > 0 {
        "report"
    } else if hits(BOOK_MARKERS) > 0 {
        "book"
    } else {
        "document"
    }
    .into()
}

fn web_content_type(source: &SourceReference, plain_text: &str) -> String {
    if let Some(url) = source.url() {
        let path = format!("{}/", url.path().to_lowercase().trim_end_matches('/'));
        if let Some((_, kind)) = URL_PATTERNS
            .iter()
            .find(|(patterns, _)| patterns.iter().any(|p| path.contains(p)))
        {
            return (*kind).into();
        }
        if url.host_str().is_some_and(|h| h.starts_with("docs.")) {
            return "documentation".into();
        }
    }

    let lower = plain_text.to_lowercase();
    if TUTORIAL_MARKERS.iter().any(|m| lower.contains(m)) {
        "tutorial"
    } else if plain_text.split_whitespace().count() > 500 {
        "article"
    } else {
        "page"
    }
    .into()
}

// ── Language ─────────────────────────────────────────────────────────────

const STOP_WORDS: &[(&str, &[&str])] = &[
    ("en", &["the", "and", "of", "to", "is", "in", "that", "with", "for", "this", "are", "was", "be"]),
    ("es", &["el", "los", "las", "que", "del", "una", "por", "con", "para", "es", "se", "como", "y"]),
    ("fr", &["le", "les", "des", "est", "une", "du", "et", "que", "pour", "dans", "pas", "qui", "sur"]),
    ("de", &["der", "die", "das", "und", "ist", "nicht", "mit", "ein", "eine", "den", "zu", "auf", "für"]),
    ("it", &["il", "di", "che", "della", "sono", "per", "una", "gli", "con", "non", "del", "è", "nel"]),
    ("pt", &["os", "uma", "não", "do", "da", "em", "que", "para", "com", "dos", "por", "são", "como"]),
    ("nl", &["het", "een", "van", "en", "niet", "dat", "op", "te", "zijn", "voor", "met", "de", "ook"]),
];

/// Best-effort language tag from stop-word frequency.
///
/// Returns `None` when no language reaches three stop-word hits. Ties go to
/// the language listed first.
pub fn detect_language(text: &str) -> Option<String> {
    let head = truncate_chars(text, LANGUAGE_SCAN_CHARS).to_lowercase();
    let words: Vec<&str> = head
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    let mut best: Option<(&str, usize)> = None;
    for (lang, stops) in STOP_WORDS {
        let hits = words.iter().filter(|w| stops.contains(*w)).count();
        if hits >= MIN_LANGUAGE_HITS && best.map_or(true, |(_, b)| hits > b) {
            best = Some((*lang, hits));
        }
    }
    best.map(|(lang, _)| lang.to_string())
}

// ── Tags and filename ────────────────────────────────────────────────────

fn default_tags(content_type: &str, source_type: SourceType, kind: ContentKind) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    tags.insert(content_type.replace('_', "-"));
    tags.insert(
        match kind {
            ContentKind::Pdf => "pdf",
            ContentKind::Html => "web",
        }
        .to_string(),
    );
    if source_type == SourceType::Arxiv {
        tags.insert("arxiv".to_string());
    }
    tags.retain(|t| !t.is_empty());
    tags
}

/// `"{title}-{source id}"`, sanitised.
pub fn filename_for(title: &str, source: &SourceReference) -> String {
    sanitize_filename(&format!("{title}-{}", source.short_id()))
}

/// Make `name` safe as a file name on every common file system.
///
/// Reserved characters and control characters are removed, whitespace and
/// hyphen runs become one `-`, leading/trailing `-` and `.` are trimmed and
/// the result is capped at 120 bytes. Never empty: falls back to `untitled`.
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let mut out = String::with_capacity(kept.len());
    let mut pending_dash = false;
    for c in kept.chars() {
        if c.is_whitespace() || c == '-' {
            pending_dash = true;
            continue;
        }
        if pending_dash && !out.is_empty() {
            out.push('-');
        }
        pending_dash = false;
        out.push(c);
    }

    let capped = truncate_bytes(&out, MAX_FILENAME_BYTES);
    let trimmed = capped.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// The first `max` characters of `s`, cut on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
