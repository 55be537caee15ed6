//! Prompts for the two LLM calls the pipelines make.
//!
//! Keeping every prompt here means wording changes never touch retry or
//! parsing logic, and tests can inspect the prompts without a live model.
//!
//! * [`VISION_SYSTEM_PROMPT`]: transcribe one rasterised PDF page.
//! * [`ENRICHMENT_SYSTEM_PROMPT`] + [`enrichment_user_prompt`]: derive note
//!   metadata from a bounded excerpt as a single JSON object.

/// System prompt for the vision fallback, sent once per page.
pub const VISION_SYSTEM_PROMPT: &str = r#"You are an expert document converter. Convert the PDF page image to clean, well-structured Markdown.

Follow these rules precisely:

1. TEXT
   - Preserve ALL text content in human reading order
   - Correct recognition errors only when completely certain

2. STRUCTURE
   - # for the page title (at most one), ## for sections, ### for subsections
   - - for unordered lists, 1. 2. 3. for ordered lists, keep nesting
   - **bold** and *italic* matching the visual emphasis

3. TABLES
   - GFM pipe tables with alignment markers; HTML only when pipes cannot express it

4. CODE AND FORMULAS
   - Fenced code blocks with a language identifier, inline code in backticks
   - LaTeX for math: $inline$ and $$display$$

5. IGNORE
   - Page numbers, running headers and footers, decorative rules

6. OUTPUT
   - Output ONLY the Markdown, starting directly with the page content
   - Do NOT wrap the output in ```markdown fences
   - Do NOT add commentary or "Page X of Y" markers
   - Describe figures in one italic line instead of inventing image links"#;

/// System prompt for the enrichment call.
pub const ENRICHMENT_SYSTEM_PROMPT: &str = r#"You catalogue documents for a Markdown note-taking vault. Given an excerpt and context, reply with ONE JSON object and nothing else:

{
  "filename": "short descriptive file name, words joined by hyphens, no extension",
  "title": "the document's real title",
  "description": "one or two sentences summarising the document",
  "authors": ["Full Name", "..."],
  "tags": ["lowercase-hyphenated", "..."],
  "content_type": "one of: research_paper, article, documentation, tutorial, report, manual, book, product, page, document",
  "publish_date": "YYYY-MM-DD or null"
}

Rules:
- Use only information present in the excerpt or context; never invent authors or dates.
- Use [] for unknown authors and null for an unknown date.
- 3 to 8 tags covering topic, technology and category. No '#' prefixes.
- Do not wrap the JSON in code fences."#;

/// Build the user message for the enrichment call.
pub fn enrichment_user_prompt(
    default_title: &str,
    source: &str,
    source_type: &str,
    excerpt: &str,
) -> String {
    format!(
        "Context:\n- Provisional title: {default_title}\n- Source: {source}\n- Source type: {source_type}\n\n\
         Excerpt:\n\"\"\"\n{excerpt}\n\"\"\""
    )
}
