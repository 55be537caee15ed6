//! Stage 5: optional AI enrichment of the deterministic metadata.
//!
//! One completion call per document, bounded by `api_timeout_secs` and never
//! retried. The model sees a bounded excerpt plus the provisional title and
//! returns a JSON object. Every field is validated before it may replace a
//! default; `word_count`, `source`, `source_type`, `language` and
//! `page_count` are never touched.
//!
//! Failure of any kind (no provider, auth, quota, timeout, malformed JSON)
//! yields [`Enrichment::Degraded`]; the pipeline keeps the defaults and the
//! invocation still succeeds.

use crate::config::IngestConfig;
use crate::document::{EnrichedMetadata, EnrichmentStatus};
use crate::pipeline::metadata::{clean_authors, parse_date, sanitize_filename, split_authors, truncate_chars};
use crate::pipeline::postprocess::strip_outer_fences;
use crate::prompts::{enrichment_user_prompt, ENRICHMENT_SYSTEM_PROMPT};
use crate::provider::{completion_options, CompletionClient};
use chrono::NaiveDate;
use edgequake_llm::ChatMessage;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on the reply; the JSON object is small.
const ENRICHMENT_MAX_TOKENS: usize = 1024;
const MAX_TAGS: usize = 12;

/// Validated fields returned by the model. `None`/empty means "keep the default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiFields {
    pub filename: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub tags: BTreeSet<String>,
    pub content_type: Option<String>,
    pub publish_date: Option<NaiveDate>,
}

/// What the enrichment stage produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    Enriched(AiFields),
    Degraded { reason: String },
    Disabled,
}

impl Enrichment {
    pub fn status(&self) -> EnrichmentStatus {
        match self {
            Enrichment::Enriched(_) => EnrichmentStatus::Enriched,
            Enrichment::Degraded { reason } => EnrichmentStatus::Degraded {
                reason: reason.clone(),
            },
            Enrichment::Disabled => EnrichmentStatus::Disabled,
        }
    }

    /// Overlay the AI fields on `defaults`. Degraded and disabled results
    /// return the defaults unchanged.
    pub fn apply(&self, defaults: EnrichedMetadata) -> EnrichedMetadata {
        let Enrichment::Enriched(ai) = self else {
            return defaults;
        };
        let mut merged = defaults;
        if let Some(v) = &ai.title {
            merged.title = v.clone();
        }
        if let Some(v) = &ai.description {
            merged.description = v.clone();
        }
        if !ai.authors.is_empty() {
            merged.authors = ai.authors.clone();
        }
        if !ai.tags.is_empty() {
            merged.tags = ai.tags.clone();
        }
        if let Some(v) = &ai.content_type {
            merged.content_type = v.clone();
        }
        if ai.publish_date.is_some() {
            merged.publish_date = ai.publish_date;
        }
        if let Some(v) = &ai.filename {
            merged.filename_suggestion = v.clone();
        }
        merged
    }
}

/// Run the enrichment stage.
///
/// `client` is `None` when no provider could be configured; that degrades
/// rather than fails. With `config.enrich == false` no call is made.
pub async fn enrich(
    defaults: &EnrichedMetadata,
    plain_text: &str,
    client: Option<&dyn CompletionClient>,
    config: &IngestConfig,
) -> Enrichment {
    if !config.enrich {
        debug!("Enrichment disabled");
        return Enrichment::Disabled;
    }
    let Some(client) = client else {
        return degraded("no LLM provider configured");
    };

    let excerpt = truncate_chars(plain_text, config.excerpt_chars);
    let messages = vec![
        ChatMessage::system(ENRICHMENT_SYSTEM_PROMPT),
        ChatMessage::user(enrichment_user_prompt(
            &defaults.title,
            &defaults.source,
            defaults.source_type.as_str(),
            excerpt,
        )),
    ];
    let options = completion_options(config.temperature, ENRICHMENT_MAX_TOKENS);

    info!("Enriching metadata from a {}-char excerpt", excerpt.chars().count());
    let call = client.complete(&messages, &options);
    let reply = match tokio::time::timeout(Duration::from_secs(config.api_timeout_secs), call).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => return degraded(format!("completion failed: {e}")),
        Err(_) => {
            return degraded(format!(
                "completion timed out after {}s",
                config.api_timeout_secs
            ))
        }
    };

    match parse_reply(&reply) {
        Ok(fields) => {
            debug!("Enrichment fields: {:?}", fields);
            Enrichment::Enriched(fields)
        }
        Err(reason) => degraded(reason),
    }
}

fn degraded(reason: impl Into<String>) -> Enrichment {
    let reason = reason.into();
    warn!("AI enrichment degraded, keeping default metadata: {}", reason);
    Enrichment::Degraded { reason }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFields {
    filename: Option<String>,
    title: Option<String>,
    description: Option<String>,
    authors: Value,
    tags: Value,
    content_type: Option<String>,
    publish_date: Option<String>,
}

/// Parse and validate the model's JSON reply.
fn parse_reply(reply: &str) -> Result<AiFields, String> {
    let unfenced = strip_outer_fences(reply);
    let json = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => return Err("reply contained no JSON object".to_string()),
    };
    let raw: RawFields =
        serde_json::from_str(json).map_err(|e| format!("malformed JSON reply: {e}"))?;

    Ok(AiFields {
        filename: non_empty(raw.filename)
            .map(|f| sanitize_filename(f.trim_end_matches(".md")))
            .filter(|f| f != "untitled"),
        title: non_empty(raw.title),
        description: non_empty(raw.description),
        authors: authors_from(raw.authors),
        tags: tags_from(raw.tags),
        content_type: non_empty(raw.content_type)
            .map(|t| t.to_lowercase().replace([' ', '-'], "_")),
        publish_date: raw.publish_date.as_deref().and_then(parse_date),
    })
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty() && s != "null")
}

fn authors_from(value: Value) -> Vec<String> {
    match value {
        Value::String(s) => split_authors(&s),
        Value::Array(items) => clean_authors(items.into_iter().filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })),
        _ => Vec::new(),
    }
}

/// Tags as a clean set: no `#`, lower-case, hyphenated, at most twelve.
fn tags_from(value: Value) -> BTreeSet<String> {
    let raw: Vec<String> = match value {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut tags = BTreeSet::new();
    for tag in raw {
        let normalized = tag
            .trim()
            .trim_start_matches('#')
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        if !normalized.is_empty() {
            tags.insert(normalized);
        }
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use crate::source::SourceType;
    use async_trait::async_trait;
    use edgequake_llm::CompletionOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        reply: Result<String, String>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn err(msg: &str) -> Self {
            Self {
                reply: Err(msg.to_string()),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for Fixed {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<String, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.reply.clone().map_err(CompletionError)
        }
    }

    fn defaults() -> EnrichedMetadata {
        EnrichedMetadata {
            title: "Default Title".into(),
            description: "Default description".into(),
            authors: vec![],
            publish_date: None,
            tags: BTreeSet::from(["document".to_string(), "pdf".to_string()]),
            content_type: "document".into(),
            word_count: 42,
            source_type: SourceType::LocalFile,
            filename_suggestion: "Default-Title-PDF".into(),
            source: "paper.pdf".into(),
            language: Some("en".into()),
            page_count: Some(2),
        }
    }

    fn config() -> IngestConfig {
        IngestConfig::builder().api_timeout_secs(1).build().unwrap()
    }

    const GOOD: &str = r##"```json
{
  "filename": "attention-is-all-you-need.md",
  "title": "Attention Is All You Need",
  "description": "Introduces the Transformer.",
  "authors": ["Ashish Vaswani", " Noam Shazeer ", "unknown", "Ashish Vaswani"],
  "tags": ["#Machine Learning", "transformers", "NLP", ""],
  "content_type": "Research Paper",
  "publish_date": "2017-06-12"
}
```"##;

    #[tokio::test]
    async fn reply_fields_override_defaults() {
        let client = Fixed::ok(GOOD);
        let result = enrich(&defaults(), "We propose the Transformer.", Some(&client), &config()).await;
        assert_eq!(result.status(), EnrichmentStatus::Enriched);

        let merged = result.apply(defaults());
        assert_eq!(merged.title, "Attention Is All You Need");
        assert_eq!(merged.filename_suggestion, "attention-is-all-you-need");
        assert_eq!(merged.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(
            merged.tags,
            BTreeSet::from(["machine-learning".to_string(), "nlp".into(), "transformers".into()])
        );
        assert_eq!(merged.content_type, "research_paper");
        assert_eq!(merged.publish_date, NaiveDate::from_ymd_opt(2017, 6, 12));
        // Locally computed fields are never replaced.
        assert_eq!(merged.word_count, 42);
        assert_eq!(merged.source, "paper.pdf");
        assert_eq!(merged.page_count, Some(2));
    }

    #[tokio::test]
    async fn partial_reply_keeps_remaining_defaults() {
        let client = Fixed::ok(r#"{"title": "New", "authors": [], "tags": [], "publish_date": "sometime"}"#);
        let merged = enrich(&defaults(), "text", Some(&client), &config())
            .await
            .apply(defaults());
        assert_eq!(merged.title, "New");
        assert_eq!(merged.description, "Default description");
        assert_eq!(merged.filename_suggestion, "Default-Title-PDF");
        assert!(merged.tags.contains("pdf"));
        assert_eq!(merged.publish_date, None);
    }

    #[tokio::test]
    async fn api_error_degrades_to_defaults() {
        let client = Fixed::err("401 invalid api key");
        let result = enrich(&defaults(), "text", Some(&client), &config()).await;
        match &result {
            Enrichment::Degraded { reason } => assert!(reason.contains("401"), "got: {reason}"),
            other => panic!("expected degraded, got {other:?}"),
        }
        assert_eq!(result.apply(defaults()), defaults());
    }

    #[tokio::test]
    async fn malformed_json_degrades() {
        let client = Fixed::ok("Sure! Here is your metadata: title = Foo");
        let result = enrich(&defaults(), "text", Some(&client), &config()).await;
        assert!(matches!(result, Enrichment::Degraded { .. }));

        let client = Fixed::ok("{\"title\": ");
        let result = enrich(&defaults(), "text", Some(&client), &config()).await;
        assert!(matches!(result, Enrichment::Degraded { .. }));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let client = Fixed {
            delay: Some(Duration::from_secs(5)),
            ..Fixed::ok(GOOD)
        };
        let result = enrich(&defaults(), "text", Some(&client), &config()).await;
        match result {
            Enrichment::Degraded { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected degraded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_makes_no_call() {
        let client = Fixed::ok(GOOD);
        let cfg = IngestConfig::builder().enrich(false).build().unwrap();
        let result = enrich(&defaults(), "text", Some(&client), &cfg).await;
        assert_eq!(result, Enrichment::Disabled);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_client_degrades() {
        let result = enrich(&defaults(), "text", None, &config()).await;
        assert!(matches!(result, Enrichment::Degraded { .. }));
    }

    #[test]
    fn tags_are_capped_and_string_forms_accepted() {
        let many: Vec<Value> = (0..20).map(|i| Value::String(format!("tag {i}"))).collect();
        assert_eq!(tags_from(Value::Array(many)).len(), MAX_TAGS);
        assert_eq!(
            tags_from(Value::String("Rust, #Async IO".into())),
            BTreeSet::from(["rust".to_string(), "async-io".into()])
        );
        assert_eq!(authors_from(Value::String("A. One and B. Two".into())), vec!["A. One", "B. Two"]);
    }
}
