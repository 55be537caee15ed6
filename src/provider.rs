//! LLM access for the enrichment stage and the vision fallback.
//!
//! Both pipelines talk to language models through the small
//! [`CompletionClient`] trait rather than to `edgequake-llm` directly. The
//! production implementation, [`LlmClient`], wraps an
//! `Arc<dyn LLMProvider>`; tests substitute scripted clients, so retry,
//! timeout and parsing behaviour is covered without network access.
//!
//! [`resolve_provider`] is a start-up helper for binaries: it walks the
//! usual configuration sources once and returns a provider to put into
//! [`crate::IngestConfig::provider`]. Pipeline stages never call it.

use crate::error::CompletionError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::{debug, info};

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A chat-completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `messages` and return the text of the reply.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

/// [`CompletionClient`] backed by an `edgequake-llm` provider.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let response = self
            .provider
            .chat(messages, Some(options))
            .await
            .map_err(|e| CompletionError(e.to_string()))?;
        debug!(
            "LLM call: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Build the client both LLM stages use, if a provider was configured.
pub fn client_for(provider: Option<&Arc<dyn LLMProvider>>) -> Option<Arc<dyn CompletionClient>> {
    provider.map(|p| Arc::new(LlmClient::new(Arc::clone(p))) as Arc<dyn CompletionClient>)
}

/// Completion options shared by every call.
pub fn completion_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

/// Resolve an LLM provider, from most specific to least specific.
///
/// 1. **Named provider** (`provider_name`, with `model` or [`DEFAULT_MODEL`]).
/// 2. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set.
/// 3. **OpenAI key** `OPENAI_API_KEY`, preferred when several keys exist.
/// 4. **Auto-detection** via `ProviderFactory::from_env`.
///
/// Returns a human-readable hint when nothing could be resolved; callers
/// decide whether that is fatal (it never is for enrichment).
pub fn resolve_provider(
    provider_name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, String> {
    let model_or_default = model.unwrap_or(DEFAULT_MODEL);

    if let Some(name) = provider_name {
        return create(name, model_or_default);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create(&prov, model.unwrap_or(&env_model));
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create("openai", model_or_default);
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
        format!(
            "no LLM provider could be auto-detected; set OPENAI_API_KEY, \
             ANTHROPIC_API_KEY or --provider ({e})"
        )
    })?;
    info!("LLM provider auto-detected from environment");
    Ok(llm)
}

fn create(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, String> {
    let provider = ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| format!("provider '{name}' could not be configured: {e}"))?;
    info!("LLM provider: {} (model {})", name, model);
    Ok(provider)
}
