//! Text generation: the `generate(prompt) -> text` capability and its
//! `edgequake-llm` adapter.
//!
//! Everything upstream is written against [`TextGenerator`], so the pipeline
//! never sees provider-specific response shapes. Retries live one level up in
//! [`crate::pipeline::retry`]; a generator makes exactly one call per
//! `generate`.

use crate::config::FlashcardConfig;
use crate::error::{FlashcardError, GenerationError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Provider-agnostic single-shot text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Short human-readable name, used in retry logs and failure details.
    fn label(&self) -> String {
        "generator".to_string()
    }
}

/// [`TextGenerator`] backed by an `edgequake-llm` chat provider.
pub struct LlmGenerator {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
    label: String,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &FlashcardConfig) -> Self {
        let label = match (&config.provider_name, &config.model) {
            (Some(p), Some(m)) => format!("{p}/{m}"),
            (Some(p), None) => p.clone(),
            (None, Some(m)) => m.clone(),
            (None, None) => "llm".to_string(),
        };
        Self {
            provider,
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
            label,
        }
    }
}

#[async_trait]
impl TextGenerator for LlmGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let messages = vec![ChatMessage::user(prompt)];
        let start = Instant::now();

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.label,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// Build `CompletionOptions` from the run config.
fn build_options(config: &FlashcardConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, FlashcardError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FlashcardError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the chat provider, from most-specific to least-specific:
///
/// 1. pre-built provider (`config.provider`)
/// 2. named provider + model (`config.provider_name`, `config.model`)
/// 3. `H2A_PROVIDER` (or `LLM_PROVIDER`) with optional `H2A_MODEL`
/// 4. `OPENAI_API_KEY` present → OpenAI
/// 5. `ProviderFactory::from_env()` auto-detection
pub fn resolve_provider(config: &FlashcardConfig) -> Result<Arc<dyn LLMProvider>, FlashcardError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model_or_default = || {
        config
            .model
            .clone()
            .or_else(|| non_empty_env("H2A_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    };

    if let Some(ref name) = config.provider_name {
        return create_provider(name, &model_or_default());
    }

    if let Some(name) = non_empty_env("H2A_PROVIDER").or_else(|| non_empty_env("LLM_PROVIDER")) {
        return create_provider(&name.to_lowercase(), &model_or_default());
    }

    if non_empty_env("OPENAI_API_KEY").is_some() {
        return create_provider("openai", &model_or_default());
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FlashcardError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY, or pass --provider.\n\
                Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}

/// The generator a run will use: `config.generator` if set, else an
/// [`LlmGenerator`] over the resolved provider.
pub fn resolve_generator(config: &FlashcardConfig) -> Result<Arc<dyn TextGenerator>, FlashcardError> {
    if let Some(ref generator) = config.generator {
        return Ok(Arc::clone(generator));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmGenerator::new(provider, config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            Ok(prompt.to_uppercase())
        }
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&FlashcardConfig::default());
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[test]
    fn prebuilt_generator_wins() {
        let config = FlashcardConfig::builder()
            .generator(Arc::new(Echo))
            .provider_name("definitely-not-a-provider")
            .build()
            .unwrap();
        let generator = resolve_generator(&config).unwrap();
        assert_eq!(tokio_test::block_on(generator.generate("q")).unwrap(), "Q");
        assert_eq!(generator.label(), "generator");
    }
}
