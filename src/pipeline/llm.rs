//! LLM interaction: provider-neutral requests and the edgequake-llm adapter.
//!
//! The analysis and chat engines build an [`LlmRequest`] and hand it to a
//! [`LanguageModel`]. [`EdgequakeModel`] is the production implementation; it
//! owns the transport concerns (per-call timeout, retries with exponential
//! backoff) so the engines only deal with prompts and parsing.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient. Transport failures are retried with
//! `retry_backoff_ms * 2^attempt` between attempts. A timeout is not retried;
//! it surfaces as [`ExplainError::ApiTimeout`]. This is independent of the
//! single malformed-JSON retry done by the analysis engine.

use crate::config::ExplainerConfig;
use crate::error::ExplainError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub messages: Vec<LlmMessage>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    /// The caller expects a single JSON object back.
    pub json_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmReply {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl LlmReply {
    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
        }
    }
}

/// Tokens billed across one or more completion calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmReply, ExplainError>;
}

/// [`LanguageModel`] backed by an edgequake-llm provider.
pub struct EdgequakeModel {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl EdgequakeModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExplainerConfig) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(config.api_timeout_secs),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Resolve a provider from the config and environment and wrap it.
    pub fn from_config(config: &ExplainerConfig) -> Result<Self, ExplainError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl LanguageModel for EdgequakeModel {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmReply, ExplainError> {
        let messages = to_chat_messages(&request.messages);
        let options = build_options(request);
        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "LLM retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.provider.chat(&messages, Some(&options));
            match timeout(self.timeout, call).await {
                Err(_) => {
                    return Err(ExplainError::ApiTimeout {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    })
                }
                Ok(Ok(response)) => {
                    debug!(
                        "LLM call: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(LlmReply {
                        content: response.content,
                        prompt_tokens: response.prompt_tokens,
                        completion_tokens: response.completion_tokens,
                    });
                }
                Ok(Err(e)) => {
                    let msg = format!("{}", e);
                    warn!("LLM attempt {} failed: {}", attempt + 1, msg);
                    last_err = Some(msg);
                }
            }
        }

        Err(ExplainError::LlmApiError {
            message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

fn to_chat_messages(messages: &[LlmMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => ChatMessage::system(&m.content),
            Role::User => ChatMessage::user(&m.content),
            Role::Assistant => ChatMessage::assistant(&m.content),
        })
        .collect()
}

/// JSON mode maps to `response_format = "json_object"` on providers that honour it.
fn build_options(request: &LlmRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: request.max_tokens,
        response_format: request.json_mode.then(|| "json_object".to_string()),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExplainError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExplainError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Named provider** (`config.provider_name`, `DOCEXPLAIN_PROVIDER`) with
///    `config.model`.
/// 2. **OpenAI** when `OPENAI_API_KEY` is set and non-empty.
/// 3. **Auto-detection** (`ProviderFactory::from_env`) over every API key
///    variable the factory knows.
pub fn resolve_provider(config: &ExplainerConfig) -> Result<Arc<dyn LLMProvider>, ExplainError> {
    if let Some(ref name) = config.provider_name {
        info!("Using provider '{}' with model '{}'", name, config.model);
        return create_provider(name, &config.model);
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            info!("Using provider 'openai' with model '{}'", config.model);
            return create_provider("openai", &config.model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExplainError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY in your environment or .env file, or set DOCEXPLAIN_PROVIDER.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}
