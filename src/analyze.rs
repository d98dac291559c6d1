//! Analysis engine: document text → validated [`AnalysisResult`].
//!
//! The text is truncated to the configured character budget and sent with
//! the JSON-only analysis prompt. A reply that cannot be read as JSON is
//! retried exactly once, at a lower temperature, with the identical prompt.
//! A reply that parses but lacks a key or has a wrong type fails immediately.

use crate::config::ExplainerConfig;
use crate::document::AnalysisResult;
use crate::error::ExplainError;
use crate::pipeline::json::parse_analysis;
use crate::pipeline::llm::{LanguageModel, LlmMessage, LlmRequest, TokenUsage};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts::{analysis_user_prompt, ANALYSIS_SYSTEM_PROMPT};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Warning emitted before the malformed-JSON retry.
pub const RETRY_WARNING: &str = "Invalid JSON received. Retrying...";

/// Sampling and budget for analysis calls.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub char_budget: usize,
    pub temperature: f32,
    pub retry_temperature: f32,
    pub max_tokens: Option<usize>,
}

impl From<&ExplainerConfig> for AnalysisSettings {
    fn from(config: &ExplainerConfig) -> Self {
        Self {
            char_budget: config.analysis_char_budget,
            temperature: config.analysis_temperature,
            retry_temperature: config.analysis_retry_temperature,
            max_tokens: config.analysis_max_tokens,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self::from(&ExplainerConfig::default())
    }
}

pub struct AnalysisEngine {
    model: Arc<dyn LanguageModel>,
    settings: AnalysisSettings,
    progress: ProgressCallback,
}

impl AnalysisEngine {
    pub fn new(model: Arc<dyn LanguageModel>, settings: AnalysisSettings) -> Self {
        Self {
            model,
            settings,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Analyse `text`. Empty or whitespace-only text fails with
    /// [`ExplainError::NoText`] before any model call.
    pub async fn analyze(&self, text: &str) -> Result<AnalysisResult, ExplainError> {
        self.analyze_with_usage(text).await.map(|(analysis, _)| analysis)
    }

    /// Like [`analyze`](Self::analyze), also returning the tokens spent
    /// across the first call and the retry, if one happened.
    pub async fn analyze_with_usage(
        &self,
        text: &str,
    ) -> Result<(AnalysisResult, TokenUsage), ExplainError> {
        if text.trim().is_empty() {
            return Err(ExplainError::NoText);
        }

        let excerpt = truncate_chars(text, self.settings.char_budget);
        if excerpt.len() < text.len() {
            debug!(
                "Truncated document from {} to {} chars",
                text.chars().count(),
                self.settings.char_budget
            );
        }
        self.progress.on_analysis_start();

        let first = self
            .model
            .complete(&self.build_request(excerpt, self.settings.temperature))
            .await?;
        let mut usage = first.usage();

        match parse_analysis(&first.content) {
            Ok(analysis) => {
                info!("Analysis complete (confidence: {})", analysis.confidence);
                Ok((analysis, usage))
            }
            Err(ExplainError::MalformedJson { detail }) => {
                warn!("Model returned invalid JSON ({}), retrying once", detail);
                self.progress.on_warning(RETRY_WARNING);

                let second = self
                    .model
                    .complete(&self.build_request(excerpt, self.settings.retry_temperature))
                    .await?;
                usage += second.usage();
                let analysis = parse_analysis(&second.content)?;
                info!(
                    "Analysis complete after retry (confidence: {})",
                    analysis.confidence
                );
                Ok((analysis, usage))
            }
            Err(e) => Err(e),
        }
    }

    /// The request sent for `excerpt` at `temperature`.
    pub fn build_request(&self, excerpt: &str, temperature: f32) -> LlmRequest {
        LlmRequest {
            messages: vec![
                LlmMessage::system(ANALYSIS_SYSTEM_PROMPT),
                LlmMessage::user(analysis_user_prompt(excerpt)),
            ],
            temperature,
            max_tokens: self.settings.max_tokens,
            json_mode: true,
        }
    }
}

/// The first `max_chars` Unicode scalar values of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::LlmReply;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const VALID: &str = r#"{"summary":"Rent increase notice.","important_points":["Rent rises by 5%"],"deadlines":["1 March"],"obligations":["Pay new rent"],"risks":[],"recommended_next_steps":["Check the index clause"],"action_items":["Update standing order"],"confidence":"medium"}"#;

    /// Replies in order; records every request.
    struct Scripted {
        replies: Mutex<Vec<&'static str>>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl Scripted {
        fn new(replies: &[&'static str]) -> Arc<Self> {
            let mut r = replies.to_vec();
            r.reverse();
            Arc::new(Self {
                replies: Mutex::new(r),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<LlmRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(&self, request: &LlmRequest) -> Result<LlmReply, ExplainError> {
            self.seen.lock().unwrap().push(request.clone());
            let content = self.replies.lock().unwrap().pop().unwrap_or("").to_string();
            Ok(LlmReply {
                content,
                prompt_tokens: 100,
                completion_tokens: 20,
            })
        }
    }

    fn engine(model: Arc<Scripted>) -> AnalysisEngine {
        AnalysisEngine::new(model, AnalysisSettings::default())
    }

    #[tokio::test]
    async fn valid_reply_needs_one_call() {
        let model = Scripted::new(&[VALID]);
        let a = engine(model.clone()).analyze("Dear tenant").await.unwrap();
        assert_eq!(a.confidence, "medium");
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].temperature, 0.3);
        assert!(calls[0].json_mode);
    }

    #[tokio::test]
    async fn malformed_then_valid_retries_once_at_lower_temperature() {
        let model = Scripted::new(&["Sure! Here you go", VALID]);
        let a = engine(model.clone()).analyze("Dear tenant").await.unwrap();
        assert_eq!(a.summary, "Rent increase notice.");
        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].temperature, 0.1);
        assert_eq!(calls[0].messages, calls[1].messages);
    }

    #[tokio::test]
    async fn two_malformed_replies_fail_without_third_call() {
        let model = Scripted::new(&["nope", "still nope", VALID]);
        let err = engine(model.clone()).analyze("text").await.unwrap_err();
        assert!(matches!(err, ExplainError::MalformedJson { .. }));
        assert_eq!(model.calls().len(), 2);
    }

    #[tokio::test]
    async fn missing_key_is_not_retried() {
        let model = Scripted::new(&[r#"{"summary":"x"}"#, VALID]);
        let err = engine(model.clone()).analyze("text").await.unwrap_err();
        assert!(matches!(
            err,
            ExplainError::MissingField {
                field: "important_points"
            }
        ));
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn blank_text_never_reaches_model() {
        let model = Scripted::new(&[VALID]);
        let err = engine(model.clone()).analyze(" \n\t ").await.unwrap_err();
        assert!(matches!(err, ExplainError::NoText));
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn texts_differing_after_budget_send_identical_requests() {
        let model = Scripted::new(&[VALID, VALID]);
        let settings = AnalysisSettings {
            char_budget: 10,
            ..Default::default()
        };
        let eng = AnalysisEngine::new(model.clone(), settings);
        eng.analyze("ÄÖÜäöüßabcTAIL-A").await.unwrap();
        eng.analyze("ÄÖÜäöüßabcTAIL-B").await.unwrap();

        let calls = model.calls();
        let prompt = &calls[0].messages[1].content;
        assert!(prompt.contains("ÄÖÜäöüßabc"));
        assert!(!prompt.contains("TAIL"));
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn usage_sums_first_call_and_retry() {
        let model = Scripted::new(&["not json", VALID]);
        let (_, usage) = engine(model).analyze_with_usage("text").await.unwrap();
        assert_eq!(usage.prompt_tokens, 200);
        assert_eq!(usage.completion_tokens, 40);

        let model = Scripted::new(&[VALID]);
        let (_, usage) = engine(model).analyze_with_usage("text").await.unwrap();
        assert_eq!(usage.total(), 120);
    }

    #[test]
    fn truncate_counts_scalar_values() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
