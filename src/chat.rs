//! Follow-up questions about the analysed document.
//!
//! Each question is answered from a fixed grounding block (analysis summary,
//! four of its lists, and a document excerpt) plus a sliding window of the
//! most recent conversation turns. History is only extended after a
//! successful answer, so a failed call can be retried as-is.

use crate::analyze::truncate_chars;
use crate::config::ExplainerConfig;
use crate::document::AnalysisResult;
use crate::error::ExplainError;
use crate::pipeline::llm::{LanguageModel, LlmMessage, LlmRequest};
use crate::prompts::{chat_context, CHAT_SYSTEM_PROMPT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Ordered conversation about the active document.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        self.turns.push(ChatTurn {
            role,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[ChatTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub context_chars: usize,
    pub temperature: f32,
    pub max_tokens: usize,
    pub history_window: usize,
}

impl From<&ExplainerConfig> for ChatSettings {
    fn from(config: &ExplainerConfig) -> Self {
        Self {
            context_chars: config.chat_context_chars,
            temperature: config.chat_temperature,
            max_tokens: config.chat_max_tokens,
            history_window: config.chat_history_window,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&ExplainerConfig::default())
    }
}

pub struct ChatEngine {
    model: Arc<dyn LanguageModel>,
    settings: ChatSettings,
}

impl ChatEngine {
    pub fn new(model: Arc<dyn LanguageModel>, settings: ChatSettings) -> Self {
        Self { model, settings }
    }

    /// Answer `question` and, on success, append both turns to `history`.
    pub async fn ask(
        &self,
        question: &str,
        document_text: &str,
        analysis: &AnalysisResult,
        history: &mut ChatHistory,
    ) -> Result<String, ExplainError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ExplainError::EmptyQuestion);
        }

        let request = self.build_request(question, document_text, analysis, history);
        debug!(
            "Chat request: {} messages ({} history turns)",
            request.messages.len(),
            request.messages.len() - 3
        );
        let reply = self.model.complete(&request).await?;

        history.push(ChatRole::User, question);
        history.push(ChatRole::Assistant, reply.content.clone());
        Ok(reply.content)
    }

    /// System prompt, grounding turn, recent history, then the question.
    pub fn build_request(
        &self,
        question: &str,
        document_text: &str,
        analysis: &AnalysisResult,
        history: &ChatHistory,
    ) -> LlmRequest {
        let excerpt = truncate_chars(document_text, self.settings.context_chars);
        let mut messages = vec![
            LlmMessage::system(CHAT_SYSTEM_PROMPT),
            LlmMessage::user(chat_context(analysis, excerpt)),
        ];
        messages.extend(
            history
                .recent(self.settings.history_window)
                .iter()
                .map(|turn| match turn.role {
                    ChatRole::User => LlmMessage::user(&turn.content),
                    ChatRole::Assistant => LlmMessage::assistant(&turn.content),
                }),
        );
        messages.push(LlmMessage::user(question));

        LlmRequest {
            messages,
            temperature: self.settings.temperature,
            max_tokens: Some(self.settings.max_tokens),
            json_mode: false,
        }
    }
}
