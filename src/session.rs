//! Per-user session state: who is asking, and which document is active.

use crate::chat::ChatHistory;
use crate::document::AnalysisResult;
use std::collections::HashMap;

/// Request metadata used to derive a rate-limit identity.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    headers: HashMap<String, String>,
    pub session_token: Option<String>,
}

impl ClientInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header names are case-insensitive.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// The most recently analysed document.
#[derive(Debug, Clone)]
pub struct ActiveDocument {
    pub filename: String,
    pub text: String,
    pub analysis: AnalysisResult,
    /// Row id in the analysis store, when the save succeeded.
    pub record_id: Option<i64>,
    /// Blob key of the stored original, when one was uploaded.
    pub storage_key: Option<String>,
}

/// Session context passed to every explainer operation.
///
/// Holds at most one active document; analysing a new one replaces it and
/// clears the chat history.
#[derive(Debug, Clone, Default)]
pub struct DocumentSession {
    pub client: ClientInfo,
    active: Option<ActiveDocument>,
    history: ChatHistory,
}

impl DocumentSession {
    pub fn new(client: ClientInfo) -> Self {
        Self {
            client,
            ..Default::default()
        }
    }

    pub fn begin_document(&mut self, document: ActiveDocument) {
        self.active = Some(document);
        self.history.clear();
    }

    pub fn active(&self) -> Option<&ActiveDocument> {
        self.active.as_ref()
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn clear_chat(&mut self) {
        self.history.clear();
    }

    /// Split borrow: the active document and mutable chat history.
    pub(crate) fn chat_parts(&mut self) -> Option<(&ActiveDocument, &mut ChatHistory)> {
        self.active.as_ref().map(|doc| (doc, &mut self.history))
    }
}
