//! The document explainer: upload → extracted text → analysis → chat.
//!
//! [`DocumentExplainer`] wires the pipeline stages to the rate limiter, the
//! analysis history and the optional blob store. Every operation takes the
//! caller's [`DocumentSession`] explicitly.
//!
//! Rate-limited operations return [`Gated`]: a denial is an ordinary outcome,
//! not an error. Usage is only counted after the gated action succeeded, so
//! a failed analysis or chat call can be retried without penalty.

use crate::analyze::{AnalysisEngine, AnalysisSettings};
use crate::blob::{self, BlobStore};
use crate::chat::{ChatEngine, ChatSettings};
use crate::config::ExplainerConfig;
use crate::document::{AnalysisResult, DocumentKind, ExtractedDocument};
use crate::error::ExplainError;
use crate::identity::IdentityResolver;
use crate::pipeline::extract;
use crate::pipeline::input::{validate_upload, Upload};
use crate::pipeline::llm::{EdgequakeModel, LanguageModel, TokenUsage};
use crate::pipeline::ocr::{OcrEngine, TesseractOcr};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::rate_limit::{
    Clock, JsonFileStore, LimitKind, RateDecision, RateLimitStore, RateLimiter, SystemClock,
    UsageStats,
};
use crate::session::{ActiveDocument, DocumentSession};
use crate::store::{AnalysisStore, NewAnalysis, SqliteAnalysisStore, StoredAnalysis};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of a rate-limited operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Gated<T> {
    Allowed(T),
    Denied(RateDecision),
}

impl<T> Gated<T> {
    pub fn allowed(self) -> Option<T> {
        match self {
            Gated::Allowed(v) => Some(v),
            Gated::Denied(_) => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Gated::Denied(_))
    }
}

/// Result of a completed analysis.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub filename: String,
    pub kind: DocumentKind,
    pub analysis: AnalysisResult,
    /// Characters of extracted text, before truncation.
    pub extracted_chars: usize,
    pub ocr_pages: Vec<usize>,
    /// Row id in the analysis history, if the save succeeded.
    pub record_id: Option<i64>,
    /// Blob key of the stored original, if one was stored.
    pub storage_key: Option<String>,
    /// Analyses left in the current window.
    pub remaining: u32,
    /// Non-fatal problems (history or blob store unavailable).
    pub warnings: Vec<String>,
    /// Tokens spent on the analysis, retry included.
    pub usage: TokenUsage,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedHistory {
    pub records: usize,
    pub blobs_deleted: usize,
}

pub struct DocumentExplainer {
    config: ExplainerConfig,
    analysis: AnalysisEngine,
    chat: ChatEngine,
    ocr: Arc<dyn OcrEngine>,
    store: Arc<dyn AnalysisStore>,
    blobs: Arc<dyn BlobStore>,
    limiter: RateLimiter,
    identity: IdentityResolver,
    progress: ProgressCallback,
}

impl DocumentExplainer {
    pub fn builder() -> DocumentExplainerBuilder {
        DocumentExplainerBuilder::default()
    }

    pub fn config(&self) -> &ExplainerConfig {
        &self.config
    }

    pub fn blobs_enabled(&self) -> bool {
        self.blobs.is_enabled()
    }

    /// Validate and extract an upload without analysing it.
    pub async fn extract(&self, upload: &Upload) -> Result<ExtractedDocument, ExplainError> {
        let kind = validate_upload(upload, &self.config)?;
        self.extract_kind(upload, kind).await
    }

    async fn extract_kind(
        &self,
        upload: &Upload,
        kind: DocumentKind,
    ) -> Result<ExtractedDocument, ExplainError> {
        extract::extract(
            upload.bytes.clone(),
            upload.filename.clone(),
            kind,
            &self.config,
            Arc::clone(&self.ocr),
            Arc::clone(&self.progress),
        )
        .await
    }

    /// Analyse an upload and make it the session's active document.
    ///
    /// Order: validate, check the analysis limit, extract, analyse, store the
    /// original (if requested), save to history, count usage. A rejected
    /// upload or a denied request leaves every store untouched.
    pub async fn analyze_upload(
        &self,
        session: &mut DocumentSession,
        upload: Upload,
    ) -> Result<Gated<AnalysisReport>, ExplainError> {
        let start = Instant::now();
        let kind = validate_upload(&upload, &self.config)?;

        let identity = self.identity.resolve(&session.client);
        let decision = self.limiter.check(&identity, LimitKind::Analysis)?;
        if !decision.allowed {
            return Ok(Gated::Denied(decision));
        }

        info!("Analysing '{}' ({:?})", upload.filename, kind);
        let doc = self.extract_kind(&upload, kind).await?;
        let text = doc.full_text();
        if text.trim().is_empty() {
            return Err(ExplainError::NoText);
        }
        let (analysis, usage) = self.analysis.analyze_with_usage(&text).await?;

        let mut warnings = Vec::new();

        let storage_key = if upload.store_original && self.blobs.is_enabled() {
            let key = self
                .blobs
                .upload(&upload.bytes, &upload.filename, &upload.content_type())
                .await;
            if key.is_none() {
                self.warn(
                    &mut warnings,
                    "The original document could not be stored; the analysis is unaffected.",
                );
            }
            key
        } else {
            None
        };

        let record = NewAnalysis {
            filename: &upload.filename,
            uploaded_at: Utc::now(),
            analysis: &analysis,
            storage_key: storage_key.as_deref(),
            storage_enabled: storage_key.is_some(),
        };
        let record_id = match self.store.save(&record) {
            Ok(id) => {
                self.progress.on_analysis_saved(id);
                Some(id)
            }
            Err(e) => {
                warn!("Saving analysis of '{}' failed: {}", upload.filename, e);
                self.warn(
                    &mut warnings,
                    &format!("The analysis could not be saved to history: {e}"),
                );
                None
            }
        };

        if let Err(e) = self.limiter.increment(&identity, LimitKind::Analysis) {
            warn!("Recording analysis usage failed: {}", e);
        }

        let report = AnalysisReport {
            filename: upload.filename.clone(),
            kind,
            analysis: analysis.clone(),
            extracted_chars: text.chars().count(),
            ocr_pages: doc.ocr_pages(),
            record_id,
            storage_key: storage_key.clone(),
            remaining: decision.remaining.saturating_sub(1),
            warnings,
            usage,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        session.begin_document(ActiveDocument {
            filename: upload.filename,
            text,
            analysis,
            record_id,
            storage_key,
        });

        info!(
            "Analysis of '{}' finished in {}ms",
            report.filename, report.duration_ms
        );
        Ok(Gated::Allowed(report))
    }

    /// Ask a question about the session's active document.
    pub async fn ask(
        &self,
        session: &mut DocumentSession,
        question: &str,
    ) -> Result<Gated<String>, ExplainError> {
        if question.trim().is_empty() {
            return Err(ExplainError::EmptyQuestion);
        }
        if session.active().is_none() {
            return Err(ExplainError::NoActiveDocument);
        }

        let identity = self.identity.resolve(&session.client);
        let decision = self.limiter.check(&identity, LimitKind::Chat)?;
        if !decision.allowed {
            return Ok(Gated::Denied(decision));
        }

        let (doc, history) = session
            .chat_parts()
            .ok_or(ExplainError::NoActiveDocument)?;
        let answer = self
            .chat
            .ask(question, &doc.text, &doc.analysis, history)
            .await?;

        if let Err(e) = self.limiter.increment(&identity, LimitKind::Chat) {
            warn!("Recording chat usage failed: {}", e);
        }
        Ok(Gated::Allowed(answer))
    }

    pub fn usage(&self, session: &DocumentSession) -> Result<UsageStats, ExplainError> {
        let identity = self.identity.resolve(&session.client);
        self.limiter.stats(&identity)
    }

    /// Stored analyses, newest first.
    pub fn history(&self) -> Result<Vec<StoredAnalysis>, ExplainError> {
        self.store.list_all()
    }

    pub fn history_count(&self) -> Result<usize, ExplainError> {
        self.store.count()
    }

    /// Delete every stored analysis, then their stored originals (best effort).
    pub async fn delete_history(&self) -> Result<DeletedHistory, ExplainError> {
        let summary = self.store.delete_all()?;
        let blobs_deleted = if summary.storage_keys.is_empty() {
            0
        } else {
            self.blobs.delete_many(&summary.storage_keys).await
        };
        if blobs_deleted < summary.storage_keys.len() {
            warn!(
                "{} of {} stored originals could not be deleted",
                summary.storage_keys.len() - blobs_deleted,
                summary.storage_keys.len()
            );
        }
        Ok(DeletedHistory {
            records: summary.count,
            blobs_deleted,
        })
    }

    pub async fn download_original(&self, storage_key: &str) -> Option<Vec<u8>> {
        self.blobs.download(storage_key).await
    }

    fn warn(&self, warnings: &mut Vec<String>, message: &str) {
        self.progress.on_warning(message);
        warnings.push(message.to_string());
    }
}

/// Builder for [`DocumentExplainer`]. Unset collaborators are created from
/// the config: edgequake provider, Tesseract, SQLite at `database_url`,
/// blob store per `storage`, JSON rate-limit file, system clock.
#[derive(Default)]
pub struct DocumentExplainerBuilder {
    config: Option<ExplainerConfig>,
    model: Option<Arc<dyn LanguageModel>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    store: Option<Arc<dyn AnalysisStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    rate_store: Option<Arc<dyn RateLimitStore>>,
    clock: Option<Arc<dyn Clock>>,
    identity: Option<IdentityResolver>,
    progress: Option<ProgressCallback>,
}

impl DocumentExplainerBuilder {
    pub fn config(mut self, config: ExplainerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn analysis_store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn identity(mut self, resolver: IdentityResolver) -> Self {
        self.identity = Some(resolver);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub async fn build(self) -> Result<DocumentExplainer, ExplainError> {
        let config = self.config.unwrap_or_default();
        let progress = self
            .progress
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));

        let model: Arc<dyn LanguageModel> = match self.model {
            Some(m) => m,
            None => Arc::new(EdgequakeModel::from_config(&config)?),
        };
        let ocr = self
            .ocr
            .unwrap_or_else(|| Arc::new(TesseractOcr::from_config(&config)));
        let store: Arc<dyn AnalysisStore> = match self.store {
            Some(s) => s,
            None => Arc::new(SqliteAnalysisStore::from_database_url(&config.database_url)?),
        };
        let blobs = match self.blobs {
            Some(b) => b,
            None => blob::from_config(&config.storage).await?,
        };
        let rate_store = self
            .rate_store
            .unwrap_or_else(|| Arc::new(JsonFileStore::new(&config.rate_limit_path)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let identity = self
            .identity
            .unwrap_or_else(|| IdentityResolver::standard(&config.user_id_path));

        let limiter = RateLimiter::new(
            rate_store,
            clock,
            config.analysis_limit,
            config.chat_limit,
            config.rate_window_hours,
        );
        let analysis = AnalysisEngine::new(Arc::clone(&model), AnalysisSettings::from(&config))
            .with_progress(Arc::clone(&progress));
        let chat = ChatEngine::new(model, ChatSettings::from(&config));

        Ok(DocumentExplainer {
            config,
            analysis,
            chat,
            ocr,
            store,
            blobs,
            limiter,
            identity,
            progress,
        })
    }
}
