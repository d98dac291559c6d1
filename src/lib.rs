//! # docexplain
//!
//! Explain official documents (letters, notices, contracts, scans) in plain
//! language with an LLM, then answer follow-up questions about them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (PDF / PNG / JPEG / TIFF)
//!  │
//!  ├─ 1. Validate  size, extension allow-list, PDF magic bytes
//!  ├─ 2. Gate      per-identity analysis limit (rolling 24 h window)
//!  ├─ 3. Extract   pdfium text layer; blank pages rasterised at 2x and OCR'd
//!  ├─ 4. Analyse   one JSON-only LLM call (one retry on malformed JSON)
//!  ├─ 5. Persist   SQLite history; original optionally kept in R2
//!  └─ 6. Chat      grounded Q&A over the analysis and a document excerpt
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docexplain::{ClientInfo, DocumentExplainer, DocumentSession, ExplainerConfig, Gated, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / DOCEXPLAIN_PROVIDER
//!     let explainer = DocumentExplainer::builder()
//!         .config(ExplainerConfig::from_env()?)
//!         .build()
//!         .await?;
//!
//!     let mut session = DocumentSession::new(ClientInfo::new());
//!     let upload = Upload::from_path("letter.pdf").await?;
//!     if let Gated::Allowed(report) = explainer.analyze_upload(&mut session, upload).await? {
//!         println!("{}", report.analysis.render_text());
//!     }
//!
//!     if let Gated::Allowed(answer) = explainer.ask(&mut session, "What is the deadline?").await? {
//!         println!("{answer}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docexplain` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docexplain = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime Requirements
//!
//! - A pdfium shared library on the loader path, or `PDFIUM_LIB_PATH`.
//! - The `tesseract` CLI with `eng` and `deu` language data for scans.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod blob;
pub mod chat;
pub mod config;
pub mod document;
pub mod error;
pub mod explain;
pub mod identity;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rate_limit;
pub mod session;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{AnalysisEngine, AnalysisSettings};
pub use blob::{BlobStore, DisabledBlobStore, R2BlobStore};
pub use chat::{ChatEngine, ChatHistory, ChatRole, ChatSettings, ChatTurn};
pub use config::{ExplainerConfig, ExplainerConfigBuilder, StorageConfig};
pub use document::{AnalysisResult, Confidence, DocumentKind, ExtractedDocument, PageText};
pub use error::ExplainError;
pub use explain::{AnalysisReport, DeletedHistory, DocumentExplainer, DocumentExplainerBuilder, Gated};
pub use identity::{AnonymousIdentity, HeaderIdentity, IdentityResolver, IdentityStrategy, SessionTokenIdentity};
pub use pipeline::input::Upload;
pub use pipeline::llm::{
    EdgequakeModel, LanguageModel, LlmMessage, LlmReply, LlmRequest, Role, TokenUsage,
};
pub use pipeline::ocr::{OcrEngine, TesseractOcr};
pub use progress::{ExplainProgressCallback, NoopProgressCallback, ProgressCallback};
pub use rate_limit::{
    Clock, JsonFileStore, LimitKind, ManualClock, MemoryStore, RateDecision, RateLimitStore,
    RateLimiter, SystemClock, UsageStats,
};
pub use session::{ActiveDocument, ClientInfo, DocumentSession};
pub use store::{AnalysisStore, SqliteAnalysisStore, StoredAnalysis};
