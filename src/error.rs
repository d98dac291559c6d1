//! Error types for the docexplain library.
//!
//! Every fallible operation returns [`ExplainError`]. Variants are grouped by
//! the layer that produced them so callers can render a precise message:
//!
//! * **Input**: the upload or question was rejected before any work started.
//!   No state was mutated.
//! * **Extraction**: pdfium, the image decoder or the OCR tool failed. The
//!   whole document is aborted; there is no partial-page salvage.
//! * **LLM**: transport failures, and the two contract failures
//!   ([`ExplainError::MalformedJson`] after the single retry, and
//!   [`ExplainError::MissingField`] / [`ExplainError::InvalidField`] which are
//!   never retried).
//! * **Storage / config**: collaborator failures and misconfiguration.
//!
//! A rate-limit denial is *not* an error; see [`crate::explain::Gated`].

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the docexplain library.
#[derive(Debug, Error)]
pub enum ExplainError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Upload file could not be read from disk.
    #[error("Could not read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Upload is larger than the configured ceiling.
    #[error("File size exceeds {limit_mb} MB limit ({size} bytes)")]
    FileTooLarge { size: usize, limit_mb: usize },

    /// File extension is not on the allow-list.
    #[error("Unsupported file type '{extension}'. Allowed: {allowed}")]
    UnsupportedFileType { extension: String, allowed: String },

    /// Extension says PDF but the bytes do not start with `%PDF`.
    #[error("File '{filename}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { filename: String, magic: Vec<u8> },

    /// Extraction produced nothing but whitespace, or analysis was called with empty text.
    #[error("No text could be extracted from the document")]
    NoText,

    /// The follow-up question was empty.
    #[error("Question must not be empty")]
    EmptyQuestion,

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// PDF header/trailer/xref is corrupt, or the document is encrypted.
    #[error("PDF '{filename}' could not be opened: {detail}")]
    CorruptPdf { filename: String, detail: String },

    /// Text-layer extraction failed for a page.
    #[error("Text extraction failed for page {page}: {detail}")]
    TextLayerFailed { page: usize, detail: String },

    /// pdfium could not rasterise a page for OCR.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Image upload could not be decoded.
    #[error("Could not decode image '{filename}': {detail}")]
    ImageDecodeFailed { filename: String, detail: String },

    /// The OCR engine failed or is not installed.
    #[error("OCR failed: {detail}")]
    OcrFailed { detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error after all transport retries.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// A single LLM call exceeded the configured timeout.
    #[error("LLM call timed out after {elapsed_ms}ms")]
    ApiTimeout { elapsed_ms: u64 },

    /// The model answered with something that is not a JSON object, twice.
    #[error("Model returned malformed JSON: {detail}")]
    MalformedJson { detail: String },

    /// The JSON object lacks one of the required analysis keys.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// A required key is present but holds the wrong type.
    #[error("Field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    // ── Chat errors ───────────────────────────────────────────────────────
    /// Chat was requested before any document was analysed in this session.
    #[error("No analysed document in this session; analyse a document before asking questions")]
    NoActiveDocument,

    // ── Storage errors ────────────────────────────────────────────────────
    /// The analysis database failed.
    #[error("Analysis store error: {0}")]
    Store(String),

    /// The rate-limit state file could not be written.
    #[error("Rate-limit store error at '{path}': {detail}")]
    RateLimitStore { path: PathBuf, detail: String },

    /// Blob storage is enabled but credentials are incomplete.
    #[error("Object storage is enabled but {missing} is not set")]
    BlobStorageMisconfigured { missing: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExplainError {
    /// True for failures caused by the upload or question itself.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ExplainError::ReadFailed { .. }
                | ExplainError::FileTooLarge { .. }
                | ExplainError::UnsupportedFileType { .. }
                | ExplainError::NotAPdf { .. }
                | ExplainError::NoText
                | ExplainError::EmptyQuestion
        )
    }

    /// True for violations of the analysis JSON contract.
    pub fn is_contract_error(&self) -> bool {
        matches!(
            self,
            ExplainError::MalformedJson { .. }
                | ExplainError::MissingField { .. }
                | ExplainError::InvalidField { .. }
        )
    }
}

impl From<rusqlite::Error> for ExplainError {
    fn from(e: rusqlite::Error) -> Self {
        ExplainError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_too_large_display() {
        let e = ExplainError::FileTooLarge {
            size: 30 * 1024 * 1024,
            limit_mb: 20,
        };
        assert!(e.to_string().contains("20 MB"), "got: {e}");
        assert!(e.is_input_error());
    }

    #[test]
    fn missing_field_display() {
        let e = ExplainError::MissingField { field: "deadlines" };
        assert_eq!(e.to_string(), "Missing required field: deadlines");
        assert!(e.is_contract_error());
        assert!(!e.is_input_error());
    }

    #[test]
    fn malformed_json_is_distinct_from_missing_field() {
        let malformed = ExplainError::MalformedJson {
            detail: "expected value at line 1".into(),
        };
        assert!(malformed.is_contract_error());
        assert!(!matches!(malformed, ExplainError::MissingField { .. }));
    }

    #[test]
    fn api_timeout_display() {
        let e = ExplainError::ApiTimeout { elapsed_ms: 5000 };
        assert!(e.to_string().contains("5000ms"));
    }

    #[test]
    fn blob_misconfigured_display() {
        let e = ExplainError::BlobStorageMisconfigured {
            missing: "R2_ACCOUNT_ID".into(),
        };
        assert!(e.to_string().contains("R2_ACCOUNT_ID"));
    }
}
