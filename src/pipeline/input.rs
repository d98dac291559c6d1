//! Upload validation: size ceiling, extension allow-list, PDF magic bytes.
//!
//! Validation runs before the rate limiter is consulted and before any
//! extraction work, so a rejected upload never mutates state.

use crate::config::ExplainerConfig;
use crate::document::DocumentKind;
use crate::error::ExplainError;
use std::path::Path;
use tracing::debug;

/// A document handed in by the user.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Original file name, used for the extension check and stored with the analysis.
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Keep a copy of the original in the blob store (if one is enabled).
    pub store_original: bool,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            store_original: false,
        }
    }

    pub fn with_store_original(mut self, v: bool) -> Self {
        self.store_original = v;
        self
    }

    /// Read an upload from disk. The stored filename is the final path component.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ExplainError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExplainError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(filename, bytes))
    }

    /// Lower-case extension of the filename, or an empty string.
    pub fn extension(&self) -> String {
        Path::new(&self.filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// MIME type guessed from the filename.
    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// Validate an upload against the configured limits and classify it.
pub fn validate_upload(
    upload: &Upload,
    config: &ExplainerConfig,
) -> Result<DocumentKind, ExplainError> {
    if upload.bytes.len() > config.max_upload_bytes {
        return Err(ExplainError::FileTooLarge {
            size: upload.bytes.len(),
            limit_mb: config.max_upload_mb(),
        });
    }

    let ext = upload.extension();
    if !config.allowed_extensions.iter().any(|a| *a == ext) {
        return Err(ExplainError::UnsupportedFileType {
            extension: ext,
            allowed: config.allowed_extensions.join(", "),
        });
    }

    let kind = DocumentKind::from_extension(&ext);
    if kind == DocumentKind::Pdf && !upload.bytes.starts_with(b"%PDF") {
        return Err(ExplainError::NotAPdf {
            filename: upload.filename.clone(),
            magic: upload.bytes.iter().take(4).copied().collect(),
        });
    }

    debug!(
        "Accepted upload '{}' ({} bytes, {:?})",
        upload.filename,
        upload.bytes.len(),
        kind
    );
    Ok(kind)
}
