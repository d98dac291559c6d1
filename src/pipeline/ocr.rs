//! OCR: bitmap → text through an external engine.
//!
//! The engine is a trait so the extractor can be exercised without a
//! Tesseract install. [`TesseractOcr`] is the production implementation; it
//! shells out to the `tesseract` CLI with a PNG written to a temp file and
//! returns stdout verbatim (no post-processing).

use crate::config::ExplainerConfig;
use crate::error::ExplainError;
use crate::pipeline::encode::encode_png;
use image::DynamicImage;
use std::io::Write;
use std::process::Command;
use tracing::debug;

/// Recognise text in a bitmap.
///
/// Called from the blocking thread pool; implementations may block.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<String, ExplainError>;
}

/// Tesseract CLI backend.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    command: String,
    languages: String,
}

impl TesseractOcr {
    /// `languages` uses Tesseract's `+` syntax, e.g. `eng+deu`.
    pub fn new(command: impl Into<String>, languages: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            languages: languages.into(),
        }
    }

    pub fn from_config(config: &ExplainerConfig) -> Self {
        Self::new(&config.tesseract_cmd, &config.ocr_languages)
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &DynamicImage) -> Result<String, ExplainError> {
        let png = encode_png(image).map_err(|e| ExplainError::OcrFailed {
            detail: format!("PNG encoding failed: {e}"),
        })?;

        let mut input = tempfile::Builder::new()
            .prefix("docexplain-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| ExplainError::OcrFailed {
                detail: format!("tempfile: {e}"),
            })?;
        input
            .write_all(&png)
            .and_then(|_| input.flush())
            .map_err(|e| ExplainError::OcrFailed {
                detail: format!("tempfile write: {e}"),
            })?;

        let output = Command::new(&self.command)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExplainError::OcrFailed {
                        detail: format!(
                            "'{}' not found. Install Tesseract with the '{}' language data or set TESSERACT_CMD.",
                            self.command, self.languages
                        ),
                    }
                } else {
                    ExplainError::OcrFailed {
                        detail: format!("could not run '{}': {e}", self.command),
                    }
                }
            })?;

        if !output.status.success() {
            return Err(ExplainError::OcrFailed {
                detail: format!(
                    "'{}' exited with {}: {}",
                    self.command,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            "OCR ({}) on {}x{} image → {} chars",
            self.languages,
            image.width(),
            image.height(),
            text.len()
        );
        Ok(text)
    }
}
