//! Configuration types for document analysis.
//!
//! All behaviour is controlled through [`ExplainerConfig`], built via
//! [`ExplainerConfigBuilder`] or loaded from the environment with
//! [`ExplainerConfig::from_env`]. Defaults:
//! `gpt-4o-mini`, 8 000 characters of document per analysis, 10 analyses and
//! 20 chat messages per identity per 24 hours, 20 MB uploads.

use crate::error::ExplainError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Extensions accepted by default. Matching is case-insensitive.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tiff"];

/// Longest accepted rate-limit window: one year.
pub const MAX_RATE_WINDOW_HOURS: u64 = 24 * 366;

/// Configuration for the explainer and every engine it drives.
///
/// # Example
/// ```rust
/// use docexplain::ExplainerConfig;
///
/// let config = ExplainerConfig::builder()
///     .model("gpt-4o-mini")
///     .analysis_limit(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.analysis_limit, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ExplainerConfig {
    // ── LLM ──────────────────────────────────────────────────────────────
    /// Model identifier passed to the provider. Default: `gpt-4o-mini`.
    pub model: String,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from API-key variables.
    pub provider_name: Option<String>,

    /// Characters of document text sent for analysis. Default: 8000.
    ///
    /// Counted in Unicode scalar values. Longer documents are silently cut to
    /// this prefix.
    pub analysis_char_budget: usize,

    /// Sampling temperature of the first analysis attempt. Default: 0.3.
    pub analysis_temperature: f32,

    /// Sampling temperature of the single malformed-JSON retry. Default: 0.1.
    pub analysis_retry_temperature: f32,

    /// Output cap for analysis calls. Default: None (provider default).
    pub analysis_max_tokens: Option<usize>,

    /// Characters of document text included in the chat grounding context.
    /// Must not exceed `analysis_char_budget`. Default: 3000.
    pub chat_context_chars: usize,

    /// Sampling temperature for chat answers. Default: 0.7.
    pub chat_temperature: f32,

    /// Output cap for chat answers. Default: 1000.
    pub chat_max_tokens: usize,

    /// Number of prior chat turns forwarded with each question. Default: 6.
    pub chat_history_window: usize,

    /// Per-call LLM timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Transport-level retries per LLM call (timeouts, 5xx). Default: 2.
    ///
    /// Independent of the malformed-JSON retry, which always happens exactly
    /// once.
    pub max_retries: u32,

    /// Initial transport retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    // ── Extraction ───────────────────────────────────────────────────────
    /// Tesseract language set. Default: `eng+deu`.
    pub ocr_languages: String,

    /// Linear scale used when rasterising a PDF page for OCR. Default: 2.0.
    pub ocr_scale: f32,

    /// Tesseract executable. Default: `tesseract` (resolved via PATH).
    pub tesseract_cmd: String,

    /// Directory holding libpdfium. If None, the system library is used.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Upload size ceiling in bytes. Default: 20 MB.
    pub max_upload_bytes: usize,

    /// Lower-case extensions accepted for upload.
    pub allowed_extensions: Vec<String>,

    // ── Rate limiting ────────────────────────────────────────────────────
    /// Analyses allowed per identity per window. Default: 10.
    pub analysis_limit: u32,

    /// Chat messages allowed per identity per window. Default: 20.
    pub chat_limit: u32,

    /// Rolling window length in hours. Default: 24.
    pub rate_window_hours: u64,

    /// JSON file holding the per-identity counters. Default: `.rate_limits.json`.
    pub rate_limit_path: PathBuf,

    /// File persisting the anonymous fallback identity. Default: `.user_id`.
    pub user_id_path: PathBuf,

    // ── Persistence ──────────────────────────────────────────────────────
    /// Analysis database URL. Default: `sqlite:///./documents.db`.
    pub database_url: String,

    /// Optional object storage for original uploads.
    pub storage: StorageConfig,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            provider_name: None,
            analysis_char_budget: 8000,
            analysis_temperature: 0.3,
            analysis_retry_temperature: 0.1,
            analysis_max_tokens: None,
            chat_context_chars: 3000,
            chat_temperature: 0.7,
            chat_max_tokens: 1000,
            chat_history_window: 6,
            api_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
            ocr_languages: "eng+deu".to_string(),
            ocr_scale: 2.0,
            tesseract_cmd: "tesseract".to_string(),
            pdfium_lib_path: None,
            max_upload_bytes: 20 * 1024 * 1024,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            analysis_limit: 10,
            chat_limit: 20,
            rate_window_hours: 24,
            rate_limit_path: PathBuf::from(".rate_limits.json"),
            user_id_path: PathBuf::from(".user_id"),
            database_url: "sqlite:///./documents.db".to_string(),
            storage: StorageConfig::default(),
        }
    }
}

impl ExplainerConfig {
    /// Create a new builder seeded with the defaults.
    pub fn builder() -> ExplainerConfigBuilder {
        ExplainerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; a variable that is set but does
    /// not parse is an [`ExplainError::InvalidConfig`].
    pub fn from_env() -> Result<Self, ExplainError> {
        let mut b = Self::builder();

        if let Some(url) = env_string("DATABASE_URL") {
            b = b.database_url(url);
        }
        if let Some(p) = env_string("DOCEXPLAIN_PROVIDER") {
            b = b.provider_name(p);
        }
        if let Some(m) = env_string("DOCEXPLAIN_MODEL") {
            b = b.model(m);
        }
        if let Some(n) = env_parse::<u32>("ANALYSIS_LIMIT")? {
            b = b.analysis_limit(n);
        }
        if let Some(n) = env_parse::<u32>("CHAT_LIMIT")? {
            b = b.chat_limit(n);
        }
        if let Some(h) = env_parse::<u64>("RATE_LIMIT_WINDOW_HOURS")? {
            b = b.rate_window_hours(h);
        }
        if let Some(p) = env_string("RATE_LIMIT_FILE") {
            b = b.rate_limit_path(p);
        }
        if let Some(p) = env_string("USER_ID_FILE") {
            b = b.user_id_path(p);
        }
        if let Some(mb) = env_parse::<usize>("MAX_FILE_SIZE_MB")? {
            b = b.max_upload_mb(mb);
        }
        if let Some(list) = env_string("ALLOWED_EXTENSIONS") {
            b = b.allowed_extensions(list.split(',').map(str::to_string));
        }
        if let Some(langs) = env_string("OCR_LANGUAGES") {
            b = b.ocr_languages(langs);
        }
        if let Some(cmd) = env_string("TESSERACT_CMD") {
            b = b.tesseract_cmd(cmd);
        }
        if let Some(path) = env_string("PDFIUM_LIB_PATH") {
            b = b.pdfium_lib_path(path);
        }

        b = b.storage(StorageConfig::from_env()?);
        b.build()
    }

    /// Upload ceiling expressed in whole megabytes, for messages.
    pub fn max_upload_mb(&self) -> usize {
        self.max_upload_bytes / (1024 * 1024)
    }
}

/// Builder for [`ExplainerConfig`].
#[derive(Debug)]
pub struct ExplainerConfigBuilder {
    config: ExplainerConfig,
}

impl ExplainerConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn analysis_char_budget(mut self, chars: usize) -> Self {
        self.config.analysis_char_budget = chars;
        self
    }

    pub fn analysis_temperature(mut self, t: f32) -> Self {
        self.config.analysis_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn analysis_retry_temperature(mut self, t: f32) -> Self {
        self.config.analysis_retry_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn analysis_max_tokens(mut self, n: usize) -> Self {
        self.config.analysis_max_tokens = Some(n);
        self
    }

    pub fn chat_context_chars(mut self, chars: usize) -> Self {
        self.config.chat_context_chars = chars;
        self
    }

    pub fn chat_temperature(mut self, t: f32) -> Self {
        self.config.chat_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn chat_max_tokens(mut self, n: usize) -> Self {
        self.config.chat_max_tokens = n;
        self
    }

    pub fn chat_history_window(mut self, turns: usize) -> Self {
        self.config.chat_history_window = turns;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    pub fn ocr_scale(mut self, scale: f32) -> Self {
        self.config.ocr_scale = scale;
        self
    }

    pub fn tesseract_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.config.tesseract_cmd = cmd.into();
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn max_upload_mb(mut self, mb: usize) -> Self {
        self.config.max_upload_bytes = mb.saturating_mul(1024 * 1024);
        self
    }

    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn analysis_limit(mut self, n: u32) -> Self {
        self.config.analysis_limit = n;
        self
    }

    pub fn chat_limit(mut self, n: u32) -> Self {
        self.config.chat_limit = n;
        self
    }

    pub fn rate_window_hours(mut self, hours: u64) -> Self {
        self.config.rate_window_hours = hours;
        self
    }

    pub fn rate_limit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rate_limit_path = path.into();
        self
    }

    pub fn user_id_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.user_id_path = path.into();
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExplainerConfig, ExplainError> {
        let c = &self.config;
        if c.analysis_char_budget == 0 {
            return Err(ExplainError::InvalidConfig(
                "analysis character budget must be ≥ 1".into(),
            ));
        }
        if c.chat_context_chars > c.analysis_char_budget {
            return Err(ExplainError::InvalidConfig(format!(
                "chat context ({} chars) must not exceed the analysis budget ({} chars)",
                c.chat_context_chars, c.analysis_char_budget
            )));
        }
        if c.rate_window_hours == 0 {
            return Err(ExplainError::InvalidConfig(
                "rate-limit window must be ≥ 1 hour".into(),
            ));
        }
        if c.rate_window_hours > MAX_RATE_WINDOW_HOURS {
            return Err(ExplainError::InvalidConfig(format!(
                "rate-limit window must be at most {} hours, got {}",
                MAX_RATE_WINDOW_HOURS, c.rate_window_hours
            )));
        }
        if !(1.0..=4.0).contains(&c.ocr_scale) {
            return Err(ExplainError::InvalidConfig(format!(
                "OCR scale must be between 1.0 and 4.0, got {}",
                c.ocr_scale
            )));
        }
        if c.allowed_extensions.is_empty() {
            return Err(ExplainError::InvalidConfig(
                "at least one file extension must be allowed".into(),
            ));
        }
        if c.storage.enabled {
            c.storage.validate()?;
        }
        Ok(self.config)
    }
}

// ── Object storage ───────────────────────────────────────────────────────

/// Credentials and bucket for the optional S3-compatible blob store.
///
/// Disabled unless `enabled` is set. When enabled, `account_id` (or an
/// explicit `endpoint`), `access_key_id` and `secret_access_key` are required.
#[derive(Clone)]
pub struct StorageConfig {
    pub enabled: bool,
    pub account_id: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: String,
    /// Overrides the endpoint derived from `account_id`.
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            account_id: None,
            access_key_id: None,
            secret_access_key: None,
            bucket: "ai-documents".to_string(),
            endpoint: None,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("enabled", &self.enabled)
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<set>"))
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl StorageConfig {
    /// Read `ENABLE_OBJECT_STORAGE` and the `R2_*` variables.
    pub fn from_env() -> Result<Self, ExplainError> {
        let enabled = env_string("ENABLE_OBJECT_STORAGE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let mut cfg = Self {
            enabled,
            account_id: env_string("R2_ACCOUNT_ID"),
            access_key_id: env_string("R2_ACCESS_KEY_ID"),
            secret_access_key: env_string("R2_SECRET_ACCESS_KEY"),
            endpoint: env_string("R2_ENDPOINT"),
            ..Self::default()
        };
        if let Some(bucket) = env_string("R2_BUCKET_NAME") {
            cfg.bucket = bucket;
        }
        Ok(cfg)
    }

    /// Endpoint URL: the explicit override, or the R2 account endpoint.
    pub fn endpoint_url(&self) -> Option<String> {
        self.endpoint.clone().or_else(|| {
            self.account_id
                .as_ref()
                .map(|id| format!("https://{id}.r2.cloudflarestorage.com"))
        })
    }

    /// Check that every credential needed by an enabled store is present.
    pub fn validate(&self) -> Result<(), ExplainError> {
        if self.endpoint_url().is_none() {
            return Err(ExplainError::BlobStorageMisconfigured {
                missing: "R2_ACCOUNT_ID".into(),
            });
        }
        if self.access_key_id.is_none() {
            return Err(ExplainError::BlobStorageMisconfigured {
                missing: "R2_ACCESS_KEY_ID".into(),
            });
        }
        if self.secret_access_key.is_none() {
            return Err(ExplainError::BlobStorageMisconfigured {
                missing: "R2_SECRET_ACCESS_KEY".into(),
            });
        }
        Ok(())
    }
}

// ── Environment helpers ──────────────────────────────────────────────────

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ExplainError>
where
    T::Err: fmt::Display,
{
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ExplainError::InvalidConfig(format!("{key}='{raw}': {e}"))),
    }
}
