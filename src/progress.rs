//! Progress-callback trait for user-facing pipeline notices.
//!
//! Inject an [`Arc<dyn ExplainProgressCallback>`] via
//! [`crate::explain::DocumentExplainerBuilder::progress_callback`] to receive
//! the informational messages the pipeline produces: which pages needed OCR,
//! how many characters were extracted, the malformed-JSON retry warning, and
//! degraded collaborator calls (blob upload, analysis store).
//!
//! None of these events are errors; fatal failures are returned as
//! [`crate::ExplainError`].
//!
//! # Example
//!
//! ```rust
//! use docexplain::ExplainProgressCallback;
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Collect {
//!     warnings: Mutex<Vec<String>>,
//! }
//!
//! impl ExplainProgressCallback for Collect {
//!     fn on_warning(&self, message: &str) {
//!         self.warnings.lock().unwrap().push(message.to_string());
//!     }
//! }
//!
//! let cb: Arc<dyn ExplainProgressCallback> = Arc::new(Collect::default());
//! cb.on_warning("Invalid JSON received. Retrying...");
//! ```

use crate::document::DocumentKind;
use std::sync::Arc;

/// Called by the explainer as it processes an upload or a question.
///
/// All methods default to no-ops so callers only override what they need.
/// Implementations must be `Send + Sync`: extraction events fire from the
/// blocking thread pool.
pub trait ExplainProgressCallback: Send + Sync {
    /// Extraction is about to begin.
    fn on_extraction_start(&self, filename: &str, kind: DocumentKind) {
        let _ = (filename, kind);
    }

    /// A PDF page had no selectable text; OCR is being applied to it.
    ///
    /// `page_num` is 1-indexed.
    fn on_page_ocr(&self, page_num: usize) {
        let _ = page_num;
    }

    /// Extraction finished.
    ///
    /// # Arguments
    /// * `chars`    : characters in the full text
    /// * `ocr_pages`: 1-indexed pages whose text came from OCR
    fn on_extraction_complete(&self, chars: usize, ocr_pages: &[usize]) {
        let _ = (chars, ocr_pages);
    }

    /// The analysis request is about to be sent.
    fn on_analysis_start(&self) {}

    /// Non-fatal warning (malformed JSON retry, blob upload failure, ...).
    fn on_warning(&self, message: &str) {
        let _ = message;
    }

    /// The analysis record was stored.
    fn on_analysis_saved(&self, record_id: i64) {
        let _ = record_id;
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ExplainProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback handle.
pub type ProgressCallback = Arc<dyn ExplainProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        ocr_pages: Mutex<Vec<usize>>,
        warnings: AtomicUsize,
        completed_chars: AtomicUsize,
    }

    impl ExplainProgressCallback for TrackingCallback {
        fn on_page_ocr(&self, page_num: usize) {
            self.ocr_pages.lock().unwrap().push(page_num);
        }

        fn on_extraction_complete(&self, chars: usize, _ocr_pages: &[usize]) {
            self.completed_chars.store(chars, Ordering::SeqCst);
        }

        fn on_warning(&self, _message: &str) {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start("a.pdf", DocumentKind::Pdf);
        cb.on_page_ocr(2);
        cb.on_extraction_complete(120, &[2]);
        cb.on_analysis_start();
        cb.on_warning("retrying");
        cb.on_analysis_saved(1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_ocr(2);
        tracker.on_page_ocr(5);
        tracker.on_warning("Invalid JSON received. Retrying...");
        tracker.on_extraction_complete(4096, &[2, 5]);

        assert_eq!(*tracker.ocr_pages.lock().unwrap(), vec![2, 5]);
        assert_eq!(tracker.warnings.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completed_chars.load(Ordering::SeqCst), 4096);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_extraction_start("scan.png", DocumentKind::Image);
        cb.on_analysis_start();
    }
}
