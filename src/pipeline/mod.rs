//! Pipeline stages for turning an upload into an analysed document.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and swapped out (a different OCR engine, a different LLM backend)
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ (ocr ◀── encode) ──▶ llm ──▶ json
//! (validate) (pdfium)   (tesseract)  (png)   (chat)  (parse)
//! ```
//!
//! 1. [`input`]  : size, extension and magic-byte checks on the upload
//! 2. [`extract`]: text layer per PDF page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`ocr`]    : OCR for blank pages and image uploads
//! 4. [`encode`] : PNG-encode bitmaps handed to the OCR engine
//! 5. [`llm`]    : provider-neutral completion requests with timeout and
//!    backoff; the only stage with network I/O
//! 6. [`json`]   : tolerant extraction and strict validation of the
//!    analysis object

pub mod encode;
pub mod extract;
pub mod input;
pub mod json;
pub mod llm;
pub mod ocr;
