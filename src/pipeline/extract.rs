//! Text extraction: PDF text layer with per-page OCR fallback, or OCR of an image.
//!
//! PDF pages are visited in order. A page whose text layer is empty or
//! whitespace-only is rasterised at `ocr_scale` (2x by default) and handed to
//! the OCR engine. Any failure aborts the whole document.
//!
//! pdfium wraps a C++ library with thread-local state, so all of this runs
//! inside `tokio::task::spawn_blocking`; [`extract`] is the async entry point.

use crate::config::ExplainerConfig;
use crate::document::{DocumentKind, ExtractedDocument, PageText};
use crate::error::ExplainError;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::{ExplainProgressCallback, ProgressCallback};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Random access to the pages of an opened PDF.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Text layer of a page (0-indexed). May be empty for scanned pages.
    fn page_text(&self, index: usize) -> Result<String, ExplainError>;

    /// Rasterise a page (0-indexed) at `scale` times its natural size.
    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, ExplainError>;
}

/// Extract every page of `source`, falling back to OCR per page.
pub fn extract_pages(
    source: &dyn PageSource,
    ocr: &dyn OcrEngine,
    scale: f32,
    progress: &dyn ExplainProgressCallback,
) -> Result<ExtractedDocument, ExplainError> {
    let total = source.page_count();
    info!("PDF loaded: {} pages", total);

    let mut pages = Vec::with_capacity(total);
    for index in 0..total {
        let page_num = index + 1;
        let layer = source.page_text(index)?;

        if !layer.trim().is_empty() {
            debug!("Page {}: {} chars from text layer", page_num, layer.len());
            pages.push(PageText {
                page_num,
                text: layer,
                ocr_applied: false,
            });
            continue;
        }

        info!("Page {} has no selectable text, applying OCR", page_num);
        progress.on_page_ocr(page_num);
        let bitmap = source.render_page(index, scale)?;
        let text = ocr.recognize(&bitmap)?;
        debug!("Page {}: {} chars from OCR", page_num, text.len());
        pages.push(PageText {
            page_num,
            text,
            ocr_applied: true,
        });
    }

    let doc = ExtractedDocument::new(pages);
    if let Some(notice) = doc.ocr_notice() {
        info!("{}", notice);
    }
    Ok(doc)
}

/// OCR a whole image upload. Returns raw OCR output as a single page.
pub fn extract_image(
    bytes: &[u8],
    filename: &str,
    ocr: &dyn OcrEngine,
) -> Result<ExtractedDocument, ExplainError> {
    let img = image::load_from_memory(bytes).map_err(|e| ExplainError::ImageDecodeFailed {
        filename: filename.to_string(),
        detail: e.to_string(),
    })?;
    debug!("Decoded image '{}' → {}x{}", filename, img.width(), img.height());
    let text = ocr.recognize(&img)?;
    Ok(ExtractedDocument::from_image_text(text))
}

/// Extract text from an upload on the blocking pool.
pub async fn extract(
    bytes: Vec<u8>,
    filename: String,
    kind: DocumentKind,
    config: &ExplainerConfig,
    ocr: Arc<dyn OcrEngine>,
    progress: ProgressCallback,
) -> Result<ExtractedDocument, ExplainError> {
    progress.on_extraction_start(&filename, kind);

    let scale = config.ocr_scale;
    let lib_path = config.pdfium_lib_path.clone();
    let cb = Arc::clone(&progress);

    let doc = tokio::task::spawn_blocking(move || match kind {
        DocumentKind::Image => extract_image(&bytes, &filename, ocr.as_ref()),
        DocumentKind::Pdf => {
            let pdfium = bind_pdfium(lib_path.as_deref())?;
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .map_err(|e| ExplainError::CorruptPdf {
                    filename: filename.clone(),
                    detail: format!("{:?}", e),
                })?;
            let source = PdfiumPages { document };
            let extracted = extract_pages(&source, ocr.as_ref(), scale, cb.as_ref())?;
            Ok(extracted)
        }
    })
    .await
    .map_err(|e| ExplainError::Internal(format!("Extraction task panicked: {}", e)))??;

    let full = doc.full_text();
    progress.on_extraction_complete(full.chars().count(), &doc.ocr_pages());
    Ok(doc)
}

/// Bind pdfium from `lib_dir`, or from the system library search path.
pub fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, ExplainError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExplainError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// [`PageSource`] over a document opened by pdfium.
struct PdfiumPages<'a> {
    document: PdfDocument<'a>,
}

impl PdfiumPages<'_> {
    fn page(&self, index: usize) -> Result<PdfPage<'_>, ExplainError> {
        self.document
            .pages()
            .get(index as u16)
            .map_err(|e| ExplainError::TextLayerFailed {
                page: index + 1,
                detail: format!("{:?}", e),
            })
    }
}

impl PageSource for PdfiumPages<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_text(&self, index: usize) -> Result<String, ExplainError> {
        let page = self.page(index)?;
        let text = page.text().map_err(|e| ExplainError::TextLayerFailed {
            page: index + 1,
            detail: format!("{:?}", e),
        })?;
        let all = text.all();
        Ok(all)
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, ExplainError> {
        let page = self.page(index)?;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ExplainError::RasterisationFailed {
                page: index + 1,
                detail: format!("{:?}", e),
            }
        })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} at {}x → {}x{} px",
            index + 1,
            scale,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}
