//! Data model shared by the pipeline stages.
//!
//! * [`ExtractedDocument`]: per-page text as produced by the extractor.
//! * [`AnalysisResult`]: the fixed 8-field record returned by the model.
//! * [`Confidence`]: display-time interpretation of the `confidence` field.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Extraction output ────────────────────────────────────────────────────

/// What kind of document an upload is, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Classify a lower-case extension. Anything that is not `pdf` is an image.
    pub fn from_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("pdf") {
            DocumentKind::Pdf
        } else {
            DocumentKind::Image
        }
    }
}

/// Text of one page, 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_num: usize,
    pub text: String,
    /// True when the text came from OCR rather than the PDF text layer.
    pub ocr_applied: bool,
}

/// Ordered page texts of one uploaded document.
///
/// Built once by [`crate::pipeline::extract`] and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pages: Vec<PageText>,
}

impl ExtractedDocument {
    pub fn new(pages: Vec<PageText>) -> Self {
        Self { pages }
    }

    /// A single-page document from an OCR'd image.
    pub fn from_image_text(text: String) -> Self {
        Self {
            pages: vec![PageText {
                page_num: 1,
                text,
                ocr_applied: true,
            }],
        }
    }

    pub fn pages(&self) -> &[PageText] {
        &self.pages
    }

    /// All page texts joined with a blank line, in page order.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Page numbers whose text came from OCR.
    pub fn ocr_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.ocr_applied)
            .map(|p| p.page_num)
            .collect()
    }

    /// Human-readable notice naming the OCR'd pages, if any.
    pub fn ocr_notice(&self) -> Option<String> {
        let pages = self.ocr_pages();
        match pages.len() {
            0 => None,
            1 => Some(format!("OCR applied to page {}", pages[0])),
            _ => Some(format!(
                "OCR applied to pages {}",
                pages
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    /// True when no page holds anything but whitespace.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

// ── Analysis record ──────────────────────────────────────────────────────

/// Keys the model must return, in validation order.
pub const REQUIRED_FIELDS: [&str; 8] = [
    "summary",
    "important_points",
    "deadlines",
    "obligations",
    "risks",
    "recommended_next_steps",
    "action_items",
    "confidence",
];

/// Structured analysis of one document.
///
/// List order is the model's emission order. `confidence` is kept verbatim;
/// use [`AnalysisResult::confidence_level`] to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub important_points: Vec<String>,
    pub deadlines: Vec<String>,
    pub obligations: Vec<String>,
    pub risks: Vec<String>,
    pub recommended_next_steps: Vec<String>,
    pub action_items: Vec<String>,
    pub confidence: String,
}

/// One titled list of an analysis, for rendering.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    pub title: &'static str,
    pub items: &'a [String],
    /// Shown instead of the list when it is empty.
    pub empty: &'static str,
}

impl AnalysisResult {
    pub fn confidence_level(&self) -> Confidence {
        Confidence::from_label(&self.confidence)
    }

    /// The six list sections in display order.
    pub fn sections(&self) -> [Section<'_>; 6] {
        [
            Section {
                title: "Important Points",
                items: &self.important_points,
                empty: "No important points identified",
            },
            Section {
                title: "Deadlines",
                items: &self.deadlines,
                empty: "No deadlines identified",
            },
            Section {
                title: "Your Obligations",
                items: &self.obligations,
                empty: "No obligations identified",
            },
            Section {
                title: "Potential Risks",
                items: &self.risks,
                empty: "No risks identified",
            },
            Section {
                title: "Recommended Next Steps",
                items: &self.recommended_next_steps,
                empty: "No recommendations available",
            },
            Section {
                title: "Action Checklist",
                items: &self.action_items,
                empty: "No action items identified",
            },
        ]
    }

    /// Plain-text report: summary, every section, and the confidence line.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Summary\n");
        out.push_str(&self.summary);
        out.push('\n');
        for section in self.sections() {
            out.push('\n');
            out.push_str(section.title);
            out.push('\n');
            if section.items.is_empty() {
                out.push_str(section.empty);
                out.push('\n');
            } else {
                let checklist = section.title == "Action Checklist";
                for item in section.items {
                    out.push_str(if checklist { "[ ] " } else { "- " });
                    out.push_str(item);
                    out.push('\n');
                }
            }
        }
        out.push_str(&format!("\nAnalysis Confidence: {}\n", self.confidence_level()));
        out
    }
}

/// Interpreted confidence. Unrecognised labels become [`Confidence::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl Confidence {
    /// Case-insensitive; tolerates trailing commentary such as `"high - clear dates"`.
    pub fn from_label(label: &str) -> Self {
        let head = label
            .trim()
            .split(|c: char| !c.is_alphabetic())
            .next()
            .unwrap_or("")
            .to_lowercase();
        match head.as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            "low" => Confidence::Low,
            _ => Confidence::Unknown,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
            Confidence::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}
