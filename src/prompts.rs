//! Prompts for document analysis and follow-up chat.
//!
//! Every instruction sent to the model lives here so the engines in
//! [`crate::analyze`] and [`crate::chat`] only deal with message assembly,
//! retries and parsing.

use crate::document::AnalysisResult;

/// System prompt for the analysis call.
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a professional document analyst. You read official documents and explain them clearly to the person who received them.

CRITICAL: Respond with ONLY a valid JSON object. Do not write anything before or after the JSON.

Rules:
- Do NOT invent facts or information that are not present in the document
- If information is unclear or not mentioned, use "unknown" or "not specified"
- Keep explanations concise and avoid legal or bureaucratic jargon
- Focus on what matters to the recipient of the document"#;

/// JSON skeleton the model must fill in. Keys match [`crate::document::REQUIRED_FIELDS`].
pub const ANALYSIS_SCHEMA: &str = r#"{
  "summary": "Brief summary of the document in 2-3 sentences",
  "important_points": ["key point 1", "key point 2"],
  "deadlines": ["deadline with date if available"],
  "obligations": ["what the recipient must do"],
  "risks": ["potential risks or consequences"],
  "recommended_next_steps": ["recommended action"],
  "action_items": ["specific actionable item"],
  "confidence": "high | medium | low"
}"#;

/// Build the analysis user prompt around an already-truncated document excerpt.
pub fn analysis_user_prompt(document_excerpt: &str) -> String {
    format!(
        "Analyze the following document and provide a structured analysis in JSON format.\n\n\
Document text:\n{document_excerpt}\n\n\
Return ONLY a valid JSON object with exactly this structure:\n{ANALYSIS_SCHEMA}"
    )
}

/// System prompt for follow-up questions.
pub const CHAT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant answering questions about one specific document the user has uploaded.

Rules:
- Answer ONLY from the document content and analysis provided below
- If the document does not contain the answer, say so plainly
- You may answer in a different language than the document; when the document is not in English, keep its key terms (names of authorities, forms, legal terms) in the original language
- Be concise and practical"#;

/// Build the grounding block sent before the chat history.
///
/// Contains the summary, four of the analysis lists rendered as bullets, and
/// the supplied document excerpt. The question is not part of this block; it
/// is sent once, as the final user turn.
pub fn chat_context(analysis: &AnalysisResult, document_excerpt: &str) -> String {
    let mut ctx = String::with_capacity(document_excerpt.len() + 1024);
    ctx.push_str("Document summary:\n");
    ctx.push_str(&analysis.summary);
    ctx.push_str("\n\n");

    push_bullets(&mut ctx, "Important points", &analysis.important_points);
    push_bullets(&mut ctx, "Deadlines", &analysis.deadlines);
    push_bullets(&mut ctx, "Obligations", &analysis.obligations);
    push_bullets(&mut ctx, "Risks", &analysis.risks);

    ctx.push_str("Document text (excerpt):\n\"\"\"");
    ctx.push_str(document_excerpt);
    ctx.push_str("\"\"\"");
    ctx
}

fn push_bullets(out: &mut String, title: &str, items: &[String]) {
    out.push_str(title);
    out.push_str(":\n");
    if items.is_empty() {
        out.push_str("- none identified\n");
    }
    for item in items {
        out.push_str("- ");
        out.push_str(item);
        out.push('\n');
    }
    out.push('\n');
}
