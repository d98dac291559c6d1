//! Tolerant JSON extraction and strict validation of the analysis record.
//!
//! Models asked for "only JSON" still wrap it in ```json fences or add a
//! sentence before it. Extraction strips an outer fence, then takes the span
//! from the first `{` to the last `}`. Validation is strict: all eight keys,
//! strings where strings are expected, lists of strings for the lists.

use crate::document::{AnalysisResult, REQUIRED_FIELDS};
use crate::error::ExplainError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Strip one outer code fence, if present.
pub fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

/// The candidate JSON object inside a model reply.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let body = strip_code_fence(raw);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

/// Parse a model reply into an [`AnalysisResult`].
///
/// Returns [`ExplainError::MalformedJson`] when no JSON object can be read,
/// [`ExplainError::MissingField`] for the first absent key (in
/// [`REQUIRED_FIELDS`] order) and [`ExplainError::InvalidField`] for a key of
/// the wrong shape.
pub fn parse_analysis(raw: &str) -> Result<AnalysisResult, ExplainError> {
    let candidate = extract_json_object(raw).ok_or_else(|| ExplainError::MalformedJson {
        detail: format!("no JSON object in reply: {}", preview(raw)),
    })?;

    let value: Value =
        serde_json::from_str(candidate).map_err(|e| ExplainError::MalformedJson {
            detail: e.to_string(),
        })?;
    let Value::Object(map) = value else {
        return Err(ExplainError::MalformedJson {
            detail: "top-level value is not an object".to_string(),
        });
    };

    validate_shape(&map)?;

    serde_json::from_value(Value::Object(map)).map_err(|e| ExplainError::MalformedJson {
        detail: e.to_string(),
    })
}

fn validate_shape(map: &Map<String, Value>) -> Result<(), ExplainError> {
    for field in REQUIRED_FIELDS {
        let value = map.get(field).ok_or(ExplainError::MissingField { field })?;
        let ok = match field {
            "summary" | "confidence" => value.is_string(),
            _ => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        };
        if !ok {
            let expected = match field {
                "summary" | "confidence" => "a string",
                _ => "a list of strings",
            };
            return Err(ExplainError::InvalidField { field, expected });
        }
    }
    Ok(())
}

fn preview(raw: &str) -> String {
    let head: String = raw.chars().take(80).collect();
    if raw.chars().count() > 80 {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "summary": "Tax assessment for 2023.",
        "important_points": ["Refund of 120 EUR"],
        "deadlines": ["Objection within one month"],
        "obligations": [],
        "risks": ["Assessment becomes final"],
        "recommended_next_steps": ["Check the figures"],
        "action_items": ["Compare with your return"],
        "confidence": "high"
    }"#;

    #[test]
    fn parses_plain_object() {
        let a = parse_analysis(VALID).unwrap();
        assert_eq!(a.summary, "Tax assessment for 2023.");
        assert!(a.obligations.is_empty());
        assert_eq!(a.confidence, "high");
    }

    #[test]
    fn parses_fenced_object() {
        let raw = format!("```json\n{VALID}\n```");
        assert!(parse_analysis(&raw).is_ok());
    }

    #[test]
    fn parses_object_wrapped_in_prose() {
        let raw = format!("Here is the analysis:\n{VALID}\nLet me know if you need more.");
        assert_eq!(parse_analysis(&raw).unwrap().risks.len(), 1);
    }

    #[test]
    fn prose_only_is_malformed() {
        assert!(matches!(
            parse_analysis("I cannot analyse this document."),
            Err(ExplainError::MalformedJson { .. })
        ));
    }

    #[test]
    fn truncated_object_is_malformed() {
        assert!(matches!(
            parse_analysis(r#"{"summary": "cut off", "risks": [}"#),
            Err(ExplainError::MalformedJson { .. })
        ));
    }

    #[test]
    fn reports_first_missing_field() {
        let raw = r#"{"summary": "s", "important_points": [], "confidence": "low"}"#;
        assert!(matches!(
            parse_analysis(raw),
            Err(ExplainError::MissingField { field: "deadlines" })
        ));
    }

    #[test]
    fn rejects_wrong_type() {
        let raw = VALID.replace(r#""risks": ["Assessment becomes final"]"#, r#""risks": "none""#);
        assert!(matches!(
            parse_analysis(&raw),
            Err(ExplainError::InvalidField {
                field: "risks",
                expected: "a list of strings"
            })
        ));
    }

    #[test]
    fn extra_keys_are_ignored() {
        let raw = VALID.replace("\"summary\"", "\"language\": \"de\",\n\"summary\"");
        assert!(parse_analysis(&raw).is_ok());
    }

    #[test]
    fn strip_fence_passthrough() {
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
    }
}
