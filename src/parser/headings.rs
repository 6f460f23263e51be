use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::llm::{ChatModel, CompletionRequest};

const SERVICE: &str = "heading classifier";

/// Classifier answer meaning "this chunk is not a heading".
pub const NO_HEADING: &str = "None";

pub const HEADING_SYSTEM_PROMPT: &str = r#"You are a heading detector.
Given a text chunk, check if it is a section heading. If it is, respond with JSON: {"section": "<name>"} else respond with JSON: {"section": "None"}.
We are interested in headings: abstract, introduction, background, methods, results, discussion, conclusion, references, acknowledgments, appendices OR any other section headings that are not in the list.
Return **only** the JSON."#;

#[derive(Debug, Deserialize)]
struct HeadingAnswer {
    section: String,
}

/// Ask the model whether `text` is a section heading. Returns the model's
/// free-text heading name, or `None` for the "not a heading" sentinel.
pub async fn classify_chunk(model: &dyn ChatModel, text: &str) -> Result<Option<String>, ApiError> {
    let user = format!("Text chunk:\n'''{}'''", text);
    let raw = model
        .complete(&CompletionRequest {
            system: HEADING_SYSTEM_PROMPT,
            user: &user,
            temperature: 0.0,
            max_tokens: None,
            json: true,
        })
        .await?;

    let section = parse_answer(&raw)?;
    if section.is_empty() || section == NO_HEADING {
        return Ok(None);
    }
    debug!("Heading detected: {:?}", section);
    Ok(Some(section))
}

fn parse_answer(raw: &str) -> Result<String, ApiError> {
    let body = strip_code_fence(raw);
    let answer: HeadingAnswer = serde_json::from_str(body)
        .map_err(|e| ApiError::malformed(SERVICE, format!("{} in {:?}", e, raw)))?;
    Ok(answer.section)
}

/// Unwrap a ```json ... ``` fence if the whole answer is wrapped in one.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    match inner.split_once('\n') {
        Some((info, rest)) if !info.trim().contains(' ') => rest.trim(),
        _ => inner.trim(),
    }
}

/// Reduce a heading guess to one lowercase token: strip surrounding colons
/// and spaces, keep the last word. "1. Introduction:" becomes "introduction".
pub fn normalize_heading(heading: &str) -> Option<String> {
    heading
        .to_lowercase()
        .trim_matches(|c: char| c == ':' || c == ' ')
        .split_whitespace()
        .last()
        .map(str::to_string)
}

// ── Tests ──
