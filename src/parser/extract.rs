use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::headings::strip_code_fence;
use crate::document::Chunk;
use crate::error::PipelineError;
use crate::llm::{ChatModel, CompletionRequest};

static ABSTRACT_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| heading_line_re("abstract"));
static INTRODUCTION_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| heading_line_re("introduction"));
static MARKDOWN_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*#{1,6}\s|\*\*|__|^\s*[-*]\s").unwrap());

pub const ABSTRACT_SYSTEM_PROMPT: &str = "You are a strict extractor. The user will give you a list of text chunks that come
from the front pages of a research paper. They contain an Abstract section plus
extra headings, author info, and other noise.

Return ONLY the full, clean Abstract text (no heading line, no metadata, no extra
characters) in plain text. If you cannot find an Abstract, return: \"ABSTRACT NOT FOUND\".
Do not wrap the output in JSON or Markdown, just the abstract itself, nothing more.";

pub const INTRODUCTION_SYSTEM_PROMPT: &str = "You are a strict extractor. The user will give you a list of text chunks that come
from the front pages of a research paper. They contain an Introduction section plus
extra headings, author info, and other noise.

Return ONLY the full, clean Introduction text (no heading line, no metadata, no extra
characters) in plain text. If you cannot find an Introduction, return: \"INTRODUCTION NOT FOUND\".
Do not wrap the output in JSON or Markdown, just the introduction itself, nothing more.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRole {
    Abstract,
    Introduction,
}

impl SectionRole {
    pub fn system_prompt(self) -> &'static str {
        match self {
            SectionRole::Abstract => ABSTRACT_SYSTEM_PROMPT,
            SectionRole::Introduction => INTRODUCTION_SYSTEM_PROMPT,
        }
    }

    /// Exact text returned when the section is absent from the chunks.
    pub fn not_found(self) -> &'static str {
        match self {
            SectionRole::Abstract => "ABSTRACT NOT FOUND",
            SectionRole::Introduction => "INTRODUCTION NOT FOUND",
        }
    }

    fn heading_re(self) -> &'static Regex {
        match self {
            SectionRole::Abstract => &ABSTRACT_HEADING_RE,
            SectionRole::Introduction => &INTRODUCTION_HEADING_RE,
        }
    }
}

impl fmt::Display for SectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionRole::Abstract => f.write_str("abstract"),
            SectionRole::Introduction => f.write_str("introduction"),
        }
    }
}

/// Send the bounded chunks to the model once and get back the clean text of
/// one section, or the role's not-found sentinel.
pub async fn extract_section(
    model: &dyn ChatModel,
    chunks: &[Chunk],
    role: SectionRole,
) -> Result<String, PipelineError> {
    let doc = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let user = format!("Here are the text chunks:\n\n{}\n\n--- END ---", doc);

    let raw = model
        .complete(&CompletionRequest {
            system: role.system_prompt(),
            user: &user,
            temperature: 0.0,
            max_tokens: None,
            json: false,
        })
        .await?;

    let text = clean_section_text(role, &raw)?;
    if text == role.not_found() {
        warn!("No {} found in {} chunks", role, chunks.len());
    } else {
        debug!("Extracted {} ({} chars)", role, text.chars().count());
    }
    Ok(text)
}

/// Local sanity check on the model's answer: unwrap a code fence, drop a
/// leading heading naming the section, reject empty or structured output.
pub fn clean_section_text(role: SectionRole, raw: &str) -> Result<String, PipelineError> {
    let unclean = |reason: &str| PipelineError::UncleanSection {
        role,
        reason: reason.to_string(),
    };

    let body = strip_code_fence(raw);
    if body.to_uppercase().contains(role.not_found()) {
        return Ok(role.not_found().to_string());
    }

    let body = role.heading_re().replace(body, "");
    let body = body.trim();
    if body.is_empty() {
        return Err(unclean("empty answer"));
    }
    if body.contains("```") {
        return Err(unclean("residual Markdown fence"));
    }
    if body.starts_with(['{', '[']) {
        return Err(unclean("answer looks like JSON, expected plain text"));
    }
    if let Some(m) = MARKDOWN_MARKER_RE.find(body) {
        return Err(unclean(&format!("Markdown marker {:?}", m.as_str().trim())));
    }

    Ok(body.to_string())
}

/// Matches a leading heading line such as "Abstract", "# Abstract:",
/// "1. Introduction" or "I. INTRODUCTION -".
fn heading_line_re(name: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)^\s*(?:#{{1,6}}\s*)?(?:(?:\d+|[ivx]+)\.?\s+)?{}(?:\s*[:.]\s*|\s+[\-–—]\s*|[ \t]*\n\s*|\s*$)",
        name
    ))
    .unwrap()
}

// ── Tests ──
