use tracing::debug;

use crate::error::ApiError;
use crate::llm::{ChatModel, CompletionRequest};

pub const SCRIPT_SYSTEM_PROMPT: &str = "You are a scriptwriter for an educational persona-based AV system.
Your job: distill an academic paper's ABSTRACT and INTRODUCTION into a concise,
engaging voice-over script using the six numbered sections below.

Formatting rules (MUST FOLLOW):
1. Output plain text, no markdown.
2. Do not add extra headings or commentary.
3. Keep each section to 2 sentences or fewer.
4. When talking about the paper, talk in third person: use \"the paper\" or \"the authors\" instead of \"we\".
5. Just use text and no other formatting like line breaks or anything else.

Purpose of each section, keep these goals in mind while writing:
0. Hook: grab attention with a vivid scenario, question, or startling fact that is relevant to the paper.
1. Domain & Sub-domain: orient the audience, name the broad research field
and the specific niche within it.
2. Problem Statement: state the concrete gap, limitation, or pain-point that
motivates the study; make the stakes clear.
3. Proposed Solution / Novelties: summarize the core idea, algorithm, or
experimental approach that is new or unique.
4. Key Evidence: cite one or two standout metrics (accuracy, F1, runtime) and
mention the dataset or benchmark that proves the method works.
5. Overall Impact & Outlook: explain why this matters in the grander scheme,
and hint at future directions or real-world applications.

Return the script in exactly that six-section order. Try keeping the script as short and interesting as possible.";

/// Sampling knobs for script drafting.
#[derive(Debug, Clone, Copy)]
pub struct ScriptOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 450,
        }
    }
}

/// Draft the six-beat narration from a paper's abstract and introduction.
/// Line breaks in the answer are flattened to spaces.
pub async fn generate_script(
    model: &dyn ChatModel,
    abstract_text: &str,
    introduction_text: &str,
    options: ScriptOptions,
) -> Result<String, ApiError> {
    let user = format!(
        "ABSTRACT:\n{}\n\nINTRODUCTION:\n{}",
        abstract_text.trim(),
        introduction_text.trim()
    );

    let raw = model
        .complete(&CompletionRequest {
            system: SCRIPT_SYSTEM_PROMPT,
            user: &user,
            temperature: options.temperature,
            max_tokens: Some(options.max_tokens),
            json: false,
        })
        .await?;

    let script = flatten_newlines(raw.trim());
    debug!("Script drafted ({} words)", script.split_whitespace().count());
    Ok(script)
}

/// Replace every line break with a single space. "\r\n" counts as one break.
pub fn flatten_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

// ── Tests ──
