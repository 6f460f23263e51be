use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::{PipelineSettings, Settings};
use crate::document::{ChunkCategory, Partitioner, PdfPartitioner};
use crate::error::PipelineError;
use crate::http;
use crate::llm::{ChatModel, OpenAiChat};
use crate::parser::extract::{extract_section, SectionRole};
use crate::parser::sections::{find_nth_section, BoundaryPolicy};
use crate::script::{generate_script, ScriptOptions};

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub section_limit: usize,
    pub policy: BoundaryPolicy,
    pub script: ScriptOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            section_limit: 4,
            policy: BoundaryPolicy::default(),
            script: ScriptOptions::default(),
        }
    }
}

impl From<&PipelineSettings> for PipelineOptions {
    fn from(s: &PipelineSettings) -> Self {
        Self {
            section_limit: s.section_limit,
            policy: s.boundary_policy,
            script: ScriptOptions {
                temperature: s.script_temperature,
                max_tokens: s.script_max_tokens,
            },
        }
    }
}

/// Everything produced for one paper.
#[derive(Debug, Clone)]
pub struct PaperScript {
    pub abstract_text: String,
    pub introduction_text: String,
    /// Chunk index that ended the front matter; `None` means the whole
    /// document was used.
    pub boundary: Option<usize>,
    pub chunk_count: usize,
    pub script: String,
}

/// Outcome for one input document, in input order.
#[derive(Debug)]
pub struct DocumentScript {
    pub path: PathBuf,
    pub result: Result<PaperScript, PipelineError>,
}

/// Partition → bound the front matter → extract abstract and introduction →
/// draft the script.
pub async fn script_document(
    model: &dyn ChatModel,
    partitioner: &dyn Partitioner,
    path: &Path,
    options: &PipelineOptions,
) -> Result<PaperScript, PipelineError> {
    let chunks = partitioner.partition(path).await?;
    let titles = chunks
        .iter()
        .filter(|c| c.category == Some(ChunkCategory::Title))
        .count();
    let pages = chunks.iter().filter_map(|c| c.page_number).max().unwrap_or(1);
    debug!(
        "{}: {} chunks over {} pages, {} title-like",
        path.display(),
        chunks.len(),
        pages,
        titles
    );

    let boundary = find_nth_section(model, &chunks, options.section_limit, options.policy).await?;
    let front = match boundary {
        Some(idx) => {
            info!("{}: front matter ends at chunk #{}", path.display(), idx);
            &chunks[..=idx]
        }
        None => {
            info!(
                "{}: fewer than {} sections detected, using all {} chunks",
                path.display(),
                options.section_limit,
                chunks.len()
            );
            &chunks[..]
        }
    };

    let abstract_text = extract_section(model, front, SectionRole::Abstract).await?;
    let introduction_text = extract_section(model, front, SectionRole::Introduction).await?;

    let script = generate_script(model, &abstract_text, &introduction_text, options.script).await?;
    let script = normalize_whitespace(&script);

    Ok(PaperScript {
        abstract_text,
        introduction_text,
        boundary,
        chunk_count: chunks.len(),
        script,
    })
}

/// Run every document through the pipeline one at a time. A failing document
/// is reported in its slot; the rest still run.
pub async fn pdf_to_scripts(
    model: &dyn ChatModel,
    partitioner: &dyn Partitioner,
    paths: &[PathBuf],
    options: &PipelineOptions,
) -> Vec<DocumentScript> {
    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        pb.set_message(file_label(path));
        let result = script_document(model, partitioner, path, options).await;
        if let Err(e) = &result {
            warn!("Skipping {}: {}", path.display(), e);
        }
        outcomes.push(DocumentScript {
            path: path.clone(),
            result,
        });
        pb.inc(1);
    }
    pb.finish_and_clear();

    let ok = outcomes.iter().filter(|o| o.result.is_ok()).count();
    info!("Scripted {} of {} documents", ok, outcomes.len());
    outcomes
}

/// The script pipeline wired to the OpenAI client and the PDF partitioner.
pub struct ScriptPipeline {
    model: OpenAiChat,
    partitioner: PdfPartitioner,
    options: PipelineOptions,
}

impl ScriptPipeline {
    /// Needs an OpenAI credential in `settings`.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_openai_key()?;
        let client = http::client(settings.http_timeout())?;
        Ok(Self {
            model: OpenAiChat::new(client, api_key, &settings.openai),
            partitioner: PdfPartitioner::new(settings.pipeline.max_chunk_chars),
            options: PipelineOptions::from(&settings.pipeline),
        })
    }

    pub fn model(&self) -> &OpenAiChat {
        &self.model
    }

    pub async fn run(&self, paths: &[PathBuf]) -> Vec<DocumentScript> {
        pdf_to_scripts(&self.model, &self.partitioner, paths, &self.options).await
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ── Tests ──
