use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use super::{Chunk, ChunkCategory, Partitioner};
use crate::error::PipelineError;

static BLANK_LINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
static HYPHEN_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w)-\n(\w)").unwrap());

const TITLE_MAX_CHARS: usize = 80;
const TITLE_MAX_WORDS: usize = 10;

/// Plain-text PDF partitioner. Scanned PDFs without a text layer are rejected.
pub struct PdfPartitioner {
    max_chunk_chars: usize,
}

impl PdfPartitioner {
    pub fn new(max_chunk_chars: usize) -> Self {
        Self {
            max_chunk_chars: max_chunk_chars.max(1),
        }
    }
}

#[async_trait]
impl Partitioner for PdfPartitioner {
    async fn partition(&self, path: &Path) -> Result<Vec<Chunk>, PipelineError> {
        let fail = |reason: String| PipelineError::Partition {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = tokio::fs::read(path).await.map_err(|e| fail(e.to_string()))?;
        let text = tokio::task::spawn_blocking(move || {
            guarded_extract(|| pdf_extract::extract_text_from_mem(&bytes))
        })
        .await
        .map_err(|e| fail(format!("extraction task failed: {}", e)))?
        .map_err(fail)?;
        if text.trim().is_empty() {
            return Err(fail("no extractable text (scanned or protected PDF?)".to_string()));
        }

        let chunks = chunks_from_text(&text, self.max_chunk_chars);
        info!("Partitioned {} into {} chunks", path.display(), chunks.len());
        Ok(chunks)
    }
}

/// Run a text extractor, reporting its panic as an error.
/// pdf-extract panics on some malformed PDFs.
fn guarded_extract<F, E>(extract: F) -> Result<String, String>
where
    F: FnOnce() -> Result<String, E>,
    E: std::fmt::Display,
{
    match std::panic::catch_unwind(AssertUnwindSafe(extract)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("PDF extractor panicked: {}", msg);
            Err(format!("extractor panicked: {}", msg))
        }
    }
}

/// Split extracted text into paragraph chunks. Form feeds separate pages;
/// page numbers are only assigned when the text actually contains them.
pub fn chunks_from_text(text: &str, max_chunk_chars: usize) -> Vec<Chunk> {
    let normalized = text.replace("\r\n", "\n");
    let pages: Vec<&str> = normalized.split('\u{c}').collect();
    let paged = pages.len() > 1;

    let mut chunks = Vec::new();
    for (page_idx, page) in pages.iter().enumerate() {
        let page_number = paged.then_some(page_idx as u32 + 1);
        let joined = HYPHEN_BREAK_RE.replace_all(page, "$1$2");

        for paragraph in BLANK_LINES_RE.split(&joined) {
            let flat = paragraph
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if flat.is_empty() {
                continue;
            }

            let category = if looks_like_title(&flat) {
                ChunkCategory::Title
            } else {
                ChunkCategory::NarrativeText
            };
            for piece in split_long(&flat, max_chunk_chars) {
                chunks.push(Chunk {
                    text: piece,
                    category: Some(category),
                    page_number,
                    coordinates: None,
                    text_as_html: None,
                });
            }
        }
    }

    debug!("{} paragraphs across {} pages", chunks.len(), pages.len());
    chunks
}

fn looks_like_title(text: &str) -> bool {
    let starts_well = text
        .chars()
        .next()
        .is_some_and(|c| c.is_uppercase() || c.is_ascii_digit());
    starts_well
        && text.chars().count() <= TITLE_MAX_CHARS
        && text.split_whitespace().count() <= TITLE_MAX_WORDS
        && !text.ends_with(['.', ',', ';'])
}

/// Break a paragraph into pieces of at most `max` chars on whitespace.
/// A single word longer than `max` is kept whole.
fn split_long(text: &str, max: usize) -> Vec<String> {
    if text.chars().count() <= max {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_len > 0 && current_len + 1 + word_len > max {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let text = "Abstract\n\nWe study emotion\nrecognition from EEG.\n\n1 Introduction\n\nAffective computing is broad.";
        let chunks = chunks_from_text(text, 2000);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Abstract",
                "We study emotion recognition from EEG.",
                "1 Introduction",
                "Affective computing is broad."
            ]
        );
        assert_eq!(chunks[0].category, Some(ChunkCategory::Title));
        assert_eq!(chunks[1].category, Some(ChunkCategory::NarrativeText));
        assert_eq!(chunks[2].category, Some(ChunkCategory::Title));
    }

    #[test]
    fn unpaged_text_has_no_page_numbers() {
        let chunks = chunks_from_text("one\n\ntwo", 2000);
        assert!(chunks.iter().all(|c| c.page_number.is_none()));
        assert!(chunks.iter().all(|c| c.coordinates.is_none() && c.text_as_html.is_none()));
    }

    #[test]
    fn form_feeds_number_pages() {
        let chunks = chunks_from_text("first page\u{c}second page\n\nmore", 2000);
        let pages: Vec<Option<u32>> = chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(pages, vec![Some(1), Some(2), Some(2)]);
    }

    #[test]
    fn hyphenated_line_breaks_are_joined() {
        let chunks = chunks_from_text("electro-\nencephalography is used.", 2000);
        assert_eq!(chunks[0].text, "electroencephalography is used.");
    }

    #[test]
    fn long_paragraphs_are_split_on_whitespace() {
        let text = "alpha beta gamma delta epsilon";
        let chunks = chunks_from_text(text, 11);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha beta", "gamma delta", "epsilon"]);
    }

    #[test]
    fn oversized_word_is_kept_whole() {
        assert_eq!(split_long("abcdefghij", 4), vec!["abcdefghij".to_string()]);
    }

    #[test]
    fn whitespace_only_text_yields_nothing() {
        assert!(chunks_from_text("  \n\n \n", 2000).is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_a_partition_error() {
        let err = PdfPartitioner::new(2000)
            .partition(Path::new("/nonexistent/paper.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Partition { .. }));
    }

    #[tokio::test]
    async fn garbage_bytes_are_a_partition_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\nthis is not a real xref table\n%%EOF").unwrap();
        let err = PdfPartitioner::new(2000).partition(&path).await.unwrap_err();
        assert!(matches!(err, PipelineError::Partition { ref path, .. } if path.ends_with("broken.pdf")));
    }

    #[test]
    fn extractor_panic_becomes_error() {
        let got = guarded_extract(|| -> Result<String, String> { panic!("bad xref offset") });
        let err = got.unwrap_err();
        assert!(err.contains("bad xref offset"), "{err}");

        let got = guarded_extract(|| -> Result<String, String> { panic!("{} objects", 3) });
        assert!(got.unwrap_err().contains("3 objects"));
    }

    #[test]
    fn extractor_errors_pass_through() {
        assert_eq!(guarded_extract(|| Ok::<_, String>("text".into())), Ok("text".to_string()));
        assert_eq!(
            guarded_extract(|| Err::<String, _>("encrypted".to_string())),
            Err("encrypted".to_string())
        );
    }
}
