use std::collections::HashSet;

use serde::Deserialize;
use tracing::debug;

use super::headings::{classify_chunk, normalize_heading};
use crate::document::Chunk;
use crate::error::ApiError;
use crate::llm::ChatModel;

/// Which chunk ends the front matter once enough distinct headings were seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Collect `limit` distinct headings, then stop at the next chunk that
    /// carries any heading at all, new or already seen. Deliberately loose:
    /// a repeated running header after the limit also ends the scan.
    #[default]
    AfterDistinctLimit,
    /// Stop at the chunk where the `limit`-th distinct heading first appears.
    AtNthDistinct,
}

/// Scan `chunks` in order, classifying each one, and return the index of the
/// boundary chunk under `policy`, or `None` when fewer than `limit` distinct
/// headings occur in the whole document.
pub async fn find_nth_section(
    model: &dyn ChatModel,
    chunks: &[Chunk],
    limit: usize,
    policy: BoundaryPolicy,
) -> Result<Option<usize>, ApiError> {
    let mut seen = SeenHeadings::default();

    for (idx, chunk) in chunks.iter().enumerate() {
        let Some(heading) = classify_chunk(model, &chunk.text).await? else {
            continue;
        };
        let Some(label) = normalize_heading(&heading) else {
            continue;
        };

        match policy {
            BoundaryPolicy::AfterDistinctLimit => {
                if seen.len() < limit {
                    seen.insert(label);
                } else {
                    debug!("Heading {:?} at chunk {} after {} distinct", label, idx, limit);
                    return Ok(Some(idx));
                }
            }
            BoundaryPolicy::AtNthDistinct => {
                seen.insert(label);
                if seen.len() >= limit {
                    debug!("Distinct heading #{} at chunk {}", limit, idx);
                    return Ok(Some(idx));
                }
            }
        }
    }

    debug!("Only {} distinct headings across {} chunks", seen.len(), chunks.len());
    Ok(None)
}

/// Distinct heading labels seen during one scan. Insertion is idempotent.
#[derive(Debug, Default)]
pub struct SeenHeadings {
    labels: HashSet<String>,
}

impl SeenHeadings {
    /// Returns true when the label was not seen before.
    pub fn insert(&mut self, label: String) -> bool {
        self.labels.insert(label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

// ── Tests ──
