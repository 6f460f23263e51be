pub mod pdf;

use std::path::Path;

use async_trait::async_trait;

use crate::error::PipelineError;

pub use pdf::PdfPartitioner;

/// Layout category assigned by the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkCategory {
    Title,
    NarrativeText,
}

/// Bounding box on the page, in PDF points.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

/// One ordered unit of extracted document text. Metadata the partitioner
/// could not recover stays `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub category: Option<ChunkCategory>,
    pub page_number: Option<u32>,
    /// Only layout-aware partitioners fill these two.
    #[allow(dead_code)]
    pub coordinates: Option<Coordinates>,
    #[allow(dead_code)]
    pub text_as_html: Option<String>,
}

impl Chunk {
    #[cfg(test)]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: None,
            page_number: None,
            coordinates: None,
            text_as_html: None,
        }
    }
}

/// Turns a document on disk into ordered chunks.
#[async_trait]
pub trait Partitioner: Send + Sync {
    async fn partition(&self, path: &Path) -> Result<Vec<Chunk>, PipelineError>;
}
