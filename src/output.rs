//! Data model shared by every pipeline stage.
//!
//! ```text
//! PageInfo ──(aggregate)──▶ DocumentInfo ──(process)──▶ ContentChunk ──(assemble)──▶ ConversionResult
//! ```
//!
//! Values flow one way: each stage reads the previous stage's output and
//! produces a new value; nothing is mutated after creation.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Classification of a single PDF page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-indexed page number.
    pub page_number: usize,
    /// Stripped text length reached the threshold.
    pub has_text: bool,
    /// Length (chars) of the stripped text layer.
    pub text_length: usize,
    /// Number of raster images embedded in the page.
    pub image_count: usize,
    /// Tabular structure was detected in the text layer.
    pub has_tables: bool,
    /// The page needs visual OCR: `image_count > 0 || has_tables`.
    pub has_images: bool,
}

impl PageInfo {
    /// Build a page record; `has_images` is always derived, never supplied.
    pub fn new(
        page_number: usize,
        text_length: usize,
        text_threshold: usize,
        image_count: usize,
        has_tables: bool,
    ) -> Self {
        Self {
            page_number,
            has_text: text_length >= text_threshold,
            text_length,
            image_count,
            has_tables,
            has_images: image_count > 0 || has_tables,
        }
    }
}

/// Whole-document label derived from the page set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Text,
    Image,
    Mixed,
    Unknown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Text => "text",
            DocumentType::Image => "image",
            DocumentType::Mixed => "mixed",
            DocumentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of analysing a PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub file_path: PathBuf,
    pub file_size: u64,
    /// Number of analysed pages; always `pages.len()`.
    pub total_pages: usize,
    /// Page count of the source file before `max_pages` truncation.
    pub source_pages: usize,
    pub document_type: DocumentType,
    pub pages: Vec<PageInfo>,
    /// Info-dictionary entries (title, author, ...). Empty values are omitted.
    pub metadata: BTreeMap<String, String>,
}

impl DocumentInfo {
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }

    pub fn truncated(&self) -> bool {
        self.source_pages > self.total_pages
    }
}

/// Provenance of a chunk's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Ocr,
    Text,
    Mixed,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Ocr => "ocr",
            ChunkType::Text => "text",
            ChunkType::Mixed => "mixed",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page's converted Markdown plus provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub content: String,
    pub page_number: usize,
    pub chunk_type: ChunkType,
    pub metadata: BTreeMap<String, String>,
}

impl ContentChunk {
    pub fn new(page_number: usize, chunk_type: ChunkType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            page_number,
            chunk_type,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Placeholder chunk for a failed page. The chunk type is preserved.
    pub fn failed(chunk_type: ChunkType, error: &PageError) -> Self {
        let page = error.page();
        let content = match chunk_type {
            ChunkType::Text => format!("[Error extracting text from page {page}: {error}]"),
            ChunkType::Ocr | ChunkType::Mixed => format!("[Error OCR page {page}: {error}]"),
        };
        Self::new(page, chunk_type, content).with_meta("error", error.to_string())
    }

    pub fn is_error(&self) -> bool {
        self.metadata.contains_key("error")
    }
}

/// Outcome of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Success,
    Failed,
}

/// The produced artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "content")]
pub enum Artifact {
    Markdown(String),
}

/// Counts, sizes, and timings for one conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionMetadata {
    /// Pages processed (after `max_pages`).
    pub total_pages: usize,
    /// Pages in the source file.
    pub source_pages: usize,
    pub truncated: bool,
    pub document_type: Option<DocumentType>,
    pub file_size: u64,
    pub ocr_pages: usize,
    pub text_pages: usize,
    pub failed_pages: usize,
    /// Engine mode used, e.g. `"auto"`.
    pub ocr_engine: String,
    pub analyze_ms: u64,
    pub process_ms: u64,
    pub processing_ms: u64,
    pub output_chars: usize,
}

/// Terminal artifact of one conversion. Not mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub artifact: Option<Artifact>,
    pub metadata: ConversionMetadata,
    pub status: ConversionStatus,
    pub error: Option<String>,
    /// Per-page chunks in page order.
    pub chunks: Vec<ContentChunk>,
    pub document: Option<DocumentInfo>,
}

impl ConversionResult {
    pub fn success(
        markdown: String,
        metadata: ConversionMetadata,
        chunks: Vec<ContentChunk>,
        document: DocumentInfo,
    ) -> Self {
        Self {
            artifact: Some(Artifact::Markdown(markdown)),
            metadata,
            status: ConversionStatus::Success,
            error: None,
            chunks,
            document: Some(document),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            artifact: None,
            metadata: ConversionMetadata::default(),
            status: ConversionStatus::Failed,
            error: Some(error.into()),
            chunks: Vec::new(),
            document: None,
        }
    }

    /// The Markdown text, if this result carries Markdown.
    pub fn markdown(&self) -> Option<&str> {
        match &self.artifact {
            Some(Artifact::Markdown(md)) => Some(md),
            _ => None,
        }
    }
}
