//! # pagewise
//!
//! Convert PDF documents to Markdown one page at a time, choosing per page
//! between the text layer and OCR.
//!
//! ## Why page-wise?
//!
//! Most real PDFs are neither purely digital nor purely scanned. Sending
//! every page to a vision model is slow and costly; extracting text from
//! every page loses scans, figures and tables. This crate classifies each
//! page first: pages with a usable text layer and no visual content are
//! rebuilt from text positions, everything else is rasterised and OCR'd.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL, sniff type
//!  ├─ 2. Analyse   probe pages via pdfium, classify text / image / mixed
//!  ├─ 3. Route     text layer ─▶ paragraphs   |   visual ─▶ render ─▶ OCR
//!  ├─ 4. OCR       primary VLM, falling back per page to a job-based service
//!  ├─ 5. Assemble  page markers, front matter or flowing prose
//!  └─ 6. Cleanup   sentinel tokens, blank runs, heading spacing
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagewise::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let result = convert("document.pdf", &config).await?;
//!     println!("{}", result.markdown().unwrap_or_default());
//!     eprintln!(
//!         "{} OCR pages, {} text pages, {} failed",
//!         result.metadata.ocr_pages, result.metadata.text_pages, result.metadata.failed_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## OCR Engines
//!
//! | Mode | Provider(s) |
//! |------|-------------|
//! | `auto` (default) | primary per page, secondary on failure |
//! | `primary` | vision model via `edgequake-llm` (`PRIMARY_OCR_PROVIDER`, `PRIMARY_OCR_MODEL`) |
//! | `secondary` | MinerU-style batch job API (`SECONDARY_OCR_API_KEY`), whole document |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagewise` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod detect;
pub mod error;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod storage;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, OcrEngine};
pub use convert::{convert, convert_from_bytes, convert_sync, convert_to_file, inspect};
pub use detect::{FileCategory, FileType};
pub use error::{ConvertError, OcrError, PageError};
pub use ocr::{OcrGateway, OcrProvider};
pub use output::{
    ChunkType, ContentChunk, ConversionMetadata, ConversionResult, ConversionStatus, DocumentInfo,
    DocumentType, PageInfo,
};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::ConversionService;
pub use storage::{LocalStorage, Storage, StorageSettings};
pub use store::{InMemoryTaskStore, Task, TaskStatus, TaskStore};
