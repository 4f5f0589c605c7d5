//! Pipeline stages for page-aware PDF-to-Markdown conversion.
//!
//! Each submodule implements one transformation step. Only [`input`] and
//! [`pdf`] touch the outside world (network, files, pdfium); every other
//! stage is a pure function over the data model in [`crate::output`], which
//! is what the unit tests lean on.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ pdf(probe) ──▶ analyze ──▶ process ──▶ assemble ──▶ postprocess
//! (URL/path) (pdfium)     (classify)  (route+OCR)  (join)       (cleanup)
//!                │                        ▲
//!                └──▶ pdf(render) ─▶ encode
//! ```
//!
//! 1. [`input`] resolves a path or URL to a local file and rejects non-PDFs
//! 2. [`pdf`] probes each page (text, spans, images) and later rasterises the
//!    OCR pages, all inside `spawn_blocking`
//! 3. [`analyze`] classifies pages and the document, with [`tables`] for
//!    tabular text
//! 4. [`process`] routes pages to OCR or [`extract`], concurrently
//! 5. [`assemble`] joins chunks and runs [`postprocess`]

pub mod analyze;
pub mod assemble;
pub mod encode;
pub mod extract;
pub mod input;
pub mod pdf;
pub mod postprocess;
pub mod process;
pub mod tables;
