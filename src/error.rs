//! Error types for the pagewise library.
//!
//! Three error types reflect three failure scopes:
//!
//! * [`ConvertError`]: **Fatal**: the document cannot be converted at all
//!   (bad options, unreadable file, unsupported type, corrupt PDF). Returned
//!   as `Err(ConvertError)` from the top-level `convert*` functions.
//!
//! * [`PageError`]: **Non-fatal**: a single page failed to render, extract,
//!   or OCR. The page still produces a [`crate::output::ContentChunk`] whose
//!   content is an inline error placeholder; the rest of the document is
//!   unaffected.
//!
//! * [`OcrError`]: one call into an OCR provider failed. The gateway retries
//!   and falls back on these; whatever survives becomes a [`PageError::Ocr`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pagewise library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Validation ────────────────────────────────────────────────────────
    /// Options or input failed validation before any work started.
    #[error("Invalid options: {0}")]
    Validation(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file was read but is not a type this converter handles.
    #[error("Unsupported file type '{kind}' for '{path}'")]
    UnsupportedType { path: PathBuf, kind: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// A document-level stage failed unrecoverably.
    #[error("{message}: {detail}")]
    ConversionFailed { message: String, detail: String },

    /// An OCR provider could not be constructed (missing key, bad name).
    #[error("OCR provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Upload/output storage failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No task with this id exists in the task store.
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Wrap a stage failure as [`ConvertError::ConversionFailed`].
    ///
    /// Input and validation errors pass through unchanged; they already say
    /// exactly what the caller must fix.
    pub fn into_conversion_failed(self) -> Self {
        match self {
            ConvertError::Validation(_)
            | ConvertError::FileNotFound { .. }
            | ConvertError::PermissionDenied { .. }
            | ConvertError::InvalidInput { .. }
            | ConvertError::DownloadFailed { .. }
            | ConvertError::DownloadTimeout { .. }
            | ConvertError::UnsupportedType { .. }
            | ConvertError::ConversionFailed { .. }
            | ConvertError::PdfiumBindingFailed(_)
            | ConvertError::ProviderNotConfigured { .. } => self,
            other => ConvertError::ConversionFailed {
                message: "PDF conversion failed".to_string(),
                detail: other.to_string(),
            },
        }
    }
}

/// A non-fatal error for a single page.
///
/// Rendered inline into the page's chunk; never aborts the document.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation or image encoding failed.
    #[error("rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The text layer could not be read.
    #[error("text extraction failed: {detail}")]
    ExtractFailed { page: usize, detail: String },

    /// Every OCR attempt allowed by the engine mode failed.
    #[error("{detail}")]
    Ocr { page: usize, detail: String },
}

impl PageError {
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::ExtractFailed { page, .. }
            | PageError::Ocr { page, .. } => *page,
        }
    }
}

/// A failed call into one OCR provider.
#[derive(Debug, Clone, Error)]
pub enum OcrError {
    /// The provider returned an error or an unusable response.
    #[error("{provider} OCR failed: {message}")]
    Provider { provider: String, message: String },

    /// The provider is missing credentials or endpoint configuration.
    #[error("{provider} is not configured: {hint}")]
    NotConfigured { provider: String, hint: String },

    /// The provider's asynchronous job reported a terminal failure.
    #[error("{provider} job failed: {message}")]
    JobFailed { provider: String, message: String },

    /// Polling exceeded its ceiling.
    #[error("{provider} job timed out after {polls} polls ({secs}s)")]
    Timeout {
        provider: String,
        polls: u32,
        secs: u64,
    },

    /// The provider cannot perform the requested operation.
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },
}

impl OcrError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, OcrError::Timeout { .. })
    }
}
