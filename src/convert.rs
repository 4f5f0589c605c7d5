//! Conversion entry points: one PDF in, one [`ConversionResult`] out.
//!
//! ```text
//! resolve ─▶ analyze ─▶ route ─▶ render OCR pages ─▶ process ─▶ assemble
//!  (input)    (pdfium)   (pure)      (pdfium)        (OCR/text)  (pure)
//! ```
//!
//! Fatal problems come back as `Err(ConvertError)`; stage failures after
//! input resolution are wrapped as [`ConvertError::ConversionFailed`] with
//! the underlying message as detail. Page-level problems never surface here:
//! they are inline placeholders inside a successful result.

use crate::config::{ConversionConfig, OcrEngine};
use crate::error::{ConvertError, PageError};
use crate::ocr::primary::{PrimaryOcrProvider, PrimarySettings};
use crate::ocr::secondary::{SecondaryOcrProvider, SecondarySettings};
use crate::ocr::{provider_order, OcrGateway, OcrProvider, ProviderKind, RetryPolicy};
use crate::output::{ChunkType, ContentChunk, ConversionMetadata, ConversionResult, DocumentInfo};
use crate::pipeline::assemble::{assemble_markdown, AssembleOptions};
use crate::pipeline::extract::TextBlock;
use crate::pipeline::process::{
    build_page_inputs, plan_routes, process_document_level, process_pages, use_document_level,
    Route,
};
use crate::pipeline::{input, pdf};
use crate::storage::write_atomic;
use chrono::{SecondsFormat, Utc};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Convert a PDF file or URL to Markdown.
///
/// # Errors
/// Only for fatal problems: invalid options, unreadable or non-PDF input,
/// a PDF pdfium cannot open, or a required OCR provider that cannot be
/// built. A page that fails to convert is an error placeholder in the
/// returned Markdown, counted in `metadata.failed_pages`.
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConvertError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    // ── Step 1: Validate options and resolve input ───────────────────────
    config.validate()?;
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();
    let file_size = tokio::fs::metadata(&pdf_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    // ── Step 2: Analyse and classify ─────────────────────────────────────
    let analyze_start = Instant::now();
    let analyzed = pdf::analyze_document(&pdf_path, file_size, config)
        .await
        .map_err(ConvertError::into_conversion_failed)?;
    let analyze_ms = analyze_start.elapsed().as_millis() as u64;
    let document = analyzed.info;
    info!(
        "Classified as {} ({} of {} pages) in {}ms",
        document.document_type, document.total_pages, document.source_pages, analyze_ms
    );

    // ── Step 3: Build the OCR gateway ────────────────────────────────────
    let ocr_pages = ocr_page_numbers(&document);
    debug!("{} of {} pages routed to OCR", ocr_pages.len(), document.total_pages);
    let gateway = build_gateway(config, !ocr_pages.is_empty())?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(document.total_pages);
    }

    // ── Step 4: Process pages ────────────────────────────────────────────
    let process_start = Instant::now();
    let path = pdf_path.as_path();
    let chunks = convert_analyzed(
        &document,
        &analyzed.blocks,
        path,
        &gateway,
        config,
        |pages| async move {
            pdf::render_pages(path, config, &pages)
                .await
                .map_err(ConvertError::into_conversion_failed)
        },
    )
    .await?;
    let process_ms = process_start.elapsed().as_millis() as u64;

    // ── Step 5: Assemble ─────────────────────────────────────────────────
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let options = AssembleOptions::from_config(config, generated_at);
    let markdown = assemble_markdown(&chunks, &document, &options);

    let mut metadata = summarize(&document, &chunks, config.ocr_engine);
    metadata.analyze_ms = analyze_ms;
    metadata.process_ms = process_ms;
    metadata.processing_ms = total_start.elapsed().as_millis() as u64;
    metadata.output_chars = markdown.chars().count();

    let succeeded = chunks.len() - metadata.failed_pages;
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(document.total_pages, succeeded);
    }
    info!(
        "Conversion complete: {}/{} pages ok ({} OCR, {} text), {}ms total",
        succeeded,
        chunks.len(),
        metadata.ocr_pages,
        metadata.text_pages,
        metadata.processing_ms
    );

    Ok(ConversionResult::success(markdown, metadata, chunks, document))
}

/// Pages that will be OCR'd, in page order.
fn ocr_page_numbers(document: &DocumentInfo) -> Vec<usize> {
    plan_routes(document)
        .into_iter()
        .filter(|(_, route)| *route == Route::Ocr)
        .map(|(page, _)| page)
        .collect()
}

/// Everything after analysis: route the pages, render the OCR pages with
/// `render`, and convert them. Returns one chunk per page in page order.
///
/// A whole-document OCR call replaces the per-page work only when it
/// cannot change the outcome (see [`use_document_level`]); otherwise each
/// OCR page goes through the gateway on its own, whatever the engine mode.
pub async fn convert_analyzed<R, Fut>(
    document: &DocumentInfo,
    blocks: &[Vec<TextBlock>],
    pdf_path: &Path,
    gateway: &OcrGateway,
    config: &ConversionConfig,
    render: R,
) -> Result<Vec<ContentChunk>, ConvertError>
where
    R: FnOnce(Vec<usize>) -> Fut,
    Fut: Future<Output = Result<Vec<(usize, Result<String, PageError>)>, ConvertError>>,
{
    if use_document_level(document, gateway) {
        return Ok(process_document_level(document, pdf_path, gateway, config).await);
    }

    let routes = plan_routes(document);
    let ocr_pages = ocr_page_numbers(document);
    let rendered = if ocr_pages.is_empty() {
        Vec::new()
    } else {
        render(ocr_pages).await?
    };
    let inputs = build_page_inputs(&routes, blocks, rendered);
    Ok(process_pages(inputs, gateway, config).await)
}

/// Page counts and document facts for the result metadata.
pub fn summarize(
    document: &DocumentInfo,
    chunks: &[ContentChunk],
    engine: OcrEngine,
) -> ConversionMetadata {
    ConversionMetadata {
        total_pages: document.total_pages,
        source_pages: document.source_pages,
        truncated: document.truncated(),
        document_type: Some(document.document_type),
        file_size: document.file_size,
        ocr_pages: chunks.iter().filter(|c| c.chunk_type == ChunkType::Ocr).count(),
        text_pages: chunks.iter().filter(|c| c.chunk_type == ChunkType::Text).count(),
        failed_pages: chunks.iter().filter(|c| c.is_error()).count(),
        ocr_engine: engine.to_string(),
        ..Default::default()
    }
}

/// Convert and write the Markdown to `output_path` (temp file + rename).
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConvertError> {
    let result = convert(input_str, config).await?;
    let path = output_path.as_ref();
    write_atomic(path, result.markdown().unwrap_or_default().as_bytes())
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(result)
}

/// Synchronous wrapper around [`convert`] on a temporary runtime.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Convert PDF bytes held in memory.
///
/// The bytes go to a managed temp file that is removed when this returns.
pub async fn convert_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionResult, ConvertError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ConvertError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ConvertError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    convert(&path, config).await
}

/// Analyse and classify without converting. Needs no OCR provider.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<DocumentInfo, ConvertError> {
    config.validate()?;
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();
    let file_size = tokio::fs::metadata(&pdf_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    let analyzed = pdf::analyze_document(&pdf_path, file_size, config)
        .await
        .map_err(ConvertError::into_conversion_failed)?;
    Ok(analyzed.info)
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Build the gateway for this conversion.
///
/// Pre-built providers on the config win; otherwise providers are built
/// from their settings (or the environment) only when the engine mode will
/// call them. Text-only documents need no provider at all.
///
/// In `auto` mode a primary that cannot be built is skipped with a warning
/// as long as a secondary is available, and a secondary without an API key
/// is left out so page errors name the primary's failure.
pub fn build_gateway(config: &ConversionConfig, needs_ocr: bool) -> Result<OcrGateway, ConvertError> {
    let retry = RetryPolicy {
        max_retries: config.max_retries,
        initial_backoff: Duration::from_millis(config.retry_backoff_ms),
    };
    let engine = config.ocr_engine;
    if !needs_ocr {
        return Ok(OcrGateway::new(engine, None, None).with_retry(retry));
    }

    let order = provider_order(engine);
    let uses = |kind: ProviderKind| order.contains(&kind);

    let secondary: Option<Arc<dyn OcrProvider>> = match &config.secondary {
        Some(p) => Some(Arc::clone(p)),
        None if uses(ProviderKind::Secondary) => {
            let settings = config
                .secondary_settings
                .clone()
                .unwrap_or_else(SecondarySettings::from_env);
            if engine == OcrEngine::Auto && settings.api_key.is_none() {
                debug!("auto mode: no secondary API key, fallback disabled");
                None
            } else {
                Some(Arc::new(SecondaryOcrProvider::new(settings)?))
            }
        }
        None => None,
    };

    let primary: Option<Arc<dyn OcrProvider>> = match &config.primary {
        Some(p) => Some(Arc::clone(p)),
        None if uses(ProviderKind::Primary) => {
            let settings = config
                .primary_settings
                .clone()
                .unwrap_or_else(PrimarySettings::from_env);
            match PrimaryOcrProvider::from_settings(settings) {
                Ok(p) => Some(Arc::new(p)),
                Err(e) if engine == OcrEngine::Auto && secondary.is_some() => {
                    warn!("Primary OCR unavailable, using secondary only: {}", e);
                    None
                }
                Err(e) => return Err(e),
            }
        }
        None => None,
    };

    if engine == OcrEngine::Auto && primary.is_none() && secondary.is_none() {
        return Err(ConvertError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: "Neither a primary nor a secondary OCR provider is available.\n\
                   Set PRIMARY_OCR_PROVIDER or an LLM API key, or SECONDARY_OCR_API_KEY."
                .to_string(),
        });
    }

    Ok(OcrGateway::new(engine, primary, secondary).with_retry(retry))
}
