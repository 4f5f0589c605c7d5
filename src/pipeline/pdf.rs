//! pdfium access: probe pages for classification and rasterise OCR pages.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with internal global state; every call here is
//! synchronous and CPU-bound. Both entry points move their work onto the
//! blocking pool so Tokio workers keep driving OCR network calls.
//!
//! Each entry point opens the document afresh. A `PdfDocument` borrows its
//! `Pdfium` and cannot cross an `.await`, so nothing pdfium-owned outlives
//! the blocking closure.

use crate::config::ConversionConfig;
use crate::error::{ConvertError, PageError};
use crate::output::DocumentInfo;
use crate::pipeline::analyze::{analyze_probes, PageProbe};
use crate::pipeline::encode;
use crate::pipeline::extract::{blocks_from_spans, TextBlock, TextSpan};
use pdfium_render::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A classified document plus the text blocks of every analysed page.
#[derive(Debug, Clone)]
pub struct AnalyzedDocument {
    pub info: DocumentInfo,
    /// `blocks[i]` belongs to page `i + 1`.
    pub blocks: Vec<Vec<TextBlock>>,
}

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, ConvertError> {
    let from_env = std::env::var("PDFIUM_LIB_PATH").ok().map(|p| {
        let path = PathBuf::from(p);
        if path.is_dir() {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
        } else {
            Pdfium::bind_to_library(&path)
        }
    });

    let bindings = match from_env {
        Some(Ok(bindings)) => Ok(bindings),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| ConvertError::PdfiumBindingFailed(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ConvertError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                ConvertError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                ConvertError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            ConvertError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// Probe and classify up to `config.max_pages` pages.
pub async fn analyze_document(
    pdf_path: &Path,
    file_size: u64,
    config: &ConversionConfig,
) -> Result<AnalyzedDocument, ConvertError> {
    let path = pdf_path.to_path_buf();
    let password = config.password.clone();
    let max_pages = config.max_pages;
    let threshold = config.text_threshold;

    tokio::task::spawn_blocking(move || {
        analyze_blocking(&path, file_size, password.as_deref(), max_pages, threshold)
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("Analysis task panicked: {}", e)))?
}

fn analyze_blocking(
    pdf_path: &Path,
    file_size: u64,
    password: Option<&str>,
    max_pages: usize,
    text_threshold: usize,
) -> Result<AnalyzedDocument, ConvertError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let source_pages = pages.len() as usize;
    let limit = source_pages.min(max_pages);
    info!("PDF loaded: {} pages, analysing {}", source_pages, limit);

    let mut probes = Vec::with_capacity(limit);
    let mut blocks = Vec::with_capacity(limit);

    for idx in 0..limit {
        let page = pages
            .get(idx as u16)
            .map_err(|e| ConvertError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("page {}: {:?}", idx + 1, e),
            })?;
        let probe = probe_page(&page, idx + 1).map_err(|e| ConvertError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("page {}: {:?}", idx + 1, e),
        })?;
        debug!(
            "Probed page {}: {} chars, {} images, {} spans",
            probe.page_number,
            probe.text.len(),
            probe.image_count,
            probe.spans.len()
        );
        blocks.push(blocks_from_spans(&probe.spans));
        probes.push(probe);
    }

    let metadata = read_metadata(&document);
    let info = analyze_probes(
        pdf_path.to_path_buf(),
        file_size,
        source_pages,
        &probes,
        metadata,
        text_threshold,
    );

    Ok(AnalyzedDocument { info, blocks })
}

fn probe_page(page: &PdfPage<'_>, page_number: usize) -> Result<PageProbe, PdfiumError> {
    let height = page.height().value;
    let text_page = page.text()?;

    // pdfium uses a bottom-left origin; flip to top-left.
    let spans: Vec<TextSpan> = text_page
        .segments()
        .iter()
        .map(|segment| {
            let bounds = segment.bounds();
            TextSpan {
                x0: bounds.left().value,
                y0: height - bounds.top().value,
                x1: bounds.right().value,
                y1: height - bounds.bottom().value,
                text: segment.text(),
            }
        })
        .collect();

    let image_count = page
        .objects()
        .iter()
        .filter(|object| object.object_type() == PdfPageObjectType::Image)
        .count();

    Ok(PageProbe {
        page_number,
        text: text_page.all(),
        image_count,
        spans,
    })
}

fn read_metadata(document: &PdfDocument<'_>) -> BTreeMap<String, String> {
    let metadata = document.metadata();
    let tags = [
        ("title", PdfDocumentMetadataTagType::Title),
        ("author", PdfDocumentMetadataTagType::Author),
        ("subject", PdfDocumentMetadataTagType::Subject),
        ("creator", PdfDocumentMetadataTagType::Creator),
        ("producer", PdfDocumentMetadataTagType::Producer),
        ("creation_date", PdfDocumentMetadataTagType::CreationDate),
        ("mod_date", PdfDocumentMetadataTagType::ModificationDate),
    ];

    tags.into_iter()
        .filter_map(|(key, tag)| {
            let value = metadata.get(tag)?.value().trim().to_string();
            (!value.is_empty()).then(|| (key.to_string(), value))
        })
        .collect()
}

/// Rasterise and encode the given pages for OCR.
///
/// Per-page failures come back as `Err(PageError)` inside the vector; only
/// failing to open the document is fatal.
pub async fn render_pages(
    pdf_path: &Path,
    config: &ConversionConfig,
    page_numbers: &[usize],
) -> Result<Vec<(usize, Result<String, PageError>)>, ConvertError> {
    let path = pdf_path.to_path_buf();
    let dpi = config.dpi;
    let max_side = config.max_image_side;
    let password = config.password.clone();
    let numbers = page_numbers.to_vec();

    tokio::task::spawn_blocking(move || {
        render_blocking(&path, dpi, max_side, password.as_deref(), &numbers)
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("Render task panicked: {}", e)))?
}

fn render_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_side: u32,
    password: Option<&str>,
    page_numbers: &[usize],
) -> Result<Vec<(usize, Result<String, PageError>)>, ConvertError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();

    let zoom = dpi as f32 / 72.0;
    let render_config = PdfRenderConfig::new().scale_page_by_factor(zoom);

    let results = page_numbers
        .iter()
        .map(|&page_number| {
            let encoded = render_one(&pages, page_number, &render_config, max_side);
            (page_number, encoded)
        })
        .collect();

    Ok(results)
}

fn render_one(
    pages: &PdfPages<'_>,
    page_number: usize,
    render_config: &PdfRenderConfig,
    max_side: u32,
) -> Result<String, PageError> {
    let fail = |detail: String| PageError::RenderFailed {
        page: page_number,
        detail,
    };

    let page = pages
        .get((page_number - 1) as u16)
        .map_err(|e| fail(format!("{:?}", e)))?;
    let bitmap = page
        .render_with_config(render_config)
        .map_err(|e| fail(format!("{:?}", e)))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_number,
        image.width(),
        image.height()
    );

    encode::prepare_for_ocr(image, max_side)
        .map_err(|e| fail(format!("image encoding failed: {}", e)))
}
