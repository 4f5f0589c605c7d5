//! Page processing: route each page, run it, collect chunks in page order.
//!
//! ```text
//!  PageInfo ──route_page──▶ Ocr  ──render──▶ base64 PNG ──OcrGateway──┐
//!                      └──▶ Text ──TextBlocks──▶ extract_paragraphs ───┤
//!                                                                      ▼
//!                                         ContentChunk (or placeholder)
//! ```
//!
//! Pages run through `buffer_unordered(concurrency)`, so at most
//! `concurrency` provider calls are in flight for this document; the results
//! are re-sorted by page number before they leave this module. A failing
//! page becomes an error placeholder chunk and never stops the others.

use crate::config::ConversionConfig;
use crate::error::PageError;
use crate::ocr::{OcrGateway, OcrOutput};
use crate::output::{ChunkType, ContentChunk, DocumentInfo, DocumentType, PageInfo};
use crate::pipeline::extract::{extract_paragraphs, TextBlock};
use crate::pipeline::postprocess::clean_ocr_output;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// How one page is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Ocr,
    Text,
}

impl Route {
    pub fn chunk_type(self) -> ChunkType {
        match self {
            Route::Ocr => ChunkType::Ocr,
            Route::Text => ChunkType::Text,
        }
    }
}

/// Pages with images go to OCR, everything else to text extraction.
pub fn route_page(page: &PageInfo) -> Route {
    if page.has_images {
        Route::Ocr
    } else {
        Route::Text
    }
}

/// Route every page of a document. Image documents have no usable text
/// layer, so all of their pages are OCR'd whatever their own flags say.
pub fn plan_routes(document: &DocumentInfo) -> Vec<(usize, Route)> {
    document
        .pages
        .iter()
        .map(|page| {
            let route = match document.document_type {
                DocumentType::Image => Route::Ocr,
                _ => route_page(page),
            };
            (page.page_number, route)
        })
        .collect()
}

/// Prepared input for one page.
#[derive(Debug, Clone)]
pub enum PageSource {
    /// A rendered base64 PNG, or why rendering failed.
    Image(Result<String, PageError>),
    /// The page's text-layer blocks, or why they are unavailable.
    Blocks(Result<Vec<TextBlock>, PageError>),
}

#[derive(Debug, Clone)]
pub struct PageInput {
    /// 1-indexed.
    pub page_number: usize,
    pub source: PageSource,
}

impl PageInput {
    pub fn route(&self) -> Route {
        match self.source {
            PageSource::Image(_) => Route::Ocr,
            PageSource::Blocks(_) => Route::Text,
        }
    }
}

/// Pair each routed page with its input: rendered images for OCR pages,
/// text blocks (`blocks[i]` is page `i + 1`) for text pages.
pub fn build_page_inputs(
    routes: &[(usize, Route)],
    blocks: &[Vec<TextBlock>],
    rendered: Vec<(usize, Result<String, PageError>)>,
) -> Vec<PageInput> {
    let mut images: HashMap<usize, Result<String, PageError>> = rendered.into_iter().collect();

    routes
        .iter()
        .map(|&(page_number, route)| {
            let source = match route {
                Route::Ocr => PageSource::Image(images.remove(&page_number).unwrap_or_else(|| {
                    Err(PageError::RenderFailed {
                        page: page_number,
                        detail: "page was not rendered".to_string(),
                    })
                })),
                Route::Text => PageSource::Blocks(
                    page_number
                        .checked_sub(1)
                        .and_then(|i| blocks.get(i))
                        .cloned()
                        .ok_or_else(|| PageError::ExtractFailed {
                            page: page_number,
                            detail: "no text layer was read for this page".to_string(),
                        }),
                ),
            };
            PageInput {
                page_number,
                source,
            }
        })
        .collect()
}

/// Convert every page concurrently. Returns one chunk per input, sorted by
/// page number.
pub async fn process_pages(
    inputs: Vec<PageInput>,
    gateway: &OcrGateway,
    config: &ConversionConfig,
) -> Vec<ContentChunk> {
    let total = inputs.len();
    let concurrency = config.concurrency.max(1);
    info!("Processing {} pages (concurrency {})", total, concurrency);

    let mut chunks: Vec<ContentChunk> = stream::iter(inputs.into_iter().map(|input| async move {
        let page = input.page_number;
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page, total);
        }

        let chunk = process_one(input, gateway, config).await;

        if let Some(ref cb) = config.progress_callback {
            match chunk.metadata.get("error") {
                Some(e) => cb.on_page_error(page, total, e),
                None => cb.on_page_complete(page, total, chunk.chunk_type, chunk.content.len()),
            }
        }
        chunk
    }))
    .buffer_unordered(concurrency)
    .collect()
    .await;

    chunks.sort_by_key(|c| c.page_number);
    chunks
}

async fn process_one(input: PageInput, gateway: &OcrGateway, config: &ConversionConfig) -> ContentChunk {
    let page = input.page_number;
    match input.source {
        PageSource::Image(Err(e)) => {
            warn!("Page {}: {}", page, e);
            ContentChunk::failed(ChunkType::Ocr, &e)
        }
        PageSource::Image(Ok(b64)) => match gateway.ocr_image(page, &b64).await {
            Ok(output) => ocr_chunk(page, output, config.dpi),
            Err(e) => {
                let err = PageError::Ocr {
                    page,
                    detail: e.to_string(),
                };
                warn!("Page {}: OCR failed: {}", page, err);
                ContentChunk::failed(ChunkType::Ocr, &err)
            }
        },
        PageSource::Blocks(Err(e)) => {
            warn!("Page {}: {}", page, e);
            ContentChunk::failed(ChunkType::Text, &e)
        }
        PageSource::Blocks(Ok(blocks)) => {
            let text = extract_paragraphs(&blocks, &config.paragraph);
            debug!("Page {}: {} blocks → {} chars", page, blocks.len(), text.len());
            ContentChunk::new(page, ChunkType::Text, text).with_meta("method", "text_extraction")
        }
    }
}

fn ocr_chunk(page: usize, output: OcrOutput, dpi: u32) -> ContentChunk {
    ContentChunk::new(page, ChunkType::Ocr, clean_ocr_output(&output.markdown))
        .with_meta("method", format!("{}_ocr", output.provider_name))
        .with_meta("ocr_engine", output.provider.as_str())
        .with_meta("provider", output.provider_name)
        .with_meta("dpi", dpi.to_string())
}

/// Whether one whole-document OCR call can stand in for per-page work.
///
/// Only for image documents, where every page is OCR'd anyway, and only
/// when `max_pages` cut nothing: the call sends the whole source file.
pub fn use_document_level(document: &DocumentInfo, gateway: &OcrGateway) -> bool {
    gateway.is_document_level()
        && document.document_type == DocumentType::Image
        && !document.truncated()
}

/// One whole-document OCR call instead of per-page work.
///
/// Page 1 carries the document's Markdown; the remaining pages are empty
/// chunks marked `merged_into = 1`, so there is still one chunk per page.
/// If the call fails, every page gets the same error placeholder.
pub async fn process_document_level(
    document: &DocumentInfo,
    pdf_path: &Path,
    gateway: &OcrGateway,
    config: &ConversionConfig,
) -> Vec<ContentChunk> {
    let total = document.total_pages;
    if total == 0 {
        return Vec::new();
    }
    info!("Whole-document OCR for {} pages", total);
    if let Some(ref cb) = config.progress_callback {
        cb.on_page_start(1, total);
    }

    let chunks: Vec<ContentChunk> = match gateway.ocr_document(pdf_path).await {
        Ok(output) => {
            let engine = output.provider.as_str();
            let provider_name = output.provider_name.clone();
            let first = ocr_chunk(1, output, config.dpi);
            std::iter::once(first)
                .chain((2..=total).map(|page| {
                    ContentChunk::new(page, ChunkType::Ocr, "")
                        .with_meta("merged_into", "1")
                        .with_meta("ocr_engine", engine)
                        .with_meta("provider", provider_name.clone())
                }))
                .collect()
        }
        Err(e) => {
            warn!("Whole-document OCR failed: {}", e);
            (1..=total)
                .map(|page| {
                    ContentChunk::failed(
                        ChunkType::Ocr,
                        &PageError::Ocr {
                            page,
                            detail: e.to_string(),
                        },
                    )
                })
                .collect()
        }
    };

    if let Some(ref cb) = config.progress_callback {
        for chunk in &chunks {
            match chunk.metadata.get("error") {
                Some(e) => cb.on_page_error(chunk.page_number, total, e),
                None => cb.on_page_complete(
                    chunk.page_number,
                    total,
                    chunk.chunk_type,
                    chunk.content.len(),
                ),
            }
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrEngine;
    use crate::error::OcrError;
    use crate::ocr::{OcrProvider, RetryPolicy};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    /// Echoes the "image" back, after a delay that shrinks with page number
    /// so completion order is the reverse of page order.
    struct Echo;

    #[async_trait]
    impl OcrProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn ocr_image(&self, b64: &str) -> Result<String, OcrError> {
            let n: u64 = b64.trim_start_matches('p').parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(n * 10))).await;
            if b64 == "boom" {
                return Err(OcrError::Provider {
                    provider: "echo".into(),
                    message: "model overloaded".into(),
                });
            }
            Ok(format!("```markdown\nOCR {b64}\n```"))
        }

        fn supports_pdf(&self) -> bool {
            true
        }

        async fn ocr_pdf(&self, _path: &std::path::Path) -> Result<String, OcrError> {
            Ok("# Whole document".into())
        }
    }

    fn gateway(engine: OcrEngine) -> OcrGateway {
        let echo: Arc<dyn OcrProvider> = Arc::new(Echo);
        OcrGateway::new(engine, Some(echo.clone()), Some(echo)).with_retry(RetryPolicy {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        })
    }

    fn document(kind: DocumentType, pages: Vec<PageInfo>) -> DocumentInfo {
        DocumentInfo {
            file_path: PathBuf::from("doc.pdf"),
            file_size: 1,
            total_pages: pages.len(),
            source_pages: pages.len(),
            document_type: kind,
            pages,
            metadata: Default::default(),
        }
    }

    fn image(page: usize, b64: &str) -> PageInput {
        PageInput {
            page_number: page,
            source: PageSource::Image(Ok(b64.to_string())),
        }
    }

    #[test]
    fn routing_depends_only_on_images() {
        let with_images = PageInfo::new(1, 500, 10, 2, false);
        let without = PageInfo::new(2, 0, 10, 0, false);
        assert_eq!(route_page(&with_images), Route::Ocr);
        assert_eq!(route_page(&without), Route::Text);
    }

    #[test]
    fn image_documents_ocr_every_page() {
        let doc = document(
            DocumentType::Image,
            vec![PageInfo::new(1, 0, 10, 0, false), PageInfo::new(2, 0, 10, 1, false)],
        );
        assert_eq!(plan_routes(&doc), vec![(1, Route::Ocr), (2, Route::Ocr)]);

        let doc = document(
            DocumentType::Mixed,
            vec![PageInfo::new(1, 0, 10, 1, false), PageInfo::new(2, 400, 10, 0, false)],
        );
        assert_eq!(plan_routes(&doc), vec![(1, Route::Ocr), (2, Route::Text)]);
    }

    #[test]
    fn inputs_follow_routes() {
        let routes = [(1, Route::Ocr), (2, Route::Text), (3, Route::Ocr), (4, Route::Text)];
        let blocks = vec![vec![], vec![TextBlock::new(0.0, 0.0, 10.0, 10.0, "two")]];
        let rendered = vec![(1, Ok("img1".to_string()))];

        let inputs = build_page_inputs(&routes, &blocks, rendered);
        let kinds: Vec<Route> = inputs.iter().map(PageInput::route).collect();
        assert_eq!(kinds, vec![Route::Ocr, Route::Text, Route::Ocr, Route::Text]);
        assert!(matches!(&inputs[0].source, PageSource::Image(Ok(b)) if b == "img1"));
        assert!(matches!(&inputs[1].source, PageSource::Blocks(Ok(b)) if b.len() == 1));
        assert!(matches!(&inputs[2].source, PageSource::Image(Err(PageError::RenderFailed { page: 3, .. }))));
        assert!(matches!(&inputs[3].source, PageSource::Blocks(Err(PageError::ExtractFailed { page: 4, .. }))));
    }

    #[tokio::test]
    async fn results_come_back_in_page_order() {
        let inputs = vec![image(1, "p1"), image(2, "p2"), image(3, "p3"), image(4, "p4")];
        let config = ConversionConfig::builder().concurrency(4).build().unwrap();
        let chunks = process_pages(inputs, &gateway(OcrEngine::Primary), &config).await;

        let pages: Vec<usize> = chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
        assert_eq!(chunks[0].content, "OCR p1");
        assert_eq!(chunks[0].metadata["method"], "echo_ocr");
        assert_eq!(chunks[0].metadata["ocr_engine"], "primary");
        assert_eq!(chunks[0].metadata["dpi"], "144");
    }

    #[tokio::test]
    async fn one_failing_page_does_not_stop_the_rest() {
        let inputs = vec![
            image(1, "p1"),
            image(2, "boom"),
            PageInput {
                page_number: 3,
                source: PageSource::Image(Err(PageError::RenderFailed {
                    page: 3,
                    detail: "bitmap too large".into(),
                })),
            },
            PageInput {
                page_number: 4,
                source: PageSource::Blocks(Ok(vec![TextBlock::new(
                    0.0, 0.0, 100.0, 10.0, "Plain text.",
                )])),
            },
        ];
        let config = ConversionConfig::default();
        let chunks = process_pages(inputs, &gateway(OcrEngine::Primary), &config).await;

        assert_eq!(chunks.len(), 4);
        assert!(!chunks[0].is_error());
        assert!(chunks[1].content.starts_with("[Error OCR page 2:"));
        assert!(chunks[1].content.contains("model overloaded"));
        assert_eq!(chunks[1].chunk_type, ChunkType::Ocr);
        assert!(chunks[2].content.contains("bitmap too large"));
        assert_eq!(chunks[3].content, "Plain text.");
        assert_eq!(chunks[3].chunk_type, ChunkType::Text);
        assert_eq!(chunks[3].metadata["method"], "text_extraction");
    }

    #[tokio::test]
    async fn unavailable_text_layer_keeps_text_type() {
        let inputs = vec![PageInput {
            page_number: 1,
            source: PageSource::Blocks(Err(PageError::ExtractFailed {
                page: 1,
                detail: "no text page".into(),
            })),
        }];
        let chunks = process_pages(inputs, &gateway(OcrEngine::Auto), &ConversionConfig::default()).await;
        assert_eq!(chunks[0].chunk_type, ChunkType::Text);
        assert!(chunks[0]
            .content
            .starts_with("[Error extracting text from page 1:"));
    }

    #[test]
    fn document_level_needs_an_untruncated_image_document() {
        let secondary = gateway(OcrEngine::Secondary);
        let scan = || {
            document(
                DocumentType::Image,
                (1..=2).map(|n| PageInfo::new(n, 0, 10, 1, false)).collect(),
            )
        };
        assert!(use_document_level(&scan(), &secondary));
        assert!(!use_document_level(&scan(), &gateway(OcrEngine::Auto)));

        let mut truncated = scan();
        truncated.source_pages = 5;
        assert!(!use_document_level(&truncated, &secondary));

        let mixed = document(
            DocumentType::Mixed,
            vec![PageInfo::new(1, 0, 10, 1, false), PageInfo::new(2, 400, 10, 0, false)],
        );
        assert!(!use_document_level(&mixed, &secondary));
    }

    #[tokio::test]
    async fn document_level_fills_every_page() {
        let doc = document(
            DocumentType::Image,
            (1..=3).map(|n| PageInfo::new(n, 0, 10, 1, false)).collect(),
        );
        let chunks = process_document_level(
            &doc,
            Path::new("doc.pdf"),
            &gateway(OcrEngine::Secondary),
            &ConversionConfig::default(),
        )
        .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "# Whole document");
        assert_eq!(chunks[0].metadata["ocr_engine"], "secondary");
        assert!(chunks[1].content.is_empty());
        assert_eq!(chunks[2].metadata["merged_into"], "1");
    }

    #[tokio::test]
    async fn document_level_failure_marks_every_page() {
        let doc = document(
            DocumentType::Image,
            (1..=2).map(|n| PageInfo::new(n, 0, 10, 1, false)).collect(),
        );
        let gateway = OcrGateway::new(OcrEngine::Secondary, None, None);
        let chunks =
            process_document_level(&doc, Path::new("doc.pdf"), &gateway, &ConversionConfig::default())
                .await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(ContentChunk::is_error));
        assert!(chunks[1].content.starts_with("[Error OCR page 2:"));
    }
}
