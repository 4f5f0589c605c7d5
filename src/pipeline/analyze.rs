//! Page and document classification.
//!
//! Everything here is pure: pdfium probing lives in [`crate::pipeline::pdf`]
//! and produces [`PageProbe`]s; this module only turns probes into
//! [`PageInfo`] and page sets into a [`DocumentType`].

use crate::output::{DocumentInfo, DocumentType, PageInfo};
use crate::pipeline::extract::TextSpan;
use crate::pipeline::tables::{detect_tables, TableDetectorConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Raw observations about one page, gathered from the PDF.
#[derive(Debug, Clone, Default)]
pub struct PageProbe {
    /// 1-indexed.
    pub page_number: usize,
    /// Full text layer.
    pub text: String,
    pub image_count: usize,
    /// Positioned text segments (top-left origin).
    pub spans: Vec<TextSpan>,
}

/// Classify one page.
///
/// A table-detection failure is logged and treated as "no tables".
pub fn classify_page(probe: &PageProbe, text_threshold: usize) -> PageInfo {
    let text_length = probe.text.trim().chars().count();

    let has_tables = match detect_tables(&probe.spans, &TableDetectorConfig::default()) {
        Ok(count) => {
            if count > 0 {
                debug!("Page {}: {} table region(s) detected", probe.page_number, count);
            }
            count > 0
        }
        Err(e) => {
            warn!(
                "Page {}: table detection failed, assuming no tables: {}",
                probe.page_number, e
            );
            false
        }
    };

    PageInfo::new(
        probe.page_number,
        text_length,
        text_threshold,
        probe.image_count,
        has_tables,
    )
}

/// Aggregate page classifications into a document type.
///
/// Rules, in order: no pages → `Unknown`; no text pages → `Image`;
/// no image pages → `Text`; otherwise `Mixed`.
pub fn classify_document(pages: &[PageInfo]) -> DocumentType {
    if pages.is_empty() {
        return DocumentType::Unknown;
    }
    let text_pages = pages.iter().filter(|p| p.has_text).count();
    let image_pages = pages.iter().filter(|p| p.has_images).count();

    if text_pages == 0 {
        DocumentType::Image
    } else if image_pages == 0 {
        DocumentType::Text
    } else {
        DocumentType::Mixed
    }
}

/// Build a [`DocumentInfo`] from per-page probes.
pub fn analyze_probes(
    file_path: PathBuf,
    file_size: u64,
    source_pages: usize,
    probes: &[PageProbe],
    metadata: BTreeMap<String, String>,
    text_threshold: usize,
) -> DocumentInfo {
    let pages: Vec<PageInfo> = probes
        .iter()
        .map(|p| classify_page(p, text_threshold))
        .collect();
    let document_type = classify_document(&pages);

    DocumentInfo {
        file_path,
        file_size,
        total_pages: pages.len(),
        source_pages,
        document_type,
        pages,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize, has_text: bool, images: usize) -> PageInfo {
        PageInfo::new(n, if has_text { 100 } else { 0 }, 10, images, false)
    }

    #[test]
    fn empty_document_is_unknown() {
        assert_eq!(classify_document(&[]), DocumentType::Unknown);
    }

    #[test]
    fn textless_document_is_image() {
        let pages = [page(1, false, 1), page(2, false, 0)];
        assert_eq!(classify_document(&pages), DocumentType::Image);
    }

    #[test]
    fn imageless_document_is_text() {
        let pages = [page(1, true, 0), page(2, false, 0)];
        assert_eq!(classify_document(&pages), DocumentType::Text);
    }

    #[test]
    fn both_kinds_is_mixed() {
        let pages = [page(1, false, 1), page(2, true, 0), page(3, true, 1)];
        assert_eq!(classify_document(&pages), DocumentType::Mixed);
        // Re-running gives the same answer.
        assert_eq!(classify_document(&pages), classify_document(&pages));
    }

    #[test]
    fn threshold_uses_stripped_char_count() {
        let probe = PageProbe {
            page_number: 1,
            text: "   ünïcödé   \n".to_string(),
            ..Default::default()
        };
        let info = classify_page(&probe, 7);
        assert_eq!(info.text_length, 7);
        assert!(info.has_text);
        assert!(!classify_page(&probe, 8).has_text);
    }

    #[test]
    fn broken_table_geometry_fails_open() {
        let probe = PageProbe {
            page_number: 4,
            text: "some text here".to_string(),
            image_count: 0,
            spans: vec![TextSpan {
                x0: f32::NAN,
                y0: 0.0,
                x1: 1.0,
                y1: 1.0,
                text: "x".into(),
            }],
        };
        let info = classify_page(&probe, 10);
        assert!(!info.has_tables);
        assert!(!info.has_images);
    }

    #[test]
    fn analyze_counts_pages() {
        let probes = vec![
            PageProbe {
                page_number: 1,
                image_count: 1,
                ..Default::default()
            },
            PageProbe {
                page_number: 2,
                text: "x".repeat(400),
                ..Default::default()
            },
        ];
        let doc = analyze_probes(PathBuf::from("a.pdf"), 10, 5, &probes, BTreeMap::new(), 10);
        assert_eq!(doc.total_pages, doc.pages.len());
        assert_eq!(doc.document_type, DocumentType::Mixed);
        assert!(doc.truncated());
    }
}
