//! Markdown assembly: page chunks → one document.
//!
//! Two modes, chosen by [`ConversionConfig::pagination`]:
//!
//! - **Paginated** (page numbers or metadata on): optional front matter,
//!   then each page as `<!-- Page N (type) -->`, content, `---`.
//! - **Unpaginated** (both off): contents run together as flowing prose.
//!   A page boundary becomes a single newline only where the previous page
//!   ended a sentence.
//!
//! Both modes finish with [`finalize_markdown`]. Assembly reads nothing but
//! its arguments, so the same chunks and options always give the same bytes.

use crate::config::ConversionConfig;
use crate::output::{ContentChunk, DocumentInfo};
use crate::pipeline::extract::ends_sentence;
use crate::pipeline::postprocess::finalize_markdown;

pub const DEFAULT_TITLE: &str = "Converted Document";

/// Everything the assembler needs besides the chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleOptions {
    pub show_page_number: bool,
    pub include_metadata: bool,
    /// Front-matter title; falls back to the PDF's own, then [`DEFAULT_TITLE`].
    pub title: Option<String>,
    /// Front-matter timestamp, fixed once per conversion.
    pub generated_at: String,
}

impl AssembleOptions {
    pub fn from_config(config: &ConversionConfig, generated_at: impl Into<String>) -> Self {
        let (show_page_number, include_metadata) = config.pagination();
        Self {
            show_page_number,
            include_metadata,
            title: config.title.clone(),
            generated_at: generated_at.into(),
        }
    }

    pub fn is_paginated(&self) -> bool {
        self.show_page_number || self.include_metadata
    }
}

/// Assemble chunks (already in page order) into the final Markdown.
pub fn assemble_markdown(
    chunks: &[ContentChunk],
    document: &DocumentInfo,
    options: &AssembleOptions,
) -> String {
    let raw = if options.is_paginated() {
        paginated(chunks, document, options)
    } else {
        unpaginated(chunks)
    };
    finalize_markdown(&raw)
}

fn front_matter(document: &DocumentInfo, options: &AssembleOptions) -> String {
    let title = options
        .title
        .as_deref()
        .or_else(|| document.title())
        .unwrap_or(DEFAULT_TITLE);
    format!(
        "---\ntitle: {}\npages: {}\ndocument_type: {}\ngenerated_at: {}\n---\n",
        title, document.total_pages, document.document_type, options.generated_at
    )
}

fn paginated(chunks: &[ContentChunk], document: &DocumentInfo, options: &AssembleOptions) -> String {
    let mut out = String::new();
    if options.include_metadata {
        out.push_str(&front_matter(document, options));
    }

    for chunk in chunks {
        if options.show_page_number {
            out.push_str(&format!(
                "\n\n<!-- Page {} ({}) -->\n\n",
                chunk.page_number, chunk.chunk_type
            ));
        } else {
            out.push_str("\n\n");
        }
        out.push_str(&chunk.content);
        if options.show_page_number {
            out.push_str("\n\n---\n\n");
        }
    }
    out
}

fn unpaginated(chunks: &[ContentChunk]) -> String {
    let mut out = String::new();
    let last = chunks.len().saturating_sub(1);

    for (i, chunk) in chunks.iter().enumerate() {
        let content = chunk.content.trim_end();
        if content.is_empty() {
            continue;
        }
        out.push_str(content);
        if i < last && ends_sentence(content) {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ChunkType, DocumentType};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn doc(pages: usize) -> DocumentInfo {
        DocumentInfo {
            file_path: PathBuf::from("report.pdf"),
            file_size: 10,
            total_pages: pages,
            source_pages: pages,
            document_type: DocumentType::Mixed,
            pages: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    fn opts(show: bool, meta: bool) -> AssembleOptions {
        AssembleOptions {
            show_page_number: show,
            include_metadata: meta,
            title: None,
            generated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn chunk(page: usize, kind: ChunkType, text: &str) -> ContentChunk {
        ContentChunk::new(page, kind, text)
    }

    #[test]
    fn paginated_layout() {
        let chunks = [chunk(1, ChunkType::Ocr, "# Intro"), chunk(2, ChunkType::Text, "Body.")];
        let md = assemble_markdown(&chunks, &doc(2), &opts(true, true));
        assert_eq!(
            md,
            "---\ntitle: Converted Document\npages: 2\ndocument_type: mixed\ngenerated_at: 2026-01-01T00:00:00Z\n---\n\n\
             <!-- Page 1 (ocr) -->\n\n# Intro\n\n---\n\n\
             <!-- Page 2 (text) -->\n\nBody.\n\n---"
        );
    }

    #[test]
    fn title_comes_from_option_then_pdf() {
        let mut d = doc(1);
        d.metadata.insert("title".into(), "Annual Report".into());
        let chunks = [chunk(1, ChunkType::Text, "x")];

        let md = assemble_markdown(&chunks, &d, &opts(false, true));
        assert!(md.contains("title: Annual Report\n"));

        let mut o = opts(false, true);
        o.title = Some("Override".into());
        assert!(assemble_markdown(&chunks, &d, &o).contains("title: Override\n"));
    }

    #[test]
    fn metadata_only_mode_has_no_markers() {
        let chunks = [chunk(1, ChunkType::Text, "one"), chunk(2, ChunkType::Text, "two")];
        let md = assemble_markdown(&chunks, &doc(2), &opts(false, true));
        assert!(!md.contains("<!-- Page"));
        assert!(md.ends_with("one\n\ntwo"));
    }

    #[test]
    fn unpaginated_joins_on_sentence_end_only() {
        let chunks = [chunk(1, ChunkType::Text, "Hello."), chunk(2, ChunkType::Text, "World")];
        assert_eq!(assemble_markdown(&chunks, &doc(2), &opts(false, false)), "Hello.\nWorld");

        let chunks = [
            chunk(1, ChunkType::Text, "continues on the   "),
            chunk(2, ChunkType::Text, "next page"),
        ];
        assert_eq!(
            assemble_markdown(&chunks, &doc(2), &opts(false, false)),
            "continues on thenext page"
        );
    }

    #[test]
    fn unpaginated_skips_empty_chunks() {
        let chunks = [
            chunk(1, ChunkType::Ocr, "全文。"),
            chunk(2, ChunkType::Ocr, "   "),
            chunk(3, ChunkType::Ocr, "下一页"),
        ];
        assert_eq!(
            assemble_markdown(&chunks, &doc(3), &opts(false, false)),
            "全文。\n下一页"
        );
    }

    #[test]
    fn override_flag_matches_both_off() {
        let config = ConversionConfig::builder()
            .no_pagination_and_metadata(true)
            .build()
            .unwrap();
        let o = AssembleOptions::from_config(&config, "t");
        assert!(!o.is_paginated());
        assert_eq!(
            o,
            AssembleOptions {
                generated_at: "t".into(),
                ..opts(false, false)
            }
        );
    }

    #[test]
    fn assembly_is_repeatable() {
        let chunks = [
            chunk(1, ChunkType::Ocr, "# A\ntext<|end_of_sentence|>"),
            chunk(2, ChunkType::Text, "More text."),
        ];
        let d = doc(2);
        for o in [opts(true, true), opts(true, false), opts(false, false)] {
            assert_eq!(assemble_markdown(&chunks, &d, &o), assemble_markdown(&chunks, &d, &o));
        }
    }
}
