//! Text route: rebuild paragraphs from positioned text blocks.
//!
//! pdfium hands back text as styled segments with bounding boxes. Segments
//! are first merged into line blocks ([`blocks_from_spans`]); the line blocks
//! are then walked in reading order and joined into paragraphs using four
//! geometric rules ([`extract_paragraphs`]):
//!
//! | Rule | Split when |
//! |------|-----------|
//! | list | both blocks are enumerated items and `|indent| > list_indent` |
//! | gap | `gap > gap_ratio × avg_height` |
//! | indent | `indent > indent` |
//! | sentence | previous block ends in `. ! ? : 。！？：` and `gap > punct_gap_ratio × avg_height` |
//!
//! The rules are checked in that order and the first applicable one decides.
//! In particular two consecutive list items are only ever split by the list
//! rule. This is a heuristic: unusual layouts will be merged or split wrongly.
//!
//! Coordinates are top-left origin, `y` growing downward.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Characters that end a sentence for paragraph and page-join decisions.
pub const SENTENCE_FINAL: [char; 8] = ['.', '!', '?', ':', '。', '！', '？', '：'];

/// Tunable thresholds for [`extract_paragraphs`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParagraphThresholds {
    /// Vertical gap, in line heights, that always starts a paragraph. Default: 1.8.
    pub gap_ratio: f32,
    /// Vertical gap, in line heights, that starts a paragraph after sentence-final punctuation. Default: 1.2.
    pub punct_gap_ratio: f32,
    /// Indent increase (points) that starts a paragraph. Default: 15.
    pub indent: f32,
    /// Indent change (points) that separates two list items. Default: 20.
    pub list_indent: f32,
}

pub const DEFAULT_GAP_RATIO: f32 = 1.8;
pub const DEFAULT_PUNCT_GAP_RATIO: f32 = 1.2;
pub const DEFAULT_INDENT: f32 = 15.0;
pub const DEFAULT_LIST_INDENT: f32 = 20.0;

impl Default for ParagraphThresholds {
    fn default() -> Self {
        Self {
            gap_ratio: DEFAULT_GAP_RATIO,
            punct_gap_ratio: DEFAULT_PUNCT_GAP_RATIO,
            indent: DEFAULT_INDENT,
            list_indent: DEFAULT_LIST_INDENT,
        }
    }
}

/// A run of text with its bounding box, as read from the PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub text: String,
}

impl TextSpan {
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }
}

/// A positioned block of text; the unit paragraph reconstruction works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub text: String,
}

impl TextBlock {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32, text: impl Into<String>) -> Self {
        Self {
            x0,
            y0,
            x1,
            y1,
            text: text.into(),
        }
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

// ── Spans → line blocks ──────────────────────────────────────────────────

/// Minimum vertical overlap (fraction of the shorter span) to share a line.
const SAME_LINE_OVERLAP: f32 = 0.5;

/// Horizontal gap (fraction of line height) that reads as a word space.
const WORD_GAP_RATIO: f32 = 0.15;

/// Merge spans into one block per visual line, keeping content order.
///
/// Lines that end in a non-CJK character get a trailing space so that the
/// raw block concatenation in [`extract_paragraphs`] does not glue words
/// across line breaks; CJK lines join with nothing, as CJK text should.
pub fn blocks_from_spans(spans: &[TextSpan]) -> Vec<TextBlock> {
    let mut lines: Vec<Vec<&TextSpan>> = Vec::new();

    for span in spans.iter().filter(|s| !s.text.trim().is_empty()) {
        match lines.last_mut() {
            Some(line) if shares_line(line, span) => line.push(span),
            _ => lines.push(vec![span]),
        }
    }

    lines
        .into_iter()
        .filter_map(|mut line| {
            line.sort_by(|a, b| a.x0.total_cmp(&b.x0));
            line_block(&line)
        })
        .collect()
}

fn shares_line(line: &[&TextSpan], span: &TextSpan) -> bool {
    line.iter().any(|s| {
        let overlap = s.y1.min(span.y1) - s.y0.max(span.y0);
        let shorter = s.height().min(span.height()).max(f32::EPSILON);
        overlap / shorter >= SAME_LINE_OVERLAP
    })
}

fn line_block(line: &[&TextSpan]) -> Option<TextBlock> {
    let first = line.first()?;
    let mut block = TextBlock::new(first.x0, first.y0, first.x1, first.y1, String::new());
    let mut prev_x1: Option<f32> = None;

    for span in line {
        let height = span.height().max(1.0);
        if let Some(x1) = prev_x1 {
            let ends_with_space = block.text.ends_with(char::is_whitespace);
            if span.x0 - x1 > WORD_GAP_RATIO * height && !ends_with_space {
                block.text.push(' ');
            }
        }
        block.text.push_str(&span.text);
        block.x0 = block.x0.min(span.x0);
        block.y0 = block.y0.min(span.y0);
        block.x1 = block.x1.max(span.x1);
        block.y1 = block.y1.max(span.y1);
        prev_x1 = Some(span.x1);
    }

    match block.text.trim_end().chars().last() {
        Some(c) if !is_cjk(c) && c != '-' => {
            let trimmed = block.text.trim_end().len();
            block.text.truncate(trimmed);
            block.text.push(' ');
        }
        _ => {}
    }
    Some(block)
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3000..=0x303F      // CJK punctuation
        | 0x3040..=0x30FF    // kana
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7AF    // hangul
        | 0xF900..=0xFAFF
        | 0xFF00..=0xFFEF)   // full-width forms
}

// ── Paragraph reconstruction ─────────────────────────────────────────────

static RE_LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\(（]?[一二三四五六七八九十\d]+[\)）、．.]").unwrap());

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn is_list_item(text: &str) -> bool {
    RE_LIST_ITEM.is_match(text.trim_start())
}

/// `true` when the text, ignoring trailing whitespace, ends a sentence.
pub fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .chars()
        .last()
        .is_some_and(|c| SENTENCE_FINAL.contains(&c))
}

fn starts_new_paragraph(
    prev: &TextBlock,
    prev_text: &str,
    curr: &TextBlock,
    curr_text: &str,
    t: &ParagraphThresholds,
) -> bool {
    let gap = curr.y0 - prev.y1;
    let avg_height = (prev.height() + curr.height()) / 2.0;
    let indent = curr.x0 - prev.x0;

    if is_list_item(prev_text) && is_list_item(curr_text) {
        indent.abs() > t.list_indent
    } else if gap > t.gap_ratio * avg_height {
        true
    } else if indent > t.indent {
        true
    } else {
        ends_sentence(prev_text) && gap > t.punct_gap_ratio * avg_height
    }
}

fn flush(paragraphs: &mut Vec<String>, buffer: &mut String) {
    let collapsed = RE_WHITESPACE.replace_all(buffer, " ");
    let paragraph = collapsed.trim();
    if !paragraph.is_empty() {
        paragraphs.push(paragraph.to_string());
    }
    buffer.clear();
}

/// Rebuild paragraphs from blocks in reading order.
///
/// Blocks inside a paragraph are concatenated without a separator; finished
/// paragraphs are whitespace-collapsed and joined with a blank line.
pub fn extract_paragraphs(blocks: &[TextBlock], thresholds: &ParagraphThresholds) -> String {
    let mut paragraphs = Vec::new();
    let mut buffer = String::new();
    let mut prev: Option<(&TextBlock, String)> = None;

    for block in blocks {
        let text = block.text.replace(['\n', '\r'], "");
        if text.trim().is_empty() {
            continue;
        }

        if let Some((prev_block, prev_text)) = &prev {
            if starts_new_paragraph(prev_block, prev_text, block, &text, thresholds) {
                flush(&mut paragraphs, &mut buffer);
            }
        }

        buffer.push_str(&text);
        prev = Some((block, text));
    }
    flush(&mut paragraphs, &mut buffer);

    paragraphs.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 10-unit-high line at `y`, starting at `x`.
    fn line(x: f32, y: f32, text: &str) -> TextBlock {
        TextBlock::new(x, y, x + 200.0, y + 10.0, text)
    }

    fn extract(blocks: &[TextBlock]) -> String {
        extract_paragraphs(blocks, &ParagraphThresholds::default())
    }

    #[test]
    fn tight_lines_concatenate_raw() {
        let blocks = [line(50.0, 100.0, "Hello "), line(50.0, 112.0, "world")];
        assert_eq!(extract(&blocks), "Hello world");
    }

    #[test]
    fn cjk_lines_join_without_space() {
        let blocks = [line(50.0, 100.0, "这是第一"), line(50.0, 112.0, "行文字")];
        assert_eq!(extract(&blocks), "这是第一行文字");
    }

    #[test]
    fn large_gap_splits() {
        // gap 19 > 1.8 × 10
        let blocks = [line(50.0, 100.0, "First "), line(50.0, 129.0, "Second")];
        assert_eq!(extract(&blocks), "First\n\nSecond");
    }

    #[test]
    fn indent_splits() {
        let blocks = [line(50.0, 100.0, "Body "), line(66.0, 112.0, "Quote")];
        assert_eq!(extract(&blocks), "Body\n\nQuote");
    }

    #[test]
    fn punctuation_plus_moderate_gap_splits() {
        // gap 13: above 1.2 × 10, below 1.8 × 10
        let ended = [line(50.0, 100.0, "Done."), line(50.0, 123.0, "Next")];
        assert_eq!(extract(&ended), "Done.\n\nNext");

        let open = [line(50.0, 100.0, "Going "), line(50.0, 123.0, "on")];
        assert_eq!(extract(&open), "Going on");
    }

    #[test]
    fn full_width_punctuation_counts() {
        let blocks = [line(50.0, 100.0, "结束。"), line(50.0, 123.0, "开始")];
        assert_eq!(extract(&blocks), "结束。\n\n开始");
    }

    #[test]
    fn list_items_only_split_on_indent_jump() {
        // Same indent, big gap: the list rule wins and keeps them together.
        let same = [line(50.0, 100.0, "1. Alpha."), line(50.0, 130.0, "2. Beta.")];
        assert_eq!(extract(&same), "1. Alpha.2. Beta.");

        let nested = [line(50.0, 100.0, "1. Alpha "), line(75.0, 112.0, "(2) Beta")];
        assert_eq!(extract(&nested), "1. Alpha\n\n(2) Beta");
    }

    #[test]
    fn empty_blocks_and_embedded_newlines() {
        let blocks = [
            line(50.0, 100.0, "Wrapped\nword"),
            line(50.0, 112.0, "   "),
            line(50.0, 124.0, " tail"),
        ];
        assert_eq!(extract(&blocks), "Wrappedword tail");
    }

    #[test]
    fn internal_whitespace_collapses() {
        let blocks = [line(50.0, 100.0, "a   b\t\tc")];
        assert_eq!(extract(&blocks), "a b c");
    }

    #[test]
    fn no_blocks_yields_empty() {
        assert_eq!(extract(&[]), "");
    }

    fn span(x0: f32, y0: f32, x1: f32, text: &str) -> TextSpan {
        TextSpan {
            x0,
            y0,
            x1,
            y1: y0 + 10.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn spans_on_one_line_merge_with_word_gap() {
        let spans = [
            span(10.0, 100.0, 40.0, "Hello"),
            span(45.0, 100.5, 80.0, "world"),
            span(10.0, 115.0, 60.0, "next"),
        ];
        let blocks = blocks_from_spans(&spans);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "Hello world ");
        assert_eq!(blocks[0].x1, 80.0);
        assert_eq!(blocks[1].text, "next ");
    }

    #[test]
    fn wrapped_lines_keep_their_word_break() {
        let spans = [
            span(50.0, 100.0, 200.0, "The quick brown"),
            span(50.0, 112.0, 200.0, "fox jumps over the"),
            span(50.0, 124.0, 200.0, "lazy dog."),
        ];
        let blocks = blocks_from_spans(&spans);
        assert_eq!(extract(&blocks), "The quick brown fox jumps over the lazy dog.");
    }

    #[test]
    fn hyphenated_and_cjk_lines_get_no_trailing_space() {
        let spans = [span(10.0, 100.0, 40.0, "hyph-"), span(10.0, 115.0, 40.0, "中文")];
        let blocks = blocks_from_spans(&spans);
        assert_eq!(blocks[0].text, "hyph-");
        assert_eq!(blocks[1].text, "中文");
    }
}
