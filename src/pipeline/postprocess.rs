//! Post-processing: deterministic cleanup of assembled Markdown.
//!
//! Two entry points:
//!
//! - [`clean_ocr_output`] runs once per OCR chunk, before assembly. It fixes
//!   model quirks that only make sense inside one page: outer code fences,
//!   CRLF line endings, invisible Unicode, links to image crops that were
//!   never produced.
//! - [`finalize_markdown`] runs once over the whole document, in both
//!   pagination modes.
//!
//! Every rule is a pure `&str → String` pass. `finalize_markdown` is
//! idempotent: feeding its output back in returns the same string, which is
//! what makes assembly repeatable.

use once_cell::sync::Lazy;
use regex::Regex;

/// Document-level cleanup, in order:
///
/// 1. Strip provider sentinel tokens (`<|end_of_sentence|>`, `<|ref|>`, …)
/// 2. Collapse runs of 3+ newlines (blank-looking lines included) into two
/// 3. Surround heading lines with blank lines (outside code fences)
/// 4. Trim trailing whitespace per line
/// 5. Trim the whole string
pub fn finalize_markdown(input: &str) -> String {
    let s = strip_sentinel_tokens(input);
    let s = collapse_blank_runs(&s);
    let s = normalise_heading_spacing(&s);
    let s = trim_trailing_whitespace(&s);
    s.trim().to_string()
}

/// Per-chunk cleanup for OCR output, in order:
///
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip outer markdown fences
/// 3. Replace links to non-existent image files with their alt text
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
pub fn clean_ocr_output(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_markdown_fences(&s);
    let s = remove_unresolved_images(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip sentinel tokens ───────────────────────────────────────────
//
// Grounding OCR models leak control tokens into their text. Region
// coordinates inside `<|det|>…<|/det|>` go with the tags; `<|ref|>` labels
// keep their text. A span never crosses a line: this runs over the whole
// document, and an unclosed tag must not swallow later pages.

static RE_DET_SPANS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\|det\|>[^\n]*?<\|/det\|>").unwrap());

static RE_SENTINELS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"<\|/?(?:end_of_sentence|end_of_text|ref|det|grounding)\|>|<｜end▁of▁sentence｜>",
    )
    .unwrap()
});

fn strip_sentinel_tokens(input: &str) -> String {
    let s = RE_DET_SPANS.replace_all(input, "");
    RE_SENTINELS.replace_all(&s, "").to_string()
}

// ── Rule 2: Collapse blank runs ─────────────────────────────────────────────
//
// A line holding only spaces is blank once Rule 4 has run, so it counts here
// too; otherwise a second pass would collapse what the first pass left.

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").unwrap());

fn collapse_blank_runs(input: &str) -> String {
    RE_BLANK_RUNS.replace_all(input, "\n\n").to_string()
}

// ── Rule 3: Heading spacing ─────────────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn normalise_heading_spacing(input: &str) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(input.len() / 32 + 8);
    let mut in_code = false;
    let mut after_heading = false;

    for line in input.split('\n') {
        let blank = line.trim().is_empty();

        if after_heading && !blank {
            out.push("");
        }
        after_heading = false;

        if is_fence(line) {
            in_code = !in_code;
        } else if !in_code && RE_HEADING.is_match(line) {
            if out.last().is_some_and(|prev| !prev.trim().is_empty()) {
                out.push("");
            }
            after_heading = true;
        }
        out.push(line);
    }

    out.join("\n")
}

// ── Rule 4: Trim trailing whitespace per line ───────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── OCR chunk rules ─────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// OCR models reference crops they cut out (`![](images/0.jpg)`) that are
// never shipped with the Markdown. Only absolute HTTP(S) links survive.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn is_resolvable_url(url: &str) -> bool {
    let u = url.trim();
    u.starts_with("http://") || u.starts_with("https://")
}

fn remove_unresolved_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if is_resolvable_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{}*", alt)
            }
        })
        .to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_stripped() {
        let input = "Intro<|end_of_sentence|> <|ref|>Figure<|/ref|><|det|>[[1, 2, 3, 4]]<|/det|> end<｜end▁of▁sentence｜>";
        assert_eq!(strip_sentinel_tokens(input), "Intro Figure end");
    }

    #[test]
    fn unclosed_det_tag_does_not_eat_later_pages() {
        let input = "<!-- Page 1 (ocr) -->\n\nA <|det|> x\n\n---\n\n<!-- Page 2 (text) -->\n\nPAGE2 KEEP\n\n<|/det|> B";
        let out = finalize_markdown(input);
        assert!(out.contains("<!-- Page 2 (text) -->"), "{out}");
        assert!(out.contains("PAGE2 KEEP"));
        assert!(out.contains("\n---\n"));
        assert!(!out.contains("<|"));
        assert!(out.starts_with("<!-- Page 1 (ocr) -->\n\nA  x"));
    }

    #[test]
    fn blank_runs_collapse_to_one_blank_line() {
        assert_eq!(collapse_blank_runs("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_runs("a\n  \n\t\nb"), "a\n\nb");
        assert_eq!(collapse_blank_runs("a\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_runs("a\nb"), "a\nb");
    }

    #[test]
    fn headings_get_blank_lines_around() {
        assert_eq!(
            normalise_heading_spacing("text\n## Title\nmore"),
            "text\n\n## Title\n\nmore"
        );
    }

    #[test]
    fn heading_at_start_gets_no_leading_blank() {
        assert_eq!(normalise_heading_spacing("# Top\nbody"), "# Top\n\nbody");
    }

    #[test]
    fn hash_without_space_is_not_a_heading() {
        assert_eq!(normalise_heading_spacing("a\n#hashtag\nb"), "a\n#hashtag\nb");
    }

    #[test]
    fn headings_inside_code_fences_are_left_alone() {
        let input = "```sh\n# comment\necho hi\n```";
        assert_eq!(normalise_heading_spacing(input), input);
    }

    #[test]
    fn finalize_runs_rules_in_order() {
        let input = "  \n# Title<|end_of_text|>\nBody line   \n\n\n\n## Next\ntext  \n\n";
        assert_eq!(
            finalize_markdown(input),
            "# Title\n\nBody line\n\n## Next\n\ntext"
        );
    }

    #[test]
    fn finalize_is_idempotent() {
        let inputs = [
            "a\n  \n  \nb",
            "x\n# H\n   \n\n\ny",
            "---\ntitle: T\n---\n\n\n\n<!-- Page 1 (ocr) -->\n\n# Heading\ntext\n\n---\n\n",
            "Hello.\nWorld",
            "",
        ];
        for input in inputs {
            let once = finalize_markdown(input);
            assert_eq!(finalize_markdown(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn ocr_output_loses_outer_fences_and_crlf() {
        let input = "```markdown\r\n# Hello\r\nWorld\r\n```";
        assert_eq!(clean_ocr_output(input), "# Hello\nWorld");
    }

    #[test]
    fn inner_fences_are_kept() {
        let input = "Text\n```rust\nfn main() {}\n```\nMore";
        assert_eq!(clean_ocr_output(input), input);
    }

    #[test]
    fn local_image_refs_become_captions() {
        assert_eq!(
            clean_ocr_output("before ![Revenue chart](images/0.jpg) after"),
            "before *Revenue chart* after"
        );
        assert_eq!(clean_ocr_output("![](images/1.jpg)"), "");
        let remote = "![logo](https://cdn.example.org/logo.png)";
        assert_eq!(clean_ocr_output(remote), remote);
    }

    #[test]
    fn invisible_chars_are_removed() {
        assert_eq!(clean_ocr_output("\u{FEFF}a\u{200B}b\u{00AD}c"), "abc");
    }
}
