//! Prompts sent to the OCR providers.
//!
//! Kept in one place so tests can inspect them without a live model.
//! Override per run with [`crate::ocr::primary::PrimarySettings::prompt`].

/// Instruction for the primary vision model.
///
/// The `<|grounding|>` prefix asks DeepSeek-OCR-style models for
/// layout-aware output; the annotation lines it produces are stripped by
/// [`crate::ocr::primary::clean_vision_output`].
pub const PRIMARY_OCR_PROMPT: &str = "<|grounding|>Convert the document to markdown.";

/// Plain variant for vision models without grounding support.
pub const PLAIN_OCR_PROMPT: &str = "Convert the document to markdown. \
Preserve all text, reading order, headings, lists and tables. \
Output only the markdown, without code fences or commentary.";

/// Grounding prompt for DeepSeek-OCR models, the plain one for everything else.
pub fn prompt_for_model(model: &str) -> &'static str {
    if model.to_ascii_lowercase().contains("deepseek-ocr") {
        PRIMARY_OCR_PROMPT
    } else {
        PLAIN_OCR_PROMPT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_ask_for_markdown() {
        assert!(PRIMARY_OCR_PROMPT.starts_with("<|grounding|>"));
        assert!(PRIMARY_OCR_PROMPT.contains("markdown"));
        assert!(PLAIN_OCR_PROMPT.contains("markdown"));
        assert!(!PLAIN_OCR_PROMPT.contains("<|"));
    }

    #[test]
    fn grounding_only_for_deepseek_ocr() {
        assert_eq!(prompt_for_model("deepseek-ai/DeepSeek-OCR"), PRIMARY_OCR_PROMPT);
        assert_eq!(prompt_for_model("gpt-4.1-mini"), PLAIN_OCR_PROMPT);
        assert_eq!(prompt_for_model("deepseek-chat"), PLAIN_OCR_PROMPT);
    }
}
