//! Primary provider: one vision-model call per page image.
//!
//! The request is a single user turn carrying the page PNG and a fixed
//! instruction prompt. Grounding-capable OCR models (DeepSeek-OCR and
//! relatives) annotate regions with `<|ref|>…<|/ref|><|det|>…<|/det|>`
//! lines; those lines are dropped before the text leaves the provider.

use crate::error::{ConvertError, OcrError};
use crate::ocr::OcrProvider;
use crate::prompts::{prompt_for_model, PRIMARY_OCR_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PRIMARY_MODEL: &str = "deepseek-ai/DeepSeek-OCR";

/// Settings for building the primary provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimarySettings {
    /// edgequake-llm provider name (e.g. "openai"). `None` auto-detects.
    pub provider_name: Option<String>,
    /// Model identifier. Default: `deepseek-ai/DeepSeek-OCR`.
    pub model: String,
    /// Instruction sent with every image.
    pub prompt: String,
    /// Default: 4096.
    pub max_tokens: usize,
    /// Default: 0.0.
    pub temperature: f32,
    /// Per-call timeout. Default: 60.
    pub timeout_secs: u64,
}

impl Default for PrimarySettings {
    fn default() -> Self {
        Self {
            provider_name: None,
            model: DEFAULT_PRIMARY_MODEL.to_string(),
            prompt: PRIMARY_OCR_PROMPT.to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

impl PrimarySettings {
    /// Defaults overridden by `PRIMARY_OCR_PROVIDER`, `PRIMARY_OCR_MODEL`,
    /// and `PRIMARY_OCR_TIMEOUT`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(name) = non_empty_env("PRIMARY_OCR_PROVIDER") {
            settings.provider_name = Some(name);
        }
        if let Some(model) = non_empty_env("PRIMARY_OCR_MODEL") {
            settings = settings.with_model(model);
        }
        if let Some(secs) = non_empty_env("PRIMARY_OCR_TIMEOUT").and_then(|s| s.parse().ok()) {
            settings.timeout_secs = secs;
        }
        settings
    }

    /// Switch model, picking the prompt that model understands.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.prompt = prompt_for_model(&self.model).to_string();
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Vision-model OCR provider.
pub struct PrimaryOcrProvider {
    llm: Arc<dyn LLMProvider>,
    settings: PrimarySettings,
    name: String,
}

impl PrimaryOcrProvider {
    pub fn new(llm: Arc<dyn LLMProvider>, settings: PrimarySettings, name: impl Into<String>) -> Self {
        Self {
            llm,
            settings,
            name: name.into(),
        }
    }

    /// Resolve an LLM provider, from most-specific to least-specific:
    ///
    /// 1. `settings.provider_name` with `settings.model`
    /// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
    /// 3. `OPENAI_API_KEY` present → OpenAI-compatible endpoint with `settings.model`
    /// 4. `ProviderFactory::from_env` auto-detection
    pub fn from_settings(settings: PrimarySettings) -> Result<Self, ConvertError> {
        if let Some(name) = settings.provider_name.clone() {
            let llm = create_llm(&name, &settings.model)?;
            return Ok(Self::new(llm, settings, name));
        }

        if let (Some(name), Some(model)) = (
            non_empty_env("EDGEQUAKE_LLM_PROVIDER"),
            non_empty_env("EDGEQUAKE_MODEL"),
        ) {
            let llm = create_llm(&name, &model)?;
            return Ok(Self::new(llm, settings, name));
        }

        if non_empty_env("OPENAI_API_KEY").is_some() {
            let llm = create_llm("openai", &settings.model)?;
            return Ok(Self::new(llm, settings, "openai"));
        }

        let (llm, _embedding) =
            ProviderFactory::from_env().map_err(|e| ConvertError::ProviderNotConfigured {
                provider: "primary".to_string(),
                hint: format!(
                    "No vision provider could be auto-detected from the environment.\n\
                    Set PRIMARY_OCR_PROVIDER, EDGEQUAKE_LLM_PROVIDER, or an API key.\n\
                    Error: {}",
                    e
                ),
            })?;
        Ok(Self::new(llm, settings, "auto"))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
            ..Default::default()
        }
    }
}

fn create_llm(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ConvertError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ConvertError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[async_trait]
impl OcrProvider for PrimaryOcrProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ocr_image(&self, base64_png: &str) -> Result<String, OcrError> {
        let image = ImageData::new(base64_png.to_string(), "image/png").with_detail("high");
        let messages = vec![ChatMessage::user_with_images(
            self.settings.prompt.as_str(),
            vec![image],
        )];
        let options = self.options();
        let timeout = Duration::from_secs(self.settings.timeout_secs);

        let response = tokio::time::timeout(timeout, self.llm.chat(&messages, Some(&options)))
            .await
            .map_err(|_| OcrError::Provider {
                provider: self.name.clone(),
                message: format!("timed out after {}s", self.settings.timeout_secs),
            })?
            .map_err(|e| OcrError::Provider {
                provider: self.name.clone(),
                message: e.to_string(),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(clean_vision_output(&response.content))
    }
}

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Drop grounding annotation lines, collapse blank runs, trim.
pub fn clean_vision_output(raw: &str) -> String {
    let kept: Vec<&str> = raw
        .lines()
        .filter(|line| !line.contains("<|ref|>") && !line.contains("<|det|>"))
        .collect();
    RE_BLANK_RUNS
        .replace_all(&kept.join("\n"), "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grounding_lines_are_dropped() {
        let raw = "<|ref|>title<|/ref|><|det|>[[1,2,3,4]]<|/det|>\n# Report\n\n\n\nBody text\n";
        assert_eq!(clean_vision_output(raw), "# Report\n\nBody text");
    }

    #[test]
    fn plain_output_is_trimmed_only() {
        assert_eq!(clean_vision_output("  X  \n"), "X");
    }

    #[test]
    fn defaults() {
        let s = PrimarySettings::default();
        assert_eq!(s.model, DEFAULT_PRIMARY_MODEL);
        assert_eq!(s.max_tokens, 4096);
        assert_eq!(s.temperature, 0.0);
        assert_eq!(s.timeout_secs, 60);
        assert!(s.prompt.contains("Convert the document to markdown"));
    }

    #[test]
    fn switching_model_switches_prompt() {
        let s = PrimarySettings::default().with_model("gpt-4.1-mini");
        assert_eq!(s.model, "gpt-4.1-mini");
        assert!(!s.prompt.contains("<|grounding|>"));
    }
}
