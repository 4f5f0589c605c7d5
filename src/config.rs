//! Configuration types for page-wise PDF conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Setters clamp obviously out-of-range
//! values; [`ConversionConfigBuilder::build`] rejects the rest with
//! [`ConvertError::Validation`].

use crate::error::ConvertError;
use crate::ocr::primary::PrimarySettings;
use crate::ocr::secondary::SecondarySettings;
use crate::ocr::OcrProvider;
use crate::pipeline::extract::ParagraphThresholds;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 300;
pub const MIN_MAX_PAGES: usize = 1;
pub const MAX_MAX_PAGES: usize = 1000;

/// Configuration for one conversion.
///
/// # Example
/// ```rust
/// use pagewise::{ConversionConfig, OcrEngine};
///
/// let config = ConversionConfig::builder()
///     .dpi(200)
///     .concurrency(4)
///     .ocr_engine(OcrEngine::Primary)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI for OCR-routed pages. Range: 72–300. Default: 144.
    ///
    /// Pages are rasterised at `zoom = dpi / 72`.
    pub dpi: u32,

    /// Longest side of the image sent to OCR, in pixels. Default: 2048.
    pub max_image_side: u32,

    /// Maximum in-flight page operations. Default: 3.
    pub concurrency: usize,

    /// Minimum stripped text length for a page to count as having text. Default: 10.
    pub text_threshold: usize,

    /// Pages beyond this are not analysed or processed. Range: 1–1000. Default: 100.
    pub max_pages: usize,

    /// Which OCR provider(s) to use. Default: [`OcrEngine::Auto`].
    pub ocr_engine: OcrEngine,

    /// Emit `<!-- Page N (type) -->` markers and `---` separators. Default: true.
    pub show_page_number: bool,

    /// Prepend a YAML-style metadata block. Default: true.
    pub include_metadata: bool,

    /// Force unpaginated output, overriding the two flags above. Default: false.
    pub no_pagination_and_metadata: bool,

    /// Title for the metadata block. Default: the PDF's own title, if any.
    pub title: Option<String>,

    /// Paragraph reconstruction thresholds for the text route.
    pub paragraph: ParagraphThresholds,

    /// Additional attempts for a failed primary OCR call. Default: 3.
    pub max_retries: u32,

    /// First retry delay in milliseconds, doubling per retry. Default: 2000.
    pub retry_backoff_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Pre-built primary provider. Takes precedence over `primary_settings`.
    pub primary: Option<Arc<dyn OcrProvider>>,

    /// Pre-built secondary provider. Takes precedence over `secondary_settings`.
    pub secondary: Option<Arc<dyn OcrProvider>>,

    /// Settings for constructing the primary provider. `None` reads the environment.
    pub primary_settings: Option<PrimarySettings>,

    /// Settings for constructing the secondary provider. `None` reads the environment.
    pub secondary_settings: Option<SecondarySettings>,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 144,
            max_image_side: 2048,
            concurrency: 3,
            text_threshold: 10,
            max_pages: 100,
            ocr_engine: OcrEngine::default(),
            show_page_number: true,
            include_metadata: true,
            no_pagination_and_metadata: false,
            title: None,
            paragraph: ParagraphThresholds::default(),
            max_retries: 3,
            retry_backoff_ms: 2000,
            password: None,
            download_timeout_secs: 120,
            primary: None,
            secondary: None,
            primary_settings: None,
            secondary_settings: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("max_image_side", &self.max_image_side)
            .field("concurrency", &self.concurrency)
            .field("text_threshold", &self.text_threshold)
            .field("max_pages", &self.max_pages)
            .field("ocr_engine", &self.ocr_engine)
            .field("show_page_number", &self.show_page_number)
            .field("include_metadata", &self.include_metadata)
            .field("no_pagination_and_metadata", &self.no_pagination_and_metadata)
            .field("paragraph", &self.paragraph)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("primary", &self.primary.as_ref().map(|p| p.name().to_string()))
            .field("secondary", &self.secondary.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective `(show_page_number, include_metadata)` after the override flag.
    pub fn pagination(&self) -> (bool, bool) {
        if self.no_pagination_and_metadata {
            (false, false)
        } else {
            (self.show_page_number, self.include_metadata)
        }
    }

    /// Check every range constraint.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if !(MIN_DPI..=MAX_DPI).contains(&self.dpi) {
            return Err(ConvertError::Validation(format!(
                "dpi must be {MIN_DPI}–{MAX_DPI}, got {}",
                self.dpi
            )));
        }
        if !(MIN_MAX_PAGES..=MAX_MAX_PAGES).contains(&self.max_pages) {
            return Err(ConvertError::Validation(format!(
                "max_pages must be {MIN_MAX_PAGES}–{MAX_MAX_PAGES}, got {}",
                self.max_pages
            )));
        }
        if self.concurrency == 0 {
            return Err(ConvertError::Validation("concurrency must be ≥ 1".into()));
        }
        if self.max_image_side < 64 {
            return Err(ConvertError::Validation(format!(
                "max_image_side must be ≥ 64, got {}",
                self.max_image_side
            )));
        }
        Ok(())
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_image_side(mut self, px: u32) -> Self {
        self.config.max_image_side = px;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn text_threshold(mut self, chars: usize) -> Self {
        self.config.text_threshold = chars;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn ocr_engine(mut self, engine: OcrEngine) -> Self {
        self.config.ocr_engine = engine;
        self
    }

    pub fn show_page_number(mut self, v: bool) -> Self {
        self.config.show_page_number = v;
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn no_pagination_and_metadata(mut self, v: bool) -> Self {
        self.config.no_pagination_and_metadata = v;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn paragraph_thresholds(mut self, thresholds: ParagraphThresholds) -> Self {
        self.config.paragraph = thresholds;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn primary(mut self, provider: Arc<dyn OcrProvider>) -> Self {
        self.config.primary = Some(provider);
        self
    }

    pub fn secondary(mut self, provider: Arc<dyn OcrProvider>) -> Self {
        self.config.secondary = Some(provider);
        self
    }

    pub fn primary_settings(mut self, settings: PrimarySettings) -> Self {
        self.config.primary_settings = Some(settings);
        self
    }

    pub fn secondary_settings(mut self, settings: SecondarySettings) -> Self {
        self.config.secondary_settings = Some(settings);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// OCR engine mode, resolved once per conversion.
///
/// | Mode | Behaviour |
/// |------|-----------|
/// | `primary` | primary provider only; failures are final |
/// | `secondary` | secondary provider only; whole-document when supported |
/// | `auto` | primary per page, falling back to secondary per page (default) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngine {
    Primary,
    Secondary,
    #[default]
    Auto,
}

impl OcrEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrEngine::Primary => "primary",
            OcrEngine::Secondary => "secondary",
            OcrEngine::Auto => "auto",
        }
    }
}

impl fmt::Display for OcrEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrEngine {
    type Err = ConvertError;

    /// Accepts the mode names plus the provider names they stand for.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" | "deepseek" => Ok(OcrEngine::Primary),
            "secondary" | "mineru" => Ok(OcrEngine::Secondary),
            "auto" => Ok(OcrEngine::Auto),
            other => Err(ConvertError::Validation(format!(
                "unknown ocr_engine '{other}' (expected primary, secondary, or auto)"
            ))),
        }
    }
}
