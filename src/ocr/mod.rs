//! OCR gateway: two interchangeable providers behind one contract.
//!
//! ```text
//!              ┌──────────────┐  retry ×N, backoff 2^k
//! ocr_image ──▶│   primary    │─────────────┐
//!              └──────────────┘   failure   ▼ (auto only)
//!                                  ┌──────────────┐
//!                                  │  secondary   │
//!                                  └──────────────┘
//! ```
//!
//! The engine mode is resolved once per conversion into an ordered provider
//! list ([`provider_order`]); every page walks that list on its own, so a
//! fallback on one page never affects another.

pub mod primary;
pub mod secondary;

use crate::config::OcrEngine;
use crate::error::OcrError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Capability contract shared by both providers.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Short provider name, recorded in chunk metadata.
    fn name(&self) -> &str;

    /// OCR one base64-encoded PNG into Markdown.
    async fn ocr_image(&self, base64_png: &str) -> Result<String, OcrError>;

    /// Whether [`OcrProvider::ocr_pdf`] is implemented.
    fn supports_pdf(&self) -> bool {
        false
    }

    /// OCR a whole PDF into Markdown.
    async fn ocr_pdf(&self, path: &Path) -> Result<String, OcrError> {
        let _ = path;
        Err(OcrError::Unsupported {
            provider: self.name().to_string(),
            operation: "whole-document OCR",
        })
    }
}

/// Which slot a provider occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Primary,
    Secondary,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Primary => "primary",
            ProviderKind::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Providers to try, in order, for an engine mode.
pub fn provider_order(engine: OcrEngine) -> &'static [ProviderKind] {
    match engine {
        OcrEngine::Primary => &[ProviderKind::Primary],
        OcrEngine::Secondary => &[ProviderKind::Secondary],
        OcrEngine::Auto => &[ProviderKind::Primary, ProviderKind::Secondary],
    }
}

/// Retry settings for primary provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Successful OCR plus which provider produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOutput {
    pub markdown: String,
    pub provider: ProviderKind,
    pub provider_name: String,
    /// Calls made to the winning provider, including the successful one.
    pub attempts: u32,
}

/// Engine-mode aware front for the two providers.
pub struct OcrGateway {
    engine: OcrEngine,
    primary: Option<Arc<dyn OcrProvider>>,
    secondary: Option<Arc<dyn OcrProvider>>,
    retry: RetryPolicy,
}

impl fmt::Debug for OcrGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrGateway")
            .field("engine", &self.engine)
            .field("primary", &self.primary.as_ref().map(|p| p.name().to_string()))
            .field("secondary", &self.secondary.as_ref().map(|p| p.name().to_string()))
            .field("retry", &self.retry)
            .finish()
    }
}

impl OcrGateway {
    pub fn new(
        engine: OcrEngine,
        primary: Option<Arc<dyn OcrProvider>>,
        secondary: Option<Arc<dyn OcrProvider>>,
    ) -> Self {
        Self {
            engine,
            primary,
            secondary,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn engine(&self) -> OcrEngine {
        self.engine
    }

    /// `true` when pages should not be OCR'd one by one: the engine is
    /// `secondary` and the secondary provider accepts whole documents.
    pub fn is_document_level(&self) -> bool {
        self.engine == OcrEngine::Secondary
            && self.secondary.as_ref().is_some_and(|p| p.supports_pdf())
    }

    fn provider(&self, kind: ProviderKind) -> Result<&Arc<dyn OcrProvider>, OcrError> {
        let slot = match kind {
            ProviderKind::Primary => &self.primary,
            ProviderKind::Secondary => &self.secondary,
        };
        slot.as_ref().ok_or_else(|| OcrError::NotConfigured {
            provider: kind.to_string(),
            hint: format!("no {kind} OCR provider was supplied or could be built"),
        })
    }

    /// OCR one page image according to the engine mode.
    pub async fn ocr_image(&self, page: usize, base64_png: &str) -> Result<OcrOutput, OcrError> {
        let order = provider_order(self.engine);
        let mut last_err: Option<OcrError> = None;

        for (i, &kind) in order.iter().enumerate() {
            match self.call_with_retry(kind, page, base64_png).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    if let Some(next) = order.get(i + 1) {
                        warn!("Page {}: {} OCR failed, falling back to {}: {}", page, kind, next, e);
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| OcrError::NotConfigured {
            provider: self.engine.to_string(),
            hint: "engine mode selects no provider".into(),
        }))
    }

    /// Primary calls get `max_retries` extra attempts with exponential
    /// backoff; secondary calls are made once.
    async fn call_with_retry(
        &self,
        kind: ProviderKind,
        page: usize,
        base64_png: &str,
    ) -> Result<OcrOutput, OcrError> {
        let provider = self.provider(kind)?;
        let max_retries = match kind {
            ProviderKind::Primary => self.retry.max_retries,
            ProviderKind::Secondary => 0,
        };

        let mut last_err: Option<OcrError> = None;
        for attempt in 0..=max_retries {
            if attempt > 0 {
                let backoff = self.retry.delay(attempt);
                warn!(
                    "Page {}: {} retry {}/{} after {:?}",
                    page, kind, attempt, max_retries, backoff
                );
                sleep(backoff).await;
            }

            match provider.ocr_image(base64_png).await {
                Ok(markdown) => {
                    debug!("Page {}: {} OCR ok ({} chars)", page, kind, markdown.len());
                    return Ok(OcrOutput {
                        markdown,
                        provider: kind,
                        provider_name: provider.name().to_string(),
                        attempts: attempt + 1,
                    });
                }
                Err(e) => {
                    warn!("Page {}: {} attempt {} failed: {}", page, kind, attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| OcrError::Provider {
            provider: provider.name().to_string(),
            message: "no attempt was made".into(),
        }))
    }

    /// OCR a whole document through the secondary provider.
    pub async fn ocr_document(&self, path: &Path) -> Result<OcrOutput, OcrError> {
        let provider = self.provider(ProviderKind::Secondary)?;
        let markdown = provider.ocr_pdf(path).await?;
        Ok(OcrOutput {
            markdown,
            provider: ProviderKind::Secondary,
            provider_name: provider.name().to_string(),
            attempts: 1,
        })
    }
}
