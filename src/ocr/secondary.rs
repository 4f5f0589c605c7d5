//! Secondary provider: an asynchronous document-parsing job service.
//!
//! One job per input, in four HTTP steps against a MinerU-compatible v4 API:
//!
//! 1. `POST /api/v4/file-urls/batch` reserves a batch and returns a signed
//!    upload URL.
//! 2. `PUT` the file bytes to that URL.
//! 3. `GET /api/v4/extract-results/batch/{batch_id}` until the file's state
//!    is `done` or `failed`, at most `max_polls` times.
//! 4. Download `full_zip_url` and read the Markdown out of the archive.
//!
//! Both single page images and whole PDFs go through the same job flow.

use crate::error::{ConvertError, OcrError};
use crate::ocr::OcrProvider;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use zip::ZipArchive;

pub const DEFAULT_SECONDARY_BASE_URL: &str = "https://mineru.net";
const PROVIDER_NAME: &str = "mineru";

/// Settings for the job-based provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondarySettings {
    /// Bearer token. The provider can be built without one; calls then fail
    /// with [`OcrError::NotConfigured`].
    pub api_key: Option<String>,
    /// Default: `https://mineru.net`.
    pub base_url: String,
    /// Default: `vlm`.
    pub model_version: String,
    /// Default: 2 s.
    pub poll_interval: Duration,
    /// Default: 300 (a 10-minute ceiling at the default interval).
    pub max_polls: u32,
    /// Per-HTTP-request timeout. Default: 60.
    pub request_timeout_secs: u64,
}

impl Default for SecondarySettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_SECONDARY_BASE_URL.to_string(),
            model_version: "vlm".to_string(),
            poll_interval: Duration::from_secs(2),
            max_polls: 300,
            request_timeout_secs: 60,
        }
    }
}

impl SecondarySettings {
    /// Defaults overridden by `SECONDARY_OCR_API_KEY` (or `MINERU_API_KEY`),
    /// `SECONDARY_OCR_BASE_URL` (or `MINERU_BASE_URL`), and
    /// `SECONDARY_OCR_MODEL_VERSION`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.api_key = env_any(&["SECONDARY_OCR_API_KEY", "MINERU_API_KEY"]);
        if let Some(url) = env_any(&["SECONDARY_OCR_BASE_URL", "MINERU_BASE_URL"]) {
            settings.base_url = url;
        }
        if let Some(version) = env_any(&["SECONDARY_OCR_MODEL_VERSION"]) {
            settings.model_version = version;
        }
        settings
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_polls: self.max_polls,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn env_any(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
}

// ── Wire types ───────────────────────────────────────────────────────────

/// Every JSON response is wrapped as `{code, msg, data}`; `code == 0` is success.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    files: Vec<BatchFile<'a>>,
    model_version: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchFile<'a> {
    name: &'a str,
    data_id: String,
}

#[derive(Debug, Deserialize)]
struct BatchReservation {
    batch_id: String,
    file_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResults {
    #[serde(default)]
    extract_result: Vec<ExtractResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractResult {
    pub state: String,
    #[serde(default)]
    pub full_zip_url: Option<String>,
    #[serde(default)]
    pub err_msg: Option<String>,
}

/// Where a job stands after one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Queued or running; `state` is the raw service value.
    Pending { state: String },
    Done { zip_url: String },
    Failed { message: String },
}

impl From<&ExtractResult> for JobState {
    fn from(result: &ExtractResult) -> Self {
        match result.state.as_str() {
            "done" => match result.full_zip_url.as_deref().filter(|u| !u.is_empty()) {
                Some(url) => JobState::Done {
                    zip_url: url.to_string(),
                },
                None => JobState::Failed {
                    message: "job finished without a result archive".to_string(),
                },
            },
            "failed" => JobState::Failed {
                message: result
                    .err_msg
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            other => JobState::Pending {
                state: other.to_string(),
            },
        }
    }
}

// ── Polling ──────────────────────────────────────────────────────────────

/// Bounded polling: at most `max_polls` fetches, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

/// Poll `fetch` until the job is done.
///
/// A `Failed` state ends polling immediately with [`OcrError::JobFailed`].
/// Running out of polls is [`OcrError::Timeout`]. `fetch` receives the
/// 1-based poll number.
pub async fn poll_until_done<F, Fut>(
    policy: PollPolicy,
    provider: &str,
    mut fetch: F,
) -> Result<String, OcrError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<JobState, OcrError>>,
{
    for poll in 1..=policy.max_polls {
        match fetch(poll).await? {
            JobState::Done { zip_url } => {
                debug!("{}: job done after {} poll(s)", provider, poll);
                return Ok(zip_url);
            }
            JobState::Failed { message } => {
                return Err(OcrError::JobFailed {
                    provider: provider.to_string(),
                    message,
                });
            }
            JobState::Pending { state } => {
                debug!("{}: poll {}/{} state={}", provider, poll, policy.max_polls, state);
                if poll < policy.max_polls {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }

    Err(OcrError::Timeout {
        provider: provider.to_string(),
        polls: policy.max_polls,
        secs: policy.interval.as_secs() * u64::from(policy.max_polls),
    })
}

// ── Result archive ───────────────────────────────────────────────────────

/// Read the Markdown out of a result archive: `full.md` wherever it sits,
/// otherwise the first `.md` entry.
pub fn extract_markdown(archive: &[u8]) -> Result<String, zip::result::ZipError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;

    let mut first_md: Option<usize> = None;
    let mut full_md: Option<usize> = None;
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let name = entry.name();
        if entry.is_dir() || name.starts_with("__MACOSX") || !name.ends_with(".md") {
            continue;
        }
        if name == "full.md" || name.ends_with("/full.md") {
            full_md = Some(i);
            break;
        }
        first_md.get_or_insert(i);
    }

    let Some(index) = full_md.or(first_md) else {
        return Err(zip::result::ZipError::FileNotFound);
    };
    let mut entry = zip.by_index(index)?;
    let mut markdown = String::new();
    entry.read_to_string(&mut markdown)?;
    Ok(markdown)
}

// ── Provider ─────────────────────────────────────────────────────────────

/// Job-based OCR provider.
#[derive(Debug, Clone)]
pub struct SecondaryOcrProvider {
    client: reqwest::Client,
    settings: SecondarySettings,
}

impl SecondaryOcrProvider {
    pub fn new(settings: SecondarySettings) -> Result<Self, ConvertError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("pagewise/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConvertError::ProviderNotConfigured {
                provider: PROVIDER_NAME.to_string(),
                hint: format!("HTTP client: {e}"),
            })?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &SecondarySettings {
        &self.settings
    }

    fn api_key(&self) -> Result<&str, OcrError> {
        self.settings
            .api_key
            .as_deref()
            .ok_or_else(|| OcrError::NotConfigured {
                provider: PROVIDER_NAME.to_string(),
                hint: "set SECONDARY_OCR_API_KEY (or MINERU_API_KEY)".to_string(),
            })
    }

    fn fail(&self, step: &str, detail: impl std::fmt::Display) -> OcrError {
        OcrError::Provider {
            provider: PROVIDER_NAME.to_string(),
            message: format!("{step}: {detail}"),
        }
    }

    async fn read_envelope<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        step: &str,
    ) -> Result<T, OcrError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.fail(step, format!("HTTP {status}: {body}")));
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| self.fail(step, format!("malformed response: {e}")))?;
        if envelope.code != 0 {
            return Err(self.fail(step, format!("code {}: {}", envelope.code, envelope.msg)));
        }
        envelope
            .data
            .ok_or_else(|| self.fail(step, "response carried no data"))
    }

    /// Step 1: reserve a batch and an upload URL.
    async fn reserve(&self, file_name: &str) -> Result<(String, String), OcrError> {
        let key = self.api_key()?;
        let body = BatchRequest {
            files: vec![BatchFile {
                name: file_name,
                data_id: Uuid::new_v4().simple().to_string(),
            }],
            model_version: &self.settings.model_version,
        };
        let response = self
            .client
            .post(self.settings.endpoint("/api/v4/file-urls/batch"))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.fail("reserve", e))?;

        let reservation: BatchReservation = self.read_envelope(response, "reserve").await?;
        let upload_url = reservation
            .file_urls
            .into_iter()
            .next()
            .ok_or_else(|| self.fail("reserve", "no upload URL returned"))?;
        Ok((reservation.batch_id, upload_url))
    }

    /// Step 2: upload the bytes.
    async fn upload(&self, upload_url: &str, bytes: Vec<u8>) -> Result<(), OcrError> {
        let response = self
            .client
            .put(upload_url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| self.fail("upload", e))?;
        if !response.status().is_success() {
            return Err(self.fail("upload", format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    /// Step 3, one poll.
    async fn fetch_state(&self, batch_id: &str) -> Result<JobState, OcrError> {
        let key = self.api_key()?;
        let response = self
            .client
            .get(self
                .settings
                .endpoint(&format!("/api/v4/extract-results/batch/{batch_id}")))
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| self.fail("poll", e))?;
        let results: BatchResults = self.read_envelope(response, "poll").await?;
        Ok(results
            .extract_result
            .first()
            .map(JobState::from)
            .unwrap_or_else(|| JobState::Pending {
                state: "queued".to_string(),
            }))
    }

    /// Step 4: download and unpack.
    async fn download_markdown(&self, zip_url: &str) -> Result<String, OcrError> {
        let response = self
            .client
            .get(zip_url)
            .send()
            .await
            .map_err(|e| self.fail("download", e))?;
        if !response.status().is_success() {
            return Err(self.fail("download", format!("HTTP {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.fail("download", e))?;
        extract_markdown(&bytes).map_err(|e| self.fail("archive", e))
    }

    async fn run_job(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, OcrError> {
        let (batch_id, upload_url) = self.reserve(file_name).await?;
        info!("{}: batch {} reserved for '{}'", PROVIDER_NAME, batch_id, file_name);

        self.upload(&upload_url, bytes).await?;

        let zip_url = poll_until_done(self.settings.poll_policy(), PROVIDER_NAME, |_| {
            self.fetch_state(&batch_id)
        })
        .await?;

        let markdown = self.download_markdown(&zip_url).await?;
        info!("{}: batch {} → {} chars", PROVIDER_NAME, batch_id, markdown.len());
        Ok(markdown)
    }
}

#[async_trait]
impl OcrProvider for SecondaryOcrProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn ocr_image(&self, base64_png: &str) -> Result<String, OcrError> {
        let bytes = STANDARD
            .decode(base64_png)
            .map_err(|e| self.fail("decode", e))?;
        self.run_job("page.png", bytes).await
    }

    fn supports_pdf(&self) -> bool {
        true
    }

    async fn ocr_pdf(&self, path: &Path) -> Result<String, OcrError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| self.fail("read", format!("{}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf");
        self.run_job(file_name, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn fast(max_polls: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::ZERO,
            max_polls,
        }
    }

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn failed_state_stops_polling_at_once() {
        let mut polls = 0;
        let err = poll_until_done(fast(300), "jobs", |_| {
            polls += 1;
            async {
                Ok(JobState::Failed {
                    message: "bad scan".into(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(polls, 1);
        match err {
            OcrError::JobFailed { message, .. } => assert_eq!(message, "bad scan"),
            other => panic!("expected JobFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_forever_times_out_at_ceiling() {
        let mut polls = 0;
        let err = poll_until_done(fast(5), "jobs", |_| {
            polls += 1;
            async {
                Ok(JobState::Pending {
                    state: "running".into(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(polls, 5);
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn done_returns_archive_url() {
        let url = poll_until_done(fast(10), "jobs", |n| async move {
            if n < 3 {
                Ok(JobState::Pending {
                    state: "pending".into(),
                })
            } else {
                Ok(JobState::Done {
                    zip_url: format!("https://cdn/{n}.zip"),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(url, "https://cdn/3.zip");
    }

    #[test]
    fn job_state_from_results() {
        let parse = |json: &str| JobState::from(&serde_json::from_str::<ExtractResult>(json).unwrap());

        assert_eq!(
            parse(r#"{"state":"done","full_zip_url":"https://x/y.zip"}"#),
            JobState::Done {
                zip_url: "https://x/y.zip".into()
            }
        );
        assert_eq!(
            parse(r#"{"state":"failed","err_msg":"page limit exceeded"}"#),
            JobState::Failed {
                message: "page limit exceeded".into()
            }
        );
        assert!(matches!(
            parse(r#"{"state":"done"}"#),
            JobState::Failed { .. }
        ));
        assert_eq!(
            parse(r#"{"state":"running"}"#),
            JobState::Pending {
                state: "running".into()
            }
        );
    }

    #[test]
    fn envelope_parses_reservation() {
        let json = r#"{"code":0,"msg":"ok","data":{"batch_id":"b1","file_urls":["https://up/1"]}}"#;
        let env: Envelope<BatchReservation> = serde_json::from_str(json).unwrap();
        assert_eq!(env.code, 0);
        let data = env.data.unwrap();
        assert_eq!(data.batch_id, "b1");
        assert_eq!(data.file_urls, vec!["https://up/1".to_string()]);
    }

    #[test]
    fn archive_prefers_full_md() {
        let archive = zip_with(&[
            ("abc/layout.md", "layout"),
            ("abc/full.md", "# Full\n\nbody"),
        ]);
        assert_eq!(extract_markdown(&archive).unwrap(), "# Full\n\nbody");
    }

    #[test]
    fn archive_falls_back_to_first_md() {
        let archive = zip_with(&[("images/a.png", "png"), ("notes.md", "notes")]);
        assert_eq!(extract_markdown(&archive).unwrap(), "notes");
    }

    #[test]
    fn archive_without_markdown_is_an_error() {
        let archive = zip_with(&[("content.json", "{}")]);
        assert!(extract_markdown(&archive).is_err());
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let settings = SecondarySettings {
            base_url: "https://jobs.example/".into(),
            ..Default::default()
        };
        assert_eq!(
            settings.endpoint("/api/v4/file-urls/batch"),
            "https://jobs.example/api/v4/file-urls/batch"
        );
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let provider = SecondaryOcrProvider::new(SecondarySettings::default()).unwrap();
        let err = provider.ocr_image(&STANDARD.encode(b"png")).await.unwrap_err();
        assert!(matches!(err, OcrError::NotConfigured { .. }));
        assert!(provider.supports_pdf());
    }
}
