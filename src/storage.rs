//! Upload and output storage.
//!
//! The converter itself only needs a path to read and a place to put
//! Markdown; [`Storage`] is the seam the service layer writes through.
//! [`LocalStorage`] keeps everything under two directories on disk. Nothing
//! is ever deleted here; retention is the deployment's business.

use crate::error::ConvertError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Where [`LocalStorage`] keeps files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Default: `./storage/uploads`.
    pub upload_dir: PathBuf,
    /// Default: `./storage/outputs`.
    pub output_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::under("./storage")
    }
}

impl StorageSettings {
    /// `uploads/` and `outputs/` below one root.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            upload_dir: root.join("uploads"),
            output_dir: root.join("outputs"),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist an uploaded file; returns where it landed.
    async fn save_upload(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, ConvertError>;

    /// Persist converted Markdown under `id`; returns its path.
    async fn save_output(&self, content: &str, id: &str) -> Result<PathBuf, ConvertError>;

    async fn file_size(&self, path: &Path) -> Result<u64, ConvertError>;
}

/// Filesystem-backed [`Storage`].
#[derive(Debug, Clone)]
pub struct LocalStorage {
    settings: StorageSettings,
}

impl LocalStorage {
    pub fn new(settings: StorageSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }
}

fn storage_err(path: &Path) -> impl FnOnce(io::Error) -> ConvertError + '_ {
    move |source| ConvertError::Storage {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save_upload(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, ConvertError> {
        let unique = Uuid::new_v4().simple().to_string();
        let name = format!("{}_{}", &unique[..8], sanitize_filename(filename));
        let path = self.settings.upload_dir.join(name);
        write_atomic(&path, bytes).await.map_err(storage_err(&path))?;
        debug!("Saved upload ({} bytes) to {}", bytes.len(), path.display());
        Ok(path)
    }

    async fn save_output(&self, content: &str, id: &str) -> Result<PathBuf, ConvertError> {
        let path = self
            .settings
            .output_dir
            .join(format!("{}.md", sanitize_filename(id)));
        write_atomic(&path, content.as_bytes())
            .await
            .map_err(storage_err(&path))?;
        debug!("Saved output ({} bytes) to {}", content.len(), path.display());
        Ok(path)
    }

    async fn file_size(&self, path: &Path) -> Result<u64, ConvertError> {
        let meta = tokio::fs::metadata(path).await.map_err(storage_err(path))?;
        Ok(meta.len())
    }
}

/// Write to a sibling temp file, then rename over the target.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Keep the final path component and replace anything unusual with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories_and_odd_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my report (v2).pdf"), "my_report__v2_.pdf");
        assert_eq!(sanitize_filename("报告.pdf"), "报告.pdf");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[tokio::test]
    async fn upload_and_output_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(StorageSettings::under(dir.path()));

        let upload = storage.save_upload("scan.pdf", b"%PDF-1.4").await.unwrap();
        assert!(upload.starts_with(dir.path().join("uploads")));
        assert!(upload.to_string_lossy().ends_with("_scan.pdf"));
        assert_eq!(storage.file_size(&upload).await.unwrap(), 8);

        let out = storage.save_output("# Done", "task_abc").await.unwrap();
        assert_eq!(out, dir.path().join("outputs").join("task_abc.md"));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "# Done");
        assert!(!dir.path().join("outputs").join("task_abc.md.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_size_is_a_storage_error() {
        let storage = LocalStorage::new(StorageSettings::default());
        let err = storage
            .file_size(Path::new("/no/such/file.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Storage { .. }));
    }
}
