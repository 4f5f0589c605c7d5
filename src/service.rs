//! Task-oriented conversion: upload a file, convert it, keep the result.
//!
//! ```text
//! upload ──▶ Task(pending) ──▶ run ──▶ Task(processing, progress %) ──▶ Task(completed | failed)
//!   │                            │                                         │
//!   └─ Storage::save_upload      └─ convert()                              └─ Storage::save_output
//! ```
//!
//! The service owns no state of its own; the [`Storage`] and [`TaskStore`]
//! behind it are shared, so any number of services (or request handlers)
//! can work against the same registry.

use crate::config::ConversionConfig;
use crate::convert::convert;
use crate::detect::detect_path;
use crate::error::ConvertError;
use crate::output::{ChunkType, ConversionMetadata};
use crate::pipeline::input::ensure_pdf;
use crate::progress::ConversionProgressCallback;
use crate::storage::Storage;
use crate::store::{Task, TaskStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct ConversionService {
    storage: Arc<dyn Storage>,
    tasks: Arc<dyn TaskStore>,
    config: ConversionConfig,
}

impl ConversionService {
    pub fn new(storage: Arc<dyn Storage>, tasks: Arc<dyn TaskStore>, config: ConversionConfig) -> Self {
        Self {
            storage,
            tasks,
            config,
        }
    }

    pub fn tasks(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    /// Persist the bytes and register a pending task for them.
    ///
    /// The file type is recorded as detected; non-PDF uploads are accepted
    /// here and fail when run.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<Task, ConvertError> {
        let path = self.storage.save_upload(filename, bytes).await?;
        let file_type = detect_path(&path).map_err(|source| ConvertError::Storage {
            path: path.clone(),
            source,
        })?;
        let task = Task::new(filename, path, file_type);
        info!(
            "Registered task {} for '{}' ({})",
            task.task_id, task.filename, task.file_type
        );
        self.tasks.insert(task.clone());
        Ok(task)
    }

    /// Run a registered task to completion and return its final state.
    ///
    /// Conversion errors are recorded on the task, not returned; `Err` means
    /// the task does not exist.
    pub async fn run(&self, task_id: &str) -> Result<Task, ConvertError> {
        let task = self.tasks.get(task_id)?;
        if task.status.is_terminal() {
            debug!("Task {} already {}, not running", task_id, task.status);
            return Ok(task);
        }
        self.tasks.update(task_id, &mut |t| t.mark_processing())?;

        match self.execute(&task).await {
            Ok((result_path, metadata)) => {
                info!("Task {} completed: {}", task_id, result_path.display());
                let mut result_path = Some(result_path);
                let mut metadata = Some(metadata);
                self.tasks.update(task_id, &mut |t| {
                    if t.status.is_terminal() {
                        return;
                    }
                    if let (Some(path), Some(meta)) = (result_path.take(), metadata.take()) {
                        t.mark_completed(path, meta);
                    }
                })
            }
            Err(e) => {
                error!("Task {} failed: {}", task_id, e);
                let message = e.to_string();
                self.tasks.update(task_id, &mut |t| {
                    if !t.status.is_terminal() {
                        t.mark_failed(message.clone());
                    }
                })
            }
        }
    }

    /// [`upload`](Self::upload) then [`run`](Self::run).
    pub async fn process_upload(&self, filename: &str, bytes: &[u8]) -> Result<Task, ConvertError> {
        let task = self.upload(filename, bytes).await?;
        self.run(&task.task_id).await
    }

    /// Mark a task cancelled. Terminal tasks are returned unchanged.
    ///
    /// A conversion already in flight finishes its work, but its result is
    /// not recorded.
    pub fn cancel(&self, task_id: &str) -> Result<Task, ConvertError> {
        self.tasks.update(task_id, &mut |t| {
            if !t.status.is_terminal() {
                t.mark_cancelled();
            }
        })
    }

    async fn execute(
        &self,
        task: &Task,
    ) -> Result<(PathBuf, BTreeMap<String, serde_json::Value>), ConvertError> {
        ensure_pdf(&task.file_path, task.file_type)?;

        let mut config = self.config.clone();
        config.progress_callback = Some(Arc::new(TaskProgress::new(
            Arc::clone(&self.tasks),
            &task.task_id,
        )));

        let input = path_str(&task.file_path)?;
        let result = convert(input, &config).await?;
        let markdown = result.markdown().unwrap_or_default();
        let output = self.storage.save_output(markdown, &task.task_id).await?;

        let mut metadata = metadata_map(&result.metadata);
        metadata.insert(
            "file_size".to_string(),
            serde_json::json!(self.storage.file_size(&task.file_path).await?),
        );
        Ok((output, metadata))
    }
}

fn path_str(path: &Path) -> Result<&str, ConvertError> {
    path.to_str()
        .ok_or_else(|| ConvertError::Internal(format!("non-UTF-8 path: {}", path.display())))
}

/// Flatten conversion metadata into the task's free-form map.
pub fn metadata_map(metadata: &ConversionMetadata) -> BTreeMap<String, serde_json::Value> {
    match serde_json::to_value(metadata) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

/// Keeps a task's page counters current while its pages convert.
struct TaskProgress {
    tasks: Arc<dyn TaskStore>,
    task_id: String,
    done: AtomicUsize,
}

impl TaskProgress {
    fn new(tasks: Arc<dyn TaskStore>, task_id: &str) -> Self {
        Self {
            tasks,
            task_id: task_id.to_string(),
            done: AtomicUsize::new(0),
        }
    }

    fn record(&self, current: usize, total: usize) {
        if let Err(e) = self
            .tasks
            .update(&self.task_id, &mut |t| t.update_progress(current, total))
        {
            debug!("Progress update dropped: {}", e);
        }
    }

    fn page_done(&self, total: usize) {
        let current = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(current, total);
    }
}

impl ConversionProgressCallback for TaskProgress {
    fn on_conversion_start(&self, total_pages: usize) {
        self.record(0, total_pages);
    }

    fn on_page_complete(&self, _page: usize, total: usize, _kind: ChunkType, _len: usize) {
        self.page_done(total);
    }

    fn on_page_error(&self, _page: usize, total: usize, _error: &str) {
        self.page_done(total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FileType;
    use crate::storage::{LocalStorage, StorageSettings};
    use crate::store::{InMemoryTaskStore, TaskStatus};

    fn service(root: &Path) -> ConversionService {
        ConversionService::new(
            Arc::new(LocalStorage::new(StorageSettings::under(root))),
            Arc::new(InMemoryTaskStore::new()),
            ConversionConfig::default(),
        )
    }

    #[tokio::test]
    async fn upload_registers_pending_task() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let task = svc.upload("report.pdf", b"%PDF-1.7\n%%EOF").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.file_type, FileType::Pdf);
        assert!(task.file_path.exists());
        assert_eq!(svc.tasks().get(&task.task_id).unwrap(), task);
    }

    #[tokio::test]
    async fn non_pdf_upload_fails_its_task() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let task = svc
            .process_upload("photo.png", b"\x89PNG\r\n\x1a\n....")
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("png"));
        assert!(task.result_path.is_none());
    }

    #[tokio::test]
    async fn cancelled_tasks_do_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let task = svc.upload("a.pdf", b"%PDF-1.4").await.unwrap();
        svc.cancel(&task.task_id).unwrap();
        let after = svc.run(&task.task_id).await.unwrap();
        assert_eq!(after.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        assert!(matches!(
            svc.run("task_000000000000").await,
            Err(ConvertError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn progress_counts_finished_pages() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let task = Task::new("a.pdf", "/tmp/a.pdf", FileType::Pdf);
        let id = task.task_id.clone();
        store.insert(task);

        let progress = TaskProgress::new(Arc::clone(&store), &id);
        progress.on_conversion_start(4);
        progress.on_page_complete(2, 4, ChunkType::Text, 10);
        progress.on_page_error(1, 4, "boom");

        let task = store.get(&id).unwrap();
        assert_eq!(task.current_page, 2);
        assert_eq!(task.total_pages, 4);
        assert_eq!(task.progress, 50);
    }

    #[test]
    fn metadata_flattens_to_json_values() {
        let meta = ConversionMetadata {
            ocr_pages: 2,
            ocr_engine: "auto".into(),
            ..Default::default()
        };
        let map = metadata_map(&meta);
        assert_eq!(map["ocr_pages"], 2);
        assert_eq!(map["ocr_engine"], "auto");
    }
}
