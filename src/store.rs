//! Conversion task records and the registry that holds them.
//!
//! A [`Task`] tracks one conversion from upload to result. The registry is
//! behind the [`TaskStore`] trait; [`InMemoryTaskStore`] is a process-wide
//! map guarded by a `Mutex`, which is what lets the per-page progress
//! callback update it from concurrent page tasks.

use crate::error::ConvertError;
use crate::detect::FileType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// `task_` followed by 12 hex digits.
    pub task_id: String,
    pub filename: String,
    pub file_path: PathBuf,
    pub file_type: FileType,
    pub status: TaskStatus,
    /// 0–100.
    pub progress: u8,
    pub current_page: usize,
    pub total_pages: usize,
    pub result_path: Option<PathBuf>,
    pub error: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub fn new_task_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("task_{}", &hex[..12])
}

impl Task {
    pub fn new(filename: impl Into<String>, file_path: impl Into<PathBuf>, file_type: FileType) -> Self {
        let now = Utc::now();
        Self {
            task_id: new_task_id(),
            filename: filename.into(),
            file_path: file_path.into(),
            file_type,
            status: TaskStatus::Pending,
            progress: 0,
            current_page: 0,
            total_pages: 0,
            result_path: None,
            error: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn mark_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.updated_at = Utc::now();
    }

    /// Progress is the share of pages done, rounded down.
    pub fn update_progress(&mut self, current_page: usize, total_pages: usize) {
        self.current_page = current_page;
        self.total_pages = total_pages;
        if total_pages > 0 {
            self.progress = (current_page.min(total_pages) * 100 / total_pages) as u8;
        }
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(
        &mut self,
        result_path: PathBuf,
        metadata: BTreeMap<String, serde_json::Value>,
    ) {
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.result_path = Some(result_path);
        self.metadata.extend(metadata);
        self.progress = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.updated_at = Utc::now();
    }
}

/// Registry of tasks.
pub trait TaskStore: Send + Sync {
    fn insert(&self, task: Task);

    fn get(&self, task_id: &str) -> Result<Task, ConvertError>;

    /// Apply `f` to the stored task and return the updated copy.
    fn update(&self, task_id: &str, f: &mut dyn FnMut(&mut Task)) -> Result<Task, ConvertError>;

    /// Newest first.
    fn list(&self) -> Vec<Task>;

    fn delete(&self, task_id: &str) -> Result<Task, ConvertError>;
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Updates are applied to a clone and written back whole, so a poisoned
    // map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn not_found(task_id: &str) -> ConvertError {
    ConvertError::TaskNotFound {
        task_id: task_id.to_string(),
    }
}

impl TaskStore for InMemoryTaskStore {
    fn insert(&self, task: Task) {
        self.lock().insert(task.task_id.clone(), task);
    }

    fn get(&self, task_id: &str) -> Result<Task, ConvertError> {
        self.lock().get(task_id).cloned().ok_or_else(|| not_found(task_id))
    }

    fn update(&self, task_id: &str, f: &mut dyn FnMut(&mut Task)) -> Result<Task, ConvertError> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(task_id).ok_or_else(|| not_found(task_id))?;
        let mut updated = task.clone();
        f(&mut updated);
        *task = updated.clone();
        Ok(updated)
    }

    fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.lock().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    fn delete(&self, task_id: &str) -> Result<Task, ConvertError> {
        self.lock().remove(task_id).ok_or_else(|| not_found(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_have_fixed_shape() {
        let id = new_task_id();
        assert!(id.starts_with("task_"));
        assert_eq!(id.len(), 17);
        assert!(id[5..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_task_id());
    }

    #[test]
    fn progress_is_percentage_of_pages() {
        let mut task = Task::new("a.pdf", "/tmp/a.pdf", FileType::Pdf);
        task.update_progress(1, 3);
        assert_eq!(task.progress, 33);
        task.update_progress(5, 3);
        assert_eq!(task.progress, 100);
        task.update_progress(0, 0);
        assert_eq!(task.progress, 100, "zero total leaves progress alone");
    }

    #[test]
    fn lifecycle() {
        let mut task = Task::new("a.pdf", "/tmp/a.pdf", FileType::Pdf);
        assert_eq!(task.status, TaskStatus::Pending);
        task.mark_processing();
        assert!(!task.status.is_terminal());

        let mut meta = BTreeMap::new();
        meta.insert("ocr_pages".to_string(), serde_json::json!(2));
        task.mark_completed(PathBuf::from("/out/a.md"), meta);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.completed_at.is_some());
        assert_eq!(task.metadata["ocr_pages"], 2);
    }

    #[test]
    fn store_crud() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("a.pdf", "/tmp/a.pdf", FileType::Pdf);
        let id = task.task_id.clone();
        store.insert(task);

        let updated = store
            .update(&id, &mut |t| t.mark_failed("pdfium exploded"))
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Failed);
        assert_eq!(store.get(&id).unwrap().error.as_deref(), Some("pdfium exploded"));
        assert_eq!(store.list().len(), 1);

        store.delete(&id).unwrap();
        assert!(matches!(store.get(&id), Err(ConvertError::TaskNotFound { .. })));
        assert!(store.delete(&id).is_err());
    }

    #[test]
    fn status_serialises_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
