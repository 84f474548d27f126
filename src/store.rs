//! Persistence of workflow and task records.
//!
//! The engine persists through the [`WorkflowStore`] trait so the storage
//! backend stays swappable: the JSON file store is the shipping backend,
//! the memory store backs tests.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::agent::Stage;
use crate::runner::TaskRecord;
use crate::workflow::WorkflowState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One stage's recorded output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: Stage,
    pub output: String,
}

/// Persisted state of one workflow session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub session_id: String,
    pub workspace: PathBuf,
    pub status: WorkflowState,
    pub original_request: String,
    pub requirements: Option<String>,
    pub stage_outputs: Vec<StageOutput>,
    pub failed_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Storage collaborator for workflow and task records.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save_workflow(&self, record: &WorkflowRecord) -> Result<(), StoreError>;

    async fn load_workflow(&self, session_id: &str) -> Result<Option<WorkflowRecord>, StoreError>;

    async fn save_task(&self, record: &TaskRecord) -> Result<(), StoreError>;

    async fn list_tasks(&self, session_id: &str) -> Result<Vec<TaskRecord>, StoreError>;
}

/// JSON-file-per-record store under a base directory.
///
/// Layout: `workflows/<session_id>.json` and
/// `tasks/<session_id>/<task_id>.json`. Writes go through a temp file and
/// rename so a crash never leaves a half-written record.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn workflow_path(&self, session_id: &str) -> PathBuf {
        self.dir.join("workflows").join(format!("{}.json", sanitize(session_id)))
    }

    fn task_dir(&self, session_id: &str) -> PathBuf {
        self.dir.join("tasks").join(sanitize(session_id))
    }

    fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Session ids land in file names; strip path separators.
fn sanitize(id: &str) -> String {
    id.chars().map(|c| if c == '/' || c == '\\' { '_' } else { c }).collect()
}

#[async_trait]
impl WorkflowStore for JsonFileStore {
    async fn save_workflow(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        Self::write_json(&self.workflow_path(&record.session_id), record)
    }

    async fn load_workflow(&self, session_id: &str) -> Result<Option<WorkflowRecord>, StoreError> {
        let path = self.workflow_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let path = self
            .task_dir(&record.session_id)
            .join(format!("{}.json", sanitize(&record.task_id)));
        Self::write_json(&path, record)
    }

    async fn list_tasks(&self, session_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let dir = self.task_dir(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut tasks = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                let content = std::fs::read_to_string(entry.path())?;
                tasks.push(serde_json::from_str(&content)?);
            }
        }
        tasks.sort_by_key(|task: &TaskRecord| task.started_at);
        Ok(tasks)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, WorkflowRecord>>,
    tasks: RwLock<Vec<TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted workflow records.
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn save_workflow(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        self.workflows.write().insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn load_workflow(&self, session_id: &str) -> Result<Option<WorkflowRecord>, StoreError> {
        Ok(self.workflows.read().get(session_id).cloned())
    }

    async fn save_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.tasks.write().push(record.clone());
        Ok(())
    }

    async fn list_tasks(&self, session_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .tasks
            .read()
            .iter()
            .filter(|task| task.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str) -> WorkflowRecord {
        WorkflowRecord {
            session_id: session_id.to_string(),
            workspace: PathBuf::from("/tmp/ws"),
            status: WorkflowState::Pending,
            original_request: "build something".to_string(),
            requirements: None,
            stage_outputs: Vec::new(),
            failed_stage: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn workflow_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let mut rec = record("s1");
        rec.requirements = Some("R1".to_string());
        rec.stage_outputs.push(StageOutput { stage: Stage::Planner, output: "plan".to_string() });
        store.save_workflow(&rec).await.unwrap();

        let loaded = store.load_workflow("s1").await.unwrap().unwrap();
        assert_eq!(loaded.requirements.as_deref(), Some("R1"));
        assert_eq!(loaded.stage_outputs.len(), 1);
        assert!(store.load_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saving_twice_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let mut rec = record("s1");
        store.save_workflow(&rec).await.unwrap();
        rec.status = WorkflowState::Completed;
        store.save_workflow(&rec).await.unwrap();

        let loaded = store.load_workflow("s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowState::Completed);
    }

    #[tokio::test]
    async fn tasks_are_listed_per_session() {
        let store = MemoryStore::new();
        let result = crate::runner::StageResult {
            task_id: "t1".to_string(),
            success: true,
            output: "ok".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            modified_files: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        };
        let task = TaskRecord::from_result("s1", Stage::Planner, "go", "/tmp/ws".as_ref(), &result);
        store.save_task(&task).await.unwrap();

        assert_eq!(store.list_tasks("s1").await.unwrap().len(), 1);
        assert!(store.list_tasks("s2").await.unwrap().is_empty());
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize("a/b\\c"), "a_b_c");
    }
}
