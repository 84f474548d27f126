//! Task types: one task is one execution of the external CLI tool.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::Stage;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, subprocess not yet spawned
    Pending,
    /// Subprocess is alive
    Running,
    /// Subprocess exited with code 0
    Completed,
    /// Subprocess exited non-zero, failed to spawn, or timed out
    Failed,
    /// Terminated by an explicit cancel request
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is terminal. A task never leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a task did not complete successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The tool executable could not be spawned (missing, unauthorized)
    Spawn,
    /// The subprocess exited with a non-zero code
    Exit,
    /// The subprocess exceeded its wall-clock limit and was killed
    Timeout,
    /// An operator cancelled the task
    Cancelled,
    /// Unexpected fault inside the runner itself
    Internal,
}

/// The structured outcome of one task execution.
///
/// Every execution reduces to a StageResult; no failure kind escapes the
/// task boundary as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Task that produced this result
    pub task_id: String,

    /// Whether the subprocess completed with exit code 0
    pub success: bool,

    /// Captured stdout, newline-joined
    pub output: String,

    /// Captured stderr, newline-joined; failure markers are appended here
    pub stderr: String,

    /// Exit code, when the process ran to an exit
    pub exit_code: Option<i32>,

    /// Workspace-relative paths modified during the run
    pub modified_files: Vec<PathBuf>,

    /// Set when `success` is false
    pub failure: Option<FailureKind>,

    /// When execution began
    pub started_at: DateTime<Utc>,

    /// When the result was finalized
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    /// Terminal task status implied by this result.
    pub fn status(&self) -> TaskStatus {
        if self.success {
            TaskStatus::Completed
        } else if self.failure == Some(FailureKind::Cancelled) {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        }
    }
}

/// Persisted attributes of one task, as handed to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub session_id: String,
    pub stage: Stage,
    pub instruction: String,
    pub workspace: PathBuf,
    pub status: TaskStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub modified_files: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Build a record from a finished result and its task metadata.
    pub fn from_result(
        session_id: &str,
        stage: Stage,
        instruction: &str,
        workspace: &std::path::Path,
        result: &StageResult,
    ) -> Self {
        Self {
            task_id: result.task_id.clone(),
            session_id: session_id.to_string(),
            stage,
            instruction: instruction.to_string(),
            workspace: workspace.to_path_buf(),
            status: result.status(),
            stdout: result.output.clone(),
            stderr: result.stderr.clone(),
            exit_code: result.exit_code,
            modified_files: result.modified_files.clone(),
            started_at: result.started_at,
            completed_at: result.completed_at,
        }
    }
}
