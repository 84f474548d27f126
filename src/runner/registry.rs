//! In-memory registry of in-flight tasks.
//!
//! Maps task ids to status, output buffer and cancellation handle while a
//! task executes. Registration lifetime defines "the task is observable as
//! running": the owning runner inserts the entry before spawning and
//! removes it after a short retention window once the task is terminal,
//! so late readers can still drain the buffer. The buffer is not durable;
//! callers needing durability persist completed results through the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::task::TaskStatus;

/// Interval between polls while a stream consumer waits for new lines.
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One captured output line.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub line: String,
    pub stderr: bool,
}

/// Point-in-time view of a task's registry entry.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct TaskEntry {
    status: TaskStatus,
    buffer: Vec<OutputLine>,
    cancel: Arc<Notify>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

/// Concurrent map of task id to in-flight execution state.
///
/// Many readers (status pollers, stream consumers) share the registry with
/// exactly one writer per task: the runner that owns it. The registry is an
/// injectable object, not process-wide state; independent runners in tests
/// get independent registries.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    entries: Arc<RwLock<HashMap<String, TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task. Fails when the id is already present; task ids
    /// are never reused and at most one entry may exist per id.
    pub(crate) fn register(&self, task_id: &str) -> Result<Arc<Notify>, super::RunnerError> {
        let mut entries = self.entries.write();
        if entries.contains_key(task_id) {
            return Err(super::RunnerError::DuplicateTask(task_id.to_string()));
        }
        let cancel = Arc::new(Notify::new());
        entries.insert(
            task_id.to_string(),
            TaskEntry {
                status: TaskStatus::Pending,
                buffer: Vec::new(),
                cancel: cancel.clone(),
                started_at: Utc::now(),
                completed_at: None,
            },
        );
        Ok(cancel)
    }

    pub(crate) fn set_status(&self, task_id: &str, status: TaskStatus) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(task_id) {
            entry.status = status;
            if status.is_terminal() {
                entry.completed_at = Some(Utc::now());
            }
        }
    }

    pub(crate) fn append_line(&self, task_id: &str, line: String, stderr: bool) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(task_id) {
            entry.buffer.push(OutputLine { line, stderr });
        }
    }

    pub(crate) fn remove(&self, task_id: &str) {
        self.entries.write().remove(task_id);
    }

    /// Remove an entry after the retention window elapses. Detached; the
    /// runner calls this once a task is terminal.
    pub(crate) fn remove_after(&self, task_id: &str, retention: Duration) {
        let registry = self.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            registry.remove(&task_id);
        });
    }

    /// Cancellation handle for a live task, if the task is registered and
    /// not yet terminal.
    pub(crate) fn cancel_handle(&self, task_id: &str) -> Option<Arc<Notify>> {
        let entries = self.entries.read();
        entries
            .get(task_id)
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.cancel.clone())
    }

    /// Current status and timestamps, or `None` when the task has left the
    /// registry.
    pub fn get_status(&self, task_id: &str) -> Option<TaskSnapshot> {
        let entries = self.entries.read();
        entries.get(task_id).map(|entry| TaskSnapshot {
            status: entry.status,
            started_at: entry.started_at,
            completed_at: entry.completed_at,
        })
    }

    /// All lines captured so far. Each call returns a superset of the
    /// previous call's contents while the task is running.
    pub fn output_snapshot(&self, task_id: &str) -> Vec<OutputLine> {
        let entries = self.entries.read();
        entries.get(task_id).map(|entry| entry.buffer.clone()).unwrap_or_default()
    }

    /// Lazy sequence of output lines starting at the beginning of the
    /// retained buffer; each stream tracks its own read position.
    ///
    /// The stream ends once the task is terminal and fully drained, or
    /// immediately when the task is unknown or already removed. It never
    /// fails and never blocks past the poll interval.
    pub fn stream(&self, task_id: &str) -> OutputStream {
        OutputStream { registry: self.clone(), task_id: task_id.to_string(), pos: 0 }
    }

    /// Number of registered entries. Test and diagnostics helper.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Pull-based stream over one task's output buffer.
pub struct OutputStream {
    registry: TaskRegistry,
    task_id: String,
    pos: usize,
}

impl OutputStream {
    /// Next line, or `None` once the task is finished and drained (or was
    /// never registered).
    pub async fn next(&mut self) -> Option<OutputLine> {
        loop {
            let (line, finished) = {
                let entries = self.registry.entries.read();
                match entries.get(&self.task_id) {
                    None => return None,
                    Some(entry) => {
                        if self.pos < entry.buffer.len() {
                            (Some(entry.buffer[self.pos].clone()), false)
                        } else {
                            (None, entry.status.is_terminal())
                        }
                    }
                }
            };

            if let Some(line) = line {
                self.pos += 1;
                return Some(line);
            }
            if finished {
                return None;
            }
            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
        }
    }

    /// Drain the rest of the stream into a vector.
    pub async fn collect_remaining(&mut self) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        while let Some(line) = self.next().await {
            lines.push(line);
        }
        lines
    }
}
