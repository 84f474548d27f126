//! Asynchronous execution of one external CLI invocation.
//!
//! The runner owns the full lifecycle of a task: spawn, stream output,
//! enforce the timeout, react to cancellation, detect modified files and
//! reduce everything to a [`StageResult`]. Failures of every kind are
//! folded into the result at the task boundary; callers never see a panic
//! or a propagated error from a single task.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;

use crate::config::{RunnerConfig, ToolConfig};
use crate::event::{Event, EventSink, NullSink};
use crate::workspace::Workspace;

use super::changes;
use super::registry::TaskRegistry;
use super::task::{FailureKind, StageResult, TaskStatus};
use super::RunnerError;

/// Timeout for draining stdout/stderr after the process is gone. Pipes
/// normally close immediately after process death.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the wait loop ended.
enum ProcessOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Executes external tool invocations one task at a time per call.
///
/// The runner is cheap to clone; clones share the same registry, so a
/// status poller and an executing call observe the same tasks.
#[derive(Clone)]
pub struct ProcessRunner {
    registry: TaskRegistry,
    tool: ToolConfig,
    config: RunnerConfig,
    sink: Arc<dyn EventSink>,
}

impl ProcessRunner {
    pub fn new(tool: ToolConfig, config: RunnerConfig) -> Self {
        Self { registry: TaskRegistry::new(), tool, config, sink: Arc::new(NullSink) }
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The registry backing this runner.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Execute `instruction` as one subprocess invocation inside `workspace`.
    ///
    /// `task_id` must be unique and not currently registered. `timeout`
    /// overrides the configured default when given. Always returns a
    /// [`StageResult`]; internal faults are captured in the result rather
    /// than propagated.
    pub async fn execute(
        &self,
        task_id: &str,
        instruction: &str,
        workspace: &Workspace,
        timeout: Option<Duration>,
    ) -> StageResult {
        let started_at = Utc::now();
        match self.execute_inner(task_id, instruction, workspace, timeout).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(task_id = %task_id, error = %err, "internal runner fault");
                self.registry.set_status(task_id, TaskStatus::Failed);
                self.registry.remove_after(task_id, self.config.retention());
                StageResult {
                    task_id: task_id.to_string(),
                    success: false,
                    output: String::new(),
                    stderr: format!("[internal] {err}"),
                    exit_code: None,
                    modified_files: Vec::new(),
                    failure: Some(FailureKind::Internal),
                    started_at,
                    completed_at: Utc::now(),
                }
            }
        }
    }

    /// Request cancellation of a running task.
    ///
    /// Returns `true` when a live task was found and signalled; `false`
    /// when the task is unknown or already terminal. Terminal statuses are
    /// never mutated by a cancel request.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.registry.cancel_handle(task_id) {
            Some(handle) => {
                tracing::info!(task_id = %task_id, "cancellation requested");
                handle.notify_one();
                true
            }
            None => false,
        }
    }

    async fn execute_inner(
        &self,
        task_id: &str,
        instruction: &str,
        workspace: &Workspace,
        timeout: Option<Duration>,
    ) -> Result<StageResult, RunnerError> {
        let started_at = Utc::now();
        let scan_epoch = SystemTime::now();
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());

        // A duplicate id must not disturb the live entry it collides with.
        let cancel = match self.registry.register(task_id) {
            Ok(cancel) => cancel,
            Err(err) => {
                tracing::warn!(task_id = %task_id, error = %err, "task registration rejected");
                return Ok(StageResult {
                    task_id: task_id.to_string(),
                    success: false,
                    output: String::new(),
                    stderr: format!("[internal] {err}"),
                    exit_code: None,
                    modified_files: Vec::new(),
                    failure: Some(FailureKind::Internal),
                    started_at,
                    completed_at: Utc::now(),
                });
            }
        };

        let mut cmd = Command::new(&self.tool.command);
        cmd.args(&self.tool.args)
            .arg(instruction)
            .current_dir(workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.tool.env {
            cmd.env(key, value);
        }

        tracing::debug!(
            task_id = %task_id,
            command = %self.tool.command,
            workspace = %workspace.root().display(),
            "spawning tool process"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                // The task never enters Running; unregister immediately.
                self.registry.remove(task_id);
                return Ok(StageResult {
                    task_id: task_id.to_string(),
                    success: false,
                    output: String::new(),
                    stderr: format!("[spawn] failed to start {}: {err}", self.tool.command),
                    exit_code: None,
                    modified_files: Vec::new(),
                    failure: Some(FailureKind::Spawn),
                    started_at,
                    completed_at: Utc::now(),
                });
            }
        };

        self.registry.set_status(task_id, TaskStatus::Running);

        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(pump_lines(
                stdout,
                false,
                task_id.to_string(),
                self.registry.clone(),
                self.sink.clone(),
            ))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(pump_lines(
                stderr,
                true,
                task_id.to_string(),
                self.registry.clone(),
                self.sink.clone(),
            ))
        });

        let outcome = self.wait_for_exit(task_id, &mut child, timeout, &cancel).await?;

        // Drain remaining output; pipes close promptly once the process dies.
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            if tokio::time::timeout(IO_CAPTURE_TIMEOUT, task).await.is_err() {
                tracing::warn!(task_id = %task_id, "output capture timed out");
            }
        }

        let (output, mut stderr) = split_buffer(&self.registry, task_id);
        let modified_files = changes::modified_since(workspace, scan_epoch);

        let result = match outcome {
            ProcessOutcome::Exited(status) => {
                let exit_code = status.code();
                let success = status.success();
                tracing::info!(
                    task_id = %task_id,
                    exit_code = ?exit_code,
                    success = success,
                    modified = modified_files.len(),
                    "task finished"
                );
                StageResult {
                    task_id: task_id.to_string(),
                    success,
                    output,
                    stderr,
                    exit_code,
                    modified_files,
                    failure: if success { None } else { Some(FailureKind::Exit) },
                    started_at,
                    completed_at: Utc::now(),
                }
            }
            ProcessOutcome::TimedOut => {
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str(&format!(
                    "[timeout] execution exceeded {}s and was terminated",
                    timeout.as_secs()
                ));
                StageResult {
                    task_id: task_id.to_string(),
                    success: false,
                    output,
                    stderr,
                    exit_code: None,
                    modified_files,
                    failure: Some(FailureKind::Timeout),
                    started_at,
                    completed_at: Utc::now(),
                }
            }
            ProcessOutcome::Cancelled => {
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str("[cancelled] task terminated by operator request");
                StageResult {
                    task_id: task_id.to_string(),
                    success: false,
                    output,
                    stderr,
                    exit_code: None,
                    modified_files,
                    failure: Some(FailureKind::Cancelled),
                    started_at,
                    completed_at: Utc::now(),
                }
            }
        };

        self.registry.set_status(task_id, result.status());
        self.registry.remove_after(task_id, self.config.retention());
        Ok(result)
    }

    async fn wait_for_exit(
        &self,
        task_id: &str,
        child: &mut Child,
        timeout: Duration,
        cancel: &Arc<Notify>,
    ) -> Result<ProcessOutcome, RunnerError> {
        let started = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                tracing::warn!(task_id = %task_id, timeout_secs = timeout.as_secs(), "task timed out");
                self.terminate(child).await;
                return Ok(ProcessOutcome::TimedOut);
            }

            tokio::select! {
                status = child.wait() => {
                    return Ok(ProcessOutcome::Exited(status?));
                }
                () = cancel.notified() => {
                    self.terminate(child).await;
                    return Ok(ProcessOutcome::Cancelled);
                }
                () = tokio::time::sleep(remaining) => {
                    // Loop re-checks the deadline and times out.
                }
            }
        }
    }

    /// Graceful termination: signal, wait out the grace period, force-kill.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            send_term_signal(pid);
            if tokio::time::timeout(self.config.grace(), child.wait()).await.is_ok() {
                return;
            }
        }
        if let Err(err) = child.kill().await {
            tracing::warn!(error = %err, "failed to kill process");
        }
        let _ = child.wait().await;
    }
}

/// Ask the OS to terminate a process politely.
fn send_term_signal(pid: u32) {
    #[cfg(unix)]
    {
        let _ = std::process::Command::new("kill").args(["-TERM", &pid.to_string()]).output();
    }

    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill").args(["/PID", &pid.to_string()]).output();
    }
}

/// Forward subprocess lines into the registry buffer and the event sink.
async fn pump_lines<R>(
    reader: R,
    stderr: bool,
    task_id: String,
    registry: TaskRegistry,
    sink: Arc<dyn EventSink>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        registry.append_line(&task_id, line.clone(), stderr);
        sink.emit(Event::OutputLine { task_id: task_id.clone(), line, stderr }).await;
    }
}

/// Rebuild stdout and stderr capture strings from the buffered lines.
fn split_buffer(registry: &TaskRegistry, task_id: &str) -> (String, String) {
    let mut output = Vec::new();
    let mut stderr = Vec::new();
    for line in registry.output_snapshot(task_id) {
        if line.stderr {
            stderr.push(line.line);
        } else {
            output.push(line.line);
        }
    }
    (output.join("\n"), stderr.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        // A plain shell stands in for the code-generation tool: the
        // instruction argument becomes the script body.
        let tool = ToolConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string()],
            env: Vec::new(),
        };
        let config = RunnerConfig { timeout_secs: 10, grace_secs: 1, retention_secs: 1 };
        ProcessRunner::new(tool, config)
    }

    fn workspace(dir: &tempfile::TempDir) -> Workspace {
        Workspace::open(dir.path()).unwrap()
    }

    #[tokio::test]
    async fn successful_run_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner()
            .execute("t1", "echo hello; echo oops >&2", &workspace(&dir), None)
            .await;

        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "hello");
        assert_eq!(result.stderr, "oops");
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner().execute("t1", "echo bad >&2; exit 3", &workspace(&dir), None).await;

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.failure, Some(FailureKind::Exit));
        assert!(result.stderr.contains("bad"));
    }

    #[tokio::test]
    async fn spawn_failure_never_enters_running() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ToolConfig {
            command: "definitely-not-a-real-tool-xyz".to_string(),
            args: Vec::new(),
            env: Vec::new(),
        };
        let runner = ProcessRunner::new(tool, RunnerConfig::default());
        let result = runner.execute("t1", "anything", &workspace(&dir), None).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Spawn));
        assert!(runner.registry().get_status("t1").is_none());
    }

    #[tokio::test]
    async fn timeout_kills_process_and_tags_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner()
            .execute("t1", "sleep 30", &workspace(&dir), Some(Duration::from_millis(200)))
            .await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Timeout));
        assert!(result.stderr.contains("[timeout]"));
    }

    #[tokio::test]
    async fn cancel_terminates_running_task() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();

        let exec = {
            let runner = runner.clone();
            let ws = workspace(&dir);
            tokio::spawn(async move { runner.execute("t1", "sleep 30", &ws, None).await })
        };

        // Let the task reach Running before cancelling.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(runner.cancel("t1"));

        let result = tokio::time::timeout(Duration::from_secs(5), exec).await.unwrap().unwrap();
        assert_eq!(result.failure, Some(FailureKind::Cancelled));
        assert_eq!(result.status(), TaskStatus::Cancelled);
        assert!(result.stderr.contains("[cancelled]"));
    }

    #[tokio::test]
    async fn cancel_unknown_or_finished_task_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        assert!(!runner.cancel("ghost"));

        let result = runner.execute("t1", "true", &workspace(&dir), None).await;
        assert!(result.success);
        assert!(!runner.cancel("t1"));
        // Terminal status is untouched by the failed cancel.
        if let Some(snapshot) = runner.registry().get_status("t1") {
            assert_eq!(snapshot.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn duplicate_task_id_fails_without_second_process() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        let ws = workspace(&dir);

        let first = {
            let runner = runner.clone();
            let ws = ws.clone();
            tokio::spawn(async move { runner.execute("t1", "sleep 1", &ws, None).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let second = runner.execute("t1", "echo nope", &ws, None).await;
        assert!(!second.success);
        assert_eq!(second.failure, Some(FailureKind::Internal));

        let first = first.await.unwrap();
        assert!(first.success);
    }

    #[tokio::test]
    async fn modified_files_are_reported_relative() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner()
            .execute("t1", "sleep 0.05; echo data > created.txt", &workspace(&dir), None)
            .await;

        assert!(result.success);
        assert_eq!(result.modified_files, vec![std::path::PathBuf::from("created.txt")]);
    }
}
