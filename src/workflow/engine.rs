//! The four-stage workflow state machine.
//!
//! Drives Planner, Builder, QA and Production Readiness strictly in
//! order. Each stage runs as one external tool task; a successful result
//! is folded into the context and the pipeline advances, any failure
//! halts the workflow at that stage. There is no automatic retry; a rerun
//! is a fresh call from the outside.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{self, build_prompt, Stage, StageCommand};
use crate::config::{Config, PromptConfig};
use crate::event::{Event, EventSink, NullSink};
use crate::runner::{FailureKind, ProcessRunner, StageResult, TaskRecord};
use crate::store::{StageOutput, StoreError, WorkflowRecord, WorkflowStore};
use crate::workspace::{Workspace, WorkspaceError, WorkspaceLocks};

use super::context::WorkflowContext;

/// Workflow lifecycle state. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Pending,
    Planning,
    Building,
    Verifying,
    Finalizing,
    Completed,
    Failed,
}

impl WorkflowState {
    /// The state the workflow is in while `stage` executes.
    pub fn running(stage: Stage) -> Self {
        match stage {
            Stage::Planner => WorkflowState::Planning,
            Stage::Builder => WorkflowState::Building,
            Stage::Qa => WorkflowState::Verifying,
            Stage::ProdReady => WorkflowState::Finalizing,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Pending => "pending",
            WorkflowState::Planning => "planning",
            WorkflowState::Building => "building",
            WorkflowState::Verifying => "verifying",
            WorkflowState::Finalizing => "finalizing",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final outcome of a workflow run. Partial results for completed stages
/// stay retrievable through the context even when the run failed.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub session_id: String,
    pub state: WorkflowState,
    pub failed_stage: Option<Stage>,
    pub context: WorkflowContext,
}

impl WorkflowOutcome {
    pub fn success(&self) -> bool {
        self.state == WorkflowState::Completed
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Capability(#[from] agent::CapabilityError),

    #[error("stage {stage} failed: {stderr}")]
    StageFailed { stage: Stage, failure: Option<FailureKind>, stderr: String },

    #[error("unknown session: {0}")]
    UnknownSession(String),
}

/// Drives workflows against one runner, one store and one event sink.
pub struct WorkflowEngine {
    runner: ProcessRunner,
    store: Arc<dyn WorkflowStore>,
    sink: Arc<dyn EventSink>,
    locks: WorkspaceLocks,
    prompt: PromptConfig,
}

impl WorkflowEngine {
    pub fn new(config: &Config, store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            runner: ProcessRunner::new(config.tool.clone(), config.runner.clone()),
            store,
            sink: Arc::new(NullSink),
            locks: WorkspaceLocks::new(),
            prompt: config.prompt.clone(),
        }
    }

    /// Route workflow and task events to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.runner = self.runner.with_sink(sink.clone());
        self.sink = sink;
        self
    }

    /// The runner executing this engine's tasks. Exposes task status,
    /// output streaming and cancellation to external callers.
    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Run the full pipeline for a fresh session.
    ///
    /// Holds the workspace lock for the whole run: concurrent workflows or
    /// ad-hoc stage runs against the same workspace queue up behind it,
    /// while runs against other workspaces proceed in parallel.
    pub async fn run(
        &self,
        session_id: &str,
        workspace: Workspace,
        request: &str,
    ) -> Result<WorkflowOutcome, EngineError> {
        let _guard = self.locks.acquire(&workspace).await;
        let context = WorkflowContext::new(session_id, workspace, request);
        let created_at = Utc::now();

        self.persist(&context, WorkflowState::Pending, None, created_at).await?;
        self.run_from(context, Stage::Planner, created_at).await
    }

    /// Continue a previously persisted session from its first incomplete
    /// stage. Completed stages are not re-run; a previously failed stage
    /// is attempted again as part of this new run.
    pub async fn resume(&self, session_id: &str) -> Result<WorkflowOutcome, EngineError> {
        let record = self
            .store
            .load_workflow(session_id)
            .await?
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;

        let workspace = Workspace::open(&record.workspace)?;
        let _guard = self.locks.acquire(&workspace).await;

        let mut context = WorkflowContext::new(session_id, workspace, &record.original_request);
        if let Some(requirements) = &record.requirements {
            context.set_requirements(requirements.clone());
        }
        for StageOutput { stage, output } in &record.stage_outputs {
            context.record_output(*stage, output.clone());
        }

        if record.status == WorkflowState::Completed {
            return Ok(WorkflowOutcome {
                session_id: session_id.to_string(),
                state: WorkflowState::Completed,
                failed_stage: None,
                context,
            });
        }

        let start = record
            .failed_stage
            .or_else(|| match context.last_output() {
                Some((stage, _)) => stage.next(),
                None => Some(Stage::Planner),
            })
            .unwrap_or(Stage::Planner);

        tracing::info!(session_id = %session_id, stage = %start, "resuming workflow");
        self.run_from(context, start, record.created_at).await
    }

    /// Run one stage out of pipeline order for ad-hoc interaction.
    ///
    /// Uses the session's persisted context when one exists but never
    /// advances or mutates the pipeline's own stage progression. Returns
    /// the stage's output text, or an error describing the failure.
    pub async fn run_single_stage(
        &self,
        session_id: &str,
        workspace: Workspace,
        stage: Stage,
        message: &str,
    ) -> Result<String, EngineError> {
        let _guard = self.locks.acquire(&workspace).await;

        let mut context = WorkflowContext::new(session_id, workspace, message);
        if let Some(record) = self.store.load_workflow(session_id).await? {
            if let Some(requirements) = &record.requirements {
                context.set_requirements(requirements.clone());
            }
            for StageOutput { stage, output } in &record.stage_outputs {
                context.record_output(*stage, output.clone());
            }
        }

        let mut instruction = build_prompt(stage, &context, &self.prompt);
        if stage != Stage::Planner {
            instruction.push_str("\n\nOperator message:\n");
            instruction.push_str(message);
        }

        let command = StageCommand::RunSubprocess { instruction };
        self.dispatch(stage, &command, &context).await
    }

    /// Check permission and execute one stage command.
    ///
    /// `RunSubprocess` goes through the process runner as a tracked task;
    /// every other command is a local workspace operation.
    pub async fn dispatch(
        &self,
        stage: Stage,
        command: &StageCommand,
        context: &WorkflowContext,
    ) -> Result<String, EngineError> {
        match command {
            StageCommand::RunSubprocess { instruction } => {
                let task_id = new_task_id(context.session_id(), stage);
                let result =
                    self.runner.execute(&task_id, instruction, context.workspace(), None).await;
                self.persist_task(context, stage, instruction, &result).await?;
                if result.success {
                    Ok(result.output)
                } else {
                    Err(EngineError::StageFailed {
                        stage,
                        failure: result.failure,
                        stderr: result.stderr,
                    })
                }
            }
            local => Ok(agent::run_local(stage, local, context.workspace())?),
        }
    }

    async fn run_from(
        &self,
        mut context: WorkflowContext,
        start: Stage,
        created_at: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, EngineError> {
        let session_id = context.session_id().to_string();

        for stage in start.remaining() {
            self.persist(&context, WorkflowState::running(stage), None, created_at).await?;
            self.sink
                .emit(Event::StageStarted { session_id: session_id.clone(), stage })
                .await;
            tracing::info!(session_id = %session_id, stage = %stage, "stage started");

            let instruction = build_prompt(stage, &context, &self.prompt);
            let task_id = new_task_id(&session_id, stage);
            let result =
                self.runner.execute(&task_id, &instruction, context.workspace(), None).await;

            self.persist_task(&context, stage, &instruction, &result).await?;
            self.sink
                .emit(Event::StageCompleted {
                    session_id: session_id.clone(),
                    stage,
                    status: result.status(),
                })
                .await;

            if !result.success {
                tracing::warn!(
                    session_id = %session_id,
                    stage = %stage,
                    failure = ?result.failure,
                    "stage failed, halting workflow"
                );
                self.persist(&context, WorkflowState::Failed, Some(stage), created_at).await?;
                self.sink
                    .emit(Event::Error {
                        session_id: session_id.clone(),
                        message: failure_message(stage, &result),
                    })
                    .await;
                self.sink
                    .emit(Event::WorkflowCompleted {
                        session_id: session_id.clone(),
                        success: false,
                        failed_stage: Some(stage),
                    })
                    .await;
                return Ok(WorkflowOutcome {
                    session_id,
                    state: WorkflowState::Failed,
                    failed_stage: Some(stage),
                    context,
                });
            }

            context.record_result(stage, &result);
            if stage == Stage::Planner {
                // The planner's output is the requirements artifact; write
                // it into the workspace so later stages' subprocesses can
                // read it too.
                context.set_requirements(result.output.clone());
                let write = StageCommand::WriteArtifact { content: result.output.clone() };
                agent::run_local(Stage::Planner, &write, context.workspace())?;
            }
        }

        self.persist(&context, WorkflowState::Completed, None, created_at).await?;
        self.sink
            .emit(Event::WorkflowCompleted {
                session_id: session_id.clone(),
                success: true,
                failed_stage: None,
            })
            .await;
        tracing::info!(session_id = %session_id, "workflow completed");

        Ok(WorkflowOutcome {
            session_id,
            state: WorkflowState::Completed,
            failed_stage: None,
            context,
        })
    }

    async fn persist(
        &self,
        context: &WorkflowContext,
        status: WorkflowState,
        failed_stage: Option<Stage>,
        created_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let record = WorkflowRecord {
            session_id: context.session_id().to_string(),
            workspace: context.workspace().root().to_path_buf(),
            status,
            original_request: context.original_request().to_string(),
            requirements: context.requirements().map(str::to_string),
            stage_outputs: context
                .outputs()
                .iter()
                .map(|(stage, output)| StageOutput { stage: *stage, output: output.clone() })
                .collect(),
            failed_stage,
            created_at,
            updated_at: now,
            completed_at: status.is_terminal().then_some(now),
        };
        self.store.save_workflow(&record).await?;
        Ok(())
    }

    async fn persist_task(
        &self,
        context: &WorkflowContext,
        stage: Stage,
        instruction: &str,
        result: &StageResult,
    ) -> Result<(), EngineError> {
        let record = TaskRecord::from_result(
            context.session_id(),
            stage,
            instruction,
            context.workspace().root(),
            result,
        );
        self.store.save_task(&record).await?;
        Ok(())
    }
}

/// One-line diagnostic for a failed stage.
fn failure_message(stage: Stage, result: &StageResult) -> String {
    let detail = result.stderr.lines().last().unwrap_or("no diagnostic output");
    match result.failure {
        Some(kind) => format!("stage {stage} failed ({kind:?}): {detail}"),
        None => format!("stage {stage} failed: {detail}"),
    }
}

/// Fresh task id; ids are never reused.
fn new_task_id(session_id: &str, stage: Stage) -> String {
    format!("{}-{}-{}", session_id, stage.id(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_state_follows_stage_order() {
        assert_eq!(WorkflowState::running(Stage::Planner), WorkflowState::Planning);
        assert_eq!(WorkflowState::running(Stage::Builder), WorkflowState::Building);
        assert_eq!(WorkflowState::running(Stage::Qa), WorkflowState::Verifying);
        assert_eq!(WorkflowState::running(Stage::ProdReady), WorkflowState::Finalizing);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(WorkflowState::Completed.is_terminal());
        assert!(WorkflowState::Failed.is_terminal());
        assert!(!WorkflowState::Pending.is_terminal());
        assert!(!WorkflowState::Verifying.is_terminal());
    }

    #[test]
    fn task_ids_are_unique() {
        let a = new_task_id("s1", Stage::Builder);
        let b = new_task_id("s1", Stage::Builder);
        assert_ne!(a, b);
        assert!(a.starts_with("s1-builder-"));
    }
}
