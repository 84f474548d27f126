//! Accumulated state threaded through one pipeline run.

use crate::agent::Stage;
use crate::runner::StageResult;
use crate::workspace::Workspace;

/// Mutable state carried through a workflow run.
///
/// The context records each stage's final output in execution order and
/// holds the single requirements artifact, written once by the planner
/// and read-only afterwards. Once the owning workflow reaches a terminal
/// state, the engine stops mutating the context.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    session_id: String,
    workspace: Workspace,
    original_request: String,
    requirements: Option<String>,
    stage_outputs: Vec<(Stage, String)>,
}

impl WorkflowContext {
    pub fn new(
        session_id: impl Into<String>,
        workspace: Workspace,
        request: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workspace,
            original_request: request.into(),
            requirements: None,
            stage_outputs: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn original_request(&self) -> &str {
        &self.original_request
    }

    /// The requirements artifact, once the planner has produced it.
    pub fn requirements(&self) -> Option<&str> {
        self.requirements.as_deref()
    }

    /// Record the requirements artifact. Only the planner's output is ever
    /// passed here; later stages read it without writing.
    pub fn set_requirements(&mut self, requirements: impl Into<String>) {
        self.requirements = Some(requirements.into());
    }

    /// Final output of a completed stage.
    pub fn output_for(&self, stage: Stage) -> Option<&str> {
        self.stage_outputs
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, output)| output.as_str())
    }

    /// The most recently completed stage and its output.
    pub fn last_output(&self) -> Option<(Stage, &str)> {
        self.stage_outputs.last().map(|(stage, output)| (*stage, output.as_str()))
    }

    /// Stages completed so far, in execution order.
    pub fn completed_stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stage_outputs.iter().map(|(stage, _)| *stage)
    }

    /// All recorded outputs in execution order.
    pub fn outputs(&self) -> &[(Stage, String)] {
        &self.stage_outputs
    }

    /// Fold a successful stage's result into the context. Replaces any
    /// previous output for the same stage, which only happens on resume.
    pub fn record_result(&mut self, stage: Stage, result: &StageResult) {
        self.record_output(stage, result.output.clone());
    }

    pub fn record_output(&mut self, stage: Stage, output: String) {
        if let Some(entry) = self.stage_outputs.iter_mut().find(|(s, _)| *s == stage) {
            entry.1 = output;
        } else {
            self.stage_outputs.push((stage, output));
        }
    }
}
