//! Progress and output events.
//!
//! The workflow engine and the process runner push events to an abstract
//! [`EventSink`]. Concrete transports (push channels, sockets, polling
//! endpoints) live outside this crate; the sink trait is the boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agent::Stage;
use crate::runner::TaskStatus;

/// An event emitted during workflow or task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A pipeline stage is about to execute.
    StageStarted { session_id: String, stage: Stage },

    /// A pipeline stage finished executing.
    StageCompleted {
        session_id: String,
        stage: Stage,
        status: TaskStatus,
    },

    /// The whole workflow reached a terminal state.
    WorkflowCompleted {
        session_id: String,
        success: bool,
        failed_stage: Option<Stage>,
    },

    /// One line of subprocess output.
    OutputLine {
        task_id: String,
        line: String,
        stderr: bool,
    },

    /// A stage failure diagnostic, emitted alongside the terminal
    /// `WorkflowCompleted` event. External producers may also use it for
    /// non-fatal errors of their own.
    Error { session_id: String, message: String },
}

/// Subscriber interface for progress and output events.
///
/// Implementations must tolerate being called from concurrent tasks and
/// must not block the caller for long; slow consumers should buffer.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Delivery failures are the sink's problem; the
    /// core never fails a workflow because a subscriber went away.
    async fn emit(&self, event: Event);
}

/// Sink that discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: Event) {}
}

/// Sink that forwards events into an mpsc channel.
///
/// Useful for tests and for UI push transports. A dropped receiver is
/// silently ignored.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    /// Create a sink plus the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Sink that writes events to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: Event) {
        match &event {
            Event::StageStarted { session_id, stage } => {
                tracing::info!(session_id = %session_id, stage = %stage, "stage started");
            }
            Event::StageCompleted { session_id, stage, status } => {
                tracing::info!(session_id = %session_id, stage = %stage, status = %status, "stage completed");
            }
            Event::WorkflowCompleted { session_id, success, failed_stage } => {
                tracing::info!(
                    session_id = %session_id,
                    success = success,
                    failed_stage = ?failed_stage,
                    "workflow completed"
                );
            }
            Event::OutputLine { task_id, line, stderr } => {
                tracing::debug!(task_id = %task_id, stderr = stderr, "{line}");
            }
            Event::Error { session_id, message } => {
                tracing::warn!(session_id = %session_id, "{message}");
            }
        }
    }
}
