//! # Pipewright
//!
//! Staged delivery pipeline for an external code-generation CLI.
//!
//! Pipewright drives a fixed four-stage workflow (Planner, Builder, QA,
//! Production Readiness) against a project workspace. Each stage runs the
//! external tool as a supervised subprocess: output is streamed live,
//! wall-clock timeouts are enforced, tasks can be cancelled, and the files
//! the run touched are reported back.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the full pipeline against the current directory
//! pipewright run "build a CLI that reverses strings"
//!
//! # Talk to a single stage without advancing the pipeline
//! pipewright chat qa "re-check the empty input case"
//! ```

pub mod agent;
pub mod config;
pub mod event;
pub mod runner;
pub mod store;
pub mod workflow;
pub mod workspace;

// Re-export commonly used types
pub use agent::{build_prompt, Stage, StageCommand};
pub use config::Config;
pub use event::{ChannelSink, Event, EventSink, LogSink, NullSink};
pub use runner::{FailureKind, ProcessRunner, StageResult, TaskRegistry, TaskStatus};
pub use store::{JsonFileStore, MemoryStore, WorkflowRecord, WorkflowStore};
pub use workflow::{WorkflowContext, WorkflowEngine, WorkflowOutcome, WorkflowState};
pub use workspace::{Workspace, WorkspaceLocks};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "pipewright";
