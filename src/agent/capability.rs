//! Closed capability set for stage agents.
//!
//! Stages act through an enumerated command set instead of free-form
//! tool dispatch. The engine checks permission and dispatches on the
//! variant: `RunSubprocess` goes through the process runner, every other
//! command is a local filesystem operation inside the workspace.

use std::path::{Component, Path, PathBuf};

use crate::workspace::Workspace;

use super::prompt::REQUIREMENTS_FILE;
use super::Stage;

/// A command a stage agent may issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageCommand {
    /// Execute an instruction through the external tool.
    RunSubprocess { instruction: String },
    /// Read one file, path relative to the workspace root.
    ReadFile { path: PathBuf },
    /// List the workspace's top-level entries.
    ListFiles,
    /// Read the requirements artifact.
    ReadArtifact,
    /// Write the requirements artifact. Planner only.
    WriteArtifact { content: String },
}

impl StageCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StageCommand::RunSubprocess { .. } => "run_subprocess",
            StageCommand::ReadFile { .. } => "read_file",
            StageCommand::ListFiles => "list_files",
            StageCommand::ReadArtifact => "read_artifact",
            StageCommand::WriteArtifact { .. } => "write_artifact",
        }
    }

    /// Whether `stage` may issue this command. The requirements artifact
    /// has exactly one writer, the planner; everything else is shared.
    pub fn permitted_for(&self, stage: Stage) -> bool {
        match self {
            StageCommand::WriteArtifact { .. } => stage == Stage::Planner,
            _ => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("stage {stage} may not {command}")]
    Denied { stage: Stage, command: &'static str },

    #[error("{command} is not a local command")]
    NotLocal { command: &'static str },

    #[error("path escapes the workspace: {0}")]
    PathEscapes(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Execute a filesystem-backed command inside the workspace.
///
/// `RunSubprocess` is rejected; the engine dispatches it through the
/// process runner instead.
pub fn run_local(
    stage: Stage,
    command: &StageCommand,
    workspace: &Workspace,
) -> Result<String, CapabilityError> {
    if !command.permitted_for(stage) {
        return Err(CapabilityError::Denied { stage, command: command.name() });
    }

    match command {
        StageCommand::RunSubprocess { .. } => {
            Err(CapabilityError::NotLocal { command: command.name() })
        }
        StageCommand::ReadFile { path } => {
            let path = resolve(workspace, path)?;
            Ok(std::fs::read_to_string(path)?)
        }
        StageCommand::ListFiles => {
            let mut names: Vec<String> = std::fs::read_dir(workspace.root())?
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            Ok(names.join("\n"))
        }
        StageCommand::ReadArtifact => {
            let path = workspace.root().join(REQUIREMENTS_FILE);
            if path.exists() {
                Ok(std::fs::read_to_string(path)?)
            } else {
                Ok(String::new())
            }
        }
        StageCommand::WriteArtifact { content } => {
            std::fs::write(workspace.root().join(REQUIREMENTS_FILE), content)?;
            Ok(String::new())
        }
    }
}

/// Resolve a relative path against the workspace root, rejecting absolute
/// paths and parent traversal.
fn resolve(workspace: &Workspace, path: &Path) -> Result<PathBuf, CapabilityError> {
    let escapes = path.is_absolute()
        || path.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if escapes {
        return Err(CapabilityError::PathEscapes(path.to_path_buf()));
    }
    Ok(workspace.root().join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(dir: &tempfile::TempDir) -> Workspace {
        Workspace::open(dir.path()).unwrap()
    }

    #[test]
    fn only_the_planner_writes_the_artifact() {
        let write = StageCommand::WriteArtifact { content: "spec".to_string() };
        assert!(write.permitted_for(Stage::Planner));
        assert!(!write.permitted_for(Stage::Builder));
        assert!(!write.permitted_for(Stage::Qa));
        assert!(!write.permitted_for(Stage::ProdReady));

        let read = StageCommand::ReadArtifact;
        for stage in Stage::ALL {
            assert!(read.permitted_for(stage));
        }
    }

    #[test]
    fn denied_write_does_not_touch_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir);
        let write = StageCommand::WriteArtifact { content: "spec".to_string() };

        let err = run_local(Stage::Qa, &write, &ws).unwrap_err();
        assert!(matches!(err, CapabilityError::Denied { .. }));
        assert!(!dir.path().join(REQUIREMENTS_FILE).exists());
    }

    #[test]
    fn artifact_round_trips_through_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir);

        let write = StageCommand::WriteArtifact { content: "R1: reverse".to_string() };
        run_local(Stage::Planner, &write, &ws).unwrap();

        let read = run_local(Stage::Builder, &StageCommand::ReadArtifact, &ws).unwrap();
        assert_eq!(read, "R1: reverse");
    }

    #[test]
    fn missing_artifact_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let read = run_local(Stage::Qa, &StageCommand::ReadArtifact, &workspace(&dir)).unwrap();
        assert!(read.is_empty());
    }

    #[test]
    fn read_file_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir);

        for bad in ["/etc/passwd", "../outside.txt"] {
            let cmd = StageCommand::ReadFile { path: PathBuf::from(bad) };
            let err = run_local(Stage::Builder, &cmd, &ws).unwrap_err();
            assert!(matches!(err, CapabilityError::PathEscapes(_)), "{bad}");
        }
    }

    #[test]
    fn list_files_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let listing = run_local(Stage::Qa, &StageCommand::ListFiles, &workspace(&dir)).unwrap();
        assert_eq!(listing, "a.txt\nb.txt");
    }

    #[test]
    fn run_subprocess_is_not_a_local_command() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::RunSubprocess { instruction: "do it".to_string() };
        let err = run_local(Stage::Builder, &cmd, &workspace(&dir)).unwrap_err();
        assert!(matches!(err, CapabilityError::NotLocal { .. }));
    }
}
