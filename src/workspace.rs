//! Workspace directories and per-workspace serialization.
//!
//! A workspace is the isolated working root for one project; every
//! subprocess execution for that project runs inside it. Workspaces are
//! never shared across projects.
//!
//! Concurrent requests against the same workspace are serialized, not
//! rejected: the engine takes the workspace guard before running a
//! pipeline stage or an ad-hoc chat, so an automatic workflow and a chat
//! targeting one workspace simply queue behind each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Errors from workspace validation.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace does not exist: {0}")]
    Missing(PathBuf),

    #[error("workspace is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("workspace is not writable: {0}")]
    NotWritable(PathBuf),
}

/// A validated workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Validate and wrap an existing, writable directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = path.into();
        let meta = std::fs::metadata(&root).map_err(|_| WorkspaceError::Missing(root.clone()))?;
        if !meta.is_dir() {
            return Err(WorkspaceError::NotADirectory(root));
        }
        if meta.permissions().readonly() {
            return Err(WorkspaceError::NotWritable(root));
        }
        Ok(Self { root })
    }

    /// Create the directory if needed, then open it.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = path.into();
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|_| WorkspaceError::Missing(root.clone()))?;
        }
        Self::open(root)
    }

    /// The workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A path relative to the workspace root, if it lies inside it.
    pub fn relativize<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }
}

/// Async locks keyed by workspace root.
///
/// Exactly one stage execution or ad-hoc chat runs against a workspace at
/// a time; unrelated workspaces never contend.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard for a workspace, waiting if it is busy.
    pub async fn acquire(&self, workspace: &Workspace) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(workspace.root().to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
