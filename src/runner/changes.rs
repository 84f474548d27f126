//! Best-effort detection of files a subprocess modified.
//!
//! After a task exits, the workspace is walked and every regular file
//! whose modification timestamp is strictly after the recorded start time
//! is reported as a relative path. This is provenance, not a content
//! diff: a file touched without a content change is still reported, and a
//! file changed then reverted before the scan is missed. Timestamp
//! resolution limits apply.

use std::path::PathBuf;
use std::time::SystemTime;

use walkdir::{DirEntry, WalkDir};

use crate::workspace::Workspace;

/// Directories never scanned: build outputs, dependency trees, VCS state.
const EXCLUDED_DIRS: &[&str] =
    &["target", "node_modules", "dist", "build", "__pycache__", ".venv", "venv", "vendor"];

fn is_scannable(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return true;
    }
    // Hidden files are scannable; hidden directories (.git, .cache) are not
    let name = entry.file_name().to_string_lossy();
    if entry.depth() > 0 && name.starts_with('.') {
        return false;
    }
    !EXCLUDED_DIRS.contains(&name.as_ref())
}

/// Relative paths of regular files modified strictly after `since`.
///
/// Paths are sorted for stable output. Unreadable entries are skipped.
pub fn modified_since(workspace: &Workspace, since: SystemTime) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(workspace.root())
        .into_iter()
        .filter_entry(is_scannable)
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            if modified > since {
                workspace.relativize(entry.path()).map(std::path::Path::to_path_buf)
            } else {
                None
            }
        })
        .collect();
    paths.sort();
    paths
}
