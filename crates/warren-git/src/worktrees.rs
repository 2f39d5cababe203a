use std::path::{Path, PathBuf};

use crate::command::run_git;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub head: String,
    /// Branch short name; `None` for a detached HEAD or a bare entry.
    pub branch: Option<String>,
    pub bare: bool,
}

/// List every worktree of the repository containing `repo_path`, main
/// checkout first.
pub fn list_worktrees(repo_path: &Path) -> Result<Vec<WorktreeInfo>, String> {
    let stdout = run_git(repo_path, &["worktree", "list", "--porcelain"])?;
    Ok(parse_worktree_list(&stdout))
}

/// Parse `git worktree list --porcelain` output.
///
/// Records are introduced by a `worktree <path>` line; other attribute lines
/// (`HEAD`, `branch`, `bare`, `detached`, `locked`, ...) apply to the record
/// in progress.
pub fn parse_worktree_list(output: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            worktrees.extend(current.take());
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                head: String::new(),
                branch: None,
                bare: false,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = head.to_string();
        } else if let Some(branch) = line.strip_prefix("branch ") {
            entry.branch = Some(branch.strip_prefix("refs/heads/").unwrap_or(branch).to_string());
        } else if line == "bare" {
            entry.bare = true;
        }
    }

    worktrees.extend(current);
    worktrees
}
