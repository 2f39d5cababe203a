use std::path::Path;

use crate::command::run_git;

/// Short name of the checked-out branch, or `HEAD` when detached.
pub fn current_branch(repo_path: &Path) -> Result<String, String> {
    run_git(repo_path, &["rev-parse", "--abbrev-ref", "HEAD"])
}
