//! Workspace identity. Paths from the command line are opened as-is and
//! resolved to their checkout root in the background.

use std::path::{Path, PathBuf};

use warren_mux::Workspace;

/// The normalized workspace for `path`: its git toplevel (or canonical
/// path), named `<dir> [<branch>]` when a branch is checked out.
pub fn resolve(path: &Path) -> Workspace {
    let root = match warren_git::normalize_workspace_path(path) {
        Ok(root) => root,
        Err(e) => {
            log::debug!("keeping {} as given: {e}", path.display());
            path.to_path_buf()
        }
    };
    let branch = warren_git::current_branch(&root).ok();
    let ws = Workspace::at(&root);
    let name = display_name(&ws.name, branch.as_deref());
    ws.with_name(name)
}

pub fn display_name(dir: &str, branch: Option<&str>) -> String {
    match branch {
        Some(branch) if !branch.is_empty() && branch != "HEAD" => format!("{dir} [{branch}]"),
        _ => dir.to_string(),
    }
}

/// Every non-bare worktree of the repository at `path`, main checkout
/// first. Falls back to `path` alone outside a repository.
pub fn worktree_paths(path: &Path) -> Vec<PathBuf> {
    match warren_git::list_worktrees(path) {
        Ok(list) => {
            let paths: Vec<PathBuf> = list.into_iter().filter(|w| !w.bare).map(|w| w.path).collect();
            if paths.is_empty() {
                vec![path.to_path_buf()]
            } else {
                paths
            }
        }
        Err(e) => {
            log::warn!("listing worktrees of {}: {e}", path.display());
            vec![path.to_path_buf()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("warren", Some("main")), "warren [main]");
        assert_eq!(display_name("warren", Some("HEAD")), "warren");
        assert_eq!(display_name("warren", None), "warren");
    }

    #[test]
    fn test_resolve_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ws = resolve(dir.path());
        let canonical = dir.path().canonicalize().unwrap();
        // Inside a repository the toplevel may sit higher up; outside one the
        // canonical path is used.
        assert!(canonical.starts_with(&ws.root));
    }

    #[test]
    fn test_resolve_missing_path_is_kept() {
        let ws = resolve(Path::new("/nonexistent/warren-workspace"));
        assert_eq!(ws.root, PathBuf::from("/nonexistent/warren-workspace"));
        assert_eq!(ws.name, "warren-workspace");
    }

    #[test]
    fn test_worktree_paths_outside_repository() {
        let paths = worktree_paths(Path::new("/nonexistent/warren-workspace"));
        assert_eq!(paths, [PathBuf::from("/nonexistent/warren-workspace")]);
    }
}
