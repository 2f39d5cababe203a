use std::fs;
use std::path::{Path, PathBuf};

use crate::command::run_git;

/// Normalize a user-supplied workspace path into its identity.
///
/// The path is canonicalized; inside a git checkout it resolves to the
/// checkout's toplevel so `repo/` and `repo/src` name the same workspace.
/// Outside git the canonical path itself is the identity.
pub fn normalize_workspace_path(path: &Path) -> Result<PathBuf, String> {
    let canonical = fs::canonicalize(path)
        .map_err(|e| format!("cannot resolve {}: {e}", path.display()))?;

    if !canonical.is_dir() {
        return Err(format!("not a directory: {}", canonical.display()));
    }

    match git_toplevel(&canonical) {
        Ok(top) => Ok(fs::canonicalize(&top).unwrap_or(top)),
        Err(e) => {
            log::debug!("{} is not inside a git checkout: {e}", canonical.display());
            Ok(canonical)
        }
    }
}

/// `git rev-parse --show-toplevel` for `path`.
pub fn git_toplevel(path: &Path) -> Result<PathBuf, String> {
    let top = run_git(path, &["rev-parse", "--show-toplevel"])?;
    if top.is_empty() {
        return Err(format!("no git toplevel for {}", path.display()));
    }
    Ok(PathBuf::from(top))
}

/// Resolve the actual git directory of a checkout.
///
/// Main checkouts have a `.git` directory. Linked worktrees have a `.git`
/// file containing `gitdir: <path>`, relative paths being relative to the
/// checkout.
pub fn resolve_git_dir(repo_path: &Path) -> Result<PathBuf, String> {
    let dot_git = repo_path.join(".git");

    if !dot_git.exists() {
        return Err(format!("not a git repository: {} does not exist", dot_git.display()));
    }

    if dot_git.is_dir() {
        return Ok(dot_git);
    }

    let content =
        fs::read_to_string(&dot_git).map_err(|e| format!("failed to read .git file: {e}"))?;

    let gitdir = content
        .strip_prefix("gitdir: ")
        .ok_or_else(|| format!("unexpected .git file format: {content}"))?
        .trim();

    let resolved = if Path::new(gitdir).is_absolute() {
        PathBuf::from(gitdir)
    } else {
        repo_path.join(gitdir)
    };

    if !resolved.exists() {
        return Err(format!("git directory does not exist: {}", resolved.display()));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
    }

    #[test]
    fn test_resolve_git_dir_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        assert_eq!(resolve_git_dir(dir.path()).unwrap(), dir.path().join(".git"));
    }

    #[test]
    fn test_resolve_git_dir_worktree_file() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real-git-dir");
        fs::create_dir(&real).unwrap();
        let checkout = dir.path().join("checkout");
        fs::create_dir(&checkout).unwrap();
        fs::write(checkout.join(".git"), "gitdir: ../real-git-dir\n").unwrap();

        let resolved = resolve_git_dir(&checkout).unwrap();
        assert_eq!(fs::canonicalize(resolved).unwrap(), fs::canonicalize(real).unwrap());
    }

    #[test]
    fn test_resolve_git_dir_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_git_dir(dir.path()).is_err());
    }

    #[test]
    fn test_resolve_git_dir_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".git"), "garbage").unwrap();
        let err = resolve_git_dir(dir.path()).unwrap_err();
        assert!(err.contains("unexpected .git file format"), "got: {err}");
    }

    #[test]
    fn test_normalize_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(normalize_workspace_path(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_normalize_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "x").unwrap();
        assert!(normalize_workspace_path(&file).is_err());
    }

    #[test]
    fn test_normalize_subdirectory_resolves_to_toplevel() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let status = Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());
        let sub = dir.path().join("src").join("deep");
        fs::create_dir_all(&sub).unwrap();

        let from_sub = normalize_workspace_path(&sub).unwrap();
        let from_root = normalize_workspace_path(dir.path()).unwrap();
        assert_eq!(from_sub, from_root);
        assert_eq!(from_root, fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_normalize_plain_directory_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::create_dir(&plain).unwrap();
        let dotted = plain.join(".");
        // Tempdirs are never inside a checkout on CI, but if they are the
        // toplevel is still an ancestor.
        let normalized = normalize_workspace_path(&dotted).unwrap();
        assert!(fs::canonicalize(&plain).unwrap().starts_with(&normalized));
    }
}
