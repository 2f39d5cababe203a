use std::fmt;
use std::path::{Path, PathBuf};

/// Registry key of a workspace.
///
/// Starts out as whatever path the workspace was opened with and may later be
/// rebound to a normalized identity. Ordering is used to break ties in limit
/// enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceKey(String);

impl WorkspaceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A logical unit of work, usually one checkout, owning an ordered set of
/// tabs. Tabs point back at it weakly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub key: WorkspaceKey,
    pub root: PathBuf,
    pub name: String,
}

impl Workspace {
    /// Workspace keyed by its root path, named after the last path component.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.to_string_lossy().into_owned());
        Self {
            key: WorkspaceKey::from_path(&root),
            root,
            name,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_at() {
        let ws = Workspace::at("/src/warren");
        assert_eq!(ws.key.as_str(), "/src/warren");
        assert_eq!(ws.name, "warren");
        assert_eq!(ws.root, PathBuf::from("/src/warren"));
    }

    #[test]
    fn test_key_ordering() {
        assert!(WorkspaceKey::from("a") < WorkspaceKey::from("b"));
    }
}
