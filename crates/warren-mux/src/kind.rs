use std::fmt;
use std::path::Path;

/// What a tab is running. Detected from the launched program's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Shell,
    Claude,
    Codex,
    Cursor,
    Other,
    /// A native, non-PTY tab.
    Viewer,
}

const SHELLS: &[&str] = &["sh", "bash", "zsh", "fish", "dash", "ksh", "nu", "pwsh"];

impl SessionKind {
    /// Detect the kind from the program name. `None` means the login shell.
    pub fn detect(program: Option<&str>) -> Self {
        let Some(program) = program else {
            return SessionKind::Shell;
        };
        let name = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);

        if name.starts_with("claude") {
            SessionKind::Claude
        } else if name.starts_with("codex") {
            SessionKind::Codex
        } else if name.starts_with("cursor") {
            SessionKind::Cursor
        } else if SHELLS.contains(&name) {
            SessionKind::Shell
        } else {
            SessionKind::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Shell => "shell",
            SessionKind::Claude => "claude",
            SessionKind::Codex => "codex",
            SessionKind::Cursor => "cursor",
            SessionKind::Other => "other",
            SessionKind::Viewer => "viewer",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
