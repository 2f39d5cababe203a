use crate::tab::TabId;
use crate::workspace::WorkspaceKey;

/// Failures surfaced by the mux.
///
/// Nothing here is fatal to the process: background failures arrive as
/// messages and are turned into [`MuxEvent::Error`](crate::MuxEvent::Error)
/// by the UI loop.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Launching an agent failed. No tab was created.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: warren_pty::PtyError,
    },

    /// Reading from a PTY failed. The tab stays open with `running = false`.
    #[error("read from tab {tab} failed: {cause}")]
    TransientRead { tab: TabId, cause: String },

    /// The reader thread could not be started.
    #[error("failed to start reader for tab {tab}: {source}")]
    ReaderStart {
        tab: TabId,
        #[source]
        source: std::io::Error,
    },

    /// A trace file could not be opened or written.
    #[error("trace for tab {tab}: {source}")]
    ResourceCleanup {
        tab: TabId,
        #[source]
        source: std::io::Error,
    },

    #[error("tab {0} not found")]
    TabNotFound(TabId),

    #[error("workspace {0} not found")]
    WorkspaceNotFound(WorkspaceKey),

    #[error("tab index {index} out of range for workspace {workspace} ({len} tabs)")]
    IndexOutOfRange {
        workspace: WorkspaceKey,
        index: usize,
        len: usize,
    },

    /// No workspace is selected, or the selected one has no tabs.
    #[error("no active tab")]
    NoActiveTab,

    #[error("tab {0} has no agent")]
    NoAgent(TabId),

    #[error("agent I/O: {0}")]
    Agent(#[from] warren_pty::PtyError),
}
