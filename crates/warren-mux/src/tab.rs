use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use warren_pty::{write_all, Agent};
use warren_vt::{ViewportPoint, VtTerminal};

use crate::flush::FlushState;
use crate::kind::SessionKind;
use crate::reader::SessionReader;
use crate::snapshot::TabSnapshot;
use crate::trace::TraceLog;
use crate::viewer::Viewer;
use crate::workspace::{Workspace, WorkspaceKey};

/// Unique, never reused tab identifier. Allocated by the registry.
pub type TabId = u64;

/// What a new tab hosts.
pub enum TabSource {
    Agent(Box<dyn Agent>),
    Viewer(Box<dyn Viewer>),
}

/// An in-progress or finished mouse selection, in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionState {
    pub anchor: ViewportPoint,
    pub head: ViewportPoint,
    /// The button is still held.
    pub dragging: bool,
}

/// Everything about a tab that changes after creation. Only touched while
/// holding the tab's lock.
pub struct TabState {
    pub name: String,
    /// Title last set by the program, if any.
    pub title: Option<String>,
    pub workspace: Weak<Workspace>,
    pub agent: Option<Box<dyn Agent>>,
    pub viewer: Option<Box<dyn Viewer>>,
    pub terminal: VtTerminal,
    pub running: bool,
    pub closed: bool,
    pub closing: bool,
    /// Reader stopped by limit enforcement; the process keeps running.
    pub detached: bool,
    pub copy_mode: bool,
    /// Output received but not yet applied to `terminal`.
    pub pending: Vec<u8>,
    pub flush: FlushState,
    pub selection: Option<SelectionState>,
    /// Terminal changed since the monitor last built a snapshot.
    pub monitor_dirty: bool,
    pub trace: Option<TraceLog>,
    /// Last snapshot, tagged with the version and cursor visibility it was
    /// built from.
    pub snapshot: Option<Arc<TabSnapshot>>,
    /// `TabExited` was already reported.
    pub exit_reported: bool,
}

impl TabState {
    pub fn is_viewer(&self) -> bool {
        self.agent.is_none()
    }

    /// Counts toward the attached-agent limit.
    pub fn is_attached_agent(&self) -> bool {
        self.running && !self.detached && !self.is_viewer()
    }

    /// The agent exists and its process is still alive.
    pub fn agent_alive(&mut self) -> bool {
        match self.agent.as_mut() {
            Some(agent) => !agent.is_closed(),
            None => false,
        }
    }

    pub fn workspace_key(&self) -> Option<WorkspaceKey> {
        self.workspace.upgrade().map(|ws| ws.key.clone())
    }

    /// Name shown in the tab bar: the program's title if it set one.
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// One session surface: a PTY-backed terminal or a native viewer.
pub struct Tab {
    id: TabId,
    kind: SessionKind,
    created_at: Instant,
    reader: SessionReader,
    state: Mutex<TabState>,
}

impl Tab {
    /// Build a tab with a terminal of `cols` x `rows`.
    ///
    /// Agent tabs get their terminal's replies (cursor position reports and
    /// the like) wired to the agent's input. Viewer tabs are drawn once
    /// immediately.
    pub fn new(
        id: TabId,
        kind: SessionKind,
        name: impl Into<String>,
        workspace: &Arc<Workspace>,
        source: TabSource,
        cols: u16,
        rows: u16,
    ) -> Self {
        let mut terminal = VtTerminal::new(cols, rows);
        let (agent, viewer, running) = match source {
            TabSource::Agent(agent) => {
                let writer = agent.input_writer();
                terminal.set_response_writer(Box::new(move |reply| {
                    if let Err(e) = write_all(&writer, reply) {
                        log::debug!("dropping terminal reply: {e}");
                    }
                }));
                (Some(agent), None, true)
            }
            TabSource::Viewer(mut viewer) => {
                terminal.write(&viewer.render(cols, rows));
                (None, Some(viewer), false)
            }
        };

        Self {
            id,
            kind,
            created_at: Instant::now(),
            reader: SessionReader::new(),
            state: Mutex::new(TabState {
                name: name.into(),
                title: None,
                workspace: Arc::downgrade(workspace),
                agent,
                viewer,
                terminal,
                running,
                closed: false,
                closing: false,
                detached: false,
                copy_mode: false,
                pending: Vec::new(),
                flush: FlushState::default(),
                selection: None,
                monitor_dirty: true,
                trace: None,
                snapshot: None,
                exit_reported: false,
            }),
        }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn reader(&self) -> &SessionReader {
        &self.reader
    }

    /// Lock the tab's mutable state. A panic while holding the lock does not
    /// make the tab unusable.
    pub fn lock(&self) -> MutexGuard<'_, TabState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the reader, close the agent, drop the trace and detach the
    /// viewer. Idempotent.
    pub fn shutdown(&self) {
        self.reader.stop();
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closing = true;
        if let Some(agent) = state.agent.as_mut() {
            agent.close();
        }
        state.trace = None;
        if let Some(viewer) = state.viewer.as_mut() {
            viewer.detach();
        }
        state.viewer = None;
        state.running = false;
        state.pending.clear();
        state.flush.reset();
        state.closing = false;
        state.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAgent;
    use crate::viewer::TextViewer;

    fn workspace() -> Arc<Workspace> {
        Arc::new(Workspace::at("/w"))
    }

    #[test]
    fn test_agent_tab_flags() {
        let ws = workspace();
        let (agent, _feed) = ScriptedAgent::new();
        let tab = Tab::new(1, SessionKind::Shell, "sh", &ws, TabSource::Agent(Box::new(agent)), 80, 24);

        let state = tab.lock();
        assert!(state.running);
        assert!(!state.is_viewer());
        assert!(state.is_attached_agent());
        assert_eq!(state.workspace_key(), Some(ws.key.clone()));
        assert_eq!(state.terminal.cols(), 80);
    }

    #[test]
    fn test_viewer_tab_is_not_an_attached_agent() {
        let ws = workspace();
        let viewer = TextViewer::new("help", "hello");
        let tab = Tab::new(2, SessionKind::Viewer, "help", &ws, TabSource::Viewer(Box::new(viewer)), 20, 5);

        let state = tab.lock();
        assert!(state.is_viewer());
        assert!(!state.is_attached_agent());
        assert_eq!(state.terminal.screen().row_text(0), "hello");
    }

    #[test]
    fn test_terminal_replies_reach_agent() {
        let ws = workspace();
        let (agent, _feed) = ScriptedAgent::new();
        let input = agent.input_log();
        let tab = Tab::new(3, SessionKind::Shell, "sh", &ws, TabSource::Agent(Box::new(agent)), 80, 24);

        // Device status report: the terminal answers "OK".
        tab.lock().terminal.write(b"\x1b[5n");
        assert_eq!(input.contents(), b"\x1b[0n");
    }

    #[test]
    fn test_shutdown_closes_agent() {
        let ws = workspace();
        let (agent, _feed) = ScriptedAgent::new();
        let closed = agent.closed_flag();
        let tab = Tab::new(4, SessionKind::Shell, "sh", &ws, TabSource::Agent(Box::new(agent)), 80, 24);

        tab.shutdown();
        tab.shutdown();
        let state = tab.lock();
        assert!(state.closed);
        assert!(!state.running);
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_workspace_back_reference_is_weak() {
        let ws = workspace();
        let (agent, _feed) = ScriptedAgent::new();
        let tab = Tab::new(5, SessionKind::Shell, "sh", &ws, TabSource::Agent(Box::new(agent)), 80, 24);
        drop(ws);
        assert_eq!(tab.lock().workspace_key(), None);
    }
}
