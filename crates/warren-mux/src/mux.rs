//! The UI-side driver: owns the registry, consumes the inbox, and turns
//! user commands into registry and session changes.
//!
//! `Mux` runs on one task. Reader threads, forwarders, timers and the
//! monitor pool only ever talk to it through [`MuxMsg`]s, and it reports
//! back through [`MuxEvent`]s collected with [`Mux::take_events`].

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use warren_pty::{Agent, PtyHandle, SpawnSpec};
use warren_vt::ViewportPoint;

use crate::config::MuxConfig;
use crate::error::MuxError;
use crate::flush::{self, FlushMode, FlushStep};
use crate::kind::SessionKind;
use crate::monitor::{tick_interval, MonitorPool, MonitorScheduler, TabStatus};
use crate::msg::{post_after, Inbox, MuxEvent, MuxMsg, SnapshotMap};
use crate::registry::TabRegistry;
use crate::snapshot::{build_snapshot, TabSnapshot};
use crate::tab::{SelectionState, Tab, TabId, TabSource};
use crate::trace::TraceLog;
use crate::viewer::Viewer;
use crate::workspace::{Workspace, WorkspaceKey};

struct MonitorState {
    pool: MonitorPool,
    scheduler: MonitorScheduler,
}

pub struct Mux {
    registry: TabRegistry,
    cfg: MuxConfig,
    inbox: Inbox,
    monitor: Option<MonitorState>,
    /// Snapshots shown by the monitor grid, merged from pool results.
    monitor_cache: SnapshotMap,
    /// `SnapshotTick`s posted but not yet handled. Keeps a single tick
    /// chain across monitor exit and re-entry.
    ticks_in_flight: usize,
    events: Vec<MuxEvent>,
}

impl Mux {
    /// Create a mux with a `cols` x `rows` viewport. The receiver is the UI
    /// inbox; feed everything it yields to [`Mux::handle`].
    pub fn new(cfg: MuxConfig, cols: u16, rows: u16) -> (Self, mpsc::Receiver<MuxMsg>) {
        let (inbox, rx) = mpsc::channel(cfg.inbox_capacity.max(1));
        let mux = Self {
            registry: TabRegistry::new(cols, rows),
            cfg,
            inbox,
            monitor: None,
            monitor_cache: SnapshotMap::new(),
            ticks_in_flight: 0,
            events: Vec::new(),
        };
        (mux, rx)
    }

    pub fn registry(&self) -> &TabRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MuxConfig {
        &self.cfg
    }

    /// Drain events produced since the last call.
    pub fn take_events(&mut self) -> Vec<MuxEvent> {
        std::mem::take(&mut self.events)
    }

    fn error(&mut self, context: impl Into<String>, cause: &dyn Display) {
        let context = context.into();
        log::warn!("{context}: {cause}");
        self.events.push(MuxEvent::Error {
            context,
            cause: cause.to_string(),
        });
    }

    // Workspaces

    pub fn open_workspace(&mut self, workspace: Workspace) -> Arc<Workspace> {
        let ws = self.registry.add_workspace(workspace);
        self.events.push(MuxEvent::Redraw);
        ws
    }

    pub fn select_workspace(&mut self, key: &WorkspaceKey) -> Result<(), MuxError> {
        self.registry.select_workspace(key)?;
        self.events.push(MuxEvent::Redraw);
        Ok(())
    }

    pub fn cycle_workspace(&mut self, step: isize) {
        if self.registry.cycle_workspace(step).is_some() {
            self.events.push(MuxEvent::Redraw);
        }
    }

    /// Move a workspace to its normalized identity, restarting the readers
    /// of migrated live sessions under the new key.
    pub fn rebind_workspace(&mut self, old_key: &WorkspaceKey, new_workspace: Workspace) {
        let new_key = new_workspace.key.clone();
        let restart = self.registry.rebind_workspace(old_key, new_workspace);
        for tab in restart {
            self.start_reader(&tab, &new_key);
        }
        self.events.push(MuxEvent::Redraw);
    }

    /// Close every tab of a workspace and remove it.
    pub fn cleanup_workspace(&mut self, key: &WorkspaceKey) {
        for id in self.registry.cleanup_workspace(key) {
            self.monitor_cache.remove(&id);
            self.events.push(MuxEvent::TabClosed {
                workspace: key.clone(),
                tab: id,
            });
        }
        self.events.push(MuxEvent::Redraw);
    }

    // Tab lifecycle

    /// Spawn `spec` in a PTY and open it as a new tab. The process starts in
    /// the workspace root unless `spec` names a directory.
    ///
    /// A spawn failure is reported as an error event and creates no tab.
    pub fn launch(&mut self, workspace: &WorkspaceKey, name: &str, spec: &SpawnSpec) -> Result<TabId, MuxError> {
        let Some(ws) = self.registry.workspace(workspace).cloned() else {
            let err = MuxError::WorkspaceNotFound(workspace.clone());
            self.error(format!("launch {name}"), &err);
            return Err(err);
        };

        let mut spec = spec.clone();
        if spec.cwd.is_none() {
            spec.cwd = Some(ws.root.clone());
        }
        let (cols, rows) = self.registry.viewport();
        let handle = match PtyHandle::spawn(&spec, cols, rows) {
            Ok(handle) => handle,
            Err(source) => {
                let err = MuxError::Spawn {
                    program: spec.resolved_program(),
                    source,
                };
                self.error(format!("launch {name}"), &err);
                return Err(err);
            }
        };

        let kind = SessionKind::detect(spec.program.as_deref());
        self.attach_agent(workspace, kind, name, Box::new(handle))
    }

    /// Open a tab around an already running agent.
    pub fn attach_agent(
        &mut self,
        workspace: &WorkspaceKey,
        kind: SessionKind,
        name: &str,
        agent: Box<dyn Agent>,
    ) -> Result<TabId, MuxError> {
        let tab = self
            .registry
            .create_tab(workspace, kind, name, TabSource::Agent(agent))?;

        match TraceLog::open_for(&self.cfg.trace, kind, tab.id()) {
            Ok(trace) => tab.lock().trace = trace,
            Err(source) => {
                let err = MuxError::ResourceCleanup { tab: tab.id(), source };
                log::warn!("{err}; tracing disabled");
            }
        }

        self.start_reader(&tab, workspace);
        self.events.push(MuxEvent::TabCreated {
            workspace: workspace.clone(),
            tab: tab.id(),
        });
        self.enforce_attached_agent_limit();
        self.events.push(MuxEvent::Redraw);
        Ok(tab.id())
    }

    /// Open a native viewer tab.
    pub fn open_viewer(&mut self, workspace: &WorkspaceKey, viewer: Box<dyn Viewer>) -> Result<TabId, MuxError> {
        let name = viewer.title();
        let tab = self
            .registry
            .create_tab(workspace, SessionKind::Viewer, name, TabSource::Viewer(viewer))?;
        self.events.push(MuxEvent::TabCreated {
            workspace: workspace.clone(),
            tab: tab.id(),
        });
        self.events.push(MuxEvent::Redraw);
        Ok(tab.id())
    }

    pub fn close_tab(&mut self, workspace: &WorkspaceKey, index: usize) -> Result<TabId, MuxError> {
        let tab = self.registry.close_tab(workspace, index)?;
        self.monitor_cache.remove(&tab.id());
        self.events.push(MuxEvent::TabClosed {
            workspace: workspace.clone(),
            tab: tab.id(),
        });
        self.events.push(MuxEvent::Redraw);
        Ok(tab.id())
    }

    /// Close the active tab of the selected workspace, if there is one.
    pub fn close_active_tab(&mut self) -> Option<TabId> {
        let key = self.registry.selected()?.clone();
        let index = self.registry.active_index(&key)?;
        self.close_tab(&key, index).ok()
    }

    pub fn select_tab(&mut self, index: usize) -> Result<(), MuxError> {
        let key = self.selected_key()?;
        self.registry.set_active(&key, index)?;
        self.events.push(MuxEvent::Redraw);
        Ok(())
    }

    pub fn cycle_tab(&mut self, step: isize) {
        let Ok(key) = self.selected_key() else {
            return;
        };
        if self.registry.cycle_tab(&key, step).is_some() {
            self.events.push(MuxEvent::Redraw);
        }
    }

    fn selected_key(&self) -> Result<WorkspaceKey, MuxError> {
        self.registry.selected().cloned().ok_or(MuxError::NoActiveTab)
    }

    fn active(&self) -> Result<Arc<Tab>, MuxError> {
        self.registry.active_tab().ok_or(MuxError::NoActiveTab)
    }

    /// Detach the oldest attached agents beyond the configured limit.
    pub fn enforce_attached_agent_limit(&mut self) {
        let Some(limit) = self.cfg.attached_agent_limit else {
            return;
        };
        for tab in self.registry.enforce_attached_agent_limit(limit) {
            self.events.push(MuxEvent::Detached { tab });
        }
    }

    /// Re-attach a detached tab, making room under the limit first.
    pub fn reattach(&mut self, id: TabId) -> Result<(), MuxError> {
        let (key, _, tab) = self.registry.find(id).ok_or(MuxError::TabNotFound(id))?;
        {
            let state = tab.lock();
            if state.is_viewer() {
                return Err(MuxError::NoAgent(id));
            }
            if !state.detached {
                return Ok(());
            }
        }

        // Still detached here, so enforcement only considers the others.
        if let Some(limit) = self.cfg.attached_agent_limit {
            for other in self.registry.enforce_attached_agent_limit(limit.saturating_sub(1)) {
                self.events.push(MuxEvent::Detached { tab: other });
            }
        }

        let workspace = {
            let mut state = tab.lock();
            state.detached = false;
            state.workspace_key().unwrap_or(key)
        };
        self.start_reader(&tab, &workspace);
        self.events.push(MuxEvent::Redraw);
        Ok(())
    }

    fn start_reader(&mut self, tab: &Arc<Tab>, workspace: &WorkspaceKey) {
        let result = {
            let state = tab.lock();
            let Some(agent) = state.agent.as_deref() else {
                return;
            };
            tab.reader()
                .start(tab.id(), workspace.clone(), agent, &self.inbox, &self.cfg.reader)
        };
        if let Err(e) = result {
            self.error(format!("start reader for tab {}", tab.id()), &e);
        }
    }

    // Inbox

    /// Apply one message from the inbox.
    pub fn handle(&mut self, msg: MuxMsg) {
        match msg {
            MuxMsg::Output { workspace, tab, bytes } => self.on_output(workspace, tab, bytes),
            MuxMsg::Flush { workspace, tab } => self.on_flush(workspace, tab),
            MuxMsg::Tick { tab, .. } => self.on_tick(tab),
            MuxMsg::Stopped { tab, err, .. } => self.on_stopped(tab, err),
            MuxMsg::SnapshotTick => self.on_snapshot_tick(),
            MuxMsg::SnapshotResult(mut map) => {
                if self.monitor.is_some() {
                    // The batch may finish after some of its tabs closed.
                    map.retain(|id, _| self.registry.tab(*id).is_some());
                    self.monitor_cache.extend(map);
                    self.events.push(MuxEvent::Redraw);
                }
            }
        }
    }

    fn is_visible(&self, id: TabId) -> bool {
        self.monitor.is_some() || self.registry.active_tab().is_some_and(|t| t.id() == id)
    }

    fn on_output(&mut self, workspace: WorkspaceKey, id: TabId, bytes: Vec<u8>) {
        let Some(tab) = self.registry.tab(id) else {
            return;
        };
        let visible = self.is_visible(id);
        let mut guard = tab.lock();
        let state = &mut *guard;
        if state.closed {
            return;
        }

        if let Some(trace) = state.trace.as_mut() {
            match trace.record(&bytes) {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("trace for tab {id} reached its cap: {}", trace.path().display());
                    state.trace = None;
                }
                Err(source) => {
                    log::warn!("{}; tracing disabled", MuxError::ResourceCleanup { tab: id, source });
                    state.trace = None;
                }
            }
        }

        state.pending.extend_from_slice(&bytes);
        let mode = FlushMode {
            alt_screen: state.terminal.is_alt_screen(),
            visible,
        };
        let thresholds = flush::thresholds(
            &self.cfg.flush,
            mode,
            state.pending.len(),
            state.terminal.cols(),
            state.terminal.rows(),
        );
        if let Some(delay) = state.flush.on_output(Instant::now(), thresholds) {
            post_after(&self.inbox, delay, MuxMsg::Flush { workspace, tab: id });
        }
    }

    fn on_flush(&mut self, workspace: WorkspaceKey, id: TabId) {
        let Some(tab) = self.registry.tab(id) else {
            return;
        };
        let visible = self.is_visible(id);
        let cfg = &self.cfg.flush;
        let mut guard = tab.lock();
        let state = &mut *guard;
        if state.closed {
            return;
        }

        let mode = FlushMode {
            alt_screen: state.terminal.is_alt_screen(),
            visible,
        };
        let pending = state.pending.len();
        let thresholds = flush::thresholds(cfg, mode, pending, state.terminal.cols(), state.terminal.rows());

        match state.flush.on_flush(Instant::now(), pending, thresholds, cfg) {
            FlushStep::Idle => return,
            FlushStep::Wait(delay) => {
                post_after(&self.inbox, delay, MuxMsg::Flush { workspace, tab: id });
                return;
            }
            FlushStep::Write(n) => {
                let chunk: Vec<u8> = state.pending.drain(..n).collect();
                state.terminal.write(&chunk);
                state.monitor_dirty = true;
                if let Some(delay) = state.flush.after_write(state.pending.len(), cfg) {
                    post_after(&self.inbox, delay, MuxMsg::Flush { workspace, tab: id });
                }
            }
        }

        let title = state.terminal.title();
        let title_changed = title != state.title;
        if title_changed {
            state.title = title.clone();
        }
        let bell = state.terminal.has_bell();
        drop(guard);

        if let Some(title) = title.filter(|_| title_changed) {
            self.events.push(MuxEvent::TitleChanged { tab: id, title });
        }
        if bell {
            self.events.push(MuxEvent::Bell { tab: id });
        }
        if visible {
            self.events.push(MuxEvent::Redraw);
        }
    }

    fn on_tick(&mut self, id: TabId) {
        let Some(tab) = self.registry.tab(id) else {
            return;
        };
        let mut state = tab.lock();
        if state.running && !state.is_viewer() && !state.agent_alive() {
            state.running = false;
            let code = state.agent.as_mut().and_then(|a| a.exit_code());
            let report = !std::mem::replace(&mut state.exit_reported, true);
            drop(state);
            if report {
                self.events.push(MuxEvent::TabExited { tab: id, code });
                self.events.push(MuxEvent::Redraw);
            }
        }
    }

    fn on_stopped(&mut self, id: TabId, err: Option<String>) {
        let Some(tab) = self.registry.tab(id) else {
            return;
        };
        let mut state = tab.lock();
        if state.closed {
            return;
        }
        state.running = false;
        let code = state.agent.as_mut().and_then(|a| a.exit_code());
        let report = !std::mem::replace(&mut state.exit_reported, true);
        drop(state);

        if let Some(cause) = err {
            let err = MuxError::TransientRead { tab: id, cause };
            // An exited process also ends in a failed read; only report
            // failures of processes that are still alive.
            if code.is_none() {
                self.error(format!("tab {id}"), &err);
            } else {
                log::debug!("{err}");
            }
        }
        if report {
            self.events.push(MuxEvent::TabExited { tab: id, code });
        }
        self.events.push(MuxEvent::Redraw);
    }

    // Input and view

    /// Send keystrokes to the active tab's agent. Snaps a scrolled view back
    /// to the bottom and leaves copy mode.
    pub fn write_input(&mut self, bytes: &[u8]) -> Result<(), MuxError> {
        let tab = self.active()?;
        let mut state = tab.lock();
        if state.copy_mode {
            state.copy_mode = false;
            state.terminal.clear_selection();
            state.selection = None;
        }
        if state.terminal.is_scrolled() {
            state.terminal.scroll_view_to_bottom();
        }
        let agent = state.agent.as_ref().ok_or(MuxError::NoAgent(tab.id()))?;
        agent.send_bytes(bytes)?;
        Ok(())
    }

    /// Resize every terminal and every PTY.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.registry.set_viewport(cols, rows);
        let (cols, rows) = self.registry.viewport();
        for tab in self.registry.all_tabs() {
            let mut guard = tab.lock();
            let state = &mut *guard;
            state.terminal.resize(cols, rows);
            state.monitor_dirty = true;
            if let Some(agent) = state.agent.as_ref() {
                if let Err(e) = agent.set_size(rows, cols) {
                    log::warn!("resize of tab {} failed: {e}", tab.id());
                }
            }
            if let Some(viewer) = state.viewer.as_mut() {
                let frame = viewer.render(cols, rows);
                state.terminal.write(&frame);
            }
        }
        self.events.push(MuxEvent::Redraw);
    }

    /// Scroll the active tab. Positive deltas move into history.
    pub fn scroll(&mut self, delta: i32) -> Result<(), MuxError> {
        self.with_active(|state| state.terminal.scroll_view(delta))
    }

    pub fn scroll_to_top(&mut self) -> Result<(), MuxError> {
        self.with_active(|state| state.terminal.scroll_view_to_top())
    }

    pub fn scroll_to_bottom(&mut self) -> Result<(), MuxError> {
        self.with_active(|state| state.terminal.scroll_view_to_bottom())
    }

    /// Toggle copy mode on the active tab. Leaving it returns to the live
    /// screen and drops the selection.
    pub fn toggle_copy_mode(&mut self) -> Result<bool, MuxError> {
        let tab = self.active()?;
        let mut state = tab.lock();
        state.copy_mode = !state.copy_mode;
        if !state.copy_mode {
            state.terminal.clear_selection();
            state.terminal.scroll_view_to_bottom();
            state.selection = None;
        }
        let on = state.copy_mode;
        drop(state);
        self.events.push(MuxEvent::Redraw);
        Ok(on)
    }

    pub fn begin_selection(&mut self, point: ViewportPoint) -> Result<(), MuxError> {
        self.with_active(|state| {
            state.terminal.clear_selection();
            state.selection = Some(SelectionState {
                anchor: point,
                head: point,
                dragging: true,
            });
        })
    }

    pub fn extend_selection(&mut self, point: ViewportPoint) -> Result<(), MuxError> {
        self.with_active(|state| {
            if let Some(selection) = state.selection.as_mut().filter(|s| s.dragging) {
                selection.head = point;
                let (anchor, head) = (selection.anchor, selection.head);
                state.terminal.set_selection(anchor, head);
            }
        })
    }

    /// Finish the drag and return the selected text, if any.
    pub fn finish_selection(&mut self) -> Result<Option<String>, MuxError> {
        let tab = self.active()?;
        let mut state = tab.lock();
        let Some(selection) = state.selection.as_mut() else {
            return Ok(None);
        };
        selection.dragging = false;
        let text = state.terminal.selected_text();
        drop(state);
        self.events.push(MuxEvent::Redraw);
        Ok(text)
    }

    fn with_active(&mut self, f: impl FnOnce(&mut crate::tab::TabState)) -> Result<(), MuxError> {
        let tab = self.active()?;
        f(&mut tab.lock());
        self.events.push(MuxEvent::Redraw);
        Ok(())
    }

    /// Snapshot of the active tab for drawing.
    pub fn active_snapshot(&self) -> Option<Arc<TabSnapshot>> {
        build_snapshot(&*self.registry.active_tab()?)
    }

    // Monitor grid

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    /// Start the snapshot pool and refresh every tab.
    pub fn enter_monitor(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        self.monitor = Some(MonitorState {
            pool: MonitorPool::start(self.inbox.clone(), &self.cfg.monitor),
            scheduler: MonitorScheduler::new(),
        });
        self.refresh_all();
        if self.ticks_in_flight == 0 {
            self.arm_snapshot_tick();
        }
        self.events.push(MuxEvent::Redraw);
    }

    pub fn exit_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.pool.shutdown();
        }
        self.monitor_cache.clear();
        self.events.push(MuxEvent::Redraw);
    }

    /// Tabs in grid order with their latest monitor snapshot.
    pub fn monitor_view(&self) -> Vec<(Arc<Tab>, Option<Arc<TabSnapshot>>)> {
        self.registry
            .all_tabs()
            .into_iter()
            .map(|tab| {
                let snapshot = self.monitor_cache.get(&tab.id()).cloned();
                (tab, snapshot)
            })
            .collect()
    }

    fn tab_statuses(&self) -> Vec<TabStatus> {
        self.registry
            .all_tabs()
            .iter()
            .map(|tab| TabStatus {
                id: tab.id(),
                dirty: tab.lock().monitor_dirty,
                built_at: self.monitor_cache.get(&tab.id()).map(|s| s.built_at),
            })
            .collect()
    }

    fn targets(&self, ids: &[TabId]) -> Vec<Arc<Tab>> {
        ids.iter().filter_map(|id| self.registry.tab(*id)).collect()
    }

    fn refresh_all(&mut self) {
        let statuses = self.tab_statuses();
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };
        let ids = monitor.scheduler.full(&statuses);
        let targets = self.targets(&ids);
        if let Some(monitor) = self.monitor.as_ref() {
            monitor.pool.request(targets);
        }
    }

    fn arm_snapshot_tick(&mut self) {
        let interval = tick_interval(self.registry.all_tabs().len());
        self.ticks_in_flight += 1;
        post_after(&self.inbox, interval, MuxMsg::SnapshotTick);
    }

    fn on_snapshot_tick(&mut self) {
        self.ticks_in_flight = self.ticks_in_flight.saturating_sub(1);
        if self.monitor.is_none() || self.ticks_in_flight > 0 {
            return;
        }

        let stalled = self.monitor.as_ref().is_some_and(|m| m.pool.is_stalled());
        if stalled {
            log::warn!("monitor pool stalled, restarting");
            self.monitor = Some(MonitorState {
                pool: MonitorPool::start(self.inbox.clone(), &self.cfg.monitor),
                scheduler: MonitorScheduler::new(),
            });
            self.refresh_all();
        } else {
            let statuses = self.tab_statuses();
            let active = self.registry.active_tab().map(|t| t.id());
            let refresh_after = self.cfg.monitor.refresh_after;
            if let Some(monitor) = self.monitor.as_mut() {
                let ids = monitor.scheduler.plan(&statuses, active, Instant::now(), refresh_after);
                let targets = self.targets(&ids);
                if let Some(monitor) = self.monitor.as_ref() {
                    monitor.pool.request(targets);
                }
            }
        }
        self.arm_snapshot_tick();
    }

    // Maintenance

    /// Restart readers of live, attached sessions whose reader is gone or
    /// has not checked in for the stall timeout. Restarts of one tab are
    /// spaced by an exponential backoff.
    pub fn check_readers(&mut self) {
        let now = Instant::now();
        let cfg = self.cfg.reader.clone();
        for tab in self.registry.all_tabs() {
            let workspace = {
                let mut state = tab.lock();
                if !state.is_attached_agent() || state.closed || !state.agent_alive() {
                    continue;
                }
                let reader = tab.reader();
                let stalled = !reader.is_active() || reader.heartbeat_age() > cfg.stall_timeout;
                if !stalled {
                    continue;
                }
                let backoff = restart_backoff(cfg.restart_backoff, cfg.restart_backoff_max, reader.restart_count());
                if reader
                    .last_start()
                    .is_some_and(|at| now.saturating_duration_since(at) < backoff)
                {
                    continue;
                }
                match state.workspace_key() {
                    Some(key) => key,
                    None => continue,
                }
            };
            log::debug!("restarting reader of tab {}", tab.id());
            tab.reader().stop();
            self.start_reader(&tab, &workspace);
        }
    }

    /// Close everything. Called once when the UI exits.
    pub fn shutdown(&mut self) {
        self.exit_monitor();
        for key in self.registry.workspace_keys().to_vec() {
            self.registry.cleanup_workspace(&key);
        }
    }
}

/// `base * 2^restarts`, capped at `max`.
fn restart_backoff(base: Duration, max: Duration, restarts: u32) -> Duration {
    base.saturating_mul(1u32 << restarts.min(16)).min(max)
}
