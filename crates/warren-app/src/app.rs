//! The UI loop: mux inbox, host terminal input, workspace resolution and
//! the reader watchdog, all on one task.

use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{Event, KeyEvent, MouseButton, MouseEvent, MouseEventKind};
use rusqlite::Connection;
use tokio::sync::mpsc;
use warren_mux::{Mux, MuxConfig, MuxEvent, MuxMsg, Workspace, WorkspaceKey};
use warren_vt::ViewportPoint;

use crate::frontend::{Body, HostTerminal, TabLabel, View};
use crate::keys::{self, Action, Command, KeyMap};
use crate::{launch, workspaces};

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);
/// Inbox messages applied per wakeup before redrawing.
const MAX_BATCH: usize = 256;
const WHEEL_LINES: i32 = 3;

pub struct App {
    mux: Mux,
    inbox: mpsc::Receiver<MuxMsg>,
    db: Connection,
    keymap: KeyMap,
    preset: String,
    resolved_tx: mpsc::UnboundedSender<(WorkspaceKey, Workspace)>,
    resolved_rx: mpsc::UnboundedReceiver<(WorkspaceKey, Workspace)>,
    status: Option<String>,
    dirty: bool,
    quit: bool,
}

impl App {
    /// `cols` x `rows` is the host terminal size; one row goes to the tab bar.
    pub fn new(db: Connection, cfg: MuxConfig, cols: u16, rows: u16, preset: String) -> Self {
        let (mux, inbox) = Mux::new(cfg, cols, rows.saturating_sub(1));
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        Self {
            mux,
            inbox,
            db,
            keymap: KeyMap::new(),
            preset,
            resolved_tx,
            resolved_rx,
            status: None,
            dirty: true,
            quit: false,
        }
    }

    /// Register `path` right away, launch the default preset in it, and
    /// resolve its identity in the background.
    pub fn open_workspace(&mut self, path: PathBuf) {
        let ws = self.mux.open_workspace(Workspace::at(&path));
        let key = ws.key.clone();
        self.launch_preset(&key);

        let tx = self.resolved_tx.clone();
        tokio::task::spawn_blocking(move || {
            let resolved = workspaces::resolve(&path);
            let _ = tx.send((key, resolved));
        });
    }

    pub fn set_monitor(&mut self, on: bool) {
        if on {
            self.mux.enter_monitor();
        } else {
            self.mux.exit_monitor();
        }
    }

    fn launch_preset(&mut self, key: &WorkspaceKey) {
        let Some(root) = self.mux.registry().workspace(key).map(|ws| ws.root.clone()) else {
            return;
        };
        let preset = match launch::find(&self.db, &self.preset) {
            Ok(preset) => preset,
            Err(e) => {
                self.set_status(format!("{e:#}"));
                return;
            }
        };
        let spec = launch::spawn_spec(&preset, &root);
        if let Ok(id) = self.mux.launch(key, &preset.name, &spec) {
            tracing::info!("launched {} as tab {id} in {key}", preset.name);
        }
    }

    pub async fn run(mut self, host: &mut HostTerminal, mut input: mpsc::Receiver<Event>) -> anyhow::Result<()> {
        let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.inbox.recv() => {
                    self.mux.handle(msg);
                    for _ in 0..MAX_BATCH {
                        match self.inbox.try_recv() {
                            Ok(msg) => self.mux.handle(msg),
                            Err(_) => break,
                        }
                    }
                }
                Some(event) = input.recv() => self.on_input(event),
                Some((old_key, resolved)) = self.resolved_rx.recv() => {
                    if resolved.key != old_key {
                        tracing::info!("workspace {old_key} resolved to {}", resolved.key);
                    }
                    self.mux.rebind_workspace(&old_key, resolved);
                }
                _ = watchdog.tick() => self.mux.check_readers(),
                else => break,
            }

            self.process_events();
            if self.quit {
                break;
            }
            if self.dirty {
                host.draw(&self.view())?;
                self.dirty = false;
            }
        }

        self.mux.shutdown();
        Ok(())
    }

    fn set_status(&mut self, status: String) {
        self.status = Some(status);
        self.dirty = true;
    }

    fn process_events(&mut self) {
        for event in self.mux.take_events() {
            match event {
                MuxEvent::Error { context, cause } => {
                    tracing::error!("{context}: {cause}");
                    self.set_status(format!("{context}: {cause}"));
                }
                MuxEvent::TabExited { tab, code } => {
                    let status = match code {
                        Some(code) => format!("tab {tab} exited ({code})"),
                        None => format!("tab {tab} stopped"),
                    };
                    self.set_status(status);
                }
                MuxEvent::Detached { tab } => self.set_status(format!("tab {tab} detached")),
                MuxEvent::TabClosed { .. } if self.mux.registry().all_tabs().is_empty() => {
                    self.set_status("all tabs closed".into());
                }
                _ => self.dirty = true,
            }
        }
    }

    fn active_in_copy_mode(&self) -> bool {
        self.mux
            .registry()
            .active_tab()
            .is_some_and(|tab| tab.lock().copy_mode)
    }

    fn on_input(&mut self, event: Event) {
        match event {
            Event::Key(key) => self.on_key(key),
            Event::Mouse(mouse) => self.on_mouse(mouse),
            Event::Paste(text) => self.send(text.as_bytes()),
            Event::Resize(cols, rows) => self.mux.resize(cols, rows.saturating_sub(1)),
            _ => {}
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        let copy_mode = self.active_in_copy_mode();
        if copy_mode && !self.keymap.prefix_pending() {
            if let Some(command) = keys::copy_mode_command(key) {
                self.run_command(command);
                return;
            }
        }
        match self.keymap.map(key) {
            Action::Command(command) => self.run_command(command),
            // Copy mode swallows typing; the prefix still works.
            Action::Input(bytes) if !copy_mode => self.send(&bytes),
            Action::Input(_) | Action::None => {}
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        if self.mux.is_monitoring() {
            return;
        }
        if let Err(e) = self.mux.write_input(bytes) {
            tracing::debug!("input dropped: {e}");
        }
    }

    fn on_mouse(&mut self, mouse: MouseEvent) {
        if self.mux.is_monitoring() || mouse.row == 0 {
            return;
        }
        let point = ViewportPoint::new(mouse.row - 1, mouse.column);
        let result = match mouse.kind {
            MouseEventKind::ScrollUp => self.mux.scroll(WHEEL_LINES),
            MouseEventKind::ScrollDown => self.mux.scroll(-WHEEL_LINES),
            MouseEventKind::Down(MouseButton::Left) => self.mux.begin_selection(point),
            MouseEventKind::Drag(MouseButton::Left) => self.mux.extend_selection(point),
            MouseEventKind::Up(MouseButton::Left) => match self.mux.finish_selection() {
                Ok(Some(text)) => {
                    self.set_status(format!("selected {} chars", text.chars().count()));
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            },
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!("mouse event ignored: {e}");
        }
    }

    fn run_command(&mut self, command: Command) {
        let page = i32::from(self.mux.registry().viewport().1 / 2).max(1);
        let result = match command {
            Command::NewTab => {
                if let Some(key) = self.mux.registry().selected().cloned() {
                    self.launch_preset(&key);
                }
                Ok(())
            }
            Command::CloseTab => {
                self.mux.close_active_tab();
                Ok(())
            }
            Command::NextTab => {
                self.mux.cycle_tab(1);
                self.reattach_active();
                Ok(())
            }
            Command::PrevTab => {
                self.mux.cycle_tab(-1);
                self.reattach_active();
                Ok(())
            }
            Command::SelectTab(index) => match self.mux.select_tab(index) {
                Ok(()) => {
                    self.reattach_active();
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::NextWorkspace => {
                self.mux.cycle_workspace(1);
                self.reattach_active();
                Ok(())
            }
            Command::PrevWorkspace => {
                self.mux.cycle_workspace(-1);
                self.reattach_active();
                Ok(())
            }
            Command::ToggleMonitor => {
                let on = !self.mux.is_monitoring();
                self.set_monitor(on);
                Ok(())
            }
            Command::CopyMode => self.mux.toggle_copy_mode().map(drop),
            Command::ScrollUp => self.mux.scroll(page),
            Command::ScrollDown => self.mux.scroll(-page),
            Command::ScrollTop => self.mux.scroll_to_top(),
            Command::ScrollBottom => self.mux.scroll_to_bottom(),
            Command::Quit => {
                self.quit = true;
                Ok(())
            }
        };
        if let Err(e) = result {
            self.set_status(e.to_string());
        }
        self.dirty = true;
    }

    /// Switching to a detached tab attaches it again.
    fn reattach_active(&mut self) {
        let Some(tab) = self.mux.registry().active_tab() else {
            return;
        };
        if !tab.lock().detached {
            return;
        }
        if let Err(e) = self.mux.reattach(tab.id()) {
            self.set_status(e.to_string());
        }
    }

    fn view(&self) -> View {
        let registry = self.mux.registry();
        let selected = registry.selected();
        let workspace = selected
            .and_then(|key| registry.workspace(key))
            .map(|ws| ws.name.clone())
            .unwrap_or_default();
        let active = selected.and_then(|key| registry.active_index(key));
        let tabs = selected
            .map(|key| {
                registry
                    .tabs(key)
                    .iter()
                    .enumerate()
                    .map(|(i, tab)| {
                        let state = tab.lock();
                        TabLabel {
                            name: state.display_name().to_string(),
                            active: Some(i) == active,
                            running: state.running,
                            detached: state.detached,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let body = if self.mux.is_monitoring() {
            let tiles = self
                .mux
                .monitor_view()
                .into_iter()
                .map(|(tab, snapshot)| {
                    let state = tab.lock();
                    let ws = state.workspace.upgrade().map(|ws| ws.name.clone()).unwrap_or_default();
                    (format!("{ws}/{}", state.display_name()), snapshot)
                })
                .collect();
            Body::Grid(tiles)
        } else {
            match self.mux.active_snapshot() {
                Some(snapshot) => Body::Single(snapshot),
                None => Body::Empty,
            }
        };

        let status = match (&self.status, self.keymap.prefix_pending()) {
            (_, true) => Some("prefix".to_string()),
            (status, false) => status.clone(),
        };

        View {
            workspace,
            tabs,
            status,
            body,
        }
    }
}
