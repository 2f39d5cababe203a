use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::{Dimensions, Scroll};
use alacritty_terminal::index::{Column, Line, Point, Side};
use alacritty_terminal::selection::{Selection, SelectionType};
use alacritty_terminal::term::{Config, Term, TermMode};
use alacritty_terminal::vte::ansi;

use crate::cell::VtCell;
use crate::screen::{convert_cursor_shape, CursorState, ScreenView, ScrollInfo};

/// Callback receiving replies the terminal wants to send back to the
/// program (device status reports, cursor position reports).
pub type ResponseWriter = Box<dyn FnMut(&[u8]) + Send>;

/// Event state captured from alacritty.
#[derive(Default)]
struct EventState {
    title: Option<String>,
    bell: bool,
    pty_writes: Vec<String>,
}

/// Event proxy that captures terminal events.
///
/// `Term` requires `T: EventListener + Clone`, so state lives behind an
/// `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct EventProxy {
    state: Arc<Mutex<EventState>>,
}

impl EventProxy {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EventState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventListener for EventProxy {
    fn send_event(&self, event: Event) {
        let mut state = self.lock();
        match event {
            Event::Title(title) => state.title = Some(title),
            Event::ResetTitle => state.title = None,
            Event::Bell => state.bell = true,
            Event::PtyWrite(data) => state.pty_writes.push(data),
            _ => {}
        }
    }
}

struct TermSize {
    columns: usize,
    screen_lines: usize,
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.screen_lines
    }

    fn screen_lines(&self) -> usize {
        self.screen_lines
    }

    fn columns(&self) -> usize {
        self.columns
    }
}

/// A point in viewport coordinates (row 0 = top of what is displayed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewportPoint {
    pub row: u16,
    pub col: u16,
}

impl ViewportPoint {
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

/// The virtual terminal: alacritty's `Term` plus a VTE parser, a version
/// counter and an optional response writer.
///
/// The version increases on every observable change (output, resize,
/// scrolling, selection). Consumers cache rendered state keyed by it.
pub struct VtTerminal {
    term: Term<EventProxy>,
    parser: ansi::Processor,
    event_proxy: EventProxy,
    version: u64,
    response_writer: Option<ResponseWriter>,
}

impl VtTerminal {
    /// Create a terminal with 10,000 lines of scrollback.
    pub fn new(cols: u16, rows: u16) -> Self {
        let config = Config {
            scrolling_history: 10_000,
            ..Config::default()
        };
        let size = TermSize {
            columns: cols.max(1) as usize,
            screen_lines: rows.max(1) as usize,
        };
        let event_proxy = EventProxy::new();
        let term = Term::new(config, &size, event_proxy.clone());

        Self {
            term,
            parser: ansi::Processor::new(),
            event_proxy,
            version: 0,
            response_writer: None,
        }
    }

    /// Feed program output through the VTE state machine.
    ///
    /// Replies queued by the terminal are passed to the response writer if
    /// one is installed; otherwise they accumulate for `take_pty_writes`.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.parser.advance(&mut self.term, bytes);
        self.version += 1;

        if let Some(writer) = self.response_writer.as_mut() {
            let writes = std::mem::take(&mut self.event_proxy.lock().pty_writes);
            for data in writes {
                writer(data.as_bytes());
            }
        }
    }

    /// Install the callback for device-status replies. Replies already queued
    /// are delivered immediately.
    pub fn set_response_writer(&mut self, mut writer: ResponseWriter) {
        for data in self.take_pty_writes() {
            writer(data.as_bytes());
        }
        self.response_writer = Some(writer);
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        let size = TermSize {
            columns: cols.max(1) as usize,
            screen_lines: rows.max(1) as usize,
        };
        self.term.resize(size);
        self.version += 1;
    }

    /// Monotonic change counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cols(&self) -> u16 {
        self.term.columns() as u16
    }

    pub fn rows(&self) -> u16 {
        self.term.screen_lines() as u16
    }

    /// Scroll the viewport. Positive deltas move into history.
    pub fn scroll_view(&mut self, delta: i32) {
        self.scroll(Scroll::Delta(delta));
    }

    pub fn scroll_view_to_top(&mut self) {
        self.scroll(Scroll::Top);
    }

    pub fn scroll_view_to_bottom(&mut self) {
        self.scroll(Scroll::Bottom);
    }

    fn scroll(&mut self, scroll: Scroll) {
        let before = self.term.grid().display_offset();
        self.term.scroll_display(scroll);
        if self.term.grid().display_offset() != before {
            self.version += 1;
        }
    }

    /// True when the viewport is scrolled away from the live screen.
    pub fn is_scrolled(&self) -> bool {
        self.term.grid().display_offset() > 0
    }

    pub fn scroll_info(&self) -> ScrollInfo {
        let grid = self.term.grid();
        ScrollInfo {
            offset: grid.display_offset(),
            total: grid.history_size() + grid.screen_lines(),
        }
    }

    /// Select the cells between two viewport points, inclusive.
    pub fn set_selection(&mut self, start: ViewportPoint, end: ViewportPoint) {
        let start = self.grid_point(start);
        let end = self.grid_point(end);
        let mut selection = Selection::new(SelectionType::Simple, start, Side::Left);
        selection.update(end, Side::Right);
        self.term.selection = Some(selection);
        self.version += 1;
    }

    pub fn clear_selection(&mut self) {
        if self.term.selection.take().is_some() {
            self.version += 1;
        }
    }

    pub fn selected_text(&self) -> Option<String> {
        self.term.selection_to_string().filter(|s| !s.is_empty())
    }

    fn grid_point(&self, point: ViewportPoint) -> Point {
        let offset = self.term.grid().display_offset() as i32;
        let row = point.row.min(self.rows().saturating_sub(1)) as i32;
        let col = point.col.min(self.cols().saturating_sub(1)) as usize;
        Point::new(Line(row - offset), Column(col))
    }

    /// Read-only view of the viewport.
    pub fn screen(&self) -> ScreenView<'_> {
        ScreenView::new(&self.term)
    }

    /// Copy of every visible cell, row-major.
    pub fn visible_screen(&self) -> Vec<Vec<VtCell>> {
        let screen = self.screen();
        (0..screen.rows()).map(|row| screen.row_cells(row)).collect()
    }

    /// True while a full-screen program has switched to the alternate screen.
    pub fn is_alt_screen(&self) -> bool {
        self.term.mode().contains(TermMode::ALT_SCREEN)
    }

    /// Cursor position, shape and visibility.
    pub fn cursor(&self) -> CursorState {
        let content = self.term.renderable_content();
        let cursor = &content.cursor;
        let visible = cursor.shape != ansi::CursorShape::Hidden
            && self.term.mode().contains(TermMode::SHOW_CURSOR);

        CursorState {
            row: cursor.point.line.0.max(0) as u16,
            col: cursor.point.column.0 as u16,
            shape: convert_cursor_shape(cursor.shape),
            visible,
        }
    }

    /// Current window title, if set by OSC escape sequences.
    pub fn title(&self) -> Option<String> {
        self.event_proxy.lock().title.clone()
    }

    /// Check and clear the bell flag.
    pub fn has_bell(&mut self) -> bool {
        std::mem::take(&mut self.event_proxy.lock().bell)
    }

    /// Drain replies queued while no response writer was installed.
    pub fn take_pty_writes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.event_proxy.lock().pty_writes)
    }
}
