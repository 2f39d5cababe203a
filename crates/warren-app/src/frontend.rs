//! Drawing to the host terminal with ratatui over crossterm.
//!
//! Row 0 is the tab bar; the rest shows the active tab or, in monitor mode,
//! a grid of every tab. ratatui diffs each frame against the last one, so
//! only changed cells reach the terminal.

use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Layout, Margin, Position, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::Widget;
use ratatui::{Frame, Terminal};
use tokio::sync::mpsc;
use warren_mux::TabSnapshot;
use warren_vt::{CellFlags, Rgb, VtCell};

const EMPTY_HINT: &str = "no tabs: Ctrl-B c opens one, Ctrl-B q quits";

/// Raw mode plus alternate screen, undone on drop.
pub struct HostTerminal {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl HostTerminal {
    pub fn enter() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        if let Err(e) = execute!(out, EnterAlternateScreen, EnableMouseCapture) {
            let _ = terminal::disable_raw_mode();
            return Err(e.into());
        }
        let terminal = match Terminal::new(CrosstermBackend::new(out)) {
            Ok(terminal) => terminal,
            Err(e) => {
                let _ = execute!(io::stdout(), DisableMouseCapture, LeaveAlternateScreen);
                let _ = terminal::disable_raw_mode();
                return Err(e.into());
            }
        };
        tracing::debug!("host terminal in raw mode");
        Ok(Self { terminal })
    }

    /// `(cols, rows)` of the host terminal.
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    pub fn draw(&mut self, view: &View) -> io::Result<()> {
        self.terminal.draw(|frame| render(frame, view))?;
        Ok(())
    }
}

impl Drop for HostTerminal {
    fn drop(&mut self) {
        let _ = self.terminal.show_cursor();
        let _ = execute!(self.terminal.backend_mut(), DisableMouseCapture, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// Read host terminal events on a dedicated thread. The thread ends when
/// the receiver is dropped and the next event arrives.
pub fn spawn_input(tx: mpsc::Sender<Event>) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("warren-input".into())
        .spawn(move || loop {
            match event::read() {
                Ok(ev) => {
                    if tx.blocking_send(ev).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("reading terminal input failed: {e}");
                    break;
                }
            }
        })
}

/// One tab in the tab bar.
#[derive(Debug, Clone)]
pub struct TabLabel {
    pub name: String,
    pub active: bool,
    pub running: bool,
    pub detached: bool,
}

#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Single(Arc<TabSnapshot>),
    /// Monitor grid: title and latest snapshot of every tab.
    Grid(Vec<(String, Option<Arc<TabSnapshot>>)>),
}

/// Everything needed to draw one frame.
#[derive(Debug, Clone)]
pub struct View {
    pub workspace: String,
    pub tabs: Vec<TabLabel>,
    pub status: Option<String>,
    pub body: Body,
}

/// Split `area` into `n` tiles, row-major, as square as possible.
pub fn grid_layout(n: usize, area: Rect) -> Vec<Rect> {
    if n == 0 {
        return Vec::new();
    }
    let columns = (1..=n).find(|c| c * c >= n).unwrap_or(n);
    let lines = n.div_ceil(columns);

    let rows = Layout::vertical(vec![Constraint::Ratio(1, lines as u32); lines]).split(area);
    let across = Layout::horizontal(vec![Constraint::Ratio(1, columns as u32); columns]);
    rows.iter()
        .flat_map(|row| across.split(*row).to_vec())
        .take(n)
        .collect()
}

pub fn tab_bar_text(view: &View) -> String {
    let mut bar = format!(" {} ", view.workspace);
    for (i, tab) in view.tabs.iter().enumerate() {
        let marker = match (tab.active, tab.running, tab.detached) {
            (_, _, true) => "~",
            (_, false, _) => "!",
            (true, _, _) => "*",
            _ => "",
        };
        bar.push_str(&format!("| {i}:{}{marker} ", tab.name));
    }
    if let Some(status) = &view.status {
        bar.push_str("| ");
        bar.push_str(status);
    }
    bar
}

/// Where the host cursor goes when showing `snapshot` in `area`. Hidden
/// while the program hides it, while scrolled back, and in copy mode.
pub fn cursor_position(snapshot: &TabSnapshot, area: Rect) -> Option<Position> {
    if !snapshot.cursor_visible() || snapshot.scroll.offset != 0 || snapshot.copy_mode {
        return None;
    }
    let position = Position::new(area.x + snapshot.cursor.col, area.y + snapshot.cursor.row);
    area.contains(position).then_some(position)
}

pub fn render(frame: &mut Frame, view: &View) {
    let [bar, body] = Layout::vertical([Constraint::Length(1), Constraint::Fill(1)]).areas(frame.area());
    frame.render_widget(TabBar { view }, bar);

    match &view.body {
        Body::Empty => frame.render_widget(Line::raw(EMPTY_HINT), body.inner(Margin::new(1, 1))),
        Body::Single(snapshot) => {
            frame.render_widget(SnapshotTile { snapshot, first_row: 0 }, body);
            if let Some(position) = cursor_position(snapshot, body) {
                frame.set_cursor_position(position);
            }
        }
        Body::Grid(tiles) => {
            for ((title, snapshot), rect) in tiles.iter().zip(grid_layout(tiles.len(), body)) {
                if rect.width == 0 || rect.height == 0 {
                    continue;
                }
                let [head, cells] = Layout::vertical([Constraint::Length(1), Constraint::Fill(1)]).areas(rect);
                let style = Style::new().add_modifier(Modifier::UNDERLINED);
                let buf = frame.buffer_mut();
                buf.set_style(head, style);
                buf.set_stringn(head.x, head.y, title, head.width as usize, style);

                if let Some(snapshot) = snapshot {
                    // Keep the cursor row in view.
                    let first_row = (snapshot.cursor.row + 1).saturating_sub(cells.height);
                    frame.render_widget(SnapshotTile { snapshot, first_row }, cells);
                }
            }
        }
    }
}

/// The one-line tab bar, drawn reversed across the full width.
struct TabBar<'a> {
    view: &'a View,
}

impl Widget for TabBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let style = Style::new().add_modifier(Modifier::REVERSED);
        buf.set_style(area, style);
        buf.set_stringn(area.x, area.y, tab_bar_text(self.view), area.width as usize, style);
    }
}

/// Snapshot rows from `first_row` on, clipped to the area. Selected cells
/// are drawn with foreground and background swapped.
struct SnapshotTile<'a> {
    snapshot: &'a TabSnapshot,
    first_row: u16,
}

impl Widget for SnapshotTile<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let rows = self
            .snapshot
            .cells
            .iter()
            .enumerate()
            .skip(self.first_row as usize)
            .take(area.height as usize);
        for (line, (row, cells)) in rows.enumerate() {
            let y = area.y + line as u16;
            for (col, cell) in cells.iter().enumerate() {
                // Spacer half of a wide char.
                if cell.width == 0 {
                    continue;
                }
                let col = col as u16;
                if col + u16::from(cell.width) > area.width {
                    break;
                }
                let selected = self.snapshot.is_selected(row as u16, col);
                if let Some(target) = buf.cell_mut((area.x + col, y)) {
                    target.set_char(cell.codepoint).set_style(cell_style(cell, selected));
                }
            }
        }
    }
}

fn cell_style(cell: &VtCell, selected: bool) -> Style {
    let color = |c: Rgb| Color::Rgb(c.r, c.g, c.b);
    let modifiers = [
        (CellFlags::BOLD, Modifier::BOLD),
        (CellFlags::DIM, Modifier::DIM),
        (CellFlags::ITALIC, Modifier::ITALIC),
        (CellFlags::UNDERLINE, Modifier::UNDERLINED),
        (CellFlags::STRIKETHROUGH, Modifier::CROSSED_OUT),
        (CellFlags::INVERSE, Modifier::REVERSED),
        (CellFlags::HIDDEN, Modifier::HIDDEN),
        (CellFlags::BLINK, Modifier::SLOW_BLINK),
    ];
    let mut modifier = Modifier::empty();
    for (flag, m) in modifiers {
        if cell.flags.contains(flag) {
            modifier |= m;
        }
    }
    if selected {
        modifier ^= Modifier::REVERSED;
    }
    Style::new()
        .fg(color(cell.fg))
        .bg(color(cell.bg))
        .add_modifier(modifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use std::time::Instant;
    use warren_vt::{CursorShape, CursorState, ScrollInfo, ViewportPoint};

    fn snapshot(lines: &[&str], cols: u16) -> TabSnapshot {
        let cells = lines
            .iter()
            .map(|line| {
                let mut row: Vec<VtCell> = line
                    .chars()
                    .map(|c| VtCell {
                        codepoint: c,
                        ..VtCell::default()
                    })
                    .collect();
                row.resize(cols as usize, VtCell::default());
                row
            })
            .collect();
        TabSnapshot {
            tab: 1,
            version: 1,
            cols,
            rows: lines.len() as u16,
            cells,
            cursor: CursorState {
                row: 0,
                col: 2,
                shape: CursorShape::Block,
                visible: true,
            },
            scroll: ScrollInfo::default(),
            title: "sh".into(),
            running: true,
            copy_mode: false,
            selection: None,
            built_at: Instant::now(),
        }
    }

    fn view(body: Body) -> View {
        View {
            workspace: "repo [main]".into(),
            tabs: vec![
                TabLabel {
                    name: "sh".into(),
                    active: true,
                    running: true,
                    detached: false,
                },
                TabLabel {
                    name: "claude".into(),
                    active: false,
                    running: true,
                    detached: true,
                },
            ],
            status: Some("tab 2 exited".into()),
            body,
        }
    }

    fn draw(view: &View, width: u16, height: u16) -> Buffer {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|frame| render(frame, view)).unwrap();
        terminal.backend().buffer().clone()
    }

    fn line(buf: &Buffer, y: u16) -> String {
        (0..buf.area.width).map(|x| buf[(x, y)].symbol()).collect()
    }

    #[test]
    fn test_grid_layout() {
        let area = Rect::new(0, 1, 80, 20);
        assert!(grid_layout(0, area).is_empty());
        assert_eq!(grid_layout(1, area), [area]);

        let four = grid_layout(4, area);
        assert_eq!(four.len(), 4);
        assert_eq!(four[3], Rect::new(40, 11, 40, 10));

        let five = grid_layout(5, area);
        assert_eq!(five.len(), 5);
        assert_eq!((five[3].x, five[3].y), (0, 11));
        assert_eq!(five[0].width + five[1].width + five[2].width, 80);
        assert!(five.iter().all(|r| area.union(*r) == area));
    }

    #[test]
    fn test_tab_bar_text() {
        let bar = tab_bar_text(&view(Body::Empty));
        assert_eq!(bar, " repo [main] | 0:sh* | 1:claude~ | tab 2 exited");
    }

    #[test]
    fn test_tab_bar_is_clipped() {
        let buf = draw(&view(Body::Empty), 8, 3);
        assert_eq!(line(&buf, 0), " repo [m");
        assert!(buf[(0, 0)].modifier.contains(Modifier::REVERSED));
    }

    #[test]
    fn test_render_single_contains_text() {
        let buf = draw(&view(Body::Single(Arc::new(snapshot(&["hello", "world"], 40)))), 40, 10);
        assert!(line(&buf, 0).starts_with(" repo [main]"));
        assert!(line(&buf, 1).starts_with("hello "));
        assert!(line(&buf, 2).starts_with("world "));
    }

    #[test]
    fn test_render_empty_shows_hint() {
        let buf = draw(&view(Body::Empty), 60, 5);
        assert!(line(&buf, 2).contains("Ctrl-B c"));
    }

    #[test]
    fn test_render_grid_clips_tiles() {
        let wide = "x".repeat(40);
        let tiles = vec![
            ("one".to_string(), Some(Arc::new(snapshot(&[&wide], 40)))),
            ("two".to_string(), None),
        ];
        let buf = draw(&view(Body::Grid(tiles)), 40, 10);
        assert!(line(&buf, 1).starts_with("one"));
        assert_eq!(&line(&buf, 1)[20..23], "two");
        assert_eq!(line(&buf, 2), format!("{}{}", "x".repeat(20), " ".repeat(20)));
    }

    #[test]
    fn test_selection_is_drawn_reversed() {
        let mut snap = snapshot(&["hello world"], 20);
        snap.selection = Some((ViewportPoint::new(0, 8), ViewportPoint::new(0, 6)));
        let buf = draw(&view(Body::Single(Arc::new(snap))), 20, 4);

        let reversed = |x: u16| buf[(x, 1)].modifier.contains(Modifier::REVERSED);
        assert!(!reversed(5));
        assert!(reversed(6) && reversed(7) && reversed(8));
        assert!(!reversed(9));
    }

    #[test]
    fn test_cursor_position() {
        let area = Rect::new(0, 1, 20, 4);
        let mut snap = snapshot(&["ab"], 20);
        assert_eq!(cursor_position(&snap, area), Some(Position::new(2, 1)));

        snap.copy_mode = true;
        assert_eq!(cursor_position(&snap, area), None);

        snap.copy_mode = false;
        snap.scroll.offset = 3;
        assert_eq!(cursor_position(&snap, area), None);

        snap.scroll.offset = 0;
        snap.cursor.row = 10;
        assert_eq!(cursor_position(&snap, area), None);
    }
}
