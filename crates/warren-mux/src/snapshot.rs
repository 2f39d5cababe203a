use std::sync::Arc;
use std::time::Instant;

use warren_vt::{CursorState, ScrollInfo, ViewportPoint, VtCell};

use crate::tab::{Tab, TabId};

/// Immutable copy of a tab's visible terminal state. Renderers draw from
/// these without touching the tab.
#[derive(Debug, Clone, PartialEq)]
pub struct TabSnapshot {
    pub tab: TabId,
    /// Terminal version the cells were copied at.
    pub version: u64,
    pub cols: u16,
    pub rows: u16,
    /// Row-major visible cells.
    pub cells: Vec<Vec<VtCell>>,
    pub cursor: CursorState,
    pub scroll: ScrollInfo,
    pub title: String,
    pub running: bool,
    pub copy_mode: bool,
    /// Mouse selection as `(anchor, head)` in viewport coordinates, in the
    /// order the user dragged.
    pub selection: Option<(ViewportPoint, ViewportPoint)>,
    pub built_at: Instant,
}

impl TabSnapshot {
    pub fn cursor_visible(&self) -> bool {
        self.cursor.visible
    }

    /// Whether the cell at `row`, `col` lies inside the selection. Selections
    /// run in reading order from the earlier point to the later one.
    pub fn is_selected(&self, row: u16, col: u16) -> bool {
        let Some((a, b)) = self.selection else {
            return false;
        };
        let (start, end) = if (a.row, a.col) <= (b.row, b.col) { (a, b) } else { (b, a) };
        (start.row, start.col) <= (row, col) && (row, col) <= (end.row, end.col)
    }

    /// Row text with trailing blanks trimmed and wide-char spacers skipped.
    pub fn row_text(&self, row: usize) -> String {
        let Some(cells) = self.cells.get(row) else {
            return String::new();
        };
        let text: String = cells
            .iter()
            .filter(|c| c.width != 0)
            .map(|c| c.codepoint)
            .collect();
        text.trim_end().to_string()
    }
}

/// Snapshot a tab, reusing its cached snapshot when nothing changed.
///
/// The version check and the copy happen under one lock, so a cached
/// snapshot is never returned once the terminal moved on. Returns `None` for
/// closed tabs. Clears the tab's monitor-dirty flag.
pub fn build_snapshot(tab: &Tab) -> Option<Arc<TabSnapshot>> {
    let mut state = tab.lock();
    if state.closed {
        return None;
    }

    let version = state.terminal.version();
    let cursor = state.terminal.cursor();
    let selection = state.selection.map(|s| (s.anchor, s.head));
    state.monitor_dirty = false;

    // Copy mode and the selection live on the tab, not in the terminal, so
    // the version alone does not cover them.
    if let Some(cached) = &state.snapshot {
        if cached.version == version
            && cached.cursor_visible() == cursor.visible
            && cached.running == state.running
            && cached.copy_mode == state.copy_mode
            && cached.selection == selection
            && cached.title == state.display_name()
        {
            return Some(Arc::clone(cached));
        }
    }

    let snapshot = Arc::new(TabSnapshot {
        tab: tab.id(),
        version,
        cols: state.terminal.cols(),
        rows: state.terminal.rows(),
        cells: state.terminal.visible_screen(),
        cursor,
        scroll: state.terminal.scroll_info(),
        title: state.display_name().to_string(),
        running: state.running,
        copy_mode: state.copy_mode,
        selection,
        built_at: Instant::now(),
    });
    state.snapshot = Some(Arc::clone(&snapshot));
    Some(snapshot)
}
