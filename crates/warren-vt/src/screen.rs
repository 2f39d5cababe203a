use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::Flags as AlacFlags;
use alacritty_terminal::term::Term;
use alacritty_terminal::vte::ansi::{Color, CursorShape as AlacCursorShape, NamedColor, Rgb as AlacRgb};

use crate::cell::{CellFlags, Rgb, VtCell, DEFAULT_BG, DEFAULT_FG};
use crate::terminal::EventProxy;

/// Current state of the cursor, in screen coordinates (row 0 = top of the
/// live screen, independent of scrollback).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorState {
    pub row: u16,
    pub col: u16,
    pub shape: CursorShape,
    pub visible: bool,
}

/// Shape of the terminal cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorShape {
    Block,
    Underline,
    Bar,
    Hidden,
}

/// Scroll position of the viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScrollInfo {
    /// Lines scrolled back from the bottom. 0 means the live screen.
    pub offset: usize,
    /// History lines plus screen lines.
    pub total: usize,
}

/// A read-only view of what is currently visible in the viewport, taking the
/// scrollback offset into account.
pub struct ScreenView<'a> {
    term: &'a Term<EventProxy>,
}

impl<'a> ScreenView<'a> {
    pub(crate) fn new(term: &'a Term<EventProxy>) -> Self {
        Self { term }
    }

    /// Number of visible rows.
    pub fn rows(&self) -> u16 {
        self.term.screen_lines() as u16
    }

    /// Number of columns.
    pub fn cols(&self) -> u16 {
        self.term.columns() as u16
    }

    /// Get a single cell at the given viewport row and column.
    ///
    /// Row 0 is the top of the viewport. When the view is scrolled back this
    /// addresses history lines.
    pub fn cell(&self, row: u16, col: u16) -> VtCell {
        if (row as usize) >= self.term.screen_lines() || (col as usize) >= self.term.columns() {
            return VtCell::default();
        }

        let offset = self.term.grid().display_offset() as i32;
        let line = Line(row as i32 - offset);
        let cell = &self.term.grid()[line][Column(col as usize)];
        convert_cell(cell, self.term.colors())
    }

    /// Get all cells in a viewport row.
    pub fn row_cells(&self, row: u16) -> Vec<VtCell> {
        (0..self.cols()).map(|col| self.cell(row, col)).collect()
    }

    /// Text of a viewport row with trailing blanks trimmed. Spacer halves of
    /// wide characters are skipped.
    pub fn row_text(&self, row: u16) -> String {
        let text: String = self
            .row_cells(row)
            .iter()
            .filter(|c| c.width != 0)
            .map(|c| c.codepoint)
            .collect();
        text.trim_end().to_string()
    }
}

/// Standard xterm ANSI palette.
const ANSI_COLORS: [AlacRgb; 16] = [
    AlacRgb { r: 0, g: 0, b: 0 },
    AlacRgb { r: 205, g: 0, b: 0 },
    AlacRgb { r: 0, g: 205, b: 0 },
    AlacRgb { r: 205, g: 205, b: 0 },
    AlacRgb { r: 0, g: 0, b: 238 },
    AlacRgb { r: 205, g: 0, b: 205 },
    AlacRgb { r: 0, g: 205, b: 205 },
    AlacRgb { r: 229, g: 229, b: 229 },
    AlacRgb { r: 127, g: 127, b: 127 },
    AlacRgb { r: 255, g: 0, b: 0 },
    AlacRgb { r: 0, g: 255, b: 0 },
    AlacRgb { r: 255, g: 255, b: 0 },
    AlacRgb { r: 92, g: 92, b: 255 },
    AlacRgb { r: 255, g: 0, b: 255 },
    AlacRgb { r: 0, g: 255, b: 255 },
    AlacRgb { r: 255, g: 255, b: 255 },
];

/// Resolve a `vte::ansi::Color` to an `Rgb` using the terminal's color palette.
pub(crate) fn resolve_color(
    color: &Color,
    colors: &alacritty_terminal::term::color::Colors,
    is_fg: bool,
) -> Rgb {
    let fallback = if is_fg { DEFAULT_FG } else { DEFAULT_BG };
    match color {
        Color::Spec(rgb) => Rgb::new(rgb.r, rgb.g, rgb.b),
        Color::Named(named) => {
            if let Some(rgb) = colors[*named] {
                return Rgb::new(rgb.r, rgb.g, rgb.b);
            }
            let idx = *named as usize;
            match named {
                NamedColor::Foreground | NamedColor::BrightForeground => DEFAULT_FG,
                NamedColor::Background => DEFAULT_BG,
                _ if idx < 16 => {
                    let c = ANSI_COLORS[idx];
                    Rgb::new(c.r, c.g, c.b)
                }
                NamedColor::DimForeground => Rgb::new(178, 178, 178),
                _ => fallback,
            }
        }
        Color::Indexed(idx) => {
            let idx = *idx as usize;
            if let Some(rgb) = colors[idx] {
                Rgb::new(rgb.r, rgb.g, rgb.b)
            } else if idx < 16 {
                let c = ANSI_COLORS[idx];
                Rgb::new(c.r, c.g, c.b)
            } else if idx < 232 {
                // 6x6x6 color cube.
                let n = idx - 16;
                let to_byte = |v: usize| if v == 0 { 0u8 } else { (55 + 40 * v) as u8 };
                Rgb::new(to_byte((n / 36) % 6), to_byte((n / 6) % 6), to_byte(n % 6))
            } else {
                let v = (8 + 10 * (idx - 232)) as u8;
                Rgb::new(v, v, v)
            }
        }
    }
}

/// Convert an alacritty cell to our `VtCell`.
pub(crate) fn convert_cell(
    cell: &alacritty_terminal::term::cell::Cell,
    colors: &alacritty_terminal::term::color::Colors,
) -> VtCell {
    const FLAG_MAP: [(AlacFlags, CellFlags); 7] = [
        (AlacFlags::BOLD, CellFlags::BOLD),
        (AlacFlags::ITALIC, CellFlags::ITALIC),
        (AlacFlags::UNDERLINE, CellFlags::UNDERLINE),
        (AlacFlags::STRIKEOUT, CellFlags::STRIKETHROUGH),
        (AlacFlags::INVERSE, CellFlags::INVERSE),
        (AlacFlags::DIM, CellFlags::DIM),
        (AlacFlags::HIDDEN, CellFlags::HIDDEN),
    ];

    let mut flags = CellFlags::empty();
    for (alac, ours) in FLAG_MAP {
        if cell.flags.contains(alac) {
            flags |= ours;
        }
    }

    let width = if cell.flags.contains(AlacFlags::WIDE_CHAR) {
        2
    } else if cell.flags.contains(AlacFlags::WIDE_CHAR_SPACER) {
        0
    } else {
        1
    };

    VtCell {
        codepoint: cell.c,
        fg: resolve_color(&cell.fg, colors, true),
        bg: resolve_color(&cell.bg, colors, false),
        flags,
        width,
    }
}

pub(crate) fn convert_cursor_shape(shape: AlacCursorShape) -> CursorShape {
    match shape {
        AlacCursorShape::Block | AlacCursorShape::HollowBlock => CursorShape::Block,
        AlacCursorShape::Underline => CursorShape::Underline,
        AlacCursorShape::Beam => CursorShape::Bar,
        AlacCursorShape::Hidden => CursorShape::Hidden,
    }
}
