//! warren-vt: the virtual terminal used by every Warren tab.
//!
//! Wraps `alacritty_terminal` behind a small API: feed bytes, read the
//! visible grid, scroll, select, and observe a version counter that changes
//! whenever anything visible changes.

pub mod cell;
pub mod screen;
pub mod terminal;

pub use cell::{CellFlags, Rgb, VtCell, DEFAULT_BG, DEFAULT_FG};
pub use screen::{CursorShape, CursorState, ScreenView, ScrollInfo};
pub use terminal::{ResponseWriter, VtTerminal, ViewportPoint};
