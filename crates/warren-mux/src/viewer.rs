/// A tab that shows native content instead of a process.
///
/// Viewers draw into the tab's terminal like a program would, so snapshots
/// and the monitor grid treat them the same way as PTY tabs. They never count
/// toward the attached-agent limit.
pub trait Viewer: Send {
    fn title(&self) -> String;

    /// Bytes that draw the viewer at the given size. Written to the tab's
    /// terminal on creation and after every resize.
    fn render(&mut self, cols: u16, rows: u16) -> Vec<u8>;

    /// Release whatever the viewer holds. Called once when the tab closes.
    fn detach(&mut self) {}
}

/// A read-only page of text.
pub struct TextViewer {
    title: String,
    lines: Vec<String>,
}

impl TextViewer {
    pub fn new(title: impl Into<String>, text: &str) -> Self {
        Self {
            title: title.into(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }
}

impl Viewer for TextViewer {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn render(&mut self, cols: u16, rows: u16) -> Vec<u8> {
        // Home, clear, hide cursor.
        let mut out = b"\x1b[H\x1b[2J\x1b[?25l".to_vec();
        for (i, line) in self.lines.iter().take(rows as usize).enumerate() {
            if i > 0 {
                out.extend_from_slice(b"\r\n");
            }
            let clipped: String = line.chars().take(cols as usize).collect();
            out.extend_from_slice(clipped.as_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warren_vt::VtTerminal;

    #[test]
    fn test_text_viewer_renders_into_terminal() {
        let mut viewer = TextViewer::new("help", "first line\nsecond line that is long");
        let mut term = VtTerminal::new(10, 5);
        term.write(&viewer.render(10, 5));

        assert_eq!(term.screen().row_text(0), "first line");
        assert_eq!(term.screen().row_text(1), "second lin");
        assert!(!term.cursor().visible);
    }

    #[test]
    fn test_text_viewer_clips_rows() {
        let mut viewer = TextViewer::new("help", "a\nb\nc");
        let mut term = VtTerminal::new(10, 2);
        term.write(&viewer.render(10, 2));
        assert_eq!(term.screen().row_text(0), "a");
        assert_eq!(term.screen().row_text(1), "b");
    }
}
