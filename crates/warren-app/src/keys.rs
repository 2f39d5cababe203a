//! Key handling: a tmux-style prefix (Ctrl-B) selects mux commands, every
//! other key is encoded and sent to the active agent.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

const PREFIX: char = 'b';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NewTab,
    CloseTab,
    NextTab,
    PrevTab,
    SelectTab(usize),
    NextWorkspace,
    PrevWorkspace,
    ToggleMonitor,
    CopyMode,
    ScrollUp,
    ScrollDown,
    ScrollTop,
    ScrollBottom,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Command(Command),
    Input(Vec<u8>),
    None,
}

#[derive(Debug, Default)]
pub struct KeyMap {
    prefix_pending: bool,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix_pending(&self) -> bool {
        self.prefix_pending
    }

    pub fn map(&mut self, key: KeyEvent) -> Action {
        if key.kind == KeyEventKind::Release {
            return Action::None;
        }
        let is_prefix = key.code == KeyCode::Char(PREFIX) && key.modifiers.contains(KeyModifiers::CONTROL);

        if !self.prefix_pending {
            if is_prefix {
                self.prefix_pending = true;
                return Action::None;
            }
            return encode(key).map_or(Action::None, Action::Input);
        }

        self.prefix_pending = false;
        if is_prefix {
            // Prefix twice sends it through.
            return Action::Input(vec![0x02]);
        }
        prefixed_command(key).map_or(Action::None, Action::Command)
    }
}

fn prefixed_command(key: KeyEvent) -> Option<Command> {
    let command = match key.code {
        KeyCode::Char('c') => Command::NewTab,
        KeyCode::Char('x') => Command::CloseTab,
        KeyCode::Char('n') | KeyCode::Right => Command::NextTab,
        KeyCode::Char('p') | KeyCode::Left => Command::PrevTab,
        KeyCode::Char(')') => Command::NextWorkspace,
        KeyCode::Char('(') => Command::PrevWorkspace,
        KeyCode::Char('m') => Command::ToggleMonitor,
        KeyCode::Char('[') => Command::CopyMode,
        KeyCode::PageUp => Command::ScrollUp,
        KeyCode::PageDown => Command::ScrollDown,
        KeyCode::Char('q') => Command::Quit,
        KeyCode::Char(c @ '0'..='9') => Command::SelectTab(c as usize - '0' as usize),
        _ => return None,
    };
    Some(command)
}

/// Keys understood while in copy mode. Everything else is swallowed.
pub fn copy_mode_command(key: KeyEvent) -> Option<Command> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let command = match key.code {
        KeyCode::Up | KeyCode::Char('k') | KeyCode::PageUp => Command::ScrollUp,
        KeyCode::Down | KeyCode::Char('j') | KeyCode::PageDown => Command::ScrollDown,
        KeyCode::Char('g') | KeyCode::Home => Command::ScrollTop,
        KeyCode::Char('G') | KeyCode::End => Command::ScrollBottom,
        KeyCode::Char('q') | KeyCode::Esc => Command::CopyMode,
        _ => return None,
    };
    Some(command)
}

/// Bytes a terminal would send for `key`.
pub fn encode(key: KeyEvent) -> Option<Vec<u8>> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let mut bytes = match key.code {
        KeyCode::Char(c) if ctrl => vec![control_byte(c)?],
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::F(n @ 1..=4) => vec![0x1b, b'O', b'P' + (n - 1)],
        KeyCode::F(n @ 5..=12) => {
            let code = [15, 17, 18, 19, 20, 21, 23, 24][usize::from(n - 5)];
            format!("\x1b[{code}~").into_bytes()
        }
        _ => return None,
    };
    if alt {
        bytes.insert(0, 0x1b);
    }
    Some(bytes)
}

fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        ' ' | '@' | '2' => Some(0),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '/' => Some(0x1f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn test_plain_keys_are_input() {
        let mut map = KeyMap::new();
        assert_eq!(map.map(key(KeyCode::Char('a'))), Action::Input(b"a".to_vec()));
        assert_eq!(map.map(key(KeyCode::Char('é'))), Action::Input("é".as_bytes().to_vec()));
        assert_eq!(map.map(key(KeyCode::Enter)), Action::Input(b"\r".to_vec()));
        assert_eq!(map.map(ctrl('c')), Action::Input(vec![0x03]));
    }

    #[test]
    fn test_prefix_selects_command() {
        let mut map = KeyMap::new();
        assert_eq!(map.map(ctrl('b')), Action::None);
        assert!(map.prefix_pending());
        assert_eq!(map.map(key(KeyCode::Char('c'))), Action::Command(Command::NewTab));
        assert!(!map.prefix_pending());

        map.map(ctrl('b'));
        assert_eq!(map.map(key(KeyCode::Char('3'))), Action::Command(Command::SelectTab(3)));
    }

    #[test]
    fn test_double_prefix_sends_ctrl_b() {
        let mut map = KeyMap::new();
        map.map(ctrl('b'));
        assert_eq!(map.map(ctrl('b')), Action::Input(vec![0x02]));
    }

    #[test]
    fn test_unknown_prefixed_key_is_dropped() {
        let mut map = KeyMap::new();
        map.map(ctrl('b'));
        assert_eq!(map.map(key(KeyCode::Char('z'))), Action::None);
        assert_eq!(map.map(key(KeyCode::Char('z'))), Action::Input(b"z".to_vec()));
    }

    #[test]
    fn test_release_is_ignored() {
        let mut map = KeyMap::new();
        let mut release = key(KeyCode::Char('a'));
        release.kind = KeyEventKind::Release;
        assert_eq!(map.map(release), Action::None);
    }

    #[test]
    fn test_encode_special_keys() {
        assert_eq!(encode(key(KeyCode::Up)).unwrap(), b"\x1b[A");
        assert_eq!(encode(key(KeyCode::Delete)).unwrap(), b"\x1b[3~");
        assert_eq!(encode(key(KeyCode::F(1))).unwrap(), b"\x1bOP");
        assert_eq!(encode(key(KeyCode::F(5))).unwrap(), b"\x1b[15~");
        assert_eq!(encode(key(KeyCode::F(12))).unwrap(), b"\x1b[24~");
        assert_eq!(
            encode(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::ALT)).unwrap(),
            b"\x1bx"
        );
        assert_eq!(encode(ctrl('[')).unwrap(), [0x1b]);
        assert_eq!(encode(key(KeyCode::F(20))), None);
    }

    #[test]
    fn test_copy_mode_keys() {
        assert_eq!(copy_mode_command(key(KeyCode::Char('k'))), Some(Command::ScrollUp));
        assert_eq!(copy_mode_command(key(KeyCode::Char('G'))), Some(Command::ScrollBottom));
        assert_eq!(copy_mode_command(key(KeyCode::Esc)), Some(Command::CopyMode));
        assert_eq!(copy_mode_command(key(KeyCode::Char('a'))), None);
    }
}
