use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use crate::agent::{Agent, SharedWriter};

/// Errors from PTY operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY spawn failed: {0}")]
    SpawnFailed(String),
    #[error("PTY I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("PTY resize failed: {0}")]
    ResizeFailed(String),
}

/// What to run inside a new PTY.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    /// Program to run. `None` runs the user's default shell.
    pub program: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl SpawnSpec {
    pub fn shell() -> Self {
        Self::default()
    }

    pub fn program(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The program that will actually be executed.
    pub fn resolved_program(&self) -> String {
        self.program.clone().unwrap_or_else(default_shell)
    }

    fn command(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(self.resolved_program());
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Owns a portable-pty child process, the master side and its writer.
///
/// Readers are cloned off the master on demand so a reader thread can block
/// without holding anything the UI needs.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: SharedWriter,
    child: Box<dyn Child + Send + Sync>,
    exit_code: Option<u32>,
    killed: bool,
}

impl PtyHandle {
    /// Spawn a new PTY running `spec` with the given dimensions.
    pub fn spawn(spec: &SpawnSpec, cols: u16, rows: u16) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(spec.command())
            .map_err(|e| {
                PtyError::SpawnFailed(format!("failed to spawn {}: {e}", spec.resolved_program()))
            })?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        log::debug!(
            "spawned {} (pid {:?}) in {cols}x{rows} PTY",
            spec.resolved_program(),
            child.process_id()
        );

        Ok(Self {
            master: pair.master,
            writer: Arc::new(Mutex::new(writer)),
            child,
            exit_code: None,
            killed: false,
        })
    }

    /// Get the child process exit status if it has exited.
    pub fn try_wait(&mut self) -> Option<u32> {
        if self.exit_code.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_code = Some(status.exit_code());
            }
        }
        self.exit_code
    }
}

impl Agent for PtyHandle {
    fn clone_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))
    }

    fn input_writer(&self) -> SharedWriter {
        Arc::clone(&self.writer)
    }

    fn set_size(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
    }

    fn is_closed(&mut self) -> bool {
        self.killed || self.try_wait().is_some()
    }

    fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.child.kill() {
            log::warn!("failed to kill PTY child: {e}");
        }
        // Reap so the child does not linger as a zombie.
        let _ = self.child.try_wait();
        self.killed = true;
    }

    fn exit_code(&mut self) -> Option<u32> {
        self.try_wait()
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Returns the user's default shell, falling back to `/bin/sh`.
pub fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn sh() -> SpawnSpec {
        SpawnSpec::program("/bin/sh")
    }

    /// Read from `reader` on a helper thread until `needle` shows up or the
    /// deadline passes.
    fn read_until(mut reader: Box<dyn Read + Send>, needle: &'static str) -> String {
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        });

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut output = Vec::new();
        while Instant::now() < deadline {
            if let Ok(chunk) = rx.recv_timeout(Duration::from_millis(100)) {
                output.extend_from_slice(&chunk);
                if String::from_utf8_lossy(&output).contains(needle) {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&output).to_string()
    }

    #[test]
    fn test_spawn_pty() {
        let handle = PtyHandle::spawn(&sh(), 80, 24);
        assert!(handle.is_ok(), "Failed to spawn PTY: {:?}", handle.err());
        let mut handle = handle.unwrap();
        assert!(!handle.is_closed());
        assert!(handle.pid().is_some());
    }

    #[test]
    fn test_send_string_echo() {
        let handle = PtyHandle::spawn(&sh(), 80, 24).unwrap();
        let reader = handle.clone_reader().unwrap();

        handle.send_string("echo WARREN_TEST_OK\n").unwrap();

        let text = read_until(reader, "WARREN_TEST_OK");
        assert!(
            text.contains("WARREN_TEST_OK"),
            "Expected output to contain WARREN_TEST_OK, got: {text}"
        );
    }

    #[test]
    fn test_spawn_with_args_and_env() {
        let spec = sh()
            .with_args(["-c", "echo $WARREN_VAR; sleep 1"])
            .with_env("WARREN_VAR", "from-env");
        let handle = PtyHandle::spawn(&spec, 80, 24).unwrap();
        let text = read_until(handle.clone_reader().unwrap(), "from-env");
        assert!(text.contains("from-env"), "got: {text}");
    }

    #[test]
    fn test_resize() {
        let handle = PtyHandle::spawn(&sh(), 80, 24).unwrap();
        let result = handle.set_size(40, 120);
        assert!(result.is_ok(), "Resize failed: {:?}", result.err());
    }

    #[test]
    fn test_child_exit() {
        let mut handle = PtyHandle::spawn(&sh(), 80, 24).unwrap();
        handle.send_string("exit 0\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && handle.try_wait().is_none() {
            thread::sleep(Duration::from_millis(50));
        }

        assert_eq!(handle.exit_code(), Some(0));
        assert!(handle.is_closed());
    }

    #[test]
    fn test_close_kills_child() {
        let mut handle = PtyHandle::spawn(&sh(), 80, 24).unwrap();
        handle.close();
        assert!(handle.is_closed());
        // Closing twice is harmless.
        handle.close();
    }

    #[test]
    fn test_default_shell_detection() {
        let shell = default_shell();
        assert!(!shell.is_empty(), "Default shell should not be empty");
        assert!(
            shell.starts_with('/'),
            "Default shell should be an absolute path, got: {shell}"
        );
    }
}
