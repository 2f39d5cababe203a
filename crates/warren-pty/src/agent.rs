use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crate::pty::PtyError;

/// Input side of an agent, shared between the UI and the terminal's
/// device-status reply path.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// A running interactive process attached to a pseudo-terminal.
///
/// `PtyHandle` is the real implementation. The mux only talks to this
/// trait, which keeps session plumbing testable with scripted agents.
pub trait Agent: Send {
    /// A fresh reader over the process output. Each call returns an
    /// independent handle onto the same PTY.
    fn clone_reader(&self) -> Result<Box<dyn Read + Send>, PtyError>;

    /// The writer feeding the process input.
    fn input_writer(&self) -> SharedWriter;

    fn set_size(&self, rows: u16, cols: u16) -> Result<(), PtyError>;

    /// True once the process has exited or been closed.
    fn is_closed(&mut self) -> bool;

    /// Terminate the process. Idempotent.
    fn close(&mut self);

    fn exit_code(&mut self) -> Option<u32> {
        None
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn send_bytes(&self, data: &[u8]) -> Result<(), PtyError> {
        write_all(&self.input_writer(), data)
    }

    fn send_string(&self, s: &str) -> Result<(), PtyError> {
        self.send_bytes(s.as_bytes())
    }
}

/// Write and flush through a shared writer.
pub fn write_all(writer: &SharedWriter, data: &[u8]) -> Result<(), PtyError> {
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer.write_all(data)?;
    writer.flush()?;
    Ok(())
}
