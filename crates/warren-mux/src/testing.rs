//! Scripted agents for tests: output is fed through a channel, input and
//! resizes are recorded.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use warren_pty::{Agent, PtyError, SharedWriter};

enum FeedItem {
    Bytes(Vec<u8>),
    Empty,
    Fail(io::ErrorKind),
}

/// Drives a [`ScriptedAgent`]'s output.
#[derive(Clone)]
pub struct Feed {
    tx: mpsc::Sender<FeedItem>,
}

impl Feed {
    pub fn send(&self, bytes: &[u8]) {
        let _ = self.tx.send(FeedItem::Bytes(bytes.to_vec()));
    }

    /// Make the next read return 0 bytes.
    pub fn empty(&self) {
        let _ = self.tx.send(FeedItem::Empty);
    }

    /// Make the next read fail.
    pub fn fail(&self) {
        let _ = self.tx.send(FeedItem::Fail(io::ErrorKind::Other));
    }
}

/// Everything written to the agent's input.
#[derive(Clone, Default)]
pub struct InputLog(Arc<Mutex<Vec<u8>>>);

impl InputLog {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for InputLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct ChannelReader {
    rx: Arc<Mutex<mpsc::Receiver<FeedItem>>>,
    leftover: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.leftover.is_empty() {
            let item = self.rx.lock().unwrap().recv();
            match item {
                Ok(FeedItem::Bytes(bytes)) => self.leftover = bytes,
                Ok(FeedItem::Empty) => return Ok(0),
                Ok(FeedItem::Fail(kind)) => return Err(io::Error::new(kind, "scripted failure")),
                Err(_) => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "feed dropped")),
            }
        }
        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }
}

/// A fake process. Closing it makes pending and future reads fail, like a
/// PTY whose child was killed.
pub struct ScriptedAgent {
    rx: Arc<Mutex<mpsc::Receiver<FeedItem>>>,
    closer: mpsc::Sender<FeedItem>,
    input: InputLog,
    writer: SharedWriter,
    closed: Arc<AtomicBool>,
    readers: Arc<AtomicUsize>,
    sizes: Arc<Mutex<Vec<(u16, u16)>>>,
}

impl ScriptedAgent {
    pub fn new() -> (Self, Feed) {
        let (tx, rx) = mpsc::channel();
        let input = InputLog::default();
        let agent = Self {
            rx: Arc::new(Mutex::new(rx)),
            closer: tx.clone(),
            writer: Arc::new(Mutex::new(Box::new(input.clone()))),
            input,
            closed: Arc::new(AtomicBool::new(false)),
            readers: Arc::new(AtomicUsize::new(0)),
            sizes: Arc::new(Mutex::new(Vec::new())),
        };
        (agent, Feed { tx })
    }

    pub fn input_log(&self) -> InputLog {
        self.input.clone()
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Number of `clone_reader` calls so far.
    pub fn reader_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.readers)
    }

    /// `(rows, cols)` of every resize.
    pub fn sizes(&self) -> Arc<Mutex<Vec<(u16, u16)>>> {
        Arc::clone(&self.sizes)
    }
}

impl Agent for ScriptedAgent {
    fn clone_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ChannelReader {
            rx: Arc::clone(&self.rx),
            leftover: Vec::new(),
        }))
    }

    fn input_writer(&self) -> SharedWriter {
        Arc::clone(&self.writer)
    }

    fn set_size(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.sizes.lock().unwrap().push((rows, cols));
        Ok(())
    }

    fn is_closed(&mut self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.closer.send(FeedItem::Fail(io::ErrorKind::BrokenPipe));
        }
    }

    fn exit_code(&mut self) -> Option<u32> {
        self.is_closed().then_some(0)
    }
}
