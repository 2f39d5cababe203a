//! Optional hex-dump trace of raw PTY output, for debugging what a program
//! actually sent.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::TraceConfig;
use crate::kind::SessionKind;
use crate::tab::TabId;

const BYTES_PER_LINE: usize = 16;

/// An open trace file. Stops accepting data once `max_bytes` were written.
pub struct TraceLog {
    path: PathBuf,
    out: BufWriter<File>,
    written: u64,
    max_bytes: u64,
}

impl TraceLog {
    /// Open a trace for `tab` if tracing is enabled for `kind`.
    pub fn open_for(cfg: &TraceConfig, kind: SessionKind, tab: TabId) -> io::Result<Option<Self>> {
        if !cfg.enabled_for(kind.as_str()) {
            return Ok(None);
        }
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = cfg.dir.join(format!("warren-trace-{kind}-{tab}-{stamp}.log"));
        Self::create(&path, cfg.max_bytes).map(Some)
    }

    pub fn create(path: &Path, max_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("tracing PTY output to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            written: 0,
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one read chunk. Returns `Ok(false)` once the cap is reached;
    /// the caller drops the log at that point.
    pub fn record(&mut self, bytes: &[u8]) -> io::Result<bool> {
        let entry = format_entry(bytes);
        let remaining = self.max_bytes.saturating_sub(self.written) as usize;
        let take = entry.len().min(remaining);

        self.out.write_all(&entry.as_bytes()[..take])?;
        self.out.flush()?;
        self.written += take as u64;

        Ok(self.written < self.max_bytes)
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

/// Timestamped hex dump of one chunk.
fn format_entry(bytes: &[u8]) -> String {
    let mut entry = String::with_capacity(32 + bytes.len() * 4);
    let _ = writeln!(
        entry,
        "[{}] {} bytes",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        bytes.len()
    );
    for (i, line) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(entry, "{:08x} ", i * BYTES_PER_LINE);
        for b in line {
            let _ = write!(entry, " {b:02x}");
        }
        for _ in line.len()..BYTES_PER_LINE {
            entry.push_str("   ");
        }
        entry.push_str("  |");
        entry.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        entry.push_str("|\n");
    }
    entry
}
