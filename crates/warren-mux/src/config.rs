use std::path::PathBuf;
use std::time::Duration;

/// Output batching thresholds. See [`crate::flush`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlushConfig {
    /// Quiet period for plain streaming output.
    pub stream_quiet: Duration,
    /// Longest a streaming buffer may wait before it is flushed anyway.
    pub stream_max: Duration,
    /// Quiet period while a full-screen program owns the alternate screen.
    pub alt_quiet: Duration,
    pub alt_max: Duration,
    /// Applied to both thresholds for tabs that are not on screen.
    pub inactive_multiplier: u32,
    /// Backpressure kicks in once pending bytes exceed this many screens
    /// (`factor * cols * rows`).
    pub backpressure_factor: usize,
    /// Lower bound for both thresholds under backpressure.
    pub backpressure_floor: Duration,
    /// Most bytes applied to the terminal per flush.
    pub chunk_bytes: usize,
    /// Delay of the follow-up flush when bytes remain after a chunk.
    pub follow_up: Duration,
    /// Shortest reschedule delay.
    pub min_delay: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            stream_quiet: Duration::from_millis(4),
            stream_max: Duration::from_millis(16),
            alt_quiet: Duration::from_millis(8),
            alt_max: Duration::from_millis(32),
            inactive_multiplier: 4,
            backpressure_factor: 8,
            backpressure_floor: Duration::from_millis(32),
            chunk_bytes: 32 * 1024,
            follow_up: Duration::from_millis(1),
            min_delay: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Size of each PTY read.
    pub read_chunk: usize,
    /// Capacity of the per-generation channel between thread and forwarder.
    pub channel_capacity: usize,
    /// Backoff after an empty read, doubling up to `idle_backoff_max`.
    pub idle_backoff_min: Duration,
    pub idle_backoff_max: Duration,
    /// A heartbeat older than this marks the reader as stalled.
    pub stall_timeout: Duration,
    /// Minimum spacing of watchdog restarts, doubled per restart up to
    /// `restart_backoff_max`.
    pub restart_backoff: Duration,
    pub restart_backoff_max: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_chunk: 4096,
            channel_capacity: 64,
            idle_backoff_min: Duration::from_millis(1),
            idle_backoff_max: Duration::from_millis(50),
            stall_timeout: Duration::from_secs(10),
            restart_backoff: Duration::from_secs(1),
            restart_backoff_max: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Upper bound on concurrent snapshot builds.
    pub max_workers: usize,
    /// Capacity of the request queue. Requests beyond it are dropped.
    pub queue_capacity: usize,
    /// Snapshots older than this are rebuilt even if the tab is not dirty.
    pub refresh_after: Duration,
    /// How often the dispatcher refreshes its heartbeat while idle.
    pub heartbeat_interval: Duration,
    /// A dispatcher heartbeat older than this restarts the pool.
    pub stall_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_capacity: 8,
            refresh_after: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(1),
            stall_timeout: Duration::from_secs(10),
        }
    }
}

/// Debug trace of raw PTY output.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceConfig {
    /// Session kinds to trace, by [`SessionKind::as_str`](crate::SessionKind::as_str).
    pub kinds: Vec<String>,
    pub dir: PathBuf,
    /// Total bytes written per trace file before tracing stops.
    pub max_bytes: u64,
}

/// Lists session kinds to trace, comma or space separated.
pub const TRACE_KINDS_ENV: &str = "WARREN_TRACE_KINDS";
/// Directory for trace files. Defaults to the system temp dir.
pub const TRACE_DIR_ENV: &str = "WARREN_TRACE_DIR";

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            dir: std::env::temp_dir(),
            max_bytes: 256 * 1024,
        }
    }
}

impl TraceConfig {
    pub fn from_env() -> Self {
        let kinds = std::env::var(TRACE_KINDS_ENV).unwrap_or_default();
        let dir = std::env::var_os(TRACE_DIR_ENV).map(PathBuf::from);
        Self::parse(&kinds, dir)
    }

    fn parse(kinds: &str, dir: Option<PathBuf>) -> Self {
        let defaults = Self::default();
        Self {
            kinds: kinds
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|k| !k.is_empty())
                .map(|k| k.to_ascii_lowercase())
                .collect(),
            dir: dir.unwrap_or(defaults.dir),
            max_bytes: defaults.max_bytes,
        }
    }

    pub fn enabled_for(&self, kind: &str) -> bool {
        self.kinds.iter().any(|k| k == kind)
    }
}

/// Everything tunable about the mux.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxConfig {
    pub flush: FlushConfig,
    pub reader: ReaderConfig,
    pub monitor: MonitorConfig,
    pub trace: TraceConfig,
    /// Most agents allowed to stay attached at once. `None` is unlimited.
    pub attached_agent_limit: Option<usize>,
    /// Capacity of the UI inbox.
    pub inbox_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            flush: FlushConfig::default(),
            reader: ReaderConfig::default(),
            monitor: MonitorConfig::default(),
            trace: TraceConfig::default(),
            attached_agent_limit: None,
            inbox_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_defaults() {
        let cfg = FlushConfig::default();
        assert_eq!(cfg.stream_quiet, Duration::from_millis(4));
        assert_eq!(cfg.stream_max, Duration::from_millis(16));
        assert_eq!(cfg.alt_quiet, Duration::from_millis(8));
        assert_eq!(cfg.alt_max, Duration::from_millis(32));
        assert_eq!(cfg.chunk_bytes, 32_768);
    }

    #[test]
    fn test_trace_parse() {
        let cfg = TraceConfig::parse("Claude, codex shell", Some(PathBuf::from("/tmp/t")));
        assert_eq!(cfg.kinds, ["claude", "codex", "shell"]);
        assert!(cfg.enabled_for("codex"));
        assert!(!cfg.enabled_for("other"));
        assert_eq!(cfg.dir, PathBuf::from("/tmp/t"));
        assert_eq!(cfg.max_bytes, 256 * 1024);
    }

    #[test]
    fn test_trace_parse_empty() {
        let cfg = TraceConfig::parse("", None);
        assert!(cfg.kinds.is_empty());
        assert_eq!(cfg.dir, std::env::temp_dir());
    }

    #[test]
    fn test_mux_config_default() {
        let cfg = MuxConfig::default();
        assert!(cfg.inbox_capacity > 0);
        assert_eq!(cfg.attached_agent_limit, None);
        assert!(cfg.trace.kinds.is_empty());
    }
}
