//! Mux configuration from the `settings` table.

use std::time::Duration;

use rusqlite::Connection;
use warren_db::settings;
use warren_mux::{MuxConfig, TraceConfig};

pub const STREAM_QUIET_MS: &str = "flush.stream_quiet_ms";
pub const STREAM_MAX_MS: &str = "flush.stream_max_ms";
pub const ALT_QUIET_MS: &str = "flush.alt_quiet_ms";
pub const ALT_MAX_MS: &str = "flush.alt_max_ms";
pub const INACTIVE_MULTIPLIER: &str = "flush.inactive_multiplier";
pub const BACKPRESSURE_FACTOR: &str = "flush.backpressure_factor";
pub const BACKPRESSURE_FLOOR_MS: &str = "flush.backpressure_floor_ms";
pub const CHUNK_BYTES: &str = "flush.chunk_bytes";
pub const MONITOR_MAX_WORKERS: &str = "monitor.max_workers";
pub const ATTACHED_LIMIT: &str = "agents.attached_limit";
/// Preset launched for new tabs when none is given on the command line.
pub const DEFAULT_PRESET: &str = "launch.default_preset";

/// Defaults overridden by whatever the settings table holds. Values that do
/// not parse are ignored with a warning.
pub fn load(conn: &Connection) -> MuxConfig {
    let mut cfg = MuxConfig {
        trace: TraceConfig::from_env(),
        ..MuxConfig::default()
    };

    let millis = |key: &str| settings::get_parsed::<u64>(conn, key).map(Duration::from_millis);

    let flush = &mut cfg.flush;
    if let Some(v) = millis(STREAM_QUIET_MS) {
        flush.stream_quiet = v;
    }
    if let Some(v) = millis(STREAM_MAX_MS) {
        flush.stream_max = v;
    }
    if let Some(v) = millis(ALT_QUIET_MS) {
        flush.alt_quiet = v;
    }
    if let Some(v) = millis(ALT_MAX_MS) {
        flush.alt_max = v;
    }
    if let Some(v) = settings::get_parsed::<u32>(conn, INACTIVE_MULTIPLIER) {
        flush.inactive_multiplier = v.max(1);
    }
    if let Some(v) = settings::get_parsed::<usize>(conn, BACKPRESSURE_FACTOR) {
        flush.backpressure_factor = v.max(1);
    }
    if let Some(v) = millis(BACKPRESSURE_FLOOR_MS) {
        flush.backpressure_floor = v;
    }
    if let Some(v) = settings::get_parsed::<usize>(conn, CHUNK_BYTES) {
        flush.chunk_bytes = v.max(1);
    }
    if let Some(v) = settings::get_parsed::<usize>(conn, MONITOR_MAX_WORKERS) {
        cfg.monitor.max_workers = v.max(1);
    }
    // 0 means unlimited.
    if let Some(v) = settings::get_parsed::<usize>(conn, ATTACHED_LIMIT) {
        cfg.attached_agent_limit = (v > 0).then_some(v);
    }
    cfg
}

pub fn default_preset(conn: &Connection) -> String {
    settings::get(conn, DEFAULT_PRESET)
        .ok()
        .flatten()
        .unwrap_or_else(|| "shell".to_string())
}
