//! Adaptive output batching.
//!
//! PTY output is buffered per tab and applied to the terminal once the
//! stream goes quiet or the buffer has waited long enough. Batching keeps
//! half-received escape sequences off screen and bounds how often large
//! outputs re-parse.
//!
//! Per tab the cycle is `Idle -> Scheduled -> Flushing -> Idle`:
//! [`FlushState::on_output`] arms a timer, [`FlushState::on_flush`] decides
//! on each firing whether to wait or write a chunk, and
//! [`FlushState::after_write`] re-arms a short follow-up while bytes remain.
//! Everything here is a pure function of `Instant`s so the timeline is
//! testable.

use std::time::{Duration, Instant};

use crate::config::FlushConfig;

/// Effective quiet and max periods for one tab at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub quiet: Duration,
    pub max: Duration,
}

/// How a tab is displayed, as far as batching cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushMode {
    /// A full-screen program is on the alternate screen.
    pub alt_screen: bool,
    /// The tab is on screen (active tab or shown in the monitor grid).
    pub visible: bool,
}

/// Compute the thresholds for a tab.
///
/// Alt-screen programs redraw in bursts and get the longer pair. Tabs that
/// are not visible multiply both. Once more than `backpressure_factor`
/// screens worth of bytes are pending, neither threshold may drop below
/// `backpressure_floor`.
pub fn thresholds(
    cfg: &FlushConfig,
    mode: FlushMode,
    pending_len: usize,
    cols: u16,
    rows: u16,
) -> Thresholds {
    let (mut quiet, mut max) = if mode.alt_screen {
        (cfg.alt_quiet, cfg.alt_max)
    } else {
        (cfg.stream_quiet, cfg.stream_max)
    };

    if !mode.visible {
        quiet *= cfg.inactive_multiplier;
        max *= cfg.inactive_multiplier;
    }

    let limit = cfg
        .backpressure_factor
        .saturating_mul(cols as usize)
        .saturating_mul(rows as usize);
    if pending_len > limit {
        quiet = quiet.max(cfg.backpressure_floor);
        max = max.max(cfg.backpressure_floor);
    }

    Thresholds { quiet, max }
}

/// What to do when a flush timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStep {
    /// Nothing pending; the tab is idle again.
    Idle,
    /// Still inside the quiet window. Re-arm the timer for this long.
    Wait(Duration),
    /// Apply this many bytes from the front of the pending buffer.
    Write(usize),
}

/// Per-tab scheduling timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushState {
    scheduled: bool,
    buffer_started: Option<Instant>,
    last_byte: Option<Instant>,
}

impl FlushState {
    /// A flush timer is armed.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn buffer_started(&self) -> Option<Instant> {
        self.buffer_started
    }

    /// Record bytes arriving at `now`.
    ///
    /// Returns the delay of a timer to arm, or `None` if one is already
    /// pending.
    pub fn on_output(&mut self, now: Instant, thresholds: Thresholds) -> Option<Duration> {
        self.last_byte = Some(now);
        self.buffer_started.get_or_insert(now);
        if self.scheduled {
            return None;
        }
        self.scheduled = true;
        Some(thresholds.quiet)
    }

    /// Decide what a firing timer does.
    pub fn on_flush(
        &mut self,
        now: Instant,
        pending_len: usize,
        thresholds: Thresholds,
        cfg: &FlushConfig,
    ) -> FlushStep {
        if pending_len == 0 {
            self.reset();
            return FlushStep::Idle;
        }

        let since_last = self.last_byte.map_or(Duration::MAX, |t| now.saturating_duration_since(t));
        let since_start = self
            .buffer_started
            .map_or(Duration::MAX, |t| now.saturating_duration_since(t));

        if since_last < thresholds.quiet && since_start < thresholds.max {
            self.scheduled = true;
            return FlushStep::Wait((thresholds.quiet - since_last).max(cfg.min_delay));
        }

        FlushStep::Write(pending_len.min(cfg.chunk_bytes))
    }

    /// Bookkeeping after a chunk was written. Returns the follow-up delay if
    /// `remaining` bytes are still pending.
    pub fn after_write(&mut self, remaining: usize, cfg: &FlushConfig) -> Option<Duration> {
        if remaining > 0 {
            self.scheduled = true;
            return Some(cfg.follow_up);
        }
        self.reset();
        None
    }

    /// Forget everything, e.g. after the pending buffer was discarded.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: FlushMode = FlushMode {
        alt_screen: false,
        visible: true,
    };

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_thresholds_by_mode() {
        let cfg = FlushConfig::default();
        assert_eq!(
            thresholds(&cfg, STREAM, 10, 80, 24),
            Thresholds { quiet: ms(4), max: ms(16) }
        );
        let alt = FlushMode { alt_screen: true, visible: true };
        assert_eq!(
            thresholds(&cfg, alt, 10, 80, 24),
            Thresholds { quiet: ms(8), max: ms(32) }
        );
    }

    #[test]
    fn test_inactive_tabs_use_four_times_thresholds() {
        let cfg = FlushConfig::default();
        let hidden = FlushMode { alt_screen: false, visible: false };
        assert_eq!(
            thresholds(&cfg, hidden, 10, 80, 24),
            Thresholds { quiet: ms(16), max: ms(64) }
        );
        let hidden_alt = FlushMode { alt_screen: true, visible: false };
        assert_eq!(
            thresholds(&cfg, hidden_alt, 10, 80, 24),
            Thresholds { quiet: ms(32), max: ms(128) }
        );
    }

    #[test]
    fn test_backpressure_floor() {
        let cfg = FlushConfig::default();
        let limit = 8 * 80 * 24;

        // At the limit: not yet backpressure.
        assert_eq!(thresholds(&cfg, STREAM, limit, 80, 24).quiet, ms(4));

        let t = thresholds(&cfg, STREAM, limit + 1, 80, 24);
        assert_eq!(t, Thresholds { quiet: ms(32), max: ms(32) });

        // Larger thresholds are left alone.
        let hidden = FlushMode { alt_screen: true, visible: false };
        let t = thresholds(&cfg, hidden, limit + 1, 80, 24);
        assert_eq!(t, Thresholds { quiet: ms(32), max: ms(128) });
    }

    #[test]
    fn test_backpressure_never_below_floor_for_any_mode() {
        let cfg = FlushConfig::default();
        for alt_screen in [false, true] {
            for visible in [false, true] {
                let t = thresholds(&cfg, FlushMode { alt_screen, visible }, 1_000_000, 80, 24);
                assert!(t.quiet >= ms(32) && t.max >= ms(32), "{t:?}");
            }
        }
    }

    #[test]
    fn test_debounce_timeline() {
        // Bytes at t=0 and t=2ms; a check at t=5ms waits, one at t=7ms writes.
        let cfg = FlushConfig::default();
        let thr = Thresholds { quiet: ms(4), max: ms(16) };
        let t0 = Instant::now();
        let mut state = FlushState::default();

        assert_eq!(state.on_output(t0, thr), Some(ms(4)));
        assert_eq!(state.on_output(t0 + ms(2), thr), None);
        assert!(state.is_scheduled());

        assert_eq!(state.on_flush(t0 + ms(5), 10, thr, &cfg), FlushStep::Wait(ms(1)));
        assert_eq!(state.on_flush(t0 + ms(7), 10, thr, &cfg), FlushStep::Write(10));

        assert_eq!(state.after_write(0, &cfg), None);
        assert!(!state.is_scheduled());
        assert_eq!(state.buffer_started(), None);
    }

    #[test]
    fn test_wait_reports_remaining_quiet() {
        let cfg = FlushConfig::default();
        let thr = Thresholds { quiet: ms(4), max: ms(16) };
        let t0 = Instant::now();
        let mut state = FlushState::default();
        state.on_output(t0, thr);
        assert_eq!(state.on_flush(t0 + ms(1), 1, thr, &cfg), FlushStep::Wait(ms(3)));
    }

    #[test]
    fn test_max_forces_flush_during_continuous_stream() {
        let cfg = FlushConfig::default();
        let thr = Thresholds { quiet: ms(4), max: ms(16) };
        let t0 = Instant::now();
        let mut state = FlushState::default();

        // A byte every 2ms never leaves a quiet gap.
        let mut flushed_at = None;
        for step in 0..20u64 {
            let now = t0 + ms(step * 2);
            state.on_output(now, thr);
            if let FlushStep::Write(_) = state.on_flush(now + ms(1), 100, thr, &cfg) {
                flushed_at = Some(step * 2 + 1);
                break;
            }
        }
        let flushed_at = flushed_at.expect("max threshold never forced a flush");
        assert!(flushed_at >= 16, "flushed too early at {flushed_at}ms");
    }

    #[test]
    fn test_no_flush_before_quiet_unless_max() {
        let cfg = FlushConfig::default();
        let thr = Thresholds { quiet: ms(4), max: ms(16) };
        let t0 = Instant::now();
        for last in 0..16u64 {
            for check in last..last + 4 {
                let mut state = FlushState::default();
                state.on_output(t0, thr);
                state.on_output(t0 + ms(last), thr);
                let step = state.on_flush(t0 + ms(check), 1, thr, &cfg);
                if check < 16 {
                    assert!(matches!(step, FlushStep::Wait(_)), "last={last} check={check}");
                }
            }
        }
    }

    #[test]
    fn test_large_buffer_is_chunked() {
        let cfg = FlushConfig::default();
        let thr = Thresholds { quiet: ms(4), max: ms(16) };
        let t0 = Instant::now();
        let mut state = FlushState::default();
        state.on_output(t0, thr);

        let pending = 100_000;
        assert_eq!(state.on_flush(t0 + ms(10), pending, thr, &cfg), FlushStep::Write(32 * 1024));
        assert_eq!(state.after_write(pending - 32 * 1024, &cfg), Some(ms(1)));
        assert!(state.is_scheduled());
        // The buffer start is kept, so follow-ups are not held back by max.
        assert_eq!(state.buffer_started(), Some(t0));
    }

    #[test]
    fn test_flush_with_nothing_pending_goes_idle() {
        let cfg = FlushConfig::default();
        let thr = Thresholds { quiet: ms(4), max: ms(16) };
        let mut state = FlushState::default();
        state.on_output(Instant::now(), thr);
        assert_eq!(state.on_flush(Instant::now(), 0, thr, &cfg), FlushStep::Idle);
        assert_eq!(state, FlushState::default());
    }
}
