//! Background reader for one tab's PTY.
//!
//! PTY reads block, so each tab gets a dedicated OS thread that reads and a
//! tokio task that forwards what it read into the UI inbox. The two are
//! joined by a bounded per-generation channel.
//!
//! A *generation* is one `start`..`stop` span: its own cancellation token,
//! channel and forwarder. Stopping cancels the generation; the thread notices
//! on its next loop turn. If a newer generation was started in the meantime
//! the same thread simply adopts it, otherwise it parks its PTY reader (plus
//! any chunk it could not deliver) for the next `start`. At most one thread
//! ever reads a given tab, and a restart never drops or reorders bytes.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use warren_pty::Agent;

use crate::cancel::CancelToken;
use crate::config::ReaderConfig;
use crate::error::MuxError;
use crate::msg::{Inbox, MuxMsg};
use crate::tab::TabId;
use crate::workspace::WorkspaceKey;

/// Reader liveness for one tab.
pub struct SessionReader {
    shared: Arc<Shared>,
}

struct Shared {
    control: Mutex<Control>,
    /// Milliseconds since `origin` at the last read attempt.
    heartbeat_ms: AtomicU64,
    /// Output was read since the last `start`.
    produced: AtomicBool,
    origin: Instant,
}

#[derive(Default)]
struct Control {
    current: Option<Generation>,
    next_generation: u64,
    thread_alive: bool,
    parked: Option<Parked>,
    /// Done signal of the most recent forwarder; the next one waits for it.
    last_forwarder: Option<oneshot::Receiver<()>>,
    starts: u32,
    last_start: Option<Instant>,
}

#[derive(Clone)]
struct Generation {
    id: u64,
    cancel: CancelToken,
    tx: mpsc::Sender<MuxMsg>,
    workspace: WorkspaceKey,
}

impl Generation {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// A PTY reader waiting for the next generation.
struct Parked {
    source: Box<dyn Read + Send>,
    pending: Option<Vec<u8>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn beat(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.heartbeat_ms.store(ms, Ordering::Release);
    }
}

impl SessionReader {
    pub fn new() -> Self {
        let shared = Shared {
            control: Mutex::new(Control::default()),
            heartbeat_ms: AtomicU64::new(0),
            produced: AtomicBool::new(false),
            origin: Instant::now(),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// A generation is running.
    pub fn is_active(&self) -> bool {
        self.shared
            .lock()
            .current
            .as_ref()
            .is_some_and(|g| g.cancel.is_running())
    }

    /// Time since the read loop last started a read.
    pub fn heartbeat_age(&self) -> Duration {
        let beat = self.shared.heartbeat_ms.load(Ordering::Acquire);
        let now = self.shared.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(beat))
    }

    /// Consecutive restarts without output in between. A generation that
    /// delivered output resets the count at the next start.
    pub fn restart_count(&self) -> u32 {
        self.shared.lock().starts.saturating_sub(1)
    }

    /// When the reader was last (re)started.
    pub fn last_start(&self) -> Option<Instant> {
        self.shared.lock().last_start
    }

    /// Start reading `agent`'s output for `tab`, posting to `inbox` under
    /// `workspace`.
    ///
    /// Returns `Ok(false)` without doing anything if a generation is already
    /// running. Must be called from within a tokio runtime.
    pub fn start(
        &self,
        tab: TabId,
        workspace: WorkspaceKey,
        agent: &dyn Agent,
        inbox: &Inbox,
        cfg: &ReaderConfig,
    ) -> Result<bool, MuxError> {
        let mut control = self.shared.lock();
        if control.current.as_ref().is_some_and(Generation::is_live) {
            return Ok(false);
        }

        control.next_generation += 1;
        let (tx, rx) = mpsc::channel(cfg.channel_capacity.max(1));
        let generation = Generation {
            id: control.next_generation,
            cancel: CancelToken::new(),
            tx,
            workspace,
        };

        // A still-running thread adopts the new generation on its own.
        if !control.thread_alive {
            let parked = match control.parked.take() {
                Some(parked) => parked,
                None => Parked {
                    source: agent.clone_reader()?,
                    pending: None,
                },
            };
            let read_loop = ReadLoop {
                shared: Arc::clone(&self.shared),
                tab,
                generation: generation.clone(),
                source: Some(parked.source),
                pending: parked.pending,
                cfg: cfg.clone(),
            };
            std::thread::Builder::new()
                .name(format!("warren-reader-{tab}"))
                .spawn(move || read_loop.run())
                .map_err(|source| MuxError::ReaderStart { tab, source })?;
            control.thread_alive = true;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let previous = control.last_forwarder.replace(done_rx);
        tokio::spawn(forward(
            rx,
            inbox.clone(),
            generation.cancel.clone(),
            previous,
            done_tx,
        ));

        generation.cancel.mark_running();
        self.shared.beat();
        if self.shared.produced.swap(false, Ordering::AcqRel) {
            control.starts = 0;
        }
        control.starts += 1;
        control.last_start = Some(Instant::now());
        log::debug!("tab {tab}: reader generation {} started", generation.id);
        control.current = Some(generation);
        Ok(true)
    }

    /// Cancel the running generation, if any. Returns whether one was running.
    pub fn stop(&self) -> bool {
        let current = self.shared.lock().current.take();
        match current {
            Some(generation) => generation.cancel.cancel(),
            None => false,
        }
    }
}

impl Default for SessionReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Move messages from one generation's channel to the inbox.
///
/// Starts only after the previous generation's forwarder finished, so the
/// inbox sees each tab's messages in read order. On cancellation the channel
/// is closed and whatever is already in it is still delivered.
async fn forward(
    mut rx: mpsc::Receiver<MuxMsg>,
    inbox: Inbox,
    cancel: CancelToken,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    loop {
        let msg = tokio::select! {
            biased;
            msg = rx.recv() => msg,
            _ = cancel.cancelled() => {
                rx.close();
                while let Some(msg) = rx.recv().await {
                    if inbox.send(msg).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        let Some(msg) = msg else {
            break;
        };
        if inbox.send(msg).await.is_err() {
            // UI is gone; stop the generation so the thread parks.
            cancel.cancel();
            break;
        }
    }

    let _ = done.send(());
}

/// The blocking read loop, run on the reader thread.
struct ReadLoop {
    shared: Arc<Shared>,
    tab: TabId,
    generation: Generation,
    /// Always `Some` while the loop runs; moved out when parking.
    source: Option<Box<dyn Read + Send>>,
    /// A chunk read but not yet delivered.
    pending: Option<Vec<u8>>,
    cfg: ReaderConfig,
}

impl ReadLoop {
    fn run(mut self) {
        let mut buf = vec![0u8; self.cfg.read_chunk.max(1)];
        let mut idle = self.cfg.idle_backoff_min;

        loop {
            if !self.generation.is_live() {
                if self.handoff() {
                    continue;
                }
                return;
            }

            if let Some(bytes) = self.pending.take() {
                let msg = MuxMsg::Output {
                    workspace: self.generation.workspace.clone(),
                    tab: self.tab,
                    bytes,
                };
                if let Err(mpsc::error::SendError(msg)) = self.generation.tx.blocking_send(msg) {
                    if let MuxMsg::Output { bytes, .. } = msg {
                        self.pending = Some(bytes);
                    }
                    if !self.handoff() {
                        return;
                    }
                }
                continue;
            }

            self.shared.beat();
            let Some(source) = self.source.as_mut() else {
                return;
            };
            match source.read(&mut buf) {
                Ok(0) => {
                    let tick = MuxMsg::Tick {
                        workspace: self.generation.workspace.clone(),
                        tab: self.tab,
                    };
                    if self.generation.tx.blocking_send(tick).is_err() {
                        if !self.handoff() {
                            return;
                        }
                        continue;
                    }
                    std::thread::sleep(idle);
                    idle = (idle * 2).min(self.cfg.idle_backoff_max);
                }
                Ok(n) => {
                    idle = self.cfg.idle_backoff_min;
                    self.shared.produced.store(true, Ordering::Release);
                    self.pending = Some(buf[..n].to_vec());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.stopped(e);
                    return;
                }
            }
        }
    }

    /// Our generation is over. Adopt a newer live one (returns `true`) or
    /// park the source and exit (returns `false`).
    fn handoff(&mut self) -> bool {
        self.generation.cancel.cancel();
        let mut control = self.shared.lock();

        if let Some(next) = control.current.as_ref().filter(|g| g.is_live()) {
            if next.id != self.generation.id {
                log::debug!(
                    "tab {}: reader thread moves to generation {}",
                    self.tab,
                    next.id
                );
                self.generation = next.clone();
                return true;
            }
        }

        if control.current.as_ref().is_some_and(|g| g.id == self.generation.id) {
            control.current = None;
        }
        if let Some(source) = self.source.take() {
            control.parked = Some(Parked {
                source,
                pending: self.pending.take(),
            });
        }
        control.thread_alive = false;
        log::debug!("tab {}: reader parked", self.tab);
        false
    }

    /// The PTY failed. Report it on the newest live generation and retire
    /// the thread without parking: the source is unusable.
    fn stopped(&mut self, err: io::Error) {
        log::debug!("tab {}: PTY read failed: {err}", self.tab);
        let mut control = self.shared.lock();
        if let Some(next) = control.current.as_ref().filter(|g| g.is_live()) {
            self.generation = next.clone();
        }
        control.thread_alive = false;
        if control.current.as_ref().is_some_and(|g| g.id == self.generation.id) {
            control.current = None;
        }
        drop(control);

        let msg = MuxMsg::Stopped {
            workspace: self.generation.workspace.clone(),
            tab: self.tab,
            err: Some(err.to_string()),
        };
        let _ = self.generation.tx.blocking_send(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Feed, ScriptedAgent};
    use std::sync::atomic::Ordering;

    fn cfg() -> ReaderConfig {
        ReaderConfig::default()
    }

    fn key() -> WorkspaceKey {
        WorkspaceKey::from("/w")
    }

    async fn recv(rx: &mut mpsc::Receiver<MuxMsg>) -> MuxMsg {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("inbox closed")
    }

    /// Collect output until `expected` bytes arrived.
    async fn collect_output(rx: &mut mpsc::Receiver<MuxMsg>, expected: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < expected {
            if let MuxMsg::Output { bytes, .. } = recv(rx).await {
                out.extend_from_slice(&bytes);
            }
        }
        out
    }

    fn setup() -> (SessionReader, ScriptedAgent, Feed, Inbox, mpsc::Receiver<MuxMsg>) {
        let (agent, feed) = ScriptedAgent::new();
        let (tx, rx) = mpsc::channel(256);
        (SessionReader::new(), agent, feed, tx, rx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forwards_output_in_order() {
        let (reader, agent, feed, inbox, mut rx) = setup();
        assert!(reader.start(1, key(), &agent, &inbox, &cfg()).unwrap());

        feed.send(b"hello ");
        feed.send(b"world");
        assert_eq!(collect_output(&mut rx, 11).await, b"hello world");
        assert!(reader.is_active());
        reader.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_is_idempotent() {
        let (reader, agent, feed, inbox, mut rx) = setup();
        let readers = agent.reader_count();

        assert!(reader.start(1, key(), &agent, &inbox, &cfg()).unwrap());
        for _ in 0..5 {
            assert!(!reader.start(1, key(), &agent, &inbox, &cfg()).unwrap());
        }
        assert_eq!(readers.load(Ordering::SeqCst), 1);

        // Only one thread reads, so every byte arrives exactly once.
        feed.send(b"once");
        assert_eq!(collect_output(&mut rx, 4).await, b"once");
        assert!(rx.try_recv().is_err());
        reader.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_large_chunks_are_split() {
        let (reader, agent, feed, inbox, mut rx) = setup();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();

        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        feed.send(&data);

        let mut chunks = 0;
        let mut out = Vec::new();
        while out.len() < data.len() {
            if let MuxMsg::Output { bytes, .. } = recv(&mut rx).await {
                assert!(bytes.len() <= 4096);
                out.extend_from_slice(&bytes);
                chunks += 1;
            }
        }
        assert_eq!(out, data);
        assert!(chunks >= 3);
        reader.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_read_emits_tick() {
        let (reader, agent, feed, inbox, mut rx) = setup();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();

        feed.empty();
        assert!(matches!(recv(&mut rx).await, MuxMsg::Tick { tab: 1, .. }));
        feed.send(b"x");
        assert_eq!(collect_output(&mut rx, 1).await, b"x");
        reader.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_error_emits_stopped_and_retires() {
        let (reader, agent, feed, inbox, mut rx) = setup();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();

        feed.fail();
        match recv(&mut rx).await {
            MuxMsg::Stopped { tab, err, .. } => {
                assert_eq!(tab, 1);
                assert!(err.unwrap().contains("scripted failure"));
            }
            other => panic!("expected Stopped, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_preserves_order_and_bytes() {
        let (reader, agent, feed, inbox, mut rx) = setup();
        let readers = agent.reader_count();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();

        feed.send(b"a1");
        assert_eq!(collect_output(&mut rx, 2).await, b"a1");

        // Restart repeatedly while bytes keep arriving.
        let mut expected = b"a1".to_vec();
        let mut received = expected.clone();
        for i in 0..5u8 {
            let chunk = [b'b', b'0' + i];
            feed.send(&chunk);
            expected.extend_from_slice(&chunk);
            reader.stop();
            reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();
        }
        received.extend(collect_output(&mut rx, expected.len() - 2).await);

        assert_eq!(received, expected);
        // The same PTY reader was reused throughout.
        assert_eq!(readers.load(Ordering::SeqCst), 1);
        reader.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_output_uses_workspace_of_current_generation() {
        let (reader, agent, feed, inbox, mut rx) = setup();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();
        reader.stop();
        reader
            .start(1, WorkspaceKey::from("/w2"), &agent, &inbox, &cfg())
            .unwrap();

        feed.send(b"z");
        match recv(&mut rx).await {
            MuxMsg::Output { workspace, bytes, .. } => {
                assert_eq!(workspace, WorkspaceKey::from("/w2"));
                assert_eq!(bytes, b"z");
            }
            other => panic!("expected Output, got {other:?}"),
        }
        reader.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_without_start() {
        let reader = SessionReader::new();
        assert!(!reader.stop());
        assert!(!reader.is_active());
        assert_eq!(reader.restart_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_count_and_heartbeat() {
        let (reader, agent, _feed, inbox, _rx) = setup();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();
        reader.stop();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();
        assert_eq!(reader.restart_count(), 1);
        assert!(reader.heartbeat_age() < Duration::from_secs(5));
        assert!(reader.last_start().is_some());
        reader.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_output_resets_restart_count() {
        let (reader, agent, feed, inbox, mut rx) = setup();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();
        for _ in 0..3 {
            reader.stop();
            reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();
        }
        assert_eq!(reader.restart_count(), 3);

        feed.send(b"alive");
        assert_eq!(collect_output(&mut rx, 5).await, b"alive");
        reader.stop();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();
        assert_eq!(reader.restart_count(), 0);

        // Idle restarts count up again from there.
        reader.stop();
        reader.start(1, key(), &agent, &inbox, &cfg()).unwrap();
        assert_eq!(reader.restart_count(), 1);
        assert!(reader.is_active());
        reader.stop();
        assert!(!reader.is_active());
    }
}
