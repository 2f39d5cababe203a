//! Snapshots for the monitor grid.
//!
//! The grid shows every tab at once, so snapshots are built off the UI
//! thread by a small pool. [`MonitorScheduler`] decides which tabs to refresh
//! on each tick; [`MonitorPool`] builds them and posts one
//! [`MuxMsg::SnapshotResult`] per batch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::config::MonitorConfig;
use crate::msg::{Inbox, MuxMsg, SnapshotMap};
use crate::snapshot::build_snapshot;
use crate::tab::{Tab, TabId};

/// Refresh tick for a grid of `tabs` tabs.
pub fn tick_interval(tabs: usize) -> Duration {
    let ms = match tabs {
        0..=8 => 33,
        9..=20 => 50,
        21..=40 => 66,
        _ => 80,
    };
    Duration::from_millis(ms)
}

/// How many non-active tabs one tick may refresh.
pub fn batch_size(tabs: usize) -> usize {
    match tabs {
        0..=8 => tabs,
        9..=20 => 4,
        21..=40 => 3,
        _ => 2,
    }
}

/// What the scheduler needs to know about one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabStatus {
    pub id: TabId,
    /// Terminal changed since the last snapshot.
    pub dirty: bool,
    /// When its cached snapshot was built, if there is one.
    pub built_at: Option<Instant>,
}

/// Round-robin selection of tabs to refresh.
#[derive(Debug, Default)]
pub struct MonitorScheduler {
    cursor: usize,
}

impl MonitorScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tab. Used when entering the grid and after a pool restart.
    pub fn full(&mut self, tabs: &[TabStatus]) -> Vec<TabId> {
        self.cursor = 0;
        tabs.iter().map(|t| t.id).collect()
    }

    /// Tabs to refresh this tick: the active tab always, plus up to
    /// [`batch_size`] others that are dirty or older than `refresh_after`,
    /// scanning from a cursor that advances every tick.
    pub fn plan(
        &mut self,
        tabs: &[TabStatus],
        active: Option<TabId>,
        now: Instant,
        refresh_after: Duration,
    ) -> Vec<TabId> {
        let mut targets: Vec<TabId> = active.into_iter().collect();
        let others: Vec<&TabStatus> = tabs.iter().filter(|t| Some(t.id) != active).collect();
        if others.is_empty() {
            return targets;
        }

        let budget = batch_size(tabs.len());
        let start = self.cursor % others.len();
        let mut scanned = 0;
        let mut picked = 0;
        while scanned < others.len() && picked < budget {
            let tab = others[(start + scanned) % others.len()];
            scanned += 1;
            let stale = tab
                .built_at
                .map_or(true, |at| now.saturating_duration_since(at) > refresh_after);
            if tab.dirty || stale {
                targets.push(tab.id);
                picked += 1;
            }
        }
        self.cursor = (start + scanned) % others.len();
        targets
    }
}

/// Bounded pool building snapshots off the UI thread.
pub struct MonitorPool {
    requests: mpsc::Sender<Vec<Arc<Tab>>>,
    cancel: CancelToken,
    heartbeat_ms: Arc<AtomicU64>,
    origin: Instant,
    stall_timeout: Duration,
}

impl MonitorPool {
    /// Spawn the dispatcher. Must be called from within a tokio runtime.
    pub fn start(inbox: Inbox, cfg: &MonitorConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let cancel = CancelToken::new();
        let heartbeat_ms = Arc::new(AtomicU64::new(0));
        let origin = Instant::now();

        let dispatcher = Dispatcher {
            requests: rx,
            inbox,
            cancel: cancel.clone(),
            heartbeat_ms: Arc::clone(&heartbeat_ms),
            origin,
            max_workers: cfg.max_workers,
            heartbeat_interval: cfg.heartbeat_interval,
        };
        tokio::spawn(dispatcher.run());
        cancel.mark_running();

        Self {
            requests: tx,
            cancel,
            heartbeat_ms,
            origin,
            stall_timeout: cfg.stall_timeout,
        }
    }

    /// Queue a batch. Returns `false` if the queue is full or the pool is
    /// gone; the batch is dropped and the next tick asks again.
    pub fn request(&self, targets: Vec<Arc<Tab>>) -> bool {
        match self.requests.try_send(targets) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::trace!("monitor queue full, dropping batch");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn heartbeat_age(&self) -> Duration {
        let beat = self.heartbeat_ms.load(Ordering::Acquire);
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(beat))
    }

    /// The dispatcher has not checked in for longer than the stall timeout.
    pub fn is_stalled(&self) -> bool {
        self.cancel.is_cancelled() || self.heartbeat_age() > self.stall_timeout
    }

    /// Cancel the dispatcher and any batch in progress.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MonitorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Dispatcher {
    requests: mpsc::Receiver<Vec<Arc<Tab>>>,
    inbox: Inbox,
    cancel: CancelToken,
    heartbeat_ms: Arc<AtomicU64>,
    origin: Instant,
    max_workers: usize,
    heartbeat_interval: Duration,
}

impl Dispatcher {
    fn beat(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.heartbeat_ms.store(ms, Ordering::Release);
    }

    async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            self.beat();
            let targets = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = heartbeat.tick() => continue,
                targets = self.requests.recv() => match targets {
                    Some(targets) => targets,
                    None => break,
                },
            };

            let map = build_batch(targets, &self.cancel, self.max_workers).await;
            if self.cancel.is_cancelled() {
                break;
            }
            if self.inbox.send(MuxMsg::SnapshotResult(map)).await.is_err() {
                break;
            }
        }
        log::debug!("monitor pool stopped");
    }
}

/// Build snapshots for `targets` with at most
/// `min(max_workers, available_parallelism, targets)` running at once.
async fn build_batch(targets: Vec<Arc<Tab>>, cancel: &CancelToken, max_workers: usize) -> SnapshotMap {
    let parallelism = std::thread::available_parallelism().map_or(1, |n| n.get());
    let workers = max_workers.min(parallelism).min(targets.len()).max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut builds = JoinSet::new();

    for tab in targets {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        builds.spawn_blocking(move || {
            let _permit = permit;
            build_snapshot(&tab).map(|snapshot| (tab.id(), snapshot))
        });
    }

    let mut map = HashMap::new();
    while let Some(result) = builds.join_next().await {
        match result {
            Ok(Some((id, snapshot))) => {
                map.insert(id, snapshot);
            }
            Ok(None) => {}
            Err(e) => log::warn!("snapshot build failed: {e}"),
        }
    }
    map
}
