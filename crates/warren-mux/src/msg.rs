//! Messages into the UI loop, and events out of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::snapshot::TabSnapshot;
use crate::tab::TabId;
use crate::workspace::WorkspaceKey;

pub type SnapshotMap = HashMap<TabId, Arc<TabSnapshot>>;

/// Everything that reaches the UI loop from background work.
///
/// Workers never touch the registry; they post one of these. The workspace
/// key is the one the sender was started under and may be stale after a
/// rebind, so handlers resolve tabs by ID.
#[derive(Debug)]
pub enum MuxMsg {
    /// Bytes read from a tab's PTY, in read order.
    Output {
        workspace: WorkspaceKey,
        tab: TabId,
        bytes: Vec<u8>,
    },
    /// A tab's flush timer fired.
    Flush { workspace: WorkspaceKey, tab: TabId },
    /// The PTY returned an empty read.
    Tick { workspace: WorkspaceKey, tab: TabId },
    /// The reader exited, with the read error if there was one.
    Stopped {
        workspace: WorkspaceKey,
        tab: TabId,
        err: Option<String>,
    },
    /// Monitor refresh timer.
    SnapshotTick,
    /// One completed batch of monitor snapshots.
    SnapshotResult(SnapshotMap),
}

/// Sending half of the UI inbox.
pub type Inbox = mpsc::Sender<MuxMsg>;

/// Post `msg` to the inbox after `delay`. Dropped silently if the inbox has
/// closed by then.
pub fn post_after(inbox: &Inbox, delay: Duration, msg: MuxMsg) {
    let inbox = inbox.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = inbox.send(msg).await;
    });
}

/// What the UI loop reports to the frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    /// A user-facing failure. `context` says what was being attempted.
    Error { context: String, cause: String },
    TabCreated { workspace: WorkspaceKey, tab: TabId },
    TabClosed { workspace: WorkspaceKey, tab: TabId },
    /// The tab's process exited or its reader stopped.
    TabExited { tab: TabId, code: Option<u32> },
    TitleChanged { tab: TabId, title: String },
    Bell { tab: TabId },
    /// Limit enforcement detached this tab.
    Detached { tab: TabId },
    /// Something visible changed.
    Redraw,
}
