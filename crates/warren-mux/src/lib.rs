//! warren-mux: workspaces, tabs and the session plumbing between PTYs and
//! the UI.
//!
//! # Architecture
//!
//! - [`TabRegistry`] — workspaces in opening order, their tab lists and
//!   active indices. Only the UI task touches it.
//! - [`Tab`] — one session surface: a terminal fed by an [`Agent`] or drawn
//!   by a [`Viewer`].
//! - [`SessionReader`] — moves a tab's PTY output to the UI inbox as
//!   [`MuxMsg::Output`] without losing or reordering bytes across restarts.
//! - [`FlushState`] — batches output into terminal writes under quiet and
//!   max-wait deadlines.
//! - [`MonitorPool`] — builds [`TabSnapshot`]s for the monitor grid off the
//!   UI task.
//! - [`Mux`] — the UI-side driver tying the above together.
//!
//! [`Agent`]: warren_pty::Agent

pub mod cancel;
pub mod config;
pub mod error;
pub mod flush;
pub mod kind;
pub mod monitor;
pub mod msg;
pub mod mux;
pub mod reader;
pub mod rebind;
pub mod registry;
pub mod snapshot;
pub mod tab;
pub mod trace;
pub mod viewer;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use config::{FlushConfig, MonitorConfig, MuxConfig, ReaderConfig, TraceConfig};
pub use error::MuxError;
pub use flush::{FlushState, FlushStep};
pub use kind::SessionKind;
pub use monitor::{MonitorPool, MonitorScheduler};
pub use msg::{Inbox, MuxEvent, MuxMsg, SnapshotMap};
pub use mux::Mux;
pub use reader::SessionReader;
pub use registry::TabRegistry;
pub use snapshot::{build_snapshot, TabSnapshot};
pub use tab::{SelectionState, Tab, TabId, TabSource, TabState};
pub use trace::TraceLog;
pub use viewer::{TextViewer, Viewer};
pub use workspace::{Workspace, WorkspaceKey};
