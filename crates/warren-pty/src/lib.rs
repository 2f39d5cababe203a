//! warren-pty: the process side of a Warren session.
//!
//! - [`Agent`]: what the mux needs from a running interactive process
//!   (output reader, input writer, resize, liveness, close).
//! - [`PtyHandle`]: the `portable-pty` implementation of [`Agent`].
//! - [`SpawnSpec`]: program, arguments, working directory and environment.

pub mod agent;
pub mod pty;

pub use agent::{write_all, Agent, SharedWriter};
pub use pty::{default_shell, PtyError, PtyHandle, SpawnSpec};
