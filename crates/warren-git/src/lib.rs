//! warren-git: workspace identity resolution.
//!
//! A workspace is opened by whatever path the user typed. These helpers turn
//! that path into a stable identity (canonical path, git toplevel) and list
//! sibling worktrees. Everything shells out to `git`; failures are returned as
//! `String` errors for the caller to log.

mod command;
pub mod branches;
pub mod identity;
pub mod worktrees;

pub use branches::current_branch;
pub use identity::{git_toplevel, normalize_workspace_path, resolve_git_dir};
pub use worktrees::{list_worktrees, parse_worktree_list, WorktreeInfo};
