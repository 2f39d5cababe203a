//! Workspaces, their ordered tabs, and which tab is active in each.
//!
//! The registry is owned by the UI loop and is the only owner of `Tab`s.
//! It does no I/O of its own beyond stopping readers and closing agents;
//! starting readers is left to the caller, which holds the inbox.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::MuxError;
use crate::kind::SessionKind;
use crate::tab::{Tab, TabId, TabSource};
use crate::workspace::{Workspace, WorkspaceKey};

pub struct TabRegistry {
    pub(crate) workspaces: HashMap<WorkspaceKey, Arc<Workspace>>,
    /// Workspace order as opened, for cycling.
    pub(crate) order: Vec<WorkspaceKey>,
    pub(crate) tabs: HashMap<WorkspaceKey, Vec<Arc<Tab>>>,
    /// Always within `[0, len)` of the matching list; absent when the list is
    /// empty or missing.
    pub(crate) active: HashMap<WorkspaceKey, usize>,
    pub(crate) selected: Option<WorkspaceKey>,
    next_id: TabId,
    viewport: (u16, u16),
}

impl TabRegistry {
    /// An empty registry whose new terminals are `cols` x `rows`.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            workspaces: HashMap::new(),
            order: Vec::new(),
            tabs: HashMap::new(),
            active: HashMap::new(),
            selected: None,
            next_id: 1,
            viewport: (cols, rows),
        }
    }

    /// Allocate a tab ID. IDs are never reused.
    pub fn next_tab_id(&mut self) -> TabId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn viewport(&self) -> (u16, u16) {
        self.viewport
    }

    pub fn set_viewport(&mut self, cols: u16, rows: u16) {
        self.viewport = (cols.max(1), rows.max(1));
    }

    /// Register a workspace. Selects it if nothing is selected yet.
    pub fn add_workspace(&mut self, workspace: Workspace) -> Arc<Workspace> {
        let key = workspace.key.clone();
        if let Some(existing) = self.workspaces.get(&key) {
            return Arc::clone(existing);
        }
        let workspace = Arc::new(workspace);
        self.workspaces.insert(key.clone(), Arc::clone(&workspace));
        self.order.push(key.clone());
        if self.selected.is_none() {
            self.selected = Some(key);
        }
        workspace
    }

    /// Replace a workspace's record in place, keeping its key, tabs and
    /// position. Tabs are repointed at the new record. Returns `false` for
    /// unknown keys.
    pub fn refresh_workspace(&mut self, workspace: Workspace) -> bool {
        let Some(slot) = self.workspaces.get_mut(&workspace.key) else {
            return false;
        };
        let workspace = Arc::new(workspace);
        *slot = Arc::clone(&workspace);
        for tab in self.tabs.get(&workspace.key).into_iter().flatten() {
            tab.lock().workspace = Arc::downgrade(&workspace);
        }
        true
    }

    pub fn workspace(&self, key: &WorkspaceKey) -> Option<&Arc<Workspace>> {
        self.workspaces.get(key)
    }

    /// Workspace keys in the order they were opened.
    pub fn workspace_keys(&self) -> &[WorkspaceKey] {
        &self.order
    }

    pub fn selected(&self) -> Option<&WorkspaceKey> {
        self.selected.as_ref()
    }

    pub fn select_workspace(&mut self, key: &WorkspaceKey) -> Result<(), MuxError> {
        if !self.workspaces.contains_key(key) {
            return Err(MuxError::WorkspaceNotFound(key.clone()));
        }
        self.selected = Some(key.clone());
        Ok(())
    }

    /// Select the next (`step = 1`) or previous (`step = -1`) workspace.
    pub fn cycle_workspace(&mut self, step: isize) -> Option<&WorkspaceKey> {
        if self.order.is_empty() {
            return None;
        }
        let len = self.order.len() as isize;
        let current = self
            .selected
            .as_ref()
            .and_then(|key| self.order.iter().position(|k| k == key))
            .unwrap_or(0) as isize;
        let next = (current + step).rem_euclid(len) as usize;
        self.selected = Some(self.order[next].clone());
        self.selected.as_ref()
    }

    /// Create a tab in `workspace`, append it and make it active.
    ///
    /// The caller starts the reader for agent tabs.
    pub fn create_tab(
        &mut self,
        workspace: &WorkspaceKey,
        kind: SessionKind,
        name: impl Into<String>,
        source: TabSource,
    ) -> Result<Arc<Tab>, MuxError> {
        let ws = self
            .workspaces
            .get(workspace)
            .cloned()
            .ok_or_else(|| MuxError::WorkspaceNotFound(workspace.clone()))?;
        let id = self.next_tab_id();
        let (cols, rows) = self.viewport;
        let tab = Arc::new(Tab::new(id, kind, name, &ws, source, cols, rows));

        let list = self.tabs.entry(workspace.clone()).or_default();
        list.push(Arc::clone(&tab));
        self.active.insert(workspace.clone(), list.len() - 1);
        log::debug!("created tab {id} ({kind}) in {workspace}");
        Ok(tab)
    }

    /// Tabs of a workspace in display order.
    pub fn tabs(&self, workspace: &WorkspaceKey) -> &[Arc<Tab>] {
        self.tabs.get(workspace).map_or(&[], Vec::as_slice)
    }

    /// Every tab, grouped by workspace in opening order.
    pub fn all_tabs(&self) -> Vec<Arc<Tab>> {
        self.order
            .iter()
            .flat_map(|key| self.tabs(key).iter().cloned())
            .collect()
    }

    pub fn find(&self, id: TabId) -> Option<(WorkspaceKey, usize, Arc<Tab>)> {
        self.tabs.iter().find_map(|(key, list)| {
            list.iter()
                .position(|t| t.id() == id)
                .map(|index| (key.clone(), index, Arc::clone(&list[index])))
        })
    }

    pub fn tab(&self, id: TabId) -> Option<Arc<Tab>> {
        self.find(id).map(|(_, _, tab)| tab)
    }

    pub fn active_index(&self, workspace: &WorkspaceKey) -> Option<usize> {
        self.active.get(workspace).copied()
    }

    pub fn active_tab_in(&self, workspace: &WorkspaceKey) -> Option<Arc<Tab>> {
        let index = self.active_index(workspace)?;
        self.tabs(workspace).get(index).cloned()
    }

    /// Active tab of the selected workspace.
    pub fn active_tab(&self) -> Option<Arc<Tab>> {
        self.active_tab_in(self.selected.as_ref()?)
    }

    pub fn set_active(&mut self, workspace: &WorkspaceKey, index: usize) -> Result<(), MuxError> {
        let len = self.tabs(workspace).len();
        if index >= len {
            return Err(MuxError::IndexOutOfRange {
                workspace: workspace.clone(),
                index,
                len,
            });
        }
        self.active.insert(workspace.clone(), index);
        Ok(())
    }

    /// Move the active tab of `workspace` by `step`, wrapping.
    pub fn cycle_tab(&mut self, workspace: &WorkspaceKey, step: isize) -> Option<Arc<Tab>> {
        let len = self.tabs(workspace).len();
        if len == 0 {
            return None;
        }
        let current = self.active_index(workspace).unwrap_or(0) as isize;
        let next = (current + step).rem_euclid(len as isize) as usize;
        self.active.insert(workspace.clone(), next);
        self.tabs(workspace).get(next).cloned()
    }

    /// Close the tab at `index` in `workspace`.
    ///
    /// Stops the reader, closes the agent, drops the trace and detaches any
    /// viewer, then removes the tab and re-clamps the active index: closing
    /// the active last tab selects the new last one, closing a tab before the
    /// active one shifts it left, anything else leaves it alone.
    pub fn close_tab(&mut self, workspace: &WorkspaceKey, index: usize) -> Result<Arc<Tab>, MuxError> {
        let list = self
            .tabs
            .get_mut(workspace)
            .ok_or_else(|| MuxError::WorkspaceNotFound(workspace.clone()))?;
        if index >= list.len() {
            return Err(MuxError::IndexOutOfRange {
                workspace: workspace.clone(),
                index,
                len: list.len(),
            });
        }

        let tab = list.remove(index);
        tab.shutdown();
        let len = list.len();

        match self.active.get(workspace).copied() {
            _ if len == 0 => {
                self.active.remove(workspace);
            }
            Some(active) if active == index && index == len => {
                self.active.insert(workspace.clone(), len - 1);
            }
            Some(active) if index < active => {
                self.active.insert(workspace.clone(), active - 1);
            }
            Some(active) => {
                self.active.insert(workspace.clone(), active.min(len - 1));
            }
            None => {
                self.active.insert(workspace.clone(), 0);
            }
        }

        log::debug!("closed tab {} in {workspace}", tab.id());
        Ok(tab)
    }

    /// Close every tab of a workspace and forget it.
    pub fn cleanup_workspace(&mut self, workspace: &WorkspaceKey) -> Vec<TabId> {
        let closed: Vec<TabId> = self
            .tabs
            .remove(workspace)
            .unwrap_or_default()
            .into_iter()
            .map(|tab| {
                tab.shutdown();
                tab.id()
            })
            .collect();
        self.active.remove(workspace);
        self.workspaces.remove(workspace);
        self.order.retain(|k| k != workspace);
        if self.selected.as_ref() == Some(workspace) {
            self.selected = self.order.first().cloned();
        }
        closed
    }

    /// Detach the oldest attached agents until at most `limit` remain.
    ///
    /// Eligible tabs are running, attached and not viewers. Oldest goes
    /// first by creation time, ties broken by workspace key then position.
    /// Detaching stops the reader; the process keeps running and the tab
    /// stays open for re-attachment.
    pub fn enforce_attached_agent_limit(&mut self, limit: usize) -> Vec<TabId> {
        let mut candidates: Vec<(Instant, &WorkspaceKey, usize, &Arc<Tab>)> = self
            .tabs
            .iter()
            .flat_map(|(key, list)| {
                list.iter()
                    .enumerate()
                    .filter(|(_, tab)| tab.lock().is_attached_agent())
                    .map(move |(index, tab)| (tab.created_at(), key, index, tab))
            })
            .collect();

        if candidates.len() <= limit {
            return Vec::new();
        }
        candidates.sort_by(|a, b| detach_order((a.0, a.1, a.2), (b.0, b.1, b.2)));

        let excess = candidates.len() - limit;
        candidates
            .into_iter()
            .take(excess)
            .map(|(_, key, _, tab)| {
                tab.reader().stop();
                tab.lock().detached = true;
                log::info!("detached tab {} in {key} (attached agent limit {limit})", tab.id());
                tab.id()
            })
            .collect()
    }

    /// Number of tabs counting toward the attached-agent limit.
    pub fn attached_agent_count(&self) -> usize {
        self.tabs
            .values()
            .flatten()
            .filter(|tab| tab.lock().is_attached_agent())
            .count()
    }

    /// Check the active-index invariant. Used by tests.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (key, index) in &self.active {
            let len = self.tabs(key).len();
            assert!(*index < len, "active {index} out of range for {key} ({len} tabs)");
        }
        for (key, list) in &self.tabs {
            if !list.is_empty() {
                assert!(self.active.contains_key(key), "{key} has tabs but no active index");
            }
        }
    }
}

/// Order in which the attached-agent limit detaches tabs, given each tab's
/// `(created_at, workspace, index)`: oldest first, then by workspace key,
/// then by position in the workspace.
fn detach_order(a: (Instant, &WorkspaceKey, usize), b: (Instant, &WorkspaceKey, usize)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)).then_with(|| a.2.cmp(&b.2))
}
