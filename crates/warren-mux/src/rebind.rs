//! Moving a workspace's tabs to a new identity key.
//!
//! A workspace opened by raw path is registered straight away and gets its
//! normalized identity later. Rebinding re-keys the registry; tabs keep
//! their IDs, terminals and processes.

use std::sync::Arc;

use crate::registry::TabRegistry;
use crate::tab::Tab;
use crate::workspace::{Workspace, WorkspaceKey};

impl TabRegistry {
    /// Re-key everything under `old_key` to `new_workspace.key`.
    ///
    /// - Nothing registered under `old_key`: only the selection is repointed.
    /// - An empty tab list under `old_key`: its active entry is carried over
    ///   if the new key has no tabs, and the old entries are dropped.
    /// - Otherwise tabs are merged by ID. Tabs already under the new key keep
    ///   their place; incoming tabs not yet present are appended in their
    ///   original order. The active index follows the previously active old
    ///   tab when the old workspace was selected or the new key had no valid
    ///   active tab, and is clamped into range.
    ///
    /// Rebinding to the same key only refreshes the workspace record.
    ///
    /// Every merged tab points at the new workspace afterwards. Returns the
    /// migrated tabs whose agents are alive, running and attached; their
    /// readers have been stopped and must be restarted under the new key.
    pub fn rebind_workspace(&mut self, old_key: &WorkspaceKey, new_workspace: Workspace) -> Vec<Arc<Tab>> {
        let new_key = new_workspace.key.clone();
        if *old_key == new_key {
            self.refresh_workspace(new_workspace);
            return Vec::new();
        }

        let was_selected = self.selected.as_ref() == Some(old_key);
        let workspace = self.adopt_workspace_record(old_key, new_workspace);
        if was_selected {
            self.selected = Some(new_key.clone());
        }

        let Some(old_tabs) = self.tabs.remove(old_key) else {
            self.active.remove(old_key);
            log::debug!("rebind {old_key} -> {new_key}: no tabs, selection repointed");
            return Vec::new();
        };
        let old_active = self.active.remove(old_key);

        if old_tabs.is_empty() {
            if self.tabs(&new_key).is_empty() {
                match old_active {
                    Some(index) => self.active.insert(new_key.clone(), index),
                    None => self.active.remove(&new_key),
                };
            }
            return Vec::new();
        }

        let old_active_id = old_active.and_then(|i| old_tabs.get(i)).map(|t| t.id());
        let merged = self.tabs.entry(new_key.clone()).or_default();
        let new_active = self
            .active
            .get(&new_key)
            .copied()
            .filter(|&i| i < merged.len());

        let mut migrated = Vec::new();
        for tab in old_tabs {
            if merged.iter().any(|t| t.id() == tab.id()) {
                continue;
            }
            merged.push(Arc::clone(&tab));
            migrated.push(tab);
        }
        for tab in merged.iter() {
            tab.lock().workspace = Arc::downgrade(&workspace);
        }

        let followed = old_active_id.and_then(|id| merged.iter().position(|t| t.id() == id));
        let active = if was_selected || new_active.is_none() {
            followed.or(new_active)
        } else {
            new_active
        };
        let len = merged.len();
        self.active
            .insert(new_key.clone(), active.unwrap_or(0).min(len - 1));

        log::debug!(
            "rebind {old_key} -> {new_key}: {} tabs migrated, {len} total",
            migrated.len()
        );

        migrated
            .into_iter()
            .filter(|tab| {
                let mut state = tab.lock();
                state.running && !state.detached && state.agent_alive()
            })
            .inspect(|tab| {
                tab.reader().stop();
            })
            .collect()
    }

    /// Replace the old workspace record with the new one, keeping the
    /// opening order. An existing record under the new key wins.
    fn adopt_workspace_record(&mut self, old_key: &WorkspaceKey, new_workspace: Workspace) -> Arc<Workspace> {
        let new_key = new_workspace.key.clone();
        self.workspaces.remove(old_key);
        let workspace = Arc::clone(
            self.workspaces
                .entry(new_key.clone())
                .or_insert_with(|| Arc::new(new_workspace)),
        );

        let already_ordered = self.order.contains(&new_key);
        match self.order.iter().position(|k| k == old_key) {
            Some(pos) if !already_ordered => self.order[pos] = new_key,
            Some(pos) => {
                self.order.remove(pos);
            }
            None if !already_ordered => self.order.push(new_key),
            None => {}
        }
        workspace
    }
}
