//! Outpost subscriptions: which tasks run when a camera view finishes an event.

use std::collections::BTreeMap;

use crate::config::OutpostConfig;
use crate::domain::EventRef;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutpostTable {
    views: BTreeMap<(String, String), Vec<String>>,
}

impl OutpostTable {
    pub fn from_config(outposts: &[OutpostConfig]) -> Self {
        let mut table = Self::default();
        for outpost in outposts {
            table.subscribe(&outpost.node, &outpost.view, outpost.tasks.clone());
        }
        table
    }

    /// Replace the task list of one view. An empty list unsubscribes it.
    pub fn subscribe(&mut self, node: &str, view: &str, tasks: Vec<String>) {
        let key = (node.to_string(), view.to_string());
        if tasks.is_empty() {
            self.views.remove(&key);
        } else {
            self.views.insert(key, tasks);
        }
    }

    pub fn tasks_for(&self, event: &EventRef) -> &[String] {
        self.views
            .get(&(event.node.clone(), event.view.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<OutpostConfig> {
        self.views
            .iter()
            .map(|((node, view), tasks)| OutpostConfig {
                node: node.clone(),
                view: view.clone(),
                tasks: tasks.clone(),
            })
            .collect()
    }
}
