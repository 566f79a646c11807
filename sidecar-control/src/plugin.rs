//! The active plugin set and its version tag.

use crate::catalog::Plugin;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// A snapshot of the active plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSet {
    /// Changes whenever membership, a priority or a script changes.
    pub version: String,
    /// Plugin name to priority.
    pub priorities: BTreeMap<String, i32>,
}

impl PluginSet {
    pub fn contains(&self, name: &str) -> bool {
        self.priorities.contains_key(name)
    }

    /// Priority of a plugin, if active.
    pub fn priority(&self, name: &str) -> Option<i32> {
        self.priorities.get(name).copied()
    }
}

/// Tracks the plugin set across jobs.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    current: Mutex<PluginSet>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes the plugin set from the catalog's plugins and returns it.
    pub fn refresh(&self, plugins: &[Plugin]) -> PluginSet {
        let mut sorted: Vec<&Plugin> = plugins.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut hasher = Sha256::new();
        for plugin in &sorted {
            hasher.update(plugin.name.as_bytes());
            hasher.update([0]);
            hasher.update(plugin.priority.to_be_bytes());
            hasher.update(Sha256::digest(plugin.script.as_bytes()));
        }
        let version = hex::encode(hasher.finalize());

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.version != version {
            info!(
                "Plugin set changed: {} plugin(s), version {}",
                sorted.len(),
                version
            );
            *current = PluginSet {
                version,
                priorities: sorted
                    .iter()
                    .map(|p| (p.name.clone(), p.priority))
                    .collect(),
            };
        }
        current.clone()
    }

    /// The last computed plugin set.
    pub fn current(&self) -> PluginSet {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
