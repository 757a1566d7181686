//! The process-wide metric registry.
//!
//! Keyed storage for metric handles. Duplicate registration of a key is a
//! distinct, recoverable error surfaced to the caller, never a silent
//! overwrite. The lifecycle sweep removes stopped metrics here (phase two of
//! eviction).

use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::metric::Metric;

#[derive(Default)]
pub struct Registry {
    metrics: RwLock<HashMap<String, Arc<Metric>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, metric: Arc<Metric>) -> Result<()> {
        let mut metrics = self.metrics.write();
        match metrics.entry(metric.key().to_string()) {
            Entry::Occupied(occupied) => Err(Error::AlreadyRegistered(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(metric);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Metric>> {
        self.metrics.read().get(key).cloned()
    }

    /// Running metrics only; stopped-but-unswept metrics are excluded.
    pub fn list(&self) -> Vec<Arc<Metric>> {
        self.metrics
            .read()
            .values()
            .filter(|m| m.is_running())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Metric>> {
        self.metrics.write().remove(key)
    }

    /// Removes every stopped metric and returns them for reclamation.
    pub fn sweep(&self) -> Vec<Arc<Metric>> {
        let mut metrics = self.metrics.write();
        let stopped: Vec<String> = metrics
            .iter()
            .filter(|(_, m)| !m.is_running())
            .map(|(k, _)| k.clone())
            .collect();
        stopped
            .iter()
            .filter_map(|key| metrics.remove(key))
            .collect()
    }
}
