//! Shared write locks for archives targeted by concurrent jobs.

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hands out one lock per logical render target.
///
/// A target is the combination of store root, style, tileset and tiling
/// matrix set. Entries are created on first use and live as long as the
/// registry; their number is bounded by the datasets a process handles.
#[derive(Debug, Default)]
pub struct MutexRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry key of a render target.
    pub fn key(store_root: &Path, style: &str, tileset: &str, tms: &str) -> String {
        format!("{}|{}|{}|{}", store_root.display(), style, tileset, tms)
    }

    /// Lock for `key`, created if missing.
    pub fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.locks.entry(key.to_string()).or_default().value())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
