use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ExpirationStrategy;
use crate::fingerprint::Fingerprint;
use crate::task::{Task, TaskStatus};

/// The fingerprint → task mapping.
///
/// Keys are unique and the mapping is mutated only by facade operations and
/// the sweeper. Iteration order is unspecified.
pub(crate) struct Store<K, V> {
    entries: HashMap<Fingerprint, Arc<Task<K, V>>>,
}

impl<K, V> Default for Store<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> Store<K, V> {
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Arc<Task<K, V>>> {
        self.entries.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Installs a task under its fingerprint, returning the task it
    /// replaced, if any. The caller accounts for the replaced task's bytes.
    pub fn insert_or_replace(&mut self, task: Arc<Task<K, V>>) -> Option<Arc<Task<K, V>>> {
        self.entries.insert(task.fingerprint().clone(), task)
    }

    pub fn remove(&mut self, fingerprint: &Fingerprint) -> Option<Arc<Task<K, V>>> {
        self.entries.remove(fingerprint)
    }

    /// Removes `task` only if it is still the one installed under its
    /// fingerprint, so a completion hook cannot tear down a replacement.
    pub fn remove_exact(&mut self, task: &Arc<Task<K, V>>) -> bool {
        match self.entries.get(task.fingerprint()) {
            Some(current) if Arc::ptr_eq(current, task) => {
                self.entries.remove(task.fingerprint());
                true
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task<K, V>>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The sum of resident-byte estimates over `Active` tasks. This is the
    /// memory usage the cache reports and evicts against.
    pub fn usage_bytes(&self, strategy: ExpirationStrategy, ttl: Duration, now: Instant) -> u64 {
        self.entries
            .values()
            .filter(|task| task.status(strategy, ttl, now) == TaskStatus::Active)
            .map(|task| task.bytes())
            .sum()
    }
}
