use std::sync::Arc;
use std::sync::OnceLock;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{CacheContents, CacheError};

/// The filled state of a [`Slot`].
struct Completion<V> {
    contents: CacheContents<Arc<V>>,
    at: Instant,
}

/// A one-shot completion cell.
///
/// Starts out pending and transitions exactly once to either a resolved
/// value or an error, recording the instant of completion. Any number of
/// readers may [`wait`](Slot::wait) concurrently, before or after the cell
/// is filled; all of them observe the same outcome.
///
/// Completing the slot twice is a usage error and panics: the cache admits
/// at most one producer per slot, so a second completion means internal
/// bookkeeping has gone wrong.
pub(crate) struct Slot<V> {
    cell: OnceLock<Completion<V>>,
    notify: Notify,
}

impl<V> Slot<V> {
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            notify: Notify::new(),
        }
    }

    pub fn resolve(&self, value: Arc<V>) {
        self.complete(Ok(value));
    }

    pub fn reject(&self, error: CacheError) {
        self.complete(Err(error));
    }

    fn complete(&self, contents: CacheContents<Arc<V>>) {
        let completion = Completion {
            contents,
            at: Instant::now(),
        };
        if self.cell.set(completion).is_err() {
            panic!("completion slot filled twice");
        }
        self.notify.notify_waiters();
    }

    /// The outcome, if the slot has been completed.
    pub fn peek(&self) -> Option<&CacheContents<Arc<V>>> {
        self.cell.get().map(|completion| &completion.contents)
    }

    /// The instant the slot was completed, if it has been.
    pub fn completed_at(&self) -> Option<Instant> {
        self.cell.get().map(|completion| completion.at)
    }

    pub fn is_completed(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Waits until the slot is filled and returns its outcome.
    pub async fn wait(&self) -> CacheContents<Arc<V>> {
        loop {
            // Register interest before checking the cell, otherwise a
            // completion between the check and the await would be lost.
            let notified = self.notify.notified();
            if let Some(completion) = self.cell.get() {
                return completion.contents.clone();
            }
            notified.await;
        }
    }
}
