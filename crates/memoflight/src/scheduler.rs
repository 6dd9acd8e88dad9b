use std::cmp::Reverse;
use std::sync::Arc;

use crate::task::Task;

/// Admission bookkeeping: which tasks are waiting and which are running.
///
/// The scheduler itself never spawns anything; [`admit`](Scheduler::admit)
/// moves tasks from queued to running under the registry lock and hands them
/// back for the facade to start. This keeps admission decisions atomic while
/// fetches are spawned outside the lock.
pub(crate) struct Scheduler<K, V> {
    queued: Vec<Arc<Task<K, V>>>,
    running: Vec<Arc<Task<K, V>>>,
    peak_concurrency: usize,
}

impl<K, V> Default for Scheduler<K, V> {
    fn default() -> Self {
        Self {
            queued: Vec::new(),
            running: Vec::new(),
            peak_concurrency: 0,
        }
    }
}

impl<K, V> Scheduler<K, V> {
    pub fn enqueue(&mut self, task: Arc<Task<K, V>>) {
        self.queued.push(task);
    }

    /// Registers a task that bypassed the queue and is running from the
    /// start, as caller-supplied futures do.
    pub fn register_running(&mut self, task: Arc<Task<K, V>>) {
        self.running.push(task);
        self.peak_concurrency = self.peak_concurrency.max(self.running.len());
    }

    /// Admits up to `cap − running` queued tasks, oldest first.
    ///
    /// A `cap` of zero admits everything that is queued. Ordering is by
    /// creation time with inverse use-count as a deterministic tiebreak, so
    /// admission is FIFO by arrival and later-created tasks never jump ahead
    /// of earlier ones. Idempotent: admitting moves each task out of the
    /// queued set, so re-entrant calls settle immediately.
    pub fn admit(&mut self, cap: usize) -> Vec<Arc<Task<K, V>>> {
        if self.queued.is_empty() {
            return Vec::new();
        }

        let slots = if cap == 0 {
            self.queued.len()
        } else {
            cap.saturating_sub(self.running.len())
        };
        if slots == 0 {
            return Vec::new();
        }

        self.queued
            .sort_by_key(|task| (task.created_at(), Reverse(task.uses())));

        let admitted: Vec<_> = self.queued.drain(..slots.min(self.queued.len())).collect();
        self.running.extend(admitted.iter().cloned());
        self.peak_concurrency = self.peak_concurrency.max(self.running.len());

        tracing::trace!(
            admitted = admitted.len(),
            running = self.running.len(),
            queued = self.queued.len(),
            "admitted queued tasks"
        );

        admitted
    }

    /// Records a task's completion, freeing its running slot.
    pub fn finish(&mut self, task: &Arc<Task<K, V>>) {
        self.running.retain(|running| !Arc::ptr_eq(running, task));
    }

    /// Drops a task from the queue without running it. Used when a queued
    /// entry is deleted or replaced; its slot is rejected by the caller so
    /// awaiting readers are not stranded.
    pub fn forget(&mut self, task: &Arc<Task<K, V>>) {
        self.queued.retain(|queued| !Arc::ptr_eq(queued, task));
        self.running.retain(|running| !Arc::ptr_eq(running, task));
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency
    }

    pub fn clear(&mut self) {
        self.queued.clear();
        self.running.clear();
        self.peak_concurrency = 0;
    }
}
