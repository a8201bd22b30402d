use crate::sonification::PendingOp;

/// Identifies a scheduled task so it can be cancelled.
pub type TimerHandle = u64;

/// Work the controller has put off until a later time. A closed enum
/// instead of boxed closures, so dispatching a task can borrow the
/// controller mutably.
pub(crate) enum TimerTask {
    /// Re-attempt a transport operation that found the clock suspended.
    RetryReady(PendingOp),
    /// Run the update that was deferred by throttling.
    DeferredUpdate,
    /// Tear down the transient instrument behind a one-off note.
    ExpireNote(u64),
}

struct Entry {
    handle: TimerHandle,
    due_ms: u64,
    task: TimerTask,
}

/// Deterministic timer queue. Nothing runs by itself; the owner advances
/// the clock and dispatches whatever came due. Tests advance in exact
/// steps, the demo binary feeds in wall-clock deltas.
pub(crate) struct TimerQueue {
    now_ms: u64,
    next_handle: TimerHandle,
    entries: Vec<Entry>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            now_ms: 0,
            next_handle: 1,
            entries: Vec::new(),
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub(crate) fn schedule(&mut self, delay_ms: u64, task: TimerTask) -> TimerHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.entries.push(Entry {
            handle,
            due_ms: self.now_ms + delay_ms,
            task,
        });
        handle
    }

    pub(crate) fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.handle != handle);
        self.entries.len() < before
    }

    /// Earliest pending due time, if any. Lets the owner advance in steps
    /// so a task dispatched mid-interval can schedule follow-up work at
    /// the right moment.
    pub(crate) fn next_due(&self) -> Option<u64> {
        self.entries.iter().map(|entry| entry.due_ms).min()
    }

    /// Move the clock forward to `target_ms` and drain everything that
    /// came due, in due-time order (insertion order breaking ties).
    pub(crate) fn advance_to(&mut self, target_ms: u64) -> Vec<TimerTask> {
        self.now_ms = self.now_ms.max(target_ms);
        let mut due: Vec<Entry> = Vec::new();
        let mut remaining = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.due_ms <= target_ms {
                due.push(entry);
            } else {
                remaining.push(entry);
            }
        }
        self.entries = remaining;
        due.sort_by_key(|entry| (entry.due_ms, entry.handle));
        due.into_iter().map(|entry| entry.task).collect()
    }
}
