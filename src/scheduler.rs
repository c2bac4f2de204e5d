//! Single-threaded timer plumbing.
//!
//! All recorder work runs on one loop. Work that must happen later is put on
//! a `TaskQueue` with an absolute deadline; the loop pops due tasks in
//! deadline order (FIFO among equal deadlines) and runs them one at a time.
//! Only `Clock::sleep` on the wall clock blocks; nothing here spawns threads.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of "now" for the loop.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Let `duration` pass. Used where the loop cannot run, e.g. on shutdown.
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Clock that only moves when told to. Used to drive the loop in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(Instant::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump forward to `deadline`; never moves backwards.
    pub fn advance_to(&self, deadline: Instant) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Handle to a scheduled task, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle {
    deadline: Instant,
    seq: u64,
}

impl TaskHandle {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Deadline-ordered queue of pending tasks.
#[derive(Debug)]
pub struct TaskQueue<T> {
    entries: BTreeMap<TaskHandle, T>,
    next_seq: u64,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `task` to run once `deadline` has passed.
    pub fn schedule(&mut self, deadline: Instant, task: T) -> TaskHandle {
        let handle = TaskHandle {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(handle, task);
        handle
    }

    /// Remove a pending task. Returns `None` if it already ran or was cancelled.
    pub fn cancel(&mut self, handle: TaskHandle) -> Option<T> {
        self.entries.remove(&handle)
    }

    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Earliest deadline among pending tasks
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.first_key_value().map(|(h, _)| h.deadline)
    }

    /// Pop the earliest task if its deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        match self.entries.first_key_value() {
            Some((handle, _)) if handle.deadline <= now => self.entries.pop_first().map(|(_, t)| t),
            _ => None,
        }
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
}

/// A slot holding at most one scheduled task.
///
/// `reschedule` always cancels whatever the slot holds before optionally
/// arming a new task, so two tasks owned by the same slot can never be
/// pending at once.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<TaskHandle>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the pending task, if any, then arm `task` after `delay`.
    pub fn reschedule<T>(
        &mut self,
        queue: &mut TaskQueue<T>,
        now: Instant,
        delay: Duration,
        task: Option<T>,
    ) {
        if let Some(handle) = self.handle.take() {
            queue.cancel(handle);
        }
        if let Some(task) = task {
            self.handle = Some(queue.schedule(now + delay, task));
        }
    }

    /// Whether the slot's task is still waiting in `queue`
    pub fn is_armed<T>(&self, queue: &TaskQueue<T>) -> bool {
        self.handle.is_some_and(|h| queue.contains(h))
    }

    pub fn handle(&self) -> Option<TaskHandle> {
        self.handle
    }
}
