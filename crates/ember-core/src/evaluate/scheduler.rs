//! Macrotask scheduling for timers, immediates and posted continuations.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::tracker::AsyncId;

/// A task that is due to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyTask {
    pub id: AsyncId,
    /// Interval timers are rescheduled after they run.
    pub repeat: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    seq: u64,
    interval: Option<Duration>,
}

/// Single-threaded task queue ordered by due time, then scheduling order.
///
/// Cancelled and rescheduled tasks leave stale heap entries behind; they are
/// recognised by sequence number and skipped when popped.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Reverse<(Instant, u64, AsyncId)>>,
    tasks: FxHashMap<AsyncId, Entry>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` to run after `delay`, replacing any pending schedule.
    pub fn schedule(&mut self, id: AsyncId, delay: Duration, repeat: bool) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(
            id,
            Entry {
                seq,
                interval: repeat.then_some(delay),
            },
        );
        let now = Instant::now();
        let due = now.checked_add(delay).unwrap_or(now);
        self.queue.push(Reverse((due, seq, id)));
    }

    /// Remove a task. Returns false if it was not scheduled.
    pub fn cancel(&mut self, id: AsyncId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    pub fn is_scheduled(&self, id: AsyncId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Take the earliest task due at or before `now`.
    ///
    /// One-shot tasks are removed; interval tasks stay registered until
    /// [`Scheduler::reschedule`] or [`Scheduler::cancel`].
    pub fn pop_ready(&mut self, now: Instant) -> Option<ReadyTask> {
        loop {
            let Reverse((due, seq, id)) = *self.queue.peek()?;
            if self.is_stale(seq, id) {
                self.queue.pop();
                continue;
            }
            if due > now {
                return None;
            }
            self.queue.pop();

            let repeat = self.tasks.get(&id).is_some_and(|entry| entry.interval.is_some());
            if !repeat {
                self.tasks.remove(&id);
            }
            return Some(ReadyTask { id, repeat });
        }
    }

    /// Queue the next run of an interval task. Returns false if the task was
    /// cancelled while running.
    pub fn reschedule(&mut self, id: AsyncId) -> bool {
        let Some(interval) = self.tasks.get(&id).and_then(|entry| entry.interval) else {
            return false;
        };
        self.schedule(id, interval, true);
        true
    }

    /// Due time of the earliest live task.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((due, seq, id))) = self.queue.peek().copied() {
            if self.is_stale(seq, id) {
                self.queue.pop();
                continue;
            }
            return Some(due);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn is_stale(&self, seq: u64, id: AsyncId) -> bool {
        self.tasks.get(&id).is_none_or(|entry| entry.seq != seq)
    }
}

/// Longest delay a timer honours, the largest signed 32-bit millisecond count.
pub const MAX_TIMER_DELAY_MS: f64 = 2_147_483_647.0;

/// Delay used for timers whose requested delay is out of range.
const OUT_OF_RANGE_DELAY: Duration = Duration::from_millis(1);

/// Convert a JavaScript delay in milliseconds to a duration.
///
/// Negative, NaN, infinite and over-long delays become one millisecond, as
/// in Node.
pub fn delay_from_millis(millis: f64) -> Duration {
    if (0.0..=MAX_TIMER_DELAY_MS).contains(&millis) {
        Duration::from_secs_f64(millis / 1000.0)
    } else {
        OUT_OF_RANGE_DELAY
    }
}
