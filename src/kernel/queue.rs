// Dual-staged priority queue over task ids
//
// Stage 1 (waiting) orders by ready_time, stage 2 (ready) by priority.
// Registration order breaks every tie so two runs pick the same task.
// Both stages share one fixed buffer: ready grows from the front with
// the best entry last, waiting grows from the back with the soonest
// entry first. Pops are O(1), inserts shift at most N entries.

use core::cmp::Reverse;

use super::clock::Tick;
use super::task::{Priority, TaskId};
use crate::error::{Error, Violation, ensure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub id: TaskId,
    pub priority: Priority,
    pub ready_time: Tick,
}

impl Entry {
    const EMPTY: Self = Self {
        id: 0,
        priority: Priority::IDLE,
        ready_time: 0,
    };

    // stage 1: soonest first
    #[inline]
    fn due_key(&self) -> (Tick, TaskId) {
        (self.ready_time, self.id)
    }

    // stage 2: larger is better
    #[inline]
    fn run_key(&self) -> (Priority, Reverse<TaskId>) {
        (self.priority, Reverse(self.id))
    }
}

pub struct DualPriorityQueue<const N: usize> {
    buf: [Entry; N],
    ready: usize,
    waiting: usize,
}

impl<const N: usize> DualPriorityQueue<N> {
    pub const fn new() -> Self {
        Self {
            buf: [Entry::EMPTY; N],
            ready: 0,
            waiting: 0,
        }
    }

    /// Queue an entry that is not due yet
    pub fn push_waiting(&mut self, entry: Entry) -> Result<(), Error> {
        ensure!(!self.is_full(), Violation::SchedulerFull);
        let start = N - self.waiting;
        let pos = (start..N)
            .find(|&i| self.buf[i].due_key() > entry.due_key())
            .unwrap_or(N);
        self.buf.copy_within(start..pos, start - 1);
        self.buf[pos - 1] = entry;
        self.waiting += 1;
        ensure!(self.is_ordered(), Violation::QueueOrder);
        Ok(())
    }

    /// Queue an entry that may run now
    pub fn push_ready(&mut self, entry: Entry) -> Result<(), Error> {
        ensure!(!self.is_full(), Violation::SchedulerFull);
        let pos = (0..self.ready)
            .find(|&i| self.buf[i].run_key() > entry.run_key())
            .unwrap_or(self.ready);
        self.buf.copy_within(pos..self.ready, pos + 1);
        self.buf[pos] = entry;
        self.ready += 1;
        ensure!(self.is_ordered(), Violation::QueueOrder);
        Ok(())
    }

    pub fn pop_ready(&mut self) -> Option<Entry> {
        if self.ready == 0 {
            return None;
        }
        self.ready -= 1;
        Some(self.buf[self.ready])
    }

    pub fn peek_ready(&self) -> Option<&Entry> {
        self.ready.checked_sub(1).map(|i| &self.buf[i])
    }

    pub fn peek_waiting(&self) -> Option<&Entry> {
        (self.waiting > 0).then(|| &self.buf[N - self.waiting])
    }

    /// Pop the soonest waiting entry if it is due at `now`
    pub fn pop_due(&mut self, now: Tick) -> Option<Entry> {
        let entry = *self.peek_waiting()?;
        if entry.ready_time > now {
            return None;
        }
        self.waiting -= 1;
        Some(entry)
    }

    /// Drop `id` from whichever stage holds it
    pub fn remove(&mut self, id: TaskId) -> Option<Entry> {
        if let Some(pos) = (0..self.ready).find(|&i| self.buf[i].id == id) {
            let entry = self.buf[pos];
            self.buf.copy_within(pos + 1..self.ready, pos);
            self.ready -= 1;
            return Some(entry);
        }
        let start = N - self.waiting;
        let pos = (start..N).find(|&i| self.buf[i].id == id)?;
        let entry = self.buf[pos];
        self.buf.copy_within(start..pos, start + 1);
        self.waiting -= 1;
        Some(entry)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.ready_entries()
            .iter()
            .chain(self.waiting_entries())
            .any(|entry| entry.id == id)
    }

    /// Ready entries, worst first
    pub fn ready_entries(&self) -> &[Entry] {
        &self.buf[..self.ready]
    }

    /// Waiting entries, soonest first
    pub fn waiting_entries(&self) -> &[Entry] {
        &self.buf[N - self.waiting..]
    }

    #[inline]
    pub fn n_ready(&self) -> usize {
        self.ready
    }

    #[inline]
    pub fn n_waiting(&self) -> usize {
        self.waiting
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ready + self.waiting
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.ready = 0;
        self.waiting = 0;
    }

    fn is_ordered(&self) -> bool {
        self.ready_entries()
            .windows(2)
            .all(|w| w[0].run_key() < w[1].run_key())
            && self
                .waiting_entries()
                .windows(2)
                .all(|w| w[0].due_key() < w[1].due_key())
    }
}

impl<const N: usize> Default for DualPriorityQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
