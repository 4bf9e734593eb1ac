// Scheduler lifecycle events
//
// The scheduler reports every transition to a SchedulerLog chosen at
// construction. NoLog compiles away, Trace forwards to the `log`
// facade, EventLog keeps the last N events for tests and post-mortems.

use super::clock::Tick;
use super::task::TaskId;
use crate::coroutine::{Exit, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Waiting,
    Ready,
    Awaiting,
    Running,
}

pub trait SchedulerLog {
    fn added(&mut self, _now: Tick, _id: TaskId, _name: &str, _queue: Queue) {}
    fn moved(&mut self, _now: Tick, _id: TaskId, _name: &str, _from: Queue, _to: Queue) {}
    /// One step ran from `now` to `finished`
    fn resumed(&mut self, _now: Tick, _finished: Tick, _id: TaskId, _name: &str, _outcome: Outcome) {}
    fn removed(&mut self, _now: Tick, _id: TaskId, _name: &str, _exit: Exit) {}
    /// Nothing was due; `until` is the next timed wake, if any
    fn idle(&mut self, _now: Tick, _until: Option<Tick>) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoLog;

impl SchedulerLog for NoLog {}

#[derive(Debug, Clone, Copy, Default)]
pub struct Trace;

impl SchedulerLog for Trace {
    fn added(&mut self, now: Tick, id: TaskId, name: &str, queue: Queue) {
        log::info!("[{}] add {}#{} -> {:?}", now, name, id, queue);
    }

    fn moved(&mut self, now: Tick, id: TaskId, name: &str, from: Queue, to: Queue) {
        log::debug!("[{}] {}#{} {:?} -> {:?}", now, name, id, from, to);
    }

    fn resumed(&mut self, now: Tick, finished: Tick, id: TaskId, name: &str, outcome: Outcome) {
        log::debug!("[{}..{}] resume {}#{}: {:?}", now, finished, name, id, outcome);
    }

    fn removed(&mut self, now: Tick, id: TaskId, name: &str, exit: Exit) {
        match exit {
            Exit::Success => log::info!("[{}] {}#{} done", now, name, id),
            Exit::Failure => log::warn!("[{}] {}#{} failed", now, name, id),
        }
    }

    fn idle(&mut self, now: Tick, until: Option<Tick>) {
        match until {
            Some(at) => log::trace!("[{}] idle until {}", now, at),
            None => log::trace!("[{}] idle", now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Added { at: Tick, id: TaskId, queue: Queue },
    Moved { at: Tick, id: TaskId, from: Queue, to: Queue },
    Resumed { at: Tick, finished: Tick, id: TaskId, outcome: Outcome },
    Removed { at: Tick, id: TaskId, exit: Exit },
    Idle { at: Tick, until: Option<Tick> },
}

/// Records events until full, then counts what it had to drop.
/// Repeated idle reports with the same wake time collapse into one.
pub struct EventLog<const N: usize> {
    events: heapless::Vec<Event, N>,
    dropped: usize,
}

impl<const N: usize> EventLog<N> {
    pub const fn new() -> Self {
        Self {
            events: heapless::Vec::new(),
            dropped: 0,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Ids of resumed tasks, in order
    pub fn resumes(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.events.iter().filter_map(|event| match event {
            Event::Resumed { id, .. } => Some(*id),
            _ => None,
        })
    }

    /// Longest recorded step, in ticks
    pub fn longest_step(&self) -> Option<Tick> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Resumed { at, finished, .. } => Some(finished.saturating_sub(*at)),
                _ => None,
            })
            .max()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    fn record(&mut self, event: Event) {
        if self.events.push(event).is_err() {
            self.dropped += 1;
        }
    }
}

impl<const N: usize> Default for EventLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SchedulerLog for EventLog<N> {
    fn added(&mut self, now: Tick, id: TaskId, _name: &str, queue: Queue) {
        self.record(Event::Added { at: now, id, queue });
    }

    fn moved(&mut self, now: Tick, id: TaskId, _name: &str, from: Queue, to: Queue) {
        self.record(Event::Moved {
            at: now,
            id,
            from,
            to,
        });
    }

    fn resumed(&mut self, now: Tick, finished: Tick, id: TaskId, _name: &str, outcome: Outcome) {
        self.record(Event::Resumed {
            at: now,
            finished,
            id,
            outcome,
        });
    }

    fn removed(&mut self, now: Tick, id: TaskId, _name: &str, exit: Exit) {
        self.record(Event::Removed { at: now, id, exit });
    }

    fn idle(&mut self, now: Tick, until: Option<Tick>) {
        if let Some(Event::Idle { until: last, .. }) = self.events.last() {
            if *last == until {
                return;
            }
        }
        self.record(Event::Idle { at: now, until });
    }
}
