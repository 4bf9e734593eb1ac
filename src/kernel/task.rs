// Schedulable tasks
//
// A task binds one suspension chain and its arena to a priority and a
// due time. One-shot tasks exit when the root finishes. Periodic tasks
// keep a pristine copy of their root and restart it every period;
// `Context::next_cycle` ends a period without tearing frames down.
//
//   Sleeping -> Ready -> Running -> Sleeping | Ready | Suspended | Exited

use core::fmt;

use super::clock::Tick;
use crate::coroutine::{Chain, Coroutine, Exit, Outcome, Wait};
use crate::error::{Error, Fault};
use crate::memory::Arena;

/// Index of a task in its scheduler, in registration order
pub type TaskId = usize;

/// Higher runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u8);

impl Priority {
    pub const IDLE: Self = Self(0);
    pub const LOW: Self = Self(64);
    pub const NORMAL: Self = Self(128);
    pub const HIGH: Self = Self(192);
    pub const CRITICAL: Self = Self(255);
}

impl From<u8> for Priority {
    fn from(level: u8) -> Self {
        Self(level)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// waiting for ready_time
    Sleeping,
    Ready,
    Running,
    /// parked on a channel or readiness source
    Suspended,
    Exited(Exit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Once,
    /// releases stay on the `start + k * period` grid
    HardPeriodic { period: Tick },
    /// next release is `period` after the tick that finished the
    /// previous one. The scheduler reads the clock once per tick, so
    /// this is the tick's start time, not the instant the step returned.
    SoftPeriodic { period: Tick },
}

impl Recurrence {
    /// Release after the one planned for `scheduled`, finished in the
    /// tick that started at `now`.
    /// A hard-periodic task that overran by several periods gets one
    /// catch-up release at the latest missed grid point, not a backlog.
    pub fn next_release(self, scheduled: Tick, now: Tick) -> Option<Tick> {
        match self {
            Recurrence::Once => None,
            Recurrence::HardPeriodic { period } => {
                let period = period.max(1);
                let missed = (now.saturating_sub(scheduled) / period).max(1);
                Some(scheduled.saturating_add(period.saturating_mul(missed)))
            }
            Recurrence::SoftPeriodic { period } => Some(now.saturating_add(period)),
        }
    }
}

/// What the scheduler needs from a task
pub trait Schedulable {
    fn name(&self) -> &str;
    fn priority(&self) -> Priority;
    fn ready_time(&self) -> Tick;
    fn state(&self) -> TaskState;

    fn is_exited(&self) -> bool {
        matches!(self.state(), TaskState::Exited(_))
    }

    /// A suspended task's awaitable has settled
    fn is_resumable(&self, now: Tick) -> bool;

    /// Run one step. Never fails: errors end the task with a failure.
    fn resume(&mut self, now: Tick) -> Outcome;

    /// Sleeping or Suspended -> Ready
    fn make_ready(&mut self);

    /// Tear the chain down between ticks
    fn cancel(&mut self);

    fn fault(&self) -> Option<Fault> {
        None
    }
}

pub struct Task<C, A: Arena> {
    name: &'static str,
    priority: Priority,
    ready_time: Tick,
    // planned start of the current period
    release: Tick,
    state: TaskState,
    recurrence: Recurrence,
    chain: Chain<A>,
    template: Option<(C, fn(&C) -> C)>,
    fault: Option<Fault>,
    cycles: u32,
}

impl<C, A> Task<C, A>
where
    C: Coroutine<Output = Exit> + 'static,
    A: Arena,
{
    /// One-shot task, due at tick 0
    pub fn new(name: &'static str, priority: Priority, arena: A, root: C) -> Result<Self, Error> {
        Ok(Self {
            name,
            priority,
            ready_time: 0,
            release: 0,
            state: TaskState::Sleeping,
            recurrence: Recurrence::Once,
            chain: Chain::new(arena, root)?,
            template: None,
            fault: None,
            cycles: 0,
        })
    }

    /// First release at `at` instead of 0
    pub fn start_at(mut self, at: Tick) -> Self {
        self.ready_time = at;
        self.release = at;
        self
    }

    pub fn recurrence(&self) -> Recurrence {
        self.recurrence
    }

    /// Periods completed so far
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn chain(&self) -> &Chain<A> {
        &self.chain
    }

    fn park(&mut self, now: Tick) {
        match self.chain.wait() {
            Wait::Until(at) => {
                self.ready_time = at;
                self.state = TaskState::Sleeping;
            }
            Wait::On(_) => self.state = TaskState::Suspended,
            Wait::NextCycle => match self.recurrence.next_release(self.release, now) {
                Some(next) => {
                    self.rearm_at(next);
                    log::trace!("{}: cycle {} done, next at {}", self.name, self.cycles, next);
                }
                None => self.state = TaskState::Ready,
            },
            Wait::Yield => self.state = TaskState::Ready,
        }
    }

    fn complete(&mut self, now: Tick) {
        let next = self.recurrence.next_release(self.release, now);
        let (Some(next), Some((template, restart))) = (next, &self.template) else {
            self.state = TaskState::Exited(Exit::Success);
            return;
        };
        match self.chain.rearm(restart(template)) {
            Ok(()) => self.rearm_at(next),
            Err(err) => {
                log::error!("{}: cannot restart: {}", self.name, err);
                self.fault = Some(err.into());
                self.state = TaskState::Exited(Exit::Failure);
            }
        }
    }

    fn rearm_at(&mut self, next: Tick) {
        self.release = next;
        self.ready_time = next;
        self.state = TaskState::Sleeping;
        self.cycles = self.cycles.saturating_add(1);
    }
}

impl<C, A> Task<C, A>
where
    C: Coroutine<Output = Exit> + Clone + 'static,
    A: Arena,
{
    pub fn hard_periodic(
        name: &'static str,
        priority: Priority,
        period: Tick,
        arena: A,
        root: C,
    ) -> Result<Self, Error> {
        Self::periodic(name, priority, Recurrence::HardPeriodic { period }, arena, root)
    }

    pub fn soft_periodic(
        name: &'static str,
        priority: Priority,
        period: Tick,
        arena: A,
        root: C,
    ) -> Result<Self, Error> {
        Self::periodic(name, priority, Recurrence::SoftPeriodic { period }, arena, root)
    }

    fn periodic(
        name: &'static str,
        priority: Priority,
        recurrence: Recurrence,
        arena: A,
        root: C,
    ) -> Result<Self, Error> {
        let template = root.clone();
        let mut task = Self::new(name, priority, arena, root)?;
        task.recurrence = recurrence;
        task.template = Some((template, C::clone));
        Ok(task)
    }
}

impl<C, A> Schedulable for Task<C, A>
where
    C: Coroutine<Output = Exit> + 'static,
    A: Arena,
{
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn ready_time(&self) -> Tick {
        self.ready_time
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn is_resumable(&self, now: Tick) -> bool {
        !self.is_exited() && self.chain.is_resumable(now)
    }

    fn resume(&mut self, now: Tick) -> Outcome {
        self.state = TaskState::Running;
        let outcome = match self.chain.resume(now) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("{}: {}", self.name, err);
                self.chain.destroy();
                self.fault = Some(err.into());
                Outcome::CompletedFailure
            }
        };
        match outcome {
            Outcome::Suspended => self.park(now),
            Outcome::CompletedSuccess => self.complete(now),
            Outcome::CompletedFailure => {
                if self.fault.is_none() {
                    self.fault = self.chain.fault();
                }
                match self.fault {
                    Some(fault) => log::warn!("{}: exited with {}", self.name, fault),
                    None => log::warn!("{}: exited with failure", self.name),
                }
                self.state = TaskState::Exited(Exit::Failure);
            }
        }
        outcome
    }

    fn make_ready(&mut self) {
        if matches!(self.state, TaskState::Sleeping | TaskState::Suspended) {
            self.state = TaskState::Ready;
        }
    }

    fn cancel(&mut self) {
        self.chain.destroy();
        if !self.is_exited() {
            log::info!("{}: cancelled", self.name);
            self.state = TaskState::Exited(Exit::Failure);
        }
    }

    fn fault(&self) -> Option<Fault> {
        self.fault
    }
}
