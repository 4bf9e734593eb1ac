// Cooperative, time-aware priority scheduler
// NOTE: fixed capacity, no dynamic allocation, never blocks
//
// Each tick reads the clock once, promotes due and settled tasks into
// the ready stage, then resumes the single best ready task for one
// step. When nothing is due it reports the next wake time and returns;
// sleeping the CPU is the caller's call.

use super::clock::{Tick, TimeSource};
use super::events::{NoLog, Queue, SchedulerLog};
use super::queue::{DualPriorityQueue, Entry};
use super::task::{Schedulable, TaskId, TaskState};
use crate::coroutine::{Exit, Outcome};
use crate::error::{Error, Violation, ensure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReport {
    /// nothing due; `next_wake` is the earliest timed wake, if any
    Idle { next_wake: Option<Tick> },
    Ran { task: TaskId, outcome: Outcome },
}

pub struct Scheduler<'a, const N: usize, T: TimeSource, L: SchedulerLog = NoLog> {
    tasks: heapless::Vec<&'a mut dyn Schedulable, N>,
    queue: DualPriorityQueue<N>,
    // parked on channels or signals, in the order they parked
    awaiting: heapless::Vec<TaskId, N>,
    clock: T,
    log: L,
}

impl<'a, const N: usize, T: TimeSource> Scheduler<'a, N, T, NoLog> {
    pub fn new(clock: T) -> Self {
        Self::with_log(clock, NoLog)
    }
}

impl<'a, const N: usize, T: TimeSource, L: SchedulerLog> Scheduler<'a, N, T, L> {
    pub fn with_log(clock: T, log: L) -> Self {
        Self {
            tasks: heapless::Vec::new(),
            queue: DualPriorityQueue::new(),
            awaiting: heapless::Vec::new(),
            clock,
            log,
        }
    }

    /// Take a task for the rest of the scheduler's life. Ids follow
    /// registration order and break priority ties.
    pub fn add(&mut self, task: &'a mut dyn Schedulable) -> Result<TaskId, Error> {
        ensure!(!self.tasks.is_full(), Violation::SchedulerFull);
        let id = self.tasks.len();
        if self.tasks.push(task).is_err() {
            return Err(Error::assertion(Violation::SchedulerFull));
        }

        let now = self.clock.now();
        match self.file(id, now) {
            Some(queue) => self.log.added(now, id, self.tasks[id].name(), queue),
            None => log::warn!("scheduler: {} registered after it exited", self.tasks[id].name()),
        }
        Ok(id)
    }

    /// Run at most one task for one step
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        self.promote(now);

        let Some(entry) = self.queue.pop_ready() else {
            let next_wake = self.next_wake();
            self.log.idle(now, next_wake);
            return TickReport::Idle { next_wake };
        };

        let id = entry.id;
        let outcome = self.tasks[id].resume(now);
        // diagnostics only; scheduling keeps using `now`
        let finished = self.clock.now();
        self.log.resumed(now, finished, id, self.tasks[id].name(), outcome);

        match self.file(id, now) {
            Some(queue) => self.log.moved(now, id, self.tasks[id].name(), Queue::Running, queue),
            None => {
                if let TaskState::Exited(exit) = self.tasks[id].state() {
                    self.log.removed(now, id, self.tasks[id].name(), exit);
                }
            }
        }
        TickReport::Ran { task: id, outcome }
    }

    // settled awaiters first, in parking order, then everything now due
    fn promote(&mut self, now: Tick) {
        let mut i = 0;
        while i < self.awaiting.len() {
            let id = self.awaiting[i];
            if !self.tasks[id].is_resumable(now) {
                i += 1;
                continue;
            }
            self.awaiting.remove(i);
            self.make_ready(id, now, Queue::Awaiting);
        }

        while let Some(entry) = self.queue.pop_due(now) {
            self.make_ready(entry.id, now, Queue::Waiting);
        }
    }

    fn make_ready(&mut self, id: TaskId, now: Tick, from: Queue) {
        let task = &mut *self.tasks[id];
        task.make_ready();
        let entry = entry_of(id, task);
        if let Err(err) = self.queue.push_ready(entry) {
            log::error!("scheduler: {}#{} dropped: {}", task.name(), id, err);
            return;
        }
        self.log.moved(now, id, task.name(), from, Queue::Ready);
    }

    // put a task where its state says it belongs; None once it exited
    fn file(&mut self, id: TaskId, now: Tick) -> Option<Queue> {
        let task = &mut *self.tasks[id];
        let entry = entry_of(id, task);
        let (queue, placed) = match task.state() {
            TaskState::Exited(_) => return None,
            TaskState::Suspended => (
                Queue::Awaiting,
                self.awaiting
                    .push(id)
                    .map_err(|_| Error::assertion(Violation::SchedulerFull)),
            ),
            _ if entry.ready_time <= now => {
                task.make_ready();
                (Queue::Ready, self.queue.push_ready(entry))
            }
            _ => (Queue::Waiting, self.queue.push_waiting(entry)),
        };
        if let Err(err) = placed {
            log::error!("scheduler: {}#{} dropped: {}", task.name(), id, err);
        }
        Some(queue)
    }

    /// Cancel a task between ticks. Its frames are finalized now.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        if id >= self.tasks.len() {
            return false;
        }
        self.queue.remove(id);
        self.awaiting.retain(|&parked| parked != id);

        let task = &mut *self.tasks[id];
        let was_live = !task.is_exited();
        task.cancel();
        if was_live {
            self.log.removed(self.clock.now(), id, task.name(), Exit::Failure);
        }
        was_live
    }

    /// Earliest ready_time among sleeping tasks
    pub fn next_wake(&self) -> Option<Tick> {
        self.queue.peek_waiting().map(|entry| entry.ready_time)
    }

    pub fn task(&self, id: TaskId) -> Option<&dyn Schedulable> {
        self.tasks.get(id).map(|task| &**task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn n_ready(&self) -> usize {
        self.queue.n_ready()
    }

    pub fn n_waiting(&self) -> usize {
        self.queue.n_waiting()
    }

    pub fn n_awaiting(&self) -> usize {
        self.awaiting.len()
    }

    /// Every registered task has exited
    pub fn is_done(&self) -> bool {
        self.tasks.iter().all(|task| task.is_exited())
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }
}

fn entry_of(id: TaskId, task: &dyn Schedulable) -> Entry {
    Entry {
        id,
        priority: task.priority(),
        ready_time: task.ready_time(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::{Coroutine, Exit, Step, from_fn};
    use crate::kernel::events::{Event, EventLog};
    use crate::kernel::task::{Priority, Task};
    use crate::memory::StackArena;
    use std::cell::Cell;
    use std::rc::Rc;

    type TestArena = StackArena<256>;

    fn done() -> impl Coroutine<Output = Exit> + Clone + 'static {
        from_fn(|_| Step::Ready(Exit::Success))
    }

    #[test]
    fn idle_reports_next_wake() {
        let now = Cell::new(0u64);
        let mut late = Task::new("late", Priority::NORMAL, TestArena::new(), done())
            .unwrap()
            .start_at(50);
        let mut sched = Scheduler::<4, _>::new(|| now.get());
        sched.add(&mut late).unwrap();

        assert_eq!(sched.tick(), TickReport::Idle { next_wake: Some(50) });
        assert_eq!(sched.n_waiting(), 1);

        now.set(50);
        assert_eq!(
            sched.tick(),
            TickReport::Ran {
                task: 0,
                outcome: Outcome::CompletedSuccess
            }
        );
        assert!(sched.is_done());
        assert_eq!(sched.tick(), TickReport::Idle { next_wake: None });
    }

    #[test]
    fn equal_priorities_run_in_registration_order() {
        let run = || {
            let mut a = Task::new("a", Priority(1), TestArena::new(), done()).unwrap();
            let mut b = Task::new("b", Priority(1), TestArena::new(), done()).unwrap();
            let mut c = Task::new("c", Priority(3), TestArena::new(), done()).unwrap();
            let mut sched = Scheduler::<3, _, _>::with_log(|| 0u64, EventLog::<32>::new());
            sched.add(&mut a).unwrap();
            sched.add(&mut b).unwrap();
            sched.add(&mut c).unwrap();
            while let TickReport::Ran { .. } = sched.tick() {}
            sched.log().resumes().collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first, vec![2, 0, 1]);
        for _ in 0..3 {
            assert_eq!(run(), first);
        }
    }

    #[test]
    fn over_capacity_leaves_existing_tasks_alone() {
        let mut a = Task::new("a", Priority::NORMAL, TestArena::new(), done()).unwrap();
        let mut b = Task::new("b", Priority::HIGH, TestArena::new(), done()).unwrap();
        let mut extra = Task::new("extra", Priority::CRITICAL, TestArena::new(), done()).unwrap();
        let mut sched = Scheduler::<2, _>::new(|| 0u64);
        sched.add(&mut a).unwrap();
        sched.add(&mut b).unwrap();

        match sched.add(&mut extra) {
            Err(Error::Assertion(failure)) => {
                assert_eq!(failure.violation, Violation::SchedulerFull)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(sched.len(), 2);
        assert_eq!(sched.n_ready(), 2);
        assert_eq!(sched.tick(), TickReport::Ran { task: 1, outcome: Outcome::CompletedSuccess });
        assert_eq!(sched.tick(), TickReport::Ran { task: 0, outcome: Outcome::CompletedSuccess });
    }

    #[test]
    fn failing_task_is_isolated() {
        let now = Cell::new(0u64);
        let mut bad = Task::new(
            "bad",
            Priority::HIGH,
            TestArena::new(),
            from_fn(|_| Step::<Exit>::Failed(crate::error::Fault::Raised(1))),
        )
        .unwrap();
        let mut beat = Task::hard_periodic("beat", Priority::NORMAL, 10, TestArena::new(), done()).unwrap();
        let mut sched = Scheduler::<2, _>::new(|| now.get());
        sched.add(&mut bad).unwrap();
        sched.add(&mut beat).unwrap();

        assert_eq!(sched.tick(), TickReport::Ran { task: 0, outcome: Outcome::CompletedFailure });
        assert_eq!(sched.task(0).map(|t| t.state()), Some(TaskState::Exited(Exit::Failure)));

        for release in [0, 10, 20] {
            now.set(release);
            assert_eq!(sched.tick(), TickReport::Ran { task: 1, outcome: Outcome::CompletedSuccess });
        }
        assert_eq!(sched.task(1).map(|t| t.ready_time()), Some(30));
        assert_eq!(sched.n_ready() + sched.n_waiting(), 1);
    }

    #[test]
    fn signal_wakes_parked_task() {
        use crate::kernel::clock::WakeFlag;
        static FLAG: WakeFlag = WakeFlag::new();

        let woke = Rc::new(Cell::new(false));
        let seen = woke.clone();
        let mut parked = false;
        let body = from_fn(move |cx| {
            if parked {
                seen.set(FLAG.take());
                return Step::Ready(Exit::Success);
            }
            parked = true;
            cx.wait_on(&FLAG)
        });
        let mut task = Task::new("irq", Priority::NORMAL, TestArena::new(), body).unwrap();
        let mut sched = Scheduler::<1, _>::new(|| 0u64);
        sched.add(&mut task).unwrap();

        assert!(matches!(sched.tick(), TickReport::Ran { outcome: Outcome::Suspended, .. }));
        assert_eq!(sched.n_awaiting(), 1);
        assert_eq!(sched.tick(), TickReport::Idle { next_wake: None });

        FLAG.signal();
        assert_eq!(sched.tick(), TickReport::Ran { task: 0, outcome: Outcome::CompletedSuccess });
        assert!(woke.get());
    }

    #[test]
    fn cancel_removes_from_queues() {
        let mut slow = Task::new("slow", Priority::NORMAL, TestArena::new(), from_fn(|cx| cx.delay::<Exit>(10))).unwrap();
        let mut sched = Scheduler::<1, _, _>::with_log(|| 0u64, EventLog::<8>::new());
        sched.add(&mut slow).unwrap();
        sched.tick();
        assert_eq!(sched.n_waiting(), 1);

        assert!(sched.cancel(0));
        assert!(!sched.cancel(0));
        assert_eq!(sched.n_waiting(), 0);
        assert!(sched.is_done());
        assert!(sched.log().events().contains(&Event::Removed {
            at: 0,
            id: 0,
            exit: Exit::Failure
        }));
    }

    #[test]
    fn step_duration_is_reported() {
        // every read of this clock advances it by 3
        let now = Cell::new(0u64);
        let clock = || {
            let t = now.get();
            now.set(t + 3);
            t
        };
        let mut task = Task::new("step", Priority::NORMAL, TestArena::new(), done()).unwrap();
        let mut sched = Scheduler::<1, _, _>::with_log(clock, EventLog::<8>::new());
        sched.add(&mut task).unwrap();
        assert_eq!(sched.tick(), TickReport::Ran { task: 0, outcome: Outcome::CompletedSuccess });

        assert!(sched.log().events().contains(&Event::Resumed {
            at: 3,
            finished: 6,
            id: 0,
            outcome: Outcome::CompletedSuccess
        }));
        assert_eq!(sched.log().longest_step(), Some(3));
    }

    #[test]
    fn soft_release_counts_from_tick_start() {
        let now = Cell::new(0u64);
        let clock = || {
            let t = now.get();
            now.set(t + 3);
            t
        };
        let mut task = Task::soft_periodic("log", Priority::LOW, 10, TestArena::new(), done()).unwrap();
        let mut sched = Scheduler::<1, _, _>::with_log(clock, EventLog::<8>::new());
        sched.add(&mut task).unwrap();
        assert_eq!(sched.tick(), TickReport::Ran { task: 0, outcome: Outcome::CompletedSuccess });

        // the step ran from 3 to 6; the release counts from 3
        assert_eq!(sched.task(0).map(|task| task.ready_time()), Some(13));
    }
}
