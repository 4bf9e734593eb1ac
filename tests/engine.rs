// End-to-end scheduling behaviour: tasks, nested coroutines, channels
// and ISR-style wake sources driven through one scheduler.

use std::cell::Cell;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use fiber_os::kernel::{EventLog, Schedulable};
use fiber_os::memory::{Arena, DebugArena};
use fiber_os::{
    Call, ChannelTable, Context, Coroutine, Exit, Fault, Future, Outcome, Priority, Promise,
    Scheduler, StackArena, Step, Task, TaskState, TickReport, from_fn,
};

/// Averages `n` samples taken `gap` ticks apart
struct Average {
    state: AverageState,
    total: u32,
    taken: u32,
    n: u32,
    gap: u64,
}

enum AverageState {
    Sample,
    Wait,
}

impl Average {
    fn new(n: u32, gap: u64) -> Self {
        Self {
            state: AverageState::Sample,
            total: 0,
            taken: 0,
            n,
            gap,
        }
    }
}

impl Coroutine for Average {
    type Output = u32;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<u32> {
        loop {
            match self.state {
                AverageState::Sample => {
                    // fake ADC: reading equals the tick
                    self.total += cx.now() as u32;
                    self.taken += 1;
                    if self.taken == self.n {
                        return Step::Ready(self.total / self.n);
                    }
                    self.state = AverageState::Wait;
                    return cx.delay(self.gap);
                }
                AverageState::Wait => self.state = AverageState::Sample,
            }
        }
    }
}

/// Root: runs an Average and checks the result
struct Report {
    call: Option<Call<Average>>,
    result: Rc<Cell<Option<u32>>>,
}

impl Coroutine for Report {
    type Output = Exit;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<Exit> {
        match self.call.take() {
            None => match cx.call(Average::new(3, 10)) {
                Ok(call) => {
                    self.call = Some(call);
                    Step::Pending
                }
                Err(fault) => fault.into(),
            },
            Some(call) => match cx.join(call) {
                Ok(avg) => {
                    self.result.set(Some(avg));
                    Step::Ready(Exit::Success)
                }
                Err(fault) => fault.into(),
            },
        }
    }
}

#[test]
fn nested_coroutine_spans_ticks() {
    let now = Cell::new(0u64);
    let result = Rc::new(Cell::new(None));
    let root = Report {
        call: None,
        result: result.clone(),
    };
    let mut task = Task::new("report", Priority::NORMAL, DebugArena::new(StackArena::<512>::new()), root).unwrap();
    {
        let mut sched = Scheduler::<1, _>::new(|| now.get());
        sched.add(&mut task).unwrap();

        for t in [0, 10, 20] {
            now.set(t);
            assert!(matches!(sched.tick(), TickReport::Ran { .. }));
        }
        assert!(sched.is_done());
    }
    // samples at 0, 10, 20
    assert_eq!(result.get(), Some(10));
    assert_eq!(task.state(), TaskState::Exited(Exit::Success));

    let stats = task.chain().arena().stats();
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.outstanding, 0);
    assert!(stats.high_water <= task.chain().arena().capacity());
}

struct Consumer {
    rx: Future<'static, u32>,
    resumes: Rc<Cell<u32>>,
}

impl Coroutine for Consumer {
    type Output = Exit;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<Exit> {
        self.resumes.set(self.resumes.get() + 1);
        let value = fiber_os::ready!(cx, self.rx);
        Step::Ready(if value == 42 { Exit::Success } else { Exit::Failure })
    }
}

struct Producer {
    tx: Option<Promise<'static, u32>>,
    write: bool,
    slept: bool,
}

impl Coroutine for Producer {
    type Output = Exit;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<Exit> {
        if !self.slept {
            self.slept = true;
            return cx.delay(5);
        }
        let Some(mut tx) = self.tx.take() else {
            return Step::Ready(Exit::Failure);
        };
        if self.write {
            if let Err(err) = tx.set_value(42) {
                return err.into();
            }
        }
        // tx dropped here, written or not
        Step::Ready(Exit::Success)
    }
}

fn run_pair(table: &'static ChannelTable<u32, 2>, write: bool) -> (TaskState, Option<Fault>, u32) {
    let now = Cell::new(0u64);
    let (rx, tx) = table.pair().unwrap();
    let resumes = Rc::new(Cell::new(0));
    let mut consumer = Task::new(
        "consumer",
        Priority::HIGH,
        StackArena::<256>::new(),
        Consumer {
            rx,
            resumes: resumes.clone(),
        },
    )
    .unwrap();
    let mut producer = Task::new(
        "producer",
        Priority::NORMAL,
        StackArena::<256>::new(),
        Producer {
            tx: Some(tx),
            write,
            slept: false,
        },
    )
    .unwrap();

    {
        let mut sched = Scheduler::<2, _>::new(|| now.get());
        sched.add(&mut consumer).unwrap();
        sched.add(&mut producer).unwrap();

        for t in [0, 0, 0, 5, 5, 5, 6, 7] {
            now.set(t);
            sched.tick();
        }
        assert!(sched.is_done());
    }
    (consumer.state(), consumer.fault(), resumes.get())
}

#[test]
fn broken_promise_wakes_waiter_once() {
    static TABLE: ChannelTable<u32, 2> = ChannelTable::new();
    let (state, fault, resumes) = run_pair(&TABLE, false);
    assert_eq!(state, TaskState::Exited(Exit::Failure));
    assert_eq!(fault, Some(Fault::BrokenChannel));
    // parked once, woken once
    assert_eq!(resumes, 2);
    assert_eq!(TABLE.in_use(), 0);
}

#[test]
fn promise_value_reaches_waiter() {
    static TABLE: ChannelTable<u32, 2> = ChannelTable::new();
    let (state, fault, resumes) = run_pair(&TABLE, true);
    assert_eq!(state, TaskState::Exited(Exit::Success));
    assert_eq!(fault, None);
    assert_eq!(resumes, 2);
    // both halves are gone, the slot is back in the table
    assert_eq!(TABLE.in_use(), 0);
}

#[test]
fn one_task_running_at_a_time() {
    let now = Cell::new(0u64);
    let active = Rc::new(Cell::new(0u32));
    let peak = Rc::new(Cell::new(0u32));

    let worker = |gap: u64, rounds: u32| {
        let active = active.clone();
        let peak = peak.clone();
        let mut left = rounds;
        from_fn(move |cx| {
            active.set(active.get() + 1);
            peak.set(peak.get().max(active.get()));
            let step = if left == 0 {
                Step::Ready(Exit::Success)
            } else {
                left -= 1;
                if left % 2 == 0 { cx.delay(gap) } else { cx.yield_now() }
            };
            active.set(active.get() - 1);
            step
        })
    };

    let mut a = Task::new("a", Priority(2), StackArena::<256>::new(), worker(3, 9)).unwrap();
    let mut b = Task::new("b", Priority(2), StackArena::<256>::new(), worker(5, 7)).unwrap();
    let mut c = Task::new("c", Priority(7), StackArena::<256>::new(), worker(2, 11)).unwrap();
    let mut sched = Scheduler::<3, _>::new(|| now.get());
    sched.add(&mut a).unwrap();
    sched.add(&mut b).unwrap();
    sched.add(&mut c).unwrap();

    for t in 0..200u64 {
        now.set(t / 4);
        sched.tick();
        let running = (0..sched.len())
            .filter(|&id| sched.task(id).map(|task| task.state()) == Some(TaskState::Running))
            .count();
        assert_eq!(running, 0);
    }
    assert!(sched.is_done());
    assert_eq!(peak.get(), 1);
}

#[test]
fn hard_periodic_ready_times_through_scheduler() {
    let now = Cell::new(0u64);
    let body = from_fn(|_| Step::Ready(Exit::Success));
    let mut beat = Task::hard_periodic("beat", Priority::HIGH, 8, StackArena::<128>::new(), body).unwrap();
    let mut sched = Scheduler::<1, _, _>::with_log(|| now.get(), EventLog::<64>::new());
    sched.add(&mut beat).unwrap();

    let mut releases = Vec::new();
    for (release, lateness) in [(0, 0), (8, 7), (16, 1), (24, 5), (32, 0)] {
        now.set(release + lateness);
        releases.push(sched.task(0).map(|t| t.ready_time()).unwrap());
        assert_eq!(
            sched.tick(),
            TickReport::Ran {
                task: 0,
                outcome: Outcome::CompletedSuccess
            }
        );
    }
    assert_eq!(releases, vec![0, 8, 16, 24, 32]);
    assert_eq!(sched.next_wake(), Some(40));
}

static SAMPLE: Signal<CriticalSectionRawMutex, u16> = Signal::new();

#[test]
fn embassy_signal_as_wake_source() {
    let got = Rc::new(Cell::new(0u16));
    let seen = got.clone();
    let mut parked = false;
    let body = from_fn(move |cx| {
        if !parked {
            parked = true;
            return cx.wait_on(&SAMPLE);
        }
        match SAMPLE.try_take() {
            Some(value) => {
                seen.set(value);
                Step::Ready(Exit::Success)
            }
            None => Step::Failed(Fault::Raised(1)),
        }
    });
    let mut task = Task::new("adc", Priority::NORMAL, StackArena::<128>::new(), body).unwrap();
    let mut sched = Scheduler::<1, _>::new(|| 0u64);
    sched.add(&mut task).unwrap();

    sched.tick();
    assert_eq!(sched.n_awaiting(), 1);
    assert_eq!(sched.tick(), TickReport::Idle { next_wake: None });

    // what the ISR would do
    SAMPLE.signal(512);
    assert!(matches!(
        sched.tick(),
        TickReport::Ran {
            outcome: Outcome::CompletedSuccess,
            ..
        }
    ));
    assert_eq!(got.get(), 512);
}

#[test]
fn registration_order_is_reproducible() {
    let order = || {
        let done = || from_fn(|_| Step::Ready(Exit::Success));
        let mut tasks = [
            Task::new("p1a", Priority(1), StackArena::<128>::new(), done()).unwrap(),
            Task::new("p1b", Priority(1), StackArena::<128>::new(), done()).unwrap(),
            Task::new("p3", Priority(3), StackArena::<128>::new(), done()).unwrap(),
        ];
        let mut sched = Scheduler::<3, _, _>::with_log(|| 0u64, EventLog::<32>::new());
        for task in tasks.iter_mut() {
            sched.add(task).unwrap();
        }
        while let TickReport::Ran { .. } = sched.tick() {}
        sched.log().resumes().collect::<Vec<_>>()
    };
    let first = order();
    assert_eq!(first, vec![2, 0, 1]);
    assert!((0..10).all(|_| order() == first));
}
