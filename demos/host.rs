// fiber-os host demo
//
// A std thread stands in for the timer ISR: it advances the tick
// counter every millisecond and raises the button signal now and then.
// The main loop drains the scheduler and sleeps when nothing is due.
//
// Tasks:
//   blink    hard-periodic, keeps its LED state across cycles
//   producer samples three ticks through a nested coroutine, then
//            fulfils a promise
//   consumer parks on the matching future
//   button   counts three button presses

use std::thread;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::info;
use static_cell::StaticCell;

use fiber_os::kernel::{Tick, TickCounter, TimeSource, Trace};
use fiber_os::{
    Call, ChannelTable, Context, Coroutine, Exit, Future, Priority, Promise, Scheduler, StackArena,
    Step, Task, TickReport,
};

const BLINK_PERIOD: Tick = 100;
const SAMPLE_GAP: Tick = 20;
const BUTTON_EVERY: Tick = 150;
const RUN_FOR: Tick = 2000;

static TICKS: TickCounter = TickCounter::new();
static BUTTON: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static CHANNELS: ChannelTable<u32, 2> = ChannelTable::new();

fn now() -> Tick {
    TICKS.now()
}

#[derive(Clone)]
struct Blink {
    on: bool,
}

impl Coroutine for Blink {
    type Output = Exit;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<Exit> {
        self.on = !self.on;
        info!("[{}] led {}", cx.now(), if self.on { "on" } else { "off" });
        cx.next_cycle()
    }
}

struct Sampler {
    left: u8,
    total: u32,
}

impl Coroutine for Sampler {
    type Output = u32;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<u32> {
        // stand-in ADC reading
        self.total += (cx.now() % 97) as u32;
        self.left -= 1;
        if self.left == 0 {
            return Step::Ready(self.total);
        }
        cx.delay(SAMPLE_GAP)
    }
}

enum ProducerState {
    Start,
    Sampling(Call<Sampler>),
    Done,
}

struct Producer {
    state: ProducerState,
    tx: Promise<'static, u32>,
}

impl Coroutine for Producer {
    type Output = Exit;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<Exit> {
        match core::mem::replace(&mut self.state, ProducerState::Done) {
            ProducerState::Start => match cx.call(Sampler { left: 3, total: 0 }) {
                Ok(call) => {
                    self.state = ProducerState::Sampling(call);
                    Step::Pending
                }
                Err(fault) => fault.into(),
            },
            ProducerState::Sampling(call) => {
                let total = match cx.join(call) {
                    Ok(total) => total,
                    Err(fault) => return fault.into(),
                };
                info!("[{}] sampled {}", cx.now(), total);
                match self.tx.set_value(total) {
                    Ok(()) => Step::Ready(Exit::Success),
                    Err(err) => err.into(),
                }
            }
            ProducerState::Done => Step::Ready(Exit::Failure),
        }
    }
}

struct Consumer {
    rx: Future<'static, u32>,
}

impl Coroutine for Consumer {
    type Output = Exit;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<Exit> {
        let total = fiber_os::ready!(cx, self.rx);
        info!("[{}] consumer got {}", cx.now(), total);
        Step::Ready(Exit::Success)
    }
}

struct Button {
    presses: u8,
    parked: bool,
}

impl Coroutine for Button {
    type Output = Exit;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<Exit> {
        if self.parked && BUTTON.try_take().is_some() {
            self.presses += 1;
            info!("[{}] button press {}", cx.now(), self.presses);
            if self.presses == 3 {
                return Step::Ready(Exit::Success);
            }
        }
        self.parked = true;
        cx.wait_on(&BUTTON)
    }
}

static BLINK: StaticCell<Task<Blink, StackArena<128>>> = StaticCell::new();
static PRODUCER: StaticCell<Task<Producer, StackArena<256>>> = StaticCell::new();
static CONSUMER: StaticCell<Task<Consumer, StackArena<128>>> = StaticCell::new();
static BUTTON_TASK: StaticCell<Task<Button, StackArena<128>>> = StaticCell::new();

fn main() -> Result<(), fiber_os::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // timer ISR
    thread::spawn(|| {
        loop {
            thread::sleep(Duration::from_millis(1));
            TICKS.advance();
            let tick = TICKS.now();
            if tick % BUTTON_EVERY == 0 {
                BUTTON.signal(());
            }
            if tick > RUN_FOR {
                break;
            }
        }
    });

    let (rx, tx) = CHANNELS.pair()?;

    let mut sched: Scheduler<'static, 4, fn() -> Tick, Trace> =
        Scheduler::with_log(now as fn() -> Tick, Trace);
    let blink = sched.add(BLINK.init(Task::hard_periodic(
        "blink",
        Priority::LOW,
        BLINK_PERIOD,
        StackArena::new(),
        Blink { on: false },
    )?))?;
    sched.add(PRODUCER.init(
        Task::new(
            "producer",
            Priority::NORMAL,
            StackArena::new(),
            Producer {
                state: ProducerState::Start,
                tx,
            },
        )?
        .start_at(50),
    ))?;
    sched.add(CONSUMER.init(Task::new("consumer", Priority::HIGH, StackArena::new(), Consumer { rx })?))?;
    sched.add(BUTTON_TASK.init(Task::new(
        "button",
        Priority::CRITICAL,
        StackArena::new(),
        Button {
            presses: 0,
            parked: false,
        },
    )?))?;

    loop {
        if let TickReport::Idle { .. } = sched.tick() {
            let others_done = (0..sched.len())
                .filter(|&id| id != blink)
                .all(|id| sched.task(id).is_some_and(|task| task.is_exited()));
            if others_done || now() > RUN_FOR {
                break;
            }
            // host stand-in for wait_for_interrupt
            thread::sleep(Duration::from_micros(200));
        }
    }

    sched.cancel(blink);
    for id in 0..sched.len() {
        if let Some(task) = sched.task(id) {
            info!("{}: {:?}", task.name(), task.state());
        }
    }
    Ok(())
}
