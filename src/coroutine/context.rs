// What a coroutine sees while it runs
//
// A step registers at most one suspension: a nested call, a timed
// delay, a readiness source or a cycle boundary. Nothing registered
// means a plain yield.

use core::fmt;
use core::marker::PhantomData;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;

use super::frame::{self, FrameRef};
use super::{Coroutine, Step};
use crate::channel::Future;
use crate::error::{Error, Fault, Violation};
use crate::kernel::clock::Tick;
use crate::memory::Arena;

/// Anything a coroutine can park on until it flips to ready. Checked
/// once per scheduler tick while the task is suspended.
pub trait Readiness: Sync {
    fn is_ready(&self) -> bool;
}

impl<M: RawMutex + Sync, T: Send> Readiness for Signal<M, T> {
    fn is_ready(&self) -> bool {
        self.signaled()
    }
}

/// Suspension registered by the last step of the leaf
#[derive(Clone, Copy)]
pub enum Wait {
    Yield,
    Until(Tick),
    NextCycle,
    On(&'static dyn Readiness),
}

impl Wait {
    pub fn is_satisfied(&self, now: Tick) -> bool {
        match self {
            Wait::Yield | Wait::NextCycle => true,
            Wait::Until(at) => *at <= now,
            Wait::On(source) => source.is_ready(),
        }
    }
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wait::Yield => write!(f, "Yield"),
            Wait::Until(at) => write!(f, "Until({})", at),
            Wait::NextCycle => write!(f, "NextCycle"),
            Wait::On(_) => write!(f, "On(..)"),
        }
    }
}

// chain state a step is allowed to touch
pub(crate) struct Links {
    pub wait: Wait,
    /// child registered during the current step, not yet the leaf
    pub call: Option<FrameRef>,
    /// completed child waiting for its parent to join it
    pub joinable: Option<FrameRef>,
    pub serial: u32,
}

impl Links {
    pub const fn new() -> Self {
        Self {
            wait: Wait::Yield,
            call: None,
            joinable: None,
            serial: 0,
        }
    }

    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }
}

/// Handle to a nested coroutine, redeemed with [`Context::join`]
#[must_use]
pub struct Call<C> {
    serial: u32,
    _child: PhantomData<fn() -> C>,
}

impl<C> fmt::Debug for Call<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Call(#{})", self.serial)
    }
}

pub struct Context<'a> {
    arena: &'a dyn Arena,
    now: Tick,
    frame: FrameRef,
    links: &'a mut Links,
}

impl<'a> Context<'a> {
    pub(crate) fn new(arena: &'a dyn Arena, now: Tick, frame: FrameRef, links: &'a mut Links) -> Self {
        Self {
            arena,
            now,
            frame,
            links,
        }
    }

    /// Tick the current resume started at
    #[inline]
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Run `child` in a frame of this task's arena and make it the leaf.
    /// Return `Step::Pending` right after; the child starts in the same
    /// resume. A failure inside the child fails every ancestor up to the
    /// root. A wait registered earlier in the same step is dropped.
    pub fn call<C: Coroutine + 'static>(&mut self, child: C) -> Result<Call<C>, Fault> {
        self.spawn(child, false)
    }

    /// Like [`call`](Self::call), but the child's failure comes back
    /// through [`join`](Self::join) instead of cascading.
    pub fn try_call<C: Coroutine + 'static>(&mut self, child: C) -> Result<Call<C>, Fault> {
        self.spawn(child, true)
    }

    fn spawn<C: Coroutine + 'static>(&mut self, child: C, catches: bool) -> Result<Call<C>, Fault> {
        if self.links.call.is_some() {
            return Err(Error::assertion(Violation::DoubleRegistration).into());
        }
        self.release_joinable()?;

        let serial = self.links.next_serial();
        let frame = frame::emplace(self.arena, Some(self.frame), catches, serial, child)?;
        self.links.call = Some(frame);
        Ok(Call {
            serial,
            _child: PhantomData,
        })
    }

    /// Collect the output of a completed child. Only valid in the step
    /// right after the child finished; later steps have already freed it.
    pub fn join<C: Coroutine + 'static>(&mut self, call: Call<C>) -> Result<C::Output, Fault> {
        match self.links.joinable {
            Some(frame) if frame.serial == call.serial => {
                self.links.joinable = None;
                // SAFETY: the serial matched, so this frame was built by
                // emplace::<C> for this very handle.
                let output = unsafe { frame::take_output::<C>(frame.ptr(self.arena)) };
                frame::release(self.arena, frame)?;
                output
            }
            _ => Err(Error::assertion(Violation::NotJoinable).into()),
        }
    }

    /// Sleep for `ticks` from the start of this resume
    pub fn delay<T>(&mut self, ticks: Tick) -> Step<T> {
        self.register(Wait::Until(self.now.saturating_add(ticks)))
    }

    pub fn delay_until<T>(&mut self, at: Tick) -> Step<T> {
        self.register(Wait::Until(at))
    }

    /// Give the CPU back; the task stays due
    pub fn yield_now<T>(&mut self) -> Step<T> {
        Step::Pending
    }

    /// End the current period of a periodic task, keeping all frames.
    /// A one-shot task treats this as a yield.
    pub fn next_cycle<T>(&mut self) -> Step<T> {
        self.register(Wait::NextCycle)
    }

    pub fn wait_on<T>(&mut self, source: &'static dyn Readiness) -> Step<T> {
        self.register(Wait::On(source))
    }

    /// Park until `future` settles. Poll it again on the next resume.
    pub fn wait_for<V: Send + 'static, T>(&mut self, future: &Future<'static, V>) -> Step<T> {
        future.register();
        self.register(Wait::On(future.readiness()))
    }

    fn register<T>(&mut self, wait: Wait) -> Step<T> {
        if self.links.call.is_some() || !matches!(self.links.wait, Wait::Yield) {
            log::warn!("second suspension in one step ignored: {:?}", wait);
        } else {
            self.links.wait = wait;
        }
        Step::Pending
    }

    fn release_joinable(&mut self) -> Result<(), Error> {
        match self.links.joinable.take() {
            Some(frame) => frame::release(self.arena, frame),
            None => Ok(()),
        }
    }
}
