// Entangled future/promise channel
//
// Single-shot result slots in a fixed table. Future and Promise are two
// independent handles to the same slot; neither owns it. The slot goes
// back to the table once both halves are gone. All state changes happen
// under a critical section so a promise can be fulfilled from an ISR.
//
//   Empty -> Pending -> Ready -> Consumed
//   Empty | Pending -> Abandoned    (promise dropped unwritten)

use core::cell::RefCell;
use core::mem;

use critical_section::Mutex;

use crate::coroutine::Readiness;
use crate::error::{AllocationFailure, Error, Fault, Violation};

enum State<T> {
    Free,
    Empty,
    /// a coroutine is parked on the future
    Pending,
    Ready(T),
    Failed(Fault),
    Consumed,
    Abandoned,
}

struct Inner<T> {
    state: State<T>,
    future: bool,
    promise: bool,
    callback: Option<fn(T)>,
}

struct Slot<T>(Mutex<RefCell<Inner<T>>>);

impl<T> Slot<T> {
    const fn new() -> Self {
        Self(Mutex::new(RefCell::new(Inner {
            state: State::Free,
            future: false,
            promise: false,
            callback: None,
        })))
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<T>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.0.borrow_ref_mut(cs)))
    }

    fn claim(&self) -> bool {
        self.with(|inner| {
            if !matches!(inner.state, State::Free) {
                return false;
            }
            inner.state = State::Empty;
            inner.future = true;
            inner.promise = true;
            inner.callback = None;
            true
        })
    }

    fn settled(&self) -> bool {
        self.with(|inner| !matches!(inner.state, State::Free | State::Empty | State::Pending))
    }
}

impl<T: Send> Readiness for Slot<T> {
    fn is_ready(&self) -> bool {
        self.settled()
    }
}

pub struct ChannelTable<T, const N: usize> {
    slots: [Slot<T>; N],
}

impl<T, const N: usize> ChannelTable<T, N> {
    pub const fn new() -> Self {
        Self {
            slots: [const { Slot::new() }; N],
        }
    }

    /// Claim a free slot and hand out both halves
    pub fn pair(&self) -> Result<(Future<'_, T>, Promise<'_, T>), Error> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.claim() {
                log::trace!("channel {}: open", index);
                let future = Future { slot, index };
                let promise = Promise {
                    slot,
                    index,
                    written: false,
                };
                return Ok((future, promise));
            }
        }
        Err(Error::Allocation(AllocationFailure {
            requested: 1,
            capacity: N,
            available: 0,
        }))
    }

    /// Slots currently held by at least one half
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.with(|inner| !matches!(inner.state, State::Free)))
            .count()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for ChannelTable<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

enum Polled<T> {
    Value(T),
    Empty,
    Failed(Fault),
    Consumed,
}

/// Reading half
pub struct Future<'t, T> {
    slot: &'t Slot<T>,
    index: usize,
}

impl<'t, T> Future<'t, T> {
    /// Take the value if it is there. Never blocks.
    pub fn poll(&mut self) -> Result<Option<T>, Fault> {
        let polled = self.slot.with(|inner| match inner.state {
            State::Ready(_) => match mem::replace(&mut inner.state, State::Consumed) {
                State::Ready(value) => Polled::Value(value),
                _ => Polled::Empty,
            },
            State::Failed(fault) => Polled::Failed(fault),
            State::Abandoned => Polled::Failed(Fault::BrokenChannel),
            State::Consumed => Polled::Consumed,
            State::Free | State::Empty | State::Pending => Polled::Empty,
        });
        match polled {
            Polled::Value(value) => Ok(Some(value)),
            Polled::Empty => Ok(None),
            Polled::Failed(fault) => Err(fault),
            Polled::Consumed => Err(Error::assertion(Violation::ValueConsumed).into()),
        }
    }

    /// Settled one way or another; the next poll will not return `None`
    pub fn is_ready(&self) -> bool {
        self.slot.settled()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    // a coroutine is about to park on this future
    pub(crate) fn register(&self) {
        self.slot.with(|inner| {
            if matches!(inner.state, State::Empty) {
                inner.state = State::Pending;
            }
        });
    }

    pub(crate) fn readiness(&self) -> &'t dyn Readiness
    where
        T: Send + 't,
    {
        self.slot
    }

    /// Give up the future and have the promise call `callback` with the
    /// value instead. Runs right away if the value is already there.
    pub fn on_ready(self, callback: fn(T)) {
        let ready = self.slot.with(|inner| match inner.state {
            State::Ready(_) => match mem::replace(&mut inner.state, State::Consumed) {
                State::Ready(value) => Some(value),
                _ => None,
            },
            State::Empty | State::Pending => {
                inner.callback = Some(callback);
                None
            }
            _ => None,
        });
        if let Some(value) = ready {
            callback(value);
        }
    }
}

impl<T> Drop for Future<'_, T> {
    fn drop(&mut self) {
        let stale = self.slot.with(|inner| {
            inner.future = false;
            if inner.promise || inner.callback.is_some() {
                return None;
            }
            Some(mem::replace(&mut inner.state, State::Free))
        });
        if stale.is_some() {
            log::trace!("channel {}: closed", self.index);
        }
    }
}

enum Written<T> {
    Stored,
    Deliver(fn(T), T),
    Dropped(T),
    Twice,
}

/// Writing half
pub struct Promise<'t, T> {
    slot: &'t Slot<T>,
    index: usize,
    written: bool,
}

impl<T> Promise<'_, T> {
    /// Fulfil the channel. Writing after the future was dropped is a
    /// no-op; writing twice is a critical assertion failure.
    pub fn set_value(&mut self, value: T) -> Result<(), Error> {
        if self.written {
            return Err(Error::assertion(Violation::DoubleWrite));
        }
        let written = self.slot.with(|inner| {
            if let Some(callback) = inner.callback.take() {
                inner.state = State::Consumed;
                return Written::Deliver(callback, value);
            }
            if !inner.future {
                return Written::Dropped(value);
            }
            match inner.state {
                State::Empty | State::Pending => {
                    inner.state = State::Ready(value);
                    Written::Stored
                }
                _ => Written::Twice,
            }
        });
        self.settle(written)
    }

    /// Fail the channel; the reader sees `fault` from `poll`
    pub fn set_exception(&mut self, fault: Fault) -> Result<(), Error> {
        if self.written {
            return Err(Error::assertion(Violation::DoubleWrite));
        }
        let written = self.slot.with(|inner| {
            inner.callback = None;
            match inner.state {
                State::Empty | State::Pending if inner.future => {
                    inner.state = State::Failed(fault);
                    Written::Stored
                }
                State::Empty | State::Pending => {
                    inner.state = State::Consumed;
                    Written::Stored
                }
                _ => Written::Twice,
            }
        });
        self.settle(written)
    }

    fn settle(&mut self, written: Written<T>) -> Result<(), Error> {
        match written {
            Written::Twice => return Err(Error::assertion(Violation::DoubleWrite)),
            Written::Deliver(callback, value) => callback(value),
            Written::Dropped(_) => log::trace!("channel {}: reader gone, value dropped", self.index),
            Written::Stored => {}
        }
        self.written = true;
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Drop for Promise<'_, T> {
    fn drop(&mut self) {
        let written = self.written;
        let (abandoned, orphaned, stale) = self.slot.with(|inner| {
            inner.promise = false;
            if !inner.future {
                let orphaned = inner.callback.take().is_some() && !written;
                return (false, orphaned, Some(mem::replace(&mut inner.state, State::Free)));
            }
            if !written && matches!(inner.state, State::Empty | State::Pending) {
                inner.state = State::Abandoned;
                return (true, false, None);
            }
            (false, false, None)
        });
        if abandoned {
            log::debug!("channel {}: promise dropped unwritten", self.index);
        }
        if orphaned {
            log::debug!("channel {}: promise dropped unwritten, on_ready callback discarded", self.index);
        }
        drop(stale);
    }
}

/// Take the value of `$future` inside a coroutine body, parking the
/// coroutine until it arrives. A broken or failed channel fails the step.
#[macro_export]
macro_rules! ready {
    ($cx:expr, $future:expr) => {
        match $future.poll() {
            Ok(Some(value)) => value,
            Ok(None) => return $cx.wait_for(&$future),
            Err(fault) => return $crate::coroutine::Step::Failed(fault),
        }
    };
}
