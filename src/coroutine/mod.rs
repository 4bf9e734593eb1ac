// Stackless coroutines
//
// A coroutine is an explicit state machine: each `resume` runs until the
// next suspension point and returns. Its state lives in a frame inside
// the owning task's arena, never on a call stack that outlives a tick.

pub mod chain;
pub mod context;
mod frame;

pub use chain::{Chain, Outcome};
pub use context::{Call, Context, Readiness, Wait};

use crate::error::{Error, Fault};

pub trait Coroutine {
    type Output;

    /// Advance to the next suspension point. `Step::Pending` suspends on
    /// whatever was registered through `cx`, or yields if nothing was.
    fn resume(&mut self, cx: &mut Context<'_>) -> Step<Self::Output>;
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<T> {
    Pending,
    Ready(T),
    Failed(Fault),
}

impl<T> From<Fault> for Step<T> {
    fn from(fault: Fault) -> Self {
        Step::Failed(fault)
    }
}

impl<T> From<Error> for Step<T> {
    fn from(err: Error) -> Self {
        Step::Failed(err.into())
    }
}

/// How a root coroutine ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    Failure,
}

/// Coroutine driven by a closure
#[derive(Clone)]
pub struct FromFn<F>(F);

pub fn from_fn<T, F>(f: F) -> FromFn<F>
where
    F: FnMut(&mut Context<'_>) -> Step<T>,
{
    FromFn(f)
}

impl<T, F> Coroutine for FromFn<F>
where
    F: FnMut(&mut Context<'_>) -> Step<T>,
{
    type Output = T;

    fn resume(&mut self, cx: &mut Context<'_>) -> Step<T> {
        (self.0)(cx)
    }
}
