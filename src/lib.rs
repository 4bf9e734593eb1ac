// Stackless cooperative execution engine for small embedded targets
//
// Tasks are explicit state machines whose frames live in per-task
// arenas. A fixed-capacity scheduler resumes one task per tick, ordered
// by due time and then priority. No heap, no threads, no preemption.

#![cfg_attr(not(test), no_std)]

pub mod channel;
pub mod coroutine;
pub mod error;
pub mod kernel;
pub mod memory;

pub use channel::{ChannelTable, Future, Promise};
pub use coroutine::{Call, Chain, Context, Coroutine, Exit, Outcome, Readiness, Step, from_fn};
pub use error::{AllocationFailure, AssertionFailure, Error, Fault, Severity, Violation};
pub use kernel::{LinearScheduler, Priority, Scheduler, Task, TaskState, TickReport};
pub use memory::{Arena, DebugArena, LinearArena, StackArena};
