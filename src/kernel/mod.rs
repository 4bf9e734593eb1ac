// Cooperative scheduler and its time base
// Single core, no preemption. One task step per tick; the caller idles
// the CPU (wait_for_interrupt) when a tick reports nothing due.

pub mod clock;
pub mod events;
pub mod linear;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use clock::{Tick, TickCounter, TimeSource, WakeFlag, wait_for_interrupt};
pub use events::{Event, EventLog, NoLog, SchedulerLog, Trace};
pub use linear::LinearScheduler;
pub use scheduler::{Scheduler, TickReport};
pub use task::{Priority, Recurrence, Schedulable, Task, TaskId, TaskState};
