// Round-robin scheduler without priorities
//
// Every spin visits the registered tasks in registration order and
// resumes each one that is due and whose awaitable has settled, once.
// Exited tasks drop out of the rotation. No queues and no ordering by
// priority or due time.

use super::clock::TimeSource;
use super::task::Schedulable;
use crate::error::{Error, Violation, ensure};

pub struct LinearScheduler<'a, const N: usize, T: TimeSource> {
    tasks: heapless::Vec<&'a mut dyn Schedulable, N>,
    clock: T,
}

impl<'a, const N: usize, T: TimeSource> LinearScheduler<'a, N, T> {
    pub fn new(clock: T) -> Self {
        Self {
            tasks: heapless::Vec::new(),
            clock,
        }
    }

    pub fn add(&mut self, task: &'a mut dyn Schedulable) -> Result<(), Error> {
        ensure!(!self.tasks.is_full(), Violation::SchedulerFull);
        if task.is_exited() {
            log::warn!("linear: {} registered after it exited", task.name());
            return Ok(());
        }
        if self.tasks.push(task).is_err() {
            return Err(Error::assertion(Violation::SchedulerFull));
        }
        Ok(())
    }

    /// One pass over the rotation. Returns how many tasks ran.
    pub fn spin(&mut self) -> usize {
        let now = self.clock.now();
        let mut resumed = 0;
        let mut i = 0;
        while i < self.tasks.len() {
            let task = &mut *self.tasks[i];
            if task.ready_time() <= now && task.is_resumable(now) {
                task.make_ready();
                let outcome = task.resume(now);
                log::trace!("[{}] linear: {} {:?}", now, task.name(), outcome);
                resumed += 1;
            }
            if task.is_exited() {
                log::debug!("[{}] linear: {} left the rotation", now, task.name());
                self.tasks.remove(i);
            } else {
                i += 1;
            }
        }
        resumed
    }

    /// Tasks still in the rotation
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Every task has exited
    pub fn is_done(&self) -> bool {
        self.tasks.is_empty()
    }
}
