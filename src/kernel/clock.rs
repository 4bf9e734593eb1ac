// Time base and ISR wake sources
//
// The scheduler reads time through TimeSource once per tick. TickCounter
// is advanced by a timer ISR and read by the main loop; a critical
// section guards it since not every target has 64-bit atomics. The tick
// weight lets a timer slowed down during idle keep uptime honest.
// WakeFlag is an ISR-set flag a coroutine can park on.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use critical_section::Mutex;

use crate::coroutine::Readiness;

/// Monotonic scheduler time unit
pub type Tick = u64;

pub trait TimeSource {
    fn now(&self) -> Tick;
}

impl<F: Fn() -> Tick> TimeSource for F {
    fn now(&self) -> Tick {
        self()
    }
}

pub struct TickCounter {
    ticks: Mutex<Cell<Tick>>,
    // base ticks per timer interrupt
    weight: AtomicU32,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            ticks: Mutex::new(Cell::new(0)),
            weight: AtomicU32::new(1),
        }
    }

    /// Call from the timer ISR
    #[inline]
    pub fn advance(&self) {
        let weight = self.weight.load(Ordering::Relaxed) as Tick;
        critical_section::with(|cs| {
            let ticks = self.ticks.borrow(cs);
            ticks.set(ticks.get().saturating_add(weight));
        });
    }

    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight.max(1), Ordering::Release);
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TickCounter {
    fn now(&self) -> Tick {
        critical_section::with(|cs| self.ticks.borrow(cs).get())
    }
}

pub struct WakeFlag(AtomicBool);

impl WakeFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    #[inline]
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Consume the flag. cs: riscv32imc has no atomic swap
    pub fn take(&self) -> bool {
        critical_section::with(|_| {
            let set = self.0.load(Ordering::Relaxed);
            if set {
                self.0.store(false, Ordering::Relaxed);
            }
            set
        })
    }
}

impl Default for WakeFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness for WakeFlag {
    fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Idle the CPU until the next interrupt
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(any(target_arch = "riscv32", all(target_arch = "arm", target_os = "none")))]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack));
    }

    #[cfg(not(any(target_arch = "riscv32", all(target_arch = "arm", target_os = "none"))))]
    core::hint::spin_loop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_applies_weight() {
        let counter = TickCounter::new();
        counter.advance();
        counter.set_weight(10);
        counter.advance();
        assert_eq!(counter.now(), 11);
        counter.set_weight(0);
        counter.advance();
        assert_eq!(counter.now(), 12);
    }

    #[test]
    fn closures_are_time_sources() {
        let base = Cell::new(40u64);
        let clock = || base.get() + 2;
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn wake_flag_is_consumed_once() {
        let flag = WakeFlag::new();
        assert!(!flag.is_ready());
        flag.signal();
        assert!(flag.is_ready());
        assert!(flag.take());
        assert!(!flag.take());
        assert!(!flag.is_ready());
    }
}
