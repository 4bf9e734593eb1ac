// Instrumented arena wrapper: same behaviour, plus counters for sizing
// task arenas during bring-up.

use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::NonNull;

use super::arena::{Arena, Region};
use crate::error::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub allocations: usize,
    pub deallocations: usize,
    pub outstanding: usize,
    /// largest `used()` ever observed
    pub high_water: usize,
}

pub struct DebugArena<A> {
    inner: A,
    stats: Cell<ArenaStats>,
}

impl<A: Arena> DebugArena<A> {
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            stats: Cell::new(ArenaStats {
                allocations: 0,
                deallocations: 0,
                outstanding: 0,
                high_water: 0,
            }),
        }
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats.get()
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: Arena + Default> Default for DebugArena<A> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<A: Arena> Arena for DebugArena<A> {
    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn used(&self) -> usize {
        self.inner.used()
    }

    fn allocate(&self, layout: Layout) -> Result<Region, Error> {
        let region = self.inner.allocate(layout)?;
        let mut stats = self.stats.get();
        stats.allocations += 1;
        stats.outstanding += 1;
        stats.high_water = stats.high_water.max(self.inner.used());
        self.stats.set(stats);
        log::trace!(
            "arena: +{} @{} ({}/{})",
            region.len,
            region.offset,
            self.inner.used(),
            self.inner.capacity()
        );
        Ok(region)
    }

    fn deallocate(&self, region: Region) -> Result<(), Error> {
        self.inner.deallocate(region)?;
        let mut stats = self.stats.get();
        stats.deallocations += 1;
        stats.outstanding = stats.outstanding.saturating_sub(1);
        self.stats.set(stats);
        log::trace!("arena: -{} @{}", region.len, region.offset);
        Ok(())
    }

    fn as_ptr(&self, region: Region) -> NonNull<u8> {
        self.inner.as_ptr(region)
    }

    fn reset(&mut self) {
        self.inner.reset();
        let mut stats = self.stats.get();
        stats.outstanding = 0;
        self.stats.set(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StackArena;

    #[test]
    fn tracks_high_water_and_outstanding() {
        let arena = DebugArena::new(StackArena::<128>::new());
        let a = arena.allocate(Layout::new::<[u8; 16]>()).unwrap();
        let b = arena.allocate(Layout::new::<[u8; 32]>()).unwrap();
        let peak = arena.used();
        arena.deallocate(b).unwrap();

        let stats = arena.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.deallocations, 1);
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.high_water, peak);

        arena.deallocate(a).unwrap();
        assert_eq!(arena.stats().outstanding, 0);
        assert_eq!(arena.stats().high_water, peak);
    }

    #[test]
    fn failed_calls_leave_counters_alone() {
        let arena = DebugArena::new(StackArena::<32>::new());
        let a = arena.allocate(Layout::new::<[u8; 8]>()).unwrap();
        let _b = arena.allocate(Layout::new::<[u8; 8]>()).unwrap();
        assert!(arena.allocate(Layout::new::<[u8; 64]>()).is_err());
        assert!(arena.deallocate(a).is_err());

        let stats = arena.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.deallocations, 0);
    }
}
