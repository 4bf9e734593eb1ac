// Fixed-capacity byte arenas
//
// Regions are arena-relative so the owning task can move between
// ticks. Buffers are 16-byte aligned; stricter layouts are refused.
// LinearArena only bumps. StackArena appends a footer word holding the
// previous top, so a deallocation can be checked against the most
// recent live allocation.

use core::alloc::Layout;
use core::cell::{Cell, UnsafeCell};
use core::mem::{MaybeUninit, align_of, size_of};
use core::ptr::NonNull;

use crate::error::{AllocationFailure, Error, Violation, ensure};

pub const MAX_ALIGN: usize = 16;

const FOOTER: usize = size_of::<usize>();
const FOOTER_ALIGN: usize = align_of::<usize>();

/// A span inside an arena, by offset from the arena base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: usize,
    pub len: usize,
}

impl Region {
    #[inline]
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }
}

pub trait Arena {
    fn capacity(&self) -> usize;

    /// Bytes from the base up to the current top, overhead included
    fn used(&self) -> usize;

    fn available(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Carve `layout` from the unused tail. On failure nothing changes.
    fn allocate(&self, layout: Layout) -> Result<Region, Error>;

    fn deallocate(&self, region: Region) -> Result<(), Error>;

    /// Address of `region` at the arena's current location. Only valid
    /// until the arena is moved.
    fn as_ptr(&self, region: Region) -> NonNull<u8>;

    /// Drop every allocation at once. Callers must have finalized
    /// whatever lived in the arena.
    fn reset(&mut self);
}

#[inline]
const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

#[repr(C, align(16))]
struct Buffer<const N: usize>(UnsafeCell<[MaybeUninit<u8>; N]>);

impl<const N: usize> Buffer<N> {
    const fn new() -> Self {
        Self(UnsafeCell::new([MaybeUninit::uninit(); N]))
    }

    #[inline]
    fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= N);
        // SAFETY: UnsafeCell::get is never null and offset stays within
        // (or one past) the buffer.
        unsafe { NonNull::new_unchecked(self.0.get().cast::<u8>().add(offset)) }
    }
}

fn refuse(layout: Layout, capacity: usize, top: usize) -> Error {
    Error::Allocation(AllocationFailure {
        requested: layout.size(),
        capacity,
        available: capacity - top,
    })
}

/// Bump allocator; space comes back only through `reset`
pub struct LinearArena<const N: usize> {
    buf: Buffer<N>,
    top: Cell<usize>,
}

impl<const N: usize> LinearArena<N> {
    pub const fn new() -> Self {
        Self {
            buf: Buffer::new(),
            top: Cell::new(0),
        }
    }
}

impl<const N: usize> Default for LinearArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Arena for LinearArena<N> {
    fn capacity(&self) -> usize {
        N
    }

    fn used(&self) -> usize {
        self.top.get()
    }

    fn allocate(&self, layout: Layout) -> Result<Region, Error> {
        ensure!(layout.align() <= MAX_ALIGN, Violation::UnsupportedAlignment);
        let top = self.top.get();
        let start = align_up(top, layout.align());
        match start.checked_add(layout.size()) {
            Some(end) if end <= N => {
                self.top.set(end);
                Ok(Region {
                    offset: start,
                    len: layout.size(),
                })
            }
            _ => Err(refuse(layout, N, top)),
        }
    }

    fn deallocate(&self, region: Region) -> Result<(), Error> {
        ensure!(region.end() <= self.top.get(), Violation::ForeignRegion);
        Ok(())
    }

    fn as_ptr(&self, region: Region) -> NonNull<u8> {
        self.buf.at(region.offset)
    }

    fn reset(&mut self) {
        self.top.set(0);
    }
}

/// Bump allocator with strict LIFO deallocation
pub struct StackArena<const N: usize> {
    buf: Buffer<N>,
    top: Cell<usize>,
}

impl<const N: usize> StackArena<N> {
    pub const fn new() -> Self {
        Self {
            buf: Buffer::new(),
            top: Cell::new(0),
        }
    }

    /// Bytes a `size`-byte, byte-aligned allocation consumes from an
    /// empty arena, footer included.
    pub const fn footprint(size: usize) -> usize {
        align_up(size, FOOTER_ALIGN) + FOOTER
    }
}

impl<const N: usize> Default for StackArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Arena for StackArena<N> {
    fn capacity(&self) -> usize {
        N
    }

    fn used(&self) -> usize {
        self.top.get()
    }

    fn allocate(&self, layout: Layout) -> Result<Region, Error> {
        ensure!(layout.align() <= MAX_ALIGN, Violation::UnsupportedAlignment);
        let top = self.top.get();
        let start = align_up(top, layout.align());
        let footer = start
            .checked_add(layout.size())
            .map(|end| align_up(end, FOOTER_ALIGN));
        match footer {
            Some(footer) if footer + FOOTER <= N => {
                // SAFETY: footer is usize-aligned (buffer base is 16-aligned)
                // and footer + FOOTER is within the buffer.
                unsafe { self.buf.at(footer).cast::<usize>().as_ptr().write(top) };
                self.top.set(footer + FOOTER);
                Ok(Region {
                    offset: start,
                    len: layout.size(),
                })
            }
            _ => Err(refuse(layout, N, top)),
        }
    }

    fn deallocate(&self, region: Region) -> Result<(), Error> {
        let top = self.top.get();
        ensure!(region.end() <= top, Violation::ForeignRegion);
        let footer = align_up(region.end(), FOOTER_ALIGN);
        ensure!(footer + FOOTER == top, Violation::DeallocationOrder);

        // SAFETY: footer was written by the allocate that produced the
        // topmost region, which the check above just matched.
        let prev = unsafe { self.buf.at(footer).cast::<usize>().as_ptr().read() };
        ensure!(prev <= region.offset, Violation::FooterCorrupt);
        self.top.set(prev.min(region.offset));
        Ok(())
    }

    fn as_ptr(&self, region: Region) -> NonNull<u8> {
        self.buf.at(region.offset)
    }

    fn reset(&mut self) {
        self.top.set(0);
    }
}
