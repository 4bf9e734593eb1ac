// Type-erased coroutine frames
//
// A frame is one arena allocation: a header (parent link, catch flag)
// followed by the coroutine's slot. The chain only ever sees a FrameRef
// and drives the frame through a per-type static vtable.

use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem;
use core::ptr::NonNull;

use super::context::Context;
use super::{Coroutine, Step};
use crate::error::{Error, Fault, Violation};
use crate::memory::{Arena, Region};

pub(crate) enum Progress {
    Pending,
    Completed,
    Failed(Fault),
}

enum Slot<C: Coroutine> {
    Live(C),
    Done(C::Output),
    Failed(Fault),
    Taken,
}

#[derive(Clone, Copy)]
pub(crate) struct Header {
    pub parent: Option<FrameRef>,
    /// failure is delivered to the parent's join instead of cascading
    pub catches: bool,
}

// header must stay first so it can be read without knowing C
#[repr(C)]
struct FrameCell<C: Coroutine> {
    header: Header,
    slot: Slot<C>,
}

pub(crate) struct VTable {
    pub resume: unsafe fn(NonNull<u8>, &mut Context<'_>) -> Progress,
    pub fail: unsafe fn(NonNull<u8>, Fault),
    pub finalize: unsafe fn(NonNull<u8>),
    pub layout: Layout,
}

struct VTableOf<C>(PhantomData<C>);

impl<C: Coroutine> VTableOf<C> {
    const VTABLE: &'static VTable = &VTable {
        resume: resume_frame::<C>,
        fail: fail_frame::<C>,
        finalize: finalize_frame::<C>,
        layout: Layout::new::<FrameCell<C>>(),
    };
}

#[derive(Clone, Copy)]
pub(crate) struct FrameRef {
    pub region: Region,
    /// per-chain spawn counter, ties a Call handle to exactly one frame
    pub serial: u32,
    pub vtable: &'static VTable,
}

impl FrameRef {
    #[inline]
    pub fn ptr(&self, arena: &dyn Arena) -> NonNull<u8> {
        arena.as_ptr(self.region)
    }
}

/// Move `coroutine` into a fresh frame carved from `arena`
pub(crate) fn emplace<C: Coroutine + 'static>(
    arena: &dyn Arena,
    parent: Option<FrameRef>,
    catches: bool,
    serial: u32,
    coroutine: C,
) -> Result<FrameRef, Error> {
    let vtable = VTableOf::<C>::VTABLE;
    let region = arena.allocate(vtable.layout)?;
    let cell = FrameCell {
        header: Header { parent, catches },
        slot: Slot::Live(coroutine),
    };
    // SAFETY: region was just allocated with FrameCell<C>'s layout.
    unsafe { arena.as_ptr(region).cast::<FrameCell<C>>().as_ptr().write(cell) };
    log::trace!("frame #{}: {} bytes @{}", serial, region.len, region.offset);
    Ok(FrameRef {
        region,
        serial,
        vtable,
    })
}

/// Finalize `frame` and give its bytes back. The caller must already
/// have unlinked it.
pub(crate) fn release(arena: &dyn Arena, frame: FrameRef) -> Result<(), Error> {
    // SAFETY: frame is live and unlinked, so nothing finalizes it again.
    unsafe { (frame.vtable.finalize)(frame.ptr(arena)) };
    log::trace!("frame #{}: released", frame.serial);
    arena.deallocate(frame.region)
}

/// # Safety
/// `ptr` must point at a live frame.
pub(crate) unsafe fn header(ptr: NonNull<u8>) -> Header {
    unsafe { ptr.cast::<Header>().as_ptr().read() }
}

/// Take the finished output out of a frame created for `C`.
///
/// # Safety
/// `ptr` must point at a live frame built by `emplace::<C>`.
pub(crate) unsafe fn take_output<C: Coroutine>(ptr: NonNull<u8>) -> Result<C::Output, Fault> {
    let cell = unsafe { &mut *ptr.cast::<FrameCell<C>>().as_ptr() };
    match mem::replace(&mut cell.slot, Slot::Taken) {
        Slot::Done(output) => Ok(output),
        Slot::Failed(fault) => Err(fault),
        other => {
            cell.slot = other;
            Err(Error::assertion(Violation::NotJoinable).into())
        }
    }
}

unsafe fn resume_frame<C: Coroutine>(ptr: NonNull<u8>, cx: &mut Context<'_>) -> Progress {
    let cell = unsafe { &mut *ptr.cast::<FrameCell<C>>().as_ptr() };
    let Slot::Live(coroutine) = &mut cell.slot else {
        return Progress::Completed;
    };
    match coroutine.resume(cx) {
        Step::Pending => Progress::Pending,
        Step::Ready(output) => {
            cell.slot = Slot::Done(output);
            Progress::Completed
        }
        Step::Failed(fault) => {
            cell.slot = Slot::Failed(fault);
            Progress::Failed(fault)
        }
    }
}

unsafe fn fail_frame<C: Coroutine>(ptr: NonNull<u8>, fault: Fault) {
    let cell = unsafe { &mut *ptr.cast::<FrameCell<C>>().as_ptr() };
    cell.slot = Slot::Failed(fault);
}

unsafe fn finalize_frame<C: Coroutine>(ptr: NonNull<u8>) {
    unsafe { ptr.cast::<FrameCell<C>>().as_ptr().drop_in_place() };
}
