// Suspension chain: drives the current leaf of a nested await
//
// Only the leaf is referenced. Ancestry lives in each frame header, so
// nesting is logically deep and physically flat in the task's arena.
// A finished leaf hands control to its parent within the same resume;
// a failed one fails its ancestors one by one until something catches.

use core::ptr::NonNull;

use super::context::{Context, Links, Wait};
use super::frame::{self, FrameRef, Progress};
use super::{Coroutine, Exit};
use crate::error::{Error, Fault, Violation, ensure};
use crate::kernel::clock::Tick;
use crate::memory::Arena;

/// Result of one `resume`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Suspended,
    CompletedSuccess,
    CompletedFailure,
}

impl From<Exit> for Outcome {
    fn from(exit: Exit) -> Self {
        match exit {
            Exit::Success => Outcome::CompletedSuccess,
            Exit::Failure => Outcome::CompletedFailure,
        }
    }
}

pub struct Chain<A: Arena> {
    arena: A,
    leaf: Option<FrameRef>,
    links: Links,
    root_exit: unsafe fn(NonNull<u8>) -> Result<Exit, Fault>,
    exit: Option<Exit>,
    fault: Option<Fault>,
}

impl<A: Arena> Chain<A> {
    pub fn new<C>(arena: A, root: C) -> Result<Self, Error>
    where
        C: Coroutine<Output = Exit> + 'static,
    {
        let mut chain = Self {
            arena,
            leaf: None,
            links: Links::new(),
            root_exit: frame::take_output::<C>,
            exit: Some(Exit::Failure),
            fault: None,
        };
        chain.rearm(root)?;
        Ok(chain)
    }

    /// Tear down whatever is left and start over with a fresh root
    pub fn rearm<C>(&mut self, root: C) -> Result<(), Error>
    where
        C: Coroutine<Output = Exit> + 'static,
    {
        self.destroy();
        self.arena.reset();
        self.links = Links::new();
        self.fault = None;

        let frame = frame::emplace(&self.arena, None, false, 0, root)?;
        self.root_exit = frame::take_output::<C>;
        self.register_leaf(frame);
        self.exit = None;
        Ok(())
    }

    /// Make `frame` the active leaf. O(1) however deep the nesting is.
    #[inline]
    fn register_leaf(&mut self, frame: FrameRef) {
        self.leaf = Some(frame);
    }

    /// Step the leaf until something suspends or the root finishes.
    pub fn resume(&mut self, now: Tick) -> Result<Outcome, Error> {
        ensure!(self.exit.is_none(), Violation::ResumeTerminated);
        ensure!(self.links.wait.is_satisfied(now), Violation::NotResumable);
        let Some(mut leaf) = self.leaf else {
            return Err(Error::assertion(Violation::ResumeTerminated));
        };

        self.links.wait = Wait::Yield;
        let mut carried: Option<Fault> = None;
        loop {
            let ptr = leaf.ptr(&self.arena);
            let progress = match carried.take() {
                Some(fault) => {
                    // SAFETY: leaf is live; its body is not run again
                    unsafe { (leaf.vtable.fail)(ptr, fault) };
                    Progress::Failed(fault)
                }
                None => {
                    let mut cx = Context::new(&self.arena, now, leaf, &mut self.links);
                    // SAFETY: leaf is live and nothing else borrows it
                    unsafe { (leaf.vtable.resume)(ptr, &mut cx) }
                }
            };

            let fault = match progress {
                Progress::Pending => {
                    self.release_joinable()?;
                    match self.links.call.take() {
                        Some(child) => {
                            // the call is the step's suspension; the child
                            // registers its own wait
                            if !matches!(self.links.wait, Wait::Yield) {
                                log::warn!(
                                    "chain: {:?} dropped, frame #{} called #{}",
                                    self.links.wait,
                                    leaf.serial,
                                    child.serial
                                );
                                self.links.wait = Wait::Yield;
                            }
                            self.register_leaf(child);
                            leaf = child;
                            continue;
                        }
                        None => return Ok(Outcome::Suspended),
                    }
                }
                Progress::Completed => None,
                Progress::Failed(fault) => Some(fault),
            };

            // leaf is done; anything it spawned in its last step goes first
            if let Some(orphan) = self.links.call.take() {
                frame::release(&self.arena, orphan)?;
            }
            self.release_joinable()?;
            self.links.wait = Wait::Yield;

            // SAFETY: leaf is still allocated
            let header = unsafe { frame::header(ptr) };
            let Some(parent) = header.parent else {
                return self.finish(leaf);
            };
            self.register_leaf(parent);
            match fault {
                Some(fault) if !header.catches => {
                    log::debug!("chain: frame #{} failed: {}", leaf.serial, fault);
                    frame::release(&self.arena, leaf)?;
                    carried = Some(fault);
                }
                _ => self.links.joinable = Some(leaf),
            }
            leaf = parent;
        }
    }

    fn finish(&mut self, root: FrameRef) -> Result<Outcome, Error> {
        // SAFETY: root was built by emplace::<C> with the C root_exit was
        // instantiated for.
        let exit = match unsafe { (self.root_exit)(root.ptr(&self.arena)) } {
            Ok(exit) => exit,
            Err(fault) => {
                self.fault = Some(fault);
                Exit::Failure
            }
        };
        self.leaf = None;
        self.exit = Some(exit);
        frame::release(&self.arena, root)?;
        Ok(exit.into())
    }

    /// Finalize every frame still alive, leaf first. Safe to call twice,
    /// and after a resume that unwound halfway.
    pub fn destroy(&mut self) {
        if let Some(orphan) = self.links.call.take() {
            self.discard(orphan);
        }
        if let Some(child) = self.links.joinable.take() {
            self.discard(child);
        }
        while let Some(frame) = self.leaf.take() {
            // SAFETY: frames on the leaf path are live until discarded here
            self.leaf = unsafe { frame::header(frame.ptr(&self.arena)) }.parent;
            self.discard(frame);
        }
        self.links.wait = Wait::Yield;
        if self.exit.is_none() {
            self.exit = Some(Exit::Failure);
        }
    }

    fn discard(&self, frame: FrameRef) {
        if let Err(err) = frame::release(&self.arena, frame) {
            log::error!("chain: frame #{} not reclaimed: {}", frame.serial, err);
        }
    }

    fn release_joinable(&mut self) -> Result<(), Error> {
        match self.links.joinable.take() {
            Some(frame) => frame::release(&self.arena, frame),
            None => Ok(()),
        }
    }

    /// The leaf's registered awaitable is satisfied at `now`
    pub fn is_resumable(&self, now: Tick) -> bool {
        self.exit.is_none() && self.links.wait.is_satisfied(now)
    }

    pub fn is_terminal(&self) -> bool {
        self.exit.is_some()
    }

    pub fn exit(&self) -> Option<Exit> {
        self.exit
    }

    pub fn wait(&self) -> Wait {
        self.links.wait
    }

    /// What made the root fail, if it failed with a fault
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Frames on the path from leaf to root
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.leaf;
        while let Some(frame) = cursor {
            depth += 1;
            // SAFETY: frames on the leaf path are live
            cursor = unsafe { frame::header(frame.ptr(&self.arena)) }.parent;
        }
        depth
    }

    pub fn arena(&self) -> &A {
        &self.arena
    }
}

impl<A: Arena> Drop for Chain<A> {
    fn drop(&mut self) {
        self.destroy();
    }
}
