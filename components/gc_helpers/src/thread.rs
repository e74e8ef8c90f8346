//! Per-thread execution-engine state.
//!
//! Every attached hardware thread owns exactly one [`ThreadState`]. The
//! layout is `#[repr(C)]` and pinned by the constants in [`crate::layout`],
//! because native helper code addresses its fields by fixed offset.
//!
//! Field ownership:
//! - `flags` is written by the owning thread only, but may be read by a
//!   suspending collector, so it is atomic.
//! - `alloc_context` is touched only by the owning thread (and by the
//!   collector while the world is stopped), so it lives in a [`Cell`] and the
//!   whole type is `!Sync`.
//! - `transition_frame` is published by the owning thread and read by the
//!   collector's stack walker.

use crate::frame::TransitionFrame;
use bitflags::bitflags;
use core_types::Address;
use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

bitflags! {
    /// Thread state flags consulted by every helper fast path.
    ///
    /// Bit values are fixed by the native calling convention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadStateFlags: u32 {
        /// The thread has attached to the runtime.
        const ATTACHED = 0x01;
        /// GC stress must not inject collections on this thread.
        const SUPPRESS_GC_STRESS = 0x08;
        /// Nothing running on this thread may trigger a collection.
        const DO_NOT_TRIGGER_GC = 0x10;
    }
}

/// The bump-allocation region owned by one thread.
///
/// Invariant: `alloc_ptr <= alloc_limit`, and `[alloc_ptr, alloc_limit)` is
/// heap memory reserved for this thread alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct AllocContext {
    /// Next free byte
    pub alloc_ptr: Address,
    /// End of the reserved region (exclusive)
    pub alloc_limit: Address,
    /// Bytes handed out from this context since the thread attached
    pub alloc_bytes: usize,
}

impl AllocContext {
    /// The empty context every thread starts with: `pointer = limit = 0`.
    pub const EMPTY: AllocContext = AllocContext {
        alloc_ptr: Address::NULL,
        alloc_limit: Address::NULL,
        alloc_bytes: 0,
    };

    /// Creates a context over `[ptr, limit)`.
    pub fn new(ptr: Address, limit: Address) -> Self {
        debug_assert!(ptr <= limit, "allocation context pointer above limit");
        AllocContext {
            alloc_ptr: ptr,
            alloc_limit: limit,
            alloc_bytes: 0,
        }
    }

    /// Bytes left before the context is exhausted.
    pub fn remaining(&self) -> usize {
        self.alloc_limit.distance_from(self.alloc_ptr)
    }

    /// Returns true if no bytes remain.
    pub fn is_exhausted(&self) -> bool {
        self.alloc_ptr >= self.alloc_limit
    }
}

/// Execution-engine state of one attached thread.
#[repr(C)]
pub struct ThreadState {
    pub(crate) flags: AtomicU32,
    pub(crate) alloc_context: Cell<AllocContext>,
    pub(crate) transition_frame: AtomicPtr<TransitionFrame>,
    pub(crate) managed_id: u64,
}

impl ThreadState {
    /// Creates a detached state block. Only the attach path calls this.
    pub(crate) fn new(managed_id: u64) -> Self {
        ThreadState {
            flags: AtomicU32::new(0),
            alloc_context: Cell::new(AllocContext::EMPTY),
            transition_frame: AtomicPtr::new(ptr::null_mut()),
            managed_id,
        }
    }

    /// Stable small integer identifying this thread in diagnostics.
    pub fn managed_thread_id(&self) -> u64 {
        self.managed_id
    }

    /// Current flag bitmask.
    #[inline(always)]
    pub fn flags(&self) -> ThreadStateFlags {
        ThreadStateFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    /// Returns true once the thread has attached.
    #[inline(always)]
    pub fn is_attached(&self) -> bool {
        self.flags().contains(ThreadStateFlags::ATTACHED)
    }

    /// Returns true if GC stress is suppressed on this thread.
    #[inline(always)]
    pub fn gc_stress_suppressed(&self) -> bool {
        self.flags().contains(ThreadStateFlags::SUPPRESS_GC_STRESS)
    }

    /// Returns true if this thread must not trigger a collection.
    #[inline(always)]
    pub fn gc_trigger_suppressed(&self) -> bool {
        self.flags().contains(ThreadStateFlags::DO_NOT_TRIGGER_GC)
    }

    /// Sets flags. Must be called from the owning thread.
    pub fn set_flags(&self, flags: ThreadStateFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    /// Clears flags. Must be called from the owning thread.
    pub fn clear_flags(&self, flags: ThreadStateFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
    }

    /// Suppresses GC stress until the returned guard drops.
    pub fn suppress_gc_stress(&self) -> FlagGuard<'_> {
        FlagGuard::set(self, ThreadStateFlags::SUPPRESS_GC_STRESS)
    }

    /// Forbids triggering a collection until the returned guard drops.
    pub fn forbid_gc(&self) -> FlagGuard<'_> {
        FlagGuard::set(self, ThreadStateFlags::DO_NOT_TRIGGER_GC)
    }

    /// Snapshot of the allocation context.
    #[inline(always)]
    pub fn alloc_context(&self) -> AllocContext {
        self.alloc_context.get()
    }

    /// Replaces the allocation context.
    ///
    /// Called by the owning thread's allocation paths and by the collector
    /// when it refills or retires the context.
    #[inline(always)]
    pub fn set_alloc_context(&self, context: AllocContext) {
        debug_assert!(context.alloc_ptr <= context.alloc_limit);
        self.alloc_context.set(context);
    }

    /// The innermost published transition frame, or null.
    pub fn transition_frame(&self) -> *mut TransitionFrame {
        self.transition_frame.load(Ordering::Acquire)
    }

    /// Returns true while a helper on this thread is in the crawlable state.
    pub fn has_transition_frame(&self) -> bool {
        !self.transition_frame().is_null()
    }

    /// Mutable access to the innermost published transition frame.
    ///
    /// # Safety
    ///
    /// The owning thread must be parked inside a collaborator call made
    /// between the frame's push and pop (e.g. the slow allocator), and no
    /// other reference to the frame may be live for `'a`.
    pub unsafe fn transition_frame_mut<'a>(&self) -> Option<&'a mut TransitionFrame> {
        // SAFETY: the pointer was published by a live FrameGuard and the
        // caller guarantees exclusive access for 'a.
        self.transition_frame().as_mut()
    }

    /// Publishes `frame` as the innermost transition frame, returning the
    /// previously published one.
    pub(crate) fn swap_transition_frame(&self, frame: *mut TransitionFrame) -> *mut TransitionFrame {
        self.transition_frame.swap(frame, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadState")
            .field("managed_id", &self.managed_id)
            .field("flags", &self.flags())
            .field("alloc_context", &self.alloc_context())
            .field("transition_frame", &self.transition_frame())
            .finish()
    }
}

/// Restores a thread flag to its previous value on drop.
#[must_use = "the flag is cleared again when the guard drops"]
pub struct FlagGuard<'t> {
    thread: &'t ThreadState,
    flag: ThreadStateFlags,
    was_set: bool,
}

impl<'t> FlagGuard<'t> {
    fn set(thread: &'t ThreadState, flag: ThreadStateFlags) -> Self {
        let was_set = thread.flags().contains(flag);
        thread.set_flags(flag);
        FlagGuard {
            thread,
            flag,
            was_set,
        }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        if !self.was_set {
            self.thread.clear_flags(self.flag);
        }
    }
}
