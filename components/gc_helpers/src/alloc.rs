//! Object allocation helpers.
//!
//! The fast path carves objects from the calling thread's
//! [`AllocContext`] with a single bounds check and pointer bump: no lock, no
//! collection, no logging. Alignment requests are met by skipping a filler
//! gap. Anything it cannot satisfy (exhausted context, finalizable object,
//! GC stress, large object) goes
//! to the slow path, which pushes a [`TransitionFrame`] and hands the request
//! to the [`Collector`](crate::collector::Collector).

use crate::collector::AllocRequest;
use crate::config::ZeroInit;
use crate::frame::{FrameExit, RegisterSet, TransitionFrame, DEFAULT_FRAME_SAVE_FLAGS};
use crate::runtime::Runtime;
use crate::thread::{AllocContext, ThreadState};
use crate::thread_context::current_thread;
use bitflags::bitflags;
use core_types::{Address, AllocError, ObjectRef, Unwind};
use std::sync::atomic::{fence, Ordering};
use tracing::{debug, warn};

/// Alignment of every object start and size.
pub const OBJECT_ALIGNMENT: usize = 8;

/// Alignment requested by [`AllocFlags::ALIGN8`].
pub const DOUBLE_ALIGNMENT: usize = 16;

bitflags! {
    /// Per-request allocation flags.
    ///
    /// Bit values are fixed by the native calling convention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// The object has a finalizer and must be registered.
        const FINALIZE = 0x1;
        /// With `ALIGN8`: start 8 bytes past a 16-byte boundary, so the
        /// first field after the header is 16-aligned.
        const ALIGN8_BIAS = 0x4;
        /// Start the object on a 16-byte boundary.
        const ALIGN8 = 0x8;
    }
}

impl AllocFlags {
    /// Returns true if an object starting at `addr` satisfies the
    /// requested alignment.
    #[inline(always)]
    pub fn is_aligned(self, addr: Address) -> bool {
        if !self.contains(AllocFlags::ALIGN8) {
            return true;
        }
        let want = if self.contains(AllocFlags::ALIGN8_BIAS) {
            OBJECT_ALIGNMENT
        } else {
            0
        };
        addr.as_usize() % DOUBLE_ALIGNMENT == want
    }

    /// Bytes of filler needed in front of `addr` so an object placed after
    /// them satisfies the requested alignment.
    #[inline(always)]
    pub fn padding_for(self, addr: Address) -> usize {
        if !self.contains(AllocFlags::ALIGN8) {
            return 0;
        }
        let want = if self.contains(AllocFlags::ALIGN8_BIAS) {
            OBJECT_ALIGNMENT
        } else {
            0
        };
        (want + DOUBLE_ALIGNMENT - addr.as_usize() % DOUBLE_ALIGNMENT) % DOUBLE_ALIGNMENT
    }
}

/// Rounds a size up to [`OBJECT_ALIGNMENT`].
#[inline(always)]
pub fn round_size(size: usize) -> Option<usize> {
    size.checked_add(OBJECT_ALIGNMENT - 1)
        .map(|s| s & !(OBJECT_ALIGNMENT - 1))
}

impl AllocContext {
    /// Carves `size` bytes (already rounded) from the context.
    ///
    /// When `flags` ask for an alignment the current pointer does not have,
    /// the object starts after a filler gap and the gap counts toward
    /// `alloc_bytes`. Returns `None` without touching the context if the
    /// padded object does not fit.
    #[inline(always)]
    pub fn try_bump(&mut self, size: usize, flags: AllocFlags) -> Option<ObjectRef> {
        let pad = flags.padding_for(self.alloc_ptr);
        let start = self.alloc_ptr.checked_add(pad)?;
        let end = start.checked_add(size)?;
        if end > self.alloc_limit {
            return None;
        }
        let object = ObjectRef::from_address(start)?;
        self.alloc_ptr = end;
        self.alloc_bytes += pad + size;
        Some(object)
    }
}

impl Runtime {
    /// Allocates an object of `size` bytes for `thread`.
    ///
    /// `regs` is the helper's register file at entry; it is only touched if
    /// the slow path pushes a transition frame. On success the object's
    /// memory reads as zero. Failures and pending thread aborts are routed
    /// through the runtime's exception dispatcher and come back as `Err`.
    pub fn allocate(
        &self,
        thread: &ThreadState,
        regs: &mut RegisterSet,
        size: usize,
        flags: AllocFlags,
    ) -> Result<ObjectRef, Unwind> {
        if size == 0 {
            return Err(self.fail(thread, AllocError::BadRequest("zero-sized object")));
        }
        let Some(size) = round_size(size) else {
            return Err(self.fail(thread, AllocError::Overflow));
        };

        if self.fast_path_allowed(thread, size, flags) {
            let mut context = thread.alloc_context();
            if let Some(object) = context.try_bump(size, flags) {
                thread.set_alloc_context(context);
                return self.finish_fast(thread, object, size, flags);
            }
        }

        self.allocate_slow(thread, regs, AllocRequest::new(size, flags))
    }

    /// Allocates an array of `count` elements of `component_size` bytes
    /// following a `base_size` header.
    pub fn allocate_array(
        &self,
        thread: &ThreadState,
        regs: &mut RegisterSet,
        base_size: usize,
        component_size: usize,
        count: usize,
        flags: AllocFlags,
    ) -> Result<ObjectRef, Unwind> {
        let size = component_size
            .checked_mul(count)
            .and_then(|payload| payload.checked_add(base_size));
        match size {
            Some(size) => self.allocate(thread, regs, size, flags),
            None => Err(self.fail(thread, AllocError::Overflow)),
        }
    }

    /// [`allocate`](Self::allocate) for the thread found by the locator.
    ///
    /// # Safety
    ///
    /// The calling thread must be attached to this runtime.
    pub unsafe fn allocate_current(
        &self,
        regs: &mut RegisterSet,
        size: usize,
        flags: AllocFlags,
    ) -> Result<ObjectRef, Unwind> {
        self.allocate(current_thread(), regs, size, flags)
    }

    #[inline(always)]
    fn fast_path_allowed(&self, thread: &ThreadState, size: usize, flags: AllocFlags) -> bool {
        let config = self.config();
        if config.gc_stress && !thread.gc_stress_suppressed() {
            return false;
        }
        if flags.contains(AllocFlags::FINALIZE) && !config.finalizable_fast_path {
            return false;
        }
        size < config.large_object_threshold
    }

    fn finish_fast(
        &self,
        thread: &ThreadState,
        object: ObjectRef,
        size: usize,
        flags: AllocFlags,
    ) -> Result<ObjectRef, Unwind> {
        if self.config().zero_init == ZeroInit::Helper {
            // SAFETY: the bytes were just carved from this thread's context,
            // which is heap memory reserved for it alone.
            unsafe { object.address().as_mut_ptr::<u8>().write_bytes(0, size) };
        }
        if flags.contains(AllocFlags::FINALIZE) {
            if let Err(error) = self.collector().register_for_finalization(object) {
                return Err(self.fail(thread, error));
            }
        }
        self.publish(object);
        Ok(object)
    }

    fn allocate_slow(
        &self,
        thread: &ThreadState,
        regs: &mut RegisterSet,
        request: AllocRequest,
    ) -> Result<ObjectRef, Unwind> {
        if thread.gc_trigger_suppressed() {
            return Err(self.fail(
                thread,
                AllocError::CollectionSuppressed {
                    requested: request.size,
                },
            ));
        }

        let mut frame = TransitionFrame::new();
        let guard = frame.push(thread, regs, DEFAULT_FRAME_SAVE_FLAGS);
        debug!(
            thread = thread.managed_thread_id(),
            size = request.size,
            flags = ?request.flags,
            "allocation slow path"
        );
        let result = self.collector().alloc_slow(thread, request);
        let exit = guard.pop();

        if exit == FrameExit::ThreadAbort {
            return Err(self.dispatch().thread_abort(thread));
        }
        match result {
            Ok(object) => {
                self.publish(object);
                Ok(object)
            }
            Err(error) => Err(self.fail(thread, error)),
        }
    }

    #[inline(always)]
    fn publish(&self, object: ObjectRef) {
        if self.config().concurrent {
            // Header and zeroed fields must be visible before the reference.
            fence(Ordering::Release);
            self.collector().publish_object(object);
        }
    }

    fn fail(&self, thread: &ThreadState, error: AllocError) -> Unwind {
        warn!(thread = thread.managed_thread_id(), %error, "allocation failed");
        self.dispatch().failed_allocation(thread, error)
    }
}
