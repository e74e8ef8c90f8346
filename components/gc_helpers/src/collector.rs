//! Seams between the helper layer and the rest of the runtime.
//!
//! Helpers never allocate from the heap directly or raise exceptions
//! themselves. Everything beyond the thread-local fast path goes through a
//! [`Collector`], and every non-local exit goes through an
//! [`ExceptionDispatch`].

use crate::alloc::AllocFlags;
use crate::thread::{AllocContext, ThreadState};
use core_types::{AllocError, ObjectRef, Unwind};

/// An allocation request handed to the slow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    /// Object size in bytes, already rounded to the object alignment
    pub size: usize,
    /// Allocation flags
    pub flags: AllocFlags,
}

impl AllocRequest {
    /// Creates a request.
    pub fn new(size: usize, flags: AllocFlags) -> Self {
        AllocRequest { size, flags }
    }
}

/// The garbage collector as seen from the helper layer.
///
/// `alloc_slow` is only ever invoked while the calling thread has a
/// transition frame pushed, so the collector may walk that thread's stack,
/// relocate objects referenced from the frame, and suspend the thread.
pub trait Collector: Send + Sync {
    /// Satisfies a request the fast path could not.
    ///
    /// Typically refills the thread's allocation context (possibly after a
    /// collection) and carves the object from it. The returned memory is
    /// zeroed and lies outside any other thread's context. Requests with
    /// `FINALIZE` are registered for finalization here.
    fn alloc_slow(&self, thread: &ThreadState, request: AllocRequest) -> Result<ObjectRef, AllocError>;

    /// Takes back the unused part of a thread's allocation context.
    ///
    /// Called when the thread detaches.
    fn retire_alloc_context(&self, thread: &ThreadState) {
        thread.set_alloc_context(AllocContext::EMPTY);
    }

    /// Makes a just-initialized object visible to concurrent collector
    /// threads.
    fn publish_object(&self, _object: ObjectRef) {}

    /// Records a finalizable object allocated on the fast path.
    fn register_for_finalization(&self, _object: ObjectRef) -> Result<(), AllocError> {
        Ok(())
    }
}

/// The exception dispatcher as seen from the helper layer.
///
/// Each hook is told about a non-local exit and returns the [`Unwind`] the
/// helper propagates to its caller.
pub trait ExceptionDispatch: Send + Sync {
    /// An allocation failed and must surface as a managed exception.
    fn failed_allocation(&self, _thread: &ThreadState, error: AllocError) -> Unwind {
        Unwind::FailedAllocation(error)
    }

    /// A thread abort was pending when a transition frame popped.
    fn thread_abort(&self, _thread: &ThreadState) -> Unwind {
        Unwind::ThreadAbort
    }
}

/// Dispatcher that reports the unwind kind and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDispatch;

impl ExceptionDispatch for DefaultDispatch {}
