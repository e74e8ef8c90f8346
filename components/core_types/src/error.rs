//! Error and unwind types produced by runtime helpers.
//!
//! Helpers distinguish three outcomes: a normal return, an [`AllocError`]
//! that the exception dispatcher turns into a managed exception, and a
//! pending thread abort. The latter two reach managed code as an [`Unwind`]
//! rather than as an ordinary value.

use thiserror::Error;

/// Reasons an allocation request cannot be satisfied.
///
/// Context exhaustion is not in this list: it is always handled by the slow
/// path and never surfaces to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The heap could not satisfy the request even after a collection.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        requested: usize,
    },
    /// The computed object size does not fit in a machine word.
    #[error("allocation size overflow")]
    Overflow,
    /// The slow path was required but the thread forbids triggering a GC.
    #[error("allocating {requested} bytes requires a collection but collections are suppressed")]
    CollectionSuppressed {
        /// Requested size in bytes
        requested: usize,
    },
    /// The request itself is malformed (e.g. zero size).
    #[error("bad allocation request: {0}")]
    BadRequest(&'static str),
}

/// Violations of the thread attach/detach lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttachError {
    /// The current thread already has a thread state.
    #[error("thread is already attached to the runtime")]
    AlreadyAttached,
    /// The current thread has no thread state.
    #[error("thread is not attached to the runtime")]
    NotAttached,
    /// The thread still has a live transition frame.
    #[error("thread cannot detach while a transition frame is active")]
    FrameActive,
}

/// A non-local exit a helper takes instead of returning its value.
///
/// By the time a helper returns `Err(Unwind)`, the exception dispatcher has
/// already been told about it; the value only tells the caller which kind of
/// dispatch is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unwind {
    /// A thread abort was pending when the helper's transition frame popped.
    #[error("thread abort requested")]
    ThreadAbort,
    /// The allocator failed and an allocation exception is being raised.
    #[error("allocation failed: {0}")]
    FailedAllocation(#[from] AllocError),
}
