//! Locating the current thread's [`ThreadState`], and the attach/detach
//! lifecycle that makes it locatable.
//!
//! The locator is a single `const`-initialized thread-local pointer. Reading
//! it takes no lock, allocates nothing and does not lazily initialize, so it
//! is usable from the very first instruction of a helper.
//!
//! Attaching a thread ([`ThreadStore::attach_current_thread`]) allocates its
//! state block, registers it for stop-the-world enumeration and fills the
//! slot. The returned [`AttachedThread`] guard owns the block; dropping it
//! (or calling [`AttachedThread::detach`]) tears everything down again.

use crate::collector::Collector;
use crate::thread::{ThreadState, ThreadStateFlags};
use core_types::AttachError;
use parking_lot::Mutex;
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

thread_local! {
    static CURRENT_THREAD: Cell<*mut ThreadState> = const { Cell::new(ptr::null_mut()) };
}

/// Address of the current thread's state block, or null if the thread has
/// not attached.
#[inline(always)]
pub fn current_thread_ptr() -> *mut ThreadState {
    CURRENT_THREAD.with(Cell::get)
}

/// The current thread's state block.
///
/// # Safety
///
/// The current thread must be attached, and its [`AttachedThread`] guard
/// must outlive `'a`. Calling this on an unattached thread is undefined
/// behavior (checked only in debug builds).
#[inline(always)]
pub unsafe fn current_thread<'a>() -> &'a ThreadState {
    let ptr = current_thread_ptr();
    debug_assert!(!ptr.is_null(), "helper invoked on a thread that never attached");
    &*ptr
}

/// Checked variant of [`current_thread_ptr`] for diagnostics.
pub fn try_current_thread() -> Result<NonNull<ThreadState>, AttachError> {
    NonNull::new(current_thread_ptr()).ok_or(AttachError::NotAttached)
}

/// Returns true if the calling thread is attached.
pub fn is_current_thread_attached() -> bool {
    !current_thread_ptr().is_null()
}

struct ThreadHandle(NonNull<ThreadState>);

// SAFETY: the registry only stores the pointer. Dereferencing it from a
// thread other than the owner is gated by `ThreadStore::for_each_thread`'s
// contract.
unsafe impl Send for ThreadHandle {}

/// Registry of attached threads.
pub struct ThreadStore {
    threads: Mutex<Vec<ThreadHandle>>,
    next_id: AtomicU64,
    collector: Arc<dyn Collector>,
}

impl ThreadStore {
    /// Creates an empty registry. Detaching threads retire their
    /// allocation contexts through `collector`.
    pub fn new(collector: Arc<dyn Collector>) -> Self {
        ThreadStore {
            threads: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            collector,
        }
    }

    /// Attaches the calling thread.
    ///
    /// The new state has the `ATTACHED` flag set, no suppression flags and an
    /// empty allocation context.
    pub fn attach_current_thread(&self) -> Result<AttachedThread<'_>, AttachError> {
        if is_current_thread_attached() {
            return Err(AttachError::AlreadyAttached);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Box::new(ThreadState::new(id));
        state.set_flags(ThreadStateFlags::ATTACHED);

        let ptr = NonNull::from(Box::leak(state));
        self.threads.lock().push(ThreadHandle(ptr));
        CURRENT_THREAD.with(|slot| slot.set(ptr.as_ptr()));

        debug!(thread = id, "thread attached");
        Ok(AttachedThread {
            store: self,
            state: ptr,
            _not_send: PhantomData,
        })
    }

    /// Number of attached threads.
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    /// Returns true if no thread is attached.
    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }

    /// Visits every attached thread's state block.
    ///
    /// # Safety
    ///
    /// Every attached thread other than the caller must be suspended (or
    /// parked in a transition frame) for the duration of the call, so that
    /// no owning thread touches its state concurrently.
    pub unsafe fn for_each_thread<F>(&self, mut visit: F)
    where
        F: FnMut(&ThreadState),
    {
        let threads = self.threads.lock();
        for handle in threads.iter() {
            visit(handle.0.as_ref());
        }
    }

    fn unregister(&self, state: NonNull<ThreadState>) {
        let mut threads = self.threads.lock();
        if let Some(index) = threads.iter().position(|h| h.0 == state) {
            threads.swap_remove(index);
        }
    }
}

impl std::fmt::Debug for ThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStore")
            .field("attached", &self.len())
            .finish_non_exhaustive()
    }
}

/// Ownership of the calling thread's attachment.
///
/// Not `Send`: the state block belongs to the thread that attached.
pub struct AttachedThread<'s> {
    store: &'s ThreadStore,
    state: NonNull<ThreadState>,
    _not_send: PhantomData<*mut ThreadState>,
}

impl<'s> AttachedThread<'s> {
    /// The thread's state block.
    pub fn state(&self) -> &ThreadState {
        // SAFETY: the block stays allocated until this guard drops.
        unsafe { self.state.as_ref() }
    }

    /// Detaches the thread.
    ///
    /// Fails with [`AttachError::FrameActive`] while a transition frame is
    /// still published, handing the guard back.
    pub fn detach(self) -> Result<(), (Self, AttachError)> {
        if self.state().has_transition_frame() {
            return Err((self, AttachError::FrameActive));
        }
        drop(self);
        Ok(())
    }
}

impl Drop for AttachedThread<'_> {
    fn drop(&mut self) {
        let state = self.state();
        let id = state.managed_thread_id();
        debug_assert!(!state.has_transition_frame(), "detaching with a live transition frame");

        self.store.collector.retire_alloc_context(state);
        state.clear_flags(ThreadStateFlags::ATTACHED);
        self.store.unregister(self.state);
        CURRENT_THREAD.with(|slot| slot.set(ptr::null_mut()));

        // SAFETY: the block came from Box::leak in attach_current_thread and
        // is no longer reachable from the registry or the thread-local slot.
        drop(unsafe { Box::from_raw(self.state.as_ptr()) });
        debug!(thread = id, "thread detached");
    }
}

impl std::fmt::Debug for AttachedThread<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AttachedThread").field(self.state()).finish()
    }
}
