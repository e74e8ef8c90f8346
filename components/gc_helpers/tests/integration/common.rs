//! Scripted collaborators shared by the scenario tests.

use gc_helpers::{
    Address, AllocContext, AllocError, AllocRequest, Collector, ExceptionDispatch, FrameFlags,
    ObjectRef, ThreadState, Unwind,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// What the collector saw when `alloc_slow` was entered.
#[derive(Debug, Clone, Copy)]
pub struct SlowEntry {
    pub request: AllocRequest,
    pub context: AllocContext,
    pub frame_flags: Option<FrameFlags>,
    pub entry_sp: Option<Address>,
}

/// A collector that refills contexts from a private zeroed buffer and
/// records every interaction.
pub struct ScriptedCollector {
    buffer: Box<[u128]>,
    cursor: Mutex<usize>,
    region_size: usize,
    pub slow_calls: AtomicUsize,
    pub entries: Mutex<Vec<SlowEntry>>,
    pub published: Mutex<Vec<ObjectRef>>,
    pub finalizable: Mutex<Vec<ObjectRef>>,
    pub fail_with: Mutex<Option<AllocError>>,
    pub abort_next: AtomicBool,
}

impl ScriptedCollector {
    pub fn new(region_size: usize) -> Self {
        ScriptedCollector {
            buffer: vec![0u128; 64 * 1024].into_boxed_slice(),
            cursor: Mutex::new(0),
            region_size,
            slow_calls: AtomicUsize::new(0),
            entries: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            finalizable: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            abort_next: AtomicBool::new(false),
        }
    }

    /// Reserves `size` bytes of real, 16-aligned memory from the buffer.
    pub fn lend_region(&self, size: usize) -> (Address, Address) {
        let size = (size + 15) & !15;
        let mut cursor = self.cursor.lock();
        assert!(*cursor + size <= self.buffer.len() * 16, "scripted buffer exhausted");
        let start = Address::from_ptr(self.buffer.as_ptr()).add(*cursor);
        *cursor += size;
        (start, start.add(size))
    }

    pub fn slow_calls(&self) -> usize {
        self.slow_calls.load(Ordering::SeqCst)
    }

    pub fn last_entry(&self) -> SlowEntry {
        *self.entries.lock().last().expect("slow path was never entered")
    }
}

impl Collector for ScriptedCollector {
    fn alloc_slow(&self, thread: &ThreadState, request: AllocRequest) -> Result<ObjectRef, AllocError> {
        self.slow_calls.fetch_add(1, Ordering::SeqCst);

        // SAFETY: the helper is parked in this call with its frame pushed.
        let frame = unsafe { thread.transition_frame_mut() };
        self.entries.lock().push(SlowEntry {
            request,
            context: thread.alloc_context(),
            frame_flags: frame.as_ref().map(|f| f.flags()),
            entry_sp: frame.as_ref().and_then(|f| f.entry_sp()),
        });

        if self.abort_next.swap(false, Ordering::SeqCst) {
            if let Some(frame) = frame {
                frame.request_thread_abort();
            }
        }
        if let Some(error) = *self.fail_with.lock() {
            return Err(error);
        }

        let (start, limit) = self.lend_region(self.region_size.max(request.size + 16));
        let mut context = AllocContext::new(start, limit);
        let object = context
            .try_bump(request.size, request.flags)
            .ok_or(AllocError::OutOfMemory {
                requested: request.size,
            })?;
        thread.set_alloc_context(context);

        if request.flags.contains(gc_helpers::AllocFlags::FINALIZE) {
            self.finalizable.lock().push(object);
        }
        Ok(object)
    }

    fn publish_object(&self, object: ObjectRef) {
        self.published.lock().push(object);
    }

    fn register_for_finalization(&self, object: ObjectRef) -> Result<(), AllocError> {
        self.finalizable.lock().push(object);
        Ok(())
    }
}

/// Dispatcher that counts deliveries.
#[derive(Default)]
pub struct CountingDispatch {
    pub failures: Mutex<Vec<AllocError>>,
    pub aborts: AtomicUsize,
}

impl ExceptionDispatch for CountingDispatch {
    fn failed_allocation(&self, _thread: &ThreadState, error: AllocError) -> Unwind {
        self.failures.lock().push(error);
        Unwind::FailedAllocation(error)
    }

    fn thread_abort(&self, _thread: &ThreadState) -> Unwind {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Unwind::ThreadAbort
    }
}
