//! A reference region heap implementing [`Collector`].
//!
//! The heap reserves one zeroed arena up front and splits it in two:
//!
//! ```text
//!   base                     ephemeral_low                  base + capacity
//!    | old space (1/4)        | young space (3/4)                        |
//! ```
//!
//! Small objects are carved from the calling thread's current region while
//! it has room; otherwise the context is refilled with a quantum-sized
//! region from the young space. Large objects are placed directly in the old space. Memory
//! is never reused, so everything handed out is already zero. Installing the
//! heap publishes its generation boundaries and a fresh card table.
//!
//! The heap does not mark or move objects. When a space is exhausted the
//! request fails with [`AllocError::OutOfMemory`].

use crate::alloc::AllocFlags;
use crate::collector::{AllocRequest, Collector};
use crate::config::GcConfig;
use crate::thread::{AllocContext, ThreadState};
use crate::write_barrier::{self, BarrierState, Boundaries, CardTable};
use core_types::{Address, AllocError, ObjectRef};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

const ARENA_ALIGN: usize = 16;

/// Backing memory for the heap.
#[derive(Debug)]
struct Arena {
    base: *mut u8,
    capacity: usize,
}

// SAFETY: the arena is a plain owned allocation; carving is serialized by
// the heap's space lock.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    fn new(capacity: usize) -> Result<Self, AllocError> {
        if capacity == 0 {
            return Err(AllocError::BadRequest("heap capacity must be non-zero"));
        }
        let layout = Layout::from_size_align(capacity, ARENA_ALIGN)
            .map_err(|_| AllocError::BadRequest("heap capacity too large"))?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(AllocError::OutOfMemory {
                requested: capacity,
            });
        }
        Ok(Arena { base, capacity })
    }

    fn start(&self) -> Address {
        Address::from_ptr(self.base)
    }

    fn end(&self) -> Address {
        self.start().add(self.capacity)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: base and layout are exactly what Arena::new allocated.
        unsafe {
            dealloc(
                self.base,
                Layout::from_size_align_unchecked(self.capacity, ARENA_ALIGN),
            );
        }
    }
}

/// Bump cursor over one space of the arena.
#[derive(Debug, Clone, Copy)]
struct BumpSpace {
    start: Address,
    cursor: Address,
    end: Address,
}

impl BumpSpace {
    fn new(start: Address, end: Address) -> Self {
        BumpSpace {
            start,
            cursor: start,
            end,
        }
    }

    fn carve(&mut self, size: usize, flags: AllocFlags) -> Option<Address> {
        let mut start = self.cursor;
        if flags.contains(AllocFlags::ALIGN8) {
            start = start.align_up(16)?;
            if flags.contains(AllocFlags::ALIGN8_BIAS) {
                start = start.add(8);
            }
        }
        let end = start.checked_add(size)?;
        if end > self.end {
            return None;
        }
        self.cursor = end;
        Some(start)
    }

    fn used(&self) -> usize {
        self.cursor.distance_from(self.start)
    }
}

#[derive(Debug)]
struct Spaces {
    old: BumpSpace,
    young: BumpSpace,
}

/// Counters kept by the region heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Requests served by `alloc_slow`
    pub slow_allocations: usize,
    /// Allocation contexts refilled
    pub refills: usize,
    /// Objects placed directly in the old space
    pub large_objects: usize,
    /// Requests that failed for lack of space
    pub out_of_memory: usize,
    /// Bytes carved from retired contexts
    pub retired_bytes: usize,
}

#[derive(Debug, Default)]
struct AtomicStats {
    slow_allocations: AtomicUsize,
    refills: AtomicUsize,
    large_objects: AtomicUsize,
    out_of_memory: AtomicUsize,
    retired_bytes: AtomicUsize,
}

/// Region heap backing allocation contexts.
pub struct RegionHeap {
    config: GcConfig,
    arena: Arena,
    spaces: Mutex<Spaces>,
    barriers: Arc<BarrierState>,
    published: SegQueue<ObjectRef>,
    finalization: SegQueue<ObjectRef>,
    stats: AtomicStats,
}

impl RegionHeap {
    /// Reserves `config.heap_capacity` bytes and installs the heap's
    /// boundaries and card table into `barriers`.
    pub fn new(config: GcConfig, barriers: Arc<BarrierState>) -> Result<Self, AllocError> {
        let arena = Arena::new(config.heap_capacity)?;
        let split = arena.start().add(config.heap_capacity / 4).align_down(ARENA_ALIGN);
        let spaces = Spaces {
            old: BumpSpace::new(arena.start(), split),
            young: BumpSpace::new(split, arena.end()),
        };

        barriers.boundaries().update(Boundaries {
            lowest_address: arena.start(),
            highest_address: arena.end(),
            ephemeral_low: split,
            ephemeral_high: arena.end(),
        });
        barriers.install_card_table(CardTable::with_default_card_size(
            arena.start(),
            config.heap_capacity,
        ));

        debug!(
            base = %arena.start(),
            capacity = config.heap_capacity,
            ephemeral_low = %split,
            "region heap reserved"
        );

        Ok(RegionHeap {
            config,
            arena,
            spaces: Mutex::new(spaces),
            barriers,
            published: SegQueue::new(),
            finalization: SegQueue::new(),
            stats: AtomicStats::default(),
        })
    }

    /// A heap wired to the process-wide barrier state.
    pub fn with_global_barriers(config: GcConfig) -> Result<Self, AllocError> {
        Self::new(config, Arc::clone(write_barrier::global()))
    }

    /// The barrier state this heap maintains.
    pub fn barriers(&self) -> &Arc<BarrierState> {
        &self.barriers
    }

    /// Returns true if `addr` lies inside the arena.
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.arena.start() && addr < self.arena.end()
    }

    /// Returns true if `addr` lies in the young space.
    pub fn is_young(&self, addr: Address) -> bool {
        let spaces = self.spaces.lock();
        addr >= spaces.young.start && addr < spaces.young.end
    }

    /// Bytes carved from the old and young spaces.
    pub fn used(&self) -> (usize, usize) {
        let spaces = self.spaces.lock();
        (spaces.old.used(), spaces.young.used())
    }

    /// Snapshot of the heap's counters.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            slow_allocations: self.stats.slow_allocations.load(Ordering::Relaxed),
            refills: self.stats.refills.load(Ordering::Relaxed),
            large_objects: self.stats.large_objects.load(Ordering::Relaxed),
            out_of_memory: self.stats.out_of_memory.load(Ordering::Relaxed),
            retired_bytes: self.stats.retired_bytes.load(Ordering::Relaxed),
        }
    }

    /// Takes every object published since the last drain, oldest first.
    pub fn drain_published(&self) -> Vec<ObjectRef> {
        std::iter::from_fn(|| self.published.pop()).collect()
    }

    /// Takes every object registered for finalization since the last drain.
    pub fn drain_finalization_queue(&self) -> Vec<ObjectRef> {
        std::iter::from_fn(|| self.finalization.pop()).collect()
    }

    fn out_of_memory(&self, requested: usize) -> AllocError {
        self.stats.out_of_memory.fetch_add(1, Ordering::Relaxed);
        AllocError::OutOfMemory { requested }
    }

    fn alloc_large(&self, request: AllocRequest) -> Result<ObjectRef, AllocError> {
        let start = self
            .spaces
            .lock()
            .old
            .carve(request.size, request.flags)
            .ok_or_else(|| self.out_of_memory(request.size))?;
        self.stats.large_objects.fetch_add(1, Ordering::Relaxed);
        ObjectRef::from_address(start).ok_or(AllocError::BadRequest("null object address"))
    }

    /// Places a small object, reusing the thread's current region while it
    /// has room and refilling the context only when it does not.
    fn carve_small(
        &self,
        thread: &ThreadState,
        request: AllocRequest,
    ) -> Result<ObjectRef, AllocError> {
        let mut context = thread.alloc_context();
        if let Some(object) = context.try_bump(request.size, request.flags) {
            thread.set_alloc_context(context);
            return Ok(object);
        }
        self.refill_and_carve(thread, request)
    }

    fn refill_and_carve(
        &self,
        thread: &ThreadState,
        request: AllocRequest,
    ) -> Result<ObjectRef, AllocError> {
        // Room for the object plus alignment padding at the region start.
        let needed = request
            .size
            .checked_add(8)
            .and_then(|n| n.checked_add(15))
            .map(|n| n & !15)
            .ok_or(AllocError::Overflow)?;
        let region_size = needed.max(self.config.allocation_quantum);

        let region = self
            .spaces
            .lock()
            .young
            .carve(region_size, AllocFlags::ALIGN8)
            .ok_or_else(|| self.out_of_memory(request.size))?;

        let previous = thread.alloc_context();
        let mut context = AllocContext::new(region, region.add(region_size));
        context.alloc_bytes = previous.alloc_bytes;

        let object = context
            .try_bump(request.size, request.flags)
            .ok_or(AllocError::BadRequest("refilled region cannot hold object"))?;
        thread.set_alloc_context(context);

        self.stats.refills.fetch_add(1, Ordering::Relaxed);
        trace!(
            thread = thread.managed_thread_id(),
            region = %region,
            size = region_size,
            abandoned = previous.remaining(),
            "allocation context refilled"
        );
        Ok(object)
    }
}

impl Collector for RegionHeap {
    fn alloc_slow(&self, thread: &ThreadState, request: AllocRequest) -> Result<ObjectRef, AllocError> {
        self.stats.slow_allocations.fetch_add(1, Ordering::Relaxed);

        let object = if request.size >= self.config.large_object_threshold {
            self.alloc_large(request)?
        } else {
            self.carve_small(thread, request)?
        };

        if request.flags.contains(AllocFlags::FINALIZE) {
            self.register_for_finalization(object)?;
        }
        Ok(object)
    }

    fn retire_alloc_context(&self, thread: &ThreadState) {
        let context = thread.alloc_context();
        self.stats
            .retired_bytes
            .fetch_add(context.alloc_bytes, Ordering::Relaxed);
        thread.set_alloc_context(AllocContext::EMPTY);
    }

    fn publish_object(&self, object: ObjectRef) {
        self.published.push(object);
    }

    fn register_for_finalization(&self, object: ObjectRef) -> Result<(), AllocError> {
        self.finalization.push(object);
        Ok(())
    }
}

impl std::fmt::Debug for RegionHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionHeap")
            .field("base", &self.arena.start())
            .field("capacity", &self.arena.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
