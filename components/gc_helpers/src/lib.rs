//! GC Helpers - cooperative collector transitions and allocation fast paths
//!
//! This component provides:
//! - An O(1) thread-local locator for the current thread's state block
//! - Thread state flags gating the helper fast paths
//! - Transition frames that make a helper's caller crawlable by the collector
//! - Bump-pointer allocation from per-thread contexts with a slow-path escape
//! - Generation boundaries and a card table for the write barrier
//! - A reference region heap implementing the collector seam
//!
//! # Examples
//!
//! ```
//! use gc_helpers::{AllocFlags, GcConfig, RegionHeap, RegisterSet, Runtime};
//! use gc_helpers::write_barrier::BarrierState;
//! use std::sync::Arc;
//!
//! let config = GcConfig::default().with_heap_capacity(1 << 20);
//! let heap = Arc::new(RegionHeap::new(config.clone(), Arc::new(BarrierState::new())).unwrap());
//! let runtime = Runtime::new(config, heap);
//!
//! let attached = runtime.attach_current_thread().unwrap();
//! let mut regs = RegisterSet { sp: 0x7fff_0000, ..RegisterSet::default() };
//!
//! let obj = runtime
//!     .allocate(attached.state(), &mut regs, 24, AllocFlags::empty())
//!     .unwrap();
//! assert!(!obj.address().is_null());
//! assert!(!attached.state().alloc_context().is_exhausted());
//! ```

#![warn(clippy::all)]

pub mod alloc;
pub mod collector;
pub mod config;
pub mod frame;
pub mod heap;
pub mod layout;
pub mod runtime;
pub mod thread;
pub mod thread_context;
pub mod write_barrier;

pub use alloc::{round_size, AllocFlags, DOUBLE_ALIGNMENT, OBJECT_ALIGNMENT};
pub use collector::{AllocRequest, Collector, DefaultDispatch, ExceptionDispatch};
pub use config::{GcConfig, ZeroInit};
pub use frame::{
    FrameExit, FrameFlags, FrameGuard, Register, RegisterSet, SlotKind, TransitionFrame,
    DEFAULT_FRAME_SAVE_FLAGS,
};
pub use heap::{HeapStats, RegionHeap};
pub use runtime::Runtime;
pub use thread::{AllocContext, FlagGuard, ThreadState, ThreadStateFlags};
pub use thread_context::{
    current_thread, current_thread_ptr, is_current_thread_attached, try_current_thread,
    AttachedThread, ThreadStore,
};
pub use write_barrier::{BarrierState, Boundaries, CardTable, GenerationBoundaries};

pub use core_types::{Address, AllocError, AttachError, ObjectRef, Unwind};
