//! Contract tests verifying the gc_helpers API surface.
//! These tests pin the exported types, their native bit values and layout.

use gc_helpers::layout::*;
use gc_helpers::{
    AllocContext, AllocFlags, FrameFlags, GcConfig, SlotKind, ThreadStateFlags, TransitionFrame,
    ZeroInit, DEFAULT_FRAME_SAVE_FLAGS,
};
use std::mem::{align_of, size_of};

/// ThreadStateFlags contract: attached 0x01, suppress stress 0x08, no-trigger 0x10
#[test]
fn contract_thread_state_flag_values() {
    assert_eq!(ThreadStateFlags::ATTACHED.bits(), 0x01);
    assert_eq!(ThreadStateFlags::SUPPRESS_GC_STRESS.bits(), 0x08);
    assert_eq!(ThreadStateFlags::DO_NOT_TRIGGER_GC.bits(), 0x10);
}

/// AllocFlags contract: FINALIZE 1, ALIGN8_BIAS 4, ALIGN8 8
#[test]
fn contract_alloc_flag_values() {
    assert_eq!(AllocFlags::FINALIZE.bits(), 0x1);
    assert_eq!(AllocFlags::ALIGN8_BIAS.bits(), 0x4);
    assert_eq!(AllocFlags::ALIGN8.bits(), 0x8);
}

/// FrameFlags contract: save mask and extension bits
#[test]
fn contract_frame_flag_values() {
    assert_eq!(FrameFlags::SAVE_X19.bits(), 0x1);
    assert_eq!(FrameFlags::SAVE_X28.bits(), 0x200);
    assert_eq!(FrameFlags::SAVE_SP.bits(), 0x400);
    assert_eq!(FrameFlags::SAVE_FP.bits(), 0x80000);
    assert_eq!(FrameFlags::SAVE_LR.bits(), 0x100000);
    assert_eq!(FrameFlags::X0_IS_GCREF.bits(), 0x200000);
    assert_eq!(FrameFlags::X0_IS_BYREF.bits(), 0x400000);
    assert_eq!(FrameFlags::THREAD_ABORT.bits(), 0x800000);
    assert_eq!(
        DEFAULT_FRAME_SAVE_FLAGS,
        FrameFlags::SAVE_ALL_PRESERVED | FrameFlags::SAVE_SP
    );
}

/// TransitionFrame contract: 0x80 bytes, pair aligned
#[test]
fn contract_transition_frame_layout() {
    assert_eq!(size_of::<TransitionFrame>(), TRANSITION_FRAME_SIZE);
    assert_eq!(TRANSITION_FRAME_SIZE, 0x80);
    assert_eq!(align_of::<TransitionFrame>(), 16);
    assert_eq!(OFFSETOF_FRAME_THREAD, 0x10);
    assert_eq!(OFFSETOF_FRAME_FLAGS, 0x18);
    assert_eq!(OFFSETOF_FRAME_SP, 0x70);
}

/// AllocContext contract: pointer then limit, adjacent words
#[test]
fn contract_alloc_context_layout() {
    assert_eq!(size_of::<AllocContext>(), 3 * size_of::<usize>());
    assert_eq!(OFFSETOF_THREAD_ALLOC_LIMIT, OFFSETOF_THREAD_ALLOC_PTR + 8);
}

/// SlotKind contract: Object and Interior are references, Scalar is not
#[test]
fn contract_slot_kind_classification() {
    assert!(SlotKind::Object.is_reference());
    assert!(SlotKind::Interior.is_reference());
    assert!(!SlotKind::Scalar.is_reference());
    assert_eq!(
        DEFAULT_FRAME_SAVE_FLAGS.with_x0(SlotKind::Object).x0_kind(),
        Some(SlotKind::Object)
    );
}

/// GcConfig contract: collector zero-init, no stress, no concurrency by default
#[test]
fn contract_gc_config_default() {
    let config = GcConfig::default();
    assert_eq!(config.zero_init, ZeroInit::Collector);
    assert!(!config.gc_stress);
    assert!(!config.concurrent);
    assert_eq!(config.allocation_quantum % 16, 0);
}

/// AllocContext contract: EMPTY is pointer = limit = 0
#[test]
fn contract_empty_alloc_context() {
    assert!(AllocContext::EMPTY.alloc_ptr.is_null());
    assert!(AllocContext::EMPTY.alloc_limit.is_null());
    assert!(AllocContext::EMPTY.is_exhausted());
}
